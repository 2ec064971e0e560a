//! Headless browser session
//!
//! A [`Session`] plays the part of one isolated browser context: it owns a
//! cookie jar, the recorded preconditions and the current document. Pages are
//! fetched over HTTP and queried with CSS selectors; typing and clicking are
//! emulated through the elements' default actions (form fields, submit
//! buttons, links). Scripts are never executed.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, LOCATION, SET_COOKIE};
use reqwest::{Method, StatusCode};
use scraper::Selector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};
use url::Url;

use crate::dom::{parse_selector, ClickTarget, FieldValues, FormSubmission, Snapshot};
use crate::error::{E2eError, E2eResult};
use crate::spec::{Action, Assertion, Precondition, PreconditionKind, Visit};
use crate::wait::RetryPolicy;

const MAX_REDIRECTS: usize = 10;

/// Configuration shared by every session a runner creates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the application under test
    pub base_url: String,

    /// Budget for one navigation, redirects included
    #[serde(with = "millis")]
    pub navigation_timeout: Duration,

    /// How long lookups and assertions keep retrying
    #[serde(with = "millis")]
    pub lookup_timeout: Duration,

    #[serde(with = "millis")]
    pub retry_interval: Duration,

    /// Re-fetch GET documents between retries
    pub refresh_on_retry: bool,

    pub user_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8888".to_string(),
            navigation_timeout: Duration::from_secs(30),
            lookup_timeout: Duration::from_secs(4),
            retry_interval: Duration::from_millis(100),
            refresh_on_retry: true,
            user_agent: concat!("team-e2e/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl SessionConfig {
    pub fn lookup_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.lookup_timeout,
            interval: self.retry_interval,
        }
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// The current document
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub status: StatusCode,
    pub body: String,
    /// Per-request headers from the visit that loaded this page
    extra_headers: HeaderMap,
    /// Loaded by GET, so it can be fetched again
    refreshable: bool,
}

struct Request {
    method: Method,
    url: Url,
    extra_headers: HeaderMap,
    form: Option<Vec<(String, String)>>,
}

/// One isolated browser context
pub struct Session {
    config: SessionConfig,
    base: Url,
    client: reqwest::Client,
    /// Cookies recorded as preconditions, sent with every request
    cookies: BTreeMap<String, String>,
    /// Cookies issued by the application through `Set-Cookie`
    jar: Jar,
    headers: HeaderMap,
    page: Option<Page>,
    typed: FieldValues,
}

impl Session {
    pub fn new(config: SessionConfig) -> E2eResult<Self> {
        let base = Url::parse(&config.base_url)?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.navigation_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            config,
            base,
            client,
            cookies: BTreeMap::new(),
            jar: Jar::default(),
            headers: HeaderMap::new(),
            page: None,
            typed: FieldValues::new(),
        })
    }

    /// Record a cookie or header for the next navigation
    pub fn set_precondition(&mut self, kind: &str, key: &str, value: &str) -> E2eResult<()> {
        match kind.parse::<PreconditionKind>()? {
            PreconditionKind::Cookie => {
                if key.is_empty() || key.contains(|c: char| c == ';' || c == '=' || c.is_whitespace()) {
                    return Err(E2eError::Config(format!("invalid cookie name '{}'", key)));
                }
                if value.contains(';') {
                    return Err(E2eError::Config(format!(
                        "cookie '{}' value must not contain ';'",
                        key
                    )));
                }
                HeaderValue::from_str(value).map_err(|e| {
                    E2eError::Config(format!("invalid value for cookie '{}': {}", key, e))
                })?;
                self.cookies.insert(key.to_string(), value.to_string());
            }
            PreconditionKind::Header => {
                let name = HeaderName::from_bytes(key.as_bytes())
                    .map_err(|e| E2eError::Config(format!("invalid header name '{}': {}", key, e)))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| E2eError::Config(format!("invalid value for header '{}': {}", key, e)))?;

                if name == COOKIE {
                    let raw = value.to_str().map_err(|e| {
                        E2eError::Config(format!("invalid value for header '{}': {}", key, e))
                    })?;
                    self.cookies.extend(parse_cookie_pairs(raw));
                } else {
                    self.headers.insert(name, value);
                }
            }
        }
        trace!("precondition {} {}={}", kind, key, value);
        Ok(())
    }

    pub fn apply(&mut self, precondition: &Precondition) -> E2eResult<()> {
        self.set_precondition(&precondition.kind, &precondition.key, &precondition.value)
    }

    /// Navigate to `visit.path`, attaching all recorded preconditions
    pub async fn visit(&mut self, visit: &Visit) -> E2eResult<()> {
        let url = self.resolve_path(&visit.path)?;

        let mut extra_headers = HeaderMap::new();
        for (name, value) in &visit.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| E2eError::Config(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| E2eError::Config(format!("invalid header value: {}", e)))?;
            extra_headers.insert(name, value);
        }

        info!("visit {}", url);
        let page = self
            .navigate(Request {
                method: Method::GET,
                url,
                extra_headers,
                form: None,
            })
            .await?;

        if visit.fail_on_status_code && !page.status.is_success() {
            return Err(E2eError::Navigation {
                url: page.url.to_string(),
                status: page.status.as_u16(),
            });
        }

        self.load(page);
        Ok(())
    }

    /// Clear the unique element matching `selector` and enter `text` verbatim
    pub async fn type_text(&mut self, selector: &str, text: &str) -> E2eResult<()> {
        let position = self.locate_unique(selector).await?;

        Snapshot::parse(&self.page()?.body)
            .check_typeable(position)
            .map_err(|reason| E2eError::InvalidTarget {
                action: "type into",
                selector: selector.to_string(),
                reason,
            })?;

        debug!("type {:?} into {}", text, selector);
        self.typed.insert(position, text.to_string());
        Ok(())
    }

    /// Dispatch the default click action of the unique element matching `selector`
    pub async fn click(&mut self, selector: &str) -> E2eResult<()> {
        let position = self.locate_unique(selector).await?;
        let page = self.page()?;
        let target = Snapshot::parse(&page.body).click_target(position, &self.typed);
        let base = page.url.clone();

        let request = match target {
            ClickTarget::Submit(submission) => submit_request(&base, submission)?,
            ClickTarget::Link(href) if href.starts_with('#') => {
                debug!("click {}: same-document link", selector);
                return Ok(());
            }
            ClickTarget::Link(href) => Request {
                method: Method::GET,
                url: base.join(&href)?,
                extra_headers: HeaderMap::new(),
                form: None,
            },
            ClickTarget::Inert => {
                debug!("click {}: no default action", selector);
                return Ok(());
            }
        };

        debug!("click {} -> {} {}", selector, request.method, request.url);
        let page = self.navigate(request).await?;
        self.load(page);
        Ok(())
    }

    pub async fn perform(&mut self, action: &Action) -> E2eResult<()> {
        match action {
            Action::Type { selector, text } => self.type_text(selector, text).await,
            Action::Click { selector } => self.click(selector).await,
        }
    }

    /// Exactly `expected` elements match `selector`
    pub async fn assert_count(&mut self, selector: &str, expected: usize) -> E2eResult<()> {
        self.retry_check(selector, |snapshot, sel| {
            let actual = snapshot.count(sel);
            if actual == expected {
                Ok(())
            } else {
                Err(E2eError::assertion(selector, "element count differs", expected, actual))
            }
        })
        .await
    }

    /// No element matches `selector`
    pub async fn assert_absent(&mut self, selector: &str) -> E2eResult<()> {
        self.retry_check(selector, |snapshot, sel| match snapshot.count(sel) {
            0 => Ok(()),
            n => Err(E2eError::assertion(
                selector,
                "expected no matching elements",
                0,
                n,
            )),
        })
        .await
    }

    /// A matching element's rendered text contains `text`
    pub async fn assert_contains_text(&mut self, selector: &str, text: &str) -> E2eResult<()> {
        let timeout_ms = self.config.lookup_timeout.as_millis() as u64;
        self.retry_check(selector, |snapshot, sel| {
            let texts = snapshot.texts(sel);
            if texts.is_empty() {
                return Err(E2eError::ElementNotFound {
                    selector: selector.to_string(),
                    timeout_ms,
                });
            }
            if texts.iter().any(|t| t.contains(text)) {
                Ok(())
            } else {
                Err(E2eError::assertion(
                    selector,
                    "no matching element contains the text",
                    format!("{:?}", text),
                    format!("{:?}", texts),
                ))
            }
        })
        .await
    }

    /// The element children of the matches contain `texts` position by position
    pub async fn assert_children_text_in_order(
        &mut self,
        selector: &str,
        texts: &[String],
    ) -> E2eResult<()> {
        let timeout_ms = self.config.lookup_timeout.as_millis() as u64;
        self.retry_check(selector, |snapshot, sel| {
            if snapshot.count(sel) == 0 {
                return Err(E2eError::ElementNotFound {
                    selector: selector.to_string(),
                    timeout_ms,
                });
            }
            let children = snapshot.child_texts(sel);
            for (index, expected) in texts.iter().enumerate() {
                match children.get(index) {
                    None => {
                        return Err(E2eError::assertion(
                            selector,
                            format!("child at index {} is missing", index),
                            format!("{:?}", expected),
                            format!("{} child element(s)", children.len()),
                        ))
                    }
                    Some(actual) if !actual.contains(expected.as_str()) => {
                        return Err(E2eError::assertion(
                            selector,
                            format!("child at index {} does not contain the expected text", index),
                            format!("{:?}", expected),
                            format!("{:?}", actual),
                        ))
                    }
                    Some(_) => {}
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn check(&mut self, assertion: &Assertion) -> E2eResult<()> {
        match assertion {
            Assertion::Count { selector, expected } => self.assert_count(selector, *expected).await,
            Assertion::Absent { selector } => self.assert_absent(selector).await,
            Assertion::ContainsText { selector, text } => {
                self.assert_contains_text(selector, text).await
            }
            Assertion::ChildrenTextInOrder { selector, texts } => {
                self.assert_children_text_in_order(selector, texts).await
            }
        }
    }

    pub fn page(&self) -> E2eResult<&Page> {
        self.page.as_ref().ok_or(E2eError::NoPage)
    }

    /// Cookies a request to the current page would carry
    pub fn cookies(&self) -> BTreeMap<String, String> {
        let url = self.page.as_ref().map_or(&self.base, |page| &page.url);
        self.cookies_for(url)
    }

    /// Precondition cookies merged with the jar's cookies in scope for `url`
    fn cookies_for(&self, url: &Url) -> BTreeMap<String, String> {
        let mut cookies = self.cookies.clone();
        if let Some(issued) = self.jar.cookies(url) {
            cookies.extend(parse_cookie_pairs(&String::from_utf8_lossy(issued.as_bytes())));
        }
        cookies
    }

    fn load(&mut self, page: Page) {
        debug!("loaded {} ({})", page.url, page.status);
        self.page = Some(page);
        self.typed.clear();
    }

    fn resolve_path(&self, path: &str) -> E2eResult<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(Url::parse(path)?);
        }
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{}/{}", base, path))?)
    }

    /// Poll until exactly one element matches
    async fn locate_unique(&mut self, selector: &str) -> E2eResult<usize> {
        let sel = parse_selector(selector)?;
        let mut backoff = self.config.lookup_policy().start();

        loop {
            let positions = Snapshot::parse(&self.page()?.body).positions(&sel);
            match positions.as_slice() {
                [position] => return Ok(*position),
                [] => {}
                many => {
                    return Err(E2eError::AmbiguousElement {
                        selector: selector.to_string(),
                        count: many.len(),
                    })
                }
            }

            if !backoff.wait().await {
                return Err(E2eError::ElementNotFound {
                    selector: selector.to_string(),
                    timeout_ms: self.config.lookup_timeout.as_millis() as u64,
                });
            }
            self.refresh().await?;
        }
    }

    /// Re-evaluate `check` until it passes or the lookup timeout elapses.
    /// Only assertion and lookup failures are retried.
    async fn retry_check<F>(&mut self, selector: &str, check: F) -> E2eResult<()>
    where
        F: Fn(&Snapshot, &Selector) -> E2eResult<()>,
    {
        let sel = parse_selector(selector)?;
        let mut backoff = self.config.lookup_policy().start();

        loop {
            let outcome = check(&Snapshot::parse(&self.page()?.body), &sel);
            match outcome {
                Ok(()) => return Ok(()),
                Err(e @ (E2eError::Assertion { .. } | E2eError::ElementNotFound { .. })) => {
                    if !backoff.wait().await {
                        return Err(e);
                    }
                    self.refresh().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch the current GET document again, unless the user has typed into it
    async fn refresh(&mut self) -> E2eResult<()> {
        if !self.config.refresh_on_retry || !self.typed.is_empty() {
            return Ok(());
        }
        let Some(page) = self.page.as_ref().filter(|p| p.refreshable) else {
            return Ok(());
        };

        let request = Request {
            method: Method::GET,
            url: page.url.clone(),
            extra_headers: page.extra_headers.clone(),
            form: None,
        };
        trace!("refresh {}", request.url);
        let page = self.navigate(request).await?;
        if !page.status.is_success() {
            debug!(
                "refresh of {} returned {}; keeping the loaded document",
                page.url, page.status
            );
            return Ok(());
        }
        self.page = Some(page);
        Ok(())
    }

    async fn navigate(&mut self, request: Request) -> E2eResult<Page> {
        let timeout = self.config.navigation_timeout;
        let url = request.url.to_string();

        match tokio::time::timeout(timeout, self.follow(request)).await {
            Ok(result) => result.map_err(|e| match e {
                E2eError::Http(err) if err.is_timeout() => E2eError::NavigationTimeout {
                    url,
                    timeout_ms: timeout.as_millis() as u64,
                },
                other => other,
            }),
            Err(_) => Err(E2eError::NavigationTimeout {
                url,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Send a request and follow redirects, collecting cookies at every hop
    async fn follow(&mut self, request: Request) -> E2eResult<Page> {
        let Request {
            mut method,
            mut url,
            extra_headers,
            mut form,
        } = request;

        for _ in 0..=MAX_REDIRECTS {
            let mut builder = self
                .client
                .request(method.clone(), url.clone())
                .headers(self.request_headers(&url, &extra_headers)?);
            if let Some(fields) = &form {
                builder = builder.form(fields);
            }

            let response = builder.send().await?;
            self.store_cookies(&url, response.headers());

            let status = response.status();
            if status.is_redirection() {
                if let Some(location) = response.headers().get(LOCATION) {
                    let location = location.to_str().map_err(|e| {
                        E2eError::Config(format!("unreadable Location header: {}", e))
                    })?;
                    url = url.join(location)?;
                    if status == StatusCode::SEE_OTHER
                        || (method == Method::POST
                            && matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND))
                    {
                        method = Method::GET;
                        form = None;
                    }
                    trace!("redirect {} -> {}", status, url);
                    continue;
                }
            }

            let refreshable = method == Method::GET;
            let body = response.text().await?;
            return Ok(Page {
                url,
                status,
                body,
                extra_headers,
                refreshable,
            });
        }

        Err(E2eError::Navigation {
            url: url.to_string(),
            status: StatusCode::LOOP_DETECTED.as_u16(),
        })
    }

    /// Precondition headers, then the cookies in scope for `url`, then per-request
    /// overrides. A literal `Cookie` override is appended rather than replacing them.
    fn request_headers(&self, url: &Url, extra: &HeaderMap) -> E2eResult<HeaderMap> {
        let mut headers = self.headers.clone();

        let mut cookie = self
            .cookies_for(url)
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ");

        for (name, value) in extra {
            if name == COOKIE {
                if !cookie.is_empty() {
                    cookie.push_str("; ");
                }
                cookie.push_str(&String::from_utf8_lossy(value.as_bytes()));
            } else {
                headers.insert(name.clone(), value.clone());
            }
        }

        if !cookie.is_empty() {
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| E2eError::Config(format!("invalid Cookie header: {}", e)))?;
            headers.insert(COOKIE, value);
        }
        Ok(headers)
    }

    /// Hand `Set-Cookie` headers to the jar, which applies `Expires`, `Max-Age`,
    /// `Path` and `Domain`. A server cookie supersedes a precondition cookie of
    /// the same name.
    fn store_cookies(&mut self, url: &Url, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            let raw = String::from_utf8_lossy(value.as_bytes());
            let name = raw
                .split(';')
                .next()
                .and_then(|pair| pair.split_once('='))
                .map(|(name, _)| name.trim());
            if let Some(name) = name {
                if self.cookies.remove(name).is_some() {
                    trace!("cookie {} now managed by {}", name, url);
                }
            }
        }
        self.jar.set_cookies(&mut headers.get_all(SET_COOKIE).iter(), url);
    }
}

fn submit_request(base: &Url, submission: FormSubmission) -> E2eResult<Request> {
    let mut url = match &submission.action {
        Some(action) => base.join(action)?,
        None => base.clone(),
    };
    url.set_fragment(None);

    if submission.method == "POST" {
        return Ok(Request {
            method: Method::POST,
            url,
            extra_headers: HeaderMap::new(),
            form: Some(submission.fields),
        });
    }

    url.set_query(None);
    if !submission.fields.is_empty() {
        url.query_pairs_mut().extend_pairs(submission.fields.iter());
    }
    Ok(Request {
        method: Method::GET,
        url,
        extra_headers: HeaderMap::new(),
        form: None,
    })
}

fn parse_cookie_pairs(raw: &str) -> impl Iterator<Item = (String, String)> + '_ {
    raw.split(';').filter_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
    })
}
