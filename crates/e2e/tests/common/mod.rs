//! In-process stand-in for the user-management application.
//!
//! Serves the team pages with the same GOV.UK markup the real templates use,
//! plus a few diagnostic routes (`/echo`, `/late`, `/slow`, ...) for
//! exercising the session.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Router};

use team_e2e::SessionConfig;

#[derive(Clone, Default)]
pub struct AppState {
    /// Requests served by `/late`
    pub late_hits: Arc<AtomicUsize>,
    /// Requests served by `/flaky`
    pub flaky_hits: Arc<AtomicUsize>,
}

pub struct TestApp {
    pub addr: SocketAddr,
    pub state: AppState,
}

impl TestApp {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Session config pointed at this app, with short retry windows
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            base_url: self.base_url(),
            navigation_timeout: Duration::from_millis(500),
            lookup_timeout: Duration::from_millis(300),
            retry_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }
}

struct User {
    id: u32,
    name: &'static str,
    email: &'static str,
    status: &'static str,
}

const USERS: &[User] = &[
    User {
        id: 47,
        name: "system admin",
        email: "system.admin@opgtest.com",
        status: "Active",
    },
    User {
        id: 12,
        name: "John",
        email: "john@opgtest.com",
        status: "Active",
    },
];

pub async fn spawn_app() -> TestApp {
    let state = AppState::default();
    let app = Router::new()
        .route("/health-check", get(|| async { "OK" }))
        .route("/login", get(login))
        .route("/teams/:id", get(team))
        .route("/teams/add-member/:id", get(add_member))
        .route("/echo", get(echo))
        .route("/form", get(form_page).post(form_post))
        .route("/redirect", get(redirect))
        .route("/late", get(late))
        .route("/slow", get(slow))
        .route("/flaky", get(flaky))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp { addr, state }
}

pub fn specs_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("specs")
}

fn cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

fn authenticated(headers: &HeaderMap) -> bool {
    let bypass = headers
        .get("OPG-Bypass-Membrane")
        .map(|v| v == "1")
        .unwrap_or(false);
    bypass || cookies(headers).iter().any(|(k, _)| k == "XSRF-TOKEN")
}

fn page(title: &str, main: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en" class="govuk-template">
<head><title>{title} - Sirius</title></head>
<body class="govuk-template__body">
  <div class="govuk-width-container">
    <main class="govuk-main-wrapper" id="main-content" role="main">
{main}
    </main>
  </div>
</body>
</html>"#
    ))
}

async fn login() -> Html<String> {
    page("Sign in", r#"<h1 class="govuk-heading-xl">Sign in</h1>"#)
}

async fn team(Path(id): Path<u32>, headers: HeaderMap) -> Response {
    if !authenticated(&headers) {
        return Redirect::to("/login").into_response();
    }
    if id != 65 {
        return StatusCode::NOT_FOUND.into_response();
    }

    let main = format!(
        r#"      <h1 class="govuk-heading-xl">Cool Team</h1>
      <a class="govuk-button" href="/teams/edit/{id}">Edit team</a>
      <a class="govuk-button govuk-button--secondary" href="/teams/add-member/{id}">Add user to team</a>
      <table class="govuk-table">
        <thead class="govuk-table__head">
          <tr class="govuk-table__row">
            <th scope="col" class="govuk-table__header">Name</th>
            <th scope="col" class="govuk-table__header">Email</th>
          </tr>
        </thead>
        <tbody class="govuk-table__body">
          <tr class="govuk-table__row">
            <td class="govuk-table__cell">John</td>
            <td class="govuk-table__cell">
              john@opgtest.com
            </td>
          </tr>
        </tbody>
      </table>"#
    );
    page("Team", &main).into_response()
}

async fn add_member(
    Path(id): Path<u32>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authenticated(&headers) {
        return Redirect::to("/login").into_response();
    }
    if id != 65 {
        return StatusCode::NOT_FOUND.into_response();
    }

    let search = query.get("search").cloned().unwrap_or_default();
    let mut main = String::new();

    if !search.is_empty() && search.len() < 3 {
        main.push_str(
            r#"      <div class="govuk-error-summary"><ul class="govuk-error-summary__list"><li>Search term must be at least three characters</li></ul></div>
"#,
        );
    }

    main.push_str(&format!(
        r#"      <h1 class="govuk-heading-xl">Add user to Cool Team</h1>
      <form method="get" action="/teams/add-member/{id}">
        <label class="govuk-label" for="f-search">Search for a user</label>
        <input class="govuk-input" id="f-search" name="search" type="search" value="{search}">
        <button class="govuk-button" type="submit">Search</button>
      </form>
"#
    ));

    if search.len() >= 3 {
        let needle = search.to_lowercase();
        let rows: String = USERS
            .iter()
            .filter(|u| u.name.to_lowercase().contains(&needle) || u.email.contains(&needle))
            .map(|u| {
                format!(
                    r#"          <tr class="govuk-table__row">
            <td class="govuk-table__cell">{}</td>
            <td class="govuk-table__cell">{}</td>
            <td class="govuk-table__cell">{}</td>
            <td class="govuk-table__cell"><a class="govuk-link" href="/edit-user/{}">Edit</a></td>
          </tr>
"#,
                    u.name, u.email, u.status, u.id
                )
            })
            .collect();

        main.push_str(&format!(
            r#"      <table class="govuk-table">
        <thead class="govuk-table__head">
          <tr class="govuk-table__row"><th>Name</th><th>Email</th><th>Status</th><th></th></tr>
        </thead>
        <tbody class="govuk-table__body">
{rows}        </tbody>
      </table>
"#
        ));
    }

    page("Add user to team", &main).into_response()
}

/// Lists the request's cookies and headers
async fn echo(headers: HeaderMap) -> Html<String> {
    let mut main = String::from("<ul id=\"cookies\">\n");
    for (k, v) in cookies(&headers) {
        main.push_str(&format!("<li class=\"cookie\" data-name=\"{k}\">{k}={v}</li>\n"));
    }
    main.push_str("</ul>\n<ul id=\"headers\">\n");
    for (k, v) in &headers {
        if k == header::COOKIE {
            continue;
        }
        main.push_str(&format!(
            "<li class=\"header\" data-name=\"{}\">{}: {}</li>\n",
            k.as_str(),
            k.as_str(),
            v.to_str().unwrap_or_default()
        ));
    }
    main.push_str("</ul>");
    page("Echo", &main)
}

async fn form_page() -> Html<String> {
    page(
        "Form",
        r#"      <form method="post" action="/form">
        <input id="name" name="name" value="Jane">
        <input id="email" name="email" type="email" value="">
        <input id="readonly" name="locked" value="x" readonly>
        <button class="govuk-button" type="submit" name="save" value="yes">Save</button>
        <button class="govuk-button" type="button">Cancel</button>
      </form>
      <p class="duplicate">one</p>
      <p class="duplicate">two</p>"#,
    )
}

async fn form_post(Form(fields): Form<Vec<(String, String)>>) -> Html<String> {
    let items: String = fields
        .iter()
        .map(|(k, v)| format!("<li class=\"field\">{k}={v}</li>\n"))
        .collect();
    page("Saved", &format!("<ul id=\"fields\">\n{items}</ul>"))
}

async fn redirect() -> Response {
    (
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/echo"),
            (header::SET_COOKIE, "session=from-redirect; Path=/; HttpOnly"),
        ],
    )
        .into_response()
}

/// Renders the `#ready` marker only from the third request on
async fn late(State(state): State<AppState>) -> Html<String> {
    let hits = state.late_hits.fetch_add(1, Ordering::SeqCst) + 1;
    if hits >= 3 {
        page("Late", r#"<p id="ready">Ready</p>"#)
    } else {
        page("Late", r#"<p id="loading">Loading</p>"#)
    }
}

/// Serves one `.item` on the first request and a 500 page afterwards
async fn flaky(State(state): State<AppState>) -> Response {
    let hits = state.flaky_hits.fetch_add(1, Ordering::SeqCst) + 1;
    if hits == 1 {
        page("Flaky", r#"<p class="item">first</p>"#).into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            page("Error", "<h1>Sorry, there is a problem with the service</h1>"),
        )
            .into_response()
    }
}

async fn slow() -> Html<String> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    page("Slow", "<p>eventually</p>")
}
