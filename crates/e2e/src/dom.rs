//! Parsed document snapshots: selector queries, rendered text and form data

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};

use crate::error::{E2eError, E2eResult};

/// Compile a CSS selector
pub fn parse_selector(selector: &str) -> E2eResult<Selector> {
    Selector::parse(selector).map_err(|e| E2eError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Text content of an element with whitespace runs collapsed
pub fn rendered_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for word in element.text().flat_map(str::split_whitespace) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Field values entered by the user, keyed by element position in document order
pub type FieldValues = HashMap<usize, String>;

/// What a click on an element does by default
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
    /// Submit button belonging to a form
    Submit(FormSubmission),
    /// Anchor with an href
    Link(String),
    /// No default action without script
    Inert,
}

/// A form submission ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSubmission {
    pub method: String,
    /// Raw action attribute; `None` submits to the document URL
    pub action: Option<String>,
    pub fields: Vec<(String, String)>,
}

/// One parsed HTML document. Not `Send`; build it, query it and drop it
/// without holding it across an await.
pub struct Snapshot {
    html: Html,
}

impl Snapshot {
    pub fn parse(body: &str) -> Self {
        Self {
            html: Html::parse_document(body),
        }
    }

    fn elements(&self) -> impl Iterator<Item = ElementRef<'_>> {
        self.html
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
    }

    fn element_at(&self, position: usize) -> Option<ElementRef<'_>> {
        self.elements().nth(position)
    }

    pub fn count(&self, selector: &Selector) -> usize {
        self.html.select(selector).count()
    }

    /// Document-order positions of all matching elements
    pub fn positions(&self, selector: &Selector) -> Vec<usize> {
        let matched: Vec<_> = self.html.select(selector).map(|e| e.id()).collect();
        self.elements()
            .enumerate()
            .filter(|(_, e)| matched.contains(&e.id()))
            .map(|(i, _)| i)
            .collect()
    }

    /// Rendered text of every matching element
    pub fn texts(&self, selector: &Selector) -> Vec<String> {
        self.html.select(selector).map(rendered_text).collect()
    }

    /// Rendered text of the element children of every match, in document order
    pub fn child_texts(&self, selector: &Selector) -> Vec<String> {
        self.html
            .select(selector)
            .flat_map(|parent| parent.children().filter_map(ElementRef::wrap))
            .map(rendered_text)
            .collect()
    }

    /// Whether the element at `position` accepts typed text
    pub fn check_typeable(&self, position: usize) -> Result<(), String> {
        let element = self.element_at(position).ok_or("element vanished")?;
        let value = element.value();

        let typeable = match value.name() {
            "textarea" => true,
            "input" => !matches!(
                input_type(element).as_str(),
                "submit" | "button" | "reset" | "image" | "file" | "checkbox" | "radio" | "hidden"
            ),
            _ => false,
        };

        if !typeable {
            return Err(format!("<{}> does not accept text input", value.name()));
        }
        if value.attr("disabled").is_some() {
            return Err("element is disabled".to_string());
        }
        if value.attr("readonly").is_some() {
            return Err("element is read-only".to_string());
        }
        Ok(())
    }

    /// Resolve the default action of clicking the element at `position`
    pub fn click_target(&self, position: usize, typed: &FieldValues) -> ClickTarget {
        let Some(element) = self.element_at(position) else {
            return ClickTarget::Inert;
        };

        if element.value().attr("disabled").is_some() {
            return ClickTarget::Inert;
        }

        match element.value().name() {
            "a" => match element.value().attr("href") {
                Some(href) => ClickTarget::Link(href.to_string()),
                None => ClickTarget::Inert,
            },
            "button" | "input" if is_submitter(element) => match self.form_owner(element) {
                Some(form) => ClickTarget::Submit(self.submission(form, Some(element), typed)),
                None => ClickTarget::Inert,
            },
            _ => ClickTarget::Inert,
        }
    }

    fn form_owner<'a>(&'a self, element: ElementRef<'a>) -> Option<ElementRef<'a>> {
        if let Some(form_id) = element.value().attr("form") {
            return self
                .elements()
                .find(|e| e.value().name() == "form" && e.value().id() == Some(form_id));
        }
        element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == "form")
    }

    fn submission(
        &self,
        form: ElementRef<'_>,
        submitter: Option<ElementRef<'_>>,
        typed: &FieldValues,
    ) -> FormSubmission {
        let method = form
            .value()
            .attr("method")
            .map(|m| m.to_ascii_uppercase())
            .filter(|m| m == "POST")
            .unwrap_or_else(|| "GET".to_string());

        let mut fields = Vec::new();
        for (position, element) in self.elements().enumerate() {
            if !matches!(element.value().name(), "input" | "textarea" | "select") {
                continue;
            }
            let Some(name) = element.value().attr("name").filter(|n| !n.is_empty()) else {
                continue;
            };
            if element.value().attr("disabled").is_some() {
                continue;
            }
            match self.form_owner(element) {
                Some(owner) if owner.id() == form.id() => {}
                _ => continue,
            }

            match element.value().name() {
                "textarea" => {
                    let value = typed
                        .get(&position)
                        .cloned()
                        .unwrap_or_else(|| element.text().collect());
                    fields.push((name.to_string(), value));
                }
                "select" => {
                    for value in selected_options(element) {
                        fields.push((name.to_string(), value));
                    }
                }
                _ => match input_type(element).as_str() {
                    "submit" | "button" | "reset" | "image" | "file" => {}
                    "checkbox" | "radio" => {
                        if element.value().attr("checked").is_some() {
                            let value = element.value().attr("value").unwrap_or("on");
                            fields.push((name.to_string(), value.to_string()));
                        }
                    }
                    _ => {
                        let value = typed.get(&position).cloned().unwrap_or_else(|| {
                            element.value().attr("value").unwrap_or_default().to_string()
                        });
                        fields.push((name.to_string(), value));
                    }
                },
            }
        }

        if let Some(submitter) = submitter {
            if let Some(name) = submitter.value().attr("name").filter(|n| !n.is_empty()) {
                let value = submitter.value().attr("value").unwrap_or_default();
                fields.push((name.to_string(), value.to_string()));
            }
        }

        FormSubmission {
            method,
            action: form
                .value()
                .attr("action")
                .filter(|a| !a.is_empty())
                .map(str::to_string),
            fields,
        }
    }
}

fn input_type(element: ElementRef<'_>) -> String {
    input_type_or(element, "text")
}

fn is_submitter(element: ElementRef<'_>) -> bool {
    match element.value().name() {
        "button" => input_type_or(element, "submit") == "submit",
        "input" => matches!(input_type(element).as_str(), "submit" | "image"),
        _ => false,
    }
}

fn input_type_or(element: ElementRef<'_>, default: &str) -> String {
    element
        .value()
        .attr("type")
        .unwrap_or(default)
        .to_ascii_lowercase()
}

fn selected_options(select: ElementRef<'_>) -> Vec<String> {
    let options: Vec<_> = select
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "option")
        .collect();

    let option_value = |o: &ElementRef<'_>| {
        o.value()
            .attr("value")
            .map(str::to_string)
            .unwrap_or_else(|| rendered_text(*o))
    };

    let selected: Vec<String> = options
        .iter()
        .filter(|o| o.value().attr("selected").is_some())
        .map(option_value)
        .collect();

    if !selected.is_empty() || select.value().attr("multiple").is_some() {
        return selected;
    }
    options.first().map(option_value).into_iter().collect()
}
