//! Declarative YAML scenario suites

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};

/// One suite file: shared setup plus the scenarios that run on top of it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suite {
    /// Suite name, shown before every scenario in the report
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering; inherited by every scenario in the suite
    #[serde(default)]
    pub tags: Vec<String>,

    /// Applied to a fresh session before each scenario
    #[serde(default)]
    pub setup: Setup,

    pub scenarios: Vec<Scenario>,

    /// File the suite was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Setup {
    #[serde(default)]
    pub preconditions: Vec<Precondition>,

    #[serde(default)]
    pub visit: Option<Visit>,
}

/// A single named end-to-end scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Appended after the suite setup's preconditions
    #[serde(default)]
    pub preconditions: Vec<Precondition>,

    /// Replaces the suite setup's visit when present
    #[serde(default)]
    pub visit: Option<Visit>,

    #[serde(default)]
    pub actions: Vec<Action>,

    #[serde(default)]
    pub assertions: Vec<Assertion>,

    /// Overrides the runner's scenario budget
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub skip: bool,
}

/// A cookie or header recorded before navigation.
///
/// `kind` stays a plain string so an unknown kind surfaces as a
/// `ConfigError` when the scenario runs rather than failing the whole file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precondition {
    pub kind: String,
    pub key: String,
    pub value: String,
}

impl Precondition {
    pub fn cookie(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: PreconditionKind::Cookie.as_str().to_string(),
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn header(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: PreconditionKind::Header.as_str().to_string(),
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionKind {
    Cookie,
    Header,
}

impl PreconditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreconditionKind::Cookie => "cookie",
            PreconditionKind::Header => "header",
        }
    }
}

impl FromStr for PreconditionKind {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cookie" => Ok(PreconditionKind::Cookie),
            "header" => Ok(PreconditionKind::Header),
            other => Err(E2eError::Config(format!(
                "unknown precondition kind '{}' (expected 'cookie' or 'header')",
                other
            ))),
        }
    }
}

/// Navigation target plus per-request options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub path: String,

    /// Literal headers merged over the recorded preconditions
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub fail_on_status_code: bool,
}

impl Visit {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            headers: BTreeMap::new(),
            fail_on_status_code: true,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

fn default_true() -> bool {
    true
}

/// A simulated user interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Clear the field and enter text verbatim
    Type { selector: String, text: String },

    /// Dispatch the element's default click action
    Click { selector: String },
}

impl Action {
    pub fn name(&self) -> String {
        match self {
            Action::Type { selector, .. } => format!("type:{}", selector),
            Action::Click { selector } => format!("click:{}", selector),
        }
    }
}

/// A check evaluated against the document once all actions are applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "assert", rename_all = "snake_case")]
pub enum Assertion {
    Count { selector: String, expected: usize },

    Absent { selector: String },

    ContainsText { selector: String, text: String },

    ChildrenTextInOrder { selector: String, texts: Vec<String> },
}

impl Assertion {
    pub fn name(&self) -> String {
        match self {
            Assertion::Count { selector, .. } => format!("count:{}", selector),
            Assertion::Absent { selector } => format!("absent:{}", selector),
            Assertion::ContainsText { selector, .. } => format!("contains_text:{}", selector),
            Assertion::ChildrenTextInOrder { selector, .. } => {
                format!("children_text_in_order:{}", selector)
            }
        }
    }
}

impl Suite {
    /// Parse a suite from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let suite: Suite = serde_yaml::from_str(yaml)?;
        if suite.scenarios.is_empty() {
            return Err(E2eError::SpecParse(format!(
                "suite '{}' declares no scenarios",
                suite.name
            )));
        }
        Ok(suite)
    }

    /// Parse a suite from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut suite = Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))?;
        suite.source = Some(path.to_path_buf());
        Ok(suite)
    }

    /// Load suites from a file or, recursively, from a directory.
    /// Directory entries are loaded in file-name order.
    pub fn load(path: &Path) -> E2eResult<Vec<Self>> {
        if path.is_file() {
            return Ok(vec![Self::from_file(path)?]);
        }
        if !path.exists() {
            return Err(E2eError::Config(format!(
                "scenario path does not exist: {}",
                path.display()
            )));
        }

        let mut suites = Vec::new();
        for entry in walkdir::WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_yaml(e.path()))
        {
            suites.push(Self::from_file(entry.path())?);
        }

        Ok(suites)
    }

    /// Load every path in order
    pub fn load_all(paths: &[PathBuf]) -> E2eResult<Vec<Self>> {
        let mut suites = Vec::new();
        for path in paths {
            suites.extend(Self::load(path)?);
        }
        Ok(suites)
    }

    /// Effective tags of a scenario: the suite's plus its own
    pub fn scenario_tags<'a>(&'a self, scenario: &'a Scenario) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .chain(scenario.tags.iter())
            .map(String::as_str)
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == "yaml" || ext == "yml")
        .unwrap_or(false)
}
