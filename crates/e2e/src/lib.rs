//! Team Management E2E Scenario Runner
//!
//! This crate drives end-to-end scenarios against the user-management web
//! application:
//! - Optionally spawns the application as a subprocess and waits for health
//! - Parses declarative YAML scenario suites
//! - Runs every scenario in a fresh headless session (cookie jar, document,
//!   typed field values) over plain HTTP
//! - Reports pass/fail per scenario with expected/actual diffs
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ScenarioRunner                            │
//! │    ├── start_server() -> ServerHandle                       │
//! │    ├── run_suites(suites, filter) -> TestSuiteResult        │
//! │    └── run_scenario(suite, scenario) -> ScenarioResult      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Session (one per scenario)                                 │
//! │    ├── set_precondition(kind, key, value)                   │
//! │    ├── visit(path, headers)                                 │
//! │    ├── type_text(selector, text) / click(selector)          │
//! │    └── assert_count / assert_absent / assert_contains_text  │
//! │        / assert_children_text_in_order                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Suite (YAML)                                               │
//! │    ├── name, tags                                           │
//! │    ├── setup { preconditions, visit }                       │
//! │    └── scenarios: [{ name, actions, assertions }]           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod dom;
pub mod error;
pub mod report;
pub mod runner;
pub mod server;
pub mod session;
pub mod spec;
pub mod wait;

pub use config::RunnerConfig;
pub use error::{E2eError, E2eResult, ErrorKind};
pub use runner::{ScenarioFilter, ScenarioRunner, ScenarioState, TestSuiteResult};
pub use session::{Session, SessionConfig};
pub use spec::{Action, Assertion, Precondition, Scenario, Suite, Visit};
