//! Modernomad E2E Test Harness
//!
//! This crate drives a real browser through declarative scenarios that cross
//! origins, such as adding a card on a third-party hosted checkout and
//! deleting it again from the application:
//! - Resets the application's test data before each scenario
//! - Keeps one browser session per scenario over WebDriver
//! - Runs nested steps inside another origin's document and returns to the
//!   application afterwards
//! - Waits for every element, text and navigation with a bounded timeout
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    E2E Test Runner (Rust)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner<F: DriverFactory>                               │
//! │    ├── ResetHook::run()          flush + reseed, awaited    │
//! │    ├── F::connect() -> D         fresh browser session      │
//! │    ├── Session<D>                context stack + waits      │
//! │    │     ├── login / visit / find / click / type / select   │
//! │    │     ├── assert_visible_text                            │
//! │    │     └── enter_origin -> OriginScope -> exit_origin     │
//! │    └── write_results() -> test-results.json                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario (YAML)                                            │
//! │    ├── name, description, tags, reset                       │
//! │    └── steps: [Step]                                        │
//! │          ├── login { identity, secret }                     │
//! │          ├── visit { path }                                 │
//! │          ├── find | click { selector | contains }           │
//! │          ├── type { .., text } / select { .., option }      │
//! │          ├── assert_text { text }                           │
//! │          └── origin { origin, steps: [Step] }               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserDriver                                              │
//! │    ├── WebDriverBrowser   (thirtyfour, chromedriver/gecko)  │
//! │    └── MemoryBrowser      (in-process site, for tests)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod preflight;
pub mod reset;
pub mod runner;
pub mod session;
pub mod spec;
pub mod wait;

pub use config::HarnessConfig;
pub use error::{E2eError, E2eResult};
pub use reset::ResetHook;
pub use runner::{StepResult, TestResult, TestRunner, TestSuiteResult};
pub use session::Session;
pub use spec::{Scenario, Step};
