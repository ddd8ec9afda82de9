//! Browser driver seam
//!
//! The session issues one command at a time through [`BrowserDriver`]. Every
//! command applies to the driver's currently focused document; frame focus is
//! moved only by [`BrowserDriver::enter_root`] and
//! [`BrowserDriver::enter_frame`], which the session drives from its context
//! stack.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::E2eResult;

pub mod memory;
pub mod webdriver;

pub use memory::{MemoryBrowser, MemoryFactory, MemorySite};
pub use webdriver::{WebDriverBrowser, WebDriverFactory};

/// How an element is located.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    /// CSS selector
    Css(String),
    /// First element whose own text contains the string
    Text(String),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "'{selector}'"),
            Locator::Text(text) => write!(f, "containing '{text}'"),
        }
    }
}

/// Driver-assigned element reference, valid until the document or the
/// focused frame changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Detached,
    Present { displayed: bool, enabled: bool },
}

impl ElementState {
    /// Why the element cannot take input, if it cannot.
    pub fn blocker(&self) -> Option<&'static str> {
        match self {
            ElementState::Detached => Some("element is no longer attached to the document"),
            ElementState::Present { displayed: false, .. } => Some("element is hidden"),
            ElementState::Present { enabled: false, .. } => Some("element is disabled"),
            ElementState::Present { .. } => None,
        }
    }
}

/// An embedded frame of the focused document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub index: usize,
    pub src: Option<Url>,
}

#[async_trait]
pub trait BrowserDriver: Send {
    /// Navigate the top-level page. Returns once the command is accepted;
    /// readiness is polled separately.
    async fn navigate(&mut self, url: &Url) -> E2eResult<()>;

    /// URL of the top-level page.
    async fn current_url(&mut self) -> E2eResult<Url>;

    /// Whether the focused document has finished loading.
    async fn document_ready(&mut self) -> E2eResult<bool>;

    /// URL of the focused document, `None` while it has none (e.g. a frame
    /// that has not loaded yet).
    async fn document_url(&mut self) -> E2eResult<Option<Url>>;

    /// First element matching `locator` in the focused document.
    async fn query(&mut self, locator: &Locator) -> E2eResult<Option<ElementId>>;

    async fn element_state(&mut self, id: ElementId) -> E2eResult<ElementState>;

    async fn send_keys(&mut self, id: ElementId, text: &str) -> E2eResult<()>;

    /// Choose an option of a select element by value or visible label.
    /// Returns `false` when no option matches.
    async fn select_option(&mut self, id: ElementId, option: &str) -> E2eResult<bool>;

    async fn click(&mut self, id: ElementId) -> E2eResult<()>;

    /// Whether `text` is displayed anywhere in the focused document.
    async fn text_visible(&mut self, text: &str) -> E2eResult<bool>;

    /// Frames embedded in the focused document.
    async fn frames(&mut self) -> E2eResult<Vec<FrameInfo>>;

    /// Focus the frame at `index` of the focused document.
    async fn enter_frame(&mut self, index: usize) -> E2eResult<()>;

    /// Focus the top-level document.
    async fn enter_root(&mut self) -> E2eResult<()>;

    /// End the browser session.
    async fn quit(&mut self) -> E2eResult<()> {
        Ok(())
    }
}

/// Opens a fresh, isolated browser session per scenario.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    type Driver: BrowserDriver;

    async fn connect(&self) -> E2eResult<Self::Driver>;
}
