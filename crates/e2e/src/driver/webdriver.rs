//! WebDriver backend (chromedriver, geckodriver, Selenium)

use std::collections::HashMap;

use async_trait::async_trait;
use thirtyfour::components::SelectElement;
use thirtyfour::prelude::*;
use thirtyfour::ChromiumLikeCapabilities;
use tracing::{debug, info, warn};
use url::Url;

use super::{BrowserDriver, DriverFactory, ElementId, ElementState, FrameInfo, Locator};
use crate::config::{BrowserConfig, BrowserKind};
use crate::error::{E2eError, E2eResult};

/// A live WebDriver session.
pub struct WebDriverBrowser {
    driver: Option<WebDriver>,
    elements: HashMap<ElementId, WebElement>,
    next_id: u64,
}

impl WebDriverBrowser {
    pub async fn connect(config: &BrowserConfig) -> E2eResult<Self> {
        info!(
            "Opening {} session via {}",
            config.browser.as_str(),
            config.webdriver_url
        );

        let driver = match config.browser {
            BrowserKind::Chrome => {
                let mut caps = DesiredCapabilities::chrome();
                if config.headless {
                    caps.set_headless()?;
                }
                WebDriver::new(config.webdriver_url.as_str(), caps).await?
            }
            BrowserKind::Firefox => {
                let mut caps = DesiredCapabilities::firefox();
                if config.headless {
                    caps.set_headless()?;
                }
                WebDriver::new(config.webdriver_url.as_str(), caps).await?
            }
        };

        driver
            .set_window_rect(
                0,
                0,
                config.viewport_width.into(),
                config.viewport_height.into(),
            )
            .await?;

        Ok(Self {
            driver: Some(driver),
            elements: HashMap::new(),
            next_id: 0,
        })
    }

    fn driver(&self) -> E2eResult<&WebDriver> {
        self.driver
            .as_ref()
            .ok_or_else(|| E2eError::Driver("browser session already closed".into()))
    }

    fn element(&self, id: ElementId) -> E2eResult<&WebElement> {
        self.elements
            .get(&id)
            .ok_or_else(|| E2eError::Driver(format!("unknown element {}", id.0)))
    }

    fn remember(&mut self, element: WebElement) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;
        self.elements.insert(id, element);
        id
    }

    async fn find_all(&self, locator: &Locator) -> E2eResult<Vec<WebElement>> {
        let driver = self.driver()?;
        let found = match locator {
            Locator::Css(selector) => driver.find_all(By::Css(selector.as_str())).await?,
            Locator::Text(text) => {
                let xpath = text_xpath(text);
                driver.find_all(By::XPath(xpath.as_str())).await?
            }
        };
        Ok(found)
    }

    async fn script_string(&self, script: &str) -> E2eResult<Option<String>> {
        let ret = self.driver()?.execute(script, Vec::new()).await?;
        Ok(ret.json().as_str().map(str::to_string))
    }
}

#[async_trait]
impl BrowserDriver for WebDriverBrowser {
    async fn navigate(&mut self, url: &Url) -> E2eResult<()> {
        debug!("goto {}", url);
        self.elements.clear();
        self.driver()?.goto(url.as_str()).await?;
        Ok(())
    }

    async fn current_url(&mut self) -> E2eResult<Url> {
        Ok(self.driver()?.current_url().await?)
    }

    async fn document_ready(&mut self) -> E2eResult<bool> {
        let state = self.script_string("return document.readyState;").await?;
        Ok(state.as_deref() == Some("complete"))
    }

    async fn document_url(&mut self) -> E2eResult<Option<Url>> {
        let href = self
            .script_string("return document.location ? document.location.href : null;")
            .await?;
        Ok(href.and_then(|h| Url::parse(&h).ok()))
    }

    async fn query(&mut self, locator: &Locator) -> E2eResult<Option<ElementId>> {
        let first = self.find_all(locator).await?.into_iter().next();
        Ok(first.map(|element| self.remember(element)))
    }

    async fn element_state(&mut self, id: ElementId) -> E2eResult<ElementState> {
        let Some(element) = self.elements.get(&id) else {
            return Ok(ElementState::Detached);
        };
        match (element.is_displayed().await, element.is_enabled().await) {
            (Ok(displayed), Ok(enabled)) => Ok(ElementState::Present { displayed, enabled }),
            (Err(e), _) | (_, Err(e)) => {
                debug!("element {} state unavailable: {}", id.0, e);
                Ok(ElementState::Detached)
            }
        }
    }

    async fn send_keys(&mut self, id: ElementId, text: &str) -> E2eResult<()> {
        self.element(id)?.send_keys(text).await?;
        Ok(())
    }

    async fn select_option(&mut self, id: ElementId, option: &str) -> E2eResult<bool> {
        let select = SelectElement::new(self.element(id)?).await?;
        if select.select_by_value(option).await.is_ok() {
            return Ok(true);
        }
        match select.select_by_visible_text(option).await {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!("no option '{}': {}", option, e);
                Ok(false)
            }
        }
    }

    async fn click(&mut self, id: ElementId) -> E2eResult<()> {
        self.element(id)?.click().await?;
        Ok(())
    }

    async fn text_visible(&mut self, text: &str) -> E2eResult<bool> {
        for element in self.find_all(&Locator::Text(text.to_string())).await? {
            if element.is_displayed().await.unwrap_or(false) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn frames(&mut self) -> E2eResult<Vec<FrameInfo>> {
        let base = self.document_url().await?;
        let elements = self.driver()?.find_all(By::Css("iframe, frame")).await?;

        let mut frames = Vec::with_capacity(elements.len());
        for (index, element) in elements.into_iter().enumerate() {
            let src = element.attr("src").await?.and_then(|src| match &base {
                Some(base) => base.join(&src).ok(),
                None => Url::parse(&src).ok(),
            });
            frames.push(FrameInfo { index, src });
        }
        Ok(frames)
    }

    async fn enter_frame(&mut self, index: usize) -> E2eResult<()> {
        let frame = self
            .driver()?
            .find_all(By::Css("iframe, frame"))
            .await?
            .into_iter()
            .nth(index)
            .ok_or_else(|| E2eError::Driver(format!("frame #{index} disappeared")))?;
        self.elements.clear();
        frame.enter_frame().await?;
        Ok(())
    }

    async fn enter_root(&mut self) -> E2eResult<()> {
        self.elements.clear();
        self.driver()?.enter_default_frame().await?;
        Ok(())
    }

    async fn quit(&mut self) -> E2eResult<()> {
        self.elements.clear();
        if let Some(driver) = self.driver.take() {
            driver.quit().await?;
        }
        Ok(())
    }
}

impl Drop for WebDriverBrowser {
    fn drop(&mut self) {
        if self.driver.is_some() {
            warn!("WebDriver session dropped without quit; the browser may linger");
        }
    }
}

/// Opens one WebDriver session per scenario.
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    config: BrowserConfig,
}

impl WebDriverFactory {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DriverFactory for WebDriverFactory {
    type Driver = WebDriverBrowser;

    async fn connect(&self) -> E2eResult<WebDriverBrowser> {
        WebDriverBrowser::connect(&self.config).await
    }
}

/// XPath for elements whose own text contains `text`.
fn text_xpath(text: &str) -> String {
    format!(
        "//*[not(self::script or self::style)][text()[contains(normalize-space(.), {})]]",
        xpath_literal(text)
    )
}

/// Quote `s` as an XPath string literal.
fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{s}'")
    } else if !s.contains('"') {
        format!("\"{s}\"")
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}
