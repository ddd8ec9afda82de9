//! In-process browser over scripted sites
//!
//! [`MemoryBrowser`] renders [`Document`]s produced by a [`MemorySite`] and
//! follows the same focus rules as WebDriver: navigating focuses the top-level
//! document, a click that navigates the page leaves focus where it was, and
//! element references die with the document that produced them or with the
//! next frame switch, whichever comes first. Nodes and
//! frames can be scheduled to appear after a delay on the tokio clock, so
//! bounded waits can be exercised with a paused runtime.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use super::{BrowserDriver, DriverFactory, ElementId, ElementState, FrameInfo, Locator};
use crate::error::{E2eError, E2eResult};

/// Values typed or selected into the nodes of one document, by node key.
pub type FormData = BTreeMap<String, String>;

/// What happens after a node is clicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Stay,
    /// Navigate the top-level page.
    Navigate(Url),
}

/// Server side of the in-memory browser.
pub trait MemorySite: Send {
    /// The document served at `url`, or `None` if it fails to load.
    fn render(&mut self, url: &Url) -> Option<Document>;

    /// React to a click on node `key` of the document at `page`.
    fn on_click(&mut self, page: &Url, key: &str, form: &FormData) -> ClickOutcome;
}

#[derive(Debug, Clone)]
pub struct Document {
    pub url: Url,
    pub nodes: Vec<Node>,
    pub frames: Vec<FrameSpec>,
}

impl Document {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            nodes: Vec::new(),
            frames: Vec::new(),
        }
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn frame(mut self, src: Url) -> Self {
        self.frames.push(FrameSpec {
            src,
            appears_after: Duration::ZERO,
        });
        self
    }

    pub fn frame_after(mut self, src: Url, delay: Duration) -> Self {
        self.frames.push(FrameSpec {
            src,
            appears_after: delay,
        });
        self
    }
}

#[derive(Debug, Clone)]
pub struct FrameSpec {
    pub src: Url,
    pub appears_after: Duration,
}

/// One element. It matches a CSS locator when the selector string is listed
/// verbatim in `selectors`.
#[derive(Debug, Clone)]
pub struct Node {
    pub key: String,
    pub selectors: Vec<String>,
    pub text: String,
    pub displayed: bool,
    pub enabled: bool,
    pub options: Vec<String>,
    pub appears_after: Duration,
}

impl Node {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            selectors: Vec::new(),
            text: String::new(),
            displayed: true,
            enabled: true,
            options: Vec::new(),
            appears_after: Duration::ZERO,
        }
    }

    pub fn css(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.appears_after = delay;
        self
    }
}

struct LoadedDoc {
    doc: Document,
    loaded_at: Instant,
    values: FormData,
    frames: Vec<Option<LoadedDoc>>,
}

impl LoadedDoc {
    fn load(site: &mut dyn MemorySite, doc: Document, loaded_at: Instant) -> Self {
        let frames = doc
            .frames
            .iter()
            .map(|frame| {
                site.render(&frame.src)
                    .map(|inner| LoadedDoc::load(&mut *site, inner, loaded_at + frame.appears_after))
            })
            .collect();
        Self {
            doc,
            loaded_at,
            values: FormData::new(),
            frames,
        }
    }

    fn node_present(&self, node: &Node, now: Instant) -> bool {
        now >= self.loaded_at + node.appears_after
    }

    fn present_frames(&self, now: Instant) -> impl Iterator<Item = (usize, &FrameSpec)> {
        let loaded_at = self.loaded_at;
        self.doc
            .frames
            .iter()
            .enumerate()
            .filter(move |(_, f)| now >= loaded_at + f.appears_after)
    }
}

#[derive(Debug, Clone)]
struct ElementRef {
    generation: u64,
    focus: Vec<usize>,
    node: usize,
}

struct World {
    site: Box<dyn MemorySite>,
    top_url: Option<Url>,
    top: Option<LoadedDoc>,
    focus: Vec<usize>,
    generation: u64,
    elements: HashMap<ElementId, ElementRef>,
    next_id: u64,
    commands: Vec<String>,
    quit: bool,
}

impl World {
    /// Invalidate every element reference handed out so far.
    fn drop_elements(&mut self) {
        self.generation += 1;
        self.elements.clear();
    }

    fn load_top(&mut self, url: &Url) {
        self.drop_elements();
        self.top_url = Some(url.clone());
        let now = Instant::now();
        self.top = self
            .site
            .render(url)
            .map(|doc| LoadedDoc::load(self.site.as_mut(), doc, now));
    }

    fn focused(&self) -> Option<&LoadedDoc> {
        let mut doc = self.top.as_ref()?;
        for &index in &self.focus {
            doc = doc.frames.get(index)?.as_ref()?;
            if Instant::now() < doc.loaded_at {
                return None;
            }
        }
        Some(doc)
    }

    fn focused_mut(&mut self) -> Option<&mut LoadedDoc> {
        let mut doc = self.top.as_mut()?;
        for &index in &self.focus {
            doc = doc.frames.get_mut(index)?.as_mut()?;
        }
        Some(doc)
    }

    fn resolve(&self, id: ElementId) -> Option<(&LoadedDoc, usize)> {
        let element = self.elements.get(&id)?;
        if element.generation != self.generation || element.focus != self.focus {
            return None;
        }
        let doc = self.focused()?;
        let node = doc.doc.nodes.get(element.node)?;
        doc.node_present(node, Instant::now())
            .then_some((doc, element.node))
    }

    fn record(&mut self, command: String) {
        debug!("memory browser: {}", command);
        self.commands.push(command);
    }
}

/// An in-process browser session. Clones share the same session.
#[derive(Clone)]
pub struct MemoryBrowser {
    world: Arc<Mutex<World>>,
}

impl MemoryBrowser {
    pub fn new(site: impl MemorySite + 'static) -> Self {
        Self {
            world: Arc::new(Mutex::new(World {
                site: Box::new(site),
                top_url: None,
                top: None,
                focus: Vec::new(),
                generation: 0,
                elements: HashMap::new(),
                next_id: 0,
                commands: Vec::new(),
                quit: false,
            })),
        }
    }

    /// Every command issued so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.world.lock().commands.clone()
    }

    pub fn is_quit(&self) -> bool {
        self.world.lock().quit
    }

    /// Frame indexes from the top-level document to the focused one.
    pub fn focus(&self) -> Vec<usize> {
        self.world.lock().focus.clone()
    }
}

#[async_trait]
impl BrowserDriver for MemoryBrowser {
    async fn navigate(&mut self, url: &Url) -> E2eResult<()> {
        let mut world = self.world.lock();
        world.record(format!("navigate {url}"));
        world.focus.clear();
        world.load_top(url);
        Ok(())
    }

    async fn current_url(&mut self) -> E2eResult<Url> {
        let world = self.world.lock();
        match &world.top_url {
            Some(url) => Ok(url.clone()),
            None => Ok(Url::parse("about:blank")?),
        }
    }

    async fn document_ready(&mut self) -> E2eResult<bool> {
        Ok(self.world.lock().focused().is_some())
    }

    async fn document_url(&mut self) -> E2eResult<Option<Url>> {
        Ok(self.world.lock().focused().map(|d| d.doc.url.clone()))
    }

    async fn query(&mut self, locator: &Locator) -> E2eResult<Option<ElementId>> {
        let mut world = self.world.lock();
        world.record(format!("query {locator}"));

        let now = Instant::now();
        let Some(doc) = world.focused() else {
            return Ok(None);
        };
        let found = doc.doc.nodes.iter().position(|node| {
            doc.node_present(node, now)
                && match locator {
                    Locator::Css(selector) => node.selectors.iter().any(|s| s == selector),
                    Locator::Text(text) => node.text.contains(text.as_str()),
                }
        });

        Ok(found.map(|node| {
            let id = ElementId(world.next_id);
            world.next_id += 1;
            let element = ElementRef {
                generation: world.generation,
                focus: world.focus.clone(),
                node,
            };
            world.elements.insert(id, element);
            id
        }))
    }

    async fn element_state(&mut self, id: ElementId) -> E2eResult<ElementState> {
        let world = self.world.lock();
        Ok(match world.resolve(id) {
            Some((doc, index)) => {
                let node = &doc.doc.nodes[index];
                ElementState::Present {
                    displayed: node.displayed,
                    enabled: node.enabled,
                }
            }
            None => ElementState::Detached,
        })
    }

    async fn send_keys(&mut self, id: ElementId, text: &str) -> E2eResult<()> {
        let mut world = self.world.lock();
        let Some((doc, index)) = world.resolve(id) else {
            return Err(E2eError::Driver("stale element reference".into()));
        };
        let key = doc.doc.nodes[index].key.clone();
        world.record(format!("type {key} {text}"));
        if let Some(doc) = world.focused_mut() {
            doc.values.entry(key).or_default().push_str(text);
        }
        Ok(())
    }

    async fn select_option(&mut self, id: ElementId, option: &str) -> E2eResult<bool> {
        let mut world = self.world.lock();
        let Some((doc, index)) = world.resolve(id) else {
            return Err(E2eError::Driver("stale element reference".into()));
        };
        let node = &doc.doc.nodes[index];
        if !node.options.iter().any(|o| o == option) {
            return Ok(false);
        }
        let key = node.key.clone();
        world.record(format!("select {key} {option}"));
        if let Some(doc) = world.focused_mut() {
            doc.values.insert(key, option.to_string());
        }
        Ok(true)
    }

    async fn click(&mut self, id: ElementId) -> E2eResult<()> {
        let mut world = self.world.lock();
        let Some((doc, index)) = world.resolve(id) else {
            return Err(E2eError::Driver("stale element reference".into()));
        };
        let key = doc.doc.nodes[index].key.clone();
        let page = doc.doc.url.clone();
        let form = doc.values.clone();
        world.record(format!("click {key}"));

        let outcome = world.site.on_click(&page, &key, &form);
        if let ClickOutcome::Navigate(target) = outcome {
            world.load_top(&target);
        }
        Ok(())
    }

    async fn text_visible(&mut self, text: &str) -> E2eResult<bool> {
        let world = self.world.lock();
        let now = Instant::now();
        Ok(world.focused().is_some_and(|doc| {
            doc.doc
                .nodes
                .iter()
                .any(|n| n.displayed && doc.node_present(n, now) && n.text.contains(text))
        }))
    }

    async fn frames(&mut self) -> E2eResult<Vec<FrameInfo>> {
        let world = self.world.lock();
        let now = Instant::now();
        Ok(world
            .focused()
            .map(|doc| {
                doc.present_frames(now)
                    .map(|(index, frame)| FrameInfo {
                        index,
                        src: Some(frame.src.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn enter_frame(&mut self, index: usize) -> E2eResult<()> {
        let mut world = self.world.lock();
        world.record(format!("enter frame {index}"));
        let present = world
            .focused()
            .is_some_and(|doc| doc.present_frames(Instant::now()).any(|(i, _)| i == index));
        if !present {
            return Err(E2eError::Driver(format!(
                "no such frame #{index}"
            )));
        }
        world.drop_elements();
        world.focus.push(index);
        Ok(())
    }

    async fn enter_root(&mut self) -> E2eResult<()> {
        let mut world = self.world.lock();
        world.record("enter root".to_string());
        world.drop_elements();
        world.focus.clear();
        Ok(())
    }

    async fn quit(&mut self) -> E2eResult<()> {
        let mut world = self.world.lock();
        world.record("quit".to_string());
        world.quit = true;
        Ok(())
    }
}

/// Builds a fresh [`MemoryBrowser`] per scenario.
pub struct MemoryFactory<F> {
    build: F,
}

impl<F> MemoryFactory<F>
where
    F: Fn() -> MemoryBrowser + Send + Sync,
{
    pub fn new(build: F) -> Self {
        Self { build }
    }
}

#[async_trait]
impl<F> DriverFactory for MemoryFactory<F>
where
    F: Fn() -> MemoryBrowser + Send + Sync,
{
    type Driver = MemoryBrowser;

    async fn connect(&self) -> E2eResult<MemoryBrowser> {
        Ok((self.build)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TwoPageSite;

    impl MemorySite for TwoPageSite {
        fn render(&mut self, url: &Url) -> Option<Document> {
            match url.path() {
                "/" => Some(
                    Document::new(url.clone())
                        .node(Node::new("next").css("#next").text("Next"))
                        .node(Node::new("late").css("#late").after(Duration::from_secs(2))),
                ),
                "/second/" => Some(Document::new(url.clone()).node(Node::new("done").text("Done"))),
                _ => None,
            }
        }

        fn on_click(&mut self, page: &Url, key: &str, _form: &FormData) -> ClickOutcome {
            match key {
                "next" => ClickOutcome::Navigate(page.join("/second/").unwrap()),
                _ => ClickOutcome::Stay,
            }
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_nodes_appear_on_tokio_clock() {
        let mut browser = MemoryBrowser::new(TwoPageSite);
        browser.navigate(&url("http://app.test/")).await.unwrap();

        let late = Locator::Css("#late".into());
        assert!(browser.query(&late).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(browser.query(&late).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_navigation_invalidates_elements() {
        let mut browser = MemoryBrowser::new(TwoPageSite);
        browser.navigate(&url("http://app.test/")).await.unwrap();

        let next = browser
            .query(&Locator::Css("#next".into()))
            .await
            .unwrap()
            .unwrap();
        browser.click(next).await.unwrap();

        assert_eq!(browser.current_url().await.unwrap().path(), "/second/");
        assert_eq!(browser.element_state(next).await.unwrap(), ElementState::Detached);
        assert!(browser.text_visible("Done").await.unwrap());
    }

    #[tokio::test]
    async fn test_frame_switch_invalidates_elements() {
        let mut browser = MemoryBrowser::new(TwoPageSite);
        browser.navigate(&url("http://app.test/")).await.unwrap();

        let next = browser
            .query(&Locator::Css("#next".into()))
            .await
            .unwrap()
            .unwrap();
        browser.enter_root().await.unwrap();

        assert_eq!(browser.element_state(next).await.unwrap(), ElementState::Detached);
        assert!(browser.click(next).await.is_err());
        assert!(browser.query(&Locator::Css("#next".into())).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_load_is_never_ready() {
        let mut browser = MemoryBrowser::new(TwoPageSite);
        browser.navigate(&url("http://app.test/missing/")).await.unwrap();
        assert!(!browser.document_ready().await.unwrap());
        assert_eq!(browser.document_url().await.unwrap(), None);
    }
}
