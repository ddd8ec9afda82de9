//! Scenario session: the step primitives on top of a browser driver
//!
//! Locating and acting are separate calls. [`Session::find`] returns an
//! [`ElementHandle`] bound to the context it was found in, and the action
//! methods take that handle explicitly. Origin blocks are opened with
//! [`Session::enter_origin`] and must be closed with
//! [`Session::exit_origin`], on success and on failure alike.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{AppConfig, HarnessConfig};
use crate::context::{ContextKind, ContextStack, ExecutionContext, Origin};
use crate::driver::{BrowserDriver, ElementId, Locator};
use crate::error::{E2eError, E2eResult};
use crate::wait::{Poller, WaitPolicy};

/// A located element, valid only in the context it was found in.
#[derive(Debug, Clone)]
pub struct ElementHandle {
    id: ElementId,
    locator: Locator,
    context: ExecutionContext,
}

impl ElementHandle {
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }
}

/// Proof that an origin block is open.
#[must_use = "an origin scope must be closed with Session::exit_origin"]
#[derive(Debug)]
pub struct OriginScope {
    context_id: u64,
    origin: Origin,
}

impl OriginScope {
    pub fn origin(&self) -> &Origin {
        &self.origin
    }
}

pub struct Session<D> {
    driver: D,
    base_url: Url,
    app: AppConfig,
    element_wait: WaitPolicy,
    navigation_wait: WaitPolicy,
    contexts: ContextStack,
}

impl<D: BrowserDriver> Session<D> {
    pub fn new(driver: D, config: &HarnessConfig) -> E2eResult<Self> {
        let base_url = config.app.base_url()?;
        let root = Origin::of(&base_url)?;
        Ok(Self {
            driver,
            base_url,
            app: config.app.clone(),
            element_wait: config.wait.element_policy(),
            navigation_wait: config.wait.navigation_policy(),
            contexts: ContextStack::new(root),
        })
    }

    pub fn active_context(&self) -> &ExecutionContext {
        self.contexts.active()
    }

    /// Number of open origin blocks.
    pub fn depth(&self) -> usize {
        self.contexts.depth()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// End the browser session.
    pub async fn close(mut self) -> E2eResult<()> {
        if self.contexts.depth() > 0 {
            warn!(
                "Closing session with {} origin scope(s) still open",
                self.contexts.depth()
            );
        }
        self.driver.quit().await
    }

    /// Whether the driver's focused document belongs to `ctx`.
    async fn in_context(&mut self, ctx: &ExecutionContext) -> E2eResult<bool> {
        Ok(self
            .driver
            .document_url()
            .await?
            .is_some_and(|url| ctx.origin.matches(&url)))
    }

    fn require_root(&self, action: &str) -> E2eResult<()> {
        let ctx = self.contexts.active();
        if ctx.kind != ContextKind::Root {
            return Err(E2eError::InvalidContext(format!(
                "{action} is only available in the root context, not in {ctx}"
            )));
        }
        Ok(())
    }

    fn require_handle_context(&self, handle: &ElementHandle) -> E2eResult<()> {
        let active = self.contexts.active();
        if handle.context.id != active.id {
            return Err(E2eError::StaleHandle {
                locator: handle.locator.to_string(),
                located_in: handle.context.to_string(),
                active: active.to_string(),
            });
        }
        Ok(())
    }

    async fn await_ready(&mut self, url: &Url, started: Instant) -> E2eResult<()> {
        let mut poller = Poller::start(&self.navigation_wait);
        loop {
            if self.driver.document_ready().await? {
                return Ok(());
            }
            poller.tick().await.map_err(|_| E2eError::Navigation {
                url: url.to_string(),
                waited: started.elapsed(),
            })?;
        }
    }

    /// Navigate the active context to `path`, resolved against its origin.
    pub async fn visit(&mut self, path: &str) -> E2eResult<()> {
        let ctx = self.contexts.active().clone();
        if !self.contexts.frame_path().is_empty() {
            return Err(E2eError::InvalidContext(format!(
                "cannot visit {path} from {ctx}; frames are navigated by their parent document"
            )));
        }

        let base = match ctx.kind {
            ContextKind::Root => self.base_url.clone(),
            _ => ctx.origin.to_url()?,
        };
        let url = base.join(path)?;
        info!("visit {}", url);

        let started = Instant::now();
        if let Err(e) = self.driver.navigate(&url).await {
            warn!("Navigation to {} failed: {}", url, e);
            return Err(E2eError::Navigation {
                url: url.to_string(),
                waited: started.elapsed(),
            });
        }
        self.await_ready(&url, started).await
    }

    /// Sign in through the login form and wait until the application has
    /// accepted the credentials.
    ///
    /// A login form that cannot be loaded or filled in is reported as an
    /// authentication failure carrying the underlying cause.
    pub async fn login(&mut self, identity: &str, secret: &str) -> E2eResult<()> {
        self.require_root("login")?;
        info!("login as {}", identity);
        let started = Instant::now();

        let login_path = self.app.login_path.clone();
        if let Err(e) = self.submit_login_form(&login_path, identity, secret).await {
            return Err(match e {
                E2eError::Navigation { .. }
                | E2eError::ElementNotFound { .. }
                | E2eError::NotInteractable { .. } => {
                    warn!("Login form for {} failed: {}", identity, e);
                    E2eError::Authentication {
                        identity: identity.to_string(),
                        waited: started.elapsed(),
                        reason: e.to_string(),
                    }
                }
                other => other,
            });
        }

        let root = self.contexts.root().clone();
        let marker = self.app.authenticated_marker();
        let mut poller = Poller::start(&self.navigation_wait);
        loop {
            if self.signed_in(&root, &login_path, marker.as_ref()).await? {
                debug!("signed in as {} after {:?}", identity, started.elapsed());
                return Ok(());
            }
            poller.tick().await.map_err(|_| E2eError::Authentication {
                identity: identity.to_string(),
                waited: started.elapsed(),
                reason: format!("still on {login_path} after submitting the form"),
            })?;
        }
    }

    async fn submit_login_form(
        &mut self,
        login_path: &str,
        identity: &str,
        secret: &str,
    ) -> E2eResult<()> {
        self.visit(login_path).await?;

        let username = self
            .find(&Locator::Css(self.app.username_selector.clone()))
            .await?;
        self.type_text(&username, identity).await?;
        let password = self
            .find(&Locator::Css(self.app.password_selector.clone()))
            .await?;
        self.type_text(&password, secret).await?;
        let submit = self
            .find(&Locator::Css(self.app.submit_selector.clone()))
            .await?;
        self.click(&submit).await
    }

    async fn signed_in(
        &mut self,
        root: &ExecutionContext,
        login_path: &str,
        marker: Option<&Locator>,
    ) -> E2eResult<bool> {
        if !self.driver.document_ready().await? || !self.in_context(root).await? {
            return Ok(false);
        }
        if self.driver.current_url().await?.path() == login_path {
            return Ok(false);
        }
        match marker {
            Some(marker) => Ok(self.driver.query(marker).await?.is_some()),
            None => Ok(true),
        }
    }

    /// Wait for the first element matching `locator` in the active context.
    pub async fn find(&mut self, locator: &Locator) -> E2eResult<ElementHandle> {
        let ctx = self.contexts.active().clone();
        debug!("find {} in {}", locator, ctx);

        let mut poller = Poller::start(&self.element_wait);
        loop {
            if self.in_context(&ctx).await? {
                if let Some(id) = self.driver.query(locator).await? {
                    return Ok(ElementHandle {
                        id,
                        locator: locator.clone(),
                        context: ctx,
                    });
                }
            }
            poller
                .tick()
                .await
                .map_err(|t| E2eError::ElementNotFound {
                    locator: locator.to_string(),
                    context: ctx.to_string(),
                    waited: t.elapsed,
                })?;
        }
    }

    async fn ensure_interactable(&mut self, handle: &ElementHandle) -> E2eResult<()> {
        self.require_handle_context(handle)?;
        let state = self.driver.element_state(handle.id).await?;
        match state.blocker() {
            Some(reason) => Err(E2eError::NotInteractable {
                locator: handle.locator.to_string(),
                context: handle.context.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub async fn type_text(&mut self, handle: &ElementHandle, text: &str) -> E2eResult<()> {
        self.ensure_interactable(handle).await?;
        debug!("type into {}", handle.locator);
        self.driver.send_keys(handle.id, text).await
    }

    pub async fn select(&mut self, handle: &ElementHandle, option: &str) -> E2eResult<()> {
        self.ensure_interactable(handle).await?;
        debug!("select '{}' in {}", option, handle.locator);
        if !self.driver.select_option(handle.id, option).await? {
            return Err(E2eError::NotInteractable {
                locator: handle.locator.to_string(),
                context: handle.context.to_string(),
                reason: format!("no option matching '{option}'"),
            });
        }
        Ok(())
    }

    pub async fn click(&mut self, handle: &ElementHandle) -> E2eResult<()> {
        self.ensure_interactable(handle).await?;
        debug!("click {}", handle.locator);
        self.driver.click(handle.id).await
    }

    /// Wait until `text` is visible in the active context.
    pub async fn assert_visible_text(&mut self, text: &str) -> E2eResult<()> {
        let ctx = self.contexts.active().clone();
        debug!("expect '{}' in {}", text, ctx);

        let mut poller = Poller::start(&self.element_wait);
        loop {
            if self.in_context(&ctx).await? && self.driver.text_visible(text).await? {
                return Ok(());
            }
            poller
                .tick()
                .await
                .map_err(|t| E2eError::AssertionFailed {
                    text: text.to_string(),
                    context: ctx.to_string(),
                    waited: t.elapsed,
                })?;
        }
    }

    /// Switch to the document of `origin`: either the active document once it
    /// has navigated there, or an embedded frame whose source is on it.
    pub async fn enter_origin(&mut self, origin: &Origin) -> E2eResult<OriginScope> {
        let outer = self.contexts.active().clone();
        info!("enter origin {} from {}", origin, outer);

        let mut poller = Poller::start(&self.navigation_wait);
        let kind = loop {
            if let Some(kind) = self.locate_origin(origin).await? {
                break kind;
            }
            poller
                .tick()
                .await
                .map_err(|t| E2eError::ContextUnavailable {
                    origin: origin.to_string(),
                    waited: t.elapsed,
                })?;
        };

        if let ContextKind::Frame { index } = kind {
            self.driver.enter_frame(index).await?;
        }
        let ctx = self.contexts.push(origin.clone(), kind);
        debug!("active context is now {}", ctx);
        Ok(OriginScope {
            context_id: ctx.id,
            origin: origin.clone(),
        })
    }

    async fn locate_origin(&mut self, origin: &Origin) -> E2eResult<Option<ContextKind>> {
        if !self.driver.document_ready().await? {
            return Ok(None);
        }
        if let Some(url) = self.driver.document_url().await? {
            if origin.matches(&url) {
                return Ok(Some(ContextKind::Navigated));
            }
        }
        let frame = self
            .driver
            .frames()
            .await?
            .into_iter()
            .find(|f| f.src.as_ref().is_some_and(|src| origin.matches(src)));
        Ok(frame.map(|f| ContextKind::Frame { index: f.index }))
    }

    /// Close an origin block and refocus the driver on the enclosing context.
    ///
    /// The stack is popped even if refocusing fails.
    pub async fn exit_origin(&mut self, scope: OriginScope) -> E2eResult<()> {
        let closed = self.contexts.pop(scope.context_id)?;
        info!("leave {}", closed);
        self.refocus().await
    }

    /// Point the driver at the active context's document by walking the
    /// frame path from the top-level document.
    async fn refocus(&mut self) -> E2eResult<()> {
        self.driver.enter_root().await?;
        for index in self.contexts.frame_path() {
            self.driver.enter_frame(index).await.map_err(|e| {
                warn!("Could not re-enter frame #{}: {}", index, e);
                E2eError::ContextUnavailable {
                    origin: self.contexts.active().origin.to_string(),
                    waited: Duration::ZERO,
                }
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{ClickOutcome, Document, FormData, MemoryBrowser, MemorySite, Node};

    const APP: &str = "http://app.test";
    const PAY: &str = "https://pay.test";
    const WIDGET: &str = "https://widget.test";

    /// App page embedding a payment frame, which itself embeds a widget frame.
    struct FramedSite {
        frame_delay: Duration,
    }

    impl MemorySite for FramedSite {
        fn render(&mut self, url: &Url) -> Option<Document> {
            let doc = Document::new(url.clone());
            match (url.origin().ascii_serialization().as_str(), url.path()) {
                (APP, "/checkout/") => Some(
                    doc.node(Node::new("heading").css("#app-heading").text("Checkout"))
                        .node(Node::new("hidden").css("#hidden").hidden())
                        .node(Node::new("off").css("#off").disabled())
                        .frame_after(Url::parse(&format!("{PAY}/form")).ok()?, self.frame_delay),
                ),
                (PAY, "/form") => Some(
                    doc.node(Node::new("card").css("#cardNumber"))
                        .node(Node::new("country").css("#country").options(["US", "DE"]))
                        .node(Node::new("notice").text("Secure payment"))
                        .frame(Url::parse(&format!("{WIDGET}/w")).ok()?),
                ),
                (WIDGET, "/w") => Some(doc.node(Node::new("ok").css("#widget-ok").text("Verified"))),
                (APP, "/people/login/") => Some(
                    doc.node(Node::new("username").css(r#"input[name="username"]"#))
                        .node(Node::new("password").css(r#"input[name="password"]"#))
                        .node(Node::new("submit").css(r#"form [type="submit"]"#)),
                ),
                _ => None,
            }
        }

        /// Every login is rejected: the form just stays put.
        fn on_click(&mut self, _page: &Url, _key: &str, _form: &FormData) -> ClickOutcome {
            ClickOutcome::Stay
        }
    }

    fn config() -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.app.base_url = APP.to_string();
        config.wait.timeout_ms = 1_000;
        config.wait.navigation_timeout_ms = 2_000;
        config
    }

    async fn session(frame_delay: Duration) -> (Session<MemoryBrowser>, MemoryBrowser) {
        let browser = MemoryBrowser::new(FramedSite { frame_delay });
        let mut session = Session::new(browser.clone(), &config()).unwrap();
        session.visit("/checkout/").await.unwrap();
        (session, browser)
    }

    fn css(s: &str) -> Locator {
        Locator::Css(s.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_inner_selector_never_resolves_in_outer_context() {
        let (mut session, _) = session(Duration::ZERO).await;

        let err = session.find(&css("#cardNumber")).await.unwrap_err();
        assert!(matches!(err, E2eError::ElementNotFound { .. }), "{err}");
        assert_eq!(err.waited(), Some(Duration::from_millis(1_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outer_selector_never_resolves_in_inner_context() {
        let (mut session, _) = session(Duration::ZERO).await;
        let scope = session.enter_origin(&PAY.parse().unwrap()).await.unwrap();

        assert!(session.find(&css("#cardNumber")).await.is_ok());
        let err = session.find(&css("#app-heading")).await.unwrap_err();
        assert!(matches!(err, E2eError::ElementNotFound { .. }));
        assert!(session.assert_visible_text("Checkout").await.is_err());

        session.exit_origin(scope).await.unwrap();
        assert!(session.find(&css("#app-heading")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_frame_to_appear() {
        let (mut session, browser) = session(Duration::from_millis(800)).await;
        let started = tokio::time::Instant::now();

        let scope = session.enter_origin(&PAY.parse().unwrap()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(800));
        assert_eq!(browser.focus(), vec![0]);
        assert!(matches!(
            session.active_context().kind,
            ContextKind::Frame { index: 0 }
        ));

        session.exit_origin(scope).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_origin_fails_without_fallback() {
        let (mut session, browser) = session(Duration::ZERO).await;

        let err = session
            .enter_origin(&"https://elsewhere.test".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::ContextUnavailable { .. }), "{err}");
        assert_eq!(err.waited(), Some(Duration::from_millis(2_000)));
        assert_eq!(session.depth(), 0);
        assert!(browser.focus().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_origins_restore_each_level() {
        let (mut session, browser) = session(Duration::ZERO).await;

        let pay = session.enter_origin(&PAY.parse().unwrap()).await.unwrap();
        let widget = session.enter_origin(&WIDGET.parse().unwrap()).await.unwrap();
        assert_eq!(session.depth(), 2);
        assert_eq!(browser.focus(), vec![0, 0]);
        session.assert_visible_text("Verified").await.unwrap();

        session.exit_origin(widget).await.unwrap();
        assert_eq!(browser.focus(), vec![0]);
        session.assert_visible_text("Secure payment").await.unwrap();

        session.exit_origin(pay).await.unwrap();
        assert!(browser.focus().is_empty());
        assert_eq!(session.active_context().kind, ContextKind::Root);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scopes_close_in_reverse_order_only() {
        let (mut session, _) = session(Duration::ZERO).await;

        let pay = session.enter_origin(&PAY.parse().unwrap()).await.unwrap();
        let widget = session.enter_origin(&WIDGET.parse().unwrap()).await.unwrap();

        let err = session.exit_origin(pay).await.unwrap_err();
        assert!(matches!(err, E2eError::ContextOrder { .. }));
        assert_eq!(session.depth(), 2);
        session.exit_origin(widget).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_from_other_context_is_stale() {
        let (mut session, _) = session(Duration::ZERO).await;
        let scope = session.enter_origin(&PAY.parse().unwrap()).await.unwrap();
        let card = session.find(&css("#cardNumber")).await.unwrap();
        session.exit_origin(scope).await.unwrap();

        let err = session.type_text(&card, "4242").await.unwrap_err();
        assert!(matches!(err, E2eError::StaleHandle { .. }), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_and_disabled_elements_are_not_interactable() {
        let (mut session, _) = session(Duration::ZERO).await;

        let hidden = session.find(&css("#hidden")).await.unwrap();
        let err = session.click(&hidden).await.unwrap_err();
        assert!(err.to_string().contains("hidden"), "{err}");

        let off = session.find(&css("#off")).await.unwrap();
        let err = session.click(&off).await.unwrap_err();
        assert!(err.to_string().contains("disabled"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_rejects_unknown_option() {
        let (mut session, browser) = session(Duration::ZERO).await;
        let scope = session.enter_origin(&PAY.parse().unwrap()).await.unwrap();

        let country = session.find(&css("#country")).await.unwrap();
        session.select(&country, "US").await.unwrap();
        let err = session.select(&country, "XX").await.unwrap_err();
        assert!(matches!(err, E2eError::NotInteractable { .. }));
        assert!(browser.commands().contains(&"select country US".to_string()));

        session.exit_origin(scope).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_assertion_failure_is_distinct_from_missing_element() {
        let (mut session, _) = session(Duration::ZERO).await;
        let err = session.assert_visible_text("Card deleted.").await.unwrap_err();
        assert!(matches!(err, E2eError::AssertionFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_visit_unknown_page_times_out_as_navigation() {
        let (mut session, _) = session(Duration::ZERO).await;
        let err = session.visit("/missing/").await.unwrap_err();
        assert!(matches!(err, E2eError::Navigation { .. }), "{err}");
        assert!(err.waited().unwrap() >= Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_visit_inside_frame_is_rejected() {
        let (mut session, _) = session(Duration::ZERO).await;
        let scope = session.enter_origin(&PAY.parse().unwrap()).await.unwrap();
        assert!(matches!(
            session.visit("/form").await,
            Err(E2eError::InvalidContext(_))
        ));
        assert!(matches!(
            session.login("pixel", "password").await,
            Err(E2eError::InvalidContext(_))
        ));
        session.exit_origin(scope).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_login_times_out_as_authentication() {
        let (mut session, browser) = session(Duration::ZERO).await;
        let started = tokio::time::Instant::now();

        let err = session.login("pixel", "wrong").await.unwrap_err();
        let E2eError::Authentication { identity, waited, .. } = &err else {
            panic!("expected Authentication, got {err}");
        };
        assert_eq!(identity, "pixel");
        assert!(*waited >= Duration::from_millis(2_000));
        assert!(started.elapsed() >= Duration::from_millis(2_000));
        assert!(browser.commands().contains(&"click submit".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_login_form_is_an_authentication_failure() {
        let browser = MemoryBrowser::new(FramedSite {
            frame_delay: Duration::ZERO,
        });
        let mut config = config();
        // no username field on this page
        config.app.login_path = "/checkout/".to_string();
        let mut session = Session::new(browser, &config).unwrap();

        let err = session.login("pixel", "password").await.unwrap_err();
        let E2eError::Authentication { reason, waited, .. } = &err else {
            panic!("expected Authentication, got {err}");
        };
        assert!(reason.contains(r#"input[name="username"]"#), "{reason}");
        assert!(*waited >= Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_handle_does_not_survive_origin_block() {
        let (mut session, _) = session(Duration::ZERO).await;
        let heading = session.find(&css("#app-heading")).await.unwrap();

        let scope = session.enter_origin(&PAY.parse().unwrap()).await.unwrap();
        session.exit_origin(scope).await.unwrap();

        let err = session.click(&heading).await.unwrap_err();
        assert!(matches!(err, E2eError::NotInteractable { .. }), "{err}");
        assert!(err.to_string().contains("no longer attached"), "{err}");
        assert!(session.find(&css("#app-heading")).await.is_ok());
    }
}
