use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::consent::{ConsentDismisser, SelectorConsent};
use crate::dom::truncate_chars;
use crate::error::{AgentError, Result};
use crate::overlay::Overlay;
use crate::page::{LoadWait, Locator, Page, Presence};
use crate::types::{
    Action, CLICK_TIMEOUT_MS, EXTRACT_MAX_CHARS, MAX_WAIT_MS, NAVIGATE_SETTLE_MS,
};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const HIGHLIGHT_PAUSE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Shared budget for resolving and clicking one target.
    pub click_timeout: Duration,
    pub load_wait: LoadWait,
    /// Pause after navigation before consent handling.
    pub settle: Duration,
    /// Pause after clicks and key presses so the page can react.
    pub after_action: Duration,
    pub visualize: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            click_timeout: Duration::from_millis(CLICK_TIMEOUT_MS),
            load_wait: LoadWait::ContentLoaded,
            settle: Duration::from_millis(NAVIGATE_SETTLE_MS),
            after_action: Duration::from_millis(1000),
            visualize: false,
        }
    }
}

impl ExecutorSettings {
    /// Stricter load wait for flows that only read the page.
    pub fn extraction() -> Self {
        Self {
            load_wait: LoadWait::NetworkIdle,
            ..Self::default()
        }
    }
}

/// Successful result of one action.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    Extracted(String),
    Finished,
}

impl Outcome {
    /// Text recorded as the step's observation.
    pub fn observation(&self) -> String {
        match self {
            Outcome::Done => "OK".to_string(),
            Outcome::Extracted(value) => value.clone(),
            Outcome::Finished => "FINISHED".to_string(),
        }
    }
}

/// Ordered resolution strategies for a click target.
fn click_chain(target: &str) -> [Locator; 3] {
    [
        Locator::Role {
            role: "button".to_string(),
            name: target.to_string(),
        },
        Locator::Text(target.to_string()),
        Locator::Selector(target.to_string()),
    ]
}

/// Labeled field first, then a raw selector.
fn input_chain(target: &str) -> [Locator; 2] {
    [
        Locator::Label(target.to_string()),
        Locator::Selector(target.to_string()),
    ]
}

/// Performs actions against one page.
///
/// Every driver failure comes back as an `Err`; nothing here panics on bad
/// selectors. The only state kept is whether overlays are installed in the
/// current document.
pub struct Executor {
    page: Arc<dyn Page>,
    settings: ExecutorSettings,
    consent: Arc<dyn ConsentDismisser>,
    overlay: Option<Arc<dyn Overlay>>,
    overlays_installed: bool,
}

impl Executor {
    pub fn new(page: Arc<dyn Page>, settings: ExecutorSettings) -> Self {
        Self {
            page,
            settings,
            consent: Arc::new(SelectorConsent::default()),
            overlay: None,
            overlays_installed: false,
        }
    }

    pub fn with_consent(mut self, consent: Arc<dyn ConsentDismisser>) -> Self {
        self.consent = consent;
        self
    }

    pub fn with_overlay(mut self, overlay: Arc<dyn Overlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn execute(&mut self, action: &Action) -> Result<Outcome> {
        info!(component = "executor", %action, "executing");
        let result = match action {
            Action::Navigate { url } => self.navigate(url),
            Action::Click { target } => self.click(target),
            Action::Type { target, text } => self.type_text(target, text),
            Action::PressKey { key } => self.press_key(key),
            Action::Wait { millis } => {
                self.page.pause(Duration::from_millis((*millis).min(MAX_WAIT_MS)));
                Ok(Outcome::Done)
            }
            Action::Extract { target, attribute } => self.extract(target, attribute.as_deref()),
            Action::Finish { .. } => Ok(Outcome::Finished),
        };
        if let Err(e) = &result {
            debug!(component = "executor", kind = action.kind(), error = %e, "action failed");
        }
        result
    }

    fn navigate(&mut self, url: &str) -> Result<Outcome> {
        if url.trim().is_empty() {
            return Err(AgentError::InvalidArgument("navigate needs a url".into()));
        }
        self.page.goto(url, self.settings.load_wait)?;
        // Overlays do not survive a new document.
        self.overlays_installed = false;
        self.page.pause(self.settings.settle);
        if self.consent.try_dismiss(self.page.as_ref()) {
            info!(component = "executor", "cookie banner dismissed");
        }
        self.ensure_overlays();
        Ok(Outcome::Done)
    }

    fn click(&mut self, target: &str) -> Result<Outcome> {
        let (locator, waited) = self.resolve_visible(&click_chain(target), target)?;
        self.highlight(&locator, target);
        let remaining = self.settings.click_timeout.saturating_sub(waited).max(POLL_INTERVAL);
        self.page.click(&locator, remaining)?;
        debug!(component = "executor", strategy = locator.strategy(), "clicked");
        self.page.pause(self.settings.after_action);
        Ok(Outcome::Done)
    }

    fn type_text(&mut self, target: &str, text: &str) -> Result<Outcome> {
        let (locator, _) = self.resolve_visible(&input_chain(target), target)?;
        self.highlight(&locator, target);
        self.page.fill(&locator, text)?;
        Ok(Outcome::Done)
    }

    fn press_key(&mut self, key: &str) -> Result<Outcome> {
        if key.trim().is_empty() {
            return Err(AgentError::InvalidArgument("press_key needs a key".into()));
        }
        self.page.press_key(key)?;
        self.page.pause(self.settings.after_action);
        Ok(Outcome::Done)
    }

    /// A blank value counts as failure: it usually means the selector hit
    /// the wrong node, and failing lets the oracle try another one.
    fn extract(&mut self, target: &str, attribute: Option<&str>) -> Result<Outcome> {
        let locator = Locator::Selector(target.to_string());
        if self.page.presence(&locator)? == Presence::Missing {
            return Err(AgentError::ElementNotFound(target.to_string()));
        }
        let value = match attribute {
            Some(name) => self.page.attribute(&locator, name)?,
            None => self.page.inner_text(&locator)?,
        };
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => {
                Ok(Outcome::Extracted(truncate_chars(v, EXTRACT_MAX_CHARS)))
            }
            _ => Err(AgentError::EmptyExtraction(target.to_string())),
        }
    }

    /// Walk `chain` in order, polling until one strategy yields a visible
    /// element or the click budget runs out. Returns the winning locator and
    /// the time spent waiting.
    fn resolve_visible(&self, chain: &[Locator], target: &str) -> Result<(Locator, Duration)> {
        let mut waited = Duration::ZERO;
        loop {
            let mut hidden = false;
            for locator in chain {
                match self.page.presence(locator)? {
                    Presence::Visible => return Ok((locator.clone(), waited)),
                    Presence::Hidden => hidden = true,
                    Presence::Missing => {}
                }
            }
            if waited >= self.settings.click_timeout {
                return Err(if hidden {
                    AgentError::ElementNotVisible(target.to_string())
                } else {
                    AgentError::ElementNotFound(target.to_string())
                });
            }
            self.page.pause(POLL_INTERVAL);
            waited += POLL_INTERVAL;
        }
    }

    fn ensure_overlays(&mut self) {
        if !self.settings.visualize || self.overlays_installed {
            return;
        }
        let Some(overlay) = &self.overlay else {
            return;
        };
        let installed = overlay
            .install_cursor(self.page.as_ref())
            .and_then(|_| overlay.install_highlighter(self.page.as_ref()));
        match installed {
            Ok(()) => self.overlays_installed = true,
            Err(e) => debug!(component = "overlay", error = %e, "overlay install failed"),
        }
    }

    fn highlight(&mut self, locator: &Locator, label: &str) {
        if !self.settings.visualize {
            return;
        }
        self.ensure_overlays();
        if let Some(overlay) = &self.overlay {
            if let Err(e) = overlay.highlight(self.page.as_ref(), locator, label) {
                debug!(component = "overlay", error = %e, "highlight failed");
            }
            self.page.pause(HIGHLIGHT_PAUSE);
        }
    }
}
