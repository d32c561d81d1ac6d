use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// How long `goto` waits before handing the page back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadWait {
    /// DOM parsed; used by interactive flows to stay responsive.
    ContentLoaded,
    /// Network settled; used by extraction-only flows.
    NetworkIdle,
}

/// A way of finding one element on the page.
///
/// Model-supplied strings only ever travel inside a `Locator` as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Semantic role plus accessible name, e.g. a button named "Login".
    Role { role: String, name: String },
    /// Element whose normalized visible text equals the string exactly.
    Text(String),
    /// Form control associated with a label, aria-label or placeholder.
    Label(String),
    /// Raw CSS selector, or a `text=` substring query.
    Selector(String),
}

impl Locator {
    pub fn strategy(&self) -> &'static str {
        match self {
            Locator::Role { .. } => "role",
            Locator::Text(_) => "text",
            Locator::Label(_) => "label",
            Locator::Selector(_) => "selector",
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Role { role, name } => write!(f, "{role} named {name:?}"),
            Locator::Text(t) => write!(f, "text {t:?}"),
            Locator::Label(l) => write!(f, "label {l:?}"),
            Locator::Selector(s) => write!(f, "selector {s:?}"),
        }
    }
}

/// Result of probing a locator without touching the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Missing,
    Hidden,
    Visible,
}

/// Blocking page-automation surface the executor drives.
///
/// Implementations assume single-threaded access: callers never issue two
/// operations against the same page concurrently.
pub trait Page: Send + Sync {
    fn goto(&self, url: &str, wait: LoadWait) -> Result<()>;
    fn url(&self) -> Result<String>;
    fn title(&self) -> Result<String>;
    /// Serialized HTML of the current document.
    fn content(&self) -> Result<String>;
    /// `document.body.innerText`.
    fn body_text(&self) -> Result<String>;
    fn presence(&self, locator: &Locator) -> Result<Presence>;
    /// Click the first visible match, waiting at most `timeout` for it.
    fn click(&self, locator: &Locator, timeout: Duration) -> Result<()>;
    /// Replace the content of a form control.
    fn fill(&self, locator: &Locator, text: &str) -> Result<()>;
    /// Visible text of the first match; `None` when nothing matches.
    fn inner_text(&self, locator: &Locator) -> Result<Option<String>>;
    fn attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>>;
    fn press_key(&self, key: &str) -> Result<()>;
    fn pause(&self, duration: Duration);
    /// Evaluate one of the crate's own scripts and return its value when it
    /// is a string. Caller data is embedded only as JSON literals.
    fn run_script(&self, script: &str) -> Result<Option<String>>;
    fn screenshot(&self, path: &Path) -> Result<()>;
}
