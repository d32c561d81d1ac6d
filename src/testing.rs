//! In-memory stand-ins for a browser page, a launcher and the oracle.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};

use crate::brain::{OracleRequest, PlanningOracle};
use crate::error::{AgentError, Result};
use crate::page::{LoadWait, Locator, Page, Presence};
use crate::registry::{BrowserSession, LaunchSettings, Launcher};

#[derive(Debug, Clone)]
pub struct FixtureElement {
    tag: String,
    text: String,
    classes: Vec<String>,
    id: Option<String>,
    label: Option<String>,
    attrs: Vec<(String, String)>,
    visible: bool,
    stuck: bool,
}

impl FixtureElement {
    pub fn new(tag: &str, text: &str) -> Self {
        Self {
            tag: tag.to_string(),
            text: text.to_string(),
            classes: Vec::new(),
            id: None,
            label: None,
            attrs: Vec::new(),
            visible: true,
            stuck: false,
        }
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Clicks on this element never complete.
    pub fn stuck(mut self) -> Self {
        self.stuck = true;
        self
    }

    fn role(&self) -> Option<&str> {
        match self.tag.as_str() {
            "button" => Some("button"),
            "a" => Some("link"),
            "input" | "textarea" => Some("textbox"),
            _ => None,
        }
    }

    fn matches_css(&self, selector: &str) -> bool {
        let (tag, rest) = match selector.find(['.', '#']) {
            Some(i) => selector.split_at(i),
            None => (selector, ""),
        };
        if !tag.is_empty() && tag != self.tag {
            return false;
        }
        if let Some(class) = rest.strip_prefix('.') {
            return self.classes.iter().any(|c| c == class);
        }
        if let Some(id) = rest.strip_prefix('#') {
            return self.id.as_deref() == Some(id);
        }
        !tag.is_empty() && tag.chars().all(|c| c.is_ascii_alphanumeric())
    }

    fn matches(&self, locator: &Locator) -> bool {
        match locator {
            Locator::Role { role, name } => {
                self.role() == Some(role.as_str())
                    && self.text.to_lowercase().contains(&name.to_lowercase())
            }
            Locator::Text(exact) => self.text.trim() == exact.trim(),
            Locator::Label(label) => self
                .label
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(label.trim())),
            Locator::Selector(raw) => match raw.strip_prefix("text=") {
                Some(want) => self.text.to_lowercase().contains(&want.to_lowercase()),
                None => self.matches_css(raw),
            },
        }
    }

    fn html(&self) -> String {
        let mut attrs = String::new();
        if !self.classes.is_empty() {
            attrs.push_str(&format!(" class=\"{}\"", self.classes.join(" ")));
        }
        if let Some(id) = &self.id {
            attrs.push_str(&format!(" id=\"{id}\""));
        }
        for (k, v) in &self.attrs {
            attrs.push_str(&format!(" {k}=\"{v}\""));
        }
        format!("<{tag}{attrs}>{text}</{tag}>", tag = self.tag, text = self.text)
    }
}

#[derive(Default)]
struct FixtureState {
    url: String,
    title: String,
    elements: Vec<FixtureElement>,
    routes: HashMap<String, (String, Vec<FixtureElement>)>,
    visits: Vec<String>,
    clicked: Vec<String>,
    filled: Vec<(String, String)>,
    keys: Vec<String>,
    scripts: usize,
    outline: Option<String>,
    paused: Duration,
}

/// A page whose DOM is a flat list of elements.
///
/// CSS support is limited to `tag`, `.class`, `#id` and `tag.class`.
pub struct FixturePage {
    state: Mutex<FixtureState>,
}

impl FixturePage {
    pub fn new(elements: Vec<FixtureElement>) -> Self {
        Self {
            state: Mutex::new(FixtureState {
                url: "about:blank".into(),
                elements,
                ..Default::default()
            }),
        }
    }

    pub fn with_location(self, url: &str, title: &str) -> Self {
        {
            let mut state = self.lock();
            state.url = url.to_string();
            state.title = title.to_string();
        }
        self
    }

    /// Text every script evaluation returns, standing in for the outline capture.
    pub fn with_outline(self, outline: &str) -> Self {
        self.lock().outline = Some(outline.to_string());
        self
    }

    /// Serve `elements` when `url` is visited.
    pub fn route(self, url: &str, title: &str, elements: Vec<FixtureElement>) -> Self {
        self.lock()
            .routes
            .insert(url.to_string(), (title.to_string(), elements));
        self
    }

    fn lock(&self) -> MutexGuard<'_, FixtureState> {
        self.state.lock()
    }

    fn first_match(&self, locator: &Locator) -> Option<FixtureElement> {
        let state = self.lock();
        let matching: Vec<_> = state.elements.iter().filter(|e| e.matches(locator)).collect();
        matching
            .iter()
            .find(|e| e.visible)
            .or_else(|| matching.first())
            .map(|e| (*e).clone())
    }

    pub fn visits(&self) -> Vec<String> {
        self.lock().visits.clone()
    }

    pub fn clicked(&self) -> Vec<String> {
        self.lock().clicked.clone()
    }

    pub fn filled(&self) -> Vec<(String, String)> {
        self.lock().filled.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys.clone()
    }

    pub fn scripts_run(&self) -> usize {
        self.lock().scripts
    }

    pub fn total_paused(&self) -> Duration {
        self.lock().paused
    }
}

impl Page for FixturePage {
    fn goto(&self, url: &str, _wait: LoadWait) -> Result<()> {
        let mut state = self.lock();
        if url.starts_with("unreachable:") {
            return Err(AgentError::Browser(format!("net::ERR_NAME_NOT_RESOLVED at {url}")));
        }
        state.visits.push(url.to_string());
        state.url = url.to_string();
        if let Some((title, elements)) = state.routes.get(url).cloned() {
            state.title = title;
            state.elements = elements;
        }
        Ok(())
    }

    fn url(&self) -> Result<String> {
        Ok(self.lock().url.clone())
    }

    fn title(&self) -> Result<String> {
        Ok(self.lock().title.clone())
    }

    fn content(&self) -> Result<String> {
        let state = self.lock();
        let body: String = state.elements.iter().map(FixtureElement::html).collect();
        Ok(format!(
            "<html><head><title>{}</title></head><body>{}</body></html>",
            state.title, body
        ))
    }

    fn body_text(&self) -> Result<String> {
        let state = self.lock();
        let texts: Vec<&str> = state
            .elements
            .iter()
            .filter(|e| e.visible)
            .map(|e| e.text.as_str())
            .collect();
        Ok(texts.join("\n"))
    }

    fn presence(&self, locator: &Locator) -> Result<Presence> {
        let state = self.lock();
        let mut presence = Presence::Missing;
        for element in state.elements.iter().filter(|e| e.matches(locator)) {
            if element.visible {
                return Ok(Presence::Visible);
            }
            presence = Presence::Hidden;
        }
        Ok(presence)
    }

    fn click(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        let element = self
            .first_match(locator)
            .filter(|e| e.visible)
            .ok_or_else(|| AgentError::ElementNotFound(locator.to_string()))?;
        if element.stuck {
            return Err(AgentError::ActionTimeout {
                what: format!("click {locator}"),
                millis: timeout.as_millis() as u64,
            });
        }
        self.lock().clicked.push(element.text);
        Ok(())
    }

    fn fill(&self, locator: &Locator, text: &str) -> Result<()> {
        let element = self
            .first_match(locator)
            .ok_or_else(|| AgentError::ElementNotFound(locator.to_string()))?;
        let key = element.label.or(element.id).unwrap_or(element.tag);
        self.lock().filled.push((key, text.to_string()));
        Ok(())
    }

    fn inner_text(&self, locator: &Locator) -> Result<Option<String>> {
        Ok(self.first_match(locator).map(|e| e.text))
    }

    fn attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>> {
        Ok(self.first_match(locator).and_then(|e| {
            e.attrs
                .into_iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v)
        }))
    }

    fn press_key(&self, key: &str) -> Result<()> {
        self.lock().keys.push(key.to_string());
        Ok(())
    }

    fn pause(&self, duration: Duration) {
        self.lock().paused += duration;
    }

    fn run_script(&self, _script: &str) -> Result<Option<String>> {
        let mut state = self.lock();
        state.scripts += 1;
        Ok(state.outline.clone())
    }

    fn screenshot(&self, path: &Path) -> Result<()> {
        std::fs::write(path, b"\x89PNG fixture").map_err(AgentError::browser)
    }
}

pub struct FixtureSession {
    pub serial: usize,
    pub page: Arc<FixturePage>,
    pub alive: AtomicBool,
    pub closed: AtomicBool,
}

impl fmt::Debug for FixtureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureSession")
            .field("serial", &self.serial)
            .field("alive", &self.alive)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl BrowserSession for FixtureSession {
    fn page(&self) -> Arc<dyn Page> {
        self.page.clone()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Counts launches; optionally slow, optionally failing the first N launches.
pub struct FixtureLauncher {
    launches: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
    page: Option<Arc<FixturePage>>,
}

impl FixtureLauncher {
    pub fn new() -> Self {
        Self {
            launches: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: Duration::ZERO,
            page: None,
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(self, times: usize) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    /// Hand out this page to every session instead of a blank one.
    pub fn serving(mut self, page: Arc<FixturePage>) -> Self {
        self.page = Some(page);
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Most launches ever running at the same moment.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl Launcher for FixtureLauncher {
    type Session = FixtureSession;

    fn launch(&self, _id: &str, _settings: &LaunchSettings) -> Result<FixtureSession> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AgentError::ResourceUnavailable("chrome exited with status 1".into()));
        }
        let serial = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FixtureSession {
            serial,
            page: self
                .page
                .clone()
                .unwrap_or_else(|| Arc::new(FixturePage::new(Vec::new()))),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub goal: String,
    pub memory: String,
    pub reflection: Option<String>,
    pub notes: Vec<String>,
    pub observation: String,
}

/// Replays canned replies; repeats `fallback` once the script runs out.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<String>>,
    fallback: String,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedOracle {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            fallback: "I am not sure what to do.".to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn then_forever(mut self, reply: &str) -> Self {
        self.fallback = reply.to_string();
        self
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl PlanningOracle for ScriptedOracle {
    async fn ask(&self, request: &OracleRequest<'_>) -> anyhow::Result<String> {
        self.seen.lock().push(SeenRequest {
            goal: request.goal.to_string(),
            memory: request.memory.to_string(),
            reflection: request.reflection.map(str::to_string),
            notes: request.notes.to_vec(),
            observation: request.observation.render(),
        });
        let next = self.replies.lock().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}
