use serde::{Deserialize, Serialize};
use std::fmt;

/// A single atomic step the oracle asks the agent to perform.
///
/// The vocabulary is closed: anything the oracle names outside of these
/// variants is rejected by the planner before it can reach a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Action {
    Navigate {
        url: String,
    },
    Click {
        target: String,
    },
    Type {
        target: String,
        text: String,
    },
    PressKey {
        key: String,
    },
    Wait {
        millis: u64,
    },
    Extract {
        target: String,
        attribute: Option<String>,
    },
    Finish {
        summary: Option<String>,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "navigate",
            Action::Click { .. } => "click",
            Action::Type { .. } => "type",
            Action::PressKey { .. } => "press_key",
            Action::Wait { .. } => "wait",
            Action::Extract { .. } => "extract",
            Action::Finish { .. } => "finish",
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Action::Finish { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Navigate { url } => write!(f, "navigate -> {url}"),
            Action::Click { target } => write!(f, "click -> {target}"),
            Action::Type { target, text } => write!(f, "type -> {target} ({} chars)", text.len()),
            Action::PressKey { key } => write!(f, "press_key -> {key}"),
            Action::Wait { millis } => write!(f, "wait -> {millis} ms"),
            Action::Extract {
                target,
                attribute: Some(attr),
            } => write!(f, "extract -> {target} @{attr}"),
            Action::Extract { target, .. } => write!(f, "extract -> {target}"),
            Action::Finish { .. } => write!(f, "finish"),
        }
    }
}

/// Ordered actions produced from one oracle reply in auto mode.
///
/// An empty plan is a valid no-op; a reply that cannot be parsed never
/// becomes a `Plan` at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// One ReAct turn as returned by the oracle: a thought plus a single action.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub thought: String,
    pub action: Action,
}

/// What the agent observes of the page before asking the oracle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Observation {
    pub url: String,
    pub title: String,
    pub sample: String,
    pub blocked: bool,
}

impl Observation {
    /// Text block handed to the oracle.
    pub fn render(&self) -> String {
        let mut out = format!("Page URL: {}\nTitle: {}\n", self.url, self.title);
        if self.blocked {
            out.push_str(
                "NOTE: this page looks like a bot-verification wall; \
                 a human may need to clear it.\n",
            );
        }
        out.push_str("\nCURRENT PAGE (truncated):\n");
        out.push_str(&self.sample);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub thought: String,
    pub action: Action,
    pub observation: String,
}

/// Append-only trace of successful steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Memory {
    entries: Vec<MemoryEntry>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        thought: impl Into<String>,
        action: Action,
        observation: impl Into<String>,
    ) {
        self.entries.push(MemoryEntry {
            thought: thought.into(),
            action,
            observation: observation.into(),
        });
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the last `last_n` entries as conversational context.
    /// Older entries stay stored but are not sent.
    pub fn context(&self, last_n: usize) -> String {
        let start = self.entries.len().saturating_sub(last_n);
        let mut out = String::new();
        for entry in &self.entries[start..] {
            let action = serde_json::to_string(&entry.action)
                .unwrap_or_else(|_| entry.action.to_string());
            out.push_str(&format!(
                "\nThought: {}\nAction: {}\nObservation: {}\n",
                entry.thought, action, entry.observation
            ));
        }
        out
    }
}

pub const DEFAULT_STEP_BUDGET: usize = 20;
pub const DEFAULT_RETRY_BUDGET: usize = 3;
pub const MEMORY_WINDOW: usize = 5;
pub const OBSERVATION_MAX_CHARS: usize = 7000;
pub const CLICK_TIMEOUT_MS: u64 = 4000;
pub const DEFAULT_WAIT_MS: u64 = 2000;
/// Upper bound for any single `wait`, whatever the oracle asks for.
pub const MAX_WAIT_MS: u64 = 30_000;
/// Extracted values longer than this are cut before they reach Memory.
pub const EXTRACT_MAX_CHARS: usize = 2000;
pub const NAVIGATE_SETTLE_MS: u64 = 500;
