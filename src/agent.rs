//! The observe → request → validate → execute → record loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::brain::{OracleRequest, PlanMode, PlanningOracle};
use crate::consent::{ChallengeDetector, ConsentDismisser, KeywordDetector, SelectorConsent};
use crate::dom::{ObservationMode, observe};
use crate::error::{AgentError, Result};
use crate::executor::{Executor, ExecutorSettings, Outcome};
use crate::overlay::Overlay;
use crate::page::{LoadWait, Page};
use crate::planner::{parse_decision, parse_plan};
use crate::registry::{LaunchSettings, Launcher, SessionRegistry};
use crate::types::{
    Action, DEFAULT_RETRY_BUDGET, DEFAULT_STEP_BUDGET, MEMORY_WINDOW, Memory,
    OBSERVATION_MAX_CHARS, Observation, Plan,
};

/// Step and per-step retry limits.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    pub steps: usize,
    pub retries: usize,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEP_BUDGET,
            retries: DEFAULT_RETRY_BUDGET,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Finished,
    Exhausted,
}

/// Result of `run_agent`: how many top-level steps ran and how it ended.
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub steps: usize,
    pub status: RunStatus,
    pub summary: Option<String>,
    pub memory: Memory,
}

impl AgentReport {
    /// Treat an exhausted run as an error.
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            RunStatus::Finished => Ok(self),
            RunStatus::Exhausted => Err(AgentError::Exhausted { steps: self.steps }),
        }
    }
}

/// Result of `run_auto_plan`.
#[derive(Debug, Clone)]
pub struct AutoPlanReport {
    /// Actions that completed successfully.
    pub steps: usize,
    pub plan: Plan,
    pub extracted: Vec<String>,
    pub failure: Option<String>,
}

/// Progress published while a run is in flight.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    Thinking { step: usize, attempt: usize },
    /// The operator paused the run; it resumes before this step.
    Paused { step: usize },
    Step { number: usize, description: String },
    StepError { message: String },
    Finished { summary: Option<String> },
    Exhausted { steps: usize },
    /// Run aborted by a launch or oracle failure; published by the caller.
    Failed { message: String },
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::Paused { .. } => "paused",
            AgentEvent::Step { .. } => "step",
            AgentEvent::StepError { .. } => "step_error",
            AgentEvent::Finished { .. } => "finished",
            AgentEvent::Exhausted { .. } => "exhausted",
            AgentEvent::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug)]
struct OperatorInput {
    notes: Mutex<Vec<String>>,
    paused: watch::Sender<bool>,
}

/// Operator input for a running agent: notes handed to the oracle with the
/// next request, and a pause switch checked before every step.
#[derive(Debug, Clone)]
pub struct Interjections(Arc<OperatorInput>);

impl Default for Interjections {
    fn default() -> Self {
        Self(Arc::new(OperatorInput {
            notes: Mutex::new(Vec::new()),
            paused: watch::Sender::new(false),
        }))
    }
}

impl Interjections {
    pub fn push(&self, note: impl Into<String>) {
        self.0.notes.lock().push(note.into());
    }

    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.notes.lock())
    }

    pub fn pause(&self) {
        self.0.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.0.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.0.paused.borrow()
    }

    /// Returns once the run is not paused.
    pub async fn wait_until_resumed(&self) {
        let mut paused = self.0.paused.subscribe();
        // The sender lives in `self`, so this only ends by resuming.
        let _ = paused.wait_for(|paused| !*paused).await;
    }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub launch: LaunchSettings,
    pub executor: ExecutorSettings,
    pub observation_mode: ObservationMode,
    pub observation_chars: usize,
    pub memory_window: usize,
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            launch: LaunchSettings::default(),
            executor: ExecutorSettings::default(),
            observation_mode: ObservationMode::Html,
            observation_chars: OBSERVATION_MAX_CHARS,
            memory_window: MEMORY_WINDOW,
            snapshot_dir: None,
        }
    }
}

/// Runs goals against registry-managed browser sessions.
pub struct Agent<L: Launcher> {
    registry: Arc<SessionRegistry<L>>,
    oracle: Arc<dyn PlanningOracle>,
    settings: AgentSettings,
    consent: Arc<dyn ConsentDismisser>,
    detector: Arc<dyn ChallengeDetector>,
    overlay: Option<Arc<dyn Overlay>>,
    events: Option<broadcast::Sender<AgentEvent>>,
    notes: Interjections,
}

/// Run blocking page work off the async reactor.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AgentError::Browser(format!("browser worker panicked: {e}")))?
}

impl<L> Agent<L>
where
    L: Launcher + 'static,
    L::Session: 'static,
{
    pub fn new(
        registry: Arc<SessionRegistry<L>>,
        oracle: Arc<dyn PlanningOracle>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            registry,
            oracle,
            settings,
            consent: Arc::new(SelectorConsent::default()),
            detector: Arc::new(KeywordDetector),
            overlay: None,
            events: None,
            notes: Interjections::default(),
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_overlay(mut self, overlay: Arc<dyn Overlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn with_consent(mut self, consent: Arc<dyn ConsentDismisser>) -> Self {
        self.consent = consent;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn ChallengeDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn notes(&self) -> Interjections {
        self.notes.clone()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<L>> {
        &self.registry
    }

    /// Open (or reuse) the session and drive the ReAct loop toward `goal`.
    ///
    /// Only session launch failures and oracle transport failures are
    /// returned as errors; everything else ends in a report.
    pub async fn run_agent(
        &self,
        goal: &str,
        start_url: &str,
        session_id: &str,
        budget: Budget,
    ) -> Result<AgentReport> {
        let page = self.session_page(session_id).await?;
        self.open_start_page(&page, start_url, self.settings.executor.load_wait)
            .await?;
        self.drive(goal, page, budget).await
    }

    /// Ask the oracle for a whole plan up front, then execute it in order.
    pub async fn run_auto_plan(
        &self,
        instruction: &str,
        start_url: &str,
        session_id: &str,
    ) -> Result<AutoPlanReport> {
        let page = self.session_page(session_id).await?;
        self.open_start_page(&page, start_url, LoadWait::NetworkIdle).await?;

        let observation = self.observe(&page).await?;
        let notes = self.notes.drain();
        let request = OracleRequest {
            mode: PlanMode::Plan,
            goal: instruction,
            memory: "",
            observation: &observation,
            reflection: None,
            notes: &notes,
        };
        let raw = self.ask(&request).await?;
        let plan = parse_plan(&raw)?;
        info!(component = "agent", actions = plan.len(), "plan received");

        let mut executor = self.executor(page.clone());
        let mut report = AutoPlanReport {
            steps: 0,
            plan: plan.clone(),
            extracted: Vec::new(),
            failure: None,
        };

        for (index, action) in plan.actions.into_iter().enumerate() {
            if action.is_finish() {
                break;
            }
            let number = index + 1;
            self.emit(AgentEvent::Step {
                number,
                description: action.to_string(),
            });
            let (back, result) = self.execute(executor, action).await?;
            executor = back;
            match result {
                Ok(outcome) => {
                    report.steps += 1;
                    if let Outcome::Extracted(value) = &outcome {
                        report.extracted.push(value.clone());
                    }
                    self.persist(&page, number, &outcome).await;
                }
                Err(e) => {
                    warn!(component = "agent", step = number, error = %e, "plan step failed");
                    self.emit(AgentEvent::StepError { message: e.to_string() });
                    report.failure = Some(format!("step {number}: {e}"));
                    break;
                }
            }
        }
        Ok(report)
    }

    /// The loop itself, against an already-open page.
    pub async fn drive(
        &self,
        goal: &str,
        page: Arc<dyn Page>,
        budget: Budget,
    ) -> Result<AgentReport> {
        let mut executor = self.executor(page.clone());
        let mut memory = Memory::new();
        let mut observation = self.observe(&page).await?;

        for step in 1..=budget.steps {
            if self.notes.is_paused() {
                info!(component = "agent", step, "paused by operator");
                self.emit(AgentEvent::Paused { step });
                self.notes.wait_until_resumed().await;
                observation = self.observe(&page).await?;
            }
            info!(component = "agent", step, "step started");
            let mut reflection: Option<String> = None;
            let mut notes: Vec<String> = Vec::new();
            let mut recorded = false;

            for attempt in 1..=budget.retries {
                self.emit(AgentEvent::Thinking { step, attempt });
                notes.extend(self.notes.drain());
                let context = memory.context(self.settings.memory_window);
                let request = OracleRequest {
                    mode: PlanMode::Step,
                    goal,
                    memory: &context,
                    observation: &observation,
                    reflection: reflection.as_deref(),
                    notes: &notes,
                };
                let raw = self.ask(&request).await?;

                let decision = match parse_decision(&raw) {
                    Ok(decision) => decision,
                    Err(AgentError::Parse { reason, .. }) => {
                        warn!(
                            component = "agent",
                            step,
                            attempt,
                            %reason,
                            "invalid oracle output, retrying"
                        );
                        reflection = Some("Invalid JSON output.".to_string());
                        continue;
                    }
                    Err(e) => {
                        warn!(
                            component = "agent",
                            step,
                            attempt,
                            error = %e,
                            "action rejected, retrying"
                        );
                        reflection = Some(format!("Action failed: {e}"));
                        continue;
                    }
                };

                info!(
                    component = "agent",
                    step,
                    thought = %decision.thought,
                    action = %decision.action,
                    "decided"
                );
                self.emit(AgentEvent::Step {
                    number: step,
                    description: decision.action.to_string(),
                });

                let (back, result) = self.execute(executor, decision.action.clone()).await?;
                executor = back;

                match result {
                    Ok(Outcome::Finished) => {
                        let summary = match decision.action {
                            Action::Finish { summary } => summary,
                            _ => None,
                        };
                        info!(component = "agent", step, "goal completed");
                        self.emit(AgentEvent::Finished {
                            summary: summary.clone(),
                        });
                        return Ok(AgentReport {
                            steps: step,
                            status: RunStatus::Finished,
                            summary,
                            memory,
                        });
                    }
                    Ok(outcome) => {
                        let result_text = outcome.observation();
                        info!(component = "agent", step, result = %result_text, "step succeeded");
                        self.persist(&page, step, &outcome).await;
                        memory.record(decision.thought, decision.action, result_text);
                        observation = self.observe(&page).await?;
                        recorded = true;
                        break;
                    }
                    Err(e) => {
                        warn!(
                            component = "agent",
                            step,
                            attempt,
                            error = %e,
                            "action failed, retrying with reflection"
                        );
                        self.emit(AgentEvent::StepError { message: e.to_string() });
                        reflection = Some(format!("Action failed: {e}"));
                    }
                }
            }

            if !recorded {
                warn!(component = "agent", step, retries = budget.retries, "step abandoned");
            }
        }

        info!(component = "agent", steps = budget.steps, "step budget exhausted");
        self.emit(AgentEvent::Exhausted { steps: budget.steps });
        Ok(AgentReport {
            steps: budget.steps,
            status: RunStatus::Exhausted,
            summary: None,
            memory,
        })
    }

    async fn session_page(&self, session_id: &str) -> Result<Arc<dyn Page>> {
        let registry = self.registry.clone();
        let id = session_id.to_string();
        let launch = self.settings.launch.clone();
        blocking(move || registry.page(&id, &launch)).await
    }

    async fn open_start_page(
        &self,
        page: &Arc<dyn Page>,
        url: &str,
        wait: LoadWait,
    ) -> Result<()> {
        if url.trim().is_empty() {
            return Ok(());
        }
        let page = page.clone();
        let url = url.to_string();
        let consent = self.consent.clone();
        let settle = self.settings.executor.settle;
        blocking(move || {
            page.goto(&url, wait)?;
            page.pause(settle);
            consent.try_dismiss(page.as_ref());
            Ok(())
        })
        .await
    }

    fn executor(&self, page: Arc<dyn Page>) -> Executor {
        let executor =
            Executor::new(page, self.settings.executor.clone()).with_consent(self.consent.clone());
        match &self.overlay {
            Some(overlay) => executor.with_overlay(overlay.clone()),
            None => executor,
        }
    }

    async fn execute(
        &self,
        mut executor: Executor,
        action: Action,
    ) -> Result<(Executor, Result<Outcome>)> {
        blocking(move || {
            let result = executor.execute(&action);
            Ok((executor, result))
        })
        .await
    }

    async fn observe(&self, page: &Arc<dyn Page>) -> Result<Observation> {
        let page = page.clone();
        let detector = self.detector.clone();
        let mode = self.settings.observation_mode;
        let max = self.settings.observation_chars;
        blocking(move || Ok(observe(page.as_ref(), mode, max, detector.as_ref()))).await
    }

    async fn ask(&self, request: &OracleRequest<'_>) -> Result<String> {
        let raw = self
            .oracle
            .ask(request)
            .await
            .map_err(|e| AgentError::Oracle(format!("{e:#}")))?;
        debug!(component = "agent", %raw, "oracle raw reply");
        Ok(raw)
    }

    /// Write-only side outputs: a screenshot per step, extracted text per extract.
    async fn persist(&self, page: &Arc<dyn Page>, index: usize, outcome: &Outcome) {
        let Some(dir) = self.settings.snapshot_dir.clone() else {
            return;
        };
        let page = page.clone();
        let extracted = match outcome {
            Outcome::Extracted(value) => Some(value.clone()),
            _ => None,
        };
        let written = blocking(move || {
            std::fs::create_dir_all(&dir).map_err(AgentError::browser)?;
            let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
            if let Some(value) = extracted {
                let path = artifact_path(&dir, "extract", index, &stamp.to_string(), "txt");
                std::fs::write(&path, value).map_err(AgentError::browser)?;
            }
            let path = artifact_path(&dir, "step", index, &stamp.to_string(), "png");
            page.screenshot(&path)
        })
        .await;
        if let Err(e) = written {
            warn!(component = "agent", step = index, error = %e, "snapshot not saved");
        }
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

fn artifact_path(dir: &Path, kind: &str, index: usize, stamp: &str, ext: &str) -> PathBuf {
    dir.join(format!("{kind}_{index}_{stamp}.{ext}"))
}
