use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{AgentError, Result};
use crate::page::Page;

/// Per-call launch configuration. Headed for interactive runs, headless for
/// pure extraction helpers.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub window: (u32, u32),
    /// How long Chrome may sit without CDP traffic before the driver drops it.
    pub idle_timeout: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            headless: false,
            chrome_path: None,
            window: (1280, 800),
            idle_timeout: Duration::from_secs(60 * 60 * 24),
        }
    }
}

impl LaunchSettings {
    pub fn headless() -> Self {
        Self {
            headless: true,
            ..Self::default()
        }
    }
}

/// A live (engine, context, page) triple.
pub trait BrowserSession: Send + Sync {
    fn page(&self) -> Arc<dyn Page>;
    /// False once the engine has exited or the driver lost its connection.
    fn is_alive(&self) -> bool;
    /// Release page, context and engine. Called once, by the registry.
    fn close(&self);
}

/// Starts browser sessions. Called from a blocking worker, never from an
/// async reactor thread.
pub trait Launcher: Send + Sync {
    type Session: BrowserSession;

    fn launch(&self, id: &str, settings: &LaunchSettings) -> Result<Self::Session>;
}

type Slot<S> = Arc<Mutex<Option<Arc<S>>>>;

/// Process-wide table of browser sessions keyed by caller-chosen ids.
///
/// Creation is single-flight per id: the first caller launches while later
/// callers for the same id wait on that id's slot and reuse the result.
/// Different ids never wait on each other's launch. Lock order is always
/// slot first, then map shard.
pub struct SessionRegistry<L: Launcher> {
    launcher: L,
    slots: DashMap<String, Slot<L::Session>>,
}

fn check_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(AgentError::InvalidArgument("session id is required".into()));
    }
    Ok(id)
}

impl<L: Launcher> SessionRegistry<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            slots: DashMap::new(),
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    fn is_current(&self, id: &str, slot: &Slot<L::Session>) -> bool {
        self.slots
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    /// Return the session for `id`, launching it on first access.
    ///
    /// A failed launch leaves no entry behind, so the next call starts clean.
    /// A session whose engine died is closed and replaced.
    pub fn get_session(&self, id: &str, settings: &LaunchSettings) -> Result<Arc<L::Session>> {
        let id = check_id(id)?;
        loop {
            let slot = self.slots.entry(id.to_string()).or_default().value().clone();
            let mut guard = slot.lock();
            // A close may have retired this slot while we waited on it.
            if !self.is_current(id, &slot) {
                continue;
            }

            if let Some(session) = guard.as_ref() {
                if session.is_alive() {
                    return Ok(session.clone());
                }
                warn!(component = "registry", session = id, "browser gone, relaunching");
                session.close();
                *guard = None;
            }

            info!(
                component = "registry",
                session = id,
                headless = settings.headless,
                "launching browser"
            );
            return match self.launcher.launch(id, settings) {
                Ok(session) => {
                    let session = Arc::new(session);
                    *guard = Some(session.clone());
                    info!(component = "registry", session = id, "browser ready");
                    Ok(session)
                }
                Err(e) => {
                    self.slots.remove_if(id, |_, current| Arc::ptr_eq(current, &slot));
                    warn!(
                        component = "registry",
                        session = id,
                        error = %e,
                        "browser launch failed"
                    );
                    Err(match e {
                        AgentError::ResourceUnavailable(_) => e,
                        other => AgentError::ResourceUnavailable(other.to_string()),
                    })
                }
            };
        }
    }

    /// Shortcut for the active page of `id`.
    pub fn page(&self, id: &str, settings: &LaunchSettings) -> Result<Arc<dyn Page>> {
        Ok(self.get_session(id, settings)?.page())
    }

    /// Release everything held for `id`. Returns false when nothing was open.
    ///
    /// Waits for an in-flight launch of `id` to finish, then closes it.
    pub fn close_session(&self, id: &str) -> Result<bool> {
        let id = check_id(id)?;
        let Some(slot) = self.slots.get(id).map(|entry| entry.value().clone()) else {
            return Ok(false);
        };
        let mut guard = slot.lock();
        if !self.is_current(id, &slot) {
            return Ok(false);
        }
        let session = guard.take();
        self.slots.remove_if(id, |_, current| Arc::ptr_eq(current, &slot));
        drop(guard);

        match session {
            Some(session) => {
                session.close();
                info!(component = "registry", session = id, "browser closed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn close_all(&self) {
        let ids: Vec<String> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            let _ = self.close_session(&id);
        }
    }

    pub fn is_open(&self, id: &str) -> bool {
        let slot = self.slots.get(id.trim()).map(|entry| entry.value().clone());
        slot.is_some_and(|slot| slot.lock().is_some())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
