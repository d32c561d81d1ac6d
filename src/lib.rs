//! LLM-driven browser automation: a planning oracle proposes actions, a
//! Chrome session executes them, and a bounded ReAct loop ties the two
//! together with retry-with-reflection.

pub mod agent;
pub mod brain;
pub mod config;
pub mod consent;
pub mod dom;
pub mod error;
pub mod executor;
pub mod hands;
pub mod overlay;
pub mod page;
pub mod planner;
pub mod registry;
pub mod types;

#[cfg(test)]
mod testing;

pub use agent::{
    Agent, AgentEvent, AgentReport, AgentSettings, AutoPlanReport, Budget, Interjections, RunStatus,
};
pub use brain::{OpenAiOracle, OracleRequest, PlanMode, PlanningOracle};
pub use config::Config;
pub use error::{AgentError, Result};
pub use executor::{Executor, ExecutorSettings, Outcome};
pub use hands::ChromeLauncher;
pub use page::{Locator, Page};
pub use planner::{parse_decision, parse_plan};
pub use registry::{LaunchSettings, SessionRegistry};
pub use types::{Action, Decision, Memory, Observation, Plan};
