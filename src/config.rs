use std::path::PathBuf;

use crate::dom::ObservationMode;
use crate::registry::LaunchSettings;
use crate::types::{DEFAULT_RETRY_BUDGET, DEFAULT_STEP_BUDGET};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Settings read from the environment (after `.env` is loaded).
/// CLI flags override individual fields.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub fallback_models: Vec<String>,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub snapshot_dir: Option<PathBuf>,
    pub max_steps: usize,
    pub max_retries: usize,
    pub observation: ObservationMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            fallback_models: Vec::new(),
            headless: false,
            chrome_path: None,
            snapshot_dir: None,
            max_steps: DEFAULT_STEP_BUDGET,
            max_retries: DEFAULT_RETRY_BUDGET,
            observation: ObservationMode::Html,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Self {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            model: get("PILOT_MODEL").unwrap_or(defaults.model),
            fallback_models: get("PILOT_MODEL_FALLBACKS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            headless: get("PILOT_HEADLESS").is_some_and(|v| parse_bool(&v)),
            chrome_path: get("PILOT_CHROME_PATH").map(PathBuf::from),
            snapshot_dir: get("PILOT_SNAPSHOT_DIR").map(PathBuf::from),
            max_steps: get("PILOT_MAX_STEPS")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_steps),
            max_retries: get("PILOT_MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_retries),
            observation: get("PILOT_OBSERVATION")
                .and_then(|v| ObservationMode::parse(&v))
                .unwrap_or(defaults.observation),
        }
    }

    /// Primary model followed by fallbacks, without duplicates.
    pub fn model_candidates(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for model in std::iter::once(&self.model).chain(&self.fallback_models) {
            if !model.is_empty() && !out.contains(model) {
                out.push(model.clone());
            }
        }
        out
    }

    pub fn launch_settings(&self) -> LaunchSettings {
        LaunchSettings {
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            ..LaunchSettings::default()
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
