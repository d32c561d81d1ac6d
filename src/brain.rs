use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::Config;
use crate::types::Observation;

const STEP_PROMPT: &str = r#"You are a browser automation agent using ReAct. You control a real Chrome browser by issuing ONE action per reply.

Available actions:
- {"name":"navigate","args":{"url":"https://..."}}
- {"name":"click","args":{"selector":"button text, visible text, or CSS selector"}}
- {"name":"type","args":{"selector":"field label or CSS selector","text":"..."}}
- {"name":"press","args":{"key":"Enter"}}
- {"name":"wait","args":{"milliseconds":2000}}
- {"name":"extract","args":{"selector":"CSS selector","attribute":"optional attribute name"}}
- {"name":"finish","args":{"summary":"what was achieved"}}

Rules:
1. STRICT JSON output only: {"thought":"...","action":{"name":"...","args":{...}}}
2. One action per step. Use simple selectors.
3. If the previous action failed, read the failure and improve your strategy.
4. When the goal is accomplished, call finish."#;

const PLAN_PROMPT: &str = r#"You are a browser automation planner.
Return ONLY valid JSON.
Format:
{
  "actions": [
    {"action": "click", "target": "..."},
    {"action": "type", "target": "...", "text": "..."},
    {"action": "navigate", "target": "..."},
    {"action": "extract", "target": "CSS selector"}
  ]
}"#;

/// Whether the oracle is asked for one ReAct turn or a whole plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    Step,
    Plan,
}

/// Everything the oracle gets to see for one call.
#[derive(Debug, Clone)]
pub struct OracleRequest<'a> {
    pub mode: PlanMode,
    pub goal: &'a str,
    pub memory: &'a str,
    pub observation: &'a Observation,
    pub reflection: Option<&'a str>,
    pub notes: &'a [String],
}

impl OracleRequest<'_> {
    pub fn system_prompt(&self) -> &'static str {
        match self.mode {
            PlanMode::Step => STEP_PROMPT,
            PlanMode::Plan => PLAN_PROMPT,
        }
    }

    pub fn user_prompt(&self) -> String {
        let heading = match self.mode {
            PlanMode::Step => "GOAL",
            PlanMode::Plan => "Instruction",
        };
        let mut prompt = format!("{heading}:\n{}\n", self.goal);
        if self.mode == PlanMode::Step {
            prompt.push_str(&format!("\nMEMORY:\n{}\n", self.memory));
        }
        prompt.push('\n');
        prompt.push_str(&self.observation.render());
        prompt.push('\n');
        for note in self.notes {
            prompt.push_str(&format!("\nOperator note: {note}\n"));
        }
        if let Some(reflection) = self.reflection {
            prompt.push_str(&format!("\nPrevious failure:\n{reflection}\nImprove strategy.\n"));
        }
        prompt
    }
}

/// Text generator that proposes the next action(s). Output is untrusted.
#[async_trait]
pub trait PlanningOracle: Send + Sync {
    async fn ask(&self, request: &OracleRequest<'_>) -> Result<String>;
}

enum CompletionError {
    ModelNotFound(String),
    Other(anyhow::Error),
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        CompletionError::Other(e.into())
    }
}

/// Chat-completions client. Falls through the configured model list when
/// the API reports a model as unknown.
pub struct OpenAiOracle {
    client: Client,
    api_key: String,
    base_url: String,
    models: Vec<String>,
}

impl OpenAiOracle {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY not set in environment"))?;
        let models = config.model_candidates();
        if models.is_empty() {
            bail!("no model configured; set PILOT_MODEL");
        }
        Ok(Self {
            client: Client::new(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            models,
        })
    }

    async fn complete(
        &self,
        model: &str,
        system: &str,
        user: &str,
    ) -> std::result::Result<String, CompletionError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "temperature": 0,
                "max_tokens": 800,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error")
                .to_string();
            let code = body["error"]["code"].as_str().unwrap_or_default();
            if is_model_not_found(status, code, &message) {
                return Err(CompletionError::ModelNotFound(message));
            }
            return Err(CompletionError::Other(anyhow!("OpenAI API error ({status}): {message}")));
        }

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CompletionError::Other(anyhow!("No content in LLM response: {body}")))
    }
}

fn is_model_not_found(status: StatusCode, code: &str, message: &str) -> bool {
    let message = message.to_lowercase();
    code == "model_not_found"
        || (status == StatusCode::NOT_FOUND && message.contains("model"))
        || (message.contains("model") && message.contains("does not exist"))
}

#[async_trait]
impl PlanningOracle for OpenAiOracle {
    async fn ask(&self, request: &OracleRequest<'_>) -> Result<String> {
        let system = request.system_prompt();
        let user = request.user_prompt();

        for model in &self.models {
            match self.complete(model, system, &user).await {
                Ok(text) => {
                    debug!(component = "oracle", %model, chars = text.len(), "oracle replied");
                    return Ok(text);
                }
                Err(CompletionError::ModelNotFound(message)) => {
                    warn!(component = "oracle", %model, %message, "model unavailable, trying next");
                }
                Err(CompletionError::Other(e)) => return Err(e),
            }
        }
        bail!("none of the configured models is available: {}", self.models.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation() -> Observation {
        Observation {
            url: "https://quotes.toscrape.com/".into(),
            title: "Quotes to Scrape".into(),
            sample: "<span class=\"text\">“Q”</span>".into(),
            blocked: false,
        }
    }

    #[test]
    fn step_prompt_carries_memory_notes_and_reflection() {
        let obs = observation();
        let notes = vec!["use the first quote only".to_string()];
        let request = OracleRequest {
            mode: PlanMode::Step,
            goal: "Extract the first quote",
            memory: "Thought: t\n",
            observation: &obs,
            reflection: Some("Action failed: element not found: .quote"),
            notes: &notes,
        };
        let prompt = request.user_prompt();
        assert!(prompt.starts_with("GOAL:\nExtract the first quote\n"));
        assert!(prompt.contains("MEMORY:\nThought: t"));
        assert!(prompt.contains("Title: Quotes to Scrape"));
        assert!(prompt.contains("Operator note: use the first quote only"));
        assert!(prompt.contains("Previous failure:\nAction failed: element not found: .quote"));
        assert_eq!(request.system_prompt(), STEP_PROMPT);
    }

    #[test]
    fn plan_prompt_has_no_memory() {
        let obs = observation();
        let request = OracleRequest {
            mode: PlanMode::Plan,
            goal: "Log in",
            memory: "",
            observation: &obs,
            reflection: None,
            notes: &[],
        };
        let prompt = request.user_prompt();
        assert!(prompt.starts_with("Instruction:\nLog in\n"));
        assert!(!prompt.contains("MEMORY"));
        assert!(!prompt.contains("Previous failure"));
    }

    #[test]
    fn model_not_found_detection() {
        assert!(is_model_not_found(StatusCode::NOT_FOUND, "", "The model `x` does not exist"));
        assert!(is_model_not_found(StatusCode::BAD_REQUEST, "model_not_found", ""));
        assert!(!is_model_not_found(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Incorrect API key"
        ));
    }

    #[test]
    fn oracle_requires_api_key() {
        let config = Config::default();
        assert!(OpenAiOracle::new(&config).is_err());
    }
}
