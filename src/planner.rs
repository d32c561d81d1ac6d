//! Turns free-form oracle replies into validated actions.
//!
//! The oracle's text is untrusted. Replies may be wrapped in markdown
//! fences, surrounded by prose, or simply not JSON. Candidates are tried
//! in order (fenced block, first balanced object, whole text) and the
//! first one that parses as a JSON object wins.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::types::{Action, DEFAULT_WAIT_MS, Decision, MAX_WAIT_MS, Plan};

/// Parse an auto-mode reply of the shape `{"actions": [...]}`.
///
/// A missing or null `actions` field is an empty plan, not an error.
pub fn parse_plan(raw: &str) -> Result<Plan> {
    let object = parse_object(raw)?;

    let actions = match object.get("actions") {
        None | Some(Value::Null) => return Ok(Plan::default()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(AgentError::parse("`actions` is not a list", raw)),
    };

    let mut plan = Plan::default();
    for item in actions {
        let fields = item
            .as_object()
            .ok_or_else(|| AgentError::parse("plan entry is not an object", raw))?;
        plan.actions.push(action_from_fields(fields, raw)?);
    }

    debug!(component = "planner", actions = plan.len(), "parsed plan");
    Ok(plan)
}

/// Parse a ReAct reply: `{"thought": "...", "action": {"name": "...", "args": {...}}}`.
pub fn parse_decision(raw: &str) -> Result<Decision> {
    let object = parse_object(raw)?;

    let thought = object
        .get("thought")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let action = match object.get("action") {
        Some(Value::Object(fields)) => action_from_fields(fields, raw)?,
        // Flat form: {"action": "click", "target": "..."}
        Some(Value::String(_)) => action_from_fields(&object, raw)?,
        _ => return Err(AgentError::parse("reply has no `action`", raw)),
    };

    Ok(Decision { thought, action })
}

fn parse_object(raw: &str) -> Result<Map<String, Value>> {
    for candidate in candidates(raw) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            return Ok(map);
        }
    }
    Err(AgentError::parse("no JSON object found", raw))
}

fn candidates(raw: &str) -> Vec<&str> {
    let mut out = Vec::with_capacity(3);
    if let Some(inner) = fenced_block(raw) {
        out.push(inner);
    }
    if let Some(span) = first_balanced_object(raw) {
        out.push(span);
    }
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
    out
}

/// Inner content of the first ```...``` block, with an optional `json` tag.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let after = after
        .strip_prefix("json")
        .or_else(|| after.strip_prefix("JSON"))
        .unwrap_or(after);
    let end = after.find("```")?;
    let inner = after[..end].trim();
    (!inner.is_empty()).then_some(inner)
}

/// First `{...}` span with balanced braces. Braces inside JSON strings
/// (including escaped quotes) do not count toward depth.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Build an action from either `{"name": .., "args": {..}}` or flat
/// `{"action": .., "target": ..}` fields.
fn action_from_fields(fields: &Map<String, Value>, raw: &str) -> Result<Action> {
    let name = ["name", "action", "type"]
        .iter()
        .find_map(|k| fields.get(*k).and_then(Value::as_str))
        .ok_or_else(|| AgentError::parse("action has no name", raw))?;

    let args = match fields.get("args") {
        Some(Value::Object(args)) => args,
        _ => fields,
    };

    let kind = name.trim().to_ascii_lowercase().replace('-', "_");
    let action = match kind.as_str() {
        "navigate" | "goto" | "open" => Action::Navigate {
            url: required(args, &["url", "target"], &kind)?,
        },
        "click" => Action::Click {
            target: required(args, &["target", "selector", "text"], &kind)?,
        },
        "type" | "fill" => Action::Type {
            target: required(args, &["target", "selector", "label"], &kind)?,
            text: text_arg(args, &["text", "value"]).unwrap_or_default(),
        },
        "press" | "press_key" | "key" => Action::PressKey {
            key: required(args, &["key", "target"], &kind)?,
        },
        "wait" => Action::Wait {
            millis: millis_arg(args).unwrap_or(DEFAULT_WAIT_MS),
        },
        "extract" => Action::Extract {
            target: required(args, &["selector", "target"], &kind)?,
            attribute: text_arg(args, &["attribute", "attr"])
                .filter(|a| !a.is_empty() && a != "text"),
        },
        "finish" | "done" => Action::Finish {
            summary: text_arg(args, &["summary", "answer", "result"]),
        },
        _ => return Err(AgentError::UnknownAction(name.to_string())),
    };
    Ok(action)
}

fn text_arg(args: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn required(args: &Map<String, Value>, keys: &[&str], kind: &str) -> Result<String> {
    match text_arg(args, keys) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(AgentError::InvalidArgument(format!(
            "{kind} requires a non-empty `{}`",
            keys[0]
        ))),
    }
}

fn millis_arg(args: &Map<String, Value>) -> Option<u64> {
    ["milliseconds", "millis", "ms", "duration_ms"]
        .iter()
        .find_map(|k| match args.get(*k)? {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .map(|ms| ms.min(MAX_WAIT_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_plan_counts_every_action() {
        let raw = "Here you go:\n```json\n{\"actions\": [\
            {\"action\": \"navigate\", \"target\": \"https://www.saucedemo.com/\"},\
            {\"action\": \"type\", \"target\": \"Username\", \"text\": \"standard_user\"},\
            {\"action\": \"click\", \"target\": \"Login\"}]}\n```\nGood luck.";
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(
            plan.actions[1],
            Action::Type {
                target: "Username".into(),
                text: "standard_user".into()
            }
        );
    }

    #[test]
    fn prose_around_bare_object() {
        let raw =
            r#"Sure! {"actions": [{"action": "click", "target": "Add to cart"}]} Let me know."#;
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn bare_object_without_fence() {
        let plan = parse_plan(r#"{"actions": []}"#).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn missing_actions_is_empty_plan() {
        let plan = parse_plan(r#"{"note": "nothing to do"}"#).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn no_json_is_parse_error() {
        let err = parse_plan("I could not find anything useful on this page.").unwrap_err();
        assert!(matches!(err, AgentError::Parse { ref raw, .. } if raw.contains("useful")));
    }

    #[test]
    fn actions_must_be_a_list() {
        let err = parse_plan(r#"{"actions": "click login"}"#).unwrap_err();
        assert!(matches!(err, AgentError::Parse { .. }));
    }

    #[test]
    fn braces_inside_strings_do_not_truncate() {
        let raw = r#"plan: {"actions":[{"action":"click","target":"a{b}"}]} trailing }"#;
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.actions[0], Action::Click { target: "a{b}".into() });

        let raw = r#"x {"actions":[{"action":"click","target":"close }"}]}"#;
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.actions[0], Action::Click { target: "close }".into() });
    }

    #[test]
    fn balanced_scan_respects_escaped_quotes() {
        let text = r#"pre {"a":"say \"}\" now","b":{"c":1}} post"#;
        assert_eq!(
            first_balanced_object(text),
            Some(r#"{"a":"say \"}\" now","b":{"c":1}}"#)
        );
        assert_eq!(first_balanced_object("{ never closed"), None);
    }

    #[test]
    fn decision_with_nested_args() {
        let raw = r#"{"thought":"t","action":{"name":"extract","args":{"selector":".text"}}}"#;
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision.thought, "t");
        assert_eq!(
            decision.action,
            Action::Extract {
                target: ".text".into(),
                attribute: None
            }
        );
    }

    #[test]
    fn decision_aliases_and_defaults() {
        let wait = parse_decision(r#"{"thought":"","action":{"name":"wait","args":{}}}"#).unwrap();
        assert_eq!(wait.action, Action::Wait { millis: DEFAULT_WAIT_MS });

        let press =
            parse_decision(r#"{"action":{"name":"press","args":{"key":"Enter"}}}"#).unwrap();
        assert_eq!(press.action, Action::PressKey { key: "Enter".into() });

        let attr = parse_decision(
            r#"{"action":{"name":"extract","args":{"selector":"a","attribute":"text"}}}"#,
        )
        .unwrap();
        assert_eq!(
            attr.action,
            Action::Extract {
                target: "a".into(),
                attribute: None
            }
        );

        let finish =
            parse_decision(r#"{"thought":"done","action":{"name":"finish","args":{}}}"#).unwrap();
        assert!(finish.action.is_finish());
    }

    #[test]
    fn wait_is_capped() {
        let huge = r#"{"action":{"name":"wait","args":{"milliseconds":86400000000}}}"#;
        assert_eq!(parse_decision(huge).unwrap().action, Action::Wait { millis: MAX_WAIT_MS });

        let text = r#"{"action":"wait","ms":"1e12"}"#;
        assert_eq!(parse_decision(text).unwrap().action, Action::Wait { millis: DEFAULT_WAIT_MS });
    }

    #[test]
    fn unknown_action_is_flagged() {
        let raw = r#"{"action":{"name":"eval","args":{"code":"alert(1)"}}}"#;
        let err = parse_decision(raw).unwrap_err();
        assert_eq!(err, AgentError::UnknownAction("eval".into()));
    }

    #[test]
    fn empty_selector_is_invalid() {
        let raw = r#"{"action":{"name":"click","args":{"selector":"  "}}}"#;
        let err = parse_decision(raw).unwrap_err();
        assert!(matches!(err, AgentError::InvalidArgument(_)));
    }
}
