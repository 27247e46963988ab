//! Lenient parsing of search tool-call arguments.
//!
//! Models are sloppy about JSON: query lists arrive as real arrays, as JSON text, as JSON text
//! wrapped in another JSON string, or as Python-style `['a', 'b']`. All of those are accepted.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchRequest {
    pub prompt: String,
    #[serde(default)]
    pub reason: String,
    pub queries: Vec<String>,
    /// Number of result pages to walk per query, starting at 1.
    pub pages: u32,
}

impl ResearchRequest {
    pub fn new(prompt: &str, queries: Vec<String>) -> Self {
        Self {
            prompt: prompt.to_string(),
            reason: String::new(),
            queries,
            pages: 1,
        }
    }

    /// Build a request from the `arguments` of a search tool call (`queries`, `reason`, `page`).
    pub fn from_tool_arguments(prompt: &str, args: &Map<String, Value>) -> Result<Self> {
        if prompt.trim().is_empty() {
            return Err(Error::InvalidArgs(
                "prompt is required and must be a string".to_string(),
            ));
        }
        let queries = parse_queries(args.get("queries").unwrap_or(&Value::Null))?;
        let pages = parse_page(args.get("page"))?;
        let reason = args
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            prompt: prompt.to_string(),
            reason,
            queries,
            pages,
        })
    }
}

pub fn parse_queries(raw: &Value) -> Result<Vec<String>> {
    match raw {
        Value::Array(items) => Ok(items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()),
        Value::String(s) => parse_query_text(s),
        other => Err(Error::InvalidArgs(format!(
            "unexpected queries type: {}",
            type_name(other)
        ))),
    }
}

fn parse_query_text(s: &str) -> Result<Vec<String>> {
    let mut trimmed = s.trim().to_string();
    if trimmed.starts_with("['") && trimmed.ends_with("']") {
        trimmed = trimmed.replace('\'', "\"");
    }
    if let Ok(list) = serde_json::from_str::<Vec<String>>(&trimmed) {
        return Ok(list);
    }
    if let Ok(inner) = serde_json::from_str::<String>(&trimmed) {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(&inner) {
            return Ok(list);
        }
    }
    Err(Error::InvalidArgs(
        "invalid query format or unsupported string structure".to_string(),
    ))
}

/// Page count from a number or numeric string; absent, null or empty means 1.
pub fn parse_page(raw: Option<&Value>) -> Result<u32> {
    let page = match raw {
        None | Some(Value::Null) => return Ok(1),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| Error::InvalidArgs(format!("invalid page parameter: {n}")))?,
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(1),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::InvalidArgs(format!("invalid page parameter: {s}")))?,
        Some(other) => {
            return Err(Error::InvalidArgs(format!(
                "invalid page parameter type: {}",
                type_name(other)
            )))
        }
    };
    Ok(page.max(1))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn queries_accept_every_shape_models_produce() {
        let want = vec!["rust borrow checker".to_string(), "lifetimes".to_string()];
        assert_eq!(
            parse_queries(&json!(["rust borrow checker", "lifetimes"])).unwrap(),
            want
        );
        assert_eq!(
            parse_queries(&json!(r#"["rust borrow checker","lifetimes"]"#)).unwrap(),
            want
        );
        assert_eq!(
            parse_queries(&json!(r#""[\"rust borrow checker\",\"lifetimes\"]""#)).unwrap(),
            want
        );
        assert_eq!(
            parse_queries(&json!("['rust borrow checker', 'lifetimes']")).unwrap(),
            want
        );
        assert_eq!(parse_queries(&json!([1, "x"])).unwrap(), vec!["1", "x"]);
    }

    #[test]
    fn queries_reject_garbage() {
        assert!(parse_queries(&json!("just a sentence")).is_err());
        assert!(parse_queries(&json!({"q": 1})).is_err());
        assert!(parse_queries(&Value::Null).is_err());
    }

    #[test]
    fn page_defaults_to_one() {
        assert_eq!(parse_page(None).unwrap(), 1);
        assert_eq!(parse_page(Some(&json!(""))).unwrap(), 1);
        assert_eq!(parse_page(Some(&json!(null))).unwrap(), 1);
        assert_eq!(parse_page(Some(&json!("3"))).unwrap(), 3);
        assert_eq!(parse_page(Some(&json!(2))).unwrap(), 2);
        assert_eq!(parse_page(Some(&json!(0))).unwrap(), 1);
        assert!(parse_page(Some(&json!("two"))).is_err());
        assert!(parse_page(Some(&json!(-1))).is_err());
    }

    #[test]
    fn request_from_tool_arguments() {
        let args = json!({
            "queries": "['tokio mpsc', 'joinset']",
            "reason": "compare channel options",
            "page": "2",
        });
        let req = ResearchRequest::from_tool_arguments("how do I fan out?", args.as_object().unwrap())
            .unwrap();
        assert_eq!(req.queries, vec!["tokio mpsc", "joinset"]);
        assert_eq!(req.reason, "compare channel options");
        assert_eq!(req.pages, 2);

        let err = ResearchRequest::from_tool_arguments(" ", args.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgs(_)));
    }
}
