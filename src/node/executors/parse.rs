//! `parse` node kind (spec.md §6 "`parse` (json|csv|xml|yaml)"). Decodes
//! this node's single string input against one structured-text format into
//! a [`Value`], each backed by the crate already pulled in for it
//! (`serde_json`, `csv`, `quick-xml`, `serde_yaml`).

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::error::EngineError;
use crate::payload::NodeSpec;
use crate::value::Value;

use super::super::{str_field, ExecutionContext, Executor, NodeOutcome};

fn fail(message: impl Into<String>) -> NodeOutcome {
    NodeOutcome::Failed(EngineError::Executor { kind: "parse".to_string(), message: message.into() })
}

fn parse_csv(text: &str) -> Result<Value, String> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| e.to_string())?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        let mut row = FxHashMap::default();
        for (header, field) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), Value::String(field.to_string()));
        }
        rows.push(Value::Map(row));
    }
    Ok(Value::List(rows))
}

/// `parse` — `data.format` (`json`|`csv`|`xml`|`yaml`, required). CSV parses
/// to a list of row maps keyed by header; XML and JSON/YAML parse to nested
/// maps/lists via their respective `serde`-compatible deserializers.
pub struct ParseNode;

#[async_trait]
impl Executor for ParseNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        match str_field(&node.data, "format") {
            Some("json") | Some("csv") | Some("xml") | Some("yaml") => Ok(()),
            Some(other) => Err(EngineError::Validation(format!("parse node: unknown format '{other}'"))),
            None => Err(super::super::missing_field("parse", "format")),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let format = str_field(&node.data, "format").unwrap_or("json");
        let input = ctx.single_input();
        let text = match input.as_str() {
            Some(s) => s,
            None => return fail("input is not a string"),
        };

        let parsed = match format {
            "json" => serde_json::from_str::<serde_json::Value>(text).map(|j| Value::from_json(&j)).map_err(|e| e.to_string()),
            "yaml" => serde_yaml::from_str::<serde_json::Value>(text).map(|j| Value::from_json(&j)).map_err(|e| e.to_string()),
            "xml" => quick_xml::de::from_str::<serde_json::Value>(text).map(|j| Value::from_json(&j)).map_err(|e| e.to_string()),
            "csv" => parse_csv(text),
            other => Err(format!("unsupported format '{other}'")),
        };

        match parsed {
            Ok(value) => NodeOutcome::Completed(value),
            Err(message) => fail(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event_bus::EventBus;
    use crate::node::test_support::{spec, test_ctx, test_http_clients, test_registry, test_state};

    async fn parse(format: &str, text: &str) -> NodeOutcome {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("p", "parse", json!({"format": format}));
        let ctx = test_ctx("p", vec![Value::String(text.to_string())], &state, &http, &events, &registry);
        ParseNode.execute(&ctx, &node).await
    }

    #[tokio::test]
    async fn parses_json_object() {
        let outcome = parse("json", r#"{"a": 1}"#).await;
        let NodeOutcome::Completed(Value::Map(m)) = outcome else { panic!("expected map") };
        assert_eq!(m.get("a"), Some(&Value::Number(1.0)));
    }

    #[tokio::test]
    async fn parses_csv_rows_keyed_by_header() {
        let outcome = parse("csv", "name,age\nada,36\ngrace,85\n").await;
        let NodeOutcome::Completed(Value::List(rows)) = outcome else { panic!("expected list") };
        assert_eq!(rows.len(), 2);
        let Value::Map(first) = &rows[0] else { panic!("expected map row") };
        assert_eq!(first.get("name"), Some(&Value::String("ada".to_string())));
        assert_eq!(first.get("age"), Some(&Value::String("36".to_string())));
    }

    #[tokio::test]
    async fn parses_yaml_scalar_map() {
        let outcome = parse("yaml", "a: 1\nb: two\n").await;
        let NodeOutcome::Completed(Value::Map(m)) = outcome else { panic!("expected map") };
        assert_eq!(m.get("b"), Some(&Value::String("two".to_string())));
    }

    #[tokio::test]
    async fn non_string_input_fails() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("p", "parse", json!({"format": "json"}));
        let ctx = test_ctx("p", vec![Value::Number(1.0)], &state, &http, &events, &registry);
        assert!(matches!(ParseNode.execute(&ctx, &node).await, NodeOutcome::Failed(_)));
    }

    #[test]
    fn validate_rejects_unknown_format() {
        let node = spec("p", "parse", json!({"format": "toml"}));
        assert!(ParseNode.validate(&node).is_err());
    }
}
