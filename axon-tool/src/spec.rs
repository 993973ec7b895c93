//! Tool specifications declared at registration time.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axon_types::{Bounds, CodecError};
use serde_json::Value;

use crate::codec::{JsonCodec, ToolCodec};
use crate::validate;

/// Capability trait for typed results that carry paging metadata.
/// The dispatcher derives [`Bounds`] from it when the executor did not
/// set them explicitly.
pub trait BoundedValue {
    /// The bounds describing this result.
    fn bounds(&self) -> Bounds;
}

type BoundsFn = dyn Fn(&(dyn Any + Send)) -> Option<Bounds> + Send + Sync;

/// The type description of a tool payload or result: a JSON schema blob,
/// an example document, and the typed codec.
#[derive(Clone)]
pub struct TypeSpec {
    /// JSON schema for the type.
    pub schema: Value,
    /// Example JSON document, attached to retry hints.
    pub example: Option<Value>,
    /// The typed codec, absent only for toolsets that decode in the
    /// executor.
    pub codec: Option<Arc<dyn ToolCodec>>,
    bounds: Option<Arc<BoundsFn>>,
}

impl std::fmt::Debug for TypeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeSpec")
            .field("schema", &self.schema)
            .field("example", &self.example)
            .field("codec", &self.codec.is_some())
            .finish_non_exhaustive()
    }
}

impl TypeSpec {
    /// A spec for type `T` with a serde-backed codec.
    pub fn of<T>(schema: Value) -> Self
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Send + 'static,
    {
        Self {
            schema,
            example: None,
            codec: Some(Arc::new(JsonCodec::<T>::new())),
            bounds: None,
        }
    }

    /// A spec with no codec — the toolset decodes in its executor.
    pub fn opaque(schema: Value) -> Self {
        Self {
            schema,
            example: None,
            codec: None,
            bounds: None,
        }
    }

    /// Attach an example document.
    #[must_use]
    pub fn with_example(mut self, example: Value) -> Self {
        self.example = Some(example);
        self
    }

    /// Wire bounds derivation for a `T: BoundedValue` result type.
    #[must_use]
    pub fn with_bounds<T>(mut self) -> Self
    where
        T: BoundedValue + Send + 'static,
    {
        self.bounds = Some(Arc::new(|value: &(dyn Any + Send)| {
            value.downcast_ref::<T>().map(BoundedValue::bounds)
        }));
        self
    }

    /// Decode canonical JSON through the codec, classifying failures.
    ///
    /// A serde failure on JSON that parses is checked against the schema:
    /// when the schema finds field-level problems the error becomes a
    /// structured [`CodecError::Validation`]; otherwise the raw syntax
    /// error surfaces.
    pub fn decode(&self, raw: &[u8]) -> Result<Box<dyn Any + Send>, CodecError> {
        let codec = self
            .codec
            .as_ref()
            .ok_or_else(|| CodecError::MissingCodec(String::new()))?;
        match codec.decode(raw) {
            Ok(value) => Ok(value),
            Err(decode_err) => {
                if let Ok(parsed) = serde_json::from_slice::<Value>(raw) {
                    let issues = validate::check(&self.schema, &parsed);
                    if !issues.is_empty() {
                        return Err(CodecError::Validation { issues });
                    }
                }
                Err(decode_err)
            }
        }
    }

    /// Derive bounds from a decoded typed result, when wired.
    pub fn derive_bounds(&self, value: &(dyn Any + Send)) -> Option<Bounds> {
        self.bounds.as_ref().and_then(|derive| derive(value))
    }
}

/// Human confirmation required before a tool executes.
#[derive(Debug, Clone)]
pub struct ConfirmationSpec {
    /// Short title shown to the operator.
    pub title: String,
    /// Prompt template, rendered over the decoded payload with
    /// `{field}` placeholders.
    pub prompt_template: String,
    /// JSON template for the synthetic result of a denied call.
    pub denied_result_template: String,
}

impl ConfirmationSpec {
    /// Render the prompt over a payload.
    pub fn render_prompt(&self, payload: &Value) -> String {
        render_template(&self.prompt_template, payload)
    }

    /// The synthetic result for a denied call. Falls back to JSON `null`
    /// when the template does not parse.
    pub fn denied_result(&self, payload: &Value) -> Value {
        let rendered = render_template(&self.denied_result_template, payload);
        serde_json::from_str(&rendered).unwrap_or(Value::Null)
    }
}

/// Substitute `{field}` placeholders with top-level payload values.
/// Unknown fields render as empty strings.
pub fn render_template(template: &str, payload: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match payload.get(key) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => {}
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Everything the runtime knows about one tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Fully-qualified tool name (`service.toolset.tool`).
    pub name: String,
    /// The owning service.
    pub service: String,
    /// The owning toolset.
    pub toolset: String,
    /// Payload type description.
    pub payload: TypeSpec,
    /// Result type description.
    pub result: TypeSpec,
    /// Confirmation gate, when the tool requires one.
    pub confirmation: Option<ConfirmationSpec>,
    /// Whether this tool is a nested agent invocation. Agent tools run
    /// inline in workflow context, never through activity dispatch.
    pub is_agent_tool: bool,
    /// Whether results must carry bounds.
    pub bounded_result: bool,
    /// Whether executing this tool terminates the run.
    pub terminal_run: bool,
    /// Tags for policy filtering.
    pub tags: Vec<String>,
    /// Human description.
    pub description: String,
    /// Per-tool activity timeout hint, used to group dispatch batches.
    pub timeout: Option<Duration>,
}

impl ToolSpec {
    /// A minimal spec with the given name and type descriptions.
    /// `name` must be `service.toolset.tool`; missing segments stay empty.
    pub fn new(name: impl Into<String>, payload: TypeSpec, result: TypeSpec) -> Self {
        let name = name.into();
        let mut segments = name.split('.');
        let service = segments.next().unwrap_or_default().to_owned();
        let toolset = segments.next().unwrap_or_default().to_owned();
        Self {
            name,
            service,
            toolset,
            payload,
            result,
            confirmation: None,
            is_agent_tool: false,
            bounded_result: false,
            terminal_run: false,
            tags: Vec::new(),
            description: String::new(),
            timeout: None,
        }
    }

    /// Attach a confirmation gate.
    #[must_use]
    pub fn with_confirmation(mut self, confirmation: ConfirmationSpec) -> Self {
        self.confirmation = Some(confirmation);
        self
    }

    /// Mark as an agent-as-tool.
    #[must_use]
    pub fn agent_tool(mut self) -> Self {
        self.is_agent_tool = true;
        self
    }

    /// Mark as terminal: executing it ends the run.
    #[must_use]
    pub fn terminal(mut self) -> Self {
        self.terminal_run = true;
        self
    }

    /// Mark the result as bounded.
    #[must_use]
    pub fn bounded(mut self) -> Self {
        self.bounded_result = true;
        self
    }

    /// Attach policy tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Attach a per-tool timeout hint.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn template_substitutes_payload_fields() {
        let payload = json!({"name": "prod-db", "count": 3});
        assert_eq!(
            render_template("Drop {name} ({count} tables)?", &payload),
            "Drop prod-db (3 tables)?"
        );
    }

    #[test]
    fn template_leaves_unknown_fields_empty() {
        assert_eq!(render_template("x={missing}!", &json!({})), "x=!");
    }

    #[test]
    fn denied_result_parses_template() {
        let spec = ConfirmationSpec {
            title: "Confirm".into(),
            prompt_template: "ok".into(),
            denied_result_template: "{\"denied\": true}".into(),
        };
        assert_eq!(spec.denied_result(&json!({})), json!({"denied": true}));
    }

    #[test]
    fn name_segments_populate_service_and_toolset() {
        let spec = ToolSpec::new(
            "billing.invoices.lookup",
            TypeSpec::opaque(json!({})),
            TypeSpec::opaque(json!({})),
        );
        assert_eq!(spec.service, "billing");
        assert_eq!(spec.toolset, "invoices");
    }
}
