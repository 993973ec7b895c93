//! Schema-driven payload validation.
//!
//! A small structural checker over the JSON schema blob a [`crate::TypeSpec`]
//! carries: required fields, primitive types, and enum membership. The
//! issues it produces feed retry-hint construction — they carry the field
//! descriptions and allowed values the planner needs to self-correct.

use axon_types::FieldIssue;
use serde_json::Value;

/// Check `payload` against `schema`, collecting field-level issues.
/// An empty result means the payload is structurally acceptable.
pub fn check(schema: &Value, payload: &Value) -> Vec<FieldIssue> {
    let mut issues = Vec::new();
    check_object(schema, payload, "", &mut issues);
    issues
}

fn check_object(schema: &Value, payload: &Value, path: &str, issues: &mut Vec<FieldIssue>) {
    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            let present = payload.get(name).is_some_and(|v| !v.is_null());
            if !present {
                let field_schema = properties.and_then(|p| p.get(name));
                issues.push(issue(path, name, field_schema, true));
            }
        }
    }

    let Some(properties) = properties else { return };
    let Some(object) = payload.as_object() else {
        return;
    };

    for (name, value) in object {
        let Some(field_schema) = properties.get(name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if let Some(allowed) = field_schema.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                issues.push(issue(path, name, Some(field_schema), false));
                continue;
            }
        }
        if let Some(expected) = field_schema.get("type").and_then(Value::as_str) {
            if !type_matches(expected, value) {
                issues.push(issue(path, name, Some(field_schema), false));
                continue;
            }
            if expected == "object" {
                let child_path = join(path, name);
                check_object(field_schema, value, &child_path, issues);
            }
        }
    }
}

fn issue(path: &str, name: &str, field_schema: Option<&Value>, missing: bool) -> FieldIssue {
    FieldIssue {
        field: join(path, name),
        description: field_schema
            .and_then(|s| s.get("description"))
            .and_then(Value::as_str)
            .map(str::to_owned),
        allowed: field_schema
            .and_then(|s| s.get("enum"))
            .and_then(Value::as_array)
            .map(|values| values.iter().map(render_enum_value).collect())
            .unwrap_or_default(),
        missing,
    }
}

fn render_enum_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_owned()
    } else {
        format!("{path}.{name}")
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["account", "region"],
            "properties": {
                "account": { "type": "string", "description": "Account identifier" },
                "region": { "type": "string", "enum": ["us", "eu"], "description": "Deployment region" },
                "limit": { "type": "integer" }
            }
        })
    }

    #[test]
    fn missing_required_fields_are_reported() {
        let issues = check(&schema(), &json!({}));
        let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["account", "region"]);
        assert!(issues.iter().all(|i| i.missing));
        assert_eq!(issues[0].description.as_deref(), Some("Account identifier"));
        assert_eq!(issues[1].allowed, vec!["us", "eu"]);
    }

    #[test]
    fn enum_violations_are_invalid_not_missing() {
        let issues = check(&schema(), &json!({"account": "a", "region": "mars"}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "region");
        assert!(!issues[0].missing);
    }

    #[test]
    fn type_mismatch_is_reported() {
        let issues = check(&schema(), &json!({"account": "a", "region": "us", "limit": "ten"}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "limit");
    }

    #[test]
    fn nested_objects_use_dotted_paths() {
        let schema = json!({
            "type": "object",
            "required": ["filter"],
            "properties": {
                "filter": {
                    "type": "object",
                    "required": ["kind"],
                    "properties": { "kind": { "type": "string" } }
                }
            }
        });
        let issues = check(&schema, &json!({"filter": {}}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "filter.kind");
    }

    #[test]
    fn valid_payload_has_no_issues() {
        let issues = check(
            &schema(),
            &json!({"account": "a", "region": "us", "limit": 10}),
        );
        assert!(issues.is_empty());
    }
}
