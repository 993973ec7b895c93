//! Retry-hint construction from codec failures.

use axon_types::{CodecError, FieldIssue, RetryHint, RetryReason};

/// How many fields the clarifying question covers at most.
const MAX_QUESTION_FIELDS: usize = 3;

/// Build the retry hint for a payload decode failure, or `None` when the
/// failure is not correctable by the planner (contract violations).
pub fn hint_for_decode_error(
    tool: &str,
    error: &CodecError,
    example: Option<&serde_json::Value>,
) -> Option<RetryHint> {
    match error {
        CodecError::Validation { issues } => Some(hint_from_issues(tool, issues)),
        CodecError::Syntax(_) => Some(RetryHint {
            reason: RetryReason::MissingFields,
            missing_fields: vec!["$payload".to_owned()],
            clarifying_question: Some(format!(
                "The payload for {tool} could not be parsed. Provide a JSON object matching the tool's schema."
            )),
            tool: tool.to_owned(),
            example_input: example.cloned(),
        }),
        _ => None,
    }
}

fn hint_from_issues(tool: &str, issues: &[FieldIssue]) -> RetryHint {
    let reason = if issues.iter().any(|issue| issue.missing) {
        RetryReason::MissingFields
    } else {
        RetryReason::InvalidArguments
    };
    let missing_fields: Vec<String> = issues.iter().map(|issue| issue.field.clone()).collect();
    RetryHint {
        reason,
        missing_fields,
        clarifying_question: Some(clarifying_question(issues)),
        tool: tool.to_owned(),
        example_input: None,
    }
}

/// A descriptive question covering up to three problem fields, with
/// their schema descriptions and allowed enum values.
fn clarifying_question(issues: &[FieldIssue]) -> String {
    let parts: Vec<String> = issues
        .iter()
        .take(MAX_QUESTION_FIELDS)
        .map(|issue| {
            let mut part = format!("`{}`", issue.field);
            if let Some(description) = &issue.description {
                part.push_str(&format!(" ({description})"));
            }
            if !issue.allowed.is_empty() {
                part.push_str(&format!(" [one of: {}]", issue.allowed.join(", ")));
            }
            part
        })
        .collect();
    format!("Please provide {}.", parts.join(", "))
}
