//! System-role reminders appended after tool results.
//!
//! Reminders instruct the planner — each one tells it explicitly not to
//! surface the reminder itself to the user.

use axon_types::{Bounds, RetryHint, RetryReason};

/// Render the reminder for a retry hint, including the prior input and
/// the spec example when available.
pub fn retry_hint_reminder(
    hint: &RetryHint,
    prior_input: Option<&serde_json::Value>,
) -> String {
    let mut out = String::from("Reminder (do not expose this to the user): the call to `");
    out.push_str(&hint.tool);
    out.push_str("` was rejected (");
    out.push_str(match hint.reason {
        RetryReason::MissingFields => "missing fields",
        RetryReason::InvalidArguments => "invalid arguments",
    });
    out.push_str(").");
    if !hint.missing_fields.is_empty() {
        out.push_str(" Problem fields: ");
        out.push_str(&hint.missing_fields.join(", "));
        out.push('.');
    }
    if let Some(question) = &hint.clarifying_question {
        out.push(' ');
        out.push_str(question);
    }
    if let Some(prior) = prior_input {
        out.push_str(" Prior input: ");
        out.push_str(&prior.to_string());
        out.push('.');
    }
    if let Some(example) = &hint.example_input {
        out.push_str(" Example input: ");
        out.push_str(&example.to_string());
        out.push('.');
    }
    out
}

/// Render the reminder for a bounded result.
pub fn bounds_reminder(tool: &str, bounds: &Bounds) -> String {
    let mut out = format!(
        "Reminder (do not expose this to the user): `{tool}` returned {} item(s)",
        bounds.returned
    );
    if let Some(total) = bounds.total {
        out.push_str(&format!(" of {total} available"));
    }
    if bounds.truncated {
        out.push_str("; the result was truncated");
    }
    out.push('.');
    if let Some(cursor) = &bounds.next_cursor {
        out.push_str(&format!(" Pass cursor `{cursor}` to fetch the next page."));
    }
    if let Some(refine) = &bounds.refine_hint {
        out.push(' ');
        out.push_str(refine);
    }
    out
}
