//! Turns raw service diagnostics into messages a person can act on.

use once_cell::sync::Lazy;
use regex::Regex;

const STATUS_MESSAGES: [(u16, &str); 9] = [
    (400, "Invalid request. Check the input and try again."),
    (401, "Authorization problem. Check GEMINI_API_KEY."),
    (403, "Access denied. The model or feature may not be available for this account."),
    (404, "Resource not found. The model or endpoint may have changed."),
    (429, "Rate limit exceeded. Wait a few minutes before retrying."),
    (500, "Internal server error on the model service. Try again later."),
    (502, "The service is temporarily unavailable. Try again in a few minutes."),
    (503, "The model is overloaded right now. This is temporary; retry in 1-2 minutes."),
    (504, "The response timed out. Retry or simplify the request."),
];

const TRANSIENT_MARKERS: [&str; 5] = ["503", "429", "504", "unavailable", "resource_exhausted"];

static STATUS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bstatus[ =:]*(\d{3})\b").expect("status pattern is valid")
});

fn truncate_detail(raw: &str, limit: usize) -> String {
    if raw.chars().count() <= limit {
        return raw.to_string();
    }
    let truncated: String = raw.chars().take(limit).collect();
    format!("{truncated}…")
}

fn friendly_for_status(code: u16) -> Option<&'static str> {
    STATUS_MESSAGES
        .iter()
        .find(|(status, _)| *status == code)
        .map(|(_, message)| *message)
}

fn extract_status(raw: &str) -> Option<u16> {
    STATUS_PATTERN
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .and_then(|value| value.as_str().parse::<u16>().ok())
}

pub fn format_api_error(raw: &str) -> String {
    let raw = raw.trim();

    if let Some(code) = extract_status(raw) {
        return match friendly_for_status(code) {
            Some(friendly) => format!("{friendly}\n  Details: {}", truncate_detail(raw, 200)),
            None => format!("API error ({code})\n  Details: {}", truncate_detail(raw, 200)),
        };
    }

    let upper = raw.to_uppercase();
    if upper.contains("UNAVAILABLE") {
        return format!(
            "{}\n  Details: {}",
            STATUS_MESSAGES[7].1,
            truncate_detail(raw, 150)
        );
    }
    if upper.contains("RESOURCE_EXHAUSTED") {
        return STATUS_MESSAGES[4].1.to_string();
    }
    if upper.contains("UNAUTHENTICATED") {
        return STATUS_MESSAGES[1].1.to_string();
    }

    format!("An error occurred\n  Details: {}", truncate_detail(raw, 200))
}

pub fn is_transient(raw: &str) -> bool {
    let lowered = raw.to_lowercase();
    TRANSIENT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// `action` names what the user would retry, e.g. "the report".
pub fn format_error_with_retry(raw: &str, action: &str) -> String {
    let mut message = format_api_error(raw);
    if is_transient(raw) {
        message.push_str(&format!(
            "\n  Run the command again in a few minutes to retry {action}."
        ));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_status_codes_to_friendly_text() {
        let message = format_api_error(
            "Gemini request failed with status 503 Service Unavailable: The model is overloaded.",
        );
        assert!(message.starts_with("The model is overloaded right now"));
        assert!(message.contains("Details: Gemini request failed"));
    }

    #[test]
    fn unknown_status_keeps_code() {
        let message = format_api_error("request failed with status 418: teapot");
        assert!(message.starts_with("API error (418)"));
    }

    #[test]
    fn retry_hint_only_for_transient_errors() {
        let transient = format_error_with_retry("status 429 RESOURCE_EXHAUSTED", "the plan");
        assert!(transient.contains("retry the plan"));

        let permanent = format_error_with_retry("status 400 bad request", "the plan");
        assert!(!permanent.contains("retry the plan"));
    }

    #[test]
    fn long_details_are_truncated() {
        let raw = "x".repeat(500);
        let message = format_api_error(&raw);
        assert!(message.ends_with('…'));
        assert!(message.chars().count() < 260);
    }
}
