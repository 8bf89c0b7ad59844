use crate::research::session::Phase;
use crate::utils::api_errors::format_error_with_retry;

/// Failures of the phase-advancing research operations. Each variant keeps
/// the underlying diagnostic so the caller can show enough detail to retry.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Cannot {operation} while the session is {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: Phase,
    },
    #[error("Select at least one task before starting research")]
    NoTasksSelected,
    #[error("Plan generation failed: {0}")]
    PlanGeneration(String),
    #[error("Research failed: {message}")]
    ResearchFailed {
        research_id: Option<String>,
        message: String,
    },
    #[error("Research {research_id} did not finish within {waited_secs}s")]
    ResearchTimeout {
        research_id: String,
        waited_secs: u64,
    },
    #[error("Report generation failed: {0}")]
    ReportGeneration(String),
}

impl ResearchError {
    /// Identifier of a remote job the user can resume or inspect.
    pub fn research_id(&self) -> Option<&str> {
        match self {
            ResearchError::ResearchFailed { research_id, .. } => research_id.as_deref(),
            ResearchError::ResearchTimeout { research_id, .. } => Some(research_id),
            _ => None,
        }
    }

    /// Multi-line message for the terminal, with a retry hint for transient
    /// service failures and a resume hint when a research job id exists.
    pub fn user_message(&self) -> String {
        let mut message = match self {
            ResearchError::PlanGeneration(raw) => {
                format!("Plan generation failed.\n  {}", format_error_with_retry(raw, "the plan"))
            }
            ResearchError::ReportGeneration(raw) => {
                format!("Report generation failed.\n  {}", format_error_with_retry(raw, "the report"))
            }
            ResearchError::ResearchFailed { message, .. } => {
                format!("Research failed.\n  {}", format_error_with_retry(message, "the research"))
            }
            other => other.to_string(),
        };
        if let Some(id) = self.research_id() {
            message.push_str(&format!(
                "\n  Research ID: {id}\n  Use `resume` to keep waiting or `status` to check it."
            ));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_exposes_research_id() {
        let err = ResearchError::ResearchTimeout {
            research_id: "int-42".to_string(),
            waited_secs: 300,
        };
        assert_eq!(err.research_id(), Some("int-42"));
        let message = err.user_message();
        assert!(message.starts_with("Research int-42 did not finish within 300s"));
        assert!(message.contains("Research ID: int-42"));
    }

    #[test]
    fn service_errors_get_friendly_text() {
        let err = ResearchError::PlanGeneration(
            "Gemini interaction create failed with status 503 Service Unavailable: overloaded"
                .to_string(),
        );
        let message = err.user_message();
        assert!(message.contains("The model is overloaded"));
        assert!(message.contains("retry the plan"));
        assert!(err.research_id().is_none());
    }

    #[test]
    fn phase_errors_name_the_operation() {
        let err = ResearchError::InvalidPhase {
            operation: "start research",
            phase: Phase::Idle,
        };
        assert_eq!(err.to_string(), "Cannot start research while the session is idle");
    }
}
