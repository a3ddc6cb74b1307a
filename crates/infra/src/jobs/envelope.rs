//! User-facing error envelope persisted for units that gave up.

use serde::{Deserialize, Serialize};

use mediaproc_ai::{Backend, CapabilityError, FailureClass};

use super::retry::FinalError;

const WORKFLOW_ERROR_TITLE: &str = "AI Analysis Service Configuration Issue";
const ANALYSIS_ERROR_TITLE: &str = "Analysis failed";
const INTERNAL_SERVER_ERROR_MARKER: &str = "internal_server_error";

const WORKFLOW_SUGGESTIONS: [&str; 4] = [
    "Check the workflow configuration in the workflow dashboard",
    "Verify all workflow nodes are properly connected",
    "Ensure the workflow input variable matches the configured name",
    "Test the workflow manually in the dashboard first",
];

/// Envelope flavour: likely misconfiguration vs. ordinary failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    WorkflowError,
    AnalysisError,
}

/// Structured error stored as a unit's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub technical_details: String,
    pub status: EnvelopeStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    pub kind: FailureClass,
    pub attempts: u32,
}

impl ErrorEnvelope {
    /// Build the envelope for a unit whose attempt sequence ended in `give_up`.
    pub fn from_final(backend: Backend, give_up: &FinalError) -> Self {
        if looks_like_misconfiguration(give_up) {
            let (message, suggestions) = match backend {
                Backend::Workflow => (
                    "The remote workflow has a configuration problem that needs to be fixed.",
                    WORKFLOW_SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
                ),
                other => (
                    "The remote analysis service kept failing on the server side.",
                    vec![
                        format!("Check that the {other} service is reachable and healthy"),
                        "Retry the job once the service has recovered".to_string(),
                    ],
                ),
            };
            return Self {
                error: WORKFLOW_ERROR_TITLE.to_string(),
                message: Some(message.to_string()),
                technical_details: give_up.message.clone(),
                status: EnvelopeStatus::WorkflowError,
                suggestions,
                kind: give_up.class,
                attempts: give_up.attempts,
            };
        }

        Self {
            error: ANALYSIS_ERROR_TITLE.to_string(),
            message: None,
            technical_details: give_up.message.clone(),
            status: EnvelopeStatus::AnalysisError,
            suggestions: vec![backend.analysis_hint().to_string()],
            kind: give_up.class,
            attempts: give_up.attempts,
        }
    }

    /// Envelope for an unexpected fault (panic, store failure) on one unit.
    pub fn from_fault(backend: Backend, detail: impl Into<String>, attempts: u32) -> Self {
        let err = CapabilityError::local_fault(detail);
        let mut envelope = Self::from_final(backend, &FinalError::immediate(&err));
        envelope.attempts = attempts.max(1);
        envelope
    }
}

fn looks_like_misconfiguration(give_up: &FinalError) -> bool {
    if give_up.class == FailureClass::LocalFault || give_up.class == FailureClass::LocalIo {
        return false;
    }
    if give_up.class == FailureClass::TransientRemote {
        return true;
    }
    if give_up.status.is_some_and(|s| (500..600).contains(&s)) {
        return true;
    }
    let text = give_up.last_error.to_lowercase();
    text.contains(INTERNAL_SERVER_ERROR_MARKER) || text.contains("http 500")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::retry::{Decision, RetryPolicy};

    fn give_up(policy: &RetryPolicy, err: CapabilityError, attempt: u32) -> FinalError {
        match policy.decide(attempt, &err) {
            Decision::GiveUp(f) => f,
            Decision::Retry(_) => panic!("expected give-up"),
        }
    }

    #[test]
    fn exhausted_500s_read_as_workflow_error() {
        let policy = RetryPolicy::default();
        let f = give_up(&policy, CapabilityError::from_status(500, "internal_server_error"), 2);
        let env = ErrorEnvelope::from_final(Backend::Workflow, &f);

        assert_eq!(env.status, EnvelopeStatus::WorkflowError);
        assert_eq!(env.error, WORKFLOW_ERROR_TITLE);
        assert_eq!(env.attempts, 3);
        assert_eq!(env.suggestions.len(), 4);
        assert!(env.technical_details.contains("3 attempts"));
    }

    #[test]
    fn client_errors_read_as_analysis_error() {
        let policy = RetryPolicy::default();
        let f = give_up(&policy, CapabilityError::from_status(400, "bad image"), 0);
        let env = ErrorEnvelope::from_final(Backend::Vision, &f);

        assert_eq!(env.status, EnvelopeStatus::AnalysisError);
        assert_eq!(env.error, ANALYSIS_ERROR_TITLE);
        assert_eq!(env.attempts, 1);
        assert_eq!(env.suggestions, vec![Backend::Vision.analysis_hint().to_string()]);
    }

    #[test]
    fn local_io_is_never_misconfiguration() {
        let f = FinalError::immediate(&CapabilityError::local_io("file not found: /a/page_500.png"));
        let env = ErrorEnvelope::from_final(Backend::Workflow, &f);
        assert_eq!(env.status, EnvelopeStatus::AnalysisError);
        assert_eq!(env.kind, FailureClass::LocalIo);
    }

    #[test]
    fn faults_are_local_analysis_errors() {
        let env = ErrorEnvelope::from_fault(Backend::Ocr, "unit panicked: index out of bounds", 1);
        assert_eq!(env.kind, FailureClass::LocalFault);
        assert_eq!(env.status, EnvelopeStatus::AnalysisError);
        assert!(env.technical_details.contains("panicked"));
    }

    #[test]
    fn serialized_shape() {
        let f = FinalError::immediate(&CapabilityError::from_status(502, "bad gateway"));
        let v = serde_json::to_value(ErrorEnvelope::from_final(Backend::Workflow, &f)).unwrap();
        assert_eq!(v["status"], "workflow_error");
        assert_eq!(v["kind"], "transient_remote");
        assert!(v["suggestions"].is_array());
        assert!(v["technical_details"].is_string());
    }
}
