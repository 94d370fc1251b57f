use std::time::Duration;
use thiserror::Error as ThisError;

/// Malformed caller input. Never retried.
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid identity: must be exactly 28 alphanumeric characters")]
    InvalidIdentity,

    #[error("Invalid state {0:?}: valid states are [open|closed]")]
    InvalidState(String),

    #[error("Invalid temperature {0}: valid range is -40 to 125 F")]
    InvalidTemperature(f64),

    #[error("Invalid humidity {0}: valid range is 0 to 100%")]
    InvalidHumidity(f64),

    #[error("Invalid timestamp {0}: valid range is 0 and up")]
    InvalidTimestamp(i64),
}

/// Store, session or bus unavailable. Callers may retry with backoff.
#[derive(ThisError, Debug)]
pub enum InfrastructureError {
    #[error("Document {collection}/{identity} does not exist")]
    NotFound {
        collection: &'static str,
        identity: String,
    },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Video capture or remux failed. Logged, never fatal to the workflow.
#[derive(ThisError, Debug)]
pub enum CaptureError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Capture step timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Evidence upload failed. Logged, never fatal to the workflow.
#[derive(ThisError, Debug)]
pub enum UploadError {
    #[error("Clip {0} has no file name")]
    InvalidPath(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Push notification could not be delivered.
#[derive(ThisError, Debug)]
pub enum DispatchError {
    #[error("No push access token configured")]
    Unauthenticated,

    #[error("Push transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Push service rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Sensor read failed after the producer exhausted its retries.
#[derive(ThisError, Debug)]
pub enum SensorError {
    #[error("Sensor helper {program} failed: {detail}")]
    Helper { program: String, detail: String },

    #[error("Unparseable sensor output {0:?}")]
    Parse(String),

    #[error("Sensor returned an implausible reading: {0}")]
    Implausible(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Caller-visible outcome of an orchestrator operation.
#[derive(ThisError, Debug)]
pub enum OrchestratorError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Infrastructure failure{}: {source}", recorded_suffix(.state_recorded))]
    Infrastructure {
        #[source]
        source: InfrastructureError,
        state_recorded: bool,
    },

    #[error("State recorded but notification failed: {0}")]
    Dispatch(#[from] DispatchError),
}

fn recorded_suffix(state_recorded: &bool) -> &'static str {
    if *state_recorded {
        " after state was recorded"
    } else {
        ""
    }
}

impl OrchestratorError {
    /// Infrastructure failure before anything was written.
    pub fn infrastructure(source: InfrastructureError) -> Self {
        Self::Infrastructure {
            source,
            state_recorded: false,
        }
    }

    /// Infrastructure failure after the new state was committed.
    pub fn infrastructure_after_write(source: InfrastructureError) -> Self {
        Self::Infrastructure {
            source,
            state_recorded: true,
        }
    }

    /// Whether the new state was persisted before this error occurred.
    ///
    /// Operators use this to reconcile "recorded but not notified" outcomes.
    pub fn state_recorded(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Infrastructure { state_recorded, .. } => *state_recorded,
            Self::Dispatch(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_recorded_flags() {
        let err = OrchestratorError::from(ValidationError::InvalidIdentity);
        assert!(!err.state_recorded());

        let err = OrchestratorError::infrastructure(InfrastructureError::Unavailable("down".into()));
        assert!(!err.state_recorded());

        let err = OrchestratorError::infrastructure_after_write(InfrastructureError::NotFound {
            collection: "fcmTokens",
            identity: "abc".into(),
        });
        assert!(err.state_recorded());
        assert!(err.to_string().contains("after state was recorded"));

        let err = OrchestratorError::from(DispatchError::Rejected {
            status: 500,
            body: "boom".into(),
        });
        assert!(err.state_recorded());
    }
}
