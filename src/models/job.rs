use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a job generates a fresh image or edits an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Create,
    Edit,
}

/// Raw image bytes plus the MIME type they were uploaded with.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImagePayload {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }
}

impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .finish()
    }
}

/// One fully-resolved unit of work submitted to the queue.
///
/// Built once per expanded combination at batch-submission time and never
/// mutated afterwards; the queue owns it for the duration of its execution.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub id: Uuid,
    pub display_name: String,
    pub prompt: String,
    pub model: String,
    pub quality: String,
    pub size: Option<String>,
    pub mode: GenerationMode,
    /// Source image for edit mode; `None` in create mode.
    pub input_image: Option<ImagePayload>,
    /// Optional style-reference image shared across the batch.
    pub ref_image: Option<ImagePayload>,
}

/// Machine-readable classification of a provider failure, consumed by the
/// retry policy so the queue never has to parse free-text messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    RateLimited,
    ServerError,
    Transport,
    Invalid,
    Unknown,
}

impl ErrorClass {
    /// Rate limits, 5xx responses and transport glitches are worth retrying;
    /// everything else fails the job immediately.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorClass::RateLimited | ErrorClass::ServerError | ErrorClass::Transport
        )
    }

    /// Fallback classifier for errors that carry no structured status.
    ///
    /// Pattern-matches the message text the way the upstream adapters format
    /// it (`HTTP 429: ...`, `network`, `timeout`). Compatibility shim: only
    /// used when a richer classification is unavailable.
    pub fn from_message(message: &str) -> Self {
        if message.contains("429") || message.contains("Rate limit") {
            ErrorClass::RateLimited
        } else if ["500", "502", "503", "504"]
            .iter()
            .any(|code| message.contains(code))
        {
            ErrorClass::ServerError
        } else if message.contains("network") || message.contains("timeout") {
            ErrorClass::Transport
        } else {
            ErrorClass::Unknown
        }
    }
}

/// Terminal outcome of one job: an image, a failure, or cancellation.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Image(Vec<u8>),
    Failed { message: String, class: ErrorClass },
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Image(_))
    }

    pub fn image(&self) -> Option<&[u8]> {
        match self {
            JobOutcome::Image(data) => Some(data),
            _ => None,
        }
    }

    /// Uniform non-null-error view: cancellation renders as the literal
    /// `Cancelled` so consumers can treat it like any other failed result.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            JobOutcome::Image(_) => None,
            JobOutcome::Failed { message, .. } => Some(message),
            JobOutcome::Cancelled => Some("Cancelled"),
        }
    }
}

/// Produced exactly once per [`JobDescriptor`], successful or not.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub id: Uuid,
    pub display_name: String,
    pub outcome: JobOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_markers() {
        assert_eq!(
            ErrorClass::from_message("HTTP 429: too many requests"),
            ErrorClass::RateLimited
        );
        assert_eq!(
            ErrorClass::from_message("Rate limit exceeded. Reduce parallel workers."),
            ErrorClass::RateLimited
        );
    }

    #[test]
    fn test_server_error_markers() {
        for code in ["500", "502", "503", "504"] {
            assert_eq!(
                ErrorClass::from_message(&format!("HTTP {code}: upstream broke")),
                ErrorClass::ServerError,
            );
        }
    }

    #[test]
    fn test_transport_markers() {
        assert_eq!(ErrorClass::from_message("network error"), ErrorClass::Transport);
        assert_eq!(ErrorClass::from_message("request timeout"), ErrorClass::Transport);
    }

    #[test]
    fn test_unrecognized_message_is_unknown_and_permanent() {
        let class = ErrorClass::from_message("Invalid request. Check your prompt or API key.");
        assert_eq!(class, ErrorClass::Unknown);
        assert!(!class.is_retryable());
    }

    #[test]
    fn test_cancelled_outcome_has_uniform_error_view() {
        let outcome = JobOutcome::Cancelled;
        assert!(!outcome.is_success());
        assert_eq!(outcome.error_message(), Some("Cancelled"));
    }
}
