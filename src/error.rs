use thiserror::Error;

/// Result type alias for browser-control operations
pub type Result<T> = std::result::Result<T, BrowserError>;

/// Errors that can occur during browser-control operations
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Failed to establish the underlying protocol connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The protocol connection was closed while requests were in flight
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The browser returned a protocol-level error for a command
    #[error("Protocol error from {method}: {message}")]
    Protocol { method: String, message: String },

    /// Registering an event listener on the connection failed
    #[error("Event subscription failed: {0}")]
    SubscriptionFailed(String),

    /// An EncodedId string did not match the `"{frameIndex}-{backendNodeId}"` format
    #[error("Invalid encoded id '{0}': expected '{{frameIndex}}-{{backendNodeId}}'")]
    InvalidEncodedId(String),

    /// No xpath was recorded for an element when the resolver needed a fallback
    #[error("No xpath entry recorded for encoded id '{0}'")]
    MissingXpath(String),

    /// No protocol session is available for the requested frame
    #[error("No session for frame index {0}")]
    NoSessionForFrame(u64),

    /// A frame id was not present in the frame graph
    #[error("Frame not found: {0}")]
    FrameNotFound(String),

    /// No execution context appeared for a frame within the bounded wait
    #[error("Timed out after {waited_ms}ms waiting for execution context in frame {frame_id}")]
    ExecutionContextTimeout { frame_id: String, waited_ms: u64 },

    /// Element resolution failed after both backend-id and xpath strategies
    #[error("Failed to resolve element '{encoded_id}': {reason}")]
    ResolveFailed { encoded_id: String, reason: String },

    /// DOM capture exhausted its retry budget
    #[error("DOM capture failed after {attempts} attempt(s): {reason}")]
    CaptureFailed { attempts: u32, reason: String },

    /// JSON (de)serialization error at the protocol boundary
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Maximum length of a sanitized diagnostic string before truncation.
pub const MAX_DIAGNOSTIC_LEN: usize = 256;

/// Sanitize a string destined for logs or error messages.
///
/// Strings that reach error messages may embed page-controlled content (URLs,
/// frame names, titles). Control characters are replaced, whitespace is
/// collapsed, and the result is capped at `max_len` characters with an
/// explicit truncation marker.
pub fn sanitize_diagnostic(input: &str, max_len: usize) -> String {
    let replaced: String = input
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() > max_len {
        let truncated: String = collapsed.chars().take(max_len).collect();
        format!("{}…[truncated]", truncated)
    } else {
        collapsed
    }
}

/// Sanitize with the default length cap.
pub fn sanitize(input: &str) -> String {
    sanitize_diagnostic(input, MAX_DIAGNOSTIC_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_control_characters() {
        let dirty = "frame\x00name\twith\nnewlines\r\n";
        let clean = sanitize(dirty);

        assert_eq!(clean, "frame name with newlines");
        assert!(!clean.chars().any(|c| c.is_control()));
    }

    #[test]
    fn test_sanitize_collapses_whitespace() {
        let spaced = "a   lot    of   spaces";
        assert_eq!(sanitize(spaced), "a lot of spaces");
    }

    #[test]
    fn test_sanitize_truncates_long_input() {
        let long = "x".repeat(1000);
        let clean = sanitize(&long);

        assert!(clean.ends_with("…[truncated]"));
        assert!(clean.chars().count() < 300);
    }

    #[test]
    fn test_sanitize_short_input_unchanged() {
        assert_eq!(sanitize("https://example.com"), "https://example.com");
    }

    #[test]
    fn test_error_messages_are_specific() {
        let err = BrowserError::NoSessionForFrame(3);
        assert!(err.to_string().contains("frame index 3"));

        let err = BrowserError::ExecutionContextTimeout {
            frame_id: "ABC".to_string(),
            waited_ms: 5000,
        };
        assert!(err.to_string().contains("ABC"));
        assert!(err.to_string().contains("5000"));
    }
}
