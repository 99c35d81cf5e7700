//! Frame-level errors for wire decoding
//!
//! Every decode failure collapses to `invalid_frame` at the connection
//! boundary, but the variants keep enough context (offset, field, sizes) for
//! the debug log line that accompanies the fixed 400 response.

use thiserror::Error;

/// Frame parsing errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer ends before a fixed-width field could be read
    #[error("Frame too small: need {need} bytes at offset {offset}, got {got} (context: {context})")]
    MessageTooSmall {
        need: usize,
        got: usize,
        offset: usize,
        context: &'static str,
    },

    /// A length prefix declares more bytes than the buffer still holds
    #[error("Length overrun for {field} at offset {offset}: declared {declared} bytes, {remaining} remaining")]
    LengthOverrun {
        field: &'static str,
        offset: usize,
        declared: usize,
        remaining: usize,
    },

    /// Bytes left over after a complete frame
    #[error("Trailing bytes after frame: {extra} unexpected bytes at offset {offset}")]
    TrailingBytes { offset: usize, extra: usize },

    /// Frame exceeds the configured maximum
    #[error("Frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    pub fn message_too_small(need: usize, got: usize, offset: usize, context: &'static str) -> Self {
        Self::MessageTooSmall {
            need,
            got,
            offset,
            context,
        }
    }

    pub fn length_overrun(
        field: &'static str,
        offset: usize,
        declared: usize,
        remaining: usize,
    ) -> Self {
        Self::LengthOverrun {
            field,
            offset,
            declared,
            remaining,
        }
    }

    /// Coarse tag used on the wire and in metrics
    pub fn reason(&self) -> &'static str {
        "invalid_frame"
    }
}

/// Result type for codec operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = ProtocolError::length_overrun("method", 0, 64, 10);
        let text = err.to_string();
        assert!(text.contains("method"));
        assert!(text.contains("declared 64"));
        assert_eq!(err.reason(), "invalid_frame");
    }
}
