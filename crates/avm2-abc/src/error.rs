//! ABC codec errors

use thiserror::Error;

/// Broad classification of an [`AbcError`].
///
/// Lets callers tell malformed input apart from programmer misuse and from
/// features this codec knowingly does not cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unsupported input bytes
    Parse,
    /// Misuse of the object model (internal-consistency bug)
    Construction,
    /// Known format feature that is not handled
    Unimplemented,
    /// Underlying I/O failure
    Io,
}

/// Errors that can occur while decoding, building or encoding ABC units
#[derive(Debug, Error)]
pub enum AbcError {
    /// Malformed input
    #[error("Parse error at offset {offset}: {message}")]
    Parse {
        /// Byte offset where the problem was detected
        offset: usize,
        /// Error message
        message: String,
    },

    /// Input ended in the middle of a value
    #[error("Unexpected end of data at offset {offset}")]
    UnexpectedEnd {
        /// Byte offset of the failed read
        offset: usize,
    },

    /// Instruction byte with no descriptor
    #[error("Invalid opcode {byte:#04x} at offset {offset}")]
    InvalidOpcode {
        /// The instruction byte
        byte: u8,
        /// Offset of the instruction within its method body
        offset: usize,
    },

    /// Version header other than the one this codec speaks
    #[error("Unsupported ABC version {major}.{minor}")]
    UnsupportedVersion {
        /// Major version read from the header
        major: u16,
        /// Minor version read from the header
        minor: u16,
    },

    /// Object model invariant violated by the caller
    #[error("Construction error: {0}")]
    Construction(String),

    /// A dual-state field was queried in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Recognised but unsupported format feature
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// IO error while reading or writing a unit
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AbcError {
    /// Create a parse error
    pub fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }

    /// Create a construction error
    pub fn construction(message: impl Into<String>) -> Self {
        Self::Construction(message.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create an unimplemented-feature error
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::Unimplemented(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse { .. }
            | Self::UnexpectedEnd { .. }
            | Self::InvalidOpcode { .. }
            | Self::UnsupportedVersion { .. } => ErrorKind::Parse,
            Self::Construction(_) | Self::InvalidState(_) => ErrorKind::Construction,
            Self::Unimplemented(_) => ErrorKind::Unimplemented,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// Result type for ABC operations
pub type Result<T> = std::result::Result<T, AbcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(AbcError::parse(3, "bad").kind(), ErrorKind::Parse);
        assert_eq!(
            AbcError::InvalidOpcode { byte: 0xFF, offset: 0 }.kind(),
            ErrorKind::Parse
        );
        assert_eq!(
            AbcError::invalid_state("offset queried").kind(),
            ErrorKind::Construction
        );
        assert_eq!(
            AbcError::unimplemented("callsuperid").kind(),
            ErrorKind::Unimplemented
        );
    }

    #[test]
    fn test_error_display() {
        let err = AbcError::InvalidOpcode { byte: 0x0a, offset: 12 };
        assert_eq!(err.to_string(), "Invalid opcode 0x0a at offset 12");
    }
}
