//! Unified error handling for TinySIP
//!
//! A single error type covering the four failure surfaces of the server:
//! message parsing, transport, resource exhaustion, and call state.

use std::error::Error as StdError;
use std::fmt;

/// Unified error type for TinySIP operations
#[derive(Debug, Clone, PartialEq)]
pub enum SipError {
    /// Message lexing/parsing errors (bad start line, missing CRLF, etc.)
    Parse {
        message: String,
        context: Option<String>,
    },

    /// Network and transport errors
    Transport {
        endpoint: String,
        reason: String,
    },

    /// Resource exhaustion (call map full, queue full)
    Resource {
        resource_type: ResourceType,
        current_usage: u64,
        limit: u64,
    },

    /// Call state machine errors
    State {
        operation: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceType {
    ConcurrentCalls,
    QueueSlots,
}

impl fmt::Display for SipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipError::Parse { message, context } => {
                write!(f, "Parse error: {}", message)?;
                if let Some(ctx) = context {
                    write!(f, " ({})", ctx)?;
                }
                Ok(())
            }
            SipError::Transport { endpoint, reason } => {
                write!(f, "Transport error to {}: {}", endpoint, reason)
            }
            SipError::Resource { resource_type, current_usage, limit } => {
                write!(f, "Resource exhaustion: {:?} usage {} exceeds limit {}",
                       resource_type, current_usage, limit)
            }
            SipError::State { operation, reason } => {
                write!(f, "State error: {} failed - {}", operation, reason)
            }
        }
    }
}

impl StdError for SipError {}

impl SipError {
    /// Create a parse error with optional context
    pub fn parse(message: impl Into<String>, context: Option<String>) -> Self {
        SipError::Parse {
            message: message.into(),
            context,
        }
    }

    /// Create a transport error
    pub fn transport(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        SipError::Transport {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Create a resource exhaustion error
    pub fn resource(resource_type: ResourceType, current: u64, limit: u64) -> Self {
        SipError::Resource {
            resource_type,
            current_usage: current,
            limit,
        }
    }

    /// Create a call state error
    pub fn state(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        SipError::State {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether the server can keep serving after this error.
    /// Per-message failures never take the process down; only a state
    /// error marks a call as unrecoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SipError::Parse { .. } => true,
            SipError::Transport { .. } => true,
            SipError::Resource { .. } => true,
            SipError::State { .. } => false,
        }
    }

    /// Error category label for log lines
    pub fn category(&self) -> &'static str {
        match self {
            SipError::Parse { .. } => "parsing",
            SipError::Transport { .. } => "transport",
            SipError::Resource { .. } => "resource",
            SipError::State { .. } => "state",
        }
    }
}

/// Result type for TinySIP operations
pub type SipResult<T> = Result<T, SipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let parse_error = SipError::parse("Invalid start line", None);
        assert!(parse_error.to_string().contains("Parse error"));

        let transport_error = SipError::transport("192.168.1.1:5060", "send failed");
        assert!(transport_error.is_recoverable());
    }

    #[test]
    fn test_error_categories() {
        let parse_error = SipError::parse("test", None);
        assert_eq!(parse_error.category(), "parsing");

        let resource_error = SipError::resource(ResourceType::ConcurrentCalls, 32, 32);
        assert_eq!(resource_error.category(), "resource");
        assert!(resource_error.is_recoverable());

        let state_error = SipError::state("handle_bye", "call not found");
        assert!(!state_error.is_recoverable());
    }
}
