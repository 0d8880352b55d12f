//! Common types and enums used throughout the TinySIP server

use std::fmt;
use strum_macros::{Display, EnumString};

/// SIP methods the server recognizes on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, EnumString)]
pub enum Method {
    INVITE,
    ACK,
    BYE,
    CANCEL,
    REGISTER,
    OPTIONS,
    #[strum(default)]
    Unknown(String),
}

/// Message kind extracted from the start line
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// A SIP request with its method
    Request(Method),
    /// A SIP response with its numeric status code
    Status(u16),
}

/// Which dialog of a bridged call a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Leg {
    A,
    B,
}

impl Leg {
    /// The opposite leg of the bridge
    pub fn other(self) -> Leg {
        match self {
            Leg::A => Leg::B,
            Leg::B => Leg::A,
        }
    }
}

/// Call state driven by the per-dialog state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum CallState {
    /// Slot unoccupied
    #[default]
    Idle,
    /// Initial INVITE accepted, B-leg INVITE sent
    Routing,
    /// 180 Ringing forwarded to the caller
    Ringing,
    /// 2xx forwarded to the caller, waiting for ACK
    Answered,
    /// ACK bridged, call established
    Connected,
    /// CANCEL or BYE in flight, waiting for the closing 200
    Disconnecting,
}

/// Represents a range of text within a raw message
/// This avoids copying data during lexing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Get the string slice this range represents
    pub fn as_str<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for TextRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_method_round_trip() {
        assert_eq!(Method::from_str("INVITE").unwrap(), Method::INVITE);
        assert_eq!(Method::INVITE.to_string(), "INVITE");
        assert_eq!(
            Method::from_str("PUBLISH").unwrap(),
            Method::Unknown("PUBLISH".to_string())
        );
    }

    #[test]
    fn test_leg_other() {
        assert_eq!(Leg::A.other(), Leg::B);
        assert_eq!(Leg::B.other(), Leg::A);
    }

    #[test]
    fn test_text_range_slicing() {
        let source = "Call-ID: abc123";
        let range = TextRange::new(9, 15);
        assert_eq!(range.as_str(source), "abc123");
        assert_eq!(range.len(), 6);
        assert!(!range.is_empty());
    }
}
