//! Core id types and protocol status codes.
//!
//! Ids are compact integers assigned by the server, unique for the lifetime
//! of the server process. Session ids travel as `i32` so that the create/join
//! reply can carry either an id (non-negative) or an [`ErrorCode`] (negative)
//! in the same four bytes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::framing::DecodeError;

/// Server-assigned player id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u32);

/// Server-assigned session id. Always positive once issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub i32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Request error codes, carried on the wire as negative integers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The player already belongs to a session.
    AlreadyInSession = -1,
    /// No live session has the requested id.
    SessionNotFound = -2,
}

impl ErrorCode {
    /// Wire value of this code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Look up a code by its wire value.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::AlreadyInSession),
            -2 => Some(Self::SessionNotFound),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInSession => f.write_str("already in a session"),
            Self::SessionNotFound => f.write_str("session not found"),
        }
    }
}

/// Outcome of a `CreateGame` or `JoinGame` request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinReply {
    /// The requester is now a member of this session.
    Joined(SessionId),
    /// The request was refused.
    Failed(ErrorCode),
}

impl JoinReply {
    /// Encode as the single integer the reply frame carries.
    pub fn to_wire(self) -> i32 {
        match self {
            Self::Joined(id) => id.0,
            Self::Failed(code) => code.code(),
        }
    }

    /// Decode the reply integer: non-negative is a session id, negative an
    /// error code.
    pub fn from_wire(value: i32) -> Result<Self, DecodeError> {
        if value >= 0 {
            Ok(Self::Joined(SessionId(value)))
        } else {
            ErrorCode::from_code(value)
                .map(Self::Failed)
                .ok_or(DecodeError::UnknownErrorCode(value))
        }
    }
}
