// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error kinds shared across HTTP, WebSocket, SSE, and tool-RPC
/// transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    SessionLimitReached,
    SessionAlreadyExists,
    MuxFailure,
    NotFound,
    Timeout,
    BdPanic,
    CommandFailed,
    ParseError,
    AuthFailed,
    AuthTimeout,
    RateLimited,
    UnknownType,
    UnknownSession,
    StoreError,
    BadRequest,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::SessionLimitReached => 409,
            Self::SessionAlreadyExists => 409,
            Self::NotFound => 404,
            Self::BadRequest => 400,
            Self::AuthFailed | Self::AuthTimeout => 401,
            Self::RateLimited => 429,
            Self::UnknownType | Self::UnknownSession => 400,
            Self::Timeout
            | Self::MuxFailure
            | Self::BdPanic
            | Self::CommandFailed
            | Self::ParseError
            | Self::StoreError
            | Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionLimitReached => "session_limit_reached",
            Self::SessionAlreadyExists => "session_already_exists",
            Self::MuxFailure => "mux_failure",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::BdPanic => "bd_panic",
            Self::CommandFailed => "command_failed",
            Self::ParseError => "parse_error",
            Self::AuthFailed => "auth_failed",
            Self::AuthTimeout => "auth_timeout",
            Self::RateLimited => "rate_limited",
            Self::UnknownType => "unknown_type",
            Self::UnknownSession => "unknown_session",
            Self::StoreError => "store_error",
            Self::BadRequest => "bad_request",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ErrorCode {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
