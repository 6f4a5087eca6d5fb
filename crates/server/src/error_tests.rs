// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    not_found = { ErrorCode::NotFound, 404 },
    limit = { ErrorCode::SessionLimitReached, 409 },
    exists = { ErrorCode::SessionAlreadyExists, 409 },
    bad_request = { ErrorCode::BadRequest, 400 },
    auth = { ErrorCode::AuthFailed, 401 },
    rate = { ErrorCode::RateLimited, 429 },
    mux = { ErrorCode::MuxFailure, 500 },
    panic = { ErrorCode::BdPanic, 500 },
)]
fn http_status(code: ErrorCode, status: u16) {
    assert_eq!(code.http_status(), status);
}

#[test]
fn display_matches_as_str() {
    assert_eq!(ErrorCode::SessionLimitReached.to_string(), "session_limit_reached");
    assert_eq!(ErrorCode::UnknownSession.to_string(), "unknown_session");
}
