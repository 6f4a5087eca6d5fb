// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    bead_created = { "bead:created", "bead_update", Some("created") },
    bead_updated = { "bead:updated", "bead_update", Some("updated") },
    bead_closed = { "bead:closed", "bead_update", Some("closed") },
    mail = { "mail:received", "mail_received", None },
    status = { "agent:status_changed", "agent_status", None },
    power = { "power:state", "power_state", None },
    mode = { "mode:changed", "mode_changed", None },
    stream = { "stream:status", "stream_status", None },
    fallback = { "session:event", "session_event", None },
)]
fn kind_mapping(kind: &str, expected: &str, action: Option<&'static str>) {
    assert_eq!(public_event_name(kind), (expected.to_owned(), action));
}

#[test]
fn bead_events_gain_an_action_field() {
    let event = BusEvent {
        seq: 7,
        ts_ms: 0,
        kind: "bead:closed".to_owned(),
        payload: json!({ "id": "b-1" }),
    };
    // Rendered through the same path the handler uses.
    let sse = to_sse_event(&event);
    let rendered = format!("{sse:?}");
    assert!(rendered.contains("bead_update"));
    assert!(rendered.contains("closed"));
}
