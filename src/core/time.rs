//! Shared timestamp and identifier helpers.

use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

/// Unix-epoch milliseconds. All entity timestamps use this resolution.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Entity id with a kind prefix, e.g. `H_01J...` for a human task.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}
