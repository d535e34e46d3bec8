// src/utils/ids.rs
//! ULID-based identifier generation for report items, behavior events,
//! and sessions.

use ulid::Ulid;

/// Generate a unique id for a report item or behavior event.
pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Generate a session id, minted once per SDK instance.
pub fn session_id() -> String {
    format!("sess_{}", Ulid::new())
}
