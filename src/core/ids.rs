//! Identifier helpers for speculative items.

use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;

/// Prefix shared by every client-generated placeholder id.
pub const TEMP_PREFIX: &str = "temp-";

/// Generate a placeholder id of the form `temp-<unix-millis>-<random>`.
#[must_use]
pub fn new_temp_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("{TEMP_PREFIX}{}-{suffix}", Utc::now().timestamp_millis())
}

/// Whether an id is a placeholder that the backend has never seen.
#[must_use]
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_PREFIX)
}

/// Client-side UUID sent verbatim with creates so promotion is an exact match.
#[must_use]
pub fn new_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
