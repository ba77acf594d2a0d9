pub mod auth;
pub mod feed;
pub mod graphql;
pub mod images;
pub mod middleware;
pub mod state;

use chrono::{SecondsFormat, Utc};

/// ISO-8601 timestamp with microsecond precision, UTC. All persisted and
/// broadcast timestamps go through here so string ordering matches time.
pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
