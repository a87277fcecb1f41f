//! Structured engine events.
//!
//! Every significant state transition publishes exactly one [`Event`] to the
//! configured [`EventSink`]. External projections (state files, dashboards)
//! subscribe at this seam; the engine itself never reads events back.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One engine event. Serializes with a `kind` discriminant matching the
/// dotted names consumed by downstream projections.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind")]
pub enum Event {
    #[serde(rename = "repo.created")]
    RepoCreated { repo_id: String, name: String },
    #[serde(rename = "workpad.created")]
    WorkpadCreated {
        pad_id: String,
        repo_id: String,
        branch: String,
    },
    #[serde(rename = "workpad.deleted")]
    WorkpadDeleted { pad_id: String, repo_id: String },
    #[serde(rename = "checkpoint.created")]
    CheckpointCreated {
        pad_id: String,
        checkpoint_id: String,
        commit: String,
    },
    #[serde(rename = "workpad.promoted")]
    WorkpadPromoted {
        pad_id: String,
        repo_id: String,
        commit: String,
    },
    #[serde(rename = "trunk.reverted")]
    TrunkReverted {
        repo_id: String,
        reverted_commit: String,
        revert_commit: String,
    },
    #[serde(rename = "tests.started")]
    TestsStarted { pad_id: String, total: usize },
    #[serde(rename = "tests.finished")]
    TestsFinished {
        pad_id: String,
        passed: usize,
        failed: usize,
    },
    #[serde(rename = "ci.started")]
    CiStarted {
        run_id: String,
        repo_id: String,
        commit: String,
    },
    #[serde(rename = "ci.finished")]
    CiFinished { run_id: String, status: String },
    #[serde(rename = "rollback.performed")]
    RollbackPerformed {
        repo_id: String,
        revert_commit: String,
        recreated_pad: Option<String>,
    },
}

/// A published event with its timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

/// Receives engine events. Implementations must not fail: event delivery is
/// fire-and-forget and never blocks an engine operation.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

/// Default sink: one `log::info!` line per event, JSON payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: Event) {
        let envelope = Envelope {
            at: Utc::now(),
            event,
        };
        match serde_json::to_string(&envelope) {
            Ok(json) => log::info!(target: "trunkpad::events", "{json}"),
            Err(e) => log::warn!(target: "trunkpad::events", "unserializable event: {e}"),
        }
    }
}

/// Sink that drops everything. Useful in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_dotted_kind() {
        let event = Event::WorkpadPromoted {
            pad_id: "pad_12".into(),
            repo_id: "repo_34".into(),
            commit: "abc".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""kind":"workpad.promoted""#));
        assert!(json.contains(r#""commit":"abc""#));
    }

    #[test]
    fn envelope_flattens_event_fields() {
        let envelope = Envelope {
            at: Utc::now(),
            event: Event::TestsStarted {
                pad_id: "pad_1".into(),
                total: 3,
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""kind":"tests.started""#));
        assert!(json.contains(r#""total":3"#));
        assert!(json.contains(r#""at":"#));
    }

    #[test]
    fn null_sink_accepts_events() {
        NullSink.publish(Event::RepoCreated {
            repo_id: "repo_1".into(),
            name: "demo".into(),
        });
    }
}
