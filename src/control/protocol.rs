//! Control protocol message types
//!
//! One JSON object per line in each direction, tagged by `type`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::orchestrator::{ScheduleState, Submission};
use crate::pipeline::DaemonStatus;

/// Client-to-daemon request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Status,
    /// Bypass the debounce window; still respects the per-repository lock
    AnalyzeNow {
        repository: String,
    },
    ReloadConfig,
    Shutdown,
}

/// Daemon-to-client response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong {
        version: String,
    },
    Status(StatusReply),
    Accepted {
        repository: String,
        submission: Submission,
    },
    Reloaded {
        repositories: Vec<String>,
    },
    ShuttingDown,
    Error {
        message: String,
    },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Live daemon state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReply {
    pub daemon: DaemonStatus,
    /// Scheduler view per repository
    pub schedule: BTreeMap<String, ScheduleState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request: Request =
            serde_json::from_str(r#"{"type":"analyze_now","repository":"api"}"#).unwrap();
        assert_eq!(
            request,
            Request::AnalyzeNow {
                repository: "api".to_string()
            }
        );
        assert_eq!(
            serde_json::to_string(&Request::ReloadConfig).unwrap(),
            r#"{"type":"reload_config"}"#
        );
        assert!(serde_json::from_str::<Request>(r#"{"type":"explode"}"#).is_err());
    }

    #[test]
    fn test_response_wire_format() {
        let accepted = Response::Accepted {
            repository: "api".to_string(),
            submission: Submission::Coalesced,
        };
        assert_eq!(
            serde_json::to_value(&accepted).unwrap(),
            serde_json::json!({"type": "accepted", "repository": "api", "submission": "coalesced"})
        );

        let mut reply = StatusReply::default();
        reply
            .schedule
            .insert("api".to_string(), ScheduleState::Running { rerun: true });
        let value = serde_json::to_value(Response::Status(reply.clone())).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["schedule"]["api"]["state"], "running");
        let back: Response = serde_json::from_value(value).unwrap();
        assert_eq!(back, Response::Status(reply));
    }
}
