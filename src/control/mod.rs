//! Control channel between the CLI (or other collaborators) and the daemon
//!
//! ```json
//! // Client -> Daemon
//! {"type": "analyze_now", "repository": "api"}
//! {"type": "reload_config"}
//!
//! // Daemon -> Client
//! {"type": "accepted", "repository": "api", "submission": "queued"}
//! {"type": "reloaded", "repositories": ["api", "web"]}
//! ```

mod client;
mod protocol;
mod server;

pub use client::ControlClient;
pub use protocol::{Request, Response, StatusReply};
pub use server::{handle_request, serve, ControlHandler};
