//! Control server: newline-delimited JSON over localhost TCP

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use super::protocol::{Request, Response, StatusReply};
use crate::error::Result;
use crate::orchestrator::Submission;

/// Daemon operations reachable from the control channel
///
/// Methods may block (a reload rebuilds HTTP clients), so the server always
/// calls them from the blocking thread pool.
pub trait ControlHandler: Send + Sync + 'static {
    fn status(&self) -> StatusReply;
    fn analyze_now(&self, repository: &str) -> Result<Submission>;
    /// Returns the repository names now configured
    fn reload_config(&self) -> Result<Vec<String>>;
    fn shutdown(&self);
}

/// Dispatch one request
pub fn handle_request(handler: &dyn ControlHandler, request: Request) -> Response {
    match request {
        Request::Ping => Response::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        Request::Status => Response::Status(handler.status()),
        Request::AnalyzeNow { repository } => match handler.analyze_now(&repository) {
            Ok(submission) => Response::Accepted {
                repository,
                submission,
            },
            Err(e) => Response::error(e.to_string()),
        },
        Request::ReloadConfig => match handler.reload_config() {
            Ok(repositories) => Response::Reloaded { repositories },
            Err(e) => Response::error(e.to_string()),
        },
        Request::Shutdown => {
            handler.shutdown();
            Response::ShuttingDown
        }
    }
}

/// Accept connections until `shutdown` flips to true
pub async fn serve(
    listener: TcpListener,
    handler: Arc<dyn ControlHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("[CONTROL] Listening on {}", addr);
    }
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("[CONTROL] Connection from {}", peer);
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, handler).await {
                            tracing::debug!("[CONTROL] Connection closed: {}", e);
                        }
                    });
                }
                Err(e) => tracing::error!("[CONTROL] Failed to accept connection: {}", e),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("[CONTROL] Stopped");
}

async fn handle_connection(stream: TcpStream, handler: Arc<dyn ControlHandler>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                tracing::debug!("[CONTROL] {:?}", request);
                let handler = Arc::clone(&handler);
                tokio::task::spawn_blocking(move || handle_request(handler.as_ref(), request))
                    .await
                    .unwrap_or_else(|e| Response::error(format!("request handler failed: {}", e)))
            }
            Err(e) => Response::error(format!("invalid request: {}", e)),
        };

        let mut json = serde_json::to_string(&response)
            .unwrap_or_else(|e| format!(r#"{{"type":"error","message":"{}"}}"#, e));
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
