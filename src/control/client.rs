//! Blocking control client used by the CLI

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::protocol::{Request, Response};
use crate::error::{CodewatchError, Result};

fn control_error(message: impl Into<String>) -> CodewatchError {
    CodewatchError::Control {
        message: message.into(),
    }
}

pub struct ControlClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl ControlClient {
    /// Connect to a running daemon
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let socket = addr
            .to_socket_addrs()
            .map_err(|e| control_error(format!("invalid control address {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| control_error(format!("control address {} did not resolve", addr)))?;
        let stream = TcpStream::connect_timeout(&socket, timeout).map_err(|e| {
            control_error(format!("daemon not reachable at {}: {}", addr, e))
        })?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Send one request and wait for its response line
    pub fn request(&mut self, request: &Request) -> Result<Response> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;

        let mut reply = String::new();
        let read = self.reader.read_line(&mut reply)?;
        if read == 0 {
            return Err(control_error("daemon closed the connection"));
        }
        serde_json::from_str(reply.trim_end())
            .map_err(|e| control_error(format!("malformed response: {}", e)))
    }
}
