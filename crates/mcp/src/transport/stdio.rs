//! Subprocess transport: line-delimited JSON-RPC over the child's stdio.

use super::{INBOUND_BUFFER, Transport};
use crate::jsonrpc::Frame;
use async_trait::async_trait;
use chrono::Utc;
use rago_config::{ServerDescriptor, TransportSpec};
use rago_core::error::TransportError;
use rago_core::{DomainEvent, EventBus};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

pub struct StdioTransport {
    name: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    events: Option<Arc<EventBus>>,
    child: Mutex<Option<Child>>,
    writer: Mutex<Option<BufWriter<ChildStdin>>>,
}

impl StdioTransport {
    pub fn new(descriptor: ServerDescriptor) -> Result<Self, TransportError> {
        let TransportSpec::Stdio {
            command,
            args,
            env,
            working_dir,
        } = descriptor.transport
        else {
            return Err(TransportError::Protocol {
                server: descriptor.name,
                message: "descriptor is not a stdio server".into(),
            });
        };
        Ok(Self {
            name: descriptor.name,
            command,
            args,
            env,
            working_dir,
            events: None,
            child: Mutex::new(None),
            writer: Mutex::new(None),
        })
    }

    /// Forward stderr lines as `ServerDiagnostic` events.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    fn server(&self) -> &str {
        &self.name
    }

    fn io_error(&self, message: impl Into<String>) -> TransportError {
        TransportError::Io {
            server: self.server().to_string(),
            message: message.into(),
        }
    }

    fn command(&self) -> Command {
        // The child inherits our environment plus the descriptor's overrides.
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Read one `\n`-terminated line. Bytes that are not UTF-8 are replaced
/// rather than failing the read, so a noisy child keeps its pipes.
async fn next_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> &'static str {
        "stdio"
    }

    async fn open(&self) -> Result<mpsc::Receiver<Frame>, TransportError> {
        let mut child_slot = self.child.lock().await;
        if child_slot.is_some() {
            return Err(TransportError::Protocol {
                server: self.server().to_string(),
                message: "transport already open".into(),
            });
        }

        let mut child = self.command().spawn().map_err(|e| TransportError::Spawn {
            server: self.server().to_string(),
            message: e.to_string(),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.io_error("failed to capture server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.io_error("failed to capture server stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.io_error("failed to capture server stderr"))?;

        debug!(server = %self.server(), pid = ?child.id(), "Spawned stdio server");
        *self.writer.lock().await = Some(BufWriter::new(stdin));
        *child_slot = Some(child);

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);

        // stdout: one frame per line. EOF drops `tx`, which closes the channel.
        let server = self.server().to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                match next_line_lossy(&mut reader, &mut buf).await {
                    Ok(Some(raw)) => {
                        let line = raw.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if line.starts_with('\u{1b}') {
                            debug!(server = %server, line, "Skipping ANSI log line on stdout");
                            continue;
                        }
                        match Frame::decode(line) {
                            Ok(frame) => {
                                if tx.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Err(reason) => {
                                warn!(server = %server, line, %reason, "Invalid frame from server");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(server = %server, error = %e, "Failed reading server stdout");
                        break;
                    }
                }
            }
            debug!(server = %server, "Server stdout closed");
        });

        // stderr: diagnostics only, never part of the frame stream.
        let server = self.server().to_string();
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            loop {
                let line = match next_line_lossy(&mut reader, &mut buf).await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(server = %server, error = %e, "Failed reading server stderr");
                        break;
                    }
                };
                debug!(server = %server, line = %line, "Server stderr");
                if let Some(events) = &events {
                    events.publish(DomainEvent::ServerDiagnostic {
                        server: server.clone(),
                        line,
                        timestamp: Utc::now(),
                    });
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let mut encoded = frame.encode();
        encoded.push('\n');

        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or_else(|| TransportError::NotOpen {
            server: self.server().to_string(),
        })?;
        let closed = |_| TransportError::Closed {
            server: self.server().to_string(),
        };
        stream.write_all(encoded.as_bytes()).await.map_err(closed)?;
        stream.flush().await.map_err(closed)?;
        Ok(())
    }

    async fn close(&self) {
        self.writer.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!(server = %self.server(), error = %e, "Kill failed (process may have exited)");
            }
            let _ = child.wait().await;
            debug!(server = %self.server(), "Stdio server stopped");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn sh(name: &str, script: &str) -> ServerDescriptor {
        ServerDescriptor::stdio(name, "sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn echoes_frames_line_by_line() {
        // `cat` echoes every frame straight back.
        let transport = StdioTransport::new(sh("echo", "cat")).unwrap();
        let mut rx = transport.open().await.unwrap();

        transport
            .send(Frame::notification("hello", json!({"n": 1})))
            .await
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.method(), Some("hello"));
        transport.close().await;
    }

    #[tokio::test]
    async fn child_exit_closes_channel() {
        let transport = StdioTransport::new(sh("short", "exit 0")).unwrap();
        let mut rx = transport.open().await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn stderr_becomes_diagnostics() {
        let events = Arc::new(EventBus::new(16));
        let mut sub = events.subscribe();
        let transport = StdioTransport::new(sh("noisy", "echo warming up >&2; sleep 5"))
            .unwrap()
            .with_events(Arc::clone(&events));
        let _rx = transport.open().await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        match event.as_ref() {
            DomainEvent::ServerDiagnostic { server, line, .. } => {
                assert_eq!(server, "noisy");
                assert_eq!(line, "warming up");
            }
            other => panic!("unexpected event {other:?}"),
        }
        transport.close().await;
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_close_pipes() {
        // A bad byte on both pipes, then enough stderr to fill an undrained pipe.
        let script = r#"printf '\377\n' >&2
printf '\377\n'
i=0
while [ $i -lt 4000 ]; do
  echo "diagnostic line number $i padded to a reasonable length" >&2
  i=$((i+1))
done
exec cat"#;
        let transport = StdioTransport::new(sh("binary", script)).unwrap();
        let mut rx = transport.open().await.unwrap();

        transport
            .send(Frame::notification("still_alive", json!({})))
            .await
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.method(), Some("still_alive"));
        transport.close().await;
    }

    #[tokio::test]
    async fn lossy_line_reader_replaces_bad_bytes() {
        let mut reader = BufReader::new(&b"ok\r\n\xffx\n"[..]);
        let mut buf = Vec::new();
        assert_eq!(next_line_lossy(&mut reader, &mut buf).await.unwrap().as_deref(), Some("ok"));
        assert_eq!(
            next_line_lossy(&mut reader, &mut buf).await.unwrap().as_deref(),
            Some("\u{fffd}x")
        );
        assert_eq!(next_line_lossy(&mut reader, &mut buf).await.unwrap(), None);
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let descriptor = ServerDescriptor::stdio("ghost", "/definitely/not/a/binary", vec![]);
        let err = StdioTransport::new(descriptor).unwrap().open().await.unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }

    #[tokio::test]
    async fn send_before_open_fails() {
        let transport = StdioTransport::new(sh("idle", "cat")).unwrap();
        let err = transport
            .send(Frame::notification("x", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotOpen { .. }));
    }
}
