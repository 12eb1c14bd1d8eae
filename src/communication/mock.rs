// src/communication/mock.rs - Scripted in-memory controller for tests and dry runs
use super::SerialChannel;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Produces the reply lines for one write. Receives the written text with
/// its line terminator removed.
pub type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

#[derive(Default)]
struct MockState {
    written: Vec<Vec<u8>>,
    incoming: VecDeque<String>,
    responder: Option<Responder>,
    closed: bool,
}

/// Stand-in for a GRBL board.
///
/// Clones share state, so a test can keep a handle after moving the
/// channel into a driver and inspect what was written. Reads wait until a
/// line is queued, either by the responder or by `push_line`.
#[derive(Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<MockState>>,
    notify: Arc<Notify>,
}

impl MockChannel {
    /// A channel that never answers.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let channel = Self::new();
        channel.set_responder(responder);
        channel
    }

    /// Answers every command line with `ok` and ignores real-time bytes.
    pub fn acknowledging() -> Self {
        Self::with_responder(|line| {
            if is_command_line(line) {
                vec!["ok".to_string()]
            } else {
                vec![]
            }
        })
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        self.state().responder = Some(Box::new(responder));
    }

    /// Queue a line as if the controller had sent it unprompted.
    pub fn push_line(&self, line: impl Into<String>) {
        self.state().incoming.push_back(line.into());
        self.notify.notify_one();
    }

    /// Every write, decoded, with the trailing terminator removed.
    pub fn written(&self) -> Vec<String> {
        self.state()
            .written
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).trim_end_matches(['\r', '\n']).to_string())
            .collect()
    }

    /// Only the newline-terminated command lines, excluding real-time bytes
    /// and the wake-up sequence.
    pub fn command_lines(&self) -> Vec<String> {
        self.written().into_iter().filter(|l| is_command_line(l)).collect()
    }

    pub fn raw_writes(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_command_line(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && !matches!(line.as_bytes(), [b'?' | b'!' | b'~' | 0x18])
}

#[async_trait]
impl SerialChannel for MockChannel {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let replies = {
            let mut state = self.state();
            if state.closed {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "mock channel is closed"));
            }
            state.written.push(data.to_vec());
            let text = String::from_utf8_lossy(data);
            let text = text.trim_end_matches(['\r', '\n']);
            let replies = match state.responder.as_mut() {
                Some(responder) => responder(text),
                None => vec![],
            };
            state.incoming.extend(replies.iter().cloned());
            replies
        };
        if !replies.is_empty() {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn read_line(&mut self) -> io::Result<String> {
        loop {
            {
                let mut state = self.state();
                if let Some(line) = state.incoming.pop_front() {
                    return Ok(line);
                }
                if state.closed {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "mock channel is closed"));
                }
            }
            self.notify.notified().await;
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.state().closed = true;
        self.notify.notify_one();
        Ok(())
    }
}

impl std::fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MockChannel")
            .field("written", &state.written.len())
            .field("incoming", &state.incoming)
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responder_replies_are_read_in_order() {
        let mut channel = MockChannel::with_responder(|line| {
            vec![format!("echo {}", line), "ok".to_string()]
        });
        channel.write(b"G91 G1 X1.000 F60.000\n").await.unwrap();
        assert_eq!(channel.read_line().await.unwrap(), "echo G91 G1 X1.000 F60.000");
        assert_eq!(channel.read_line().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_acknowledging_ignores_realtime_bytes() {
        let mut channel = MockChannel::acknowledging();
        let handle = channel.clone();
        channel.write(b"?").await.unwrap();
        channel.write(b"$X\n").await.unwrap();
        assert_eq!(channel.read_line().await.unwrap(), "ok");
        assert_eq!(handle.written(), vec!["?", "$X"]);
        assert_eq!(handle.command_lines(), vec!["$X"]);
    }

    #[tokio::test]
    async fn test_pushed_line_wakes_reader() {
        let mut channel = MockChannel::new();
        let handle = channel.clone();
        let reader = tokio::spawn(async move { channel.read_line().await });
        tokio::task::yield_now().await;
        handle.push_line("ALARM:1");
        assert_eq!(reader.await.unwrap().unwrap(), "ALARM:1");
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let mut channel = MockChannel::new();
        channel.close().await.unwrap();
        assert!(channel.is_closed());
        assert!(channel.write(b"ok\n").await.is_err());
        let err = channel.read_line().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
