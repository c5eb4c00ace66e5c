//! A scripted push socket.
//!
//! [`FakeSocket`] hands out in-memory connections. Frames pushed by the test
//! reach the live connection; commands sent by the engine are recorded and,
//! when the socket is linked to a [`FakeChatServer`], answered the way the
//! real server answers them.

use crate::fake_server::FakeChatServer;
use chatsync_engine::{SocketConnection, SocketConnector};
use chatsync_protocol::{PushCommand, PushEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Cloneable handle to a scripted socket endpoint.
#[derive(Clone, Default)]
pub struct FakeSocket {
    inner: Arc<Mutex<SocketState>>,
}

#[derive(Default)]
struct SocketState {
    refuse: bool,
    connects: u32,
    generation: u64,
    live: Option<mpsc::UnboundedSender<String>>,
    sent: Vec<String>,
    server: Option<FakeChatServer>,
}

impl SocketState {
    fn deliver(&self, frame: String) -> bool {
        self.live
            .as_ref()
            .map_or(false, |live| live.send(frame).is_ok())
    }
}

impl FakeSocket {
    /// Creates a socket that accepts connections and answers nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a socket that acknowledges joins and stores sent messages
    /// on `server`, echoing them back as `new_message`.
    pub fn linked(server: FakeChatServer) -> Self {
        let socket = Self::new();
        socket.inner.lock().server = Some(server);
        socket
    }

    /// Makes future connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.lock().refuse = refuse;
    }

    /// Closes the live connection from the server side.
    pub fn drop_connection(&self) {
        self.inner.lock().live = None;
    }

    /// Returns true while a connection is open.
    pub fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .live
            .as_ref()
            .is_some_and(|live| !live.is_closed())
    }

    /// Connection attempts so far, including refused ones.
    pub fn connect_count(&self) -> u32 {
        self.inner.lock().connects
    }

    /// Sends an event to the live connection. Returns false if none is open.
    pub fn push_event(&self, event: &PushEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(frame) => self.push_raw(frame),
            Err(_) => false,
        }
    }

    /// Sends a raw text frame to the live connection.
    pub fn push_raw(&self, frame: impl Into<String>) -> bool {
        self.inner.lock().deliver(frame.into())
    }

    /// Commands received so far, in order. Frames that are not commands are
    /// left out.
    pub fn sent(&self) -> Vec<PushCommand> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }
}

impl SocketConnector for FakeSocket {
    type Connection = FakeConnection;

    async fn connect(&self) -> Result<FakeConnection, String> {
        let mut state = self.inner.lock();
        state.connects += 1;
        if state.refuse {
            return Err("connection refused".to_string());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.generation += 1;
        state.live = Some(tx);
        Ok(FakeConnection {
            frames: rx,
            generation: state.generation,
            state: Arc::clone(&self.inner),
        })
    }
}

/// One connection handed out by [`FakeSocket`].
pub struct FakeConnection {
    frames: mpsc::UnboundedReceiver<String>,
    generation: u64,
    state: Arc<Mutex<SocketState>>,
}

impl SocketConnection for FakeConnection {
    async fn send(&mut self, text: String) -> Result<(), String> {
        let mut state = self.state.lock();
        if state.generation != self.generation || state.live.is_none() {
            return Err("connection closed".to_string());
        }
        state.sent.push(text.clone());

        let Some(server) = state.server.clone() else {
            return Ok(());
        };
        match serde_json::from_str::<PushCommand>(&text) {
            Ok(PushCommand::JoinChannel { channel_id, .. }) => {
                state.deliver(encode(&PushEvent::JoinedChannelOk { channel_id }));
            }
            Ok(PushCommand::SendMessage {
                channel_id,
                user_id,
                content,
            }) => {
                let author = user_id.unwrap_or_else(|| server.user_id());
                if server.channels().iter().any(|c| c.id == channel_id) {
                    let message = server.add_message(channel_id, author, &content);
                    state.deliver(encode(&PushEvent::NewMessage(message)));
                } else {
                    state.deliver(encode(&PushEvent::Error {
                        message: "Channel not found".to_string(),
                    }));
                }
            }
            Ok(PushCommand::LeaveChannel { .. }) | Err(_) => {}
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, String>> {
        self.frames.recv().await.map(Ok)
    }
}

fn encode(event: &PushEvent) -> String {
    serde_json::to_string(event).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_protocol::ChannelId;

    #[tokio::test]
    async fn joins_are_acknowledged_when_linked() {
        let socket = FakeSocket::linked(FakeChatServer::new());
        let mut conn = socket.connect().await.unwrap();

        let join = PushCommand::JoinChannel {
            channel_id: ChannelId(4),
            user_id: None,
        };
        conn.send(join.encode().unwrap()).await.unwrap();

        let frame = conn.recv().await.unwrap().unwrap();
        assert_eq!(
            PushEvent::decode(&frame).unwrap(),
            PushEvent::JoinedChannelOk {
                channel_id: ChannelId(4)
            }
        );
        assert_eq!(socket.sent(), vec![join]);
    }

    #[tokio::test]
    async fn dropped_connection_ends_the_stream() {
        let socket = FakeSocket::new();
        let mut conn = socket.connect().await.unwrap();
        socket.drop_connection();

        assert!(conn.recv().await.is_none());
        assert!(conn.send("{}".into()).await.is_err());
        assert!(!socket.push_raw("late"));
    }

    #[tokio::test]
    async fn refused_connections_are_counted() {
        let socket = FakeSocket::new();
        socket.refuse_connections(true);
        assert!(socket.connect().await.is_err());
        assert_eq!(socket.connect_count(), 1);
    }
}
