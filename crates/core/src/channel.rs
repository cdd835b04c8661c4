//! Streaming channel handler
//!
//! One tokio task per running session owns the session's duplex channel.
//! Callers talk to it through a cheap `ChannelHandle` (commands over mpsc,
//! acknowledgements over oneshot) and observe it through `SessionEvent`s.
//! The task never reconnects; a new session must be started instead.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use iapadmin_protocol::{ControlMessage, Instance, OutputMessage, PreparedOperation};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::registry::SessionId;

// ---------------------------------------------------------------------------
// Transport seams
// ---------------------------------------------------------------------------

/// Write half of a channel
#[async_trait]
pub trait ChannelSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Read half of a channel. `None` means the peer closed it.
#[async_trait]
pub trait ChannelStream: Send {
    async fn next_text(&mut self) -> Option<Result<String>>;
}

/// An open duplex channel, already split
pub struct ChannelTransport {
    pub sink: Box<dyn ChannelSink>,
    pub stream: Box<dyn ChannelStream>,
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<ChannelTransport>;
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

type WsSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<ChannelTransport> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|err| ClientError::Unreachable {
                detail: err.to_string(),
            })?;
        let (sink, stream) = socket.split();
        info!(
            component = "channel",
            event = "channel.connected",
            url = %url,
            "Channel connected"
        );
        Ok(ChannelTransport {
            sink: Box::new(WsSink(sink)),
            stream: Box::new(WsStream(stream)),
        })
    }
}

struct WsSink(SplitSink<WsSocket, Message>);

#[async_trait]
impl ChannelSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.0.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.0.close().await?;
        Ok(())
    }
}

struct WsStream(SplitStream<WsSocket>);

#[async_trait]
impl ChannelStream for WsStream {
    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_string())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => continue,
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(err) => match ClientError::from(err) {
                    ClientError::ChannelClosed => return None,
                    other => return Some(Err(other)),
                },
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session log
// ---------------------------------------------------------------------------

/// Rewrite every whitespace character as a non-breaking-space marker so
/// output keeps its layout when rendered as markup.
pub fn render_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_whitespace() {
            out.push_str("&#160;");
        } else {
            out.push(ch);
        }
    }
    out
}

/// Ordered, unbounded output of one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionLog {
    entries: Vec<OutputMessage>,
}

impl SessionLog {
    pub fn push(&mut self, message: OutputMessage) {
        self.entries.push(message);
    }

    pub fn entries(&self) -> &[OutputMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with whitespace rewritten for literal markup rendering
    pub fn rendered(&self) -> Vec<OutputMessage> {
        self.entries
            .iter()
            .map(|m| OutputMessage {
                message: render_whitespace(&m.message),
                stdout: render_whitespace(&m.stdout),
                stderr: render_whitespace(&m.stderr),
                error: m.error.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Events and commands
// ---------------------------------------------------------------------------

/// What a channel task reports back to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The opening message was written
    Opened { session: SessionId },
    Frame {
        session: SessionId,
        message: OutputMessage,
    },
    /// Transport failure; the task has stopped
    Errored { session: SessionId, message: String },
    /// The task has stopped after a close from either side
    Closed { session: SessionId },
}

impl SessionEvent {
    pub fn session(&self) -> &SessionId {
        match self {
            SessionEvent::Opened { session }
            | SessionEvent::Frame { session, .. }
            | SessionEvent::Errored { session, .. }
            | SessionEvent::Closed { session } => session,
        }
    }
}

/// First message written on a new channel
#[derive(Debug, Clone, PartialEq)]
pub enum Opening {
    Operation(PreparedOperation),
    Rdp(Instance),
}

impl Opening {
    fn target(&self) -> ChannelTarget {
        match self {
            Opening::Operation(prepared) => ChannelTarget::Operation {
                hash: prepared.hash.clone(),
            },
            Opening::Rdp(instance) => ChannelTarget::Rdp {
                instance: instance.name.clone(),
            },
        }
    }

    fn to_text(&self) -> Result<String> {
        Ok(match self {
            Opening::Operation(prepared) => serde_json::to_string(prepared)?,
            Opening::Rdp(instance) => serde_json::to_string(instance)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChannelTarget {
    Operation { hash: String },
    Rdp { instance: String },
}

enum ChannelCommand {
    /// Write the end-operation message, then stop
    EndOperation {
        message: ControlMessage,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Write the end-RDP message and keep listening for the shutdown
    EndRdp {
        message: ControlMessage,
        reply: oneshot::Sender<Result<()>>,
    },
    Credentials {
        message: ControlMessage,
        reply: oneshot::Sender<Result<()>>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running channel task (cheap to Clone).
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    session: SessionId,
    target: ChannelTarget,
    command_tx: mpsc::Sender<ChannelCommand>,
}

impl ChannelHandle {
    /// Open a channel at `url`, write `opening` and spawn the task that owns it.
    pub async fn open(
        connector: &dyn ChannelConnector,
        url: &str,
        session: SessionId,
        opening: Opening,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<ChannelHandle> {
        let transport = connector.connect(url).await?;
        Ok(Self::spawn(transport, session, opening, events))
    }

    /// Spawn the task for an already connected transport.
    pub fn spawn(
        transport: ChannelTransport,
        session: SessionId,
        opening: Opening,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> ChannelHandle {
        let (command_tx, command_rx) = mpsc::channel(16);
        let target = opening.target();

        tokio::spawn(channel_loop(
            transport,
            session.clone(),
            opening,
            command_rx,
            events,
        ));

        ChannelHandle {
            session,
            target,
            command_tx,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// End an operation session. Resolves once the end message is written.
    pub async fn request_close(&self) -> Result<()> {
        let ChannelTarget::Operation { hash } = &self.target else {
            return self.request_end_rdp().await;
        };
        let message = ControlMessage::end_operation(hash.clone());
        self.call(|reply| ChannelCommand::EndOperation { message, reply })
            .await
    }

    /// Ask the server to tear down the RDP tunnel. The channel stays open
    /// until the server closes it.
    pub async fn request_end_rdp(&self) -> Result<()> {
        let ChannelTarget::Rdp { instance } = &self.target else {
            return Err(ClientError::Channel(
                "not a private RDP session".to_string(),
            ));
        };
        let message = ControlMessage::end_rdp(instance.clone());
        self.call(|reply| ChannelCommand::EndRdp { message, reply })
            .await
    }

    /// Send RDP credentials once the server is ready for a command.
    pub async fn send_credentials(&self, username: &str, password: &str) -> Result<()> {
        let message = ControlMessage::start_rdp(username, password);
        self.call(|reply| ChannelCommand::Credentials { message, reply })
            .await
    }

    async fn call(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<()>>) -> ChannelCommand,
    ) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.command_tx.send(build(reply_tx)).await.is_err() {
            warn!(
                component = "channel",
                session_id = %self.session,
                "Channel task gone, command dropped"
            );
            return Err(ClientError::ChannelClosed);
        }
        reply_rx.await.map_err(|_| ClientError::ChannelClosed)?
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

async fn channel_loop(
    transport: ChannelTransport,
    session: SessionId,
    opening: Opening,
    mut command_rx: mpsc::Receiver<ChannelCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let ChannelTransport {
        mut sink,
        mut stream,
    } = transport;

    let opened = match opening.to_text() {
        Ok(text) => sink.send_text(text).await,
        Err(err) => Err(err),
    };
    if let Err(err) = opened {
        warn!(
            component = "channel",
            event = "channel.open_failed",
            session_id = %session,
            error = %err,
            "Failed to write opening message"
        );
        emit(
            &events,
            SessionEvent::Errored {
                session,
                message: err.user_message(),
            },
        );
        return;
    }
    emit(&events, SessionEvent::Opened {
        session: session.clone(),
    });

    loop {
        tokio::select! {
            frame = stream.next_text() => match frame {
                Some(Ok(text)) => {
                    debug!(
                        component = "channel",
                        event = "channel.frame",
                        session_id = %session,
                        bytes = text.len(),
                        "Frame received"
                    );
                    let message = parse_frame(&text);
                    emit(&events, SessionEvent::Frame {
                        session: session.clone(),
                        message,
                    });
                }
                Some(Err(err)) => {
                    warn!(
                        component = "channel",
                        event = "channel.errored",
                        session_id = %session,
                        error = %err,
                        "Channel errored"
                    );
                    emit(&events, SessionEvent::Errored {
                        session: session.clone(),
                        message: err.user_message(),
                    });
                    return;
                }
                None => {
                    info!(
                        component = "channel",
                        event = "channel.closed",
                        session_id = %session,
                        "Channel closed by server"
                    );
                    break;
                }
            },

            command = command_rx.recv() => match command {
                Some(ChannelCommand::EndOperation { message, reply }) => {
                    let result = send_control(sink.as_mut(), &message).await;
                    let _ = sink.close().await;
                    let _ = reply.send(result);
                    info!(
                        component = "channel",
                        event = "channel.ended",
                        session_id = %session,
                        "Operation ended"
                    );
                    break;
                }
                Some(ChannelCommand::EndRdp { message, reply }) => {
                    let _ = reply.send(send_control(sink.as_mut(), &message).await);
                }
                Some(ChannelCommand::Credentials { message, reply }) => {
                    let _ = reply.send(send_control(sink.as_mut(), &message).await);
                }
                None => {
                    // every handle dropped
                    let _ = sink.close().await;
                    break;
                }
            },
        }
    }

    emit(&events, SessionEvent::Closed { session });
}

async fn send_control(sink: &mut dyn ChannelSink, message: &ControlMessage) -> Result<()> {
    let text = serde_json::to_string(message)?;
    sink.send_text(text).await
}

/// Decode a frame; text that is not a JSON frame is kept as a plain message.
fn parse_frame(text: &str) -> OutputMessage {
    serde_json::from_str(text).unwrap_or_else(|_| OutputMessage {
        message: text.to_string(),
        ..OutputMessage::default()
    })
}

fn emit(events: &mpsc::UnboundedSender<SessionEvent>, event: SessionEvent) {
    if events.send(event).is_err() {
        debug!(
            component = "channel",
            "Event receiver dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_pair;
    use serde_json::{json, Value};

    fn session() -> SessionId {
        SessionId::from("session-1")
    }

    fn prepared() -> PreparedOperation {
        serde_json::from_value(json!({
            "operation": "gcloud compute instances reset vm1",
            "hash": "abc123",
            "status": "ready",
            "RealtimeOutput": true,
            "name": "reboot"
        }))
        .unwrap()
    }

    #[test]
    fn whitespace_is_rewritten() {
        assert_eq!(render_whitespace("a b\tc\n"), "a&#160;b&#160;c&#160;");
        assert_eq!(render_whitespace("none"), "none");
    }

    #[test]
    fn log_renders_output_fields() {
        let mut log = SessionLog::default();
        log.push(OutputMessage {
            stdout: "NAME  ZONE".into(),
            error: "keep as is".into(),
            ..OutputMessage::default()
        });
        let rendered = log.rendered();
        assert_eq!(rendered[0].stdout, "NAME&#160;&#160;ZONE");
        assert_eq!(rendered[0].error, "keep as is");
        assert_eq!(log.entries()[0].stdout, "NAME  ZONE");
    }

    #[test]
    fn plain_text_frames_become_messages() {
        assert_eq!(parse_frame("hello").message, "hello");
        assert_eq!(parse_frame(r#"{"messsage": "typo"}"#).message, "typo");
    }

    #[tokio::test]
    async fn operation_channel_sends_payload_streams_and_ends() {
        let (transport, mut server) = memory_pair();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handle = ChannelHandle::spawn(
            transport,
            session(),
            Opening::Operation(prepared()),
            events_tx,
        );

        let opening: Value = serde_json::from_str(&server.recv().await.unwrap()).unwrap();
        assert_eq!(opening["hash"], "abc123");
        assert_eq!(opening["name"], "reboot");
        assert_eq!(opening["RealtimeOutput"], true);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Opened { session: session() });

        server.send_json(json!({"stdout": "rebooting", "message": "", "stderr": "", "error": ""}));
        match events.recv().await.unwrap() {
            SessionEvent::Frame { message, .. } => assert_eq!(message.stdout, "rebooting"),
            other => panic!("expected frame, got {other:?}"),
        }

        handle.request_close().await.unwrap();
        let end: Value = serde_json::from_str(&server.recv().await.unwrap()).unwrap();
        assert_eq!(end, json!({"cmd": "end_operation", "hash": "abc123"}));
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Closed { session: session() });

        assert!(matches!(
            handle.request_close().await,
            Err(ClientError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn rdp_channel_keeps_listening_after_end() {
        let (transport, mut server) = memory_pair();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let instance = Instance {
            name: "vm1".into(),
            ..Instance::default()
        };
        let handle = ChannelHandle::spawn(transport, session(), Opening::Rdp(instance), events_tx);

        let opening: Value = serde_json::from_str(&server.recv().await.unwrap()).unwrap();
        assert_eq!(opening["name"], "vm1");
        events.recv().await.unwrap();

        handle.send_credentials("admin", "hunter2").await.unwrap();
        let creds: Value = serde_json::from_str(&server.recv().await.unwrap()).unwrap();
        assert_eq!(creds["cmd"], "start-rdp");
        assert_eq!(creds["username"], "admin");

        handle.request_end_rdp().await.unwrap();
        let end: Value = serde_json::from_str(&server.recv().await.unwrap()).unwrap();
        assert_eq!(end, json!({"cmd": "end", "name": "vm1"}));

        server.send_json(json!({"message": "Shutdown private RDP for vm1"}));
        match events.recv().await.unwrap() {
            SessionEvent::Frame { message, .. } => {
                assert_eq!(message.message, "Shutdown private RDP for vm1")
            }
            other => panic!("expected frame, got {other:?}"),
        }

        server.close();
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Closed { session: session() });
    }

    #[tokio::test]
    async fn transport_error_is_distinct_from_close() {
        let (transport, mut server) = memory_pair();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let _handle = ChannelHandle::spawn(
            transport,
            session(),
            Opening::Operation(prepared()),
            events_tx,
        );
        server.recv().await.unwrap();
        events.recv().await.unwrap();

        server.fail("connection reset");
        match events.recv().await.unwrap() {
            SessionEvent::Errored { message, .. } => assert!(message.contains("connection reset")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_is_served_while_output_piles_up() {
        let (transport, mut server) = memory_pair();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handle = ChannelHandle::spawn(
            transport,
            session(),
            Opening::Operation(prepared()),
            events_tx,
        );
        server.recv().await.unwrap();

        for i in 0..400 {
            server.send_json(json!({"stdout": format!("line {i}")}));
        }
        // nobody drains `events` until the close is acknowledged
        tokio::time::timeout(std::time::Duration::from_secs(3), handle.request_close())
            .await
            .expect("close acknowledged")
            .unwrap();

        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        assert_eq!(last, Some(SessionEvent::Closed { session: session() }));
    }

    #[tokio::test]
    async fn end_rdp_on_operation_channel_is_rejected() {
        let (transport, _server) = memory_pair();
        let (events_tx, _events) = mpsc::unbounded_channel();
        let handle = ChannelHandle::spawn(
            transport,
            session(),
            Opening::Operation(prepared()),
            events_tx,
        );
        assert!(matches!(
            handle.request_end_rdp().await,
            Err(ClientError::Channel(_))
        ));
    }
}
