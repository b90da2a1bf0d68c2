//! Session client: state machine, id allocation, and reply correlation.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::lsp::error::ProbeError;
use crate::lsp::transport::Transport;
use crate::lsp::types::{ErrorObject, Message, Notification, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Initialized,
    Active,
    Closed,
}

/// Bookkeeping for a request whose reply has not arrived yet.
#[derive(Debug)]
pub struct PendingRequest {
    pub method: String,
    pub sent_at: Instant,
}

/// A correlated reply, tagged with the method of the request it answers.
#[derive(Debug)]
pub enum Reply {
    Success {
        id: i64,
        method: String,
        result: Value,
    },
    Failure {
        id: i64,
        method: String,
        error: ErrorObject,
    },
}

pub struct SessionClient {
    transport: Box<dyn Transport>,
    state: SessionState,
    pending: HashMap<i64, PendingRequest>,
    next_id: i64,
    inbox: VecDeque<Notification>,
}

impl SessionClient {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        SessionClient {
            transport,
            state: SessionState::Uninitialized,
            pending: HashMap::new(),
            next_id: 1,
            inbox: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send a request and record it in the pending table. Only `initialize`
    /// may be sent before the session is Active.
    pub async fn send_request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<i64, ProbeError> {
        let next_state = match (self.state, method) {
            (SessionState::Uninitialized, "initialize") => Some(SessionState::Initializing),
            (SessionState::Active, _) => None,
            (state, _) => {
                return Err(ProbeError::Protocol(format!(
                    "cannot send '{method}' request while {state:?}"
                )))
            }
        };

        let id = self.next_id;
        self.next_id += 1;

        let payload = serde_json::to_string(&Request::new(id, method, params))?;
        self.write(&payload).await?;
        self.pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                sent_at: Instant::now(),
            },
        );
        if let Some(state) = next_state {
            self.state = state;
        }
        debug!(method, id, "request sent");
        Ok(id)
    }

    /// Send a notification. Valid once the handshake reply is in;
    /// `initialized` itself completes the handshake.
    pub async fn send_notification(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ProbeError> {
        let next_state = match (self.state, method) {
            (SessionState::Initialized, "initialized") => Some(SessionState::Active),
            (SessionState::Initialized, _) | (SessionState::Active, _) => None,
            (state, _) => {
                return Err(ProbeError::Protocol(format!(
                    "cannot send '{method}' notification while {state:?}"
                )))
            }
        };

        let payload = serde_json::to_string(&Notification::new(method, params))?;
        self.write(&payload).await?;
        if let Some(state) = next_state {
            self.state = state;
        }
        debug!(method, "notification sent");
        Ok(())
    }

    /// Block until a frame arrives whose id is in the pending table, or the
    /// timeout elapses. Notifications arriving meanwhile are queued into the
    /// out-of-band inbox and never returned as the awaited reply.
    pub async fn await_reply(&mut self, timeout: Duration) -> Result<Reply, ProbeError> {
        if self.pending.is_empty() {
            return Err(ProbeError::Protocol("no request in flight".to_string()));
        }
        let waiting_on = self
            .pending
            .values()
            .map(|entry| entry.method.clone())
            .collect::<Vec<_>>()
            .join(", ");

        match tokio::time::timeout(timeout, self.next_reply()).await {
            Ok(reply) => reply,
            Err(_) => Err(ProbeError::Timeout {
                method: waiting_on,
                waited: timeout,
            }),
        }
    }

    /// Drain notifications that arrived while awaiting replies, in arrival
    /// order.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.inbox.drain(..).collect()
    }

    /// Tear the session down. Pending entries are discarded with it.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.pending.clear();
    }

    async fn next_reply(&mut self) -> Result<Reply, ProbeError> {
        loop {
            let message = match self.transport.recv().await {
                Ok(message) => message,
                Err(e) => {
                    if e.is_fatal() {
                        self.state = SessionState::Closed;
                    }
                    return Err(e);
                }
            };
            // Zero-length frame: nothing was produced this cycle.
            let Some(message) = message else { continue };

            match message {
                Message::Notification(notification) => {
                    debug!(method = %notification.method, "queued out-of-band notification");
                    self.inbox.push_back(notification);
                }
                Message::Response(response) => {
                    let (id, entry) = self.match_pending(&response.id)?;
                    debug!(
                        id,
                        method = %entry.method,
                        elapsed = ?entry.sent_at.elapsed(),
                        "reply received"
                    );
                    self.note_initialize_reply(&entry);
                    return Ok(Reply::Success {
                        id,
                        method: entry.method,
                        result: response.result,
                    });
                }
                Message::Error(reply) => {
                    let (id, entry) = self.match_pending(&reply.id)?;
                    warn!(
                        id,
                        method = %entry.method,
                        code = reply.error.code,
                        "error reply received"
                    );
                    self.note_initialize_reply(&entry);
                    return Ok(Reply::Failure {
                        id,
                        method: entry.method,
                        error: reply.error,
                    });
                }
            }
        }
    }

    /// Correlate a raw reply id against the pending table. The entry is
    /// consumed, so an id can be matched at most once.
    fn match_pending(&mut self, raw_id: &Value) -> Result<(i64, PendingRequest), ProbeError> {
        let id = raw_id
            .as_i64()
            .ok_or_else(|| ProbeError::Protocol(format!("reply id is not an integer: {raw_id}")))?;
        let entry = self
            .pending
            .remove(&id)
            .ok_or_else(|| ProbeError::Protocol(format!("unsolicited reply for unknown id {id}")))?;
        Ok((id, entry))
    }

    fn note_initialize_reply(&mut self, entry: &PendingRequest) {
        if self.state == SessionState::Initializing && entry.method == "initialize" {
            self.state = SessionState::Initialized;
        }
    }

    async fn write(&mut self, payload: &str) -> Result<(), ProbeError> {
        let result = self.transport.send(payload).await;
        if let Err(ref e) = result {
            if e.is_fatal() {
                self.state = SessionState::Closed;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::codec;
    use crate::lsp::transport::ChannelTransport;
    use serde_json::{json, Value};
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn session_pair() -> (
        SessionClient,
        ReadHalf<DuplexStream>,
        WriteHalf<DuplexStream>,
    ) {
        let (client_end, server_end) = duplex(16 * 1024);
        let (reader, writer) = tokio::io::split(client_end);
        let session = SessionClient::new(Box::new(ChannelTransport::new(reader, writer)));
        let (server_reader, server_writer) = tokio::io::split(server_end);
        (session, server_reader, server_writer)
    }

    async fn read_client_message(reader: &mut ReadHalf<DuplexStream>) -> Value {
        loop {
            if let Some(payload) = codec::read_frame(reader).await.unwrap() {
                return serde_json::from_slice(&payload).unwrap();
            }
        }
    }

    async fn reply_ok(writer: &mut WriteHalf<DuplexStream>, id: i64, result: Value) {
        codec::write_message(writer, &json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .await
            .unwrap();
    }

    /// Runs the handshake and consumes everything it writes to the server
    /// side, leaving the session Active and the pipe empty.
    async fn drive_handshake(
        session: &mut SessionClient,
        reader: &mut ReadHalf<DuplexStream>,
        writer: &mut WriteHalf<DuplexStream>,
    ) {
        let id = session
            .send_request("initialize", Some(json!({})))
            .await
            .unwrap();
        assert_eq!(
            read_client_message(reader).await["method"],
            json!("initialize")
        );

        reply_ok(writer, id, json!({"capabilities": {}})).await;
        assert!(matches!(
            session.await_reply(TIMEOUT).await.unwrap(),
            Reply::Success { .. }
        ));
        assert_eq!(session.state(), SessionState::Initialized);

        session
            .send_notification("initialized", Some(json!({})))
            .await
            .unwrap();
        assert_eq!(
            read_client_message(reader).await["method"],
            json!("initialized")
        );
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn ids_are_strictly_monotonic() {
        let (mut session, mut reader, mut writer) = session_pair();
        drive_handshake(&mut session, &mut reader, &mut writer).await;

        let first = session
            .send_request("textDocument/completion", Some(json!({})))
            .await
            .unwrap();
        let second = session
            .send_request("textDocument/hover", Some(json!({})))
            .await
            .unwrap();
        assert!(second > first);
        assert_eq!(session.pending_count(), 2);
    }

    #[tokio::test]
    async fn replies_match_out_of_order() {
        let (mut session, mut reader, mut writer) = session_pair();
        drive_handshake(&mut session, &mut reader, &mut writer).await;

        let first = session
            .send_request("textDocument/completion", Some(json!({})))
            .await
            .unwrap();
        let second = session
            .send_request("textDocument/hover", Some(json!({})))
            .await
            .unwrap();

        reply_ok(&mut writer, second, json!({"contents": "doc"})).await;
        reply_ok(&mut writer, first, json!([])).await;

        match session.await_reply(TIMEOUT).await.unwrap() {
            Reply::Success { id, method, .. } => {
                assert_eq!(id, second);
                assert_eq!(method, "textDocument/hover");
            }
            other => panic!("expected success, got {other:?}"),
        }
        match session.await_reply(TIMEOUT).await.unwrap() {
            Reply::Success { id, method, .. } => {
                assert_eq!(id, first);
                assert_eq!(method, "textDocument/completion");
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn request_before_initialize_is_protocol_error() {
        let (mut session, _reader, _writer) = session_pair();

        let err = session
            .send_request("textDocument/completion", Some(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Protocol(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn notification_before_handshake_is_protocol_error() {
        let (mut session, _reader, _writer) = session_pair();

        let err = session
            .send_notification("textDocument/didOpen", Some(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Protocol(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn unsolicited_reply_is_reported_and_leaves_pending_intact() {
        let (mut session, mut reader, mut writer) = session_pair();

        let id = session
            .send_request("initialize", Some(json!({})))
            .await
            .unwrap();
        let _ = read_client_message(&mut reader).await;

        reply_ok(&mut writer, 99, json!({})).await;
        let err = session.await_reply(TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ProbeError::Protocol(_)), "got {err:?}");
        assert_eq!(session.pending_count(), 1);

        reply_ok(&mut writer, id, json!({"capabilities": {}})).await;
        assert!(matches!(
            session.await_reply(TIMEOUT).await.unwrap(),
            Reply::Success { .. }
        ));
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn non_integer_reply_id_is_protocol_error() {
        let (mut session, mut reader, mut writer) = session_pair();

        session
            .send_request("initialize", Some(json!({})))
            .await
            .unwrap();
        let _ = read_client_message(&mut reader).await;

        codec::write_message(
            &mut writer,
            &json!({"jsonrpc": "2.0", "id": "abc", "result": {}}),
        )
        .await
        .unwrap();

        let err = session.await_reply(TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ProbeError::Protocol(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn notifications_are_queued_not_returned_as_replies() {
        let (mut session, mut reader, mut writer) = session_pair();

        let id = session
            .send_request("initialize", Some(json!({})))
            .await
            .unwrap();
        let _ = read_client_message(&mut reader).await;

        codec::write_message(
            &mut writer,
            &json!({"jsonrpc": "2.0", "method": "window/logMessage", "params": {"message": "hi"}}),
        )
        .await
        .unwrap();
        reply_ok(&mut writer, id, json!({"capabilities": {}})).await;

        assert!(matches!(
            session.await_reply(TIMEOUT).await.unwrap(),
            Reply::Success { .. }
        ));

        let queued = session.take_notifications();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].method, "window/logMessage");
        assert!(session.take_notifications().is_empty());
    }

    #[tokio::test]
    async fn zero_length_frames_are_skipped_while_awaiting() {
        let (mut session, mut reader, mut writer) = session_pair();

        let id = session
            .send_request("initialize", Some(json!({})))
            .await
            .unwrap();
        let _ = read_client_message(&mut reader).await;

        writer.write_all(b"Content-Length: 0\r\n\r\n").await.unwrap();
        reply_ok(&mut writer, id, json!({"capabilities": {}})).await;

        assert!(matches!(
            session.await_reply(TIMEOUT).await.unwrap(),
            Reply::Success { .. }
        ));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (mut session, mut reader, _writer) = session_pair();

        session
            .send_request("initialize", Some(json!({})))
            .await
            .unwrap();
        let _ = read_client_message(&mut reader).await;

        let err = session
            .await_reply(Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            ProbeError::Timeout { method, .. } => assert_eq!(method, "initialize"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn awaiting_with_nothing_pending_is_protocol_error() {
        let (mut session, _reader, _writer) = session_pair();

        let err = session.await_reply(TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ProbeError::Protocol(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn peer_drop_closes_the_session() {
        let (mut session, reader, writer) = session_pair();

        session
            .send_request("initialize", Some(json!({})))
            .await
            .unwrap();
        drop(reader);
        drop(writer);

        let err = session.await_reply(TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ProbeError::TransportClosed), "got {err:?}");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn closed_session_rejects_sends() {
        let (mut session, _reader, _writer) = session_pair();

        session.close();
        let err = session
            .send_request("initialize", Some(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Protocol(_)), "got {err:?}");
    }
}
