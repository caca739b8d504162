//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Connection descriptor
//!
//! A [`Connection`] is owned by the task serving its socket and carries all
//! per-connection protocol and session state. The registry only ever sees a
//! [`ConnectionHandle`], a cheap clonable view with a bounded outbound queue
//! and a close signal, so no lock is held across a socket operation.

use crate::error::SessionError;
use crate::session::{self, SessionState};
use crate::telnet::format::format_outgoing;
use crate::telnet::protocol::{self, ProcessedInput, TelnetState};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Message queued for delivery by the connection's own task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text with color markup, formatted for the connection on delivery
    Text(String),
    /// Bytes written unchanged
    Raw(Vec<u8>),
}

#[derive(Debug)]
struct HandleInner {
    id: Uuid,
    host: String,
    created_at: DateTime<Utc>,
    state: AtomicU8,
    last_activity: AtomicI64,
    sender: mpsc::Sender<Outbound>,
    close: CancellationToken,
    close_message: Mutex<Option<String>>,
}

/// Shared view of a live connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound queue
    pub fn new(host: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let now = Utc::now();
        let handle = Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                host: host.into(),
                created_at: now,
                state: AtomicU8::new(SessionState::default().as_u8()),
                last_activity: AtomicI64::new(now.timestamp_millis()),
                sender,
                close: CancellationToken::new(),
                close_message: Mutex::new(None),
            }),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Last state published by the owning task
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.inner.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        let millis = self.inner.last_activity.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(self.inner.created_at)
    }

    /// Record activity at the given instant
    pub fn touch_at(&self, at: DateTime<Utc>) {
        self.inner
            .last_activity
            .store(at.timestamp_millis(), Ordering::Release);
    }

    /// Queue text for the client. Returns false if the connection is closing
    /// or its queue is full, in which case the message is dropped.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.enqueue(Outbound::Text(text.into()))
    }

    /// Queue raw bytes for the client
    pub fn send_raw(&self, bytes: Vec<u8>) -> bool {
        self.enqueue(Outbound::Raw(bytes))
    }

    fn enqueue(&self, message: Outbound) -> bool {
        if self.is_closing() {
            return false;
        }
        self.inner.sender.try_send(message).is_ok()
    }

    /// Ask the owning task to close the connection. The first message given
    /// is shown to the client before the socket closes.
    pub fn close(&self, message: Option<String>) {
        if let Some(message) = message {
            let mut slot = self
                .inner
                .close_message
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if slot.is_none() {
                *slot = Some(message);
            }
        }
        self.inner.close.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.inner.close.is_cancelled() || self.state().is_closing()
    }

    /// Resolves once [`close`](Self::close) has been called
    pub async fn closed(&self) {
        self.inner.close.cancelled().await
    }

    pub fn take_close_message(&self) -> Option<String> {
        self.inner
            .close_message
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Per-connection protocol and session state, owned by the connection task
#[derive(Debug)]
pub struct Connection {
    handle: ConnectionHandle,
    state: SessionState,
    telnet: TelnetState,
    color: bool,
    output: Vec<u8>,
    last_activity: DateTime<Utc>,
}

impl Connection {
    pub fn new(handle: ConnectionHandle, color: bool) -> Self {
        let last_activity = handle.last_activity();
        Self {
            handle,
            state: SessionState::default(),
            telnet: TelnetState::new(),
            color,
            output: Vec::with_capacity(1024),
            last_activity,
        }
    }

    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    pub fn host(&self) -> &str {
        self.handle.host()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.handle.created_at()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn echo_enabled(&self) -> bool {
        self.telnet.echo_enabled()
    }

    pub fn color(&self) -> bool {
        self.color
    }

    pub fn set_color(&mut self, color: bool) {
        self.color = color;
    }

    pub fn telnet(&self) -> &TelnetState {
        &self.telnet
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Queue the opening negotiation
    pub fn begin_negotiation(&mut self, naws: bool, ttype: bool) {
        if self.state.is_closed() {
            return;
        }
        let bytes = self.telnet.opening_negotiation(naws, ttype);
        self.output.extend_from_slice(&bytes);
    }

    /// Run received bytes through the frame processor.
    ///
    /// Protocol replies are queued on the connection's output; the returned
    /// value still lists them. Nothing is processed once input has stopped.
    pub fn process_incoming(&mut self, data: &[u8]) -> ProcessedInput {
        if !self.state.accepts_input() {
            return ProcessedInput::default();
        }
        let result = protocol::process_incoming(&mut self.telnet, data);
        for reply in &result.replies {
            self.output.extend_from_slice(reply);
        }
        if !result.lines.is_empty() {
            self.touch();
        }
        result
    }

    /// Resolve a completed line just before it is handed to the handler,
    /// applying `!` repeat against the current echo state
    pub fn recall(&mut self, line: String) -> String {
        self.telnet.recall(line)
    }

    fn touch(&mut self) {
        let now = Utc::now();
        self.last_activity = now;
        self.handle.touch_at(now);
    }

    /// Queue text, expanding color markup for this connection
    pub fn send(&mut self, text: &str) {
        if self.state.is_closed() {
            return;
        }
        self.output
            .extend_from_slice(&format_outgoing(text, self.color));
    }

    /// Queue bytes unchanged
    pub fn send_raw(&mut self, bytes: &[u8]) {
        if self.state.is_closed() {
            return;
        }
        self.output.extend_from_slice(bytes);
    }

    /// Move to a new session state, queuing any echo change it requires
    pub fn set_state(&mut self, state: SessionState) -> Result<(), SessionError> {
        let Some(change) = session::transition(self.state, state, self.telnet.echo_enabled())?
        else {
            return Ok(());
        };
        if let Some(echo) = change.echo {
            let bytes = self.telnet.set_echo(echo);
            self.output.extend_from_slice(&bytes);
        }
        tracing::debug!(
            session_id = %self.id(),
            from = %change.from,
            to = %change.to,
            "Session state changed"
        );
        self.state = state;
        self.handle.set_state(state);
        Ok(())
    }

    /// Apply a message taken from the outbound queue
    pub fn deliver(&mut self, message: Outbound) {
        match message {
            Outbound::Text(text) => self.send(&text),
            Outbound::Raw(bytes) => self.send_raw(&bytes),
        }
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Bytes queued for the socket and not yet written
    pub fn pending_output(&self) -> &[u8] {
        &self.output
    }

    /// Drop the first `count` queued bytes once the socket accepted them
    pub fn consume_output(&mut self, count: usize) {
        self.output.drain(..count.min(self.output.len()));
    }

    /// Take everything queued for the socket
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Final transition once the socket is done; drops any unsent output
    pub fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
        self.handle.set_state(SessionState::Closed);
        self.output.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thornvale_common::telnet::{DO, ECHO, IAC, SUPPRESS_GO_AHEAD, WILL, WONT};

    fn connection(color: bool) -> (Connection, mpsc::Receiver<Outbound>) {
        let (handle, receiver) = ConnectionHandle::new("127.0.0.1:5000", 8);
        (Connection::new(handle, color), receiver)
    }

    #[test]
    fn test_new_connection() {
        let (conn, _rx) = connection(true);
        assert_eq!(conn.state(), SessionState::GetName);
        assert!(conn.echo_enabled());
        assert_eq!(conn.host(), "127.0.0.1:5000");
        assert_eq!(conn.handle().state(), SessionState::GetName);
        assert!(!conn.has_output());
    }

    #[test]
    fn test_password_states_toggle_echo() {
        let (mut conn, _rx) = connection(false);
        conn.set_state(SessionState::GetPassword).unwrap();
        assert!(!conn.echo_enabled());
        assert_eq!(conn.take_output(), vec![IAC, WILL, ECHO]);

        conn.set_state(SessionState::Playing).unwrap();
        assert!(conn.echo_enabled());
        assert_eq!(conn.take_output(), vec![IAC, WONT, ECHO]);
        assert_eq!(conn.handle().state(), SessionState::Playing);

        conn.set_state(SessionState::Playing).unwrap();
        assert!(!conn.has_output());
    }

    #[test]
    fn test_send_formats_for_connection() {
        let (mut conn, _rx) = connection(true);
        conn.send("&rhi&e\n");
        assert_eq!(conn.take_output(), b"\x1b[0;31mhi\x1b[0m\r\n".to_vec());

        conn.set_color(false);
        conn.send("&rhi&e\n");
        assert_eq!(conn.take_output(), b"hi\r\n".to_vec());
    }

    #[test]
    fn test_replies_are_queued() {
        let (mut conn, _rx) = connection(false);
        let result = conn.process_incoming(&[IAC, DO, SUPPRESS_GO_AHEAD, b'h', b'i', b'\n']);
        assert_eq!(result.lines, vec!["hi".to_string()]);
        assert_eq!(conn.take_output(), vec![IAC, WILL, SUPPRESS_GO_AHEAD]);
    }

    #[test]
    fn test_lines_update_activity() {
        let (mut conn, _rx) = connection(false);
        let past = Utc::now() - chrono::Duration::minutes(10);
        conn.handle().touch_at(past);
        conn.process_incoming(b"partial");
        assert_eq!(conn.handle().last_activity().timestamp_millis(), past.timestamp_millis());
        conn.process_incoming(b"\n");
        assert!(conn.handle().last_activity() > past);
        assert_eq!(
            conn.last_activity().timestamp_millis(),
            conn.handle().last_activity().timestamp_millis()
        );
    }

    #[test]
    fn test_partial_writes_keep_remaining_output() {
        let (mut conn, _rx) = connection(false);
        conn.send("abcdef");
        conn.consume_output(2);
        assert_eq!(conn.pending_output(), b"cdef");
        conn.send("gh");
        conn.consume_output(100);
        assert!(!conn.has_output());
    }

    #[test]
    fn test_password_pipelined_after_name_is_not_repeated() {
        let (mut conn, _rx) = connection(false);
        let lines = conn.process_incoming(b"Aldric\r\nhunter2\r\n").lines;
        let mut dispatched = Vec::new();
        for line in lines {
            let line = conn.recall(line);
            if conn.state() == SessionState::GetName {
                conn.set_state(SessionState::GetPassword).unwrap();
            } else {
                conn.set_state(SessionState::Playing).unwrap();
            }
            dispatched.push(line);
        }
        assert_eq!(dispatched, vec!["Aldric", "hunter2"]);

        let lines = conn.process_incoming(b"!\r\n").lines;
        let repeated: Vec<String> = lines.into_iter().map(|line| conn.recall(line)).collect();
        assert_eq!(repeated, vec!["Aldric"]);
    }

    #[test]
    fn test_closing_stops_input() {
        let (mut conn, _rx) = connection(false);
        conn.set_state(SessionState::Closing).unwrap();
        let result = conn.process_incoming(b"look\n");
        assert!(result.lines.is_empty());
        assert!(conn.set_state(SessionState::Playing).is_err());
        assert!(conn.handle().is_closing());
    }

    #[test]
    fn test_closed_is_inert() {
        let (mut conn, _rx) = connection(false);
        conn.send("bye");
        conn.mark_closed();
        assert!(!conn.has_output());
        conn.send("ignored");
        conn.send_raw(b"ignored");
        assert!(conn.set_state(SessionState::Playing).is_ok());
        assert_eq!(conn.state(), SessionState::Closed);
        assert!(!conn.has_output());
    }

    #[test]
    fn test_deliver_queued_messages() {
        let (mut conn, _rx) = connection(false);
        conn.deliver(Outbound::Text("&Ghello\n".into()));
        conn.deliver(Outbound::Raw(vec![1, 2, 3]));
        assert_eq!(conn.take_output(), b"hello\r\n\x01\x02\x03".to_vec());
    }

    #[tokio::test]
    async fn test_handle_queue() {
        let (handle, mut rx) = ConnectionHandle::new("client", 2);
        assert!(handle.send("one"));
        assert!(handle.send_raw(vec![7]));
        assert!(!handle.send("dropped"));

        assert_eq!(rx.recv().await, Some(Outbound::Text("one".into())));
        assert_eq!(rx.recv().await, Some(Outbound::Raw(vec![7])));
    }

    #[tokio::test]
    async fn test_handle_close() {
        let (handle, _rx) = ConnectionHandle::new("client", 2);
        handle.close(Some("first".into()));
        handle.close(Some("second".into()));
        handle.closed().await;
        assert!(handle.is_closing());
        assert!(!handle.send("late"));
        assert_eq!(handle.take_close_message(), Some("first".to_string()));
        assert_eq!(handle.take_close_message(), None);
    }
}
