//! Running-session registry
//!
//! An ordered list of sessions where list index and tab index are the same
//! thing. The registry owns each session's channel handle; removing an entry
//! is bookkeeping only, the channel must already have been told to stop.

use std::fmt;
use std::time::{Duration, Instant};

use iapadmin_protocol::PreparedOperation;

use crate::channel::{ChannelHandle, SessionLog};
use crate::dispatcher::tab_label;
use crate::error::{ClientError, Result};

/// How long a start/end confirmation stays visible
pub const NOTICE_TTL: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        Self(iapadmin_protocol::new_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionKind {
    Operation { prepared: PreparedOperation },
    /// Tracks the instance by name so it survives directory refreshes
    Rdp { instance: String },
}

#[derive(Debug)]
pub struct RunningSession {
    pub id: SessionId,
    pub kind: SessionKind,
    pub label: String,
    pub log: SessionLog,
    pub close_requested: bool,
    pub end_rdp_requested: bool,
    channel: Option<ChannelHandle>,
}

impl RunningSession {
    fn new(kind: SessionKind, label: &str) -> Self {
        Self {
            id: SessionId::generate(),
            kind,
            label: tab_label(label),
            log: SessionLog::default(),
            close_requested: false,
            end_rdp_requested: false,
            channel: None,
        }
    }

    pub fn rdp_instance(&self) -> Option<&str> {
        match &self.kind {
            SessionKind::Rdp { instance } => Some(instance),
            SessionKind::Operation { .. } => None,
        }
    }

    pub fn channel(&self) -> Option<&ChannelHandle> {
        self.channel.as_ref()
    }
}

/// Transient confirmation shown after a session starts or ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub ttl: Duration,
    pub shown_at: Instant,
}

impl Notice {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ttl: NOTICE_TTL,
            shown_at: Instant::now(),
        }
    }

    pub fn started(label: &str) -> Self {
        Self::new(format!("Started {label}"))
    }

    pub fn ended(label: &str) -> Self {
        Self::new(format!("Ended {label}"))
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.shown_at) >= self.ttl
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<RunningSession>,
    current: usize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &[RunningSession] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Append an operation session and select its tab
    pub fn push_operation(&mut self, name: &str, prepared: PreparedOperation) -> SessionId {
        self.push(RunningSession::new(SessionKind::Operation { prepared }, name))
    }

    /// Append an RDP session and select its tab
    pub fn push_rdp(&mut self, instance: &str) -> SessionId {
        let kind = SessionKind::Rdp {
            instance: instance.to_string(),
        };
        self.push(RunningSession::new(kind, instance))
    }

    fn push(&mut self, session: RunningSession) -> SessionId {
        let id = session.id.clone();
        self.sessions.push(session);
        self.current = self.sessions.len() - 1;
        id
    }

    pub fn attach_channel(&mut self, id: &SessionId, channel: ChannelHandle) -> Result<()> {
        let session = self
            .get_mut(id)
            .ok_or_else(|| ClientError::Channel(format!("no session {id}")))?;
        session.channel = Some(channel);
        Ok(())
    }

    pub fn position(&self, id: &SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| &s.id == id)
    }

    pub fn get(&self, id: &SessionId) -> Option<&RunningSession> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut RunningSession> {
        self.sessions.iter_mut().find(|s| &s.id == id)
    }

    pub fn at(&self, index: usize) -> Option<&RunningSession> {
        self.sessions.get(index)
    }

    /// The live RDP session for `instance`, if one exists
    pub fn find_rdp(&self, instance: &str) -> Option<&RunningSession> {
        self.sessions
            .iter()
            .find(|s| s.rdp_instance() == Some(instance))
    }

    /// Remove exactly the entry at `index`; the others keep their order.
    pub fn remove_at(&mut self, index: usize) -> Result<RunningSession> {
        if index >= self.sessions.len() {
            return Err(ClientError::UnknownSession(index));
        }
        let removed = self.sessions.remove(index);
        if self.current > index {
            self.current -= 1;
        }
        self.current = self.current.min(self.sessions.len().saturating_sub(1));
        Ok(removed)
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<RunningSession> {
        let index = self.position(id)?;
        self.remove_at(index).ok()
    }

    pub fn select_tab(&mut self, index: usize) -> Result<()> {
        if index >= self.sessions.len() {
            return Err(ClientError::UnknownSession(index));
        }
        self.current = index;
        Ok(())
    }

    pub fn current_tab(&self) -> Option<usize> {
        (!self.sessions.is_empty()).then_some(self.current)
    }

    pub fn current(&self) -> Option<&RunningSession> {
        self.current_tab().and_then(|i| self.sessions.get(i))
    }

    pub fn current_mut(&mut self) -> Option<&mut RunningSession> {
        let index = self.current_tab()?;
        self.sessions.get_mut(index)
    }
}
