//! Per-call session tracking.
//!
//! Every live RPC call owns a [`StreamSession`]: the call's [`SessionMachine`] plus a registration
//! in the service wide [`SessionMap`]. The registration is removed when the session is dropped,
//! which covers normal completion, aborts and peer cancellation alike.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state_machine::StateMachine;
use crate::state_machine::session::{
    CallPattern, SessionEvent, SessionInput, SessionMachine, SessionState,
};

#[derive(Clone, Hash, PartialEq, Eq)]
pub struct SessionId(Arc<Uuid>);

impl SessionId {
    pub fn generate() -> Self {
        Self(Arc::new(Uuid::new_v4()))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct SessionInfo {
    method: &'static str,
    pattern: CallPattern,
    opened_at: Instant,
}

/// Registry of the calls currently being served.
#[derive(Debug)]
pub struct SessionMap {
    sessions: DashMap<SessionId, SessionInfo, ahash::RandomState>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::default(),
        }
    }

    /// Register a new call, returning a guard that unregisters it on drop.
    pub fn open(self: &Arc<Self>, method: &'static str, pattern: CallPattern) -> SessionGuard {
        let session_id = SessionId::generate();
        self.sessions.insert(
            session_id.clone(),
            SessionInfo {
                method,
                pattern,
                opened_at: Instant::now(),
            },
        );

        SessionGuard {
            session_id,
            sessions: Arc::clone(self),
        }
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn active_count_for(&self, pattern: CallPattern) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.pattern == pattern)
            .count()
    }
}

impl Default for SessionMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a call registered in its [`SessionMap`] for as long as it is alive.
#[derive(Debug)]
pub struct SessionGuard {
    session_id: SessionId,
    sessions: Arc<SessionMap>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some((session_id, info)) = self.sessions.sessions.remove(&self.session_id) {
            debug!(
                session_id = %session_id,
                method = info.method,
                elapsed_ms = info.opened_at.elapsed().as_millis() as u64,
                "Session released"
            );
        }
    }
}

/// State owned by one live RPC call.
///
/// Both directions of a duplex call may record inputs, so the machine sits behind a mutex and the
/// session is typically shared through an [`Arc`].
pub struct StreamSession {
    method: &'static str,
    machine: Mutex<SessionMachine>,
    guard: SessionGuard,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("session_id", self.guard.session_id())
            .field("method", &self.method)
            .field("machine", &"<SessionMachine>")
            .finish()
    }
}

impl StreamSession {
    pub fn open(sessions: &Arc<SessionMap>, method: &'static str, pattern: CallPattern) -> Self {
        let guard = sessions.open(method, pattern);
        debug!(session_id = %guard.session_id(), method, %pattern, "Session opened");

        Self {
            method,
            machine: Mutex::new(SessionMachine::new(pattern)),
            guard,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.guard.session_id()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state()
    }

    /// Feed `input` to the session machine and return the resulting state.
    pub fn record(&self, input: SessionInput) -> SessionState {
        let mut machine = self.lock();
        machine.process_input(input);

        while let Some(event) = machine.poll_output() {
            match event {
                SessionEvent::Transitioned { from, to } => {
                    debug!(
                        session_id = %self.session_id(),
                        method = self.method,
                        ?from,
                        ?to,
                        "Session transition"
                    );
                }
                SessionEvent::Rejected { state, input } => {
                    warn!(
                        session_id = %self.session_id(),
                        method = self.method,
                        ?state,
                        ?input,
                        "Session input rejected"
                    );
                }
            }
        }

        machine.state()
    }

    pub fn received(&self) -> SessionState {
        self.record(SessionInput::Receive)
    }

    pub fn half_closed(&self) -> SessionState {
        self.record(SessionInput::HalfClose)
    }

    pub fn sent(&self) -> SessionState {
        self.record(SessionInput::Send)
    }

    pub fn finished(&self) -> SessionState {
        self.record(SessionInput::Finish)
    }

    pub fn aborted(&self) -> SessionState {
        self.record(SessionInput::Abort)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionMachine> {
        self.machine.lock().expect("session machine lock poisoned")
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        let Ok(machine) = self.machine.lock() else {
            return;
        };
        if !machine.is_closed() {
            debug!(
                session_id = %self.session_id(),
                method = self.method,
                state = ?machine.state(),
                received = machine.received(),
                sent = machine.sent(),
                "Session dropped before closing, call was cancelled"
            );
        }
    }
}
