use std::collections::VecDeque;
use std::fmt;

use super::StateMachine;

/// The four RPC interaction patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallPattern {
    /// One request, one response.
    Unary,
    /// One request, many responses.
    ServerStream,
    /// Many requests, one response.
    ClientStream,
    /// Many requests and many responses interleaved.
    Duplex,
}

impl CallPattern {
    fn has_inbound_stream(self) -> bool {
        matches!(self, CallPattern::ClientStream | CallPattern::Duplex)
    }
}

impl fmt::Display for CallPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallPattern::Unary => "unary",
            CallPattern::ServerStream => "server-stream",
            CallPattern::ClientStream => "client-stream",
            CallPattern::Duplex => "duplex",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Receiving,
    /// The client has signalled it is done sending.
    HalfClosed,
    /// The server is finishing its outstanding sends.
    Draining,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInput {
    /// A request message arrived.
    Receive,
    /// The client closed its sending direction.
    HalfClose,
    /// A response message was handed to the transport.
    Send,
    /// The server finished its sending direction.
    Finish,
    /// Transport failure or unrecoverable request error.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Transitioned {
        from: SessionState,
        to: SessionState,
    },
    /// The input is not valid for the pattern in the current state. The state is unchanged.
    Rejected {
        state: SessionState,
        input: SessionInput,
    },
}

/// Lifecycle of one RPC call.
///
/// ```text
/// Unary:        Open ──Send──> Open ──Finish──> Closed
/// ServerStream: Open ──Send*──> Draining ──Finish──> Closed
/// ClientStream: Open ──Receive*──> Receiving ──HalfClose──> HalfClosed ──Send──> Draining ──Finish──> Closed
/// Duplex:       Open ──(Receive|Send)*──> Receiving ──HalfClose──> HalfClosed ─> Draining ──Finish──> Closed
/// any state ──Abort──> Closed
/// ```
///
/// In the duplex pattern a half-close immediately starts draining, so both transitions are
/// reported for that single input. A client streaming call may send exactly one response.
#[derive(Debug)]
pub struct SessionMachine {
    pattern: CallPattern,
    state: SessionState,
    sent: usize,
    received: usize,
    events: VecDeque<SessionEvent>,
}

impl SessionMachine {
    pub fn new(pattern: CallPattern) -> Self {
        Self {
            pattern,
            state: SessionState::Open,
            sent: 0,
            received: 0,
            events: VecDeque::new(),
        }
    }

    pub fn pattern(&self) -> CallPattern {
        self.pattern
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    fn apply(&mut self, input: SessionInput) {
        use CallPattern::*;
        use SessionInput::*;
        use SessionState::*;

        let next = match (self.pattern, self.state, input) {
            (_, Closed, _) => None,
            (_, _, Abort) => Some(Closed),

            (Unary, Open, Send) if self.sent == 0 => Some(Open),
            (Unary, Open, Finish) => Some(Closed),

            (ServerStream, Open | Draining, Send) => Some(Draining),
            (ServerStream, Open | Draining, Finish) => Some(Closed),

            (pattern, Open | Receiving, Receive) if pattern.has_inbound_stream() => {
                Some(Receiving)
            }
            (pattern, Open | Receiving, HalfClose) if pattern.has_inbound_stream() => {
                Some(HalfClosed)
            }

            (Duplex, Receiving, Send) => Some(Receiving),
            (Duplex, HalfClosed | Draining, Send) => Some(Draining),
            (Duplex, HalfClosed | Draining, Finish) => Some(Closed),

            (ClientStream, HalfClosed, Send) => Some(Draining),
            (ClientStream, Draining, Finish) => Some(Closed),

            _ => None,
        };

        let Some(next) = next else {
            self.events.push_back(SessionEvent::Rejected {
                state: self.state,
                input,
            });
            return;
        };

        match input {
            Receive => self.received += 1,
            Send => self.sent += 1,
            _ => {}
        }

        self.transition(next);

        if self.pattern == Duplex && self.state == HalfClosed {
            self.transition(Draining);
        }
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            self.events.push_back(SessionEvent::Transitioned {
                from: self.state,
                to,
            });
            self.state = to;
        }
    }
}

impl StateMachine for SessionMachine {
    type Input = SessionInput;
    type Output = SessionEvent;

    fn process_input(&mut self, input: Self::Input) {
        self.apply(input);
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.events.pop_front()
    }
}
