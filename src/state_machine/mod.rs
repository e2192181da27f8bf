pub mod session;
pub mod tally;

/// The [`StateMachine`] trait provides calling semantics for the pure bookkeeping that sits
/// underneath each RPC call, and marks the invariants that keep that bookkeeping deterministic.
///
/// # Functionality
/// A state machine consumes typed [`Input`](StateMachine::Input) and produces typed
/// [`Output`](StateMachine::Output). When there are several kinds of each, they are grouped into
/// enums and the trait methods provide the dispatch from the grouped type to the inherent method
/// handling one variant.
///
/// - [`process_input`](StateMachine::process_input) maps an input variant onto the logic.
/// - [`poll_output`](StateMachine::poll_output) drains whatever output is pending, one value per
///   call, returning `None` once nothing is left.
///
/// The handlers in [`grpc`](crate::grpc) own the impure side: they read from the network, touch
/// the shared [`Catalog`](crate::catalog::Catalog) and write log lines. What they feed into a
/// machine is only ever the *result* of that work (a message arrived, the peer half-closed, these
/// prices matched), which keeps the machine testable without a server.
///
/// # Invariants
/// Implementors *must* uphold the following.
///
/// ## No Interior Mutability
/// State changes only through `&mut self`. No [`std::cell`] containers, no [`std::sync`] locks,
/// no [`Arc`](std::sync::Arc)/[`Rc`](std::rc::Rc) (reference counts are shared mutable state).
/// Sharing a machine between tasks is the job of the wrapper, e.g.
/// [`StreamSession`](crate::session::StreamSession) holds its machine behind a mutex.
///
/// ## No IO
/// No filesystem, network or clock access. A machine that needs a time value takes it as input.
///
/// ## No Concurrency, No Async, No Blocking
/// Every call returns promptly on the calling thread. Ordering between concurrent producers is
/// decided by whoever serializes access to the machine, never by the machine itself.
///
/// # Side Effects
/// Logging is the only side effect tolerated, and the machine logic *must not* depend on it.
/// In practice the machines in this crate stay silent and report through their output instead.
///
/// # Example
/// ```ignore
/// let mut tally = TallyMachine::new();
/// tally.process_input(TallyInput::Observed(vec![56.99]));
/// tally.process_input(TallyInput::Observed(vec![]));
/// tally.process_input(TallyInput::Close);
///
/// let Some(TallyOutput::Summary(summary)) = tally.poll_output() else { unreachable!() };
/// assert_eq!(summary.count, 2);
/// ```
pub trait StateMachine {
    /// The type of input that is [processed](StateMachine::process_input) by the state machine.
    type Input;
    /// The type of output that is [polled](StateMachine::poll_output) from the state machine.
    type Output;

    /// Process the provided `input` into the state machine.
    fn process_input(&mut self, input: Self::Input);

    /// Poll the state machine for output, returning the first available output if present.
    fn poll_output(&mut self) -> Option<Self::Output>;
}
