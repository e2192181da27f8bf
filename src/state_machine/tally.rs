use super::StateMachine;

/// Running count and price sum for one `GetTotalAmount` call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Summary {
    pub count: u32,
    pub total: f64,
}

/// Accumulates the per-call tally of a client streaming aggregate.
///
/// Each received title contributes exactly one to `count`, whether or not it matched. Its
/// contribution to `total` is the sum of the prices of *every* stored item carrying that title.
/// Titles are unique under normal operation so this is usually zero or one price, but a record
/// file with duplicates is summed in full rather than stopping at the first match.
#[derive(Debug, Default)]
pub struct TallyMachine {
    summary: Summary,
    closed: bool,
    pending: bool,
}

impl TallyMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn observe(&mut self, prices: Vec<f64>) {
        if self.closed {
            return;
        }
        self.summary.count = self.summary.count.saturating_add(1);
        self.summary.total += prices.into_iter().sum::<f64>();
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.pending = true;
        }
    }

    fn poll_summary(&mut self) -> Option<Summary> {
        if self.pending {
            self.pending = false;
            Some(self.summary)
        } else {
            None
        }
    }
}

pub enum TallyInput {
    /// One title arrived; carries the prices of all stored items with that title.
    Observed(Vec<f64>),
    /// The client half-closed its stream.
    Close,
}

pub enum TallyOutput {
    Summary(Summary),
}

impl StateMachine for TallyMachine {
    type Input = TallyInput;
    type Output = TallyOutput;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            TallyInput::Observed(prices) => self.observe(prices),
            TallyInput::Close => self.close(),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.poll_summary().map(TallyOutput::Summary)
    }
}
