//! Per-NIO packet filter chain: up to three independently bound filter
//! slots (RX-only, TX-only, both-directions), each an opaque strategy that
//! can drop, pass, or rewrite a frame in place.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDirection {
    Rx,
    Tx,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Drop,
    Pass,
    Alter,
}

/// A packet filter strategy. `setup` receives whatever tokens the config
/// line left after the filter name; `apply` runs once per packet and may
/// rewrite `frame` in place (returning `Alter`) or just pass judgement.
pub trait PacketFilter: Send {
    fn name(&self) -> &str;
    fn setup(&mut self, args: &[String]);
    fn apply(&mut self, frame: &mut Vec<u8>) -> FilterAction;
}

/// Drops every Nth packet it sees — useful for exercising loss handling
/// without a real lossy transport.
pub struct PeriodicDropFilter {
    every: u64,
    seen: u64,
}

impl PeriodicDropFilter {
    pub fn new(every: u64) -> Self {
        Self { every: every.max(1), seen: 0 }
    }
}

impl PacketFilter for PeriodicDropFilter {
    fn name(&self) -> &str {
        "periodic_drop"
    }

    fn setup(&mut self, args: &[String]) {
        if let Some(n) = args.first().and_then(|s| s.parse().ok()) {
            self.every = n;
        }
    }

    fn apply(&mut self, _frame: &mut Vec<u8>) -> FilterAction {
        self.seen += 1;
        if self.seen % self.every == 0 {
            FilterAction::Drop
        } else {
            FilterAction::Pass
        }
    }
}

#[derive(Default)]
pub struct FilterChain {
    pub rx: Option<Box<dyn PacketFilter>>,
    pub tx: Option<Box<dyn PacketFilter>>,
    pub both: Option<Box<dyn PacketFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, direction: FilterDirection, filter: Box<dyn PacketFilter>) {
        match direction {
            FilterDirection::Rx => self.rx = Some(filter),
            FilterDirection::Tx => self.tx = Some(filter),
            FilterDirection::Both => self.both = Some(filter),
        }
    }

    pub fn unbind(&mut self, direction: FilterDirection) {
        match direction {
            FilterDirection::Rx => self.rx = None,
            FilterDirection::Tx => self.tx = None,
            FilterDirection::Both => self.both = None,
        }
    }

    /// Runs the TX-then-both chain; `true` means the frame survives.
    pub fn run_tx(&mut self, frame: &mut Vec<u8>) -> bool {
        Self::run_one(&mut self.tx, frame) && Self::run_one(&mut self.both, frame)
    }

    /// Runs the RX-then-both chain; `true` means the frame survives.
    pub fn run_rx(&mut self, frame: &mut Vec<u8>) -> bool {
        Self::run_one(&mut self.rx, frame) && Self::run_one(&mut self.both, frame)
    }

    fn run_one(slot: &mut Option<Box<dyn PacketFilter>>, frame: &mut Vec<u8>) -> bool {
        match slot {
            None => true,
            Some(filter) => !matches!(filter.apply(frame), FilterAction::Drop),
        }
    }
}
