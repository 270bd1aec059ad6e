//! Init/start/finish state shared by listeners and loggers.

/// Lifecycle of a listener. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Lifecycle {
    #[default]
    Created,
    Initialized,
    Started,
    Finished,
}

impl Lifecycle {
    pub fn is_init(self) -> bool {
        self >= Lifecycle::Initialized && self != Lifecycle::Finished
    }

    /// `true` while signals should be processed.
    pub fn is_running(self) -> bool {
        self == Lifecycle::Started
    }

    pub fn is_finished(self) -> bool {
        self == Lifecycle::Finished
    }
}
