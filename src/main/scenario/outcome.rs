use std::fmt;

/// Why an event (or a run) failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The handler made the wrong kind of call for the pending event.
    OrderingMismatch,
    /// The handler sent a packet on the wrong device, or a packet with the wrong contents.
    ContentMismatch,
    /// The handler made no call before the deadline.
    DeadlineExceeded,
    /// The handler returned an error or panicked.
    HandlerCrash,
    /// The handler returned normally while events were still pending.
    HandlerExited,
    /// A back-reference could not be resolved against the outputs observed so far.
    UnresolvedReference,
    /// The handler did something unexpected after every event had completed.
    PostCompletionAnomaly,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OrderingMismatch => "ordering mismatch",
            Self::ContentMismatch => "content mismatch",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::HandlerCrash => "handler crash",
            Self::HandlerExited => "handler exited",
            Self::UnresolvedReference => "unresolved reference",
            Self::PostCompletionAnomaly => "post-completion anomaly",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// The result of matching one event. Each event of a run gets exactly one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    Passed,
    Failed(Failure),
    NotAttempted,
}

impl MatchOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}
