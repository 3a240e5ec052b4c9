//! Scenarios: an ordered list of expected events, plus the interfaces they refer to.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use packet::Packet;

pub mod compare;
pub mod event;
pub mod interface;
pub mod outcome;

pub use self::event::{Event, EventKind, InputEvent, OutputEvent, TimeoutEvent};
pub use self::interface::{Interface, InterfaceKind};
pub use self::outcome::{Failure, FailureKind, MatchOutcome};

/// How long the handler gets to make a call for each event, unless the scenario says otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A packet the handler sent that matched an output event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedOutput {
    pub event_index: usize,
    pub interface: String,
    pub packet: Packet,
}

/// An event that has been matched against a handler call (or that failed for lack of one).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedEvent {
    pub index: usize,
    pub outcome: MatchOutcome,
}

/// An ordered list of expected events and the run progress through them.
///
/// Each event index is in exactly one of `pending` and `completed`, and `pending` is always a
/// suffix of the event list in order.
#[derive(Clone, Debug)]
pub struct Scenario {
    name: String,
    timeout: Duration,
    interfaces: Vec<Interface>,
    events: Vec<Event>,
    pending: VecDeque<usize>,
    completed: Vec<CompletedEvent>,
    outputs: Vec<ObservedOutput>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: DEFAULT_TIMEOUT,
            interfaces: Vec::new(),
            events: Vec::new(),
            pending: VecDeque::new(),
            completed: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The deadline for the handler to act on each pending event.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn add_interface(&mut self, interface: Interface) -> &mut Self {
        self.interfaces.push(interface);
        self
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    /// Append an expected event.
    pub fn expect(&mut self, kind: impl Into<EventKind>, description: impl Into<String>) -> &mut Self {
        self.push_event(Event::new(kind, description))
    }

    pub fn push_event(&mut self, event: Event) -> &mut Self {
        self.pending.push_back(self.events.len());
        self.events.push(event);
        self
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The index of the event the handler must satisfy next.
    pub fn head(&self) -> Option<usize> {
        self.pending.front().copied()
    }

    /// Whether every event has been matched.
    pub fn done(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = (usize, &Event)> + '_ {
        self.pending.iter().map(|&i| (i, &self.events[i]))
    }

    pub fn completed(&self) -> &[CompletedEvent] {
        &self.completed
    }

    /// Every output the handler has sent that matched an output event, oldest first.
    pub fn observed_outputs(&self) -> &[ObservedOutput] {
        &self.outputs
    }

    /// Move the head event to the completed list. Returns the index of the event completed.
    pub(crate) fn complete_head(
        &mut self,
        outcome: MatchOutcome,
        observed: Option<(String, Packet)>,
    ) -> Option<usize> {
        let index = self.pending.pop_front()?;
        if let Some((interface, packet)) = observed {
            self.outputs.push(ObservedOutput {
                event_index: index,
                interface,
                packet,
            });
        }
        self.completed.push(CompletedEvent { index, outcome });
        Some(index)
    }

    /// Put every event back into the pending list so the scenario can be run again.
    pub fn reset(&mut self) {
        self.pending = (0..self.events.len()).collect();
        self.completed.clear();
        self.outputs.clear();
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Scenario {} ({} events, {:?} per event)",
            self.name,
            self.events.len(),
            self.timeout
        )?;
        for interface in &self.interfaces {
            writeln!(f, "    {interface}")?;
        }
        for (i, event) in self.events.iter().enumerate() {
            writeln!(f, "  {:<3} {}", i + 1, event.description)?;
            writeln!(f, "        {event}")?;
        }
        Ok(())
    }
}
