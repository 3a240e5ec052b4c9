use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use packet::{FieldPath, Packet};

use crate::proctor::call::{Call, CallKind, ReceivedPacket, Response};
use crate::scenario::compare::{self, Wildcard};
use crate::scenario::outcome::{Failure, FailureKind};
use crate::scenario::ObservedOutput;

/// A test run against every packet an [`OutputEvent`] matches, in addition to the comparison.
pub type PacketPredicate = Arc<dyn Fn(&Packet) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct NamedPredicate {
    pub name: String,
    pub test: PacketPredicate,
}

impl fmt::Debug for NamedPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedPredicate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Which previously observed output a [`BackReference`] copies from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputRef {
    /// The most recent output observed on the named interface.
    LastOn(String),
    /// The output observed for the event at this index in the scenario.
    Event(usize),
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LastOn(interface) => write!(f, "the last output on {interface}"),
            Self::Event(index) => write!(f, "the output of event {}", index + 1),
        }
    }
}

/// Copies the value of `from` in an observed output into `to` of an expected packet, just before
/// the expected packet is used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackReference {
    pub source: OutputRef,
    pub from: FieldPath,
    pub to: FieldPath,
}

impl BackReference {
    pub fn new(source: OutputRef, from: FieldPath, to: FieldPath) -> Self {
        Self { source, from, to }
    }

    fn find<'a>(&self, outputs: &'a [ObservedOutput]) -> Option<&'a ObservedOutput> {
        match &self.source {
            OutputRef::LastOn(interface) => {
                outputs.iter().rev().find(|o| &o.interface == interface)
            }
            OutputRef::Event(index) => outputs.iter().find(|o| o.event_index == *index),
        }
    }

    /// Apply this reference to `expected`, reading from the outputs observed so far.
    pub fn resolve(&self, expected: &mut Packet, outputs: &[ObservedOutput]) -> Result<(), String> {
        let Some(output) = self.find(outputs) else {
            return Err(format!("nothing has been observed as {} yet", self.source));
        };
        let Some(value) = output.packet.field(&self.from) else {
            return Err(format!(
                "{} has no field {} to copy from",
                self.source, self.from
            ));
        };
        expected
            .set_field(&self.to, value)
            .map_err(|e| format!("could not copy {} into {}: {e}", self.from, self.to))
    }
}

/// The result of matching a single handler call against the pending event.
pub(crate) struct Attempt {
    pub outcome: Result<(), Failure>,
    pub response: Response,
    /// The packet the handler sent, for an output event that passed.
    pub observed: Option<(String, Packet)>,
}

impl Attempt {
    fn passed(response: Response) -> Self {
        Self {
            outcome: Ok(()),
            response,
            observed: None,
        }
    }

    fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            outcome: Err(Failure::new(kind, message)),
            response: Response::Shutdown,
            observed: None,
        }
    }

    fn out_of_order(call: &Call, expected: &str) -> Self {
        Self::failed(
            FailureKind::OrderingMismatch,
            format!("{} was called, but I was expecting {expected}", call.kind()),
        )
    }
}

/// A packet the harness delivers to the handler when it calls `recv_packet`.
#[derive(Clone, Debug)]
pub struct InputEvent {
    pub interface: String,
    pub packet: Packet,
    pub copy_from: Vec<BackReference>,
}

impl InputEvent {
    pub fn new(interface: impl Into<String>, packet: Packet) -> Self {
        Self {
            interface: interface.into(),
            packet,
            copy_from: Vec::new(),
        }
    }

    pub fn copy_from(mut self, reference: BackReference) -> Self {
        self.copy_from.push(reference);
        self
    }

    /// The packet to deliver, with all back-references applied. The stored packet is unchanged.
    pub fn resolve(&self, outputs: &[ObservedOutput]) -> Result<Packet, String> {
        let mut packet = self.packet.clone();
        for reference in &self.copy_from {
            reference.resolve(&mut packet, outputs)?;
        }
        Ok(packet)
    }

    pub(crate) fn attempt(&self, call: &Call, outputs: &[ObservedOutput]) -> Attempt {
        let Call::RecvPacket { .. } = call else {
            return Attempt::out_of_order(call, "recv_packet");
        };

        match self.resolve(outputs) {
            Ok(packet) => Attempt::passed(Response::Packet(ReceivedPacket {
                timestamp: SystemTime::now(),
                interface: self.interface.clone(),
                packet,
            })),
            Err(e) => Attempt::failed(FailureKind::UnresolvedReference, e),
        }
    }
}

/// A packet the handler is expected to send with `send_packet`.
#[derive(Clone, Debug)]
pub struct OutputEvent {
    pub interface: String,
    pub packet: Packet,
    pub exact: bool,
    pub wildcards: Vec<Wildcard>,
    pub predicates: Vec<NamedPredicate>,
}

impl OutputEvent {
    pub fn new(interface: impl Into<String>, packet: Packet) -> Self {
        Self {
            interface: interface.into(),
            packet,
            exact: true,
            wildcards: Vec::new(),
            predicates: Vec::new(),
        }
    }

    /// Only compare the match tuple instead of every field.
    pub fn partial(mut self) -> Self {
        self.exact = false;
        self
    }

    pub fn wildcard(mut self, wildcard: impl Into<Wildcard>) -> Self {
        self.wildcards.push(wildcard.into());
        self
    }

    pub fn predicate<F>(mut self, name: impl Into<String>, test: F) -> Self
    where
        F: Fn(&Packet) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(NamedPredicate {
            name: name.into(),
            test: Arc::new(test),
        });
        self
    }

    pub(crate) fn attempt(&self, call: &Call) -> Attempt {
        let Call::SendPacket { interface, packet } = call else {
            return Attempt::out_of_order(call, "send_packet");
        };

        if interface != &self.interface {
            return Attempt::failed(
                FailureKind::ContentMismatch,
                format!(
                    "output on device {interface} unexpected (I expected this on {})",
                    self.interface
                ),
            );
        }

        if let Err(mismatch) = compare::compare(&self.packet, packet, self.exact, &self.wildcards)
        {
            return Attempt::failed(FailureKind::ContentMismatch, mismatch.to_string());
        }

        if let Some(p) = self.predicates.iter().find(|p| !(p.test)(packet)) {
            return Attempt::failed(
                FailureKind::ContentMismatch,
                format!("the packet doesn't satisfy {}", p.name),
            );
        }

        Attempt {
            observed: Some((interface.clone(), packet.clone())),
            ..Attempt::passed(Response::Accepted)
        }
    }
}

/// The handler is expected to call `recv_packet` and get nothing back.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimeoutEvent {
    pub duration: Duration,
}

impl TimeoutEvent {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub(crate) fn attempt(&self, call: &Call) -> Attempt {
        let Call::RecvPacket { timeout } = call else {
            return Attempt::out_of_order(call, "recv_packet");
        };

        // the declared duration is a minimum, even for a handler that asked to wait less
        if let Some(timeout) = timeout.filter(|t| *t < self.duration) {
            log::debug!(
                "recv_packet asked to wait {timeout:?}, holding it for the full {:?}",
                self.duration
            );
        }
        Attempt::passed(Response::NoPackets {
            after: self.duration,
        })
    }
}

#[derive(Clone, Debug)]
pub enum EventKind {
    Input(InputEvent),
    Output(OutputEvent),
    Timeout(TimeoutEvent),
}

impl From<InputEvent> for EventKind {
    fn from(e: InputEvent) -> Self {
        Self::Input(e)
    }
}

impl From<OutputEvent> for EventKind {
    fn from(e: OutputEvent) -> Self {
        Self::Output(e)
    }
}

impl From<TimeoutEvent> for EventKind {
    fn from(e: TimeoutEvent) -> Self {
        Self::Timeout(e)
    }
}

/// One expected step of a scenario.
#[derive(Clone, Debug)]
pub struct Event {
    pub description: String,
    pub kind: EventKind,
}

impl Event {
    pub fn new(kind: impl Into<EventKind>, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            kind: kind.into(),
        }
    }

    pub fn input(
        interface: impl Into<String>,
        packet: Packet,
        description: impl Into<String>,
    ) -> Self {
        Self::new(InputEvent::new(interface, packet), description)
    }

    pub fn output(
        interface: impl Into<String>,
        packet: Packet,
        description: impl Into<String>,
    ) -> Self {
        Self::new(OutputEvent::new(interface, packet), description)
    }

    pub fn timeout(duration: Duration, description: impl Into<String>) -> Self {
        Self::new(TimeoutEvent::new(duration), description)
    }

    /// Match one handler call against this event.
    pub(crate) fn attempt(&self, call: &Call, outputs: &[ObservedOutput]) -> Attempt {
        match &self.kind {
            EventKind::Input(e) => e.attempt(call, outputs),
            EventKind::Output(e) => e.attempt(call),
            EventKind::Timeout(e) => e.attempt(call),
        }
    }

    /// The call that satisfies this event.
    pub fn expected_call(&self) -> CallKind {
        match &self.kind {
            EventKind::Input(_) | EventKind::Timeout(_) => CallKind::RecvPacket,
            EventKind::Output(_) => CallKind::SendPacket,
        }
    }

    /// The interface this event refers to, if any.
    pub fn interface(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Input(e) => Some(&e.interface),
            EventKind::Output(e) => Some(&e.interface),
            EventKind::Timeout(_) => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EventKind::Input(e) => {
                write!(f, "recv_packet on {}: {}", e.interface, e.packet)?;
                for r in &e.copy_from {
                    write!(f, " ({} copied from {}.{})", r.to, r.source, r.from)?;
                }
                Ok(())
            }
            EventKind::Output(e) => {
                write!(f, "send_packet on {}: {}", e.interface, e.packet)?;
                if !e.exact {
                    write!(f, " (partial match)")?;
                }
                if !e.wildcards.is_empty() {
                    let names: Vec<String> = e.wildcards.iter().map(|w| w.to_string()).collect();
                    write!(f, " (wildcards: {})", names.join(", "))?;
                }
                Ok(())
            }
            EventKind::Timeout(e) => {
                write!(f, "recv_packet times out after {:?}", e.duration)
            }
        }
    }
}
