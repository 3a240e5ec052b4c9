//! Runs a handler against a scenario.
//!
//! The handler runs on its own thread and talks to the engine through its [`Device`]. Every
//! device call is a message on a single-slot channel, which the engine answers after matching the
//! call against the pending head of the scenario. The engine runs on the caller's thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::core::logger::harness_logger;
use crate::proctor::call::{Call, CallKind, HandlerExit, Message, Response};
use crate::proctor::device::{Device, DeviceError};
use crate::proctor::report::{EventResult, ExecutionResult};
use crate::scenario::{Failure, FailureKind, MatchOutcome, Scenario};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Events are still pending.
    Running,
    /// Every event passed. The handler may still be running.
    Completed,
    /// An event failed; nothing more will be matched.
    Aborted(FailureKind),
}

pub struct Proctor<'a> {
    scenario: &'a mut Scenario,
    state: RunState,
    anomalies: Vec<Failure>,
}

impl<'a> Proctor<'a> {
    pub fn new(scenario: &'a mut Scenario) -> Self {
        Self {
            scenario,
            state: RunState::Running,
            anomalies: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run `handler` against the scenario and return what happened. The scenario is reset first,
    /// so a scenario can be run any number of times.
    ///
    /// The handler returning an error counts as a crash, unless the error is a [`DeviceError`]
    /// (for example `Shutdown`, propagated with `?`).
    pub fn run<F>(&mut self, handler: F) -> ExecutionResult
    where
        F: FnOnce(Device) -> anyhow::Result<()> + Send + 'static,
    {
        self.scenario.reset();
        self.anomalies.clear();
        self.state = if self.scenario.done() {
            RunState::Completed
        } else {
            RunState::Running
        };

        let name: Arc<str> = Arc::from(self.scenario.name());
        let previous = harness_logger::active_scenario();
        harness_logger::set_active_scenario(Some(Arc::clone(&name)));
        log::info!(
            "Starting run with {} events and a {:?} deadline",
            self.scenario.len(),
            self.scenario.timeout()
        );

        let (sender, receiver) = crossbeam::channel::bounded(1);
        let device = Device::new(sender.clone(), self.scenario.interfaces().into());

        let spawned = thread::Builder::new()
            .name("handler".to_string())
            .spawn(move || {
                harness_logger::set_active_scenario(Some(name));
                let exit = run_handler(handler, device);
                // the engine may have stopped listening
                let _ = sender.send(Message::Finished(exit));
            });

        match spawned {
            Ok(handle) => {
                if self.serve(&receiver) {
                    // the handler has sent its last message and is about to exit
                    if handle.join().is_err() {
                        log::warn!("Handler thread panicked while exiting");
                    }
                } else {
                    log::debug!("Detaching handler thread");
                }
            }
            Err(e) => {
                log::error!("Could not start the handler thread: {e}");
                self.handler_finished(HandlerExit::Crashed(format!(
                    "could not start a thread for your code: {e}"
                )));
            }
        }

        // any call the handler makes from now on fails with `DeviceError::Shutdown`
        drop(receiver);

        let result = self.result();
        let counts = result.counts();
        log::info!(
            "Run finished: {} passed, {} failed, {} not attempted",
            counts.passed,
            counts.failed,
            counts.not_attempted
        );
        harness_logger::set_active_scenario(previous);
        result
    }

    /// Answer handler calls until the run is over. Returns true if the handler finished.
    ///
    /// Once the scenario is done and the handler has been told to shut down, its next call other
    /// than `shutdown` ends the run and the handler is detached.
    fn serve(&mut self, receiver: &Receiver<Message>) -> bool {
        let mut head_since = Instant::now();
        let mut told_to_stop = false;

        loop {
            let message = match head_since.checked_add(self.scenario.timeout()) {
                Some(deadline) => receiver.recv_deadline(deadline),
                None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match message {
                Ok(Message::Call { call, reply }) => {
                    let ignored_shutdown = told_to_stop && call.kind() != CallKind::Shutdown;
                    let response = self.dispatch(call);
                    let delay = match &response {
                        Response::NoPackets { after } => *after,
                        Response::Shutdown => {
                            told_to_stop |= self.state == RunState::Completed;
                            Duration::ZERO
                        }
                        _ => Duration::ZERO,
                    };
                    // the handler may have given up waiting
                    let _ = reply.send(response);

                    if ignored_shutdown {
                        log::warn!("Handler kept using the device after being told to shut down");
                        return false;
                    }

                    let now = Instant::now();
                    head_since = now.checked_add(delay).unwrap_or(now);
                }
                Ok(Message::Finished(exit)) => {
                    self.handler_finished(exit);
                    return true;
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.deadline_expired();
                    return false;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.handler_finished(HandlerExit::Crashed(
                        "the thread running your code disappeared".to_string(),
                    ));
                    return false;
                }
            }

            if let RunState::Aborted(_) = self.state {
                return false;
            }
        }
    }

    fn dispatch(&mut self, call: Call) -> Response {
        let Some(index) = self.scenario.head() else {
            return self.after_completion(call);
        };

        let event = &self.scenario.events()[index];
        log::debug!("Matching {} against event {}: {event}", call.kind(), index + 1);
        let attempt = event.attempt(&call, self.scenario.observed_outputs());

        match attempt.outcome {
            Ok(()) => {
                log::info!("Event {} passed", index + 1);
                self.scenario
                    .complete_head(MatchOutcome::Passed, attempt.observed);
                if self.scenario.done() {
                    log::info!("All events completed");
                    self.state = RunState::Completed;
                }
            }
            Err(failure) => self.fail_head(failure),
        }

        attempt.response
    }

    fn after_completion(&mut self, call: Call) -> Response {
        match call {
            Call::RecvPacket { .. } => {
                log::debug!("recv_packet called after all events completed; shutting down");
                Response::Shutdown
            }
            Call::SendPacket { interface, packet } => {
                log::warn!("Unexpected send_packet on {interface} after all events completed");
                self.anomalies.push(Failure::new(
                    FailureKind::PostCompletionAnomaly,
                    format!(
                        "send_packet was called on {interface} after all events completed: {packet}"
                    ),
                ));
                Response::Accepted
            }
            Call::Shutdown => Response::Accepted,
        }
    }

    fn handler_finished(&mut self, exit: HandlerExit) {
        let Some(index) = self.scenario.head() else {
            if let HandlerExit::Crashed(error) = exit {
                log::warn!("Handler crashed after all events completed: {error}");
                self.anomalies.push(Failure::new(
                    FailureKind::HandlerCrash,
                    format!("code crashed after all events completed: {error}"),
                ));
            } else {
                log::debug!("Handler returned");
            }
            return;
        };

        let failure = match exit {
            HandlerExit::Returned => Failure::new(
                FailureKind::HandlerExited,
                format!(
                    "your code returned, but I was expecting {}",
                    self.scenario.events()[index].expected_call()
                ),
            ),
            HandlerExit::Crashed(error) => {
                Failure::new(FailureKind::HandlerCrash, format!("code crashed: {error}"))
            }
        };
        self.fail_head(failure);
    }

    fn deadline_expired(&mut self) {
        if self.scenario.done() {
            log::info!(
                "Handler still running {:?} after all events completed",
                self.scenario.timeout()
            );
            return;
        }
        self.fail_head(Failure::new(
            FailureKind::DeadlineExceeded,
            "no action taken before deadline",
        ));
    }

    fn fail_head(&mut self, failure: Failure) {
        let kind = failure.kind;
        match self.scenario.complete_head(MatchOutcome::Failed(failure), None) {
            Some(index) => log::warn!("Event {} failed ({kind})", index + 1),
            None => log::warn!("Run failed ({kind}) with no pending event"),
        }
        self.state = RunState::Aborted(kind);
    }

    fn result(&self) -> ExecutionResult {
        let mut events: Vec<EventResult> = self
            .scenario
            .events()
            .iter()
            .map(|e| EventResult {
                description: e.description.clone(),
                expected: e.to_string(),
                outcome: MatchOutcome::NotAttempted,
            })
            .collect();

        for completed in self.scenario.completed() {
            events[completed.index].outcome = completed.outcome.clone();
        }

        ExecutionResult {
            scenario: self.scenario.name().to_string(),
            events,
            anomalies: self.anomalies.clone(),
        }
    }
}

/// Run `handler` against `scenario` on a fresh [`Proctor`].
pub fn run_scenario<F>(scenario: &mut Scenario, handler: F) -> ExecutionResult
where
    F: FnOnce(Device) -> anyhow::Result<()> + Send + 'static,
{
    Proctor::new(scenario).run(handler)
}

fn run_handler<F>(handler: F, device: Device) -> HandlerExit
where
    F: FnOnce(Device) -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(move || handler(device))) {
        Ok(Ok(())) => HandlerExit::Returned,
        Ok(Err(e)) if e.downcast_ref::<DeviceError>().is_some() => {
            log::debug!("Handler returned {e}");
            HandlerExit::Returned
        }
        Ok(Err(e)) => HandlerExit::Crashed(format!("{e:#}")),
        Err(payload) => HandlerExit::Crashed(format!("panicked: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
