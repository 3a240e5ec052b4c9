use std::cell::RefCell;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use once_cell::sync::{Lazy, OnceCell};

/// Trigger an asynchronous flush when this many lines are queued.
const ASYNC_FLUSH_QD_LINES_THRESHOLD: usize = 10_000;

/// Performs a *synchronous* flush when this many lines are queued.  i.e. if
/// after reaching the `ASYNC_FLUSH_QD_LINES_THRESHOLD`, log lines are still
/// coming in faster than they can actually be flushed, when we reach this limit
/// we'll pause and let it finish flushing rather than letting the queue
/// continue growing.
const SYNC_FLUSH_QD_LINES_THRESHOLD: usize = 10 * ASYNC_FLUSH_QD_LINES_THRESHOLD;

/// Logging thread flushes at least this often.
const MIN_FLUSH_FREQUENCY: Duration = Duration::from_secs(1);

static HARNESS_LOGGER: Lazy<HarnessLogger> = Lazy::new(HarnessLogger::new);

/// Wall-clock reference for the timestamps on each line.
static LOGGER_START: Lazy<Instant> = Lazy::new(Instant::now);

thread_local!(static SENDER: RefCell<Option<Sender<LoggerCommand>>> = const { RefCell::new(None) });
thread_local!(static ACTIVE_SCENARIO: RefCell<Option<Arc<str>>> = const { RefCell::new(None) });

/// Initialize the harness logger.
pub fn init(max_log_level: LevelFilter, log_errors_to_stderr: bool) -> Result<(), SetLoggerError> {
    Lazy::force(&LOGGER_START);
    HARNESS_LOGGER.set_max_level(max_log_level);
    HARNESS_LOGGER.set_log_errors_to_stderr(log_errors_to_stderr);

    log::set_logger(&*HARNESS_LOGGER)?;
    log::set_max_level(max_log_level);

    // Start the thread that will receive log records and flush them to output.
    let spawned = std::thread::Builder::new()
        .name("netproctor-logger".to_string())
        .spawn(move || HARNESS_LOGGER.logger_thread_fn());
    if let Err(e) = spawned {
        // records will still be written by synchronous flushes on the logging threads
        eprintln!("WARNING: Couldn't start the logger thread: {e}");
    }

    // Arrange to flush the logger on panic. Handlers under test may panic on purpose, so this
    // keeps their output ordered with ours.
    let default_panic_handler = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        HARNESS_LOGGER.flush_records(None).ok();
        default_panic_handler(panic_info);
    }));

    Ok(())
}

/// Set the scenario name attached to records logged from the current thread.
pub fn set_active_scenario(name: Option<Arc<str>>) {
    ACTIVE_SCENARIO.with(|active| *active.borrow_mut() = name);
}

/// The scenario name attached to records logged from the current thread.
pub fn active_scenario() -> Option<Arc<str>> {
    ACTIVE_SCENARIO
        .try_with(|active| active.borrow().clone())
        .ok()
        .flatten()
}

/// A logger for the harness.
///
/// Records are queued by the logging thread and written to stdout by a helper thread, so a chatty
/// handler under test is never blocked on terminal output. Each record carries the scenario that
/// was active on the thread that logged it.
pub struct HarnessLogger {
    // The Sender half of a channel isn't Sync, so we must protect it with a
    // Mutex to make HarnessLogger be Sync. This is only accessed once per
    // thread, though, to clone into the thread-local SENDER.
    command_sender: Mutex<Sender<LoggerCommand>>,

    // Locked once by the logger thread, which keeps it for as long as it's running.
    command_receiver: Mutex<Receiver<LoggerCommand>>,

    // We don't put the records themselves in the `command_sender`, because
    // `Sender` doesn't support getting the queue length.
    records: ArrayQueue<HarnessLogRecord>,

    // When false, sends a (still-asynchronous) flush command to the logger
    // thread every time a record is pushed into `records`.
    buffering_enabled: RwLock<bool>,

    max_log_level: OnceCell<LevelFilter>,

    // Whether to log errors to stderr in addition to stdout.
    log_errors_to_stderr: OnceCell<bool>,
}

impl HarnessLogger {
    fn new() -> HarnessLogger {
        let (sender, receiver) = std::sync::mpsc::channel();

        HarnessLogger {
            records: ArrayQueue::new(SYNC_FLUSH_QD_LINES_THRESHOLD),
            command_sender: Mutex::new(sender),
            command_receiver: Mutex::new(receiver),
            buffering_enabled: RwLock::new(false),
            max_log_level: OnceCell::new(),
            log_errors_to_stderr: OnceCell::new(),
        }
    }

    // Function executed by the logger's helper thread.
    fn logger_thread_fn(&self) {
        let Ok(command_receiver) = self.command_receiver.lock() else {
            return;
        };

        loop {
            use std::sync::mpsc::RecvTimeoutError;
            let done_sender = match command_receiver.recv_timeout(MIN_FLUSH_FREQUENCY) {
                Ok(LoggerCommand::Flush(done_sender)) => done_sender,
                Err(RecvTimeoutError::Timeout) => None,
                // every sender is gone, so nothing can log anymore
                Err(RecvTimeoutError::Disconnected) => return,
            };

            if let Err(e) = self.flush_records(done_sender) {
                eprintln!("WARNING: Logger couldn't write records: {e}");
            }
        }
    }

    // Flush the contents of self.records. If `done_sender` is provided, it's
    // notified after the flush has completed.
    fn flush_records(&self, done_sender: Option<Sender<()>>) -> std::io::Result<()> {
        use std::io::Write;

        // Only flush records that are already in the queue, not ones that
        // arrive while we're flushing.
        let mut toflush = self.records.len();

        let stdout_unlocked = std::io::stdout();
        let stdout_locked = stdout_unlocked.lock();
        let mut stdout = std::io::BufWriter::new(stdout_locked);

        let log_errors_to_stderr = self.log_errors_to_stderr.get().copied().unwrap_or(false);

        while toflush > 0 {
            let Some(record) = self.records.pop() else {
                // another thread is flushing concurrently (for example from the panic hook)
                break;
            };
            toflush -= 1;

            if record.level <= Level::Error && log_errors_to_stderr {
                let line = format!("{record}");
                write!(stdout, "{line}")?;
                write!(std::io::stderr().lock(), "{line}")?;
            } else {
                write!(stdout, "{record}")?;
            }
        }
        stdout.flush()?;

        if let Some(done_sender) = done_sender {
            // We can't log from this thread without risking deadlock, so in the
            // unlikely case that the calling thread has gone away, just print
            // directly.
            done_sender.send(()).unwrap_or_else(|e| {
                println!("WARNING: Logger couldn't notify calling thread: {:?}", e)
            });
        }
        Ok(())
    }

    /// When disabled, the logger thread is notified to write each record as
    /// soon as it's created.  The calling thread still isn't blocked on the
    /// record actually being written, though.
    pub fn set_buffering_enabled(&self, buffering_enabled: bool) {
        if let Ok(mut writer) = self.buffering_enabled.write() {
            *writer = buffering_enabled;
        }
    }

    /// If the maximum log level has not yet been set, returns `LevelFilter::Trace`.
    pub fn max_level(&self) -> LevelFilter {
        self.max_log_level
            .get()
            .copied()
            .unwrap_or(LevelFilter::Trace)
    }

    /// Is only intended to be called from `init()`. Later calls are ignored.
    fn set_max_level(&self, level: LevelFilter) {
        self.max_log_level.set(level).ok();
    }

    /// Is only intended to be called from `init()`. Later calls are ignored.
    fn set_log_errors_to_stderr(&self, val: bool) {
        self.log_errors_to_stderr.set(val).ok();
    }

    fn flush_sync(&self) {
        let (done_sender, done_receiver) = std::sync::mpsc::channel();
        self.send_command(LoggerCommand::Flush(Some(done_sender)));
        // if the logger thread isn't running, flush from this thread instead
        if done_receiver.recv_timeout(MIN_FLUSH_FREQUENCY).is_err() {
            self.flush_records(None).ok();
        }
    }

    fn flush_async(&self) {
        self.send_command(LoggerCommand::Flush(None));
    }

    fn send_command(&self, cmd: LoggerCommand) {
        SENDER
            .try_with(|thread_sender| {
                if thread_sender.borrow().is_none() {
                    if let Ok(lock) = self.command_sender.lock() {
                        *thread_sender.borrow_mut() = Some(lock.clone());
                    }
                }
                if let Some(sender) = thread_sender.borrow().as_ref() {
                    sender.send(cmd).unwrap_or_else(|e| {
                        println!("WARNING: Couldn't send command to logger thread: {:?}", e);
                    });
                }
            })
            .unwrap_or_else(|e| {
                println!(
                    "WARNING: Couldn't get sender channel to logger thread: {:?}",
                    e
                );
            });
    }
}

impl Log for HarnessLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let current = std::thread::current();
        let mut harness_record = HarnessLogRecord {
            level: record.level(),
            file: record.file_static(),
            module_path: record.module_path_static(),
            line: record.line(),
            message: std::fmt::format(*record.args()),
            wall_time: LOGGER_START.elapsed(),
            thread_name: current.name().unwrap_or("unnamed").to_string(),
            scenario: active_scenario(),
        };

        loop {
            match self.records.push(harness_record) {
                Ok(()) => break,
                Err(r) => {
                    // Queue is full. Flush it and try again.
                    harness_record = r;
                    self.flush_sync();
                }
            }
        }

        let buffering_enabled = self.buffering_enabled.read().map(|x| *x).unwrap_or(false);

        if record.level() == Level::Error {
            self.flush_sync();
        } else if self.records.len() > ASYNC_FLUSH_QD_LINES_THRESHOLD || !buffering_enabled {
            self.flush_async();
        }
    }

    fn flush(&self) {
        self.flush_sync();
    }
}

struct HarnessLogRecord {
    level: Level,
    file: Option<&'static str>,
    module_path: Option<&'static str>,
    line: Option<u32>,
    message: String,
    wall_time: Duration,
    thread_name: String,
    scenario: Option<Arc<str>>,
}

impl std::fmt::Display for HarnessLogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.wall_time.as_secs();
        write!(
            f,
            "{:02}:{:02}:{:02}.{:06}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            self.wall_time.subsec_micros(),
        )?;
        write!(f, " [{}]", self.thread_name)?;
        write!(f, " [{level}]", level = self.level)?;
        match &self.scenario {
            Some(name) => write!(f, " [{name}]")?,
            None => write!(f, " [n/a]")?,
        }
        write!(
            f,
            " [{file}:",
            file = self
                .file
                .map(|f| if let Some(sep_pos) = f.rfind('/') {
                    &f[(sep_pos + 1)..]
                } else {
                    f
                })
                .unwrap_or("n/a"),
        )?;
        if let Some(line) = self.line {
            write!(f, "{line}")?;
        } else {
            write!(f, "n/a")?;
        }
        writeln!(
            f,
            "] [{module}] {msg}",
            module = self.module_path.unwrap_or("n/a"),
            msg = self.message
        )
    }
}

enum LoggerCommand {
    // Flush; takes an optional one-shot channel to notify that the flush has completed.
    Flush(Option<Sender<()>>),
}

pub fn set_buffering_enabled(buffering_enabled: bool) {
    HARNESS_LOGGER.set_buffering_enabled(buffering_enabled);
}
