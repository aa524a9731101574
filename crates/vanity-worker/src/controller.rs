//! Compute process supervision.
//!
//! One [`ProcessController::run`] call owns one compute process from spawn
//! to exit. Output, exit, deadline, grace and cancellation are all events of
//! a single loop, and the first terminal trigger decides the outcome.
//!
//! ```text
//! Spawning ──▶ Running ──▶ Matched ───┐
//!    │            ├──────▶ TimedOut ──┼──▶ Terminated
//!    │            └──────▶ Cancelled ─┘
//!    └──▶ Crashed
//! ```

use crate::parser::ResultParser;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use vanity_config::WorkerConfig;
use vanity_core::{FailureReason, JobFailure, MiningPayload, MiningResult};
use vanity_jobs::ProcessMetrics;

/// Calling address passed to the miner.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Environment variable carrying the vanity threshold to the miner.
pub const THRESHOLD_ENV: &str = "MIN_LEADING_BS";

const READ_CHUNK: usize = 8 * 1024;
const STDERR_TAIL: usize = 4 * 1024;

/// Process controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Compute binary.
    pub miner_path: PathBuf,
    /// Device the process is bound to.
    pub device_id: String,
    /// Time between the interrupt signal and a forced kill.
    pub interrupt_grace: Duration,
    /// Time allowed to drain output after exit.
    pub flush_timeout: Duration,
}

impl ControllerConfig {
    /// Builds controller settings from the worker section.
    pub fn from_worker(config: &WorkerConfig) -> Self {
        Self {
            miner_path: PathBuf::from(&config.miner_path),
            device_id: config.device_id.clone(),
            interrupt_grace: config.interrupt_grace(),
            flush_timeout: config.flush_timeout(),
        }
    }
}

/// Controller lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Spawning,
    Running,
    Matched,
    TimedOut,
    Cancelled,
    Crashed,
    Terminated,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Matched => "matched",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Crashed => "crashed",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// How a compute run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The process reported a result.
    Found(MiningResult),
    /// The run failed; the job should be nacked.
    Failed(JobFailure),
    /// The run was cancelled before a result was found.
    Cancelled,
}

impl ExecutionOutcome {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::Failed(failure) => failure.reason.as_str(),
            Self::Cancelled => "cancelled",
        }
    }
}

/// First terminal trigger observed while the process runs.
#[derive(Debug)]
enum Trigger {
    Matched(MiningResult),
    TimedOut,
    Cancelled,
}

/// One-shot resolution slot.
#[derive(Debug, Default)]
struct Resolution {
    trigger: Option<Trigger>,
}

impl Resolution {
    /// Records `trigger` unless one is already set. Returns whether it was recorded.
    fn set(&mut self, trigger: Trigger) -> bool {
        match (&self.trigger, &trigger) {
            (None, _) => {
                self.trigger = Some(trigger);
                true
            }
            // A result printed while winding down after a cancel still counts.
            (Some(Trigger::Cancelled), Trigger::Matched(_)) => {
                self.trigger = Some(trigger);
                true
            }
            _ => false,
        }
    }

    fn is_set(&self) -> bool {
        self.trigger.is_some()
    }

    fn accepts_output(&self) -> bool {
        matches!(self.trigger, None | Some(Trigger::Cancelled))
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
enum OutputEvent {
    Chunk(Stream, Vec<u8>),
    Closed(Stream),
}

enum Step {
    Output(OutputEvent),
    Exited(std::io::Result<ExitStatus>),
    Deadline,
    Cancel,
    CancelDropped,
    GraceElapsed,
}

/// Bounded tail of the process error stream.
#[derive(Debug, Default)]
struct StderrTail {
    bytes: Vec<u8>,
}

impl StderrTail {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > STDERR_TAIL {
            let excess = self.bytes.len() - STDERR_TAIL;
            self.bytes.drain(..excess);
        }
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).trim().to_string()
    }
}

/// Mutable state of one run.
struct Supervision<'a> {
    device_id: &'a str,
    state: ControllerState,
    resolution: Resolution,
    parser: ResultParser,
    stderr: StderrTail,
}

impl Supervision<'_> {
    /// Handles one output event. Returns a newly recorded result.
    fn on_output(&mut self, event: OutputEvent, open_streams: &mut usize) -> Option<MiningResult> {
        match event {
            OutputEvent::Chunk(Stream::Stdout, bytes) => {
                if !self.resolution.accepts_output() {
                    return None;
                }
                let result = self.parser.feed(&bytes)?;
                self.record_match(result)
            }
            OutputEvent::Chunk(Stream::Stderr, bytes) => {
                for line in String::from_utf8_lossy(&bytes).lines() {
                    let line = line.trim_end();
                    if !line.is_empty() {
                        debug!(device_id = %self.device_id, "miner: {}", line);
                    }
                }
                self.stderr.push(&bytes);
                None
            }
            OutputEvent::Closed(stream) => {
                debug!(device_id = %self.device_id, ?stream, "output stream closed");
                *open_streams = open_streams.saturating_sub(1);
                None
            }
        }
    }

    fn record_match(&mut self, result: MiningResult) -> Option<MiningResult> {
        if self.resolution.set(Trigger::Matched(result.clone())) {
            self.state = ControllerState::Matched;
            Some(result)
        } else {
            None
        }
    }
}

/// Supervises one compute process per call.
#[derive(Debug, Clone)]
pub struct ProcessController {
    config: ControllerConfig,
}

impl ProcessController {
    /// Creates a controller.
    pub fn new(config: ControllerConfig) -> Self {
        Self { config }
    }

    /// Controller settings.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Positional arguments passed to the miner.
    pub fn invocation_args(payload: &MiningPayload, device_id: &str) -> [String; 5] {
        [
            payload.deployer_address.clone(),
            ZERO_ADDRESS.to_string(),
            payload.init_code_hash.clone(),
            device_id.to_string(),
            String::new(),
        ]
    }

    /// Runs the miner for `payload` until it reports a result, exits, misses
    /// `deadline` or `cancel` flips to `true`.
    ///
    /// Never returns an error: every failure is folded into
    /// [`ExecutionOutcome::Failed`].
    pub async fn run(
        &self,
        payload: &MiningPayload,
        threshold: u32,
        deadline: Duration,
        mut cancel: watch::Receiver<bool>,
    ) -> ExecutionOutcome {
        let device_id = self.config.device_id.as_str();
        let mut command = Command::new(&self.config.miner_path);
        command
            .args(Self::invocation_args(payload, device_id))
            .env(THRESHOLD_ENV, threshold.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(
                    device_id = %device_id,
                    state = %ControllerState::Crashed,
                    miner_path = %self.config.miner_path.display(),
                    error = %e,
                    "Failed to spawn miner"
                );
                return ExecutionOutcome::Failed(JobFailure::new(
                    FailureReason::SpawnError,
                    format!(
                        "failed to spawn {}: {}",
                        self.config.miner_path.display(),
                        e
                    ),
                ));
            }
        };

        let pid = child.id();
        let started = Instant::now();
        ProcessMetrics::process_started(device_id);
        info!(
            device_id = %device_id,
            pid = ?pid,
            deadline_ms = deadline.as_millis() as u64,
            threshold,
            "Miner started"
        );

        let (tx, mut events) = mpsc::channel::<OutputEvent>(64);
        spawn_reader(child.stdout.take(), Stream::Stdout, tx.clone());
        spawn_reader(child.stderr.take(), Stream::Stderr, tx);

        let mut run = Supervision {
            device_id,
            state: ControllerState::Running,
            resolution: Resolution::default(),
            parser: ResultParser::new(),
            stderr: StderrTail::default(),
        };
        let mut open_streams = 2usize;
        let mut cancel_open = true;
        let mut grace_armed = false;

        // A cancel issued before the run started is honoured immediately.
        if *cancel.borrow_and_update() {
            run.resolution.set(Trigger::Cancelled);
            run.state = ControllerState::Cancelled;
            info!(device_id = %device_id, "Cancelled before start, interrupting miner");
            interrupt(&mut child, pid);
            grace_armed = true;
        }

        let deadline_timer = tokio::time::sleep(deadline);
        tokio::pin!(deadline_timer);
        let grace_timer = tokio::time::sleep(self.config.interrupt_grace);
        tokio::pin!(grace_timer);
        if grace_armed {
            grace_timer
                .as_mut()
                .reset(Instant::now() + self.config.interrupt_grace);
        }

        let exit = loop {
            let step = tokio::select! {
                status = child.wait() => Step::Exited(status),
                Some(event) = events.recv(), if open_streams > 0 => Step::Output(event),
                () = &mut deadline_timer, if !run.resolution.is_set() => Step::Deadline,
                changed = cancel.changed(), if cancel_open && !run.resolution.is_set() => {
                    match changed {
                        Ok(()) if *cancel.borrow_and_update() => Step::Cancel,
                        Ok(()) => continue,
                        Err(_) => Step::CancelDropped,
                    }
                }
                () = &mut grace_timer, if grace_armed => Step::GraceElapsed,
            };

            let interrupt_now = match step {
                Step::Exited(status) => break status,
                Step::Output(event) => {
                    let matched = run.on_output(event, &mut open_streams);
                    if let Some(result) = &matched {
                        info!(
                            device_id = %device_id,
                            salt = %result.salt,
                            vanity_address = %result.vanity_address,
                            "Result found, interrupting miner"
                        );
                    }
                    // Already interrupting when the match follows a cancel.
                    matched.is_some() && !grace_armed
                }
                Step::Deadline => {
                    run.resolution.set(Trigger::TimedOut);
                    run.state = ControllerState::TimedOut;
                    warn!(
                        device_id = %device_id,
                        deadline_ms = deadline.as_millis() as u64,
                        "Deadline reached without a result, interrupting miner"
                    );
                    true
                }
                Step::Cancel => {
                    run.resolution.set(Trigger::Cancelled);
                    run.state = ControllerState::Cancelled;
                    info!(device_id = %device_id, "Run cancelled, interrupting miner");
                    true
                }
                Step::CancelDropped => {
                    cancel_open = false;
                    false
                }
                Step::GraceElapsed => {
                    warn!(
                        device_id = %device_id,
                        grace_ms = self.config.interrupt_grace.as_millis() as u64,
                        "Miner ignored interrupt, killing"
                    );
                    if let Err(e) = child.start_kill() {
                        warn!(device_id = %device_id, error = %e, "Failed to kill miner");
                    }
                    grace_armed = false;
                    false
                }
            };

            if interrupt_now {
                interrupt(&mut child, pid);
                grace_armed = true;
                grace_timer
                    .as_mut()
                    .reset(Instant::now() + self.config.interrupt_grace);
            }
        };

        let flushed = tokio::time::timeout(self.config.flush_timeout, async {
            while open_streams > 0 {
                match events.recv().await {
                    Some(event) => {
                        run.on_output(event, &mut open_streams);
                    }
                    None => break,
                }
            }
        })
        .await;
        if flushed.is_err() {
            debug!(device_id = %device_id, "Output still open after flush timeout");
        }
        if run.resolution.accepts_output() {
            if let Some(result) = run.parser.finish() {
                run.record_match(result);
            }
        }

        let previous = run.state;
        run.state = ControllerState::Terminated;
        let elapsed = started.elapsed();
        let outcome = resolve(&mut run, exit, deadline);

        ProcessMetrics::process_finished(device_id, outcome.label(), elapsed);
        debug!(
            device_id = %device_id,
            from = %previous,
            to = %run.state,
            outcome = outcome.label(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Controller resolved"
        );
        outcome
    }
}

/// Resolves the run once the process has exited.
fn resolve(
    run: &mut Supervision<'_>,
    exit: std::io::Result<ExitStatus>,
    deadline: Duration,
) -> ExecutionOutcome {
    let device_id = run.device_id;
    let (exit_code, signal) = match &exit {
        Ok(status) => exit_parts(status),
        Err(_) => (None, None),
    };

    match run.resolution.trigger.take() {
        Some(Trigger::Matched(result)) => {
            info!(device_id = %device_id, ?exit_code, ?signal, "Miner exited after result");
            ExecutionOutcome::Found(result)
        }
        Some(Trigger::TimedOut) => {
            warn!(
                device_id = %device_id,
                ?exit_code,
                ?signal,
                stderr_tail = %run.stderr.text(),
                "Miner timed out"
            );
            ExecutionOutcome::Failed(JobFailure::new(
                FailureReason::Timeout,
                format!("no result within {} ms", deadline.as_millis()),
            ))
        }
        Some(Trigger::Cancelled) => {
            info!(device_id = %device_id, ?exit_code, ?signal, "Miner stopped after cancel");
            ExecutionOutcome::Cancelled
        }
        None => match exit {
            Ok(status) if status.success() => {
                warn!(
                    device_id = %device_id,
                    stderr_tail = %run.stderr.text(),
                    "Miner exited without a result"
                );
                ExecutionOutcome::Failed(JobFailure::new(
                    FailureReason::NoResultFound,
                    "miner exited cleanly without a result",
                ))
            }
            Ok(status) => {
                warn!(
                    device_id = %device_id,
                    ?exit_code,
                    ?signal,
                    stderr_tail = %run.stderr.text(),
                    "Miner exited abnormally"
                );
                ExecutionOutcome::Failed(JobFailure::new(
                    FailureReason::ProcessNonzeroExit,
                    describe_exit(&status),
                ))
            }
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Failed to wait for miner");
                ExecutionOutcome::Failed(JobFailure::new(
                    FailureReason::ProcessError,
                    format!("failed to wait for miner: {}", e),
                ))
            }
        },
    }
}

fn exit_parts(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        (status.code(), status.signal())
    }
    #[cfg(not(unix))]
    {
        (status.code(), None)
    }
}

fn describe_exit(status: &ExitStatus) -> String {
    match exit_parts(status) {
        (Some(code), _) => format!("miner exited with code {}", code),
        (None, Some(signal)) => format!("miner terminated by signal {}", signal),
        (None, None) => "miner exited abnormally".to_string(),
    }
}

/// Sends the graceful interrupt, falling back to a kill where signals are unavailable.
fn interrupt(child: &mut Child, pid: Option<u32>) {
    match send_sigint(pid) {
        Ok(()) => return,
        Err(e) => debug!(error = %e, "SIGINT not delivered, killing miner"),
    }
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Miner already gone");
    }
}

#[cfg(unix)]
fn send_sigint(pid: Option<u32>) -> io::Result<()> {
    let pid = pid.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "miner has no pid"))?;
    signal_process(pid, libc::SIGINT)
}

#[cfg(not(unix))]
fn send_sigint(_pid: Option<u32>) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "signals are unavailable"))
}

/// Delivers `signal` to `pid` with kill(2).
#[cfg(unix)]
#[allow(unsafe_code)]
fn signal_process(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    if pid <= 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to signal a process group"));
    }
    // Safety: kill(2) takes plain integers and touches no memory of ours.
    if unsafe { libc::kill(pid, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn spawn_reader<R>(handle: Option<R>, stream: Stream, tx: mpsc::Sender<OutputEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(mut reader) = handle {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = OutputEvent::Chunk(stream, buf[..n].to_vec());
                        if tx.send(chunk).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(?stream, error = %e, "Failed to read miner output");
                        break;
                    }
                }
            }
        }
        let _ = tx.send(OutputEvent::Closed(stream)).await;
    });
}
