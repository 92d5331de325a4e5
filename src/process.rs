//! Tracked child processes, grouped by job id.
//!
//! Every external tool runs in its own process group (a new process group on
//! Windows) with stdout and stderr piped back to us. Killing a job takes down
//! the whole tree: descendants first, then the group, then the root, followed
//! by a short grace period and a second sweep for anything that survived.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::error::{NormalizeError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const KILL_GRACE: Duration = Duration::from_secs(3);
/// How long to keep reading pipes after the child exited. A grandchild that
/// inherited them can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A command line for one external tool run.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
    stage: &'static str,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, stage: &'static str) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stage,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Arguments as strings, for logging and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    pub fn tool_name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Shared, sticky cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct TrackedChild {
    pid: u32,
    child: Mutex<Child>,
}

impl TrackedChild {
    fn try_wait(&self) -> std::io::Result<Option<ExitStatus>> {
        lock(&self.child).try_wait()
    }
}

/// A live child registered under a job id.
pub struct SpawnedProcess {
    tracked: Arc<TrackedChild>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

impl SpawnedProcess {
    pub fn pid(&self) -> u32 {
        self.tracked.pid
    }

    pub fn try_wait(&self) -> Result<Option<ExitStatus>> {
        self.tracked
            .try_wait()
            .map_err(|e| NormalizeError::io(format!("Failed to poll process {}", self.pid()), e))
    }

    /// Block until the process exits.
    pub fn wait(&self) -> Result<ExitStatus> {
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(status);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Everything a finished tool run printed.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// Last non-empty stderr line, used in error messages.
    pub fn stderr_tail(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string()
    }
}

/// Spawns tool processes and keeps them addressable by job id.
#[derive(Default)]
pub struct ProcessSupervisor {
    registry: Mutex<HashMap<String, Vec<Arc<TrackedChild>>>>,
    cancel: CancelToken,
    held: AtomicBool,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    /// Clear the sticky cancel flag at the start of a new run.
    pub fn reset(&self) {
        self.cancel.reset();
        self.held.store(false, Ordering::SeqCst);
    }

    /// Start `invocation` in its own process group and register it under `job_id`.
    pub fn spawn(&self, invocation: &Invocation, job_id: &str) -> Result<SpawnedProcess> {
        let mut registry = lock(&self.registry);
        if self.cancel.is_canceled() || self.held.load(Ordering::SeqCst) {
            return Err(NormalizeError::Canceled);
        }

        let mut command = invocation.command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate(&mut command);

        let mut child = command.spawn().map_err(|source| NormalizeError::Spawn {
            program: invocation.program.display().to_string(),
            source,
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let tracked = Arc::new(TrackedChild {
            pid: child.id(),
            child: Mutex::new(child),
        });
        registry
            .entry(job_id.to_string())
            .or_default()
            .push(Arc::clone(&tracked));

        debug!(
            job_id,
            pid = tracked.pid,
            args = ?invocation.args_lossy(),
            "Spawned {} ({})",
            invocation.tool_name(),
            invocation.stage
        );
        Ok(SpawnedProcess {
            tracked,
            stdout,
            stderr,
        })
    }

    /// Run `invocation` to completion, feeding each stderr line to `on_line`.
    ///
    /// Lines are split on `\n` and `\r` so ffmpeg's in-place stats updates
    /// arrive one at a time. A timeout kills the process tree.
    pub fn run(
        &self,
        invocation: &Invocation,
        job_id: &str,
        timeout: Option<Duration>,
        mut on_line: impl FnMut(&str),
    ) -> Result<ProcessOutput> {
        let mut process = self.spawn(invocation, job_id)?;

        let stdout_reader = process.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });
        let (tx, rx) = mpsc::channel::<String>();
        let stderr_reader = match process.stderr.take() {
            Some(err) => Some(thread::spawn(move || forward_lines(err, tx))),
            None => {
                drop(tx);
                None
            }
        };

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut stderr = String::new();
        let status = loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    on_line(&line);
                    stderr.push_str(&line);
                    stderr.push('\n');
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
            }
            if let Some(status) = process.try_wait()? {
                break status;
            }
            if let (Some(deadline), Some(limit)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    warn!(job_id, "{} {} timed out", invocation.tool_name(), invocation.stage);
                    kill_tree(&process.tracked);
                    return Err(NormalizeError::ToolTimeout {
                        tool: invocation.tool_name(),
                        stage: invocation.stage,
                        timeout: limit,
                    });
                }
            }
        };

        let drain_deadline = Instant::now() + DRAIN_GRACE;
        loop {
            match rx.recv_timeout(drain_deadline.saturating_duration_since(Instant::now())) {
                Ok(line) => {
                    on_line(&line);
                    stderr.push_str(&line);
                    stderr.push('\n');
                }
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(job_id, "{} exited but its stderr is still open", invocation.tool_name());
                    break;
                }
            }
        }
        if let Some(reader) = stderr_reader.filter(|r| r.is_finished()) {
            let _ = reader.join();
        }
        let stdout = stdout_reader
            .and_then(|reader| {
                while !reader.is_finished() && Instant::now() < drain_deadline {
                    thread::sleep(Duration::from_millis(10));
                }
                reader.is_finished().then(|| reader.join().ok()).flatten()
            })
            .unwrap_or_default();

        Ok(ProcessOutput {
            status,
            stdout,
            stderr,
        })
    }

    /// Kill every process tree registered for `job_id`.
    pub fn kill_job(&self, job_id: &str) {
        let handles = lock(&self.registry).remove(job_id);
        if let Some(handles) = handles {
            for handle in &handles {
                kill_tree(handle);
            }
            info!(job_id, "Killed all processes for job");
        }
    }

    /// Kill whatever is running now and refuse new spawns until `release`.
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
        self.kill_jobs();
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    /// Set the sticky cancel flag and kill every registered job.
    pub fn kill_all(&self) {
        self.cancel.cancel();
        self.kill_jobs();
        info!("Killed all processes");
    }

    fn kill_jobs(&self) {
        let job_ids: Vec<String> = lock(&self.registry).keys().cloned().collect();
        for job_id in job_ids {
            self.kill_job(&job_id);
        }
    }

    /// Forget processes of `job_id` that have already exited.
    pub fn cleanup_job(&self, job_id: &str) {
        let mut registry = lock(&self.registry);
        if let Some(handles) = registry.get_mut(job_id) {
            handles.retain(|h| matches!(h.try_wait(), Ok(None)));
            if handles.is_empty() {
                registry.remove(job_id);
            }
        }
    }

    pub fn has_processes(&self, job_id: &str) -> bool {
        lock(&self.registry)
            .get(job_id)
            .is_some_and(|handles| !handles.is_empty())
    }
}

#[cfg(unix)]
fn isolate(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn isolate(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

#[cfg(not(any(unix, windows)))]
fn isolate(_command: &mut Command) {}

#[cfg(unix)]
fn signal_group(pgid: u32) {
    // Each child leads its own group, so its pid is the group id.
    unsafe {
        libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32) {}

fn descendants(system: &mut System, root: u32) -> Vec<Pid> {
    system.refresh_processes(ProcessesToUpdate::All, true);
    let mut found: Vec<Pid> = Vec::new();
    let mut frontier = vec![Pid::from_u32(root)];
    while let Some(parent) = frontier.pop() {
        for (pid, process) in system.processes() {
            if process.thread_kind().is_none()
                && process.parent() == Some(parent)
                && !found.contains(pid)
            {
                found.push(*pid);
                frontier.push(*pid);
            }
        }
    }
    found
}

fn kill_tree(tracked: &TrackedChild) {
    let mut child = lock(&tracked.child);
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    let mut system = System::new();
    let tree = descendants(&mut system, tracked.pid);
    for pid in tree.iter().rev() {
        if let Some(process) = system.process(*pid) {
            process.kill();
        }
    }
    signal_group(tracked.pid);
    let _ = child.kill();

    let deadline = Instant::now() + KILL_GRACE;
    while Instant::now() < deadline {
        if let Ok(Some(_)) = child.try_wait() {
            break;
        }
        thread::sleep(Duration::from_millis(25));
    }

    if !tree.is_empty() {
        system.refresh_processes(ProcessesToUpdate::Some(&tree), true);
        for pid in &tree {
            if let Some(process) = system.process(*pid) {
                process.kill();
            }
        }
    }
    debug!(pid = tracked.pid, descendants = tree.len(), "Killed process tree");
}

fn forward_lines(mut stream: impl Read, tx: mpsc::Sender<String>) {
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                flush_line(&mut pending, &tx);
            } else {
                pending.push(byte);
            }
        }
    }
    flush_line(&mut pending, &tx);
}

fn flush_line(pending: &mut Vec<u8>, tx: &mpsc::Sender<String>) {
    if pending.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    let _ = tx.send(line);
}
