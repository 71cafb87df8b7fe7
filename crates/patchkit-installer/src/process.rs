use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use patchkit_core::{EnvOverlay, ProvisionError, Result, TeardownStep, TeardownWarning};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::fs_utils::{is_within, same_path_ignore_case};

pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Minimum time left to read buffered output after the tool exits.
const OUTPUT_GRACE: Duration = Duration::from_millis(250);

/// One external tool invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: PathBuf,
    working_dir: PathBuf,
    args: Vec<String>,
    overlay: EnvOverlay,
    timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: working_dir.into(),
            args: Vec::new(),
            overlay: EnvOverlay::default(),
            timeout: DEFAULT_INVOCATION_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn overlay(mut self, overlay: EnvOverlay) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The command line as it would be typed, for error messages.
    pub fn display_command(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn all_output(&self) -> String {
        let mut combined = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }
}

/// Runs `invocation` to completion, killing it once its timeout elapses.
///
/// Output is collected until both pipes close or the invocation's deadline
/// passes, whichever comes first. Descendants that inherit the pipes and
/// outlive the tool therefore cannot hold the caller past the timeout.
pub fn run(invocation: &Invocation) -> Result<CommandOutput> {
    let program = invocation.program.display().to_string();
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .current_dir(&invocation.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in invocation.overlay.iter() {
        command.env(key, value);
    }

    debug!(command = %invocation.display_command(), "spawning");
    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| ProvisionError::Spawn {
        program: program.clone(),
        source,
    })?;
    let (sender, receiver) = mpsc::channel();
    drain(child.stdout.take(), OutputStream::Stdout, sender.clone());
    drain(child.stderr.take(), OutputStream::Stderr, sender);

    match child.wait_timeout(invocation.timeout) {
        Ok(Some(status)) => {
            let deadline = started
                .checked_add(invocation.timeout)
                .map(|deadline| deadline.max(Instant::now() + OUTPUT_GRACE));
            let collected = collect(&receiver, deadline);
            if !collected.complete {
                warn!(
                    command = %invocation.display_command(),
                    "output pipes still held by descendant processes, returning partial output"
                );
            }
            Ok(CommandOutput {
                exit_code: status.code(),
                stdout: String::from_utf8_lossy(&collected.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&collected.stderr).into_owned(),
            })
        }
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            warn!(
                command = %invocation.display_command(),
                timeout = ?invocation.timeout,
                "invocation timed out and was killed"
            );
            Err(ProvisionError::Timeout {
                program,
                timeout: invocation.timeout,
            })
        }
        Err(source) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(ProvisionError::io(
                format!("failed to wait for {program}"),
                source,
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStream {
    Stdout,
    Stderr,
}

type OutputChunk = (OutputStream, Vec<u8>);

fn drain<R: Read + Send + 'static>(
    stream: Option<R>,
    kind: OutputStream,
    sender: Sender<OutputChunk>,
) {
    let Some(mut stream) = stream else {
        return;
    };
    thread::spawn(move || {
        let mut buffer = [0_u8; 8192];
        loop {
            match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => {
                    if sender.send((kind, buffer[..read].to_vec())).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

struct CollectedOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    /// Both pipes reached end of file.
    complete: bool,
}

/// Gathers chunks until every drain thread hangs up or `deadline` passes.
/// `None` waits without a limit.
fn collect(receiver: &Receiver<OutputChunk>, deadline: Option<Instant>) -> CollectedOutput {
    let mut collected = CollectedOutput {
        stdout: Vec::new(),
        stderr: Vec::new(),
        complete: false,
    };
    loop {
        let received = match deadline {
            Some(deadline) => {
                receiver.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok((OutputStream::Stdout, chunk)) => collected.stdout.extend_from_slice(&chunk),
            Ok((OutputStream::Stderr, chunk)) => collected.stderr.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => {
                collected.complete = true;
                break;
            }
            Err(RecvTimeoutError::Timeout) => break,
        }
    }
    collected
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub image: PathBuf,
}

/// Enumerates and kills live processes.
pub trait ProcessTable {
    fn snapshot(&self) -> io::Result<Vec<ProcessRecord>>;
    /// Killing a process that already exited is not an error.
    fn terminate(&self, pid: u32) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> io::Result<Vec<ProcessRecord>> {
        system_snapshot()
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        system_terminate(pid)
    }
}

#[cfg(target_os = "linux")]
fn system_snapshot() -> io::Result<Vec<ProcessRecord>> {
    let mut records = Vec::new();
    for entry in fs::read_dir("/proc")? {
        let entry = entry?;
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        // Processes owned by other users, kernel threads and zombies have no
        // readable image.
        let Ok(image) = fs::read_link(entry.path().join("exe")) else {
            continue;
        };
        let image = match image.to_str().and_then(|raw| raw.strip_suffix(" (deleted)")) {
            Some(stripped) => PathBuf::from(stripped),
            None => image,
        };
        records.push(ProcessRecord { pid, image });
    }
    Ok(records)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn system_snapshot() -> io::Result<Vec<ProcessRecord>> {
    let output = Command::new("ps").args(["-axo", "pid=,comm="]).output()?;
    if !output.status.success() {
        return Err(io::Error::other(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(parse_process_listing(
        &String::from_utf8_lossy(&output.stdout),
        char::is_whitespace,
    ))
}

#[cfg(windows)]
fn system_snapshot() -> io::Result<Vec<ProcessRecord>> {
    let output = Command::new("powershell")
        .args([
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            "Get-CimInstance Win32_Process | ForEach-Object { \"$($_.ProcessId)`t$($_.ExecutablePath)\" }",
        ])
        .output()?;
    if !output.status.success() {
        return Err(io::Error::other(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(parse_process_listing(
        &String::from_utf8_lossy(&output.stdout),
        |c| c == '\t',
    ))
}

/// Parses `<pid><sep><image>` lines, skipping rows without an image.
#[cfg_attr(target_os = "linux", allow(dead_code))]
pub(crate) fn parse_process_listing(
    listing: &str,
    separator: impl Fn(char) -> bool,
) -> Vec<ProcessRecord> {
    listing
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (pid, image) = line.split_once(&separator)?;
            let pid = pid.trim().parse::<u32>().ok()?;
            let image = image.trim();
            if image.is_empty() {
                return None;
            }
            Some(ProcessRecord {
                pid,
                image: PathBuf::from(image),
            })
        })
        .collect()
}

#[cfg(unix)]
fn system_terminate(pid: u32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(windows)]
fn system_terminate(pid: u32) -> io::Result<()> {
    let output = Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .output()?;
    if output.status.success() {
        return Ok(());
    }
    // 128: no such process.
    if output.status.code() == Some(128) {
        return Ok(());
    }
    Err(io::Error::other(
        String::from_utf8_lossy(&output.stderr).trim().to_string(),
    ))
}

/// Kills every live process running the environment's tool executable or any
/// image under the environment root. The current process is never touched.
pub fn terminate_environment_processes(
    table: &dyn ProcessTable,
    tool_path: &Path,
    root: &Path,
) -> Vec<TeardownWarning> {
    let mut warnings = Vec::new();
    let records = match table.snapshot() {
        Ok(records) => records,
        Err(err) => {
            warnings.push(TeardownWarning::new(
                TeardownStep::ProcessEnumeration,
                format!("failed to enumerate processes: {err}"),
            ));
            return warnings;
        }
    };

    let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let tool_path = fs::canonicalize(tool_path).unwrap_or_else(|_| tool_path.to_path_buf());
    let own_pid = std::process::id();

    for record in records {
        if record.pid == own_pid {
            continue;
        }
        let owned = same_path_ignore_case(&record.image, &tool_path)
            || is_within(&root, &record.image);
        if !owned {
            continue;
        }

        info!(pid = record.pid, image = %record.image.display(), "terminating leftover process");
        if let Err(err) = table.terminate(record.pid) {
            warnings.push(TeardownWarning::new(
                TeardownStep::ProcessTermination,
                format!(
                    "failed to terminate pid {} ({}): {err}",
                    record.pid,
                    record.image.display()
                ),
            ));
        }
    }
    warnings
}
