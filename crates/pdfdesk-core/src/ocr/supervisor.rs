//! Running one external command under liveness limits.
//!
//! stdout and stderr are read by two tasks and merged into one line channel.
//! The supervisor loop waits on that channel, the child, a ticker, the hard
//! deadline and the cancellation token. The child is killed on timeout and
//! cancellation, and `kill_on_drop` covers a dropped future.

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::OcrError;
use crate::models::config::OcrConfig;

/// Time allowed to drain buffered output once the child has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Stand-in deadline when the hard timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Liveness limits for one supervised run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorLimits {
    /// Kill the process after this much wall-clock time.
    pub hard_timeout: Duration,
    /// Emit a heartbeat after this long without output.
    pub idle_notice: Duration,
    /// Clock check interval.
    pub poll_interval: Duration,
    /// Lines of output kept for error reports.
    pub tail_lines: usize,
}

impl Default for SupervisorLimits {
    fn default() -> Self {
        Self::from(&OcrConfig::default())
    }
}

impl From<&OcrConfig> for SupervisorLimits {
    fn from(config: &OcrConfig) -> Self {
        Self {
            hard_timeout: config.hard_timeout(),
            idle_notice: config.idle_notice(),
            poll_interval: config.poll_interval(),
            tail_lines: config.tail_lines.max(1),
        }
    }
}

/// Program, arguments and extra environment of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Short program name for messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    /// Shell-like rendering, for logs and the `$ ...` announcement.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|part| shell_quote(&part.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        let lang_set = std::env::var_os("LANG").is_some() || self.env.iter().any(|(k, _)| k == "LANG");
        if !lang_set {
            command.env("LANG", "C");
        }
        command
    }
}

fn shell_quote(part: &str) -> String {
    let plain = !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=+:,@%".contains(c));
    if plain {
        part.to_string()
    } else {
        format!("'{}'", part.replace('\'', r"'\''"))
    }
}

/// Something the supervisor observed while the command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent<'a> {
    /// One line of output (stdout or stderr).
    Line(&'a str),
    /// No output for the given duration.
    Idle(Duration),
}

impl SupervisorEvent<'_> {
    /// Heartbeat text shown to the operator.
    pub fn heartbeat_message(quiet: Duration) -> String {
        format!("(no output for {}s, still working)", quiet.as_secs())
    }
}

/// A successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub elapsed: Duration,
    pub tail: Vec<String>,
}

/// Runs commands under [`SupervisorLimits`].
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    limits: SupervisorLimits,
}

enum Step {
    Cancelled,
    TimedOut,
    Line(Option<String>),
    Exited(std::io::Result<ExitStatus>),
    Tick,
}

/// Aborts the reader tasks when the run ends.
struct Readers(Vec<JoinHandle<()>>);

impl Drop for Readers {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

struct Tail {
    lines: VecDeque<String>,
    cap: usize,
}

impl Tail {
    fn new(cap: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(cap),
            cap,
        }
    }

    fn push(&mut self, line: &str) {
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn joined(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    fn into_vec(self) -> Vec<String> {
        self.lines.into()
    }
}

impl ProcessSupervisor {
    pub fn new(limits: SupervisorLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SupervisorLimits {
        &self.limits
    }

    /// Run `spec` to completion, reporting lines and heartbeats to `on_event`.
    pub async fn run<F>(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<RunReport, OcrError>
    where
        F: FnMut(SupervisorEvent<'_>),
    {
        let program = spec.program_name();
        if cancel.is_cancelled() {
            return Err(OcrError::Cancelled);
        }

        let mut child = spec.to_command().spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OcrError::ToolNotFound(program.clone())
            } else {
                OcrError::Spawn {
                    program: program.clone(),
                    source: e,
                }
            }
        })?;
        debug!("Spawned pid {:?}: {}", child.id(), spec.display());

        let (tx, mut rx) = mpsc::channel::<String>(256);
        let mut readers = Readers(Vec::with_capacity(2));
        if let Some(stdout) = child.stdout.take() {
            readers.0.push(tokio::spawn(forward_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.0.push(tokio::spawn(forward_lines(stderr, tx.clone())));
        }
        drop(tx);

        let started = Instant::now();
        let deadline = started
            .checked_add(self.limits.hard_timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let mut ticker = interval(self.limits.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut tail = Tail::new(self.limits.tail_lines);
        let mut last_output = started;
        let mut last_notice = started;
        let mut streams_open = true;

        let status = loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                _ = sleep_until(deadline) => Step::TimedOut,
                line = rx.recv(), if streams_open => Step::Line(line),
                status = child.wait(), if !streams_open => Step::Exited(status),
                _ = ticker.tick() => Step::Tick,
            };

            match step {
                Step::Cancelled => {
                    kill(&mut child, &program).await;
                    info!("{} cancelled after {:?}", program, started.elapsed());
                    return Err(OcrError::Cancelled);
                }
                Step::TimedOut => {
                    kill(&mut child, &program).await;
                    warn!("{} exceeded {:?}, killed", program, self.limits.hard_timeout);
                    return Err(OcrError::Timeout {
                        program,
                        limit: self.limits.hard_timeout,
                    });
                }
                Step::Line(Some(line)) => {
                    last_output = Instant::now();
                    tail.push(&line);
                    on_event(SupervisorEvent::Line(&line));
                }
                Step::Line(None) => streams_open = false,
                Step::Exited(status) => break status?,
                Step::Tick => {
                    let now = Instant::now();
                    if now.duration_since(last_output.max(last_notice)) >= self.limits.idle_notice {
                        last_notice = now;
                        on_event(SupervisorEvent::Idle(now.duration_since(last_output)));
                    }
                    // A grandchild may keep the pipes open after the child exits.
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                }
            }
        };

        if streams_open {
            while Instant::now() < deadline {
                match timeout(DRAIN_GRACE, rx.recv()).await {
                    Ok(Some(line)) => {
                        tail.push(&line);
                        on_event(SupervisorEvent::Line(&line));
                    }
                    _ => break,
                }
            }
        }
        drop(readers);

        let elapsed = started.elapsed();
        if !status.success() {
            debug!("{} failed after {:?}: {}", program, elapsed, status);
            return Err(OcrError::ProcessFailed {
                program,
                code: status.code(),
                tail: tail.joined(),
            });
        }

        debug!("{} finished in {:?}", program, elapsed);
        Ok(RunReport {
            elapsed,
            tail: tail.into_vec(),
        })
    }
}

async fn forward_lines<R>(stream: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if tx.send(line.to_string()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Output stream closed: {}", e);
                break;
            }
        }
    }
}

async fn kill(child: &mut Child, program: &str) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill {}: {}", program, e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("/bin/sh").arg("-c").arg(script)
    }

    fn limits(hard_ms: u64, idle_ms: u64) -> SupervisorLimits {
        SupervisorLimits {
            hard_timeout: Duration::from_millis(hard_ms),
            idle_notice: Duration::from_millis(idle_ms),
            poll_interval: Duration::from_millis(20),
            tail_lines: 3,
        }
    }

    #[tokio::test]
    async fn test_lines_from_both_streams() {
        let supervisor = ProcessSupervisor::new(limits(10_000, 10_000));
        let mut lines = Vec::new();
        let report = supervisor
            .run(
                &sh("echo one; echo two >&2; echo three"),
                &CancellationToken::new(),
                |event| {
                    if let SupervisorEvent::Line(line) = event {
                        lines.push(line.to_string());
                    }
                },
            )
            .await
            .unwrap();
        lines.sort();
        assert_eq!(lines, vec!["one", "three", "two"]);
        assert_eq!(report.tail.len(), 3);
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_tail() {
        let supervisor = ProcessSupervisor::new(limits(10_000, 10_000));
        let err = supervisor
            .run(
                &sh("for i in 1 2 3 4 5; do echo line$i; done; exit 3"),
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap_err();
        match err {
            OcrError::ProcessFailed { code, tail, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(tail, "line3\nline4\nline5");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unbounded_hard_timeout_runs_to_completion() {
        let supervisor = ProcessSupervisor::new(SupervisorLimits {
            hard_timeout: Duration::MAX,
            ..limits(0, 10_000)
        });
        let report = supervisor
            .run(&sh("echo ok"), &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(report.tail, vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let supervisor = ProcessSupervisor::new(limits(300, 10_000));
        let pid = Arc::new(Mutex::new(None::<u32>));
        let seen = pid.clone();
        let err = supervisor
            .run(&sh("echo $$; exec sleep 30"), &CancellationToken::new(), |event| {
                if let SupervisorEvent::Line(line) = event {
                    *seen.lock().unwrap() = line.trim().parse().ok();
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Timeout { .. }));

        let pid = (*pid.lock().unwrap()).expect("child printed its pid");
        assert!(!Path::new(&format!("/proc/{pid}")).exists());
    }

    #[tokio::test]
    async fn test_idle_heartbeat_once_per_threshold() {
        let supervisor = ProcessSupervisor::new(limits(10_000, 150));
        let mut idles = Vec::new();
        supervisor
            .run(&sh("sleep 0.4"), &CancellationToken::new(), |event| {
                if let SupervisorEvent::Idle(quiet) = event {
                    idles.push(quiet);
                }
            })
            .await
            .unwrap();
        assert!(!idles.is_empty());
        assert!(idles.len() <= 3, "too many heartbeats: {idles:?}");
        assert!(idles.iter().all(|d| *d >= Duration::from_millis(150)));
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_job() {
        let supervisor = ProcessSupervisor::new(limits(10_000, 10_000));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let err = supervisor
            .run(&sh("sleep 30"), &cancel, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_not_found() {
        let supervisor = ProcessSupervisor::default();
        let err = supervisor
            .run(
                &CommandSpec::new("/nonexistent/ocrmypdf"),
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::ToolNotFound(name) if name == "ocrmypdf"));
    }

    #[test]
    fn test_display_quotes_arguments() {
        let spec = CommandSpec::new("ocrmypdf")
            .args(["--language", "jpn+eng"])
            .arg("/docs/My Scan.pdf");
        assert_eq!(spec.display(), "ocrmypdf --language jpn+eng '/docs/My Scan.pdf'");
    }
}
