use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::LimitsConfig;
use crate::error::EngineError;

use super::capture::read_capped;
use super::process_table::{ProcessTable, Signal, SystemProcessTable};
use super::shutdown::TreeReaper;
use super::{Outcome, RawOutput};

enum Race {
    Finished(io::Result<RawOutput>),
    Deadline,
    Cancelled,
}

/// Runs one interpreter against a staged file under a wall-clock budget
///
/// The child leads its own session and process group. When the budget runs
/// out (or the caller cancels) the whole tree is reclaimed before `run`
/// returns, and the child is always reaped.
pub struct Supervisor<T: ProcessTable = SystemProcessTable> {
    table: Arc<T>,
    timeout: Duration,
    grace_period: Duration,
    capture_limit: usize,
}

impl Supervisor<SystemProcessTable> {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self::with_table(Arc::new(SystemProcessTable), limits)
    }
}

impl<T: ProcessTable> Supervisor<T> {
    pub fn with_table(table: Arc<T>, limits: &LimitsConfig) -> Self {
        Self {
            table,
            timeout: limits.timeout.into(),
            grace_period: limits.grace_period.into(),
            capture_limit: limits.capture_limit.into(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run(
        &self,
        command: &[String],
        script: &Path,
        cancel: &CancellationToken,
    ) -> Result<Outcome, EngineError> {
        let (mut child, pid) = spawn(command, script)?;
        log::debug!("Process started with PID: {pid}");

        let mut stdout_task = capture_task(child.stdout.take(), self.capture_limit);
        let mut stderr_task = capture_task(child.stderr.take(), self.capture_limit);

        // Exit alone is not enough: a descendant holding the pipes open keeps
        // the run going until the deadline.
        let finished = async {
            let status = child.wait().await?;
            let stdout = join_capture(&mut stdout_task).await?;
            let stderr = join_capture(&mut stderr_task).await?;
            Ok::<_, io::Error>(RawOutput {
                stdout,
                stderr,
                return_code: return_code(status),
            })
        };

        let race = tokio::select! {
            res = finished => Race::Finished(res),
            _ = tokio::time::sleep(self.timeout) => Race::Deadline,
            _ = cancel.cancelled() => Race::Cancelled,
        };

        match race {
            Race::Finished(Ok(raw)) => {
                log::debug!("Process completed with return code: {:?}", raw.return_code);
                // The leader is already reaped, so if its pid was taken by another
                // session leader in between, this sweep reaches that group instead
                if let Ok(true) = self.table.signal_group(pid, Signal::Kill) {
                    log::debug!("Killed processes left behind in group {pid}");
                }
                Ok(Outcome::Completed(raw))
            }
            Race::Finished(Err(e)) => {
                log::error!("Lost track of process {pid}: {e}");
                self.reclaim(&mut child, pid).await;
                Err(EngineError::Supervision(e))
            }
            Race::Deadline => {
                log::warn!(
                    "Execution timeout after {} seconds",
                    self.timeout.as_secs_f64()
                );
                self.reclaim(&mut child, pid).await;
                stdout_task.abort();
                stderr_task.abort();
                Ok(Outcome::TimedOut)
            }
            Race::Cancelled => {
                log::info!("Execution of process {pid} cancelled");
                self.reclaim(&mut child, pid).await;
                stdout_task.abort();
                stderr_task.abort();
                Ok(Outcome::Cancelled)
            }
        }
    }

    /// Tears down the child and everything below it, then reaps the child
    ///
    /// Descendants and the group leader share one grace period, so the whole
    /// teardown never takes longer than `grace_period` plus the final reap.
    async fn reclaim(&self, child: &mut Child, pid: u32) {
        let deadline = Instant::now() + self.grace_period;

        let reclaimed = TreeReaper::new(self.table.as_ref())
            .reclaim(pid, deadline)
            .await;
        if !reclaimed.killed.is_empty() {
            log::debug!("Force-killed processes {:?}", reclaimed.killed);
        }

        // The leader is not reaped yet, so `pid` still names this group
        if let Err(e) = self.table.signal_group(pid, Signal::Kill) {
            log::warn!("Failed to sweep process group {pid}: {e}");
        }
        if !self.table.still_running(&[pid]).is_empty() {
            log::debug!("Process {pid} survived the group kill, killing directly");
            if let Err(e) = child.start_kill() {
                log::debug!("Direct kill of process {pid} failed: {e}");
            }
        }

        match child.wait().await {
            Ok(status) => log::debug!("Process {pid} reaped ({status})"),
            Err(e) => log::warn!("Error waiting for process {pid} after timeout: {e}"),
        }
    }
}

fn spawn(command: &[String], script: &Path) -> Result<(Child, u32), EngineError> {
    let Some((program, args)) = command.split_first() else {
        return Err(EngineError::Spawn {
            interpreter: String::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty interpreter command"),
        });
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // New session, so the child leads a process group of its own
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let spawn_error = |source: io::Error| EngineError::Spawn {
        interpreter: program.clone(),
        source,
    };
    let child = cmd.spawn().map_err(spawn_error)?;
    let pid = child
        .id()
        .ok_or_else(|| spawn_error(io::Error::other("process exited before its pid was read")))?;

    Ok((child, pid))
}

/// Exit code, or the negated signal number for a process killed by a signal
fn return_code(status: ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|signal| -signal))
}

fn capture_task<R>(stream: Option<R>, limit: usize) -> JoinHandle<io::Result<Vec<u8>>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match stream {
            Some(stream) => read_capped(stream, limit).await,
            None => Ok(Vec::new()),
        }
    })
}

async fn join_capture(task: &mut JoinHandle<io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    task.await.map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ByteSize, MilliSecond};

    fn limits(timeout_ms: u64, grace_ms: u64) -> LimitsConfig {
        LimitsConfig {
            timeout: MilliSecond(timeout_ms),
            grace_period: MilliSecond(grace_ms),
            ..LimitsConfig::default()
        }
    }

    fn script(body: &str) -> tempfile::NamedTempFile {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".sh").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    fn bash() -> Vec<String> {
        vec!["bash".to_string()]
    }

    #[tokio::test]
    async fn test_completed_run_captures_streams() {
        let supervisor = Supervisor::new(&limits(5_000, 500));
        let file = script("echo out; echo err >&2; exit 3");

        let outcome = supervisor
            .run(&bash(), file.path(), &CancellationToken::new())
            .await
            .unwrap();

        let Outcome::Completed(raw) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(raw.stdout, b"out\n");
        assert_eq!(raw.stderr, b"err\n");
        assert_eq!(raw.return_code, Some(3));
    }

    #[tokio::test]
    async fn test_capture_limit_bounds_output() {
        let limits = LimitsConfig {
            capture_limit: ByteSize(64),
            ..limits(5_000, 500)
        };
        let supervisor = Supervisor::new(&limits);
        let file = script("for i in $(seq 1 2000); do echo line $i; done");

        let outcome = supervisor
            .run(&bash(), file.path(), &CancellationToken::new())
            .await
            .unwrap();

        let Outcome::Completed(raw) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(raw.stdout.len(), 64);
        assert_eq!(raw.return_code, Some(0));
    }

    #[tokio::test]
    async fn test_timeout_reclaims_tree() {
        let supervisor = Supervisor::new(&limits(300, 500));
        let pid_file = tempfile::NamedTempFile::new().unwrap();
        let file = script(&format!(
            "sleep 30 &\necho $! > {}\ntrap '' TERM\nwhile true; do sleep 0.05; done\n",
            pid_file.path().display()
        ));

        let started = std::time::Instant::now();
        let outcome = supervisor
            .run(&bash(), file.path(), &CancellationToken::new())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(matches!(outcome, Outcome::TimedOut));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(300 + 500 + 1_000));

        let sleeper: u32 = std::fs::read_to_string(pid_file.path())
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(SystemProcessTable.still_running(&[sleeper]).is_empty());
    }

    #[tokio::test]
    async fn test_leader_gets_grace_while_descendant_ignores_terminate() {
        let supervisor = Supervisor::new(&limits(500, 1_000));
        let scratch = tempfile::tempdir().unwrap();
        let marker = scratch.path().join("graceful");
        let file = script(&format!(
            "bash -c 'trap \"\" TERM; while true; do sleep 0.05; done' &\n\
             trap 'sleep 0.2; echo graceful > {}; exit 0' TERM\n\
             while true; do sleep 0.05; done\n",
            marker.display()
        ));

        let started = std::time::Instant::now();
        let outcome = supervisor
            .run(&bash(), file.path(), &CancellationToken::new())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(matches!(outcome, Outcome::TimedOut));
        assert!(elapsed >= Duration::from_millis(500 + 1_000));
        assert!(elapsed < Duration::from_millis(500 + 1_000 + 1_000));
        assert!(marker.exists(), "leader was killed before its handler ran");
    }

    #[tokio::test]
    async fn test_signal_death_reports_negative_code() {
        let supervisor = Supervisor::new(&limits(5_000, 500));
        let file = script("kill -9 $$");

        let outcome = supervisor
            .run(&bash(), file.path(), &CancellationToken::new())
            .await
            .unwrap();

        let Outcome::Completed(raw) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(raw.return_code, Some(-9));
    }

    #[tokio::test]
    async fn test_cancel_stops_run() {
        let supervisor = Supervisor::new(&limits(10_000, 300));
        let file = script("while true; do sleep 0.05; done");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = supervisor.run(&bash(), file.path(), &cancel).await.unwrap();
        assert!(matches!(outcome, Outcome::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let supervisor = Supervisor::new(&limits(1_000, 100));
        let file = script("true");
        let command = vec!["sniprun-no-such-interpreter".to_string()];

        let err = supervisor
            .run(&command, file.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            EngineError::Spawn {
                interpreter,
                source,
            } => {
                assert_eq!(interpreter, "sniprun-no-such-interpreter");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
