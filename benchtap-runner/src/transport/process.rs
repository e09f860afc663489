//! Process plumbing shared by the local and remote transports
//!
//! Commands are spawned in their own process group so a timeout can kill
//! the whole tree, not only the shell that launched it.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Channel, OutputLine, ProcOutput, TIMEOUT_EXIT_CODE, TransportError};

/// Reader grace applied after a timeout kill
const POST_KILL_GRACE: Duration = Duration::from_millis(100);

/// Runs a prepared command to completion, buffering its output
pub(crate) async fn run_buffered(
    mut command: Command,
    label: &str,
    stdin: Option<&str>,
    timeout: Option<Duration>,
) -> Result<ProcOutput, TransportError> {
    let mut child = spawn(&mut command, label, stdin.is_some())?;
    feed_stdin(&mut child, stdin);
    let pid = child.id();

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                debug!("Buffered command '{}' timed out after {:?}", label, limit);
                kill_process_group(pid);
                return Err(TransportError::TimedOut(limit));
            }
        },
        None => child.wait_with_output().await?,
    };

    Ok(ProcOutput {
        exit_code: exit_code(output.status),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Runs a prepared command, streaming its output line by line
///
/// Both readers are joined (or aborted once `grace` runs out) before this
/// returns, which drops every clone of `lines`.
pub(crate) async fn run_streaming(
    mut command: Command,
    label: &str,
    stdin: Option<&str>,
    timeout: Option<Duration>,
    lines: UnboundedSender<OutputLine>,
    grace: Duration,
) -> Result<i32, TransportError> {
    let mut child = spawn(&mut command, label, stdin.is_some())?;
    feed_stdin(&mut child, stdin);
    let pid = child.id();

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, Channel::Stdout, lines.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, Channel::Stderr, lines.clone()));
    }
    drop(lines);

    let waited = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status.map(|s| (exit_code(s), grace)),
            Err(_) => {
                warn!("Command '{}' exceeded timeout of {:?}, killing it", label, limit);
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    debug!("Kill after timeout reported: {}", e);
                }
                Ok((TIMEOUT_EXIT_CODE, POST_KILL_GRACE))
            }
        },
        None => child.wait().await.map(|s| (exit_code(s), grace)),
    };

    match waited {
        Ok((code, grace)) => {
            join_readers(readers, grace).await;
            Ok(code)
        }
        Err(e) => {
            kill_process_group(pid);
            join_readers(readers, POST_KILL_GRACE).await;
            Err(TransportError::Io(e))
        }
    }
}

fn spawn(command: &mut Command, label: &str, piped_stdin: bool) -> Result<Child, TransportError> {
    command
        .stdin(if piped_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    debug!("Launching: {}", label);
    command.spawn().map_err(|source| TransportError::Spawn {
        command: label.to_string(),
        source,
    })
}

/// Writes the stdin payload from a separate task and closes the pipe
fn feed_stdin(child: &mut Child, payload: Option<&str>) {
    let (Some(mut pipe), Some(payload)) = (child.stdin.take(), payload) else {
        return;
    };
    let payload = payload.as_bytes().to_vec();
    tokio::spawn(async move {
        if let Err(e) = pipe.write_all(&payload).await {
            debug!("Failed to write stdin payload: {}", e);
        }
    });
}

fn spawn_reader<R>(pipe: R, channel: Channel, lines: UnboundedSender<OutputLine>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf).into_owned();
                    // Keep draining even if nobody listens so the child never blocks
                    let _ = lines.send(OutputLine { channel, text });
                }
                Err(e) => {
                    debug!("{} reader stopped: {}", channel.as_str(), e);
                    break;
                }
            }
        }
    })
}

async fn join_readers(readers: Vec<JoinHandle<()>>, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            debug!("Output reader still busy after {:?}, aborting it", grace);
            reader.abort();
            let _ = reader.await;
        }
    }
}

/// Exit code of a finished process; signal deaths map to 128 + signal
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    // SAFETY: kill(2) takes no pointers; a negative pid targets the group
    // created for this child by `process_group(0)`.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if rc != 0 {
        debug!(
            "Killing process group {} failed: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::sync::mpsc;

    fn shell(cmd: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        command
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<OutputLine>) -> Vec<OutputLine> {
        let mut out = Vec::new();
        while let Some(line) = rx.recv().await {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn test_streaming_delivers_lines_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let code = run_streaming(
            shell("printf 'a\\nb\\nc'; echo oops >&2"),
            "test",
            None,
            None,
            tx,
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(code, 0);

        let lines = collect(rx).await;
        let stdout: Vec<&str> = lines
            .iter()
            .filter(|l| l.channel == Channel::Stdout)
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(stdout, vec!["a\n", "b\n", "c"]);
        assert!(
            lines
                .iter()
                .any(|l| l.channel == Channel::Stderr && l.text == "oops\n")
        );
    }

    #[tokio::test]
    async fn test_streaming_timeout_kills_process_tree() {
        let (tx, rx) = mpsc::unbounded_channel();
        let started = Instant::now();
        let code = run_streaming(
            shell("sleep 5; echo late"),
            "test",
            None,
            Some(Duration::from_secs(1)),
            tx,
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        assert_eq!(code, TIMEOUT_EXIT_CODE);
        assert!(started.elapsed() < Duration::from_millis(1800));
        assert!(collect(rx).await.is_empty());
    }

    /// Whether a pid names a live (non-zombie) process
    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
            return false;
        };
        // State is the first field after the parenthesised command name
        let state = stat.rsplit_once(')').and_then(|(_, rest)| rest.trim_start().chars().next());
        !matches!(state, Some('Z') | Some('X') | None)
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_streaming_timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let (tx, rx) = mpsc::unbounded_channel();

        let code = run_streaming(
            shell(&format!("sleep 30 & echo $! > {}; wait", pid_file.display())),
            "test",
            None,
            Some(Duration::from_millis(500)),
            tx,
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(code, TIMEOUT_EXIT_CODE);
        drop(rx);

        let pid: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        let deadline = Instant::now() + Duration::from_secs(1);
        while is_running(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!is_running(pid), "background child {} survived the timeout", pid);
    }

    #[tokio::test]
    async fn test_streaming_feeds_stdin() {
        let (tx, rx) = mpsc::unbounded_channel();
        let code = run_streaming(shell("cat"), "test", Some("one\ntwo\n"), None, tx, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(code, 0);
        let texts: Vec<String> = collect(rx).await.into_iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["one\n", "two\n"]);
    }

    #[tokio::test]
    async fn test_buffered_run_times_out() {
        let err = run_buffered(shell("sleep 5"), "test", None, Some(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::TimedOut(_)));
    }

    #[tokio::test]
    async fn test_buffered_run_reports_exit_code() {
        let output = run_buffered(shell("echo out; echo err >&2; exit 3"), "test", None, None)
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = run_streaming(
            Command::new("/nonexistent/benchtap-binary"),
            "missing",
            None,
            None,
            tx,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }
}
