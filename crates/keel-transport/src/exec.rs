//! External command execution with live output.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{TransportError, TransportResult};

/// Which pipe a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Everything a finished command printed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code; -1 if the process was killed by a signal.
    pub code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// Both pipes interleaved in arrival order.
    pub messages: Vec<String>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn stdout_text(&self) -> String {
        self.stdout.concat()
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.concat()
    }
}

/// Runs `program` with `args` and collects its output.
///
/// `on_message` sees every chunk as it arrives. Chunks are not line-aligned:
/// progress output that rewrites a line with `\r` arrives piecewise.
pub async fn exec<F>(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    mut on_message: F,
) -> TransportResult<ExecOutput>
where
    F: FnMut(StreamKind, &str) + Send,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    debug!(program = %program, args = ?args, "Running command");
    let mut child = command
        .spawn()
        .map_err(|e| TransportError::spawn(program, e.to_string()))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump(stdout, StreamKind::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump(stderr, StreamKind::Stderr, tx.clone()));
    }
    drop(tx);

    let mut output = ExecOutput::default();
    while let Some((kind, chunk)) = rx.recv().await {
        on_message(kind, &chunk);
        match kind {
            StreamKind::Stdout => output.stdout.push(chunk.clone()),
            StreamKind::Stderr => output.stderr.push(chunk.clone()),
        }
        output.messages.push(chunk);
    }

    let status = child.wait().await?;
    output.code = status.code().unwrap_or(-1);
    debug!(program = %program, code = output.code, "Command finished");
    Ok(output)
}

/// Returns `true` if `program --version` runs and exits successfully.
pub async fn is_available(program: &str) -> bool {
    match exec(program, &["--version"], None, |_, _| {}).await {
        Ok(output) => output.success(),
        Err(e) => {
            trace!(program = %program, error = %e, "Program not available");
            false
        }
    }
}

async fn pump<R>(mut reader: R, kind: StreamKind, tx: mpsc::UnboundedSender<(StreamKind, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                if tx.send((kind, chunk)).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collects_both_pipes_and_exit_code() {
        let mut live = Vec::new();
        let out = exec(
            "sh",
            &["-c", "echo hello; echo oops 1>&2; exit 3"],
            None,
            |kind, msg| live.push((kind, msg.to_string())),
        )
        .await
        .unwrap();

        assert_eq!(out.code, 3);
        assert!(!out.success());
        assert_eq!(out.stdout_text(), "hello\n");
        assert_eq!(out.stderr_text(), "oops\n");
        assert_eq!(out.messages.len(), live.len());
    }

    #[tokio::test]
    async fn test_runs_in_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("marker"), "").unwrap();
        let out = exec("ls", &[], Some(tmp.path()), |_, _| {}).await.unwrap();
        assert!(out.stdout_text().contains("marker"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = exec("keel-no-such-program", &[], None, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
        assert!(!is_available("keel-no-such-program").await);
    }
}
