//! External simplifier process
//!
//! Contract with the script: one absolute path, newline-terminated, on stdin;
//! simplified text on stdout; diagnostics on stderr; exit code 0 on success.

use crate::errors::SimplifyError;
use crate::runner::{Simplifier, SimplifierOutput};
use crate::staging::absolutize;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, instrument, warn};

/// Runs `{interpreter} {script}` once per request
#[derive(Debug, Clone)]
pub struct ProcessSimplifier {
    interpreter: String,
    script_path: PathBuf,
}

impl ProcessSimplifier {
    pub fn new(interpreter: impl Into<String>, script_path: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script_path: script_path.into(),
        }
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    fn absolute_script(&self) -> Result<PathBuf, SimplifyError> {
        Ok(absolutize(&self.script_path)?)
    }
}

#[async_trait]
impl Simplifier for ProcessSimplifier {
    async fn prepare(&self) -> Result<(), SimplifyError> {
        match tokio::fs::metadata(&self.script_path).await {
            Ok(meta) if meta.is_file() => Ok(()),
            _ => Err(SimplifyError::ScriptNotFound(
                self.script_path.display().to_string(),
            )),
        }
    }

    #[instrument(skip(self), fields(script = %self.script_path.display()))]
    async fn run(&self, input: &Path) -> Result<SimplifierOutput, SimplifyError> {
        let script = self.absolute_script()?;
        let workdir = script.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut command = Command::new(&self.interpreter);
        command
            .arg(&script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !workdir.as_os_str().is_empty() {
            command.current_dir(&workdir);
        }

        let mut child = command.spawn().map_err(|source| SimplifyError::Spawn {
            program: self.interpreter.clone(),
            source,
        })?;
        debug!(pid = ?child.id(), "Simplifier process started");

        if let Some(stdin) = child.stdin.take() {
            send_input(stdin, input).await;
        }

        let (stdout, stderr) = drain_output(child.stdout.take(), child.stderr.take()).await?;
        let status = child.wait().await?;

        info!(
            exit_code = ?status.code(),
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "Simplifier process finished"
        );

        Ok(SimplifierOutput {
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

/// Write the input path and close stdin so the script's blocking read returns
async fn send_input(mut stdin: ChildStdin, input: &Path) {
    let line = format!("{}\n", input.display());
    if let Err(e) = stdin.write_all(line.as_bytes()).await {
        // The script may exit without reading its input
        warn!(error = %e, "Could not write input path to simplifier");
        return;
    }
    if let Err(e) = stdin.shutdown().await {
        warn!(error = %e, "Could not close simplifier stdin");
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    chunk: &mut [u8],
) -> std::io::Result<usize> {
    match reader.as_mut() {
        Some(reader) => reader.read(chunk).await,
        None => Ok(0),
    }
}

/// Drain stdout and stderr concurrently until both reach EOF.
///
/// Bytes are kept raw; decoding happens once at the end so multi-byte
/// characters split across reads survive.
async fn drain_output(
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
) -> Result<(Vec<u8>, Vec<u8>), SimplifyError> {
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let mut stdout_done = stdout.is_none();
    let mut stderr_done = stderr.is_none();
    let mut stdout = stdout;
    let mut stderr = stderr;

    let mut stdout_chunk = vec![0u8; 8192];
    let mut stderr_chunk = vec![0u8; 8192];

    while !stdout_done || !stderr_done {
        tokio::select! {
            read = read_chunk(&mut stdout, &mut stdout_chunk), if !stdout_done => {
                match read? {
                    0 => stdout_done = true,
                    n => stdout_buf.extend_from_slice(&stdout_chunk[..n]),
                }
            }
            read = read_chunk(&mut stderr, &mut stderr_chunk), if !stderr_done => {
                match read? {
                    0 => stderr_done = true,
                    n => stderr_buf.extend_from_slice(&stderr_chunk[..n]),
                }
            }
        }
    }

    Ok((stdout_buf, stderr_buf))
}
