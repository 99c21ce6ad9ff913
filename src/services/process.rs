// External program runner shared by the segmentation and analysis stages

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::core::errors::ProcessError;

/// Exit status and collected stdout of a finished program
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// None when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A script launched through an interpreter, e.g. `python3 analyze.py ...`
#[derive(Debug, Clone)]
pub struct ExternalProgram {
    interpreter: String,
    script: PathBuf,
    timeout: Option<Duration>,
}

impl ExternalProgram {
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            timeout,
        }
    }

    /// Name used in logs and errors
    pub fn label(&self) -> String {
        self.script
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.script.display().to_string())
    }

    /// Run the script to completion and collect its stdout.
    ///
    /// Output lines are logged at debug as they arrive. The child is killed
    /// if this future is dropped or the timeout elapses.
    pub async fn run(&self, args: Vec<OsString>) -> Result<ProcessOutput, ProcessError> {
        let label = self.label();
        debug!("Launching {} {} ({} args)", self.interpreter, self.script.display(), args.len());
        let start = Instant::now();

        let mut child = Command::new(&self.interpreter)
            .arg(&self.script)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: label.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let completion = async {
            let (status, stdout, stderr) = tokio::join!(
                child.wait(),
                collect_lines(stdout, &label, "stdout", true),
                collect_lines(stderr, &label, "stderr", false),
            );
            let io_error = |source: std::io::Error| ProcessError::Io {
                program: label.clone(),
                source,
            };
            let status = status.map_err(io_error)?;
            let stdout = stdout.map_err(io_error)?;
            stderr.map_err(io_error)?;

            Ok::<_, ProcessError>(ProcessOutput {
                exit_code: status.code(),
                stdout,
            })
        };

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, completion)
                .await
                .map_err(|_| {
                    warn!("{} exceeded {}s, killing it", label, limit.as_secs());
                    ProcessError::TimedOut {
                        program: label.clone(),
                        seconds: limit.as_secs(),
                    }
                })??,
            None => completion.await?,
        };

        debug!(
            "{} exited with {:?} after {:.2}s",
            label,
            output.exit_code,
            start.elapsed().as_secs_f64()
        );
        Ok(output)
    }
}

async fn collect_lines<R>(
    stream: Option<R>,
    program: &str,
    stream_name: &str,
    keep: bool,
) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let Some(stream) = stream else {
        return Ok(collected);
    };

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        debug!("[{} {}] {}", program, stream_name, line);
        if keep {
            collected.push_str(&line);
            collected.push('\n');
        }
    }
    Ok(collected)
}
