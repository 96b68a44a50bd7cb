//! Command execution - Synchronous capture and streaming subprocesses
//!
//! Everything the engine knows about colima and docker comes through this
//! module. The contract is deliberately small: run a command and hand back
//! merged output plus the exit status, or keep a subprocess alive and deliver
//! its output incrementally until torn down.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};

use thiserror::Error;
use tracing::{debug, warn};

/// Errors from the command layer. Callers in the refresh path treat these as
/// "no output"; only the diagnostics path surfaces them.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to collect output of {program}: {source}")]
    Output {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a synchronous command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Merged stdout + stderr, lossily decoded.
    pub text: String,
    /// Whether the command exited zero.
    pub success: bool,
    /// Raw exit code when the process terminated normally.
    pub code: Option<i32>,
}

/// Opaque shell-command collaborator.
///
/// Services hold this as a trait object so reconciliation tests can stub the
/// external world with canned output.
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, capturing merged stdout/stderr.
    fn run(
        &self,
        program: &str,
        args: &[&str],
        extra_env: &[(String, String)],
    ) -> Result<CommandOutput, CommandError>;

    /// Spawn a long-lived command whose output is delivered in chunks.
    fn stream(
        &self,
        program: &str,
        args: &[&str],
        extra_env: &[(String, String)],
    ) -> Result<LogStream, CommandError>;
}

/// `CommandRunner` backed by real subprocesses.
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        extra_env: &[(String, String)],
    ) -> Result<CommandOutput, CommandError> {
        debug!(program, ?args, "running command");
        let output = Command::new(program)
            .args(args)
            .envs(extra_env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&output.stderr));
        }

        Ok(CommandOutput {
            text,
            success: output.status.success(),
            code: output.status.code(),
        })
    }

    fn stream(
        &self,
        program: &str,
        args: &[&str],
        extra_env: &[(String, String)],
    ) -> Result<LogStream, CommandError> {
        debug!(program, ?args, "starting streaming command");
        let mut child = Command::new(program)
            .args(args)
            .envs(extra_env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_chunk_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_chunk_reader(stderr, tx);
        }

        Ok(LogStream { child, chunks: rx })
    }
}

/// Handle to a streaming subprocess. Dropping it terminates the child.
pub struct LogStream {
    child: Child,
    chunks: Receiver<String>,
}

impl LogStream {
    /// Receiver of incremental text chunks. The channel closes once the
    /// subprocess exits or the stream is terminated.
    pub fn chunks(&self) -> &Receiver<String> {
        &self.chunks
    }

    /// Next chunk if one is ready, without blocking.
    pub fn try_next(&self) -> Option<String> {
        self.chunks.try_recv().ok()
    }

    /// Kill the subprocess and detach the reader threads. The readers exit on
    /// their own once the pipes close.
    pub fn terminate(mut self) {
        if let Err(e) = self.child.kill() {
            warn!("failed to kill streaming command: {}", e);
        }
        let _ = self.child.wait();
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_chunk_reader<R: Read + Send + 'static>(mut source: R, tx: Sender<String>) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match source.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
            }
        }
    });
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_merges_stdout_and_stderr() {
        let out = ShellRunner
            .run("sh", &["-c", "echo out; echo err >&2"], &[])
            .unwrap();
        assert!(out.success);
        assert!(out.text.contains("out"));
        assert!(out.text.contains("err"));
    }

    #[test]
    fn run_reports_exit_status() {
        let out = ShellRunner.run("sh", &["-c", "exit 3"], &[]).unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
    }

    #[test]
    fn run_passes_extra_env() {
        let env = vec![("COLIMABAR_TEST_VAR".to_string(), "hello".to_string())];
        let out = ShellRunner
            .run("sh", &["-c", "echo $COLIMABAR_TEST_VAR"], &env)
            .unwrap();
        assert_eq!(out.text.trim(), "hello");
    }

    #[test]
    fn stream_delivers_chunks_and_terminates() {
        let stream = ShellRunner
            .stream("sh", &["-c", "echo first; sleep 30"], &[])
            .unwrap();
        let chunk = stream
            .chunks()
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("expected a chunk");
        assert!(chunk.contains("first"));
        stream.terminate();
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let err = ShellRunner
            .run("definitely-not-a-real-binary-xyz", &[], &[])
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
