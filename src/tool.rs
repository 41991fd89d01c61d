//! Running external flashing tools
//!
//! Every device operation is delegated to a command-line tool. A tool is run
//! to completion, its standard output is forwarded line by line while it
//! runs, and the exit code decides the result. Interpreting the output is up
//! to the caller.

use std::{
    io::{BufRead, BufReader, Read},
    path::Path,
    process::{Child, Command, Stdio},
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use log::debug;

use crate::error::ToolError;

/// How often a running tool is polled for its exit status
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long output is still collected once the tool has exited
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Something that can run an external tool to completion
pub trait ToolRunner {
    /// Run `program` with `args`, passing every line of its standard output
    /// to `sink` as soon as it is read
    fn run(
        &mut self,
        program: &Path,
        args: &[String],
        sink: &mut dyn FnMut(&str),
    ) -> Result<(), ToolError>;
}

/// Runs tools as child processes of the current process
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill any tool that runs for longer than `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

impl ToolRunner for ProcessRunner {
    fn run(
        &mut self,
        program: &Path,
        args: &[String],
        sink: &mut dyn FnMut(&str),
    ) -> Result<(), ToolError> {
        let name = program.display().to_string();
        debug!("Running: {} {}", name, args.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Launch {
                program: name.clone(),
                source,
            })?;
        let mut tool = RunningTool::new(child);

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        // The exit status ends the wait, not the end of the output: a
        // detached grandchild may keep the pipes open long after the tool
        // itself exited.
        let status = loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(ToolError::TimedOut {
                    program: name,
                    timeout: self.timeout.unwrap_or_default(),
                });
            }

            match tool.lines.recv_timeout(EXIT_POLL_INTERVAL) {
                Ok(line) => {
                    sink(&line);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => thread::sleep(EXIT_POLL_INTERVAL),
                Err(RecvTimeoutError::Timeout) => {}
            }

            let status = tool.child.try_wait().map_err(|source| ToolError::Io {
                program: name.clone(),
                source,
            })?;
            if let Some(status) = status {
                break status;
            }
        };
        tool.reaped = true;

        // Output the tool wrote just before exiting may still be in the pipe
        while let Ok(line) = tool.lines.recv_timeout(OUTPUT_GRACE) {
            sink(&line);
        }

        let stderr = tool.take_stderr();
        debug!("'{}' finished with {}", name, status);

        if status.success() {
            Ok(())
        } else {
            Err(ToolError::Exited {
                program: name,
                code: status.code(),
                message: last_line(&stderr),
            })
        }
    }
}

/// A spawned tool whose output is being collected
///
/// The child is killed when this is dropped before it was waited on, so an
/// abandoned invocation does not keep the serial port busy.
struct RunningTool {
    child: Child,
    lines: mpsc::Receiver<String>,
    stderr: mpsc::Receiver<String>,
    reaped: bool,
}

impl RunningTool {
    fn new(mut child: Child) -> Self {
        let (tx, lines) = mpsc::channel();

        if let Some(stdout) = child.stdout.take() {
            thread::spawn(move || {
                for line in read_lines(stdout) {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }

        let (stderr_tx, stderr) = mpsc::channel();
        if let Some(mut pipe) = child.stderr.take() {
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ignored = pipe.read_to_end(&mut buffer);
                let _ignored = stderr_tx.send(String::from_utf8_lossy(&buffer).into_owned());
            });
        }

        Self {
            child,
            lines,
            stderr,
            reaped: false,
        }
    }

    fn take_stderr(&mut self) -> String {
        self.stderr.recv_timeout(OUTPUT_GRACE).unwrap_or_default()
    }
}

impl Drop for RunningTool {
    fn drop(&mut self) {
        if !self.reaped {
            let _ignored = self.child.kill();
            let _ignored = self.child.wait();
        }
    }
}

/// Split a byte stream into lines without requiring valid UTF-8
fn read_lines(reader: impl Read) -> impl Iterator<Item = String> {
    let mut reader = BufReader::new(reader);

    std::iter::from_fn(move || {
        let mut buffer = Vec::new();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                Some(line.trim_end_matches(['\n', '\r']).to_string())
            }
        }
    })
}

fn last_line(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_line_skips_trailing_blanks() {
        assert_eq!(
            last_line("Traceback:\n  oops\nOSError: 28\n\n"),
            Some(String::from("OSError: 28"))
        );
        assert_eq!(last_line("\n \n"), None);
    }

    #[test]
    fn lines_are_split_and_stripped() {
        let lines: Vec<_> = read_lines(&b"/main.py\r\n/lib\n\nboot.py"[..]).collect();

        assert_eq!(lines, vec!["/main.py", "/lib", "", "boot.py"]);
    }

    #[test]
    fn missing_program_fails_to_launch() {
        let mut runner = ProcessRunner::new();
        let err = runner
            .run(Path::new("/nonexistent/mpyflash-tool"), &[], &mut |_| {})
            .unwrap_err();

        assert!(matches!(err, ToolError::Launch { .. }));
    }

    #[cfg(unix)]
    fn sh(script: &str) -> Vec<String> {
        vec![String::from("-c"), String::from(script)]
    }

    #[cfg(unix)]
    #[test]
    fn streams_stdout_and_succeeds() {
        let mut runner = ProcessRunner::new();
        let mut seen = Vec::new();

        runner
            .run(Path::new("sh"), &sh("echo one; echo two"), &mut |line| {
                seen.push(line.to_string())
            })
            .unwrap();

        assert_eq!(seen, vec!["one", "two"]);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_carries_code_and_stderr() {
        let mut runner = ProcessRunner::new();
        let err = runner
            .run(
                Path::new("sh"),
                &sh("echo partial; echo 'could not enter raw repl' >&2; exit 3"),
                &mut |_| {},
            )
            .unwrap_err();

        match err {
            ToolError::Exited { code, message, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(message.as_deref(), Some("could not enter raw repl"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn hung_tool_is_killed_after_timeout() {
        let mut runner = ProcessRunner::with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let err = runner
            .run(Path::new("sh"), &sh("sleep 30"), &mut |_| {})
            .unwrap_err();

        assert!(matches!(err, ToolError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn detached_grandchild_does_not_hold_the_runner() {
        let mut runner = ProcessRunner::new();
        let started = Instant::now();
        let mut seen = Vec::new();

        runner
            .run(Path::new("sh"), &sh("sleep 30 & echo started"), &mut |line| {
                seen.push(line.to_string())
            })
            .unwrap();

        assert_eq!(seen, vec!["started"]);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
