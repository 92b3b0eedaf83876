use std::process::Command;

use log::{debug, warn};

use crate::ProfilerError;

/// Captured result of one external program run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs external programs to completion.
///
/// Calls block until the program exits; there is no timeout and no retry.
pub trait ToolRunner {
    /// Runs `program` with `args` and captures its output.
    ///
    /// Only a failure to start the program is an error. A non-zero exit is
    /// reported through [`ToolOutput::status`].
    fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput, ProfilerError>;

    /// Runs a command line through `sh -c`
    fn run_shell(&self, command_line: &str) -> Result<ToolOutput, ProfilerError> {
        self.run("sh", &["-c".to_string(), command_line.to_string()])
    }
}

/// [`ToolRunner`] backed by real subprocesses
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput, ProfilerError> {
        debug!("running {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| ProfilerError::ExternalTool {
                tool: program.to_string(),
                source,
            })?;

        let result = ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !result.success() {
            warn!(
                "{} exited with status {:?}: {}",
                program,
                result.status,
                result.stderr.trim()
            );
        }
        Ok(result)
    }
}

/// Logs a non-zero exit and hands back stdout
pub(crate) fn stdout_of(program: &str, output: ToolOutput) -> String {
    if !output.success() {
        warn!(
            "{} exited with status {:?}, using whatever it printed",
            program,
            output.status
        );
    }
    output.stdout
}
