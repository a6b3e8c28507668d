//! Helper-program execution.

use std::process::{Command, Output};

use tracing::debug;

use crate::host::HostError;

/// Run a program synchronously and capture its output, whatever the exit status.
///
/// # Errors
///
/// Returns an error only if the program cannot be started.
pub fn capture(program: &str, args: &[&str]) -> Result<Output, HostError> {
    debug!(program, ?args, "Running query");
    Command::new(program)
        .args(args)
        .output()
        .map_err(|source| HostError::Spawn {
            program: program.to_string(),
            source,
        })
}

/// Run a program synchronously and return stdout, failing on a non-zero exit.
///
/// # Errors
///
/// Returns an error if the program cannot be started or exits unsuccessfully.
pub fn stdout_of(program: &str, args: &[&str]) -> Result<String, HostError> {
    let output = capture(program, args)?;
    if !output.status.success() {
        return Err(command_failed(program, &output));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a program asynchronously to completion.
///
/// `accepted` lists extra exit codes that count as success (e.g. 3010,
/// "succeeded, restart required").
///
/// # Errors
///
/// Returns an error if the program cannot be started or exits with a code
/// outside zero and `accepted`.
pub async fn run(program: &str, args: &[String], accepted: &[i32]) -> Result<Output, HostError> {
    debug!(program, ?args, "Running action");
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| HostError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let ok = output.status.success()
        || output
            .status
            .code()
            .is_some_and(|code| accepted.contains(&code));
    if !ok {
        return Err(command_failed(program, &output));
    }
    Ok(output)
}

fn command_failed(program: &str, output: &Output) -> HostError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stderr = if stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr
    };
    HostError::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        stderr,
    }
}

/// Convert string literals into an owned argument vector.
#[must_use]
pub fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}
