//! Verifier: run a task's `verify_command` and translate its exit code
//! into a `VerifyOutcome`.
//!
//! Stdout/stderr are drained concurrently with `tokio::join!` while the
//! child runs, the whole thing is wrapped in a `tokio::time::timeout`,
//! and a timeout kills the child and is reported as a failure rather
//! than propagated as an error (a slow verify command is a verification
//! failure, not an infrastructure fault).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::VerifyOutcome;

/// Characters that make a command line ambiguous between "a single
/// executable plus argv" and "a shell pipeline". When any of these
/// appear, the command is run through `sh -c` instead of being split
/// with `shlex`, so pipes/redirects/substitutions behave as the author
/// of the `verify_command` clearly intended.
const SHELL_METACHARACTERS: &[char] = &['|', '>', '<', '&', ';', '$', '`', '*', '?', '[', ']'];

fn looks_like_shell(command: &str) -> bool {
    command.contains("$(") || command.chars().any(|c| SHELL_METACHARACTERS.contains(&c))
}

/// Run `verify_command` in `working_dir`, expecting exit code
/// `expected_success_code`. Returns `VerifyOutcome::Success` when the
/// exit code matches; otherwise `VerifyOutcome::Failure` with a detail
/// string assembled from the exit status and captured stdout/stderr.
pub async fn verify(
    command: &str,
    expected_success_code: i32,
    working_dir: &Path,
    timeout: Duration,
) -> VerifyOutcome {
    let mut cmd = if looks_like_shell(command) {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    } else {
        match shlex::split(command) {
            Some(parts) if !parts.is_empty() => {
                let mut c = Command::new(&parts[0]);
                c.args(&parts[1..]);
                c
            }
            _ => {
                return VerifyOutcome::Failure {
                    detail: format!("verify_command {command:?} could not be tokenized"),
                };
            }
        }
    };

    cmd.current_dir(working_dir);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return VerifyOutcome::Failure {
                detail: format!("failed to spawn verify_command {command:?}: {e}"),
            };
        }
    };

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let run = async {
        let mut stdout = String::new();
        let mut stderr = String::new();
        let (_, _, status) = tokio::join!(
            async {
                if let Some(pipe) = stdout_pipe.as_mut() {
                    let _ = pipe.read_to_string(&mut stdout).await;
                }
            },
            async {
                if let Some(pipe) = stderr_pipe.as_mut() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
            },
            child.wait(),
        );
        (stdout, stderr, status)
    };

    match tokio::time::timeout(timeout, run).await {
        Ok((stdout, stderr, Ok(status))) => {
            let code = status.code().unwrap_or(-1);
            debug!(command, code, expected_success_code, "verify_command completed");
            if code == expected_success_code {
                VerifyOutcome::Success
            } else {
                VerifyOutcome::Failure {
                    detail: format_failure(code, &stdout, &stderr),
                }
            }
        }
        Ok((_, _, Err(e))) => VerifyOutcome::Failure {
            detail: format!("failed to wait on verify_command {command:?}: {e}"),
        },
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            VerifyOutcome::Failure {
                detail: format!("verify_command {command:?} timed out after {timeout:?}"),
            }
        }
    }
}

fn format_failure(code: i32, stdout: &str, stderr: &str) -> String {
    let mut detail = format!("exit code {code}");
    if !stdout.trim().is_empty() {
        detail.push_str(&format!("\nstdout:\n{}", stdout.trim()));
    }
    if !stderr.trim().is_empty() {
        detail.push_str(&format!("\nstderr:\n{}", stderr.trim()));
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn true_command_succeeds() {
        let outcome = verify("true", 0, Path::new("/tmp"), Duration::from_secs(5)).await;
        assert_eq!(outcome, VerifyOutcome::Success);
    }

    #[tokio::test]
    async fn false_command_fails() {
        let outcome = verify("false", 0, Path::new("/tmp"), Duration::from_secs(5)).await;
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn expected_nonzero_code_succeeds() {
        let outcome = verify("exit 3", 3, Path::new("/tmp"), Duration::from_secs(5)).await;
        assert_eq!(outcome, VerifyOutcome::Success);
    }

    #[tokio::test]
    async fn captures_stdout_on_failure() {
        let outcome = verify(
            "echo hello; exit 1",
            0,
            Path::new("/tmp"),
            Duration::from_secs(5),
        )
        .await;
        match outcome {
            VerifyOutcome::Failure { detail } => assert!(detail.contains("hello")),
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn plain_argv_command_runs_without_shell() {
        let outcome = verify("test -d /tmp", 0, Path::new("/tmp"), Duration::from_secs(5)).await;
        assert_eq!(outcome, VerifyOutcome::Success);
    }

    #[tokio::test]
    async fn nonexistent_binary_fails_gracefully() {
        let outcome = verify(
            "/nonexistent/verify-script",
            0,
            Path::new("/tmp"),
            Duration::from_secs(5),
        )
        .await;
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn timeout_kills_slow_verify() {
        let outcome = verify("sleep 60", 0, Path::new("/tmp"), Duration::from_millis(100)).await;
        match outcome {
            VerifyOutcome::Failure { detail } => assert!(detail.contains("timed out")),
            _ => panic!("expected timeout failure"),
        }
    }

    #[test]
    fn detects_shell_metacharacters() {
        assert!(looks_like_shell("a | b"));
        assert!(looks_like_shell("echo $(date)"));
        assert!(looks_like_shell("a > out.txt"));
        assert!(!looks_like_shell("cargo test --lib"));
    }
}
