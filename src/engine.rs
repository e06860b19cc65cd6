//! Thin wrapper over the container engine CLI.
//!
//! Registry protocol details, image storage and the build cache all live
//! in the engine; this module only shells out to it.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Engine binary name. One place to swap for a compatible CLI.
pub(crate) const ENGINE_BINARY: &str = "docker";

/// Runs the engine with the given arguments, optionally piping
/// `stdin_data` (used for `login --password-stdin`).
pub(crate) async fn run_engine(
    args: &[&str],
    stdin_data: Option<&str>,
) -> std::io::Result<std::process::Output> {
    let mut command = Command::new(ENGINE_BINARY);
    command
        .args(args)
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;
    if let Some(data) = stdin_data {
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(data.as_bytes()).await?;
            stdin.shutdown().await?;
        }
    }
    child.wait_with_output().await
}

/// Runs an arbitrary command line through `sh -c`, buffered.
pub(crate) async fn run_shell(command: &str) -> std::io::Result<std::process::Output> {
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
}
