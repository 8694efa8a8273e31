use std::path::Path;
use std::process::Output;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

const BINARY: &str = "skopeo";
const TRANSPORT: &str = "docker://";
const RETRY_TIMES: &str = "3";

#[derive(Debug, Error)]
pub enum SkopeoError {
    #[error("failed to run skopeo: {0}")]
    Io(#[from] std::io::Error),
    #[error("skopeo exited with status {code}: {output}")]
    Failed { code: i32, output: String },
}

/// Source-side credentials for a copy.
pub enum SourceAuth<'a> {
    Authfile(&'a Path),
    None,
}

/// Copy `source` into `destination`, returning the combined output.
/// The tool retries transient failures internally; callers must not retry on
/// top of it.
pub async fn copy(
    source: &str,
    destination: &str,
    src_auth: SourceAuth<'_>,
    dest_creds: Option<&str>,
) -> Result<String, SkopeoError> {
    let mut command = Command::new(BINARY);
    command
        .arg("copy")
        .arg("--override-os")
        .arg("linux")
        .arg("--retry-times")
        .arg(RETRY_TIMES)
        .arg(format!("{}{}", TRANSPORT, source))
        .arg(format!("{}{}", TRANSPORT, destination));
    match src_auth {
        SourceAuth::Authfile(path) => {
            command.arg("--src-authfile").arg(path);
        }
        SourceAuth::None => {
            command.arg("--src-no-creds");
        }
    }
    match dest_creds {
        Some(creds) => {
            command.arg("--dest-creds").arg(creds);
        }
        None => {
            command.arg("--dest-no-creds");
        }
    }
    debug!(source, destination, "Running skopeo copy");
    run(command).await
}

/// Probe `reference` for existence, returning the combined output on success.
pub async fn inspect(reference: &str, creds: Option<&str>) -> Result<String, SkopeoError> {
    let mut command = Command::new(BINARY);
    command
        .arg("inspect")
        .arg("--override-os")
        .arg("linux")
        .arg(format!("{}{}", TRANSPORT, reference));
    if let Some(creds) = creds {
        command.arg("--creds").arg(creds);
    }
    debug!(reference, "Running skopeo inspect");
    run(command).await
}

async fn run(mut command: Command) -> Result<String, SkopeoError> {
    // An abandoned wait must not leak the subprocess.
    command.kill_on_drop(true);
    let output = command.output().await?;
    let combined = combined_output(&output);
    if !output.status.success() {
        return Err(SkopeoError::Failed {
            code: output.status.code().unwrap_or(-1),
            output: combined,
        });
    }
    Ok(combined)
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr.trim_end());
    }
    text
}
