//! Capture and remux backed by external programs.

use super::{CaptureDevice, Remuxer};
use crate::error::CaptureError;
use async_trait::async_trait;
use log::{debug, error};
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// Records with a camera CLI such as `rpicam-vid`.
///
/// Invoked as `<program> -t <millis> --nopreview -o <path>`.
pub struct CommandCapture {
    program: String,
}

impl CommandCapture {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl CaptureDevice for CommandCapture {
    async fn record(&self, path: &Path, duration: Duration) -> Result<(), CaptureError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-t")
            .arg(duration.as_millis().to_string())
            .arg("--nopreview")
            .arg("-o")
            .arg(path);
        run(&self.program, cmd).await
    }
}

/// Stream-copy remux with ffmpeg (`-c:v copy`, no re-encode).
pub struct FfmpegRemuxer {
    program: String,
}

impl FfmpegRemuxer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn remux(&self, input: &Path, output: &Path) -> Result<(), CaptureError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-c:v", "copy"])
            .arg(output);
        run(&self.program, cmd).await
    }
}

/// Run to completion, killing the child if the caller gives up (timeout).
async fn run(program: &str, mut cmd: Command) -> Result<(), CaptureError> {
    debug!("[Capture] Running {:?}", cmd.as_std());
    let output = cmd
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| CaptureError::Spawn {
            program: program.to_string(),
            source,
        })?;
    check_output(program, output)
}

fn check_output(program: &str, output: Output) -> Result<(), CaptureError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    error!("[Capture] {} failed: {}", program, output.status);
    error!("[Capture] {} stdout: {}", program, String::from_utf8_lossy(&output.stdout).trim());
    error!("[Capture] {} stderr: {}", program, stderr);
    Err(CaptureError::Command {
        program: program.to_string(),
        status: output.status.to_string(),
        stderr,
    })
}
