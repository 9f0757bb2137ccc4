//! External helper commands run on player events.
//!
//! Failures are logged and otherwise ignored: a broken hook never blocks a
//! transport operation.

use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::HooksConfig;

/// Parsed helper command configuration
#[derive(Debug, Clone, Default)]
pub struct Hooks {
    pub onstart: Option<String>,
    pub onplay: Option<String>,
    pub onpause: Option<String>,
    pub onstop: Option<String>,
    pub onvolumechange: Vec<String>,
    pub getexternalvolume: Vec<String>,
    pub external_volume_control: bool,
}

impl Hooks {
    pub fn from_config(config: &HooksConfig) -> Self {
        Self {
            onstart: non_empty(&config.onstart),
            onplay: non_empty(&config.onplay),
            onpause: non_empty(&config.onpause),
            onstop: non_empty(&config.onstop),
            onvolumechange: split_argv(config.onvolumechange.as_deref()),
            getexternalvolume: split_argv(config.getexternalvolume.as_deref()),
            external_volume_control: config.external_volume_control,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn split_argv(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Run a shell command line with `sh -c`. Returns true on zero exit.
pub async fn run_shell(label: &str, command: &str) -> bool {
    debug!("Running {} hook: {}", label, command);
    match Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .status()
        .await
    {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!("{} hook '{}' exited with {}", label, command, status);
            false
        }
        Err(e) => {
            warn!("{} hook '{}' could not run: {}", label, command, e);
            false
        }
    }
}

/// Run an argument list, with an optional trailing argument.
pub async fn run_argv(label: &str, argv: &[String], extra: Option<&str>) -> bool {
    let Some((program, args)) = argv.split_first() else {
        return false;
    };
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    if let Some(extra) = extra {
        cmd.arg(extra);
    }
    match cmd.status().await {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!("{} command {} exited with {}", label, program, status);
            false
        }
        Err(e) => {
            warn!("{} command {} could not run: {}", label, program, e);
            false
        }
    }
}

/// Run an argument list and capture its standard output.
pub async fn capture_output(label: &str, argv: &[String]) -> Option<String> {
    let (program, args) = argv.split_first()?;
    match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
    {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).to_string())
        }
        Ok(output) => {
            warn!("{} command {} exited with {}", label, program, output.status);
            None
        }
        Err(e) => {
            warn!("{} command {} could not run: {}", label, program, e);
            None
        }
    }
}
