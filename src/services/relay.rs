//! The relay subprocess that receives the SongCast stream.
//!
//! The relay is started as `relay [-d] -u <uri> [-c <config>]`. In
//! queue-injection mode it prints one line on standard output once its HTTP
//! endpoint is ready.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::receiver::ReceiverError;

pub struct RelayProcess {
    child: Child,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
}

impl RelayProcess {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, ReceiverError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReceiverError::Spawn(program.to_string(), e))?;
        let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        info!(
            "Started relay {} {} (pid {:?})",
            program,
            args.join(" "),
            child.id()
        );
        Ok(Self { child, stdout })
    }

    /// Wait for the ready line. Fails on timeout, on relay exit, or when
    /// `cancel` fires.
    pub async fn wait_ready(
        &mut self,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, ReceiverError> {
        let Some(lines) = self.stdout.as_mut() else {
            return Err(ReceiverError::RelayExited);
        };
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => Ok(line),
                Ok(None) => Err(ReceiverError::RelayExited),
                Err(e) => {
                    warn!("Reading relay output failed: {}", e);
                    Err(ReceiverError::RelayExited)
                }
            },
            status = self.child.wait() => {
                debug!("Relay exited during handshake: {:?}", status);
                Err(ReceiverError::RelayExited)
            }
            _ = cancel.cancelled() => Err(ReceiverError::Cancelled),
            _ = tokio::time::sleep(limit) => Err(ReceiverError::HandshakeTimeout(limit.as_secs())),
        }
    }

    /// Keep reading the relay's output in the background so it never blocks
    /// on a full pipe.
    pub fn drain_output(&mut self) {
        if let Some(mut lines) = self.stdout.take() {
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("relay: {}", line);
                }
            });
        }
    }

    /// True while the process has not exited
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill and reap.
    pub async fn kill(mut self) {
        match self.child.kill().await {
            Ok(()) => debug!("Relay killed"),
            Err(e) => debug!("Relay kill: {}", e),
        }
    }
}
