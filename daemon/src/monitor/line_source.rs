/// Long-running subprocess whose stdout is exposed as an ordered stream of
/// text lines.
///
/// A single reader task owns the child process.  Lines are forwarded through a
/// bounded channel in emission order; [`LineSource::stop`] kills the child and
/// closes the channel so the consumer's `recv()` returns `None`.
use std::process::Stdio;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::MonitorError;

const LINE_CHANNEL_CAPACITY: usize = 64;

pub struct LineSource {
    stop_tx: watch::Sender<bool>,
    reader: JoinHandle<()>,
}

impl LineSource {
    /// Spawns `command` (program followed by its arguments) with `LC_ALL` set
    /// to `locale` and returns the source together with its line receiver.
    pub fn spawn(
        command: &[String],
        locale: &str,
    ) -> Result<(Self, mpsc::Receiver<String>), MonitorError> {
        let (program, args) = command.split_first().ok_or(MonitorError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(args)
            .env("LC_ALL", locale)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MonitorError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MonitorError::MissingStdout(program.clone()))?;

        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let program = program.clone();

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        debug!("[line-source] Stopping `{program}`");
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if line_tx.send(line).await.is_err() {
                                // Consumer is gone; nothing left to deliver to.
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!("[line-source] `{program}` closed its stdout");
                            break;
                        }
                        Err(e) => {
                            warn!("[line-source] Failed to read from `{program}`: {e}");
                            break;
                        }
                    },
                }
            }

            if let Err(e) = child.kill().await {
                // Already exited on its own.
                debug!("[line-source] kill `{program}`: {e}");
            }
        });

        Ok((LineSource { stop_tx, reader }, line_rx))
    }

    /// Terminates the subprocess and waits for the reader task to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.reader.await;
    }
}
