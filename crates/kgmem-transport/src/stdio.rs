//! Pipe carrier: spawns the host as a subprocess and speaks newline-delimited JSON.

use crate::task::AbortOnDrop;
use kgmem_types::{Carrier, CarrierError};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Carrier over a child process's stdin/stdout. The child is killed if the carrier is dropped.
pub struct StdioCarrier {
    pid: Option<u32>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    inbound: Mutex<mpsc::Receiver<Result<String, CarrierError>>>,
    child: Mutex<Option<Child>>,
    tasks: Vec<AbortOnDrop>,
}

impl StdioCarrier {
    /// Spawn `command args...` with piped stdio. Stderr is forwarded to the log.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<Self, CarrierError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| CarrierError::Spawn(format!("{}: {}", command, e)))?;
        let pid = child.id();
        info!(command, pid, "spawned server process");

        // The child is killed on drop if any of these fail.
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CarrierError::Spawn("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CarrierError::Spawn("failed to capture stdout".to_string()))?;
        let stderr = child.stderr.take();

        let (tx_out, mut rx_out) = mpsc::channel::<String>(64);
        let (tx_in, rx_in) = mpsc::channel::<Result<String, CarrierError>>(64);
        let mut tasks = Vec::with_capacity(3);

        tasks.push(AbortOnDrop::new(tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = rx_out.recv().await {
                if let Err(e) = write_line(&mut stdin, &msg).await {
                    error!(error = %e, "failed to write to server stdin");
                    break;
                }
            }
            debug!("stdin writer finished");
        })));

        tasks.push(AbortOnDrop::new(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if tx_in.send(Ok(line)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("server stdout closed");
                        break;
                    }
                    Err(e) => {
                        let _ = tx_in.send(Err(CarrierError::Io(e))).await;
                        break;
                    }
                }
            }
        })));

        if let Some(stderr) = stderr {
            tasks.push(AbortOnDrop::new(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "kgmem::server", "{}", line);
                }
            })));
        }

        Ok(Self {
            pid,
            outbound: Mutex::new(Some(tx_out)),
            inbound: Mutex::new(rx_in),
            child: Mutex::new(Some(child)),
            tasks,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

async fn write_line(stdin: &mut tokio::process::ChildStdin, msg: &str) -> std::io::Result<()> {
    stdin.write_all(msg.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

#[async_trait::async_trait]
impl Carrier for StdioCarrier {
    fn kind(&self) -> &'static str {
        "stdio"
    }

    async fn send(&self, message: String) -> Result<(), CarrierError> {
        let tx = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or(CarrierError::Closed)?;
        tx.send(message).await.map_err(|_| CarrierError::Closed)
    }

    async fn recv(&self) -> Result<Option<String>, CarrierError> {
        self.inbound.lock().await.recv().await.transpose()
    }

    async fn close(&self) -> Result<(), CarrierError> {
        // Dropping the sender ends the writer, which closes the child's stdin.
        self.outbound.lock().await.take();
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(pid = self.pid, %status, "server process exited"),
                Ok(Err(e)) => {
                    warn!(pid = self.pid, error = %e, "failed to wait for server process");
                }
                Err(_) => {
                    warn!(pid = self.pid, "server process did not exit; killing");
                    child.kill().await?;
                }
            }
        }
        for task in &self.tasks {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = StdioCarrier::spawn("kgmem-definitely-not-installed", &[], &[])
            .err()
            .unwrap();
        assert!(matches!(err, CarrierError::Spawn(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn echoes_lines_through_cat() {
        let carrier = StdioCarrier::spawn("cat", &[], &[]).unwrap();
        carrier.send(r#"{"jsonrpc":"2.0","id":1}"#.to_string()).await.unwrap();
        let line = carrier.recv().await.unwrap().unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","id":1}"#);

        carrier.close().await.unwrap();
        carrier.close().await.unwrap();
        assert!(matches!(
            carrier.send("x".to_string()).await,
            Err(CarrierError::Closed)
        ));
        assert_eq!(carrier.recv().await.unwrap(), None);
    }
}
