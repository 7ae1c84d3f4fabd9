//! Serve a [`GraphHost`] over a carrier or a pair of byte streams.
//!
//! Each request is handled on its own task, so replies can leave out of order.

use crate::host::GraphHost;
use kgmem_types::Carrier;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Answer frames from `carrier` until it closes.
pub async fn serve_carrier(host: Arc<GraphHost>, carrier: Arc<dyn Carrier>) {
    info!(carrier = carrier.kind(), "serving");
    loop {
        match carrier.recv().await {
            Ok(Some(frame)) => {
                let host = Arc::clone(&host);
                let carrier = Arc::clone(&carrier);
                tokio::spawn(async move {
                    if let Some(reply) = host.handle_frame(&frame).await {
                        if let Err(e) = carrier.send(reply).await {
                            debug!(error = %e, "reply dropped");
                        }
                    }
                });
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "carrier failed");
                break;
            }
        }
    }
    info!("client disconnected");
}

/// Newline-delimited JSON over `reader`/`writer` (stdin/stdout for a subprocess host).
pub async fn serve_lines<R, W>(
    host: Arc<GraphHost>,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let host = Arc::clone(&host);
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(reply) = host.handle_frame(&line).await {
                let _ = tx.send(reply);
            }
        });
    }
    info!("input closed");
    // In-flight handlers hold clones; the writer ends once they finish.
    drop(tx);
    match writer_task.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::io::{duplex, AsyncReadExt, BufReader};

    #[tokio::test]
    async fn answers_each_line_and_finishes_at_eof() {
        let host = GraphHost::new(false);
        let input = format!(
            "{}\n\n{}\n",
            json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"})
        );
        let (out_write, mut out_read) = duplex(4096);
        serve_lines(host, BufReader::new(input.as_bytes()), out_write)
            .await
            .unwrap();

        let mut output = String::new();
        out_read.read_to_string(&mut output).await.unwrap();
        let replies: Vec<Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies, [json!({"jsonrpc": "2.0", "id": 1, "result": {}})]);
    }
}
