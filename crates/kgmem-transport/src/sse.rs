//! Streamed carrier: server-sent events inbound, HTTP POST outbound.
//!
//! The host announces where to POST with an initial `endpoint` event; every later
//! `message` event carries one JSON-RPC message.

use crate::task::AbortOnDrop;
use futures::StreamExt;
use kgmem_types::{Carrier, CarrierError};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Chunks may split lines anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every event completed by this chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.feed_line(&line) {
                out.push(event);
            }
        }
        out
    }

    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take().unwrap_or_else(|| "message".to_string());
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data })
    }
}

/// Carrier over an SSE stream plus a POST endpoint announced by the host.
pub struct SseCarrier {
    client: reqwest::Client,
    endpoint: Url,
    inbound: Mutex<mpsc::Receiver<Result<String, CarrierError>>>,
    reader: AbortOnDrop,
    closed: AtomicBool,
}

impl SseCarrier {
    /// Open the event stream at `url` and wait for the endpoint announcement.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, CarrierError> {
        let base = Url::parse(url)
            .map_err(|e| CarrierError::Connect(format!("invalid server url {}: {}", url, e)))?;
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| CarrierError::Connect(e.to_string()))?;

        let response = tokio::time::timeout(
            connect_timeout,
            client
                .get(base.clone())
                .header(ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| CarrierError::Connect(format!("timed out connecting to {}", base)))?
        .map_err(|e| CarrierError::Connect(format!("{}: {}", base, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CarrierError::Connect(format!(
                "{} returned {}",
                base, status
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let (tx, rx) = mpsc::channel(64);
        let reader = AbortOnDrop::new(tokio::spawn(read_events(response, endpoint_tx, tx)));

        // `reader` is aborted on every early return below.
        let path = match tokio::time::timeout(connect_timeout, endpoint_rx).await {
            Ok(Ok(path)) => path,
            Ok(Err(_)) => {
                return Err(CarrierError::Connect(
                    "event stream ended before the endpoint event".to_string(),
                ))
            }
            Err(_) => {
                return Err(CarrierError::Connect(format!(
                    "no endpoint event from {} within {:?}",
                    base, connect_timeout
                )))
            }
        };
        let endpoint = base
            .join(path.trim())
            .map_err(|e| CarrierError::Connect(format!("invalid endpoint '{}': {}", path, e)))?;
        info!(%endpoint, "sse session established");

        Ok(Self {
            client,
            endpoint,
            inbound: Mutex::new(rx),
            reader,
            closed: AtomicBool::new(false),
        })
    }

    /// POST target announced by the host.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

async fn read_events(
    response: reqwest::Response,
    endpoint_tx: oneshot::Sender<String>,
    tx: mpsc::Sender<Result<String, CarrierError>>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "sse stream failed");
                let _ = tx.send(Err(CarrierError::Http(e.to_string()))).await;
                return;
            }
        };
        for event in decoder.push(&chunk) {
            match event.event.as_str() {
                "endpoint" => match endpoint_tx.take() {
                    Some(t) => {
                        let _ = t.send(event.data);
                    }
                    None => debug!("ignoring repeated endpoint event"),
                },
                "message" => {
                    if tx.send(Ok(event.data)).await.is_err() {
                        return;
                    }
                }
                other => debug!(event = other, "ignoring sse event"),
            }
        }
    }
    debug!("sse stream ended");
}

#[async_trait::async_trait]
impl Carrier for SseCarrier {
    fn kind(&self) -> &'static str {
        "sse"
    }

    async fn send(&self, message: String) -> Result<(), CarrierError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CarrierError::Closed);
        }
        let res = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(message)
            .send()
            .await
            .map_err(|e| CarrierError::Http(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(CarrierError::Http(format!(
                "POST {} returned {}: {}",
                self.endpoint, status, body
            )));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<String>, CarrierError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        self.inbound.lock().await.recv().await.transpose()
    }

    async fn close(&self) -> Result<(), CarrierError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(endpoint = %self.endpoint, "closing sse carrier");
            self.reader.abort();
        }
        Ok(())
    }
}
