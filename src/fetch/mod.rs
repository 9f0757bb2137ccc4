//! Network fetch feeding a buffer exchange
//!
//! One `NetFetch` drives one HTTP transfer. Each received chunk is copied into a
//! recycled (or freshly allocated) buffer and pushed to the exchange. A complete
//! transfer ends with a zero-length buffer. A failed one just drops the
//! producer, so the consumer sees the exchange close without an end marker.
//! The transfer runs in its own task and is aborted when the `NetFetch` is
//! dropped or reset.

use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::exchange::{BufferProducer, ExchangeError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds an optional first buffer (e.g. a container header) from the first
/// chunk of real data.
pub type FirstBufferGen = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;
/// Called after every chunk with the cumulative byte count
pub type FetchBytesCallback = Arc<dyn Fn(u64) + Send + Sync>;
/// Called once at the end of the transfer with (success, total bytes)
pub type EndOfFetchCallback = Arc<dyn Fn(bool, u64) + Send + Sync>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("a transfer is already running")]
    AlreadyStarted,
}

/// Outcome classification of a finished transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Ok,
    /// Network trouble or server-side error: trying again may work
    Retryable,
    /// Client error, or the consumer went away
    Fatal,
}

#[derive(Debug, Clone)]
enum HeaderState {
    Pending,
    Received {
        code: u16,
        headers: HashMap<String, String>,
    },
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct FetchResult {
    status: FetchStatus,
    http_code: Option<u16>,
}

/// Copy one chunk of network data into a buffer and queue it.
///
/// Returns the number of bytes queued. Empty chunks are skipped, since a
/// zero-length buffer would read as end of stream.
pub async fn chunk_to_queue(
    producer: &mut BufferProducer,
    data: &[u8],
) -> Result<usize, ExchangeError> {
    if data.is_empty() {
        return Ok(0);
    }
    let mut buf = producer.obtain(data.len()).map_err(|e| {
        error!("{}: can't get buffer for {} bytes", producer.name(), data.len());
        e
    })?;
    // obtain() guarantees the capacity
    buf.fill(data);
    producer.put(buf).await?;
    Ok(data.len())
}

/// Wrapper for one network transfer
pub struct NetFetch {
    url: String,
    client: Client,
    timeout: Duration,
    first_buffer: Option<FirstBufferGen>,
    on_bytes: Option<FetchBytesCallback>,
    on_done: Option<EndOfFetchCallback>,
    headers: Arc<watch::Sender<HeaderState>>,
    result: Arc<Mutex<Option<FetchResult>>>,
    task: Option<JoinHandle<()>>,
}

impl NetFetch {
    pub fn new(url: impl Into<String>) -> Self {
        let (headers, _) = watch::channel(HeaderState::Pending);
        Self {
            url: url.into(),
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
            first_buffer: None,
            on_bytes: None,
            on_done: None,
            headers: Arc::new(headers),
            result: Arc::new(Mutex::new(None)),
            task: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connection timeout, also applied to each wait for the next chunk
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_first_buffer_gen(&mut self, generator: FirstBufferGen) {
        self.first_buffer = Some(generator);
    }

    pub fn set_fetch_bytes_cb(&mut self, cb: FetchBytesCallback) {
        self.on_bytes = Some(cb);
    }

    pub fn set_end_of_fetch_cb(&mut self, cb: EndOfFetchCallback) {
        self.on_done = Some(cb);
    }

    /// Start the transfer into `producer`, optionally from a byte offset.
    pub fn start(&mut self, producer: BufferProducer, offset: u64) -> Result<(), FetchError> {
        if self.task.is_some() {
            return Err(FetchError::AlreadyStarted);
        }
        let mut request = self.client.get(&self.url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let transfer = Transfer {
            url: self.url.clone(),
            timeout: self.timeout,
            first_buffer: self.first_buffer.clone(),
            on_bytes: self.on_bytes.clone(),
            on_done: self.on_done.clone(),
            headers: self.headers.clone(),
            result: self.result.clone(),
        };
        debug!("NetFetch: starting {} at offset {}", self.url, offset);
        self.task = Some(tokio::spawn(transfer.run(request, producer)));
        Ok(())
    }

    /// Wait until response headers are available, so the caller can look at
    /// e.g. the content type before consuming data. Returns false if the
    /// transfer failed first or `max_wait` expired.
    pub async fn wait_for_headers(&self, max_wait: Option<Duration>) -> bool {
        let mut rx = self.headers.subscribe();
        let wait = rx.wait_for(|h| !matches!(h, HeaderState::Pending));
        let state = match max_wait {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(Ok(state)) => state.clone(),
                _ => return false,
            },
            None => match wait.await {
                Ok(state) => state.clone(),
                Err(_) => return false,
            },
        };
        matches!(state, HeaderState::Received { .. })
    }

    /// Header value from the response (lowercase lookup)
    pub fn header_value(&self, name: &str) -> Option<String> {
        match &*self.headers.borrow() {
            HeaderState::Received { headers, .. } => {
                headers.get(&name.to_ascii_lowercase()).cloned()
            }
            _ => None,
        }
    }

    /// HTTP status code, once the response headers arrived
    pub fn http_code(&self) -> Option<u16> {
        match &*self.headers.borrow() {
            HeaderState::Received { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Non-blocking completion check: `None` while the transfer runs,
    /// otherwise the status and the HTTP code if one was received.
    pub fn fetch_done(&self) -> Option<(FetchStatus, Option<u16>)> {
        let result = self.result.lock().ok()?;
        result.map(|r| (r.status, r.http_code))
    }

    /// Wait for the transfer task to end, end-of-fetch callback included.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("NetFetch: {}: transfer task ended abnormally: {}", self.url, e);
            }
        }
    }

    /// Abort any running transfer and clear results, e.g. before a retry.
    pub fn reset(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Ok(mut result) = self.result.lock() {
            *result = None;
        }
        self.headers.send_replace(HeaderState::Pending);
    }
}

impl Drop for NetFetch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Everything the transfer task needs, detached from the `NetFetch`
struct Transfer {
    url: String,
    timeout: Duration,
    first_buffer: Option<FirstBufferGen>,
    on_bytes: Option<FetchBytesCallback>,
    on_done: Option<EndOfFetchCallback>,
    headers: Arc<watch::Sender<HeaderState>>,
    result: Arc<Mutex<Option<FetchResult>>>,
}

impl Transfer {
    async fn run(self, request: reqwest::RequestBuilder, mut producer: BufferProducer) {
        let (status, http_code, count) = self.pump(request, &mut producer).await;

        if status == FetchStatus::Ok {
            if let Err(e) = producer.put_eof().await {
                debug!("NetFetch: {}: can't queue end of stream: {}", self.url, e);
            }
        }
        drop(producer);

        if let Ok(mut result) = self.result.lock() {
            *result = Some(FetchResult { status, http_code });
        }
        if let Some(cb) = &self.on_done {
            cb(status == FetchStatus::Ok, count);
        }
        debug!(
            "NetFetch: {} done: {:?} http {:?}, {} bytes",
            self.url, status, http_code, count
        );
    }

    async fn pump(
        &self,
        request: reqwest::RequestBuilder,
        producer: &mut BufferProducer,
    ) -> (FetchStatus, Option<u16>, u64) {
        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Err(_) => {
                warn!("NetFetch: {}: no response after {:?}", self.url, self.timeout);
                self.headers.send_replace(HeaderState::Failed);
                return (FetchStatus::Retryable, None, 0);
            }
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("NetFetch: {}: request failed: {}", self.url, e);
                self.headers.send_replace(HeaderState::Failed);
                let status = if e.is_builder() {
                    FetchStatus::Fatal
                } else {
                    FetchStatus::Retryable
                };
                return (status, e.status().map(|s| s.as_u16()), 0);
            }
        };

        let code = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        self.headers.send_replace(HeaderState::Received {
            code: code.as_u16(),
            headers,
        });

        if !code.is_success() {
            warn!("NetFetch: {}: HTTP {}", self.url, code);
            let status = if code.is_server_error() {
                FetchStatus::Retryable
            } else {
                FetchStatus::Fatal
            };
            return (status, Some(code.as_u16()), 0);
        }

        let mut stream = response.bytes_stream();
        let mut count: u64 = 0;
        let mut first = true;
        loop {
            let chunk = match tokio::time::timeout(self.timeout, stream.next()).await {
                Err(_) => {
                    warn!("NetFetch: {}: stalled for {:?}", self.url, self.timeout);
                    return (FetchStatus::Retryable, Some(code.as_u16()), count);
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    warn!("NetFetch: {}: transfer error: {}", self.url, e);
                    return (FetchStatus::Retryable, Some(code.as_u16()), count);
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            if first && !chunk.is_empty() {
                first = false;
                if let Some(header) = self.first_buffer.as_ref().and_then(|g| g(&chunk)) {
                    if let Err(e) = chunk_to_queue(producer, &header).await {
                        debug!("NetFetch: {}: first buffer not queued: {}", self.url, e);
                        return (FetchStatus::Fatal, Some(code.as_u16()), count);
                    }
                }
            }

            match chunk_to_queue(producer, &chunk).await {
                Ok(queued) => {
                    count += queued as u64;
                    if let Some(cb) = &self.on_bytes {
                        cb(count);
                    }
                }
                Err(e) => {
                    debug!("NetFetch: {}: queue put failed: {}", self.url, e);
                    return (FetchStatus::Fatal, Some(code.as_u16()), count);
                }
            }
        }

        (FetchStatus::Ok, Some(code.as_u16()), count)
    }
}
