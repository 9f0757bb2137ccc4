//! Single-producer / single-consumer buffer hand-off with a recycling path.
//!
//! The producer side asks for a recycled buffer before allocating, so a
//! steady-state transfer reuses the same handful of allocations. The handles
//! are not `Clone`: one producer and one consumer per exchange.

mod buffer;

pub use buffer::AudioBuffer;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Smallest buffer the producer will allocate
pub const MIN_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("exchange {0} is closed")]
    Closed(String),
    #[error("can't allocate buffer of {0} bytes")]
    Alloc(usize),
}

/// Create a connected producer/consumer pair holding at most `depth` full
/// buffers in flight.
pub fn exchange(name: &str, depth: usize) -> (BufferProducer, BufferConsumer) {
    let depth = depth.max(1);
    let (full_tx, full_rx) = mpsc::channel(depth);
    // One extra slot so a consumer that drained everything can hand every
    // buffer back without blocking.
    let (recycled_tx, recycled_rx) = mpsc::channel(depth + 1);
    (
        BufferProducer {
            name: name.to_string(),
            full_tx,
            recycled_rx,
        },
        BufferConsumer {
            name: name.to_string(),
            full_rx,
            recycled_tx,
        },
    )
}

/// Writing side of an exchange
pub struct BufferProducer {
    name: String,
    full_tx: mpsc::Sender<AudioBuffer>,
    recycled_rx: mpsc::Receiver<AudioBuffer>,
}

impl BufferProducer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take a buffer returned by the consumer, if any is waiting.
    pub fn take_recycled(&mut self) -> Option<AudioBuffer> {
        self.recycled_rx.try_recv().ok()
    }

    /// Get a buffer able to hold `size` bytes.
    ///
    /// A recycled buffer is used when it is large enough; an undersized one is
    /// dropped and a fresh buffer of `max(MIN_BUFFER_SIZE, size)` bytes is
    /// allocated instead.
    pub fn obtain(&mut self, size: usize) -> Result<AudioBuffer, ExchangeError> {
        if let Some(buf) = self.take_recycled() {
            if buf.capacity() >= size {
                return Ok(buf);
            }
            debug!(
                "{}: dropping undersized recycled buffer ({} < {})",
                self.name,
                buf.capacity(),
                size
            );
        }
        AudioBuffer::with_capacity(MIN_BUFFER_SIZE.max(size))
    }

    /// Queue a filled buffer for the consumer. Waits while the exchange is
    /// full; fails once the consumer is gone or closed the exchange.
    pub async fn put(&self, buf: AudioBuffer) -> Result<(), ExchangeError> {
        self.full_tx
            .send(buf)
            .await
            .map_err(|_| ExchangeError::Closed(self.name.clone()))
    }

    /// Signal end of stream with a zero-length buffer.
    pub async fn put_eof(&self) -> Result<(), ExchangeError> {
        self.put(AudioBuffer::eof()).await
    }

    pub fn is_closed(&self) -> bool {
        self.full_tx.is_closed()
    }
}

/// Reading side of an exchange
pub struct BufferConsumer {
    name: String,
    full_rx: mpsc::Receiver<AudioBuffer>,
    recycled_tx: mpsc::Sender<AudioBuffer>,
}

impl BufferConsumer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next buffer from the producer. `None` once the producer is dropped and
    /// the exchange is drained. A zero-length buffer means end of data.
    pub async fn take(&mut self) -> Option<AudioBuffer> {
        self.full_rx.recv().await
    }

    /// Hand an emptied buffer back for reuse. Dropped silently if the
    /// recycle path is full or the producer is gone.
    pub fn recycle(&self, mut buf: AudioBuffer) {
        if buf.capacity() == 0 {
            return;
        }
        buf.clear();
        let _ = self.recycled_tx.try_send(buf);
    }

    /// Refuse further puts. Buffers already queued can still be taken.
    pub fn close(&mut self) {
        self.full_rx.close();
    }
}
