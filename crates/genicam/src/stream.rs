//! Stream entry point: frame delivery from a transport's acquisition side to
//! the client callback.
//!
//! A transport creates a stream with [`StreamBuilder::spawn`], keeps the
//! returned [`FrameSink`] on its acquisition path and hands the [`Stream`]
//! back to the client. Frames travel through a bounded queue to a dedicated
//! delivery thread, which runs the callback. A full queue drops the frame
//! instead of stalling acquisition.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

use crate::device::DeviceError;
use crate::frame::Frame;

const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Event passed to a stream callback.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Delivery thread started; sent before any frame.
    Init,
    /// A complete frame.
    Frame(Frame),
    /// Delivery thread is stopping; sent last.
    Exit,
}

/// Callback type transports receive from [`Device::create_stream`](crate::Device::create_stream).
pub type FrameCallback = Box<dyn FnMut(StreamEvent) + Send + 'static>;

#[derive(Debug)]
enum Delivery {
    Frame(Frame),
    Stop,
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    bytes: AtomicU64,
    backpressure_drops: AtomicU64,
}

/// Snapshot of stream delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Frames handed to the callback.
    pub frames: u64,
    /// Payload bytes handed to the callback.
    pub bytes: u64,
    /// Frames dropped because the delivery queue was full.
    pub backpressure_drops: u64,
}

/// Builder for the delivery side of a stream.
#[derive(Debug, Clone)]
pub struct StreamBuilder {
    queue_depth: usize,
    thread_name: String,
}

impl Default for StreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            thread_name: "stream".into(),
        }
    }

    /// Number of frames buffered between acquisition and the callback
    /// (minimum 1, default 8).
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Name given to the delivery thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Start the delivery thread and return the client handle together with
    /// the sink the transport pushes frames into.
    pub fn spawn(self, mut callback: FrameCallback) -> Result<(Stream, FrameSink), DeviceError> {
        let (sender, mut receiver) = mpsc::channel(self.queue_depth);
        let stopped = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let worker_stopped = Arc::clone(&stopped);
        let worker_counters = Arc::clone(&counters);
        let worker = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                callback(StreamEvent::Init);
                while let Some(delivery) = receiver.blocking_recv() {
                    let frame = match delivery {
                        Delivery::Frame(frame) => frame,
                        Delivery::Stop => break,
                    };
                    if worker_stopped.load(Ordering::Acquire) {
                        break;
                    }
                    worker_counters.frames.fetch_add(1, Ordering::Relaxed);
                    worker_counters
                        .bytes
                        .fetch_add(frame.len() as u64, Ordering::Relaxed);
                    trace!(frame_id = frame.frame_id, bytes = frame.len(), "deliver frame");
                    callback(StreamEvent::Frame(frame));
                }
                callback(StreamEvent::Exit);
                debug!("stream delivery thread finished");
            })?;
        info!(
            queue_depth = self.queue_depth,
            thread = %self.thread_name,
            "stream started"
        );

        let sink = FrameSink {
            sender: sender.clone(),
            stopped: Arc::clone(&stopped),
            counters: Arc::clone(&counters),
        };
        let stream = Stream {
            sender,
            stopped,
            counters,
            worker: Some(worker),
        };
        Ok((stream, sink))
    }
}

/// Client handle of a running stream. Dropping it stops delivery.
#[derive(Debug)]
pub struct Stream {
    sender: mpsc::Sender<Delivery>,
    stopped: Arc<AtomicBool>,
    counters: Arc<Counters>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    /// Current delivery counters.
    pub fn stats(&self) -> StreamStats {
        snapshot(&self.counters)
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop delivery and wait for the callback to receive
    /// [`StreamEvent::Exit`]. Frames still queued are discarded.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.stopped.store(true, Ordering::Release);
        // A full queue still wakes the worker, which then sees the flag.
        let _ = self.sender.try_send(Delivery::Stop);
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            warn!("stream delivery thread panicked");
        }
        let stats = self.stats();
        info!(
            frames = stats.frames,
            bytes = stats.bytes,
            drops = stats.backpressure_drops,
            "stream stopped"
        );
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Producer side of a stream, owned by the transport.
#[derive(Debug, Clone)]
pub struct FrameSink {
    sender: mpsc::Sender<Delivery>,
    stopped: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl FrameSink {
    /// Queue a frame for delivery without blocking.
    ///
    /// Returns `false` once the stream has stopped; a frame dropped because
    /// the queue is full still returns `true` and is counted.
    pub fn push(&self, frame: Frame) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        match self.sender.try_send(Delivery::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(Delivery::Frame(frame))) => {
                self.counters
                    .backpressure_drops
                    .fetch_add(1, Ordering::Relaxed);
                debug!(frame_id = frame.frame_id, "delivery queue full, frame dropped");
                true
            }
            Err(TrySendError::Full(Delivery::Stop)) => true,
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether the client stopped the stream.
    pub fn is_closed(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.sender.is_closed()
    }

    pub fn stats(&self) -> StreamStats {
        snapshot(&self.counters)
    }
}

fn snapshot(counters: &Counters) -> StreamStats {
    StreamStats {
        frames: counters.frames.load(Ordering::Relaxed),
        bytes: counters.bytes.load(Ordering::Relaxed),
        backpressure_drops: counters.backpressure_drops.load(Ordering::Relaxed),
    }
}
