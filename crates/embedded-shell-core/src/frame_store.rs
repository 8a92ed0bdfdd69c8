//! Broadcast + history frame store for late subscribers.

use std::{
    collections::VecDeque,
    sync::{Arc, PoisonError, RwLock},
};

use futures::{StreamExt, future, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use crate::Frame;

/// Default history size limit (1 MB per invocation).
pub const DEFAULT_HISTORY_BYTES: usize = 1024 * 1024;

/// Live frames buffered per subscriber before it lags.
const LIVE_CAPACITY: usize = 10000;

#[derive(Clone)]
struct StoredFrame {
    seq: u64,
    frame: Frame,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredFrame>,
    total_bytes: usize,
    next_seq: u64,
}

impl Inner {
    fn oldest_seq(&self) -> u64 {
        self.history.front().map_or(self.next_seq, |s| s.seq)
    }
}

/// Frame store with broadcast and history support.
///
/// A client that attaches after the command already produced output first
/// receives the retained history, then switches to live frames. A subscriber
/// that falls behind the live channel is refilled from history; frames that
/// history no longer holds are reported as a single gap line.
pub struct FrameStore {
    inner: Arc<RwLock<Inner>>,
    sender: broadcast::Sender<(u64, Frame)>,
    limit_bytes: usize,
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStore {
    /// Create a frame store with the default history limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_BYTES)
    }

    /// Create a frame store retaining at most `limit_bytes` of history.
    #[must_use]
    pub fn with_limit(limit_bytes: usize) -> Self {
        let (sender, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
                next_seq: 0,
            })),
            sender,
            limit_bytes,
        }
    }

    /// Push a frame to history and live listeners.
    ///
    /// History and broadcast are updated under the same lock so a concurrent
    /// subscriber sees each frame exactly once.
    pub fn push(&self, frame: Frame) {
        let bytes = frame.approx_bytes();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        // The newest frame is always kept, so a terminal frame survives eviction.
        while inner.total_bytes.saturating_add(bytes) > self.limit_bytes {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.history.push_back(StoredFrame {
            seq,
            frame: frame.clone(),
            bytes,
        });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);

        let _ = self.sender.send((seq, frame));
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<Frame> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.frame.clone())
            .collect()
    }

    /// Plain text lines emitted so far, progress messages included.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.get_history()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Line(line) => Some(line.text),
                Frame::Progress { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Stream that yields history first, then live frames.
    #[must_use]
    pub fn history_plus_stream(&self) -> BoxStream<'static, Frame> {
        let (history, rx, next_seq) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let history: Vec<Frame> = inner.history.iter().map(|s| s.frame.clone()).collect();
            (history, self.sender.subscribe(), inner.next_seq)
        };

        let cursor = LiveCursor {
            inner: Arc::clone(&self.inner),
            next_seq,
        };
        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx)
            .scan(cursor, |cursor, item| future::ready(Some(cursor.advance(item))))
            .flat_map(futures::stream::iter);

        Box::pin(hist.chain(live))
    }

    /// Stream of frames up to and including the terminal frame.
    #[must_use]
    pub fn until_terminal_stream(&self) -> BoxStream<'static, Frame> {
        self.history_plus_stream()
            .scan(false, |done, frame| {
                if *done {
                    return future::ready(None);
                }
                *done = frame.is_terminal();
                future::ready(Some(frame))
            })
            .boxed()
    }
}

/// Position of one live subscriber, in push order.
struct LiveCursor {
    inner: Arc<RwLock<Inner>>,
    next_seq: u64,
}

impl LiveCursor {
    fn advance(&mut self, item: Result<(u64, Frame), BroadcastStreamRecvError>) -> Vec<Frame> {
        match item {
            // Already delivered from a refill.
            Ok((seq, _)) if seq < self.next_seq => Vec::new(),
            Ok((seq, frame)) => {
                self.next_seq = seq + 1;
                vec![frame]
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "frame subscriber lagged, refilling from history");
                self.refill()
            }
        }
    }

    fn refill(&mut self) -> Vec<Frame> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut frames = Vec::new();
        let oldest = inner.oldest_seq();
        if oldest > self.next_seq {
            let lost = oldest - self.next_seq;
            tracing::warn!(lost, "frames evicted before a lagging subscriber read them");
            frames.push(Frame::line(format!("[{lost} frames dropped]")));
        }
        frames.extend(
            inner
                .history
                .iter()
                .filter(|s| s.seq >= self.next_seq)
                .map(|s| s.frame.clone()),
        );
        self.next_seq = inner.next_seq;
        frames
    }
}
