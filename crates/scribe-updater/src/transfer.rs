use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("download request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("download failed with HTTP {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("download stream interrupted: {0}")]
    Stream(#[source] reqwest::Error),
}

/// Snapshot of one transfer, emitted per chunk. A `bytes_total` of zero
/// means the server did not declare a length; `percent` stays at zero then.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferProgress {
    pub bytes_loaded: u64,
    pub bytes_total: u64,
    pub percent: u8,
    pub status: &'static str,
}

impl TransferProgress {
    fn new(bytes_loaded: u64, bytes_total: u64) -> Self {
        let percent = if bytes_total > 0 {
            u8::try_from((bytes_loaded * 100 / bytes_total).min(100)).unwrap_or(100)
        } else {
            0
        };
        Self {
            bytes_loaded,
            bytes_total,
            percent,
            status: "downloading",
        }
    }
}

pub type ProgressObserver = Arc<dyn Fn(TransferProgress) + Send + Sync>;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransferError>> + Send>>;

/// Monotonic byte counter for one transfer. Holds no buffer; the payload
/// itself flows through whatever stream the caller wraps.
pub struct ProgressTracker {
    loaded: u64,
    total: u64,
    observer: Option<ProgressObserver>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(total: u64) -> Self {
        Self {
            loaded: 0,
            total,
            observer: None,
        }
    }

    #[must_use]
    pub fn with_observer(total: u64, observer: ProgressObserver) -> Self {
        Self {
            loaded: 0,
            total,
            observer: Some(observer),
        }
    }

    /// Count `n` freshly transferred bytes and notify the observer, if any.
    pub fn record(&mut self, n: u64) -> TransferProgress {
        self.loaded += n;
        let progress = TransferProgress::new(self.loaded, self.total);
        if let Some(observer) = &self.observer {
            observer(progress.clone());
        }
        progress
    }

    #[must_use]
    pub fn bytes_loaded(&self) -> u64 {
        self.loaded
    }
}

/// Wrap a byte stream so every chunk bumps a [`ProgressTracker`] on its way
/// through. Chunks are forwarded untouched; errors pass through uncounted.
pub fn track<S>(stream: S, total: u64, observer: Option<ProgressObserver>) -> ByteStream
where
    S: Stream<Item = Result<Bytes, TransferError>> + Send + 'static,
{
    let mut tracker = ProgressTracker {
        loaded: 0,
        total,
        observer,
    };
    Box::pin(stream.map(move |chunk| {
        if let Ok(bytes) = &chunk {
            tracker.record(bytes.len() as u64);
        }
        chunk
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn percent_is_monotonic_and_exact_at_total() {
        let mut tracker = ProgressTracker::new(400);
        let mut last_percent = 0;
        let mut last_loaded = 0;

        for _ in 0..4 {
            let progress = tracker.record(100);
            assert!(progress.percent >= last_percent);
            assert!(progress.bytes_loaded >= last_loaded);
            last_percent = progress.percent;
            last_loaded = progress.bytes_loaded;
        }

        assert_eq!(last_percent, 100);
        assert_eq!(last_loaded, 400);
    }

    #[test]
    fn percent_is_clamped_past_declared_total() {
        let mut tracker = ProgressTracker::new(100);
        let progress = tracker.record(250);
        assert_eq!(progress.percent, 100);
        assert_eq!(progress.bytes_loaded, 250);
    }

    #[test]
    fn unknown_total_reports_indeterminate() {
        let mut tracker = ProgressTracker::new(0);
        let progress = tracker.record(1024);
        assert_eq!(progress.percent, 0);
        assert_eq!(progress.bytes_total, 0);
    }

    #[test]
    fn observer_sees_every_chunk() {
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: ProgressObserver =
            Arc::new(move |progress| sink.lock().expect("lock").push(progress.bytes_loaded));

        let mut tracker = ProgressTracker::with_observer(30, observer);
        tracker.record(10);
        tracker.record(10);
        tracker.record(10);

        assert_eq!(*seen.lock().expect("lock"), vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn tracked_stream_passes_chunks_through() {
        let chunks: Vec<Result<Bytes, TransferError>> = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let seen: Arc<Mutex<Vec<TransferProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: ProgressObserver =
            Arc::new(move |progress| sink.lock().expect("lock").push(progress));

        let mut stream = track(futures_util::stream::iter(chunks), 11, Some(observer));

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.expect("chunk should pass through"));
        }

        assert_eq!(collected, b"hello world");
        let events = seen.lock().expect("lock");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].bytes_loaded, 11);
        assert_eq!(events[1].percent, 100);
    }
}
