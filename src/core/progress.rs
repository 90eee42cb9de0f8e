/*!
 * Progress events and rescaling adapters
 *
 * The engine emits three kinds of events: byte progress inside one file,
 * file-index progress inside a folder, and free-text status. Each event
 * travels with an overall percentage. Adapters stack [`ProgressWindow`]s so a
 * nested phase only ever writes into its own slice of the bar:
 *
 * ```text
 * folder bar   0 ─────────────────────────────────────── 100
 * file 2 of 4            [25 ──────── 50]
 * finalize                                        [90 ── 100]
 * ```
 *
 * Byte events are throttled by [`ByteThrottle`] before they leave the engine.
 */

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Raw progress event
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Bytes moved for the current file
    Bytes { current: u64, total: u64 },

    /// `current` files of `total` finished; `name` is the file now starting
    FileIndex {
        current: usize,
        total: usize,
        name: String,
    },

    /// Free-text status line
    Status(String),
}

impl ProgressEvent {
    /// Percentage of this event's own scope
    pub fn local_percent(&self) -> Option<f64> {
        match self {
            ProgressEvent::Bytes { current, total } => Some(percent_of(*current, *total)),
            ProgressEvent::FileIndex { current, total, .. } => {
                Some(percent_of(*current as u64, *total as u64))
            }
            ProgressEvent::Status(_) => None,
        }
    }
}

/// An event plus its position on the caller's bar
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Overall percentage in `0.0..=100.0`; `None` for status lines
    pub percent: Option<f64>,
    pub event: ProgressEvent,
}

impl ProgressUpdate {
    pub fn new(event: ProgressEvent) -> Self {
        Self {
            percent: event.local_percent(),
            event,
        }
    }
}

fn percent_of(current: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        (current.min(total) as f64 / total as f64) * 100.0
    }
}

/// Receives progress from an operation
pub trait ProgressSink: Send + Sync {
    fn emit(&self, update: ProgressUpdate);
}

pub type SharedSink = Arc<dyn ProgressSink>;

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _update: ProgressUpdate) {}
}

/// Adapts a closure
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn emit(&self, update: ProgressUpdate) {
        (self.0)(update)
    }
}

/// Sub-range of a parent bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressWindow {
    pub start: f64,
    pub end: f64,
}

impl ProgressWindow {
    pub const FULL: ProgressWindow = ProgressWindow { start: 0.0, end: 100.0 };

    pub fn new(start: f64, end: f64) -> Self {
        let start = start.clamp(0.0, 100.0);
        Self {
            start,
            end: end.clamp(start, 100.0),
        }
    }

    /// Window of file `index` (0-based) among `total` files
    pub fn for_file(index: usize, total: usize) -> Self {
        if total == 0 {
            return Self::FULL;
        }
        let step = 100.0 / total as f64;
        Self::new(step * index as f64, step * (index + 1) as f64)
    }

    /// Split the bar into a transfer head and a trailing finalize window
    /// of `window_percent` points
    pub fn finalize(window_percent: u8) -> (ProgressWindow, ProgressWindow) {
        let split = 100.0 - f64::from(window_percent.min(100));
        (Self::new(0.0, split), Self::new(split, 100.0))
    }

    /// Map a local percentage into this window
    pub fn map(&self, local: f64) -> f64 {
        self.start + (self.end - self.start) * (local.clamp(0.0, 100.0) / 100.0)
    }

    /// Compose: `inner` is relative to `self`
    pub fn nest(&self, inner: ProgressWindow) -> ProgressWindow {
        ProgressWindow::new(self.map(inner.start), self.map(inner.end))
    }
}

/// Forwards events with their percentage mapped into a window
pub struct ScaledSink {
    inner: SharedSink,
    window: ProgressWindow,
}

impl ScaledSink {
    pub fn new(inner: SharedSink, window: ProgressWindow) -> Self {
        Self { inner, window }
    }

    pub fn shared(inner: SharedSink, window: ProgressWindow) -> SharedSink {
        Arc::new(Self::new(inner, window))
    }
}

impl ProgressSink for ScaledSink {
    fn emit(&self, update: ProgressUpdate) {
        self.inner.emit(ProgressUpdate {
            percent: update.percent.map(|p| self.window.map(p)),
            event: update.event,
        });
    }
}

/// Decides which byte updates are worth sending
///
/// An update passes when any of these hold: it is the first, it reaches the
/// total, `min_interval` has elapsed, `total / max_updates` bytes have moved,
/// or a `percent_step` boundary was crossed since the last emitted update.
#[derive(Debug, Clone)]
pub struct ByteThrottle {
    min_interval: Duration,
    max_updates: u64,
    percent_step: u8,
    last_at: Option<Instant>,
    last_bytes: u64,
    last_bucket: u64,
    finished: bool,
}

impl ByteThrottle {
    pub fn new(min_interval: Duration, max_updates: u64, percent_step: u8) -> Self {
        Self {
            min_interval,
            max_updates: max_updates.max(1),
            percent_step: percent_step.max(1),
            last_at: None,
            last_bytes: 0,
            last_bucket: 0,
            finished: false,
        }
    }

    pub fn should_emit(&mut self, current: u64, total: u64) -> bool {
        self.should_emit_at(current, total, Instant::now())
    }

    fn should_emit_at(&mut self, current: u64, total: u64, now: Instant) -> bool {
        if self.finished {
            return false;
        }

        let bucket = percent_of(current, total) as u64 / u64::from(self.percent_step);
        let complete = current >= total;

        let emit = match self.last_at {
            None => true,
            Some(_) if complete => true,
            Some(last) => {
                now.duration_since(last) >= self.min_interval
                    || current.saturating_sub(self.last_bytes) >= (total / self.max_updates).max(1)
                    || bucket > self.last_bucket
            }
        };

        if emit {
            self.last_at = Some(now);
            self.last_bytes = current;
            self.last_bucket = bucket;
            self.finished = complete;
        }
        emit
    }
}

/// Byte progress reporter for one file: throttles, then emits into a sink
pub struct ByteReporter {
    sink: SharedSink,
    throttle: ByteThrottle,
    total: u64,
}

impl ByteReporter {
    pub fn new(sink: SharedSink, throttle: ByteThrottle, total: u64) -> Self {
        Self { sink, throttle, total }
    }

    pub fn report(&mut self, current: u64) {
        if self.throttle.should_emit(current, self.total) {
            self.sink.emit(ProgressUpdate::new(ProgressEvent::Bytes {
                current,
                total: self.total,
            }));
        }
    }
}

/// Receiver of per-file and per-byte callbacks
pub trait MultiFileSink: Send + Sync {
    fn on_file(&self, current: usize, total: usize, name: &str);

    fn on_bytes(&self, current: u64, total: u64, overall_percent: f64);

    fn on_status(&self, _status: &str) {}
}

/// Single-sink view over a [`MultiFileSink`]
///
/// Folder transfers announce each file with a [`ProgressEvent::FileIndex`]
/// and already place byte percentages on the folder bar; those pass through.
/// Until such an event arrives, byte streams are taken as file-local: each
/// completed stream advances the file index and later streams map into
/// [`ProgressWindow::for_file`] of `total_files_hint`. The hint also stands in
/// for a reported file total of zero.
pub struct MultiFileAdapter {
    inner: Arc<dyn MultiFileSink>,
    total_files_hint: usize,
    state: Mutex<AdapterState>,
}

#[derive(Debug, Default)]
struct AdapterState {
    engine_indexed: bool,
    file_index: usize,
}

impl MultiFileAdapter {
    pub fn new(inner: Arc<dyn MultiFileSink>, total_files_hint: usize) -> Self {
        Self {
            inner,
            total_files_hint,
            state: Mutex::new(AdapterState::default()),
        }
    }

    fn overall(&self, update: &ProgressUpdate, current: u64, total: u64) -> f64 {
        let local = percent_of(current, total);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.engine_indexed {
            return update.percent.unwrap_or(local);
        }

        let index = state.file_index.min(self.total_files_hint.saturating_sub(1));
        let overall = ProgressWindow::for_file(index, self.total_files_hint).map(local);
        if current >= total {
            state.file_index += 1;
        }
        overall
    }
}

impl ProgressSink for MultiFileAdapter {
    fn emit(&self, update: ProgressUpdate) {
        match &update.event {
            ProgressEvent::FileIndex { current, total, name } => {
                self.state.lock().unwrap_or_else(|e| e.into_inner()).engine_indexed = true;
                let total = if *total == 0 { self.total_files_hint } else { *total };
                self.inner.on_file(*current, total, name);
            }
            ProgressEvent::Bytes { current, total } => {
                let overall = self.overall(&update, *current, *total);
                self.inner.on_bytes(*current, *total, overall);
            }
            ProgressEvent::Status(status) => self.inner.on_status(status),
        }
    }
}

/// Channel-backed sink
#[derive(Clone)]
pub struct ProgressPublisher {
    sender: Option<Sender<ProgressUpdate>>,
}

impl ProgressPublisher {
    /// Create a new publisher with bounded channel
    pub fn new(buffer_size: usize) -> (Self, ProgressSubscriber) {
        let (tx, rx) = bounded(buffer_size);
        (ProgressPublisher { sender: Some(tx) }, ProgressSubscriber { receiver: rx })
    }

    pub fn unbounded() -> (Self, ProgressSubscriber) {
        let (tx, rx) = unbounded();
        (ProgressPublisher { sender: Some(tx) }, ProgressSubscriber { receiver: rx })
    }

    pub fn noop() -> Self {
        ProgressPublisher { sender: None }
    }
}

impl ProgressSink for ProgressPublisher {
    fn emit(&self, update: ProgressUpdate) {
        if let Some(ref tx) = self.sender {
            // Subscriber may have gone away
            let _ = tx.try_send(update);
        }
    }
}

pub struct ProgressSubscriber {
    receiver: Receiver<ProgressUpdate>,
}

impl ProgressSubscriber {
    pub fn receiver(&self) -> &Receiver<ProgressUpdate> {
        &self.receiver
    }

    pub fn try_recv(&self) -> Option<ProgressUpdate> {
        self.receiver.try_recv().ok()
    }

    /// Everything published so far, without blocking
    pub fn drain(&self) -> Vec<ProgressUpdate> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn throttle() -> ByteThrottle {
        ByteThrottle::new(Duration::from_millis(500), 300, 5)
    }

    #[test]
    fn test_window_mapping() {
        let window = ProgressWindow::new(25.0, 50.0);
        assert_eq!(window.map(0.0), 25.0);
        assert_eq!(window.map(50.0), 37.5);
        assert_eq!(window.map(100.0), 50.0);
        assert_eq!(window.map(150.0), 50.0);
    }

    #[test]
    fn test_file_windows_tile_the_bar() {
        let windows: Vec<_> = (0..4).map(|i| ProgressWindow::for_file(i, 4)).collect();
        assert_eq!(windows[0].start, 0.0);
        assert_eq!(windows[3].end, 100.0);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_finalize_window() {
        let (head, tail) = ProgressWindow::finalize(10);
        assert_eq!(head.map(100.0), 90.0);
        assert_eq!(tail.map(0.0), 90.0);
        assert_eq!(tail.map(100.0), 100.0);
    }

    #[test]
    fn test_nested_windows() {
        let (head, _) = ProgressWindow::finalize(10);
        let file = head.nest(ProgressWindow::for_file(1, 2));
        assert_eq!(file.start, 45.0);
        assert_eq!(file.end, 90.0);
    }

    #[test]
    fn test_throttle_first_and_final() {
        let mut t = throttle();
        let start = Instant::now();
        assert!(t.should_emit_at(0, 1_000_000_000, start));
        assert!(!t.should_emit_at(1, 1_000_000_000, start));
        assert!(t.should_emit_at(1_000_000_000, 1_000_000_000, start));
        // Only one completion update
        assert!(!t.should_emit_at(1_000_000_000, 1_000_000_000, start));
    }

    #[test]
    fn test_throttle_byte_threshold() {
        let mut t = throttle();
        let start = Instant::now();
        let total = 3_000_000;
        assert!(t.should_emit_at(0, total, start));
        assert!(!t.should_emit_at(9_999, total, start));
        assert!(t.should_emit_at(10_000, total, start));
    }

    #[test]
    fn test_throttle_time_threshold() {
        let mut t = throttle();
        let start = Instant::now();
        let total = u64::MAX / 2;
        assert!(t.should_emit_at(0, total, start));
        assert!(!t.should_emit_at(1, total, start + Duration::from_millis(100)));
        assert!(t.should_emit_at(2, total, start + Duration::from_millis(600)));
    }

    #[test]
    fn test_throttle_bounds_update_count() {
        let mut t = ByteThrottle::new(Duration::from_secs(3600), 300, 5);
        let start = Instant::now();
        let total: u64 = 100 * 1024 * 1024;
        let emitted = (0..=total / 8192)
            .map(|chunk| (chunk * 8192).min(total))
            .filter(|bytes| t.should_emit_at(*bytes, total, start))
            .count();
        assert!(emitted <= 330, "emitted {}", emitted);
        assert!(emitted >= 20);
    }

    #[test]
    fn test_scaled_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let root: SharedSink = Arc::new(FnSink(move |u: ProgressUpdate| {
            sink_seen.lock().unwrap().push(u.percent)
        }));

        let scaled = ScaledSink::new(root, ProgressWindow::new(50.0, 100.0));
        scaled.emit(ProgressUpdate::new(ProgressEvent::Bytes { current: 50, total: 100 }));
        scaled.emit(ProgressUpdate::new(ProgressEvent::Status("copying".into())));

        assert_eq!(*seen.lock().unwrap(), vec![Some(75.0), None]);
    }

    #[test]
    fn test_publisher_subscriber() {
        let (publisher, subscriber) = ProgressPublisher::unbounded();
        publisher.emit(ProgressUpdate::new(ProgressEvent::FileIndex {
            current: 1,
            total: 4,
            name: "b.txt".into(),
        }));

        let update = subscriber.try_recv().unwrap();
        assert_eq!(update.percent, Some(25.0));
        assert!(subscriber.try_recv().is_none());

        // No subscriber attached
        ProgressPublisher::noop().emit(ProgressUpdate::new(ProgressEvent::Status("x".into())));
    }

    #[derive(Default)]
    struct Recording {
        files: Mutex<Vec<(usize, usize)>>,
        overall: Mutex<Vec<f64>>,
    }

    impl MultiFileSink for Recording {
        fn on_file(&self, current: usize, total: usize, _name: &str) {
            self.files.lock().unwrap().push((current, total));
        }

        fn on_bytes(&self, _current: u64, _total: u64, overall: f64) {
            self.overall.lock().unwrap().push(overall);
        }
    }

    fn bytes(current: u64, total: u64) -> ProgressUpdate {
        ProgressUpdate::new(ProgressEvent::Bytes { current, total })
    }

    #[test]
    fn test_multi_file_adapter_uses_hint() {
        let recording = Arc::new(Recording::default());
        let adapter = MultiFileAdapter::new(recording.clone(), 7);

        adapter.emit(ProgressUpdate::new(ProgressEvent::FileIndex {
            current: 2,
            total: 0,
            name: "c".into(),
        }));
        adapter.emit(ProgressUpdate::new(ProgressEvent::FileIndex {
            current: 3,
            total: 5,
            name: "d".into(),
        }));

        assert_eq!(*recording.files.lock().unwrap(), vec![(2, 7), (3, 5)]);
    }

    #[test]
    fn test_sequential_file_streams_share_one_bar() {
        let recording = Arc::new(Recording::default());
        let adapter = MultiFileAdapter::new(recording.clone(), 2);

        for _ in 0..2 {
            adapter.emit(bytes(0, 1000));
            adapter.emit(bytes(500, 1000));
            adapter.emit(bytes(1000, 1000));
        }

        let overall = recording.overall.lock().unwrap().clone();
        assert_eq!(overall, vec![0.0, 25.0, 50.0, 50.0, 75.0, 100.0]);
    }

    #[test]
    fn test_folder_percentages_pass_through() {
        let recording = Arc::new(Recording::default());
        let adapter = MultiFileAdapter::new(recording.clone(), 4);

        adapter.emit(ProgressUpdate::new(ProgressEvent::FileIndex {
            current: 1,
            total: 2,
            name: "b".into(),
        }));
        adapter.emit(ProgressUpdate {
            percent: Some(75.0),
            event: ProgressEvent::Bytes { current: 50, total: 100 },
        });

        assert_eq!(*recording.overall.lock().unwrap(), vec![75.0]);
    }
}
