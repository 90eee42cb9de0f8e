/*!
 * Building blocks shared by the engine and the dispatcher
 */

pub mod cancel;
pub mod path;
pub mod pattern;
pub mod progress;
pub mod resume;
pub mod retry;

pub use cancel::{CancelCategory, CancelFlag, CancelRegistry};
pub use pattern::NamePattern;
pub use progress::{
    ByteThrottle, MultiFileAdapter, MultiFileSink, NoopSink, ProgressEvent, ProgressPublisher, ProgressSink,
    ProgressSubscriber, ProgressUpdate, ProgressWindow, ScaledSink, SharedSink,
};
pub use resume::TransferTask;
