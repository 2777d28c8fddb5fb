//! Progress reporting and export services

pub mod export;
pub mod progress;

pub use export::{
    copy_to_clipboard, download_trigger, export_image, generate_filename, ClipboardSink,
    DownloadSink, ExportOptions, ExportedImage, FileDownloadSink,
};
#[cfg(feature = "clipboard")]
pub use export::ArboardClipboard;
pub use progress::{
    ConsoleProgressReporter, FnProgressReporter, NoOpProgressReporter, ProcessingStage,
    ProgressReporter, ProgressTracker, ProgressUpdate,
};
