//! Services shared by the processor and the batch runner

pub mod progress;

pub use progress::{
    BatchProgress, CallbackProgressReporter, ConsoleProgressReporter, NoOpProgressReporter,
    ProcessingStage, ProgressReporter, ProgressTracker, ProgressUpdate,
};
