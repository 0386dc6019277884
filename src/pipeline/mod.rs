pub mod writer;

pub use writer::{run_batch_writer, FlushTrigger, WriterState, WriterStats};
