pub mod memory;
pub mod spool;
pub mod traits;

pub use memory::MemoryQueue;
pub use spool::SpoolQueue;
pub use traits::{DurableQueue, QueueError, QueueMessage};
