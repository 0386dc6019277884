//! Live tail of newly accepted records.
//!
//! Watchers register with a [`WatcherRegistry`]. Records reach them either
//! pushed by the ingest path through a [`TailPublisher`] and the dispatcher
//! task, or by a poller that re-queries the store on an interval.

mod dispatcher;
mod poller;
mod registry;

pub use dispatcher::{run_dispatcher, tail_channel, OfferedRecord, TailPublisher};
pub use poller::run_poller;
pub use registry::{TailBatch, Watcher, WatcherId, WatcherRegistry};
