//! Log ingestion service: accepts structured records over HTTP, buffers
//! them through a durable queue into batched store writes, and serves
//! filtered queries, per-minute counts and a live websocket tail.

pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod query;
pub mod queue;
pub mod record;
pub mod storage;
pub mod tail;
pub mod web;
