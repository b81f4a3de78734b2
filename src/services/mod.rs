pub mod consumer;
pub mod counting;
pub mod events;
pub mod guard;
pub mod ingest;
pub mod pipeline;
pub mod queue;
pub mod severity;
pub mod storage;
