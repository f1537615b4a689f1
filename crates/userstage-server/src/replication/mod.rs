//! Asynchronous replication of staged batches into the relational store

pub mod consumer;
pub mod policy;
pub mod worker;

pub use consumer::{ConsumerSettings, MessageOutcome, MessageState, ReplicationConsumer};
pub use policy::RetryPolicy;
pub use worker::ReplicationWorkerPool;
