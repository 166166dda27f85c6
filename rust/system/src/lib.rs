//! Synchronous thread-pool/dispatcher pair modelled on
//! `chroma-system`'s `Dispatcher`/`WorkerThread`/`Operator` trio, but
//! built on `std::thread` + `crossbeam-channel` with explicit core
//! pinning rather than `tokio`, per spec.md §5.

pub mod dispatcher;
pub mod operator;
pub mod worker_pool;

pub use dispatcher::Dispatcher;
pub use operator::{Operator, TaskResult};
pub use worker_pool::WorkerPool;
