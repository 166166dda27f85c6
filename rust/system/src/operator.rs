//! `Operator<I, O>`: the same "a description of a function" vocabulary
//! as `chroma-system::Operator`, but synchronous — spec.md §5 runs this
//! on pinned OS threads, not an async executor, so `run` returns a
//! plain `Result` instead of a future.

use ivf_error::EngineError;
use std::fmt::Debug;
use uuid::Uuid;

pub trait Operator<I, O>: Send + Sync + Debug
where
    I: Send + Sync,
    O: Send + Sync,
{
    fn run(&self, input: &I) -> Result<O, EngineError>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The outcome of one dispatched task, tagged with an id purely for
/// logging/debugging correlation (mirrors `chroma-system::TaskResult`).
#[derive(Debug)]
pub struct TaskResult<O> {
    pub task_id: Uuid,
    pub result: Result<O, EngineError>,
}

impl<O> TaskResult<O> {
    pub fn into_inner(self) -> Result<O, EngineError> {
        self.result
    }
}
