// orderflow/src/pipeline/mod.rs

//! A small async step pipeline.
//!
//! A `Pipeline<TData, Err>` is an ordered list of named steps. Each step carries
//! `before`, `on` and `after` handlers that receive a shared `ContextData<TData>`
//! and answer with a `PipelineControl`. The payment callback reconciliation and
//! the checkout flow are both expressed as pipelines.

pub mod context;
pub mod control;
pub mod definition;
pub mod execution;
pub mod hooks;
pub mod step;

pub use context::{ContextData, Handler};
pub use control::{PipelineControl, PipelineResult};
pub use definition::Pipeline;
pub use step::{SkipCondition, StepDef};
