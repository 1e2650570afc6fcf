//! Pull-based synthesis worker loops (spec.md §4.4): `serial` for models
//! that monopolize a local resource, `parallel` for API-bound adapters.
//! Both share the `ModelAdapter` boundary in `adapter`.

pub mod adapter;
pub mod parallel;
pub mod serial;

pub use adapter::{AdapterError, FailureKind, ModelAdapter, Synthesized};
pub use parallel::ParallelDispatcher;
pub use serial::SerialWorker;
