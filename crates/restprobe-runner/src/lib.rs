//! restprobe-runner: OpenAPI parsing, HTTP execution, and the drive loop

pub mod engine;
pub mod executor;
pub mod manager;
pub mod pict;
pub mod spec;

pub use engine::{Engine, EngineError, OpSummary, RunSummary};
pub use executor::{Executor, ExecutorError, PreparedRequest};
pub use manager::EquivalenceManager;
pub use pict::PictSolver;
pub use spec::{SpecError, extract_operations, load_document};
