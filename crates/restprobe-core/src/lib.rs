//! restprobe-core: Core types and learning logic for REST API probing
//!
//! This crate provides the fundamental pieces of the probing engine: the
//! operation and factor-tree model extracted from an OpenAPI document,
//! value equivalence classes, the resource pool learned from successful
//! responses, the failure monitors that learn forbidden parameter
//! combinations from error fragments, operation scheduling, and the
//! combinatorial covering solver.

pub mod config;
pub mod equivalence;
pub mod factor;
pub mod fragment;
pub mod matcher;
pub mod monitor;
pub mod op;
pub mod resource;
pub mod schedule;
pub mod solver;
pub mod text;

pub use config::{Config, ConfigError, SolverKind};
pub use equivalence::{Equivalence, NOT_SET};
pub use factor::{Factor, FactorId, FactorKind, FactorTree};
pub use fragment::{BatchFragments, analyze_batch, fragmentize, reformat_response};
pub use matcher::{MatchResult, match_names};
pub use monitor::{ClassAssignment, FailureMonitor, Stage, Statistics};
pub use op::{ContentType, Method, ParamLocation, RestOp, RestPath, RootParam};
pub use resource::{BindingSource, ResourcePool, ResourceStore};
pub use schedule::Scheduler;
pub use solver::{Assignment, FactorDomain, ForbiddenTuple, GreedySolver, Solver, SolverError};
