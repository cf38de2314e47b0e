//! Capabilities available to apply functions. Each one is a trait on
//! `ApplyContext` (or, for statistics, on `MDataFrame`) gated by
//! `[apply] capabilities` in the engine config.

pub mod accumulators;
pub mod arith;
pub mod context;
pub mod datetime;
pub mod statistics;
pub mod strings;

pub use accumulators::{AggSpec, ApplyAccumulators, StatOp};
pub use arith::{ApplyArithmetic, ArithOp, Operand};
pub use context::{ApplyContext, ApplyOutput, FacetBranch};
pub use datetime::{ApplyDateTime, DateOp};
pub use statistics::Statistics;
pub use strings::{ApplyString, StrOp};
