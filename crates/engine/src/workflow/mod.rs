//! Subscription workflow data model
//!
//! This module contains the primitives the engine drives:
//! - [`SubscriptionRequest`] and [`Intent`], the immutable inputs of an execution
//! - [`Execution`] and [`ExecutionState`], the persisted state machine record
//! - [`ExecutionEvent`], the append-only history of an execution
//! - [`ResumeSignal`] and [`TerminalOutcome`] for resumption and its results

mod event;
mod execution;
mod request;
mod signal;

pub use event::{ExecutionEvent, ExpiryCause};
pub use execution::{Execution, ExecutionState, Transition};
pub use request::{Intent, MembershipRecord, SubscriptionRequest};
pub use signal::{ResumeSignal, TerminalOutcome};
