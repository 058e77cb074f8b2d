//! Subscription engine
//!
//! The engine module provides the `SubscriptionEngine`, which drives each
//! execution from validation through suspension to a terminal outcome.

mod executor;

pub use executor::{
    confirmation_url, EngineConfig, EngineError, ExecutionHandle, NotificationStatus,
    SubscriptionEngine, TerminalResult,
};
