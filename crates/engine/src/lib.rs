//! # Newsletter Subscription Engine
//!
//! A confirmation-gated subscription workflow: a request to join or leave the
//! list is held until the subscriber follows an emailed link, then applied
//! exactly once, discarded, or expired.
//!
//! ## Features
//!
//! - **Suspend without blocking**: a suspended execution is a stored record plus an opaque token, not a parked task
//! - **Single-use tokens**: 256-bit random tokens, persisted only as SHA-256 digests
//! - **Lazy expiry**: deadlines are checked when a token is resolved, with an optional overdue sweep
//! - **Pluggable capabilities**: execution store, membership store, notifier and clock are injected
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SubscriptionEngine                        │
//! │  (start → validate → suspend; resume → commit | expire)     │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌─────────────────┐ ┌──────────────────┐ ┌────────────────────┐
//! │ ExecutionStore  │ │ MembershipStore  │ │ Notifier           │
//! │ (executions,    │ │ (identity →      │ │ (confirmation      │
//! │  events, tokens)│ │  joined_at)      │ │  email/webhook)    │
//! └─────────────────┘ └──────────────────┘ └────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use newsletter_engine::prelude::*;
//!
//! let engine = SubscriptionEngine::new(
//!     Arc::new(InMemoryExecutionStore::new()),
//!     Arc::new(InMemoryMembershipStore::new()),
//!     Arc::new(LogNotifier),
//! );
//!
//! let handle = engine
//!     .start(SubscriptionRequest::join("a@x.com", "https://example.com/confirm"))
//!     .await?;
//! assert_eq!(handle.state, ExecutionState::Suspended);
//! ```

pub mod clock;
pub mod engine;
pub mod notify;
pub mod persistence;
pub mod redirect;
pub mod token;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::engine::{
        EngineConfig, EngineError, ExecutionHandle, NotificationStatus, SubscriptionEngine,
        TerminalResult,
    };
    pub use crate::notify::{InMemoryNotifier, LogNotifier, Notification, Notifier, NotifyError};
    pub use crate::persistence::{
        ExecutionStore, InMemoryExecutionStore, InMemoryMembershipStore, MembershipStore,
        PostgresExecutionStore, PostgresMembershipStore, StoreError,
    };
    pub use crate::redirect::RedirectPolicy;
    pub use crate::token::{ResumptionToken, TokenRegistry, TokenResolution};
    pub use crate::workflow::{
        Execution, ExecutionEvent, ExecutionState, Intent, MembershipRecord, ResumeSignal,
        SubscriptionRequest, TerminalOutcome,
    };
    pub use std::sync::Arc;
}

// Re-export key types at crate root
pub use engine::{
    EngineConfig, EngineError, ExecutionHandle, NotificationStatus, SubscriptionEngine,
    TerminalResult,
};
pub use notify::{Notification, Notifier, NotifyError};
pub use persistence::{ExecutionStore, MembershipStore, StoreError};
pub use redirect::RedirectPolicy;
pub use workflow::{
    Execution, ExecutionEvent, ExecutionState, Intent, MembershipRecord, ResumeSignal,
    SubscriptionRequest, TerminalOutcome,
};
