//! Persistence layer for the subscription workflow
//!
//! This module provides:
//! - [`ExecutionStore`] trait for executions, their history and tokens
//! - [`MembershipStore`] trait for the subscriber key-value store
//! - In-memory implementations for testing and local development
//! - PostgreSQL implementations for production

mod memory;
mod postgres;
mod store;

pub use memory::{InMemoryExecutionStore, InMemoryMembershipStore};
pub use postgres::{run_migrations, PostgresExecutionStore, PostgresMembershipStore};
pub use store::{ExecutionStore, MembershipStore, StoreError, TokenRecord};
