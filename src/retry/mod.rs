//! Bounded retry with exponential backoff and structured error state
//!
//! Collaboration operations (delegation, commenting, notifications, attachments) run through an
//! [`ErrorHandler`], which classifies failures into [`crate::error::CollabError`], retries the
//! retryable ones, and keeps the last failure around for a user-triggered retry.

pub mod config;
pub mod context;
pub mod handler;

pub use config::{RetryCondition, RetryConfig};
pub use context::{Feature, OperationContext};
pub use handler::{ErrorHandler, ErrorState, RetryError};
