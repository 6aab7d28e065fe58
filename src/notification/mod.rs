//! Notification service with snapshot pub/sub and simulated live delivery
//!
//! The service owns the notification collection in the record store, republishes the full
//! collection to subscribers after every change, and drives a simulated transport: connection
//! state flapping and templated "real-time" arrivals on their own broadcast channel.

pub mod listeners;
pub mod scheduler;
pub mod service;
pub mod templates;

pub use listeners::Subscription;
pub use scheduler::ScheduledTask;
pub use service::{NotificationService, NotificationSettings};
