use std::collections::BTreeMap;
use std::time::Duration;

use super::config::RetryConfig;
use crate::error::CollabError;

/// Collaboration feature an operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Delegation,
    Comment,
    Notification,
    Attachment,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Delegation => "delegation",
            Feature::Comment => "comment",
            Feature::Notification => "notification",
            Feature::Attachment => "attachment",
        }
    }

    /// Default retry budget for operations of this feature
    pub fn default_retry_config(&self) -> RetryConfig {
        match self {
            Feature::Delegation => RetryConfig::new(3, Duration::from_millis(1000)),
            Feature::Comment => RetryConfig::new(2, Duration::from_millis(500)),
            Feature::Notification => RetryConfig::new(2, Duration::from_millis(500)),
            Feature::Attachment => RetryConfig::new(3, Duration::from_millis(2000)),
        }
    }
}

/// Diagnostic metadata attached to errors of a wrapped operation.
///
/// Only ever annotates; retry decisions never look at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    pub feature: Feature,
    pub operation: &'static str,
    pub fields: BTreeMap<String, String>,
}

impl OperationContext {
    pub fn new(feature: Feature, operation: &'static str) -> Self {
        Self {
            feature,
            operation,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    pub fn attach(&self, err: CollabError) -> CollabError {
        let err = err
            .with_context("feature", self.feature.as_str())
            .with_context("operation", self.operation);
        self.fields
            .iter()
            .fold(err, |err, (key, value)| err.with_context(key.clone(), value.clone()))
    }
}
