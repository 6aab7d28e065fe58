//! Collaboration notifications, task delegation and retry handling for shared task lists

pub mod actions;
pub mod comment;
pub mod config;
pub mod delegation;
pub mod error;
pub mod models;
pub mod notification;
pub mod retry;
pub mod store;

use std::sync::Arc;

use actions::{AttachmentActions, CommentActions, DelegationActions, NotificationActions};
use comment::CommentService;
use config::CollabConfig;
use delegation::{DelegationManager, UserDirectory};
use notification::{NotificationService, NotificationSettings};
use retry::ErrorHandler;

/// The collaboration services wired to one store
#[derive(Clone)]
pub struct Collaboration {
    pub store: store::Store,
    pub notifications: NotificationService,
    pub delegations: DelegationManager,
    pub comments: CommentService,
}

impl Collaboration {
    pub fn new(store: store::Store, settings: NotificationSettings) -> Self {
        let notifications = NotificationService::with_settings(store.clone(), settings);
        Self {
            delegations: DelegationManager::new(store.clone(), notifications.clone()),
            comments: CommentService::new(store.clone(), notifications.clone()),
            notifications,
            store,
        }
    }

    /// Open the configured store and build the services on it
    pub async fn from_config(config: &CollabConfig) -> anyhow::Result<Self> {
        let store = config.open_store().await?;
        Ok(Self::new(store, config.notification_settings()))
    }

    /// Feature wrappers acting for the user `users` resolves, sharing one error handler
    pub fn actions(&self, users: Arc<dyn UserDirectory>) -> Actions {
        let handler = ErrorHandler::new();
        Actions {
            delegations: DelegationActions::new(
                self.delegations.clone(),
                users.clone(),
                handler.clone(),
            ),
            notifications: NotificationActions::new(
                self.notifications.clone(),
                users.clone(),
                handler.clone(),
            ),
            comments: CommentActions::new(self.comments.clone(), users, handler.clone()),
            attachments: AttachmentActions::new(handler.clone()),
            handler,
        }
    }
}

/// Per-user feature wrappers
#[derive(Clone)]
pub struct Actions {
    pub delegations: DelegationActions,
    pub notifications: NotificationActions,
    pub comments: CommentActions,
    pub attachments: AttachmentActions,
    /// Holds the most recent failure of any wrapper
    pub handler: ErrorHandler,
}
