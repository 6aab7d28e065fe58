//! Notification service
//!
//! Every mutation is a read-modify-write of the whole collection under a write gate. When it
//! changes anything, the new collection is written and then published to snapshot subscribers
//! in registration order before the gate is released.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::listeners::{Listeners, Subscription};
use super::scheduler::ScheduledTask;
use super::templates;
use crate::error::{CollabError, Result};
use crate::models::{
    ConnectionState, Notification, NotificationArrival, NotificationDraft, NotificationType,
};
use crate::store::Store;

/// Longest a simulated outage lasts before reconnecting
const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Tunables for a [`NotificationService`]
#[derive(Debug, Clone)]
pub struct NotificationSettings {
    /// Read notifications older than this are removed by `clear_old_notifications`
    pub retention_days: i64,
    /// Capacity of the arrival broadcast channel
    pub arrival_channel_capacity: usize,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            retention_days: 30,
            arrival_channel_capacity: 256,
        }
    }
}

#[derive(Default)]
struct Simulations {
    periodic: Option<ScheduledTask>,
    pending: Vec<ScheduledTask>,
    connection: Option<ScheduledTask>,
}

struct ServiceInner {
    store: Store,
    settings: NotificationSettings,
    write_gate: tokio::sync::Mutex<()>,
    snapshot_listeners: Arc<Listeners<[Notification]>>,
    connection_listeners: Arc<Listeners<ConnectionState>>,
    connection_state: Mutex<ConnectionState>,
    arrival_tx: broadcast::Sender<NotificationArrival>,
    simulations: Mutex<Simulations>,
    sequence: AtomicU64,
}

/// Handle to the notification service. Clones share state.
#[derive(Clone)]
pub struct NotificationService {
    inner: Arc<ServiceInner>,
}

impl NotificationService {
    pub fn new(store: Store) -> Self {
        Self::with_settings(store, NotificationSettings::default())
    }

    pub fn with_settings(store: Store, settings: NotificationSettings) -> Self {
        let (arrival_tx, _) = broadcast::channel(settings.arrival_channel_capacity.max(1));
        Self {
            inner: Arc::new(ServiceInner {
                store,
                settings,
                write_gate: tokio::sync::Mutex::new(()),
                snapshot_listeners: Listeners::new(),
                connection_listeners: Listeners::new(),
                connection_state: Mutex::new(ConnectionState::Connected),
                arrival_tx,
                simulations: Mutex::new(Simulations::default()),
                sequence: AtomicU64::new(1),
            }),
        }
    }

    // Subscriptions

    /// Receive the full notification collection after every change
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[Notification]) + Send + Sync + 'static,
    {
        self.inner.snapshot_listeners.add(callback)
    }

    /// Receive connection state transitions
    pub fn subscribe_to_connection<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.inner.connection_listeners.add(callback)
    }

    /// Receive arrival events for synthesized real-time notifications
    pub fn subscribe_to_arrivals(&self) -> broadcast::Receiver<NotificationArrival> {
        self.inner.arrival_tx.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *lock(&self.inner.connection_state)
    }

    // Reads

    /// Active (non-archived) notifications for a user, newest first
    pub async fn get_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        self.select(|n| n.is_owned_by(user_id) && !n.archived).await
    }

    /// Archived notifications for a user, newest first
    pub async fn get_archived_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        self.select(|n| n.is_owned_by(user_id) && n.archived).await
    }

    pub async fn get_unread_count(&self, user_id: &str) -> Result<usize> {
        let records = self.inner.store.get::<Notification>().await?;
        Ok(records
            .iter()
            .filter(|n| n.is_owned_by(user_id) && !n.archived && !n.is_read)
            .count())
    }

    async fn select<P>(&self, predicate: P) -> Result<Vec<Notification>>
    where
        P: Fn(&Notification) -> bool,
    {
        let mut selected: Vec<Notification> = self
            .inner
            .store
            .get::<Notification>()
            .await?
            .into_iter()
            .filter(|n| predicate(n))
            .collect();
        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(selected)
    }

    // Mutations

    /// Run `change` against the collection under the write gate. `change` returns its result and
    /// whether it modified anything; only modifications are written and published.
    async fn mutate<R, F>(&self, change: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<Notification>) -> Result<(R, bool)>,
    {
        let _gate = self.inner.write_gate.lock().await;
        let mut records = self.inner.store.get::<Notification>().await?;
        let (result, changed) = change(&mut records)?;
        if changed {
            self.inner.store.set(&records).await?;
            tracing::debug!(
                "Publishing {} notifications to {} subscribers",
                records.len(),
                self.inner.snapshot_listeners.len()
            );
            self.inner.snapshot_listeners.emit(&records);
        }
        Ok(result)
    }

    pub async fn create_notification(&self, draft: NotificationDraft) -> Result<Notification> {
        validate_draft(&draft)?;
        let notification = Notification::new(draft);
        let created = notification.clone();
        self.mutate(move |records| {
            records.push(notification);
            Ok(((), true))
        })
        .await?;
        tracing::info!(
            "Created {} notification {} for {}",
            created.notification_type.as_str(),
            created.id,
            created.recipient_id
        );
        Ok(created)
    }

    /// Insert independently addressed notifications in a single write
    pub async fn create_batch_notifications(
        &self,
        drafts: Vec<NotificationDraft>,
    ) -> Result<Vec<Notification>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        for draft in &drafts {
            validate_draft(draft)?;
        }
        let created: Vec<Notification> = drafts.into_iter().map(Notification::new).collect();
        let batch = created.clone();
        self.mutate(move |records| {
            records.extend(batch);
            Ok(((), true))
        })
        .await?;
        tracing::info!("Created batch of {} notifications", created.len());
        Ok(created)
    }

    pub async fn mark_as_read(&self, id: Uuid, user_id: &str) -> Result<Notification> {
        self.mutate(|records| {
            let n = find_owned(records, id, user_id)?;
            let changed = n.mark_read();
            Ok((n.clone(), changed))
        })
        .await
    }

    pub async fn mark_as_unread(&self, id: Uuid, user_id: &str) -> Result<Notification> {
        self.mutate(|records| {
            let n = find_owned(records, id, user_id)?;
            let changed = n.mark_unread();
            Ok((n.clone(), changed))
        })
        .await
    }

    /// Mark every active notification of the user read; returns how many changed
    pub async fn mark_all_as_read(&self, user_id: &str) -> Result<usize> {
        let changed = self
            .mutate(|records| {
                let changed = records
                    .iter_mut()
                    .filter(|n| n.is_owned_by(user_id) && !n.archived)
                    .map(|n| n.mark_read())
                    .filter(|changed| *changed)
                    .count();
                Ok((changed, changed > 0))
            })
            .await?;
        tracing::debug!("Marked {} notifications read for {}", changed, user_id);
        Ok(changed)
    }

    pub async fn delete_notification(&self, id: Uuid, user_id: &str) -> Result<()> {
        self.mutate(|records| {
            let index = records
                .iter()
                .position(|n| n.id == id && n.is_owned_by(user_id))
                .ok_or_else(|| not_found(id))?;
            records.remove(index);
            Ok(((), true))
        })
        .await
    }

    /// Delete the listed notifications owned by the user. Ids that are missing or
    /// belong to someone else are skipped. Returns how many were deleted.
    pub async fn bulk_delete_notifications(&self, ids: &[Uuid], user_id: &str) -> Result<usize> {
        let ids: HashSet<Uuid> = ids.iter().copied().collect();
        self.mutate(|records| {
            let before = records.len();
            records.retain(|n| !(ids.contains(&n.id) && n.is_owned_by(user_id)));
            let deleted = before - records.len();
            Ok((deleted, deleted > 0))
        })
        .await
    }

    /// Hard-delete the user's read notifications older than the retention window
    pub async fn clear_old_notifications(&self, user_id: &str) -> Result<usize> {
        let retention = ChronoDuration::days(self.inner.settings.retention_days);
        let now = Utc::now();
        let cleared = self
            .mutate(|records| {
                let before = records.len();
                records.retain(|n| {
                    !(n.is_owned_by(user_id) && n.is_read && n.is_older_than(retention, now))
                });
                let cleared = before - records.len();
                Ok((cleared, cleared > 0))
            })
            .await?;
        tracing::info!("Cleared {} old notifications for {}", cleared, user_id);
        Ok(cleared)
    }

    /// Archive the user's notifications older than `days`
    pub async fn archive_old_notifications(&self, user_id: &str, days: u32) -> Result<usize> {
        let age = ChronoDuration::days(i64::from(days));
        let now = Utc::now();
        let archived = self
            .mutate(|records| {
                let mut archived = 0;
                for n in records.iter_mut() {
                    if n.is_owned_by(user_id) && !n.archived && n.is_older_than(age, now) {
                        n.archived = true;
                        archived += 1;
                    }
                }
                Ok((archived, archived > 0))
            })
            .await?;
        tracing::info!("Archived {} notifications for {}", archived, user_id);
        Ok(archived)
    }

    // Simulated transport

    /// Synthesize one templated notification for `recipient_id` after `delay`, then
    /// publish it as an arrival. Cancelled by [`NotificationService::stop_notification_simulation`].
    pub fn simulate_real_time_notification(
        &self,
        notification_type: NotificationType,
        recipient_id: impl Into<String>,
        delay: Duration,
    ) -> ScheduledTask {
        let service = self.clone();
        let recipient_id = recipient_id.into();
        let task = ScheduledTask::after(delay, async move {
            if let Err(e) = service.deliver_simulated(notification_type, &recipient_id).await {
                tracing::warn!("Simulated notification for {} failed: {}", recipient_id, e);
            }
        });

        let mut sims = lock(&self.inner.simulations);
        sims.pending.retain(|t| !t.is_finished());
        sims.pending.push(task.clone());
        task
    }

    /// Periodically synthesize notifications for `recipient_id`, cycling through every type.
    /// Replaces a running notification simulation.
    pub fn start_notification_simulation(&self, recipient_id: impl Into<String>, interval: Duration) {
        let recipient_id = recipient_id.into();
        let service = self.clone();
        let mut cycle = NotificationType::ALL.into_iter().cycle();

        let task = ScheduledTask::every(interval, move || {
            let service = service.clone();
            let recipient_id = recipient_id.clone();
            let notification_type = cycle.next().unwrap_or(NotificationType::TaskUpdated);
            async move {
                if let Err(e) = service.deliver_simulated(notification_type, &recipient_id).await {
                    tracing::warn!("Simulated notification for {} failed: {}", recipient_id, e);
                }
            }
        });

        let mut sims = lock(&self.inner.simulations);
        if let Some(previous) = sims.periodic.replace(task) {
            previous.cancel();
        }
        tracing::info!("Notification simulation started (every {:?})", interval);
    }

    /// Cancel periodic synthesis and every pending one-shot synthesis
    pub fn stop_notification_simulation(&self) {
        let mut sims = lock(&self.inner.simulations);
        if let Some(task) = sims.periodic.take() {
            task.cancel();
        }
        for task in sims.pending.drain(..) {
            task.cancel();
        }
        tracing::info!("Notification simulation stopped");
    }

    /// Flap the connection state every `interval`, alternating between a brief
    /// `connecting` blip and a `disconnected` outage, each ending in `connected`
    pub fn start_connection_simulation(&self, interval: Duration) {
        let service = self.clone();
        let reconnect_delay = (interval / 2).min(MAX_RECONNECT_DELAY);
        let mut flaps = 0u64;

        let task = ScheduledTask::every(interval, move || {
            flaps += 1;
            let interrupted = if flaps % 2 == 1 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Disconnected
            };
            let service = service.clone();
            async move {
                service.set_connection_state(interrupted);
                tokio::time::sleep(reconnect_delay).await;
                service.set_connection_state(ConnectionState::Connected);
            }
        });

        let mut sims = lock(&self.inner.simulations);
        if let Some(previous) = sims.connection.replace(task) {
            previous.cancel();
        }
        tracing::info!("Connection simulation started (every {:?})", interval);
    }

    /// Cancel connection flapping and restore `connected`
    pub fn stop_connection_simulation(&self) {
        let task = lock(&self.inner.simulations).connection.take();
        if let Some(task) = task {
            task.cancel();
        }
        self.set_connection_state(ConnectionState::Connected);
        tracing::info!("Connection simulation stopped");
    }

    fn set_connection_state(&self, state: ConnectionState) {
        {
            let mut current = lock(&self.inner.connection_state);
            if *current == state {
                return;
            }
            *current = state;
        }
        tracing::debug!("Connection state -> {}", state.as_str());
        self.inner.connection_listeners.emit(&state);
    }

    async fn deliver_simulated(
        &self,
        notification_type: NotificationType,
        recipient_id: &str,
    ) -> Result<Notification> {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let draft = templates::synthesize(notification_type, recipient_id, sequence);
        let notification = self.create_notification(draft).await?;

        let arrival = NotificationArrival {
            notification: notification.clone(),
            timestamp: Utc::now(),
        };
        // No receivers is fine
        let _ = self.inner.arrival_tx.send(arrival);
        Ok(notification)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn not_found(id: Uuid) -> CollabError {
    CollabError::not_found(format!("Notification {} not found", id))
        .with_context("notification_id", id.to_string())
}

fn find_owned<'a>(
    records: &'a mut [Notification],
    id: Uuid,
    user_id: &str,
) -> Result<&'a mut Notification> {
    records
        .iter_mut()
        .find(|n| n.id == id && n.is_owned_by(user_id))
        .ok_or_else(|| not_found(id))
}

fn validate_draft(draft: &NotificationDraft) -> Result<()> {
    if draft.recipient_id.trim().is_empty() {
        return Err(CollabError::validation("Notification recipient is required"));
    }
    if draft.title.trim().is_empty() {
        return Err(CollabError::validation("Notification title is required"));
    }
    Ok(())
}
