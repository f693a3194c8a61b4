//! Notification dispatch: channel fan-out, retry with backoff, fallback
//! scheduling, and cancellation.
//!
//! The dispatcher never holds a thread across a delay: retries sleep on
//! the tokio timer and the fallback window is a spawned task that
//! re-checks the persisted record before firing, so a cancellation
//! between scheduling and firing wins.

use crate::cas;
use crate::error::{NotifyError, Result};
use crate::utils::truncate_string;
use crate::{ChannelTransport, MessagePayload};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use nestmon_common::id;
use nestmon_common::types::{
    Analytics, ChannelType, Delivery, DeliveryMethod, DispatchRequest, Expiration, GroupDescriptor,
    MethodStatus, NotificationRecord, NotificationStatus, RecipientEntry, Recipients, StatusBlock,
};
use nestmon_storage::{NotificationStore, Versioned};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Delay strategy between delivery attempts on one channel.
#[derive(Debug, Clone)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempt cap per channel.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Delay to wait after attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(d) => d,
            Backoff::Exponential { base } => base * 2u32.saturating_pow(attempt.saturating_sub(1)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(500),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub retry: RetryPolicy,
    /// Retention window before a notification expires and is archived.
    pub retain_days: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            retain_days: 30,
        }
    }
}

/// Resolves a recipient-group descriptor to concrete user IDs. Backed by
/// the user/role directory collaborator.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn resolve(&self, group: &GroupDescriptor) -> Result<Vec<String>>;
}

struct ChannelRun {
    sent_any: bool,
    cancelled: bool,
}

pub struct NotificationDispatcher {
    store: Arc<dyn NotificationStore>,
    directory: Arc<dyn RecipientDirectory>,
    transports: HashMap<ChannelType, Arc<dyn ChannelTransport>>,
    config: DispatchConfig,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        directory: Arc<dyn RecipientDirectory>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            directory,
            transports: HashMap::new(),
            config,
        }
    }

    pub fn register_transport(&mut self, transport: Arc<dyn ChannelTransport>) {
        self.transports.insert(transport.channel_type(), transport);
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    /// Creates and sends a notification. Returns the record after the
    /// primary channels have run; a scheduled fallback, if any, completes
    /// in the background.
    pub async fn dispatch(
        self: &Arc<Self>,
        request: DispatchRequest,
    ) -> Result<Versioned<NotificationRecord>> {
        let recipients = self.resolve_recipients(&request).await?;
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        if request.channels.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "dispatch request has no channels".into(),
            ));
        }

        let record = self.build_record(&request, recipients);
        let notification_id = record.notification_id.clone();
        self.store.insert(record).await?;
        cas::mutate(&self.store, &notification_id, |n, now| {
            n.set_status(
                NotificationStatus::Sending,
                Some("dispatch started".into()),
                None,
                now,
            );
            Ok(true)
        })
        .await?;
        tracing::info!(
            notification_id = %notification_id,
            "Notification dispatch started"
        );

        self.send_record(&notification_id).await
    }

    /// Creates a notification in `scheduled` state and arms a timer for
    /// `send_at`. The [`Self::dispatch_due`] sweep also picks it up, so a
    /// restart between scheduling and the send time loses nothing.
    pub async fn schedule(
        self: &Arc<Self>,
        request: DispatchRequest,
        send_at: DateTime<Utc>,
    ) -> Result<Versioned<NotificationRecord>> {
        let recipients = self.resolve_recipients(&request).await?;
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        if request.channels.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "dispatch request has no channels".into(),
            ));
        }

        let mut record = self.build_record(&request, recipients);
        record.scheduled_for = Some(send_at);
        let now = Utc::now();
        record.set_status(
            NotificationStatus::Scheduled,
            Some("scheduled".into()),
            None,
            now,
        );
        let stored = self.store.insert(record).await?;
        tracing::info!(
            notification_id = %stored.record.notification_id,
            send_at = %send_at,
            "Notification scheduled"
        );

        let dispatcher = Arc::clone(self);
        let id = stored.record.notification_id.clone();
        let delay = (send_at - now).to_std().unwrap_or_default();
        tokio::spawn(async move {
            sleep(delay).await;
            if let Err(e) = dispatcher.fire_scheduled(&id).await {
                tracing::error!(notification_id = %id, error = %e, "Scheduled send failed");
            }
        });
        Ok(stored)
    }

    /// Sends a scheduled notification now. Skips silently unless the
    /// record is still `scheduled`, so the armed timer and the due sweep
    /// never double-send and a cancellation wins.
    pub async fn fire_scheduled(self: &Arc<Self>, notification_id: &str) -> Result<()> {
        let (_, started) = cas::mutate(&self.store, notification_id, |n, now| {
            if n.status.current != NotificationStatus::Scheduled {
                return Ok(false);
            }
            n.set_status(
                NotificationStatus::Sending,
                Some("scheduled send due".into()),
                None,
                now,
            );
            Ok(true)
        })
        .await?;
        if !started {
            tracing::debug!(notification_id, "Record no longer scheduled, skipping send");
            return Ok(());
        }
        self.send_record(notification_id).await?;
        Ok(())
    }

    /// Sends every scheduled notification whose time has come. Returns
    /// how many were fired this pass; per-record failures are isolated.
    pub async fn dispatch_due(self: &Arc<Self>, now: DateTime<Utc>) -> Result<u32> {
        let due = self.store.list_due_scheduled(now).await?;
        let mut fired = 0;
        for stored in due {
            let id = stored.record.notification_id.clone();
            match self.fire_scheduled(&id).await {
                Ok(()) => fired += 1,
                Err(e) => {
                    tracing::error!(notification_id = %id, error = %e, "Scheduled dispatch failed");
                }
            }
        }
        Ok(fired)
    }

    /// Runs the record's channels in priority order and finalizes the
    /// outcome. The record must already be in `sending` state.
    async fn send_record(
        self: &Arc<Self>,
        notification_id: &str,
    ) -> Result<Versioned<NotificationRecord>> {
        let current = self.store.get(notification_id).await?;
        let channel_order: Vec<ChannelType> = current
            .record
            .delivery
            .methods
            .iter()
            .map(|m| m.channel)
            .collect();

        let mut sent_any = false;
        let mut cancelled = false;
        for channel in channel_order {
            let run = self.run_channel(notification_id, channel).await?;
            if run.cancelled {
                cancelled = true;
                break;
            }
            if run.sent_any && !sent_any {
                sent_any = true;
                // sent as soon as any channel reaches any recipient
                cas::mutate(&self.store, notification_id, |n, now| {
                    if n.status.current == NotificationStatus::Sending {
                        n.set_status(NotificationStatus::Sent, None, None, now);
                        Ok(true)
                    } else {
                        Ok(false)
                    }
                })
                .await?;
            }
            // remaining channels only matter while someone is unreached
            let current = self.store.get(notification_id).await?;
            if current.record.recipients.direct.iter().all(|r| r.sent) {
                break;
            }
        }

        self.finish_primary(notification_id, sent_any, cancelled)
            .await
    }

    async fn resolve_recipients(&self, request: &DispatchRequest) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for user in &request.direct {
            if seen.insert(user.clone()) {
                out.push(user.clone());
            }
        }
        for group in &request.groups {
            let members = self.directory.resolve(group).await?;
            for user in members {
                if seen.insert(user.clone()) {
                    out.push(user);
                }
            }
        }
        Ok(out)
    }

    fn build_record(&self, request: &DispatchRequest, recipients: Vec<String>) -> NotificationRecord {
        let now = Utc::now();
        let mut methods: Vec<DeliveryMethod> = request
            .channels
            .iter()
            .map(|c| DeliveryMethod::new(c.channel, c.priority_rank))
            .collect();
        methods.sort_by_key(|m| m.priority_rank);

        NotificationRecord {
            notification_id: id::notification_id(),
            title: request.title.clone(),
            message: request.message.clone(),
            notification_type: request.notification_type,
            category: request.category,
            sender: request.sender.clone(),
            recipients: Recipients {
                direct: recipients.into_iter().map(RecipientEntry::new).collect(),
                broadcast: false,
            },
            delivery: Delivery {
                methods,
                fallback: request.fallback.clone(),
            },
            status: StatusBlock {
                current: NotificationStatus::Draft,
                history: Vec::new(),
            },
            responses: Vec::new(),
            analytics: Analytics::default(),
            related_alert: request.related_alert.clone(),
            scheduled_for: None,
            expiration: Expiration {
                expires_at: now + ChronoDuration::days(i64::from(self.config.retain_days)),
                retain_days: self.config.retain_days,
            },
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn payload_of(record: &NotificationRecord) -> MessagePayload {
        MessagePayload {
            title: record.title.clone(),
            message: record.message.clone(),
            category: record.category,
            related_alert: record.related_alert.clone(),
        }
    }

    /// Runs one channel to completion: attempts delivery to every
    /// recipient not yet reached, retrying transient failures up to the
    /// attempt cap. Permanent rejections drop the recipient from this
    /// channel only. Cancellation is re-checked from the store at every
    /// attempt boundary.
    async fn run_channel(&self, notification_id: &str, channel: ChannelType) -> Result<ChannelRun> {
        let Some(transport) = self.transports.get(&channel).cloned() else {
            tracing::warn!(
                notification_id,
                channel = %channel,
                "No transport registered for channel"
            );
            cas::mutate(&self.store, notification_id, |n, _| {
                if let Some(method) = n.method_mut(channel) {
                    method.status = MethodStatus::Failed;
                    method.error_message = Some("no transport registered".into());
                }
                Ok(true)
            })
            .await?;
            return Ok(ChannelRun {
                sent_any: false,
                cancelled: false,
            });
        };

        let mut rejected: HashSet<String> = HashSet::new();
        let mut sent_any = false;

        loop {
            let current = self.store.get(notification_id).await?;
            if current.record.status.current == NotificationStatus::Cancelled {
                cas::mutate(&self.store, notification_id, |n, _| {
                    if let Some(method) = n.method_mut(channel) {
                        if matches!(method.status, MethodStatus::Pending | MethodStatus::Sending) {
                            method.status = MethodStatus::Cancelled;
                            return Ok(true);
                        }
                    }
                    Ok(false)
                })
                .await?;
                return Ok(ChannelRun {
                    sent_any,
                    cancelled: true,
                });
            }

            let method_enabled = current
                .record
                .delivery
                .methods
                .iter()
                .find(|m| m.channel == channel)
                .map(|m| (m.enabled, m.attempts))
                .unwrap_or((false, 0));
            let (enabled, attempts_done) = method_enabled;
            if !enabled {
                return Ok(ChannelRun {
                    sent_any,
                    cancelled: false,
                });
            }

            let payload = Self::payload_of(&current.record);
            let targets: Vec<String> = current
                .record
                .recipients
                .direct
                .iter()
                .filter(|r| !r.sent && !rejected.contains(&r.user_id))
                .map(|r| r.user_id.clone())
                .collect();
            if targets.is_empty() || attempts_done >= self.config.retry.max_attempts {
                break;
            }

            let attempt = attempts_done + 1;
            cas::mutate(&self.store, notification_id, |n, now| {
                if let Some(method) = n.method_mut(channel) {
                    method.status = MethodStatus::Sending;
                    method.attempts = attempt;
                    method.last_attempt = Some(now);
                }
                Ok(true)
            })
            .await?;

            // Recipients in parallel; channels for one recipient stay
            // sequential because each channel runs to completion first.
            let sends = targets.iter().map(|user| {
                let transport = transport.clone();
                let payload = payload.clone();
                async move { (user.clone(), transport.send(user, &payload).await) }
            });
            let results: Vec<(String, Result<()>)> = join_all(sends).await;

            let mut transient_error: Option<String> = None;
            for (user, result) in &results {
                match result {
                    Ok(()) => {}
                    Err(e) if e.is_permanent() => {
                        rejected.insert(user.clone());
                        tracing::warn!(
                            notification_id,
                            channel = %channel,
                            user = %user,
                            error = %e,
                            "Recipient permanently rejected on channel"
                        );
                    }
                    Err(e) => {
                        transient_error = Some(e.to_string());
                        tracing::warn!(
                            notification_id,
                            channel = %channel,
                            user = %user,
                            attempt,
                            error = %e,
                            "Delivery attempt failed"
                        );
                    }
                }
            }

            cas::mutate(&self.store, notification_id, |n, now| {
                for (user, result) in &results {
                    let Some(entry) = n.recipient_mut(user) else {
                        continue;
                    };
                    match result {
                        Ok(()) => {
                            if !entry.sent {
                                entry.sent = true;
                                entry.sent_at = Some(now);
                                n.analytics.sent += 1;
                            }
                        }
                        Err(e) => {
                            entry.error = Some(truncate_string(&e.to_string(), 200));
                        }
                    }
                }
                if let Some(method) = n.method_mut(channel) {
                    method.error_message =
                        transient_error.as_deref().map(|e| truncate_string(e, 200));
                }
                Ok(true)
            })
            .await?;

            sent_any |= results.iter().any(|(_, r)| r.is_ok());

            let remaining = results
                .iter()
                .filter(|(user, r)| r.is_err() && !rejected.contains(user))
                .count();
            if remaining == 0 {
                break;
            }
            if attempt >= self.config.retry.max_attempts {
                break;
            }
            sleep(self.config.retry.delay(attempt)).await;
        }

        // channel enters failed only after exhausting its attempts with
        // zero sends
        cas::mutate(&self.store, notification_id, |n, _| {
            if let Some(method) = n.method_mut(channel) {
                let new_status = if sent_any {
                    MethodStatus::Sent
                } else {
                    MethodStatus::Failed
                };
                if method.status != new_status {
                    method.status = new_status;
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .await?;

        Ok(ChannelRun {
            sent_any,
            cancelled: false,
        })
    }

    async fn finish_primary(
        self: &Arc<Self>,
        notification_id: &str,
        sent_any: bool,
        cancelled: bool,
    ) -> Result<Versioned<NotificationRecord>> {
        if cancelled {
            tracing::info!(notification_id, "Dispatch stopped by cancellation");
            return Ok(self.store.get(notification_id).await?);
        }

        if sent_any {
            // Recipients nothing reached are final failures; the fallback
            // only applies when every primary channel failed.
            let (stored, _) = cas::mutate(&self.store, notification_id, |n, _| {
                Ok(mark_unreached_failed(n))
            })
            .await?;
            return Ok(stored);
        }

        let current = self.store.get(notification_id).await?;
        if let Some(fallback) = current.record.delivery.fallback.clone() {
            tracing::info!(
                notification_id,
                channel = %fallback.channel,
                delay_seconds = fallback.delay_seconds,
                "All primary channels failed, scheduling fallback"
            );
            let dispatcher = Arc::clone(self);
            let id = notification_id.to_string();
            tokio::spawn(async move {
                sleep(Duration::from_secs(fallback.delay_seconds)).await;
                if let Err(e) = dispatcher.run_fallback(&id).await {
                    tracing::error!(notification_id = %id, error = %e, "Fallback run failed");
                }
            });
            return Ok(current);
        }

        let (stored, _) = cas::mutate(&self.store, notification_id, |n, now| {
            mark_unreached_failed(n);
            n.set_status(
                NotificationStatus::Failed,
                Some("all channels exhausted".into()),
                None,
                now,
            );
            Ok(true)
        })
        .await?;
        tracing::warn!(notification_id, "Notification failed on all channels");
        Ok(stored)
    }

    /// Fires the scheduled fallback: re-checks the persisted record (a
    /// cancellation or late success wins), appends a delivery method for
    /// the fallback channel, and runs it like any other channel.
    pub(crate) async fn run_fallback(&self, notification_id: &str) -> Result<()> {
        let current = self.store.get(notification_id).await?;
        if current.record.status.current != NotificationStatus::Sending {
            tracing::debug!(
                notification_id,
                status = %current.record.status.current,
                "Fallback window elapsed but record is no longer sending, skipping"
            );
            return Ok(());
        }
        if current.record.recipients.direct.iter().any(|r| r.sent) {
            return Ok(());
        }
        let Some(fallback) = current.record.delivery.fallback.clone() else {
            return Ok(());
        };

        cas::mutate(&self.store, notification_id, |n, _| {
            if n.delivery.methods.iter().any(|m| m.channel == fallback.channel) {
                return Ok(false);
            }
            let next_rank = n
                .delivery
                .methods
                .iter()
                .map(|m| m.priority_rank)
                .max()
                .unwrap_or(0)
                .saturating_add(1);
            n.delivery
                .methods
                .push(DeliveryMethod::new(fallback.channel, next_rank));
            Ok(true)
        })
        .await?;

        let run = self.run_channel(notification_id, fallback.channel).await?;
        if run.cancelled {
            return Ok(());
        }
        if run.sent_any {
            cas::mutate(&self.store, notification_id, |n, now| {
                let mut changed = mark_unreached_failed(n);
                if n.status.current == NotificationStatus::Sending {
                    n.set_status(NotificationStatus::Sent, Some("fallback delivered".into()), None, now);
                    changed = true;
                }
                Ok(changed)
            })
            .await?;
        } else {
            cas::mutate(&self.store, notification_id, |n, now| {
                mark_unreached_failed(n);
                n.set_status(
                    NotificationStatus::Failed,
                    Some("all channels and fallback exhausted".into()),
                    None,
                    now,
                );
                Ok(true)
            })
            .await?;
            tracing::warn!(notification_id, "Notification failed including fallback");
        }
        Ok(())
    }

    /// Cancels a notification that has not finished sending. Any pending
    /// channel attempt or fallback timer observes the cancelled status at
    /// its next boundary and stops.
    pub async fn cancel(
        &self,
        notification_id: &str,
        reason: &str,
        actor: Option<&str>,
    ) -> Result<Versioned<NotificationRecord>> {
        let (stored, _) = cas::mutate(&self.store, notification_id, |n, now| {
            match n.status.current {
                NotificationStatus::Draft
                | NotificationStatus::Scheduled
                | NotificationStatus::Sending => {
                    n.set_status(
                        NotificationStatus::Cancelled,
                        Some(reason.to_string()),
                        actor.map(str::to_string),
                        now,
                    );
                    for method in &mut n.delivery.methods {
                        if matches!(method.status, MethodStatus::Pending | MethodStatus::Sending) {
                            method.status = MethodStatus::Cancelled;
                        }
                    }
                    Ok(true)
                }
                status => Err(NotifyError::InvalidStatus {
                    status,
                    op: "cancel",
                }),
            }
        })
        .await?;
        tracing::info!(notification_id, reason, "Notification cancelled");
        Ok(stored)
    }
}

/// Flags recipients no channel reached as failed and bumps the failed
/// counter. Returns whether anything changed.
fn mark_unreached_failed(n: &mut NotificationRecord) -> bool {
    let mut changed = false;
    for entry in &mut n.recipients.direct {
        if !entry.sent && !entry.failed {
            entry.failed = true;
            n.analytics.failed += 1;
            changed = true;
        }
    }
    changed
}

/// Consumes dispatch requests from the escalation evaluator (or any
/// other producer) and dispatches each in its own task so one slow or
/// failing notification never blocks the queue.
pub async fn run_dispatch_loop(
    dispatcher: Arc<NotificationDispatcher>,
    mut requests: tokio::sync::mpsc::Receiver<DispatchRequest>,
) {
    tracing::info!("Notification dispatch loop started");
    while let Some(request) = requests.recv().await {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(request).await {
                tracing::error!(error = %e, "Dispatch request failed");
            }
        });
    }
    tracing::info!("Dispatch request queue closed, loop exiting");
}
