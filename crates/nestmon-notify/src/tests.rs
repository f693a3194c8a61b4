use crate::channels::ContactResolver;
use crate::dispatcher::{
    Backoff, DispatchConfig, NotificationDispatcher, RecipientDirectory, RetryPolicy,
};
use crate::plugin::ChannelRegistry;
use crate::retention::{RetentionConfig, RetentionSweeper};
use crate::tracker::DeliveryTracker;
use crate::{ChannelTransport, MessagePayload, NotifyError};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use nestmon_common::types::*;
use nestmon_storage::memory::MemoryNotificationStore;
use nestmon_storage::NotificationStore;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

// ---- fixtures ----

struct StubDirectory {
    roles: Vec<(TargetRole, Vec<String>)>,
}

impl StubDirectory {
    fn empty() -> Self {
        Self { roles: Vec::new() }
    }
}

#[async_trait]
impl RecipientDirectory for StubDirectory {
    async fn resolve(&self, group: &GroupDescriptor) -> crate::error::Result<Vec<String>> {
        match group {
            GroupDescriptor::Role { role } => Ok(self
                .roles
                .iter()
                .find(|(r, _)| r == role)
                .map(|(_, users)| users.clone())
                .unwrap_or_default()),
            _ => Ok(Vec::new()),
        }
    }
}

enum SendMode {
    Succeed,
    FailTransient,
    Reject,
}

struct StubTransport {
    channel: ChannelType,
    mode: SendMode,
    calls: AtomicU32,
}

impl StubTransport {
    fn new(channel: ChannelType, mode: SendMode) -> Arc<Self> {
        Arc::new(Self {
            channel,
            mode,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelTransport for StubTransport {
    fn channel_type(&self) -> ChannelType {
        self.channel
    }

    async fn send(&self, _recipient: &str, _payload: &MessagePayload) -> crate::error::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            SendMode::Succeed => Ok(()),
            SendMode::FailTransient => Err(NotifyError::Transport("gateway unavailable".into())),
            SendMode::Reject => Err(NotifyError::Rejected("unknown address".into())),
        }
    }
}

struct StaticContacts;

#[async_trait]
impl ContactResolver for StaticContacts {
    async fn contact(
        &self,
        user_id: &str,
        channel: ChannelType,
    ) -> crate::error::Result<Option<String>> {
        Ok(Some(match channel {
            ChannelType::Email => format!("{user_id}@example.com"),
            _ => "+15550001111".to_string(),
        }))
    }
}

fn fast_config() -> DispatchConfig {
    DispatchConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_millis(1)),
        },
        retain_days: 30,
    }
}

fn build_dispatcher(
    store: Arc<dyn NotificationStore>,
    directory: StubDirectory,
    transports: Vec<Arc<StubTransport>>,
) -> Arc<NotificationDispatcher> {
    let mut dispatcher = NotificationDispatcher::new(store, Arc::new(directory), fast_config());
    for t in transports {
        dispatcher.register_transport(t);
    }
    Arc::new(dispatcher)
}

fn request(
    direct: &[&str],
    channels: &[(ChannelType, u8)],
    fallback: Option<Fallback>,
) -> DispatchRequest {
    DispatchRequest {
        title: "Pickup reminder".into(),
        message: "Please confirm pickup arrangements for your child".into(),
        notification_type: NotificationType::Reminder,
        category: NotificationCategory::Important,
        sender: Sender {
            user_id: "system".into(),
            role: SenderRole::System,
        },
        direct: direct.iter().map(|s| s.to_string()).collect(),
        groups: Vec::new(),
        channels: channels
            .iter()
            .map(|(c, r)| RequestedChannel {
                channel: *c,
                priority_rank: *r,
            })
            .collect(),
        fallback,
        related_alert: None,
    }
}

// ---- dispatch ----

#[tokio::test]
async fn dispatch_sends_to_all_recipients_and_marks_sent() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let in_app = StubTransport::new(ChannelType::InApp, SendMode::Succeed);
    let dispatcher = build_dispatcher(store.clone(), StubDirectory::empty(), vec![in_app.clone()]);

    let stored = dispatcher
        .dispatch(request(
            &["parent-1", "parent-2"],
            &[(ChannelType::InApp, 1)],
            None,
        ))
        .await
        .unwrap();

    let n = &stored.record;
    assert_eq!(n.status.current, NotificationStatus::Sent);
    assert!(n.recipients.direct.iter().all(|r| r.sent && r.sent_at.is_some()));
    assert_eq!(n.analytics.sent, 2);
    assert_eq!(n.analytics.failed, 0);
    let method = &n.delivery.methods[0];
    assert_eq!(method.status, MethodStatus::Sent);
    assert_eq!(method.attempts, 1);
    assert_eq!(in_app.calls(), 2);
    // Draft -> Sending -> Sent, history keeps the outgoing states
    assert_eq!(n.status.history[0].status, NotificationStatus::Draft);
    assert_eq!(n.status.history[1].status, NotificationStatus::Sending);
}

#[tokio::test]
async fn dispatch_with_no_recipients_is_rejected() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let dispatcher = build_dispatcher(store, StubDirectory::empty(), vec![]);

    let err = dispatcher
        .dispatch(request(&[], &[(ChannelType::InApp, 1)], None))
        .await
        .unwrap_err();
    assert!(matches!(err, NotifyError::NoRecipients));
}

#[tokio::test]
async fn group_recipients_are_resolved_and_deduped() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let directory = StubDirectory {
        roles: vec![(
            TargetRole::Teacher,
            vec!["teacher-1".into(), "teacher-2".into()],
        )],
    };
    let in_app = StubTransport::new(ChannelType::InApp, SendMode::Succeed);
    let dispatcher = build_dispatcher(store, directory, vec![in_app]);

    let mut req = request(&["teacher-1"], &[(ChannelType::InApp, 1)], None);
    req.groups = vec![GroupDescriptor::Role {
        role: TargetRole::Teacher,
    }];
    let stored = dispatcher.dispatch(req).await.unwrap();

    let users: Vec<&str> = stored
        .record
        .recipients
        .direct
        .iter()
        .map(|r| r.user_id.as_str())
        .collect();
    assert_eq!(users, vec!["teacher-1", "teacher-2"]);
}

#[tokio::test]
async fn fallback_delivers_after_primary_channels_exhaust() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let email = StubTransport::new(ChannelType::Email, SendMode::FailTransient);
    let sms = StubTransport::new(ChannelType::Sms, SendMode::FailTransient);
    let phone = StubTransport::new(ChannelType::PhoneCall, SendMode::Succeed);
    let dispatcher = build_dispatcher(
        store.clone(),
        StubDirectory::empty(),
        vec![email.clone(), sms.clone(), phone.clone()],
    );

    let stored = dispatcher
        .dispatch(request(
            &["parent-1"],
            &[(ChannelType::Email, 1), (ChannelType::Sms, 2)],
            Some(Fallback {
                channel: ChannelType::PhoneCall,
                delay_seconds: 900,
            }),
        ))
        .await
        .unwrap();

    // both primaries exhausted, fallback timer pending
    let n = &stored.record;
    assert_eq!(n.status.current, NotificationStatus::Sending);
    assert_eq!(email.calls(), 3);
    assert_eq!(sms.calls(), 3);
    for method in &n.delivery.methods {
        assert_eq!(method.status, MethodStatus::Failed);
        assert_eq!(method.attempts, 3);
    }
    assert!(!n.recipients.direct[0].sent);
    assert!(!n.recipients.direct[0].failed);

    // fire the fallback window directly instead of waiting 900s
    dispatcher
        .run_fallback(&n.notification_id)
        .await
        .unwrap();

    let after = store.get(&n.notification_id).await.unwrap();
    assert_eq!(after.record.status.current, NotificationStatus::Sent);
    assert!(after.record.recipients.direct[0].sent);
    assert_eq!(phone.calls(), 1);
    let fallback_method = after
        .record
        .delivery
        .methods
        .iter()
        .find(|m| m.channel == ChannelType::PhoneCall)
        .unwrap();
    assert_eq!(fallback_method.status, MethodStatus::Sent);
    assert_eq!(fallback_method.priority_rank, 3);
}

#[tokio::test]
async fn failure_without_fallback_finalizes_failed() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let email = StubTransport::new(ChannelType::Email, SendMode::FailTransient);
    let dispatcher = build_dispatcher(store, StubDirectory::empty(), vec![email]);

    let stored = dispatcher
        .dispatch(request(&["parent-1"], &[(ChannelType::Email, 1)], None))
        .await
        .unwrap();

    let n = &stored.record;
    assert_eq!(n.status.current, NotificationStatus::Failed);
    assert!(n.recipients.direct[0].failed);
    assert_eq!(n.analytics.failed, 1);
    assert_eq!(n.analytics.sent, 0);
}

#[tokio::test]
async fn permanent_rejection_short_circuits_retries() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let email = StubTransport::new(ChannelType::Email, SendMode::Reject);
    let dispatcher = build_dispatcher(store, StubDirectory::empty(), vec![email.clone()]);

    let stored = dispatcher
        .dispatch(request(&["parent-1"], &[(ChannelType::Email, 1)], None))
        .await
        .unwrap();

    // one attempt, no retry for a rejected recipient
    assert_eq!(email.calls(), 1);
    let n = &stored.record;
    assert_eq!(n.delivery.methods[0].attempts, 1);
    assert_eq!(n.delivery.methods[0].status, MethodStatus::Failed);
    assert_eq!(n.status.current, NotificationStatus::Failed);
    assert!(n.recipients.direct[0].error.is_some());
}

#[tokio::test]
async fn cancelled_notification_skips_scheduled_fallback() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let email = StubTransport::new(ChannelType::Email, SendMode::FailTransient);
    let phone = StubTransport::new(ChannelType::PhoneCall, SendMode::Succeed);
    let dispatcher = build_dispatcher(
        store.clone(),
        StubDirectory::empty(),
        vec![email, phone.clone()],
    );

    let stored = dispatcher
        .dispatch(request(
            &["parent-1"],
            &[(ChannelType::Email, 1)],
            Some(Fallback {
                channel: ChannelType::PhoneCall,
                delay_seconds: 900,
            }),
        ))
        .await
        .unwrap();
    let id = stored.record.notification_id.clone();
    assert_eq!(stored.record.status.current, NotificationStatus::Sending);

    let cancelled = dispatcher
        .cancel(&id, "parent reached directly", Some("admin-1"))
        .await
        .unwrap();
    assert_eq!(cancelled.record.status.current, NotificationStatus::Cancelled);

    dispatcher.run_fallback(&id).await.unwrap();
    let after = store.get(&id).await.unwrap();
    assert_eq!(after.record.status.current, NotificationStatus::Cancelled);
    assert_eq!(phone.calls(), 0);
    assert!(after
        .record
        .delivery
        .methods
        .iter()
        .all(|m| m.channel != ChannelType::PhoneCall));

    let err = dispatcher.cancel(&id, "again", None).await.unwrap_err();
    assert!(matches!(err, NotifyError::InvalidStatus { op: "cancel", .. }));
}

#[tokio::test]
async fn scheduled_notification_dispatches_when_due() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let in_app = StubTransport::new(ChannelType::InApp, SendMode::Succeed);
    let dispatcher = build_dispatcher(store.clone(), StubDirectory::empty(), vec![in_app.clone()]);

    let send_at = Utc::now() + ChronoDuration::hours(1);
    let stored = dispatcher
        .schedule(
            request(&["parent-1"], &[(ChannelType::InApp, 1)], None),
            send_at,
        )
        .await
        .unwrap();

    let n = &stored.record;
    assert_eq!(n.status.current, NotificationStatus::Scheduled);
    assert_eq!(n.scheduled_for, Some(send_at));
    assert_eq!(in_app.calls(), 0);

    // nothing due yet
    assert_eq!(dispatcher.dispatch_due(Utc::now()).await.unwrap(), 0);

    let fired = dispatcher
        .dispatch_due(send_at + ChronoDuration::minutes(1))
        .await
        .unwrap();
    assert_eq!(fired, 1);

    let after = store.get(&n.notification_id).await.unwrap();
    assert_eq!(after.record.status.current, NotificationStatus::Sent);
    assert!(after.record.recipients.direct[0].sent);
    assert_eq!(in_app.calls(), 1);

    // a second sweep finds nothing left to fire
    let again = dispatcher
        .dispatch_due(send_at + ChronoDuration::minutes(2))
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn cancelled_scheduled_notification_never_sends() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let in_app = StubTransport::new(ChannelType::InApp, SendMode::Succeed);
    let dispatcher = build_dispatcher(store.clone(), StubDirectory::empty(), vec![in_app.clone()]);

    let send_at = Utc::now() + ChronoDuration::hours(1);
    let stored = dispatcher
        .schedule(
            request(&["parent-1"], &[(ChannelType::InApp, 1)], None),
            send_at,
        )
        .await
        .unwrap();
    let id = stored.record.notification_id.clone();

    dispatcher
        .cancel(&id, "event called off", Some("admin-1"))
        .await
        .unwrap();

    assert_eq!(
        dispatcher
            .dispatch_due(send_at + ChronoDuration::minutes(1))
            .await
            .unwrap(),
        0
    );
    dispatcher.fire_scheduled(&id).await.unwrap();

    let after = store.get(&id).await.unwrap();
    assert_eq!(after.record.status.current, NotificationStatus::Cancelled);
    assert_eq!(in_app.calls(), 0);
}

// ---- delivery tracking ----

async fn sent_notification(
    store: &Arc<dyn NotificationStore>,
    recipients: &[&str],
) -> String {
    let in_app = StubTransport::new(ChannelType::InApp, SendMode::Succeed);
    let dispatcher = build_dispatcher(store.clone(), StubDirectory::empty(), vec![in_app]);
    let stored = dispatcher
        .dispatch(request(recipients, &[(ChannelType::InApp, 1)], None))
        .await
        .unwrap();
    stored.record.notification_id
}

#[tokio::test]
async fn read_before_delivery_is_a_noop() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let id = sent_notification(&store, &["parent-1"]).await;
    let tracker = DeliveryTracker::new(store.clone());

    assert!(!tracker.mark_read(&id, "parent-1").await.unwrap());

    let n = store.get(&id).await.unwrap().record;
    assert!(!n.recipients.direct[0].read);
    assert_eq!(n.analytics.read, 0);
    assert_eq!(n.analytics.open_rate, 0);
}

#[tokio::test]
async fn delivery_then_read_moves_status_and_rates() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let id = sent_notification(&store, &["parent-1", "parent-2"]).await;
    let tracker = DeliveryTracker::new(store.clone());

    assert!(tracker.mark_delivered(&id, "parent-1").await.unwrap());
    assert!(tracker.mark_delivered(&id, "parent-2").await.unwrap());
    // repeated receipt does not move the counter
    assert!(!tracker.mark_delivered(&id, "parent-1").await.unwrap());
    assert!(tracker.mark_read(&id, "parent-1").await.unwrap());
    assert!(!tracker.mark_read(&id, "parent-1").await.unwrap());

    let n = store.get(&id).await.unwrap().record;
    assert_eq!(n.status.current, NotificationStatus::Delivered);
    assert_eq!(n.analytics.delivered, 2);
    assert_eq!(n.analytics.read, 1);
    assert_eq!(n.analytics.open_rate, 50);
    assert!(n.analytics.delivered <= n.analytics.sent);
    assert!(n.analytics.read <= n.analytics.delivered);
}

#[tokio::test]
async fn acknowledge_is_idempotent_and_needs_no_read() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let id = sent_notification(&store, &["parent-1"]).await;
    let tracker = DeliveryTracker::new(store.clone());

    assert!(tracker.mark_acknowledged(&id, "parent-1").await.unwrap());
    assert!(!tracker.mark_acknowledged(&id, "parent-1").await.unwrap());

    let n = store.get(&id).await.unwrap().record;
    let entry = n.recipient("parent-1").unwrap();
    assert!(entry.acknowledged);
    assert!(entry.acknowledged_at.is_some());
    assert!(!entry.read);
    assert_eq!(n.analytics.acknowledged, 1);
}

#[tokio::test]
async fn responses_append_but_count_once_per_user() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let id = sent_notification(&store, &["parent-1"]).await;
    let tracker = DeliveryTracker::new(store.clone());

    tracker.mark_delivered(&id, "parent-1").await.unwrap();
    tracker
        .add_response(&id, "parent-1", "on my way")
        .await
        .unwrap();
    tracker
        .add_response(&id, "parent-1", "arrived")
        .await
        .unwrap();

    let n = store.get(&id).await.unwrap().record;
    assert_eq!(n.responses.len(), 2);
    assert_eq!(n.analytics.responded, 1);
    assert_eq!(n.analytics.response_rate, 100);
    assert!(n.analytics.responded <= n.analytics.delivered);
}

#[tokio::test]
async fn tracking_an_unknown_recipient_is_an_error() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let id = sent_notification(&store, &["parent-1"]).await;
    let tracker = DeliveryTracker::new(store);

    let err = tracker.mark_delivered(&id, "stranger").await.unwrap_err();
    assert!(matches!(err, NotifyError::UnknownRecipient { .. }));
}

// ---- retention ----

#[tokio::test]
async fn expired_records_are_archived_exactly_once() {
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryNotificationStore::new());
    let id = sent_notification(&store, &["parent-1"]).await;

    let stored = store.get(&id).await.unwrap();
    let mut record = stored.record;
    record.expiration.expires_at = Utc::now() - ChronoDuration::days(1);
    store.update(stored.version, record).await.unwrap();

    let sweeper = RetentionSweeper::new(store.clone(), RetentionConfig::default());
    assert_eq!(sweeper.sweep(Utc::now()).await.unwrap(), 1);

    let n = store.get(&id).await.unwrap().record;
    assert!(n.archived);
    assert_eq!(n.status.current, NotificationStatus::Expired);

    assert_eq!(sweeper.sweep(Utc::now()).await.unwrap(), 0);
}

// ---- plugin registry ----

#[test]
fn registry_default_has_all_builtin_plugins() {
    let registry = ChannelRegistry::default();
    for channel in [
        ChannelType::InApp,
        ChannelType::Email,
        ChannelType::Sms,
        ChannelType::Push,
        ChannelType::PhoneCall,
    ] {
        assert!(registry.has_plugin(channel), "missing plugin for {channel}");
    }
}

#[test]
fn empty_registry_rejects_unknown_channel() {
    let registry = ChannelRegistry::new();
    let err = registry
        .create_transport(ChannelType::Email, &json!({}), Arc::new(StaticContacts))
        .unwrap_err();
    assert!(matches!(err, NotifyError::UnknownChannelType(_)));
}

#[test]
fn email_plugin_rejects_incomplete_config() {
    let registry = ChannelRegistry::default();
    let plugin = registry.get_plugin(ChannelType::Email).unwrap();
    let err = plugin
        .validate_config(&json!({ "smtp_port": 587 }))
        .unwrap_err();
    assert!(matches!(err, NotifyError::InvalidConfig(_)));
}

#[test]
fn sms_plugin_builds_transport_and_redacts_secrets() {
    let registry = ChannelRegistry::default();
    let config = json!({
        "gateway_url": "https://sms.example.com/send",
        "api_key": "k-secret",
    });
    let transport = registry
        .create_transport(ChannelType::Sms, &config, Arc::new(StaticContacts))
        .unwrap();
    assert_eq!(transport.channel_type(), ChannelType::Sms);

    let plugin = registry.get_plugin(ChannelType::Sms).unwrap();
    let redacted = plugin.redact_config(&config);
    assert_eq!(redacted["gateway_url"], "https://sms.example.com/send");
    assert_eq!(redacted["api_key"], "***");
}
