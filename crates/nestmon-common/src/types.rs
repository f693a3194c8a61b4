use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use nestmon_common::types::Severity;
///
/// let sev: Severity = "high".parse().unwrap();
/// assert_eq!(sev, Severity::High);
/// assert_eq!(sev.to_string(), "high");
/// assert!(Severity::Critical > Severity::Low);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Weight used by the urgency scorer: low=1 .. critical=4.
    pub fn weight(self) -> u32 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Safety event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Violence,
    Injury,
    Emergency,
    Behavior,
    Absence,
    Security,
    Safety,
    Medical,
    Pickup,
    System,
    Maintenance,
}

impl AlertType {
    /// Types that bump the derived queue priority by +2.
    pub fn is_priority_boosted(self) -> bool {
        matches!(
            self,
            AlertType::Violence | AlertType::Emergency | AlertType::Medical
        )
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertType::Violence => "violence",
            AlertType::Injury => "injury",
            AlertType::Emergency => "emergency",
            AlertType::Behavior => "behavior",
            AlertType::Absence => "absence",
            AlertType::Security => "security",
            AlertType::Safety => "safety",
            AlertType::Medical => "medical",
            AlertType::Pickup => "pickup",
            AlertType::System => "system",
            AlertType::Maintenance => "maintenance",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Automated,
    Manual,
    System,
}

/// Alert lifecycle state, governed by the state machine in `nestmon-alert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Acknowledged,
    Investigating,
    Resolved,
    Dismissed,
    Escalated,
}

impl AlertStatus {
    /// Resolved and dismissed accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::Dismissed)
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Investigating => "investigating",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Dismissed => "dismissed",
            AlertStatus::Escalated => "escalated",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Resolved,
    NoActionNeeded,
    Escalated,
    Ongoing,
    FalsePositive,
}

/// Role a student played in the recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentRole {
    Victim,
    Aggressor,
    Witness,
    Involved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    Reporter,
    Responder,
    Witness,
    Supervisor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Camera,
    Sensor,
    ManualReport,
    System,
    AiDetection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Area {
    Classroom,
    Playground,
    Cafeteria,
    Entrance,
    Hallway,
    Bathroom,
    Office,
    Outdoor,
    Other,
}

/// Escalation rule trigger condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationCondition {
    TimeBased,
    SeverityBased,
    NoResponse,
}

/// Role an escalation targets for re-notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRole {
    Teacher,
    Principal,
    Admin,
    EmergencyServices,
}

impl std::fmt::Display for TargetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TargetRole::Teacher => "teacher",
            TargetRole::Principal => "principal",
            TargetRole::Admin => "admin",
            TargetRole::EmergencyServices => "emergency_services",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub area: Area,
    pub classroom_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvolvedStudent {
    pub student_id: String,
    pub role: StudentRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvolvedStaff {
    pub staff_id: String,
    pub role: StaffRole,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvolvedPeople {
    #[serde(default)]
    pub students: Vec<InvolvedStudent>,
    #[serde(default)]
    pub staff: Vec<InvolvedStaff>,
}

/// Typed detection metadata. The original AI pipeline attached a free-form
/// blob here; the engine only accepts these known fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionMeta {
    pub model: String,
    pub version: Option<String>,
    pub processing_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSource {
    pub kind: SourceKind,
    pub camera_id: Option<String>,
    pub reporter_id: Option<String>,
    /// Detection confidence, 0-100. Manual reports use 100.
    pub confidence: u8,
    pub detection: Option<DetectionMeta>,
}

/// One configured escalation rule on an alert. Fires at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    pub condition: EscalationCondition,
    /// Minutes before the rule becomes eligible. Required for
    /// `time_based` and `no_response`; ignored for `severity_based`.
    pub threshold_minutes: Option<i64>,
    pub target_role: TargetRole,
    #[serde(default)]
    pub triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationState {
    pub rules: Vec<EscalationRule>,
    /// 1-5, monotonically non-decreasing.
    pub current_level: u8,
}

impl Default for EscalationState {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            current_level: 1,
        }
    }
}

/// Append-only status history entry on an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertStatusChange {
    pub status: AlertStatus,
    pub timestamp: DateTime<Utc>,
    pub actor: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    pub action: String,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub outcome: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub summary: String,
    pub actions_taken: Vec<String>,
    pub outcome: ResolutionOutcome,
    pub resolved_by: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMeta {
    #[serde(default)]
    pub automated: bool,
    #[serde(default)]
    pub false_positive: bool,
    /// Soft-delete flag. Records are archived, never removed.
    #[serde(default)]
    pub archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub archived_by: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A recorded safety event requiring human response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub category: AlertCategory,
    pub title: String,
    pub description: String,
    pub location: Option<Location>,
    pub source: AlertSource,
    pub involved: InvolvedPeople,
    pub status: AlertStatus,
    pub status_history: Vec<AlertStatusChange>,
    pub actions: Vec<ActionEntry>,
    pub resolution: Option<Resolution>,
    pub escalation: EscalationState,
    /// Queue priority 1-10, derived at creation from severity and type.
    /// Distinct from the 0-100 urgency display score.
    pub priority: u8,
    pub system: SystemMeta,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRecord {
    /// Minutes elapsed since creation.
    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_minutes()
    }

    /// Minutes from creation to acknowledgment, if acknowledged.
    pub fn response_time_minutes(&self) -> Option<i64> {
        self.acknowledged_at
            .map(|at| (at - self.created_at).num_minutes())
    }

    /// Minutes from creation to resolution, if resolved.
    pub fn resolution_time_minutes(&self) -> Option<i64> {
        self.resolved_at
            .map(|at| (at - self.created_at).num_minutes())
    }
}

/// Input for creating an alert, supplied by the detection/report intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub alert_type: AlertType,
    pub severity: Severity,
    #[serde(default = "default_category")]
    pub category: AlertCategory,
    pub title: String,
    pub description: String,
    pub location: Option<Location>,
    pub source: AlertSource,
    #[serde(default)]
    pub involved: InvolvedPeople,
    #[serde(default)]
    pub escalation_rules: Vec<EscalationRule>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_category() -> AlertCategory {
    AlertCategory::Manual
}

// ---- Notification types ----

/// Delivery channel kind.
///
/// # Examples
///
/// ```
/// use nestmon_common::types::ChannelType;
///
/// let ch: ChannelType = "phone_call".parse().unwrap();
/// assert_eq!(ch, ChannelType::PhoneCall);
/// assert_eq!(ch.to_string(), "phone_call");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    InApp,
    Email,
    Sms,
    Push,
    PhoneCall,
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelType::InApp => "in_app",
            ChannelType::Email => "email",
            ChannelType::Sms => "sms",
            ChannelType::Push => "push",
            ChannelType::PhoneCall => "phone_call",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_app" => Ok(ChannelType::InApp),
            "email" => Ok(ChannelType::Email),
            "sms" => Ok(ChannelType::Sms),
            "push" => Ok(ChannelType::Push),
            "phone_call" => Ok(ChannelType::PhoneCall),
            _ => Err(format!("unknown channel type: {s}")),
        }
    }
}

/// Notification record lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Delivered,
    Failed,
    Cancelled,
    Expired,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationStatus::Draft => "draft",
            NotificationStatus::Scheduled => "scheduled",
            NotificationStatus::Sending => "sending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Cancelled => "cancelled",
            NotificationStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// Per-channel delivery state within one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Alert,
    Reminder,
    Announcement,
    Emergency,
    System,
    Health,
    Pickup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    Urgent,
    Important,
    Informational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    System,
    Admin,
    Teacher,
    Principal,
    Staff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    pub user_id: String,
    pub role: SenderRole,
}

/// Per-recipient delivery tracking. The boolean flags are the source of
/// truth for the analytics counters; each flips false→true at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientEntry {
    pub user_id: String,
    #[serde(default)]
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub responded: bool,
    #[serde(default)]
    pub failed: bool,
    pub error: Option<String>,
}

impl RecipientEntry {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            sent: false,
            sent_at: None,
            delivered: false,
            delivered_at: None,
            read: false,
            read_at: None,
            acknowledged: false,
            acknowledged_at: None,
            responded: false,
            failed: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recipients {
    pub direct: Vec<RecipientEntry>,
    #[serde(default)]
    pub broadcast: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryMethod {
    pub channel: ChannelType,
    pub enabled: bool,
    /// 1 is attempted first.
    pub priority_rank: u8,
    pub status: MethodStatus,
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl DeliveryMethod {
    pub fn new(channel: ChannelType, priority_rank: u8) -> Self {
        Self {
            channel,
            enabled: true,
            priority_rank,
            status: MethodStatus::Pending,
            attempts: 0,
            last_attempt: None,
            error_message: None,
        }
    }
}

/// Secondary channel attempted only after every primary channel fails
/// within the delay window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fallback {
    pub channel: ChannelType,
    pub delay_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub methods: Vec<DeliveryMethod>,
    pub fallback: Option<Fallback>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationStatusChange {
    pub status: NotificationStatus,
    pub timestamp: DateTime<Utc>,
    pub actor: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBlock {
    pub current: NotificationStatus,
    pub history: Vec<NotificationStatusChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEntry {
    pub user_id: String,
    pub response: String,
    pub responded_at: DateTime<Utc>,
}

/// Rollup counters derived from the per-recipient flags. The counters are
/// monotone increments; only the two rates are recomputed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analytics {
    pub sent: u32,
    pub delivered: u32,
    pub read: u32,
    pub acknowledged: u32,
    pub responded: u32,
    pub failed: u32,
    /// read / delivered × 100, 0 when nothing delivered.
    pub open_rate: u32,
    /// responded / delivered × 100, 0 when nothing delivered.
    pub response_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expiration {
    pub expires_at: DateTime<Utc>,
    pub retain_days: u32,
}

/// A tracked multi-channel communication, usually raised from an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub notification_id: String,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub category: NotificationCategory,
    pub sender: Sender,
    pub recipients: Recipients,
    pub delivery: Delivery,
    pub status: StatusBlock,
    pub responses: Vec<ResponseEntry>,
    pub analytics: Analytics,
    pub related_alert: Option<String>,
    /// Earliest send time for a scheduled notification. `None` for
    /// immediate dispatch.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub expiration: Expiration,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn recipient(&self, user_id: &str) -> Option<&RecipientEntry> {
        self.recipients.direct.iter().find(|r| r.user_id == user_id)
    }

    pub fn recipient_mut(&mut self, user_id: &str) -> Option<&mut RecipientEntry> {
        self.recipients
            .direct
            .iter_mut()
            .find(|r| r.user_id == user_id)
    }

    pub fn method_mut(&mut self, channel: ChannelType) -> Option<&mut DeliveryMethod> {
        self.delivery
            .methods
            .iter_mut()
            .find(|m| m.channel == channel)
    }

    /// Appends the outgoing status to the history and switches to `new`.
    /// History is never rewritten.
    pub fn set_status(
        &mut self,
        new: NotificationStatus,
        reason: Option<String>,
        actor: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status.history.push(NotificationStatusChange {
            status: self.status.current,
            timestamp: now,
            actor,
            reason,
        });
        self.status.current = new;
        self.updated_at = now;
    }

    /// Recomputes the two derived percentages from the counters.
    /// Everything else in [`Analytics`] only moves by increment.
    pub fn recompute_rates(&mut self) {
        let delivered = self.analytics.delivered;
        if delivered == 0 {
            self.analytics.open_rate = 0;
            self.analytics.response_rate = 0;
        } else {
            self.analytics.open_rate =
                (self.analytics.read as f64 / delivered as f64 * 100.0).round() as u32;
            self.analytics.response_rate =
                (self.analytics.responded as f64 / delivered as f64 * 100.0).round() as u32;
        }
    }
}

// ---- Dispatch request types ----

/// Recipient group descriptor, resolved to concrete user IDs by the
/// user/role directory collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "group_type")]
pub enum GroupDescriptor {
    AllUsers,
    AllParents,
    AllTeachers,
    AllStaff,
    Class { class_id: String },
    Role { role: TargetRole },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedChannel {
    pub channel: ChannelType,
    pub priority_rank: u8,
}

/// Input to the notification dispatcher: what to say, to whom, and over
/// which channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub category: NotificationCategory,
    pub sender: Sender,
    #[serde(default)]
    pub direct: Vec<String>,
    #[serde(default)]
    pub groups: Vec<GroupDescriptor>,
    pub channels: Vec<RequestedChannel>,
    pub fallback: Option<Fallback>,
    pub related_alert: Option<String>,
}
