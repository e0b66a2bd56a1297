//! Common types for wasend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for work items
pub type ItemId = Uuid;

/// Recipient of an outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Display name
    pub name: String,

    /// Phone number, in any human format
    pub phone: String,

    /// Email address, if known
    #[serde(default)]
    pub email: Option<String>,

    /// Free-form attributes usable as `{{attributes.key}}` in templates
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Contact {
    /// Create a contact with a name and phone number
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            email: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Set the email address
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Add a template attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Phone number reduced to its digits
    pub fn normalized_phone(&self) -> String {
        self.phone.chars().filter(|c| c.is_ascii_digit()).collect()
    }

    /// First word of the name
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("")
    }

    /// Everything after the first word of the name
    pub fn last_name(&self) -> String {
        self.name
            .split_whitespace()
            .skip(1)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Dispatch priority, fixed at enqueue time
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Multiplier applied to the base send interval
    pub fn interval_factor(&self) -> f64 {
        match self {
            Priority::High => 0.5,
            Priority::Normal => 1.0,
            Priority::Low => 1.5,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            _ => Err(crate::Error::Validation(format!("Invalid priority: {}", s))),
        }
    }
}

/// Lifecycle status of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Sent,
    Delivered,
    Failed,
    Blocked,
}

impl ItemStatus {
    /// Whether the item reached the gateway successfully
    pub fn is_success(&self) -> bool {
        matches!(self, ItemStatus::Sent | ItemStatus::Delivered)
    }

    /// Whether a manual retry is allowed from this status
    pub fn is_retryable(&self) -> bool {
        matches!(self, ItemStatus::Failed | ItemStatus::Blocked)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::Processing => write!(f, "processing"),
            ItemStatus::Sent => write!(f, "sent"),
            ItemStatus::Delivered => write!(f, "delivered"),
            ItemStatus::Failed => write!(f, "failed"),
            ItemStatus::Blocked => write!(f, "blocked"),
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "processing" => Ok(ItemStatus::Processing),
            "sent" => Ok(ItemStatus::Sent),
            "delivered" => Ok(ItemStatus::Delivered),
            "failed" => Ok(ItemStatus::Failed),
            "blocked" => Ok(ItemStatus::Blocked),
            _ => Err(crate::Error::Validation(format!(
                "Invalid item status: {}",
                s
            ))),
        }
    }
}

/// One scheduled message send for one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    pub recipient: Contact,
    pub rendered_message: String,
    pub source_template: String,
    pub status: ItemStatus,
    pub attempts: u32,
    pub priority: Priority,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    /// Create a pending item
    pub fn new(
        recipient: Contact,
        rendered_message: String,
        source_template: String,
        priority: Priority,
        scheduled_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            recipient,
            rendered_message,
            source_template,
            status: ItemStatus::Pending,
            attempts: 0,
            priority,
            scheduled_at,
            sent_at: None,
            delivered_at: None,
            last_error: None,
            created_at,
        }
    }

    /// Whether the dispatch loop may pick this item
    pub fn is_eligible(&self, max_attempts: u32) -> bool {
        match self.status {
            ItemStatus::Pending => true,
            ItemStatus::Failed => self.attempts < max_attempts,
            _ => false,
        }
    }
}

/// Run state of the dispatch pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Paused,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Paused => write!(f, "paused"),
        }
    }
}

/// Aggregate pipeline statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub sent: usize,
    pub delivered: usize,
    pub failed: usize,
    pub blocked: usize,
    /// Successful sends for the current calendar day
    pub daily_count: u32,
    pub daily_limit: u32,
    /// Items dispatched since the last batch pause
    pub batch_processed: u32,
    pub run_state: RunState,
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl PipelineStats {
    /// Remaining sends allowed today
    pub fn daily_remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.daily_count)
    }

    /// Share of items that reached a final state, in percent
    pub fn progress_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let done = self.sent + self.delivered + self.failed + self.blocked;
        done as f64 * 100.0 / self.total as f64
    }
}
