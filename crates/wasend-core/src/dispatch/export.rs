//! Dispatch log export

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wasend_common::types::{ItemId, ItemStatus, Priority, WorkItem};

/// One exported work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: ItemId,
    pub name: String,
    pub phone: String,
    pub message: String,
    pub template: String,
    pub status: ItemStatus,
    pub priority: Priority,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl From<&WorkItem> for LogEntry {
    fn from(item: &WorkItem) -> Self {
        Self {
            id: item.id,
            name: item.recipient.name.clone(),
            phone: item.recipient.phone.clone(),
            message: item.rendered_message.clone(),
            template: item.source_template.clone(),
            status: item.status,
            priority: item.priority,
            attempts: item.attempts,
            last_error: item.last_error.clone(),
            created_at: item.created_at,
            scheduled_at: item.scheduled_at,
            sent_at: item.sent_at,
            delivered_at: item.delivered_at,
        }
    }
}

/// Read-only snapshot of the whole queue for download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchLog {
    pub exported_at: DateTime<Utc>,
    pub total: usize,
    pub items: Vec<LogEntry>,
}

impl DispatchLog {
    pub fn new(queue: &[WorkItem], exported_at: DateTime<Utc>) -> Self {
        Self {
            exported_at,
            total: queue.len(),
            items: queue.iter().map(LogEntry::from).collect(),
        }
    }

    /// Pretty-printed JSON document
    pub fn to_json(&self) -> wasend_common::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasend_common::types::Contact;

    #[test]
    fn test_export_contains_every_field() {
        let now = Utc::now();
        let mut item = WorkItem::new(
            Contact::new("Carla Dias", "+55 31 97777-6666"),
            "Oi Carla".into(),
            "Oi {{first_name}}".into(),
            Priority::High,
            now,
            now,
        );
        item.status = ItemStatus::Delivered;
        item.attempts = 2;
        item.sent_at = Some(now);
        item.delivered_at = Some(now);

        let log = DispatchLog::new(std::slice::from_ref(&item), now);
        let json = log.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let entry = &value["items"][0];
        assert_eq!(value["total"], 1);
        assert_eq!(entry["id"], item.id.to_string());
        assert_eq!(entry["name"], "Carla Dias");
        assert_eq!(entry["phone"], "+55 31 97777-6666");
        assert_eq!(entry["message"], "Oi Carla");
        assert_eq!(entry["status"], "delivered");
        assert_eq!(entry["priority"], "high");
        assert_eq!(entry["attempts"], 2);
        assert!(entry["sent_at"].is_string());
        assert!(entry["delivered_at"].is_string());
        assert!(entry["last_error"].is_null());
    }
}
