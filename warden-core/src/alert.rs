//! Emergency alert prioritization and lifecycle.
//!
//! Priority is decided by keyword membership against four ordered tiers,
//! checked critical-first. Alert status advances monotonically:
//! `Pending → Sent | Failed → Acknowledged`, where acknowledgment is a
//! manual terminal transition recording the acting operator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, WardenError};
use crate::eval::normalize_compact;

/// Severity of an emergency alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Delivery state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Sent,
    Failed,
    Acknowledged,
}

const CRITICAL_TERMS: &[&str] = &[
    "쓰러졌",
    "의식이 없",
    "숨을 못",
    "숨이 안",
    "collapsed",
    "unconscious",
    "not breathing",
];

const HIGH_TERMS: &[&str] = &[
    "도와줘",
    "도와주세요",
    "살려줘",
    "살려주세요",
    "구해줘",
    "help",
    "rescue",
    "emergency",
];

const MEDIUM_TERMS: &[&str] = &["아파", "어지러", "가슴이 답답", "pain", "discomfort", "dizzy"];

/// Priority for a set of detected keywords: first matching tier wins,
/// checked in severity order.
pub fn priority_for<S: AsRef<str>>(keywords: &[S]) -> AlertPriority {
    let tiers = [
        (CRITICAL_TERMS, AlertPriority::Critical),
        (HIGH_TERMS, AlertPriority::High),
        (MEDIUM_TERMS, AlertPriority::Medium),
    ];
    for (terms, priority) in tiers {
        for keyword in keywords {
            let kw = normalize_compact(keyword.as_ref());
            if terms
                .iter()
                .any(|t| kw.contains(&normalize_compact(t)))
            {
                return priority;
            }
        }
    }
    AlertPriority::Low
}

/// One emergency notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: String,
    pub device_id: String,
    pub text: String,
    pub keywords: Vec<String>,
    pub priority: AlertPriority,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl AlertRecord {
    pub fn new(id: String, device_id: String, text: String, keywords: Vec<String>) -> Self {
        let priority = priority_for(&keywords);
        Self {
            id,
            device_id,
            text,
            keywords,
            priority,
            status: AlertStatus::Pending,
            created_at: Utc::now(),
            acknowledged_by: None,
            acknowledged_at: None,
        }
    }

    /// Advance the status, enforcing monotonicity.
    pub fn transition(&mut self, to: AlertStatus) -> Result<()> {
        use AlertStatus::*;
        let allowed = matches!(
            (self.status, to),
            (Pending, Sent) | (Pending, Failed) | (Sent, Acknowledged) | (Failed, Acknowledged)
        );
        if !allowed {
            return Err(WardenError::AlertTransition(format!(
                "{:?} to {:?}",
                self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }
}

/// In-memory registry of alerts raised this process lifetime. Durable
/// alert history belongs to the external storage layer.
#[derive(Default)]
pub struct AlertRegistry {
    alerts: Mutex<HashMap<String, AlertRecord>>,
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: AlertRecord) {
        self.alerts.lock().insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<AlertRecord> {
        self.alerts.lock().get(id).cloned()
    }

    /// Advance an alert's status.
    pub fn transition(&self, id: &str, to: AlertStatus) -> Result<()> {
        let mut alerts = self.alerts.lock();
        let record = alerts
            .get_mut(id)
            .ok_or_else(|| WardenError::AlertNotFound(id.to_string()))?;
        record.transition(to)
    }

    /// Manual operator acknowledgment — records the actor and timestamp.
    pub fn acknowledge(&self, id: &str, actor: &str) -> Result<AlertRecord> {
        let mut alerts = self.alerts.lock();
        let record = alerts
            .get_mut(id)
            .ok_or_else(|| WardenError::AlertNotFound(id.to_string()))?;
        record.transition(AlertStatus::Acknowledged)?;
        record.acknowledged_by = Some(actor.to_string());
        record.acknowledged_at = Some(Utc::now());
        info!(alert_id = %id, actor = %actor, "alert acknowledged");
        Ok(record.clone())
    }

    /// Snapshot of all alerts, newest first.
    pub fn snapshot(&self) -> Vec<AlertRecord> {
        let mut records: Vec<AlertRecord> = self.alerts.lock().values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}
