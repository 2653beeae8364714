//! Job payload contracts and the queue/priority registry.
//!
//! One payload shape per job kind. The queue core never looks inside
//! these; processors deserialize them back out of `serde_json::Value`.

use serde::{Deserialize, Serialize};

/// The fixed set of queues this backend runs.
pub mod queues {
    pub const SYNC_TRANSACTIONS: &str = "sync-transactions";
    pub const CATEGORIZE_TRANSACTIONS: &str = "categorize-transactions";
    pub const ESG_UPDATE: &str = "esg-update";
    pub const VALUATION_SNAPSHOT: &str = "valuation-snapshot";
    pub const SEND_EMAIL: &str = "send-email";

    pub const ALL: [&str; 5] = [
        SYNC_TRANSACTIONS,
        CATEGORIZE_TRANSACTIONS,
        ESG_UPDATE,
        VALUATION_SNAPSHOT,
        SEND_EMAIL,
    ];
}

/// Shared integer priority scale. Higher is served first.
pub mod priority {
    /// Forced/urgent refresh requested by an operator or user.
    pub const FORCED_REFRESH: i32 = 90;
    /// User-triggered provider sync.
    pub const USER_SYNC: i32 = 80;
    /// Transaction categorization.
    pub const CATEGORIZATION: i32 = 70;
    /// Valuation snapshots.
    pub const VALUATION_SNAPSHOT: i32 = 60;
    /// Routine ESG data refresh.
    pub const ESG_REFRESH: i32 = 30;
    /// Background catch-all work.
    pub const BACKGROUND: i32 = 25;
    /// Low-priority notifications.
    pub const NOTIFICATION: i32 = 10;
}

/// Banking/exchange data providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Belvo,
    Plaid,
    Exchange,
}

/// Delivery priority requested for an outgoing email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailPriority {
    High,
    Normal,
    Low,
}

impl EmailPriority {
    /// Position on the shared job priority scale.
    pub fn job_priority(self) -> i32 {
        match self {
            Self::High => priority::VALUATION_SNAPSHOT,
            Self::Normal => priority::BACKGROUND,
            Self::Low => priority::NOTIFICATION,
        }
    }
}

/// Typed union of job payloads, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobPayload {
    SyncTransactions {
        provider: Provider,
        user_id: String,
        connection_id: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        full_sync: bool,
    },
    CategorizeTransactions {
        space_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transaction_ids: Option<Vec<String>>,
    },
    EsgUpdate {
        symbols: Vec<String>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        force_refresh: bool,
    },
    ValuationSnapshot {
        space_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date: Option<chrono::NaiveDate>,
    },
    SendEmail {
        to: String,
        template: String,
        data: serde_json::Value,
        priority: EmailPriority,
    },
}

impl JobPayload {
    /// The queue this payload belongs on.
    pub fn queue(&self) -> &'static str {
        match self {
            Self::SyncTransactions { .. } => queues::SYNC_TRANSACTIONS,
            Self::CategorizeTransactions { .. } => queues::CATEGORIZE_TRANSACTIONS,
            Self::EsgUpdate { .. } => queues::ESG_UPDATE,
            Self::ValuationSnapshot { .. } => queues::VALUATION_SNAPSHOT,
            Self::SendEmail { .. } => queues::SEND_EMAIL,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
