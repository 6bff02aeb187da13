//! Domain rows shared between the hub and the repository layer.
//!
//! All monetary values are integer cents; the fee split must stay exact
//! (`platform_fee_cents + counselor_fee_cents == total_amount_cents`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session lifecycle state as stored in `chat_sessions.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Ended,
}

impl SessionStatus {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Pending),
            1 => Some(Self::Active),
            2 => Some(Self::Ended),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Active => 1,
            Self::Ended => 2,
        }
    }
}

/// Which side of a session a participant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    User,
    Counselor,
}

impl ParticipantRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Counselor => "counselor",
        }
    }
}

/// One billed consultation instance between a user and a counselor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub counselor_id: i64,
    pub status: SessionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: i64,
    /// Copied from the counselor's rate when the session goes Active;
    /// immutable for the session's lifetime.
    pub price_cents_per_minute: i64,
    pub total_amount_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    /// True if `participant_id` is one of the two designated parties.
    pub fn is_party(&self, participant_id: i64) -> bool {
        self.user_id == participant_id || self.counselor_id == participant_id
    }

    pub fn role_of(&self, participant_id: i64) -> Option<ParticipantRole> {
        if participant_id == self.counselor_id {
            Some(ParticipantRole::Counselor)
        } else if participant_id == self.user_id {
            Some(ParticipantRole::User)
        } else {
            None
        }
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    pub sender_id: i64,
    pub sender_type: ParticipantRole,
    pub content_type: String,
    pub content: String,
    pub file_url: Option<String>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Settlement state of a billing record. The transition to `Settled` is
/// performed by a downstream payout flow, not by this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Settled,
}

impl SettlementStatus {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Pending),
            1 => Some(Self::Settled),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Settled => 1,
        }
    }
}

/// Created exactly once per session, at session end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingRecord {
    pub id: i64,
    pub session_id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub counselor_id: i64,
    pub duration_secs: i64,
    pub billed_minutes: i64,
    pub price_cents_per_minute: i64,
    pub total_amount_cents: i64,
    pub platform_fee_cents: i64,
    pub counselor_fee_cents: i64,
    pub status: SettlementStatus,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Running totals per counselor. Invariant:
/// `balance + frozen + withdrawn == total_income`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounselorAccount {
    pub counselor_id: i64,
    pub total_income_cents: i64,
    pub withdrawn_cents: i64,
    pub balance_cents: i64,
    pub frozen_cents: i64,
    pub updated_at: DateTime<Utc>,
}

/// Counselor profile (the slice of it this service needs: the rate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counselor {
    pub id: i64,
    pub display_name: String,
    pub price_cents_per_minute: i64,
    /// 1 = accepting sessions, 0 = disabled.
    pub status: i64,
}
