use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeStatus {
    Open,
    Refunded,
    Rejected,
}

impl core::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Refunded => "refunded",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A buyer-raised complaint against an escrow, resolved by arbitration.
#[derive(Debug, Clone)]
pub struct Dispute {
    pub id: String,
    pub escrow: String,
    pub raised_by: String,
    pub reason: String,
    pub evidence: Vec<String>,
    pub status: DisputeStatus,
    pub resolution_note: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Dispute {
    pub fn open(
        id: String,
        escrow: String,
        raised_by: String,
        reason: String,
        evidence: Vec<String>,
    ) -> Self {
        Self {
            id,
            escrow,
            raised_by,
            reason,
            evidence,
            status: DisputeStatus::Open,
            resolution_note: None,
            resolved_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Resolution action requested by the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeAction {
    Refund,
    Reject,
}
