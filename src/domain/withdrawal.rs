use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl core::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One seller cash-out request. Its `amount` is reserved from the wallet the
/// instant it is created and leaves the reserve exactly once, on the terminal
/// transition.
#[derive(Debug, Clone)]
pub struct Withdrawal {
    pub id: String,
    pub seller: String,
    pub amount: Decimal,
    pub status: WithdrawalStatus,
    pub payee_ref: String,
    /// Gateway payout id, set when processing starts.
    pub transfer_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Withdrawal {
    pub fn pending(id: String, seller: String, amount: Decimal, payee_ref: String) -> Self {
        Self {
            id,
            seller,
            amount,
            status: WithdrawalStatus::Pending,
            payee_ref,
            transfer_ref: None,
            created_at: Utc::now(),
        }
    }
}
