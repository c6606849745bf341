use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowStatus {
    /// Transient: payment initiated but not yet verified with the gateway.
    Pending,
    InEscrow,
    Released,
    Declined,
}

impl core::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InEscrow => "in_escrow",
            Self::Released => "released",
            Self::Declined => "declined",
        };
        f.write_str(s)
    }
}

/// One funded transaction held by the platform until release or refund.
///
/// Append-only financial record: an escrow leaves `InEscrow` at most once and
/// is never deleted. `commission` and `payout_amount` are zero until release;
/// at `Released` they always sum back to `amount`.
#[derive(Debug, Clone)]
pub struct Escrow {
    pub id: String,
    pub buyer: String,
    pub seller: String,
    pub product: String,
    pub amount: Decimal,
    pub commission: Decimal,
    pub payout_amount: Decimal,
    pub status: EscrowStatus,
    /// Gateway charge reference; globally unique, the idempotency key.
    pub reference: String,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Escrow {
    pub fn new(
        id: String,
        buyer: String,
        seller: String,
        product: String,
        amount: Decimal,
        reference: String,
    ) -> Self {
        Self {
            id,
            buyer,
            seller,
            product,
            amount,
            commission: Decimal::ZERO,
            payout_amount: Decimal::ZERO,
            status: EscrowStatus::InEscrow,
            reference,
            created_at: Utc::now(),
            released_at: None,
        }
    }
}
