use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    InEscrow,
    Released,
    Refunded,
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InEscrow => "in_escrow",
            Self::Released => "released",
            Self::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

/// One gateway charge attempt. The `reference` is globally unique and is what
/// webhook and verification processing deduplicate on.
#[derive(Debug, Clone)]
pub struct Payment {
    pub buyer: String,
    pub seller: String,
    pub product: String,
    pub amount: Decimal,
    pub reference: String,
    pub status: PaymentStatus,
}

impl Payment {
    pub fn pending(
        buyer: String,
        seller: String,
        product: String,
        amount: Decimal,
        reference: String,
    ) -> Self {
        Self {
            buyer,
            seller,
            product,
            amount,
            reference,
            status: PaymentStatus::Pending,
        }
    }
}
