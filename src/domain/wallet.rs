use rust_decimal::Decimal;

/// Per-user balance fields.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub available: Decimal, // funds available for withdrawal
    pub reserved: Decimal,  // funds earmarked for in-flight withdrawals
    /// Gateway transfer-recipient handle, set once the payee is registered.
    pub payee_ref: Option<String>,
}

impl Wallet {
    pub fn new() -> Self {
        Self {
            available: Decimal::ZERO,
            reserved: Decimal::ZERO,
            payee_ref: None,
        }
    }

    pub fn total(&self) -> Decimal {
        self.available + self.reserved
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}
