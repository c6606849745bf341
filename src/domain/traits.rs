use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    CommissionConfig, Dispute, Error, Escrow, EscrowStatus, Payment, Wallet, Withdrawal,
};

/// Outcome of a gateway status check for a charge or payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failed,
    Pending,
}

/// External payment-gateway capability, addressed by opaque string references.
///
/// The engine issues these calls before any ledger commit; a failure or
/// timeout must leave local state untouched, so implementations should treat
/// the passed references as idempotency keys on their side.
pub trait PaymentGateway {
    fn init_charge(
        &self,
        payer: &str,
        amount: Decimal,
        reference: &str,
        metadata: &str,
    ) -> impl Future<Output = Result<String, Error>> + Send;

    fn verify_charge(
        &self,
        reference: &str,
    ) -> impl Future<Output = Result<GatewayStatus, Error>> + Send;

    fn create_payee(
        &self,
        name: &str,
        account_number: &str,
        bank_code: &str,
    ) -> impl Future<Output = Result<String, Error>> + Send;

    fn initiate_payout(
        &self,
        amount: Decimal,
        payee_ref: &str,
        reason: &str,
    ) -> impl Future<Output = Result<String, Error>> + Send;

    fn verify_payout(
        &self,
        transfer_ref: &str,
    ) -> impl Future<Output = Result<GatewayStatus, Error>> + Send;

    fn refund(&self, reference: &str) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Category lookup for commission resolution. Product data itself is owned
/// elsewhere; the engine only ever asks for the category.
pub trait ProductCatalog {
    fn category(&self, product: &str) -> Option<String>;
}

/// Events pushed to users after a transition commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    EscrowFunded { escrow_id: String, product: String },
    EscrowReleased { escrow_id: String, payout: String },
    EscrowDeclined { escrow_id: String },
    RefundIssued { escrow_id: String, amount: String },
    DisputeOpened { dispute_id: String },
    DisputeRejected { dispute_id: String },
    WithdrawalUpdate { withdrawal_id: String, status: String },
}

/// Fire-and-forget side channel (email, realtime push). Invoked only after a
/// transition commits; never allowed to fail the transition.
pub trait NotificationSink {
    fn notify(&self, user: &str, event: &NotifyEvent);
}

/// Dispute resolution folded into an escrow decline commit.
#[derive(Debug, Clone)]
pub struct DisputeResolution {
    pub dispute_id: String,
    pub note: Option<String>,
}

/// One row of the per-status escrow aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowSummary {
    pub status: EscrowStatus,
    pub count: usize,
    pub total_amount: Decimal,
}

/// Durable ledger behind the state machines.
///
/// Reads are plain lookups. Every mutation is a composite commit that applies
/// all of its record changes or none, re-checking status preconditions inside
/// so a stale caller can never double-apply a transition. This is the only
/// place wallet balances change.
pub trait LedgerStore {
    // payments
    fn insert_payment(&mut self, payment: Payment) -> Result<(), Error>;
    fn payment_by_reference(&self, reference: &str) -> Option<&Payment>;

    // escrows
    fn escrow(&self, escrow_id: &str) -> Option<&Escrow>;
    fn escrow_by_reference(&self, reference: &str) -> Option<&Escrow>;
    fn escrows_by_seller(&self, seller: &str) -> Vec<&Escrow>;
    fn escrow_summary(&self) -> Vec<EscrowSummary>;

    /// Flip the payment at `reference` to in-escrow and insert the new escrow,
    /// as one unit. Fails if the reference is already escrowed.
    fn commit_funding(&mut self, escrow: Escrow) -> Result<(), Error>;

    /// Mark the escrow released with its commission split and credit the
    /// seller's available balance, as one unit.
    fn commit_release(
        &mut self,
        escrow_id: &str,
        commission: Decimal,
        payout: Decimal,
        released_at: DateTime<Utc>,
    ) -> Result<(), Error>;

    /// Mark the escrow declined, flip its payment to refunded, credit the
    /// buyer's available balance with the full amount, and (when resolving a
    /// dispute) mark the dispute refunded, as one unit.
    fn commit_decline(
        &mut self,
        escrow_id: &str,
        resolution: Option<DisputeResolution>,
    ) -> Result<(), Error>;

    // disputes
    fn insert_dispute(&mut self, dispute: Dispute) -> Result<(), Error>;
    fn dispute(&self, dispute_id: &str) -> Option<&Dispute>;
    fn commit_dispute_rejected(&mut self, dispute_id: &str, note: Option<String>)
    -> Result<(), Error>;

    // wallets
    fn wallet(&self, user: &str) -> Option<&Wallet>;
    fn set_payee(&mut self, user: &str, payee_ref: String);

    // withdrawals
    fn withdrawal(&self, withdrawal_id: &str) -> Option<&Withdrawal>;

    /// Insert the pending withdrawal and move its amount from available to
    /// reserved, as one unit. The balance guard lives here so the check and
    /// the move cannot be split.
    fn commit_withdrawal_request(&mut self, withdrawal: Withdrawal) -> Result<(), Error>;

    fn mark_withdrawal_processing(
        &mut self,
        withdrawal_id: &str,
        transfer_ref: String,
    ) -> Result<(), Error>;

    /// Apply the terminal payout outcome: success burns the reservation,
    /// failure returns it to the available balance, as one unit.
    fn commit_withdrawal_result(&mut self, withdrawal_id: &str, success: bool)
    -> Result<(), Error>;

    // commission configuration
    fn commission(&self) -> Option<&CommissionConfig>;
    fn set_commission(&mut self, config: CommissionConfig);
}
