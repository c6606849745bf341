use std::collections::HashMap;
use std::collections::hash_map::Entry;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    CommissionConfig, Dispute, DisputeResolution, DisputeStatus, Error, Escrow, EscrowStatus,
    EscrowSummary, LedgerStore, Payment, PaymentStatus, ProductCatalog, Wallet, Withdrawal,
    WithdrawalStatus,
};

/// In-memory ledger. Single-writer: every transition goes through `&mut self`,
/// which serializes transitions on the same record, and each commit method
/// validates all of its preconditions before touching any record so a failed
/// commit changes nothing.
#[derive(Default, Debug)]
pub struct InMemoryLedger {
    escrows: HashMap<String, Escrow>,
    escrow_refs: HashMap<String, String>, // reference -> escrow id
    payments: HashMap<String, Payment>,   // keyed by reference
    wallets: HashMap<String, Wallet>,
    withdrawals: HashMap<String, Withdrawal>,
    disputes: HashMap<String, Dispute>,
    commission: Option<CommissionConfig>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn wallet_entry(&mut self, user: &str) -> &mut Wallet {
        self.wallets.entry(user.to_string()).or_default()
    }

    /// Wallet balances and escrow totals, for the replay binary's summary.
    pub fn wallet_rows(&self) -> Vec<(String, Decimal, Decimal)> {
        let mut rows: Vec<_> = self
            .wallets
            .iter()
            .map(|(user, w)| (user.clone(), w.available, w.reserved))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

impl LedgerStore for InMemoryLedger {
    fn insert_payment(&mut self, payment: Payment) -> Result<(), Error> {
        match self.payments.entry(payment.reference.clone()) {
            Entry::Vacant(e) => {
                e.insert(payment);
                Ok(())
            }
            Entry::Occupied(_) => Err(Error::InvalidState(format!(
                "payment reference {} already exists",
                payment.reference
            ))),
        }
    }

    fn payment_by_reference(&self, reference: &str) -> Option<&Payment> {
        self.payments.get(reference)
    }

    fn escrow(&self, escrow_id: &str) -> Option<&Escrow> {
        self.escrows.get(escrow_id)
    }

    fn escrow_by_reference(&self, reference: &str) -> Option<&Escrow> {
        self.escrow_refs
            .get(reference)
            .and_then(|id| self.escrows.get(id))
    }

    fn escrows_by_seller(&self, seller: &str) -> Vec<&Escrow> {
        let mut rows: Vec<_> = self
            .escrows
            .values()
            .filter(|e| e.seller == seller)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    fn escrow_summary(&self) -> Vec<EscrowSummary> {
        let mut summary: Vec<EscrowSummary> = Vec::new();
        for escrow in self.escrows.values() {
            match summary.iter_mut().find(|s| s.status == escrow.status) {
                Some(row) => {
                    row.count += 1;
                    row.total_amount += escrow.amount;
                }
                None => summary.push(EscrowSummary {
                    status: escrow.status,
                    count: 1,
                    total_amount: escrow.amount,
                }),
            }
        }
        summary.sort_by_key(|s| s.status.to_string());
        summary
    }

    fn commit_funding(&mut self, escrow: Escrow) -> Result<(), Error> {
        if self.escrow_refs.contains_key(&escrow.reference) {
            return Err(Error::InvalidState(format!(
                "reference {} is already escrowed",
                escrow.reference
            )));
        }
        let payment = self
            .payments
            .get(&escrow.reference)
            .ok_or_else(|| Error::not_found("payment", &escrow.reference))?;
        if payment.status != PaymentStatus::Pending {
            return Err(Error::InvalidState(format!(
                "payment {} is {}, expected pending",
                escrow.reference, payment.status
            )));
        }

        // All checks passed; apply both record changes.
        if let Some(payment) = self.payments.get_mut(&escrow.reference) {
            payment.status = PaymentStatus::InEscrow;
        }
        self.escrow_refs
            .insert(escrow.reference.clone(), escrow.id.clone());
        self.escrows.insert(escrow.id.clone(), escrow);
        Ok(())
    }

    fn commit_release(
        &mut self,
        escrow_id: &str,
        commission: Decimal,
        payout: Decimal,
        released_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let escrow = self
            .escrows
            .get(escrow_id)
            .ok_or_else(|| Error::not_found("escrow", escrow_id))?;
        if escrow.status != EscrowStatus::InEscrow {
            return Err(Error::InvalidState(format!(
                "escrow {} is {}, expected in_escrow",
                escrow_id, escrow.status
            )));
        }
        if commission + payout != escrow.amount {
            return Err(Error::Validation(format!(
                "commission {} + payout {} does not equal escrow amount {}",
                commission, payout, escrow.amount
            )));
        }
        let seller = escrow.seller.clone();
        let reference = escrow.reference.clone();

        if let Some(escrow) = self.escrows.get_mut(escrow_id) {
            escrow.status = EscrowStatus::Released;
            escrow.commission = commission;
            escrow.payout_amount = payout;
            escrow.released_at = Some(released_at);
        }
        if let Some(payment) = self.payments.get_mut(&reference) {
            payment.status = PaymentStatus::Released;
        }
        self.wallet_entry(&seller).available += payout;
        Ok(())
    }

    fn commit_decline(
        &mut self,
        escrow_id: &str,
        resolution: Option<DisputeResolution>,
    ) -> Result<(), Error> {
        let escrow = self
            .escrows
            .get(escrow_id)
            .ok_or_else(|| Error::not_found("escrow", escrow_id))?;
        if escrow.status != EscrowStatus::InEscrow {
            return Err(Error::InvalidState(format!(
                "escrow {} is {}, expected in_escrow",
                escrow_id, escrow.status
            )));
        }
        if let Some(res) = &resolution {
            let dispute = self
                .disputes
                .get(&res.dispute_id)
                .ok_or_else(|| Error::not_found("dispute", &res.dispute_id))?;
            if dispute.status != DisputeStatus::Open {
                return Err(Error::InvalidState(format!(
                    "dispute {} is {}, expected open",
                    res.dispute_id, dispute.status
                )));
            }
        }
        let buyer = escrow.buyer.clone();
        let amount = escrow.amount;
        let reference = escrow.reference.clone();

        // Refund credits the full original amount; no commission is withheld.
        if let Some(escrow) = self.escrows.get_mut(escrow_id) {
            escrow.status = EscrowStatus::Declined;
        }
        if let Some(payment) = self.payments.get_mut(&reference) {
            payment.status = PaymentStatus::Refunded;
        }
        self.wallet_entry(&buyer).available += amount;
        if let Some(res) = resolution {
            if let Some(dispute) = self.disputes.get_mut(&res.dispute_id) {
                dispute.status = DisputeStatus::Refunded;
                dispute.resolution_note = res.note;
                dispute.resolved_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    fn insert_dispute(&mut self, dispute: Dispute) -> Result<(), Error> {
        match self.disputes.entry(dispute.id.clone()) {
            Entry::Vacant(e) => {
                e.insert(dispute);
                Ok(())
            }
            Entry::Occupied(_) => Err(Error::InvalidState(format!(
                "dispute {} already exists",
                dispute.id
            ))),
        }
    }

    fn dispute(&self, dispute_id: &str) -> Option<&Dispute> {
        self.disputes.get(dispute_id)
    }

    fn commit_dispute_rejected(
        &mut self,
        dispute_id: &str,
        note: Option<String>,
    ) -> Result<(), Error> {
        let dispute = self
            .disputes
            .get_mut(dispute_id)
            .ok_or_else(|| Error::not_found("dispute", dispute_id))?;
        if dispute.status != DisputeStatus::Open {
            return Err(Error::InvalidState(format!(
                "dispute {} is {}, expected open",
                dispute_id, dispute.status
            )));
        }
        dispute.status = DisputeStatus::Rejected;
        dispute.resolution_note = note;
        dispute.resolved_at = Some(Utc::now());
        Ok(())
    }

    fn wallet(&self, user: &str) -> Option<&Wallet> {
        self.wallets.get(user)
    }

    fn set_payee(&mut self, user: &str, payee_ref: String) {
        self.wallet_entry(user).payee_ref = Some(payee_ref);
    }

    fn withdrawal(&self, withdrawal_id: &str) -> Option<&Withdrawal> {
        self.withdrawals.get(withdrawal_id)
    }

    fn commit_withdrawal_request(&mut self, withdrawal: Withdrawal) -> Result<(), Error> {
        if self.withdrawals.contains_key(&withdrawal.id) {
            return Err(Error::InvalidState(format!(
                "withdrawal {} already exists",
                withdrawal.id
            )));
        }
        let available = self
            .wallets
            .get(&withdrawal.seller)
            .map(|w| w.available)
            .unwrap_or(Decimal::ZERO);
        if withdrawal.amount > available {
            return Err(Error::InsufficientBalance {
                requested: withdrawal.amount,
                available,
            });
        }
        let wallet = self.wallet_entry(&withdrawal.seller);
        wallet.available -= withdrawal.amount;
        wallet.reserved += withdrawal.amount;
        self.withdrawals.insert(withdrawal.id.clone(), withdrawal);
        Ok(())
    }

    fn mark_withdrawal_processing(
        &mut self,
        withdrawal_id: &str,
        transfer_ref: String,
    ) -> Result<(), Error> {
        let withdrawal = self
            .withdrawals
            .get_mut(withdrawal_id)
            .ok_or_else(|| Error::not_found("withdrawal", withdrawal_id))?;
        if withdrawal.status != WithdrawalStatus::Pending {
            return Err(Error::InvalidState(format!(
                "withdrawal {} is {}, expected pending",
                withdrawal_id, withdrawal.status
            )));
        }
        withdrawal.status = WithdrawalStatus::Processing;
        withdrawal.transfer_ref = Some(transfer_ref);
        Ok(())
    }

    fn commit_withdrawal_result(
        &mut self,
        withdrawal_id: &str,
        success: bool,
    ) -> Result<(), Error> {
        let withdrawal = self
            .withdrawals
            .get(withdrawal_id)
            .ok_or_else(|| Error::not_found("withdrawal", withdrawal_id))?;
        if withdrawal.status != WithdrawalStatus::Processing {
            return Err(Error::InvalidState(format!(
                "withdrawal {} is {}, expected processing",
                withdrawal_id, withdrawal.status
            )));
        }
        let seller = withdrawal.seller.clone();
        let amount = withdrawal.amount;
        let reserved = self
            .wallets
            .get(&seller)
            .map(|w| w.reserved)
            .unwrap_or(Decimal::ZERO);
        if reserved < amount {
            return Err(Error::InvalidState(format!(
                "reserved balance {} below withdrawal amount {}",
                reserved, amount
            )));
        }

        let wallet = self.wallet_entry(&seller);
        wallet.reserved -= amount;
        if !success {
            wallet.available += amount;
        }
        if let Some(withdrawal) = self.withdrawals.get_mut(withdrawal_id) {
            withdrawal.status = if success {
                WithdrawalStatus::Success
            } else {
                WithdrawalStatus::Failed
            };
        }
        Ok(())
    }

    fn commission(&self) -> Option<&CommissionConfig> {
        self.commission.as_ref()
    }

    fn set_commission(&mut self, config: CommissionConfig) {
        self.commission = Some(config);
    }
}

/// Fixed product -> category mapping; stands in for the external catalog.
#[derive(Default, Debug)]
pub struct StaticCatalog {
    categories: HashMap<String, String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, product: &str, category: &str) -> Self {
        self.categories
            .insert(product.to_string(), category.to_string());
        self
    }
}

impl ProductCatalog for StaticCatalog {
    fn category(&self, product: &str) -> Option<String> {
        self.categories.get(product).cloned()
    }
}
