use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    Breakdown, CommissionConfig, Dispute, DisputeAction, DisputeResolution, DisputeStatus, Error,
    Escrow, EscrowStatus, EscrowSummary, GatewayStatus, LedgerStore, NotificationSink, NotifyEvent,
    Payment, PaymentGateway, ProductCatalog, Wallet, Withdrawal, WithdrawalStatus,
    commission,
};

/// Channel for operator-facing notifications.
const ADMIN_CHANNEL: &str = "admin";

/// Result of pushing a verified charge into the ledger.
#[derive(Debug, Clone)]
pub enum FundingOutcome {
    Created(Escrow),
    /// The reference was already escrowed by an earlier webhook delivery or
    /// synchronous verification; nothing changed.
    AlreadyProcessed(Escrow),
}

impl FundingOutcome {
    pub fn escrow(&self) -> &Escrow {
        match self {
            Self::Created(e) | Self::AlreadyProcessed(e) => e,
        }
    }
}

/// The escrow settlement core: escrow, withdrawal, and dispute state machines
/// over a ledger store, with the payment gateway, product catalog, and
/// notification transport injected at the seams.
///
/// All transitions go through `&mut self`, so transitions on the same record
/// are serialized. Gateway calls are awaited before any ledger commit; the
/// store's composite commit methods are the atomicity boundary.
#[derive(Debug)]
pub struct Engine<S, G, C, N>
where
    S: LedgerStore,
    G: PaymentGateway,
    C: ProductCatalog,
    N: NotificationSink,
{
    store: S,
    gateway: G,
    catalog: C,
    sink: N,
}

impl<S, G, C, N> Engine<S, G, C, N>
where
    S: LedgerStore,
    G: PaymentGateway,
    C: ProductCatalog,
    N: NotificationSink,
{
    pub fn new(store: S, gateway: G, catalog: C, sink: N) -> Self {
        Self {
            store,
            gateway,
            catalog,
            sink,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ---- escrow lifecycle ------------------------------------------------

    /// Start a charge with the gateway and record the pending payment.
    /// Returns the payment reference and the gateway's charge handle.
    pub async fn initiate_payment(
        &mut self,
        buyer: &str,
        seller: &str,
        product: &str,
        amount: Decimal,
    ) -> Result<(String, String), Error> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "payment amount must be positive, got {amount}"
            )));
        }
        let reference = Uuid::new_v4().to_string();
        let handle = self
            .gateway
            .init_charge(buyer, amount, &reference, product)
            .await?;
        self.store.insert_payment(Payment::pending(
            buyer.to_string(),
            seller.to_string(),
            product.to_string(),
            amount,
            reference.clone(),
        ))?;
        info!(%reference, buyer, %amount, "payment initiated");
        Ok((reference, handle))
    }

    /// Synchronous charge verification: asks the gateway, and on success
    /// moves the payment into escrow. Safe to call after the webhook has
    /// already processed the same reference.
    pub async fn verify_payment(&mut self, reference: &str) -> Result<FundingOutcome, Error> {
        if let Some(existing) = self.store.escrow_by_reference(reference) {
            return Ok(FundingOutcome::AlreadyProcessed(existing.clone()));
        }
        let payment = self
            .store
            .payment_by_reference(reference)
            .ok_or_else(|| Error::not_found("payment", reference))?
            .clone();
        match self.gateway.verify_charge(reference).await? {
            GatewayStatus::Success => Ok(FundingOutcome::Created(self.fund(payment)?)),
            GatewayStatus::Pending => Err(Error::gateway(
                format!("charge {reference} still pending"),
                true,
            )),
            GatewayStatus::Failed => Err(Error::gateway(
                format!("charge {reference} was declined"),
                false,
            )),
        }
    }

    /// Record a charge the gateway has already confirmed (webhook path).
    /// Idempotent on `reference`: duplicate deliveries change nothing.
    pub fn record_verified_payment(
        &mut self,
        reference: &str,
        buyer: &str,
        seller: &str,
        product: &str,
        amount: Decimal,
    ) -> Result<FundingOutcome, Error> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "payment amount must be positive, got {amount}"
            )));
        }
        if let Some(existing) = self.store.escrow_by_reference(reference) {
            return Ok(FundingOutcome::AlreadyProcessed(existing.clone()));
        }
        let payment = match self.store.payment_by_reference(reference) {
            Some(p) => p.clone(),
            None => {
                // Webhook arrived for a charge initiated elsewhere; shadow it.
                let p = Payment::pending(
                    buyer.to_string(),
                    seller.to_string(),
                    product.to_string(),
                    amount,
                    reference.to_string(),
                );
                self.store.insert_payment(p.clone())?;
                p
            }
        };
        Ok(FundingOutcome::Created(self.fund(payment)?))
    }

    fn fund(&mut self, payment: Payment) -> Result<Escrow, Error> {
        let escrow = Escrow::new(
            Uuid::new_v4().to_string(),
            payment.buyer,
            payment.seller,
            payment.product,
            payment.amount,
            payment.reference,
        );
        self.store.commit_funding(escrow.clone())?;
        info!(escrow_id = %escrow.id, reference = %escrow.reference, amount = %escrow.amount, "escrow funded");
        self.sink.notify(
            &escrow.seller,
            &NotifyEvent::EscrowFunded {
                escrow_id: escrow.id.clone(),
                product: escrow.product.clone(),
            },
        );
        Ok(escrow)
    }

    /// Buyer confirms delivery: resolve the commission and release the payout
    /// to the seller's wallet.
    pub fn release_by_buyer(&mut self, escrow_id: &str, caller: &str) -> Result<Breakdown, Error> {
        let escrow = self
            .store
            .escrow(escrow_id)
            .ok_or_else(|| Error::not_found("escrow", escrow_id))?;
        if escrow.buyer != caller {
            return Err(Error::Unauthorized {
                caller: caller.to_string(),
                role: "buyer",
            });
        }
        self.release(escrow_id)
    }

    /// Privileged override: force the escrow to `Released` or `Declined`
    /// without the buyer-identity guard. A forced decline follows the same
    /// refund rule as dispute resolution.
    pub async fn release_by_admin(
        &mut self,
        escrow_id: &str,
        target: EscrowStatus,
    ) -> Result<(), Error> {
        match target {
            EscrowStatus::Released => self.release(escrow_id).map(|_| ()),
            EscrowStatus::Declined => self.refund_escrow(escrow_id, None).await,
            other => Err(Error::InvalidState(format!(
                "admin override target must be released or declined, got {other}"
            ))),
        }
    }

    fn release(&mut self, escrow_id: &str) -> Result<Breakdown, Error> {
        let escrow = self
            .store
            .escrow(escrow_id)
            .ok_or_else(|| Error::not_found("escrow", escrow_id))?;
        if escrow.status != EscrowStatus::InEscrow {
            return Err(Error::InvalidState(format!(
                "escrow {} is {}, expected in_escrow",
                escrow_id, escrow.status
            )));
        }
        let seller = escrow.seller.clone();
        let amount = escrow.amount;
        let category = self.catalog.category(&escrow.product);
        let breakdown = commission::resolve(amount, category.as_deref(), self.store.commission());

        self.store.commit_release(
            escrow_id,
            breakdown.commission,
            breakdown.payout,
            Utc::now(),
        )?;
        info!(
            escrow_id,
            commission = %breakdown.commission,
            payout = %breakdown.payout,
            "escrow released"
        );
        self.sink.notify(
            &seller,
            &NotifyEvent::EscrowReleased {
                escrow_id: escrow_id.to_string(),
                payout: breakdown.payout.to_string(),
            },
        );
        Ok(breakdown)
    }

    /// Refund path shared by dispute resolution and admin decline: the
    /// gateway refund runs first, and only its success commits the decline.
    /// A gateway failure leaves the escrow (and any dispute) untouched.
    async fn refund_escrow(
        &mut self,
        escrow_id: &str,
        resolution: Option<DisputeResolution>,
    ) -> Result<(), Error> {
        let escrow = self
            .store
            .escrow(escrow_id)
            .ok_or_else(|| Error::not_found("escrow", escrow_id))?;
        if escrow.status != EscrowStatus::InEscrow {
            return Err(Error::InvalidState(format!(
                "escrow {} is {}, expected in_escrow",
                escrow_id, escrow.status
            )));
        }
        let buyer = escrow.buyer.clone();
        let seller = escrow.seller.clone();
        let amount = escrow.amount;
        let reference = escrow.reference.clone();

        if let Err(e) = self.gateway.refund(&reference).await {
            warn!(escrow_id, %reference, error = %e, "gateway refund failed, escrow unchanged");
            return Err(e);
        }
        self.store.commit_decline(escrow_id, resolution)?;
        info!(escrow_id, %amount, "escrow declined, buyer refunded");
        self.sink.notify(
            &buyer,
            &NotifyEvent::RefundIssued {
                escrow_id: escrow_id.to_string(),
                amount: amount.to_string(),
            },
        );
        self.sink.notify(
            &seller,
            &NotifyEvent::EscrowDeclined {
                escrow_id: escrow_id.to_string(),
            },
        );
        Ok(())
    }

    // ---- disputes --------------------------------------------------------

    /// File a dispute against an escrow. Any escrow status is accepted at
    /// filing time; only resolution to refund requires `in_escrow`.
    pub fn create_dispute(
        &mut self,
        escrow_id: &str,
        raised_by: &str,
        reason: &str,
        evidence: Vec<String>,
    ) -> Result<Dispute, Error> {
        if self.store.escrow(escrow_id).is_none() {
            return Err(Error::not_found("escrow", escrow_id));
        }
        let dispute = Dispute::open(
            Uuid::new_v4().to_string(),
            escrow_id.to_string(),
            raised_by.to_string(),
            reason.to_string(),
            evidence,
        );
        self.store.insert_dispute(dispute.clone())?;
        info!(dispute_id = %dispute.id, escrow_id, raised_by, "dispute opened");
        self.sink.notify(
            ADMIN_CHANNEL,
            &NotifyEvent::DisputeOpened {
                dispute_id: dispute.id.clone(),
            },
        );
        Ok(dispute)
    }

    /// Arbitrate a dispute. Refund succeeds only if the escrow refund path
    /// succeeds, and the dispute flips inside the same commit; reject never
    /// touches the escrow.
    pub async fn resolve_dispute(
        &mut self,
        dispute_id: &str,
        action: DisputeAction,
        note: Option<String>,
    ) -> Result<(), Error> {
        let dispute = self
            .store
            .dispute(dispute_id)
            .ok_or_else(|| Error::not_found("dispute", dispute_id))?;
        if dispute.status != DisputeStatus::Open {
            return Err(Error::InvalidState(format!(
                "dispute {} is {}, expected open",
                dispute_id, dispute.status
            )));
        }
        let escrow_id = dispute.escrow.clone();
        let raised_by = dispute.raised_by.clone();

        match action {
            DisputeAction::Refund => {
                self.refund_escrow(
                    &escrow_id,
                    Some(DisputeResolution {
                        dispute_id: dispute_id.to_string(),
                        note,
                    }),
                )
                .await
            }
            DisputeAction::Reject => {
                self.store.commit_dispute_rejected(dispute_id, note)?;
                info!(dispute_id, "dispute rejected");
                self.sink.notify(
                    &raised_by,
                    &NotifyEvent::DisputeRejected {
                        dispute_id: dispute_id.to_string(),
                    },
                );
                Ok(())
            }
        }
    }

    // ---- withdrawals -----------------------------------------------------

    /// Register the seller's bank account with the gateway and remember the
    /// recipient handle for later payouts.
    pub async fn register_payee(
        &mut self,
        seller: &str,
        name: &str,
        account_number: &str,
        bank_code: &str,
    ) -> Result<String, Error> {
        let payee_ref = self
            .gateway
            .create_payee(name, account_number, bank_code)
            .await?;
        self.store.set_payee(seller, payee_ref.clone());
        info!(seller, %payee_ref, "payee registered");
        Ok(payee_ref)
    }

    /// Reserve wallet funds for a cash-out.
    pub fn request_withdrawal(
        &mut self,
        seller: &str,
        amount: Decimal,
    ) -> Result<Withdrawal, Error> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "withdrawal amount must be positive, got {amount}"
            )));
        }
        let payee_ref = self
            .store
            .wallet(seller)
            .and_then(|w| w.payee_ref.clone())
            .ok_or_else(|| {
                Error::Validation(format!("no payout recipient registered for {seller}"))
            })?;
        let withdrawal = Withdrawal::pending(
            Uuid::new_v4().to_string(),
            seller.to_string(),
            amount,
            payee_ref,
        );
        self.store.commit_withdrawal_request(withdrawal.clone())?;
        info!(withdrawal_id = %withdrawal.id, seller, %amount, "withdrawal requested");
        self.sink.notify(
            ADMIN_CHANNEL,
            &NotifyEvent::WithdrawalUpdate {
                withdrawal_id: withdrawal.id.clone(),
                status: WithdrawalStatus::Pending.to_string(),
            },
        );
        Ok(withdrawal)
    }

    /// Start the gateway payout for a pending withdrawal. A gateway failure
    /// leaves it pending with the reservation intact, so the call can be
    /// retried.
    pub async fn process_withdrawal(&mut self, withdrawal_id: &str) -> Result<(), Error> {
        let withdrawal = self
            .store
            .withdrawal(withdrawal_id)
            .ok_or_else(|| Error::not_found("withdrawal", withdrawal_id))?;
        if withdrawal.status != WithdrawalStatus::Pending {
            return Err(Error::InvalidState(format!(
                "withdrawal {} is {}, expected pending",
                withdrawal_id, withdrawal.status
            )));
        }
        let seller = withdrawal.seller.clone();
        let amount = withdrawal.amount;
        let payee_ref = withdrawal.payee_ref.clone();

        let transfer_ref = self
            .gateway
            .initiate_payout(amount, &payee_ref, &format!("Seller payout {withdrawal_id}"))
            .await?;
        self.store
            .mark_withdrawal_processing(withdrawal_id, transfer_ref)?;
        info!(withdrawal_id, %seller, %amount, "withdrawal processing");
        self.sink.notify(
            &seller,
            &NotifyEvent::WithdrawalUpdate {
                withdrawal_id: withdrawal_id.to_string(),
                status: WithdrawalStatus::Processing.to_string(),
            },
        );
        Ok(())
    }

    /// Check the payout with the gateway and settle the reservation. A
    /// still-pending payout changes nothing; the caller polls again later.
    pub async fn verify_withdrawal(
        &mut self,
        withdrawal_id: &str,
    ) -> Result<WithdrawalStatus, Error> {
        let withdrawal = self
            .store
            .withdrawal(withdrawal_id)
            .ok_or_else(|| Error::not_found("withdrawal", withdrawal_id))?;
        if withdrawal.status != WithdrawalStatus::Processing {
            return Err(Error::InvalidState(format!(
                "withdrawal {} is {}, expected processing",
                withdrawal_id, withdrawal.status
            )));
        }
        let seller = withdrawal.seller.clone();
        let transfer_ref = withdrawal.transfer_ref.clone().ok_or_else(|| {
            Error::InvalidState(format!("withdrawal {withdrawal_id} has no transfer reference"))
        })?;

        let status = match self.gateway.verify_payout(&transfer_ref).await? {
            GatewayStatus::Success => {
                self.store.commit_withdrawal_result(withdrawal_id, true)?;
                WithdrawalStatus::Success
            }
            GatewayStatus::Failed => {
                self.store.commit_withdrawal_result(withdrawal_id, false)?;
                WithdrawalStatus::Failed
            }
            GatewayStatus::Pending => return Ok(WithdrawalStatus::Processing),
        };
        info!(withdrawal_id, %status, "withdrawal settled");
        self.sink.notify(
            &seller,
            &NotifyEvent::WithdrawalUpdate {
                withdrawal_id: withdrawal_id.to_string(),
                status: status.to_string(),
            },
        );
        Ok(status)
    }

    // ---- commission & reporting -----------------------------------------

    /// Current commission table, or the built-in default when none has been
    /// configured. Reads never create configuration.
    pub fn commission_config(&self) -> CommissionConfig {
        self.store
            .commission()
            .cloned()
            .unwrap_or_else(|| CommissionConfig::percentage(commission::DEFAULT_RATE))
    }

    pub fn update_commission_config(&mut self, config: CommissionConfig) -> Result<(), Error> {
        config.validate()?;
        self.store.set_commission(config);
        Ok(())
    }

    /// Count and total amount per escrow status, for reporting.
    pub fn escrow_summary(&self) -> Vec<EscrowSummary> {
        self.store.escrow_summary()
    }

    /// A seller's escrow history, newest first.
    pub fn seller_payouts(&self, seller: &str) -> Vec<Escrow> {
        self.store
            .escrows_by_seller(seller)
            .into_iter()
            .cloned()
            .collect()
    }

    // ---- lookups ---------------------------------------------------------

    pub fn escrow(&self, escrow_id: &str) -> Option<&Escrow> {
        self.store.escrow(escrow_id)
    }

    pub fn escrow_by_reference(&self, reference: &str) -> Option<&Escrow> {
        self.store.escrow_by_reference(reference)
    }

    pub fn wallet(&self, user: &str) -> Option<&Wallet> {
        self.store.wallet(user)
    }

    pub fn withdrawal(&self, withdrawal_id: &str) -> Option<&Withdrawal> {
        self.store.withdrawal(withdrawal_id)
    }

    pub fn dispute(&self, dispute_id: &str) -> Option<&Dispute> {
        self.store.dispute(dispute_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SimulatedGateway;
    use crate::notify::RecordingSink;
    use crate::store::{InMemoryLedger, StaticCatalog};
    use crate::domain::{CategoryRate, CommissionKind, PaymentStatus};

    type TestEngine = Engine<InMemoryLedger, SimulatedGateway, StaticCatalog, RecordingSink>;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn engine() -> (TestEngine, SimulatedGateway, RecordingSink) {
        let gateway = SimulatedGateway::new();
        let sink = RecordingSink::new();
        let catalog = StaticCatalog::new().with_category("laptop", "electronics");
        let engine = Engine::new(
            InMemoryLedger::new(),
            gateway.clone(),
            catalog,
            sink.clone(),
        );
        (engine, gateway, sink)
    }

    fn eight_percent_electronics() -> CommissionConfig {
        CommissionConfig {
            kind: CommissionKind::Percentage,
            global_rate: dec("5"),
            category_rates: vec![CategoryRate {
                category: "electronics".into(),
                rate: dec("8"),
            }],
        }
    }

    fn fund_escrow(engine: &mut TestEngine, reference: &str, amount: &str) -> Escrow {
        engine
            .record_verified_payment(reference, "buyer-1", "seller-1", "laptop", dec(amount))
            .unwrap()
            .escrow()
            .clone()
    }

    #[tokio::test]
    async fn buyer_release_computes_commission_and_credits_seller() {
        let (mut engine, _gw, _sink) = engine();
        engine
            .update_commission_config(eight_percent_electronics())
            .unwrap();
        let escrow = fund_escrow(&mut engine, "ref-1", "10000");

        let breakdown = engine.release_by_buyer(&escrow.id, "buyer-1").unwrap();
        assert_eq!(breakdown.commission, dec("800.00"));
        assert_eq!(breakdown.payout, dec("9200.00"));

        let released = engine.escrow(&escrow.id).unwrap();
        assert_eq!(released.status, EscrowStatus::Released);
        assert_eq!(released.commission + released.payout_amount, released.amount);
        assert!(released.released_at.is_some());
        assert_eq!(engine.wallet("seller-1").unwrap().available, dec("9200.00"));
    }

    #[tokio::test]
    async fn second_release_is_invalid_state_with_single_credit() {
        let (mut engine, _gw, _sink) = engine();
        let escrow = fund_escrow(&mut engine, "ref-1", "1000");

        engine.release_by_buyer(&escrow.id, "buyer-1").unwrap();
        let err = engine.release_by_buyer(&escrow.id, "buyer-1").unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(engine.wallet("seller-1").unwrap().available, dec("950.00"));
    }

    #[tokio::test]
    async fn unauthorized_release_leaves_escrow_in_escrow() {
        let (mut engine, _gw, _sink) = engine();
        let escrow = fund_escrow(&mut engine, "ref-1", "1000");

        let err = engine.release_by_buyer(&escrow.id, "intruder").unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));
        assert_eq!(
            engine.escrow(&escrow.id).unwrap().status,
            EscrowStatus::InEscrow
        );
        assert!(engine.wallet("seller-1").is_none());
    }

    #[tokio::test]
    async fn duplicate_verified_payment_creates_one_escrow() {
        let (mut engine, _gw, _sink) = engine();
        let first = engine
            .record_verified_payment("ref-1", "buyer-1", "seller-1", "laptop", dec("500"))
            .unwrap();
        let second = engine
            .record_verified_payment("ref-1", "buyer-1", "seller-1", "laptop", dec("500"))
            .unwrap();

        assert!(matches!(first, FundingOutcome::Created(_)));
        match second {
            FundingOutcome::AlreadyProcessed(e) => assert_eq!(e.id, first.escrow().id),
            FundingOutcome::Created(_) => panic!("duplicate delivery created a second escrow"),
        }
        assert_eq!(engine.escrow_summary().len(), 1);
        assert_eq!(engine.escrow_summary()[0].count, 1);
    }

    #[tokio::test]
    async fn non_positive_verified_payment_is_rejected() {
        let (mut engine, _gw, _sink) = engine();
        for bad in ["-100", "0"] {
            let err = engine
                .record_verified_payment("ref-neg", "buyer-1", "seller-1", "laptop", dec(bad))
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
        assert!(engine.escrow_by_reference("ref-neg").is_none());
        assert!(engine.store().payment_by_reference("ref-neg").is_none());
        assert!(engine.escrow_summary().is_empty());
    }

    #[tokio::test]
    async fn verify_payment_is_idempotent_after_webhook() {
        let (mut engine, _gw, _sink) = engine();
        let escrow = fund_escrow(&mut engine, "ref-1", "500");

        let outcome = engine.verify_payment("ref-1").await.unwrap();
        assert!(matches!(outcome, FundingOutcome::AlreadyProcessed(_)));
        assert_eq!(outcome.escrow().id, escrow.id);
    }

    #[tokio::test]
    async fn pending_charge_verification_is_retryable_and_changes_nothing() {
        let (mut engine, gw, _sink) = engine();
        let (reference, _handle) = engine
            .initiate_payment("buyer-1", "seller-1", "laptop", dec("500"))
            .await
            .unwrap();
        assert!(engine.escrow_summary().is_empty());
        gw.set_charge_outcome(&reference, GatewayStatus::Pending);

        let err = engine.verify_payment(&reference).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(engine.escrow_by_reference(&reference).is_none());

        gw.set_charge_outcome(&reference, GatewayStatus::Success);
        let outcome = engine.verify_payment(&reference).await.unwrap();
        assert!(matches!(outcome, FundingOutcome::Created(_)));
    }

    #[tokio::test]
    async fn dispute_refund_credits_buyer_full_amount() {
        let (mut engine, _gw, _sink) = engine();
        engine
            .update_commission_config(eight_percent_electronics())
            .unwrap();
        let escrow = fund_escrow(&mut engine, "ref-1", "10000");
        let dispute = engine
            .create_dispute(&escrow.id, "buyer-1", "item never arrived", vec![])
            .unwrap();

        engine
            .resolve_dispute(&dispute.id, DisputeAction::Refund, Some("verified".into()))
            .await
            .unwrap();

        assert_eq!(
            engine.escrow(&escrow.id).unwrap().status,
            EscrowStatus::Declined
        );
        assert_eq!(
            engine.dispute(&dispute.id).unwrap().status,
            DisputeStatus::Refunded
        );
        assert_eq!(
            engine.store().payment_by_reference("ref-1").unwrap().status,
            PaymentStatus::Refunded
        );
        // full amount, no commission withheld
        assert_eq!(engine.wallet("buyer-1").unwrap().available, dec("10000"));
        assert!(engine.wallet("seller-1").is_none());
    }

    #[tokio::test]
    async fn failed_gateway_refund_leaves_dispute_and_escrow_untouched() {
        let (mut engine, gw, _sink) = engine();
        let escrow = fund_escrow(&mut engine, "ref-1", "10000");
        let dispute = engine
            .create_dispute(&escrow.id, "buyer-1", "damaged", vec![])
            .unwrap();
        gw.fail_refund_for("ref-1");

        let err = engine
            .resolve_dispute(&dispute.id, DisputeAction::Refund, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Gateway { .. }));
        assert_eq!(
            engine.escrow(&escrow.id).unwrap().status,
            EscrowStatus::InEscrow
        );
        assert_eq!(
            engine.dispute(&dispute.id).unwrap().status,
            DisputeStatus::Open
        );
        assert!(engine.wallet("buyer-1").is_none());
    }

    #[tokio::test]
    async fn dispute_reject_never_touches_the_escrow() {
        let (mut engine, _gw, _sink) = engine();
        let escrow = fund_escrow(&mut engine, "ref-1", "750");
        let dispute = engine
            .create_dispute(&escrow.id, "buyer-1", "changed my mind", vec![])
            .unwrap();

        engine
            .resolve_dispute(&dispute.id, DisputeAction::Reject, Some("no grounds".into()))
            .await
            .unwrap();

        let resolved = engine.dispute(&dispute.id).unwrap();
        assert_eq!(resolved.status, DisputeStatus::Rejected);
        assert_eq!(resolved.resolution_note.as_deref(), Some("no grounds"));
        assert_eq!(
            engine.escrow(&escrow.id).unwrap().status,
            EscrowStatus::InEscrow
        );

        let err = engine
            .resolve_dispute(&dispute.id, DisputeAction::Refund, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn refund_after_release_fails_the_whole_resolution() {
        let (mut engine, _gw, _sink) = engine();
        let escrow = fund_escrow(&mut engine, "ref-1", "600");
        let dispute = engine
            .create_dispute(&escrow.id, "buyer-1", "late", vec![])
            .unwrap();
        engine.release_by_buyer(&escrow.id, "buyer-1").unwrap();

        let err = engine
            .resolve_dispute(&dispute.id, DisputeAction::Refund, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(
            engine.dispute(&dispute.id).unwrap().status,
            DisputeStatus::Open
        );
    }

    #[tokio::test]
    async fn admin_decline_refunds_the_buyer() {
        let (mut engine, _gw, _sink) = engine();
        let escrow = fund_escrow(&mut engine, "ref-1", "1200");

        engine
            .release_by_admin(&escrow.id, EscrowStatus::Declined)
            .await
            .unwrap();
        assert_eq!(
            engine.escrow(&escrow.id).unwrap().status,
            EscrowStatus::Declined
        );
        assert_eq!(engine.wallet("buyer-1").unwrap().available, dec("1200"));
    }

    #[tokio::test]
    async fn admin_override_rejects_non_terminal_targets() {
        let (mut engine, _gw, _sink) = engine();
        let escrow = fund_escrow(&mut engine, "ref-1", "1200");

        for target in [EscrowStatus::Pending, EscrowStatus::InEscrow] {
            let err = engine.release_by_admin(&escrow.id, target).await.unwrap_err();
            assert!(matches!(err, Error::InvalidState(_)));
        }
        assert_eq!(
            engine.escrow(&escrow.id).unwrap().status,
            EscrowStatus::InEscrow
        );
    }

    #[tokio::test]
    async fn withdrawal_cycle_with_failed_payout_is_net_zero() {
        let (mut engine, gw, _sink) = engine();
        let escrow = fund_escrow(&mut engine, "ref-1", "5000");
        // zero commission so the wallet lands on a round figure
        engine
            .update_commission_config(CommissionConfig::percentage(dec("0")))
            .unwrap();
        engine.release_by_buyer(&escrow.id, "buyer-1").unwrap();
        engine
            .register_payee("seller-1", "Seller One", "0123456789", "058")
            .await
            .unwrap();

        let withdrawal = engine.request_withdrawal("seller-1", dec("3000")).unwrap();
        {
            let wallet = engine.wallet("seller-1").unwrap();
            assert_eq!(wallet.available, dec("2000.00"));
            assert_eq!(wallet.reserved, dec("3000"));
        }

        engine.process_withdrawal(&withdrawal.id).await.unwrap();
        assert_eq!(
            engine.withdrawal(&withdrawal.id).unwrap().status,
            WithdrawalStatus::Processing
        );

        gw.set_payout_outcome("trf_1", GatewayStatus::Failed);
        let status = engine.verify_withdrawal(&withdrawal.id).await.unwrap();
        assert_eq!(status, WithdrawalStatus::Failed);

        let wallet = engine.wallet("seller-1").unwrap();
        assert_eq!(wallet.available, dec("5000.00"));
        assert_eq!(wallet.reserved, dec("0"));
    }

    #[tokio::test]
    async fn successful_payout_burns_the_reservation() {
        let (mut engine, _gw, _sink) = engine();
        let escrow = fund_escrow(&mut engine, "ref-1", "2000");
        engine
            .update_commission_config(CommissionConfig::percentage(dec("0")))
            .unwrap();
        engine.release_by_buyer(&escrow.id, "buyer-1").unwrap();
        engine
            .register_payee("seller-1", "Seller One", "0123456789", "058")
            .await
            .unwrap();

        let withdrawal = engine.request_withdrawal("seller-1", dec("2000")).unwrap();
        engine.process_withdrawal(&withdrawal.id).await.unwrap();
        let status = engine.verify_withdrawal(&withdrawal.id).await.unwrap();
        assert_eq!(status, WithdrawalStatus::Success);

        let wallet = engine.wallet("seller-1").unwrap();
        assert_eq!(wallet.available, dec("0.00"));
        assert_eq!(wallet.reserved, dec("0"));

        // terminal transition happened exactly once
        let err = engine.verify_withdrawal(&withdrawal.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn withdrawal_over_balance_is_rejected() {
        let (mut engine, _gw, _sink) = engine();
        engine
            .register_payee("seller-1", "Seller One", "0123456789", "058")
            .await
            .unwrap();
        let err = engine.request_withdrawal("seller-1", dec("10")).unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
        assert!(
            engine
                .wallet("seller-1")
                .map(|w| w.reserved == dec("0"))
                .unwrap_or(true)
        );
    }

    #[tokio::test]
    async fn payout_initiation_failure_keeps_withdrawal_pending() {
        let (mut engine, gw, _sink) = engine();
        let escrow = fund_escrow(&mut engine, "ref-1", "1000");
        engine
            .update_commission_config(CommissionConfig::percentage(dec("0")))
            .unwrap();
        engine.release_by_buyer(&escrow.id, "buyer-1").unwrap();
        engine
            .register_payee("seller-1", "Seller One", "0123456789", "058")
            .await
            .unwrap();
        let withdrawal = engine.request_withdrawal("seller-1", dec("500")).unwrap();

        gw.set_payout_initiation_down(true);
        let err = engine.process_withdrawal(&withdrawal.id).await.unwrap_err();
        assert!(err.is_retryable());
        let stored = engine.withdrawal(&withdrawal.id).unwrap();
        assert_eq!(stored.status, WithdrawalStatus::Pending);
        assert_eq!(engine.wallet("seller-1").unwrap().reserved, dec("500"));

        gw.set_payout_initiation_down(false);
        engine.process_withdrawal(&withdrawal.id).await.unwrap();
        assert_eq!(
            engine.withdrawal(&withdrawal.id).unwrap().status,
            WithdrawalStatus::Processing
        );
    }

    #[tokio::test]
    async fn still_pending_payout_changes_nothing() {
        let (mut engine, gw, _sink) = engine();
        let escrow = fund_escrow(&mut engine, "ref-1", "1000");
        engine
            .update_commission_config(CommissionConfig::percentage(dec("0")))
            .unwrap();
        engine.release_by_buyer(&escrow.id, "buyer-1").unwrap();
        engine
            .register_payee("seller-1", "Seller One", "0123456789", "058")
            .await
            .unwrap();
        let withdrawal = engine.request_withdrawal("seller-1", dec("400")).unwrap();
        engine.process_withdrawal(&withdrawal.id).await.unwrap();

        gw.set_payout_outcome("trf_1", GatewayStatus::Pending);
        let status = engine.verify_withdrawal(&withdrawal.id).await.unwrap();
        assert_eq!(status, WithdrawalStatus::Processing);
        assert_eq!(engine.wallet("seller-1").unwrap().reserved, dec("400"));

        gw.set_payout_outcome("trf_1", GatewayStatus::Success);
        let status = engine.verify_withdrawal(&withdrawal.id).await.unwrap();
        assert_eq!(status, WithdrawalStatus::Success);
    }

    #[tokio::test]
    async fn dispute_against_missing_escrow_is_not_found() {
        let (mut engine, _gw, _sink) = engine();
        let err = engine
            .create_dispute("no-such-escrow", "buyer-1", "?", vec![])
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn notifications_follow_commits() {
        let (mut engine, _gw, sink) = engine();
        let escrow = fund_escrow(&mut engine, "ref-1", "1000");
        engine.release_by_buyer(&escrow.id, "buyer-1").unwrap();

        let events = sink.events();
        assert!(events.iter().any(|(user, e)| {
            user == "seller-1" && matches!(e, NotifyEvent::EscrowFunded { .. })
        }));
        assert!(events.iter().any(|(user, e)| {
            user == "seller-1" && matches!(e, NotifyEvent::EscrowReleased { .. })
        }));
    }

    #[tokio::test]
    async fn seller_payouts_lists_history_newest_first() {
        let (mut engine, _gw, _sink) = engine();
        let first = fund_escrow(&mut engine, "ref-1", "100");
        engine
            .record_verified_payment("ref-2", "buyer-2", "seller-1", "phone", dec("200"))
            .unwrap();
        engine.release_by_buyer(&first.id, "buyer-1").unwrap();

        let payouts = engine.seller_payouts("seller-1");
        assert_eq!(payouts.len(), 2);
        assert!(payouts[0].created_at >= payouts[1].created_at);
        assert!(engine.seller_payouts("seller-2").is_empty());
    }

    #[tokio::test]
    async fn commission_reads_fall_back_without_writing() {
        let (mut engine, _gw, _sink) = engine();
        assert_eq!(engine.commission_config().global_rate, dec("5"));
        assert!(engine.store().commission().is_none());

        let err = engine
            .update_commission_config(CommissionConfig::percentage(dec("120")))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(engine.store().commission().is_none());

        engine
            .update_commission_config(CommissionConfig::percentage(dec("7")))
            .unwrap();
        assert_eq!(engine.commission_config().global_rate, dec("7"));
    }

    #[tokio::test]
    async fn escrow_summary_groups_by_status() {
        let (mut engine, _gw, _sink) = engine();
        let first = fund_escrow(&mut engine, "ref-1", "100");
        fund_escrow(&mut engine, "ref-2", "200");
        engine.release_by_buyer(&first.id, "buyer-1").unwrap();

        let summary = engine.escrow_summary();
        let in_escrow = summary
            .iter()
            .find(|s| s.status == EscrowStatus::InEscrow)
            .unwrap();
        let released = summary
            .iter()
            .find(|s| s.status == EscrowStatus::Released)
            .unwrap();
        assert_eq!((in_escrow.count, in_escrow.total_amount), (1, dec("200")));
        assert_eq!((released.count, released.total_amount), (1, dec("100")));
    }
}
