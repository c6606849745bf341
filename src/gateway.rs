use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::{Error, GatewayStatus, PaymentGateway};

#[derive(Default, Debug)]
struct Inner {
    charge_outcomes: HashMap<String, GatewayStatus>,
    payout_outcomes: HashMap<String, GatewayStatus>,
    refund_failures: HashSet<String>,
    payout_init_down: bool,
    next_transfer: u64,
}

/// Scriptable stand-in for the external payment gateway.
///
/// Every call succeeds unless an outcome has been scripted for the reference
/// involved. Transfer references are handed out as `trf_1`, `trf_2`, ... in
/// payout-initiation order. Clones share state, so a test can keep a handle
/// and change outcomes after the engine has taken its copy.
#[derive(Clone, Default, Debug)]
pub struct SimulatedGateway {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("gateway state poisoned")
    }

    pub fn set_charge_outcome(&self, reference: &str, status: GatewayStatus) {
        self.lock()
            .charge_outcomes
            .insert(reference.to_string(), status);
    }

    pub fn set_payout_outcome(&self, transfer_ref: &str, status: GatewayStatus) {
        self.lock()
            .payout_outcomes
            .insert(transfer_ref.to_string(), status);
    }

    pub fn fail_refund_for(&self, reference: &str) {
        self.lock().refund_failures.insert(reference.to_string());
    }

    /// Make `initiate_payout` fail until cleared, as if the gateway were
    /// unreachable.
    pub fn set_payout_initiation_down(&self, down: bool) {
        self.lock().payout_init_down = down;
    }
}

impl PaymentGateway for SimulatedGateway {
    async fn init_charge(
        &self,
        payer: &str,
        amount: Decimal,
        reference: &str,
        metadata: &str,
    ) -> Result<String, Error> {
        debug!(payer, %amount, reference, metadata, "gateway init_charge");
        Ok(format!("chg_{reference}"))
    }

    async fn verify_charge(&self, reference: &str) -> Result<GatewayStatus, Error> {
        let status = self
            .lock()
            .charge_outcomes
            .get(reference)
            .copied()
            .unwrap_or(GatewayStatus::Success);
        debug!(reference, ?status, "gateway verify_charge");
        Ok(status)
    }

    async fn create_payee(
        &self,
        name: &str,
        account_number: &str,
        bank_code: &str,
    ) -> Result<String, Error> {
        debug!(name, account_number, bank_code, "gateway create_payee");
        Ok(format!("rcp_{bank_code}_{account_number}"))
    }

    async fn initiate_payout(
        &self,
        amount: Decimal,
        payee_ref: &str,
        reason: &str,
    ) -> Result<String, Error> {
        let mut inner = self.lock();
        if inner.payout_init_down {
            return Err(Error::gateway("payout initiation unreachable", true));
        }
        inner.next_transfer += 1;
        let transfer_ref = format!("trf_{}", inner.next_transfer);
        debug!(%amount, payee_ref, reason, %transfer_ref, "gateway initiate_payout");
        Ok(transfer_ref)
    }

    async fn verify_payout(&self, transfer_ref: &str) -> Result<GatewayStatus, Error> {
        let status = self
            .lock()
            .payout_outcomes
            .get(transfer_ref)
            .copied()
            .unwrap_or(GatewayStatus::Success);
        debug!(transfer_ref, ?status, "gateway verify_payout");
        Ok(status)
    }

    async fn refund(&self, reference: &str) -> Result<(), Error> {
        if self.lock().refund_failures.contains(reference) {
            return Err(Error::gateway(
                format!("refund declined for {reference}"),
                true,
            ));
        }
        debug!(reference, "gateway refund");
        Ok(())
    }
}
