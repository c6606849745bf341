use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;
use tracing::info;

use crate::domain::{
    Error, Escrow, LedgerStore, Money, NotificationSink, PaymentGateway, ProductCatalog,
};
use crate::engine::{Engine, FundingOutcome};

type HmacSha512 = Hmac<Sha512>;

/// Header the gateway puts its body signature in.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

#[derive(Debug, Deserialize)]
pub struct ChargeEvent {
    pub event: String,
    pub data: ChargeData,
}

#[derive(Debug, Deserialize)]
pub struct ChargeData {
    pub reference: String,
    /// Minor currency units, as the gateway reports them.
    pub amount: i64,
    pub metadata: ChargeMetadata,
}

#[derive(Debug, Deserialize)]
pub struct ChargeMetadata {
    pub buyer_id: String,
    pub seller_id: String,
    pub product_id: String,
}

#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Funded(Escrow),
    /// Same event delivered before, or a synchronous verify got there first.
    /// Still a success from the gateway's point of view.
    AlreadyProcessed(Escrow),
    /// Event type we do not consume.
    Ignored,
}

/// Validates and applies asynchronous `charge.success` deliveries.
///
/// The signature is an HMAC-SHA512 over the raw body with the shared secret;
/// the body is only parsed after it verifies. Processing is idempotent on the
/// charge reference, so replayed deliveries are acknowledged without effect.
pub struct WebhookHandler {
    secret: Vec<u8>,
}

impl WebhookHandler {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn verify_signature(&self, raw_body: &[u8], signature_hex: &str) -> bool {
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };
        let mut mac =
            HmacSha512::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(raw_body);
        mac.verify_slice(&signature).is_ok()
    }

    pub fn handle<S, G, C, N>(
        &self,
        engine: &mut Engine<S, G, C, N>,
        raw_body: &[u8],
        signature_hex: &str,
    ) -> Result<WebhookOutcome, Error>
    where
        S: LedgerStore,
        G: PaymentGateway,
        C: ProductCatalog,
        N: NotificationSink,
    {
        if !self.verify_signature(raw_body, signature_hex) {
            return Err(Error::Unauthorized {
                caller: "webhook".to_string(),
                role: "gateway",
            });
        }
        let event: ChargeEvent = serde_json::from_slice(raw_body)
            .map_err(|e| Error::Validation(format!("malformed webhook body: {e}")))?;
        if event.event != "charge.success" {
            return Ok(WebhookOutcome::Ignored);
        }
        if event.data.amount <= 0 {
            return Err(Error::Validation(format!(
                "webhook charge amount must be positive, got {}",
                event.data.amount
            )));
        }

        let amount = Money::from_minor(event.data.amount).to_decimal();
        info!(reference = %event.data.reference, %amount, "charge.success webhook");
        let outcome = engine.record_verified_payment(
            &event.data.reference,
            &event.data.metadata.buyer_id,
            &event.data.metadata.seller_id,
            &event.data.metadata.product_id,
            amount,
        )?;
        Ok(match outcome {
            FundingOutcome::Created(e) => WebhookOutcome::Funded(e),
            FundingOutcome::AlreadyProcessed(e) => WebhookOutcome::AlreadyProcessed(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EscrowStatus;
    use crate::gateway::SimulatedGateway;
    use crate::notify::NoopSink;
    use crate::store::{InMemoryLedger, StaticCatalog};

    const SECRET: &[u8] = b"whsec_test";

    fn sign(body: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(SECRET).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn engine() -> Engine<InMemoryLedger, SimulatedGateway, StaticCatalog, NoopSink> {
        Engine::new(
            InMemoryLedger::new(),
            SimulatedGateway::new(),
            StaticCatalog::new(),
            NoopSink::default(),
        )
    }

    fn charge_body(reference: &str, amount_minor: i64) -> Vec<u8> {
        format!(
            r#"{{"event":"charge.success","data":{{"reference":"{reference}","amount":{amount_minor},"metadata":{{"buyer_id":"buyer-1","seller_id":"seller-1","product_id":"laptop"}}}}}}"#
        )
        .into_bytes()
    }

    #[test]
    fn valid_event_funds_an_escrow() {
        let handler = WebhookHandler::new(SECRET);
        let mut engine = engine();
        let body = charge_body("ref-1", 500_00);

        let outcome = handler.handle(&mut engine, &body, &sign(&body)).unwrap();
        let WebhookOutcome::Funded(escrow) = outcome else {
            panic!("expected a funded escrow");
        };
        assert_eq!(escrow.status, EscrowStatus::InEscrow);
        assert_eq!(escrow.amount, "500.00".parse().unwrap());
        assert_eq!(escrow.reference, "ref-1");
    }

    #[test]
    fn replayed_event_is_acknowledged_without_effect() {
        let handler = WebhookHandler::new(SECRET);
        let mut engine = engine();
        let body = charge_body("ref-1", 500_00);

        handler.handle(&mut engine, &body, &sign(&body)).unwrap();
        let outcome = handler.handle(&mut engine, &body, &sign(&body)).unwrap();
        assert!(matches!(outcome, WebhookOutcome::AlreadyProcessed(_)));
        assert_eq!(engine.escrow_summary()[0].count, 1);
    }

    #[test]
    fn tampered_body_is_rejected_before_parsing() {
        let handler = WebhookHandler::new(SECRET);
        let mut engine = engine();
        let body = charge_body("ref-1", 500_00);
        let signature = sign(&body);
        let tampered = charge_body("ref-1", 900_00);

        let err = handler.handle(&mut engine, &tampered, &signature).unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));
        assert!(engine.escrow_by_reference("ref-1").is_none());
    }

    #[test]
    fn garbage_signature_is_rejected() {
        let handler = WebhookHandler::new(SECRET);
        let body = charge_body("ref-1", 100);
        assert!(!handler.verify_signature(&body, "not-hex"));
        assert!(!handler.verify_signature(&body, &hex::encode([0u8; 64])));
    }

    #[test]
    fn other_event_types_are_ignored() {
        let handler = WebhookHandler::new(SECRET);
        let mut engine = engine();
        let body = br#"{"event":"transfer.success","data":{"reference":"ref-9","amount":100,"metadata":{"buyer_id":"b","seller_id":"s","product_id":"p"}}}"#.to_vec();

        let outcome = handler.handle(&mut engine, &body, &sign(&body)).unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored));
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let handler = WebhookHandler::new(SECRET);
        let mut engine = engine();
        let body = charge_body("ref-1", 0);

        let err = handler.handle(&mut engine, &body, &sign(&body)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
