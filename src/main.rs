use std::collections::HashMap;
use std::{env, fs::File, path::Path};

use futures::StreamExt;

use escrow_engine::domain::{CommissionConfig, DisputeAction, Error, EscrowStatus};
use escrow_engine::engine::Engine;
use escrow_engine::gateway::SimulatedGateway;
use escrow_engine::ingestion::{CsvReader, Operation, OperationStream};
use escrow_engine::notify::TracingSink;
use escrow_engine::store::{InMemoryLedger, StaticCatalog};

type ReplayEngine = Engine<InMemoryLedger, SimulatedGateway, StaticCatalog, TracingSink>;

/// Maps the replay file's client-chosen references onto engine-generated ids.
#[derive(Default)]
struct ReplayContext {
    disputes: HashMap<String, String>,    // escrow reference -> dispute id
    withdrawals: HashMap<String, String>, // replay reference -> withdrawal id
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = env::args();
    let file_path = args.nth(1).ok_or("No replay file argument was provided")?;
    let file = File::open(Path::new(&file_path))?;

    let mut engine = Engine::new(
        InMemoryLedger::new(),
        SimulatedGateway::new(),
        StaticCatalog::new(),
        TracingSink::default(),
    );
    let mut ctx = ReplayContext::default();

    let mut reader = CsvReader::new(file)?;
    let mut ops = reader.stream();
    while let Some(op) = ops.next().await {
        match op {
            Ok(op) => {
                if let Err(e) = apply(&mut engine, &mut ctx, op).await {
                    eprintln!("Error applying operation: {e}");
                }
            }
            Err(e) => eprintln!("Error reading operation: {e}"),
        }
    }

    flush(&engine);
    Ok(())
}

async fn apply(engine: &mut ReplayEngine, ctx: &mut ReplayContext, op: Operation) -> Result<(), Error> {
    match op {
        Operation::Fund {
            buyer,
            seller,
            product,
            reference,
            amount,
        } => {
            engine.record_verified_payment(
                &reference,
                &buyer,
                &seller,
                &product,
                amount.to_decimal(),
            )?;
        }
        Operation::Commission { rate } => {
            engine.update_commission_config(CommissionConfig::percentage(rate.to_decimal()))?;
        }
        Operation::Release { buyer, reference } => {
            let escrow_id = escrow_id(engine, &reference)?;
            engine.release_by_buyer(&escrow_id, &buyer)?;
        }
        Operation::AdminRelease { reference } => {
            let escrow_id = escrow_id(engine, &reference)?;
            engine
                .release_by_admin(&escrow_id, EscrowStatus::Released)
                .await?;
        }
        Operation::AdminDecline { reference } => {
            let escrow_id = escrow_id(engine, &reference)?;
            engine
                .release_by_admin(&escrow_id, EscrowStatus::Declined)
                .await?;
        }
        Operation::Dispute {
            buyer,
            reference,
            reason,
        } => {
            let escrow_id = escrow_id(engine, &reference)?;
            let dispute = engine.create_dispute(&escrow_id, &buyer, &reason, Vec::new())?;
            ctx.disputes.insert(reference, dispute.id);
        }
        Operation::ResolveRefund { reference, note } => {
            let dispute_id = dispute_id(ctx, &reference)?;
            engine
                .resolve_dispute(&dispute_id, DisputeAction::Refund, note)
                .await?;
        }
        Operation::ResolveReject { reference, note } => {
            let dispute_id = dispute_id(ctx, &reference)?;
            engine
                .resolve_dispute(&dispute_id, DisputeAction::Reject, note)
                .await?;
        }
        Operation::RegisterPayee {
            seller,
            account_number,
            bank_code,
        } => {
            engine
                .register_payee(&seller, &seller, &account_number, &bank_code)
                .await?;
        }
        Operation::WithdrawRequest {
            seller,
            reference,
            amount,
        } => {
            let withdrawal = engine.request_withdrawal(&seller, amount.to_decimal())?;
            ctx.withdrawals.insert(reference, withdrawal.id);
        }
        Operation::WithdrawProcess { reference } => {
            let withdrawal_id = withdrawal_id(ctx, &reference)?;
            engine.process_withdrawal(&withdrawal_id).await?;
        }
        Operation::WithdrawVerify { reference } => {
            let withdrawal_id = withdrawal_id(ctx, &reference)?;
            engine.verify_withdrawal(&withdrawal_id).await?;
        }
    }
    Ok(())
}

fn escrow_id(engine: &ReplayEngine, reference: &str) -> Result<String, Error> {
    engine
        .escrow_by_reference(reference)
        .map(|e| e.id.clone())
        .ok_or_else(|| Error::not_found("escrow", reference))
}

fn dispute_id(ctx: &ReplayContext, reference: &str) -> Result<String, Error> {
    ctx.disputes
        .get(reference)
        .cloned()
        .ok_or_else(|| Error::not_found("dispute", reference))
}

fn withdrawal_id(ctx: &ReplayContext, reference: &str) -> Result<String, Error> {
    ctx.withdrawals
        .get(reference)
        .cloned()
        .ok_or_else(|| Error::not_found("withdrawal", reference))
}

fn flush(engine: &ReplayEngine) {
    println!("user,available,reserved");
    for (user, available, reserved) in engine.store().wallet_rows() {
        println!("{},{:.2},{:.2}", user, available.round_dp(2), reserved.round_dp(2));
    }
    println!("status,count,total_amount");
    for row in engine.escrow_summary() {
        println!("{},{},{:.2}", row.status, row.count, row.total_amount.round_dp(2));
    }
}
