pub mod commission;
pub mod dispute;
pub mod error;
pub mod escrow;
pub mod money;
pub mod payment;
pub mod traits;
pub mod wallet;
pub mod withdrawal;

pub use commission::{Breakdown, CategoryRate, CommissionConfig, CommissionKind};
pub use dispute::{Dispute, DisputeAction, DisputeStatus};
pub use error::Error;
pub use escrow::{Escrow, EscrowStatus};
pub use money::Money;
pub use payment::{Payment, PaymentStatus};
pub use traits::{
    DisputeResolution, EscrowSummary, GatewayStatus, LedgerStore, NotificationSink, NotifyEvent,
    PaymentGateway, ProductCatalog,
};
pub use wallet::Wallet;
pub use withdrawal::{Withdrawal, WithdrawalStatus};
