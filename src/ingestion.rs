use std::io::Read;
use std::pin::Pin;

use futures::stream::{self, Stream};
use serde::Deserialize;

use crate::domain::{Error, Money};

/// One line of a settlement replay file.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Verified charge: creates the payment/escrow pair.
    Fund {
        buyer: String,
        seller: String,
        product: String,
        reference: String,
        amount: Money,
    },
    /// Set the global percentage commission rate.
    Commission { rate: Money },
    Release {
        buyer: String,
        reference: String,
    },
    AdminRelease {
        reference: String,
    },
    AdminDecline {
        reference: String,
    },
    Dispute {
        buyer: String,
        reference: String,
        reason: String,
    },
    ResolveRefund {
        reference: String,
        note: Option<String>,
    },
    ResolveReject {
        reference: String,
        note: Option<String>,
    },
    RegisterPayee {
        seller: String,
        account_number: String,
        bank_code: String,
    },
    WithdrawRequest {
        seller: String,
        reference: String,
        amount: Money,
    },
    WithdrawProcess {
        reference: String,
    },
    WithdrawVerify {
        reference: String,
    },
}

pub trait OperationStream {
    type OpStream: Stream<Item = Result<Operation, Error>> + Send + Unpin + 'static;
    fn stream(&mut self) -> Self::OpStream;
}

pub struct CsvReader<R: Read> {
    reader: Option<csv::Reader<R>>,
}

impl<R: Read> CsvReader<R> {
    pub fn new(reader: R) -> Result<Self, Error> {
        let rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        Ok(Self { reader: Some(rdr) })
    }
}

/// Internal shape used only for CSV deserialization.
#[derive(Debug, Deserialize)]
struct CsvRow {
    op: String,
    user: Option<String>,
    reference: Option<String>,
    arg1: Option<String>,
    arg2: Option<String>,
    amount: Option<Money>,
}

fn require(field: Option<String>, name: &str, op: &str) -> Result<String, Error> {
    field
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Ingestion(format!("{op} requires a {name} column")))
}

impl TryFrom<CsvRow> for Operation {
    type Error = Error;

    fn try_from(row: CsvRow) -> Result<Self, Self::Error> {
        let op = row.op.trim().to_ascii_lowercase();
        let note = |s: Option<String>| s.filter(|v| !v.is_empty());
        let operation = match op.as_str() {
            "fund" => Operation::Fund {
                buyer: require(row.user, "user", &op)?,
                reference: require(row.reference, "reference", &op)?,
                seller: require(row.arg1, "arg1 (seller)", &op)?,
                product: require(row.arg2, "arg2 (product)", &op)?,
                amount: row
                    .amount
                    .ok_or_else(|| Error::Ingestion("fund requires an amount".to_string()))?,
            },
            "commission" => Operation::Commission {
                rate: row
                    .amount
                    .ok_or_else(|| Error::Ingestion("commission requires a rate".to_string()))?,
            },
            "release" => Operation::Release {
                buyer: require(row.user, "user", &op)?,
                reference: require(row.reference, "reference", &op)?,
            },
            "admin_release" => Operation::AdminRelease {
                reference: require(row.reference, "reference", &op)?,
            },
            "admin_decline" => Operation::AdminDecline {
                reference: require(row.reference, "reference", &op)?,
            },
            "dispute" => Operation::Dispute {
                buyer: require(row.user, "user", &op)?,
                reference: require(row.reference, "reference", &op)?,
                reason: note(row.arg1).unwrap_or_else(|| "filed via replay".to_string()),
            },
            "resolve_refund" => Operation::ResolveRefund {
                reference: require(row.reference, "reference", &op)?,
                note: note(row.arg1),
            },
            "resolve_reject" => Operation::ResolveReject {
                reference: require(row.reference, "reference", &op)?,
                note: note(row.arg1),
            },
            "payee" => Operation::RegisterPayee {
                seller: require(row.user, "user", &op)?,
                account_number: require(row.arg1, "arg1 (account number)", &op)?,
                bank_code: require(row.arg2, "arg2 (bank code)", &op)?,
            },
            "withdraw" => Operation::WithdrawRequest {
                seller: require(row.user, "user", &op)?,
                reference: require(row.reference, "reference", &op)?,
                amount: row
                    .amount
                    .ok_or_else(|| Error::Ingestion("withdraw requires an amount".to_string()))?,
            },
            "withdraw_process" => Operation::WithdrawProcess {
                reference: require(row.reference, "reference", &op)?,
            },
            "withdraw_verify" => Operation::WithdrawVerify {
                reference: require(row.reference, "reference", &op)?,
            },
            other => {
                return Err(Error::Ingestion(format!("Invalid operation type: {other}")));
            }
        };
        Ok(operation)
    }
}

impl<R: Read + Send + 'static> OperationStream for CsvReader<R> {
    type OpStream = Pin<Box<dyn Stream<Item = Result<Operation, Error>> + Send>>;

    fn stream(&mut self) -> Self::OpStream {
        // Take ownership of the reader so the iterator we build owns all data and is 'static.
        let reader = match self.reader.take() {
            Some(r) => r,
            None => {
                // Already consumed; return an empty stream.
                return Box::pin(stream::iter(Vec::<Result<Operation, Error>>::new()));
            }
        };

        let iter = reader
            .into_deserialize::<CsvRow>()
            .map(|row_res| match row_res {
                Ok(row) => Operation::try_from(row),
                Err(e) => Err(Error::Ingestion(format!("CSV deserialization error: {e}"))),
            });

        Box::pin(stream::iter(iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn parses_a_replay_file() {
        let data = "op, user, reference, arg1, arg2, amount\n\
            commission, , , , , 8\n\
            fund, buyer-1, ref-1, seller-1, laptop, 10000\n\
            release, buyer-1, ref-1\n\
            withdraw, seller-1, wd-1, , , 3000\n\
            bogus, x, y";
        let mut reader = CsvReader::new(data.as_bytes()).unwrap();
        let ops: Vec<_> = reader.stream().collect().await;

        assert_eq!(ops.len(), 5);
        assert!(matches!(ops[0], Ok(Operation::Commission { .. })));
        match &ops[1] {
            Ok(Operation::Fund {
                buyer,
                seller,
                reference,
                amount,
                ..
            }) => {
                assert_eq!(buyer, "buyer-1");
                assert_eq!(seller, "seller-1");
                assert_eq!(reference, "ref-1");
                assert_eq!(amount.as_minor(), 1_000_000);
            }
            other => panic!("unexpected row: {other:?}"),
        }
        assert!(matches!(ops[2], Ok(Operation::Release { .. })));
        assert!(matches!(ops[3], Ok(Operation::WithdrawRequest { .. })));
        assert!(matches!(ops[4], Err(Error::Ingestion(_))));
    }

    #[tokio::test]
    async fn missing_columns_are_ingestion_errors() {
        let data = "op, user, reference, arg1, arg2, amount\n\
            fund, buyer-1, , seller-1, laptop, 100";
        let mut reader = CsvReader::new(data.as_bytes()).unwrap();
        let ops: Vec<_> = reader.stream().collect().await;
        assert!(matches!(ops[0], Err(Error::Ingestion(_))));
    }
}
