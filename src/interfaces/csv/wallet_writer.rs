use crate::domain::money::Balance;
use crate::domain::wallet::WalletKind;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// A wallet as reported at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletBalance {
    /// Owner id for personal wallets, group name for group wallets.
    pub label: String,
    pub kind: WalletKind,
    pub balance: Balance,
}

#[derive(Serialize)]
struct Row<'a> {
    wallet: &'a str,
    kind: WalletKind,
    balance: Decimal,
}

pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_wallets(&mut self, wallets: &[WalletBalance]) -> Result<()> {
        for wallet in wallets {
            self.writer.serialize(Row {
                wallet: &wallet.label,
                kind: wallet.kind,
                balance: wallet.balance.value().normalize(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
