use crate::domain::group::{ContributionType, Cycle};
use crate::domain::ids::UserId;
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    OpenWallet,
    Fund,
    CreateGroup,
    Join,
    Remove,
    Contribute,
    RequestPayout,
    Approve,
    Reject,
    Schedule,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::OpenWallet => "open_wallet",
            Op::Fund => "fund",
            Op::CreateGroup => "create_group",
            Op::Join => "join",
            Op::Remove => "remove",
            Op::Contribute => "contribute",
            Op::RequestPayout => "request_payout",
            Op::Approve => "approve",
            Op::Reject => "reject",
            Op::Schedule => "schedule",
        };
        f.write_str(s)
    }
}

/// One row of a command script. Which optional columns are required depends
/// on the op.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct ScriptCommand {
    pub op: Op,
    pub actor: UserId,
    /// Group name, resolved to an id by the runner.
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub member: Option<UserId>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub cycle: Option<Cycle>,
    #[serde(default)]
    pub penalty: Option<Decimal>,
    #[serde(default)]
    pub reference: Option<String>,
    /// Contribution type of a new group, read from an optional `type` column.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl ScriptCommand {
    pub fn group(&self) -> Result<&str> {
        self.group.as_deref().ok_or_else(|| missing(self.op, "group"))
    }

    pub fn member(&self) -> Result<&UserId> {
        self.member.as_ref().ok_or_else(|| missing(self.op, "member"))
    }

    pub fn amount(&self) -> Result<Decimal> {
        self.amount.ok_or_else(|| missing(self.op, "amount"))
    }

    /// Parsed `type` column; group contribution when the column is absent or empty.
    pub fn kind(&self) -> Result<ContributionType> {
        match self.kind.as_deref() {
            None | Some("") => Ok(ContributionType::default()),
            Some(kind) => kind.parse(),
        }
    }
}

fn missing(op: Op, column: &str) -> LedgerError {
    LedgerError::InvalidInput(format!("{op} requires a {column} column"))
}

/// Reads command rows from a CSV source.
///
/// Whitespace around fields is trimmed and rows may omit trailing columns.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows so large scripts are streamed.
    pub fn commands(self) -> impl Iterator<Item = Result<ScriptCommand>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}
