//! Replays an operation script against an in-memory engine and prints the
//! resulting accounts. Lives in the library so integration tests can drive it.

use std::{
    collections::{BTreeMap, HashMap},
    io::{Read, Write},
    sync::Arc,
};

use anyhow::Result;
use csv_parser::{CsvOperationParser, Operation, OperationKind};
use csv_printer::{AccountRow, print_accounts};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    account::{AccountId, AccountKind, UserId},
    clock::SystemClock,
    command::{CashRequest, OpenAccountRequest, TransferRequest},
    config::EngineConfig,
    engine::Engine,
    error::LedgerError,
    store::in_memory::InMemoryStore,
};

pub mod csv_parser;
pub mod csv_printer;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Malformed row: {0}")]
    Malformed(#[from] csv::Error),
    #[error("{0}")]
    Script(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct Service<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub config: EngineConfig,
    pub error_printer: Box<dyn FnMut(u64, ReplayError)>,
}

/// Alias tables of one replay. Users are created on first mention, accounts
/// by `open`.
#[derive(Default)]
struct Aliases {
    users: HashMap<String, UserId>,
    accounts: BTreeMap<String, AccountId>,
}

impl Aliases {
    fn user(&mut self, alias: &str) -> UserId {
        *self
            .users
            .entry(alias.to_string())
            .or_insert_with(Uuid::new_v4)
    }

    fn account(&self, alias: &str) -> Result<AccountId, ReplayError> {
        self.accounts
            .get(alias)
            .copied()
            .ok_or_else(|| ReplayError::Script(format!("Unknown account alias `{alias}`")))
    }
}

impl<'w, R, W> Service<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    pub async fn run(mut self) -> Result<()> {
        let parser = CsvOperationParser::new(self.input);
        let engine = Engine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(SystemClock),
            self.config,
        );
        let mut aliases = Aliases::default();

        for (line, row) in parser {
            let outcome = match row {
                Ok(op) => apply(&engine, &mut aliases, op).await,
                Err(err) => Err(err.into()),
            };
            if let Err(err) = outcome {
                debug!(line, error = %err, "operation rejected");
                (self.error_printer)(line, err);
            }
        }

        let mut rows = Vec::with_capacity(aliases.accounts.len());
        for (alias, id) in &aliases.accounts {
            let acc = engine.accounts().get_account(*id).await?;
            rows.push(AccountRow {
                account: alias.clone(),
                kind: acc.kind,
                currency: acc.currency.clone(),
                balance: acc.balance(),
                available: acc.available_balance(),
                transfer_used: acc.daily_transfer_used(),
                closed: acc.is_closed(),
            });
        }
        print_accounts(self.output, rows.into_iter())
    }
}

fn amount(op: &Operation) -> Result<Decimal, ReplayError> {
    op.amount
        .ok_or_else(|| ReplayError::Script(format!("`{:?}` needs an amount", op.op)))
}

async fn apply(engine: &Engine, aliases: &mut Aliases, op: Operation) -> Result<(), ReplayError> {
    let user_id = aliases.user(&op.user);
    match op.op {
        OperationKind::Open => {
            if aliases.accounts.contains_key(&op.account) {
                return Err(ReplayError::Script(format!(
                    "Account alias `{}` is already taken",
                    op.account
                )));
            }
            let account = engine
                .open_account(OpenAccountRequest {
                    user_id,
                    kind: op.kind.unwrap_or(AccountKind::Debit),
                    currency: op.currency.unwrap_or_default(),
                    name: None,
                    credit_limit: op.amount,
                })
                .await?;
            aliases.accounts.insert(op.account, account.id);
        }
        OperationKind::Deposit | OperationKind::Withdraw => {
            let request = CashRequest {
                user_id,
                account_id: aliases.account(&op.account)?,
                amount: amount(&op)?,
                category: None,
                description: None,
            };
            if op.op == OperationKind::Deposit {
                engine.deposit(request).await?;
            } else {
                engine.withdraw(request).await?;
            }
        }
        OperationKind::Transfer => {
            let from_account_id = aliases.account(&op.account)?;
            let target = op
                .target
                .as_deref()
                .ok_or_else(|| ReplayError::Script("`Transfer` needs a target".to_string()))?;
            // unknown aliases are taken as external account numbers
            let to_account_number = match aliases.accounts.get(target) {
                Some(id) => engine.accounts().get_account(*id).await?.number,
                None => target.to_string(),
            };
            let currency = match op.currency.clone() {
                Some(currency) => currency,
                None => engine.accounts().get_account(from_account_id).await?.currency,
            };
            engine
                .create_transfer(TransferRequest {
                    user_id,
                    from_account_id,
                    to_account_number,
                    amount: amount(&op)?,
                    currency,
                    description: None,
                    recipient_name: None,
                })
                .await?;
        }
        OperationKind::Close => {
            let target = op
                .target
                .as_deref()
                .map(|alias| aliases.account(alias))
                .transpose()?;
            engine
                .close_account(user_id, aliases.account(&op.account)?, target)
                .await?;
        }
    }
    Ok(())
}
