use rust_decimal::Decimal;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{Context, accounts::AccountStore, history::TransactionLedger};
use crate::{
    account::{Account, NewAccount},
    command::{
        CloseAccountCommand, OpenAccountCommand, OpenAccountRequest, RenameAccountCommand,
        RenameAccountRequest,
    },
    error::{LedgerError, LedgerResult},
    ledger::{LedgerEntry, TransactionType},
    store::StoreError,
};

const NUMBER_ATTEMPTS: usize = 5;
const NUMBER_SPACE: u128 = 100_000_000;

#[derive(Clone)]
pub struct AccountLifecycle {
    ctx: Context,
    accounts: AccountStore,
    ledger: TransactionLedger,
}

impl AccountLifecycle {
    pub(crate) fn new(ctx: Context, accounts: AccountStore, ledger: TransactionLedger) -> Self {
        Self {
            ctx,
            accounts,
            ledger,
        }
    }

    /// Opens an account with a freshly generated number, drawing a new one
    /// if the store reports a collision.
    #[instrument(skip(self, request), fields(user_id = %request.user_id), err(level = "info"))]
    pub async fn open_account(&self, request: OpenAccountRequest) -> LedgerResult<Account> {
        let command = OpenAccountCommand::parse(request)?;
        for attempt in 1..=NUMBER_ATTEMPTS {
            let account = Account::open(
                NewAccount {
                    user_id: command.user_id,
                    number: self.generate_number(),
                    name: command.name.clone(),
                    kind: command.kind,
                    currency: command.currency.clone(),
                    credit_limit: command.credit_limit,
                    daily_transfer_limit: self.ctx.config.default_daily_transfer_limit,
                    daily_withdrawal_limit: self.ctx.config.default_daily_withdrawal_limit,
                },
                self.ctx.clock.now(),
            );
            let mut tx = self.ctx.store.begin().await?;
            tx.insert_account(account.clone()).await?;
            match tx.commit().await {
                Ok(()) => {
                    info!(account_id = %account.id, number = %account.number, "account opened");
                    return Ok(account);
                }
                Err(StoreError::Duplicate { what, key }) => {
                    debug!(attempt, what, %key, "generated account number taken");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(LedgerError::conflict(
            "Could not allocate a unique account number, please retry",
        ))
    }

    fn generate_number(&self) -> String {
        let suffix = Uuid::new_v4().as_u128() % NUMBER_SPACE;
        format!("{}{suffix:08}", self.ctx.config.account_number_prefix)
    }

    #[instrument(
        skip(self, request),
        fields(user_id = %request.user_id, account_id = %request.account_id),
        err(level = "info")
    )]
    pub async fn rename_account(&self, request: RenameAccountRequest) -> LedgerResult<Account> {
        let command = RenameAccountCommand::parse(request)?;
        let mut tx = self.ctx.store.begin().await?;
        let (account, _) = self
            .accounts
            .lock_pair(tx.as_mut(), command.account_id, None)
            .await?;
        let mut account = match account {
            Some(account) if account.user_id == command.user_id => account,
            _ => return Err(LedgerError::not_found("Account")),
        };
        let renamed = account.handle_rename(command.name)?;
        account.apply(&renamed);
        tx.update_account(account.clone()).await?;
        tx.commit().await?;
        debug!(name = %account.name, "account renamed");
        Ok(account)
    }

    /// Closes an account. A positive balance is swept into another open
    /// account of the same owner inside the same unit of work.
    #[instrument(
        skip(self, command),
        fields(
            user_id = %command.user_id,
            account_id = %command.account_id,
        ),
        err(level = "info")
    )]
    pub async fn close_account(&self, command: CloseAccountCommand) -> LedgerResult<()> {
        command.validate()?;
        let mut tx = self.ctx.store.begin().await?;
        let (account, target) = self
            .accounts
            .lock_pair(
                tx.as_mut(),
                command.account_id,
                command.transfer_to_account_id,
            )
            .await?;
        let mut account = match account {
            Some(account) if account.user_id == command.user_id => account,
            _ => return Err(LedgerError::not_found("Account")),
        };
        if account.is_closed() {
            return Err(LedgerError::conflict("Account is already closed"));
        }

        let swept = account.balance();
        if swept > Decimal::ZERO {
            if command.transfer_to_account_id.is_none() {
                return Err(LedgerError::conflict(
                    "Account has remaining balance. Please specify an account to transfer funds to.",
                ));
            }
            let mut target = match target {
                Some(target) if target.user_id == command.user_id && !target.is_closed() => {
                    target
                }
                _ => return Err(LedgerError::not_found("Target account")),
            };
            if !target.is_active() {
                return Err(LedgerError::AccountClosed);
            }
            if target.currency != account.currency {
                return Err(LedgerError::invalid_account(format!(
                    "Target account holds {}, closing account holds {}",
                    target.currency, account.currency
                )));
            }

            // Held funds belong to the account too, so available drops by its
            // own amount rather than by the swept balance.
            let available = account.available_balance();
            self.accounts
                .adjust(tx.as_mut(), &mut account, -swept, -available)
                .await?;
            self.accounts
                .adjust(tx.as_mut(), &mut target, swept, swept)
                .await?;

            let now = self.ctx.clock.now();
            let description = format!("Balance transfer on closing {}", account.number);
            for (kind, user_id, balance_after) in [
                (TransactionType::TransferOut, account.user_id, account.balance()),
                (TransactionType::TransferIn, target.user_id, target.balance()),
            ] {
                let entry = LedgerEntry {
                    id: Uuid::new_v4(),
                    user_id,
                    from_account_id: Some(account.id),
                    to_account_id: Some(target.id),
                    amount: swept,
                    currency: account.currency.clone(),
                    kind,
                    category: None,
                    description: description.clone(),
                    balance_after,
                    created_at: now,
                };
                self.ledger.record(tx.as_mut(), entry).await?;
            }
            info!(target_id = %target.id, %swept, "remaining balance swept");
        }

        let closed = account.handle_close(self.ctx.clock.now())?;
        account.apply(&closed);
        tx.update_account(account.clone()).await?;
        tx.deactivate_instruments(account.id).await?;
        tx.commit().await?;
        info!("account closed");
        Ok(())
    }
}
