use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    Context, accounts::AccountStore, history::TransactionLedger, limits::DailyLimitTracker,
};
use crate::{
    command::{CashAction, CashCommand, CashRequest},
    error::{LedgerError, LedgerResult, LimitKind},
    ledger::{LedgerEntry, TransactionType},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashReceipt {
    pub entry: LedgerEntry,
    pub new_balance: Decimal,
}

/// Single-account money movement: deposits and withdrawals.
#[derive(Clone)]
pub struct CashDesk {
    ctx: Context,
    accounts: AccountStore,
    limits: DailyLimitTracker,
    ledger: TransactionLedger,
}

impl CashDesk {
    pub(crate) fn new(
        ctx: Context,
        accounts: AccountStore,
        limits: DailyLimitTracker,
        ledger: TransactionLedger,
    ) -> Self {
        Self {
            ctx,
            accounts,
            limits,
            ledger,
        }
    }

    #[instrument(
        skip(self, request),
        fields(
            user_id = %request.user_id,
            account_id = %request.account_id,
            amount = %request.amount
        ),
        err(level = "info")
    )]
    pub(crate) async fn execute(
        &self,
        action: CashAction,
        request: CashRequest,
    ) -> LedgerResult<CashReceipt> {
        let command = CashCommand::parse(action, request)?;
        let mut tx = self.ctx.store.begin().await?;
        let (account, _) = self
            .accounts
            .lock_pair(tx.as_mut(), command.account_id, None)
            .await?;
        let mut account = match account {
            Some(account) if account.user_id == command.user_id && !account.is_closed() => {
                account
            }
            _ => return Err(LedgerError::not_found("Account")),
        };

        let amount = command.amount;
        let (kind, from, to, default_description) = match command.action {
            CashAction::Deposit => {
                self.accounts
                    .adjust(tx.as_mut(), &mut account, amount, amount)
                    .await?;
                (TransactionType::Deposit, None, Some(account.id), "Deposit")
            }
            CashAction::Withdraw => {
                if !account.is_active() {
                    return Err(LedgerError::AccountClosed);
                }
                if account.available_balance() < amount {
                    return Err(LedgerError::InsufficientFunds);
                }
                self.limits
                    .check_and_reserve(tx.as_mut(), &mut account, LimitKind::Withdrawal, amount)
                    .await?;
                self.accounts
                    .adjust(tx.as_mut(), &mut account, -amount, -amount)
                    .await?;
                (TransactionType::Withdrawal, Some(account.id), None, "Withdrawal")
            }
        };

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            user_id: command.user_id,
            from_account_id: from,
            to_account_id: to,
            amount,
            currency: account.currency.clone(),
            kind,
            category: command.category,
            description: command
                .description
                .unwrap_or_else(|| default_description.to_string()),
            balance_after: account.balance(),
            created_at: self.ctx.clock.now(),
        };
        self.ledger.record(tx.as_mut(), entry.clone()).await?;
        tx.commit().await?;

        info!(transaction_id = %entry.id, kind = %entry.kind, "cash operation recorded");
        Ok(CashReceipt {
            entry,
            new_balance: account.balance(),
        })
    }
}
