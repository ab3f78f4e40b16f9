use rust_decimal::Decimal;
use tracing::{debug, instrument};

use super::Context;
use crate::{
    account::{Account, AccountFilter, AccountId, UserId},
    command::AccountNumber,
    error::{LedgerError, LedgerResult},
    store::StoreTransaction,
};

/// Owns account balance and limit state. Every write goes through a locked
/// row inside a unit of work.
#[derive(Clone)]
pub struct AccountStore {
    ctx: Context,
}

impl AccountStore {
    pub(crate) fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn get_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        self.ctx
            .read("account", || self.ctx.store.account(account_id))
            .await?
            .ok_or(LedgerError::not_found("Account"))
    }

    /// Someone else's account is reported exactly like a missing one.
    pub async fn get_owned_account(
        &self,
        user_id: UserId,
        account_id: AccountId,
    ) -> LedgerResult<Account> {
        match self.get_account(account_id).await {
            Ok(account) if account.user_id == user_id => Ok(account),
            Ok(_) => Err(LedgerError::not_found("Account")),
            Err(err) => Err(err),
        }
    }

    /// Resolves a typed account number. Malformed input is an error; a
    /// well-formed number nobody here owns is `Ok(None)` (external account).
    pub async fn get_account_by_number(&self, number: &str) -> LedgerResult<Option<Account>> {
        let number = AccountNumber::parse(number)?;
        self.ctx
            .read("account_by_number", || {
                self.ctx.store.account_by_number(number.as_str())
            })
            .await
    }

    /// Open accounts of `user_id`, newest first.
    pub async fn list_for_user(
        &self,
        user_id: UserId,
        filter: &AccountFilter,
    ) -> LedgerResult<Vec<Account>> {
        let mut accounts = self
            .ctx
            .read("accounts_for_user", || self.ctx.store.accounts_for_user(user_id))
            .await?;
        accounts.retain(|account| filter.matches(account));
        Ok(accounts)
    }

    /// Locks up to two rows in ascending id order so that units touching
    /// the same pair can never deadlock. A repeated id is locked once.
    pub(crate) async fn lock_pair(
        &self,
        tx: &mut dyn StoreTransaction,
        first: AccountId,
        second: Option<AccountId>,
    ) -> LedgerResult<(Option<Account>, Option<Account>)> {
        match second {
            None => Ok((tx.lock_account(first).await?, None)),
            Some(second) if second == first => Ok((tx.lock_account(first).await?, None)),
            Some(second) if first < second => {
                let a = tx.lock_account(first).await?;
                let b = tx.lock_account(second).await?;
                Ok((a, b))
            }
            Some(second) => {
                let b = tx.lock_account(second).await?;
                let a = tx.lock_account(first).await?;
                Ok((a, b))
            }
        }
    }

    /// The only writer of balance fields. Validates and applies a signed
    /// adjustment to a locked row, then stages the new state; the caller
    /// records the matching ledger entry in the same unit.
    pub(crate) async fn adjust(
        &self,
        tx: &mut dyn StoreTransaction,
        account: &mut Account,
        delta: Decimal,
        delta_available: Decimal,
    ) -> LedgerResult<()> {
        let event = account.handle_adjustment(delta, delta_available)?;
        account.apply(&event);
        tx.update_account(account.clone()).await?;
        Ok(())
    }

    /// Rolls the daily window of a locked row forward. Returns whether the
    /// counters were reset.
    pub(crate) async fn roll_limit_window(
        &self,
        tx: &mut dyn StoreTransaction,
        account: &mut Account,
    ) -> LedgerResult<bool> {
        let today = self.ctx.clock.today();
        let Some(event) = account.handle_limit_reset(today) else {
            return Ok(false);
        };
        debug!(account_id = %account.id, %today, "daily counters reset");
        account.apply(&event);
        tx.update_account(account.clone()).await?;
        Ok(true)
    }

    /// Idempotent: a second call on the same date changes nothing.
    #[instrument(skip(self), err(level = "debug"))]
    pub async fn reset_daily_limits_if_needed(&self, account_id: AccountId) -> LedgerResult<Account> {
        let mut tx = self.ctx.store.begin().await?;
        let mut account = tx
            .lock_account(account_id)
            .await?
            .ok_or(LedgerError::not_found("Account"))?;
        if self.roll_limit_window(tx.as_mut(), &mut account).await? {
            tx.commit().await?;
        }
        Ok(account)
    }
}
