use rust_decimal::Decimal;
use tracing::debug;

use super::Context;
use crate::{
    account::Account,
    error::{LedgerResult, LimitKind},
    store::StoreTransaction,
};

/// Daily usage counters on top of the account store. Works on rows the
/// caller has already locked, so the window reset, the check and the
/// increment all land in the caller's unit of work.
#[derive(Clone)]
pub struct DailyLimitTracker {
    ctx: Context,
}

impl DailyLimitTracker {
    pub(crate) fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub(crate) async fn check_and_reserve(
        &self,
        tx: &mut dyn StoreTransaction,
        account: &mut Account,
        limit: LimitKind,
        amount: Decimal,
    ) -> LedgerResult<()> {
        if let Some(reset) = account.handle_limit_reset(self.ctx.clock.today()) {
            account.apply(&reset);
        }
        let event = account.handle_limit_use(limit, amount)?;
        account.apply(&event);
        debug!(account_id = %account.id, %limit, %amount, "daily limit reserved");
        tx.update_account(account.clone()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::{
        account::tests::{funded, now},
        clock::{Clock, ManualClock},
        config::EngineConfig,
        error::LedgerError,
        store::{LedgerStore, in_memory::InMemoryStore},
    };

    async fn setup(clock: Arc<ManualClock>) -> (InMemoryStore, DailyLimitTracker, Account) {
        let store = InMemoryStore::new();
        let account = funded(dec!(1000));
        let mut tx = store.begin().await.unwrap();
        tx.insert_account(account.clone()).await.unwrap();
        tx.commit().await.unwrap();
        let tracker = DailyLimitTracker::new(Context {
            store: Arc::new(store.clone()),
            clock,
            config: Arc::new(EngineConfig::default()),
        });
        (store, tracker, account)
    }

    #[tokio::test]
    async fn rejected_reservation_stages_nothing() {
        let clock = Arc::new(ManualClock::new(now()));
        let (store, tracker, account) = setup(clock).await;

        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_account(account.id).await.unwrap().unwrap();
        tracker
            .check_and_reserve(tx.as_mut(), &mut locked, LimitKind::Transfer, dec!(95000))
            .await
            .unwrap();
        let err = tracker
            .check_and_reserve(tx.as_mut(), &mut locked, LimitKind::Transfer, dec!(10000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::LimitExceeded {
                limit: LimitKind::Transfer,
                ..
            }
        ));
        assert_eq!(locked.daily_transfer_used(), dec!(95000));
        tx.commit().await.unwrap();

        let stored = store.account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.daily_transfer_used(), dec!(95000));
    }

    #[tokio::test]
    async fn new_day_starts_from_zero() {
        let clock = Arc::new(ManualClock::new(now()));
        let (store, tracker, account) = setup(clock.clone()).await;

        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_account(account.id).await.unwrap().unwrap();
        tracker
            .check_and_reserve(tx.as_mut(), &mut locked, LimitKind::Withdrawal, dec!(50000))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        clock.advance(Duration::days(1));
        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_account(account.id).await.unwrap().unwrap();
        tracker
            .check_and_reserve(tx.as_mut(), &mut locked, LimitKind::Withdrawal, dec!(20000))
            .await
            .unwrap();
        assert_eq!(locked.daily_withdrawal_used(), dec!(20000));
        assert_eq!(locked.limit_reset_date(), clock.today());
    }
}
