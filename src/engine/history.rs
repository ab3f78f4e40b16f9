use rust_decimal::Decimal;
use tracing::{instrument, warn};

use super::Context;
use crate::{
    account::{Account, AccountId, UserId},
    error::{LedgerError, LedgerResult},
    ledger::{
        self, EntryFilter, FlowTotals, GroupBy, GroupTotal, LedgerEntry, Page, Pagination,
        Summary, SummaryPeriod, TransactionId,
    },
    store::StoreTransaction,
};

/// A page of entries plus income/expense totals over the whole filtered set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionList {
    pub page: Page<LedgerEntry>,
    pub totals: FlowTotals,
}

/// Append-only ledger: `record` inside a unit of work, everything else reads
/// committed entries.
#[derive(Clone)]
pub struct TransactionLedger {
    ctx: Context,
}

impl TransactionLedger {
    pub(crate) fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub(crate) async fn record(
        &self,
        tx: &mut dyn StoreTransaction,
        entry: LedgerEntry,
    ) -> LedgerResult<()> {
        if entry.amount <= Decimal::ZERO {
            return Err(LedgerError::Internal(format!(
                "ledger entry {} has non-positive amount {}",
                entry.id, entry.amount
            )));
        }
        if entry.affected_account().is_none() {
            return Err(LedgerError::Internal(format!(
                "ledger entry {} does not reference the account it affects",
                entry.id
            )));
        }
        tx.append_entry(entry).await?;
        Ok(())
    }

    /// Entries that moved `account_id`, newest first.
    pub async fn list_for_account(
        &self,
        account_id: AccountId,
        pagination: Pagination,
    ) -> LedgerResult<Page<LedgerEntry>> {
        let filter = EntryFilter::for_account(account_id);
        let pagination = self.ctx.pagination(pagination);
        self.ctx
            .read("page_entries", || {
                self.ctx.store.page_entries(&filter, pagination)
            })
            .await
    }

    #[instrument(skip(self, filter), err(level = "debug"))]
    pub async fn list_for_user(
        &self,
        user_id: UserId,
        filter: EntryFilter,
        pagination: Pagination,
    ) -> LedgerResult<TransactionList> {
        let filter = EntryFilter {
            user_id: Some(user_id),
            ..filter
        };
        let pagination = self.ctx.pagination(pagination);
        let page = self
            .ctx
            .read("page_entries", || {
                self.ctx.store.page_entries(&filter, pagination)
            })
            .await?;
        let all = self
            .ctx
            .read("scan_entries", || self.ctx.store.scan_entries(&filter))
            .await?;
        Ok(TransactionList {
            page,
            totals: FlowTotals::of(&all),
        })
    }

    pub async fn get(&self, user_id: UserId, transaction_id: TransactionId) -> LedgerResult<LedgerEntry> {
        self.ctx
            .read("entry", || self.ctx.store.entry(transaction_id))
            .await?
            .filter(|entry| entry.user_id == user_id)
            .ok_or(LedgerError::not_found("Transaction"))
    }

    pub async fn aggregate(
        &self,
        user_id: UserId,
        filter: EntryFilter,
        group_by: GroupBy,
    ) -> LedgerResult<Vec<GroupTotal>> {
        let filter = EntryFilter {
            user_id: Some(user_id),
            ..filter
        };
        let entries = self
            .ctx
            .read("scan_entries", || self.ctx.store.scan_entries(&filter))
            .await?;
        Ok(ledger::aggregate(&entries, group_by))
    }

    #[instrument(skip(self), err(level = "debug"))]
    pub async fn summary(&self, user_id: UserId, period: SummaryPeriod) -> LedgerResult<Summary> {
        let filter = EntryFilter {
            user_id: Some(user_id),
            from: Some(period.start(self.ctx.clock.now())),
            ..Default::default()
        };
        let entries = self
            .ctx
            .read("scan_entries", || self.ctx.store.scan_entries(&filter))
            .await?;
        Ok(Summary::build(period, &entries))
    }

    /// Balance obtained by replaying every entry that moved the account.
    pub async fn replay_balance(&self, account_id: AccountId) -> LedgerResult<Decimal> {
        let filter = EntryFilter::for_account(account_id);
        let entries = self
            .ctx
            .read("scan_entries", || self.ctx.store.scan_entries(&filter))
            .await?;
        Ok(ledger::replay_balance(account_id, &entries))
    }

    pub async fn verify_balance(&self, account: &Account) -> LedgerResult<Decimal> {
        let replayed = self.replay_balance(account.id).await?;
        if replayed != account.balance() {
            warn!(
                account_id = %account.id,
                stored = %account.balance(),
                %replayed,
                "ledger does not reproduce stored balance"
            );
            return Err(LedgerError::Integrity(format!(
                "account {} holds {} but its ledger adds up to {}",
                account.id,
                account.balance(),
                replayed
            )));
        }
        Ok(replayed)
    }
}
