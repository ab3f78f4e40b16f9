use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::{
    account::{Account, AccountId, UserId},
    ledger::{EntryFilter, LedgerEntry, Page, Pagination, TransactionId},
    transfer::{TemplateId, Transfer, TransferFilter, TransferId, TransferTemplate},
};

use super::{
    InstrumentId, LedgerStore, PaymentInstrument, StoreError, StoreResult, StoreTransaction,
};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    numbers: HashMap<String, AccountId>,
    entries: Vec<LedgerEntry>,
    entry_index: HashMap<TransactionId, usize>,
    transfers: Vec<Transfer>,
    transfer_index: HashMap<TransferId, usize>,
    instruments: HashMap<AccountId, Vec<PaymentInstrument>>,
    templates: HashMap<TemplateId, TransferTemplate>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<AccountId, Arc<RowLock<()>>>>,
}

impl Shared {
    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn row_lock(&self, id: AccountId) -> StoreResult<Arc<RowLock<()>>> {
        let mut locks = self
            .row_locks
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(locks.entry(id).or_default().clone())
    }

    /// Forgets the row lock of `id` once no unit holds or waits on it.
    fn release_row(&self, id: AccountId) {
        let Ok(mut locks) = self.row_locks.lock() else {
            return;
        };
        if locks.get(&id).is_some_and(|row| Arc::strong_count(row) == 1) {
            locks.remove(&id);
        }
    }
}

/// Row locks held by one unit of work, released together on commit or drop.
struct RowGuards {
    shared: Arc<Shared>,
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
}

impl Drop for RowGuards {
    fn drop(&mut self) {
        for (id, guard) in self.held.drain() {
            drop(guard);
            self.shared.release_row(id);
        }
    }
}

/// In-process store with per-account row locks.
///
/// Committed state sits behind one `RwLock` that is only held for the
/// duration of a read or of applying a commit, never across an `.await`.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an active instrument to an account. Issuing cards is not part of
    /// the ledger, so this exists for seeding.
    pub fn attach_instrument(&self, account_id: AccountId) -> StoreResult<InstrumentId> {
        let id = Uuid::new_v4();
        self.shared
            .write()?
            .instruments
            .entry(account_id)
            .or_default()
            .push(PaymentInstrument {
                id,
                account_id,
                is_active: true,
            });
        Ok(id)
    }

    pub fn all_accounts(&self) -> StoreResult<Vec<Account>> {
        Ok(self.shared.read()?.accounts.values().cloned().collect())
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(InMemoryTransaction::new(self.shared.clone())))
    }

    async fn account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.shared.read()?.accounts.get(&id).cloned())
    }

    async fn account_by_number(&self, number: &str) -> StoreResult<Option<Account>> {
        let tables = self.shared.read()?;
        Ok(tables
            .numbers
            .get(number)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    async fn accounts_for_user(&self, user_id: UserId) -> StoreResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .shared
            .read()?
            .accounts
            .values()
            .filter(|acc| acc.user_id == user_id && !acc.is_closed())
            .cloned()
            .collect();
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(accounts)
    }

    async fn entry(&self, id: TransactionId) -> StoreResult<Option<LedgerEntry>> {
        let tables = self.shared.read()?;
        Ok(tables
            .entry_index
            .get(&id)
            .and_then(|idx| tables.entries.get(*idx))
            .cloned())
    }

    async fn scan_entries(&self, filter: &EntryFilter) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self
            .shared
            .read()?
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn page_entries(
        &self,
        filter: &EntryFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<LedgerEntry>> {
        let newest_first: Vec<LedgerEntry> = self
            .shared
            .read()?
            .entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        Ok(Page::slice(newest_first, pagination))
    }

    async fn transfer(&self, id: TransferId) -> StoreResult<Option<Transfer>> {
        let tables = self.shared.read()?;
        Ok(tables
            .transfer_index
            .get(&id)
            .and_then(|idx| tables.transfers.get(*idx))
            .cloned())
    }

    async fn page_transfers(
        &self,
        user_id: UserId,
        filter: &TransferFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<Transfer>> {
        let newest_first: Vec<Transfer> = self
            .shared
            .read()?
            .transfers
            .iter()
            .rev()
            .filter(|t| filter.matches(user_id, t))
            .cloned()
            .collect();
        Ok(Page::slice(newest_first, pagination))
    }

    async fn instruments(&self, account_id: AccountId) -> StoreResult<Vec<PaymentInstrument>> {
        Ok(self
            .shared
            .read()?
            .instruments
            .get(&account_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn template(&self, id: TemplateId) -> StoreResult<Option<TransferTemplate>> {
        Ok(self.shared.read()?.templates.get(&id).cloned())
    }

    async fn templates_for_user(&self, user_id: UserId) -> StoreResult<Vec<TransferTemplate>> {
        let mut templates: Vec<TransferTemplate> = self
            .shared
            .read()?
            .templates
            .values()
            .filter(|t| t.user_id == user_id && t.is_active())
            .cloned()
            .collect();
        templates.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(templates)
    }
}

pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    guards: RowGuards,
    locked: HashMap<AccountId, Account>,
    dirty: HashSet<AccountId>,
    inserted: Vec<Account>,
    entries: Vec<LedgerEntry>,
    transfers: Vec<Transfer>,
    templates: Vec<TransferTemplate>,
    deactivated: Vec<AccountId>,
}

impl InMemoryTransaction {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            guards: RowGuards {
                shared: shared.clone(),
                held: HashMap::new(),
            },
            shared,
            locked: HashMap::new(),
            dirty: HashSet::new(),
            inserted: Vec::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
            templates: Vec::new(),
            deactivated: Vec::new(),
        }
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        if let Some(staged) = self.locked.get(&id) {
            return Ok(Some(staged.clone()));
        }
        let row = self.shared.row_lock(id)?;
        let guard = row.lock_owned().await;
        // read after the lock is held so the state cannot be stale
        let committed = {
            let tables = self.shared.read()?;
            tables.accounts.get(&id).cloned()
        };
        let Some(account) = committed else {
            drop(guard);
            self.shared.release_row(id);
            return Ok(None);
        };
        self.guards.held.insert(id, guard);
        self.locked.insert(id, account.clone());
        Ok(Some(account))
    }

    async fn insert_account(&mut self, account: Account) -> StoreResult<()> {
        self.inserted.push(account);
        Ok(())
    }

    async fn update_account(&mut self, account: Account) -> StoreResult<()> {
        let Some(staged) = self.locked.get_mut(&account.id) else {
            return Err(StoreError::Corrupt(format!(
                "account {} updated without holding its row lock",
                account.id
            )));
        };
        *staged = account;
        self.dirty.insert(staged.id);
        Ok(())
    }

    async fn append_entry(&mut self, entry: LedgerEntry) -> StoreResult<()> {
        self.entries.push(entry);
        Ok(())
    }

    async fn save_transfer(&mut self, transfer: Transfer) -> StoreResult<()> {
        self.transfers.push(transfer);
        Ok(())
    }

    async fn deactivate_instruments(&mut self, account_id: AccountId) -> StoreResult<()> {
        self.deactivated.push(account_id);
        Ok(())
    }

    async fn save_template(&mut self, template: TransferTemplate) -> StoreResult<()> {
        self.templates.push(template);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        let mut tables = this.shared.write()?;

        // check everything before touching anything
        let mut new_numbers = HashSet::new();
        for account in &this.inserted {
            if tables.accounts.contains_key(&account.id) {
                return Err(StoreError::Duplicate {
                    what: "account id",
                    key: account.id.to_string(),
                });
            }
            if tables.numbers.contains_key(&account.number)
                || !new_numbers.insert(account.number.clone())
            {
                return Err(StoreError::Duplicate {
                    what: "account number",
                    key: account.number.clone(),
                });
            }
        }
        let mut new_entries = HashSet::new();
        for entry in &this.entries {
            if tables.entry_index.contains_key(&entry.id) || !new_entries.insert(entry.id) {
                return Err(StoreError::Duplicate {
                    what: "transaction id",
                    key: entry.id.to_string(),
                });
            }
        }

        for account in this.inserted {
            tables.numbers.insert(account.number.clone(), account.id);
            tables.accounts.insert(account.id, account);
        }
        for (id, account) in this.locked {
            if this.dirty.contains(&id) {
                tables.accounts.insert(id, account);
            }
        }
        let entry_count = this.entries.len();
        for entry in this.entries {
            let idx = tables.entries.len();
            tables.entry_index.insert(entry.id, idx);
            tables.entries.push(entry);
        }
        for transfer in this.transfers {
            let existing = tables.transfer_index.get(&transfer.id).copied();
            match existing {
                Some(idx) => {
                    tables.transfers[idx] = transfer;
                }
                None => {
                    let idx = tables.transfers.len();
                    tables.transfer_index.insert(transfer.id, idx);
                    tables.transfers.push(transfer);
                }
            }
        }
        for template in this.templates {
            tables.templates.insert(template.id, template);
        }
        for account_id in this.deactivated {
            if let Some(instruments) = tables.instruments.get_mut(&account_id) {
                instruments.iter_mut().for_each(|i| i.is_active = false);
            }
        }
        debug!(
            accounts = this.dirty.len(),
            entries = entry_count,
            "unit of work committed"
        );
        // row guards are released when `this.guards` drops, after the write above
        drop(tables);
        drop(this.guards);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::{
        account::{AccountKind, NewAccount},
        ledger::TransactionType,
    };

    fn new_account(number: &str) -> Account {
        Account::open(
            NewAccount {
                user_id: Uuid::new_v4(),
                number: number.to_string(),
                name: "Main".to_string(),
                kind: AccountKind::Debit,
                currency: "RUB".to_string(),
                credit_limit: Decimal::ZERO,
                daily_transfer_limit: dec!(1000),
                daily_withdrawal_limit: dec!(1000),
            },
            Utc::now(),
        )
    }

    async fn seeded(store: &InMemoryStore, number: &str) -> Account {
        let account = new_account(number);
        let mut tx = store.begin().await.unwrap();
        tx.insert_account(account.clone()).await.unwrap();
        tx.commit().await.unwrap();
        account
    }

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let store = InMemoryStore::new();
        let account = seeded(&store, "100").await;

        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_account(account.id).await.unwrap().unwrap();
        let evt = locked.handle_adjustment(dec!(50), dec!(50)).unwrap();
        locked.apply(&evt);
        tx.update_account(locked).await.unwrap();
        assert_eq!(
            store.account(account.id).await.unwrap().unwrap().balance(),
            Decimal::ZERO
        );
        // staged copy is what this unit sees
        assert_eq!(
            tx.lock_account(account.id).await.unwrap().unwrap().balance(),
            dec!(50)
        );
        tx.commit().await.unwrap();
        assert_eq!(
            store.account(account.id).await.unwrap().unwrap().balance(),
            dec!(50)
        );
    }

    #[tokio::test]
    async fn dropped_unit_rolls_back_and_releases_lock() {
        let store = InMemoryStore::new();
        let account = seeded(&store, "100").await;
        {
            let mut tx = store.begin().await.unwrap();
            let mut locked = tx.lock_account(account.id).await.unwrap().unwrap();
            let evt = locked.handle_adjustment(dec!(50), dec!(50)).unwrap();
            locked.apply(&evt);
            tx.update_account(locked).await.unwrap();
        }
        let mut tx = store.begin().await.unwrap();
        let locked = tokio::time::timeout(Duration::from_secs(1), tx.lock_account(account.id))
            .await
            .expect("row lock must be free after rollback")
            .unwrap()
            .unwrap();
        assert_eq!(locked.balance(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn row_lock_blocks_second_writer() {
        let store = InMemoryStore::new();
        let account = seeded(&store, "100").await;

        let mut first = store.begin().await.unwrap();
        first.lock_account(account.id).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), second.lock_account(account.id)).await;
        assert!(blocked.is_err());

        first.commit().await.unwrap();
        assert!(second.lock_account(account.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_account_number_rejects_whole_unit() {
        let store = InMemoryStore::new();
        seeded(&store, "100").await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_account(new_account("200")).await.unwrap();
        tx.insert_account(new_account("100")).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Duplicate {
                what: "account number",
                ..
            }
        ));
        assert!(store.account_by_number("200").await.unwrap().is_none());
    }

    fn row_lock_count(store: &InMemoryStore) -> usize {
        store.shared.row_locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn row_locks_are_forgotten_once_released() {
        let store = InMemoryStore::new();
        let account = seeded(&store, "100").await;

        let mut tx = store.begin().await.unwrap();
        for _ in 0..1000 {
            assert!(tx.lock_account(Uuid::new_v4()).await.unwrap().is_none());
        }
        assert_eq!(row_lock_count(&store), 0);
        tx.lock_account(account.id).await.unwrap();
        assert_eq!(row_lock_count(&store), 1);
        tx.commit().await.unwrap();
        assert_eq!(row_lock_count(&store), 0);

        let mut tx = store.begin().await.unwrap();
        tx.lock_account(account.id).await.unwrap();
        drop(tx);
        assert_eq!(row_lock_count(&store), 0);
    }

    #[tokio::test]
    async fn waiting_writer_keeps_the_row_lock_alive() {
        let store = InMemoryStore::new();
        let account = seeded(&store, "100").await;

        let mut first = store.begin().await.unwrap();
        first.lock_account(account.id).await.unwrap();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut second = store.begin().await.unwrap();
                let locked = second.lock_account(account.id).await.unwrap();
                (second, locked)
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);

        let (second, locked) = waiter.await.unwrap();
        assert!(locked.is_some());
        assert_eq!(row_lock_count(&store), 1);
        drop(second);
        assert_eq!(row_lock_count(&store), 0);
    }

    fn entry(id: TransactionId, account_id: AccountId) -> LedgerEntry {
        LedgerEntry {
            id,
            user_id: Uuid::new_v4(),
            from_account_id: None,
            to_account_id: Some(account_id),
            amount: dec!(10),
            currency: "RUB".to_string(),
            kind: TransactionType::Deposit,
            category: None,
            description: "Deposit".to_string(),
            balance_after: dec!(10),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_entry_id_rejects_whole_unit() {
        let store = InMemoryStore::new();
        let account = seeded(&store, "100").await;
        let first = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.append_entry(entry(first, account.id)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.entry(first).await.unwrap().map(|e| e.id), Some(first));

        let second = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        tx.append_entry(entry(second, account.id)).await.unwrap();
        tx.append_entry(entry(first, account.id)).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Duplicate {
                what: "transaction id",
                ..
            }
        ));
        assert!(store.entry(second).await.unwrap().is_none());

        // the same id twice within one unit is caught as well
        let mut tx = store.begin().await.unwrap();
        tx.append_entry(entry(second, account.id)).await.unwrap();
        tx.append_entry(entry(second, account.id)).await.unwrap();
        assert!(tx.commit().await.is_err());
    }

    #[tokio::test]
    async fn unlocked_update_is_refused() {
        let store = InMemoryStore::new();
        let account = seeded(&store, "100").await;
        let mut tx = store.begin().await.unwrap();
        let err = tx.update_account(account).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
