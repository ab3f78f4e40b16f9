#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ledger_engine::{
    account::{Account, AccountId, AccountKind, UserId},
    clock::ManualClock,
    command::{CashRequest, OpenAccountRequest, TransferRequest},
    config::EngineConfig,
    engine::Engine,
    ledger::{EntryFilter, LedgerEntry, Page, Pagination, TransactionId},
    store::{
        LedgerStore, PaymentInstrument, StoreError, StoreResult, StoreTransaction,
        in_memory::InMemoryStore,
    },
    transfer::{TemplateId, Transfer, TransferFilter, TransferId, TransferTemplate},
};
use rust_decimal::Decimal;
use uuid::Uuid;

pub struct Harness {
    pub engine: Engine,
    pub store: InMemoryStore,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(|store| Arc::new(store) as Arc<dyn LedgerStore>)
}

pub fn harness_with(wrap: impl FnOnce(InMemoryStore) -> Arc<dyn LedgerStore>) -> Harness {
    let store = InMemoryStore::new();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 14, 10, 0, 0).unwrap(),
    ));
    let engine = Engine::new(wrap(store.clone()), clock.clone(), EngineConfig::default());
    Harness {
        engine,
        store,
        clock,
    }
}

impl Harness {
    pub async fn open(&self, user_id: UserId, kind: AccountKind) -> Account {
        self.engine
            .open_account(OpenAccountRequest {
                user_id,
                kind,
                currency: "RUB".to_string(),
                name: None,
                credit_limit: None,
            })
            .await
            .unwrap()
    }

    pub async fn funded(&self, user_id: UserId, amount: Decimal) -> Account {
        let account = self.open(user_id, AccountKind::Debit).await;
        self.engine
            .deposit(CashRequest {
                user_id,
                account_id: account.id,
                amount,
                category: Some("salary".to_string()),
                description: None,
            })
            .await
            .unwrap();
        self.account(account.id).await
    }

    pub async fn account(&self, account_id: AccountId) -> Account {
        self.engine.accounts().get_account(account_id).await.unwrap()
    }

    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.store
            .scan_entries(&EntryFilter::default())
            .await
            .unwrap()
    }

    pub async fn total_balance(&self) -> Decimal {
        self.store
            .all_accounts()
            .unwrap()
            .iter()
            .map(Account::balance)
            .sum()
    }
}

pub fn transfer(from: &Account, to_number: &str, amount: Decimal) -> TransferRequest {
    TransferRequest {
        user_id: from.user_id,
        from_account_id: from.id,
        to_account_number: to_number.to_string(),
        amount,
        currency: from.currency.clone(),
        description: None,
        recipient_name: None,
    }
}

/// Store whose units of work refuse to stage an update for one account,
/// simulating a storage failure halfway through a multi-row write.
pub struct FailingStore {
    inner: InMemoryStore,
    fail_update_of: Mutex<Option<AccountId>>,
}

impl FailingStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            fail_update_of: Mutex::new(None),
        }
    }

    pub fn fail_updates_of(&self, account_id: AccountId) {
        *self.fail_update_of.lock().unwrap() = Some(account_id);
    }
}

struct FailingTransaction {
    inner: Box<dyn StoreTransaction>,
    fail_update_of: Option<AccountId>,
}

#[async_trait]
impl LedgerStore for FailingStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let fail_update_of = *self.fail_update_of.lock().unwrap();
        Ok(Box::new(FailingTransaction {
            inner: self.inner.begin().await?,
            fail_update_of,
        }))
    }

    async fn account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        self.inner.account(id).await
    }

    async fn account_by_number(&self, number: &str) -> StoreResult<Option<Account>> {
        self.inner.account_by_number(number).await
    }

    async fn accounts_for_user(&self, user_id: UserId) -> StoreResult<Vec<Account>> {
        self.inner.accounts_for_user(user_id).await
    }

    async fn entry(&self, id: TransactionId) -> StoreResult<Option<LedgerEntry>> {
        self.inner.entry(id).await
    }

    async fn scan_entries(&self, filter: &EntryFilter) -> StoreResult<Vec<LedgerEntry>> {
        self.inner.scan_entries(filter).await
    }

    async fn page_entries(
        &self,
        filter: &EntryFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<LedgerEntry>> {
        self.inner.page_entries(filter, pagination).await
    }

    async fn transfer(&self, id: TransferId) -> StoreResult<Option<Transfer>> {
        self.inner.transfer(id).await
    }

    async fn page_transfers(
        &self,
        user_id: UserId,
        filter: &TransferFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<Transfer>> {
        self.inner.page_transfers(user_id, filter, pagination).await
    }

    async fn instruments(&self, account_id: AccountId) -> StoreResult<Vec<PaymentInstrument>> {
        self.inner.instruments(account_id).await
    }

    async fn template(&self, id: TemplateId) -> StoreResult<Option<TransferTemplate>> {
        self.inner.template(id).await
    }

    async fn templates_for_user(&self, user_id: UserId) -> StoreResult<Vec<TransferTemplate>> {
        self.inner.templates_for_user(user_id).await
    }
}

#[async_trait]
impl StoreTransaction for FailingTransaction {
    async fn lock_account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        self.inner.lock_account(id).await
    }

    async fn insert_account(&mut self, account: Account) -> StoreResult<()> {
        self.inner.insert_account(account).await
    }

    async fn update_account(&mut self, account: Account) -> StoreResult<()> {
        if self.fail_update_of == Some(account.id) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        self.inner.update_account(account).await
    }

    async fn append_entry(&mut self, entry: LedgerEntry) -> StoreResult<()> {
        self.inner.append_entry(entry).await
    }

    async fn save_transfer(&mut self, transfer: Transfer) -> StoreResult<()> {
        self.inner.save_transfer(transfer).await
    }

    async fn deactivate_instruments(&mut self, account_id: AccountId) -> StoreResult<()> {
        self.inner.deactivate_instruments(account_id).await
    }

    async fn save_template(&mut self, template: TransferTemplate) -> StoreResult<()> {
        self.inner.save_template(template).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.inner.commit().await
    }
}

pub fn user() -> UserId {
    Uuid::new_v4()
}
