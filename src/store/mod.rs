//! Storage-engine-agnostic repositories.
//!
//! [`LedgerStore`] serves committed reads and opens units of work.
//! [`StoreTransaction`] is a unit of work: `lock_account` behaves like
//! `SELECT ... FOR UPDATE` (the row stays locked until the unit commits or is
//! dropped), writes are staged and become visible together at `commit`, and
//! dropping an uncommitted unit discards everything it staged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    account::{Account, AccountId, UserId},
    ledger::{EntryFilter, LedgerEntry, Page, Pagination, TransactionId},
    transfer::{TemplateId, Transfer, TransferFilter, TransferId, TransferTemplate},
};

pub mod in_memory;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("serialization conflict: {0}")]
    SerializationConflict(String),
    #[error("duplicate {what} `{key}`")]
    Duplicate { what: &'static str, key: String },
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type InstrumentId = Uuid;

/// Card or other payment instrument bound to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInstrument {
    pub id: InstrumentId,
    pub account_id: AccountId,
    pub is_active: bool,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    async fn account(&self, id: AccountId) -> StoreResult<Option<Account>>;

    async fn account_by_number(&self, number: &str) -> StoreResult<Option<Account>>;

    /// Open accounts of `user_id`, newest first.
    async fn accounts_for_user(&self, user_id: UserId) -> StoreResult<Vec<Account>>;

    async fn entry(&self, id: TransactionId) -> StoreResult<Option<LedgerEntry>>;

    /// Matching entries in creation order.
    async fn scan_entries(&self, filter: &EntryFilter) -> StoreResult<Vec<LedgerEntry>>;

    /// Matching entries, newest first.
    async fn page_entries(
        &self,
        filter: &EntryFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<LedgerEntry>>;

    async fn transfer(&self, id: TransferId) -> StoreResult<Option<Transfer>>;

    /// Transfers visible to `user_id`, newest first.
    async fn page_transfers(
        &self,
        user_id: UserId,
        filter: &TransferFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<Transfer>>;

    async fn instruments(&self, account_id: AccountId) -> StoreResult<Vec<PaymentInstrument>>;

    async fn template(&self, id: TemplateId) -> StoreResult<Option<TransferTemplate>>;

    /// Active templates of `user_id`, newest first.
    async fn templates_for_user(&self, user_id: UserId) -> StoreResult<Vec<TransferTemplate>>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    /// Locks the row and returns its latest committed state, or the state
    /// staged by this unit when it already holds the lock.
    async fn lock_account(&mut self, id: AccountId) -> StoreResult<Option<Account>>;

    async fn insert_account(&mut self, account: Account) -> StoreResult<()>;

    /// Stages a new state for an account this unit has locked.
    async fn update_account(&mut self, account: Account) -> StoreResult<()>;

    async fn append_entry(&mut self, entry: LedgerEntry) -> StoreResult<()>;

    async fn save_transfer(&mut self, transfer: Transfer) -> StoreResult<()>;

    async fn deactivate_instruments(&mut self, account_id: AccountId) -> StoreResult<()>;

    /// Inserts or replaces a template.
    async fn save_template(&mut self, template: TransferTemplate) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
