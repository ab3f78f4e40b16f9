use std::{future::Future, sync::Arc};

use rust_decimal::Decimal;
use tracing::warn;

use crate::{
    account::{Account, AccountFilter, AccountId, UserId},
    clock::Clock,
    command::{
        CashAction, CashRequest, CloseAccountCommand, OpenAccountRequest, RenameAccountRequest,
        TemplateRequest, TransferRequest,
    },
    config::EngineConfig,
    error::LedgerResult,
    ledger::{
        EntryFilter, GroupBy, GroupTotal, LedgerEntry, Page, Pagination, Summary, SummaryPeriod,
        TransactionId,
    },
    store::{LedgerStore, StoreError, StoreResult},
    transfer::{TemplateId, Transfer, TransferFilter, TransferId, TransferTemplate},
};

pub mod accounts;
pub mod cash;
pub mod history;
pub mod lifecycle;
pub mod limits;
pub mod templates;
pub mod transfers;

use accounts::AccountStore;
use cash::{CashDesk, CashReceipt};
use history::{TransactionLedger, TransactionList};
use lifecycle::AccountLifecycle;
use limits::DailyLimitTracker;
use templates::TransferTemplates;
use transfers::{TransferOrchestrator, TransferReceipt};

/// Injected handles shared by every component.
#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) store: Arc<dyn LedgerStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: Arc<EngineConfig>,
}

impl Context {
    /// Runs an idempotent read, retrying once if storage was unreachable.
    pub(crate) async fn read<T, F, Fut>(&self, what: &'static str, op: F) -> LedgerResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        match op().await {
            Err(StoreError::Unavailable(reason)) => {
                warn!(what, %reason, "storage read failed, retrying once");
                Ok(op().await?)
            }
            other => Ok(other?),
        }
    }

    pub(crate) fn pagination(&self, pagination: Pagination) -> Pagination {
        pagination.clamp(self.config.default_page_size, self.config.max_page_size)
    }
}

/// Entry point for the application layer. Owns one instance of each
/// component, all sharing the same store, clock and configuration.
pub struct Engine {
    accounts: AccountStore,
    ledger: TransactionLedger,
    transfers: TransferOrchestrator,
    cash: CashDesk,
    lifecycle: AccountLifecycle,
    templates: TransferTemplates,
}

impl Engine {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let ctx = Context {
            store,
            clock,
            config: Arc::new(config),
        };
        let accounts = AccountStore::new(ctx.clone());
        let limits = DailyLimitTracker::new(ctx.clone());
        let ledger = TransactionLedger::new(ctx.clone());
        Self {
            transfers: TransferOrchestrator::new(
                ctx.clone(),
                accounts.clone(),
                limits.clone(),
                ledger.clone(),
            ),
            cash: CashDesk::new(ctx.clone(), accounts.clone(), limits, ledger.clone()),
            templates: TransferTemplates::new(ctx.clone()),
            lifecycle: AccountLifecycle::new(ctx, accounts.clone(), ledger.clone()),
            accounts,
            ledger,
        }
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    pub async fn create_transfer(&self, request: TransferRequest) -> LedgerResult<TransferReceipt> {
        self.transfers.create_transfer(request).await
    }

    pub async fn close_account(
        &self,
        user_id: UserId,
        account_id: AccountId,
        transfer_to_account_id: Option<AccountId>,
    ) -> LedgerResult<()> {
        self.lifecycle
            .close_account(CloseAccountCommand {
                user_id,
                account_id,
                transfer_to_account_id,
            })
            .await
    }

    pub async fn open_account(&self, request: OpenAccountRequest) -> LedgerResult<Account> {
        self.lifecycle.open_account(request).await
    }

    pub async fn deposit(&self, request: CashRequest) -> LedgerResult<CashReceipt> {
        self.cash.execute(CashAction::Deposit, request).await
    }

    pub async fn withdraw(&self, request: CashRequest) -> LedgerResult<CashReceipt> {
        self.cash.execute(CashAction::Withdraw, request).await
    }

    pub async fn get_account(&self, user_id: UserId, account_id: AccountId) -> LedgerResult<Account> {
        self.accounts.get_owned_account(user_id, account_id).await
    }

    pub async fn list_accounts(
        &self,
        user_id: UserId,
        filter: AccountFilter,
    ) -> LedgerResult<Vec<Account>> {
        self.accounts.list_for_user(user_id, &filter).await
    }

    pub async fn rename_account(&self, request: RenameAccountRequest) -> LedgerResult<Account> {
        self.lifecycle.rename_account(request).await
    }

    pub async fn list_account_transactions(
        &self,
        user_id: UserId,
        account_id: AccountId,
        limit: u32,
        offset: u32,
    ) -> LedgerResult<Page<LedgerEntry>> {
        self.accounts.get_owned_account(user_id, account_id).await?;
        self.ledger
            .list_for_account(account_id, Pagination::new(limit, offset))
            .await
    }

    pub async fn list_transactions(
        &self,
        user_id: UserId,
        filter: EntryFilter,
        pagination: Pagination,
    ) -> LedgerResult<TransactionList> {
        if let Some(account_id) = filter.account_id {
            self.accounts.get_owned_account(user_id, account_id).await?;
        }
        self.ledger.list_for_user(user_id, filter, pagination).await
    }

    pub async fn get_transaction(
        &self,
        user_id: UserId,
        transaction_id: TransactionId,
    ) -> LedgerResult<LedgerEntry> {
        self.ledger.get(user_id, transaction_id).await
    }

    pub async fn get_summary(&self, user_id: UserId, period: SummaryPeriod) -> LedgerResult<Summary> {
        self.ledger.summary(user_id, period).await
    }

    pub async fn aggregate(
        &self,
        user_id: UserId,
        filter: EntryFilter,
        group_by: GroupBy,
    ) -> LedgerResult<Vec<GroupTotal>> {
        self.ledger.aggregate(user_id, filter, group_by).await
    }

    pub async fn get_transfer(&self, user_id: UserId, transfer_id: TransferId) -> LedgerResult<Transfer> {
        self.transfers.get_transfer(user_id, transfer_id).await
    }

    pub async fn list_transfers(
        &self,
        user_id: UserId,
        filter: TransferFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<Transfer>> {
        self.transfers.list_transfers(user_id, filter, pagination).await
    }

    pub async fn create_template(&self, request: TemplateRequest) -> LedgerResult<TransferTemplate> {
        self.templates.create_template(request).await
    }

    pub async fn list_templates(&self, user_id: UserId) -> LedgerResult<Vec<TransferTemplate>> {
        self.templates.list_templates(user_id).await
    }

    pub async fn delete_template(&self, user_id: UserId, template_id: TemplateId) -> LedgerResult<()> {
        self.templates.delete_template(user_id, template_id).await
    }

    /// Recomputes the account balance from its ledger entries and checks it
    /// against the stored balance.
    pub async fn verify_account(&self, account_id: AccountId) -> LedgerResult<Decimal> {
        let account = self.accounts.get_account(account_id).await?;
        self.ledger.verify_balance(&account).await
    }
}
