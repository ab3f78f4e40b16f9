use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    Context, accounts::AccountStore, history::TransactionLedger, limits::DailyLimitTracker,
};
use crate::{
    account::{Account, UserId},
    command::{TransferCommand, TransferRequest},
    error::{LedgerError, LedgerResult, LimitKind},
    ledger::{LedgerEntry, Page, Pagination, TransactionType},
    store::StoreTransaction,
    transfer::{Transfer, TransferFilter, TransferId},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transfer: Transfer,
    /// Source balance right after the transfer committed.
    pub new_balance: Decimal,
}

/// Validated state ready to be written: both rows locked, the daily
/// counter reserved but balances not yet touched.
struct Prepared {
    tx: Box<dyn StoreTransaction>,
    source: Account,
    destination: Option<Account>,
    transfer: Transfer,
}

#[derive(Clone)]
pub struct TransferOrchestrator {
    ctx: Context,
    accounts: AccountStore,
    limits: DailyLimitTracker,
    ledger: TransactionLedger,
}

impl TransferOrchestrator {
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
            from_account_id = %request.from_account_id,
            amount = %request.amount
        ),
        err(level = "info")
    )]
    pub async fn create_transfer(&self, request: TransferRequest) -> LedgerResult<TransferReceipt> {
        let command = TransferCommand::parse(request)?;
        let prepared = self.prepare(&command).await?;
        let pending = prepared.transfer.clone();
        match self.execute(&command, prepared).await {
            Ok(receipt) => {
                info!(
                    transfer_id = %receipt.transfer.id,
                    internal = receipt.transfer.is_internal(),
                    "transfer completed"
                );
                Ok(receipt)
            }
            Err(err) => {
                self.record_failure(pending, &err).await;
                Err(err)
            }
        }
    }

    /// Locks the rows and runs every precondition. Nothing is persisted if
    /// this fails: dropping the unit discards the staged reservation.
    async fn prepare(&self, command: &TransferCommand) -> LedgerResult<Prepared> {
        let resolved = self
            .accounts
            .get_account_by_number(command.to_account_number.as_str())
            .await?;

        let mut tx = self.ctx.store.begin().await?;
        let (source, destination) = self
            .accounts
            .lock_pair(
                tx.as_mut(),
                command.from_account_id,
                resolved.as_ref().map(|a| a.id),
            )
            .await?;

        let mut source = match source {
            Some(account) if account.user_id == command.user_id && !account.is_closed() => {
                account
            }
            _ => return Err(LedgerError::not_found("Source account")),
        };
        if !source.is_active() {
            return Err(LedgerError::AccountClosed);
        }
        if source.available_balance() < command.amount {
            return Err(LedgerError::InsufficientFunds);
        }
        self.limits
            .check_and_reserve(tx.as_mut(), &mut source, LimitKind::Transfer, command.amount)
            .await?;

        if source.currency != command.currency {
            return Err(LedgerError::invalid_account(format!(
                "Source account holds {}, transfer is in {}",
                source.currency, command.currency
            )));
        }

        let destination = match resolved {
            None => None,
            Some(resolved) if resolved.id == source.id => {
                return Err(LedgerError::invalid_account(
                    "Cannot transfer to the same account",
                ));
            }
            Some(_) => {
                let destination =
                    destination.ok_or(LedgerError::not_found("Destination account"))?;
                if !destination.is_operational() {
                    return Err(LedgerError::invalid_account(
                        "Destination account is closed",
                    ));
                }
                if destination.currency != source.currency {
                    return Err(LedgerError::invalid_account(format!(
                        "Destination account holds {}, transfer is in {}",
                        destination.currency, source.currency
                    )));
                }
                Some(destination)
            }
        };

        let transfer = Transfer::pending(
            command,
            destination.as_ref().map(|d| (d.id, d.user_id)),
            self.ctx.clock.now(),
        );
        Ok(Prepared {
            tx,
            source,
            destination,
            transfer,
        })
    }

    /// Debits, credits, appends the paired entries and commits as one unit.
    async fn execute(
        &self,
        command: &TransferCommand,
        prepared: Prepared,
    ) -> LedgerResult<TransferReceipt> {
        let Prepared {
            mut tx,
            mut source,
            mut destination,
            mut transfer,
        } = prepared;
        let amount = command.amount;

        self.accounts
            .adjust(tx.as_mut(), &mut source, -amount, -amount)
            .await?;
        if let Some(destination) = destination.as_mut() {
            self.accounts
                .adjust(tx.as_mut(), destination, amount, amount)
                .await?;
        }

        let now = self.ctx.clock.now();
        let outgoing = LedgerEntry {
            id: Uuid::new_v4(),
            user_id: command.user_id,
            from_account_id: Some(source.id),
            to_account_id: transfer.to_account_id,
            amount,
            currency: transfer.currency.clone(),
            kind: TransactionType::TransferOut,
            category: None,
            description: command
                .description
                .clone()
                .unwrap_or_else(|| format!("Transfer to {}", command.to_account_number)),
            balance_after: source.balance(),
            created_at: now,
        };
        self.ledger.record(tx.as_mut(), outgoing).await?;

        if let Some(destination) = &destination {
            let incoming = LedgerEntry {
                id: Uuid::new_v4(),
                user_id: destination.user_id,
                from_account_id: Some(source.id),
                to_account_id: Some(destination.id),
                amount,
                currency: transfer.currency.clone(),
                kind: TransactionType::TransferIn,
                category: None,
                description: command
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Transfer from {}", source.number)),
                balance_after: destination.balance(),
                created_at: now,
            };
            self.ledger.record(tx.as_mut(), incoming).await?;
        }

        transfer.complete(now)?;
        tx.save_transfer(transfer.clone()).await?;
        tx.commit().await?;

        Ok(TransferReceipt {
            transfer,
            new_balance: source.balance(),
        })
    }

    /// Keeps an audit trail of transfers that passed validation but could not
    /// be written. Best effort: the caller already has the real error.
    async fn record_failure(&self, mut transfer: Transfer, err: &LedgerError) {
        warn!(transfer_id = %transfer.id, error = %err, "transfer failed after validation");
        if transfer.fail(self.ctx.clock.now(), err.to_string()).is_err() {
            return;
        }
        let saved = async {
            let mut tx = self.ctx.store.begin().await?;
            tx.save_transfer(transfer).await?;
            tx.commit().await
        }
        .await;
        if let Err(store_err) = saved {
            warn!(error = %store_err, "could not persist failed transfer");
        }
    }

    /// Visible to the initiator and to the resolved recipient.
    pub async fn get_transfer(&self, user_id: UserId, transfer_id: TransferId) -> LedgerResult<Transfer> {
        self.ctx
            .read("transfer", || self.ctx.store.transfer(transfer_id))
            .await?
            .filter(|t| t.user_id == user_id || t.recipient_user_id == Some(user_id))
            .ok_or(LedgerError::not_found("Transfer"))
    }

    pub async fn list_transfers(
        &self,
        user_id: UserId,
        filter: TransferFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<Transfer>> {
        let pagination = self.ctx.pagination(pagination);
        self.ctx
            .read("page_transfers", || {
                self.ctx.store.page_transfers(user_id, &filter, pagination)
            })
            .await
    }
}
