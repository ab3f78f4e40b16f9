use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, LimitKind};

pub type AccountId = Uuid;
pub type UserId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Debit,
    Credit,
    Savings,
    Deposit,
}

impl AccountKind {
    /// Only credit accounts may carry a negative balance, down to their credit line.
    pub fn allows_credit_line(&self) -> bool {
        matches!(self, AccountKind::Credit)
    }

    pub fn default_name(&self) -> &'static str {
        match self {
            AccountKind::Debit => "Debit account",
            AccountKind::Credit => "Credit account",
            AccountKind::Savings => "Savings account",
            AccountKind::Deposit => "Deposit account",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountEventKind {
    BalanceAdjusted {
        delta: Decimal,
        delta_available: Decimal,
    },
    TransferLimitUsed(Decimal),
    WithdrawalLimitUsed(Decimal),
    LimitsReset(NaiveDate),
    Renamed(String),
    Closed(DateTime<Utc>),
}

/// A validated change to a single account. Produced by `handle_*` methods
/// (or the daily limit tracker) and applied with [`Account::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountEvent {
    pub account_id: AccountId,
    pub kind: AccountEventKind,
}

impl AccountEvent {
    pub(crate) fn new(account_id: AccountId, kind: AccountEventKind) -> Self {
        Self { account_id, kind }
    }
}

/// Account row. Balance and limit fields only change through [`Account::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub number: String,
    pub name: String,
    pub kind: AccountKind,
    pub currency: String,
    balance: Decimal,
    available_balance: Decimal,
    credit_limit: Decimal,
    is_active: bool,
    is_closed: bool,
    closed_at: Option<DateTime<Utc>>,
    daily_transfer_limit: Decimal,
    daily_transfer_used: Decimal,
    daily_withdrawal_limit: Decimal,
    daily_withdrawal_used: Decimal,
    limit_reset_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Narrows a user's account list. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccountFilter {
    pub kind: Option<AccountKind>,
    pub currency: Option<String>,
}

impl AccountFilter {
    pub fn matches(&self, account: &Account) -> bool {
        self.kind.is_none_or(|kind| account.kind == kind)
            && self
                .currency
                .as_deref()
                .is_none_or(|currency| account.currency.eq_ignore_ascii_case(currency.trim()))
    }
}

/// Everything needed to open an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: UserId,
    pub number: String,
    pub name: String,
    pub kind: AccountKind,
    pub currency: String,
    pub credit_limit: Decimal,
    pub daily_transfer_limit: Decimal,
    pub daily_withdrawal_limit: Decimal,
}

impl Account {
    /// Opens an account with zero balance. For credit accounts the credit
    /// line shows up as available balance.
    pub fn open(new: NewAccount, now: DateTime<Utc>) -> Self {
        let credit_limit = if new.kind.allows_credit_line() {
            new.credit_limit
        } else {
            Decimal::ZERO
        };
        Self {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            number: new.number,
            name: new.name,
            kind: new.kind,
            currency: new.currency,
            balance: Decimal::ZERO,
            available_balance: credit_limit,
            credit_limit,
            is_active: true,
            is_closed: false,
            closed_at: None,
            daily_transfer_limit: new.daily_transfer_limit,
            daily_transfer_used: Decimal::ZERO,
            daily_withdrawal_limit: new.daily_withdrawal_limit,
            daily_withdrawal_used: Decimal::ZERO,
            limit_reset_date: now.date_naive(),
            created_at: now,
        }
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn available_balance(&self) -> Decimal {
        self.available_balance
    }

    pub fn credit_limit(&self) -> Decimal {
        self.credit_limit
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn daily_transfer_limit(&self) -> Decimal {
        self.daily_transfer_limit
    }

    pub fn daily_transfer_used(&self) -> Decimal {
        self.daily_transfer_used
    }

    pub fn daily_withdrawal_limit(&self) -> Decimal {
        self.daily_withdrawal_limit
    }

    pub fn daily_withdrawal_used(&self) -> Decimal {
        self.daily_withdrawal_used
    }

    pub fn limit_reset_date(&self) -> NaiveDate {
        self.limit_reset_date
    }

    /// Open and active: the only state in which balances may move.
    pub fn is_operational(&self) -> bool {
        self.is_active && !self.is_closed
    }

    pub fn apply(&mut self, event: &AccountEvent) {
        match &event.kind {
            AccountEventKind::BalanceAdjusted {
                delta,
                delta_available,
            } => {
                self.balance += *delta;
                self.available_balance += *delta_available;
            }
            AccountEventKind::TransferLimitUsed(amount) => {
                self.daily_transfer_used += *amount;
            }
            AccountEventKind::WithdrawalLimitUsed(amount) => {
                self.daily_withdrawal_used += *amount;
            }
            AccountEventKind::LimitsReset(date) => {
                self.daily_transfer_used = Decimal::ZERO;
                self.daily_withdrawal_used = Decimal::ZERO;
                self.limit_reset_date = *date;
            }
            AccountEventKind::Renamed(name) => {
                self.name = name.clone();
            }
            AccountEventKind::Closed(at) => {
                self.is_closed = true;
                self.is_active = false;
                self.closed_at = Some(*at);
            }
        }
    }

    /// Validates a signed balance adjustment. Debit-direction deltas must
    /// leave the balance within what the account kind tolerates; credits
    /// only need an operational account.
    pub fn handle_adjustment(
        &self,
        delta: Decimal,
        delta_available: Decimal,
    ) -> Result<AccountEvent, LedgerError> {
        if !self.is_operational() {
            return Err(LedgerError::AccountClosed);
        }
        let debit_direction = delta < Decimal::ZERO || delta_available < Decimal::ZERO;
        if debit_direction {
            let balance = self.balance + delta;
            let available = self.available_balance + delta_available;
            if available < Decimal::ZERO || balance < -self.credit_limit {
                return Err(LedgerError::InsufficientFunds);
            }
        }
        Ok(AccountEvent::new(
            self.id,
            AccountEventKind::BalanceAdjusted {
                delta,
                delta_available,
            },
        ))
    }

    /// Starts a fresh daily window when `today` differs from the date of the
    /// last reset. `None` means the counters are already current.
    pub fn handle_limit_reset(&self, today: NaiveDate) -> Option<AccountEvent> {
        (self.limit_reset_date != today)
            .then(|| AccountEvent::new(self.id, AccountEventKind::LimitsReset(today)))
    }

    /// Reserves `amount` against a daily counter. Assumes the window is current.
    pub fn handle_limit_use(
        &self,
        limit: LimitKind,
        amount: Decimal,
    ) -> Result<AccountEvent, LedgerError> {
        let (used, allowed) = match limit {
            LimitKind::Transfer => (self.daily_transfer_used, self.daily_transfer_limit),
            LimitKind::Withdrawal => (self.daily_withdrawal_used, self.daily_withdrawal_limit),
        };
        if used + amount > allowed {
            return Err(LedgerError::LimitExceeded {
                limit,
                used,
                allowed,
                requested: amount,
            });
        }
        let kind = match limit {
            LimitKind::Transfer => AccountEventKind::TransferLimitUsed(amount),
            LimitKind::Withdrawal => AccountEventKind::WithdrawalLimitUsed(amount),
        };
        Ok(AccountEvent::new(self.id, kind))
    }

    pub fn handle_rename(&self, name: String) -> Result<AccountEvent, LedgerError> {
        if self.is_closed {
            return Err(LedgerError::AccountClosed);
        }
        Ok(AccountEvent::new(self.id, AccountEventKind::Renamed(name)))
    }

    pub fn handle_close(&self, at: DateTime<Utc>) -> Result<AccountEvent, LedgerError> {
        if self.is_closed {
            return Err(LedgerError::conflict("Account is already closed"));
        }
        if self.balance > Decimal::ZERO {
            return Err(LedgerError::conflict(
                "Account has remaining balance. Please specify an account to transfer funds to.",
            ));
        }
        if self.balance < Decimal::ZERO {
            return Err(LedgerError::conflict("Account has outstanding debt"));
        }
        Ok(AccountEvent::new(self.id, AccountEventKind::Closed(at)))
    }
}
