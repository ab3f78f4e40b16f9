use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    account::{AccountId, UserId},
    command::{TemplateCommand, TransferCommand},
    error::LedgerError,
};

pub type TransferId = Uuid;
pub type TemplateId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

/// Request and outcome of a transfer, separate from the ledger entries it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub user_id: UserId,
    pub from_account_id: AccountId,
    /// As typed by the caller; may not resolve to an account of this system.
    pub to_account_number: String,
    pub to_account_id: Option<AccountId>,
    pub recipient_user_id: Option<UserId>,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub recipient_name: Option<String>,
    status: TransferStatus,
    pub failure_reason: Option<String>,
    pub commission: Decimal,
    pub created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    pub fn pending(
        command: &TransferCommand,
        destination: Option<(AccountId, UserId)>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: command.user_id,
            from_account_id: command.from_account_id,
            to_account_number: command.to_account_number.as_typed().to_string(),
            to_account_id: destination.map(|(account, _)| account),
            recipient_user_id: destination.map(|(_, user)| user),
            amount: command.amount,
            currency: command.currency.clone(),
            description: command.description.clone(),
            recipient_name: command.recipient_name.clone(),
            status: TransferStatus::Pending,
            failure_reason: None,
            commission: Decimal::ZERO,
            created_at: now,
            completed_at: None,
        }
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_internal(&self) -> bool {
        self.to_account_id.is_some()
    }

    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), LedgerError> {
        self.ensure_pending()?;
        self.status = TransferStatus::Completed;
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn fail(&mut self, at: DateTime<Utc>, reason: impl Into<String>) -> Result<(), LedgerError> {
        self.ensure_pending()?;
        self.status = TransferStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.completed_at = Some(at);
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), LedgerError> {
        if self.status.is_terminal() {
            return Err(LedgerError::conflict(format!(
                "Transfer {} is already {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

/// Reusable transfer details. Deleting a template only deactivates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTemplate {
    pub id: TemplateId,
    pub user_id: UserId,
    pub name: String,
    pub to_account_number: String,
    pub recipient_name: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: String,
    pub description: Option<String>,
    is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl TransferTemplate {
    pub fn new(command: TemplateCommand, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: command.user_id,
            name: command.name,
            to_account_number: command.to_account_number.as_typed().to_string(),
            recipient_name: command.recipient_name,
            amount: command.amount,
            currency: command.currency,
            description: command.description,
            is_active: true,
            created_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferFilter {
    pub account_id: Option<AccountId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub direction: Option<TransferDirection>,
}

impl TransferFilter {
    /// Whether `transfer` is visible to `user_id` under this filter. Without a
    /// direction both sent and received transfers are listed.
    pub fn matches(&self, user_id: UserId, transfer: &Transfer) -> bool {
        let sent = transfer.user_id == user_id;
        let received = transfer.recipient_user_id == Some(user_id);
        let direction_ok = match self.direction {
            None => sent || received,
            Some(TransferDirection::Outgoing) => sent,
            Some(TransferDirection::Incoming) => received,
        };
        direction_ok
            && self
                .account_id
                .is_none_or(|a| transfer.from_account_id == a || transfer.to_account_id == Some(a))
            && self.from.is_none_or(|from| transfer.created_at >= from)
            && self.to.is_none_or(|to| transfer.created_at <= to)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::command::AccountNumber;

    fn transfer() -> Transfer {
        let command = TransferCommand {
            user_id: Uuid::new_v4(),
            from_account_id: Uuid::new_v4(),
            to_account_number: AccountNumber::parse("40817810 9999 9999").unwrap(),
            amount: dec!(250),
            currency: "RUB".to_string(),
            description: None,
            recipient_name: Some("Ivan".to_string()),
        };
        Transfer::pending(
            &command,
            None,
            Utc.with_ymd_and_hms(2024, 5, 14, 10, 0, 0).unwrap(),
        )
    }

    #[test]
    fn status_is_monotonic() {
        let at = Utc.with_ymd_and_hms(2024, 5, 14, 10, 0, 1).unwrap();
        let mut t = transfer();
        assert_eq!(t.status(), TransferStatus::Pending);
        assert!(!t.is_internal());
        assert_eq!(t.to_account_number, "40817810 9999 9999");

        t.complete(at).unwrap();
        assert_eq!(t.status(), TransferStatus::Completed);
        assert_eq!(t.completed_at(), Some(at));

        let err = t.fail(at, "late failure").unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));
        assert_eq!(t.status(), TransferStatus::Completed);

        let mut t = transfer();
        t.fail(at, "storage unavailable").unwrap();
        assert!(t.complete(at).is_err());
        assert_eq!(t.status(), TransferStatus::Failed);
    }

    #[test]
    fn direction_filter() {
        let t = transfer();
        let stranger = Uuid::new_v4();
        let filter = TransferFilter::default();
        assert!(filter.matches(t.user_id, &t));
        assert!(!filter.matches(stranger, &t));

        let incoming = TransferFilter {
            direction: Some(TransferDirection::Incoming),
            ..Default::default()
        };
        assert!(!incoming.matches(t.user_id, &t));
    }
}
