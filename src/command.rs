use std::{
    fmt,
    hash::{Hash, Hasher},
};

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    account::{AccountId, AccountKind, UserId},
    error::LedgerError,
};

const MAX_ACCOUNT_NUMBER_LEN: usize = 34;
const MAX_AMOUNT_SCALE: u32 = 2;
const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_RECIPIENT_NAME_LEN: usize = 200;
const MAX_ACCOUNT_NAME_LEN: usize = 100;
const MAX_CATEGORY_LEN: usize = 50;
const MAX_TEMPLATE_NAME_LEN: usize = 100;

/// External-facing account number. Lookups use the normalized form
/// (whitespace removed, uppercased); records keep the number as typed.
/// Parsing only rejects malformed input; whether the number belongs to this
/// system is decided by a lookup.
#[derive(Debug, Clone)]
pub struct AccountNumber {
    typed: String,
    normalized: String,
}

impl AccountNumber {
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let normalized: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if normalized.is_empty() {
            return Err(LedgerError::invalid_account("Account number is required"));
        }
        if normalized.len() > MAX_ACCOUNT_NUMBER_LEN
            || !normalized.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(LedgerError::invalid_account(format!(
                "Malformed account number `{raw}`"
            )));
        }
        Ok(Self {
            typed: raw.trim().to_string(),
            normalized: normalized.to_ascii_uppercase(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn as_typed(&self) -> &str {
        &self.typed
    }
}

impl PartialEq for AccountNumber {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for AccountNumber {}

impl Hash for AccountNumber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Raw transfer request as handed over by the application layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub user_id: UserId,
    pub from_account_id: AccountId,
    pub to_account_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub recipient_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransferCommand {
    pub user_id: UserId,
    pub from_account_id: AccountId,
    pub to_account_number: AccountNumber,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub recipient_name: Option<String>,
}

impl TransferCommand {
    pub fn parse(request: TransferRequest) -> Result<Self, LedgerError> {
        Ok(Self {
            user_id: request.user_id,
            from_account_id: request.from_account_id,
            to_account_number: AccountNumber::parse(&request.to_account_number)?,
            amount: parse_amount(request.amount)?,
            currency: parse_currency(&request.currency)?,
            description: parse_text("description", request.description, MAX_DESCRIPTION_LEN)?,
            recipient_name: parse_text(
                "recipientName",
                request.recipient_name,
                MAX_RECIPIENT_NAME_LEN,
            )?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CashAction {
    Deposit,
    Withdraw,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashRequest {
    pub user_id: UserId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub category: Option<String>,
    pub description: Option<String>,
}

/// Deposit into or withdrawal from a single account.
#[derive(Debug, Clone)]
pub struct CashCommand {
    pub action: CashAction,
    pub user_id: UserId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub category: Option<String>,
    pub description: Option<String>,
}

impl CashCommand {
    pub fn parse(action: CashAction, request: CashRequest) -> Result<Self, LedgerError> {
        Ok(Self {
            action,
            user_id: request.user_id,
            account_id: request.account_id,
            amount: parse_amount(request.amount)?,
            category: parse_text("category", request.category, MAX_CATEGORY_LEN)?,
            description: parse_text("description", request.description, MAX_DESCRIPTION_LEN)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAccountRequest {
    pub user_id: UserId,
    pub kind: AccountKind,
    pub currency: String,
    pub name: Option<String>,
    pub credit_limit: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct OpenAccountCommand {
    pub user_id: UserId,
    pub kind: AccountKind,
    pub currency: String,
    pub name: String,
    pub credit_limit: Decimal,
}

impl OpenAccountCommand {
    pub fn parse(request: OpenAccountRequest) -> Result<Self, LedgerError> {
        let credit_limit = match (request.kind.allows_credit_line(), request.credit_limit) {
            (_, None) => Decimal::ZERO,
            (true, Some(limit)) if limit >= Decimal::ZERO => limit,
            (true, Some(_)) => {
                return Err(LedgerError::validation(
                    "creditLimit",
                    "Credit limit must not be negative",
                ));
            }
            (false, Some(_)) => {
                return Err(LedgerError::validation(
                    "creditLimit",
                    format!("{:?} accounts cannot carry a credit line", request.kind),
                ));
            }
        };
        let name = parse_text("name", request.name, MAX_ACCOUNT_NAME_LEN)?
            .unwrap_or_else(|| request.kind.default_name().to_string());
        Ok(Self {
            user_id: request.user_id,
            kind: request.kind,
            currency: parse_currency(&request.currency)?,
            name,
            credit_limit,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseAccountCommand {
    pub user_id: UserId,
    pub account_id: AccountId,
    pub transfer_to_account_id: Option<AccountId>,
}

impl CloseAccountCommand {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.transfer_to_account_id == Some(self.account_id) {
            return Err(LedgerError::invalid_account(
                "Remaining balance cannot be swept into the account being closed",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameAccountRequest {
    pub user_id: UserId,
    pub account_id: AccountId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct RenameAccountCommand {
    pub user_id: UserId,
    pub account_id: AccountId,
    pub name: String,
}

impl RenameAccountCommand {
    pub fn parse(request: RenameAccountRequest) -> Result<Self, LedgerError> {
        let name = parse_text("name", Some(request.name), MAX_ACCOUNT_NAME_LEN)?
            .ok_or_else(|| LedgerError::validation("name", "Account name is required"))?;
        Ok(Self {
            user_id: request.user_id,
            account_id: request.account_id,
            name,
        })
    }
}

/// Saved transfer details a user can reuse. The amount may be left open.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRequest {
    pub user_id: UserId,
    pub name: String,
    pub to_account_number: String,
    pub recipient_name: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TemplateCommand {
    pub user_id: UserId,
    pub name: String,
    pub to_account_number: AccountNumber,
    pub recipient_name: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: String,
    pub description: Option<String>,
}

impl TemplateCommand {
    pub fn parse(request: TemplateRequest) -> Result<Self, LedgerError> {
        let name = parse_text("name", Some(request.name), MAX_TEMPLATE_NAME_LEN)?
            .ok_or_else(|| LedgerError::validation("name", "Template name is required"))?;
        Ok(Self {
            user_id: request.user_id,
            name,
            to_account_number: AccountNumber::parse(&request.to_account_number)?,
            recipient_name: parse_text(
                "recipientName",
                request.recipient_name,
                MAX_RECIPIENT_NAME_LEN,
            )?,
            amount: request.amount.map(parse_amount).transpose()?,
            currency: parse_currency(&request.currency)?,
            description: parse_text("description", request.description, MAX_DESCRIPTION_LEN)?,
        })
    }
}

fn parse_amount(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::validation("amount", "Amount must be positive"));
    }
    let amount = amount.normalize();
    if amount.scale() > MAX_AMOUNT_SCALE {
        return Err(LedgerError::validation(
            "amount",
            format!("Amount must have at most {MAX_AMOUNT_SCALE} fractional digits"),
        ));
    }
    Ok(amount)
}

/// Currency is an opaque ISO-4217-shaped label; no conversion happens anywhere.
fn parse_currency(raw: &str) -> Result<String, LedgerError> {
    let currency = raw.trim().to_ascii_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(LedgerError::validation(
            "currency",
            format!("`{raw}` is not a currency code"),
        ));
    }
    Ok(currency)
}

fn parse_text(
    field: &'static str,
    value: Option<String>,
    max_len: usize,
) -> Result<Option<String>, LedgerError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > max_len {
        return Err(LedgerError::validation(
            field,
            format!("Must be at most {max_len} characters"),
        ));
    }
    Ok(Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;

    fn transfer_request(amount: Decimal) -> TransferRequest {
        TransferRequest {
            user_id: Uuid::new_v4(),
            from_account_id: Uuid::new_v4(),
            to_account_number: "4081 7810 0000 0042".to_string(),
            amount,
            currency: "rub".to_string(),
            description: Some("  rent  ".to_string()),
            recipient_name: Some("".to_string()),
        }
    }

    #[test]
    fn parse_transfer_command() {
        let cmd = TransferCommand::parse(transfer_request(dec!(1500.00))).unwrap();
        assert_eq!(cmd.to_account_number.as_str(), "4081781000000042");
        assert_eq!(cmd.to_account_number.as_typed(), "4081 7810 0000 0042");
        assert_eq!(
            cmd.to_account_number,
            AccountNumber::parse("4081781000000042").unwrap()
        );
        assert_eq!(cmd.amount, dec!(1500));
        assert_eq!(cmd.currency, "RUB");
        assert_eq!(cmd.description.as_deref(), Some("rent"));
        assert_eq!(cmd.recipient_name, None);
    }

    #[test]
    fn amount_must_be_positive_money() {
        for amount in [dec!(0), dec!(-1)] {
            let err = TransferCommand::parse(transfer_request(amount)).unwrap_err();
            assert!(matches!(err, LedgerError::Validation { field: "amount", .. }));
        }
        let err = TransferCommand::parse(transfer_request(dec!(0.001))).unwrap_err();
        assert!(matches!(err, LedgerError::Validation { field: "amount", .. }));
        // trailing zeros are not extra precision
        assert!(TransferCommand::parse(transfer_request(dec!(10.500))).is_ok());
    }

    #[test]
    fn malformed_account_numbers() {
        assert!(matches!(
            AccountNumber::parse("   ").unwrap_err(),
            LedgerError::InvalidAccount { .. }
        ));
        assert!(matches!(
            AccountNumber::parse("4081-7810").unwrap_err(),
            LedgerError::InvalidAccount { .. }
        ));
        assert!(AccountNumber::parse(&"1".repeat(35)).is_err());
        assert_eq!(
            AccountNumber::parse("de89 3704 0044 0532 0130 00")
                .unwrap()
                .as_str(),
            "DE89370400440532013000"
        );
    }

    #[test]
    fn currency_code_shape() {
        let mut request = transfer_request(dec!(1));
        request.currency = "RUBLES".to_string();
        let err = TransferCommand::parse(request).unwrap_err();
        assert!(matches!(err, LedgerError::Validation { field: "currency", .. }));
    }

    #[test]
    fn parse_open_account_command() {
        let request = OpenAccountRequest {
            user_id: Uuid::new_v4(),
            kind: AccountKind::Credit,
            currency: "RUB".to_string(),
            name: None,
            credit_limit: Some(dec!(100000)),
        };
        let cmd = OpenAccountCommand::parse(request.clone()).unwrap();
        assert_eq!(cmd.credit_limit, dec!(100000));
        assert_eq!(cmd.name, "Credit account");

        let err = OpenAccountCommand::parse(OpenAccountRequest {
            kind: AccountKind::Savings,
            ..request.clone()
        })
        .unwrap_err();
        assert!(matches!(err, LedgerError::Validation { field: "creditLimit", .. }));

        let err = OpenAccountCommand::parse(OpenAccountRequest {
            credit_limit: Some(dec!(-5)),
            ..request
        })
        .unwrap_err();
        assert!(matches!(err, LedgerError::Validation { field: "creditLimit", .. }));
    }

    #[test]
    fn rename_needs_a_name() {
        let request = RenameAccountRequest {
            user_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            name: "  Rainy day ".to_string(),
        };
        assert_eq!(
            RenameAccountCommand::parse(request.clone()).unwrap().name,
            "Rainy day"
        );
        for name in ["   ".to_string(), "x".repeat(101)] {
            let err = RenameAccountCommand::parse(RenameAccountRequest {
                name,
                ..request.clone()
            })
            .unwrap_err();
            assert!(matches!(err, LedgerError::Validation { field: "name", .. }));
        }
    }

    #[test]
    fn parse_template_command() {
        let request = TemplateRequest {
            user_id: Uuid::new_v4(),
            name: "Rent".to_string(),
            to_account_number: "4081 7810 0000 0042".to_string(),
            recipient_name: Some("Landlord".to_string()),
            amount: None,
            currency: "rub".to_string(),
            description: None,
        };
        let cmd = TemplateCommand::parse(request.clone()).unwrap();
        assert_eq!(cmd.amount, None);
        assert_eq!(cmd.currency, "RUB");
        assert_eq!(cmd.to_account_number.as_typed(), "4081 7810 0000 0042");

        let err = TemplateCommand::parse(TemplateRequest {
            amount: Some(dec!(-1)),
            ..request.clone()
        })
        .unwrap_err();
        assert!(matches!(err, LedgerError::Validation { field: "amount", .. }));

        let err = TemplateCommand::parse(TemplateRequest {
            name: String::new(),
            ..request
        })
        .unwrap_err();
        assert!(matches!(err, LedgerError::Validation { field: "name", .. }));
    }

    #[test]
    fn sweep_into_self_is_rejected() {
        let account_id = Uuid::new_v4();
        let cmd = CloseAccountCommand {
            user_id: Uuid::new_v4(),
            account_id,
            transfer_to_account_id: Some(account_id),
        };
        assert!(matches!(
            cmd.validate().unwrap_err(),
            LedgerError::InvalidAccount { .. }
        ));
    }
}
