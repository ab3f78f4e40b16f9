use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    account::{AccountId, UserId},
    error::LedgerError,
};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionType {
    Debit,
    Credit,
    TransferOut,
    TransferIn,
    Withdrawal,
    Deposit,
    Fee,
}

/// Direction of money relative to the affected account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Income,
    Expense,
}

impl TransactionType {
    pub const ALL: [TransactionType; 7] = [
        TransactionType::Debit,
        TransactionType::Credit,
        TransactionType::TransferOut,
        TransactionType::TransferIn,
        TransactionType::Withdrawal,
        TransactionType::Deposit,
        TransactionType::Fee,
    ];

    pub fn flow(&self) -> Flow {
        match self {
            TransactionType::Credit | TransactionType::TransferIn | TransactionType::Deposit => {
                Flow::Income
            }
            TransactionType::Debit
            | TransactionType::TransferOut
            | TransactionType::Withdrawal
            | TransactionType::Fee => Flow::Expense,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Debit => "debit",
            TransactionType::Credit => "credit",
            TransactionType::TransferOut => "transfer-out",
            TransactionType::TransferIn => "transfer-in",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Deposit => "deposit",
            TransactionType::Fee => "fee",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoding a stored type is the only place an unknown value can show up,
/// and it is a data integrity failure rather than a zero-valued entry.
impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        TransactionType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| LedgerError::Integrity(format!("unknown transaction type `{s}`")))
    }
}

/// Immutable ledger entry describing one balance-affecting event on one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: TransactionId,
    pub user_id: UserId,
    pub from_account_id: Option<AccountId>,
    pub to_account_id: Option<AccountId>,
    pub amount: Decimal,
    pub currency: String,
    pub kind: TransactionType,
    pub category: Option<String>,
    pub description: String,
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// The account whose balance this entry moved: the source for outflows,
    /// the destination for inflows.
    pub fn affected_account(&self) -> Option<AccountId> {
        match self.kind.flow() {
            Flow::Income => self.to_account_id,
            Flow::Expense => self.from_account_id,
        }
    }

    pub fn signed_amount(&self) -> Decimal {
        match self.kind.flow() {
            Flow::Income => self.amount,
            Flow::Expense => -self.amount,
        }
    }
}

/// Entry selection. `account_id` selects entries that moved that account's
/// balance, so the two halves of an internal transfer land in different
/// account histories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub user_id: Option<UserId>,
    pub account_id: Option<AccountId>,
    pub category: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
}

impl EntryFilter {
    pub fn for_account(account_id: AccountId) -> Self {
        Self {
            account_id: Some(account_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.user_id.is_none_or(|u| entry.user_id == u)
            && self
                .account_id
                .is_none_or(|a| entry.affected_account() == Some(a))
            && self
                .category
                .as_ref()
                .is_none_or(|c| entry.category.as_ref() == Some(c))
            && self.from.is_none_or(|from| entry.created_at >= from)
            && self.to.is_none_or(|to| entry.created_at <= to)
            && self.min_amount.is_none_or(|min| entry.amount >= min)
            && self.max_amount.is_none_or(|max| entry.amount <= max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Pagination {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    /// Zero means "default"; anything above `max` is capped.
    pub fn clamp(self, default: u32, max: u32) -> Self {
        let limit = match self.limit {
            0 => default,
            n => n.min(max),
        };
        Self {
            limit,
            offset: self.offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Cuts one page out of an already ordered result set.
    pub fn slice(ordered: Vec<T>, pagination: Pagination) -> Self {
        let total = ordered.len() as u64;
        let items = ordered
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();
        Self {
            items,
            total,
            limit: pagination.limit,
            offset: pagination.offset,
            has_more: u64::from(pagination.offset) + u64::from(pagination.limit) < total,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Category,
    Type,
    CategoryAndType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub category: Option<String>,
    pub kind: Option<TransactionType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTotal {
    pub key: GroupKey,
    pub amount: Decimal,
    pub count: u64,
}

/// Sums entries per group, largest amount first.
pub fn aggregate<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    group_by: GroupBy,
) -> Vec<GroupTotal> {
    let mut groups: BTreeMap<GroupKey, (Decimal, u64)> = BTreeMap::new();
    for entry in entries {
        let key = match group_by {
            GroupBy::Category => GroupKey {
                category: entry.category.clone(),
                kind: None,
            },
            GroupBy::Type => GroupKey {
                category: None,
                kind: Some(entry.kind),
            },
            GroupBy::CategoryAndType => GroupKey {
                category: entry.category.clone(),
                kind: Some(entry.kind),
            },
        };
        let slot = groups.entry(key).or_insert((Decimal::ZERO, 0));
        slot.0 += entry.amount;
        slot.1 += 1;
    }
    let mut totals: Vec<GroupTotal> = groups
        .into_iter()
        .map(|(key, (amount, count))| GroupTotal { key, amount, count })
        .collect();
    totals.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.key.cmp(&b.key)));
    totals
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowTotals {
    pub income: Decimal,
    pub expense: Decimal,
}

impl FlowTotals {
    pub fn of<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        entries
            .into_iter()
            .fold(Self::default(), |mut totals, entry| {
                match entry.kind.flow() {
                    Flow::Income => totals.income += entry.amount,
                    Flow::Expense => totals.expense += entry.amount,
                }
                totals
            })
    }

    pub fn net(&self) -> Decimal {
        self.income - self.expense
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryPeriod {
    Day,
    Week,
    #[default]
    Month,
    Year,
}

impl SummaryPeriod {
    /// Start of the window ending at `now`.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let date = now.date_naive();
        let midnight = |y: i32, m: u32, d: u32| {
            Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
                .single()
                .unwrap_or(now)
        };
        match self {
            SummaryPeriod::Day => midnight(date.year(), date.month(), date.day()),
            SummaryPeriod::Week => now - Duration::days(7),
            SummaryPeriod::Month => midnight(date.year(), date.month(), 1),
            SummaryPeriod::Year => midnight(date.year(), 1, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTotal {
    pub category: String,
    pub kind: TransactionType,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub period: SummaryPeriod,
    pub income: Decimal,
    pub expense: Decimal,
    pub net: Decimal,
    pub by_category: Vec<CategoryTotal>,
}

impl Summary {
    pub fn build(period: SummaryPeriod, entries: &[LedgerEntry]) -> Self {
        let totals = FlowTotals::of(entries);
        let by_category = aggregate(
            entries.iter().filter(|e| e.category.is_some()),
            GroupBy::CategoryAndType,
        )
        .into_iter()
        .filter_map(|group| {
            Some(CategoryTotal {
                category: group.key.category?,
                kind: group.key.kind?,
                amount: group.amount,
            })
        })
        .collect();
        Self {
            period,
            income: totals.income,
            expense: totals.expense,
            net: totals.net(),
            by_category,
        }
    }
}

/// Replays entries (in creation order) affecting `account_id` and returns
/// the balance they add up to.
pub fn replay_balance<'a>(
    account_id: AccountId,
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> Decimal {
    entries
        .into_iter()
        .filter(|e| e.affected_account() == Some(account_id))
        .map(LedgerEntry::signed_amount)
        .sum()
}
