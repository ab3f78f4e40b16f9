use std::io::Read;

use csv::{DeserializeRecordsIntoIter, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::account::AccountKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Open,
    Deposit,
    Withdraw,
    Transfer,
    Close,
}

/// One scripted operation. `user`, `account` and `target` are script-local
/// aliases; for `open`, `amount` is the credit line of a credit account.
#[derive(Debug, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op: OperationKind,
    pub user: String,
    pub account: String,
    pub target: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub kind: Option<AccountKind>,
}

/// Parses an operation script in CSV format, yielding the line each row
/// started on.
pub struct CsvOperationParser<R> {
    iter: DeserializeRecordsIntoIter<R, Operation>,
}

impl<R> CsvOperationParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);

        Self {
            iter: reader.into_deserialize(),
        }
    }
}

impl<R> Iterator for CsvOperationParser<R>
where
    R: Read,
{
    type Item = (u64, Result<Operation, csv::Error>);

    fn next(&mut self) -> Option<Self::Item> {
        let curr_line = self.iter.reader().position().line();
        self.iter.next().map(|row| (curr_line, row))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parses_rows_with_empty_columns() {
        let script = "type,user,account,target,amount,currency,kind\n\
                      open, alice, a1, , , RUB, debit\n\
                      transfer, alice, a1, 40817810999, 12.50, RUB,\n\
                      refund, alice, a1, , 1, RUB,\n";
        let rows: Vec<_> = CsvOperationParser::new(script.as_bytes()).collect();
        assert_eq!(rows.len(), 3);

        let (_, open) = &rows[0];
        let open = open.as_ref().unwrap();
        assert_eq!(open.op, OperationKind::Open);
        assert_eq!(open.kind, Some(AccountKind::Debit));
        assert_eq!(open.target, None);

        let (_, transfer) = &rows[1];
        let transfer = transfer.as_ref().unwrap();
        assert_eq!(transfer.amount, Some(dec!(12.50)));
        assert_eq!(transfer.target.as_deref(), Some("40817810999"));

        let (_, unknown) = &rows[2];
        assert!(unknown.is_err());
    }
}
