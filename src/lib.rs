/// Account state: balances, credit line, daily limit counters and closure.
/// State is modified using events, which are created by handling commands.
pub mod account;

/// Validated commands built from raw requests, executed by [`engine`].
pub mod command;

pub mod clock;
pub mod config;
pub mod error;

/// Ledger entries, their income/expense classification and the pure
/// queries built on them (filters, pages, aggregation, summaries, replay).
pub mod ledger;

/// Transfer records, their status machine and reusable transfer templates.
pub mod transfer;

/// Storage-engine-agnostic repositories with an explicit unit of work, plus
/// an in-memory implementation.
pub mod store;

/// Components coordinating commands, accounts, limits and the ledger behind
/// the [`engine::Engine`] facade.
pub mod engine;

/// CSV replay driver used by the binary and the integration tests.
pub mod bin_utils;
