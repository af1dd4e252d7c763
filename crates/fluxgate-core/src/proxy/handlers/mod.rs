//! Handlers for the store-or-delegate method families.

pub mod blocks;
pub mod logs;
pub mod transactions;

pub use blocks::BlocksHandler;
pub use logs::LogsHandler;
pub use transactions::TransactionsHandler;
