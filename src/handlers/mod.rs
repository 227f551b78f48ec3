//! Command Handlers module
//!
//! Handlers that orchestrate transaction submission, processing and queries.
//! Each handler coordinates the ledger, the audit log, and the queue.

mod commands;
mod process_handler;
mod query_handler;
mod submit_handler;

pub use commands::*;
pub use process_handler::ProcessTransactionHandler;
pub use query_handler::TransactionQueryHandler;
pub use submit_handler::SubmitTransactionHandler;
