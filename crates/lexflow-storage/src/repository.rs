//! Repository layer for data access

pub mod batches;
pub mod execution_log;
pub mod messages;
pub mod rules;
pub mod tokens;

// Re-export repository traits
pub use batches::{BatchFilter, BatchRepository};
pub use execution_log::ExecutionLogRepository;
pub use messages::{MessageInsert, MessageRepository};
pub use rules::RuleRepository;
pub use tokens::TokenRepository;

// Re-export PostgreSQL implementations
pub use batches::DbBatchRepository;
pub use execution_log::DbExecutionLogRepository;
pub use messages::DbMessageRepository;
pub use rules::DbRuleRepository;
pub use tokens::DbTokenRepository;
