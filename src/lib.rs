// cmdq - reversible command engine: library exports for tests and benchmarks

pub mod collections;
pub mod command;
pub mod messaging;

// Re-export commonly used types for convenience
pub use collections::{CommandVec, Mutation, MutationDecision};
pub use command::{
    Command, CommandEngine, CommandError, CommandResult, ConfigError, EngineConfig, PeriodHandle,
    SessionId, UndoableCommand, UndoablePeriod,
};
pub use messaging::{EventBus, QueueAction, QueueEvent, SubscriptionId};
