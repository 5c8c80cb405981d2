// Command Pattern for reversible, replayable units of work
//
// Architecture:
// - UndoableCommand trait: apply(), revert(), description()
// - Command: opaque handle (body + lifecycle hooks + description)
// - Queue: cursor-addressed log of commands; every command owns a nested
//   queue that collects the commands its body submits
// - Stack: per-session LIFO of queues mirroring the body call stack
// - CommandEngine: session registry, thread affinity, the global lock,
//   non-undoable and undoable periods, notifications
//
// Queues live in a generational arena owned by the engine; stacks and
// commands refer to them by QueueId.

pub mod commands;
pub mod config;
pub mod manager;
pub mod queue;
pub mod session;
pub mod stack;
pub mod trait_def;

pub use commands::{Command, PeriodHandle, UndoablePeriod};
pub use config::{ConfigError, EngineConfig};
pub use manager::CommandEngine;
pub use session::SessionId;
pub use trait_def::{CommandError, CommandResult, UndoableCommand};
