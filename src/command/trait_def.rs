// UndoableCommand trait definition and the closure-backed command bodies

use crate::command::manager::CommandEngine;
use crate::command::session::SessionId;

/// Result type for command operations
pub type CommandResult<T> = Result<T, CommandError>;

/// Errors that can occur while running or sequencing commands
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Command execution failed
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Undo operation failed
    #[error("Undo failed: {0}")]
    UndoFailed(String),

    /// Invalid state for this operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A command was submitted from inside a revert body while the strict
    /// policy is active. The queue is left untouched.
    #[error("Cannot enqueue '{description}' in session {session}: an undo is in progress")]
    EnqueueDuringRevert {
        session: SessionId,
        description: String,
    },

    /// An undoable period was ended while another nested queue sat above it
    #[error("Undoable period '{description}' ended out of order")]
    UnbalancedPeriod { description: String },
}

/// Trait for commands that support undo/redo
///
/// Implementors own whatever handle they need to the data they mutate
/// (typically an `Arc<Mutex<_>>` or a commandified collection). The engine
/// handed to `apply` may be used to submit further commands; those land in
/// this command's nested queue and are reverted together with it.
///
/// # Thread Safety
/// Commands must be Send as they may be applied from any caller thread.
///
/// # Example
/// ```no_run
/// use cmdq::command::manager::CommandEngine;
/// use cmdq::command::trait_def::{CommandError, CommandResult, UndoableCommand};
/// use std::sync::{Arc, Mutex};
///
/// struct RenameCommand {
///     title: Arc<Mutex<String>>,
///     new_title: String,
///     previous: Option<String>,
/// }
///
/// impl UndoableCommand for RenameCommand {
///     fn apply(&mut self, _engine: &CommandEngine) -> CommandResult<()> {
///         let mut title = self.title.lock().unwrap();
///         self.previous = Some(std::mem::replace(&mut *title, self.new_title.clone()));
///         Ok(())
///     }
///
///     fn revert(&mut self, _engine: &CommandEngine) -> CommandResult<()> {
///         let previous = self
///             .previous
///             .take()
///             .ok_or_else(|| CommandError::UndoFailed("rename was never applied".into()))?;
///         *self.title.lock().unwrap() = previous;
///         Ok(())
///     }
///
///     fn description(&self) -> String {
///         format!("Rename to {:?}", self.new_title)
///     }
/// }
/// ```
pub trait UndoableCommand: Send {
    /// Execute the command
    ///
    /// Called once per enqueue, and again on redo unless the command is being
    /// replayed inside an undoable period.
    fn apply(&mut self, engine: &CommandEngine) -> CommandResult<()>;

    /// Undo the command
    ///
    /// Restores the observable state to what it was before `apply`. Nested
    /// commands spawned by `apply` have already been reverted when this runs.
    fn revert(&mut self, engine: &CommandEngine) -> CommandResult<()>;

    /// Get a human-readable description of the command
    fn description(&self) -> String;
}

/// Boxed body closure shared by the closure-backed commands
pub type BodyFn = Box<dyn FnMut(&CommandEngine) -> CommandResult<()> + Send>;

/// Stateless command built from an apply closure and an optional revert
/// closure. A missing revert closure makes revert a no-op.
pub struct FnCommand {
    apply: BodyFn,
    revert: Option<BodyFn>,
    description: String,
}

impl FnCommand {
    pub fn new<A, R>(apply: A, revert: R) -> Self
    where
        A: FnMut(&CommandEngine) -> CommandResult<()> + Send + 'static,
        R: FnMut(&CommandEngine) -> CommandResult<()> + Send + 'static,
    {
        Self {
            apply: Box::new(apply),
            revert: Some(Box::new(revert)),
            description: String::from("Command"),
        }
    }

    pub fn apply_only<A>(apply: A) -> Self
    where
        A: FnMut(&CommandEngine) -> CommandResult<()> + Send + 'static,
    {
        Self {
            apply: Box::new(apply),
            revert: None,
            description: String::from("Command"),
        }
    }
}

impl UndoableCommand for FnCommand {
    fn apply(&mut self, engine: &CommandEngine) -> CommandResult<()> {
        (self.apply)(engine)
    }

    fn revert(&mut self, engine: &CommandEngine) -> CommandResult<()> {
        match self.revert.as_mut() {
            Some(revert) => revert(engine),
            None => Ok(()),
        }
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// State-capturing command.
///
/// `get_state` runs right before every `apply` and its result is kept as the
/// snapshot; `set_state` receives a copy of that snapshot on every revert.
pub struct StatefulCommand<T> {
    apply: BodyFn,
    get_state: Box<dyn FnMut() -> CommandResult<T> + Send>,
    set_state: Box<dyn FnMut(T) -> CommandResult<()> + Send>,
    snapshot: Option<T>,
}

impl<T> StatefulCommand<T>
where
    T: Clone + Send + 'static,
{
    pub fn new<A, G, S>(apply: A, get_state: G, set_state: S) -> Self
    where
        A: FnMut(&CommandEngine) -> CommandResult<()> + Send + 'static,
        G: FnMut() -> CommandResult<T> + Send + 'static,
        S: FnMut(T) -> CommandResult<()> + Send + 'static,
    {
        Self {
            apply: Box::new(apply),
            get_state: Box::new(get_state),
            set_state: Box::new(set_state),
            snapshot: None,
        }
    }

    /// The state captured by the last apply, if any
    pub fn snapshot(&self) -> Option<&T> {
        self.snapshot.as_ref()
    }
}

impl<T> UndoableCommand for StatefulCommand<T>
where
    T: Clone + Send + 'static,
{
    fn apply(&mut self, engine: &CommandEngine) -> CommandResult<()> {
        self.snapshot = Some((self.get_state)()?);
        (self.apply)(engine)
    }

    fn revert(&mut self, _engine: &CommandEngine) -> CommandResult<()> {
        let previous = self
            .snapshot
            .clone()
            .ok_or_else(|| CommandError::UndoFailed("No previous state captured".into()))?;
        (self.set_state)(previous)
    }

    fn description(&self) -> String {
        String::from("Stateful command")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_stateful_revert_without_apply_fails() {
        let engine = CommandEngine::new();
        let mut cmd = StatefulCommand::new(|_| Ok(()), || Ok(1u32), |_| Ok(()));
        let result = cmd.revert(&engine);
        assert!(matches!(result, Err(CommandError::UndoFailed(_))));
    }

    #[test]
    fn test_stateful_snapshot_taken_before_apply() {
        let engine = CommandEngine::new();
        let value = Arc::new(Mutex::new(5));

        let (apply_target, get_target, set_target) = (value.clone(), value.clone(), value.clone());
        let mut cmd = StatefulCommand::new(
            move |_| {
                *apply_target.lock().unwrap() = 9;
                Ok(())
            },
            move || Ok(*get_target.lock().unwrap()),
            move |old| {
                *set_target.lock().unwrap() = old;
                Ok(())
            },
        );

        cmd.apply(&engine).unwrap();
        assert_eq!(cmd.snapshot(), Some(&5));
        assert_eq!(*value.lock().unwrap(), 9);

        cmd.revert(&engine).unwrap();
        assert_eq!(*value.lock().unwrap(), 5);
    }

    #[test]
    fn test_fn_command_without_revert_is_noop() {
        let engine = CommandEngine::new();
        let mut cmd = FnCommand::apply_only(|_| Ok(()));
        assert!(cmd.revert(&engine).is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = CommandError::ExecutionFailed("boom".into());
        assert_eq!(err.to_string(), "Execution failed: boom");
    }
}
