// Command handles, lifecycle hooks and the undoable-period marker

use crate::command::manager::CommandEngine;
use crate::command::queue::QueueId;
use crate::command::session::SessionId;
use crate::command::trait_def::{CommandResult, FnCommand, StatefulCommand, UndoableCommand};
use std::fmt;

/// Lifecycle hook fired around apply/revert
pub type Hook = Box<dyn FnMut() + Send>;

/// The four optional lifecycle hooks of a command
#[derive(Default)]
pub struct CommandHooks {
    before_apply: Option<Hook>,
    after_apply: Option<Hook>,
    before_revert: Option<Hook>,
    after_revert: Option<Hook>,
}

impl CommandHooks {
    pub(crate) fn before_apply(&mut self) {
        if let Some(hook) = self.before_apply.as_mut() {
            hook();
        }
    }

    pub(crate) fn after_apply(&mut self) {
        if let Some(hook) = self.after_apply.as_mut() {
            hook();
        }
    }

    pub(crate) fn before_revert(&mut self) {
        if let Some(hook) = self.before_revert.as_mut() {
            hook();
        }
    }

    pub(crate) fn after_revert(&mut self) {
        if let Some(hook) = self.after_revert.as_mut() {
            hook();
        }
    }
}

pub(crate) enum CommandBody {
    Action(Box<dyn UndoableCommand>),
    /// Undoable-period marker: no payload, only scopes its nested queue
    Period,
}

/// Opaque handle to one reversible unit of work.
///
/// Built from a closure pair, a state-capturing triple or any
/// [`UndoableCommand`], then handed to the engine with
/// [`CommandEngine::enqueue_and_run`] or [`CommandEngine::enqueue`].
pub struct Command {
    pub(crate) body: CommandBody,
    pub(crate) hooks: CommandHooks,
    description: String,
}

impl Command {
    /// Wrap a custom command type
    pub fn new(command: impl UndoableCommand + 'static) -> Self {
        let description = command.description();
        Self {
            body: CommandBody::Action(Box::new(command)),
            hooks: CommandHooks::default(),
            description,
        }
    }

    /// Stateless command from an apply/revert closure pair
    pub fn from_fn<A, R>(apply: A, revert: R) -> Self
    where
        A: FnMut(&CommandEngine) -> CommandResult<()> + Send + 'static,
        R: FnMut(&CommandEngine) -> CommandResult<()> + Send + 'static,
    {
        Self::new(FnCommand::new(apply, revert))
    }

    /// Command whose revert does nothing. Mostly useful for composite
    /// commands whose effects all come from nested submissions.
    pub fn apply_only<A>(apply: A) -> Self
    where
        A: FnMut(&CommandEngine) -> CommandResult<()> + Send + 'static,
    {
        Self::new(FnCommand::apply_only(apply))
    }

    /// State-capturing command; see [`StatefulCommand`]
    pub fn with_state<T, A, G, S>(apply: A, get_state: G, set_state: S) -> Self
    where
        T: Clone + Send + 'static,
        A: FnMut(&CommandEngine) -> CommandResult<()> + Send + 'static,
        G: FnMut() -> CommandResult<T> + Send + 'static,
        S: FnMut(T) -> CommandResult<()> + Send + 'static,
    {
        Self::new(StatefulCommand::new(apply, get_state, set_state))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn on_before_apply(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.hooks.before_apply = Some(Box::new(hook));
        self
    }

    pub fn on_after_apply(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.hooks.after_apply = Some(Box::new(hook));
        self
    }

    pub fn on_before_revert(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.hooks.before_revert = Some(Box::new(hook));
        self
    }

    pub fn on_after_revert(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.hooks.after_revert = Some(Box::new(hook));
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn is_period(&self) -> bool {
        matches!(self.body, CommandBody::Period)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("description", &self.description)
            .field("period", &self.is_period())
            .finish()
    }
}

/// Marker that turns a block of caller code into one atomic undo/redo step.
///
/// Everything submitted between [`CommandEngine::begin_undoable_period`] and
/// [`CommandEngine::end_undoable_period`] lands in the marker's nested queue.
/// Undo reverts the whole block; redo replays the recorded commands instead
/// of rerunning the caller's code, so objects created inside the block keep
/// their identity across undo/redo.
pub struct UndoablePeriod {
    description: String,
    hooks: CommandHooks,
}

impl UndoablePeriod {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            hooks: CommandHooks::default(),
        }
    }

    pub fn on_before_revert(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.hooks.before_revert = Some(Box::new(hook));
        self
    }

    pub fn on_after_apply(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.hooks.after_apply = Some(Box::new(hook));
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn into_command(self) -> Command {
        Command {
            body: CommandBody::Period,
            hooks: self.hooks,
            description: self.description,
        }
    }
}

/// Returned by [`CommandEngine::begin_undoable_period`]; pass it back to
/// [`CommandEngine::end_undoable_period`] to close the block.
#[derive(Debug)]
#[must_use = "an undoable period stays open until it is ended"]
pub struct PeriodHandle {
    pub(crate) session: SessionId,
    pub(crate) parent: QueueId,
    pub(crate) nested: QueueId,
    pub(crate) description: String,
}

impl PeriodHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_description_defaults_to_body() {
        let cmd = Command::from_fn(|_| Ok(()), |_| Ok(()));
        assert_eq!(cmd.description(), "Command");

        let cmd = cmd.with_description("Rename track");
        assert_eq!(cmd.description(), "Rename track");
        assert!(!cmd.is_period());
    }

    #[test]
    fn test_hooks_fire_only_when_set() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let mut cmd = Command::apply_only(|_| Ok(())).on_before_apply(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        cmd.hooks.before_apply();
        cmd.hooks.after_apply();
        cmd.hooks.before_revert();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_period_marker_command() {
        let cmd = UndoablePeriod::new("Group edits").into_command();
        assert!(cmd.is_period());
        assert_eq!(cmd.description(), "Group edits");
    }
}
