// CommandVec - a Vec whose mutations are undoable engine commands

use crate::command::manager::CommandEngine;
use crate::command::trait_def::{CommandError, CommandResult, UndoableCommand};
use crate::command::Command;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;

/// Outcome of a before-mutation hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationDecision {
    Proceed,
    Cancel,
}

/// A pending change, shown to the before-mutation hook
#[derive(Debug)]
pub enum Mutation<'a, T> {
    Push { value: &'a T },
    Insert { index: usize, value: &'a T },
    Remove { index: usize },
    Set { index: usize, value: &'a T },
    Clear,
}

type BeforeChange<T> = Arc<dyn Fn(&Mutation<'_, T>) -> MutationDecision + Send + Sync>;

/// Commandified vector.
///
/// Every mutation is submitted to the engine with `enqueue_and_run`, so it
/// lands in whatever queue is active for the calling thread: the session
/// root, the nested queue of a running command, or an undoable period.
///
/// The data sits behind an advisory `RwLock`. The engine never takes it
/// for readers; anyone iterating concurrently with other sessions must hold
/// [`read`](Self::read) for the whole sequence.
pub struct CommandVec<T> {
    engine: CommandEngine,
    items: Arc<RwLock<Vec<T>>>,
    before_change: Option<BeforeChange<T>>,
}

impl<T> Clone for CommandVec<T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            items: self.items.clone(),
            before_change: self.before_change.clone(),
        }
    }
}

impl<T> CommandVec<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(engine: &CommandEngine) -> Self {
        Self::from_vec(engine, Vec::new())
    }

    pub fn from_vec(engine: &CommandEngine, items: Vec<T>) -> Self {
        Self {
            engine: engine.clone(),
            items: Arc::new(RwLock::new(items)),
            before_change: None,
        }
    }

    /// Install a hook consulted before every mutation is submitted.
    /// Returning [`MutationDecision::Cancel`] skips the mutation.
    pub fn with_before_change(
        mut self,
        hook: impl Fn(&Mutation<'_, T>) -> MutationDecision + Send + Sync + 'static,
    ) -> Self {
        self.before_change = Some(Arc::new(hook));
        self
    }

    pub fn engine(&self) -> &CommandEngine {
        &self.engine
    }

    fn allowed(&self, mutation: Mutation<'_, T>) -> bool {
        match &self.before_change {
            Some(hook) => hook(&mutation) == MutationDecision::Proceed,
            None => true,
        }
    }

    // Mutations ---------------------------------------------------------

    /// Append at whatever the end is when the command runs
    pub fn push(&self, value: T) -> CommandResult<bool> {
        if !self.allowed(Mutation::Push { value: &value }) {
            return Ok(false);
        }
        self.engine.enqueue_and_run(Command::new(Append {
            items: self.items.clone(),
            value,
            landed_at: None,
        }))
    }

    pub fn insert(&self, index: usize, value: T) -> CommandResult<bool> {
        if !self.allowed(Mutation::Insert { index, value: &value }) {
            return Ok(false);
        }
        let (apply_items, revert_items) = (self.items.clone(), self.items.clone());
        let command = Command::from_fn(
            move |_| {
                let mut items = apply_items.write();
                if index > items.len() {
                    return Err(out_of_bounds(index, items.len()));
                }
                items.insert(index, value.clone());
                Ok(())
            },
            move |_| {
                let mut items = revert_items.write();
                if index >= items.len() {
                    return Err(CommandError::UndoFailed(format!("no element at {index} to take back")));
                }
                items.remove(index);
                Ok(())
            },
        )
        .with_description(format!("Insert at {index}"));
        self.engine.enqueue_and_run(command)
    }

    pub fn remove(&self, index: usize) -> CommandResult<bool> {
        if !self.allowed(Mutation::Remove { index }) {
            return Ok(false);
        }
        self.engine.enqueue_and_run(Command::new(RemoveAt {
            items: self.items.clone(),
            index,
            removed: None,
        }))
    }

    pub fn set(&self, index: usize, value: T) -> CommandResult<bool> {
        if !self.allowed(Mutation::Set { index, value: &value }) {
            return Ok(false);
        }
        self.engine.enqueue_and_run(Command::new(SetAt {
            items: self.items.clone(),
            index,
            value,
            previous: None,
        }))
    }

    pub fn clear(&self) -> CommandResult<bool> {
        if !self.allowed(Mutation::Clear) {
            return Ok(false);
        }
        let (apply_items, get_items, set_items) = (self.items.clone(), self.items.clone(), self.items.clone());
        let command = Command::with_state(
            move |_| {
                apply_items.write().clear();
                Ok(())
            },
            move || Ok(get_items.read().clone()),
            move |previous: Vec<T>| {
                *set_items.write() = previous;
                Ok(())
            },
        )
        .with_description("Clear");
        self.engine.enqueue_and_run(command)
    }

    // Reads -------------------------------------------------------------

    /// Hold the advisory read lock across a read/iterate sequence
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.items.read()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.items.read().get(index).cloned()
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.read().clone()
    }
}

fn out_of_bounds(index: usize, len: usize) -> CommandError {
    CommandError::ExecutionFailed(format!("index {index} out of bounds (len {len})"))
}

struct Append<T> {
    items: Arc<RwLock<Vec<T>>>,
    value: T,
    landed_at: Option<usize>,
}

impl<T: Clone + Send + Sync> UndoableCommand for Append<T> {
    fn apply(&mut self, _engine: &CommandEngine) -> CommandResult<()> {
        let mut items = self.items.write();
        self.landed_at = Some(items.len());
        items.push(self.value.clone());
        Ok(())
    }

    fn revert(&mut self, _engine: &CommandEngine) -> CommandResult<()> {
        let index = self
            .landed_at
            .take()
            .ok_or_else(|| CommandError::UndoFailed("Append was never applied".into()))?;
        let mut items = self.items.write();
        if index >= items.len() {
            return Err(CommandError::UndoFailed(format!("no element at {index} to take back")));
        }
        items.remove(index);
        Ok(())
    }

    fn description(&self) -> String {
        "Append".into()
    }
}

struct RemoveAt<T> {
    items: Arc<RwLock<Vec<T>>>,
    index: usize,
    removed: Option<T>,
}

impl<T: Send + Sync> UndoableCommand for RemoveAt<T> {
    fn apply(&mut self, _engine: &CommandEngine) -> CommandResult<()> {
        let mut items = self.items.write();
        if self.index >= items.len() {
            return Err(out_of_bounds(self.index, items.len()));
        }
        self.removed = Some(items.remove(self.index));
        Ok(())
    }

    fn revert(&mut self, _engine: &CommandEngine) -> CommandResult<()> {
        let value = self
            .removed
            .take()
            .ok_or_else(|| CommandError::UndoFailed("No removed element stored".into()))?;
        let mut items = self.items.write();
        if self.index > items.len() {
            let index = self.index;
            self.removed = Some(value);
            return Err(CommandError::UndoFailed(format!("cannot put element back at {index}")));
        }
        items.insert(self.index, value);
        Ok(())
    }

    fn description(&self) -> String {
        format!("Remove at {}", self.index)
    }
}

struct SetAt<T> {
    items: Arc<RwLock<Vec<T>>>,
    index: usize,
    value: T,
    previous: Option<T>,
}

impl<T: Clone + Send + Sync> UndoableCommand for SetAt<T> {
    fn apply(&mut self, _engine: &CommandEngine) -> CommandResult<()> {
        let mut items = self.items.write();
        let len = items.len();
        let slot = items
            .get_mut(self.index)
            .ok_or_else(|| out_of_bounds(self.index, len))?;
        self.previous = Some(std::mem::replace(slot, self.value.clone()));
        Ok(())
    }

    fn revert(&mut self, _engine: &CommandEngine) -> CommandResult<()> {
        let previous = self
            .previous
            .take()
            .ok_or_else(|| CommandError::UndoFailed("No previous element stored".into()))?;
        let mut items = self.items.write();
        match items.get_mut(self.index) {
            Some(slot) => {
                *slot = previous;
                Ok(())
            }
            None => Err(CommandError::UndoFailed(format!("no element at {}", self.index))),
        }
    }

    fn description(&self) -> String {
        format!("Set element {}", self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutations_undo_in_reverse() {
        let engine = CommandEngine::new();
        let list = CommandVec::new(&engine);

        list.push(1).unwrap();
        list.push(2).unwrap();
        list.insert(0, 0).unwrap();
        list.set(2, 20).unwrap();
        list.remove(1).unwrap();
        assert_eq!(list.snapshot(), vec![0, 20]);

        engine.undo_last().unwrap();
        assert_eq!(list.snapshot(), vec![0, 1, 20]);
        engine.undo_last().unwrap();
        assert_eq!(list.snapshot(), vec![0, 1, 2]);
        while engine.undo_last().unwrap() {}
        assert!(list.is_empty());
    }

    #[test]
    fn test_clear_restores_everything() {
        let engine = CommandEngine::new();
        let list = CommandVec::from_vec(&engine, vec!["a", "b", "c"]);

        list.clear().unwrap();
        assert!(list.is_empty());

        engine.undo_last().unwrap();
        assert_eq!(list.snapshot(), vec!["a", "b", "c"]);

        engine.redo_last().unwrap();
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_cancelled_mutation_is_not_submitted() {
        let engine = CommandEngine::new();
        let list = CommandVec::from_vec(&engine, vec![1, 2, 3]).with_before_change(|m| match m {
            Mutation::Remove { .. } => MutationDecision::Cancel,
            _ => MutationDecision::Proceed,
        });

        assert!(!list.remove(0).unwrap());
        assert_eq!(list.len(), 3);
        assert!(!engine.can_undo(engine.current_session()));

        assert!(list.push(4).unwrap());
        assert_eq!(list.get(3), Some(4));
    }

    #[test]
    fn test_push_lands_at_end_when_run() {
        let engine = CommandEngine::new();
        let list = CommandVec::from_vec(&engine, vec![1]);
        let inner = list.clone();

        // The outer body grows the list before the queued push executes.
        engine
            .enqueue_and_run(Command::apply_only(move |_| {
                inner.insert(0, 0)?;
                inner.push(2)?;
                Ok(())
            }))
            .unwrap();
        assert_eq!(list.snapshot(), vec![0, 1, 2]);

        engine.undo_last().unwrap();
        assert_eq!(list.snapshot(), vec![1]);
    }

    #[test]
    fn test_remove_revert_fails_when_index_is_gone() {
        let engine = CommandEngine::new();
        let list = CommandVec::from_vec(&engine, vec![1, 2, 3]);
        let session = engine.current_session();

        list.remove(2).unwrap();
        // Shrink the list behind the engine's back.
        engine.perform_non_undoable(|_| list.clear()).unwrap();
        assert!(list.is_empty());

        assert!(matches!(engine.undo_last(), Err(CommandError::UndoFailed(_))));
        assert!(list.is_empty());
        assert!(engine.can_undo(session));
    }

    #[test]
    fn test_out_of_bounds_remove_fails() {
        let engine = CommandEngine::new();
        let list: CommandVec<i32> = CommandVec::new(&engine);

        let result = list.remove(5);
        assert!(matches!(result, Err(CommandError::ExecutionFailed(_))));
    }
}
