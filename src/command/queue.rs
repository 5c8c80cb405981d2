// Queue - cursor-addressed command log, and the arena that owns every queue
//
// A queue is a sequence of commands plus a cursor on the last applied one:
//
//   entries: [c0, c1, c2, c3]
//                     ^ cursor = Some(2)
//   applied = c0..=c2, undone = c3
//
// Enqueuing always drops the undone suffix first. Every command owns a
// nested queue (for commands spawned while it runs); nested queues live in
// the same arena and are released together with their owning entry.

use crate::command::commands::Command;

/// Generational index of a queue inside the [`QueueArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId {
    index: u32,
    generation: u32,
}

pub(crate) struct Entry {
    /// `None` while the command is checked out for execution
    command: Option<Command>,
    nested: QueueId,
}

/// Ordered log of commands with a cursor separating applied from undone
#[derive(Default)]
pub struct Queue {
    entries: Vec<Entry>,
    cursor: Option<usize>,
    undo_in_progress: bool,
    pushed: bool,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when at least one command is applied
    pub fn can_undo(&self) -> bool {
        self.cursor.is_some()
    }

    /// True when there is a command after the cursor
    pub fn can_do(&self) -> bool {
        self.next_index().is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Number of commands in the applied prefix
    pub fn applied_count(&self) -> usize {
        self.cursor.map_or(0, |c| c + 1)
    }

    pub fn undo_in_progress(&self) -> bool {
        self.undo_in_progress
    }

    /// True while this queue sits on a session stack above its owner
    pub fn is_pushed(&self) -> bool {
        self.pushed
    }

    /// Description of the command that would be undone
    pub fn undo_description(&self) -> Option<String> {
        self.cursor.and_then(|c| self.description_at(c))
    }

    /// Description of the command that would be redone
    pub fn redo_description(&self) -> Option<String> {
        self.next_index().and_then(|i| self.description_at(i))
    }

    fn description_at(&self, index: usize) -> Option<String> {
        self.entries
            .get(index)
            .and_then(|e| e.command.as_ref())
            .map(|c| c.description().to_owned())
    }

    pub(crate) fn next_index(&self) -> Option<usize> {
        match self.cursor {
            Some(c) if c + 1 < self.entries.len() => Some(c + 1),
            Some(_) => None,
            None if !self.entries.is_empty() => Some(0),
            None => None,
        }
    }

    pub(crate) fn set_cursor(&mut self, cursor: Option<usize>) {
        self.cursor = cursor;
    }

    pub(crate) fn set_undo_in_progress(&mut self, value: bool) -> bool {
        std::mem::replace(&mut self.undo_in_progress, value)
    }

    pub(crate) fn set_pushed(&mut self, value: bool) {
        self.pushed = value;
    }

    /// Drop the undone suffix. Returns the nested queues to release.
    pub(crate) fn truncate_after_cursor(&mut self) -> Vec<QueueId> {
        let keep = self.applied_count();
        self.entries.drain(keep..).map(|e| e.nested).collect()
    }

    pub(crate) fn append(&mut self, command: Command, nested: QueueId) {
        self.entries.push(Entry {
            command: Some(command),
            nested,
        });
    }

    /// Evict the oldest applied commands until at most `max` remain
    pub(crate) fn trim_front(&mut self, max: usize) -> Vec<QueueId> {
        let excess = self.entries.len().saturating_sub(max);
        let excess = excess.min(self.applied_count());
        if excess == 0 {
            return Vec::new();
        }
        self.cursor = self.cursor.and_then(|c| c.checked_sub(excess));
        self.entries.drain(..excess).map(|e| e.nested).collect()
    }

    pub(crate) fn nested_at(&self, index: usize) -> Option<QueueId> {
        self.entries.get(index).map(|e| e.nested)
    }

    /// Nested queue of the last applied command
    pub(crate) fn last_applied_nested(&self) -> Option<QueueId> {
        self.cursor.and_then(|c| self.nested_at(c))
    }

    pub(crate) fn checkout(&mut self, index: usize) -> Option<Command> {
        self.entries.get_mut(index).and_then(|e| e.command.take())
    }

    pub(crate) fn restore(&mut self, index: usize, command: Command) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.command = Some(command);
        }
    }

    /// Remove the command under the cursor and step back, leaving no trail
    pub(crate) fn remove_last_applied(&mut self) -> Option<QueueId> {
        let index = self.cursor?;
        let entry = self.entries.remove(index);
        self.cursor = index.checked_sub(1);
        Some(entry.nested)
    }

    pub(crate) fn clear(&mut self) -> Vec<QueueId> {
        self.cursor = None;
        self.entries.drain(..).map(|e| e.nested).collect()
    }
}

struct Slot {
    generation: u32,
    queue: Option<Queue>,
}

/// Owns every queue of an engine, root and nested alike
#[derive(Default)]
pub struct QueueArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl QueueArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self) -> QueueId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.queue = Some(Queue::new());
            return QueueId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            queue: Some(Queue::new()),
        });
        QueueId {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, id: QueueId) -> Option<&Queue> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.queue.as_ref())
    }

    pub fn get_mut(&mut self, id: QueueId) -> Option<&mut Queue> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.queue.as_mut())
    }

    /// Release a queue and, transitively, the nested queues of its commands
    pub fn release(&mut self, id: QueueId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(slot) = self
                .slots
                .get_mut(id.index as usize)
                .filter(|s| s.generation == id.generation)
            else {
                continue;
            };
            if let Some(mut queue) = slot.queue.take() {
                pending.extend(queue.clear());
                self.free.push(id.index);
                self.live -= 1;
            }
        }
    }

    pub fn release_all(&mut self, ids: impl IntoIterator<Item = QueueId>) {
        for id in ids {
            self.release(id);
        }
    }

    /// Number of live queues
    pub fn live(&self) -> usize {
        self.live
    }
}
