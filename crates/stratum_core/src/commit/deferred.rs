//! Work queued during the ordered pass and flushed after it.

use crate::entity::ObjectRef;
use crate::error::{CommitError, CommitResult};
use std::collections::{HashMap, HashSet};
use stratum_store::{WriteCommand, WriteExecutor};
use tracing::{debug, trace};

/// FIFO queues keyed by name; keys iterate in first-enqueue order.
#[derive(Debug)]
struct KeyedQueue<T> {
    keys: Vec<String>,
    items: HashMap<String, Vec<T>>,
}

impl<T> Default for KeyedQueue<T> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            items: HashMap::new(),
        }
    }
}

impl<T> KeyedQueue<T> {
    fn push(&mut self, key: &str, item: T) {
        match self.items.get_mut(key) {
            Some(queue) => queue.push(item),
            None => {
                self.keys.push(key.to_string());
                self.items.insert(key.to_string(), vec![item]);
            }
        }
    }

    fn len(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    /// Removes every queue, in key order.
    fn drain(&mut self) -> Vec<(String, Vec<T>)> {
        let mut items = std::mem::take(&mut self.items);
        std::mem::take(&mut self.keys)
            .into_iter()
            .filter_map(|key| items.remove(&key).map(|queue| (key, queue)))
            .collect()
    }

    fn clear(&mut self) {
        self.keys.clear();
        self.items.clear();
    }
}

/// A join-table or collection change waiting for the flush.
#[derive(Debug, Clone)]
pub struct ModificationEvent {
    /// Command to execute.
    pub command: WriteCommand,
    /// Object the event owns, if any. An object may be owned by at most one
    /// deferred event per commit.
    pub component: Option<ObjectRef>,
}

impl ModificationEvent {
    /// Creates an event that owns no object.
    pub fn new(command: WriteCommand) -> Self {
        Self {
            command,
            component: None,
        }
    }

    /// Creates an event owning `component`.
    pub fn with_component(command: WriteCommand, component: ObjectRef) -> Self {
        Self {
            command,
            component: Some(component),
        }
    }
}

/// Deferred modification events (keyed by owning mapping) and deferred write
/// calls (keyed by target table).
#[derive(Debug, Default)]
pub struct DeferredWork {
    modifications: KeyedQueue<ModificationEvent>,
    calls: KeyedQueue<WriteCommand>,
    components: HashSet<ObjectRef>,
}

impl DeferredWork {
    /// Creates empty queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims an object as a deferred component.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateComponent` if the object was already claimed.
    pub fn register_component(&mut self, component: &ObjectRef) -> CommitResult<()> {
        if !self.components.insert(component.clone()) {
            return Err(CommitError::DuplicateComponent {
                entity_type: component.entity_type().clone(),
                primary_key: component.primary_key(),
            });
        }
        Ok(())
    }

    /// Checks if an object was claimed as a deferred component.
    #[must_use]
    pub fn is_component(&self, object: &ObjectRef) -> bool {
        self.components.contains(object)
    }

    /// Queues an event under the mapping that owns it.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateComponent` if the event's component is already
    /// claimed.
    pub fn enqueue_modification(
        &mut self,
        owner: &str,
        event: ModificationEvent,
    ) -> CommitResult<()> {
        if let Some(component) = &event.component {
            self.register_component(component)?;
        }
        trace!(owner, table = event.command.table(), "deferring modification event");
        self.modifications.push(owner, event);
        Ok(())
    }

    /// Queues a low-level write against `table`.
    pub fn enqueue_call(&mut self, table: &str, call: WriteCommand) {
        trace!(table, kind = ?call.kind(), "deferring call");
        self.calls.push(table, call);
    }

    /// Returns the number of queued events.
    #[must_use]
    pub fn pending_modifications(&self) -> usize {
        self.modifications.len()
    }

    /// Returns the number of queued calls.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.calls.len()
    }

    /// Executes every queued event, mapping by mapping, and empties the
    /// queue. Returns the number executed.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failure. Nothing is retried.
    pub fn flush_modifications<E: WriteExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
    ) -> CommitResult<usize> {
        let mut executed = 0;
        for (owner, events) in self.modifications.drain() {
            debug!(owner = %owner, events = events.len(), "flushing modification events");
            for event in events {
                executor.execute(&event.command)?;
                executed += 1;
            }
        }
        Ok(executed)
    }

    /// Executes every queued call, table by table, and empties the queue.
    /// Returns the number executed.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failure. Nothing is retried.
    pub fn flush_calls<E: WriteExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
    ) -> CommitResult<usize> {
        let mut executed = 0;
        for (table, calls) in self.calls.drain() {
            debug!(table = %table, calls = calls.len(), "flushing deferred calls");
            for call in calls {
                executor.execute(&call)?;
                executed += 1;
            }
        }
        Ok(executed)
    }

    /// Drops everything queued or claimed.
    pub fn clear(&mut self) {
        self.modifications.clear();
        self.calls.clear();
        self.components.clear();
    }

    /// Checks if nothing is queued or claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modifications.len() == 0 && self.calls.len() == 0 && self.components.is_empty()
    }
}
