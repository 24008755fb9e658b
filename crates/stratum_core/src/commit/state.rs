//! Per-object commit progress.

use crate::entity::ObjectRef;
use std::collections::{HashMap, HashSet};

/// Progress of one object through a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitProgress {
    /// Writing started; references are being resolved.
    Pre,
    /// The object's row is written; dependent work may still be pending.
    Post,
    /// Done.
    Complete,
    /// Must not be written by this commit (e.g. it is being deleted).
    Ignore,
}

/// Tracks which objects a commit attempt has processed.
///
/// Keys are object identities, never values. Writers check
/// [`CommitTracker::is_processed`] before touching an object, which is what
/// stops a cyclic reference from writing the same row twice.
///
/// A depth counter follows nested single-object writes. Outside an active
/// unit-of-work commit the tracker resets itself once the outermost write
/// completes.
#[derive(Debug, Default)]
pub struct CommitTracker {
    states: HashMap<ObjectRef, CommitProgress>,
    shallow: HashSet<ObjectRef>,
    depth: usize,
    active: bool,
}

impl CommitTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether a unit-of-work commit is running.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Checks if a unit-of-work commit is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns the nesting depth of in-progress writes.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Marks an object as being written.
    pub fn mark_pre_modify(&mut self, object: &ObjectRef) {
        self.states.insert(object.clone(), CommitProgress::Pre);
        self.depth += 1;
    }

    /// Marks an object's row as written.
    pub fn mark_post_modify(&mut self, object: &ObjectRef) {
        self.states.insert(object.clone(), CommitProgress::Post);
    }

    /// Marks an object as done, unwinding one level of depth.
    pub fn mark_complete(&mut self, object: &ObjectRef) {
        self.states.insert(object.clone(), CommitProgress::Complete);
        self.depth = self.depth.saturating_sub(1);
        if !self.active && self.depth == 0 {
            self.reset();
        }
    }

    /// Excludes an object from writing.
    pub fn mark_ignore(&mut self, object: &ObjectRef) {
        self.states.insert(object.clone(), CommitProgress::Ignore);
    }

    /// Checks if the object has any state.
    #[must_use]
    pub fn is_processed(&self, object: &ObjectRef) -> bool {
        self.states.contains_key(object)
    }

    /// Returns the state of an object.
    #[must_use]
    pub fn state_of(&self, object: &ObjectRef) -> Option<CommitProgress> {
        self.states.get(object).copied()
    }

    /// Checks if the object is being written.
    #[must_use]
    pub fn is_in_pre_modify(&self, object: &ObjectRef) -> bool {
        self.state_of(object) == Some(CommitProgress::Pre)
    }

    /// Checks if the object's row is written but the object is not done.
    #[must_use]
    pub fn is_in_post_modify(&self, object: &ObjectRef) -> bool {
        self.state_of(object) == Some(CommitProgress::Post)
    }

    /// Checks if the object's row no longer needs writing: complete, past its
    /// row write, or ignored.
    #[must_use]
    pub fn is_completed_or_ignored(&self, object: &ObjectRef) -> bool {
        matches!(
            self.state_of(object),
            Some(CommitProgress::Complete | CommitProgress::Post | CommitProgress::Ignore)
        )
    }

    /// Checks if the object is done.
    #[must_use]
    pub fn is_complete(&self, object: &ObjectRef) -> bool {
        self.state_of(object) == Some(CommitProgress::Complete)
    }

    /// Records that the object was written with some references left out.
    pub fn mark_shallow_committed(&mut self, object: &ObjectRef) {
        self.shallow.insert(object.clone());
    }

    /// Checks if the object was written with some references left out.
    #[must_use]
    pub fn is_shallow_committed(&self, object: &ObjectRef) -> bool {
        self.shallow.contains(object)
    }

    /// Removes the shallow mark once the completing update is written.
    pub fn clear_shallow_committed(&mut self, object: &ObjectRef) {
        self.shallow.remove(object);
    }

    /// Checks if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty() && self.shallow.is_empty() && self.depth == 0
    }

    /// Forgets everything, including the active flag.
    pub fn reset(&mut self) {
        self.states.clear();
        self.shallow.clear();
        self.depth = 0;
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::node;

    #[test]
    fn lifecycle() {
        let mut tracker = CommitTracker::new();
        tracker.set_active(true);
        let a = node("Employee", 1);

        assert!(!tracker.is_processed(&a));
        tracker.mark_pre_modify(&a);
        assert!(tracker.is_in_pre_modify(&a));
        assert!(!tracker.is_completed_or_ignored(&a));

        tracker.mark_post_modify(&a);
        assert!(tracker.is_in_post_modify(&a));
        assert!(tracker.is_completed_or_ignored(&a));
        assert!(!tracker.is_complete(&a));

        tracker.mark_complete(&a);
        assert!(tracker.is_complete(&a));
        assert_eq!(tracker.depth(), 0);
        // Active commits keep state at depth zero.
        assert!(tracker.is_processed(&a));
    }

    #[test]
    fn identity_not_value() {
        let mut tracker = CommitTracker::new();
        tracker.set_active(true);
        let a = node("Employee", 1);
        let twin = node("Employee", 1);
        tracker.mark_pre_modify(&a);
        assert!(!tracker.is_processed(&twin));
    }

    #[test]
    fn ignored_counts_as_completed() {
        let mut tracker = CommitTracker::new();
        let a = node("Employee", 1);
        tracker.mark_ignore(&a);
        assert!(tracker.is_processed(&a));
        assert!(tracker.is_completed_or_ignored(&a));
        assert!(!tracker.is_complete(&a));
    }

    #[test]
    fn nested_writes_reset_at_outermost_completion() {
        let mut tracker = CommitTracker::new();
        let outer = node("Employee", 1);
        let inner = node("Company", 2);

        tracker.mark_pre_modify(&outer);
        tracker.mark_pre_modify(&inner);
        tracker.mark_shallow_committed(&outer);
        assert_eq!(tracker.depth(), 2);

        tracker.mark_complete(&inner);
        assert_eq!(tracker.depth(), 1);
        assert!(tracker.is_complete(&inner));

        tracker.mark_complete(&outer);
        assert!(tracker.is_empty());
        assert!(!tracker.is_processed(&inner));
    }

    #[test]
    fn shallow_marks() {
        let mut tracker = CommitTracker::new();
        let a = node("Department", 1);
        tracker.mark_shallow_committed(&a);
        assert!(tracker.is_shallow_committed(&a));
        tracker.clear_shallow_committed(&a);
        assert!(!tracker.is_shallow_committed(&a));
    }

    #[test]
    fn reset_is_idempotent() {
        let mut tracker = CommitTracker::new();
        tracker.set_active(true);
        let a = node("Employee", 1);
        tracker.mark_pre_modify(&a);
        tracker.mark_shallow_committed(&a);

        tracker.reset();
        assert!(tracker.is_empty());
        assert!(!tracker.is_active());
        tracker.reset();
        assert!(tracker.is_empty());
        assert!(!tracker.is_processed(&a));
    }
}
