//! Single-writer, multi-reader cells for results that have not been computed yet.
//!
//! Every step-construction call returns a [`Deferred`] handle standing in for
//! the value the step will eventually produce. The step that created the cell
//! is its sole writer and resolves it exactly once; all downstream consumers
//! hold read-only clones. Cycles cannot be constructed because a step can
//! only read cells created strictly before it, which the builder's chain and
//! parallel construction order enforces.

use std::fmt;
use std::sync::{Arc, OnceLock};

/// A handle to a result that becomes available once its owning step has run.
///
/// Cloning a `Deferred` hands out another reader of the same cell; the value
/// itself is written at most once and is immutable afterwards.
pub struct Deferred<T> {
    cell: Arc<OnceLock<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::unresolved()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_resolved() {
            f.write_str("Deferred(resolved)")
        } else {
            f.write_str("Deferred(unresolved)")
        }
    }
}

impl<T> Deferred<T> {
    /// Creates a cell that has not been written yet.
    pub fn unresolved() -> Self {
        Self {
            cell: Arc::new(OnceLock::new()),
        }
    }

    /// Creates a cell that already holds `value`.
    pub fn resolved(value: T) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(value);
        Self {
            cell: Arc::new(cell),
        }
    }

    /// Writes the value of this cell.
    ///
    /// Only the step that created the cell may call this, exactly once.
    ///
    /// # Panics
    ///
    /// Panics if the cell has already been resolved. A double write means two
    /// steps claim ownership of the same result, which is a bug in the
    /// computation description, not a recoverable condition.
    pub fn resolve(&self, value: T) {
        if self.cell.set(value).is_err() {
            panic!("deferred value resolved twice");
        }
    }

    /// Returns whether the owning step has already produced the value.
    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T: Clone> Deferred<T> {
    /// Returns the value if it has been resolved.
    pub fn try_out(&self) -> Option<T> {
        self.cell.get().cloned()
    }

    /// Returns the resolved value.
    ///
    /// # Panics
    ///
    /// Panics if the owning step has not run yet. Reading an unresolved cell
    /// is a programming error: evaluation order guarantees that a consumer is
    /// only reached after its inputs have been produced.
    pub fn out(&self) -> T {
        match self.cell.get() {
            Some(value) => value.clone(),
            None => panic!("tried to read a deferred value before it was resolved"),
        }
    }
}
