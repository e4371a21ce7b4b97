//! Atomic protocol steps and the batches in which they are harvested.
//!
//! A [`Step`] is the unit of work the composition layer schedules but does
//! not look into: it may read deferred inputs, perform local computation and
//! exchange messages over the network, typically across several rounds. The
//! concrete steps belong to the protocol suites built on top of this crate;
//! they capture whatever they need (deferred cells, a network handle) when
//! they are constructed.

use futures::future::BoxFuture;

/// An opaque error raised by a protocol step.
///
/// A failing step aborts the whole computation; the round pump surfaces the
/// error to the application unchanged and nothing at this layer retries.
pub type StepError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Reported by a step after each evaluation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step needs at least one more round before its outputs are ready.
    MoreRounds,
    /// The step has finished and resolved all deferred values it owns.
    Done,
}

/// An atomic unit of protocol work, opaque to the composition core.
///
/// `evaluate` is driven by the round pump with an incrementing round index
/// until the step reports [`StepOutcome::Done`]. Steps in the same batch may
/// be evaluated concurrently, so a round that sends to and receives from
/// other parties must not rely on any ordering between batch siblings.
pub trait Step: Send {
    /// Runs one round of this step.
    fn evaluate(&mut self, round: usize) -> BoxFuture<'_, Result<StepOutcome, StepError>>;
}

/// A bounded collection of steps harvested from a producer tree.
///
/// The round pump creates a fresh batch per iteration; producers stop
/// contributing once the batch is full and report the remaining steps in a
/// later iteration.
pub struct StepBatch<'a> {
    capacity: usize,
    steps: Vec<&'a mut dyn Step>,
}

impl<'a> StepBatch<'a> {
    /// Creates an empty batch that accepts up to `capacity` steps.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            steps: Vec::new(),
        }
    }

    /// Adds a step to the batch.
    pub fn push(&mut self, step: &'a mut dyn Step) {
        self.steps.push(step);
    }

    /// Returns whether the batch has reached its capacity.
    pub fn is_full(&self) -> bool {
        self.steps.len() >= self.capacity
    }

    /// The number of steps collected so far.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns whether no steps have been collected.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl<'a> IntoIterator for StepBatch<'a> {
    type Item = &'a mut dyn Step;
    type IntoIter = std::vec::IntoIter<&'a mut dyn Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}
