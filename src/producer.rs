//! Lazily evaluated trees of protocol steps.
//!
//! A [`Producer`] is one node of the tree the builder emits: a single step,
//! a sequential or parallel container, a lazily materialized subtree, or a
//! loop that re-derives its body from a runtime predicate. The round pump
//! (external to this crate) repeatedly calls [`Producer::has_next_steps`]
//! and [`Producer::next_steps`] on the root, evaluates each harvested batch
//! to completion, and stops once the root is exhausted.
//!
//! # Round pump contract
//!
//! Every batch must be fully evaluated before the tree is queried again.
//! Sequential nodes hand out steps from at most one child per call and only
//! advance past a child at the start of a later call, so under this contract
//! a successor's steps are never harvested before its predecessor's steps
//! have executed. Exhaustion is monotonic: once a node reports that it has
//! no next steps it never reports steps again, which is what makes the
//! pump's termination decidable.

use std::collections::VecDeque;

use crate::step::{Step, StepBatch};

/// One node of a lazily evaluated protocol tree.
pub enum Producer {
    /// A single protocol step, handed out exactly once.
    Step(StepNode),
    /// Ordered children: a child only becomes eligible once all of its
    /// predecessors are exhausted.
    Sequential(SequentialNode),
    /// Unordered children, all simultaneously eligible and batched together.
    Parallel(ParallelNode),
    /// A subtree materialized on first access, used wherever construction
    /// must wait for a not-yet-resolved input.
    Lazy(LazyNode),
    /// A predicate-driven loop over re-built body instances.
    Loop(LoopNode),
}

impl Producer {
    /// Wraps a single protocol step.
    pub fn step(step: impl Step + 'static) -> Self {
        Producer::Step(StepNode {
            step: Box::new(step),
            emitted: false,
        })
    }

    /// A node whose children run strictly in order.
    pub fn sequential(children: Vec<Producer>) -> Self {
        Producer::Sequential(SequentialNode {
            children: children.into(),
        })
    }

    /// A node whose children are order-independent and may be batched
    /// together.
    pub fn parallel(children: Vec<Producer>) -> Self {
        Producer::Parallel(ParallelNode { children })
    }

    /// A node built by `make` the first time it is queried.
    pub fn lazy(make: impl FnOnce() -> Producer + Send + 'static) -> Self {
        Producer::Lazy(LazyNode {
            make: Some(Box::new(make)),
            inner: None,
        })
    }

    /// Wraps a [`LoopNode`].
    pub fn looping(node: LoopNode) -> Self {
        Producer::Loop(node)
    }

    /// A node that is exhausted from the start.
    pub fn empty() -> Self {
        Producer::sequential(Vec::new())
    }

    /// Returns whether this node can still contribute steps.
    ///
    /// May have side effects: lazy subtrees whose turn has come are
    /// materialized, and loops advance to their next body instance or their
    /// continuation.
    pub fn has_next_steps(&mut self) -> bool {
        match self {
            Producer::Step(node) => !node.emitted,
            Producer::Sequential(node) => node.has_next_steps(),
            Producer::Parallel(node) => node.has_next_steps(),
            Producer::Lazy(node) => node.force().has_next_steps(),
            Producer::Loop(node) => node.has_next_steps(),
        }
    }

    /// Adds the currently ready steps of this subtree to `batch`, up to the
    /// batch's capacity.
    pub fn next_steps<'a>(&'a mut self, batch: &mut StepBatch<'a>) {
        match self {
            Producer::Step(node) => node.next_steps(batch),
            Producer::Sequential(node) => node.next_steps(batch),
            Producer::Parallel(node) => node.next_steps(batch),
            Producer::Lazy(node) => node.force().next_steps(batch),
            Producer::Loop(node) => node.next_steps(batch),
        }
    }
}

/// Hands out its step exactly once.
pub struct StepNode {
    step: Box<dyn Step>,
    emitted: bool,
}

impl StepNode {
    fn next_steps<'a>(&'a mut self, batch: &mut StepBatch<'a>) {
        if !self.emitted && !batch.is_full() {
            self.emitted = true;
            batch.push(&mut *self.step);
        }
    }
}

/// Ordered children, consumed front to back.
pub struct SequentialNode {
    children: VecDeque<Producer>,
}

impl SequentialNode {
    fn has_next_steps(&mut self) -> bool {
        loop {
            let front_ready = match self.children.front_mut() {
                None => return false,
                Some(child) => child.has_next_steps(),
            };
            if front_ready {
                return true;
            }
            self.children.pop_front();
        }
    }

    fn next_steps<'a>(&'a mut self, batch: &mut StepBatch<'a>) {
        // Only the first non-exhausted child contributes; later children are
        // not even looked at, which keeps lazily built successors unbuilt
        // until their inputs exist.
        loop {
            let front_ready = match self.children.front_mut() {
                None => return,
                Some(child) => child.has_next_steps(),
            };
            if front_ready {
                break;
            }
            self.children.pop_front();
        }
        if let Some(child) = self.children.front_mut() {
            child.next_steps(batch);
        }
    }
}

/// Unordered children, all eligible at once.
pub struct ParallelNode {
    children: Vec<Producer>,
}

impl ParallelNode {
    fn has_next_steps(&mut self) -> bool {
        self.children.retain_mut(|child| child.has_next_steps());
        !self.children.is_empty()
    }

    fn next_steps<'a>(&'a mut self, batch: &mut StepBatch<'a>) {
        self.children.retain_mut(|child| child.has_next_steps());
        for child in self.children.iter_mut() {
            if batch.is_full() {
                return;
            }
            child.next_steps(batch);
        }
    }
}

/// Materializes its subtree on first access.
pub struct LazyNode {
    make: Option<Box<dyn FnOnce() -> Producer + Send>>,
    inner: Option<Box<Producer>>,
}

impl LazyNode {
    fn force(&mut self) -> &mut Producer {
        if self.inner.is_none() {
            let make = self.make.take().expect("lazy producer without constructor");
            self.inner = Some(Box::new(make()));
        }
        self.inner.as_mut().expect("lazy producer just materialized")
    }
}

/// Re-derives its body from a runtime predicate over the latest produced
/// value, then switches permanently to an optional continuation.
///
/// The node is type-erased over the loop value: `predicate` and `build_body`
/// are closures over a shared slot holding the most recent body result, and
/// `transition` runs exactly once when the predicate first fails, yielding
/// the continuation (or `None`, in which case the loop is immediately
/// exhausted — documented behavior, not an error).
pub struct LoopNode {
    predicate: Box<dyn FnMut() -> bool + Send>,
    build_body: Box<dyn FnMut() -> Producer + Send>,
    transition: Option<Box<dyn FnOnce() -> Option<Producer> + Send>>,
    current: Option<Box<Producer>>,
    /// The looping phase is over; `current`, if any, is the continuation.
    done: bool,
    exhausted: bool,
}

impl LoopNode {
    /// Creates the loop and immediately evaluates the predicate against the
    /// initial input (which the closures capture), building either the first
    /// body instance or the continuation.
    pub fn new(
        predicate: impl FnMut() -> bool + Send + 'static,
        build_body: impl FnMut() -> Producer + Send + 'static,
        transition: impl FnOnce() -> Option<Producer> + Send + 'static,
    ) -> Self {
        let mut node = Self {
            predicate: Box::new(predicate),
            build_body: Box::new(build_body),
            transition: Some(Box::new(transition)),
            current: None,
            done: false,
            exhausted: false,
        };
        node.advance();
        node
    }

    /// Ensures `current` has ready steps or marks the node exhausted.
    fn advance(&mut self) {
        while !self.exhausted {
            let current_ready = match self.current.as_mut() {
                Some(current) => current.has_next_steps(),
                None => false,
            };
            if current_ready {
                return;
            }
            self.current = None;
            if self.done {
                // The continuation ran dry.
                self.exhausted = true;
                return;
            }
            if (self.predicate)() {
                self.current = Some(Box::new((self.build_body)()));
            } else {
                self.done = true;
                let transition = self
                    .transition
                    .take()
                    .expect("loop transition already consumed");
                match transition() {
                    Some(continuation) => self.current = Some(Box::new(continuation)),
                    None => self.exhausted = true,
                }
            }
        }
    }

    fn has_next_steps(&mut self) -> bool {
        self.advance();
        !self.exhausted
    }

    fn next_steps<'a>(&'a mut self, batch: &mut StepBatch<'a>) {
        self.advance();
        if let Some(current) = self.current.as_mut() {
            current.next_steps(batch);
        }
    }
}
