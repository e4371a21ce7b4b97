//! Builders that turn a declarative description of a secure computation into
//! a lazily evaluated [`Producer`] tree.
//!
//! Application code obtains a root [`ProtocolBuilder`] for a fixed scope kind
//! and issues [`seq`](ProtocolBuilder::seq), [`par`](ProtocolBuilder::par),
//! [`par_pair`](ProtocolBuilder::par_pair) and
//! [`while_loop`](ProtocolBuilder::while_loop) calls, each returning a
//! chainable [`BuildStep`] whose [`out`](BuildStep::out) cell carries the
//! step's eventual result. Closing the builder with
//! [`build`](ProtocolBuilder::build) emits the producer tree consumed by the
//! round pump.
//!
//! Chained steps are realized lazily: the user function of a successor runs
//! only once its predecessor's output has actually been resolved, because
//! that function is a closure over the not-yet-computed value. This is what
//! allows data-dependent control flow over values that no party knows yet.

use std::sync::{Arc, Mutex};

use crate::producer::{LoopNode, Producer};
use crate::step::Step;
use crate::value::Deferred;

/// Whether the steps of a scope run strictly in declaration order or are
/// order-independent and may be batched together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Children run in declaration order.
    Sequential,
    /// Children have no relative order and may be evaluated in one batch.
    Parallel,
}

/// Realizes the rest of a chain once the predecessor's output is available.
type NextFn<I> = Box<dyn FnOnce(I) -> Producer + Send>;

/// The deferred two-phase construction of one chain step: given the input,
/// the step factory, the step's output cell and the (optional) rest of the
/// chain, builds the step's producer.
type RealizeFn<F, I, O> = Box<dyn FnOnce(I, Arc<F>, Deferred<O>, Option<NextFn<O>>) -> Producer + Send>;

/// A user function building the body of one scope.
type ScopeFn<F, I, O> = Box<dyn FnOnce(I, &mut ProtocolBuilder<F>) -> Deferred<O> + Send>;

/// A mutable cursor accumulating the children of one scope.
///
/// Carries the factory `F` that application code uses to construct concrete
/// protocol steps; nested scopes share it. Builders are single-use:
/// [`build`](Self::build) consumes the cursor, after which the scope accepts
/// no further additions.
pub struct ProtocolBuilder<F> {
    kind: ScopeKind,
    factory: Arc<F>,
    children: Vec<Producer>,
}

impl<F: Send + Sync + 'static> ProtocolBuilder<F> {
    /// A root builder whose scope runs its children in declaration order.
    pub fn sequential(factory: F) -> Self {
        Self::new(ScopeKind::Sequential, Arc::new(factory))
    }

    /// A root builder whose scope runs its children order-independently.
    pub fn parallel(factory: F) -> Self {
        Self::new(ScopeKind::Parallel, Arc::new(factory))
    }

    fn new(kind: ScopeKind, factory: Arc<F>) -> Self {
        Self {
            kind,
            factory,
            children: Vec::new(),
        }
    }

    /// The kind of the scope being built.
    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// The factory used to construct concrete protocol steps.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Appends an atomic protocol step to this scope.
    pub fn append(&mut self, step: impl Step + 'static) {
        self.children.push(Producer::step(step));
    }

    /// Appends an already-built producer to this scope.
    pub fn append_producer(&mut self, producer: Producer) {
        self.children.push(producer);
    }

    /// Closes the builder, emitting the composition node for this scope.
    pub fn build(self) -> Producer {
        match self.kind {
            ScopeKind::Sequential => Producer::sequential(self.children),
            ScopeKind::Parallel => Producer::parallel(self.children),
        }
    }

    /// Appends a child whose own scope is sequential.
    ///
    /// Returns a chainable step; `f` runs when evaluation reaches the child.
    pub fn seq<O, B>(&mut self, f: B) -> BuildStep<F, (), O>
    where
        B: FnOnce(&mut ProtocolBuilder<F>) -> Deferred<O> + Send + 'static,
        O: Clone + Send + Sync + 'static,
    {
        let step = BuildStep::scoped(
            ScopeKind::Sequential,
            Arc::clone(&self.factory),
            Box::new(move |(), builder| f(builder)),
        );
        self.attach(&step);
        step
    }

    /// Appends a child whose own scope is parallel.
    pub fn par<O, B>(&mut self, f: B) -> BuildStep<F, (), O>
    where
        B: FnOnce(&mut ProtocolBuilder<F>) -> Deferred<O> + Send + 'static,
        O: Clone + Send + Sync + 'static,
    {
        let step = BuildStep::scoped(
            ScopeKind::Parallel,
            Arc::clone(&self.factory),
            Box::new(move |(), builder| f(builder)),
        );
        self.attach(&step);
        step
    }

    /// Appends two independent sequential sub-scopes running in parallel,
    /// pairing their results once both have resolved.
    pub fn par_pair<O1, O2, B1, B2>(&mut self, f1: B1, f2: B2) -> BuildStep<F, (), (O1, O2)>
    where
        B1: FnOnce(&mut ProtocolBuilder<F>) -> Deferred<O1> + Send + 'static,
        B2: FnOnce(&mut ProtocolBuilder<F>) -> Deferred<O2> + Send + 'static,
        O1: Clone + Send + Sync + 'static,
        O2: Clone + Send + Sync + 'static,
    {
        let f = pair_scope(
            move |(), builder: &mut ProtocolBuilder<F>| f1(builder),
            move |(), builder: &mut ProtocolBuilder<F>| f2(builder),
        );
        let step = BuildStep::scoped(
            ScopeKind::Sequential,
            Arc::clone(&self.factory),
            Box::new(f),
        );
        self.attach(&step);
        step
    }

    /// Appends a loop that keeps re-building `body` from the latest produced
    /// value while `predicate` holds, starting from `initial`.
    ///
    /// The loop's output is the most recently produced body result; chaining
    /// another step after the returned [`BuildStep`] makes that step the
    /// loop's continuation, built exactly once after the predicate fails.
    /// Without a continuation the loop is simply exhausted at that point.
    pub fn while_loop<O, P, B>(&mut self, initial: O, predicate: P, body: B) -> BuildStep<F, O, O>
    where
        O: Clone + Send + Sync + 'static,
        P: FnMut(&O) -> bool + Send + 'static,
        B: FnMut(O, &mut ProtocolBuilder<F>) -> Deferred<O> + Send + 'static,
    {
        let step = BuildStep::looping(Arc::clone(&self.factory), predicate, body);
        let handle = step.clone();
        self.children
            .push(Producer::lazy(move || handle.realize(initial)));
        step
    }

    fn attach<O>(&mut self, step: &BuildStep<F, (), O>)
    where
        O: Clone + Send + Sync + 'static,
    {
        let handle = step.clone();
        self.children.push(Producer::lazy(move || handle.realize(())));
    }
}

/// One step of a chained construction, wrapping the user function and its
/// eventual output.
///
/// Returned by the `seq`/`par`/`par_pair`/`while_loop` calls of
/// [`ProtocolBuilder`] and of `BuildStep` itself. Each step accepts at most
/// one successor; chains are single-use.
pub struct BuildStep<F, I, O> {
    state: Arc<Mutex<StepState<F, I, O>>>,
}

struct StepState<F, I, O> {
    realize: Option<RealizeFn<F, I, O>>,
    next: Option<NextFn<O>>,
    out: Deferred<O>,
    factory: Arc<F>,
}

impl<F, I, O> Clone for BuildStep<F, I, O> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<F, I, O> BuildStep<F, I, O>
where
    F: Send + Sync + 'static,
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// A handle to this step's eventual output.
    ///
    /// The cell resolves once evaluation has passed this step; reading it
    /// earlier panics (see [`Deferred::out`]).
    pub fn out(&self) -> Deferred<O> {
        self.state.lock().expect("builder state poisoned").out.clone()
    }

    /// Chains a successor whose own scope is sequential.
    ///
    /// `f` is not invoked until this step's output has been resolved.
    pub fn seq<O2, B>(&self, f: B) -> BuildStep<F, O, O2>
    where
        B: FnOnce(O, &mut ProtocolBuilder<F>) -> Deferred<O2> + Send + 'static,
        O2: Clone + Send + Sync + 'static,
    {
        let next = BuildStep::scoped(ScopeKind::Sequential, self.factory(), Box::new(f));
        self.set_next(&next);
        next
    }

    /// Chains a successor whose own scope is parallel.
    pub fn par<O2, B>(&self, f: B) -> BuildStep<F, O, O2>
    where
        B: FnOnce(O, &mut ProtocolBuilder<F>) -> Deferred<O2> + Send + 'static,
        O2: Clone + Send + Sync + 'static,
    {
        let next = BuildStep::scoped(ScopeKind::Parallel, self.factory(), Box::new(f));
        self.set_next(&next);
        next
    }

    /// Chains two independent sequential sub-scopes running in parallel over
    /// this step's output, pairing their results.
    pub fn par_pair<O1, O2, B1, B2>(&self, f1: B1, f2: B2) -> BuildStep<F, O, (O1, O2)>
    where
        B1: FnOnce(O, &mut ProtocolBuilder<F>) -> Deferred<O1> + Send + 'static,
        B2: FnOnce(O, &mut ProtocolBuilder<F>) -> Deferred<O2> + Send + 'static,
        O1: Clone + Send + Sync + 'static,
        O2: Clone + Send + Sync + 'static,
    {
        let next = BuildStep::scoped(
            ScopeKind::Sequential,
            self.factory(),
            Box::new(pair_scope(f1, f2)),
        );
        self.set_next(&next);
        next
    }

    /// Chains a loop over this step's output, as described on
    /// [`ProtocolBuilder::while_loop`].
    pub fn while_loop<P, B>(&self, predicate: P, body: B) -> BuildStep<F, O, O>
    where
        P: FnMut(&O) -> bool + Send + 'static,
        B: FnMut(O, &mut ProtocolBuilder<F>) -> Deferred<O> + Send + 'static,
    {
        let next = BuildStep::looping(self.factory(), predicate, body);
        self.set_next(&next);
        next
    }

    /// Builds a step whose realization opens a fresh scope of `kind`, runs
    /// `f` in it, and sequences the lazily realized rest of the chain behind
    /// the scope's node.
    fn scoped(kind: ScopeKind, factory: Arc<F>, f: ScopeFn<F, I, O>) -> Self {
        let realize: RealizeFn<F, I, O> = Box::new(move |input, factory, out, next| {
            let mut scope = ProtocolBuilder::new(kind, factory);
            let inner = f(input, &mut scope);
            let own = scope.build();
            // Forced only after `own` is exhausted, at which point `inner`
            // has been resolved by the scope's steps.
            let tail = Producer::lazy(move || {
                let value = inner.out();
                out.resolve(value.clone());
                match next {
                    Some(next) => next(value),
                    None => Producer::empty(),
                }
            });
            Producer::sequential(vec![own, tail])
        });
        Self::from_realize(factory, realize)
    }

    fn from_realize(factory: Arc<F>, realize: RealizeFn<F, I, O>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StepState {
                realize: Some(realize),
                next: None,
                out: Deferred::unresolved(),
                factory,
            })),
        }
    }

    /// Runs the two-phase construction of this step. Called at most once,
    /// and only when `input` has actually been produced.
    fn realize(&self, input: I) -> Producer {
        let (realize, next, out, factory) = {
            let mut state = self.state.lock().expect("builder state poisoned");
            let realize = state.realize.take().expect("build step realized twice");
            (
                realize,
                state.next.take(),
                state.out.clone(),
                Arc::clone(&state.factory),
            )
        };
        realize(input, factory, out, next)
    }

    fn factory(&self) -> Arc<F> {
        Arc::clone(&self.state.lock().expect("builder state poisoned").factory)
    }

    fn set_next<O2>(&self, next: &BuildStep<F, O, O2>)
    where
        O2: Clone + Send + Sync + 'static,
    {
        let handle = next.clone();
        let mut state = self.state.lock().expect("builder state poisoned");
        if state.realize.is_none() {
            panic!("cannot extend a chain that has already been realized");
        }
        if state.next.is_some() {
            panic!("this build step already has a successor");
        }
        state.next = Some(Box::new(move |input: O| handle.realize(input)));
    }
}

impl<F, O> BuildStep<F, O, O>
where
    F: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Builds a loop step per the algorithm in the module docs: evaluate the
    /// predicate against the latest produced value, re-build the body while
    /// it holds, then transition exactly once to the continuation (the rest
    /// of the chain) or exhaust.
    fn looping(
        factory: Arc<F>,
        mut predicate: impl FnMut(&O) -> bool + Send + 'static,
        mut body: impl FnMut(O, &mut ProtocolBuilder<F>) -> Deferred<O> + Send + 'static,
    ) -> Self {
        let realize: RealizeFn<F, O, O> = Box::new(move |input, factory, out, next| {
            // The most recently produced body result; resolved whenever the
            // predicate or a new body instance needs it, because a body is
            // only re-derived after its predecessor is exhausted.
            let latest = Arc::new(Mutex::new(Deferred::resolved(input)));
            let pred = {
                let latest = Arc::clone(&latest);
                move || {
                    let value = latest.lock().expect("loop state poisoned").out();
                    predicate(&value)
                }
            };
            let build_body = {
                let latest = Arc::clone(&latest);
                move || {
                    let value = latest.lock().expect("loop state poisoned").out();
                    let mut scope = ProtocolBuilder::new(ScopeKind::Sequential, Arc::clone(&factory));
                    let produced = body(value, &mut scope);
                    *latest.lock().expect("loop state poisoned") = produced;
                    scope.build()
                }
            };
            let transition = move || {
                let value = latest.lock().expect("loop state poisoned").out();
                out.resolve(value.clone());
                next.map(|next| next(value))
            };
            Producer::looping(LoopNode::new(pred, build_body, transition))
        });
        Self::from_realize(factory, realize)
    }
}

/// Builds the body of a `par_pair` step: both sub-scopes inside one parallel
/// node, followed by a join that pairs their outputs. The join sits behind
/// the parallel node in the step's own (sequential) scope, so it only runs
/// once both halves have resolved.
fn pair_scope<F, I, O1, O2, B1, B2>(
    f1: B1,
    f2: B2,
) -> impl FnOnce(I, &mut ProtocolBuilder<F>) -> Deferred<(O1, O2)> + Send + 'static
where
    F: Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    O1: Clone + Send + Sync + 'static,
    O2: Clone + Send + Sync + 'static,
    B1: FnOnce(I, &mut ProtocolBuilder<F>) -> Deferred<O1> + Send + 'static,
    B2: FnOnce(I, &mut ProtocolBuilder<F>) -> Deferred<O2> + Send + 'static,
{
    move |input: I, builder: &mut ProtocolBuilder<F>| {
        let factory = Arc::clone(&builder.factory);
        let mut left = ProtocolBuilder::new(ScopeKind::Sequential, Arc::clone(&factory));
        let first = f1(input.clone(), &mut left);
        let mut right = ProtocolBuilder::new(ScopeKind::Sequential, factory);
        let second = f2(input, &mut right);
        builder.append_producer(Producer::parallel(vec![left.build(), right.build()]));
        let pair = Deferred::unresolved();
        let cell = pair.clone();
        builder.append_producer(Producer::lazy(move || {
            cell.resolve((first.out(), second.out()));
            Producer::empty()
        }));
        pair
    }
}
