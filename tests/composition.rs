//! End-to-end tests of the builder and producer layer, driven by a small
//! reference round pump that follows the documented consumption contract:
//! harvest a batch, evaluate it fully (re-driving multi-round steps), then
//! ask the tree again until it is exhausted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use rondo::builder::ProtocolBuilder;
use rondo::producer::Producer;
use rondo::step::{Step, StepBatch, StepError, StepOutcome};
use rondo::value::Deferred;

/// A step running a closure in its single round.
struct Task(Option<Box<dyn FnOnce() + Send>>);

impl Step for Task {
    fn evaluate(&mut self, _round: usize) -> BoxFuture<'_, Result<StepOutcome, StepError>> {
        let f = self.0.take();
        Box::pin(async move {
            if let Some(f) = f {
                f();
            }
            Ok(StepOutcome::Done)
        })
    }
}

fn task(f: impl FnOnce() + Send + 'static) -> Task {
    Task(Some(Box::new(f)))
}

/// A step that records the round indices it was driven with and finishes
/// after `rounds` rounds.
struct MultiRound {
    rounds: usize,
    seen: Arc<Mutex<Vec<usize>>>,
}

impl Step for MultiRound {
    fn evaluate(&mut self, round: usize) -> BoxFuture<'_, Result<StepOutcome, StepError>> {
        let seen = Arc::clone(&self.seen);
        let rounds = self.rounds;
        Box::pin(async move {
            seen.lock().expect("poison").push(round);
            if round + 1 < rounds {
                Ok(StepOutcome::MoreRounds)
            } else {
                Ok(StepOutcome::Done)
            }
        })
    }
}

/// A step that always fails.
struct Failing(&'static str);

impl Step for Failing {
    fn evaluate(&mut self, _round: usize) -> BoxFuture<'_, Result<StepOutcome, StepError>> {
        let msg = self.0;
        Box::pin(async move { Err(msg.into()) })
    }
}

/// Reference round pump.
async fn pump(producer: &mut Producer) -> Result<(), StepError> {
    while producer.has_next_steps() {
        let mut batch = StepBatch::with_capacity(32);
        producer.next_steps(&mut batch);
        let mut pending: Vec<&mut dyn Step> = batch.into_iter().collect();
        let mut round = 0;
        while !pending.is_empty() {
            let outcomes =
                futures::future::try_join_all(pending.iter_mut().map(|s| s.evaluate(round)))
                    .await?;
            pending = pending
                .into_iter()
                .zip(outcomes)
                .filter(|(_, outcome)| *outcome == StepOutcome::MoreRounds)
                .map(|(step, _)| step)
                .collect();
            round += 1;
        }
    }
    Ok(())
}

/// Appends a step to `builder` that resolves a fresh cell with `value` and
/// logs `tag`.
fn logging_step<T: Clone + Send + Sync + 'static>(
    builder: &mut ProtocolBuilder<()>,
    log: &Arc<Mutex<Vec<&'static str>>>,
    tag: &'static str,
    value: T,
) -> Deferred<T> {
    let cell = Deferred::unresolved();
    let resolve = cell.clone();
    let log = Arc::clone(log);
    builder.append(task(move || {
        log.lock().expect("poison").push(tag);
        resolve.resolve(value);
    }));
    cell
}

#[tokio::test]
async fn sequential_children_never_overlap() -> Result<(), StepError> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut builder = ProtocolBuilder::sequential(());
    let a = {
        let log = Arc::clone(&log);
        builder.seq(move |b| {
            logging_step(b, &log, "a1", ());
            logging_step(b, &log, "a2", ())
        })
    };
    let b_step = {
        let log = Arc::clone(&log);
        a.seq(move |(), b| {
            logging_step(b, &log, "b1", ());
            logging_step(b, &log, "b2", ())
        })
    };
    {
        let log = Arc::clone(&log);
        b_step.seq(move |(), b| logging_step(b, &log, "c1", ()));
    }
    let mut root = builder.build();
    pump(&mut root).await?;
    assert_eq!(
        *log.lock().expect("poison"),
        vec!["a1", "a2", "b1", "b2", "c1"]
    );
    assert!(!root.has_next_steps());
    Ok(())
}

#[tokio::test]
async fn parallel_scope_is_harvested_as_one_batch() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut builder = ProtocolBuilder::sequential(());
    {
        let log = Arc::clone(&log);
        builder.par(move |b| {
            logging_step(b, &log, "x", ());
            logging_step(b, &log, "y", ());
            logging_step(b, &log, "z", ())
        });
    }
    let mut root = builder.build();
    assert!(root.has_next_steps());
    let mut batch = StepBatch::with_capacity(32);
    root.next_steps(&mut batch);
    assert_eq!(batch.len(), 3);
}

#[tokio::test]
async fn successor_is_built_only_after_predecessor_resolves() -> Result<(), StepError> {
    let invoked = Arc::new(AtomicUsize::new(0));
    let mut builder = ProtocolBuilder::sequential(());
    let first = builder.seq(|b| {
        let cell = Deferred::unresolved();
        let resolve = cell.clone();
        b.append(task(move || resolve.resolve(7u32)));
        cell
    });
    let second = {
        let invoked = Arc::clone(&invoked);
        first.seq(move |v, _| {
            invoked.fetch_add(1, Ordering::SeqCst);
            Deferred::resolved(v + 1)
        })
    };
    let out = second.out();
    let mut root = builder.build();

    // Harvest the first step but do not run it yet: the successor's user
    // function must not have been invoked.
    assert!(root.has_next_steps());
    let mut batch = StepBatch::with_capacity(32);
    root.next_steps(&mut batch);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    for step in batch {
        step.evaluate(0).await?;
    }
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(out.try_out(), None);

    // Asking the tree again realizes the successor from the resolved value.
    assert!(!root.has_next_steps());
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
    assert_eq!(first.out().out(), 7);
    assert_eq!(out.out(), 8);
    Ok(())
}

#[tokio::test]
async fn loop_body_runs_exactly_k_times() -> Result<(), StepError> {
    for k in [0usize, 1, 5] {
        let bodies = Arc::new(AtomicUsize::new(0));
        let continuations = Arc::new(AtomicUsize::new(0));
        let mut builder = ProtocolBuilder::sequential(());
        let looped = {
            let bodies = Arc::clone(&bodies);
            builder.while_loop(
                0usize,
                move |v| *v < k,
                move |v, b| {
                    bodies.fetch_add(1, Ordering::SeqCst);
                    let cell = Deferred::unresolved();
                    let resolve = cell.clone();
                    b.append(task(move || resolve.resolve(v + 1)));
                    cell
                },
            )
        };
        let done = {
            let continuations = Arc::clone(&continuations);
            looped.seq(move |v, _| {
                continuations.fetch_add(1, Ordering::SeqCst);
                Deferred::resolved(v)
            })
        };
        let out = done.out();
        let mut root = builder.build();
        pump(&mut root).await?;
        assert_eq!(bodies.load(Ordering::SeqCst), k, "k = {k}");
        assert_eq!(continuations.load(Ordering::SeqCst), 1, "k = {k}");
        assert_eq!(out.out(), k);
        assert_eq!(looped.out().out(), k);
        assert!(!root.has_next_steps());
    }
    Ok(())
}

#[tokio::test]
async fn par_pair_joins_both_scopes() -> Result<(), StepError> {
    let mut builder = ProtocolBuilder::sequential(());
    let pair = builder.par_pair(
        |b| {
            let cell = Deferred::unresolved();
            let resolve = cell.clone();
            b.append(task(move || resolve.resolve("left")));
            cell
        },
        |b| {
            let cell = Deferred::unresolved();
            let resolve = cell.clone();
            b.append(task(move || resolve.resolve(2u8)));
            cell
        },
    );
    let out = pair.out();
    let mut root = builder.build();
    pump(&mut root).await?;
    assert_eq!(out.out(), ("left", 2));
    Ok(())
}

#[tokio::test]
async fn multi_round_steps_are_redriven_with_incremented_rounds() -> Result<(), StepError> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut root = Producer::step(MultiRound {
        rounds: 3,
        seen: Arc::clone(&seen),
    });
    pump(&mut root).await?;
    assert_eq!(*seen.lock().expect("poison"), vec![0, 1, 2]);
    Ok(())
}

#[tokio::test]
async fn step_errors_abort_the_computation() {
    let mut builder = ProtocolBuilder::sequential(());
    builder.seq(|b| {
        b.append(Failing("triple verification failed"));
        Deferred::resolved(())
    });
    let mut root = builder.build();
    let err = pump(&mut root).await.expect_err("pump must surface the error");
    assert!(err.to_string().contains("triple verification failed"));
}
