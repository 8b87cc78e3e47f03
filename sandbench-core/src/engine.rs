//! Adaptive execution engine.
//!
//! Walks the registered tree in declaration order. Groups run their
//! `beforeAll` hooks on entry and `afterAll` hooks on exit; leaves run the
//! convergence loop: timed batches of guest iterations until the time budget
//! expires or the iteration floor is cleared, yielding to the host scheduler
//! between batches. A guest trap anywhere aborts the whole walk fail-fast:
//! remaining siblings and the `afterAll` hooks of every enclosing scope are
//! skipped.
//!
//! The walk is precomputed into a flat step list rather than recursed, so
//! the single suspension point (the end-of-batch yield) needs no boxed
//! recursive futures and the fail-fast path is a plain early return.

use crate::bridge;
use crate::clock::Clock;
use crate::error::EngineError;
use crate::node::{BenchTree, NodeId};
use sandbench_guest::{GuestModule, HostImports, Trap};

/// Drives a registered [`BenchTree`] against a guest module.
pub struct Engine {
    clock: Clock,
}

/// One action of the precomputed tree walk.
enum Step {
    EnterGroup(NodeId),
    Leaf(NodeId),
    ExitGroup(NodeId),
}

fn plan(tree: &BenchTree, id: NodeId, steps: &mut Vec<Step>) {
    if tree.node(id).is_group {
        steps.push(Step::EnterGroup(id));
        for child in tree.node(id).children.clone() {
            plan(tree, child, steps);
        }
        steps.push(Step::ExitGroup(id));
    } else {
        steps.push(Step::Leaf(id));
    }
}

impl Engine {
    /// Engine with a fresh clock.
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    /// Engine timing against an existing clock, so samples and the
    /// registration phase share one timeline.
    pub fn with_clock(clock: Clock) -> Self {
        Self { clock }
    }

    /// Visit the whole tree, evaluating every leaf. Returns the first
    /// failure, with all results collected so far left on the tree.
    pub async fn run(
        &self,
        guest: &mut dyn GuestModule,
        tree: &mut BenchTree,
    ) -> Result<(), EngineError> {
        let mut steps = Vec::new();
        plan(tree, tree.root(), &mut steps);
        for step in steps {
            match step {
                Step::EnterGroup(id) => {
                    tracing::debug!(title = %tree.node(id).title, "entering group");
                    let hooks = tree.node(id).before_all.clone();
                    self.run_hooks(guest, &hooks)?;
                }
                Step::ExitGroup(id) => {
                    let hooks = tree.node(id).after_all.clone();
                    self.run_hooks(guest, &hooks)?;
                }
                Step::Leaf(id) => self.evaluate_leaf(guest, tree, id).await?,
            }
        }
        Ok(())
    }

    fn run_hooks(&self, guest: &mut dyn GuestModule, hooks: &[i32]) -> Result<(), EngineError> {
        let mut host = RunHost { clock: &self.clock };
        for hook in hooks {
            guest.call_indirect(*hook, &mut host)?;
        }
        Ok(())
    }

    /// Evaluate one benchmark leaf: resolve its effective configuration,
    /// bridge the accumulated hook arrays into guest memory, run the
    /// convergence loop, then copy samples out and finalize statistics.
    async fn evaluate_leaf(
        &self,
        guest: &mut dyn GuestModule,
        tree: &mut BenchTree,
        id: NodeId,
    ) -> Result<(), EngineError> {
        let defaults = tree.defaults.ok_or(EngineError::ConfigGap {
            quantity: "session defaults",
        })?;
        let max_runtime = tree.resolve(id, |o| o.max_runtime, defaults.max_runtime) as f64;
        let min_iterations =
            tree.resolve(id, |o| o.min_iteration_count, defaults.min_iteration_count);
        let batch = tree.resolve(id, |o| o.iteration_count, defaults.iteration_count);
        let calc_mean = tree.resolve(id, |o| o.calculate_mean, defaults.calculate_mean);
        let calc_median = tree.resolve(id, |o| o.calculate_median, defaults.calculate_median);
        let calc_maximum = tree.resolve(id, |o| o.calculate_maximum, defaults.calculate_maximum);
        let calc_minimum = tree.resolve(id, |o| o.calculate_minimum, defaults.calculate_minimum);
        let calc_variance = tree.resolve(id, |o| o.calculate_variance, defaults.calculate_variance);
        let calc_std_dev = tree.resolve(id, |o| o.calculate_std_dev, defaults.calculate_std_dev);
        let callback = tree.node(id).callback;

        tracing::debug!(
            title = %tree.node(id).title,
            batch,
            min_iterations,
            max_runtime,
            "benchmark starting"
        );

        let before_hooks = tree.accumulated_before_each(id);
        let after_hooks = tree.accumulated_after_each(id);
        let before_arr = bridge::write_index_array(guest, &before_hooks)?;
        let after_arr = match bridge::write_index_array(guest, &after_hooks) {
            Ok(arr) => arr,
            Err(err) => {
                let _ = before_arr.release(guest);
                return Err(err);
            }
        };

        let outcome = self
            .converge(
                guest,
                callback,
                before_arr.ptr(),
                after_arr.ptr(),
                batch,
                min_iterations,
                max_runtime,
            )
            .await;

        // Paired release on every exit path, a failed loop included. The
        // loop's failure takes precedence over a failed unpin.
        let released = after_arr
            .release(guest)
            .and_then(|_| before_arr.release(guest));
        let (executed, started, ended) = outcome?;
        released?;

        let runs = bridge::read_samples(guest, guest.runs_ptr(), executed)?;
        let node = tree.node_mut(id);
        node.runs = runs;
        node.start_time = started;
        node.end_time = ended;
        if calc_mean {
            node.mean = Some(guest.mean());
        }
        if calc_median {
            node.median = Some(guest.median());
        }
        if calc_maximum {
            node.maximum = Some(guest.maximum());
        }
        if calc_minimum {
            node.minimum = Some(guest.minimum());
        }
        if calc_variance {
            node.variance = Some(guest.variance());
        }
        if calc_std_dev {
            node.std_dev = Some(guest.std_dev());
        }
        tracing::info!(
            title = %node.title,
            executed,
            runtime_ms = node.runtime(),
            "benchmark finished"
        );
        Ok(())
    }

    /// The convergence loop: batches of `batch` timed iterations until the
    /// time budget is spent or the iteration floor is cleared.
    #[allow(clippy::too_many_arguments)]
    async fn converge(
        &self,
        guest: &mut dyn GuestModule,
        callback: i32,
        before_ptr: u32,
        after_ptr: u32,
        batch: u32,
        min_iterations: u32,
        max_runtime: f64,
    ) -> Result<(u32, f64, f64), EngineError> {
        let mut host = RunHost { clock: &self.clock };
        guest.reset_run_index();
        let started = self.clock.now_ms();
        let mut executed: u32 = 0;
        loop {
            if self.clock.now_ms() - started > max_runtime {
                break;
            }
            guest.ensure_run_count(executed + batch)?;
            executed += guest.run_iterations(callback, before_ptr, after_ptr, batch, &mut host)?;
            if executed > min_iterations {
                break;
            }
            // The only suspension point: give the scheduler a tick between
            // batches so a long benchmark cannot starve other host tasks.
            tokio::task::yield_now().await;
        }
        let ended = self.clock.now_ms();
        Ok((executed, started, ended))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-import implementation live while benchmarks execute. Only the clock
/// import is valid; registration imports arriving now are a protocol
/// violation and trap.
struct RunHost<'a> {
    clock: &'a Clock,
}

impl RunHost<'_> {
    fn reject(what: &str) -> Trap {
        Trap::Import(format!("{what} called outside of registration"))
    }
}

impl HostImports for RunHost<'_> {
    fn report_node(
        &mut self,
        _guest: &mut dyn GuestModule,
        _title_ptr: u32,
        _callback: i32,
        _is_group: bool,
    ) -> Result<(), Trap> {
        Err(Self::reject("reportNode"))
    }

    fn report_before_each(&mut self, _callback: i32) -> Result<(), Trap> {
        Err(Self::reject("reportBeforeEach"))
    }

    fn report_after_each(&mut self, _callback: i32) -> Result<(), Trap> {
        Err(Self::reject("reportAfterEach"))
    }

    fn report_before_all(&mut self, _callback: i32) -> Result<(), Trap> {
        Err(Self::reject("reportBeforeAll"))
    }

    fn report_after_all(&mut self, _callback: i32) -> Result<(), Trap> {
        Err(Self::reject("reportAfterAll"))
    }

    fn set_calculate_mean(&mut self, _value: bool) -> Result<(), Trap> {
        Err(Self::reject("setCalculateMean"))
    }

    fn set_calculate_median(&mut self, _value: bool) -> Result<(), Trap> {
        Err(Self::reject("setCalculateMedian"))
    }

    fn set_calculate_maximum(&mut self, _value: bool) -> Result<(), Trap> {
        Err(Self::reject("setCalculateMaximum"))
    }

    fn set_calculate_minimum(&mut self, _value: bool) -> Result<(), Trap> {
        Err(Self::reject("setCalculateMinimum"))
    }

    fn set_calculate_variance(&mut self, _value: bool) -> Result<(), Trap> {
        Err(Self::reject("setCalculateVariance"))
    }

    fn set_calculate_std_dev(&mut self, _value: bool) -> Result<(), Trap> {
        Err(Self::reject("setCalculateStdDev"))
    }

    fn set_iteration_count(&mut self, _value: u32) -> Result<(), Trap> {
        Err(Self::reject("setIterationCount"))
    }

    fn set_min_iteration_count(&mut self, _value: u32) -> Result<(), Trap> {
        Err(Self::reject("setMinimumIterationCount"))
    }

    fn set_max_runtime(&mut self, _value: u32) -> Result<(), Trap> {
        Err(Self::reject("setMaxRuntime"))
    }

    fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::register_tree;
    use sandbench_guest::{GuestBuilder, ReferenceGuest};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Shared event log for observing hook and body invocations.
    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn count(log: &Log, event: &str) -> usize {
        log.borrow().iter().filter(|e| **e == event).count()
    }

    /// Guest for the end-to-end scenario: one group with beforeAll/afterAll
    /// and a shared beforeEach, containing two leaves.
    fn scenario_guest(log: &Log) -> ReferenceGuest {
        let mut builder = GuestBuilder::new();
        let group_title = builder.intern("suite");
        let one_title = builder.intern("one");
        let two_title = builder.intern("two");

        let l = log.clone();
        let before_all = builder.add_function(move |_g, _h| {
            l.borrow_mut().push("before_all");
            Ok(())
        });
        let l = log.clone();
        let after_all = builder.add_function(move |_g, _h| {
            l.borrow_mut().push("after_all");
            Ok(())
        });
        let l = log.clone();
        let before_each = builder.add_function(move |_g, _h| {
            l.borrow_mut().push("before_each");
            Ok(())
        });
        let l = log.clone();
        let leaf_one = builder.add_function(move |_g, _h| {
            l.borrow_mut().push("one");
            Ok(())
        });
        let l = log.clone();
        let leaf_two = builder.add_function(move |_g, _h| {
            l.borrow_mut().push("two");
            Ok(())
        });

        let decl = builder.add_function(move |g, h| {
            h.report_before_all(before_all)?;
            h.report_after_all(after_all)?;
            h.report_before_each(before_each)?;
            h.report_node(g, one_title, leaf_one, false)?;
            h.report_node(g, two_title, leaf_two, false)
        });
        builder.set_start(move |g, h| {
            // Three iterations per batch, floor of five: exactly two batches
            // and six runs per leaf. Applies to the group, inherited by both
            // leaves.
            h.set_iteration_count(3)?;
            h.set_min_iteration_count(5)?;
            h.report_node(g, group_title, decl, true)
        });
        builder.build()
    }

    #[tokio::test]
    async fn test_end_to_end_group_scenario() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut guest = scenario_guest(&log);
        let clock = Clock::new();
        let mut tree = register_tree(&mut guest, &clock).unwrap();

        Engine::with_clock(clock)
            .run(&mut guest, &mut tree)
            .await
            .unwrap();

        assert_eq!(count(&log, "before_all"), 1);
        assert_eq!(count(&log, "after_all"), 1);
        // Six iterations per leaf, two leaves: beforeEach runs every time.
        assert_eq!(count(&log, "one"), 6);
        assert_eq!(count(&log, "two"), 6);
        assert_eq!(count(&log, "before_each"), 12);

        let group = tree.node(tree.root()).children[0];
        for leaf in tree.node(group).children.clone() {
            let node = tree.node(leaf);
            assert_eq!(node.runs.len(), 6);
            // Defaults: mean and median collected, extremes not.
            assert!(node.mean.is_some());
            assert!(node.median.is_some());
            assert!(node.maximum.is_none());
            assert!(node.minimum.is_none());
            assert!(node.end_time >= node.start_time);
            // Host-side reduction over the copied runs agrees with the
            // guest-side scalar bit-for-bit.
            let host_mean = sandbench_stats::mean(&node.runs);
            assert_eq!(node.mean.unwrap().to_bits(), host_mean.to_bits());
        }
    }

    #[tokio::test]
    async fn test_zero_floor_stops_after_first_batch() {
        let mut builder = GuestBuilder::new();
        let title = builder.intern("boundary");
        let body = builder.add_function(|_g, _h| Ok(()));
        builder.set_start(move |g, h| {
            h.set_iteration_count(1000)?;
            h.set_min_iteration_count(0)?;
            h.set_max_runtime(5)?;
            h.report_node(g, title, body, false)
        });
        let mut guest = builder.build();
        let clock = Clock::new();
        let mut tree = register_tree(&mut guest, &clock).unwrap();

        Engine::with_clock(clock)
            .run(&mut guest, &mut tree)
            .await
            .unwrap();

        let leaf = tree.node(tree.root()).children[0];
        let node = tree.node(leaf);
        // One batch satisfies executed > 0; a second batch would double it.
        assert_eq!(node.runs.len(), 1000);
    }

    #[tokio::test]
    async fn test_failure_is_fail_fast_and_leaks_no_pins() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut builder = GuestBuilder::new();
        let group_title = builder.intern("g");
        let bad_title = builder.intern("bad");
        let sibling_title = builder.intern("sibling");

        let hook = builder.add_function(|_g, _h| Ok(()));
        let calls = Rc::new(RefCell::new(0u32));
        let c = calls.clone();
        let bad = builder.add_function(move |_g, _h| {
            *c.borrow_mut() += 1;
            if *c.borrow() > 2 {
                Err(Trap::Guest("deliberate mid-loop failure".into()))
            } else {
                Ok(())
            }
        });
        let l = log.clone();
        let sibling = builder.add_function(move |_g, _h| {
            l.borrow_mut().push("sibling");
            Ok(())
        });
        let l = log.clone();
        let after_all = builder.add_function(move |_g, _h| {
            l.borrow_mut().push("after_all");
            Ok(())
        });

        let decl = builder.add_function(move |g, h| {
            h.report_before_each(hook)?;
            h.report_after_each(hook)?;
            h.report_after_all(after_all)?;
            h.report_node(g, bad_title, bad, false)?;
            h.report_node(g, sibling_title, sibling, false)
        });
        builder.set_start(move |g, h| {
            h.set_iteration_count(10)?;
            h.set_min_iteration_count(5)?;
            h.report_node(g, group_title, decl, true)
        });
        let mut guest = builder.build();
        let clock = Clock::new();
        let mut tree = register_tree(&mut guest, &clock).unwrap();

        let err = Engine::with_clock(clock)
            .run(&mut guest, &mut tree)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Guest(Trap::Guest(_))));

        // Both pinned hook arrays were released on the failure path.
        assert_eq!(guest.pinned_count(), 0);
        // Fail-fast: the sibling never ran and the group's afterAll was
        // skipped.
        assert_eq!(count(&log, "sibling"), 0);
        assert_eq!(count(&log, "after_all"), 0);
    }

    #[tokio::test]
    async fn test_calculate_flag_overrides() {
        let mut builder = GuestBuilder::new();
        let title = builder.intern("flags");
        let body = builder.add_function(|_g, _h| Ok(()));
        builder.set_start(move |g, h| {
            h.set_iteration_count(4)?;
            h.set_min_iteration_count(1)?;
            h.set_calculate_mean(false)?;
            h.set_calculate_minimum(true)?;
            h.set_calculate_variance(true)?;
            h.set_calculate_std_dev(true)?;
            h.report_node(g, title, body, false)
        });
        let mut guest = builder.build();
        let clock = Clock::new();
        let mut tree = register_tree(&mut guest, &clock).unwrap();

        Engine::with_clock(clock)
            .run(&mut guest, &mut tree)
            .await
            .unwrap();

        let node = tree.node(tree.node(tree.root()).children[0]);
        assert_eq!(node.runs.len(), 4);
        assert!(node.mean.is_none());
        assert!(node.median.is_some());
        assert!(node.minimum.is_some());
        assert!(node.maximum.is_none());
        let variance = node.variance.expect("variance enabled");
        assert_eq!(node.std_dev.unwrap().to_bits(), variance.sqrt().to_bits());
    }

    #[tokio::test]
    async fn test_run_without_registration_is_config_gap() {
        let mut builder = GuestBuilder::new();
        let body = builder.add_function(|_g, _h| Ok(()));
        let mut guest = builder.build();
        // Hand-built tree that never went through registration.
        let mut tree = BenchTree::new();
        let root = tree.root();
        tree.add_child(root, "leaf".into(), false, body, Default::default());

        let err = Engine::new().run(&mut guest, &mut tree).await.unwrap_err();
        assert!(matches!(err, EngineError::ConfigGap { .. }));
    }
}
