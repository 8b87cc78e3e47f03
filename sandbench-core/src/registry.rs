//! Registration protocol: guest declarations become the benchmark tree.
//!
//! The guest's start routine calls `report_node` once per declared
//! benchmark/group. For groups, the host re-enters the guest synchronously
//! through the indirect-call table with the "current parent" cursor pushed
//! onto an explicit stack, which is what turns the guest's depth-first
//! declaration call stack into a tree. One-shot setters stage override
//! values for the *next* declaration only; they are captured and cleared on
//! every `report_node`.
//!
//! The protocol assumes single-threaded, strictly nested declaration calls;
//! a `report_node` arriving outside a declaration call is undefined behavior
//! upstream of this contract.

use crate::bridge;
use crate::clock::Clock;
use crate::error::EngineError;
use crate::node::{BenchTree, NodeId, Overrides, SessionDefaults};
use sandbench_guest::{GuestModule, HostImports, Trap};

/// Fallback title for a declaration with a null string pointer.
pub const FALLBACK_TITLE: &str = "<benchmark>";

/// Run the guest's start routine, collect the declared tree, then read every
/// session-default getter exactly once.
pub fn register_tree(guest: &mut dyn GuestModule, clock: &Clock) -> Result<BenchTree, EngineError> {
    let mut tree = BenchTree::new();
    let root = tree.root();
    let mut registrar = Registrar {
        tree: &mut tree,
        cursor: vec![root],
        pending: Overrides::default(),
        clock,
    };
    guest.start(&mut registrar)?;
    tree.defaults = Some(SessionDefaults::capture(guest));
    tracing::debug!(
        benchmarks = tree.leaves().len(),
        "registration complete, session defaults captured"
    );
    Ok(tree)
}

/// Host-import implementation live during registration.
struct Registrar<'a> {
    tree: &'a mut BenchTree,
    /// Explicit "current parent" stack; pushed before each group re-entry,
    /// popped on return (also on the error path).
    cursor: Vec<NodeId>,
    /// One-shot override values staged for the next declaration.
    pending: Overrides,
    clock: &'a Clock,
}

impl Registrar<'_> {
    fn current(&self) -> Result<NodeId, Trap> {
        self.cursor
            .last()
            .copied()
            .ok_or_else(|| Trap::Import("parent cursor stack is empty".into()))
    }
}

impl HostImports for Registrar<'_> {
    fn report_node(
        &mut self,
        guest: &mut dyn GuestModule,
        title_ptr: u32,
        callback: i32,
        is_group: bool,
    ) -> Result<(), Trap> {
        let title = bridge::read_string(guest, title_ptr, FALLBACK_TITLE)
            .map_err(|fault| Trap::Import(fault.to_string()))?;
        let overrides = self.pending.take();
        let parent = self.current()?;
        let id = self
            .tree
            .add_child(parent, title, is_group, callback, overrides);
        tracing::debug!(
            title = %self.tree.node(id).title,
            callback,
            is_group,
            "node declared"
        );
        if is_group {
            // Discover nested declarations by running the group's function
            // with the cursor repointed at the new node. The pop must happen
            // on the error path too, or a failing declaration would corrupt
            // every later sibling's parent.
            self.cursor.push(id);
            let nested = guest.call_indirect(callback, self);
            self.cursor.pop();
            nested?;
        }
        Ok(())
    }

    fn report_before_each(&mut self, callback: i32) -> Result<(), Trap> {
        let current = self.current()?;
        self.tree.node_mut(current).before_each.push(callback);
        Ok(())
    }

    fn report_after_each(&mut self, callback: i32) -> Result<(), Trap> {
        let current = self.current()?;
        self.tree.node_mut(current).after_each.push(callback);
        Ok(())
    }

    fn report_before_all(&mut self, callback: i32) -> Result<(), Trap> {
        let current = self.current()?;
        self.tree.node_mut(current).before_all.push(callback);
        Ok(())
    }

    fn report_after_all(&mut self, callback: i32) -> Result<(), Trap> {
        let current = self.current()?;
        self.tree.node_mut(current).after_all.push(callback);
        Ok(())
    }

    fn set_calculate_mean(&mut self, value: bool) -> Result<(), Trap> {
        self.pending.calculate_mean = Some(value);
        Ok(())
    }

    fn set_calculate_median(&mut self, value: bool) -> Result<(), Trap> {
        self.pending.calculate_median = Some(value);
        Ok(())
    }

    fn set_calculate_maximum(&mut self, value: bool) -> Result<(), Trap> {
        self.pending.calculate_maximum = Some(value);
        Ok(())
    }

    fn set_calculate_minimum(&mut self, value: bool) -> Result<(), Trap> {
        self.pending.calculate_minimum = Some(value);
        Ok(())
    }

    fn set_calculate_variance(&mut self, value: bool) -> Result<(), Trap> {
        self.pending.calculate_variance = Some(value);
        Ok(())
    }

    fn set_calculate_std_dev(&mut self, value: bool) -> Result<(), Trap> {
        self.pending.calculate_std_dev = Some(value);
        Ok(())
    }

    fn set_iteration_count(&mut self, value: u32) -> Result<(), Trap> {
        self.pending.iteration_count = Some(value);
        Ok(())
    }

    fn set_min_iteration_count(&mut self, value: u32) -> Result<(), Trap> {
        self.pending.min_iteration_count = Some(value);
        Ok(())
    }

    fn set_max_runtime(&mut self, value: u32) -> Result<(), Trap> {
        self.pending.max_runtime = Some(value);
        Ok(())
    }

    fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }
}
