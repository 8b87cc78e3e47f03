//! The benchmark tree and its hierarchical-configuration resolution.
//!
//! Nodes live in an arena owned by [`BenchTree`]; [`NodeId`] indices stand
//! in for the parent back-references so the tree stays acyclic and safely
//! mutable. Insertion order of `children` is declaration order.

use sandbench_guest::{GuestModule, NO_CALLBACK};

/// Index of a node in its [`BenchTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Per-node configuration overrides. Every field is tri-state: `Some` wins,
/// `None` means "inherit from the closest ancestor, else session default".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Collect the mean for this subtree.
    pub calculate_mean: Option<bool>,
    /// Collect the median for this subtree.
    pub calculate_median: Option<bool>,
    /// Collect the maximum for this subtree.
    pub calculate_maximum: Option<bool>,
    /// Collect the minimum for this subtree.
    pub calculate_minimum: Option<bool>,
    /// Collect the variance for this subtree.
    pub calculate_variance: Option<bool>,
    /// Collect the standard deviation for this subtree.
    pub calculate_std_dev: Option<bool>,
    /// Iterations per timed batch.
    pub iteration_count: Option<u32>,
    /// Iteration-count floor before the convergence loop may stop.
    pub min_iteration_count: Option<u32>,
    /// Per-leaf time budget, milliseconds.
    pub max_runtime: Option<u32>,
}

impl Overrides {
    /// Move the pending one-shot values out, leaving everything unset.
    pub fn take(&mut self) -> Overrides {
        std::mem::take(self)
    }
}

/// Session defaults, captured from the guest exactly once after its start
/// routine returns. The fallback for every quantity no ancestor overrides.
#[derive(Debug, Clone, Copy)]
pub struct SessionDefaults {
    /// Default calculate-mean flag.
    pub calculate_mean: bool,
    /// Default calculate-median flag.
    pub calculate_median: bool,
    /// Default calculate-maximum flag.
    pub calculate_maximum: bool,
    /// Default calculate-minimum flag.
    pub calculate_minimum: bool,
    /// Default calculate-variance flag.
    pub calculate_variance: bool,
    /// Default calculate-stddev flag.
    pub calculate_std_dev: bool,
    /// Default iterations per batch.
    pub iteration_count: u32,
    /// Default iteration floor.
    pub min_iteration_count: u32,
    /// Default time budget, milliseconds.
    pub max_runtime: u32,
}

impl SessionDefaults {
    /// Read every session-default getter from the guest. Called exactly once
    /// per registration, after the guest's start routine returns.
    pub fn capture(guest: &dyn GuestModule) -> Self {
        Self {
            calculate_mean: guest.default_calculate_mean(),
            calculate_median: guest.default_calculate_median(),
            calculate_maximum: guest.default_calculate_maximum(),
            calculate_minimum: guest.default_calculate_minimum(),
            calculate_variance: guest.default_calculate_variance(),
            calculate_std_dev: guest.default_calculate_std_dev(),
            iteration_count: guest.default_iteration_count(),
            min_iteration_count: guest.default_min_iteration_count(),
            max_runtime: guest.default_max_runtime(),
        }
    }
}

/// A benchmark group or a single benchmark.
#[derive(Debug)]
pub struct BenchNode {
    /// Display name, decoded once from the guest string at declaration.
    pub title: String,
    /// Groups organize children and never execute timed iterations.
    pub is_group: bool,
    /// Indirect-call table index of the guest function ([`NO_CALLBACK`] for
    /// the root). For groups this is the nested declaration function.
    pub callback: i32,
    /// Hooks run before every timed iteration of descendant leaves.
    pub before_each: Vec<i32>,
    /// Hooks run after every timed iteration of descendant leaves.
    pub after_each: Vec<i32>,
    /// Hooks run once when this group is entered.
    pub before_all: Vec<i32>,
    /// Hooks run once when this group is exited.
    pub after_all: Vec<i32>,
    /// Configuration overrides captured at declaration.
    pub overrides: Overrides,
    /// Per-iteration durations in milliseconds; populated for leaves after
    /// the convergence loop, empty for groups.
    pub runs: Vec<f64>,
    /// Mean, if the effective calculate-mean flag was set.
    pub mean: Option<f64>,
    /// Median, if enabled.
    pub median: Option<f64>,
    /// Maximum, if enabled.
    pub maximum: Option<f64>,
    /// Minimum, if enabled.
    pub minimum: Option<f64>,
    /// Population variance, if enabled.
    pub variance: Option<f64>,
    /// Standard deviation, if enabled.
    pub std_dev: Option<f64>,
    /// Wall-clock start of this leaf's evaluation, milliseconds.
    pub start_time: f64,
    /// Wall-clock end of this leaf's evaluation, milliseconds.
    pub end_time: f64,
    /// Back-reference; `None` only for the root.
    pub parent: Option<NodeId>,
    /// Children in declaration order.
    pub children: Vec<NodeId>,
}

impl BenchNode {
    fn new(title: String, is_group: bool, callback: i32, parent: Option<NodeId>) -> Self {
        Self {
            title,
            is_group,
            callback,
            before_each: Vec::new(),
            after_each: Vec::new(),
            before_all: Vec::new(),
            after_all: Vec::new(),
            overrides: Overrides::default(),
            runs: Vec::new(),
            mean: None,
            median: None,
            maximum: None,
            minimum: None,
            variance: None,
            std_dev: None,
            start_time: 0.0,
            end_time: 0.0,
            parent,
            children: Vec::new(),
        }
    }

    /// Total wall-clock runtime of this leaf's evaluation.
    pub fn runtime(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// The benchmark tree: an arena of nodes plus the session defaults captured
/// at the end of registration (`None` until registration runs).
#[derive(Debug)]
pub struct BenchTree {
    nodes: Vec<BenchNode>,
    /// Session defaults; set exactly once by registration.
    pub defaults: Option<SessionDefaults>,
}

impl BenchTree {
    /// Create a tree containing only the (never-timed) root group.
    pub fn new() -> Self {
        Self {
            nodes: vec![BenchNode::new(String::new(), true, NO_CALLBACK, None)],
            defaults: None,
        }
    }

    /// The root node's id.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Borrow a node.
    pub fn node(&self, id: NodeId) -> &BenchNode {
        &self.nodes[id.0]
    }

    /// Mutably borrow a node.
    pub fn node_mut(&mut self, id: NodeId) -> &mut BenchNode {
        &mut self.nodes[id.0]
    }

    /// Append a new node under `parent`, preserving declaration order.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        title: String,
        is_group: bool,
        callback: i32,
        overrides: Overrides,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut node = BenchNode::new(title, is_group, callback, Some(parent));
        node.overrides = overrides;
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Drop a child edge (used by the CLI's title filter). The node stays in
    /// the arena but becomes unreachable from the root.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.retain(|c| *c != child);
    }

    /// Resolve one configurable quantity for `id`: the closest ancestor
    /// (inclusive) with a present override wins, else `session_default`.
    pub fn resolve<T: Copy>(
        &self,
        id: NodeId,
        select: impl Fn(&Overrides) -> Option<T>,
        session_default: T,
    ) -> T {
        let mut cursor = Some(id);
        while let Some(at) = cursor {
            if let Some(value) = select(&self.nodes[at.0].overrides) {
                return value;
            }
            cursor = self.nodes[at.0].parent;
        }
        session_default
    }

    /// All `beforeEach` hooks that apply to `id`, accumulated from the root
    /// down to the node (outermost group's hooks first).
    pub fn accumulated_before_each(&self, id: NodeId) -> Vec<i32> {
        self.accumulate(id, |node| &node.before_each)
    }

    /// All `afterEach` hooks that apply to `id`, in the same root-to-node
    /// order as [`BenchTree::accumulated_before_each`].
    pub fn accumulated_after_each(&self, id: NodeId) -> Vec<i32> {
        self.accumulate(id, |node| &node.after_each)
    }

    fn accumulate(&self, id: NodeId, select: impl Fn(&BenchNode) -> &Vec<i32>) -> Vec<i32> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(at) = cursor {
            chain.push(at);
            cursor = self.nodes[at.0].parent;
        }
        chain
            .iter()
            .rev()
            .flat_map(|at| select(&self.nodes[at.0]).iter().copied())
            .collect()
    }

    /// Leaf ids in declaration order (depth-first).
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_leaves(self.root(), &mut out);
        out
    }

    fn collect_leaves(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let node = &self.nodes[id.0];
        if node.is_group {
            for child in &node.children {
                self.collect_leaves(*child, out);
            }
        } else {
            out.push(id);
        }
    }
}

impl Default for BenchTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides_with_iterations(n: u32) -> Overrides {
        Overrides {
            iteration_count: Some(n),
            ..Overrides::default()
        }
    }

    #[test]
    fn test_resolve_prefers_own_override() {
        let mut tree = BenchTree::new();
        let root = tree.root();
        let group = tree.add_child(root, "g".into(), true, 0, overrides_with_iterations(10));
        let leaf = tree.add_child(group, "l".into(), false, 1, overrides_with_iterations(5));
        assert_eq!(tree.resolve(leaf, |o| o.iteration_count, 99), 5);
    }

    #[test]
    fn test_resolve_walks_to_nearest_ancestor() {
        let mut tree = BenchTree::new();
        let root = tree.root();
        let outer = tree.add_child(root, "outer".into(), true, 0, overrides_with_iterations(10));
        let inner = tree.add_child(outer, "inner".into(), true, 1, Overrides::default());
        let leaf = tree.add_child(inner, "leaf".into(), false, 2, Overrides::default());
        assert_eq!(tree.resolve(leaf, |o| o.iteration_count, 99), 10);
    }

    #[test]
    fn test_resolve_scoped_to_subtree() {
        let mut tree = BenchTree::new();
        let root = tree.root();
        let group = tree.add_child(root, "g".into(), true, 0, overrides_with_iterations(10));
        let inside = tree.add_child(group, "in".into(), false, 1, Overrides::default());
        let outside = tree.add_child(root, "out".into(), false, 2, Overrides::default());
        assert_eq!(tree.resolve(inside, |o| o.iteration_count, 99), 10);
        // Sibling outside the subtree falls through to the session default.
        assert_eq!(tree.resolve(outside, |o| o.iteration_count, 99), 99);
    }

    #[test]
    fn test_resolve_boolean_false_is_an_override() {
        // Tri-state matters: Some(false) must win over the default true.
        let mut tree = BenchTree::new();
        let root = tree.root();
        let overrides = Overrides {
            calculate_mean: Some(false),
            ..Overrides::default()
        };
        let leaf = tree.add_child(root, "l".into(), false, 0, overrides);
        assert!(!tree.resolve(leaf, |o| o.calculate_mean, true));
    }

    #[test]
    fn test_hooks_accumulate_root_to_node() {
        let mut tree = BenchTree::new();
        let root = tree.root();
        tree.node_mut(root).before_each.push(1);
        let group = tree.add_child(root, "g".into(), true, 0, Overrides::default());
        tree.node_mut(group).before_each.extend([2, 3]);
        let leaf = tree.add_child(group, "l".into(), false, 1, Overrides::default());
        tree.node_mut(leaf).before_each.push(4);
        assert_eq!(tree.accumulated_before_each(leaf), vec![1, 2, 3, 4]);
        // afterEach uses the same outermost-first order.
        tree.node_mut(root).after_each.push(7);
        tree.node_mut(leaf).after_each.push(8);
        assert_eq!(tree.accumulated_after_each(leaf), vec![7, 8]);
    }

    #[test]
    fn test_children_keep_declaration_order() {
        let mut tree = BenchTree::new();
        let root = tree.root();
        let a = tree.add_child(root, "a".into(), false, 0, Overrides::default());
        let b = tree.add_child(root, "b".into(), false, 1, Overrides::default());
        assert_eq!(tree.node(root).children, vec![a, b]);
        assert_eq!(tree.leaves(), vec![a, b]);
    }

    #[test]
    fn test_runtime_derived_from_endpoints() {
        let mut tree = BenchTree::new();
        let root = tree.root();
        let leaf = tree.add_child(root, "l".into(), false, 0, Overrides::default());
        tree.node_mut(leaf).start_time = 10.0;
        tree.node_mut(leaf).end_time = 35.5;
        assert_eq!(tree.node(leaf).runtime(), 25.5);
    }
}
