//! The project → module → function coverage hierarchy.
//!
//! Nodes live in an arena owned by [`CoverageTree`]; children are referenced
//! by index from their parent, and the parent link is a plain index used
//! only for lookups. Aggregated results are memoized per node and dropped
//! whenever the node or one of its descendants changes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use crate::aggregate::AggregationEngine;
use crate::error::{CoverError, Result};
use crate::model::{CoverageElement, CoverageMetric, CoveragePaint, MetricMap, Ratio};

/// Default name of the root node.
pub const PROJECT_NAME: &str = "Cover coverage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug)]
struct NodeData {
    element: CoverageElement,
    name: String,
    relative_source_path: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    by_name: HashMap<String, NodeId>,
    local: MetricMap,
    paint: Option<CoveragePaint>,
    results: OnceLock<MetricMap>,
}

impl NodeData {
    fn new(element: CoverageElement, name: String, parent: Option<NodeId>) -> Self {
        Self {
            element,
            name,
            relative_source_path: None,
            parent,
            children: Vec::new(),
            by_name: HashMap::new(),
            local: MetricMap::new(),
            paint: element.has_paint().then(CoveragePaint::new),
            results: OnceLock::new(),
        }
    }
}

impl PartialEq for NodeData {
    fn eq(&self, other: &Self) -> bool {
        self.element == other.element
            && self.name == other.name
            && self.relative_source_path == other.relative_source_path
            && self.parent == other.parent
            && self.children == other.children
            && self.local == other.local
            && self.paint == other.paint
    }
}

/// Coverage results of a whole project.
#[derive(Debug)]
pub struct CoverageTree {
    nodes: Vec<NodeData>,
    engine: Arc<AggregationEngine>,
}

impl CoverageTree {
    /// A tree with the standard Erlang aggregation rules.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_engine(name, Arc::new(AggregationEngine::standard()))
    }

    pub fn with_engine(name: impl Into<String>, engine: Arc<AggregationEngine>) -> Self {
        Self {
            nodes: vec![NodeData::new(CoverageElement::Project, name.into(), None)],
            engine,
        }
    }

    pub fn root(&self) -> Node<'_> {
        self.node(self.root_id())
    }

    pub fn root_id(&self) -> NodeId {
        NodeId(0)
    }

    /// # Panics
    /// If `id` does not belong to this tree.
    pub fn node(&self, id: NodeId) -> Node<'_> {
        assert!(id.0 < self.nodes.len(), "node id out of range");
        Node { tree: self, id }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn module(&self, name: &str) -> Option<Node<'_>> {
        self.root().child(name)
    }

    /// Get the child named `name` of `parent`, creating it on first use.
    pub fn create_child(
        &mut self,
        parent: NodeId,
        element: CoverageElement,
        name: &str,
    ) -> Result<NodeId> {
        let parent_element = self.nodes[parent.0].element;
        if element.parent() != Some(parent_element) {
            return Err(CoverError::InvalidHierarchy {
                parent: parent_element.to_string(),
                child: element.to_string(),
            });
        }
        Ok(self.child_or_insert(parent, element, name))
    }

    fn child_or_insert(&mut self, parent: NodeId, element: CoverageElement, name: &str) -> NodeId {
        if let Some(&existing) = self.nodes[parent.0].by_name.get(name) {
            return existing;
        }

        let id = NodeId(self.nodes.len());
        self.nodes
            .push(NodeData::new(element, name.to_string(), Some(parent)));
        let parent_data = &mut self.nodes[parent.0];
        parent_data.children.push(id);
        parent_data.by_name.insert(name.to_string(), id);
        self.invalidate(parent);
        id
    }

    pub fn set_relative_source_path(&mut self, id: NodeId, path: impl Into<String>) {
        self.nodes[id.0].relative_source_path = Some(path.into());
    }

    /// Add `hits` to `line` of the node. Function paint is also summed into
    /// the paint of the owning module.
    pub fn paint(&mut self, id: NodeId, line: u32, hits: u64) {
        let data = &mut self.nodes[id.0];
        let propagate = data.element == CoverageElement::Function;
        let parent = data.parent;
        if let Some(paint) = data.paint.as_mut() {
            paint.paint(line, hits);
        }
        if let (true, Some(parent)) = (propagate, parent) {
            if let Some(paint) = self.nodes[parent.0].paint.as_mut() {
                paint.paint(line, hits);
            }
        }
    }

    /// Sum `additional` into the node's own value of `metric`.
    pub fn update_metric(&mut self, id: NodeId, metric: CoverageMetric, additional: Ratio) {
        let local = &mut self.nodes[id.0].local;
        let combined = match local.get(&metric) {
            Some(existing) => Ratio::new(
                existing.numerator + additional.numerator,
                existing.denominator + additional.denominator,
            ),
            None => additional,
        };
        local.insert(metric, combined);
        self.invalidate(id);
    }

    /// Record one probe occurrence of `line` in `function` of `module`.
    /// Returns the function node.
    pub fn bump(&mut self, module: &str, function: &str, line: u32, hits: u64) -> NodeId {
        let root = self.root_id();
        let module_id = self.child_or_insert(root, CoverageElement::Module, module);
        let function_id = self.child_or_insert(module_id, CoverageElement::Function, function);
        if let Some(path) = self.nodes[module_id.0].relative_source_path.clone() {
            self.set_relative_source_path(function_id, path);
        }
        self.paint(function_id, line, hits);
        self.update_metric(
            function_id,
            CoverageMetric::Line,
            Ratio::new(u64::from(hits != 0), 1),
        );
        function_id
    }

    /// Aggregated results of a node, computed on first read.
    pub fn results(&self, id: NodeId) -> &MetricMap {
        let data = &self.nodes[id.0];
        data.results.get_or_init(|| {
            let children = data.children.iter().map(|&child| {
                (self.nodes[child.0].element, self.results(child))
            });
            self.engine.fold(&data.local, children)
        })
    }

    /// Module paints keyed by relative source path.
    pub fn painted_sources(&self) -> BTreeMap<&str, &CoveragePaint> {
        self.root()
            .children()
            .filter_map(|module| Some((module.relative_source_path()?, module.paint()?)))
            .collect()
    }

    /// All nodes in pre-order, children in declaration order.
    pub fn walk(&self) -> Vec<Node<'_>> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root_id()];
        while let Some(id) = stack.pop() {
            out.push(self.node(id));
            stack.extend(self.nodes[id.0].children.iter().rev());
        }
        out
    }

    fn invalidate(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(NodeId(index)) = current {
            let data = &mut self.nodes[index];
            data.results.take();
            current = data.parent;
        }
    }
}

impl Default for CoverageTree {
    fn default() -> Self {
        Self::new(PROJECT_NAME)
    }
}

impl PartialEq for CoverageTree {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

/// Read-only view of one node.
#[derive(Clone, Copy)]
pub struct Node<'a> {
    tree: &'a CoverageTree,
    id: NodeId,
}

impl<'a> Node<'a> {
    fn data(&self) -> &'a NodeData {
        &self.tree.nodes[self.id.0]
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn element(&self) -> CoverageElement {
        self.data().element
    }

    pub fn name(&self) -> &'a str {
        &self.data().name
    }

    pub fn relative_source_path(&self) -> Option<&'a str> {
        self.data().relative_source_path.as_deref()
    }

    pub fn parent(&self) -> Option<Node<'a>> {
        self.data().parent.map(|id| self.tree.node(id))
    }

    pub fn children(&self) -> impl Iterator<Item = Node<'a>> + 'a {
        let tree = self.tree;
        self.data().children.iter().map(move |&id| tree.node(id))
    }

    pub fn child(&self, name: &str) -> Option<Node<'a>> {
        self.data().by_name.get(name).map(|&id| self.tree.node(id))
    }

    pub fn child_count(&self) -> usize {
        self.data().children.len()
    }

    pub fn paint(&self) -> Option<&'a CoveragePaint> {
        self.data().paint.as_ref()
    }

    pub fn results(&self) -> &'a MetricMap {
        self.tree.results(self.id)
    }

    pub fn coverage(&self, metric: CoverageMetric) -> Option<Ratio> {
        self.results().get(&metric).copied()
    }

    pub fn metrics(&self) -> Vec<CoverageMetric> {
        self.results().keys().copied().collect()
    }

    /// Names from the root down to this node.
    pub fn path(&self) -> Vec<&'a str> {
        let mut names = vec![self.name()];
        let mut current = self.parent();
        while let Some(node) = current {
            names.push(node.name());
            current = node.parent();
        }
        names.reverse();
        names
    }
}

impl std::fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("element", &self.element())
            .field("name", &self.name())
            .field("results", self.results())
            .finish()
    }
}
