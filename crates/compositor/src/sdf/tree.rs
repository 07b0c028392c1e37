//! Resolution of authored SDF layers into a call graph of nodes.
//!
//! Every valid layer becomes one node whose children match its declared
//! arity. Mismatches are repaired with synthetic union nodes, promotion of a
//! lone child, or by dropping the layer.

use super::signature::Arity;

/// Most operands one union or variadic node can take.
pub const MAX_CHILDREN: usize = 16;

/// Input to the builder: one entry per authored SDF layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SdfSource {
    /// `None` when the layer failed to compile and must be excluded.
    pub arity: Option<Arity>,
    /// Indices of authored SDF children, in paint order.
    pub children: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeOwner {
    /// Index into the sources handed to [`build_graph`].
    Layer(usize),
    /// A synthesised union, numbered per build.
    Union(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdfNode {
    pub id: usize,
    pub owner: NodeOwner,
    pub children: Vec<usize>,
}

/// Nodes are indexed by id; children always have lower ids than parents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdfGraph {
    pub nodes: Vec<SdfNode>,
    pub root: Option<usize>,
    pub unions: usize,
}

impl SdfGraph {
    pub fn node(&self, id: usize) -> &SdfNode {
        &self.nodes[id]
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}

/// Builds the node graph for the SDF forest whose top-level layers are `roots`.
pub fn build_graph(sources: &[SdfSource], roots: &[usize]) -> SdfGraph {
    let mut builder = Builder {
        sources,
        graph: SdfGraph::default(),
    };
    let built: Vec<usize> = roots
        .iter()
        .filter_map(|&root| builder.build(root))
        .collect();
    builder.graph.root = match built.len() {
        0 => None,
        1 => Some(built[0]),
        _ => Some(builder.union(built)),
    };
    builder.graph
}

struct Builder<'a> {
    sources: &'a [SdfSource],
    graph: SdfGraph,
}

impl Builder<'_> {
    fn push(&mut self, owner: NodeOwner, children: Vec<usize>) -> usize {
        let id = self.graph.nodes.len();
        self.graph.nodes.push(SdfNode { id, owner, children });
        id
    }

    fn push_union(&mut self, children: Vec<usize>) -> usize {
        let owner = NodeOwner::Union(self.graph.unions);
        self.graph.unions += 1;
        self.push(owner, children)
    }

    /// Unions `children`, nesting when there are more than [`MAX_CHILDREN`].
    fn union(&mut self, mut children: Vec<usize>) -> usize {
        while children.len() > MAX_CHILDREN {
            let mut grouped = Vec::new();
            for chunk in children.chunks(MAX_CHILDREN) {
                grouped.push(match chunk {
                    [single] => *single,
                    many => self.push_union(many.to_vec()),
                });
            }
            children = grouped;
        }
        self.push_union(children)
    }

    fn build(&mut self, index: usize) -> Option<usize> {
        let sources = self.sources;
        let source = sources.get(index)?;
        let arity = source.arity?;
        let owner = NodeOwner::Layer(index);

        let k = match arity {
            Arity::Variadic => {
                let mut children = Vec::new();
                let mut remaining = source.children.iter();
                for &child in remaining.by_ref() {
                    if let Some(node) = self.build(child) {
                        children.push(node);
                        if children.len() == MAX_CHILDREN {
                            break;
                        }
                    }
                }
                let ignored = remaining.len();
                if ignored > 0 {
                    tracing::warn!(
                        layer = index,
                        ignored,
                        max = MAX_CHILDREN,
                        "variadic SDF layer has too many children; extra children are ignored"
                    );
                }
                return Some(self.push(owner, children));
            }
            Arity::Fixed(k) => k,
        };
        let mut children: Vec<usize> = source
            .children
            .iter()
            .filter_map(|&child| self.build(child))
            .collect();
        let n = children.len();

        if n == k {
            return Some(self.push(owner, children));
        }
        if n < k {
            return match n {
                0 => None,
                1 => Some(children[0]),
                _ => Some(self.union(children)),
            };
        }

        let node = match k {
            0 => {
                let generator = self.push(owner, Vec::new());
                let mut operands = vec![generator];
                operands.extend(children);
                self.union(operands)
            }
            1 => {
                let operand = self.union(children);
                self.push(owner, vec![operand])
            }
            2 => {
                let rest = self.union(children.split_off(1));
                self.push(owner, vec![children[0], rest])
            }
            _ => {
                let rest = children.split_off(k);
                let node = self.push(owner, children);
                let mut operands = vec![node];
                operands.extend(rest);
                self.union(operands)
            }
        };
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> SdfSource {
        SdfSource {
            arity: Some(Arity::Fixed(0)),
            children: Vec::new(),
        }
    }

    fn operator(k: usize, children: Vec<usize>) -> SdfSource {
        SdfSource {
            arity: Some(Arity::Fixed(k)),
            children,
        }
    }

    fn assert_well_formed(graph: &SdfGraph) {
        for (index, node) in graph.nodes.iter().enumerate() {
            assert_eq!(node.id, index, "ids are dense");
            assert!(node.children.iter().all(|&child| child < node.id), "children precede parents");
        }
        if let Some(root) = graph.root {
            let mut reached = vec![false; graph.nodes.len()];
            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                reached[id] = true;
                stack.extend(&graph.nodes[id].children);
            }
            assert!(reached.into_iter().all(|r| r), "every node reaches the root");
        }
    }

    #[test]
    fn binary_operator_with_five_children_pairs_first_with_union() {
        let mut sources = vec![operator(2, vec![1, 2, 3, 4, 5])];
        sources.extend((0..5).map(|_| generator()));
        let graph = build_graph(&sources, &[0]);
        assert_well_formed(&graph);

        let root = graph.node(graph.root.unwrap());
        assert_eq!(root.owner, NodeOwner::Layer(0));
        assert_eq!(root.children.len(), 2);
        assert_eq!(graph.node(root.children[0]).owner, NodeOwner::Layer(1));
        let union = graph.node(root.children[1]);
        assert_eq!(union.owner, NodeOwner::Union(0));
        let owners: Vec<NodeOwner> = union.children.iter().map(|&c| graph.node(c).owner).collect();
        assert_eq!(
            owners,
            [2, 3, 4, 5].map(NodeOwner::Layer).to_vec()
        );
    }

    #[test]
    fn unary_operator_without_children_is_dropped() {
        let graph = build_graph(&[operator(1, Vec::new())], &[0]);
        assert!(graph.nodes.is_empty());
        assert!(graph.is_empty());
    }

    #[test]
    fn unary_operator_with_one_child_needs_no_union() {
        let graph = build_graph(&[operator(1, vec![1]), generator()], &[0]);
        assert_well_formed(&graph);
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.unions, 0);
        assert_eq!(graph.node(graph.root.unwrap()).children, vec![0]);
    }

    #[test]
    fn missing_operands_promote_or_union_children() {
        let promoted = build_graph(&[operator(2, vec![1]), generator()], &[0]);
        assert_eq!(promoted.nodes.len(), 1);
        assert_eq!(promoted.node(promoted.root.unwrap()).owner, NodeOwner::Layer(1));

        let unioned = build_graph(&[operator(3, vec![1, 2]), generator(), generator()], &[0]);
        assert_eq!(unioned.node(unioned.root.unwrap()).owner, NodeOwner::Union(0));
    }

    #[test]
    fn generator_with_children_unions_itself_with_them() {
        let graph = build_graph(&[operator(0, vec![1, 2]), generator(), generator()], &[0]);
        assert_well_formed(&graph);
        let root = graph.node(graph.root.unwrap());
        assert_eq!(root.owner, NodeOwner::Union(0));
        let owners: Vec<NodeOwner> = root.children.iter().map(|&c| graph.node(c).owner).collect();
        assert_eq!(owners, vec![NodeOwner::Layer(0), NodeOwner::Layer(1), NodeOwner::Layer(2)]);
    }

    #[test]
    fn ternary_operator_with_extra_children() {
        let mut sources = vec![operator(3, vec![1, 2, 3, 4])];
        sources.extend((0..4).map(|_| generator()));
        let graph = build_graph(&sources, &[0]);
        assert_well_formed(&graph);
        let root = graph.node(graph.root.unwrap());
        assert_eq!(root.owner, NodeOwner::Union(0));
        let node = graph.node(root.children[0]);
        assert_eq!(node.owner, NodeOwner::Layer(0));
        assert_eq!(node.children.len(), 3);
        assert_eq!(graph.node(root.children[1]).owner, NodeOwner::Layer(4));
    }

    #[test]
    fn invalid_layers_are_excluded_with_their_subtree() {
        let mut broken = operator(1, vec![1]);
        broken.arity = None;
        let graph = build_graph(&[broken, generator(), generator()], &[0, 2]);
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.node(graph.root.unwrap()).owner, NodeOwner::Layer(2));
    }

    #[test]
    fn wide_unions_nest() {
        let roots: Vec<usize> = (0..40).collect();
        let sources: Vec<SdfSource> = roots.iter().map(|_| generator()).collect();
        let graph = build_graph(&sources, &roots);
        assert_well_formed(&graph);
        assert!(graph.nodes.iter().all(|node| node.children.len() <= MAX_CHILDREN));
        assert_eq!(graph.node(graph.root.unwrap()).children.len(), 3);
    }

    #[test]
    fn oversized_variadic_keeps_the_first_children() {
        let mut sources = vec![SdfSource {
            arity: Some(Arity::Variadic),
            children: (1..=20).collect(),
        }];
        sources.extend((0..20).map(|_| generator()));
        let graph = build_graph(&sources, &[0]);
        assert_well_formed(&graph);
        assert_eq!(graph.nodes.len(), MAX_CHILDREN + 1);
        let root = graph.node(graph.root.unwrap());
        assert_eq!(root.children.len(), MAX_CHILDREN);
        let owners: Vec<NodeOwner> = root.children.iter().map(|&c| graph.node(c).owner).collect();
        assert_eq!(owners, (1..=MAX_CHILDREN).map(NodeOwner::Layer).collect::<Vec<_>>());
    }

    #[test]
    fn invalid_variadic_children_do_not_count_towards_the_limit() {
        let mut broken = generator();
        broken.arity = None;
        let mut sources = vec![SdfSource {
            arity: Some(Arity::Variadic),
            children: (1..=18).collect(),
        }];
        sources.push(broken.clone());
        sources.push(broken);
        sources.extend((0..16).map(|_| generator()));
        let graph = build_graph(&sources, &[0]);
        assert_well_formed(&graph);
        let root = graph.node(graph.root.unwrap());
        assert_eq!(root.children.len(), MAX_CHILDREN);
        assert_eq!(graph.node(root.children[0]).owner, NodeOwner::Layer(3));
    }
}
