use std::ops::Range;

pub type NodeKey = u32;
pub type ChildRelativeKey = u32;

pub trait NodeGraph {
    fn node_count(&self) -> usize;

    fn nodes(&self) -> Range<NodeKey>;
    fn children(&self, this: NodeKey) -> Range<ChildRelativeKey>;
    fn get_child(&self, this: NodeKey, child: ChildRelativeKey) -> NodeKey;
}

#[derive(Default, Clone, Debug)]
pub struct ImmutableGraph {
    nodes: Vec<(u32, u32)>,
    children: Vec<u32>,
}

impl ImmutableGraph {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn get_children(&self, node: NodeKey) -> &[NodeKey] {
        match self.nodes.get(node as usize) {
            Some(&(start, end)) => &self.children[start as usize..end as usize],
            None => &[],
        }
    }
}

impl NodeGraph for ImmutableGraph {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn nodes(&self) -> Range<NodeKey> {
        0..self.nodes.len() as u32
    }

    fn children(&self, this: NodeKey) -> Range<ChildRelativeKey> {
        let node = self.nodes[this as usize];
        0..node.1 - node.0
    }

    fn get_child(&self, this: NodeKey, child: ChildRelativeKey) -> NodeKey {
        let node = self.nodes[this as usize];
        self.children[(node.0 + child) as usize]
    }
}

pub fn reverse_edges<G: NodeGraph>(graph: &G) -> ImmutableGraph {
    let mut into = Default::default();
    reverse_edges_into(graph, &mut into);
    into
}

pub fn reverse_edges_into<G: NodeGraph>(graph: &G, into: &mut ImmutableGraph) {
    // 1. count the parents of every node into the start field
    // 2. prefix sum the counts into offsets of a single vector, start and end begin equal
    // 3. push the parents, end is advanced past each one

    let ImmutableGraph { nodes, children } = into;
    nodes.clear();
    nodes.resize(graph.node_count(), (0, 0));

    // 1.
    for node in graph.nodes() {
        for c in graph.children(node) {
            let child = graph.get_child(node, c);
            nodes[child as usize].0 += 1;
        }
    }

    // 2.
    let mut offset = 0;
    for node in graph.nodes() {
        let node = &mut nodes[node as usize];
        let end = offset + node.0;
        *node = (offset, offset);
        offset = end;
    }

    children.clear();
    children.resize(offset as usize, 0);

    // 3.
    for p in graph.nodes() {
        for c in graph.children(p) {
            let child = graph.get_child(p, c);

            let offset = &mut nodes[child as usize].1;
            children[*offset as usize] = p;
            *offset += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Adjacency(Vec<Vec<u32>>);
    impl NodeGraph for Adjacency {
        fn node_count(&self) -> usize {
            self.0.len()
        }
        fn nodes(&self) -> Range<NodeKey> {
            0..self.0.len() as u32
        }
        fn children(&self, this: NodeKey) -> Range<ChildRelativeKey> {
            0..self.0[this as usize].len() as u32
        }
        fn get_child(&self, this: NodeKey, child: ChildRelativeKey) -> NodeKey {
            self.0[this as usize][child as usize]
        }
    }

    #[test]
    fn test_reverse_edges() {
        let graph = Adjacency(vec![vec![], vec![0], vec![0, 1], vec![2]]);
        let reversed = reverse_edges(&graph);
        assert_eq!(reversed.get_children(0), &[1, 2]);
        assert_eq!(reversed.get_children(1), &[2]);
        assert_eq!(reversed.get_children(2), &[3]);
        assert!(reversed.get_children(3).is_empty());
    }
}
