use std::collections::HashMap;
use std::fmt;
use std::fs::{create_dir_all, read_to_string, write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CladekitError;
use crate::utils::gene_name;

/*
========================
Custom error definitions
========================
*/

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NewickError {
    /// Indicates an input without any tree content
    #[error("tree string is empty")]
    Empty,
    /// Indicates a character that cannot start or follow a node
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    /// Indicates a closing parenthesis without an opening one or the reverse
    #[error("unbalanced parentheses at position {0}")]
    Unbalanced(usize),
    /// Indicates a tree that is not terminated by a semicolon
    #[error("missing terminating ';'")]
    MissingTerminator,
    /// Indicates content after the terminating semicolon
    #[error("unexpected content after ';' at position {0}")]
    TrailingContent(usize),
    /// Indicates a branch length that is not a valid number
    #[error("invalid branch length '{0}'")]
    BranchLength(String),
    /// Indicates a quoted label without closing quote
    #[error("unterminated quoted label starting at position {0}")]
    UnterminatedQuote(usize),
    /// Indicates a comment without closing bracket
    #[error("unterminated comment starting at position {0}")]
    UnterminatedComment(usize),
    /// Indicates a leaf without a name
    #[error("leaf without a name at position {0}")]
    UnnamedLeaf(usize),
    /// Indicates a leaf name that occurs more than once
    #[error("duplicate leaf name: {0}")]
    DuplicateLeaf(String),
}

/// Broken topology found while walking the node arena
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StructureError {
    #[error("node {0} is not part of the tree")]
    DanglingNode(NodeId),
    #[error("node {0} is reachable more than once")]
    Revisited(NodeId),
    #[error("node {child} does not link back to its parent {parent}")]
    BrokenParentLink { child: NodeId, parent: NodeId },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RootingError {
    #[error("outgroup rooting requires an outgroup name")]
    OutgroupMissing,
    #[error("outgroup '{0}' not found in tree")]
    OutgroupNotFound(String),
    #[error("tree has fewer than two leaves")]
    TooFewLeaves,
    #[error("tree has no positive branch lengths")]
    ZeroLength,
    #[error(transparent)]
    Structure(#[from] StructureError),
}

/*
==================
Tree node arena
==================
*/

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Leaf { name: String },
    Internal { children: Vec<NodeId>, label: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub length: Option<f64>,
}
impl Node {
    pub fn leaf(name: &str, parent: Option<NodeId>, length: Option<f64>) -> Self {
        Self { kind: NodeKind::Leaf { name: name.to_string() }, parent, length }
    }
    pub fn internal(children: Vec<NodeId>, parent: Option<NodeId>, length: Option<f64>) -> Self {
        Self { kind: NodeKind::Internal { children, label: None }, parent, length }
    }
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Leaf { .. } => &[],
            NodeKind::Internal { children, .. } => children,
        }
    }
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Leaf { name } => Some(name),
            NodeKind::Internal { .. } => None,
        }
    }
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }
}

/// Rooted tree stored as an arena of nodes referenced by index
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
    leaf_index: HashMap<String, NodeId>,
}

impl Tree {
    /// Builds a tree from raw nodes without any structural validation
    pub fn from_nodes(nodes: Vec<Node>, root: NodeId) -> Self {
        let leaf_index = nodes
            .iter()
            .enumerate()
            .filter_map(|(id, node)| node.name().map(|name| (name.to_string(), id)))
            .collect();
        Self { nodes, root, leaf_index }
    }
    pub fn from_file(path: &Path) -> Result<Self, CladekitError> {
        let newick = read_to_string(path)?;
        if newick.trim().is_empty() {
            return Err(CladekitError::TreeFileIsEmpty(path.to_path_buf()));
        }
        Ok(Self::from_newick(&newick)?)
    }
    pub fn from_newick(newick: &str) -> Result<Self, NewickError> {
        NewickParser::new(newick).parse()
    }
    pub fn root(&self) -> NodeId {
        self.root
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn node(&self, id: NodeId) -> Result<&Node, StructureError> {
        self.nodes.get(id).ok_or(StructureError::DanglingNode(id))
    }
    pub fn leaf_id(&self, name: &str) -> Option<NodeId> {
        self.leaf_index.get(name).copied()
    }
    /// Leaf names in document order
    pub fn leaf_names(&self) -> Vec<&str> {
        self.nodes.iter().filter_map(|node| node.name()).collect()
    }
    pub fn leaf_count(&self) -> usize {
        self.leaf_index.len()
    }
    /// Nodes reachable from `start` in pre-order
    ///
    /// Fails when a child index points outside the arena, when a child does
    /// not link back to its parent, or when a node is reached twice.
    pub fn preorder(&self, start: NodeId) -> Result<Vec<NodeId>, StructureError> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        let mut stack = vec![start];

        while let Some(id) = stack.pop() {
            let node = self.node(id)?;
            if visited[id] {
                return Err(StructureError::Revisited(id));
            }
            visited[id] = true;
            order.push(id);

            for &child in node.children().iter().rev() {
                if self.node(child)?.parent != Some(id) {
                    return Err(StructureError::BrokenParentLink { child, parent: id });
                }
                stack.push(child);
            }
        }
        Ok(order)
    }
    /// Leaf names below a node in document order
    pub fn leaf_names_under(&self, id: NodeId) -> Result<Vec<String>, StructureError> {
        let mut names = Vec::new();
        for node_id in self.preorder(id)? {
            if let Some(name) = self.node(node_id)?.name() {
                names.push(name.to_string())
            }
        }
        Ok(names)
    }
    /// Most recent common ancestor of a set of leaves
    pub fn mrca(&self, leaves: &[NodeId]) -> Result<Option<NodeId>, StructureError> {
        let Some((&first, rest)) = leaves.split_first() else {
            return Ok(None);
        };
        let path = self.ancestors(first)?;
        let position: HashMap<NodeId, usize> = path.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut highest = 0;
        for &leaf in rest {
            let mut current = Some(leaf);
            let mut steps = 0;
            while let Some(id) = current {
                if let Some(&i) = position.get(&id) {
                    highest = highest.max(i);
                    break;
                }
                steps += 1;
                if steps > self.nodes.len() {
                    return Err(StructureError::Revisited(id));
                }
                current = self.node(id)?.parent;
            }
            if current.is_none() {
                // Leaf is in a different component than the first leaf
                return Ok(None);
            }
        }
        Ok(Some(path[highest]))
    }
    /// Path from a node up to the root, node first
    fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>, StructureError> {
        let mut path = vec![id];
        let mut current = self.node(id)?.parent;
        while let Some(parent) = current {
            if path.len() > self.nodes.len() {
                return Err(StructureError::Revisited(parent));
            }
            path.push(parent);
            current = self.node(parent)?.parent;
        }
        Ok(path)
    }
    pub fn to_newick(&self) -> String {
        enum Step {
            Open(NodeId),
            Close(NodeId),
            Comma,
        }
        let mut newick = String::new();
        let mut stack = vec![Step::Open(self.root)];

        while let Some(step) = stack.pop() {
            match step {
                Step::Comma => newick.push(','),
                Step::Open(id) => {
                    let Some(node) = self.nodes.get(id) else { continue };
                    match &node.kind {
                        NodeKind::Leaf { name } => {
                            newick.push_str(&quote_label(name));
                            push_length(&mut newick, node.length);
                        }
                        NodeKind::Internal { children, .. } => {
                            newick.push('(');
                            stack.push(Step::Close(id));
                            for (i, &child) in children.iter().enumerate().rev() {
                                stack.push(Step::Open(child));
                                if i > 0 {
                                    stack.push(Step::Comma);
                                }
                            }
                        }
                    }
                }
                Step::Close(id) => {
                    newick.push(')');
                    let node = &self.nodes[id];
                    if let NodeKind::Internal { label: Some(label), .. } = &node.kind {
                        newick.push_str(&quote_label(label));
                    }
                    push_length(&mut newick, node.length);
                }
            }
        }
        newick.push(';');
        newick
    }
}

fn quote_label(label: &str) -> String {
    if label.chars().any(|c| c.is_whitespace() || "()[]':;,".contains(c)) {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}

fn push_length(newick: &mut String, length: Option<f64>) {
    if let Some(length) = length {
        newick.push(':');
        newick.push_str(&length.to_string());
    }
}

/*
==================
Newick parser
==================
*/

struct NewickParser {
    chars: Vec<char>,
    pos: usize,
    nodes: Vec<Node>,
}

impl NewickParser {
    fn new(newick: &str) -> Self {
        Self { chars: newick.chars().collect(), pos: 0, nodes: Vec::new() }
    }
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }
    /// Skips whitespace and bracketed comments
    fn skip(&mut self) -> Result<(), NewickError> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '[' {
                let start = self.pos;
                while self.peek() != Some(']') {
                    if self.peek().is_none() {
                        return Err(NewickError::UnterminatedComment(start));
                    }
                    self.pos += 1;
                }
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(())
    }
    fn label(&mut self) -> Result<Option<String>, NewickError> {
        self.skip()?;
        let mut label = String::new();

        if self.peek() == Some('\'') {
            let start = self.pos;
            self.pos += 1;
            loop {
                match self.peek() {
                    None => return Err(NewickError::UnterminatedQuote(start)),
                    Some('\'') => {
                        self.pos += 1;
                        if self.peek() == Some('\'') {
                            label.push('\'');
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                    Some(c) => {
                        label.push(c);
                        self.pos += 1;
                    }
                }
            }
            return Ok(Some(label));
        }

        while let Some(c) = self.peek() {
            if c.is_whitespace() || "():;,[".contains(c) {
                break;
            }
            label.push(c);
            self.pos += 1;
        }
        Ok(if label.is_empty() { None } else { Some(label) })
    }
    fn length(&mut self) -> Result<Option<f64>, NewickError> {
        self.skip()?;
        if self.peek() != Some(':') {
            return Ok(None);
        }
        self.pos += 1;
        self.skip()?;

        let mut value = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || ".-+eE".contains(c) {
                value.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        value
            .parse::<f64>()
            .map(Some)
            .map_err(|_| NewickError::BranchLength(value))
    }
    fn parse(mut self) -> Result<Tree, NewickError> {
        self.skip()?;
        if self.peek().is_none() {
            return Err(NewickError::Empty);
        }

        // Children collected for each currently open parenthesis
        let mut open: Vec<Vec<NodeId>> = Vec::new();

        let root = 'subtree: loop {
            self.skip()?;
            if self.peek() == Some('(') {
                open.push(Vec::new());
                self.pos += 1;
                continue;
            }

            let start = self.pos;
            let name = match self.label()? {
                Some(name) => name,
                None => match self.peek() {
                    Some(c) if c != ',' && c != ')' && c != ';' && c != ':' => {
                        return Err(NewickError::UnexpectedChar(c, self.pos))
                    }
                    _ => return Err(NewickError::UnnamedLeaf(start)),
                },
            };
            let length = self.length()?;
            self.nodes.push(Node::leaf(&name, None, length));
            let mut current = self.nodes.len() - 1;

            loop {
                self.skip()?;
                match self.peek() {
                    Some(',') => {
                        let siblings = open.last_mut().ok_or(NewickError::UnexpectedChar(',', self.pos))?;
                        siblings.push(current);
                        self.pos += 1;
                        continue 'subtree;
                    }
                    Some(')') => {
                        let mut children = open.pop().ok_or(NewickError::Unbalanced(self.pos))?;
                        children.push(current);
                        self.pos += 1;

                        let label = self.label()?;
                        let length = self.length()?;
                        let id = self.nodes.len();
                        for &child in &children {
                            self.nodes[child].parent = Some(id);
                        }
                        self.nodes.push(Node {
                            kind: NodeKind::Internal { children, label },
                            parent: None,
                            length,
                        });
                        current = id;
                    }
                    Some(';') => {
                        if !open.is_empty() {
                            return Err(NewickError::Unbalanced(self.pos));
                        }
                        self.pos += 1;
                        break 'subtree current;
                    }
                    Some(c) => return Err(NewickError::UnexpectedChar(c, self.pos)),
                    None => {
                        return Err(if open.is_empty() {
                            NewickError::MissingTerminator
                        } else {
                            NewickError::Unbalanced(self.pos)
                        })
                    }
                }
            }
        };

        self.skip()?;
        if self.pos < self.chars.len() {
            return Err(NewickError::TrailingContent(self.pos));
        }

        let mut leaf_index = HashMap::new();
        for (id, node) in self.nodes.iter().enumerate() {
            if let Some(name) = node.name() {
                if leaf_index.insert(name.to_string(), id).is_some() {
                    return Err(NewickError::DuplicateLeaf(name.to_string()));
                }
            }
        }
        Ok(Tree { nodes: self.nodes, root, leaf_index })
    }
}

/*
==================
Rooting
==================
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum RootMethod {
    Midpoint,
    Outgroup,
    None,
}
impl fmt::Display for RootMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RootMethod::Midpoint => write!(f, "midpoint"),
            RootMethod::Outgroup => write!(f, "outgroup"),
            RootMethod::None => write!(f, "none"),
        }
    }
}

/// Rooting that was actually applied after any fallback
#[derive(Debug, Clone, PartialEq)]
pub enum Rooting {
    Midpoint,
    Outgroup(String),
    Unrooted,
}
impl Rooting {
    pub fn method(&self) -> RootMethod {
        match self {
            Rooting::Midpoint => RootMethod::Midpoint,
            Rooting::Outgroup(_) => RootMethod::Outgroup,
            Rooting::Unrooted => RootMethod::None,
        }
    }
}
impl fmt::Display for Rooting {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rooting::Midpoint => write!(f, "Midpoint rooting applied"),
            Rooting::Outgroup(name) => write!(f, "Outgroup rooting with {name}"),
            Rooting::Unrooted => write!(f, "No rooting applied"),
        }
    }
}

enum NewRoot {
    Node(NodeId),
    /// Split the branch above `child` at `distance` from the child
    Branch { child: NodeId, distance: f64 },
}

impl Tree {
    /// Applies the rooting method once, falling back to midpoint rooting
    /// when the outgroup cannot be used and to the unchanged tree when
    /// midpoint rooting fails.
    pub fn rooted(&self, method: RootMethod, outgroup: Option<&str>) -> (Tree, Rooting) {
        match method {
            RootMethod::None => (self.clone(), Rooting::Unrooted),
            RootMethod::Outgroup => {
                let result = outgroup
                    .ok_or(RootingError::OutgroupMissing)
                    .and_then(|name| self.root_with_outgroup(name).map(|tree| (tree, name)));
                match result {
                    Ok((tree, name)) => (tree, Rooting::Outgroup(name.to_string())),
                    Err(err) => {
                        log::warn!("Outgroup rooting failed ({err}), using midpoint rooting instead");
                        self.rooted(RootMethod::Midpoint, None)
                    }
                }
            }
            RootMethod::Midpoint => match self.root_at_midpoint() {
                Ok(tree) => (tree, Rooting::Midpoint),
                Err(err) => {
                    log::warn!("Midpoint rooting failed ({err}), using tree as provided");
                    (self.clone(), Rooting::Unrooted)
                }
            },
        }
    }
    /// Roots on the branch above the outgroup leaf, which keeps its branch length
    pub fn root_with_outgroup(&self, outgroup: &str) -> Result<Tree, RootingError> {
        let leaf = self
            .leaf_id(outgroup)
            .ok_or_else(|| RootingError::OutgroupNotFound(outgroup.to_string()))?;
        let node = self.node(leaf)?;
        if node.parent.is_none() {
            return Err(RootingError::TooFewLeaves);
        }
        self.reroot(NewRoot::Branch { child: leaf, distance: node.length.unwrap_or(0.0) })
    }
    /// Roots at the middle of the longest leaf-to-leaf path
    pub fn root_at_midpoint(&self) -> Result<Tree, RootingError> {
        let leaves: Vec<NodeId> = (0..self.nodes.len()).filter(|&id| self.nodes[id].is_leaf()).collect();
        if leaves.len() < 2 {
            return Err(RootingError::TooFewLeaves);
        }

        let (a, _, _) = self.farthest_leaf(leaves[0])?;
        let (b, diameter, previous) = self.farthest_leaf(a)?;
        if diameter <= 0.0 {
            return Err(RootingError::ZeroLength);
        }

        let half = diameter / 2.0;
        let mut walked = 0.0;
        let mut current = b;
        while let Some(&Some((next, weight))) = previous.get(current) {
            if (walked + weight - half).abs() <= f64::EPSILON * diameter.max(1.0) {
                return self.reroot(self.root_at_node(next));
            }
            if walked + weight > half {
                let offset = half - walked;
                let new_root = if self.nodes[current].parent == Some(next) {
                    NewRoot::Branch { child: current, distance: offset }
                } else {
                    NewRoot::Branch { child: next, distance: weight - offset }
                };
                return self.reroot(new_root);
            }
            walked += weight;
            current = next;
        }
        Err(RootingError::ZeroLength)
    }
    fn root_at_node(&self, id: NodeId) -> NewRoot {
        if self.nodes[id].is_leaf() {
            NewRoot::Branch { child: id, distance: 0.0 }
        } else {
            NewRoot::Node(id)
        }
    }
    /// Neighbours in the unrooted view: children first, then the parent
    fn neighbours(&self, id: NodeId) -> Result<Vec<(NodeId, f64)>, StructureError> {
        let node = self.node(id)?;
        let mut neighbours = Vec::with_capacity(node.children().len() + 1);
        for &child in node.children() {
            neighbours.push((child, self.node(child)?.length.unwrap_or(0.0)));
        }
        if let Some(parent) = node.parent {
            neighbours.push((parent, node.length.unwrap_or(0.0)));
        }
        Ok(neighbours)
    }
    /// Leaf farthest from `start` by path length, with the predecessor of
    /// every visited node on its path back to `start`
    #[allow(clippy::type_complexity)]
    fn farthest_leaf(&self, start: NodeId) -> Result<(NodeId, f64, Vec<Option<(NodeId, f64)>>), StructureError> {
        let mut previous: Vec<Option<(NodeId, f64)>> = vec![None; self.nodes.len()];
        let mut visited = vec![false; self.nodes.len()];
        let mut best = (start, 0.0);
        let mut stack = vec![(start, 0.0)];

        while let Some((id, distance)) = stack.pop() {
            if visited[id] {
                continue;
            }
            visited[id] = true;
            if self.nodes[id].is_leaf() && distance > best.1 {
                best = (id, distance);
            }
            for (next, weight) in self.neighbours(id)?.into_iter().rev() {
                if !visited[next] {
                    previous[next] = Some((id, weight));
                    stack.push((next, distance + weight));
                }
            }
        }
        Ok((best.0, best.1, previous))
    }
    /// Rebuilds the arena around a new root, collapsing internal nodes
    /// that are left with a single child
    fn reroot(&self, new_root: NewRoot) -> Result<Tree, RootingError> {
        struct Work {
            old: NodeId,
            from: Option<NodeId>,
            parent: Option<NodeId>,
            length: Option<f64>,
        }

        let mut nodes: Vec<Node> = Vec::with_capacity(self.nodes.len() + 1);
        let mut stack = Vec::new();

        match new_root {
            NewRoot::Node(id) => stack.push(Work { old: id, from: None, parent: None, length: None }),
            NewRoot::Branch { child, distance } => {
                let parent = self.node(child)?.parent.ok_or(RootingError::TooFewLeaves)?;
                let total = self.node(child)?.length.unwrap_or(0.0);
                nodes.push(Node::internal(Vec::new(), None, None));
                stack.push(Work { old: parent, from: Some(child), parent: Some(0), length: Some(total - distance) });
                stack.push(Work { old: child, from: Some(parent), parent: Some(0), length: Some(distance) });
            }
        }

        while let Some(work) = stack.pop() {
            let old = self.node(work.old)?;
            let onward: Vec<(NodeId, f64)> = self
                .neighbours(work.old)?
                .into_iter()
                .filter(|(id, _)| Some(*id) != work.from)
                .collect();

            let kind = match (&old.kind, onward.len()) {
                (NodeKind::Leaf { name }, _) => NodeKind::Leaf { name: name.clone() },
                (NodeKind::Internal { .. }, 0) => continue,
                (NodeKind::Internal { .. }, 1) if work.parent.is_some() => {
                    let (next, weight) = onward[0];
                    stack.push(Work {
                        old: next,
                        from: Some(work.old),
                        parent: work.parent,
                        length: Some(work.length.unwrap_or(0.0) + weight),
                    });
                    continue;
                }
                (NodeKind::Internal { label, .. }, _) => NodeKind::Internal { children: Vec::new(), label: label.clone() },
            };

            let id = nodes.len();
            nodes.push(Node { kind, parent: work.parent, length: work.length });
            if let Some(parent) = work.parent {
                if let NodeKind::Internal { children, .. } = &mut nodes[parent].kind {
                    children.push(id);
                }
            }
            if !nodes[id].is_leaf() {
                for (next, weight) in onward.into_iter().rev() {
                    stack.push(Work { old: next, from: Some(work.old), parent: Some(id), length: Some(weight) });
                }
            }
        }

        Ok(Tree::from_nodes(nodes, 0))
    }
}

/// Writes the rooted tree as `{gene}_{method}.treefile` into `outdir`
pub fn save_rooted_tree(tree: &Tree, source: &Path, method: RootMethod, outdir: &Path) -> Result<PathBuf, CladekitError> {
    let gene = gene_name(source, &["_verification_"])?;
    create_dir_all(outdir)?;
    let path = outdir.join(format!("{gene}_{method}.treefile"));
    write(&path, format!("{}\n", tree.to_newick()))?;
    Ok(path)
}

#[cfg(test)]
#[cfg(not(tarpaulin_include))]
mod tests {

    use float_eq::assert_float_eq;

    use super::*;

    fn names(tree: &Tree, id: NodeId) -> Vec<String> {
        tree.leaf_names_under(id).unwrap()
    }

    fn root_children(tree: &Tree) -> Vec<Vec<String>> {
        tree.node(tree.root())
            .unwrap()
            .children()
            .iter()
            .map(|&c| names(tree, c))
            .collect()
    }

    /*
    ===============
     Newick parser
    ===============
    */

    #[test]
    fn newick_parse_simple_ok() {
        let tree = Tree::from_newick("((A:0.1,B:0.2)90:0.3,(C:0.4,D:0.5):0.6);").unwrap();
        assert_eq!(tree.leaf_names(), vec!["A", "B", "C", "D"]);
        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.len(), 7);
        assert_eq!(root_children(&tree), vec![vec!["A", "B"], vec!["C", "D"]]);

        let a = tree.node(tree.leaf_id("A").unwrap()).unwrap();
        assert_float_eq!(a.length.unwrap(), 0.1, abs <= 1e-12);

        let ab = tree.node(a.parent.unwrap()).unwrap();
        assert_eq!(ab.kind, NodeKind::Internal { children: vec![0, 1], label: Some("90".to_string()) });
    }

    #[test]
    fn newick_parse_quoted_comments_whitespace_ok() {
        let tree = Tree::from_newick(" ( 'leaf one':1e-3 [&support=1], GCF_000001.1-WP_123.1 : 2 ) ;\n").unwrap();
        assert_eq!(tree.leaf_names(), vec!["leaf one", "GCF_000001.1-WP_123.1"]);
        let leaf = tree.node(tree.leaf_id("leaf one").unwrap()).unwrap();
        assert_float_eq!(leaf.length.unwrap(), 0.001, abs <= 1e-12);
    }

    #[test]
    fn newick_parse_escaped_quote_ok() {
        let tree = Tree::from_newick("('it''s',b);").unwrap();
        assert_eq!(tree.leaf_names(), vec!["it's", "b"]);
    }

    #[test]
    fn newick_parse_single_leaf_ok() {
        let tree = Tree::from_newick("A;").unwrap();
        assert_eq!(tree.leaf_names(), vec!["A"]);
        assert!(tree.node(tree.root()).unwrap().is_leaf());
    }

    #[test]
    fn newick_parse_errors() {
        assert_eq!(Tree::from_newick("   ").unwrap_err(), NewickError::Empty);
        assert_eq!(Tree::from_newick("(A,B)").unwrap_err(), NewickError::MissingTerminator);
        assert!(matches!(Tree::from_newick("((A,B);").unwrap_err(), NewickError::Unbalanced(_)));
        assert!(matches!(Tree::from_newick("(A,B));").unwrap_err(), NewickError::Unbalanced(_)));
        assert!(matches!(Tree::from_newick("(A,B);(C,D);").unwrap_err(), NewickError::TrailingContent(_)));
        assert!(matches!(Tree::from_newick("(A,,B);").unwrap_err(), NewickError::UnnamedLeaf(_)));
        assert!(matches!(Tree::from_newick("('A,B);").unwrap_err(), NewickError::UnterminatedQuote(_)));
        assert!(matches!(Tree::from_newick("(A[x,B);").unwrap_err(), NewickError::UnterminatedComment(_)));
        assert_eq!(Tree::from_newick("(A:x,B);").unwrap_err(), NewickError::BranchLength(String::new()));
        assert_eq!(Tree::from_newick("(A:1.2.3,B);").unwrap_err(), NewickError::BranchLength("1.2.3".to_string()));
        assert_eq!(Tree::from_newick("(A,(B,A));").unwrap_err(), NewickError::DuplicateLeaf("A".to_string()));
    }

    #[test]
    fn newick_write_reparse_keeps_topology() {
        let newick = "((A:0.1,'b c':0.2)95:0.3,(C:0.4,D:0.5):0.6);";
        let tree = Tree::from_newick(newick).unwrap();
        assert_eq!(tree.to_newick(), newick);
    }

    /*
    ===============
       Queries
    ===============
    */

    #[test]
    fn tree_mrca_ok() {
        let tree = Tree::from_newick("((A,B),(C,(D,E)));").unwrap();
        let id = |n: &str| tree.leaf_id(n).unwrap();

        let ab = tree.mrca(&[id("A"), id("B")]).unwrap().unwrap();
        assert_eq!(names(&tree, ab), vec!["A", "B"]);

        let de_c = tree.mrca(&[id("E"), id("C")]).unwrap().unwrap();
        assert_eq!(names(&tree, de_c), vec!["C", "D", "E"]);

        assert_eq!(tree.mrca(&[id("A"), id("E")]).unwrap(), Some(tree.root()));
        assert_eq!(tree.mrca(&[id("D")]).unwrap(), Some(id("D")));
        assert_eq!(tree.mrca(&[]).unwrap(), None);
    }

    #[test]
    fn tree_preorder_detects_dangling_child() {
        let nodes = vec![Node::leaf("a", Some(1), None), Node::internal(vec![0, 7], None, None)];
        let tree = Tree::from_nodes(nodes, 1);
        assert_eq!(tree.preorder(1).unwrap_err(), StructureError::DanglingNode(7));
    }

    #[test]
    fn tree_preorder_detects_broken_parent_link() {
        let nodes = vec![Node::leaf("a", None, None), Node::internal(vec![0], None, None)];
        let tree = Tree::from_nodes(nodes, 1);
        assert_eq!(
            tree.preorder(1).unwrap_err(),
            StructureError::BrokenParentLink { child: 0, parent: 1 }
        );
    }

    #[test]
    fn tree_preorder_detects_cycle() {
        let nodes = vec![
            Node::leaf("a", Some(1), None),
            Node::internal(vec![0, 2], Some(2), None),
            Node::internal(vec![1], Some(1), None),
        ];
        let tree = Tree::from_nodes(nodes, 1);
        assert!(tree.preorder(1).is_err());
    }

    /*
    ===============
       Rooting
    ===============
    */

    #[test]
    fn midpoint_rooting_splits_longest_path() {
        // Longest path A-D has length 1 + 1 + 8 = 10, midpoint on D's branch
        let tree = Tree::from_newick("((A:1,B:1):1,(C:1,D:8):0);").unwrap();
        let rooted = tree.root_at_midpoint().unwrap();

        let children = root_children(&rooted);
        assert_eq!(children.len(), 2);
        assert!(children.contains(&vec!["D".to_string()]));

        let d = rooted.node(rooted.leaf_id("D").unwrap()).unwrap();
        assert_eq!(d.parent, Some(rooted.root()));
        assert_float_eq!(d.length.unwrap(), 5.0, abs <= 1e-9);
        assert_eq!(rooted.leaf_count(), 4);
    }

    #[test]
    fn midpoint_rooting_collapses_old_root() {
        let tree = Tree::from_newick("((A:1,B:1):1,(C:1,D:8):0);").unwrap();
        let rooted = tree.root_at_midpoint().unwrap();

        // No internal node other than the root may have a single child
        for id in rooted.preorder(rooted.root()).unwrap() {
            let node = rooted.node(id).unwrap();
            if !node.is_leaf() && id != rooted.root() {
                assert!(node.children().len() >= 2);
            }
        }
        // Path length from A to D is preserved
        let a = rooted.leaf_id("A").unwrap();
        let mut depth = 0.0;
        let mut current = Some(a);
        while let Some(id) = current {
            depth += rooted.node(id).unwrap().length.unwrap_or(0.0);
            current = rooted.node(id).unwrap().parent;
        }
        assert_float_eq!(depth, 5.0, abs <= 1e-9);
    }

    #[test]
    fn midpoint_rooting_on_existing_node() {
        let tree = Tree::from_newick("(A:2,(B:1,C:1):0,D:2);").unwrap();
        let rooted = tree.root_at_midpoint().unwrap();
        assert_eq!(rooted.leaf_count(), 4);
        let mut leaves = rooted.leaf_names();
        leaves.sort();
        assert_eq!(leaves, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn midpoint_rooting_failures() {
        assert_eq!(Tree::from_newick("A;").unwrap().root_at_midpoint().unwrap_err(), RootingError::TooFewLeaves);
        assert_eq!(Tree::from_newick("((A,B),C);").unwrap().root_at_midpoint().unwrap_err(), RootingError::ZeroLength);
    }

    #[test]
    fn outgroup_rooting_places_outgroup_at_root() {
        let tree = Tree::from_newick("((A:1,B:1):1,(C:1,D:2):1);").unwrap();
        let rooted = tree.root_with_outgroup("C").unwrap();

        assert_eq!(
            root_children(&rooted),
            vec![vec!["C".to_string()], vec!["D".to_string(), "A".to_string(), "B".to_string()]]
        );
        let c = rooted.node(rooted.leaf_id("C").unwrap()).unwrap();
        assert_float_eq!(c.length.unwrap(), 1.0, abs <= 1e-12);
    }

    #[test]
    fn outgroup_rooting_missing_outgroup_falls_back_to_midpoint() {
        let tree = Tree::from_newick("((A:1,B:1):1,(C:1,D:8):0);").unwrap();
        assert_eq!(
            tree.root_with_outgroup("X").unwrap_err(),
            RootingError::OutgroupNotFound("X".to_string())
        );
        let (_, rooting) = tree.rooted(RootMethod::Outgroup, Some("X"));
        assert_eq!(rooting, Rooting::Midpoint);
    }

    #[test]
    fn rooted_falls_back_to_unrooted() {
        let tree = Tree::from_newick("((A,B),C);").unwrap();
        let (rooted, rooting) = tree.rooted(RootMethod::Midpoint, None);
        assert_eq!(rooting, Rooting::Unrooted);
        assert_eq!(rooted.to_newick(), tree.to_newick());

        let (_, rooting) = tree.rooted(RootMethod::None, None);
        assert_eq!(rooting.to_string(), "No rooting applied");
    }

    #[test]
    fn save_rooted_tree_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let tree = Tree::from_newick("(A:1,B:1);").unwrap();
        let path = save_rooted_tree(
            &tree,
            Path::new("recA_verification_iqtree.treefile"),
            RootMethod::Midpoint,
            dir.path(),
        )
        .unwrap();
        assert_eq!(path.file_name().unwrap(), "recA_midpoint.treefile");
        let written = std::fs::read_to_string(path).unwrap();
        assert_eq!(written.trim(), "(A:1,B:1);");
    }
}
