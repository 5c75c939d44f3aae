use std::collections::HashSet;
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use crate::taxonomy::TaxonomicGroups;
use crate::tree::{NodeId, NodeKind, StructureError, Tree};

/// Identifiers of one group forming a pure clade (or a single isolated leaf)
pub type Cluster = Vec<String>;

/*
========================================
   Custom error definitions
========================================
*/

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PartitionFault {
    /// Represents a structural failure of a tree query
    #[error(transparent)]
    Structure(#[from] StructureError),
    /// Indicates a root node that is not an internal node
    #[error("root node {0} is not an internal node")]
    LeafRoot(NodeId),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NamingError {
    /// Indicates a cluster name that was already assigned
    #[error("duplicate cluster name: {0}")]
    DuplicateName(String),
}

/*
========================================
   Monophyletic partition
========================================
*/

struct Frame {
    node: NodeId,
    next: usize,
    pure: Vec<NodeId>,
}
impl Frame {
    fn new(node: NodeId) -> Self {
        Self { node, next: 0, pure: Vec::new() }
    }
}

/// Partition a group into maximal pure clades and isolated leaves
///
/// Clusters list their members in tree order. Pure clades are reported
/// after the clusters found below the mixed siblings of the same node.
/// Members that are no leaf of the tree, or that no pure clade captured,
/// follow as singletons.
pub fn try_partition(tree: &Tree, members: &IndexSet<String>) -> Result<Vec<Cluster>, PartitionFault> {
    match members.len() {
        0 => return Ok(Vec::new()),
        1 => return Ok(vec![members.iter().cloned().collect()]),
        _ => {}
    }

    let root = tree.root();
    if tree.node(root)?.is_leaf() {
        return Err(PartitionFault::LeafRoot(root));
    }

    // Leaf totals and member counts per node, children before parents
    let order = tree.preorder(root)?;
    let mut total = vec![0usize; tree.len()];
    let mut inside = vec![0usize; tree.len()];
    for &id in order.iter().rev() {
        match &tree.node(id)?.kind {
            NodeKind::Leaf { name } => {
                total[id] = 1;
                inside[id] = usize::from(members.contains(name));
            }
            NodeKind::Internal { children, .. } => {
                for &child in children {
                    total[id] += total[child];
                    inside[id] += inside[child];
                }
            }
        }
    }

    let placed: Vec<NodeId> = members.iter().filter_map(|m| tree.leaf_id(m)).collect();
    let absent = members.iter().filter(|m| tree.leaf_id(m).is_none()).map(|m| vec![m.clone()]);

    if let Some(ancestor) = tree.mrca(&placed)? {
        if total[ancestor] == inside[ancestor] {
            let mut clusters = vec![tree.leaf_names_under(ancestor)?];
            clusters.extend(absent);
            return Ok(clusters);
        }
    }

    let mut clusters = Vec::new();
    let mut captured: HashSet<String> = HashSet::new();
    let mut stack = vec![Frame::new(root)];

    while let Some(frame) = stack.last_mut() {
        let children = tree.node(frame.node)?.children();
        match children.get(frame.next) {
            Some(&child) => {
                frame.next += 1;
                if inside[child] == 0 {
                    continue;
                }
                if inside[child] == total[child] {
                    frame.pure.push(child);
                } else {
                    stack.push(Frame::new(child));
                }
            }
            None => {
                if let Some(done) = stack.pop() {
                    for clade in done.pure {
                        let names = tree.leaf_names_under(clade)?;
                        captured.extend(names.iter().cloned());
                        clusters.push(names);
                    }
                }
            }
        }
    }

    for name in tree.leaf_names() {
        if members.contains(name) && !captured.contains(name) {
            clusters.push(vec![name.to_string()]);
        }
    }
    clusters.extend(absent);

    Ok(clusters)
}

/// Partition a group, treating every member as isolated if the tree is malformed
pub fn partition(tree: &Tree, members: &IndexSet<String>) -> Vec<Cluster> {
    try_partition(tree, members).unwrap_or_else(|fault| {
        log::warn!(
            "Cluster detection failed ({fault}), treating {} sequences as isolated",
            members.len()
        );
        members.iter().map(|m| vec![m.clone()]).collect()
    })
}

/*
========================================
   Cluster naming
========================================
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterKind {
    /// The group is a single cluster
    Whole,
    Clade,
    Isolated,
}

/// Structured identity of a named cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub group: String,
    pub kind: ClusterKind,
    pub index: Option<usize>,
}
impl ClusterKey {
    pub fn whole(group: &str) -> Self {
        Self { group: group.to_string(), kind: ClusterKind::Whole, index: None }
    }
    /// Numbered key of a cluster in a group with several clusters
    pub fn numbered(group: &str, index: usize, size: usize) -> Self {
        let kind = if size > 1 { ClusterKind::Clade } else { ClusterKind::Isolated };
        Self { group: group.to_string(), kind, index: Some(index) }
    }
}
impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.kind, self.index) {
            (ClusterKind::Clade, Some(i)) => write!(f, "{}_clade{i}", self.group),
            (ClusterKind::Isolated, Some(i)) => write!(f, "{}_isolated{i}", self.group),
            _ => write!(f, "{}", self.group),
        }
    }
}

/// Named clusters in naming order, with unique rendered names
#[derive(Debug, Clone, Default)]
pub struct NamedClusterMap {
    clusters: IndexMap<ClusterKey, Cluster>,
    names: HashSet<String>,
}
impl NamedClusterMap {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, key: ClusterKey, cluster: Cluster) -> Result<(), NamingError> {
        let name = key.to_string();
        if !self.names.insert(name.clone()) {
            return Err(NamingError::DuplicateName(name));
        }
        self.clusters.insert(key, cluster);
        Ok(())
    }
    pub fn iter(&self) -> impl Iterator<Item = (&ClusterKey, &Cluster)> {
        self.clusters.iter()
    }
    pub fn names(&self) -> Vec<String> {
        self.clusters.keys().map(|k| k.to_string()).collect()
    }
    pub fn len(&self) -> usize {
        self.clusters.len()
    }
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
    pub fn sequence_count(&self) -> usize {
        self.clusters.values().map(|c| c.len()).sum()
    }
}

/// Name the clusters of one group: the group label for a single cluster,
/// otherwise one shared 1-based counter over clades and isolated leaves
pub fn name_clusters(group: &str, clusters: Vec<Cluster>, named: &mut NamedClusterMap) -> Result<(), NamingError> {
    if clusters.len() == 1 {
        let cluster = clusters.into_iter().flatten().collect();
        return named.insert(ClusterKey::whole(group), cluster);
    }
    for (i, cluster) in clusters.into_iter().enumerate() {
        named.insert(ClusterKey::numbered(group, i + 1, cluster.len()), cluster)?;
    }
    Ok(())
}

/// Partition and name every taxonomic group on the tree
pub fn partition_groups(tree: &Tree, groups: &TaxonomicGroups) -> Result<NamedClusterMap, NamingError> {
    let mut named = NamedClusterMap::new();
    for (group, members) in groups {
        log::debug!("Processing {} with {} sequences", group, members.len());
        let clusters = partition(tree, members);
        log::debug!(
            "Found {} clusters with sizes: {:?}",
            clusters.len(),
            clusters.iter().map(|c| c.len()).collect::<Vec<_>>()
        );
        name_clusters(group, clusters, &mut named)?;
    }
    Ok(named)
}
