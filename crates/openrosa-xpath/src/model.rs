use core::cmp::Ordering;

use compact_str::CompactString;

use crate::runtime::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<CompactString>,
    pub local: CompactString,
}

impl QName {
    pub fn local(local: &str) -> Self {
        Self { prefix: None, local: CompactString::from(local) }
    }

    pub fn prefixed(prefix: &str, local: &str) -> Self {
        Self { prefix: Some(CompactString::from(prefix)), local: CompactString::from(local) }
    }

    /// `prefix:local` or `local`.
    pub fn as_written(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.to_string(),
        }
    }
}

/// Read access to a hierarchical, ordered document tree. The evaluator is
/// generic over this trait; `tree::TreeNode` is the bundled implementation.
pub trait DataNode: Clone + Eq + core::fmt::Debug + Send + Sync {
    fn kind(&self) -> NodeKind;
    fn name(&self) -> Option<QName>;
    fn string_value(&self) -> String;

    fn parent(&self) -> Option<Self>;
    fn children(&self) -> Vec<Self>;
    fn attributes(&self) -> Vec<Self>;

    /// The root of the tree this node belongs to.
    fn root(&self) -> Self {
        let mut cur = self.clone();
        while let Some(p) = cur.parent() {
            cur = p;
        }
        cur
    }

    /// Default document order comparison uses ancestry and sibling order.
    /// Nodes from different trees cannot be ordered and yield an error.
    fn compare_document_order(&self, other: &Self) -> Result<Ordering, Error> {
        try_compare_by_ancestry(self, other)
    }
}

/// Fallback comparator for document order based on ancestry and stable
/// sibling ordering.
///
/// Properties:
/// - If one node is an ancestor of the other, the ancestor precedes the
///   descendant.
/// - Among siblings, attributes come before child nodes; within each group
///   the order provided by the tree is preserved.
/// - Nodes from different roots have no global order; comparing them is an
///   evaluation error.
pub fn try_compare_by_ancestry<N: DataNode>(a: &N, b: &N) -> Result<Ordering, Error> {
    if a == b {
        return Ok(Ordering::Equal);
    }
    fn path_to_root<N: DataNode>(mut n: N) -> Vec<N> {
        let mut p = vec![n.clone()];
        while let Some(parent) = n.parent() {
            p.push(parent.clone());
            n = parent;
        }
        p.reverse();
        p
    }
    let pa = path_to_root(a.clone());
    let pb = path_to_root(b.clone());
    let mut i = 0usize;
    let len = core::cmp::min(pa.len(), pb.len());
    while i < len && pa[i] == pb[i] {
        i += 1;
    }
    if i == len {
        // One path is a prefix of the other: the shorter one is the ancestor.
        return Ok(if pa.len() < pb.len() { Ordering::Less } else { Ordering::Greater });
    }
    if i == 0 {
        return Err(Error::Evaluation(
            "document order is undefined for nodes from different trees".to_string(),
        ));
    }
    let parent = &pa[i - 1];
    let mut sibs: Vec<N> = Vec::new();
    sibs.extend(parent.attributes());
    sibs.extend(parent.children());
    let na = &pa[i];
    let nb = &pb[i];
    let posa = sibs.iter().position(|n| n == na);
    let posb = sibs.iter().position(|n| n == nb);
    Ok(match (posa, posb) {
        (Some(aidx), Some(bidx)) => aidx.cmp(&bidx),
        _ => Ordering::Equal,
    })
}

/// Sort into document order and drop duplicates. Duplicate removal relies on
/// equal nodes being adjacent after the sort.
pub fn sort_document_order<N: DataNode>(nodes: &mut Vec<N>) -> Result<(), Error> {
    let mut failure: Option<Error> = None;
    nodes.sort_by(|a, b| match a.compare_document_order(b) {
        Ok(o) => o,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    nodes.dedup_by(|a, b| a == b);
    Ok(())
}
