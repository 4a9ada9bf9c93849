//! Debug utilities for cache tree troubleshooting.

use std::fmt;

use super::Tree;
use crate::arena::NodeRef;
use crate::{ObjectId, ID_MAX, INVALID_OWNER};

/// Accumulator for a full integrity walk.
struct Walk {
    leaf_depth: Option<usize>,
    entries: usize,
    nodes: usize,
    issues: Vec<String>,
}

impl Tree {
    /// Verify tree integrity - returns list of issues found.
    pub(crate) fn verify_integrity(&self) -> Vec<String> {
        let mut walk = Walk {
            leaf_depth: None,
            entries: 0,
            nodes: 0,
            issues: Vec::new(),
        };

        let root = self.root();
        if root.is_null() {
            walk.issues.push("tree has no root".to_owned());
            return walk.issues;
        }
        if !self.node(root).parent.is_null() {
            walk.issues.push(format!("root {:?} has a parent link", root));
        }

        self.verify_node(root, 0, None, None, &mut walk);

        if walk.entries != self.count {
            walk.issues.push(format!(
                "walk found {} entries but tree counts {}",
                walk.entries, self.count
            ));
        }
        if walk.nodes != self.live_nodes() {
            walk.issues.push(format!(
                "walk reached {} nodes but arena holds {}",
                walk.nodes,
                self.live_nodes()
            ));
        }

        let rightmost = self.rightmost_leaf(root);
        match self.node(rightmost).last() {
            Some(e) if e.boundary == ID_MAX && e.owner == INVALID_OWNER => {}
            other => walk.issues.push(format!("sentinel missing, rightmost entry is {:?}", other)),
        }

        walk.issues
    }

    fn verify_node(
        &self,
        node: NodeRef,
        depth: usize,
        lower: Option<ObjectId>,
        upper: Option<ObjectId>,
        walk: &mut Walk,
    ) {
        let n = self.node(node);
        let is_root = node == self.root();
        walk.nodes += 1;
        walk.entries += n.len();

        for pair in n.entries.windows(2) {
            if pair[0].boundary >= pair[1].boundary {
                walk.issues.push(format!(
                    "{:?} entries out of order: {} then {}",
                    node, pair[0].boundary, pair[1].boundary
                ));
            }
        }
        if let (Some(lo), Some(first)) = (lower, n.first()) {
            if first.boundary <= lo {
                walk.issues.push(format!("{:?} first entry {} not above separator {}", node, first.boundary, lo));
            }
        }
        if let (Some(hi), Some(last)) = (upper, n.last()) {
            if last.boundary >= hi {
                walk.issues.push(format!("{:?} last entry {} not below separator {}", node, last.boundary, hi));
            }
        }

        if n.len() > self.max_entries {
            walk.issues.push(format!("{:?} has {} entries (max {})", node, n.len(), self.max_entries));
        }
        if is_root {
            if n.len() == 0 {
                walk.issues.push("root has no entries".to_owned());
            }
        } else if n.len() < self.min_entries {
            walk.issues.push(format!("{:?} has {} entries (min {})", node, n.len(), self.min_entries));
        }

        if n.is_leaf() {
            match walk.leaf_depth {
                None => walk.leaf_depth = Some(depth),
                Some(d) if d != depth => {
                    walk.issues.push(format!("leaf {:?} at depth {} but others at {}", node, depth, d));
                }
                Some(_) => {}
            }
            return;
        }

        if n.children.len() != n.len() + 1 {
            walk.issues.push(format!(
                "{:?} has {} entries but {} children",
                node,
                n.len(),
                n.children.len()
            ));
            return;
        }

        for (i, &child) in n.children.iter().enumerate() {
            if self.node(child).parent != node {
                walk.issues.push(format!(
                    "child {:?} of {:?} links to parent {:?}",
                    child,
                    node,
                    self.node(child).parent
                ));
            }
            let lo = if i == 0 { lower } else { Some(n.entries[i - 1].boundary) };
            let hi = if i < n.len() { Some(n.entries[i].boundary) } else { upper };
            self.verify_node(child, depth + 1, lo, hi, walk);
        }
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, node: NodeRef, prefix: &str, is_tail: bool) -> fmt::Result {
        let n = self.node(node);
        write!(f, "{}{}[{}, {}] ", prefix, if is_tail { "└── " } else { "├── " }, n.len(), n.children.len())?;
        for (i, e) in n.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "({:#x} -> {:#06x})", e.boundary, e.owner)?;
        }
        f.write_str("\n")?;

        let child_prefix = format!("{}{}", prefix, if is_tail { "    " } else { "│   " });
        for (i, &child) in n.children.iter().enumerate() {
            self.fmt_node(f, child, &child_prefix, i + 1 == n.children.len())?;
        }
        Ok(())
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Size: {}", self.size())?;
        self.fmt_node(f, self.root(), "", true)
    }
}
