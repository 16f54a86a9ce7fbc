//! Structural diff between two renders.

use std::collections::HashMap;

use crate::vtree::node::{Child, Key, PropValue, TextNode, TreeNode};

/// Change set turning one child into another.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    Create {
        node: Child,
    },
    Remove {
        node: Child,
    },
    Replace {
        old: Child,
        new: Child,
    },
    Text {
        old: TextNode,
        new: TextNode,
    },
    /// Same tag: prop changes plus child changes, never both empty.
    Update {
        props: Vec<PropPatch>,
        children: Vec<ChildPatch>,
        old: TreeNode,
        new: TreeNode,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropPatch {
    Set { name: String, value: PropValue },
    Remove { name: String },
}

/// Child-level edit. `from` indexes the old children, `to` the new ones.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildPatch {
    Create { to: usize, node: Child },
    Remove { from: usize, node: Child },
    /// Matched pair whose content changed.
    Update { from: usize, to: usize, patch: Patch },
    /// Reused child whose position relative to its siblings changed.
    Move { from: usize, to: usize },
}

/// Diff two optional children; `None` means nothing to do.
pub fn diff(old: Option<&Child>, new: Option<&Child>) -> Option<Patch> {
    match (old, new) {
        (None, None) => None,
        (None, Some(new)) => Some(Patch::Create { node: new.clone() }),
        (Some(old), None) => Some(Patch::Remove { node: old.clone() }),
        (Some(Child::Text(old)), Some(Child::Text(new))) => {
            (old.text != new.text).then(|| Patch::Text {
                old: old.clone(),
                new: new.clone(),
            })
        }
        (Some(Child::Element(old)), Some(Child::Element(new)))
            if old.tag == new.tag && old.key == new.key =>
        {
            diff_element(old, new)
        }
        (Some(old), Some(new)) => Some(Patch::Replace {
            old: old.clone(),
            new: new.clone(),
        }),
    }
}

fn diff_element(old: &TreeNode, new: &TreeNode) -> Option<Patch> {
    let props = diff_props(old, new);
    let children = diff_children(&old.children, &new.children);
    if props.is_empty() && children.is_empty() {
        return None;
    }
    Some(Patch::Update {
        props,
        children,
        old: old.clone(),
        new: new.clone(),
    })
}

fn diff_props(old: &TreeNode, new: &TreeNode) -> Vec<PropPatch> {
    let mut patches: Vec<PropPatch> = new
        .props
        .iter()
        .filter(|(name, value)| old.props.get(*name) != Some(*value))
        .map(|(name, value)| PropPatch::Set {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    patches.extend(
        old.props
            .keys()
            .filter(|name| !new.props.contains_key(*name))
            .map(|name| PropPatch::Remove { name: name.clone() }),
    );
    patches
}

/// Pair each new child with the old child it reuses, if any.
///
/// Keyed children match by key (first occurrence wins on duplicates);
/// unkeyed children match positionally among the unkeyed ones.
pub fn match_children(old: &[Child], new: &[Child]) -> Vec<Option<usize>> {
    let mut keyed: HashMap<&Key, usize> = HashMap::new();
    let mut unkeyed = Vec::new();
    for (index, child) in old.iter().enumerate() {
        match child.key() {
            Some(key) => {
                if keyed.contains_key(key) {
                    tracing::warn!(key = %key, "Duplicate key among old siblings, keeping the first");
                } else {
                    keyed.insert(key, index);
                }
            }
            None => unkeyed.push(index),
        }
    }

    let mut unkeyed = unkeyed.into_iter();
    new.iter()
        .map(|child| match child.key() {
            Some(key) => {
                let matched = keyed.remove(key);
                if matched.is_none() && old.iter().any(|c| c.key() == Some(key)) {
                    tracing::warn!(key = %key, "Duplicate key among new siblings, creating a fresh node");
                }
                matched
            }
            None => unkeyed.next(),
        })
        .collect()
}

fn diff_children(old: &[Child], new: &[Child]) -> Vec<ChildPatch> {
    let matches = match_children(old, new);
    let mut reused = vec![false; old.len()];
    let mut patches = Vec::new();

    for &from in matches.iter().flatten() {
        reused[from] = true;
    }
    for (from, child) in old.iter().enumerate() {
        if !reused[from] {
            patches.push(ChildPatch::Remove {
                from,
                node: child.clone(),
            });
        }
    }

    // Old indices of reused children in new order; the longest increasing
    // run stays put and everything else moves.
    let sequence: Vec<usize> = matches.iter().flatten().copied().collect();
    let stable = stable_positions(&sequence);

    let mut next_reused = 0;
    for (to, matched) in matches.iter().enumerate() {
        match matched {
            None => patches.push(ChildPatch::Create {
                to,
                node: new[to].clone(),
            }),
            Some(from) => {
                let from = *from;
                if let Some(patch) = diff(Some(&old[from]), Some(&new[to])) {
                    patches.push(ChildPatch::Update { from, to, patch });
                }
                if !stable[next_reused] {
                    patches.push(ChildPatch::Move { from, to });
                }
                next_reused += 1;
            }
        }
    }
    patches
}

/// Mark the members of one longest strictly increasing subsequence.
pub fn stable_positions(sequence: &[usize]) -> Vec<bool> {
    // tails[k]: index in `sequence` of the smallest tail of an increasing
    // run of length k + 1.
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; sequence.len()];

    for (i, &value) in sequence.iter().enumerate() {
        let pos = tails.partition_point(|&t| sequence[t] < value);
        if pos > 0 {
            prev[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut stable = vec![false; sequence.len()];
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        stable[i] = true;
        cursor = prev[i];
    }
    stable
}
