//! Applying patches to a live structure.

use std::collections::{HashMap, HashSet};

use crate::vtree::diff::{ChildPatch, Patch, PropPatch};
use crate::vtree::node::{Child, Handle, PropValue, TextNode, TreeNode};
use crate::vtree::ReconcileError;

/// Mutable structure a virtual tree is rendered into.
pub trait LiveTree {
    fn create_element(&mut self, tag: &str) -> Handle;
    fn create_text(&mut self, text: &str) -> Handle;
    fn set_text(&mut self, node: Handle, text: &str) -> Result<(), ReconcileError>;
    fn set_prop(&mut self, node: Handle, name: &str, value: &PropValue) -> Result<(), ReconcileError>;
    fn remove_prop(&mut self, node: Handle, name: &str) -> Result<(), ReconcileError>;
    /// Insert `child` under `parent` before `anchor` (append when `None`).
    /// A child that is already attached somewhere is moved.
    fn insert_before(
        &mut self,
        parent: Handle,
        child: Handle,
        anchor: Option<Handle>,
    ) -> Result<(), ReconcileError>;
    /// Detach `child` from `parent` and discard its subtree.
    fn remove_child(&mut self, parent: Handle, child: Handle) -> Result<(), ReconcileError>;
}

/// Apply `patch` below `parent` and return the resulting tree with every
/// node's handle filled in (`None` after a removal).
pub fn apply_patch<L: LiveTree + ?Sized>(
    live: &mut L,
    parent: Handle,
    patch: &Patch,
) -> Result<Option<Child>, ReconcileError> {
    match patch {
        Patch::Create { node } => {
            let created = materialize(live, node)?;
            live.insert_before(parent, live_handle(&created)?, None)?;
            Ok(Some(created))
        }
        Patch::Remove { node } => {
            live.remove_child(parent, live_handle(node)?)?;
            Ok(None)
        }
        Patch::Replace { old, new } => {
            let old_handle = live_handle(old)?;
            let created = materialize(live, new)?;
            live.insert_before(parent, live_handle(&created)?, Some(old_handle))?;
            live.remove_child(parent, old_handle)?;
            Ok(Some(created))
        }
        Patch::Text { old, new } => {
            let handle = old.handle.ok_or_else(|| unmaterialized("#text"))?;
            live.set_text(handle, &new.text)?;
            Ok(Some(Child::Text(TextNode {
                text: new.text.clone(),
                handle: Some(handle),
            })))
        }
        Patch::Update {
            props,
            children,
            old,
            new,
        } => {
            let handle = old.handle.ok_or_else(|| unmaterialized(&old.tag))?;
            for prop in props {
                match prop {
                    PropPatch::Set { name, value } => live.set_prop(handle, name, value)?,
                    PropPatch::Remove { name } => live.remove_prop(handle, name)?,
                }
            }
            let children = apply_children(live, handle, old, new, children)?;
            Ok(Some(Child::Element(TreeNode {
                tag: new.tag.clone(),
                props: new.props.clone(),
                children,
                key: new.key.clone(),
                handle: Some(handle),
            })))
        }
    }
}

/// Build `node` and its subtree in `live` without attaching the top node.
pub fn materialize<L: LiveTree + ?Sized>(live: &mut L, node: &Child) -> Result<Child, ReconcileError> {
    match node {
        Child::Text(text) => {
            let handle = live.create_text(&text.text);
            Ok(Child::Text(TextNode {
                text: text.text.clone(),
                handle: Some(handle),
            }))
        }
        Child::Element(element) => {
            let handle = live.create_element(&element.tag);
            for (name, value) in &element.props {
                live.set_prop(handle, name, value)?;
            }
            let mut children = Vec::with_capacity(element.children.len());
            for child in &element.children {
                let built = materialize(live, child)?;
                live.insert_before(handle, live_handle(&built)?, None)?;
                children.push(built);
            }
            Ok(Child::Element(TreeNode {
                tag: element.tag.clone(),
                props: element.props.clone(),
                children,
                key: element.key.clone(),
                handle: Some(handle),
            }))
        }
    }
}

fn apply_children<L: LiveTree + ?Sized>(
    live: &mut L,
    parent: Handle,
    old: &TreeNode,
    new: &TreeNode,
    patches: &[ChildPatch],
) -> Result<Vec<Child>, ReconcileError> {
    let mut removed = HashSet::new();
    let mut created = HashSet::new();
    let mut moved: HashMap<usize, usize> = HashMap::new();
    let mut updates: HashMap<usize, &Patch> = HashMap::new();

    for patch in patches {
        match patch {
            ChildPatch::Remove { from, node } => {
                live.remove_child(parent, live_handle(node)?)?;
                removed.insert(*from);
            }
            ChildPatch::Create { to, .. } => {
                created.insert(*to);
            }
            ChildPatch::Move { from, to } => {
                moved.insert(*to, *from);
            }
            ChildPatch::Update { to, patch, .. } => {
                updates.insert(*to, patch);
            }
        }
    }

    // Children that neither moved nor were created keep their relative
    // order, so the two stable runs pair up one to one.
    let moved_sources: HashSet<usize> = moved.values().copied().collect();
    let stable_old = (0..old.children.len())
        .filter(|from| !removed.contains(from) && !moved_sources.contains(from));
    let stable_new =
        (0..new.children.len()).filter(|to| !created.contains(to) && !moved.contains_key(to));
    let mut sources: HashMap<usize, usize> = stable_new.zip(stable_old).collect();
    sources.extend(moved.iter().map(|(to, from)| (*to, *from)));

    let mut result = Vec::with_capacity(new.children.len());
    for (to, child) in new.children.iter().enumerate() {
        let built = if created.contains(&to) {
            materialize(live, child)?
        } else {
            let from = sources
                .get(&to)
                .copied()
                .ok_or(ReconcileError::MissingChild { parent, index: to })?;
            let previous = old
                .children
                .get(from)
                .ok_or(ReconcileError::MissingChild { parent, index: from })?;
            match updates.get(&to) {
                Some(patch) => apply_patch(live, parent, patch)?
                    .ok_or(ReconcileError::MissingChild { parent, index: to })?,
                None => previous.clone(),
            }
        };
        result.push(built);
    }

    // Walk backwards so every placement can anchor on its right sibling.
    let mut anchor = None;
    for (to, child) in result.iter().enumerate().rev() {
        let handle = live_handle(child)?;
        if created.contains(&to) || moved.contains_key(&to) {
            live.insert_before(parent, handle, anchor)?;
        }
        anchor = Some(handle);
    }

    Ok(result)
}

fn live_handle(child: &Child) -> Result<Handle, ReconcileError> {
    child.handle().ok_or_else(|| unmaterialized(child.label()))
}

fn unmaterialized(label: &str) -> ReconcileError {
    ReconcileError::Unmaterialized {
        label: label.to_string(),
    }
}
