use std::collections::{BTreeMap, HashMap};

use crate::vtree::node::{Handle, Handler, PropValue};
use crate::vtree::patch::LiveTree;
use crate::vtree::ReconcileError;

/// Counters of the structural operations a [`MemoryTree`] has performed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpStats {
    pub created: usize,
    pub inserted: usize,
    pub moved: usize,
    pub removed: usize,
    pub props_set: usize,
    pub props_removed: usize,
    pub texts_set: usize,
}

#[derive(Debug)]
enum LiveKind {
    Element {
        tag: String,
        props: BTreeMap<String, PropValue>,
        children: Vec<Handle>,
    },
    Text(String),
}

#[derive(Debug)]
struct LiveNode {
    kind: LiveKind,
    parent: Option<Handle>,
}

/// Headless [`LiveTree`]: nodes live in a map, markup is rendered on demand.
#[derive(Debug)]
pub struct MemoryTree {
    nodes: HashMap<Handle, LiveNode>,
    next: u64,
    root: Handle,
    stats: OpStats,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    /// Empty tree with a detached `root` container element.
    pub fn new() -> Self {
        let root = Handle(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            LiveNode {
                kind: LiveKind::Element {
                    tag: "root".to_string(),
                    props: BTreeMap::new(),
                    children: Vec::new(),
                },
                parent: None,
            },
        );
        Self {
            nodes,
            next: 1,
            root,
            stats: OpStats::default(),
        }
    }

    pub fn root(&self) -> Handle {
        self.root
    }

    pub fn stats(&self) -> OpStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = OpStats::default();
    }

    /// Live node count, the root container included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn contains(&self, node: Handle) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn children_of(&self, node: Handle) -> Vec<Handle> {
        match self.nodes.get(&node).map(|n| &n.kind) {
            Some(LiveKind::Element { children, .. }) => children.clone(),
            _ => Vec::new(),
        }
    }

    pub fn parent_of(&self, node: Handle) -> Option<Handle> {
        self.nodes.get(&node).and_then(|n| n.parent)
    }

    pub fn tag_of(&self, node: Handle) -> Option<&str> {
        match self.nodes.get(&node).map(|n| &n.kind) {
            Some(LiveKind::Element { tag, .. }) => Some(tag),
            _ => None,
        }
    }

    pub fn text_of(&self, node: Handle) -> Option<&str> {
        match self.nodes.get(&node).map(|n| &n.kind) {
            Some(LiveKind::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn prop_of(&self, node: Handle, name: &str) -> Option<&PropValue> {
        match self.nodes.get(&node).map(|n| &n.kind) {
            Some(LiveKind::Element { props, .. }) => props.get(name),
            _ => None,
        }
    }

    /// The `on<event>` handler attached to `node`.
    pub fn handler(&self, node: Handle, event: &str) -> Option<Handler> {
        match self.prop_of(node, &format!("on{event}")) {
            Some(PropValue::Handler(handler)) => Some(handler.clone()),
            _ => None,
        }
    }

    /// Invoke the `on<event>` handler of `node`. Returns whether one ran.
    pub fn fire(&self, node: Handle, event: &str) -> bool {
        match self.handler(node, event) {
            Some(handler) => {
                handler.call();
                true
            }
            None => false,
        }
    }

    /// First element below `from` (inclusive, depth first) with `tag`.
    pub fn find_tag(&self, from: Handle, tag: &str) -> Option<Handle> {
        if self.tag_of(from) == Some(tag) {
            return Some(from);
        }
        self.children_of(from)
            .into_iter()
            .find_map(|child| self.find_tag(child, tag))
    }

    /// HTML-like rendering of `node` and its subtree. Handlers are omitted.
    pub fn markup(&self, node: Handle) -> String {
        let mut out = String::new();
        self.write_markup(node, &mut out);
        out
    }

    /// Markup of everything attached under the root container.
    pub fn root_markup(&self) -> String {
        self.children_of(self.root)
            .into_iter()
            .map(|child| self.markup(child))
            .collect()
    }

    fn write_markup(&self, node: Handle, out: &mut String) {
        let Some(live) = self.nodes.get(&node) else {
            return;
        };
        match &live.kind {
            LiveKind::Text(text) => out.push_str(&escape(text)),
            LiveKind::Element {
                tag,
                props,
                children,
            } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in props {
                    if let Some(attr) = value.as_attr() {
                        out.push_str(&format!(" {name}=\"{}\"", escape(&attr)));
                    }
                }
                out.push('>');
                for child in children {
                    self.write_markup(*child, out);
                }
                out.push_str(&format!("</{tag}>"));
            }
        }
    }

    fn alloc(&mut self, kind: LiveKind) -> Handle {
        let handle = Handle(self.next);
        self.next += 1;
        self.nodes.insert(handle, LiveNode { kind, parent: None });
        self.stats.created += 1;
        handle
    }

    fn children_mut(&mut self, node: Handle) -> Result<&mut Vec<Handle>, ReconcileError> {
        match self.nodes.get_mut(&node).map(|n| &mut n.kind) {
            Some(LiveKind::Element { children, .. }) => Ok(children),
            Some(LiveKind::Text(_)) => Err(ReconcileError::NotAnElement { handle: node }),
            None => Err(ReconcileError::DanglingHandle { handle: node }),
        }
    }

    fn props_mut(&mut self, node: Handle) -> Result<&mut BTreeMap<String, PropValue>, ReconcileError> {
        match self.nodes.get_mut(&node).map(|n| &mut n.kind) {
            Some(LiveKind::Element { props, .. }) => Ok(props),
            Some(LiveKind::Text(_)) => Err(ReconcileError::NotAnElement { handle: node }),
            None => Err(ReconcileError::DanglingHandle { handle: node }),
        }
    }

    fn detach(&mut self, child: Handle) -> Result<bool, ReconcileError> {
        let parent = self
            .nodes
            .get(&child)
            .ok_or(ReconcileError::DanglingHandle { handle: child })?
            .parent;
        let Some(parent) = parent else {
            return Ok(false);
        };
        self.children_mut(parent)?.retain(|c| *c != child);
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = None;
        }
        Ok(true)
    }

    fn drop_subtree(&mut self, node: Handle) {
        if let Some(live) = self.nodes.remove(&node) {
            if let LiveKind::Element { children, .. } = live.kind {
                for child in children {
                    self.drop_subtree(child);
                }
            }
        }
    }
}

impl LiveTree for MemoryTree {
    fn create_element(&mut self, tag: &str) -> Handle {
        self.alloc(LiveKind::Element {
            tag: tag.to_string(),
            props: BTreeMap::new(),
            children: Vec::new(),
        })
    }

    fn create_text(&mut self, text: &str) -> Handle {
        self.alloc(LiveKind::Text(text.to_string()))
    }

    fn set_text(&mut self, node: Handle, text: &str) -> Result<(), ReconcileError> {
        match self.nodes.get_mut(&node).map(|n| &mut n.kind) {
            Some(LiveKind::Text(current)) => {
                *current = text.to_string();
                self.stats.texts_set += 1;
                Ok(())
            }
            Some(LiveKind::Element { .. }) => Err(ReconcileError::NotText { handle: node }),
            None => Err(ReconcileError::DanglingHandle { handle: node }),
        }
    }

    fn set_prop(&mut self, node: Handle, name: &str, value: &PropValue) -> Result<(), ReconcileError> {
        self.props_mut(node)?.insert(name.to_string(), value.clone());
        self.stats.props_set += 1;
        Ok(())
    }

    fn remove_prop(&mut self, node: Handle, name: &str) -> Result<(), ReconcileError> {
        self.props_mut(node)?.remove(name);
        self.stats.props_removed += 1;
        Ok(())
    }

    fn insert_before(
        &mut self,
        parent: Handle,
        child: Handle,
        anchor: Option<Handle>,
    ) -> Result<(), ReconcileError> {
        if parent == child {
            return Err(ReconcileError::NotAChild { parent, child });
        }
        // Validate before detaching so a failed insert leaves the tree intact.
        let siblings = self.children_mut(parent)?;
        if let Some(anchor) = anchor {
            if !siblings.contains(&anchor) {
                return Err(ReconcileError::NotAChild {
                    parent,
                    child: anchor,
                });
            }
        }

        let was_attached = self.detach(child)?;
        let siblings = self.children_mut(parent)?;
        let index = match anchor {
            Some(anchor) => siblings
                .iter()
                .position(|c| *c == anchor)
                .unwrap_or(siblings.len()),
            None => siblings.len(),
        };
        siblings.insert(index, child);
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }

        if was_attached {
            self.stats.moved += 1;
        } else {
            self.stats.inserted += 1;
        }
        Ok(())
    }

    fn remove_child(&mut self, parent: Handle, child: Handle) -> Result<(), ReconcileError> {
        if self.parent_of(child) != Some(parent) {
            return Err(ReconcileError::NotAChild { parent, child });
        }
        self.detach(child)?;
        self.drop_subtree(child);
        self.stats.removed += 1;
        Ok(())
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
