use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Identity of a sibling across renders.
pub type Key = String;

/// Opaque id of a node inside a [`LiveTree`](crate::vtree::LiveTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u64);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Event callback attached as a prop. Compared by identity.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn() + Send + Sync>);

impl Handler {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self) {
        (self.0)()
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Handler(Handler),
}

impl PropValue {
    pub fn handler(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self::Handler(Handler::new(f))
    }

    /// Attribute text for markup; handlers have none.
    pub fn as_attr(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Num(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Handler(_) => None,
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        Self::Num(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        Self::Num(value as f64)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Element node of a virtual tree.
///
/// `handle` is `None` until the node has been materialized into a live tree;
/// [`apply_patch`](crate::vtree::apply_patch) returns trees with handles
/// stamped so the next diff can address the live nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub tag: String,
    pub props: BTreeMap<String, PropValue>,
    pub children: Vec<Child>,
    pub key: Option<Key>,
    pub handle: Option<Handle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub text: String,
    pub handle: Option<Handle>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Child {
    Element(TreeNode),
    Text(TextNode),
}

impl TreeNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            props: BTreeMap::new(),
            children: Vec::new(),
            key: None,
            handle: None,
        }
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn prop(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    /// Attach `f` as the `on<event>` prop.
    pub fn on(mut self, event: &str, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.props
            .insert(format!("on{event}"), PropValue::handler(f));
        self
    }

    pub fn child(mut self, child: impl Into<Child>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.child(Child::text(text))
    }

    pub fn children<I, C>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Child>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }
}

impl Child {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextNode {
            text: text.into(),
            handle: None,
        })
    }

    pub fn handle(&self) -> Option<Handle> {
        match self {
            Self::Element(node) => node.handle,
            Self::Text(node) => node.handle,
        }
    }

    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::Element(node) => node.key.as_ref(),
            Self::Text(_) => None,
        }
    }

    /// Tag for elements, `"#text"` for text nodes.
    pub fn label(&self) -> &str {
        match self {
            Self::Element(node) => &node.tag,
            Self::Text(_) => "#text",
        }
    }
}

impl From<TreeNode> for Child {
    fn from(node: TreeNode) -> Self {
        Self::Element(node)
    }
}

impl From<&str> for Child {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Child {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}
