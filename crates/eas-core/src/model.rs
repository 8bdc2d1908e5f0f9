//! # Tagged Object Model
//!
//! In-memory tree produced by the WBXML decoder and consumed by the encoder.
//!
//! ```text
//! TaggedNode { namespace: "AirSync" }
//!   ├── "Collections" → Single(Node { namespace: "AirSync" })
//!   │                     └── "Collection" → Sequence([Node, Node])
//!   └── "Status"      → Single(Property { "AirSync", Text("1") })
//! ```
//!
//! Children are kept in first-seen order. A tag's slot starts as
//! [`ChildSlot::Single`] and is promoted to [`ChildSlot::Sequence`] when the
//! same tag shows up a second time under the same parent.

use serde::{Deserialize, Serialize};

// =============================================================================
// Leaf Values
// =============================================================================

/// Value of a leaf element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaggedValue {
    /// Null-terminated inline string (STR_I).
    Text(String),
    /// Length-prefixed bytes (OPAQUE).
    Opaque(Vec<u8>),
}

/// Leaf element: a text or opaque value scoped to a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedProperty {
    pub namespace: String,
    pub value: TaggedValue,
}

impl TaggedProperty {
    pub fn text(namespace: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            value: TaggedValue::Text(value.into()),
        }
    }

    pub fn opaque(namespace: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            namespace: namespace.into(),
            value: TaggedValue::Opaque(value.into()),
        }
    }

    /// True when the value is written as OPAQUE rather than STR_I.
    pub fn is_opaque(&self) -> bool {
        matches!(self.value, TaggedValue::Opaque(_))
    }

    /// Text value. Opaque bytes are returned only if they are valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match &self.value {
            TaggedValue::Text(s) => Some(s),
            TaggedValue::Opaque(b) => std::str::from_utf8(b).ok(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.value {
            TaggedValue::Text(s) => s.as_bytes(),
            TaggedValue::Opaque(b) => b,
        }
    }
}

// =============================================================================
// Children
// =============================================================================

/// A single child element: either a nested node or a leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaggedChild {
    Node(TaggedNode),
    Property(TaggedProperty),
}

impl TaggedChild {
    pub fn namespace(&self) -> &str {
        match self {
            TaggedChild::Node(n) => &n.namespace,
            TaggedChild::Property(p) => &p.namespace,
        }
    }

    pub fn as_node(&self) -> Option<&TaggedNode> {
        match self {
            TaggedChild::Node(n) => Some(n),
            TaggedChild::Property(_) => None,
        }
    }

    pub fn as_property(&self) -> Option<&TaggedProperty> {
        match self {
            TaggedChild::Property(p) => Some(p),
            TaggedChild::Node(_) => None,
        }
    }

    /// Text of a leaf child. Nodes have no text.
    pub fn as_text(&self) -> Option<&str> {
        self.as_property().and_then(TaggedProperty::as_text)
    }
}

impl From<TaggedNode> for TaggedChild {
    fn from(node: TaggedNode) -> Self {
        TaggedChild::Node(node)
    }
}

impl From<TaggedProperty> for TaggedChild {
    fn from(property: TaggedProperty) -> Self {
        TaggedChild::Property(property)
    }
}

/// Multiplicity of one tag under a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildSlot {
    Empty,
    Single(TaggedChild),
    Sequence(Vec<TaggedChild>),
}

impl ChildSlot {
    /// Adds an occurrence. The second occurrence promotes the slot to a sequence.
    pub fn push(&mut self, child: TaggedChild) {
        let current = std::mem::replace(self, ChildSlot::Empty);
        *self = match current {
            ChildSlot::Empty => ChildSlot::Single(child),
            ChildSlot::Single(first) => ChildSlot::Sequence(vec![first, child]),
            ChildSlot::Sequence(mut items) => {
                items.push(child);
                ChildSlot::Sequence(items)
            }
        };
    }

    /// First (or only) occurrence.
    pub fn first(&self) -> Option<&TaggedChild> {
        match self {
            ChildSlot::Empty => None,
            ChildSlot::Single(c) => Some(c),
            ChildSlot::Sequence(items) => items.first(),
        }
    }

    /// All occurrences in first-seen order.
    pub fn iter(&self) -> std::slice::Iter<'_, TaggedChild> {
        match self {
            ChildSlot::Empty => <&[TaggedChild]>::default().iter(),
            ChildSlot::Single(c) => std::slice::from_ref(c).iter(),
            ChildSlot::Sequence(items) => items.iter(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ChildSlot::Empty => 0,
            ChildSlot::Single(_) => 1,
            ChildSlot::Sequence(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, ChildSlot::Sequence(_))
    }
}

// =============================================================================
// Node
// =============================================================================

/// Object element: an ordered map of tag name to child slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedNode {
    pub namespace: String,
    children: Vec<(String, ChildSlot)>,
}

impl TaggedNode {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            children: Vec::new(),
        }
    }

    /// Attaches a child under `tag`, promoting the slot on repeat occurrences.
    pub fn attach(&mut self, tag: impl Into<String>, child: impl Into<TaggedChild>) {
        let tag = tag.into();
        let child = child.into();
        match self.children.iter_mut().find(|(name, _)| *name == tag) {
            Some((_, slot)) => slot.push(child),
            None => self.children.push((tag, ChildSlot::Single(child))),
        }
    }

    /// Attaches a text leaf in this node's namespace.
    pub fn push_text(&mut self, tag: impl Into<String>, value: impl Into<String>) {
        let property = TaggedProperty::text(self.namespace.clone(), value);
        self.attach(tag, property);
    }

    /// Attaches a text leaf in another namespace.
    pub fn push_text_ns(
        &mut self,
        namespace: impl Into<String>,
        tag: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.attach(tag, TaggedProperty::text(namespace, value));
    }

    /// Attaches an opaque leaf in this node's namespace.
    pub fn push_opaque(&mut self, tag: impl Into<String>, value: impl Into<Vec<u8>>) {
        let property = TaggedProperty::opaque(self.namespace.clone(), value);
        self.attach(tag, property);
    }

    pub fn push_node(&mut self, tag: impl Into<String>, node: TaggedNode) {
        self.attach(tag, node);
    }

    /// Builder form of [`push_text`](Self::push_text).
    pub fn with_text(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_text(tag, value);
        self
    }

    /// Builder form of [`push_node`](Self::push_node).
    pub fn with_node(mut self, tag: impl Into<String>, node: TaggedNode) -> Self {
        self.push_node(tag, node);
        self
    }

    pub fn get(&self, tag: &str) -> Option<&ChildSlot> {
        self.children
            .iter()
            .find(|(name, _)| name == tag)
            .map(|(_, slot)| slot)
    }

    /// First child node under `tag`.
    pub fn node(&self, tag: &str) -> Option<&TaggedNode> {
        self.get(tag).and_then(ChildSlot::first).and_then(TaggedChild::as_node)
    }

    /// Text of the first leaf under `tag`.
    pub fn text(&self, tag: &str) -> Option<&str> {
        self.get(tag).and_then(ChildSlot::first).and_then(TaggedChild::as_text)
    }

    /// All child nodes under `tag`, whether stored singly or as a sequence.
    pub fn nodes<'a>(&'a self, tag: &str) -> impl Iterator<Item = &'a TaggedNode> + 'a {
        self.get(tag)
            .into_iter()
            .flat_map(ChildSlot::iter)
            .filter_map(TaggedChild::as_node)
    }

    /// Texts of all leaves under `tag`.
    pub fn texts<'a>(&'a self, tag: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.get(tag)
            .into_iter()
            .flat_map(ChildSlot::iter)
            .filter_map(TaggedChild::as_text)
    }

    /// Descends along a path of tags, taking the first node at each step.
    pub fn path(&self, tags: &[&str]) -> Option<&TaggedNode> {
        tags.iter().try_fold(self, |node, tag| node.node(tag))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.get(tag).is_some()
    }

    /// `(tag, slot)` pairs in stored order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &ChildSlot)> {
        self.children.iter().map(|(name, slot)| (name.as_str(), slot))
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_promotion() {
        let mut slot = ChildSlot::Empty;
        slot.push(TaggedProperty::text("AirSync", "a").into());
        assert!(matches!(slot, ChildSlot::Single(_)));

        slot.push(TaggedProperty::text("AirSync", "b").into());
        assert!(slot.is_sequence());
        assert_eq!(slot.len(), 2);

        slot.push(TaggedProperty::text("AirSync", "c").into());
        let texts: Vec<_> = slot.iter().filter_map(TaggedChild::as_text).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_attach_keeps_first_seen_order() {
        let mut node = TaggedNode::new("FolderHierarchy");
        node.push_text("Status", "1");
        node.push_text("SyncKey", "k1");
        node.push_text("Status", "2");

        let tags: Vec<_> = node.children().map(|(tag, _)| tag).collect();
        assert_eq!(tags, vec!["Status", "SyncKey"]);
        assert_eq!(node.texts("Status").collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(node.text("SyncKey"), Some("k1"));
    }

    #[test]
    fn test_path_lookup() {
        let tree = TaggedNode::new("AirSync").with_node(
            "Collections",
            TaggedNode::new("AirSync")
                .with_node("Collection", TaggedNode::new("AirSync").with_text("SyncKey", "0")),
        );

        let collection = tree.path(&["Collections", "Collection"]).unwrap();
        assert_eq!(collection.text("SyncKey"), Some("0"));
        assert!(tree.path(&["Collections", "Missing"]).is_none());
    }

    #[test]
    fn test_opaque_property() {
        let prop = TaggedProperty::opaque("Calendar", vec![0u8, 1, 2]);
        assert!(prop.is_opaque());
        assert_eq!(prop.as_bytes(), &[0, 1, 2]);
        assert!(!TaggedProperty::text("Calendar", "x").is_opaque());
    }
}
