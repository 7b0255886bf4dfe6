//! Arena-backed document tree mirrored from the server's markup.
//!
//! Slots are never reused: a detached node keeps its id, so a stale
//! [`NodeId`] can never alias a node inserted later.

use std::fmt;

use thiserror::Error;

use crate::binder::Listener;

mod parse;
pub mod selector;

pub use selector::{Selector, SelectorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("{0} does not exist in this document")]
    UnknownNode(NodeId),
    #[error("{0} has no parent")]
    Orphan(NodeId),
    #[error("{child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("{0} cannot have children")]
    NotAContainer(NodeId),
    #[error("inserting {node} under {parent} would create a cycle")]
    Cycle { parent: NodeId, node: NodeId },
    #[error("{0} is not an element")]
    NotAnElement(NodeId),
}

pub type DomResult<T> = Result<T, DomError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    tag: String,
    attrs: Vec<Attribute>,
    // Live form-control state; `None` until written by the user or a patch.
    value: Option<String>,
    checked: Option<bool>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            value: None,
            checked: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    fn is_form_control(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea" | "select")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
    bound: bool,
    listeners: Vec<Listener>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            kind,
            bound: false,
            listeners: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Document)],
            root: NodeId(0),
        }
    }

    /// Parses a full page (or any markup) under the document root.
    pub fn parse(markup: &str) -> Self {
        let mut doc = Self::new();
        let root = doc.root;
        parse::parse_into(&mut doc, Some(root), markup);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Parses `markup` into detached nodes and returns the top-level ones in
    /// source order.
    pub fn parse_fragment(&mut self, markup: &str) -> Vec<NodeId> {
        parse::parse_into(self, None, markup)
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element(Element::new(tag)))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Text(text.into()))
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Comment(text.into()))
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(kind));
        id
    }

    fn node(&self, id: NodeId) -> DomResult<&Node> {
        self.nodes.get(id.0).ok_or(DomError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> DomResult<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(DomError::UnknownNode(id))
    }

    fn element_mut(&mut self, id: NodeId) -> DomResult<&mut Element> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Element(element) => Ok(element),
            _ => Err(DomError::NotAnElement(id)),
        }
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(id.0).map(|node| &node.kind)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.kind(id)? {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Text(_)))
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(Element::tag)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|child| self.is_element(*child))
            .collect()
    }

    /// Parent chain of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            doc: self,
            next: self.parent(id),
        }
    }

    /// Preorder descendants of `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        id == self.root || self.ancestors(id).any(|ancestor| ancestor == self.root)
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attr(name)
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    pub fn attrs(&self, id: NodeId) -> &[Attribute] {
        self.element(id).map(Element::attrs).unwrap_or(&[])
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) -> DomResult<()> {
        let element = self.element_mut(id)?;
        let name = name.to_ascii_lowercase();
        let value = value.into();
        match element.attrs.iter_mut().find(|attr| attr.name == name) {
            Some(attr) => attr.value = value,
            None => element.attrs.push(Attribute { name, value }),
        }
        Ok(())
    }

    /// Removes `name`; returns whether it was present.
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> DomResult<bool> {
        let element = self.element_mut(id)?;
        let name = name.to_ascii_lowercase();
        let before = element.attrs.len();
        element.attrs.retain(|attr| attr.name != name);
        Ok(element.attrs.len() != before)
    }

    /// Live `value` of a form control: the user-edited value if any, else the
    /// markup default. `None` for other nodes.
    ///
    /// The default is the text of a `textarea`, the selected (or first)
    /// option of a `select`, and the `value` attribute of anything else.
    pub fn value_property(&self, id: NodeId) -> Option<String> {
        let element = self.element(id)?;
        if !element.is_form_control() {
            return None;
        }
        if let Some(value) = &element.value {
            return Some(value.clone());
        }
        let default = match element.tag() {
            "textarea" => self.text_content(id),
            "select" => self.selected_option_value(id).unwrap_or_default(),
            _ => element.attr("value").unwrap_or_default().to_string(),
        };
        Some(default)
    }

    fn selected_option_value(&self, select: NodeId) -> Option<String> {
        let options: Vec<NodeId> = self
            .descendants(select)
            .into_iter()
            .filter(|node| self.tag(*node) == Some("option"))
            .collect();
        let option = options
            .iter()
            .copied()
            .find(|option| self.has_attr(*option, "selected"))
            .or_else(|| options.first().copied())?;
        Some(
            self.attr(option, "value")
                .map(str::to_string)
                .unwrap_or_else(|| self.text_content(option).trim().to_string()),
        )
    }

    pub fn set_value_property(&mut self, id: NodeId, value: impl Into<String>) -> DomResult<()> {
        self.element_mut(id)?.value = Some(value.into());
        Ok(())
    }

    pub fn checked_property(&self, id: NodeId) -> bool {
        self.element(id)
            .map(|element| {
                element
                    .checked
                    .unwrap_or_else(|| element.attr("checked").is_some())
            })
            .unwrap_or(false)
    }

    pub fn set_checked_property(&mut self, id: NodeId, checked: bool) -> DomResult<()> {
        self.element_mut(id)?.checked = Some(checked);
        Ok(())
    }

    pub fn text_content(&self, id: NodeId) -> String {
        match self.kind(id) {
            Some(NodeKind::Text(text)) | Some(NodeKind::Comment(text)) => text.clone(),
            Some(_) => {
                let mut out = String::new();
                for node in self.descendants(id) {
                    if let Some(NodeKind::Text(text)) = self.kind(node) {
                        out.push_str(text);
                    }
                }
                out
            }
            None => String::new(),
        }
    }

    /// Text and comment nodes get their data replaced; containers get their
    /// children replaced by a single text node.
    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) -> DomResult<()> {
        let text = text.into();
        if let NodeKind::Text(data) | NodeKind::Comment(data) = &mut self.node_mut(id)?.kind {
            *data = text;
            return Ok(());
        }
        let replacement = if text.is_empty() {
            Vec::new()
        } else {
            vec![self.create_text(text)]
        };
        self.replace_children(id, &replacement)
    }

    pub fn is_bound(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).is_some_and(|node| node.bound)
    }

    /// Sets the bound marker. Returns `false` when it was already set.
    pub fn mark_bound(&mut self, id: NodeId) -> DomResult<bool> {
        let node = self.node_mut(id)?;
        if node.bound {
            return Ok(false);
        }
        node.bound = true;
        Ok(true)
    }

    pub fn listeners(&self, id: NodeId) -> &[Listener] {
        self.nodes
            .get(id.0)
            .map(|node| node.listeners.as_slice())
            .unwrap_or(&[])
    }

    pub fn add_listener(&mut self, id: NodeId, listener: Listener) -> DomResult<()> {
        self.node_mut(id)?.listeners.push(listener);
        Ok(())
    }

    fn check_insert(&self, parent: NodeId, node: NodeId) -> DomResult<()> {
        match self.node(parent)?.kind {
            NodeKind::Document | NodeKind::Element(_) => {}
            _ => return Err(DomError::NotAContainer(parent)),
        }
        self.node(node)?;
        if node == parent || self.ancestors(parent).any(|ancestor| ancestor == node) {
            return Err(DomError::Cycle { parent, node });
        }
        Ok(())
    }

    /// Removes `id` from its parent. Detaching an orphan is a no-op.
    pub fn detach(&mut self, id: NodeId) -> DomResult<()> {
        let Some(parent) = self.node(id)?.parent else {
            return Ok(());
        };
        self.node_mut(parent)?.children.retain(|child| *child != id);
        self.node_mut(id)?.parent = None;
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<()> {
        self.insert_before(parent, child, None)
    }

    /// Inserts `child` before `reference`, or last when `reference` is `None`.
    /// A child that already has a parent is moved.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> DomResult<()> {
        self.check_insert(parent, child)?;
        if let Some(reference) = reference {
            if reference == child {
                return Ok(());
            }
            if self.parent(reference) != Some(parent) {
                return Err(DomError::NotAChild {
                    parent,
                    child: reference,
                });
            }
        }
        self.detach(child)?;
        let children = &mut self.node_mut(parent)?.children;
        let position = reference
            .and_then(|reference| children.iter().position(|c| *c == reference))
            .unwrap_or(children.len());
        children.insert(position, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    pub fn replace_child(&mut self, parent: NodeId, new: NodeId, old: NodeId) -> DomResult<()> {
        if self.parent(old) != Some(parent) {
            return Err(DomError::NotAChild { parent, child: old });
        }
        if new == old {
            return Ok(());
        }
        self.insert_before(parent, new, Some(old))?;
        self.detach(old)
    }

    pub fn replace_children(&mut self, parent: NodeId, new: &[NodeId]) -> DomResult<()> {
        for child in new {
            self.check_insert(parent, *child)?;
        }
        let old = std::mem::take(&mut self.node_mut(parent)?.children);
        for child in old {
            self.node_mut(child)?.parent = None;
        }
        for child in new {
            self.append_child(parent, *child)?;
        }
        Ok(())
    }

    pub fn query_selector(&self, scope: NodeId, selector: &str) -> Result<Option<NodeId>, SelectorError> {
        let selector = Selector::parse(selector)?;
        Ok(selector.first(self, scope))
    }

    pub fn query_selector_all(&self, scope: NodeId, selector: &str) -> Result<Vec<NodeId>, SelectorError> {
        let selector = Selector::parse(selector)?;
        Ok(selector.all(self, scope))
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        parse::serialize(self, id, &mut out);
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            parse::serialize(self, *child, &mut out);
        }
        out
    }
}

pub struct Ancestors<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.doc.parent(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(doc: &Document, selector: &str) -> NodeId {
        doc.query_selector(doc.root(), selector)
            .expect("valid selector")
            .unwrap_or_else(|| panic!("no match for {selector}"))
    }

    #[test]
    fn parses_and_serializes_round_trip() {
        let markup = r#"<div id="app" class="a b"><p>Hello &amp; <b>bye</b></p><input type="text" value="x"><!-- note --></div>"#;
        let doc = Document::parse(markup);
        let app = find(&doc, "#app");
        assert_eq!(doc.outer_html(app), markup);
        assert_eq!(doc.text_content(app), "Hello & bye");
    }

    #[test]
    fn insert_before_moves_existing_children() {
        let mut doc = Document::parse("<ul><li id=a></li><li id=b></li><li id=c></li></ul>");
        let ul = find(&doc, "ul");
        let a = find(&doc, "#a");
        let c = find(&doc, "#c");

        doc.insert_before(ul, c, Some(a)).expect("move c first");
        let order: Vec<_> = doc
            .element_children(ul)
            .into_iter()
            .filter_map(|li| doc.attr(li, "id").map(str::to_string))
            .collect();
        assert_eq!(order, ["c", "a", "b"]);
    }

    #[test]
    fn rejects_cycles_and_text_parents() {
        let mut doc = Document::parse("<div><span>t</span></div>");
        let div = find(&doc, "div");
        let span = find(&doc, "span");
        let text = doc.children(span)[0];

        assert_eq!(
            doc.append_child(span, div),
            Err(DomError::Cycle {
                parent: span,
                node: div
            })
        );
        assert_eq!(doc.append_child(text, div), Err(DomError::NotAContainer(text)));
    }

    #[test]
    fn detached_nodes_are_not_attached() {
        let mut doc = Document::parse("<div><span></span></div>");
        let span = find(&doc, "span");
        assert!(doc.is_attached(span));
        doc.detach(span).expect("detach");
        assert!(!doc.is_attached(span));
        assert_eq!(doc.parent(span), None);
        assert!(doc.query_selector(doc.root(), "span").expect("valid").is_none());
    }

    #[test]
    fn value_property_tracks_live_state() {
        let mut doc = Document::parse(r#"<input id=i value="x"><div id=d value="y"></div>"#);
        let input = find(&doc, "#i");
        let div = find(&doc, "#d");

        assert_eq!(doc.value_property(input).as_deref(), Some("x"));
        assert_eq!(doc.value_property(div), None);

        doc.set_value_property(input, "typed").expect("set value");
        assert_eq!(doc.value_property(input).as_deref(), Some("typed"));
        assert_eq!(doc.attr(input, "value"), Some("x"));
    }

    #[test]
    fn textarea_and_select_default_to_their_content() {
        let mut doc = Document::parse(concat!(
            "<textarea id=t>draft</textarea>",
            "<select id=s><option value=a>A</option><option selected> B </option></select>",
            "<select id=f><option value=first>1</option><option>2</option></select>",
            "<select id=e></select>",
        ));
        let textarea = find(&doc, "#t");
        assert_eq!(doc.value_property(textarea).as_deref(), Some("draft"));
        assert_eq!(doc.value_property(find(&doc, "#s")).as_deref(), Some("B"));
        assert_eq!(doc.value_property(find(&doc, "#f")).as_deref(), Some("first"));
        assert_eq!(doc.value_property(find(&doc, "#e")).as_deref(), Some(""));

        doc.set_value_property(textarea, "edited").expect("set value");
        assert_eq!(doc.value_property(textarea).as_deref(), Some("edited"));
        assert_eq!(doc.text_content(textarea), "draft");
    }

    #[test]
    fn checked_property_defaults_to_attribute() {
        let mut doc = Document::parse("<input id=a type=checkbox checked><input id=b type=checkbox>");
        let a = find(&doc, "#a");
        let b = find(&doc, "#b");
        assert!(doc.checked_property(a));
        assert!(!doc.checked_property(b));

        doc.set_checked_property(a, false).expect("uncheck");
        assert!(!doc.checked_property(a));
    }

    #[test]
    fn set_text_on_element_replaces_children() {
        let mut doc = Document::parse("<p>one <b>two</b></p>");
        let p = find(&doc, "p");
        doc.set_text(p, "three").expect("set text");
        assert_eq!(doc.inner_html(p), "three");
    }

    #[test]
    fn bound_marker_is_set_once() {
        let mut doc = Document::parse("<button></button>");
        let button = find(&doc, "button");
        assert!(!doc.is_bound(button));
        assert_eq!(doc.mark_bound(button), Ok(true));
        assert_eq!(doc.mark_bound(button), Ok(false));
        assert!(doc.is_bound(button));
    }
}
