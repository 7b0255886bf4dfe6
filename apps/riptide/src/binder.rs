//! Attaches interaction listeners to live elements and turns delivered user
//! actions into outbound messages.
//!
//! Binding is incremental: a node is bound at most once for as long as it
//! stays in the tree, so rescanning a subtree only picks up new content.

use std::collections::BTreeMap;
use std::iter;

use tracing::{debug, trace, warn};

use crate::dom::{Document, NodeId, NodeKind};
use crate::protocol::{DomEvent, OutboundMessage, attr};

/// One attached interaction. The component id is resolved when binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listener {
    Click {
        component_id: Option<String>,
    },
    KeyDown {
        component_id: Option<String>,
        method: String,
        key_filters: Vec<String>,
    },
    Input {
        component_id: Option<String>,
        checkbox: bool,
    },
}

/// A user interaction delivered to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Click,
    KeyDown { code: String },
    Input { value: String },
    Check { checked: bool },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BindReport {
    pub clicks: usize,
    pub keydowns: usize,
    pub inputs: usize,
}

impl BindReport {
    pub fn total(&self) -> usize {
        self.clicks + self.keydowns + self.inputs
    }

    fn absorb(&mut self, other: BindReport) {
        self.clicks += other.clicks;
        self.keydowns += other.keydowns;
        self.inputs += other.inputs;
    }
}

/// Binds every unbound interactive descendant of `root`. `root` itself is not
/// considered. `root` may be an element or the document node.
pub fn connect(doc: &mut Document, root: NodeId) -> BindReport {
    let mut report = BindReport::default();
    if !matches!(doc.kind(root), Some(NodeKind::Element(_) | NodeKind::Document)) {
        warn!(target: "riptide::binder", node = %root, "cannot bind under a text or comment node");
        return report;
    }

    // One snapshot for all categories, taken before anything is marked.
    let candidates: Vec<NodeId> = doc
        .descendants(root)
        .into_iter()
        .filter(|node| doc.is_element(*node) && !doc.is_bound(*node))
        .collect();
    let with = |name: &str| -> Vec<NodeId> {
        candidates
            .iter()
            .copied()
            .filter(|node| doc.has_attr(*node, name))
            .collect()
    };
    let clicks = with(attr::CLICK);
    let keydowns = with(attr::KEYDOWN);
    let inputs = with(attr::INPUT);

    let mut matched = Vec::new();
    for node in clicks {
        let component_id = owning_component(doc, node);
        if attach(doc, node, Listener::Click { component_id }) {
            report.clicks += 1;
            matched.push(node);
        }
    }
    for node in keydowns {
        let component_id = owning_component(doc, node);
        let method = doc.attr(node, attr::KEYDOWN).unwrap_or_default().to_string();
        let key_filters = key_filters(doc, node);
        let listener = Listener::KeyDown {
            component_id,
            method,
            key_filters,
        };
        if attach(doc, node, listener) {
            report.keydowns += 1;
            matched.push(node);
        }
    }
    for node in inputs {
        let component_id = owning_component(doc, node);
        let checkbox = doc
            .attr(node, "type")
            .is_some_and(|kind| kind.eq_ignore_ascii_case("checkbox"));
        if attach(doc, node, Listener::Input { component_id, checkbox }) {
            report.inputs += 1;
            matched.push(node);
        }
    }

    for node in matched {
        if let Err(err) = doc.mark_bound(node).and_then(|_| doc.set_attr(node, attr::CONNECTED, "true")) {
            warn!(target: "riptide::binder", node = %node, error = %err, "failed to mark node bound");
        }
    }

    debug!(
        target: "riptide::binder",
        root = %root,
        clicks = report.clicks,
        keydowns = report.keydowns,
        inputs = report.inputs,
        "bound interactive elements"
    );
    report
}

/// Runs [`connect`] under every component root found below `root`.
pub fn connect_children(doc: &mut Document, root: NodeId) -> BindReport {
    let components: Vec<NodeId> = doc
        .descendants(root)
        .into_iter()
        .filter(|node| doc.has_attr(*node, attr::COMPONENT_ID))
        .collect();
    let mut report = BindReport::default();
    for component in components {
        report.absorb(connect(doc, component));
    }
    report
}

/// Id of the nearest ancestor-or-self carrying the component attribute.
pub fn component_id_of(doc: &Document, node: NodeId) -> Option<String> {
    iter::once(node)
        .chain(doc.ancestors(node))
        .find_map(|candidate| doc.attr(candidate, attr::COMPONENT_ID))
        .map(str::to_string)
}

fn owning_component(doc: &Document, node: NodeId) -> Option<String> {
    let component_id = component_id_of(doc, node);
    if component_id.is_none() {
        warn!(
            target: "riptide::binder",
            node = %node,
            tag = doc.tag(node).unwrap_or_default(),
            "interactive element has no owning component"
        );
    }
    component_id
}

fn attach(doc: &mut Document, node: NodeId, listener: Listener) -> bool {
    match doc.add_listener(node, listener) {
        Ok(()) => true,
        Err(err) => {
            warn!(target: "riptide::binder", node = %node, error = %err, "failed to attach listener");
            false
        }
    }
}

/// `go-live-data-*` attributes with the prefix stripped.
pub fn data_attributes(doc: &Document, node: NodeId) -> BTreeMap<String, String> {
    doc.attrs(node)
        .iter()
        .filter_map(|attribute| {
            attribute
                .name
                .strip_prefix(attr::DATA_PREFIX)
                .map(|key| (key.to_string(), attribute.value.clone()))
        })
        .collect()
}

pub fn key_filters(doc: &Document, node: NodeId) -> Vec<String> {
    doc.attrs(node)
        .iter()
        .filter(|attribute| {
            attribute.name == attr::KEY_FILTER || attribute.name.starts_with(attr::KEY_FILTER_PREFIX)
        })
        .map(|attribute| attribute.value.clone())
        .collect()
}

/// Delivers `action` to `node`: applies its state change, then evaluates the
/// node's listeners and returns the messages they produce.
pub fn fire(doc: &mut Document, node: NodeId, action: &UserAction) -> Vec<OutboundMessage> {
    if !doc.is_attached(node) {
        debug!(target: "riptide::binder", node = %node, "ignoring action on detached node");
        return Vec::new();
    }

    let applied = match action {
        UserAction::Input { value } => doc.set_value_property(node, value.clone()),
        UserAction::Check { checked } => doc.set_checked_property(node, *checked),
        UserAction::Click | UserAction::KeyDown { .. } => Ok(()),
    };
    if let Err(err) = applied {
        warn!(target: "riptide::binder", node = %node, error = %err, "action does not apply to node");
        return Vec::new();
    }

    let listeners = doc.listeners(node).to_vec();
    let messages: Vec<OutboundMessage> = listeners
        .iter()
        .filter_map(|listener| message_for(doc, node, listener, action))
        .collect();
    trace!(target: "riptide::binder", node = %node, ?action, produced = messages.len(), "action fired");
    messages
}

fn message_for(
    doc: &Document,
    node: NodeId,
    listener: &Listener,
    action: &UserAction,
) -> Option<OutboundMessage> {
    match (listener, action) {
        (Listener::Click { component_id }, UserAction::Click) => {
            let Some(method) = doc.attr(node, attr::CLICK) else {
                debug!(target: "riptide::binder", node = %node, "click attribute removed since binding");
                return None;
            };
            Some(OutboundMessage::InvokeMethod {
                component_id: component_id.clone(),
                method_name: method.to_string(),
                method_data: data_attributes(doc, node),
                dom_event: None,
            })
        }
        (
            Listener::KeyDown {
                component_id,
                method,
                key_filters,
            },
            UserAction::KeyDown { code },
        ) => {
            if !key_filters.is_empty() && !key_filters.iter().any(|filter| filter == code) {
                return None;
            }
            Some(OutboundMessage::InvokeMethod {
                component_id: component_id.clone(),
                method_name: method.clone(),
                method_data: data_attributes(doc, node),
                dom_event: Some(DomEvent {
                    key_code: code.clone(),
                }),
            })
        }
        (
            Listener::Input {
                component_id,
                checkbox,
            },
            UserAction::Input { .. } | UserAction::Check { .. },
        ) => {
            let Some(key) = doc.attr(node, attr::INPUT) else {
                debug!(target: "riptide::binder", node = %node, "input attribute removed since binding");
                return None;
            };
            let value = if *checkbox {
                doc.checked_property(node).to_string()
            } else {
                doc.value_property(node).unwrap_or_default()
            };
            Some(OutboundMessage::InputChanged {
                component_id: component_id.clone(),
                key: key.to_string(),
                value,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTER: &str = concat!(
        r#"<div id="root" go-live-component-id="c1" go-live-click="Root">"#,
        r#"<button id="inc" go-live-click="Increment" go-live-data-step="2">+</button>"#,
        r#"<input id="name" go-live-input="Name" value="bob">"#,
        r#"<input id="done" type="checkbox" go-live-input="Done">"#,
        r#"<input id="search" go-live-keydown="Search" go-live-key="Enter" go-live-key-alt="NumpadEnter">"#,
        r#"</div>"#,
    );

    fn find(doc: &Document, selector: &str) -> NodeId {
        doc.query_selector(doc.root(), selector)
            .expect("valid selector")
            .unwrap_or_else(|| panic!("no match for {selector}"))
    }

    fn bound_counter() -> Document {
        let mut doc = Document::parse(COUNTER);
        let root = find(&doc, "#root");
        connect(&mut doc, root);
        doc
    }

    #[test]
    fn binds_each_category_once() {
        let mut doc = Document::parse(COUNTER);
        let root = find(&doc, "#root");

        let first = connect(&mut doc, root);
        assert_eq!(
            first,
            BindReport {
                clicks: 1,
                keydowns: 1,
                inputs: 2
            }
        );

        let second = connect(&mut doc, root);
        assert_eq!(second.total(), 0);
        for id in ["#inc", "#name", "#done", "#search"] {
            let node = find(&doc, id);
            assert_eq!(doc.listeners(node).len(), 1, "{id}");
            assert!(doc.is_bound(node));
            assert_eq!(doc.attr(node, attr::CONNECTED), Some("true"));
        }
        // The scanned root is never bound itself.
        assert!(doc.listeners(root).is_empty());
    }

    #[test]
    fn removing_connected_attribute_does_not_rebind() {
        let mut doc = bound_counter();
        let root = find(&doc, "#root");
        let inc = find(&doc, "#inc");
        doc.remove_attr(inc, attr::CONNECTED).expect("remove");

        assert_eq!(connect(&mut doc, root).total(), 0);
        assert_eq!(doc.listeners(inc).len(), 1);
    }

    #[test]
    fn element_with_several_categories_gets_each_listener() {
        let mut doc = Document::parse(
            r#"<div id="c" go-live-component-id="c"><input id="x" go-live-input="K" go-live-keydown="Go"></div>"#,
        );
        let root = find(&doc, "#c");
        let report = connect(&mut doc, root);
        assert_eq!(report.total(), 2);
        assert_eq!(doc.listeners(find(&doc, "#x")).len(), 2);
    }

    #[test]
    fn missing_component_binds_with_absent_id() {
        let mut doc = Document::parse(r#"<section id="s"><a id="a" go-live-click="Go"></a></section>"#);
        let section = find(&doc, "#s");
        connect(&mut doc, section);
        let a = find(&doc, "#a");

        assert_eq!(doc.listeners(a), [Listener::Click { component_id: None }]);
        let messages = fire(&mut doc, a, &UserAction::Click);
        assert!(matches!(
            messages.as_slice(),
            [OutboundMessage::InvokeMethod { component_id: None, .. }]
        ));
    }

    #[test]
    fn click_reads_method_and_data_when_fired() {
        let mut doc = bound_counter();
        let inc = find(&doc, "#inc");
        doc.set_attr(inc, attr::CLICK, "Add").expect("set");
        doc.set_attr(inc, "go-live-data-extra", "yes").expect("set");

        let messages = fire(&mut doc, inc, &UserAction::Click);
        assert_eq!(
            messages,
            [OutboundMessage::InvokeMethod {
                component_id: Some("c1".into()),
                method_name: "Add".into(),
                method_data: BTreeMap::from([
                    ("extra".to_string(), "yes".to_string()),
                    ("step".to_string(), "2".to_string()),
                ]),
                dom_event: None,
            }]
        );
    }

    #[test]
    fn keydown_honours_filters() {
        let mut doc = bound_counter();
        let search = find(&doc, "#search");

        let miss = fire(&mut doc, search, &UserAction::KeyDown { code: "KeyA".into() });
        assert!(miss.is_empty());

        let hit = fire(&mut doc, search, &UserAction::KeyDown { code: "NumpadEnter".into() });
        assert_eq!(
            hit,
            [OutboundMessage::InvokeMethod {
                component_id: Some("c1".into()),
                method_name: "Search".into(),
                method_data: BTreeMap::new(),
                dom_event: Some(DomEvent {
                    key_code: "NumpadEnter".into()
                }),
            }]
        );
    }

    #[test]
    fn keydown_without_filters_matches_every_key() {
        let mut doc = Document::parse(
            r#"<div id="c" go-live-component-id="c"><input id="k" go-live-keydown="Any"></div>"#,
        );
        let root = find(&doc, "#c");
        connect(&mut doc, root);
        let k = find(&doc, "#k");
        assert_eq!(fire(&mut doc, k, &UserAction::KeyDown { code: "Space".into() }).len(), 1);
    }

    #[test]
    fn input_reports_value_or_checked_state() {
        let mut doc = bound_counter();
        let name = find(&doc, "#name");
        let done = find(&doc, "#done");

        let typed = fire(&mut doc, name, &UserAction::Input { value: "alice".into() });
        assert_eq!(
            typed,
            [OutboundMessage::InputChanged {
                component_id: Some("c1".into()),
                key: "Name".into(),
                value: "alice".into(),
            }]
        );

        let checked = fire(&mut doc, done, &UserAction::Check { checked: true });
        assert!(matches!(
            checked.as_slice(),
            [OutboundMessage::InputChanged { value, .. }] if value == "true"
        ));
        let unchecked = fire(&mut doc, done, &UserAction::Check { checked: false });
        assert!(matches!(
            unchecked.as_slice(),
            [OutboundMessage::InputChanged { value, .. }] if value == "false"
        ));
    }

    #[test]
    fn detached_nodes_fire_nothing() {
        let mut doc = bound_counter();
        let inc = find(&doc, "#inc");
        doc.detach(inc).expect("detach");
        assert!(fire(&mut doc, inc, &UserAction::Click).is_empty());
    }

    #[test]
    fn non_element_root_is_ignored() {
        let mut doc = Document::parse("<p>text</p>");
        let p = find(&doc, "p");
        let text = doc.children(p)[0];
        assert_eq!(connect(&mut doc, text), BindReport::default());
    }

    #[test]
    fn document_node_can_be_scanned() {
        let mut doc = Document::parse(r#"<div go-live-component-id="top"><a id="a" go-live-click="Go"></a></div>"#);
        let root = doc.root();
        assert_eq!(connect(&mut doc, root).clicks, 1);
        assert!(doc.is_bound(find(&doc, "#a")));
    }

    #[test]
    fn nested_components_resolve_to_the_nearest_owner() {
        let mut doc = Document::parse(concat!(
            r#"<div id="outer" go-live-component-id="outer">"#,
            r#"<button id="o" go-live-click="Outer"></button>"#,
            r#"<div id="inner" go-live-component-id="inner">"#,
            r#"<button id="i" go-live-click="Inner"></button>"#,
            r#"</div></div>"#,
        ));
        let outer = find(&doc, "#outer");
        let inner = find(&doc, "#inner");
        let button = find(&doc, "#i");

        assert_eq!(connect(&mut doc, outer).clicks, 2);
        assert_eq!(connect(&mut doc, inner).total(), 0);
        assert_eq!(
            doc.listeners(button),
            [Listener::Click {
                component_id: Some("inner".into())
            }]
        );
        assert_eq!(
            fire(&mut doc, button, &UserAction::Click),
            [OutboundMessage::InvokeMethod {
                component_id: Some("inner".into()),
                method_name: "Inner".into(),
                method_data: BTreeMap::new(),
                dom_event: None,
            }]
        );
        let o = find(&doc, "#o");
        assert_eq!(
            doc.listeners(o),
            [Listener::Click {
                component_id: Some("outer".into())
            }]
        );
    }

    #[test]
    fn connect_children_visits_every_component() {
        let mut doc = Document::parse(concat!(
            r#"<main>"#,
            r#"<div go-live-component-id="a"><button id="a1" go-live-click="A"></button></div>"#,
            r#"<div go-live-component-id="b"><button id="b1" go-live-click="B"></button></div>"#,
            r#"</main>"#,
        ));
        let root = doc.root();
        assert_eq!(connect_children(&mut doc, root).clicks, 2);
        assert_eq!(
            doc.listeners(find(&doc, "#b1")),
            [Listener::Click {
                component_id: Some("b".into())
            }]
        );
    }

    #[test]
    fn component_lookup_includes_self() {
        let doc = Document::parse(COUNTER);
        let root = find(&doc, "#root");
        let search = find(&doc, "#search");
        assert_eq!(component_id_of(&doc, root).as_deref(), Some("c1"));
        assert_eq!(component_id_of(&doc, search).as_deref(), Some("c1"));
        assert_eq!(component_id_of(&doc, doc.root()), None);
        assert_eq!(key_filters(&doc, search), ["Enter", "NumpadEnter"]);
    }
}
