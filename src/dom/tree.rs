//! The node tree collaborator consulted while building event paths.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::event::Event;
use super::event_target::{EventTarget, TargetId};
use crate::realm::Realm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowRootMode {
    Open,
    Closed,
}

/// Tree queries the dispatch algorithm needs. Targets the tree does not know
/// are treated as plain, parentless event targets.
pub trait DomTree {
    /// "Get the parent" of `target` for `event`.
    fn get_the_parent(
        &self,
        _target: &Rc<EventTarget>,
        _event: &Event,
        _global: Option<&Rc<EventTarget>>,
    ) -> Option<Rc<EventTarget>> {
        None
    }

    fn is_node(&self, _target: &Rc<EventTarget>) -> bool {
        false
    }

    fn is_shadow_root(&self, _target: &Rc<EventTarget>) -> bool {
        false
    }

    /// The mode of `target` when it is a shadow root.
    fn shadow_root_mode(&self, _target: &Rc<EventTarget>) -> Option<ShadowRootMode> {
        None
    }

    fn root(&self, _target: &Rc<EventTarget>) -> Option<Rc<EventTarget>> {
        None
    }

    fn parent_node(&self, _target: &Rc<EventTarget>) -> Option<Rc<EventTarget>> {
        None
    }

    fn host(&self, _shadow_root: &Rc<EventTarget>) -> Option<Rc<EventTarget>> {
        None
    }

    fn is_assigned_slottable(&self, _target: &Rc<EventTarget>) -> bool {
        false
    }

    /// The document of a window target, used for the legacy target override.
    fn associated_document(&self, _target: &Rc<EventTarget>) -> Option<Rc<EventTarget>> {
        None
    }

    fn has_activation_behavior(&self, _target: &Rc<EventTarget>) -> bool {
        false
    }

    fn activation_behavior(&self, _realm: &mut Realm, _target: &Rc<EventTarget>, _event: &Rc<Event>) {}

    fn legacy_pre_activation_behavior(&self, _realm: &mut Realm, _target: &Rc<EventTarget>) {}

    fn legacy_canceled_activation_behavior(&self, _realm: &mut Realm, _target: &Rc<EventTarget>) {}

    fn root_is_shadow_root(&self, target: &Rc<EventTarget>) -> bool {
        self.is_node(target)
            && self
                .root(target)
                .map(|root| self.is_shadow_root(&root))
                .unwrap_or(false)
    }

    /// The mode of `target`'s root, when that root is a shadow root.
    fn root_mode(&self, target: &Rc<EventTarget>) -> Option<ShadowRootMode> {
        self.root(target).and_then(|root| self.shadow_root_mode(&root))
    }

    fn is_shadow_including_inclusive_ancestor(
        &self,
        ancestor: &Rc<EventTarget>,
        node: &Rc<EventTarget>,
    ) -> bool {
        let mut current = Some(Rc::clone(node));
        while let Some(node) = current {
            if Rc::ptr_eq(&node, ancestor) {
                return true;
            }
            current = match self.parent_node(&node) {
                Some(parent) => Some(parent),
                None if self.is_shadow_root(&node) => self.host(&node),
                None => None,
            };
        }
        false
    }

    fn root_is_shadow_including_inclusive_ancestor_of(
        &self,
        target: &Rc<EventTarget>,
        other: &Rc<EventTarget>,
    ) -> bool {
        match self.root(target) {
            Some(root) => self.is_node(other) && self.is_shadow_including_inclusive_ancestor(&root, other),
            None => false,
        }
    }

    /// Retarget `a` against `b`: climb out of shadow trees `b` is not in.
    fn retarget(&self, a: Option<&Rc<EventTarget>>, b: &Rc<EventTarget>) -> Option<Rc<EventTarget>> {
        let mut a = Rc::clone(a?);
        loop {
            if !self.is_node(&a) {
                return Some(a);
            }
            let Some(root) = self.root(&a) else {
                return Some(a);
            };
            if !self.is_shadow_root(&root) || self.is_shadow_including_inclusive_ancestor(&root, b) {
                return Some(a);
            }
            match self.host(&root) {
                Some(host) => a = host,
                None => return Some(a),
            }
        }
    }
}

/// A realm without a node tree: every target is standalone.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedTree;

impl DomTree for DetachedTree {}

type Activate = Rc<dyn Fn(&mut Realm, &Rc<EventTarget>, &Rc<Event>)>;
type LegacyHook = Rc<dyn Fn(&mut Realm, &Rc<EventTarget>)>;

/// Activation behaviour of an element, e.g. following a link on `click`.
#[derive(Clone)]
pub struct ActivationBehavior {
    activate: Activate,
    legacy_pre_activation: Option<LegacyHook>,
    legacy_canceled_activation: Option<LegacyHook>,
}

impl ActivationBehavior {
    pub fn new<F>(activate: F) -> Self
    where
        F: Fn(&mut Realm, &Rc<EventTarget>, &Rc<Event>) + 'static,
    {
        Self {
            activate: Rc::new(activate),
            legacy_pre_activation: None,
            legacy_canceled_activation: None,
        }
    }

    pub fn with_legacy_pre_activation<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Realm, &Rc<EventTarget>) + 'static,
    {
        self.legacy_pre_activation = Some(Rc::new(hook));
        self
    }

    pub fn with_legacy_canceled_activation<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Realm, &Rc<EventTarget>) + 'static,
    {
        self.legacy_canceled_activation = Some(Rc::new(hook));
        self
    }
}

impl fmt::Debug for ActivationBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationBehavior")
            .field("legacy_pre_activation", &self.legacy_pre_activation.is_some())
            .field("legacy_canceled_activation", &self.legacy_canceled_activation.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    Document { browsing_context: bool },
    Element { local_name: String },
    ShadowRoot { mode: ShadowRootMode, host: Rc<EventTarget> },
}

#[derive(Debug, Clone)]
struct NodeData {
    target: Rc<EventTarget>,
    kind: NodeKind,
    parent: Option<Rc<EventTarget>>,
    assigned_slot: Option<Rc<EventTarget>>,
    activation: Option<ActivationBehavior>,
}

/// A minimal node tree of documents, elements, slots and shadow roots.
#[derive(Debug, Default)]
pub struct NodeTree {
    nodes: RefCell<HashMap<TargetId, NodeData>>,
    /// Associated document of each window target.
    documents: RefCell<HashMap<TargetId, Rc<EventTarget>>>,
}

impl NodeTree {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    fn insert(&self, kind: NodeKind) -> Rc<EventTarget> {
        let target = EventTarget::new();
        self.nodes.borrow_mut().insert(
            target.id(),
            NodeData {
                target: Rc::clone(&target),
                kind,
                parent: None,
                assigned_slot: None,
                activation: None,
            },
        );
        target
    }

    fn with_node<R>(&self, target: &Rc<EventTarget>, read: impl FnOnce(&NodeData) -> R) -> Option<R> {
        self.nodes.borrow().get(&target.id()).map(read)
    }

    /// A document. With a browsing context its parent is the window.
    pub fn create_document(&self, browsing_context: bool) -> Rc<EventTarget> {
        self.insert(NodeKind::Document { browsing_context })
    }

    /// Make `document` the associated document of `window`.
    pub fn associate_document(&self, window: &Rc<EventTarget>, document: &Rc<EventTarget>) {
        self.documents
            .borrow_mut()
            .insert(window.id(), Rc::clone(document));
    }

    pub fn create_element(&self, local_name: &str) -> Rc<EventTarget> {
        self.insert(NodeKind::Element {
            local_name: local_name.to_string(),
        })
    }

    pub fn local_name(&self, target: &Rc<EventTarget>) -> Option<String> {
        self.with_node(target, |node| match &node.kind {
            NodeKind::Element { local_name } => Some(local_name.clone()),
            _ => None,
        })
        .flatten()
    }

    pub fn append_child(&self, parent: &Rc<EventTarget>, child: &Rc<EventTarget>) {
        if let Some(node) = self.nodes.borrow_mut().get_mut(&child.id()) {
            node.parent = Some(Rc::clone(parent));
        }
    }

    /// Attach a shadow root to `host` and return it.
    pub fn attach_shadow(&self, host: &Rc<EventTarget>, mode: ShadowRootMode) -> Rc<EventTarget> {
        self.insert(NodeKind::ShadowRoot {
            mode,
            host: Rc::clone(host),
        })
    }

    /// Assign `slottable` to `slot`, or unassign it.
    pub fn assign_slot(&self, slottable: &Rc<EventTarget>, slot: Option<&Rc<EventTarget>>) {
        if let Some(node) = self.nodes.borrow_mut().get_mut(&slottable.id()) {
            node.assigned_slot = slot.cloned();
        }
    }

    pub fn set_activation_behavior(&self, target: &Rc<EventTarget>, behavior: ActivationBehavior) {
        if let Some(node) = self.nodes.borrow_mut().get_mut(&target.id()) {
            node.activation = Some(behavior);
        }
    }

    fn activation(&self, target: &Rc<EventTarget>) -> Option<ActivationBehavior> {
        self.with_node(target, |node| node.activation.clone()).flatten()
    }
}

impl DomTree for NodeTree {
    fn get_the_parent(
        &self,
        target: &Rc<EventTarget>,
        event: &Event,
        global: Option<&Rc<EventTarget>>,
    ) -> Option<Rc<EventTarget>> {
        let node = self.with_node(target, NodeData::clone)?;
        match node.kind {
            NodeKind::Element { .. } => node.assigned_slot.or(node.parent),
            NodeKind::ShadowRoot { host, .. } => {
                if !event.composed() {
                    let first = event
                        .path()
                        .first()
                        .map(|entry| Rc::clone(&entry.invocation_target));
                    let first_root = first.and_then(|first| self.root(&first));
                    if first_root
                        .map(|root| Rc::ptr_eq(&root, target))
                        .unwrap_or(false)
                    {
                        return None;
                    }
                }
                Some(host)
            }
            NodeKind::Document { browsing_context } => {
                if &*event.event_type() == "load" || !browsing_context {
                    None
                } else {
                    global.cloned()
                }
            }
        }
    }

    fn is_node(&self, target: &Rc<EventTarget>) -> bool {
        self.nodes.borrow().contains_key(&target.id())
    }

    fn is_shadow_root(&self, target: &Rc<EventTarget>) -> bool {
        self.shadow_root_mode(target).is_some()
    }

    fn shadow_root_mode(&self, target: &Rc<EventTarget>) -> Option<ShadowRootMode> {
        self.with_node(target, |node| match node.kind {
            NodeKind::ShadowRoot { mode, .. } => Some(mode),
            _ => None,
        })
        .flatten()
    }

    fn root(&self, target: &Rc<EventTarget>) -> Option<Rc<EventTarget>> {
        if !self.is_node(target) {
            return None;
        }
        let mut current = Rc::clone(target);
        while let Some(parent) = self.parent_node(&current) {
            current = parent;
        }
        Some(current)
    }

    fn parent_node(&self, target: &Rc<EventTarget>) -> Option<Rc<EventTarget>> {
        self.with_node(target, |node| node.parent.clone()).flatten()
    }

    fn host(&self, shadow_root: &Rc<EventTarget>) -> Option<Rc<EventTarget>> {
        self.with_node(shadow_root, |node| match &node.kind {
            NodeKind::ShadowRoot { host, .. } => Some(Rc::clone(host)),
            _ => None,
        })
        .flatten()
    }

    fn is_assigned_slottable(&self, target: &Rc<EventTarget>) -> bool {
        self.with_node(target, |node| node.assigned_slot.is_some())
            .unwrap_or(false)
    }

    fn associated_document(&self, target: &Rc<EventTarget>) -> Option<Rc<EventTarget>> {
        self.documents.borrow().get(&target.id()).cloned()
    }

    fn has_activation_behavior(&self, target: &Rc<EventTarget>) -> bool {
        self.activation(target).is_some()
    }

    fn activation_behavior(&self, realm: &mut Realm, target: &Rc<EventTarget>, event: &Rc<Event>) {
        if let Some(behavior) = self.activation(target) {
            (behavior.activate)(realm, target, event);
        }
    }

    fn legacy_pre_activation_behavior(&self, realm: &mut Realm, target: &Rc<EventTarget>) {
        if let Some(hook) = self
            .activation(target)
            .and_then(|behavior| behavior.legacy_pre_activation)
        {
            hook(realm, target);
        }
    }

    fn legacy_canceled_activation_behavior(&self, realm: &mut Realm, target: &Rc<EventTarget>) {
        if let Some(hook) = self
            .activation(target)
            .and_then(|behavior| behavior.legacy_canceled_activation)
        {
            hook(realm, target);
        }
    }
}
