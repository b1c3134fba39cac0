// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Protocol graph.
//!
//! A packet travels through the stack as a [Messenger] handed from conduit to conduit. Every conduit has an `A` side
//! (towards the link) and a `B` side (towards the sockets). Four kinds of conduits exist:
//!
//! - a `Protocol` is a 1:1 stage that applies its receiver and forwards to the side opposite the sender;
//! - an `Adapter` is a dead end on its `B` side, used for the socket end of a path;
//! - a `Mux` demultiplexes towards `B` by a key extracted from the messenger by its [Accessor];
//! - a `Factory` belongs to a mux and either answers for a missing child or synthesizes one from a [Template].
//!
//! Conduits live in a slab arena and refer to each other by [ConduitId]. Receivers are small `Copy` handles that a
//! [Dispatcher] resolves into the state that actually processes the packet, so a traversal never needs to borrow the
//! graph and the protocol state at the same time.

pub mod messenger;

//======================================================================================================================
// Imports
//======================================================================================================================

use self::messenger::Messenger;
use ::libc::EADDRINUSE;
use ::slab::Slab;
use ::std::collections::BTreeMap;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Key under which a mux keeps its fallback child.
pub const DEFAULT_KEY: MuxKey = 0;

//======================================================================================================================
// Structures
//======================================================================================================================

pub type MuxKey = u64;

/// Handle to a conduit in a [ConduitGraph].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConduitId(usize);

/// Extracts the demultiplexing key of a mux from a messenger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accessor {
    Scope,
    Type,
    LocalAddress,
    RemoteAddress,
    LocalPort,
    RemotePort,
}

/// Shape of the conduits that a factory synthesizes for a missing key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Template {
    /// A mux whose own factory carries the nested template.
    Mux(Accessor, Box<Template>),
    /// The leaf protocol of a path. Only an installer can synthesize one, using its leaf receiver.
    Protocol,
}

/// Traversal policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Visitor<R> {
    /// Keyed lookup only.
    Plain,
    /// Keyed lookup falling back to the default key on a miss.
    Transporter,
    /// Every child of a mux is visited.
    Broadcast,
    /// Builds the missing part of a path and binds `leaf` to the new leaf protocol and `endpoint` to its adapter.
    Installer {
        leaf: Option<R>,
        endpoint: Option<R>,
        installed: Option<ConduitId>,
        errno: i32,
    },
    /// Detaches the leaf protocol at the end of a keyed path.
    Uninstaller { detached: Option<ConduitId> },
}

/// Applies the receiver bound to a conduit. Returning false stops the traversal at that conduit.
pub trait Dispatcher<R> {
    fn apply(&mut self, conduit: ConduitId, receiver: R, m: &mut Messenger) -> bool;
}

enum Node<R> {
    Protocol {
        receiver: Option<R>,
    },
    Adapter {
        receiver: Option<R>,
    },
    Mux {
        accessor: Accessor,
        children: BTreeMap<MuxKey, ConduitId>,
        factory: ConduitId,
    },
    Factory {
        template: Option<Template>,
        receiver: Option<R>,
    },
}

struct Conduit<R> {
    name: &'static str,
    side_a: Option<ConduitId>,
    side_b: Option<ConduitId>,
    node: Node<R>,
}

pub struct ConduitGraph<R> {
    conduits: Slab<Conduit<R>>,
}

enum Shape<R> {
    Protocol(Option<R>),
    Adapter(Option<R>),
    Mux,
    Factory,
}

enum FactoryOutcome {
    Created,
    Declined(bool),
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Accessor {
    pub fn key(&self, m: &Messenger) -> MuxKey {
        match self {
            Accessor::Scope => m.get_scope_id() as MuxKey,
            Accessor::Type => m.get_type() as MuxKey,
            Accessor::LocalAddress => m.get_local().map_or(DEFAULT_KEY, |a| u32::from(a) as MuxKey),
            Accessor::RemoteAddress => m.get_remote().map_or(DEFAULT_KEY, |a| u32::from(a) as MuxKey),
            Accessor::LocalPort => m.get_local_port() as MuxKey,
            Accessor::RemotePort => m.get_remote_port() as MuxKey,
        }
    }
}

impl<R> Visitor<R> {
    pub fn installer(leaf: R, endpoint: Option<R>) -> Self {
        Visitor::Installer {
            leaf: Some(leaf),
            endpoint,
            installed: None,
            errno: 0,
        }
    }

    pub fn uninstaller() -> Self {
        Visitor::Uninstaller { detached: None }
    }

    /// Leaf protocol created by an installer, or detached by an uninstaller.
    pub fn get_conduit(&self) -> Option<ConduitId> {
        match self {
            Visitor::Installer { installed, .. } => *installed,
            Visitor::Uninstaller { detached } => *detached,
            _ => None,
        }
    }

    pub fn get_errno(&self) -> i32 {
        match self {
            Visitor::Installer { errno, .. } => *errno,
            _ => 0,
        }
    }
}

impl<R: Copy> ConduitGraph<R> {
    pub fn new() -> Self {
        Self { conduits: Slab::new() }
    }

    pub fn add_protocol(&mut self, name: &'static str, receiver: Option<R>) -> ConduitId {
        self.insert(name, Node::Protocol { receiver })
    }

    pub fn add_adapter(&mut self, name: &'static str, receiver: Option<R>) -> ConduitId {
        self.insert(name, Node::Adapter { receiver })
    }

    /// Creates a mux together with its factory. `factory_receiver` answers for keys without a child.
    pub fn add_mux(
        &mut self,
        name: &'static str,
        accessor: Accessor,
        template: Option<Template>,
        factory_receiver: Option<R>,
    ) -> ConduitId {
        let factory: ConduitId = self.insert(
            name,
            Node::Factory {
                template,
                receiver: factory_receiver,
            },
        );
        let mux: ConduitId = self.insert(
            name,
            Node::Mux {
                accessor,
                children: BTreeMap::new(),
                factory,
            },
        );
        self.conduit_mut(factory).side_a = Some(mux);
        mux
    }

    fn insert(&mut self, name: &'static str, node: Node<R>) -> ConduitId {
        ConduitId(self.conduits.insert(Conduit {
            name,
            side_a: None,
            side_b: None,
            node,
        }))
    }

    fn conduit(&self, id: ConduitId) -> &Conduit<R> {
        &self.conduits[id.0]
    }

    fn conduit_mut(&mut self, id: ConduitId) -> &mut Conduit<R> {
        &mut self.conduits[id.0]
    }

    pub fn contains(&self, id: ConduitId) -> bool {
        self.conduits.contains(id.0)
    }

    pub fn len(&self) -> usize {
        self.conduits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conduits.is_empty()
    }

    pub fn get_name(&self, id: ConduitId) -> &'static str {
        self.conduit(id).name
    }

    pub fn get_a(&self, id: ConduitId) -> Option<ConduitId> {
        self.conduit(id).side_a
    }

    /// Side `B` of a protocol or adapter. Muxes reach their children by key instead.
    pub fn get_b(&self, id: ConduitId) -> Option<ConduitId> {
        self.conduit(id).side_b
    }

    pub fn get_receiver(&self, id: ConduitId) -> Option<R> {
        match &self.conduit(id).node {
            Node::Protocol { receiver } | Node::Adapter { receiver } | Node::Factory { receiver, .. } => *receiver,
            Node::Mux { .. } => None,
        }
    }

    pub fn set_receiver(&mut self, id: ConduitId, new: Option<R>) {
        match &mut self.conduit_mut(id).node {
            Node::Protocol { receiver } | Node::Adapter { receiver } | Node::Factory { receiver, .. } => {
                *receiver = new
            },
            Node::Mux { factory, .. } => {
                let factory: ConduitId = *factory;
                self.set_receiver(factory, new);
            },
        }
    }

    /// Child of `mux` under `key`.
    pub fn get_child(&self, mux: ConduitId, key: MuxKey) -> Option<ConduitId> {
        match &self.conduit(mux).node {
            Node::Mux { children, .. } => children.get(&key).copied(),
            _ => None,
        }
    }

    /// Children of `mux` in key order.
    pub fn children(&self, mux: ConduitId) -> Vec<(MuxKey, ConduitId)> {
        match &self.conduit(mux).node {
            Node::Mux { children, .. } => children.iter().map(|(k, v)| (*k, *v)).collect(),
            _ => Vec::new(),
        }
    }

    fn attach_b(&mut self, x: ConduitId, y: ConduitId, key: MuxKey) {
        match &mut self.conduit_mut(x).node {
            Node::Mux { children, .. } => {
                children.insert(key, y);
            },
            _ => self.conduit_mut(x).side_b = Some(y),
        }
    }

    /// Joins the `A` sides of `x` and `y`.
    pub fn connect_aa(&mut self, x: ConduitId, y: ConduitId) {
        self.conduit_mut(x).side_a = Some(y);
        self.conduit_mut(y).side_a = Some(x);
    }

    /// Joins side `B` of `x` to side `A` of `y`. `key` is used when `x` is a mux.
    pub fn connect_ba(&mut self, x: ConduitId, y: ConduitId, key: MuxKey) {
        self.attach_b(x, y, key);
        self.conduit_mut(y).side_a = Some(x);
    }

    /// Joins side `A` of `x` to side `B` of `y`. `key` is used when `y` is a mux.
    pub fn connect_ab(&mut self, x: ConduitId, y: ConduitId, key: MuxKey) {
        self.connect_ba(y, x, key);
    }

    /// Joins the `B` sides of `x` and `y`.
    pub fn connect_bb(&mut self, x: ConduitId, y: ConduitId, key_x: MuxKey, key_y: MuxKey) {
        self.attach_b(x, y, key_y);
        self.attach_b(y, x, key_x);
    }

    /// Detaches the child of `mux` under `key`.
    pub fn remove_b(&mut self, mux: ConduitId, key: MuxKey) -> Option<ConduitId> {
        let child: ConduitId = match &mut self.conduit_mut(mux).node {
            Node::Mux { children, .. } => children.remove(&key)?,
            _ => return None,
        };
        if self.contains(child) && self.conduit(child).side_a == Some(mux) {
            self.conduit_mut(child).side_a = None;
        }
        Some(child)
    }

    /// Frees `id` and everything reachable through its `B` side.
    pub fn remove_subtree(&mut self, id: ConduitId) {
        if !self.contains(id) {
            return;
        }
        let conduit: Conduit<R> = self.conduits.remove(id.0);
        match conduit.node {
            Node::Mux { children, factory, .. } => {
                if self.contains(factory) {
                    self.conduits.remove(factory.0);
                }
                for (_, child) in children {
                    self.remove_subtree(child);
                }
            },
            _ => {
                if let Some(b) = conduit.side_b {
                    self.remove_subtree(b);
                }
            },
        }
    }

    /// Walks up from `mux`, freeing muxes that were synthesized by a factory and have no children left.
    pub fn prune(&mut self, mut mux: ConduitId) {
        while self.contains(mux) {
            let empty: bool = matches!(&self.conduit(mux).node, Node::Mux { children, .. } if children.is_empty());
            let parent: ConduitId = match self.conduit(mux).side_a {
                Some(parent) if empty && matches!(self.conduit(parent).node, Node::Mux { .. }) => parent,
                _ => return,
            };
            let key: Option<MuxKey> = self
                .children(parent)
                .into_iter()
                .find(|(_, child)| *child == mux)
                .map(|(key, _)| key);
            match key {
                Some(key) => {
                    self.remove_b(parent, key);
                    self.remove_subtree(mux);
                },
                None => return,
            }
            mux = parent;
        }
    }

    /// Delivers `m` to `at`, which received it from `sender`. Returns true if a receiver consumed the messenger.
    pub fn accept(
        &mut self,
        at: ConduitId,
        sender: Option<ConduitId>,
        v: &mut Visitor<R>,
        m: &mut Messenger,
        d: &mut dyn Dispatcher<R>,
    ) -> bool {
        if !self.contains(at) {
            return false;
        }
        let (side_a, side_b, shape) = {
            let c: &Conduit<R> = self.conduit(at);
            let shape: Shape<R> = match &c.node {
                Node::Protocol { receiver } => Shape::Protocol(*receiver),
                Node::Adapter { receiver } => Shape::Adapter(*receiver),
                Node::Mux { .. } => Shape::Mux,
                Node::Factory { .. } => Shape::Factory,
            };
            (c.side_a, c.side_b, shape)
        };
        match shape {
            Shape::Protocol(receiver) => {
                if !self.at_protocol(at, sender, receiver, v, m, d) {
                    return true;
                }
                let to: Option<ConduitId> = if sender == side_b {
                    side_a
                } else {
                    side_b
                };
                match to {
                    Some(to) => self.accept(to, Some(at), v, m, d),
                    None => true,
                }
            },
            Shape::Adapter(receiver) => {
                if !self.at_leaf(at, receiver, v, m, d) {
                    return true;
                }
                match side_a {
                    Some(a) if sender != side_a => self.accept(a, Some(at), v, m, d),
                    _ => true,
                }
            },
            Shape::Mux => {
                if sender.is_some() && sender == side_a {
                    self.to_b(at, v, m, d)
                } else {
                    match side_a {
                        Some(a) => self.accept(a, Some(at), v, m, d),
                        None => true,
                    }
                }
            },
            Shape::Factory => false,
        }
    }

    fn at_protocol(
        &mut self,
        at: ConduitId,
        sender: Option<ConduitId>,
        receiver: Option<R>,
        v: &mut Visitor<R>,
        m: &mut Messenger,
        d: &mut dyn Dispatcher<R>,
    ) -> bool {
        let below_mux: bool =
            sender.is_some() && sender == self.conduit(at).side_a && self.is_mux(sender.unwrap_or(at));
        match v {
            Visitor::Installer { installed, errno, .. } if below_mux => {
                if *installed != Some(at) {
                    *errno = EADDRINUSE;
                }
                false
            },
            Visitor::Uninstaller { detached } if below_mux => {
                if let Some(parent) = sender {
                    let key: Option<MuxKey> = self
                        .children(parent)
                        .into_iter()
                        .find(|(_, child)| *child == at)
                        .map(|(key, _)| key);
                    if let Some(key) = key {
                        self.remove_b(parent, key);
                        *detached = Some(at);
                    }
                }
                false
            },
            Visitor::Installer { .. } | Visitor::Uninstaller { .. } => true,
            _ => self.at_leaf(at, receiver, v, m, d),
        }
    }

    fn at_leaf(
        &mut self,
        at: ConduitId,
        receiver: Option<R>,
        v: &mut Visitor<R>,
        m: &mut Messenger,
        d: &mut dyn Dispatcher<R>,
    ) -> bool {
        match v {
            Visitor::Installer { .. } | Visitor::Uninstaller { .. } => true,
            _ => match receiver {
                Some(receiver) => d.apply(at, receiver, m),
                None => true,
            },
        }
    }

    fn is_mux(&self, id: ConduitId) -> bool {
        matches!(self.conduit(id).node, Node::Mux { .. })
    }

    fn to_b(&mut self, mux: ConduitId, v: &mut Visitor<R>, m: &mut Messenger, d: &mut dyn Dispatcher<R>) -> bool {
        let (accessor, factory) = match &self.conduit(mux).node {
            Node::Mux { accessor, factory, .. } => (*accessor, *factory),
            _ => return false,
        };

        if let Visitor::Broadcast = v {
            let position: usize = m.get_position();
            for (_, child) in self.children(mux) {
                m.set_position(position);
                self.accept(child, Some(mux), v, m, d);
            }
            return true;
        }

        let key: MuxKey = accessor.key(m);
        let mut created: bool = false;
        loop {
            if let Some(child) = self.get_child(mux, key) {
                if self.accept(child, Some(mux), v, m, d) {
                    return true;
                }
            }
            if let Visitor::Transporter = v {
                if key != DEFAULT_KEY {
                    if let Some(child) = self.get_child(mux, DEFAULT_KEY) {
                        if self.accept(child, Some(mux), v, m, d) {
                            return true;
                        }
                    }
                }
            }
            if created {
                return false;
            }
            match self.at_factory(factory, mux, key, v, m, d) {
                FactoryOutcome::Created => created = true,
                FactoryOutcome::Declined(consumed) => return consumed,
            }
        }
    }

    fn at_factory(
        &mut self,
        factory: ConduitId,
        mux: ConduitId,
        key: MuxKey,
        v: &mut Visitor<R>,
        m: &mut Messenger,
        d: &mut dyn Dispatcher<R>,
    ) -> FactoryOutcome {
        let (template, receiver) = match &self.conduit(factory).node {
            Node::Factory { template, receiver } => (template.clone(), *receiver),
            _ => return FactoryOutcome::Declined(false),
        };
        match v {
            Visitor::Installer {
                leaf,
                endpoint,
                installed,
                ..
            } => {
                let child: ConduitId = match template {
                    Some(Template::Mux(accessor, nested)) => {
                        let name: &'static str = self.conduit(mux).name;
                        self.add_mux(name, accessor, Some(*nested), None)
                    },
                    Some(Template::Protocol) => match leaf.take() {
                        Some(leaf) => {
                            let protocol: ConduitId = self.add_protocol("leaf", Some(leaf));
                            if let Some(endpoint) = endpoint.take() {
                                let adapter: ConduitId = self.add_adapter("endpoint", Some(endpoint));
                                self.connect_ba(protocol, adapter, DEFAULT_KEY);
                            }
                            *installed = Some(protocol);
                            protocol
                        },
                        None => return FactoryOutcome::Declined(false),
                    },
                    None => return FactoryOutcome::Declined(false),
                };
                self.connect_ab(child, mux, key);
                FactoryOutcome::Created
            },
            Visitor::Uninstaller { .. } => FactoryOutcome::Declined(false),
            _ => {
                if let Some(receiver) = receiver {
                    d.apply(factory, receiver, m);
                    return FactoryOutcome::Declined(true);
                }
                FactoryOutcome::Declined(false)
            },
        }
    }
}

impl<R: Copy> Default for ConduitGraph<R> {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        messenger::Messenger,
        Accessor,
        ConduitGraph,
        ConduitId,
        Dispatcher,
        Template,
        Visitor,
        DEFAULT_KEY,
    };
    use ::anyhow::Result;
    use ::libc::EADDRINUSE;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Tag {
        Top,
        Leaf(u32),
        Socket(u32),
        Unbound,
    }

    #[derive(Default)]
    struct Recorder {
        trace: Vec<Tag>,
        stop_at: Option<Tag>,
    }

    impl Dispatcher<Tag> for Recorder {
        fn apply(&mut self, _conduit: ConduitId, receiver: Tag, _m: &mut Messenger) -> bool {
            self.trace.push(receiver);
            self.stop_at != Some(receiver)
        }
    }

    struct Chain {
        graph: ConduitGraph<Tag>,
        top: ConduitId,
        port_mux: ConduitId,
    }

    /// top -> port mux -> remote port mux -> leaf protocol -> socket adapter.
    fn chain() -> Chain {
        let mut graph: ConduitGraph<Tag> = ConduitGraph::new();
        let top: ConduitId = graph.add_protocol("top", Some(Tag::Top));
        let port_mux: ConduitId = graph.add_mux(
            "local port",
            Accessor::LocalPort,
            Some(Template::Mux(Accessor::RemotePort, Box::new(Template::Protocol))),
            Some(Tag::Unbound),
        );
        graph.connect_ba(top, port_mux, DEFAULT_KEY);
        Chain { graph, top, port_mux }
    }

    fn install(c: &mut Chain, local_port: u16, remote_port: u16, id: u32) -> Visitor<Tag> {
        let mut m: Messenger = Messenger::new_output(&[], 0);
        m.set_local_port(local_port);
        m.set_remote_port(remote_port);
        let mut v: Visitor<Tag> = Visitor::installer(Tag::Leaf(id), Some(Tag::Socket(id)));
        let mut d: Recorder = Recorder::default();
        c.graph.accept(c.port_mux, Some(c.top), &mut v, &mut m, &mut d);
        v
    }

    fn deliver(c: &mut Chain, local_port: u16, remote_port: u16, mut v: Visitor<Tag>) -> (bool, Vec<Tag>) {
        let mut m: Messenger = Messenger::new_input(vec![0; 4], 2);
        m.set_local_port(local_port);
        m.set_remote_port(remote_port);
        let mut d: Recorder = Recorder::default();
        let consumed: bool = c.graph.accept(c.top, None, &mut v, &mut m, &mut d);
        (consumed, d.trace)
    }

    #[test]
    fn installer_builds_path_once() -> Result<()> {
        let mut c: Chain = chain();
        let v: Visitor<Tag> = install(&mut c, 80, 0, 1);
        crate::ensure_eq!(v.get_errno(), 0);
        crate::ensure_eq!(v.get_conduit().is_some(), true);

        let again: Visitor<Tag> = install(&mut c, 80, 0, 2);
        crate::ensure_eq!(again.get_errno(), EADDRINUSE);
        Ok(())
    }

    #[test]
    fn transporter_falls_back_to_default_key() -> Result<()> {
        let mut c: Chain = chain();
        install(&mut c, 80, 0, 1);
        install(&mut c, 80, 4000, 2);

        let (consumed, trace) = deliver(&mut c, 80, 4000, Visitor::Transporter);
        crate::ensure_eq!(consumed, true);
        crate::ensure_eq!(trace, vec![Tag::Top, Tag::Leaf(2), Tag::Socket(2)]);

        let (consumed, trace) = deliver(&mut c, 80, 5000, Visitor::Transporter);
        crate::ensure_eq!(consumed, true);
        crate::ensure_eq!(trace, vec![Tag::Top, Tag::Leaf(1), Tag::Socket(1)]);
        Ok(())
    }

    #[test]
    fn plain_visitor_skips_default_key() -> Result<()> {
        let mut c: Chain = chain();
        install(&mut c, 80, 0, 1);
        let (consumed, trace) = deliver(&mut c, 80, 5000, Visitor::Plain);
        crate::ensure_eq!(consumed, true);
        crate::ensure_eq!(trace, vec![Tag::Top, Tag::Unbound]);
        Ok(())
    }

    #[test]
    fn factory_receiver_answers_unknown_keys() -> Result<()> {
        let mut c: Chain = chain();
        let (consumed, trace) = deliver(&mut c, 9, 1, Visitor::Transporter);
        crate::ensure_eq!(consumed, true);
        crate::ensure_eq!(trace, vec![Tag::Top, Tag::Unbound]);
        Ok(())
    }

    #[test]
    fn stop_halts_forwarding() -> Result<()> {
        let mut c: Chain = chain();
        install(&mut c, 80, 0, 1);
        let mut m: Messenger = Messenger::new_input(vec![0; 4], 2);
        m.set_local_port(80);
        let mut d: Recorder = Recorder {
            trace: Vec::new(),
            stop_at: Some(Tag::Leaf(1)),
        };
        let consumed: bool = c.graph.accept(c.top, None, &mut Visitor::Transporter, &mut m, &mut d);
        crate::ensure_eq!(consumed, true);
        crate::ensure_eq!(d.trace, vec![Tag::Top, Tag::Leaf(1)]);
        Ok(())
    }

    #[test]
    fn output_travels_from_socket_to_top() -> Result<()> {
        let mut c: Chain = chain();
        let v: Visitor<Tag> = install(&mut c, 80, 4000, 1);
        let leaf: ConduitId = v.get_conduit().ok_or(anyhow::anyhow!("no leaf"))?;
        let adapter: ConduitId = c.graph.get_b(leaf).ok_or(anyhow::anyhow!("no adapter"))?;
        let mut m: Messenger = Messenger::new_output(b"x", 0);
        let mut d: Recorder = Recorder::default();
        c.graph.accept(adapter, None, &mut Visitor::Plain, &mut m, &mut d);
        crate::ensure_eq!(d.trace, vec![Tag::Socket(1), Tag::Leaf(1), Tag::Top]);
        Ok(())
    }

    #[test]
    fn broadcast_reaches_every_child() -> Result<()> {
        let mut c: Chain = chain();
        install(&mut c, 80, 0, 1);
        install(&mut c, 81, 0, 2);
        let mut m: Messenger = Messenger::new_input(vec![0; 4], 2);
        let mut d: Recorder = Recorder::default();
        let top: ConduitId = c.top;
        c.graph.accept(top, None, &mut Visitor::Broadcast, &mut m, &mut d);
        crate::ensure_eq!(d.trace.contains(&Tag::Socket(1)), true);
        crate::ensure_eq!(d.trace.contains(&Tag::Socket(2)), true);
        Ok(())
    }

    #[test]
    fn uninstaller_detaches_and_prunes() -> Result<()> {
        let mut c: Chain = chain();
        let before: usize = c.graph.len();
        let installed: ConduitId = install(&mut c, 80, 4000, 1)
            .get_conduit()
            .ok_or(anyhow::anyhow!("nothing installed"))?;
        let parent: ConduitId = c.graph.get_a(installed).ok_or(anyhow::anyhow!("leaf has no parent"))?;
        let mut m: Messenger = Messenger::new_output(&[], 0);
        m.set_local_port(80);
        m.set_remote_port(4000);
        let mut v: Visitor<Tag> = Visitor::uninstaller();
        let mut d: Recorder = Recorder::default();
        let port_mux: ConduitId = c.port_mux;
        c.graph.accept(port_mux, Some(c.top), &mut v, &mut m, &mut d);
        let leaf: ConduitId = v.get_conduit().ok_or(anyhow::anyhow!("nothing detached"))?;
        crate::ensure_eq!(leaf, installed);
        c.graph.remove_subtree(leaf);
        c.graph.prune(parent);
        crate::ensure_eq!(c.graph.get_child(port_mux, 80), None);
        crate::ensure_eq!(c.graph.len(), before);
        Ok(())
    }
}
