//! Binary prefix trie over 64-bit keys.
//!
//! Each registered prefix lives on the node reached by walking its top
//! `width` bits, most significant first. A lookup follows the key as far as
//! the trie goes and returns the deepest prefix seen on the way, so the cost
//! is bounded by the key width and never by the number of entries.
//!
//! Nodes live in a single arena and are referenced by index. Nodes emptied
//! by `remove` are pruned and recycled, so a trie that is filled and drained
//! repeatedly stops allocating once it has seen its peak shape.

/// Number of bits in a key.
pub const MAX_BITS: u8 = 64;

const ROOT: u32 = 0;

/// Handle to a registered prefix, returned by [`PrefixTrie::insert`].
///
/// A handle stays valid until the prefix is removed. Using it afterwards is
/// a caller bug: the node may already carry a different prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHandle(u32);

#[derive(Debug)]
struct Leaf<V> {
    key: u64,
    width: u8,
    value: V,
}

#[derive(Debug)]
struct Node<V> {
    parent: u32,
    children: [Option<u32>; 2],
    leaf: Option<Leaf<V>>,
}

impl<V> Node<V> {
    fn empty(parent: u32) -> Self {
        Self {
            parent,
            children: [None, None],
            leaf: None,
        }
    }

    fn is_prunable(&self) -> bool {
        self.leaf.is_none() && self.children.iter().all(Option::is_none)
    }
}

#[inline(always)]
fn bit_at(key: u64, depth: u8) -> usize {
    ((key >> (MAX_BITS - 1 - depth)) & 1) as usize
}

#[derive(Debug)]
pub struct PrefixTrie<V> {
    nodes: Vec<Node<V>>,
    free_nodes: Vec<u32>,
    len: usize,
}

impl<V> Default for PrefixTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> PrefixTrie<V> {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::empty(ROOT)],
            free_nodes: Vec::new(),
            len: 0,
        }
    }

    /// Number of registered prefixes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Nodes currently linked into the trie, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_nodes.len()
    }

    /// Register `value` under the top `width` bits of `key`.
    ///
    /// The prefix must not already be registered; checking that is up to
    /// the caller.
    pub fn insert(&mut self, key: u64, width: u8, value: V) -> IndexHandle {
        assert!(width <= MAX_BITS, "prefix width {width} exceeds {MAX_BITS} bits");

        let mut node = ROOT;
        for depth in 0..width {
            let bit = bit_at(key, depth);
            node = match self.nodes[node as usize].children[bit] {
                Some(child) => child,
                None => {
                    let child = self.alloc(node);
                    self.nodes[node as usize].children[bit] = Some(child);
                    child
                }
            };
        }

        let slot = &mut self.nodes[node as usize].leaf;
        debug_assert!(slot.is_none(), "prefix {key:#x}/{width} registered twice");
        if slot.replace(Leaf { key, width, value }).is_none() {
            self.len += 1;
        }
        IndexHandle(node)
    }

    /// Longest registered prefix covering `key`.
    pub fn lookup(&self, key: u64) -> Option<&V> {
        let mut node = &self.nodes[ROOT as usize];
        let mut best = node.leaf.as_ref();
        for depth in 0..MAX_BITS {
            let Some(child) = node.children[bit_at(key, depth)] else {
                break;
            };
            node = &self.nodes[child as usize];
            if node.leaf.is_some() {
                best = node.leaf.as_ref();
            }
        }
        best.map(|leaf| &leaf.value)
    }

    /// Prefix (key, width) registered under `handle`.
    pub fn prefix(&self, handle: IndexHandle) -> Option<(u64, u8)> {
        self.nodes
            .get(handle.0 as usize)?
            .leaf
            .as_ref()
            .map(|leaf| (leaf.key, leaf.width))
    }

    /// Unregister the prefix behind `handle` and return its value.
    pub fn remove(&mut self, handle: IndexHandle) -> Option<V> {
        let mut node = handle.0;
        let leaf = self.nodes.get_mut(node as usize)?.leaf.take()?;
        self.len -= 1;

        while node != ROOT && self.nodes[node as usize].is_prunable() {
            let parent = self.nodes[node as usize].parent;
            for child in self.nodes[parent as usize].children.iter_mut() {
                if *child == Some(node) {
                    *child = None;
                }
            }
            self.free_nodes.push(node);
            node = parent;
        }

        Some(leaf.value)
    }

    fn alloc(&mut self, parent: u32) -> u32 {
        if let Some(id) = self.free_nodes.pop() {
            self.nodes[id as usize] = Node::empty(parent);
            return id;
        }
        self.nodes.push(Node::empty(parent));
        (self.nodes.len() - 1) as u32
    }
}
