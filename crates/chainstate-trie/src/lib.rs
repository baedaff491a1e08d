//! Authenticated Merkle-Patricia trie with transactional batching.
//!
//! Nibble-path addressing, hex-prefix encoding, and recursive keccak256
//! hashing follow the classic Ethereum MPT design. [`BatchTrie`] adds a
//! batch overlay on top: `put`/`delete` issued between `begin_batch()` and
//! `commit()` are buffered in memory and only folded into the node tree
//! (and persisted to the backing [`Storage`]) on `commit()`; `rollback()`
//! discards them untouched.
//!
//! Node children are held behind `Arc` rather than `Box`, so cloning a trie
//! (as `AccountState::try_clone` does for every dirty account) shares the
//! existing node tree instead of deep-copying it; a clone only pays to
//! materialize its own copy of a subtree the moment it diverges from the
//! original by mutating it.

pub mod error;

pub use error::{Result, TrieError};

use chainstate_crypto::{keccak256, Hash, EMPTY_HASH};
use chainstate_storage::{Storage, WriteOp};
use std::collections::HashMap;
use std::sync::Arc;

/// Node types in the MPT. `Extension` and `Branch` reference their children
/// through `Arc` so a clone of the enclosing trie can share subtrees instead
/// of copying them.
#[derive(Clone, Debug)]
enum TrieNode {
    /// Empty node (no children).
    Empty,
    /// Leaf node: remainder of key path + value.
    Leaf { nibbles: Vec<u8>, value: Vec<u8> },
    /// Extension node: shared prefix + pointer to child.
    Extension { nibbles: Vec<u8>, child: Arc<TrieNode> },
    /// Branch node: 16 children (one per nibble) + optional value.
    Branch {
        children: Arc<[Option<Arc<TrieNode>>; 16]>,
        value: Option<Vec<u8>>,
    },
}

impl Default for TrieNode {
    fn default() -> Self {
        TrieNode::Empty
    }
}

/// Takes an owned node out of a possibly-shared `Arc`, cloning the node only
/// if another trie still holds a reference to it. The copy-on-write half of
/// the structural-sharing scheme: a uniquely-owned subtree moves for free,
/// a shared one pays for exactly the nodes that end up changing.
fn unshare(node: Arc<TrieNode>) -> TrieNode {
    Arc::try_unwrap(node).unwrap_or_else(|shared| (*shared).clone())
}

/// Convert key bytes to nibbles (each byte becomes two nibbles).
fn bytes_to_nibbles(data: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(data.len() * 2);
    for byte in data {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    nibbles
}

/// Nibbles back to bytes. Only valid for even-length, byte-aligned paths;
/// every key that enters the trie through `bytes_to_nibbles` satisfies this.
fn nibbles_to_bytes(nibbles: &[u8]) -> Vec<u8> {
    nibbles
        .chunks(2)
        .map(|c| (c[0] << 4) | c.get(1).copied().unwrap_or(0))
        .collect()
}

/// Length of the longest common prefix shared by two nibble paths.
fn shared_nibble_count(a: &[u8], b: &[u8]) -> usize {
    let mut count = 0;
    while count < a.len() && count < b.len() && a[count] == b[count] {
        count += 1;
    }
    count
}

/// Hex-prefix encode a nibble path into whole bytes (compact encoding per
/// the Ethereum Yellow Paper). The path is prefixed with a flag nibble
/// (terminator bit for leaves, parity bit for odd-length paths) and, for
/// even-length paths, a padding nibble, so the combined sequence always
/// packs into an exact number of bytes.
fn hex_prefix_encode(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
    let terminator = if is_leaf { 2u8 } else { 0u8 };
    let odd_length = nibbles.len() % 2 == 1;
    let flag = terminator + odd_length as u8;

    let mut prefixed = Vec::with_capacity(nibbles.len() + 2);
    prefixed.push(flag);
    if !odd_length {
        prefixed.push(0);
    }
    prefixed.extend_from_slice(nibbles);

    prefixed.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect()
}

fn encode_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

fn decode_bytes(data: &[u8], cursor: &mut usize) -> Result<Vec<u8>> {
    if data.len() < *cursor + 4 {
        return Err(TrieError::InvalidTrieNode);
    }
    let len = u32::from_be_bytes(data[*cursor..*cursor + 4].try_into().unwrap()) as usize;
    *cursor += 4;
    if data.len() < *cursor + len {
        return Err(TrieError::InvalidTrieNode);
    }
    let bytes = data[*cursor..*cursor + len].to_vec();
    *cursor += len;
    Ok(bytes)
}

impl TrieNode {
    /// Recursive Merkle hash of this node.
    fn hash(&self) -> Hash {
        match self {
            TrieNode::Empty => EMPTY_HASH,
            TrieNode::Leaf { nibbles, value } => {
                let mut preimage = hex_prefix_encode(nibbles, true);
                preimage.extend_from_slice(value);
                keccak256(&preimage)
            }
            TrieNode::Extension { nibbles, child } => {
                let mut preimage = hex_prefix_encode(nibbles, false);
                preimage.extend_from_slice(&child.hash());
                keccak256(&preimage)
            }
            TrieNode::Branch { children, value } => {
                let mut preimage: Vec<u8> = children
                    .iter()
                    .flat_map(|slot| match slot {
                        Some(node) => node.hash(),
                        None => EMPTY_HASH,
                    })
                    .collect();
                if let Some(val) = value {
                    preimage.extend_from_slice(val);
                }
                keccak256(&preimage)
            }
        }
    }

    /// Own on-disk encoding: children are referenced by hash, not inlined,
    /// so a node can be persisted and reloaded independently of its subtree.
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            TrieNode::Empty => buf.push(0),
            TrieNode::Leaf { nibbles, value } => {
                buf.push(1);
                encode_bytes(&mut buf, nibbles);
                encode_bytes(&mut buf, value);
            }
            TrieNode::Extension { nibbles, child } => {
                buf.push(2);
                encode_bytes(&mut buf, nibbles);
                buf.extend_from_slice(&child.hash());
            }
            TrieNode::Branch { children, value } => {
                buf.push(3);
                for child in children.iter() {
                    match child {
                        Some(node) => {
                            buf.push(1);
                            buf.extend_from_slice(&node.hash());
                        }
                        None => buf.push(0),
                    }
                }
                match value {
                    Some(v) => {
                        buf.push(1);
                        encode_bytes(&mut buf, v);
                    }
                    None => buf.push(0),
                }
            }
        }
        buf
    }

    /// Decode a node, recursively loading child subtrees from `storage` by
    /// hash reference.
    fn decode(data: &[u8], storage: &dyn Storage) -> Result<TrieNode> {
        if data.is_empty() {
            return Err(TrieError::InvalidTrieNode);
        }
        let tag = data[0];
        let mut cursor = 1usize;
        match tag {
            0 => Ok(TrieNode::Empty),
            1 => {
                let nibbles = decode_bytes(data, &mut cursor)?;
                let value = decode_bytes(data, &mut cursor)?;
                Ok(TrieNode::Leaf { nibbles, value })
            }
            2 => {
                let nibbles = decode_bytes(data, &mut cursor)?;
                if data.len() < cursor + 32 {
                    return Err(TrieError::InvalidTrieNode);
                }
                let child_hash: Hash = data[cursor..cursor + 32]
                    .try_into()
                    .map_err(|_| TrieError::InvalidTrieNode)?;
                let child = load_node(&child_hash, storage)?;
                Ok(TrieNode::Extension { nibbles, child: Arc::new(child) })
            }
            3 => {
                let mut children: [Option<Arc<TrieNode>>; 16] = Default::default();
                for slot in children.iter_mut() {
                    if data.len() <= cursor {
                        return Err(TrieError::InvalidTrieNode);
                    }
                    let present = data[cursor];
                    cursor += 1;
                    if present == 1 {
                        if data.len() < cursor + 32 {
                            return Err(TrieError::InvalidTrieNode);
                        }
                        let child_hash: Hash = data[cursor..cursor + 32]
                            .try_into()
                            .map_err(|_| TrieError::InvalidTrieNode)?;
                        cursor += 32;
                        *slot = Some(Arc::new(load_node(&child_hash, storage)?));
                    }
                }
                if data.len() <= cursor {
                    return Err(TrieError::InvalidTrieNode);
                }
                let has_value = data[cursor];
                cursor += 1;
                let value = if has_value == 1 {
                    Some(decode_bytes(data, &mut cursor)?)
                } else {
                    None
                };
                Ok(TrieNode::Branch { children: Arc::new(children), value })
            }
            _ => Err(TrieError::InvalidTrieNode),
        }
    }

    /// Insert a key-value pair into this node, returning the new root node.
    fn insert(self, nibbles: &[u8], value: Vec<u8>) -> TrieNode {
        match self {
            TrieNode::Empty => TrieNode::Leaf { nibbles: nibbles.to_vec(), value },
            TrieNode::Leaf { nibbles: existing_nibbles, value: existing_value } => {
                let common = shared_nibble_count(&existing_nibbles, nibbles);

                if common == existing_nibbles.len() && common == nibbles.len() {
                    return TrieNode::Leaf { nibbles: existing_nibbles, value };
                }

                let mut children: [Option<Arc<TrieNode>>; 16] = Default::default();
                let mut branch_value = None;

                if common == existing_nibbles.len() {
                    branch_value = Some(existing_value);
                } else {
                    let idx = existing_nibbles[common] as usize;
                    children[idx] = Some(Arc::new(TrieNode::Leaf {
                        nibbles: existing_nibbles[common + 1..].to_vec(),
                        value: existing_value,
                    }));
                }

                if common == nibbles.len() {
                    branch_value = Some(value);
                } else {
                    let idx = nibbles[common] as usize;
                    children[idx] = Some(Arc::new(TrieNode::Leaf {
                        nibbles: nibbles[common + 1..].to_vec(),
                        value,
                    }));
                }

                let branch = TrieNode::Branch { children: Arc::new(children), value: branch_value };

                if common > 0 {
                    TrieNode::Extension { nibbles: nibbles[..common].to_vec(), child: Arc::new(branch) }
                } else {
                    branch
                }
            }
            TrieNode::Extension { nibbles: ext_nibbles, child } => {
                let common = shared_nibble_count(&ext_nibbles, nibbles);

                if common == ext_nibbles.len() {
                    let new_child = unshare(child).insert(&nibbles[common..], value);
                    return TrieNode::Extension { nibbles: ext_nibbles, child: Arc::new(new_child) };
                }

                let mut children: [Option<Arc<TrieNode>>; 16] = Default::default();
                let mut branch_value = None;

                let ext_idx = ext_nibbles[common] as usize;
                if ext_nibbles.len() - common - 1 > 0 {
                    children[ext_idx] = Some(Arc::new(TrieNode::Extension {
                        nibbles: ext_nibbles[common + 1..].to_vec(),
                        child,
                    }));
                } else {
                    children[ext_idx] = Some(child);
                }

                if common == nibbles.len() {
                    branch_value = Some(value);
                } else {
                    let new_idx = nibbles[common] as usize;
                    children[new_idx] = Some(Arc::new(TrieNode::Leaf {
                        nibbles: nibbles[common + 1..].to_vec(),
                        value,
                    }));
                }

                let branch = TrieNode::Branch { children: Arc::new(children), value: branch_value };

                if common > 0 {
                    TrieNode::Extension { nibbles: ext_nibbles[..common].to_vec(), child: Arc::new(branch) }
                } else {
                    branch
                }
            }
            TrieNode::Branch { mut children, value: branch_value } => {
                if nibbles.is_empty() {
                    return TrieNode::Branch { children, value: Some(value) };
                }

                let idx = nibbles[0] as usize;
                {
                    let slots = Arc::make_mut(&mut children);
                    let child = slots[idx].take().map(unshare).unwrap_or(TrieNode::Empty);
                    slots[idx] = Some(Arc::new(child.insert(&nibbles[1..], value)));
                }

                TrieNode::Branch { children, value: branch_value }
            }
        }
    }

    /// Get a value by nibble path.
    fn get(&self, nibbles: &[u8]) -> Option<&Vec<u8>> {
        match self {
            TrieNode::Empty => None,
            TrieNode::Leaf { nibbles: leaf_nibbles, value } => {
                if leaf_nibbles == nibbles {
                    Some(value)
                } else {
                    None
                }
            }
            TrieNode::Extension { nibbles: ext_nibbles, child } => {
                if nibbles.starts_with(ext_nibbles) {
                    child.get(&nibbles[ext_nibbles.len()..])
                } else {
                    None
                }
            }
            TrieNode::Branch { children, value } => {
                if nibbles.is_empty() {
                    return value.as_ref();
                }
                let idx = nibbles[0] as usize;
                children[idx].as_ref().and_then(|c| c.get(&nibbles[1..]))
            }
        }
    }

    /// Walk every key-value pair reachable from this node, tracking the
    /// nibble path accumulated so far, to rebuild the iteration cache after
    /// loading a trie from storage.
    fn collect_keys(&self, prefix: &mut Vec<u8>, out: &mut HashMap<Vec<u8>, Vec<u8>>) {
        match self {
            TrieNode::Empty => {}
            TrieNode::Leaf { nibbles, value } => {
                prefix.extend_from_slice(nibbles);
                out.insert(nibbles_to_bytes(prefix), value.clone());
                prefix.truncate(prefix.len() - nibbles.len());
            }
            TrieNode::Extension { nibbles, child } => {
                prefix.extend_from_slice(nibbles);
                child.collect_keys(prefix, out);
                prefix.truncate(prefix.len() - nibbles.len());
            }
            TrieNode::Branch { children, value } => {
                if let Some(v) = value {
                    out.insert(nibbles_to_bytes(prefix), v.clone());
                }
                for (i, child) in children.iter().enumerate() {
                    if let Some(node) = child {
                        prefix.push(i as u8);
                        node.collect_keys(prefix, out);
                        prefix.pop();
                    }
                }
            }
        }
    }

    /// Collect every node reachable from this one, keyed by its own hash,
    /// for a single atomic [`Storage::write_batch`].
    fn collect_writes(&self, out: &mut Vec<WriteOp>) {
        match self {
            TrieNode::Empty => {}
            TrieNode::Leaf { .. } => out.push(WriteOp::Put(self.hash().to_vec(), self.encode())),
            TrieNode::Extension { child, .. } => {
                child.collect_writes(out);
                out.push(WriteOp::Put(self.hash().to_vec(), self.encode()));
            }
            TrieNode::Branch { children, .. } => {
                for child in children.iter().flatten() {
                    child.collect_writes(out);
                }
                out.push(WriteOp::Put(self.hash().to_vec(), self.encode()));
            }
        }
    }

    /// Remove a key by nibble path, returning `(new_node, was_removed)`.
    ///
    /// Node collapse rules:
    /// - Branch with 0 children + no value -> Empty
    /// - Branch with 0 children + value -> Leaf { nibbles: [], value }
    /// - Branch with 1 child + no value -> promote child, merging nibbles
    /// - Extension whose child collapsed to Empty -> Empty
    /// - Extension whose child is now another Extension -> merge nibbles
    fn remove(self, nibbles: &[u8]) -> (TrieNode, bool) {
        match self {
            TrieNode::Empty => (TrieNode::Empty, false),

            TrieNode::Leaf { nibbles: leaf_nibbles, value } => {
                if leaf_nibbles == nibbles {
                    (TrieNode::Empty, true)
                } else {
                    (TrieNode::Leaf { nibbles: leaf_nibbles, value }, false)
                }
            }

            TrieNode::Extension { nibbles: ext_nibbles, child } => {
                if !nibbles.starts_with(&ext_nibbles) {
                    return (TrieNode::Extension { nibbles: ext_nibbles, child }, false);
                }
                let (new_child, removed) = unshare(child).remove(&nibbles[ext_nibbles.len()..]);
                if !removed {
                    return (
                        TrieNode::Extension { nibbles: ext_nibbles, child: Arc::new(new_child) },
                        false,
                    );
                }
                let collapsed = match new_child {
                    TrieNode::Empty => TrieNode::Empty,
                    TrieNode::Leaf { nibbles: leaf_nib, value } => {
                        let mut merged = ext_nibbles.clone();
                        merged.extend_from_slice(&leaf_nib);
                        TrieNode::Leaf { nibbles: merged, value }
                    }
                    TrieNode::Extension { nibbles: child_ext_nib, child: grandchild } => {
                        let mut merged = ext_nibbles.clone();
                        merged.extend_from_slice(&child_ext_nib);
                        TrieNode::Extension { nibbles: merged, child: grandchild }
                    }
                    branch => TrieNode::Extension { nibbles: ext_nibbles, child: Arc::new(branch) },
                };
                (collapsed, true)
            }

            TrieNode::Branch { mut children, value: branch_value } => {
                if nibbles.is_empty() {
                    if branch_value.is_none() {
                        return (TrieNode::Branch { children, value: branch_value }, false);
                    }
                    let new_node = Self::collapse_branch(children, None);
                    return (new_node, true);
                }

                let idx = nibbles[0] as usize;
                let slots = Arc::make_mut(&mut children);
                let child = slots[idx].take().map(unshare).unwrap_or(TrieNode::Empty);
                let (new_child, removed) = child.remove(&nibbles[1..]);
                if !removed {
                    slots[idx] = Some(Arc::new(new_child));
                    return (TrieNode::Branch { children, value: branch_value }, false);
                }

                match new_child {
                    TrieNode::Empty => slots[idx] = None,
                    other => slots[idx] = Some(Arc::new(other)),
                }

                let new_node = Self::collapse_branch(children, branch_value);
                (new_node, true)
            }
        }
    }

    fn collapse_branch(
        children: Arc<[Option<Arc<TrieNode>>; 16]>,
        value: Option<Vec<u8>>,
    ) -> TrieNode {
        let active_count = children.iter().filter(|c| c.is_some()).count();

        match (active_count, &value) {
            (0, None) => TrieNode::Empty,
            (0, Some(v)) => TrieNode::Leaf { nibbles: vec![], value: v.clone() },
            (1, None) => {
                let slots = Arc::try_unwrap(children).unwrap_or_else(|shared| (*shared).clone());
                let (branch_nibble, only_child) = slots
                    .into_iter()
                    .enumerate()
                    .find_map(|(i, c)| c.map(|node| (i, unshare(node))))
                    .expect("active_count == 1 guarantees one Some entry");

                match only_child {
                    TrieNode::Extension { nibbles: mut child_nib, child: grandchild } => {
                        let mut merged = vec![branch_nibble as u8];
                        merged.append(&mut child_nib);
                        TrieNode::Extension { nibbles: merged, child: grandchild }
                    }
                    TrieNode::Leaf { nibbles: mut leaf_nib, value: leaf_val } => {
                        let mut merged = vec![branch_nibble as u8];
                        merged.append(&mut leaf_nib);
                        TrieNode::Leaf { nibbles: merged, value: leaf_val }
                    }
                    other => TrieNode::Extension {
                        nibbles: vec![branch_nibble as u8],
                        child: Arc::new(other),
                    },
                }
            }
            _ => TrieNode::Branch { children, value },
        }
    }
}

fn load_node(hash: &Hash, storage: &dyn Storage) -> Result<TrieNode> {
    if *hash == EMPTY_HASH {
        return Ok(TrieNode::Empty);
    }
    let bytes = storage
        .get(hash)
        .map_err(|e| TrieError::Serialization(e.to_string()))?
        .ok_or(TrieError::InvalidTrieNode)?;
    TrieNode::decode(&bytes, storage)
}

#[derive(Clone)]
enum OverlayOp {
    Put(Vec<u8>),
    Delete,
}

/// An authenticated trie with a `begin_batch`/`commit`/`rollback` overlay.
///
/// Without an open batch, `put`/`delete` apply to the node tree immediately
/// (idle mutation is allowed but not checkpointable). Inside a batch they
/// are buffered in `overlay`, and only folded into the tree and persisted
/// to `storage` on `commit()`.
#[derive(Clone)]
pub struct BatchTrie {
    root: TrieNode,
    /// Cache of all logical keys, kept in sync with `root` for iteration.
    /// Held behind `Arc` for the same reason `root`'s nodes are: cloning a
    /// `BatchTrie` should share this map rather than copy it, only paying
    /// to duplicate it once a clone actually mutates a key.
    keys: Arc<HashMap<Vec<u8>, Vec<u8>>>,
    overlay: HashMap<Vec<u8>, OverlayOp>,
    batching: bool,
    storage: Arc<dyn Storage>,
}

impl BatchTrie {
    /// Open the trie at `root_hash` against `storage`, or create an empty
    /// trie if `root_hash` is the empty-trie sentinel.
    pub fn new(root_hash: Hash, storage: Arc<dyn Storage>) -> Result<Self> {
        let (root, keys) = if root_hash == EMPTY_HASH {
            (TrieNode::Empty, HashMap::new())
        } else {
            let root = load_node(&root_hash, storage.as_ref())?;
            let mut keys = HashMap::new();
            root.collect_keys(&mut Vec::new(), &mut keys);
            (root, keys)
        };

        Ok(Self {
            root,
            keys: Arc::new(keys),
            overlay: HashMap::new(),
            batching: false,
            storage,
        })
    }

    /// An empty trie backed by `storage`.
    pub fn empty(storage: Arc<dyn Storage>) -> Self {
        Self {
            root: TrieNode::Empty,
            keys: Arc::new(HashMap::new()),
            overlay: HashMap::new(),
            batching: false,
            storage,
        }
    }

    pub fn root_hash(&self) -> Hash {
        self.root.hash()
    }

    /// The storage backend this trie persists to.
    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.overlay.get(key) {
            Some(OverlayOp::Put(value)) => Some(value.clone()),
            Some(OverlayOp::Delete) => None,
            None => {
                let nibbles = bytes_to_nibbles(key);
                self.root.get(&nibbles).cloned()
            }
        }
    }

    /// Insert or update a key. Buffered if a batch is open, applied to the
    /// node tree immediately otherwise.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        if self.batching {
            self.overlay.insert(key.to_vec(), OverlayOp::Put(value.to_vec()));
        } else {
            let nibbles = bytes_to_nibbles(key);
            let old_root = std::mem::take(&mut self.root);
            self.root = old_root.insert(&nibbles, value.to_vec());
            Arc::make_mut(&mut self.keys).insert(key.to_vec(), value.to_vec());
        }
    }

    /// Remove a key. Buffered if a batch is open, applied to the node tree
    /// immediately otherwise.
    pub fn delete(&mut self, key: &[u8]) {
        if self.batching {
            self.overlay.insert(key.to_vec(), OverlayOp::Delete);
        } else if Arc::make_mut(&mut self.keys).remove(key).is_some() {
            let nibbles = bytes_to_nibbles(key);
            let old_root = std::mem::take(&mut self.root);
            let (new_root, _removed) = old_root.remove(&nibbles);
            self.root = new_root;
        }
    }

    /// All key-value pairs whose key extends `prefix`, sorted by key bytes
    /// for a deterministic order that does not depend on insertion order.
    pub fn iterator(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut combined: HashMap<Vec<u8>, Vec<u8>> = (*self.keys).clone();
        for (key, op) in &self.overlay {
            match op {
                OverlayOp::Put(value) => {
                    combined.insert(key.clone(), value.clone());
                }
                OverlayOp::Delete => {
                    combined.remove(key);
                }
            }
        }
        let mut out: Vec<(Vec<u8>, Vec<u8>)> =
            combined.into_iter().filter(|(k, _)| k.starts_with(prefix)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn begin_batch(&mut self) {
        self.batching = true;
    }

    /// Fold the overlay into the node tree (if a batch is open) and persist
    /// every reachable node to `storage`. Safe to call with no batch open:
    /// the overlay is empty in that case, and this degenerates to a plain
    /// flush of whatever idle mutations already applied to the root.
    pub fn commit(&mut self) -> Result<()> {
        for (key, op) in std::mem::take(&mut self.overlay) {
            match op {
                OverlayOp::Put(value) => {
                    let nibbles = bytes_to_nibbles(&key);
                    let old_root = std::mem::take(&mut self.root);
                    self.root = old_root.insert(&nibbles, value.clone());
                    Arc::make_mut(&mut self.keys).insert(key, value);
                }
                OverlayOp::Delete => {
                    if Arc::make_mut(&mut self.keys).remove(&key).is_some() {
                        let nibbles = bytes_to_nibbles(&key);
                        let old_root = std::mem::take(&mut self.root);
                        let (new_root, _removed) = old_root.remove(&nibbles);
                        self.root = new_root;
                    }
                }
            }
        }

        let mut writes = Vec::new();
        self.root.collect_writes(&mut writes);
        if !writes.is_empty() {
            self.storage
                .write_batch(writes)
                .map_err(|e| TrieError::Serialization(e.to_string()))?;
        }

        self.batching = false;
        Ok(())
    }

    /// Discard the overlay without touching the node tree. A no-op if no
    /// batch is open.
    pub fn rollback(&mut self) {
        if !self.batching {
            return;
        }
        self.overlay.clear();
        self.batching = false;
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
