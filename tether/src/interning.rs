use std::{collections::HashMap, hash::Hasher, sync::Arc};

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InternedId(u64);

#[derive(Debug)]
struct InternedStringsImpl {
    table: HashMap<InternedId, Arc<str>, ahash::RandomState>,
    mappings: HashMap<Arc<str>, InternedId, ahash::RandomState>,
}

/// Symbol table of the reference machine.
///
/// Ids are content hashes, so the same name interned by two tables yields the
/// same id. Collisions are resolved by linear probing on the id.
#[derive(Debug, Clone)]
pub struct InternedStrings(Arc<RwLock<InternedStringsImpl>>);

impl InternedStringsImpl {
    fn new() -> Self {
        Self {
            table: HashMap::default(),
            mappings: HashMap::default(),
        }
    }

    fn get_or_add(&mut self, value: &str) -> InternedId {
        if let Some(&id) = self.mappings.get(value) {
            return id;
        }
        let mut hasher = ahash::AHasher::default();
        hasher.write(value.as_bytes());
        let mut id = InternedId(hasher.finish());
        while self.table.contains_key(&id) {
            id = InternedId(id.0.wrapping_add(1));
        }
        let interned = Arc::<str>::from(value);
        self.mappings.insert(interned.clone(), id);
        self.table.insert(id, interned);
        id
    }

    fn get(&self, id: InternedId) -> Option<Arc<str>> {
        self.table.get(&id).cloned()
    }

    fn lookup(&self, value: &str) -> Option<InternedId> {
        self.mappings.get(value).copied()
    }
}

impl Default for InternedStrings {
    fn default() -> Self {
        Self::new()
    }
}

impl InternedStrings {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(InternedStringsImpl::new())))
    }

    pub fn add(&self, value: &str) -> InternedId {
        if let Some(id) = self.0.read().lookup(value) {
            return id;
        }
        self.0.write().get_or_add(value)
    }

    pub fn get(&self, id: InternedId) -> Option<Arc<str>> {
        self.0.read().get(id)
    }

    pub fn lookup(&self, value: &str) -> Option<InternedId> {
        self.0.read().lookup(value)
    }

    pub fn len(&self) -> usize {
        self.0.read().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
