//! Typed attribute keys and the registry that interns them.
//!
//! A [`Key`] is a small `Copy` handle made of a category and a dense index. Names are resolved
//! only when a key is created or when an error needs to be reported; evaluation code works
//! exclusively with indices.

use super::attributes::{
    AttributeType, FloatAttr, FloatsAttr, IndexAttr, IntAttr, IntsAttr, ParticleAttr,
    ParticlesAttr, StringAttr,
};
use phf::{Map, phf_map};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Runtime tag naming one attribute type, used for namespaces and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeTag {
    Float,
    Int,
    String,
    Index,
    Particle,
    Floats,
    Ints,
    Particles,
}

#[rustfmt::skip]
static ATTRIBUTE_TAG_ALIASES: Map<&'static str, AttributeTag> = phf_map! {
    "float" => AttributeTag::Float, "double" => AttributeTag::Float, "f64" => AttributeTag::Float,
    "int" => AttributeTag::Int, "integer" => AttributeTag::Int, "i64" => AttributeTag::Int,
    "string" => AttributeTag::String, "str" => AttributeTag::String,
    "index" => AttributeTag::Index, "usize" => AttributeTag::Index,
    "particle" => AttributeTag::Particle,
    "floats" => AttributeTag::Floats, "doubles" => AttributeTag::Floats,
    "ints" => AttributeTag::Ints, "integers" => AttributeTag::Ints,
    "particles" => AttributeTag::Particles,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown attribute type: '{0}'")]
pub struct ParseAttributeTagError(pub String);

impl FromStr for AttributeTag {
    type Err = ParseAttributeTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ATTRIBUTE_TAG_ALIASES
            .get(s.trim().to_ascii_lowercase().as_str())
            .copied()
            .ok_or_else(|| ParseAttributeTagError(s.to_string()))
    }
}

impl fmt::Display for AttributeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeTag::Float => "float",
            AttributeTag::Int => "int",
            AttributeTag::String => "string",
            AttributeTag::Index => "index",
            AttributeTag::Particle => "particle",
            AttributeTag::Floats => "floats",
            AttributeTag::Ints => "ints",
            AttributeTag::Particles => "particles",
        };
        f.write_str(name)
    }
}

/// A namespace for attribute names, scoped per attribute type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Category(pub u16);

impl Category {
    pub const DEFAULT: Category = Category(0);
}

/// A typed handle identifying one named attribute.
///
/// Two keys are equal when their category and index are equal; the name is not part of the
/// key. Keys are only meaningful together with the [`KeyRegistry`] that created them.
pub struct Key<T> {
    category: Category,
    index: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub const fn new(category: Category, index: u32) -> Self {
        Self {
            category,
            index,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn category(&self) -> Category {
        self.category
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl<T: AttributeType> Key<T> {
    /// Erases the type parameter, keeping the runtime tag.
    #[inline]
    pub fn raw(&self) -> RawKey {
        RawKey {
            tag: T::TAG,
            category: self.category,
            index: self.index,
        }
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.category == other.category && self.index == other.index
    }
}

impl<T> Eq for Key<T> {}

impl<T> Hash for Key<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.category.hash(state);
        self.index.hash(state);
    }
}

impl<T> PartialOrd for Key<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Key<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.category, self.index).cmp(&(other.category, other.index))
    }
}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}:{})", self.category.0, self.index)
    }
}

/// A key with its type erased, as stored in errors and dependency sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawKey {
    pub tag: AttributeTag,
    pub category: Category,
    pub index: u32,
}

pub type FloatKey = Key<FloatAttr>;
pub type IntKey = Key<IntAttr>;
pub type StringKey = Key<StringAttr>;
pub type IndexKey = Key<IndexAttr>;
pub type ParticleKey = Key<ParticleAttr>;
pub type FloatsKey = Key<FloatsAttr>;
pub type IntsKey = Key<IntsAttr>;
pub type ParticlesKey = Key<ParticlesAttr>;

/// Names of the float keys every registry creates up front, in index order.
pub const STANDARD_FLOAT_KEYS: [&str; 7] =
    ["x", "y", "z", "radius", "local_x", "local_y", "local_z"];

pub const X: FloatKey = Key::new(Category::DEFAULT, 0);
pub const Y: FloatKey = Key::new(Category::DEFAULT, 1);
pub const Z: FloatKey = Key::new(Category::DEFAULT, 2);
pub const XYZ: [FloatKey; 3] = [X, Y, Z];
pub const RADIUS: FloatKey = Key::new(Category::DEFAULT, 3);
pub const LOCAL_XYZ: [FloatKey; 3] = [
    Key::new(Category::DEFAULT, 4),
    Key::new(Category::DEFAULT, 5),
    Key::new(Category::DEFAULT, 6),
];

#[derive(Debug, Default)]
struct Namespace {
    names: Vec<String>,
    lookup: HashMap<String, u32>,
}

impl Namespace {
    fn get_or_insert(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.lookup.get(name) {
            return index;
        }
        let index = self.names.len() as u32;
        self.names.push(name.to_string());
        self.lookup.insert(name.to_string(), index);
        index
    }
}

/// Interns attribute names into dense per-namespace indices.
///
/// There is one namespace per (attribute type, category) pair. Indices start at 0 and grow by
/// one for every new name. The registry is safe to share between threads and between models;
/// creation takes a write lock, lookups a read lock.
#[derive(Debug)]
pub struct KeyRegistry {
    namespaces: RwLock<HashMap<(AttributeTag, Category), Namespace>>,
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyRegistry {
    /// Creates a registry with the standard float keys already registered.
    ///
    /// # Return
    ///
    /// A registry in which [`X`], [`Y`], [`Z`], [`RADIUS`] and [`LOCAL_XYZ`] resolve to the
    /// names in [`STANDARD_FLOAT_KEYS`].
    pub fn new() -> Self {
        let registry = Self {
            namespaces: RwLock::new(HashMap::new()),
        };
        for name in STANDARD_FLOAT_KEYS {
            registry.register_raw(AttributeTag::Float, Category::DEFAULT, name);
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<(AttributeTag, Category), Namespace>> {
        self.namespaces
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<(AttributeTag, Category), Namespace>> {
        self.namespaces
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the key for `name`, creating it if needed.
    ///
    /// # Arguments
    ///
    /// * `category` - The namespace the name belongs to.
    /// * `name` - The human-readable attribute name.
    ///
    /// # Return
    ///
    /// The same key for repeated calls with the same arguments.
    pub fn get_or_create<T: AttributeType>(&self, category: Category, name: &str) -> Key<T> {
        if let Some(key) = self.find::<T>(category, name) {
            return key;
        }
        Key::new(category, self.register_raw(T::TAG, category, name))
    }

    /// Shorthand for [`Self::get_or_create`] in the default category.
    pub fn key<T: AttributeType>(&self, name: &str) -> Key<T> {
        self.get_or_create(Category::DEFAULT, name)
    }

    /// Looks up a key without creating it.
    pub fn find<T: AttributeType>(&self, category: Category, name: &str) -> Option<Key<T>> {
        self.read()
            .get(&(T::TAG, category))
            .and_then(|namespace| namespace.lookup.get(name))
            .map(|&index| Key::new(category, index))
    }

    /// Registers a name for a runtime tag, returning its index.
    pub fn register_raw(&self, tag: AttributeTag, category: Category, name: &str) -> u32 {
        self.write()
            .entry((tag, category))
            .or_default()
            .get_or_insert(name)
    }

    /// Resolves the name a key was created with.
    ///
    /// # Return
    ///
    /// Returns `None` if the key was not created by this registry.
    pub fn name_of(&self, key: RawKey) -> Option<String> {
        self.read()
            .get(&(key.tag, key.category))
            .and_then(|namespace| namespace.names.get(key.index as usize))
            .cloned()
    }

    /// Lists every name of one namespace in index order.
    pub fn names<T: AttributeType>(&self, category: Category) -> Vec<String> {
        self.read()
            .get(&(T::TAG, category))
            .map(|namespace| namespace.names.clone())
            .unwrap_or_default()
    }

    /// Renders a key for diagnostics, falling back to the raw index for foreign keys.
    pub fn describe(&self, key: RawKey) -> String {
        match self.name_of(key) {
            Some(name) => format!("{}:{}", key.tag, name),
            None => format!("{}:#{}@{}", key.tag, key.index, key.category.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn repeated_creation_returns_equal_keys() {
        let registry = KeyRegistry::new();
        let a = registry.key::<IntAttr>("type");
        let b = registry.key::<IntAttr>("type");
        assert_eq!(a, b);
        assert_eq!(a.raw(), b.raw());
    }

    #[test]
    fn distinct_names_get_dense_increasing_indices() {
        let registry = KeyRegistry::new();
        let category = Category(7);
        let indices: Vec<u32> = ["a", "b", "c", "d"]
            .iter()
            .map(|name| registry.get_or_create::<StringAttr>(category, name).index())
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(registry.names::<StringAttr>(category), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn namespaces_are_independent_per_type_and_category() {
        let registry = KeyRegistry::new();
        let int_key = registry.key::<IntAttr>("shared");
        let string_key = registry.key::<StringAttr>("shared");
        let other = registry.get_or_create::<IntAttr>(Category(1), "shared");
        assert_eq!(int_key.index(), 0);
        assert_eq!(string_key.index(), 0);
        assert_eq!(other.index(), 0);
        assert_ne!(int_key, other);
        assert_ne!(int_key.raw(), string_key.raw());
    }

    #[test]
    fn standard_float_keys_are_preregistered() {
        let registry = KeyRegistry::new();
        assert_eq!(registry.key::<FloatAttr>("x"), X);
        assert_eq!(registry.key::<FloatAttr>("z"), Z);
        assert_eq!(registry.key::<FloatAttr>("radius"), RADIUS);
        assert_eq!(registry.key::<FloatAttr>("local_z"), LOCAL_XYZ[2]);
        assert_eq!(registry.key::<FloatAttr>("mass").index(), 7);
    }

    #[test]
    fn name_of_resolves_and_rejects_foreign_keys() {
        let registry = KeyRegistry::new();
        let key = registry.key::<ParticlesAttr>("children");
        assert_eq!(registry.name_of(key.raw()).as_deref(), Some("children"));
        let foreign: IntKey = Key::new(Category(9), 42);
        assert_eq!(registry.name_of(foreign.raw()), None);
        assert_eq!(registry.describe(foreign.raw()), "int:#42@9");
        assert_eq!(registry.describe(X.raw()), "float:x");
    }

    #[test]
    fn find_does_not_create() {
        let registry = KeyRegistry::new();
        assert!(registry.find::<IntAttr>(Category::DEFAULT, "missing").is_none());
        assert!(registry.names::<IntAttr>(Category::DEFAULT).is_empty());
    }

    #[test]
    fn concurrent_creation_keeps_indices_dense() {
        let registry = Arc::new(KeyRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..50)
                        .map(|i| registry.key::<IntAttr>(&format!("k{}", (t * 7 + i) % 100)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let names = registry.names::<IntAttr>(Category::DEFAULT);
        for (index, name) in names.iter().enumerate() {
            assert_eq!(registry.key::<IntAttr>(name).index() as usize, index);
        }
        assert_eq!(names.len(), registry.names::<IntAttr>(Category::DEFAULT).len());
    }

    #[test]
    fn attribute_tags_parse_from_aliases() {
        assert_eq!("double".parse::<AttributeTag>(), Ok(AttributeTag::Float));
        assert_eq!(" Int ".parse::<AttributeTag>(), Ok(AttributeTag::Int));
        assert_eq!("particles".parse::<AttributeTag>(), Ok(AttributeTag::Particles));
        assert!("quaternion".parse::<AttributeTag>().is_err());
        assert_eq!(AttributeTag::Floats.to_string(), "floats");
    }
}
