//! Heterogeneous key and item collections.
//!
//! A [`KeySet`] holds keys of any bound key type, possibly addressing several
//! tables. Loading it produces an [`ItemSet`] holding one decoded item per
//! stored key, each tagged with its table.

use std::any::{Any, TypeId};
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::EncodingError;
use crate::types::Document;

use super::key_utils;

/// A record that can be stored in, or addressed within, a logical table.
///
/// Implemented for every serde type that is thread-safe and owns its data.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Object-safe serialization of a record whose type was erased.
pub(crate) trait ErasedRecord: Send + Sync {
    fn to_document(&self) -> Result<Document, EncodingError>;
}

impl<T: Serialize + Send + Sync> ErasedRecord for T {
    fn to_document(&self) -> Result<Document, EncodingError> {
        key_utils::to_document(self)
    }
}

/// A record together with the identity of its static type.
pub(crate) struct ErasedEntry {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    value: Box<dyn ErasedRecord>,
}

impl ErasedEntry {
    pub(crate) fn new<T: Record>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
        }
    }

    pub(crate) fn to_document(&self) -> Result<Document, EncodingError> {
        self.value.to_document()
    }
}

impl fmt::Debug for ErasedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// An ordered collection of keys, possibly spanning tables.
///
/// Every key type must be bound to exactly one table view when the set is
/// used; this is checked by the operation consuming the set.
#[derive(Debug, Default)]
pub struct KeySet {
    keys: Vec<ErasedEntry>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding a single key.
    pub fn of<K: Record>(key: K) -> Self {
        Self::new().with(key)
    }

    #[must_use]
    pub fn with<K: Record>(mut self, key: K) -> Self {
        self.insert(key);
        self
    }

    pub fn insert<K: Record>(&mut self, key: K) {
        self.keys.push(ErasedEntry::new(key));
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub(crate) fn entries(&self) -> &[ErasedEntry] {
        &self.keys
    }
}

impl<K: Record> FromIterator<K> for KeySet {
    fn from_iter<T: IntoIterator<Item = K>>(iter: T) -> Self {
        let mut set = KeySet::new();
        set.extend(iter);
        set
    }
}

impl<K: Record> Extend<K> for KeySet {
    fn extend<T: IntoIterator<Item = K>>(&mut self, iter: T) {
        for key in iter {
            self.insert(key);
        }
    }
}

/// Build a [`KeySet`] from keys of possibly different types.
///
/// ```ignore
/// let keys = key_set![
///     AlbumKey::new("ALBUM_1"),
///     TrackKey::new("ALBUM_1", 3),
/// ];
/// ```
#[macro_export]
macro_rules! key_set {
    () => {
        $crate::api::KeySet::new()
    };
    ($($key:expr),+ $(,)?) => {{
        let mut set = $crate::api::KeySet::new();
        $(set.insert($key);)+
        set
    }};
}

/// One item loaded by a batch or transactional read.
pub struct LoadedItem {
    table: String,
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

impl LoadedItem {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<I: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<I>()
    }

    pub fn downcast_ref<I: 'static>(&self) -> Option<&I> {
        self.value.downcast_ref::<I>()
    }
}

impl fmt::Debug for LoadedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedItem")
            .field("table", &self.table)
            .field("type", &self.type_name)
            .finish()
    }
}

/// Items returned by loading a [`KeySet`], in key order.
///
/// Keys with no stored item have no entry; absence is not an error.
#[derive(Debug, Default)]
pub struct ItemSet {
    items: Vec<LoadedItem>,
}

impl ItemSet {
    pub(crate) fn push(
        &mut self,
        table: String,
        type_id: TypeId,
        type_name: &'static str,
        value: Box<dyn Any + Send + Sync>,
    ) {
        self.items.push(LoadedItem {
            table,
            type_id,
            type_name,
            value,
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoadedItem> {
        self.items.iter()
    }

    /// All items of type `I`.
    pub fn items<I: 'static>(&self) -> Vec<&I> {
        self.items
            .iter()
            .filter_map(|item| item.downcast_ref::<I>())
            .collect()
    }

    /// The first item of type `I`, if any.
    pub fn get<I: 'static>(&self) -> Option<&I> {
        self.items.iter().find_map(|item| item.downcast_ref::<I>())
    }

    /// Take all items of type `I`, dropping the rest.
    pub fn into_items<I: 'static>(self) -> Vec<I> {
        self.items
            .into_iter()
            .filter_map(|item| item.value.downcast::<I>().ok())
            .map(|boxed| *boxed)
            .collect()
    }

    /// Number of items loaded from `table`.
    pub fn count_in(&self, table: &str) -> usize {
        self.items.iter().filter(|item| item.table == table).count()
    }
}

impl IntoIterator for ItemSet {
    type Item = LoadedItem;
    type IntoIter = std::vec::IntoIter<LoadedItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct AlbumKey {
        album_token: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TrackKey {
        album_token: String,
        track_number: u32,
    }

    #[test]
    fn test_key_set_construction() {
        let single = KeySet::of(AlbumKey {
            album_token: "A".into(),
        });
        assert_eq!(single.len(), 1);

        let mixed = crate::key_set![
            AlbumKey {
                album_token: "A".into()
            },
            TrackKey {
                album_token: "A".into(),
                track_number: 1
            },
        ];
        assert_eq!(mixed.len(), 2);
        assert_eq!(mixed.entries()[1].type_id, TypeId::of::<TrackKey>());

        let from_iter: KeySet = (0..3)
            .map(|n| TrackKey {
                album_token: "A".into(),
                track_number: n,
            })
            .collect();
        assert_eq!(from_iter.len(), 3);
        assert!(crate::key_set![].is_empty());
    }

    #[test]
    fn test_erased_entry_serializes() {
        let entry = ErasedEntry::new(TrackKey {
            album_token: "A".into(),
            track_number: 7,
        });
        let doc = entry.to_document().unwrap();
        assert_eq!(doc["track_number"], 7);
        assert!(format!("{entry:?}").contains("TrackKey"));
    }

    #[test]
    fn test_item_set_downcasts_by_type() {
        let mut set = ItemSet::default();
        let album = AlbumKey {
            album_token: "A".into(),
        };
        let track = TrackKey {
            album_token: "A".into(),
            track_number: 2,
        };
        set.push(
            "music".into(),
            TypeId::of::<AlbumKey>(),
            "AlbumKey",
            Box::new(album.clone()),
        );
        set.push(
            "music".into(),
            TypeId::of::<TrackKey>(),
            "TrackKey",
            Box::new(track.clone()),
        );

        assert_eq!(set.len(), 2);
        assert_eq!(set.get::<AlbumKey>(), Some(&album));
        assert_eq!(set.items::<TrackKey>(), vec![&track]);
        assert_eq!(set.count_in("music"), 2);
        assert!(set.iter().next().is_some_and(|i| i.is::<AlbumKey>()));
        assert_eq!(set.into_items::<TrackKey>(), vec![track]);
    }
}
