//! Cursor-based pagination: [`Offset`], [`Page`], and [`QueryOptions`].

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::EncodingError;
use crate::types::{ConsistentReads, Document};

use super::key_utils;

/// Continuation token: the key attributes of the last item returned.
///
/// Passing it back as `initial_offset` resumes right after that item.
pub struct Offset<K> {
    document: Document,
    _key: PhantomData<fn() -> K>,
}

impl<K> Offset<K> {
    pub(crate) fn from_document(document: Document) -> Self {
        Self {
            document,
            _key: PhantomData,
        }
    }

    /// The raw key attributes, as reported by the store.
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }
}

impl<K: Serialize> Offset<K> {
    /// Resume after an explicit key.
    ///
    /// For secondary indexes the key must carry the table's primary key
    /// attributes as well as the index keys.
    pub fn from_key(key: &K) -> Result<Self, EncodingError> {
        key_utils::to_document(key).map(Self::from_document)
    }
}

impl<K: DeserializeOwned> Offset<K> {
    /// Decode the last key observed.
    pub fn key(&self) -> Result<K, EncodingError> {
        key_utils::from_document(self.document.clone())
    }
}

impl<K> Clone for Offset<K> {
    fn clone(&self) -> Self {
        Self::from_document(self.document.clone())
    }
}

impl<K> PartialEq for Offset<K> {
    fn eq(&self, other: &Self) -> bool {
        self.document == other.document
    }
}

impl<K> fmt::Debug for Offset<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Offset").field(&self.document).finish()
    }
}

/// One page of a query or scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<K, I> {
    pub contents: Vec<I>,
    /// Where to resume; `None` on the last page.
    pub offset: Option<Offset<K>>,
    pub has_more: bool,
}

impl<K, I> Page<K, I> {
    pub(crate) fn new(contents: Vec<I>, offset: Option<Offset<K>>) -> Self {
        let has_more = offset.is_some();
        Self {
            contents,
            offset,
            has_more,
        }
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

impl<K, I> IntoIterator for Page<K, I> {
    type Item = I;
    type IntoIter = std::vec::IntoIter<I>;

    fn into_iter(self) -> Self::IntoIter {
        self.contents.into_iter()
    }
}

/// Options of a range query.
pub struct QueryOptions<K> {
    pub consistency: ConsistentReads,
    /// Ascending key order when true.
    pub asc: bool,
    /// Items per page; the configured default when `None`.
    pub page_size: Option<usize>,
    pub initial_offset: Option<Offset<K>>,
}

impl<K> Default for QueryOptions<K> {
    fn default() -> Self {
        Self {
            consistency: ConsistentReads::Eventual,
            asc: true,
            page_size: None,
            initial_offset: None,
        }
    }
}

impl<K> QueryOptions<K> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn consistent_read(mut self) -> Self {
        self.consistency = ConsistentReads::Consistent;
        self
    }

    #[must_use]
    pub fn descending(mut self) -> Self {
        self.asc = false;
        self
    }

    #[must_use]
    pub fn page_size(mut self, n: usize) -> Self {
        self.page_size = Some(n);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: Option<Offset<K>>) -> Self {
        self.initial_offset = offset;
        self
    }
}

impl<K> Clone for QueryOptions<K> {
    fn clone(&self) -> Self {
        Self {
            consistency: self.consistency,
            asc: self.asc,
            page_size: self.page_size,
            initial_offset: self.initial_offset.clone(),
        }
    }
}

impl<K> fmt::Debug for QueryOptions<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("consistency", &self.consistency)
            .field("asc", &self.asc)
            .field("page_size", &self.page_size)
            .field("initial_offset", &self.initial_offset)
            .finish()
    }
}
