//! Binding factory: resolves typed tables and views to physical tables.
//!
//! Every logical table declares a static [`TableDescriptor`]. Binding
//! validates the descriptor, registers one [`ViewBinding`] per distinct
//! `(table, index, key type, item type)` combination, and caches the bound
//! table for the lifetime of the factory. No store calls are made while
//! binding.
//!
//! Batch and transaction operations receive type-erased keys and items;
//! they find the view to use through the primary-key registrations kept
//! here, keyed by the Rust type of the key or item.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::client::StoreClient;
use crate::config::Config;
use crate::error::{BindingError, ConfigError, EncodingError};
use crate::types::{Document, IndexDescriptor, IndexKind, KeySchema, TableDescriptor};

use super::database::LogicalDb;
use super::key_set::Record;
use super::key_utils;
use super::view::{LogicalTable, ViewCore};

pub(crate) type DecodeFn = fn(Document) -> Result<Box<dyn Any + Send + Sync>, EncodingError>;

fn decode_as<I: Record>(doc: Document) -> Result<Box<dyn Any + Send + Sync>, EncodingError> {
    let item: I = key_utils::from_document(doc)?;
    Ok(Box::new(item))
}

/// A key/item type pair bound to a table or one of its indexes.
pub struct ViewBinding {
    table: Arc<TableDescriptor>,
    index: Option<IndexDescriptor>,
    key_type_name: &'static str,
    item_type: TypeId,
    item_type_name: &'static str,
    version_attribute: Option<String>,
    decode: DecodeFn,
}

impl ViewBinding {
    pub fn table(&self) -> &TableDescriptor {
        &self.table
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    pub fn index(&self) -> Option<&IndexDescriptor> {
        self.index.as_ref()
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index.as_ref().map(|idx| idx.name.as_str())
    }

    pub fn key_type_name(&self) -> &'static str {
        self.key_type_name
    }

    pub fn item_type_name(&self) -> &'static str {
        self.item_type_name
    }

    /// Attribute used for optimistic concurrency on this view's items.
    pub fn version_attribute(&self) -> Option<&str> {
        self.version_attribute.as_deref()
    }

    /// The table's primary key, which addresses items for reads and writes.
    pub fn primary_schema(&self) -> KeySchema<'_> {
        self.table.key_schema()
    }

    /// The key this view is ordered by: the index key for index views.
    pub fn key_schema(&self) -> KeySchema<'_> {
        match &self.index {
            Some(idx) => idx.key_schema(),
            None => self.table.key_schema(),
        }
    }

    pub(crate) fn shared_table(&self) -> &Arc<TableDescriptor> {
        &self.table
    }

    pub(crate) fn item_type(&self) -> TypeId {
        self.item_type
    }

    pub(crate) fn decode(
        &self,
        doc: Document,
    ) -> Result<Box<dyn Any + Send + Sync>, EncodingError> {
        (self.decode)(doc)
    }

    fn describe(&self) -> String {
        match &self.index {
            Some(idx) => format!(
                "{}[{}]<{}, {}>",
                self.table.name, idx.name, self.key_type_name, self.item_type_name
            ),
            None => format!(
                "{}<{}, {}>",
                self.table.name, self.key_type_name, self.item_type_name
            ),
        }
    }
}

impl fmt::Debug for ViewBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ViewId {
    table: String,
    index: Option<String>,
    key: TypeId,
    item: TypeId,
}

#[derive(Default)]
struct RegistryState {
    tables: HashMap<String, Arc<TableDescriptor>>,
    views: HashMap<ViewId, Arc<ViewBinding>>,
    /// Primary-key views by key type.
    by_key: HashMap<TypeId, Vec<Arc<ViewBinding>>>,
    /// Primary-key views by item type.
    by_item: HashMap<TypeId, Vec<Arc<ViewBinding>>>,
    /// Version attribute of every item type registered with one.
    versioned: HashMap<TypeId, String>,
    /// Bound logical tables by their Rust type.
    bound: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

/// Append-only registry of descriptors, view bindings, and bound tables.
#[derive(Default)]
pub(crate) struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    fn register_table(
        &self,
        descriptor: TableDescriptor,
    ) -> Result<Arc<TableDescriptor>, BindingError> {
        validate_descriptor(&descriptor)?;
        let mut state = self.state.write();
        if let Some(existing) = state.tables.get(&descriptor.name) {
            if **existing != descriptor {
                return Err(BindingError::InvalidDescriptor {
                    table: descriptor.name,
                    reason: "conflicts with a descriptor already bound for this table".into(),
                });
            }
            return Ok(Arc::clone(existing));
        }
        debug!(table = %descriptor.name, indexes = descriptor.indexes.len(), "table registered");
        let descriptor = Arc::new(descriptor);
        state
            .tables
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub(crate) fn register_view<K: Record, I: Record>(
        &self,
        table: &Arc<TableDescriptor>,
        index: Option<&IndexDescriptor>,
        version_attribute: Option<String>,
    ) -> Arc<ViewBinding> {
        let id = ViewId {
            table: table.name.clone(),
            index: index.map(|idx| idx.name.clone()),
            key: TypeId::of::<K>(),
            item: TypeId::of::<I>(),
        };
        if let Some(existing) = self.state.read().views.get(&id) {
            return Arc::clone(existing);
        }

        let mut state = self.state.write();
        if let Some(existing) = state.views.get(&id) {
            return Arc::clone(existing);
        }
        let binding = Arc::new(ViewBinding {
            table: Arc::clone(table),
            index: index.cloned(),
            key_type_name: std::any::type_name::<K>(),
            item_type: TypeId::of::<I>(),
            item_type_name: std::any::type_name::<I>(),
            version_attribute,
            decode: decode_as::<I>,
        });
        if index.is_none() {
            state
                .by_key
                .entry(id.key)
                .or_default()
                .push(Arc::clone(&binding));
            state
                .by_item
                .entry(id.item)
                .or_default()
                .push(Arc::clone(&binding));
        }
        if let Some(attribute) = &binding.version_attribute {
            state
                .versioned
                .entry(id.item)
                .or_insert_with(|| attribute.clone());
        }
        debug!(view = %binding.describe(), "view bound");
        state.views.insert(id, Arc::clone(&binding));
        binding
    }

    /// The primary-key view addressed by keys of the given type.
    ///
    /// Several registrations are only ambiguous if they disagree on the
    /// table or on the item type the key loads.
    pub(crate) fn resolve_key(
        &self,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<Arc<ViewBinding>, BindingError> {
        let state = self.state.read();
        let candidates = state.by_key.get(&type_id).map_or(&[][..], Vec::as_slice);
        let Some(first) = candidates.first() else {
            return Err(BindingError::UnboundKeyType { type_name });
        };
        let agree = candidates
            .iter()
            .all(|b| b.table.name == first.table.name && b.item_type == first.item_type);
        if !agree {
            return Err(BindingError::AmbiguousKeyType {
                type_name,
                views: candidates.iter().map(|b| b.describe()).collect(),
            });
        }
        Ok(Arc::clone(preferring_versioned(candidates, first)))
    }

    /// The primary-key view storing items of the given type.
    ///
    /// Registrations on one table are interchangeable for writes; a
    /// versioned one is preferred so version checks are never skipped.
    pub(crate) fn resolve_item(
        &self,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<Arc<ViewBinding>, BindingError> {
        let state = self.state.read();
        let candidates = state.by_item.get(&type_id).map_or(&[][..], Vec::as_slice);
        let Some(first) = candidates.first() else {
            return Err(BindingError::UnboundItemType { type_name });
        };
        if candidates.iter().any(|b| b.table.name != first.table.name) {
            return Err(BindingError::AmbiguousItemType {
                type_name,
                views: candidates.iter().map(|b| b.describe()).collect(),
            });
        }
        Ok(Arc::clone(preferring_versioned(candidates, first)))
    }

    /// The version attribute of item type `item`, if any view of it is
    /// versioned. Versioning belongs to the item type, not to one view.
    pub(crate) fn item_version(&self, item: TypeId) -> Option<String> {
        self.state.read().versioned.get(&item).cloned()
    }

    fn cached<T: Clone + 'static>(&self) -> Option<T> {
        self.state
            .read()
            .bound
            .get(&TypeId::of::<T>())
            .and_then(|bound| bound.downcast_ref::<T>())
            .cloned()
    }

    /// Cache `value` unless another thread bound the same type first, and
    /// return the cached instance.
    fn cache<T: Clone + Send + Sync + 'static>(&self, value: T) -> T {
        let mut state = self.state.write();
        let entry = state
            .bound
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(value.clone()));
        entry.downcast_ref::<T>().cloned().unwrap_or(value)
    }
}

fn preferring_versioned<'a>(
    candidates: &'a [Arc<ViewBinding>],
    fallback: &'a Arc<ViewBinding>,
) -> &'a Arc<ViewBinding> {
    candidates
        .iter()
        .find(|b| b.version_attribute.is_some())
        .unwrap_or(fallback)
}

fn validate_descriptor(descriptor: &TableDescriptor) -> Result<(), BindingError> {
    let invalid = |reason: String| BindingError::InvalidDescriptor {
        table: descriptor.name.clone(),
        reason,
    };
    if descriptor.name.is_empty() {
        return Err(invalid("table name is empty".into()));
    }
    if descriptor.partition_key.name.is_empty() {
        return Err(invalid("partition key name is empty".into()));
    }
    if let Some(sk) = &descriptor.sort_key
        && sk.name == descriptor.partition_key.name
    {
        return Err(invalid(format!(
            "sort key '{}' repeats the partition key",
            sk.name
        )));
    }
    if let Some(version) = &descriptor.version_attribute {
        let schema = descriptor.key_schema();
        let is_key = std::iter::once(schema.partition_key)
            .chain(schema.sort_key)
            .any(|def| &def.name == version);
        if is_key {
            return Err(invalid(format!(
                "version attribute '{version}' is a key attribute"
            )));
        }
    }

    let mut names = HashSet::new();
    for idx in &descriptor.indexes {
        if idx.name.is_empty() {
            return Err(invalid("index name is empty".into()));
        }
        if !names.insert(idx.name.as_str()) {
            return Err(invalid(format!("index '{}' declared twice", idx.name)));
        }
        if idx.kind == IndexKind::Local {
            if idx.partition_key != descriptor.partition_key {
                return Err(invalid(format!(
                    "local index '{}' must share the table partition key",
                    idx.name
                )));
            }
            if idx.sort_key.is_none() || descriptor.sort_key.is_none() {
                return Err(invalid(format!(
                    "local index '{}' requires a sort key on both table and index",
                    idx.name
                )));
            }
        }
    }
    Ok(())
}

/// Shared state behind a factory and everything it binds.
pub(crate) struct Context {
    pub(crate) client: Arc<dyn StoreClient>,
    pub(crate) config: Config,
    pub(crate) registry: Registry,
}

/// A typed logical table: a set of views over one physical table.
///
/// ```ignore
/// #[derive(Clone)]
/// struct MusicTable {
///     table: LogicalTable<MusicItem>,
///     albums: InlineView<AlbumKey, AlbumInfo>,
///     by_genre: SecondaryIndex<GenreKey, AlbumInfo>,
/// }
///
/// impl LogicalTableType for MusicTable {
///     type Item = MusicItem;
///
///     fn descriptor() -> TableDescriptor {
///         TableDescriptor::new("music", KeyDefinition::new("partition_key", KeyType::String))
///             .sort_key(KeyDefinition::new("sort_key", KeyType::String))
///             .index(IndexDescriptor::global(
///                 "genre_index",
///                 KeyDefinition::new("genre", KeyType::String),
///             ))
///     }
///
///     fn bind(table: LogicalTable<MusicItem>) -> Result<Self, BindingError> {
///         Ok(Self {
///             albums: table.inline_view(),
///             by_genre: table.secondary_index("genre_index")?,
///             table,
///         })
///     }
/// }
/// ```
pub trait LogicalTableType: Clone + Send + Sync + 'static {
    /// The root item type, holding every attribute stored in the table.
    type Item: Record;

    fn descriptor() -> TableDescriptor;

    fn bind(table: LogicalTable<Self::Item>) -> Result<Self, BindingError>;
}

/// A typed logical database: a set of logical tables.
pub trait LogicalDbType: Sized + Send + Sync + 'static {
    fn bind(factory: &LogicalDbFactory) -> Result<Self, BindingError>;
}

/// Creates bound logical databases and tables over one store client.
#[derive(Clone)]
pub struct LogicalDbFactory {
    ctx: Arc<Context>,
}

impl LogicalDbFactory {
    pub fn new(client: Arc<dyn StoreClient>, config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ctx: Arc::new(Context {
                client,
                config,
                registry: Registry::default(),
            }),
        })
    }

    pub(crate) fn from_context(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// A factory using [`Config::default`].
    pub fn with_defaults(client: Arc<dyn StoreClient>) -> Self {
        Self {
            ctx: Arc::new(Context {
                client,
                config: Config::default(),
                registry: Registry::default(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn logical_db<DB: LogicalDbType>(&self) -> Result<LogicalDb<DB>, BindingError> {
        let tables = DB::bind(self)?;
        debug!(db = std::any::type_name::<DB>(), "logical db bound");
        Ok(LogicalDb::new(tables, Arc::clone(&self.ctx)))
    }

    /// Bind `T`, or return the instance bound earlier.
    pub fn logical_table<T: LogicalTableType>(&self) -> Result<T, BindingError> {
        if let Some(bound) = self.ctx.registry.cached::<T>() {
            return Ok(bound);
        }
        let descriptor = self.ctx.registry.register_table(T::descriptor())?;
        let binding = self.ctx.registry.register_view::<T::Item, T::Item>(
            &descriptor,
            None,
            descriptor.version_attribute.clone(),
        );
        let table = LogicalTable::new(ViewCore::new(binding, Arc::clone(&self.ctx)));
        let bound = T::bind(table)?;
        Ok(self.ctx.registry.cache(bound))
    }
}

impl fmt::Debug for LogicalDbFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalDbFactory")
            .field("config", &self.ctx.config)
            .finish_non_exhaustive()
    }
}
