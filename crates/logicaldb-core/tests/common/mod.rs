//! Shared fixture: a single-table music catalog plus a versioned users table.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use logicaldb_core::api::key_utils;
use logicaldb_core::api::{Condition, InlineView, LogicalTable, SecondaryIndex};
use logicaldb_core::client::{
    BatchGetOutput, BatchGetRequest, BatchWriteOutput, BatchWriteRequest, ClientResult,
    CountOutput, QueryOutput, QueryRequest, ScanRequest, TableKey, TransactWriteOp,
};
use logicaldb_core::error::{BindingError, StoreError};
use logicaldb_core::types::{
    ConsistentReads, Document, IndexDescriptor, KeyDefinition, KeyType, TableDescriptor,
};
use logicaldb_core::{
    Config, LogicalDb, LogicalDbFactory, LogicalDbType, LogicalTableType, MemoryStore,
    RetryPolicy, StoreClient,
};

/// Any row of the music table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicItem {
    pub partition_key: String,
    pub sort_key: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumKey {
    pub partition_key: String,
    pub sort_key: String,
}

impl AlbumKey {
    pub fn new(album: &str) -> Self {
        Self {
            partition_key: album.to_string(),
            sort_key: "INFO".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumInfo {
    pub partition_key: String,
    pub sort_key: String,
    pub title: String,
    pub genre: String,
}

impl AlbumInfo {
    pub fn new(album: &str, title: &str, genre: &str) -> Self {
        Self {
            partition_key: album.to_string(),
            sort_key: "INFO".to_string(),
            title: title.to_string(),
            genre: genre.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackKey {
    pub partition_key: String,
    pub sort_key: String,
}

impl TrackKey {
    pub fn new(album: &str, number: u32) -> Self {
        Self {
            partition_key: album.to_string(),
            sort_key: track_sort_key(number),
        }
    }

    /// Bounds covering every track of an album, ascending.
    pub fn bounds(album: &str) -> (Self, Self) {
        let bound = |sort_key: &str| Self {
            partition_key: album.to_string(),
            sort_key: sort_key.to_string(),
        };
        (bound("TRACK_"), bound("TRACK_~"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumTrack {
    pub partition_key: String,
    pub sort_key: String,
    pub name: String,
    pub number: u32,
}

impl AlbumTrack {
    pub fn new(album: &str, number: u32) -> Self {
        Self {
            partition_key: album.to_string(),
            sort_key: track_sort_key(number),
            name: format!("Track {number}"),
            number,
        }
    }
}

fn track_sort_key(number: u32) -> String {
    format!("TRACK_{number:04}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenreKey {
    pub genre: String,
    pub title: String,
}

impl GenreKey {
    pub fn new(genre: &str, title: &str) -> Self {
        Self {
            genre: genre.to_string(),
            title: title.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Music {
    pub table: LogicalTable<MusicItem>,
    pub albums: InlineView<AlbumKey, AlbumInfo>,
    pub tracks: InlineView<TrackKey, AlbumTrack>,
    pub by_genre: SecondaryIndex<GenreKey, AlbumInfo>,
}

impl LogicalTableType for Music {
    type Item = MusicItem;

    fn descriptor() -> TableDescriptor {
        TableDescriptor::new(
            "music",
            KeyDefinition::new("partition_key", KeyType::String),
        )
        .sort_key(KeyDefinition::new("sort_key", KeyType::String))
        .index(
            IndexDescriptor::global("genre_index", KeyDefinition::new("genre", KeyType::String))
                .sort_key(KeyDefinition::new("title", KeyType::String)),
        )
    }

    fn bind(table: LogicalTable<MusicItem>) -> Result<Self, BindingError> {
        Ok(Self {
            albums: table.inline_view(),
            tracks: table.inline_view(),
            by_genre: table.secondary_index("genre_index")?,
            table,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl User {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            user_id: id.to_string(),
            name: name.to_string(),
            version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserKey {
    pub user_id: String,
}

impl UserKey {
    pub fn new(id: &str) -> Self {
        Self {
            user_id: id.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Users {
    pub table: LogicalTable<User>,
    pub by_id: InlineView<UserKey, User>,
}

impl LogicalTableType for Users {
    type Item = User;

    fn descriptor() -> TableDescriptor {
        TableDescriptor::new("users", KeyDefinition::new("user_id", KeyType::String))
            .version_attribute("version")
    }

    fn bind(table: LogicalTable<User>) -> Result<Self, BindingError> {
        Ok(Self {
            by_id: table.inline_view(),
            table,
        })
    }
}

pub struct MusicDb {
    pub music: Music,
    pub users: Users,
}

impl LogicalDbType for MusicDb {
    fn bind(factory: &LogicalDbFactory) -> Result<Self, BindingError> {
        Ok(Self {
            music: factory.logical_table()?,
            users: factory.logical_table()?,
        })
    }
}

/// Retries quickly so exhausted budgets do not slow the suite down.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        multiplier: 2.0,
        jitter: 0.0,
    }
}

pub fn setup() -> (Arc<MemoryStore>, LogicalDb<MusicDb>) {
    setup_with(fast_retry(4))
}

pub fn setup_with(policy: RetryPolicy) -> (Arc<MemoryStore>, LogicalDb<MusicDb>) {
    let store = Arc::new(
        MemoryStore::with_tables([Music::descriptor(), Users::descriptor()]).unwrap(),
    );
    let config = Config::builder().with_retry_policy(policy).build().unwrap();
    let factory = LogicalDbFactory::new(store.clone(), config).unwrap();
    let db = factory.logical_db::<MusicDb>().unwrap();
    (store, db)
}

/// A store whose batch writes start failing after the first `allowed` calls.
/// Everything else goes straight to the wrapped [`MemoryStore`].
pub struct FailingBatchWrites {
    pub inner: Arc<MemoryStore>,
    allowed: usize,
    error: StoreError,
    batch_writes: AtomicUsize,
}

impl FailingBatchWrites {
    pub fn new(inner: Arc<MemoryStore>, allowed: usize, error: StoreError) -> Self {
        Self {
            inner,
            allowed,
            error,
            batch_writes: AtomicUsize::new(0),
        }
    }

    /// Batch-write calls seen, failed ones included.
    pub fn batch_writes(&self) -> usize {
        self.batch_writes.load(Ordering::SeqCst)
    }
}

impl StoreClient for FailingBatchWrites {
    fn get_item(
        &self,
        table: &str,
        key: &Document,
        consistency: ConsistentReads,
    ) -> ClientResult<Option<Document>> {
        self.inner.get_item(table, key, consistency)
    }

    fn put_item(
        &self,
        table: &str,
        item: Document,
        condition: Option<&Condition>,
    ) -> ClientResult<()> {
        self.inner.put_item(table, item, condition)
    }

    fn delete_item(
        &self,
        table: &str,
        key: &Document,
        condition: Option<&Condition>,
    ) -> ClientResult<()> {
        self.inner.delete_item(table, key, condition)
    }

    fn batch_get(&self, request: BatchGetRequest) -> ClientResult<BatchGetOutput> {
        self.inner.batch_get(request)
    }

    fn batch_write(&self, request: BatchWriteRequest) -> ClientResult<BatchWriteOutput> {
        if self.batch_writes.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(self.error.clone());
        }
        self.inner.batch_write(request)
    }

    fn transact_get(&self, keys: &[TableKey]) -> ClientResult<Vec<Option<Document>>> {
        self.inner.transact_get(keys)
    }

    fn transact_write(&self, operations: Vec<TransactWriteOp>) -> ClientResult<()> {
        self.inner.transact_write(operations)
    }

    fn query(&self, request: &QueryRequest) -> ClientResult<QueryOutput> {
        self.inner.query(request)
    }

    fn scan(&self, request: &ScanRequest) -> ClientResult<QueryOutput> {
        self.inner.scan(request)
    }

    fn count(&self, request: &ScanRequest) -> ClientResult<CountOutput> {
        self.inner.count(request)
    }
}

/// A database over [`FailingBatchWrites`].
pub fn setup_failing(
    policy: RetryPolicy,
    allowed: usize,
    error: StoreError,
) -> (Arc<FailingBatchWrites>, LogicalDb<MusicDb>) {
    let inner = Arc::new(
        MemoryStore::with_tables([Music::descriptor(), Users::descriptor()]).unwrap(),
    );
    let store = Arc::new(FailingBatchWrites::new(inner, allowed, error));
    let config = Config::builder().with_retry_policy(policy).build().unwrap();
    let factory = LogicalDbFactory::new(store.clone(), config).unwrap();
    let db = factory.logical_db::<MusicDb>().unwrap();
    (store, db)
}

pub fn doc<T: Serialize>(value: &T) -> Document {
    key_utils::to_document(value).unwrap()
}

pub fn seed_tracks(db: &LogicalDb<MusicDb>, album: &str, count: u32) {
    use logicaldb_core::api::Writer;
    for number in 1..=count {
        db.music.tracks.save(&AlbumTrack::new(album, number)).unwrap();
    }
}
