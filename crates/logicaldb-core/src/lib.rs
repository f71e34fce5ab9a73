//! # LogicalDB
//!
//! Typed, single-table views over a DynamoDB-style key-value store.
//!
//! A physical table usually stores several kinds of rows side by side. A
//! [`LogicalTableType`] declares the table once through a static
//! [`TableDescriptor`] and exposes typed views over it: [`InlineView`]s for
//! each row kind, addressed by the table's primary key, and
//! [`SecondaryIndex`] views for its indexes. A [`LogicalDb`] groups bound
//! tables and adds batch and transactional operations that span them.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use logicaldb_core::api::{InlineView, Loader, LogicalTable, Writer};
//! use logicaldb_core::client::MemoryStore;
//! use logicaldb_core::error::BindingError;
//! use logicaldb_core::types::{ConsistentReads, KeyDefinition, KeyType, TableDescriptor};
//! use logicaldb_core::{LogicalDbFactory, LogicalDbType, LogicalTableType};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Row {
//!     partition_key: String,
//!     sort_key: String,
//! }
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct AlbumKey {
//!     partition_key: String,
//!     sort_key: String,
//! }
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Album {
//!     partition_key: String,
//!     sort_key: String,
//!     title: String,
//! }
//!
//! #[derive(Clone)]
//! struct Music {
//!     albums: InlineView<AlbumKey, Album>,
//! }
//!
//! impl LogicalTableType for Music {
//!     type Item = Row;
//!
//!     fn descriptor() -> TableDescriptor {
//!         TableDescriptor::new("music", KeyDefinition::new("partition_key", KeyType::String))
//!             .sort_key(KeyDefinition::new("sort_key", KeyType::String))
//!     }
//!
//!     fn bind(table: LogicalTable<Row>) -> Result<Self, BindingError> {
//!         Ok(Self { albums: table.inline_view() })
//!     }
//! }
//!
//! struct Db {
//!     music: Music,
//! }
//!
//! impl LogicalDbType for Db {
//!     fn bind(factory: &LogicalDbFactory) -> Result<Self, BindingError> {
//!         Ok(Self { music: factory.logical_table()? })
//!     }
//! }
//!
//! let store = Arc::new(MemoryStore::new());
//! store.create_table(Music::descriptor()).unwrap();
//! let db = LogicalDbFactory::with_defaults(store).logical_db::<Db>().unwrap();
//!
//! db.music.albums.save(&Album {
//!     partition_key: "ALBUM_1".into(),
//!     sort_key: "INFO".into(),
//!     title: "Blue".into(),
//! }).unwrap();
//! let key = AlbumKey { partition_key: "ALBUM_1".into(), sort_key: "INFO".into() };
//! let album = db.music.albums.load(&key, ConsistentReads::Eventual).unwrap();
//! assert_eq!(album.unwrap().title, "Blue");
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod encoding;
pub mod error;
pub mod types;

pub use api::{LogicalDb, LogicalDbFactory, LogicalDbType, LogicalTableType};
pub use client::{MemoryStore, StoreClient};
pub use config::{Config, RetryPolicy};
pub use error::{Error, Result};
