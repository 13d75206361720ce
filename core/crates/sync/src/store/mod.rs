//! The remote store as seen from this crate: a table that can be queried, written to and
//! subscribed to. Everything behind the trait (transport, row level security, id assignment)
//! belongs to the store.

use stash_bookmark::{Bookmark, BookmarkId, NewBookmark, UserId};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod shared;

pub use memory::MemoryStore;

/// Opaque failure reported by the store. The message is carried for logs only, nothing
/// in this crate inspects it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("remote store error: {message}")]
pub struct StoreError {
	message: String,
}

impl StoreError {
	#[must_use]
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
		}
	}

	#[must_use]
	pub fn message(&self) -> &str {
		&self.message
	}
}

/// Reads are always constrained to a single owner. Rows come back newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilter {
	pub owner: UserId,
}

impl QueryFilter {
	#[must_use]
	pub fn owned_by(owner: UserId) -> Self {
		Self { owner }
	}
}

/// Deletes always match on `id AND owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFilter {
	pub id: BookmarkId,
	pub owner: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
	Insert,
	Update,
	Delete,
}

/// A row level change as pushed by the store. Rows travel as raw JSON, decoding is up
/// to the subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
	#[serde(rename = "eventType")]
	pub event_type: ChangeKind,
	#[serde(default)]
	pub new: Option<serde_json::Value>,
	#[serde(default)]
	pub old: Option<serde_json::Value>,
}

/// Status of the push channel, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
	Subscribed,
	TimedOut,
	Closed,
	ChannelError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
	Status(ChannelStatus),
	Change(ChangePayload),
}

/// Push notifications for one table. The stream ends when the transport gives up for good.
pub type FeedStream = BoxStream<'static, FeedMessage>;

#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
	async fn query(&self, table: &str, filter: &QueryFilter) -> Result<Vec<Bookmark>, StoreError>;

	async fn insert(&self, table: &str, record: NewBookmark) -> Result<Bookmark, StoreError>;

	/// Returns how many rows were affected. Missing or foreign rows are not an error.
	async fn delete(&self, table: &str, filter: &DeleteFilter) -> Result<u64, StoreError>;

	/// Changes are not scoped by owner, subscribers filter on their side.
	async fn subscribe(&self, table: &str, events: &[ChangeKind]) -> Result<FeedStream, StoreError>;
}
