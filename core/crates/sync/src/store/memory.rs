use stash_bookmark::{Bookmark, BookmarkId, NewBookmark};

use std::{
	collections::HashMap,
	sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use futures::{future, stream, StreamExt};
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{
	ChangeKind, ChangePayload, ChannelStatus, DeleteFilter, FeedMessage, FeedStream, QueryFilter,
	RemoteStore, StoreError,
};

const FEED_CAPACITY: usize = 1024;

/// In-process store with the same observable contract as the remote one: store-assigned
/// ids and timestamps, `id AND owner` deletes, and an unscoped change feed.
///
/// Faults can be injected to exercise the degraded paths: failing reads or writes, a muted
/// feed (changes silently not delivered) and a dropped feed transport.
#[derive(Debug)]
pub struct MemoryStore {
	tables: RwLock<HashMap<String, Vec<Bookmark>>>,
	feed_tx: broadcast::Sender<(String, FeedMessage)>,
	fail_reads: AtomicBool,
	fail_writes: AtomicBool,
	feed_muted: AtomicBool,
	feed_down: AtomicBool,
}

impl Default for MemoryStore {
	fn default() -> Self {
		let (feed_tx, _) = broadcast::channel(FEED_CAPACITY);

		Self {
			tables: RwLock::default(),
			feed_tx,
			fail_reads: AtomicBool::new(false),
			fail_writes: AtomicBool::new(false),
			feed_muted: AtomicBool::new(false),
			feed_down: AtomicBool::new(false),
		}
	}
}

impl MemoryStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn fail_reads(&self, fail: bool) {
		self.fail_reads.store(fail, Ordering::Release);
	}

	pub fn fail_writes(&self, fail: bool) {
		self.fail_writes.store(fail, Ordering::Release);
	}

	/// Changes keep being committed but are no longer pushed, subscribers see nothing.
	pub fn mute_feed(&self, muted: bool) {
		self.feed_muted.store(muted, Ordering::Release);
	}

	/// Simulates the push transport dropping: subscribers get a `CLOSED` status and no
	/// further changes until [`MemoryStore::restore_feed`].
	pub fn drop_feed(&self) {
		self.feed_down.store(true, Ordering::Release);
		self.broadcast_to_all(FeedMessage::Status(ChannelStatus::Closed));
	}

	/// Simulates the transport reconnecting on its own.
	pub fn restore_feed(&self) {
		self.feed_down.store(false, Ordering::Release);
		self.broadcast_to_all(FeedMessage::Status(ChannelStatus::Subscribed));
	}

	pub async fn rows(&self, table: &str) -> Vec<Bookmark> {
		self.tables
			.read()
			.await
			.get(table)
			.cloned()
			.unwrap_or_default()
	}

	fn broadcast_to_all(&self, message: FeedMessage) {
		// Status changes concern every channel, the empty table name is a wildcard.
		if self.feed_tx.send((String::new(), message)).is_err() {
			trace!("No feed subscribers");
		}
	}

	fn publish(&self, table: &str, payload: ChangePayload) {
		if self.feed_muted.load(Ordering::Acquire) || self.feed_down.load(Ordering::Acquire) {
			trace!(?payload.event_type, "Feed muted, change not pushed");
			return;
		}

		if self
			.feed_tx
			.send((table.to_string(), FeedMessage::Change(payload)))
			.is_err()
		{
			trace!("No feed subscribers");
		}
	}
}

#[async_trait]
impl RemoteStore for MemoryStore {
	async fn query(&self, table: &str, filter: &QueryFilter) -> Result<Vec<Bookmark>, StoreError> {
		if self.fail_reads.load(Ordering::Acquire) {
			return Err(StoreError::new("connection reset by peer"));
		}

		let mut rows = self
			.tables
			.read()
			.await
			.get(table)
			.map(|rows| {
				rows.iter()
					.filter(|row| row.owner == filter.owner)
					.cloned()
					.collect::<Vec<_>>()
			})
			.unwrap_or_default();

		rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

		Ok(rows)
	}

	async fn insert(&self, table: &str, record: NewBookmark) -> Result<Bookmark, StoreError> {
		if self.fail_writes.load(Ordering::Acquire) {
			return Err(StoreError::new("insert rejected"));
		}

		let NewBookmark {
			owner,
			title,
			url,
			favicon_url,
			category,
		} = record;

		let bookmark = Bookmark {
			id: BookmarkId::new(Uuid::new_v4().to_string()),
			owner,
			title,
			url,
			favicon_url,
			category,
			created_at: Utc::now(),
		};

		self.tables
			.write()
			.await
			.entry(table.to_string())
			.or_default()
			.push(bookmark.clone());

		match serde_json::to_value(&bookmark) {
			Ok(row) => self.publish(
				table,
				ChangePayload {
					event_type: ChangeKind::Insert,
					new: Some(row),
					old: None,
				},
			),
			Err(e) => warn!(?e, "Failed to encode inserted row for the feed"),
		}

		debug!(bookmark_id = %bookmark.id, owner = %bookmark.owner, "Inserted row");

		Ok(bookmark)
	}

	async fn delete(&self, table: &str, filter: &DeleteFilter) -> Result<u64, StoreError> {
		if self.fail_writes.load(Ordering::Acquire) {
			return Err(StoreError::new("delete rejected"));
		}

		let removed = {
			let mut tables = self.tables.write().await;
			let Some(rows) = tables.get_mut(table) else {
				return Ok(0);
			};

			let before = rows.len();
			rows.retain(|row| !(row.id == filter.id && row.owner == filter.owner));
			before - rows.len()
		};

		if removed > 0 {
			// Like a default replica identity, only the primary key survives in `old`.
			self.publish(
				table,
				ChangePayload {
					event_type: ChangeKind::Delete,
					new: None,
					old: Some(json!({ "id": filter.id })),
				},
			);
		}

		debug!(bookmark_id = %filter.id, removed, "Deleted rows");

		Ok(removed as u64)
	}

	async fn subscribe(&self, table: &str, events: &[ChangeKind]) -> Result<FeedStream, StoreError> {
		let table = table.to_string();
		let events = events.to_vec();
		let initial_status = if self.feed_down.load(Ordering::Acquire) {
			ChannelStatus::TimedOut
		} else {
			ChannelStatus::Subscribed
		};

		let changes = BroadcastStream::new(self.feed_tx.subscribe()).filter_map(move |res| {
			future::ready(match res {
				Ok((target, FeedMessage::Status(status))) if target.is_empty() => {
					Some(FeedMessage::Status(status))
				}
				Ok((target, FeedMessage::Change(payload)))
					if target == table && events.contains(&payload.event_type) =>
				{
					Some(FeedMessage::Change(payload))
				}
				Ok(_) => None,
				Err(BroadcastStreamRecvError::Lagged(skipped)) => {
					warn!(skipped, "Feed subscriber lagged, changes were lost");
					None
				}
			})
		});

		Ok(stream::once(future::ready(FeedMessage::Status(initial_status)))
			.chain(changes)
			.boxed())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use stash_bookmark::UserId;

	fn record(owner: &str, title: &str) -> NewBookmark {
		NewBookmark {
			owner: UserId::new(owner),
			title: title.to_string(),
			url: "https://example.com".to_string(),
			favicon_url: None,
			category: None,
		}
	}

	#[tokio::test]
	async fn queries_are_scoped_to_the_owner() -> Result<(), StoreError> {
		let store = MemoryStore::new();

		store.insert("bookmarks", record("u1", "mine")).await?;
		store.insert("bookmarks", record("u2", "theirs")).await?;

		let rows = store
			.query("bookmarks", &QueryFilter::owned_by(UserId::new("u1")))
			.await?;

		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].title, "mine");

		Ok(())
	}

	#[tokio::test]
	async fn deletes_require_matching_owner() -> Result<(), StoreError> {
		let store = MemoryStore::new();
		let row = store.insert("bookmarks", record("u1", "mine")).await?;

		let foreign = DeleteFilter {
			id: row.id.clone(),
			owner: UserId::new("u2"),
		};
		assert_eq!(store.delete("bookmarks", &foreign).await?, 0);

		let own = DeleteFilter {
			id: row.id,
			owner: UserId::new("u1"),
		};
		assert_eq!(store.delete("bookmarks", &own).await?, 1);
		assert!(store.rows("bookmarks").await.is_empty());

		Ok(())
	}

	#[tokio::test]
	async fn feed_pushes_subscribed_kinds_only() -> Result<(), StoreError> {
		let store = MemoryStore::new();
		let mut feed = store.subscribe("bookmarks", &[ChangeKind::Delete]).await?;

		assert_eq!(
			feed.next().await,
			Some(FeedMessage::Status(ChannelStatus::Subscribed))
		);

		let row = store.insert("bookmarks", record("u1", "mine")).await?;
		store
			.delete(
				"bookmarks",
				&DeleteFilter {
					id: row.id.clone(),
					owner: row.owner,
				},
			)
			.await?;

		let Some(FeedMessage::Change(payload)) = feed.next().await else {
			panic!("expected a change");
		};
		assert_eq!(payload.event_type, ChangeKind::Delete);
		assert_eq!(payload.old, Some(json!({ "id": row.id })));

		Ok(())
	}

	#[tokio::test]
	async fn injected_failures_surface_as_store_errors() {
		let store = MemoryStore::new();

		store.fail_writes(true);
		assert!(store.insert("bookmarks", record("u1", "x")).await.is_err());

		store.fail_reads(true);
		assert!(store
			.query("bookmarks", &QueryFilter::owned_by(UserId::new("u1")))
			.await
			.is_err());
	}
}
