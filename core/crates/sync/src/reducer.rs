use stash_actors::Stopper;
use stash_bookmark::{Bookmark, BookmarkId};

use std::{
	collections::{HashSet, VecDeque},
	future::IntoFuture,
	sync::Arc,
};

use async_channel as chan;
use futures::FutureExt;
use futures_concurrency::future::Race;
use tokio::sync::{oneshot, watch};
use tracing::{debug, instrument, trace, warn};

use super::Error;

/// Which producer an event came from. Only used for logging, the merge ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Source {
	Optimistic,
	Rollback,
	Feed,
	Poll,
	InitialLoad,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
	Insert(Bookmark),
	Delete(BookmarkId),
}

impl SyncEvent {
	#[must_use]
	pub const fn id(&self) -> &BookmarkId {
		match self {
			Self::Insert(bookmark) => &bookmark.id,
			Self::Delete(id) => id,
		}
	}
}

/// The bookmarks currently known to this view. Newest observed insert first.
#[derive(Debug, Clone, Default)]
pub struct LocalCollection {
	bookmarks: VecDeque<Bookmark>,
	ids: HashSet<BookmarkId>,
	loaded: bool,
}

impl LocalCollection {
	/// Prepends `bookmark` unless its id is already present. Returns whether anything changed.
	pub fn apply_insert(&mut self, bookmark: Bookmark) -> bool {
		if !self.ids.insert(bookmark.id.clone()) {
			return false;
		}

		self.bookmarks.push_front(bookmark);
		true
	}

	/// Removes the bookmark with `id`, if present, handing it back.
	pub fn apply_delete(&mut self, id: &BookmarkId) -> Option<Bookmark> {
		if !self.ids.remove(id) {
			return None;
		}

		self.bookmarks
			.iter()
			.position(|bookmark| bookmark.id == *id)
			.and_then(|idx| self.bookmarks.remove(idx))
	}

	pub fn apply(&mut self, event: SyncEvent) -> bool {
		match event {
			SyncEvent::Insert(bookmark) => self.apply_insert(bookmark),
			SyncEvent::Delete(id) => self.apply_delete(&id).is_some(),
		}
	}

	/// Applies an authoritative listing (newest first), so that its newest row ends up first.
	pub fn apply_listing(&mut self, rows: Vec<Bookmark>) -> usize {
		rows.into_iter()
			.rev()
			.map(|row| self.apply_insert(row))
			.filter(|inserted| *inserted)
			.count()
	}

	#[must_use]
	pub fn contains(&self, id: &BookmarkId) -> bool {
		self.ids.contains(id)
	}

	#[must_use]
	pub fn get(&self, id: &BookmarkId) -> Option<&Bookmark> {
		if !self.contains(id) {
			return None;
		}

		self.bookmarks.iter().find(|bookmark| bookmark.id == *id)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Bookmark> + '_ {
		self.bookmarks.iter()
	}

	#[must_use]
	pub fn to_vec(&self) -> Vec<Bookmark> {
		self.bookmarks.iter().cloned().collect()
	}

	#[must_use]
	pub fn ids(&self) -> &HashSet<BookmarkId> {
		&self.ids
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.bookmarks.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.bookmarks.is_empty()
	}

	/// Whether the initial load has been applied. Until then an empty collection means
	/// "still loading", not "no bookmarks".
	#[must_use]
	pub const fn is_loaded(&self) -> bool {
		self.loaded
	}
}

impl<'a> IntoIterator for &'a LocalCollection {
	type Item = &'a Bookmark;
	type IntoIter = std::collections::vec_deque::Iter<'a, Bookmark>;

	fn into_iter(self) -> Self::IntoIter {
		self.bookmarks.iter()
	}
}

#[derive(Debug)]
pub(crate) enum ReducerMessage {
	Event {
		source: Source,
		event: SyncEvent,
		applied_tx: Option<oneshot::Sender<bool>>,
	},
	Listing {
		rows: Vec<Bookmark>,
		done_tx: oneshot::Sender<()>,
	},
}

/// Producer side of the fan-in channel. Cheap to clone, one per producer.
#[derive(Debug, Clone)]
pub struct EventSink {
	tx: chan::Sender<ReducerMessage>,
}

impl EventSink {
	/// Queues an event without waiting for it to be applied.
	pub async fn emit(&self, source: Source, event: SyncEvent) -> Result<(), Error> {
		self.tx
			.send(ReducerMessage::Event {
				source,
				event,
				applied_tx: None,
			})
			.await
			.map_err(|_| Error::ReducerClosed)
	}

	/// Queues an event and waits until the reducer applied it. Returns whether the
	/// collection changed.
	pub async fn apply(&self, source: Source, event: SyncEvent) -> Result<bool, Error> {
		let (applied_tx, applied_rx) = oneshot::channel();

		self.tx
			.send(ReducerMessage::Event {
				source,
				event,
				applied_tx: Some(applied_tx),
			})
			.await
			.map_err(|_| Error::ReducerClosed)?;

		applied_rx.await.map_err(|_| Error::ReducerClosed)
	}

	/// Applies the initial listing and marks the collection as loaded.
	pub async fn load(&self, rows: Vec<Bookmark>) -> Result<(), Error> {
		let (done_tx, done_rx) = oneshot::channel();

		self.tx
			.send(ReducerMessage::Listing { rows, done_tx })
			.await
			.map_err(|_| Error::ReducerClosed)?;

		done_rx.await.map_err(|_| Error::ReducerClosed)
	}
}

/// The single writer of the [`LocalCollection`]. Every producer goes through an
/// [`EventSink`], and readers only ever see the collection through a watch channel.
#[derive(Debug, Clone)]
pub struct Reducer {
	rx: chan::Receiver<ReducerMessage>,
	state: Arc<watch::Sender<LocalCollection>>,
}

impl Reducer {
	#[must_use]
	pub fn new(buffer: usize) -> (Self, EventSink, watch::Receiver<LocalCollection>) {
		let (tx, rx) = chan::bounded(buffer.max(1));
		let (state, state_rx) = watch::channel(LocalCollection::default());

		(
			Self {
				rx,
				state: Arc::new(state),
			},
			EventSink { tx },
			state_rx,
		)
	}

	#[instrument(skip_all)]
	pub async fn run(self, stop: Stopper) {
		enum Race {
			Message(Result<ReducerMessage, chan::RecvError>),
			Stopped,
		}

		loop {
			match (
				self.rx.recv().map(Race::Message),
				stop.into_future().map(|()| Race::Stopped),
			)
				.race()
				.await
			{
				Race::Message(Ok(message)) => self.handle(message),
				Race::Message(Err(chan::RecvError)) => {
					debug!("Every producer is gone, reducer winding down");
					break;
				}
				Race::Stopped => break,
			}
		}
	}

	fn handle(&self, message: ReducerMessage) {
		match message {
			ReducerMessage::Event {
				source,
				event,
				applied_tx,
			} => {
				let bookmark_id = event.id().clone();
				let kind = match &event {
					SyncEvent::Insert(_) => "insert",
					SyncEvent::Delete(_) => "delete",
				};

				let changed = self.state.send_if_modified(|collection| collection.apply(event));

				trace!(%source, %bookmark_id, kind, changed, "Applied sync event;");

				if let Some(tx) = applied_tx {
					if tx.send(changed).is_err() {
						warn!("Event producer stopped waiting for the ack");
					}
				}
			}

			ReducerMessage::Listing { rows, done_tx } => {
				let total = rows.len();

				self.state.send_modify(|collection| {
					let inserted = collection.apply_listing(rows);
					collection.loaded = true;

					debug!(source = %Source::InitialLoad, total, inserted, "Applied initial listing;");
				});

				if done_tx.send(()).is_err() {
					warn!("Initial load stopped waiting for the ack");
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use stash_actors::Actors;
	use stash_bookmark::UserId;

	use chrono::{DateTime, Utc};

	fn bookmark(id: &str) -> Bookmark {
		Bookmark {
			id: BookmarkId::new(id),
			owner: UserId::new("u1"),
			title: format!("title {id}"),
			url: format!("https://{id}.example.com"),
			favicon_url: None,
			category: None,
			created_at: DateTime::<Utc>::UNIX_EPOCH,
		}
	}

	fn ids(collection: &LocalCollection) -> Vec<String> {
		collection.iter().map(|b| b.id.to_string()).collect()
	}

	#[test]
	fn insert_is_idempotent() {
		let mut collection = LocalCollection::default();

		assert!(collection.apply_insert(bookmark("1")));
		let once = ids(&collection);

		assert!(!collection.apply_insert(bookmark("1")));
		assert_eq!(ids(&collection), once);
		assert_eq!(collection.len(), 1);
	}

	#[test]
	fn delete_is_idempotent_even_for_unknown_ids() {
		let mut collection = LocalCollection::default();
		collection.apply_insert(bookmark("1"));

		assert!(collection.apply_delete(&BookmarkId::new("1")).is_some());
		assert!(collection.apply_delete(&BookmarkId::new("1")).is_none());
		assert!(collection.apply_delete(&BookmarkId::new("never")).is_none());
		assert!(collection.is_empty());
		assert!(collection.ids().is_empty());
	}

	#[test]
	fn newest_insert_is_prepended() {
		let mut collection = LocalCollection::default();
		collection.apply_insert(bookmark("1"));
		collection.apply_insert(bookmark("2"));

		assert_eq!(ids(&collection), ["2", "1"]);
	}

	#[test]
	fn listing_keeps_newest_first() {
		let mut collection = LocalCollection::default();

		let inserted = collection.apply_listing(vec![bookmark("c"), bookmark("b"), bookmark("a")]);

		assert_eq!(inserted, 3);
		assert_eq!(ids(&collection), ["c", "b", "a"]);
	}

	#[test]
	fn listing_skips_known_bookmarks() {
		let mut collection = LocalCollection::default();
		collection.apply_insert(bookmark("b"));

		let inserted = collection.apply_listing(vec![bookmark("c"), bookmark("b"), bookmark("a")]);

		assert_eq!(inserted, 2);
		assert_eq!(collection.len(), 3);
		assert_eq!(ids(&collection)[0], "c");
	}

	#[test]
	fn converges_to_inserted_minus_deleted() {
		// Per id the insert happens before its delete, everything else is interleaved freely.
		let streams = [
			vec![
				SyncEvent::Insert(bookmark("1")),
				SyncEvent::Insert(bookmark("2")),
				SyncEvent::Delete(BookmarkId::new("1")),
			],
			vec![
				SyncEvent::Insert(bookmark("2")),
				SyncEvent::Insert(bookmark("3")),
				SyncEvent::Delete(BookmarkId::new("3")),
			],
			vec![SyncEvent::Insert(bookmark("4")), SyncEvent::Delete(BookmarkId::new("9"))],
		];

		let mut collection = LocalCollection::default();
		let mut cursors = [0_usize; 3];
		// round robin with a skewed stride
		let mut turn = 0;
		while cursors.iter().zip(&streams).any(|(c, s)| *c < s.len()) {
			let stream = (turn * 2 + turn / 3) % streams.len();
			turn += 1;
			if let Some(event) = streams[stream].get(cursors[stream]) {
				collection.apply(event.clone());
				cursors[stream] += 1;
			}
		}

		let mut remaining = ids(&collection);
		remaining.sort();
		assert_eq!(remaining, ["2", "4"]);
	}

	async fn spawn_reducer() -> (Actors<&'static str>, EventSink, watch::Receiver<LocalCollection>) {
		let actors = Actors::default();
		let (reducer, sink, state) = Reducer::new(8);

		actors
			.declare(
				"reducer",
				move |stop| {
					let reducer = reducer.clone();
					async move { reducer.run(stop).await }
				},
				true,
			)
			.await;

		(actors, sink, state)
	}

	#[tokio::test]
	async fn same_bookmark_from_every_producer_is_kept_once() -> Result<(), Error> {
		let sources = [Source::Optimistic, Source::Feed, Source::Poll];
		let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

		for order in orders {
			let (actors, sink, state) = spawn_reducer().await;

			let applied = {
				let mut applied = Vec::with_capacity(order.len());
				for idx in order {
					applied.push(
						sink.apply(sources[idx], SyncEvent::Insert(bookmark("1")))
							.await?,
					);
				}
				applied
			};

			// only the first delivery, whoever made it, changes anything
			assert_eq!(applied, [true, false, false]);
			assert_eq!(ids(&state.borrow()), ["1"]);

			actors.stop("reducer").await;
		}

		Ok(())
	}

	#[tokio::test]
	async fn reducer_task_applies_and_acks() -> Result<(), Error> {
		let (actors, sink, state) = spawn_reducer().await;

		assert!(sink.apply(Source::Optimistic, SyncEvent::Insert(bookmark("1"))).await?);
		assert!(!state.borrow().is_loaded());

		sink.load(vec![bookmark("2"), bookmark("1")]).await?;

		{
			let collection = state.borrow();
			assert!(collection.is_loaded());
			assert_eq!(ids(&collection), ["2", "1"]);
		}

		assert!(
			sink.apply(Source::Poll, SyncEvent::Delete(BookmarkId::new("1")))
				.await?
		);
		assert_eq!(ids(&state.borrow()), ["2"]);

		actors.stop("reducer").await;
		assert!(!actors.is_running("reducer").await);

		Ok(())
	}
}
