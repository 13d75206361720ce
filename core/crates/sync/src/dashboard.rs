use stash_actors::Actors;
use stash_bookmark::{
	view::{category_counts, CategoryCounts, ViewFilters},
	Bookmark, BookmarkId, UserId,
};

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::{
	client::MutationClient,
	config::SyncConfig,
	feed::{ChangeFeedListener, FeedState},
	identity::{CurrentUser, SessionProvider},
	poller::{KnownIds, ReconciliationPoller},
	reducer::{EventSink, LocalCollection, Reducer, Source, SyncEvent},
	store::RemoteStore,
	Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum SyncActor {
	#[strum(serialize = "Sync Reducer")]
	Reducer,
	#[strum(serialize = "Change Feed")]
	ChangeFeed,
	#[strum(serialize = "Reconciliation Poller")]
	Poller,
}

/// One mounted bookmark view: the reducer owning its collection plus the feed listener
/// and poller keeping it fresh, all living exactly as long as the view.
pub struct Dashboard {
	client: MutationClient,
	sink: EventSink,
	collection: watch::Receiver<LocalCollection>,
	feed_state: watch::Receiver<FeedState>,
	user_tx: watch::Sender<UserId>,
	actors: Actors<SyncActor>,
}

impl Dashboard {
	/// Starts the synchronization tasks and waits for the initial load.
	///
	/// A failed initial load is not fatal, the collection is marked loaded and left for the
	/// poller to fill.
	#[instrument(skip_all, fields(table = %config.table), err)]
	pub async fn mount(
		config: &SyncConfig,
		store: Arc<dyn RemoteStore>,
		identity: Arc<dyn SessionProvider>,
	) -> Result<Self, Error> {
		let client = MutationClient::new(Arc::clone(&store), identity, config.table.as_str())
			.with_strict_delete(config.strict_delete);
		let user = client.current_user()?;

		let (user_tx, current_user) = CurrentUser::channel(user.clone());
		let (reducer, sink, collection) = Reducer::new(config.event_buffer);
		let (listener, feed_state) = ChangeFeedListener::new(
			Arc::clone(&store),
			config.table.as_str(),
			config.channel.as_str(),
			current_user.clone(),
			sink.clone(),
		);

		let actors = Actors::default();

		actors
			.declare(
				SyncActor::Reducer,
				move |stop| {
					let reducer = reducer.clone();
					async move { reducer.run(stop).await }
				},
				true,
			)
			.await;

		actors
			.declare(
				SyncActor::ChangeFeed,
				move |stop| {
					let listener = listener.clone();
					async move { listener.run(stop).await }
				},
				true,
			)
			.await;

		let rows = match client.initial_load().await {
			Ok(rows) => rows,
			Err(e) => {
				warn!(%e, "Initial load failed, the poller will catch up;");
				vec![]
			}
		};

		// The poller diffs against what the view already shows, not against its own first read.
		let baseline = KnownIds::seeded(rows.iter().map(|row| row.id.clone()));
		let loaded = rows.len();

		// The listing has to be queued ahead of anything the poller emits, otherwise an early
		// delete could be overwritten by the stale listing.
		sink.load(rows).await?;

		let poller = ReconciliationPoller::new(
			store,
			config.table.as_str(),
			current_user,
			sink.clone(),
			config.poll_interval(),
		)
		.with_baseline(baseline);

		actors
			.declare(
				SyncActor::Poller,
				move |stop| {
					let poller = poller.clone();
					async move { poller.run(stop).await }
				},
				true,
			)
			.await;

		info!(%user, loaded, "Mounted bookmark dashboard;");

		Ok(Self {
			client,
			sink,
			collection,
			feed_state,
			user_tx,
			actors,
		})
	}

	/// Stores a new bookmark and shows it right away, without waiting for the feed.
	pub async fn add_bookmark(
		&self,
		title: &str,
		url: &str,
		category: &str,
	) -> Result<Bookmark, Error> {
		let bookmark = self.client.add_bookmark(title, url, category).await?;

		self.sink
			.apply(Source::Optimistic, SyncEvent::Insert(bookmark.clone()))
			.await?;

		Ok(bookmark)
	}

	/// Hides the bookmark first, then deletes it remotely. If the store refuses, the
	/// bookmark is put back and the error returned.
	pub async fn delete_bookmark(&self, id: &BookmarkId) -> Result<(), Error> {
		self.client.current_user()?;

		let removed = self.collection.borrow().get(id).cloned();

		self.sink
			.apply(Source::Optimistic, SyncEvent::Delete(id.clone()))
			.await?;

		if let Err(e) = self.client.delete_bookmark(id).await {
			if let Some(bookmark) = removed {
				warn!(bookmark_id = %id, %e, "Delete failed, restoring bookmark;");
				self.sink
					.apply(Source::Rollback, SyncEvent::Insert(bookmark))
					.await?;
			}

			return Err(e);
		}

		Ok(())
	}

	#[must_use]
	pub fn snapshot(&self) -> Vec<Bookmark> {
		self.collection.borrow().to_vec()
	}

	#[must_use]
	pub fn subscribe(&self) -> watch::Receiver<LocalCollection> {
		self.collection.clone()
	}

	#[must_use]
	pub fn is_loaded(&self) -> bool {
		self.collection.borrow().is_loaded()
	}

	#[must_use]
	pub fn filtered(&self, filters: &ViewFilters) -> Vec<Bookmark> {
		let collection = self.collection.borrow();

		filters.apply(&*collection).into_iter().cloned().collect()
	}

	#[must_use]
	pub fn category_counts(&self) -> CategoryCounts {
		category_counts(&*self.collection.borrow())
	}

	#[must_use]
	pub fn feed_state(&self) -> FeedState {
		*self.feed_state.borrow()
	}

	#[must_use]
	pub fn subscribe_feed_state(&self) -> watch::Receiver<FeedState> {
		self.feed_state.clone()
	}

	#[must_use]
	pub fn current_user(&self) -> UserId {
		self.user_tx.borrow().clone()
	}

	/// Re-reads the session after a sign in and points the feed listener and the poller at
	/// that user. Both keep their connection and timer, they just read the new user on the
	/// next event. Fails without touching anything when nobody is signed in.
	pub fn switch_user(&self) -> Result<UserId, Error> {
		let user = self.client.current_user()?;
		let previous = self.user_tx.send_replace(user.clone());
		debug!(%previous, current = %user, "Switched dashboard user;");

		Ok(user)
	}

	pub async fn actor_states(&self) -> Vec<(String, bool)> {
		self.actors.get_state().await
	}

	/// Stops the producers before the reducer.
	pub async fn unmount(self) {
		for actor in [SyncActor::Poller, SyncActor::ChangeFeed, SyncActor::Reducer] {
			self.actors.stop(actor).await;
		}

		info!(user = %self.current_user(), "Unmounted bookmark dashboard;");
	}
}
