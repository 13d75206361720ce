use stash_actors::Stopper;
use stash_bookmark::{Bookmark, BookmarkId, UserId};

use std::{future::IntoFuture, sync::Arc};

use futures::{FutureExt, StreamExt};
use futures_concurrency::future::Race;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, instrument, trace, warn};

use super::{
	identity::CurrentUser,
	reducer::{EventSink, Source, SyncEvent},
	store::{ChangeKind, ChangePayload, ChannelStatus, FeedMessage, RemoteStore},
};

/// Connection state of the push channel, as last observed by the listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
pub enum FeedState {
	#[default]
	Disconnected,
	Connecting,
	Subscribed,
}

/// Turns push notifications from the store into [`SyncEvent`]s for the current user.
///
/// Subscribes once per run and never retries on its own: reconnecting is up to the transport,
/// which reports it through status messages. Delivery is best effort, the poller covers
/// whatever gets lost.
#[derive(Clone)]
pub struct ChangeFeedListener {
	store: Arc<dyn RemoteStore>,
	table: String,
	channel: String,
	user: CurrentUser,
	sink: EventSink,
	state: Arc<watch::Sender<FeedState>>,
}

impl ChangeFeedListener {
	#[must_use]
	pub fn new(
		store: Arc<dyn RemoteStore>,
		table: impl Into<String>,
		channel: impl Into<String>,
		user: CurrentUser,
		sink: EventSink,
	) -> (Self, watch::Receiver<FeedState>) {
		let (state, state_rx) = watch::channel(FeedState::default());

		(
			Self {
				store,
				table: table.into(),
				channel: channel.into(),
				user,
				sink,
				state: Arc::new(state),
			},
			state_rx,
		)
	}

	#[instrument(skip_all, fields(channel = %self.channel, table = %self.table))]
	pub async fn run(self, stop: Stopper) {
		enum Race {
			Message(Option<FeedMessage>),
			Stopped,
		}

		self.set_state(FeedState::Connecting);

		let mut feed = match self
			.store
			.subscribe(&self.table, &[ChangeKind::Insert, ChangeKind::Delete])
			.await
		{
			Ok(feed) => feed,
			Err(e) => {
				warn!(%e, "Failed to subscribe to the change feed, relying on polling;");
				self.set_state(FeedState::Disconnected);
				(&stop).await;
				return;
			}
		};

		loop {
			match (
				feed.next().map(Race::Message),
				stop.into_future().map(|()| Race::Stopped),
			)
				.race()
				.await
			{
				Race::Message(Some(FeedMessage::Status(status))) => self.on_status(status),

				Race::Message(Some(FeedMessage::Change(payload))) => {
					// a delivered change proves the channel is up, even without a status
					self.set_state(FeedState::Subscribed);

					let Some(event) = event_for(payload, &self.user.get()) else {
						continue;
					};

					if self.sink.emit(Source::Feed, event).await.is_err() {
						debug!("Reducer is gone, feed listener stopping");
						break;
					}
				}

				Race::Message(None) => {
					debug!("Feed transport ended, waiting for stop");
					self.set_state(FeedState::Disconnected);
					(&stop).await;
					break;
				}

				Race::Stopped => break,
			}
		}

		self.set_state(FeedState::Disconnected);
	}

	fn on_status(&self, status: ChannelStatus) {
		debug!(%status, "Feed channel status;");

		match status {
			ChannelStatus::Subscribed => self.set_state(FeedState::Subscribed),
			ChannelStatus::TimedOut | ChannelStatus::Closed | ChannelStatus::ChannelError => {
				self.set_state(FeedState::Disconnected);
			}
		}
	}

	fn set_state(&self, new_state: FeedState) {
		self.state.send_if_modified(|state| {
			if *state == new_state {
				return false;
			}

			trace!(old_state = %state, %new_state, "Feed state transitioned;");
			*state = new_state;
			true
		});
	}
}

/// Decodes one notification. Inserts are kept only when they belong to `current_user`;
/// deletes carry nothing but the id and are passed through unconditionally.
#[must_use]
pub fn event_for(payload: ChangePayload, current_user: &UserId) -> Option<SyncEvent> {
	match payload.event_type {
		ChangeKind::Insert => {
			let row = payload.new?;

			match serde_json::from_value::<Bookmark>(row) {
				Ok(bookmark) if bookmark.owner == *current_user => Some(SyncEvent::Insert(bookmark)),
				Ok(bookmark) => {
					trace!(bookmark_id = %bookmark.id, "Ignoring insert of a foreign bookmark");
					None
				}
				Err(e) => {
					warn!(?e, "Undecodable row in insert notification");
					None
				}
			}
		}

		ChangeKind::Delete => {
			let id = payload
				.old
				.as_ref()
				.and_then(|old| old.get("id"))
				.and_then(Value::as_str);

			if id.is_none() {
				warn!(old = ?payload.old, "Delete notification without an id");
			}

			id.map(|id| SyncEvent::Delete(BookmarkId::new(id)))
		}

		// bookmarks are never updated in place
		ChangeKind::Update => None,
	}
}
