use stash_actors::Stopper;
use stash_bookmark::{Bookmark, BookmarkId};

use std::{collections::HashSet, future::IntoFuture, sync::Arc, time::Duration};

use futures::FutureExt;
use futures_concurrency::future::Race;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, instrument, trace};

use super::{
	identity::CurrentUser,
	reducer::{EventSink, Source, SyncEvent},
	store::{QueryFilter, RemoteStore},
	Error,
};

/// The ids seen by the previous poll. `None` until the first successful poll seeded it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownIds(Option<HashSet<BookmarkId>>);

impl KnownIds {
	/// A baseline that is already in place, so the very first poll reports differences.
	#[must_use]
	pub fn seeded(ids: impl IntoIterator<Item = BookmarkId>) -> Self {
		Self(Some(ids.into_iter().collect()))
	}

	#[must_use]
	pub const fn is_seeded(&self) -> bool {
		self.0.is_some()
	}

	/// Diffs a fresh authoritative listing against the previous one and replaces the baseline.
	///
	/// The first listing only seeds the baseline, so bookmarks that were already known are
	/// not announced again. Afterwards new ids become inserts (oldest first, the listing
	/// already carries the full rows) and vanished ids become deletes.
	pub fn reconcile(&mut self, rows: Vec<Bookmark>) -> Vec<SyncEvent> {
		let current = rows
			.iter()
			.map(|row| row.id.clone())
			.collect::<HashSet<_>>();

		let Some(previous) = self.0.take() else {
			trace!(seeded = current.len(), "Seeded poll baseline");
			self.0 = Some(current);
			return vec![];
		};

		let mut deleted = previous.difference(&current).cloned().collect::<Vec<_>>();
		deleted.sort();

		self.0 = Some(current);

		rows.into_iter()
			.rev()
			.filter(|row| !previous.contains(&row.id))
			.map(SyncEvent::Insert)
			.chain(deleted.into_iter().map(SyncEvent::Delete))
			.collect()
	}
}

/// Periodically re-reads the whole collection and announces whatever changed since the
/// previous read. Runs regardless of the feed's state, it is the floor for eventual
/// consistency when push notifications get lost.
#[derive(Clone)]
pub struct ReconciliationPoller {
	store: Arc<dyn RemoteStore>,
	table: String,
	user: CurrentUser,
	sink: EventSink,
	every: Duration,
	baseline: KnownIds,
}

impl ReconciliationPoller {
	#[must_use]
	pub fn new(
		store: Arc<dyn RemoteStore>,
		table: impl Into<String>,
		user: CurrentUser,
		sink: EventSink,
		every: Duration,
	) -> Self {
		Self {
			store,
			table: table.into(),
			user,
			sink,
			every,
			baseline: KnownIds::default(),
		}
	}

	/// Starts every run from `baseline` instead of an unseeded one.
	#[must_use]
	pub fn with_baseline(mut self, baseline: KnownIds) -> Self {
		self.baseline = baseline;
		self
	}

	/// Polls right away, then on every tick until stopped.
	#[instrument(skip_all, fields(table = %self.table, every = ?self.every))]
	pub async fn run(self, stop: Stopper) {
		enum Race {
			Tick,
			Stopped,
		}

		let mut known = self.baseline.clone();
		let mut ticker = interval(self.every);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			if let Race::Stopped = (
				ticker.tick().map(|_| Race::Tick),
				stop.into_future().map(|()| Race::Stopped),
			)
				.race()
				.await
			{
				break;
			}

			if let Err(Error::ReducerClosed) = self.poll_once(&mut known).await {
				debug!("Reducer is gone, poller stopping");
				break;
			}
		}
	}

	/// One reconciliation cycle. A failed read leaves the baseline untouched, the next
	/// cycle simply tries again.
	pub async fn poll_once(&self, known: &mut KnownIds) -> Result<usize, Error> {
		let rows = match self
			.store
			.query(&self.table, &QueryFilter::owned_by(self.user.get()))
			.await
		{
			Ok(rows) => rows,
			Err(e) => {
				debug!(%e, "Poll failed, will retry on next tick;");
				return Ok(0);
			}
		};

		let events = known.reconcile(rows);
		let count = events.len();

		for event in events {
			match &event {
				SyncEvent::Insert(bookmark) => {
					debug!(bookmark_id = %bookmark.id, "Poll detected new bookmark;");
				}
				SyncEvent::Delete(id) => debug!(bookmark_id = %id, "Poll detected deleted bookmark;"),
			}

			self.sink.emit(Source::Poll, event).await?;
		}

		Ok(count)
	}
}
