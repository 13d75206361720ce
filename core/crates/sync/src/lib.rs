#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Keeps a locally held bookmark collection consistent with the remote store.
//!
//! Three producers observe the store independently: the [`MutationClient`] (our own writes,
//! applied optimistically), the [`ChangeFeedListener`] (push notifications) and the
//! [`ReconciliationPoller`] (periodic full re-reads). All of them speak the same
//! [`SyncEvent`] vocabulary and fan into one reducer task, the only writer of the
//! [`LocalCollection`]. Inserts and deletes are keyed solely by bookmark id, which makes
//! every event idempotent and the merge insensitive to delivery order.

use stash_bookmark::{BookmarkId, ValidationError};

pub mod client;
pub mod config;
pub mod dashboard;
pub mod feed;
pub mod identity;
pub mod poller;
pub mod reducer;
pub mod store;

pub use client::MutationClient;
pub use config::{ConfigError, SyncConfig};
pub use dashboard::{Dashboard, SyncActor};
pub use feed::{ChangeFeedListener, FeedState};
pub use identity::{CurrentUser, LocalSession, Session, SessionProvider};
pub use poller::{KnownIds, ReconciliationPoller};
pub use reducer::{EventSink, LocalCollection, Source, SyncEvent};
pub use store::{RemoteStore, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("you must be logged in")]
	Unauthenticated,
	#[error(transparent)]
	Validation(#[from] ValidationError),
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error("bookmark not found <id='{0}'>")]
	NotFound(BookmarkId),
	#[error("synchronization reducer is no longer running")]
	ReducerClosed,
}
