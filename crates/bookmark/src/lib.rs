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

//! The bookmark record and the rules applied to user input before it reaches the store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod normalize;
pub mod view;

pub use normalize::{
	favicon_url, normalize, normalize_url, parse_category, sanitize_title, validate_url,
	ValidationError, FAVICON_SERVICE, MAX_TITLE_CHARS,
};

/// Store-assigned identifier of a bookmark. Opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookmarkId(String);

impl BookmarkId {
	#[must_use]
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for BookmarkId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for BookmarkId {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

impl From<String> for BookmarkId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

/// Identity of the user owning a bookmark, as handed out by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
	#[must_use]
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for UserId {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

/// The closed set of labels a bookmark may carry. "No category" is `None` at the use site.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	PartialOrd,
	Ord,
	Serialize,
	Deserialize,
	strum::Display,
	strum::EnumString,
	strum::EnumIter,
	strum::AsRefStr,
)]
pub enum Category {
	Work,
	Personal,
	Learning,
	Entertainment,
	Shopping,
	News,
	Social,
	Other,
}

/// A bookmark as persisted by the remote store.
///
/// Never mutated in place: the only lifecycle transitions are creation by an insert
/// and permanent removal by a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
	pub id: BookmarkId,
	#[serde(rename = "user_id")]
	pub owner: UserId,
	pub title: String,
	pub url: String,
	pub favicon_url: Option<String>,
	pub category: Option<Category>,
	pub created_at: DateTime<Utc>,
}

/// Normalized user input, not yet bound to an owner nor stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookmarkDraft {
	pub title: String,
	pub url: String,
	pub favicon_url: Option<String>,
	pub category: Option<Category>,
}

impl BookmarkDraft {
	#[must_use]
	pub fn owned_by(self, owner: UserId) -> NewBookmark {
		let Self {
			title,
			url,
			favicon_url,
			category,
		} = self;

		NewBookmark {
			owner,
			title,
			url,
			favicon_url,
			category,
		}
	}
}

/// The record sent to the store on insert. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBookmark {
	#[serde(rename = "user_id")]
	pub owner: UserId,
	pub title: String,
	pub url: String,
	pub favicon_url: Option<String>,
	pub category: Option<Category>,
}
