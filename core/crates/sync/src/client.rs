use stash_bookmark::{normalize, Bookmark, BookmarkId, UserId};

use std::sync::Arc;

use tracing::{debug, error, instrument};

use super::{
	identity::SessionProvider,
	store::{DeleteFilter, QueryFilter, RemoteStore},
	Error,
};

/// Writes to the store on behalf of whoever holds the session right now.
///
/// Every call makes a single attempt. Retrying, or undoing an optimistic update, is the
/// caller's decision.
#[derive(Clone)]
pub struct MutationClient {
	store: Arc<dyn RemoteStore>,
	identity: Arc<dyn SessionProvider>,
	table: String,
	strict_delete: bool,
}

impl MutationClient {
	#[must_use]
	pub fn new(
		store: Arc<dyn RemoteStore>,
		identity: Arc<dyn SessionProvider>,
		table: impl Into<String>,
	) -> Self {
		Self {
			store,
			identity,
			table: table.into(),
			strict_delete: false,
		}
	}

	/// Report deletes that matched no row as [`Error::NotFound`] instead of success.
	#[must_use]
	pub const fn with_strict_delete(mut self, strict_delete: bool) -> Self {
		self.strict_delete = strict_delete;
		self
	}

	pub fn current_user(&self) -> Result<UserId, Error> {
		self.identity
			.current_session()
			.map(|session| session.user_id)
			.ok_or(Error::Unauthenticated)
	}

	#[instrument(skip(self, url, category), err)]
	pub async fn add_bookmark(
		&self,
		title: &str,
		url: &str,
		category: &str,
	) -> Result<Bookmark, Error> {
		let owner = self.current_user()?;
		let draft = normalize(title, url, category)?;

		self.store
			.insert(&self.table, draft.owned_by(owner))
			.await
			.map_err(|e| {
				error!(message = e.message(), "Failed to add bookmark;");
				e.into()
			})
	}

	#[instrument(skip(self), fields(strict = self.strict_delete), err)]
	pub async fn delete_bookmark(&self, id: &BookmarkId) -> Result<(), Error> {
		let owner = self.current_user()?;

		let affected = self
			.store
			.delete(
				&self.table,
				&DeleteFilter {
					id: id.clone(),
					owner,
				},
			)
			.await?;

		if affected == 0 {
			if self.strict_delete {
				return Err(Error::NotFound(id.clone()));
			}

			debug!(bookmark_id = %id, "Delete matched no row, nothing to do");
		}

		Ok(())
	}

	/// Authoritative listing for the current user, newest first.
	pub async fn initial_load(&self) -> Result<Vec<Bookmark>, Error> {
		let owner = self.current_user()?;

		self.store
			.query(&self.table, &QueryFilter::owned_by(owner))
			.await
			.map_err(Into::into)
	}
}
