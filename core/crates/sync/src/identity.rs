use stash_bookmark::UserId;

use std::sync::{PoisonError, RwLock};

use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
	pub user_id: UserId,
}

impl Session {
	#[must_use]
	pub fn new(user_id: impl Into<UserId>) -> Self {
		Self {
			user_id: user_id.into(),
		}
	}
}

impl From<&str> for Session {
	fn from(user_id: &str) -> Self {
		Self::new(UserId::new(user_id))
	}
}

/// Answers "who is logged in" from local state only, without touching the network.
pub trait SessionProvider: Send + Sync + 'static {
	fn current_session(&self) -> Option<Session>;
}

/// Session kept in process memory, set by whatever performed the login.
#[derive(Debug, Default)]
pub struct LocalSession(RwLock<Option<Session>>);

impl LocalSession {
	#[must_use]
	pub fn signed_in(session: Session) -> Self {
		Self(RwLock::new(Some(session)))
	}

	pub fn sign_in(&self, session: Session) {
		*self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
	}

	pub fn sign_out(&self) {
		*self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
	}
}

impl SessionProvider for LocalSession {
	fn current_session(&self) -> Option<Session> {
		self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
	}
}

/// Read side of the "latest user" cell shared by the feed listener and the poller.
///
/// Long-lived tasks are set up once, but must always act for whoever is the current user.
/// They hold this cell and read it when an event arrives, never at setup time.
#[derive(Debug, Clone)]
pub struct CurrentUser(watch::Receiver<UserId>);

impl CurrentUser {
	#[must_use]
	pub fn channel(user: UserId) -> (watch::Sender<UserId>, Self) {
		let (tx, rx) = watch::channel(user);
		(tx, Self(rx))
	}

	#[must_use]
	pub fn get(&self) -> UserId {
		self.0.borrow().clone()
	}
}
