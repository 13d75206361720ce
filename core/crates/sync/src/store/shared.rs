//! One store connection for the whole process, created lazily on first use and kept until
//! exit. Components never reach for it themselves: whoever builds them passes the handle in.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::RemoteStore;

static SHARED: OnceCell<Arc<dyn RemoteStore>> = OnceCell::new();

/// Returns the process-wide store, running `init` only if nothing was installed yet.
pub fn get_or_init(init: impl FnOnce() -> Arc<dyn RemoteStore>) -> Arc<dyn RemoteStore> {
	Arc::clone(SHARED.get_or_init(init))
}
