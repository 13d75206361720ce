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

//! Lifecycle management for long-running background tasks.
//!
//! Every actor is a closure that receives a [`Stopper`] and returns a future. The collection
//! spawns it on [`Actors::start`], signals it on [`Actors::stop`] and aborts it if it does not
//! wind down in time. Dropping the last handle to a collection closes every stop channel, which
//! resolves all pending [`Stopper`] futures, so actors never outlive the owner that declared them.

use std::{
	collections::HashMap,
	fmt,
	future::{Future, IntoFuture},
	hash::Hash,
	panic::AssertUnwindSafe,
	pin::Pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	task::{Context, Poll},
	time::Duration,
};

use async_channel as chan;
use futures::{future::BoxFuture, FutureExt};
use tokio::{
	spawn,
	sync::RwLock,
	task::JoinHandle,
	time::timeout,
};
use tracing::{debug, error, instrument, warn, Instrument};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub trait ActorId: Hash + Eq + Send + Sync + Copy + fmt::Debug + fmt::Display + 'static {}

impl<T: Hash + Eq + Send + Sync + Copy + fmt::Debug + fmt::Display + 'static> ActorId for T {}

type ActorFn = Box<dyn FnMut(Stopper) -> BoxFuture<'static, ()> + Send + Sync>;

struct ActorHandler {
	run: ActorFn,
	maybe_handle: Option<JoinHandle<()>>,
	is_running: Arc<AtomicBool>,
	stop_tx: chan::Sender<()>,
	stop_rx: chan::Receiver<()>,
}

/// Holds every background task belonging to one owner, keyed by an identifier enum.
pub struct Actors<Id: ActorId> {
	actors_map: Arc<RwLock<HashMap<Id, ActorHandler>>>,
}

impl<Id: ActorId> Actors<Id> {
	/// Registers an actor under `identifier`, replacing any previous declaration.
	/// The closure is invoked again on every [`Actors::start`], so it should clone whatever
	/// it captures into the returned future.
	pub async fn declare<F, Fut>(&self, identifier: Id, mut actor_fn: F, autostart: bool)
	where
		F: FnMut(Stopper) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let (stop_tx, stop_rx) = chan::bounded(1);

		let previous = self.actors_map.write().await.insert(
			identifier,
			ActorHandler {
				run: Box::new(move |stop| actor_fn(stop).boxed()),
				maybe_handle: None,
				is_running: Arc::new(AtomicBool::new(false)),
				stop_tx,
				stop_rx,
			},
		);

		if let Some(previous) = previous {
			warn!(%identifier, "Actor redeclared, the previous instance will be dropped");
			if let Some(handle) = previous.maybe_handle {
				handle.abort();
			}
		}

		if autostart {
			self.start(identifier).await;
		}
	}

	#[instrument(skip(self))]
	pub async fn start(&self, identifier: Id) {
		let mut actors_map = self.actors_map.write().await;
		let Some(actor) = actors_map.get_mut(&identifier) else {
			warn!("Tried to start an undeclared actor");
			return;
		};

		if actor.is_running.load(Ordering::Acquire) {
			warn!("Actor already running!");
			return;
		}

		// A stop signal sent while the previous run was already finishing would
		// otherwise stop the new run immediately.
		while actor.stop_rx.try_recv().is_ok() {}

		if let Some(handle) = actor.maybe_handle.take() {
			if handle.await.is_err() {
				error!("Previous actor run unexpectedly panicked");
			}
		}

		let is_running = Arc::clone(&actor.is_running);
		is_running.store(true, Ordering::Release);

		let fut = (actor.run)(Stopper(actor.stop_rx.clone()));

		// runs log inside the span of whoever started them
		actor.maybe_handle = Some(spawn(
			async move {
				if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
					error!(%identifier, "Actor unexpectedly panicked");
				}

				is_running.store(false, Ordering::Release);
			}
			.in_current_span(),
		));
	}

	#[instrument(skip(self))]
	pub async fn stop(&self, identifier: Id) {
		let mut actors_map = self.actors_map.write().await;
		let Some(actor) = actors_map.get_mut(&identifier) else {
			warn!("Tried to stop an undeclared actor");
			return;
		};

		if !actor.is_running.load(Ordering::Acquire) {
			debug!("Actor already stopped");
			// reap the finished task, if any
			wait_stop_or_abort(actor.maybe_handle.take()).await;
			return;
		}

		if actor.stop_tx.try_send(()).is_err() {
			warn!("Stop signal already pending, waiting for the actor to wind down");
		}

		wait_stop_or_abort(actor.maybe_handle.take()).await;
		actor.is_running.store(false, Ordering::Release);
	}

	pub async fn is_running(&self, identifier: Id) -> bool {
		self.actors_map
			.read()
			.await
			.get(&identifier)
			.is_some_and(|actor| actor.is_running.load(Ordering::Acquire))
	}

	pub async fn get_state(&self) -> Vec<(String, bool)> {
		self.actors_map
			.read()
			.await
			.iter()
			.map(|(identifier, actor)| {
				(
					identifier.to_string(),
					actor.is_running.load(Ordering::Relaxed),
				)
			})
			.collect()
	}
}

impl<Id: ActorId> Default for Actors<Id> {
	fn default() -> Self {
		Self {
			actors_map: Arc::default(),
		}
	}
}

impl<Id: ActorId> fmt::Debug for Actors<Id> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Actors").finish_non_exhaustive()
	}
}

/// Handed to every actor run. Await it (`(&stop).await`) to wait for a stop request.
pub struct Stopper(chan::Receiver<()>);

pin_project_lite::pin_project! {
	pub struct StopActorFuture<'recv> {
		#[pin]
		fut: chan::Recv<'recv, ()>,
	}
}

impl Future for StopActorFuture<'_> {
	type Output = ();

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.project();

		match this.fut.poll(cx) {
			Poll::Ready(res) => {
				if res.is_err() {
					debug!("Stop channel closed, owner is gone, will stop actor");
				}
				Poll::Ready(())
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

impl<'recv> IntoFuture for &'recv Stopper {
	type Output = ();
	type IntoFuture = StopActorFuture<'recv>;

	fn into_future(self) -> Self::IntoFuture {
		Self::IntoFuture { fut: self.0.recv() }
	}
}

async fn wait_stop_or_abort(maybe_handle: Option<JoinHandle<()>>) {
	if let Some(handle) = maybe_handle {
		let abort_handle = handle.abort_handle();

		match timeout(STOP_TIMEOUT, handle).await {
			Ok(Ok(())) => { /* Everything is Awesome! */ }
			Ok(Err(e)) => {
				if e.is_panic() {
					error!("Actor task panicked while stopping");
				}
			}
			Err(_) => {
				error!("Actor failed to gracefully stop in the allotted time, will force abortion");
				abort_handle.abort();
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::sync::atomic::AtomicUsize;

	use tokio::sync::Notify;

	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	enum TestActor {
		Counter,
	}

	impl fmt::Display for TestActor {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			write!(f, "{self:?}")
		}
	}

	fn waiting_actor(
		runs: Arc<AtomicUsize>,
		started: Arc<Notify>,
	) -> impl FnMut(Stopper) -> BoxFuture<'static, ()> + Send + Sync {
		move |stop| {
			let runs = Arc::clone(&runs);
			let started = Arc::clone(&started);
			async move {
				runs.fetch_add(1, Ordering::SeqCst);
				started.notify_one();
				(&stop).await;
			}
			.boxed()
		}
	}

	#[tokio::test]
	async fn start_and_stop() {
		let actors = Actors::default();
		let runs = Arc::new(AtomicUsize::new(0));
		let started = Arc::new(Notify::new());

		actors
			.declare(
				TestActor::Counter,
				waiting_actor(Arc::clone(&runs), Arc::clone(&started)),
				true,
			)
			.await;

		started.notified().await;
		assert!(actors.is_running(TestActor::Counter).await);

		actors.stop(TestActor::Counter).await;
		assert!(!actors.is_running(TestActor::Counter).await);
		assert_eq!(runs.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn restart_runs_the_closure_again() {
		let actors = Actors::default();
		let runs = Arc::new(AtomicUsize::new(0));
		let started = Arc::new(Notify::new());

		actors
			.declare(
				TestActor::Counter,
				waiting_actor(Arc::clone(&runs), Arc::clone(&started)),
				true,
			)
			.await;
		started.notified().await;
		actors.stop(TestActor::Counter).await;

		actors.start(TestActor::Counter).await;
		started.notified().await;
		assert!(actors.is_running(TestActor::Counter).await);
		assert_eq!(runs.load(Ordering::SeqCst), 2);

		actors.stop(TestActor::Counter).await;
	}

	#[tokio::test]
	async fn dropping_the_collection_stops_actors() {
		let actors = Actors::default();
		let finished = Arc::new(Notify::new());
		let started = Arc::new(Notify::new());

		actors
			.declare(
				TestActor::Counter,
				{
					let finished = Arc::clone(&finished);
					let started = Arc::clone(&started);
					move |stop: Stopper| {
						let finished = Arc::clone(&finished);
						let started = Arc::clone(&started);
						async move {
							started.notify_one();
							(&stop).await;
							finished.notify_one();
						}
					}
				},
				true,
			)
			.await;

		started.notified().await;
		drop(actors);

		timeout(Duration::from_secs(1), finished.notified())
			.await
			.expect("actor should stop once its owner is dropped");
	}

	#[tokio::test]
	async fn run_that_returns_on_its_own_is_reported_stopped() {
		let actors = Actors::default();
		let done = Arc::new(Notify::new());

		actors
			.declare(
				TestActor::Counter,
				{
					let done = Arc::clone(&done);
					move |_stop: Stopper| {
						let done = Arc::clone(&done);
						async move { done.notify_one() }
					}
				},
				true,
			)
			.await;

		done.notified().await;

		timeout(Duration::from_secs(1), async {
			while actors.is_running(TestActor::Counter).await {
				tokio::task::yield_now().await;
			}
		})
		.await
		.expect("finished run should clear its running flag");
	}

	#[tokio::test]
	async fn stopping_a_finished_actor_is_a_noop() {
		let actors = Actors::default();

		actors
			.declare(TestActor::Counter, |_stop: Stopper| async {}, true)
			.await;

		tokio::task::yield_now().await;
		actors.stop(TestActor::Counter).await;
		actors.stop(TestActor::Counter).await;

		assert!(!actors.is_running(TestActor::Counter).await);
		assert_eq!(
			actors.get_state().await,
			vec![("Counter".to_string(), false)]
		);
	}
}
