use stash_bookmark::{
	view::{SortOption, ViewFilters},
	Category,
};
use stash_core_sync::{
	store::{self, MemoryStore},
	Dashboard, FeedState, LocalCollection, LocalSession, RemoteStore, Session, SessionProvider,
	SyncConfig,
};

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::timeout;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SEED: [(&str, &str, &str); 4] = [
	("The Rust Book", "doc.rust-lang.org/book", "Learning"),
	("Tokio tutorial", "https://tokio.rs/tokio/tutorial", "Learning"),
	("Hacker News", "news.ycombinator.com", "News"),
	("Lunch spots", "maps.example.com/lunch", ""),
];

#[derive(Parser, Debug)]
#[command(
	name = "stash-sim",
	about = "Two dashboard tabs of one user, kept in sync through a shared in-memory store"
)]
struct Cli {
	/// Sync config file, created with defaults when missing
	#[arg(long, default_value = "stash-sim/sync.json")]
	config: PathBuf,

	/// User signed in on both tabs
	#[arg(long, default_value = "demo-user")]
	user: String,

	/// Override the configured reconciliation interval
	#[arg(long)]
	poll_interval_ms: Option<u64>,

	/// Search applied to the final listing
	#[arg(long, default_value = "")]
	search: String,

	/// Only list bookmarks of this category
	#[arg(long)]
	category: Option<Category>,

	/// newest, oldest or alphabetical
	#[arg(long, default_value = "newest")]
	sort: SortOption,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let mut config = SyncConfig::load_or_create(&cli.config)
		.with_context(|| format!("failed to load sync config at {}", cli.config.display()))?;

	if let Some(poll_interval_ms) = cli.poll_interval_ms {
		config.poll_interval_ms = poll_interval_ms;
	}

	tracing_subscriber::registry()
		.with(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	let memory = Arc::new(MemoryStore::new());
	let store = store::shared::get_or_init({
		let memory = Arc::clone(&memory);
		move || memory as Arc<dyn RemoteStore>
	});

	let session: Arc<dyn SessionProvider> =
		Arc::new(LocalSession::signed_in(Session::from(cli.user.as_str())));

	let left = Dashboard::mount(&config, Arc::clone(&store), Arc::clone(&session)).await?;
	let right = Dashboard::mount(&config, Arc::clone(&store), Arc::clone(&session)).await?;

	// long enough for a couple of poll cycles on top of the usual feed latency
	let patience = config.poll_interval() * 3 + Duration::from_secs(5);

	for tab in [&left, &right] {
		let mut feed = tab.subscribe_feed_state();
		timeout(patience, feed.wait_for(|state| *state == FeedState::Subscribed))
			.await
			.context("change feed never came up")??;
	}

	info!("Adding bookmarks on the left tab");
	let mut added = Vec::with_capacity(SEED.len());
	for (title, url, category) in SEED {
		added.push(left.add_bookmark(title, url, category).await?);
	}

	wait_until(&right, patience, "the right tab to receive every bookmark", |c| {
		added.iter().all(|bookmark| c.contains(&bookmark.id))
	})
	.await?;
	info!(count = right.snapshot().len(), "Right tab caught up through the feed");

	info!("Muting the change feed, the right tab has to rely on polling now");
	memory.mute_feed(true);

	let removed = added.pop().context("nothing was added")?;
	left.delete_bookmark(&removed.id).await?;

	wait_until(&right, patience, "the right tab to notice the delete", |c| {
		!c.contains(&removed.id)
	})
	.await?;
	info!(bookmark_id = %removed.id, "Right tab caught up through polling");

	memory.mute_feed(false);

	let filters = ViewFilters {
		search: cli.search,
		category: cli.category,
		sort: cli.sort,
	};

	for bookmark in right.filtered(&filters) {
		println!(
			"{:<16} {:<40} {}",
			bookmark
				.category
				.map_or_else(|| "-".to_string(), |category| category.to_string()),
			bookmark.url,
			bookmark.title,
		);
	}

	let counts = right.category_counts();
	println!("\n{} bookmarks", counts.total);
	for category in counts.available() {
		println!("  {category}: {}", counts.get(Some(category)));
	}

	left.unmount().await;
	right.unmount().await;

	Ok(())
}

async fn wait_until(
	dashboard: &Dashboard,
	patience: Duration,
	what: &str,
	check: impl FnMut(&LocalCollection) -> bool,
) -> Result<()> {
	let mut collection = dashboard.subscribe();

	timeout(patience, collection.wait_for(check))
		.await
		.with_context(|| format!("timed out waiting for {what}"))??;

	Ok(())
}
