//! Read-side helpers for presenting a collection: search, category filter, sort and counts.
//! Nothing here mutates the collection, every function works on a borrowed snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Bookmark, Category};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SortOption {
	#[default]
	Newest,
	Oldest,
	Alphabetical,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFilters {
	pub search: String,
	pub category: Option<Category>,
	pub sort: SortOption,
}

impl ViewFilters {
	#[must_use]
	pub fn is_filtering(&self) -> bool {
		!self.search.trim().is_empty() || self.category.is_some()
	}

	/// Returns the bookmarks matching the filters, in the requested order.
	#[must_use]
	pub fn apply<'a>(&self, bookmarks: impl IntoIterator<Item = &'a Bookmark>) -> Vec<&'a Bookmark> {
		let query = self.search.trim().to_lowercase();

		let mut result = bookmarks
			.into_iter()
			.filter(|b| self.category.is_none() || b.category == self.category)
			.filter(|b| {
				query.is_empty()
					|| b.title.to_lowercase().contains(&query)
					|| b.url.to_lowercase().contains(&query)
			})
			.collect::<Vec<_>>();

		match self.sort {
			SortOption::Newest => result.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
			SortOption::Oldest => result.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
			SortOption::Alphabetical => result.sort_by_cached_key(|b| b.title.to_lowercase()),
		}

		result
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryCounts {
	/// Keyed by category, `None` collects uncategorised bookmarks.
	pub per_category: BTreeMap<Option<Category>, usize>,
	pub total: usize,
}

impl CategoryCounts {
	#[must_use]
	pub fn get(&self, category: Option<Category>) -> usize {
		self.per_category.get(&category).copied().unwrap_or_default()
	}

	/// Categories worth offering as a filter: the ones with at least one bookmark.
	pub fn available(&self) -> impl Iterator<Item = Category> + '_ {
		self.per_category
			.iter()
			.filter(|(_, count)| **count > 0)
			.filter_map(|(category, _)| *category)
	}
}

#[must_use]
pub fn category_counts<'a>(bookmarks: impl IntoIterator<Item = &'a Bookmark>) -> CategoryCounts {
	bookmarks
		.into_iter()
		.fold(CategoryCounts::default(), |mut counts, bookmark| {
			*counts.per_category.entry(bookmark.category).or_default() += 1;
			counts.total += 1;
			counts
		})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{BookmarkId, UserId};

	use chrono::{DateTime, Duration, Utc};

	fn bookmark(id: &str, title: &str, url: &str, category: Option<Category>, age_secs: i64) -> Bookmark {
		Bookmark {
			id: BookmarkId::new(id),
			owner: UserId::new("u1"),
			title: title.to_string(),
			url: url.to_string(),
			favicon_url: None,
			category,
			created_at: DateTime::<Utc>::UNIX_EPOCH + Duration::days(1) - Duration::seconds(age_secs),
		}
	}

	fn sample() -> Vec<Bookmark> {
		vec![
			bookmark("1", "rust book", "https://doc.rust-lang.org/book", Some(Category::Learning), 30),
			bookmark("2", "Async Book", "https://rust-lang.github.io/async-book", Some(Category::Learning), 10),
			bookmark("3", "news site", "https://news.ycombinator.com", Some(Category::News), 20),
			bookmark("4", "Zebra", "https://example.com", None, 0),
		]
	}

	fn ids(bookmarks: &[&Bookmark]) -> Vec<String> {
		bookmarks.iter().map(|b| b.id.to_string()).collect()
	}

	#[test]
	fn sorts_by_creation_time() {
		let bookmarks = sample();

		let newest = ViewFilters::default().apply(&bookmarks);
		assert_eq!(ids(&newest), ["4", "2", "3", "1"]);

		let oldest = ViewFilters {
			sort: SortOption::Oldest,
			..Default::default()
		}
		.apply(&bookmarks);
		assert_eq!(ids(&oldest), ["1", "3", "2", "4"]);
	}

	#[test]
	fn alphabetical_ignores_case() {
		let bookmarks = sample();
		let sorted = ViewFilters {
			sort: SortOption::Alphabetical,
			..Default::default()
		}
		.apply(&bookmarks);

		assert_eq!(ids(&sorted), ["2", "3", "1", "4"]);
	}

	#[test]
	fn search_matches_title_or_url_case_insensitively() {
		let bookmarks = sample();
		let filters = ViewFilters {
			search: "  RUST ".to_string(),
			..Default::default()
		};

		assert!(filters.is_filtering());
		assert_eq!(ids(&filters.apply(&bookmarks)), ["2", "1"]);
	}

	#[test]
	fn category_filter_combines_with_search() {
		let bookmarks = sample();
		let filters = ViewFilters {
			search: "book".to_string(),
			category: Some(Category::Learning),
			sort: SortOption::Oldest,
		};

		assert_eq!(ids(&filters.apply(&bookmarks)), ["1", "2"]);
		assert!(!ViewFilters::default().is_filtering());
	}

	#[test]
	fn counts_per_category() {
		let bookmarks = sample();
		let counts = category_counts(&bookmarks);

		assert_eq!(counts.total, 4);
		assert_eq!(counts.get(Some(Category::Learning)), 2);
		assert_eq!(counts.get(Some(Category::News)), 1);
		assert_eq!(counts.get(None), 1);
		assert_eq!(counts.get(Some(Category::Work)), 0);
		assert_eq!(
			counts.available().collect::<Vec<_>>(),
			[Category::Learning, Category::News]
		);
	}
}
