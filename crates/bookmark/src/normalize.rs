use std::str::FromStr;

use url::Url;

use super::{BookmarkDraft, Category};

pub const MAX_TITLE_CHARS: usize = 200;

/// Favicon lookup template, `{host}` is replaced by the bookmark's hostname.
pub const FAVICON_SERVICE: &str = "https://www.google.com/s2/favicons?domain={host}&sz=64";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
	#[error("title is required")]
	EmptyTitle,
	#[error("invalid url <url='{0}'>, expected an http or https address")]
	InvalidUrl(String),
	#[error("unknown category <category='{0}'>")]
	UnknownCategory(String),
}

/// Turns raw form input into the fields of a bookmark, or says why it can't.
///
/// The title is checked before the url, so input that is bad on both counts reports
/// [`ValidationError::EmptyTitle`].
pub fn normalize(
	raw_title: &str,
	raw_url: &str,
	raw_category: &str,
) -> Result<BookmarkDraft, ValidationError> {
	let title = sanitize_title(raw_title);
	if title.is_empty() {
		return Err(ValidationError::EmptyTitle);
	}

	let url = normalize_url(raw_url);
	let parsed = validate_url(&url)?;
	let category = parse_category(raw_category)?;

	Ok(BookmarkDraft {
		title,
		favicon_url: favicon_url(&parsed),
		url,
		category,
	})
}

/// Escapes the characters that could open markup, trims and caps the length.
#[must_use]
pub fn sanitize_title(raw: &str) -> String {
	let mut escaped = String::with_capacity(raw.len());

	for c in raw.chars() {
		match c {
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			'"' => escaped.push_str("&quot;"),
			'\'' => escaped.push_str("&#x27;"),
			c => escaped.push(c),
		}
	}

	escaped.trim().chars().take(MAX_TITLE_CHARS).collect()
}

/// Trims and prepends `https://` when the input carries no http(s) scheme.
/// The result is kept verbatim, it is not re-serialized by the url parser.
#[must_use]
pub fn normalize_url(raw: &str) -> String {
	let trimmed = raw.trim();

	if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
		trimmed.to_string()
	} else {
		format!("https://{trimmed}")
	}
}

pub fn validate_url(url: &str) -> Result<Url, ValidationError> {
	match Url::parse(url) {
		Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(parsed),
		_ => Err(ValidationError::InvalidUrl(url.to_string())),
	}
}

#[must_use]
pub fn favicon_url(url: &Url) -> Option<String> {
	url.host_str()
		.filter(|host| !host.is_empty())
		.map(|host| FAVICON_SERVICE.replace("{host}", host))
}

/// Empty input means "no category", anything else must be one of the known labels.
pub fn parse_category(raw: &str) -> Result<Option<Category>, ValidationError> {
	let trimmed = raw.trim();

	if trimmed.is_empty() {
		return Ok(None);
	}

	Category::from_str(trimmed)
		.map(Some)
		.map_err(|_| ValidationError::UnknownCategory(trimmed.to_string()))
}
