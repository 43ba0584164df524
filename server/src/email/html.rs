//! Plain-text fallback derivation for HTML bodies
//!
//! Multipart alternatives need a text part; we derive it by stripping tags
//! and decoding the minimal entity set the scheduler emits. This is not a
//! general HTML-to-text converter.

use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::unwrap_used)] // pattern is a literal
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Strip tags and decode `&nbsp; &amp; &lt; &gt; &quot;`
pub fn html_to_text(html: &str) -> String {
	let stripped = TAG_RE.replace_all(html, "");
	stripped
		.replace("&nbsp;", " ")
		.replace("&lt;", "<")
		.replace("&gt;", ">")
		.replace("&quot;", "\"")
		.replace("&amp;", "&")
}


// vim: ts=4
