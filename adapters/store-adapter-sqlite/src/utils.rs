//! Shared utilities for the SQLite store adapter
//!
//! Helper functions, the `push_patch!` macro, and error mapping used across
//! all domain modules.

use dripmail::prelude::*;
use sqlx::sqlite::SqliteRow;

pub(crate) fn inspect(err: &sqlx::Error) {
	warn!("DB: {:#?}", err);
}

/// Map a sqlx error to the service error taxonomy. Unique-constraint
/// violations surface as `Conflict`; everything else is a store outage.
pub(crate) fn db_err(err: sqlx::Error) -> Error {
	if let sqlx::Error::Database(ref dbe) = err {
		if dbe.is_unique_violation() {
			return Error::Conflict("record already exists".into());
		}
	}
	inspect(&err);
	Error::StoreUnavailable(err.to_string())
}

/// Map a fetched row through `f`, translating RowNotFound to NotFound
pub(crate) fn map_res<T, F>(row: Result<SqliteRow, sqlx::Error>, f: F) -> ClResult<T>
where
	F: FnOnce(&SqliteRow) -> Result<T, sqlx::Error>,
{
	match row {
		Ok(row) => f(&row).map_err(db_err),
		Err(sqlx::Error::RowNotFound) => Err(Error::NotFound),
		Err(err) => Err(db_err(err)),
	}
}

pub(crate) fn collect_res<T>(
	iter: impl Iterator<Item = Result<T, sqlx::Error>>,
) -> ClResult<Vec<T>> {
	let mut items = Vec::new();
	for item in iter {
		items.push(item.map_err(db_err)?);
	}
	Ok(items)
}

/// Simple helper for Patch fields - applies field to query with proper binding
/// Returns true if field was added (for tracking has_updates)
macro_rules! push_patch {
	// For bindable values (strings, numbers, bools)
	($query:expr, $has_updates:expr, $field:literal, $patch:expr) => {{
		match $patch {
			Patch::Undefined => $has_updates,
			Patch::Null => {
				if $has_updates {
					$query.push(", ");
				}
				$query.push(concat!($field, "=NULL"));
				true
			}
			Patch::Value(v) => {
				if $has_updates {
					$query.push(", ");
				}
				$query.push(concat!($field, "=")).push_bind(v);
				true
			}
		}
	}};
	// For values that need conversion before binding
	($query:expr, $has_updates:expr, $field:literal, $patch:expr, |$v:ident| $convert:expr) => {{
		match $patch {
			Patch::Undefined => $has_updates,
			Patch::Null => {
				if $has_updates {
					$query.push(", ");
				}
				$query.push(concat!($field, "=NULL"));
				true
			}
			Patch::Value($v) => {
				if $has_updates {
					$query.push(", ");
				}
				$query.push(concat!($field, "=")).push_bind($convert);
				true
			}
		}
	}};
}

// Re-export for use in other modules
pub(crate) use push_patch;

// vim: ts=4
