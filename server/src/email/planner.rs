//! Batch planner: deterministic send instants for a schedule request
//!
//! Pure and total. Walks a cursor from the start instant, spacing messages
//! `spacing_secs` apart and spilling into the next calendar hour whenever the
//! hourly cap for the cursor's hour bucket is reached.

use chrono::{Local, Offset, TimeZone};

use crate::prelude::*;

/// Which clock defines the calendar-hour buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HourBucket {
	#[default]
	Utc,
	Local,
}

impl std::str::FromStr for HourBucket {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"utc" => Ok(HourBucket::Utc),
			"local" => Ok(HourBucket::Local),
			_ => Err(Error::Validation(format!("invalid hour bucket mode: {}", s))),
		}
	}
}

/// UTC offset of the bucket clock at `secs`
fn clock_offset(secs: i64, bucket: HourBucket) -> i64 {
	match bucket {
		HourBucket::Utc => 0,
		HourBucket::Local => Local
			.timestamp_opt(secs, 0)
			.single()
			.map(|dt| i64::from(dt.offset().fix().local_minus_utc()))
			.unwrap_or(0),
	}
}

/// Identity of the calendar hour containing `secs` on the bucket clock
fn hour_index(secs: i64, bucket: HourBucket) -> i64 {
	(secs + clock_offset(secs, bucket)).div_euclid(3600)
}

/// First instant of the calendar hour after the one containing `secs`
fn next_hour_start(secs: i64, bucket: HourBucket) -> i64 {
	let offset = clock_offset(secs, bucket);
	((secs + offset).div_euclid(3600) + 1) * 3600 - offset
}

/// Lay out `count` non-decreasing send instants starting at `start`,
/// `spacing_secs` apart, with at most `hourly_cap` instants per calendar
/// hour. `hourly_cap = 0` is rejected at the HTTP edge; it is clamped to 1
/// here so the function stays total.
pub fn plan(
	count: usize,
	start: Timestamp,
	spacing_secs: u32,
	hourly_cap: u32,
	bucket: HourBucket,
) -> Vec<Timestamp> {
	let cap = hourly_cap.max(1);
	let spacing = i64::from(spacing_secs);

	let mut instants = Vec::with_capacity(count);
	let mut cursor = start.0;
	let mut bucket_hour = hour_index(cursor, bucket);
	let mut used_in_hour = 0u32;

	for _ in 0..count {
		if used_in_hour >= cap {
			cursor = next_hour_start(cursor, bucket);
			bucket_hour = hour_index(cursor, bucket);
			used_in_hour = 0;
		}

		instants.push(Timestamp(cursor));
		used_in_hour += 1;

		let advanced = cursor + spacing;
		let advanced_hour = hour_index(advanced, bucket);
		if advanced_hour != bucket_hour {
			bucket_hour = advanced_hour;
			used_in_hour = 0;
		}
		cursor = advanced;
	}

	instants
}


// vim: ts=4
