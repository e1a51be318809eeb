use time::OffsetDateTime;

pub const MS_PER_DAY: i64 = 86_400_000;

pub fn now_ms() -> i64 {
	(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Whole and fractional days elapsed between two millisecond timestamps.
/// Negative spans (clock skew, future `last_accessed_at`) clamp to zero.
pub fn age_days(from_ms: i64, to_ms: i64) -> f32 {
	if to_ms <= from_ms {
		return 0.0;
	}

	(to_ms - from_ms) as f32 / MS_PER_DAY as f32
}

pub fn day_key(ts_ms: i64) -> String {
	let ts = OffsetDateTime::from_unix_timestamp(ts_ms.div_euclid(1_000)).unwrap_or(
		OffsetDateTime::UNIX_EPOCH,
	);

	format!("{:04}-{:02}-{:02}", ts.year(), u8::from(ts.month()), ts.day())
}

#[cfg(test)]
mod tests {
	use crate::clock::{age_days, day_key};

	#[test]
	fn age_days_clamps_negative_spans() {
		assert_eq!(age_days(1_000, 0), 0.0);
		assert_eq!(age_days(0, 86_400_000), 1.0);
	}

	#[test]
	fn day_key_formats_utc_dates() {
		// 2024-03-05T12:00:00Z
		assert_eq!(day_key(1_709_640_000_000), "2024-03-05");
		assert_eq!(day_key(0), "1970-01-01");
	}
}
