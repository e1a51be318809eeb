pub mod ephemeral;
pub mod postgres;
pub mod qdrant;
pub mod redis;
pub mod sqlite;

use crate::{
	Error, Result,
	types::{DistanceMetric, VectorIndexKind},
};

/// Backend-independent knobs shared by every adapter, derived from
/// `[storage]` in the config file.
#[derive(Clone, Debug)]
pub struct AdapterSettings {
	pub namespace: Option<String>,
	pub dimension: u32,
	pub metric: DistanceMetric,
	pub index_kind: VectorIndexKind,
	pub text_search_language: String,
	pub query_timeout_ms: u64,
	pub cleanup_interval_secs: u64,
	pub max_retries: u32,
	pub retry_base_ms: u64,
}
impl AdapterSettings {
	pub fn from_config(cfg: &loam_config::Storage) -> Result<Self> {
		let metric = DistanceMetric::parse(&cfg.default_metric).ok_or_else(|| {
			Error::InvalidArgument(format!("Unknown metric: {}.", cfg.default_metric))
		})?;
		let index_kind = VectorIndexKind::parse(&cfg.default_index_type).ok_or_else(|| {
			Error::InvalidArgument(format!("Unknown index type: {}.", cfg.default_index_type))
		})?;

		Ok(Self {
			namespace: cfg.namespace.clone(),
			dimension: cfg.default_dimension,
			metric,
			index_kind,
			text_search_language: cfg.text_search_language.clone(),
			query_timeout_ms: cfg.query_timeout_ms,
			cleanup_interval_secs: cfg.cleanup_interval_secs,
			max_retries: cfg.max_retries,
			retry_base_ms: cfg.retry_base_ms,
		})
	}
}
impl Default for AdapterSettings {
	fn default() -> Self {
		Self {
			namespace: None,
			dimension: 1_536,
			metric: DistanceMetric::Cosine,
			index_kind: VectorIndexKind::Hnsw,
			text_search_language: "english".to_string(),
			query_timeout_ms: 5_000,
			cleanup_interval_secs: 60,
			max_retries: 3,
			retry_base_ms: 500,
		}
	}
}

/// LIKE patterns treat `%`/`_` as wildcards; prefixes are literal.
pub(crate) fn escape_like(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());

	for ch in raw.chars() {
		if matches!(ch, '%' | '_' | '\\') {
			out.push('\\');
		}

		out.push(ch);
	}

	out
}

pub(crate) fn ensure_dimension(expected: u32, embedding: &[f32]) -> Result<()> {
	if embedding.len() != expected as usize {
		return Err(Error::DimensionMismatch { expected, actual: embedding.len() });
	}

	Ok(())
}

/// LRANGE-style slice bounds over a list of `len` elements. `end = -1` means
/// the last element inclusive; a negative `start` clamps to zero rather than
/// offsetting from the end.
pub(crate) fn list_bounds(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
	if len == 0 {
		return None;
	}

	let start = start.max(0) as usize;
	let end = if end < 0 {
		let from_end = len as i64 + end;

		if from_end < 0 {
			return None;
		}

		from_end as usize
	} else {
		(end as usize).min(len - 1)
	};

	if start > end {
		return None;
	}

	Some((start, end))
}

#[cfg(test)]
mod tests {
	use crate::adapter::list_bounds;

	#[test]
	fn list_bounds_follow_lrange_semantics() {
		assert_eq!(list_bounds(5, 0, -1), Some((0, 4)));
		assert_eq!(list_bounds(5, 1, 3), Some((1, 3)));
		assert_eq!(list_bounds(5, 0, 99), Some((0, 4)));
		assert_eq!(list_bounds(5, -3, -1), Some((0, 4)));
		assert_eq!(list_bounds(5, 4, 2), None);
		assert_eq!(list_bounds(0, 0, -1), None);
	}
}
