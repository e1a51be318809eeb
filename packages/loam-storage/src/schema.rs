use crate::{Result, keys, types::VectorIndexKind};

pub struct PostgresSchema<'a> {
	pub schema: &'a str,
	pub vector_dim: u32,
	pub ann_index: VectorIndexKind,
	pub text_search_language: &'a str,
}

/// Render the Postgres bootstrap script. The schema name and text-search
/// configuration come from callers and pass the identifier whitelist before
/// interpolation.
pub fn render_postgres(opts: &PostgresSchema<'_>) -> Result<String> {
	keys::validate_identifier(opts.schema)?;
	keys::validate_identifier(opts.text_search_language)?;

	let (ann_index, ann_options) = match opts.ann_index {
		VectorIndexKind::IvfFlat => ("ivfflat", " WITH (lists = 100)"),
		// A flat ANN index is no index at all; fall back to hnsw for the
		// bootstrap script and let per-collection specs opt out.
		VectorIndexKind::Hnsw | VectorIndexKind::Flat => ("hnsw", ""),
	};
	let init = include_str!("../../../sql/postgres/init.sql");

	Ok(init
		.replace("<SCHEMA>", &format!("\"{}\"", opts.schema))
		.replace("<VECTOR_DIM>", &opts.vector_dim.to_string())
		.replace("<FTS_LANGUAGE>", opts.text_search_language)
		.replace("<ANN_INDEX_OPTIONS>", ann_options)
		.replace("<ANN_INDEX>", ann_index))
}

pub fn render_sqlite() -> &'static str {
	include_str!("../../../sql/sqlite/init.sql")
}

/// The vec0 virtual table holding memory embeddings, addressed by the rowid
/// of the owning `memories` row. Only issued when the extension is loaded.
pub fn sqlite_vec_table(vector_dim: u32) -> String {
	format!(
		"CREATE VIRTUAL TABLE IF NOT EXISTS memory_vectors USING vec0(embedding float[{vector_dim}])"
	)
}

#[cfg(test)]
mod tests {
	use crate::{
		schema::{PostgresSchema, render_postgres, render_sqlite, sqlite_vec_table},
		types::VectorIndexKind,
	};

	#[test]
	fn postgres_schema_substitutes_placeholders() {
		let sql = render_postgres(&PostgresSchema {
			schema: "public",
			vector_dim: 1536,
			ann_index: VectorIndexKind::Hnsw,
			text_search_language: "english",
		})
		.unwrap();

		assert!(sql.contains("vector(1536)"));
		assert!(sql.contains("\"public\".memories"));
		assert!(sql.contains("to_tsvector('english', content)"));
		assert!(sql.contains("USING hnsw (embedding vector_cosine_ops)"));
		assert!(!sql.contains('<'));
	}

	#[test]
	fn ivfflat_index_carries_list_options() {
		let sql = render_postgres(&PostgresSchema {
			schema: "public",
			vector_dim: 8,
			ann_index: VectorIndexKind::IvfFlat,
			text_search_language: "english",
		})
		.unwrap();

		assert!(sql.contains("USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)"));
	}

	#[test]
	fn hostile_schema_names_are_rejected() {
		let result = render_postgres(&PostgresSchema {
			schema: "public\"; DROP TABLE memories; --",
			vector_dim: 8,
			ann_index: VectorIndexKind::Hnsw,
			text_search_language: "english",
		});

		assert!(result.is_err());
	}

	#[test]
	fn sqlite_schema_carries_fts_triggers() {
		let sql = render_sqlite();

		assert!(sql.contains("USING fts5"));
		assert!(sql.contains("memories_fts_insert"));
		assert!(sql.contains("memories_fts_delete"));
		assert!(sql.contains("memories_fts_update"));
		assert!(sqlite_vec_table(4).contains("float[4]"));
	}
}
