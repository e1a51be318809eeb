use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, Row};

use loam_domain::{MemoryRecord, clock, scoring};

use crate::{
	Error, Result,
	adapter::{
		ensure_dimension,
		postgres::{MEMORY_COLUMNS, MemoryRow, PostgresProvider, format_vector},
	},
	keys,
	provider::{MemoryStore, VectorMemoryStore, VectorStore},
	retry,
	types::{
		DistanceMetric, RecallRequest, ScoredMemory, VectorCollectionSpec, VectorHit,
		VectorIndexKind, VectorRecord, VectorSearchOptions,
	},
};

const CANDIDATE_FACTOR: u32 = 4;

impl PostgresProvider {
	fn collection_table(&self, name: &str) -> Result<String> {
		keys::validate_identifier(name)?;

		Ok(format!("\"{}\".\"vec_c_{name}\"", self.schema_name))
	}

	async fn collection_spec(&self, name: &str) -> Result<Option<(u32, DistanceMetric)>> {
		let row: Option<(i32, String)> = sqlx::query_as(&format!(
			"SELECT dimension, metric FROM {} WHERE name = $1",
			self.table("vector_collections")
		))
		.bind(name)
		.fetch_optional(self.pool()?)
		.await?;

		row.map(|(dimension, metric)| {
			let metric = DistanceMetric::parse(&metric).ok_or_else(|| {
				Error::Serialization(format!("Unknown metric in collection row: {metric}."))
			})?;

			Ok((dimension as u32, metric))
		})
		.transpose()
	}

	async fn require_collection(&self, name: &str) -> Result<(u32, DistanceMetric)> {
		self.collection_spec(name)
			.await?
			.ok_or_else(|| Error::NotFound(format!("Collection not found: {name}.")))
	}

	async fn search_by_vector_inner(
		&self,
		user_id: &str,
		agent_id: &str,
		query: &[f32],
		limit: u32,
		exclude_id: Option<&str>,
	) -> Result<Vec<ScoredMemory>> {
		keys::validate_tenant(user_id, agent_id)?;
		ensure_dimension(self.settings().dimension, query)?;

		let vector_text = format_vector(query);
		let candidate_limit = i64::from(limit.saturating_mul(CANDIDATE_FACTOR).max(limit));
		let sql = format!(
			"\
SELECT {MEMORY_COLUMNS}, 1 - (embedding <=> $3::vector) AS vector_sim
FROM {}
WHERE user_id = $1 AND agent_id = $2 AND status = 'active' AND embedding IS NOT NULL
ORDER BY embedding <=> $3::vector
LIMIT $4",
			self.table("memories")
		);
		let timeout_ms = self.settings().query_timeout_ms;
		let pool = self.pool()?.clone();
		let rows = retry::with_timeout("search_by_vector", timeout_ms, async {
			Ok(sqlx::query(&sql)
				.bind(user_id)
				.bind(agent_id)
				.bind(&vector_text)
				.bind(candidate_limit)
				.fetch_all(&pool)
				.await?)
		})
		.await?;
		let now = clock::now_ms();
		let mut hits = Vec::with_capacity(rows.len());

		for row in rows {
			let vector_sim: f64 = row.try_get("vector_sim")?;
			let record = MemoryRow::from_row(&row)?.into_record()?;

			if exclude_id.is_some_and(|id| id == record.id) {
				continue;
			}

			let vector_sim = vector_sim as f32;
			let days = clock::age_days(record.last_accessed_at, now);
			let score = scoring::composite_score(
				vector_sim,
				record.importance,
				record.resonance,
				days,
			);

			hits.push(ScoredMemory { record, score, vector_sim: Some(vector_sim), text_score: 0.0 });
		}

		hits.sort_by(|a, b| {
			scoring::compare_ranked(
				(a.score, a.record.importance, a.record.last_accessed_at, &a.record.id),
				(b.score, b.record.importance, b.record.last_accessed_at, &b.record.id),
			)
		});
		hits.truncate(limit as usize);

		let ids: Vec<String> = hits.iter().map(|hit| hit.record.id.clone()).collect();

		self.touch_ids(&ids).await?;

		Ok(hits)
	}
}

fn distance_operator(metric: DistanceMetric) -> &'static str {
	match metric {
		DistanceMetric::Cosine => "<=>",
		DistanceMetric::Euclidean => "<->",
		DistanceMetric::Dot => "<#>",
	}
}

fn score_from_distance(metric: DistanceMetric, distance: f64) -> f32 {
	match metric {
		DistanceMetric::Cosine => 1.0 - distance as f32,
		DistanceMetric::Euclidean => 1.0 / (1.0 + distance as f32),
		// pgvector's <#> is the negated inner product.
		DistanceMetric::Dot => -distance as f32,
	}
}

fn index_ops(metric: DistanceMetric) -> &'static str {
	match metric {
		DistanceMetric::Cosine => "vector_cosine_ops",
		DistanceMetric::Euclidean => "vector_l2_ops",
		DistanceMetric::Dot => "vector_ip_ops",
	}
}

#[async_trait]
impl VectorStore for PostgresProvider {
	async fn create_collection(&self, spec: &VectorCollectionSpec) -> Result<()> {
		keys::validate_identifier(&spec.name)?;

		if spec.dimension == 0 {
			return Err(Error::InvalidArgument(
				"Collection dimension must be greater than zero.".to_string(),
			));
		}

		if let Some((dimension, metric)) = self.collection_spec(&spec.name).await? {
			if dimension == spec.dimension && metric == spec.metric {
				return Ok(());
			}

			return Err(Error::AlreadyExists(format!(
				"Collection {} exists with a different configuration.",
				spec.name
			)));
		}

		let table = self.collection_table(&spec.name)?;
		let pool = self.pool()?;

		sqlx::query(&format!(
			"\
CREATE TABLE IF NOT EXISTS {table} (
	id TEXT PRIMARY KEY,
	embedding vector({}) NOT NULL,
	metadata JSONB NOT NULL DEFAULT '{{}}'
)",
			spec.dimension
		))
		.execute(pool)
		.await?;

		if let Some(index) = spec.index.as_ref()
			&& index.kind != VectorIndexKind::Flat
		{
			let (method, options) = match index.kind {
				VectorIndexKind::IvfFlat => ("ivfflat", " WITH (lists = 100)"),
				_ => ("hnsw", ""),
			};

			sqlx::query(&format!(
				"\
CREATE INDEX IF NOT EXISTS \"idx_vec_c_{}_embedding\"
	ON {table} USING {method} (embedding {}){options}",
				spec.name,
				index_ops(spec.metric)
			))
			.execute(pool)
			.await?;
		}

		sqlx::query(&format!(
			"\
INSERT INTO {} (name, dimension, metric, index_type, index_options, created_at)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (name) DO NOTHING",
			self.table("vector_collections")
		))
		.bind(&spec.name)
		.bind(spec.dimension as i32)
		.bind(spec.metric.as_str())
		.bind(spec.index.as_ref().map(|index| index.kind.as_str()))
		.bind(spec.index.as_ref().map(|index| index.options.clone()))
		.bind(clock::now_ms())
		.execute(pool)
		.await?;

		Ok(())
	}

	async fn drop_collection(&self, name: &str) -> Result<()> {
		let table = self.collection_table(name)?;
		let pool = self.pool()?;

		sqlx::query(&format!("DROP TABLE IF EXISTS {table}")).execute(pool).await?;
		sqlx::query(&format!(
			"DELETE FROM {} WHERE name = $1",
			self.table("vector_collections")
		))
		.bind(name)
		.execute(pool)
		.await?;

		Ok(())
	}

	async fn collection_exists(&self, name: &str) -> Result<bool> {
		Ok(self.collection_spec(name).await?.is_some())
	}

	async fn list_collections(&self) -> Result<Vec<String>> {
		let rows: Vec<(String,)> = sqlx::query_as(&format!(
			"SELECT name FROM {} ORDER BY name",
			self.table("vector_collections")
		))
		.fetch_all(self.pool()?)
		.await?;

		Ok(rows.into_iter().map(|(name,)| name).collect())
	}

	async fn insert_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
		if records.is_empty() {
			return Ok(());
		}

		let (dimension, _) = self.require_collection(collection).await?;

		for record in records {
			ensure_dimension(dimension, &record.vector)?;
		}

		let table = self.collection_table(collection)?;
		let mut tx = self.pool()?.begin().await?;

		for record in records {
			sqlx::query(&format!(
				"INSERT INTO {table} (id, embedding, metadata) VALUES ($1, $2::vector, $3)"
			))
			.bind(&record.id)
			.bind(format_vector(&record.vector))
			.bind(&record.metadata)
			.execute(&mut *tx)
			.await
			.map_err(|err| {
				if matches!(&err, sqlx::Error::Database(db) if db.is_unique_violation()) {
					Error::AlreadyExists(format!(
						"Vector {} already exists in {collection}.",
						record.id
					))
				} else {
					Error::Sqlx(err)
				}
			})?;
		}

		tx.commit().await?;

		Ok(())
	}

	async fn update_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
		let (dimension, _) = self.require_collection(collection).await?;
		let table = self.collection_table(collection)?;
		let mut tx = self.pool()?.begin().await?;

		for record in records {
			ensure_dimension(dimension, &record.vector)?;

			let result = sqlx::query(&format!(
				"UPDATE {table} SET embedding = $2::vector, metadata = $3 WHERE id = $1"
			))
			.bind(&record.id)
			.bind(format_vector(&record.vector))
			.bind(&record.metadata)
			.execute(&mut *tx)
			.await?;

			if result.rows_affected() == 0 {
				return Err(Error::NotFound(format!(
					"Vector {} not found in {collection}.",
					record.id
				)));
			}
		}

		tx.commit().await?;

		Ok(())
	}

	async fn upsert_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
		let (dimension, _) = self.require_collection(collection).await?;
		let table = self.collection_table(collection)?;
		let mut tx = self.pool()?.begin().await?;

		for record in records {
			ensure_dimension(dimension, &record.vector)?;

			sqlx::query(&format!(
				"\
INSERT INTO {table} (id, embedding, metadata)
VALUES ($1, $2::vector, $3)
ON CONFLICT (id) DO UPDATE
SET embedding = EXCLUDED.embedding, metadata = EXCLUDED.metadata"
			))
			.bind(&record.id)
			.bind(format_vector(&record.vector))
			.bind(&record.metadata)
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;

		Ok(())
	}

	async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<u64> {
		if ids.is_empty() {
			return Ok(0);
		}

		self.require_collection(collection).await?;

		let table = self.collection_table(collection)?;
		let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = ANY($1)"))
			.bind(ids)
			.execute(self.pool()?)
			.await?;

		Ok(result.rows_affected())
	}

	async fn search_vectors(
		&self,
		collection: &str,
		query: &[f32],
		opts: &VectorSearchOptions,
	) -> Result<Vec<VectorHit>> {
		let (dimension, metric) = self.require_collection(collection).await?;

		ensure_dimension(dimension, query)?;

		let table = self.collection_table(collection)?;
		let operator = distance_operator(metric);
		let sql = format!(
			"\
SELECT id, (embedding {operator} $1::vector)::double precision AS distance, metadata
FROM {table}
ORDER BY embedding {operator} $1::vector, id
LIMIT $2 OFFSET $3"
		);
		let timeout_ms = self.settings().query_timeout_ms;
		let pool = self.pool()?.clone();
		let vector_text = format_vector(query);
		let rows: Vec<(String, f64, Value)> =
			retry::with_timeout("search_vectors", timeout_ms, async {
				Ok(sqlx::query_as(&sql)
					.bind(&vector_text)
					.bind(i64::from(opts.limit))
					.bind(i64::from(opts.offset))
					.fetch_all(&pool)
					.await?)
			})
			.await?;

		Ok(rows
			.into_iter()
			.map(|(id, distance, metadata)| VectorHit {
				id,
				score: score_from_distance(metric, distance),
				metadata,
			})
			.collect())
	}

	async fn get_vector(&self, collection: &str, id: &str) -> Result<Option<VectorRecord>> {
		self.require_collection(collection).await?;

		let table = self.collection_table(collection)?;
		let row: Option<(String, String, Value)> = sqlx::query_as(&format!(
			"SELECT id, embedding::text, metadata FROM {table} WHERE id = $1"
		))
		.bind(id)
		.fetch_optional(self.pool()?)
		.await?;

		row.map(|(id, embedding, metadata)| {
			Ok(VectorRecord {
				id,
				vector: serde_json::from_str(&embedding).map_err(|err| {
					Error::Serialization(format!("Failed to decode embedding: {err}."))
				})?,
				metadata,
			})
		})
		.transpose()
	}
}

#[async_trait]
impl VectorMemoryStore for PostgresProvider {
	async fn store_memory_with_embedding(
		&self,
		record: &MemoryRecord,
		embedding: &[f32],
	) -> Result<()> {
		ensure_dimension(self.settings().dimension, embedding)?;

		let mut stored = record.clone();

		stored.embedding = Some(embedding.to_vec());
		stored.embedding_dimension = Some(embedding.len() as i32);

		MemoryStore::store(self, &stored).await
	}

	async fn search_by_vector(
		&self,
		user_id: &str,
		agent_id: &str,
		query: &[f32],
		limit: u32,
	) -> Result<Vec<ScoredMemory>> {
		self.search_by_vector_inner(user_id, agent_id, query, limit, None).await
	}

	async fn find_similar_memories(
		&self,
		user_id: &str,
		agent_id: &str,
		memory_id: &str,
		limit: u32,
	) -> Result<Vec<ScoredMemory>> {
		let origin = self
			.fetch_record(user_id, memory_id)
			.await?
			.ok_or_else(|| Error::NotFound(format!("Memory not found; id={memory_id}.")))?;
		let embedding = origin.embedding.ok_or_else(|| {
			Error::InvalidArgument(format!("Memory {memory_id} carries no embedding."))
		})?;

		self.search_by_vector_inner(user_id, agent_id, &embedding, limit, Some(memory_id))
			.await
	}

	async fn hybrid_search(&self, request: &RecallRequest) -> Result<Vec<ScoredMemory>> {
		self.recall_inner(request).await
	}

	async fn update_memory_embedding(
		&self,
		user_id: &str,
		memory_id: &str,
		embedding: &[f32],
		model: Option<&str>,
	) -> Result<()> {
		ensure_dimension(self.settings().dimension, embedding)?;

		let result = sqlx::query(&format!(
			"\
UPDATE {}
SET
	embedding = $1::vector,
	embedding_model = $2,
	embedding_dimension = $3,
	updated_at = $4
WHERE user_id = $5 AND id = $6",
			self.table("memories")
		))
		.bind(format_vector(embedding))
		.bind(model)
		.bind(embedding.len() as i32)
		.bind(clock::now_ms())
		.bind(user_id)
		.bind(memory_id)
		.execute(self.pool()?)
		.await?;

		if result.rows_affected() == 0 {
			return Err(Error::NotFound(format!("Memory not found; id={memory_id}.")));
		}

		Ok(())
	}

	async fn get_memory_embedding(
		&self,
		user_id: &str,
		memory_id: &str,
	) -> Result<Option<Vec<f32>>> {
		let row: Option<(Option<String>,)> = sqlx::query_as(&format!(
			"SELECT embedding::text FROM {} WHERE user_id = $1 AND id = $2",
			self.table("memories")
		))
		.bind(user_id)
		.bind(memory_id)
		.fetch_optional(self.pool()?)
		.await?;

		match row {
			Some((Some(raw),)) => Ok(Some(serde_json::from_str(&raw).map_err(|err| {
				Error::Serialization(format!("Failed to decode embedding: {err}."))
			})?)),
			_ => Ok(None),
		}
	}
}
