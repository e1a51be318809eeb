use async_trait::async_trait;
use sqlx::QueryBuilder;

use loam_domain::clock;

use crate::{
	Error, Result,
	adapter::{ensure_dimension, sqlite::SqliteProvider},
	keys,
	provider::VectorStore,
	serialize,
	types::{
		DistanceMetric, VectorCollectionSpec, VectorHit, VectorRecord, VectorSearchOptions,
	},
};

impl SqliteProvider {
	fn vec_guard(&self, operation: &'static str) -> Result<()> {
		if !self.vec_enabled() {
			return Err(Error::unsupported(operation, "sqlite"));
		}

		Ok(())
	}

	async fn collection_spec(&self, name: &str) -> Result<Option<(u32, DistanceMetric)>> {
		let row: Option<(i64, String)> = sqlx::query_as(
			"SELECT dimension, metric FROM vector_collections WHERE name = ?1",
		)
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
		keys::validate_identifier(name)?;
		self.collection_spec(name)
			.await?
			.ok_or_else(|| Error::NotFound(format!("Collection not found: {name}.")))
	}

	async fn write_vectors(
		&self,
		collection: &str,
		records: &[VectorRecord],
		mode: WriteMode,
	) -> Result<()> {
		let (dimension, _) = self.require_collection(collection).await?;
		let table = keys::quote_identifier(&collection_table(collection))?;
		let pool = self.pool()?;

		for record in records {
			ensure_dimension(dimension, &record.vector)?;
		}

		let mut tx = pool.begin().await?;

		for record in records {
			let payload = serialize::encode_as(&record.vector, "vector")?;
			let metadata = serialize::encode(&record.metadata)?;
			let sql = match mode {
				WriteMode::Insert => format!(
					"INSERT INTO {table} (id, embedding, metadata) VALUES (?1, ?2, ?3)"
				),
				WriteMode::Update => format!(
					"UPDATE {table} SET embedding = ?2, metadata = ?3 WHERE id = ?1"
				),
				WriteMode::Upsert => format!(
					"\
INSERT INTO {table} (id, embedding, metadata)
VALUES (?1, ?2, ?3)
ON CONFLICT (id) DO UPDATE SET embedding = excluded.embedding, metadata = excluded.metadata"
				),
			};
			let result = sqlx::query(&sql)
				.bind(&record.id)
				.bind(payload)
				.bind(metadata)
				.execute(&mut *tx)
				.await
				.map_err(|err| match mode {
					WriteMode::Insert if is_unique_violation(&err) => Error::AlreadyExists(
						format!("Vector {} already exists in {collection}.", record.id),
					),
					_ => Error::Sqlx(err),
				})?;

			if matches!(mode, WriteMode::Update) && result.rows_affected() == 0 {
				return Err(Error::NotFound(format!(
					"Vector {} not found in {collection}.",
					record.id
				)));
			}
		}

		tx.commit().await?;

		Ok(())
	}
}

#[derive(Clone, Copy)]
enum WriteMode {
	Insert,
	Update,
	Upsert,
}

fn collection_table(name: &str) -> String {
	format!("vec_c_{name}")
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
	matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint"))
}

#[async_trait]
impl VectorStore for SqliteProvider {
	async fn create_collection(&self, spec: &VectorCollectionSpec) -> Result<()> {
		self.vec_guard("create_collection")?;
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

		let table = keys::quote_identifier(&collection_table(&spec.name))?;
		let pool = self.pool()?;

		sqlx::query(&format!(
			"\
CREATE TABLE IF NOT EXISTS {table} (
	id TEXT PRIMARY KEY,
	embedding TEXT NOT NULL,
	metadata TEXT NOT NULL DEFAULT '{{}}'
)"
		))
		.execute(pool)
		.await?;
		sqlx::query(
			"\
INSERT INTO vector_collections (name, dimension, metric, index_type, index_options, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT (name) DO NOTHING",
		)
		.bind(&spec.name)
		.bind(i64::from(spec.dimension))
		.bind(spec.metric.as_str())
		.bind(spec.index.as_ref().map(|index| index.kind.as_str()))
		.bind(
			spec.index
				.as_ref()
				.map(|index| serialize::encode(&index.options))
				.transpose()?,
		)
		.bind(clock::now_ms())
		.execute(pool)
		.await?;

		Ok(())
	}

	async fn drop_collection(&self, name: &str) -> Result<()> {
		self.vec_guard("drop_collection")?;
		keys::validate_identifier(name)?;

		let table = keys::quote_identifier(&collection_table(name))?;
		let pool = self.pool()?;

		sqlx::query(&format!("DROP TABLE IF EXISTS {table}")).execute(pool).await?;
		sqlx::query("DELETE FROM vector_collections WHERE name = ?1")
			.bind(name)
			.execute(pool)
			.await?;

		Ok(())
	}

	async fn collection_exists(&self, name: &str) -> Result<bool> {
		self.vec_guard("collection_exists")?;

		Ok(self.collection_spec(name).await?.is_some())
	}

	async fn list_collections(&self) -> Result<Vec<String>> {
		self.vec_guard("list_collections")?;

		let rows: Vec<(String,)> =
			sqlx::query_as("SELECT name FROM vector_collections ORDER BY name")
				.fetch_all(self.pool()?)
				.await?;

		Ok(rows.into_iter().map(|(name,)| name).collect())
	}

	async fn insert_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
		self.vec_guard("insert_vectors")?;
		self.write_vectors(collection, records, WriteMode::Insert).await
	}

	async fn update_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
		self.vec_guard("update_vectors")?;
		self.write_vectors(collection, records, WriteMode::Update).await
	}

	async fn upsert_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
		self.vec_guard("upsert_vectors")?;
		self.write_vectors(collection, records, WriteMode::Upsert).await
	}

	async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<u64> {
		self.vec_guard("delete_vectors")?;

		if ids.is_empty() {
			return Ok(0);
		}

		self.require_collection(collection).await?;

		let table = keys::quote_identifier(&collection_table(collection))?;
		let mut builder = QueryBuilder::new(format!("DELETE FROM {table} WHERE id IN ("));
		let mut separated = builder.separated(", ");

		for id in ids {
			separated.push_bind(id);
		}

		builder.push(")");

		let result = builder.build().execute(self.pool()?).await?;

		Ok(result.rows_affected())
	}

	async fn search_vectors(
		&self,
		collection: &str,
		query: &[f32],
		opts: &VectorSearchOptions,
	) -> Result<Vec<VectorHit>> {
		self.vec_guard("search_vectors")?;

		let (dimension, metric) = self.require_collection(collection).await?;

		ensure_dimension(dimension, query)?;

		let table = keys::quote_identifier(&collection_table(collection))?;
		let payload = serialize::encode_as(&query, "query vector")?;
		let pool = self.pool()?;
		let hits = match metric {
			DistanceMetric::Cosine | DistanceMetric::Euclidean => {
				let distance_fn = match metric {
					DistanceMetric::Cosine => "vec_distance_cosine",
					_ => "vec_distance_l2",
				};
				let rows: Vec<(String, f64, String)> = sqlx::query_as(&format!(
					"\
SELECT id, {distance_fn}(embedding, ?1) AS distance, metadata
FROM {table}
ORDER BY distance ASC, id ASC
LIMIT ?2 OFFSET ?3"
				))
				.bind(&payload)
				.bind(i64::from(opts.limit))
				.bind(i64::from(opts.offset))
				.fetch_all(pool)
				.await?;
				let mut hits = Vec::with_capacity(rows.len());

				for (id, distance, metadata) in rows {
					let score = match metric {
						DistanceMetric::Cosine => 1.0 - distance as f32,
						_ => 1.0 / (1.0 + distance as f32),
					};

					hits.push(VectorHit { id, score, metadata: serialize::decode(&metadata)? });
				}

				hits
			},
			DistanceMetric::Dot => {
				let rows: Vec<(String, String, String)> = sqlx::query_as(&format!(
					"SELECT id, embedding, metadata FROM {table}"
				))
				.fetch_all(pool)
				.await?;
				let mut hits = Vec::with_capacity(rows.len());

				for (id, embedding, metadata) in rows {
					let stored: Vec<f32> = serialize::decode_as(&embedding, "embedding")?;
					let score: f32 = stored.iter().zip(query).map(|(a, b)| a * b).sum();

					hits.push(VectorHit { id, score, metadata: serialize::decode(&metadata)? });
				}

				hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));

				hits.into_iter()
					.skip(opts.offset as usize)
					.take(opts.limit as usize)
					.collect()
			},
		};

		Ok(hits)
	}

	async fn get_vector(&self, collection: &str, id: &str) -> Result<Option<VectorRecord>> {
		self.vec_guard("get_vector")?;
		self.require_collection(collection).await?;

		let table = keys::quote_identifier(&collection_table(collection))?;
		let row: Option<(String, String, String)> = sqlx::query_as(&format!(
			"SELECT id, embedding, metadata FROM {table} WHERE id = ?1"
		))
		.bind(id)
		.fetch_optional(self.pool()?)
		.await?;

		row.map(|(id, embedding, metadata)| {
			Ok(VectorRecord {
				id,
				vector: serialize::decode_as(&embedding, "embedding")?,
				metadata: serialize::decode(&metadata)?,
			})
		})
		.transpose()
	}
}
