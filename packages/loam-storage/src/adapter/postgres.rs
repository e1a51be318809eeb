mod memory;
mod vector;

use std::{
	collections::HashMap,
	str::FromStr,
	sync::atomic::{AtomicBool, Ordering},
	time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
	FromRow, PgPool, QueryBuilder,
	postgres::{PgConnectOptions, PgPoolOptions},
};

use loam_domain::{MemoryRecord, MemoryStatus, MemoryType, clock};

use crate::{
	Error, Result,
	adapter::{AdapterSettings, escape_like, list_bounds},
	keys,
	provider::{MemoryStore, StorageProvider, VectorMemoryStore, VectorStore},
	schema, serialize,
	types::{BatchReport, StorageOptions},
};

const BACKEND: &str = "postgres";
const SCHEMA_LOCK_ID: i64 = 7_133_815;

/// Relational provider over Postgres with the pgvector extension: upsert KV,
/// multi-row batches inside explicit transactions, full-text plus vector
/// hybrid recall, and engine-side decay math.
pub struct PostgresProvider {
	pool: PgPool,
	settings: AdapterSettings,
	schema_name: String,
	destroyed: AtomicBool,
}
impl PostgresProvider {
	pub async fn connect(
		cfg: &loam_config::Postgres,
		settings: AdapterSettings,
	) -> Result<Self> {
		keys::validate_identifier(&cfg.schema)?;

		let mut options = PgConnectOptions::from_str(&cfg.dsn).map_err(Error::Sqlx)?;

		if !cfg.prepared_statements {
			options = options.statement_cache_capacity(0);
		}

		let pool = PgPoolOptions::new()
			.max_connections(cfg.pool_max_conns)
			.idle_timeout(Duration::from_millis(cfg.pool_idle_timeout_ms))
			.acquire_timeout(Duration::from_millis(cfg.pool_connect_timeout_ms))
			.connect_with(options)
			.await?;

		Ok(Self {
			pool,
			settings,
			schema_name: cfg.schema.clone(),
			destroyed: AtomicBool::new(false),
		})
	}

	pub(crate) fn pool(&self) -> Result<&PgPool> {
		if self.destroyed.load(Ordering::SeqCst) {
			return Err(Error::Backend("The postgres provider has been destroyed.".to_string()));
		}

		Ok(&self.pool)
	}

	pub(crate) fn settings(&self) -> &AdapterSettings {
		&self.settings
	}

	/// `"schema".table`, schema validated at connect time.
	pub(crate) fn table(&self, name: &str) -> String {
		format!("\"{}\".{name}", self.schema_name)
	}

	fn namespace(&self, opts: &StorageOptions) -> String {
		keys::effective_namespace(opts, self.settings.namespace.as_deref())
			.unwrap_or("")
			.to_string()
	}

}

/// Render a pgvector literal the way the wire format expects it.
pub(crate) fn format_vector(vec: &[f32]) -> String {
	let mut out = String::from("[");

	for (idx, value) in vec.iter().enumerate() {
		if idx > 0 {
			out.push(',');
		}

		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}

#[derive(Debug, FromRow)]
pub(crate) struct MemoryRow {
	pub id: String,
	pub user_id: String,
	pub agent_id: String,
	pub r#type: String,
	pub content: String,
	pub importance: f32,
	pub resonance: f32,
	pub access_count: i64,
	pub created_at: i64,
	pub updated_at: i64,
	pub last_accessed_at: i64,
	pub session_id: Option<String>,
	pub token_count: Option<i32>,
	pub keywords: Value,
	pub metadata: Value,
	pub extraction_method: Option<String>,
	pub batch_id: Option<String>,
	pub source_message_ids: Value,
	pub embedding: Option<String>,
	pub embedding_model: Option<String>,
	pub embedding_dimension: Option<i32>,
	pub never_decay: bool,
	pub custom_half_life: Option<i64>,
	pub reinforceable: bool,
	pub status: String,
}
impl MemoryRow {
	pub(crate) fn into_record(self) -> Result<MemoryRecord> {
		let r#type = MemoryType::parse(&self.r#type).ok_or_else(|| {
			Error::Serialization(format!("Unknown memory type in row: {}.", self.r#type))
		})?;
		let status = MemoryStatus::parse(&self.status).ok_or_else(|| {
			Error::Serialization(format!("Unknown memory status in row: {}.", self.status))
		})?;
		let keywords = serde_json::from_value(self.keywords)
			.map_err(|err| Error::Serialization(format!("Failed to decode keywords: {err}.")))?;
		let source_message_ids = serde_json::from_value(self.source_message_ids).map_err(|err| {
			Error::Serialization(format!("Failed to decode source_message_ids: {err}."))
		})?;

		Ok(MemoryRecord {
			id: self.id,
			user_id: self.user_id,
			agent_id: self.agent_id,
			r#type,
			content: self.content,
			importance: self.importance,
			resonance: self.resonance,
			access_count: self.access_count,
			created_at: self.created_at,
			updated_at: self.updated_at,
			last_accessed_at: self.last_accessed_at,
			session_id: self.session_id,
			token_count: self.token_count,
			keywords,
			metadata: self.metadata,
			extraction_method: self.extraction_method,
			batch_id: self.batch_id,
			source_message_ids,
			embedding: self
				.embedding
				.as_deref()
				.map(|raw| serialize::decode_as(raw, "embedding"))
				.transpose()?,
			embedding_model: self.embedding_model,
			embedding_dimension: self.embedding_dimension,
			never_decay: self.never_decay,
			custom_half_life: self.custom_half_life,
			reinforceable: self.reinforceable,
			status,
		})
	}
}

pub(crate) const MEMORY_COLUMNS: &str = "\
id, user_id, agent_id, type, content, importance, resonance, access_count, created_at, \
updated_at, last_accessed_at, session_id, token_count, keywords, metadata, extraction_method, \
batch_id, source_message_ids, embedding::text AS embedding, embedding_model, \
embedding_dimension, never_decay, custom_half_life, reinforceable, status";

#[async_trait]
impl StorageProvider for PostgresProvider {
	fn backend(&self) -> &'static str {
		BACKEND
	}

	fn default_namespace(&self) -> Option<&str> {
		self.settings.namespace.as_deref()
	}

	async fn initialize(&self) -> Result<()> {
		let sql = schema::render_postgres(&schema::PostgresSchema {
			schema: &self.schema_name,
			vector_dim: self.settings.dimension,
			ann_index: self.settings.index_kind,
			text_search_language: &self.settings.text_search_language,
		})?;
		// Advisory locks are held per connection; a single transaction scopes
		// the lock to one connection and releases it on commit.
		let mut tx = self.pool()?.begin().await?;

		sqlx::query("SELECT pg_advisory_xact_lock($1)")
			.bind(SCHEMA_LOCK_ID)
			.execute(&mut *tx)
			.await?;
		// `RawSql::execute` is called via UFCS on `Executor` directly; the
		// inherent method form trips a rustc HRTB inference gap when nested
		// inside `#[async_trait]`'s boxed future (sqlx Executor "not general
		// enough" for PgConnection).
		sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&sql)).await?;
		tx.commit().await?;

		Ok(())
	}

	async fn destroy(&self) -> Result<()> {
		if self.destroyed.swap(true, Ordering::SeqCst) {
			return Err(Error::Backend("The postgres provider has been destroyed.".to_string()));
		}

		self.pool.close().await;

		Ok(())
	}

	async fn sweep_expired(&self) -> Result<u64> {
		let result = sqlx::query(&format!(
			"DELETE FROM {} WHERE expires_at IS NOT NULL AND expires_at <= $1",
			self.table("kv_store")
		))
		.bind(clock::now_ms())
		.execute(self.pool()?)
		.await?;

		Ok(result.rows_affected())
	}

	async fn get(&self, key: &str, opts: &StorageOptions) -> Result<Option<Value>> {
		keys::validate_key(key)?;

		let row: Option<(Value,)> = sqlx::query_as(&format!(
			"\
SELECT value
FROM {}
WHERE namespace = $1 AND key = $2 AND (expires_at IS NULL OR expires_at > $3)",
			self.table("kv_store")
		))
		.bind(self.namespace(opts))
		.bind(key)
		.bind(clock::now_ms())
		.fetch_optional(self.pool()?)
		.await?;

		Ok(row.map(|(value,)| value))
	}

	async fn set(&self, key: &str, value: &Value, opts: &StorageOptions) -> Result<()> {
		keys::validate_key(key)?;

		let now = clock::now_ms();
		let expires_at = opts.effective_ttl().map(|ttl| now + ttl * 1_000);

		sqlx::query(&format!(
			"\
INSERT INTO {} (key, namespace, value, expires_at, metadata, created_at, updated_at)
VALUES ($1, $2, $3, $4, $5, $6, $6)
ON CONFLICT (namespace, key) DO UPDATE
SET
	value = EXCLUDED.value,
	expires_at = EXCLUDED.expires_at,
	metadata = EXCLUDED.metadata,
	updated_at = EXCLUDED.updated_at",
			self.table("kv_store")
		))
		.bind(key)
		.bind(self.namespace(opts))
		.bind(value)
		.bind(expires_at)
		.bind(opts.metadata.as_ref())
		.bind(now)
		.execute(self.pool()?)
		.await?;

		Ok(())
	}

	async fn delete(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		keys::validate_key(key)?;

		let result = sqlx::query(&format!(
			"DELETE FROM {} WHERE namespace = $1 AND key = $2",
			self.table("kv_store")
		))
		.bind(self.namespace(opts))
		.bind(key)
		.execute(self.pool()?)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	async fn exists(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		keys::validate_key(key)?;

		let row: Option<(i32,)> = sqlx::query_as(&format!(
			"\
SELECT 1
FROM {}
WHERE namespace = $1 AND key = $2 AND (expires_at IS NULL OR expires_at > $3)",
			self.table("kv_store")
		))
		.bind(self.namespace(opts))
		.bind(key)
		.bind(clock::now_ms())
		.fetch_optional(self.pool()?)
		.await?;

		Ok(row.is_some())
	}

	async fn list(&self, prefix: &str, opts: &StorageOptions) -> Result<Vec<String>> {
		let mut builder = QueryBuilder::new(format!(
			"SELECT key FROM {} WHERE namespace = ",
			self.table("kv_store")
		));

		builder.push_bind(self.namespace(opts));
		builder.push(" AND key LIKE ");
		builder.push_bind(format!("{}%", escape_like(prefix)));
		builder.push(" AND (expires_at IS NULL OR expires_at > ");
		builder.push_bind(clock::now_ms());
		builder.push(") ORDER BY key");

		if let Some(limit) = opts.limit {
			builder.push(" LIMIT ");
			builder.push_bind(i64::from(limit));
		}
		if let Some(offset) = opts.offset {
			builder.push(" OFFSET ");
			builder.push_bind(i64::from(offset));
		}

		let rows: Vec<(String,)> = builder.build_query_as().fetch_all(self.pool()?).await?;

		Ok(rows.into_iter().map(|(key,)| key).collect())
	}

	async fn clear(&self, prefix: Option<&str>, opts: &StorageOptions) -> Result<u64> {
		let ns = keys::effective_namespace(opts, self.settings.namespace.as_deref());
		let pool = self.pool()?;

		if ns.is_none() && prefix.is_none() {
			let kv = sqlx::query(&format!("DELETE FROM {}", self.table("kv_store")))
				.execute(pool)
				.await?;
			let lists = sqlx::query(&format!("DELETE FROM {}", self.table("list_store")))
				.execute(pool)
				.await?;

			return Ok(kv.rows_affected() + lists.rows_affected());
		}

		let ns = ns.unwrap_or("").to_string();
		let pattern =
			format!("{}%", escape_like(prefix.unwrap_or("")));
		let mut removed = 0;

		for table in ["kv_store", "list_store"] {
			let result = sqlx::query(&format!(
				"DELETE FROM {} WHERE namespace = $1 AND key LIKE $2",
				self.table(table)
			))
			.bind(&ns)
			.bind(&pattern)
			.execute(pool)
			.await?;

			removed += result.rows_affected();
		}

		Ok(removed)
	}

	async fn get_many(
		&self,
		keys_in: &[String],
		opts: &StorageOptions,
	) -> Result<HashMap<String, Option<Value>>> {
		if keys_in.is_empty() {
			return Ok(HashMap::new());
		}

		let rows: Vec<(String, Value)> = sqlx::query_as(&format!(
			"\
SELECT key, value
FROM {}
WHERE namespace = $1 AND key = ANY($2) AND (expires_at IS NULL OR expires_at > $3)",
			self.table("kv_store")
		))
		.bind(self.namespace(opts))
		.bind(keys_in)
		.bind(clock::now_ms())
		.fetch_all(self.pool()?)
		.await?;
		let mut found: HashMap<String, Value> = rows.into_iter().collect();
		let mut out = HashMap::with_capacity(keys_in.len());

		for key in keys_in {
			out.insert(key.clone(), found.remove(key));
		}

		Ok(out)
	}

	async fn set_many(
		&self,
		entries: &HashMap<String, Value>,
		opts: &StorageOptions,
	) -> Result<BatchReport> {
		if entries.is_empty() {
			return Ok(BatchReport::default());
		}

		for key in entries.keys() {
			keys::validate_key(key)?;
		}

		let now = clock::now_ms();
		let expires_at = opts.effective_ttl().map(|ttl| now + ttl * 1_000);
		let ns = self.namespace(opts);
		let mut tx = self.pool()?.begin().await?;
		let mut builder = QueryBuilder::new(format!(
			"INSERT INTO {} (key, namespace, value, expires_at, metadata, created_at, updated_at) ",
			self.table("kv_store")
		));

		builder.push_values(entries, |mut b, (key, value)| {
			b.push_bind(key)
				.push_bind(&ns)
				.push_bind(value)
				.push_bind(expires_at)
				.push_bind(None::<Value>)
				.push_bind(now)
				.push_bind(now);
		});
		builder.push(
			"\
 ON CONFLICT (namespace, key) DO UPDATE
SET
	value = EXCLUDED.value,
	expires_at = EXCLUDED.expires_at,
	updated_at = EXCLUDED.updated_at",
		);
		builder.build().execute(&mut *tx).await?;
		tx.commit().await?;

		Ok(BatchReport { succeeded: entries.len() as u64, failed: Vec::new() })
	}

	async fn delete_many(&self, keys_in: &[String], opts: &StorageOptions) -> Result<u64> {
		if keys_in.is_empty() {
			return Ok(0);
		}

		let result = sqlx::query(&format!(
			"DELETE FROM {} WHERE namespace = $1 AND key = ANY($2)",
			self.table("kv_store")
		))
		.bind(self.namespace(opts))
		.bind(keys_in)
		.execute(self.pool()?)
		.await?;

		Ok(result.rows_affected())
	}

	async fn get_list(
		&self,
		key: &str,
		start: i64,
		end: i64,
		opts: &StorageOptions,
	) -> Result<Option<Vec<Value>>> {
		keys::validate_key(key)?;

		let rows: Vec<(Value,)> = sqlx::query_as(&format!(
			"\
SELECT value
FROM {}
WHERE namespace = $1 AND key = $2
ORDER BY position",
			self.table("list_store")
		))
		.bind(self.namespace(opts))
		.bind(key)
		.fetch_all(self.pool()?)
		.await?;

		if rows.is_empty() {
			return Ok(None);
		}

		let Some((from, to)) = list_bounds(rows.len(), start, end) else {
			return Ok(Some(Vec::new()));
		};

		Ok(Some(rows[from..=to].iter().map(|(value,)| value.clone()).collect()))
	}

	async fn save_list(&self, key: &str, values: &[Value], opts: &StorageOptions) -> Result<()> {
		keys::validate_key(key)?;

		let ns = self.namespace(opts);
		let now = clock::now_ms();
		let mut tx = self.pool()?.begin().await?;

		sqlx::query(&format!(
			"DELETE FROM {} WHERE namespace = $1 AND key = $2",
			self.table("list_store")
		))
		.bind(&ns)
		.bind(key)
		.execute(&mut *tx)
		.await?;

		if !values.is_empty() {
			let mut builder = QueryBuilder::new(format!(
				"INSERT INTO {} (key, namespace, position, value, created_at) ",
				self.table("list_store")
			));

			builder.push_values(values.iter().enumerate(), |mut b, (position, value)| {
				b.push_bind(key)
					.push_bind(&ns)
					.push_bind(position as i32)
					.push_bind(value)
					.push_bind(now);
			});
			builder.build().execute(&mut *tx).await?;
		}

		tx.commit().await?;

		Ok(())
	}

	async fn delete_list(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		keys::validate_key(key)?;

		let result = sqlx::query(&format!(
			"DELETE FROM {} WHERE namespace = $1 AND key = $2",
			self.table("list_store")
		))
		.bind(self.namespace(opts))
		.bind(key)
		.execute(self.pool()?)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	fn memory(&self) -> Option<&dyn MemoryStore> {
		Some(self)
	}

	fn vectors(&self) -> Option<&dyn VectorStore> {
		Some(self)
	}

	fn vector_memory(&self) -> Option<&dyn VectorMemoryStore> {
		Some(self)
	}
}
