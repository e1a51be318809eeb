mod memory;
mod vector;

use std::{
	collections::HashMap,
	str::FromStr,
	sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
	FromRow, QueryBuilder, SqlitePool,
	sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
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

const BACKEND: &str = "sqlite";

/// Embedded-SQL provider: one writer connection, FTS5 kept in sync by
/// triggers, and memory embeddings mirrored into a `vec0` virtual table
/// addressed by the owning row id when the extension is available.
pub struct SqliteProvider {
	pool: SqlitePool,
	settings: AdapterSettings,
	vec_enabled: bool,
	cleanup: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
	destroyed: AtomicBool,
}
impl SqliteProvider {
	pub async fn connect(cfg: &loam_config::Sqlite, settings: AdapterSettings) -> Result<Self> {
		let mut options = SqliteConnectOptions::from_str(&format!("sqlite://{}", cfg.path))
			.map_err(Error::Sqlx)?
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.foreign_keys(true);
		let vec_enabled = cfg.vec_extension_path.is_some();

		if let Some(path) = cfg.vec_extension_path.as_ref() {
			options = options.extension(path.clone());
		}

		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(options)
			.await?;

		Ok(Self {
			pool,
			settings,
			vec_enabled,
			cleanup: std::sync::Mutex::new(None),
			destroyed: AtomicBool::new(false),
		})
	}

	pub(crate) fn pool(&self) -> Result<&SqlitePool> {
		if self.destroyed.load(Ordering::SeqCst) {
			return Err(Error::Backend("The sqlite provider has been destroyed.".to_string()));
		}

		Ok(&self.pool)
	}

	pub(crate) fn settings(&self) -> &AdapterSettings {
		&self.settings
	}

	pub(crate) fn vec_enabled(&self) -> bool {
		self.vec_enabled
	}

	fn namespace(&self, opts: &StorageOptions) -> String {
		keys::effective_namespace(opts, self.settings.namespace.as_deref())
			.unwrap_or("")
			.to_string()
	}

	async fn initialize_impl(&self) -> Result<()> {
		run_initialize(self.pool()?, self.vec_enabled, self.settings.dimension).await
	}
}

// Kept free of `&self` so the sqlx `Executor` impl selected here isn't tied
// to the caller's erased lifetime when invoked from behind `#[async_trait]`.
async fn run_initialize(pool: &SqlitePool, vec_enabled: bool, dimension: u32) -> Result<()> {
	let mut tx = pool.begin().await?;

	sqlx::raw_sql(schema::render_sqlite()).execute(&mut *tx).await?;

	if vec_enabled {
		sqlx::raw_sql(&schema::sqlite_vec_table(dimension)).execute(&mut *tx).await?;
	}

	tx.commit().await?;

	Ok(())
}

async fn sweep_expired_rows(pool: &SqlitePool) -> Result<u64> {
	let result =
		sqlx::query("DELETE FROM kv_store WHERE expires_at IS NOT NULL AND expires_at <= ?1")
			.bind(clock::now_ms())
			.execute(pool)
			.await?;

	Ok(result.rows_affected())
}

#[derive(Debug, FromRow)]
pub(crate) struct MemoryRow {
	pub id: String,
	pub user_id: String,
	pub agent_id: String,
	pub r#type: String,
	pub content: String,
	pub importance: f64,
	pub resonance: f64,
	pub access_count: i64,
	pub created_at: i64,
	pub updated_at: i64,
	pub last_accessed_at: i64,
	pub session_id: Option<String>,
	pub token_count: Option<i64>,
	pub keywords: String,
	pub metadata: String,
	pub extraction_method: Option<String>,
	pub batch_id: Option<String>,
	pub source_message_ids: String,
	pub embedding: Option<String>,
	pub embedding_model: Option<String>,
	pub embedding_dimension: Option<i64>,
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

		Ok(MemoryRecord {
			id: self.id,
			user_id: self.user_id,
			agent_id: self.agent_id,
			r#type,
			content: self.content,
			importance: self.importance as f32,
			resonance: self.resonance as f32,
			access_count: self.access_count,
			created_at: self.created_at,
			updated_at: self.updated_at,
			last_accessed_at: self.last_accessed_at,
			session_id: self.session_id,
			token_count: self.token_count.map(|count| count as i32),
			keywords: serialize::decode_as(&self.keywords, "keywords")?,
			metadata: serialize::decode(&self.metadata)?,
			extraction_method: self.extraction_method,
			batch_id: self.batch_id,
			source_message_ids: serialize::decode_as(
				&self.source_message_ids,
				"source_message_ids",
			)?,
			embedding: self
				.embedding
				.as_deref()
				.map(|raw| serialize::decode_as(raw, "embedding"))
				.transpose()?,
			embedding_model: self.embedding_model,
			embedding_dimension: self.embedding_dimension.map(|dim| dim as i32),
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
batch_id, source_message_ids, embedding, embedding_model, embedding_dimension, never_decay, \
custom_half_life, reinforceable, status";

#[async_trait]
impl StorageProvider for SqliteProvider {
	fn backend(&self) -> &'static str {
		BACKEND
	}

	fn default_namespace(&self) -> Option<&str> {
		self.settings.namespace.as_deref()
	}

	async fn initialize(&self) -> Result<()> {
		self.initialize_impl().await?;

		let mut cleanup = self.cleanup.lock().unwrap_or_else(|err| err.into_inner());

		if cleanup.is_none() {
			let pool = self.pool.clone();
			let interval =
				std::time::Duration::from_secs(self.settings.cleanup_interval_secs.max(1));

			*cleanup = Some(tokio::spawn(async move {
				let mut ticker = tokio::time::interval(interval);

				ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

				loop {
					ticker.tick().await;

					if let Err(err) = sweep_expired_rows(&pool).await {
						tracing::warn!(error = %err, "TTL sweep failed.");
					}
				}
			}));
		}

		Ok(())
	}

	async fn destroy(&self) -> Result<()> {
		if self.destroyed.swap(true, Ordering::SeqCst) {
			return Err(Error::Backend("The sqlite provider has been destroyed.".to_string()));
		}

		if let Some(handle) = self.cleanup.lock().unwrap_or_else(|err| err.into_inner()).take()
		{
			handle.abort();
		}

		self.pool.close().await;

		Ok(())
	}

	async fn sweep_expired(&self) -> Result<u64> {
		sweep_expired_rows(self.pool()?).await
	}

	async fn get(&self, key: &str, opts: &StorageOptions) -> Result<Option<Value>> {
		keys::validate_key(key)?;

		let row: Option<(String,)> = sqlx::query_as(
			"\
SELECT value
FROM kv_store
WHERE namespace = ?1 AND key = ?2 AND (expires_at IS NULL OR expires_at > ?3)",
		)
		.bind(self.namespace(opts))
		.bind(key)
		.bind(clock::now_ms())
		.fetch_optional(self.pool()?)
		.await?;

		row.map(|(raw,)| serialize::decode(&raw)).transpose()
	}

	async fn set(&self, key: &str, value: &Value, opts: &StorageOptions) -> Result<()> {
		keys::validate_key(key)?;

		let now = clock::now_ms();
		let expires_at = opts.effective_ttl().map(|ttl| now + ttl * 1_000);
		let metadata = opts.metadata.as_ref().map(serialize::encode).transpose()?;

		sqlx::query(
			"\
INSERT INTO kv_store (key, namespace, value, expires_at, metadata, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
ON CONFLICT (namespace, key) DO UPDATE
SET
	value = excluded.value,
	expires_at = excluded.expires_at,
	metadata = excluded.metadata,
	updated_at = excluded.updated_at",
		)
		.bind(key)
		.bind(self.namespace(opts))
		.bind(serialize::encode(value)?)
		.bind(expires_at)
		.bind(metadata)
		.bind(now)
		.execute(self.pool()?)
		.await?;

		Ok(())
	}

	async fn delete(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		keys::validate_key(key)?;

		let result = sqlx::query("DELETE FROM kv_store WHERE namespace = ?1 AND key = ?2")
			.bind(self.namespace(opts))
			.bind(key)
			.execute(self.pool()?)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	async fn exists(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		keys::validate_key(key)?;

		let row: Option<(i64,)> = sqlx::query_as(
			"\
SELECT 1
FROM kv_store
WHERE namespace = ?1 AND key = ?2 AND (expires_at IS NULL OR expires_at > ?3)",
		)
		.bind(self.namespace(opts))
		.bind(key)
		.bind(clock::now_ms())
		.fetch_optional(self.pool()?)
		.await?;

		Ok(row.is_some())
	}

	async fn list(&self, prefix: &str, opts: &StorageOptions) -> Result<Vec<String>> {
		let mut builder = QueryBuilder::new(
			"SELECT key FROM kv_store WHERE namespace = ",
		);

		builder.push_bind(self.namespace(opts));
		builder.push(" AND key LIKE ");
		builder.push_bind(format!("{}%", escape_like(prefix)));
		builder.push(" ESCAPE '\\' AND (expires_at IS NULL OR expires_at > ");
		builder.push_bind(clock::now_ms());
		builder.push(") ORDER BY key");

		if let Some(limit) = opts.limit {
			builder.push(" LIMIT ");
			builder.push_bind(i64::from(limit));
		}
		if let Some(offset) = opts.offset {
			if opts.limit.is_none() {
				builder.push(" LIMIT -1");
			}

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
			let kv = sqlx::query("DELETE FROM kv_store").execute(pool).await?;
			let lists = sqlx::query("DELETE FROM list_store").execute(pool).await?;

			return Ok(kv.rows_affected() + lists.rows_affected());
		}

		let ns = ns.unwrap_or("").to_string();
		let pattern = format!("{}%", escape_like(prefix.unwrap_or("")));
		let mut removed = 0;

		for table in ["kv_store", "list_store"] {
			let result = sqlx::query(&format!(
				"DELETE FROM {table} WHERE namespace = ?1 AND key LIKE ?2 ESCAPE '\\'"
			))
			.bind(&ns)
			.bind(&pattern)
			.execute(pool)
			.await?;

			removed += result.rows_affected();
		}

		Ok(removed)
	}

	async fn set_many(
		&self,
		entries: &HashMap<String, Value>,
		opts: &StorageOptions,
	) -> Result<BatchReport> {
		if entries.is_empty() {
			return Ok(BatchReport::default());
		}

		let now = clock::now_ms();
		let expires_at = opts.effective_ttl().map(|ttl| now + ttl * 1_000);
		let ns = self.namespace(opts);
		let mut encoded = Vec::with_capacity(entries.len());

		for (key, value) in entries {
			keys::validate_key(key)?;
			encoded.push((key.clone(), serialize::encode(value)?));
		}

		let mut tx = self.pool()?.begin().await?;
		let mut builder = QueryBuilder::new(
			"INSERT INTO kv_store (key, namespace, value, expires_at, metadata, created_at, updated_at) ",
		);

		builder.push_values(&encoded, |mut b, (key, payload)| {
			b.push_bind(key)
				.push_bind(&ns)
				.push_bind(payload)
				.push_bind(expires_at)
				.push_bind(None::<String>)
				.push_bind(now)
				.push_bind(now);
		});
		builder.push(
			"\
 ON CONFLICT (namespace, key) DO UPDATE
SET
	value = excluded.value,
	expires_at = excluded.expires_at,
	updated_at = excluded.updated_at",
		);
		builder.build().execute(&mut *tx).await?;
		tx.commit().await?;

		Ok(BatchReport { succeeded: encoded.len() as u64, failed: Vec::new() })
	}

	async fn delete_many(&self, keys_in: &[String], opts: &StorageOptions) -> Result<u64> {
		if keys_in.is_empty() {
			return Ok(0);
		}

		let mut builder = QueryBuilder::new("DELETE FROM kv_store WHERE namespace = ");

		builder.push_bind(self.namespace(opts));
		builder.push(" AND key IN (");

		let mut separated = builder.separated(", ");

		for key in keys_in {
			separated.push_bind(key);
		}

		builder.push(")");

		let result = builder.build().execute(self.pool()?).await?;

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

		let rows: Vec<(String,)> = sqlx::query_as(
			"\
SELECT value
FROM list_store
WHERE namespace = ?1 AND key = ?2
ORDER BY position",
		)
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
		let mut out = Vec::with_capacity(to - from + 1);

		for (raw,) in &rows[from..=to] {
			out.push(serialize::decode(raw)?);
		}

		Ok(Some(out))
	}

	async fn save_list(&self, key: &str, values: &[Value], opts: &StorageOptions) -> Result<()> {
		keys::validate_key(key)?;

		let ns = self.namespace(opts);
		let now = clock::now_ms();
		let mut encoded = Vec::with_capacity(values.len());

		for value in values {
			encoded.push(serialize::encode(value)?);
		}

		let mut tx = self.pool()?.begin().await?;

		sqlx::query("DELETE FROM list_store WHERE namespace = ?1 AND key = ?2")
			.bind(&ns)
			.bind(key)
			.execute(&mut *tx)
			.await?;

		if !encoded.is_empty() {
			let mut builder = QueryBuilder::new(
				"INSERT INTO list_store (key, namespace, position, value, created_at) ",
			);

			builder.push_values(encoded.iter().enumerate(), |mut b, (position, payload)| {
				b.push_bind(key)
					.push_bind(&ns)
					.push_bind(position as i64)
					.push_bind(payload)
					.push_bind(now);
			});
			builder.build().execute(&mut *tx).await?;
		}

		tx.commit().await?;

		Ok(())
	}

	async fn delete_list(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		keys::validate_key(key)?;

		let result = sqlx::query("DELETE FROM list_store WHERE namespace = ?1 AND key = ?2")
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
		if self.vec_enabled { Some(self) } else { None }
	}

	fn vector_memory(&self) -> Option<&dyn VectorMemoryStore> {
		Some(self)
	}
}
