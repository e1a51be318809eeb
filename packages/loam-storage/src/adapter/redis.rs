use std::{
	collections::HashMap,
	sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use serde_json::Value;
use tracing::warn;

use crate::{
	Error, Result,
	adapter::AdapterSettings,
	keys,
	provider::StorageProvider,
	serialize,
	types::{BatchReport, StorageOptions},
};

const BACKEND: &str = "redis";
const SCAN_PAGE: usize = 200;

/// Redis-backed KV/list adapter over a shared [`ConnectionManager`]. Memory
/// and vector capabilities are absent by contract. `set_many` with a TTL
/// falls back to per-key writes; atomicity is lost and partial failures are
/// reported through [`BatchReport`].
pub struct RedisProvider {
	manager: ConnectionManager,
	settings: AdapterSettings,
	destroyed: AtomicBool,
}
impl RedisProvider {
	pub async fn connect(cfg: &loam_config::Redis, settings: AdapterSettings) -> Result<Self> {
		let client = redis::Client::open(cfg.url.as_str())?;
		let manager = client.get_connection_manager().await?;

		Ok(Self { manager, settings, destroyed: AtomicBool::new(false) })
	}

	fn conn(&self) -> Result<ConnectionManager> {
		if self.destroyed.load(Ordering::SeqCst) {
			return Err(Error::Backend("The redis provider has been destroyed.".to_string()));
		}

		Ok(self.manager.clone())
	}

	fn full_key(&self, key: &str, opts: &StorageOptions) -> String {
		let ns = keys::effective_namespace(opts, self.settings.namespace.as_deref());

		keys::namespaced(ns, key)
	}

	async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
		let mut conn = self.conn()?;
		let mut cursor = 0_u64;
		let mut out = Vec::new();

		loop {
			let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
				.arg(cursor)
				.arg("MATCH")
				.arg(pattern)
				.arg("COUNT")
				.arg(SCAN_PAGE)
				.query_async(&mut conn)
				.await?;

			out.extend(page);

			if next == 0 {
				break;
			}

			cursor = next;
		}

		Ok(out)
	}
}

/// SCAN patterns are globs; a literal prefix must not leak glob
/// metacharacters.
fn escape_glob(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());

	for ch in raw.chars() {
		if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
			out.push('\\');
		}

		out.push(ch);
	}

	out
}

#[async_trait]
impl StorageProvider for RedisProvider {
	fn backend(&self) -> &'static str {
		BACKEND
	}

	fn default_namespace(&self) -> Option<&str> {
		self.settings.namespace.as_deref()
	}

	async fn initialize(&self) -> Result<()> {
		let mut conn = self.conn()?;

		redis::cmd("PING").query_async::<()>(&mut conn).await?;

		Ok(())
	}

	async fn destroy(&self) -> Result<()> {
		if self.destroyed.swap(true, Ordering::SeqCst) {
			return Err(Error::Backend("The redis provider has been destroyed.".to_string()));
		}

		Ok(())
	}

	async fn get(&self, key: &str, opts: &StorageOptions) -> Result<Option<Value>> {
		keys::validate_key(key)?;

		let mut conn = self.conn()?;
		let raw: Option<String> = conn.get(self.full_key(key, opts)).await?;

		raw.as_deref().map(serialize::decode).transpose()
	}

	async fn set(&self, key: &str, value: &Value, opts: &StorageOptions) -> Result<()> {
		keys::validate_key(key)?;

		let mut conn = self.conn()?;
		let full_key = self.full_key(key, opts);
		let payload = serialize::encode(value)?;

		match opts.effective_ttl() {
			Some(ttl) => conn.set_ex::<_, _, ()>(full_key, payload, ttl as u64).await?,
			None => conn.set::<_, _, ()>(full_key, payload).await?,
		}

		Ok(())
	}

	async fn delete(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		keys::validate_key(key)?;

		let mut conn = self.conn()?;
		let deleted: u64 = conn.del(self.full_key(key, opts)).await?;

		Ok(deleted > 0)
	}

	async fn exists(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		keys::validate_key(key)?;

		let mut conn = self.conn()?;
		let exists: bool = conn.exists(self.full_key(key, opts)).await?;

		Ok(exists)
	}

	async fn list(&self, prefix: &str, opts: &StorageOptions) -> Result<Vec<String>> {
		let ns = keys::effective_namespace(opts, self.settings.namespace.as_deref());
		let pattern = format!("{}*", escape_glob(&keys::namespaced(ns, prefix)));
		let mut out: Vec<String> = self
			.scan_keys(&pattern)
			.await?
			.into_iter()
			.map(|full| keys::strip_namespace(ns, &full))
			.collect();

		out.sort();

		if let Some(offset) = opts.offset {
			out = out.into_iter().skip(offset as usize).collect();
		}
		if let Some(limit) = opts.limit {
			out.truncate(limit as usize);
		}

		Ok(out)
	}

	async fn clear(&self, prefix: Option<&str>, opts: &StorageOptions) -> Result<u64> {
		let ns = keys::effective_namespace(opts, self.settings.namespace.as_deref());
		let pattern = match (ns, prefix) {
			(None, None) => "*".to_string(),
			(ns, prefix) =>
				format!("{}*", escape_glob(&keys::namespaced(ns, prefix.unwrap_or("")))),
		};
		let matched = self.scan_keys(&pattern).await?;
		let mut conn = self.conn()?;
		let mut removed = 0_u64;

		for chunk in matched.chunks(SCAN_PAGE) {
			match conn.del::<_, u64>(chunk.to_vec()).await {
				Ok(count) => removed += count,
				Err(err) => {
					warn!(error = %err, keys = chunk.len(), "Failed to delete a chunk during clear.");
				},
			}
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

		let mut conn = self.conn()?;
		let full_keys: Vec<String> =
			keys_in.iter().map(|key| self.full_key(key, opts)).collect();
		let raw: Vec<Option<String>> = redis::cmd("MGET")
			.arg(&full_keys)
			.query_async(&mut conn)
			.await?;
		let mut out = HashMap::with_capacity(keys_in.len());

		for (key, raw) in keys_in.iter().zip(raw) {
			out.insert(key.clone(), raw.as_deref().map(serialize::decode).transpose()?);
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

		let mut report = BatchReport::default();

		// A TTL forces per-key SETEX; MSET cannot carry one. The native MSET
		// path below is atomic, the fallback is not.
		if opts.effective_ttl().is_some() {
			for (key, value) in entries {
				match self.set(key, value, opts).await {
					Ok(()) => report.succeeded += 1,
					Err(err) => report.record_failure(key, err.to_string()),
				}
			}

			return Ok(report);
		}

		let mut conn = self.conn()?;
		let mut pairs = Vec::with_capacity(entries.len());

		for (key, value) in entries {
			pairs.push((self.full_key(key, opts), serialize::encode(value)?));
		}

		conn.mset::<_, _, ()>(&pairs).await?;

		report.succeeded = entries.len() as u64;

		Ok(report)
	}

	async fn delete_many(&self, keys_in: &[String], opts: &StorageOptions) -> Result<u64> {
		if keys_in.is_empty() {
			return Ok(0);
		}

		let mut conn = self.conn()?;
		let full_keys: Vec<String> =
			keys_in.iter().map(|key| self.full_key(key, opts)).collect();
		let deleted: u64 = conn.del(full_keys).await?;

		Ok(deleted)
	}

	async fn get_list(
		&self,
		key: &str,
		start: i64,
		end: i64,
		opts: &StorageOptions,
	) -> Result<Option<Vec<Value>>> {
		keys::validate_key(key)?;

		let mut conn = self.conn()?;
		let full_key = self.full_key(key, opts);
		let exists: bool = conn.exists(&full_key).await?;

		if !exists {
			return Ok(None);
		}

		let raw: Vec<String> = conn.lrange(&full_key, start.max(0) as isize, end as isize).await?;
		let mut out = Vec::with_capacity(raw.len());

		for item in &raw {
			out.push(serialize::decode(item)?);
		}

		Ok(Some(out))
	}

	async fn save_list(&self, key: &str, values: &[Value], opts: &StorageOptions) -> Result<()> {
		keys::validate_key(key)?;

		let mut conn = self.conn()?;
		let full_key = self.full_key(key, opts);
		let mut encoded = Vec::with_capacity(values.len());

		for value in values {
			encoded.push(serialize::encode(value)?);
		}

		let mut pipe = redis::pipe();

		pipe.atomic().del(&full_key);

		if !encoded.is_empty() {
			pipe.rpush(&full_key, encoded);
		}
		if let Some(ttl) = opts.effective_ttl() {
			pipe.expire(&full_key, ttl);
		}

		pipe.query_async::<()>(&mut conn).await?;

		Ok(())
	}

	async fn delete_list(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		self.delete(key, opts).await
	}
}
