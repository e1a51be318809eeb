use std::{
	collections::HashMap,
	sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use qdrant_client::{
	Qdrant,
	client::Payload,
	qdrant::{
		Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
		GetPointsBuilder, PointStruct, ScrollPointsBuilder, SearchPointsBuilder,
		SetPayloadPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
		value::Kind,
	},
};
use serde_json::{Value, json};
use uuid::Uuid;

use loam_domain::{MemoryRecord, MemoryStatus, clock, scoring};

use crate::{
	Error, Result,
	adapter::{AdapterSettings, ensure_dimension},
	keys,
	provider::{StorageProvider, VectorMemoryStore, VectorStore},
	retry, serialize,
	types::{
		DistanceMetric, RecallRequest, ScoredMemory, StorageOptions, VectorCollectionSpec,
		VectorHit, VectorRecord, VectorSearchOptions,
	},
};

const BACKEND: &str = "qdrant";
const SCROLL_PAGE: u32 = 128;
const TEXT_SCAN_CAP: usize = 256;
const CANDIDATE_FACTOR: u64 = 4;

/// Vector-DB-only adapter. KV entries are emulated as points: the namespaced
/// key hashes to a deterministic point id and a deterministic unit vector,
/// the JSON payload rides in point metadata, and TTL is an `_ttl_expires`
/// payload field checked (and expired points deleted) on access. Native
/// list/queue operations are unsupported.
pub struct QdrantProvider {
	client: Qdrant,
	collection: String,
	settings: AdapterSettings,
	destroyed: AtomicBool,
}
impl QdrantProvider {
	pub fn new(cfg: &loam_config::Qdrant, settings: AdapterSettings) -> Result<Self> {
		let client = Qdrant::from_url(&cfg.url).build()?;

		Ok(Self {
			client,
			collection: cfg.collection.clone(),
			settings,
			destroyed: AtomicBool::new(false),
		})
	}

	fn client(&self) -> Result<&Qdrant> {
		if self.destroyed.load(Ordering::SeqCst) {
			return Err(Error::Backend("The qdrant provider has been destroyed.".to_string()));
		}

		Ok(&self.client)
	}

	fn full_key(&self, key: &str, opts: &StorageOptions) -> String {
		let ns = keys::effective_namespace(opts, self.settings.namespace.as_deref());

		keys::namespaced(ns, key)
	}

	fn namespace(&self, opts: &StorageOptions) -> String {
		keys::effective_namespace(opts, self.settings.namespace.as_deref())
			.unwrap_or("")
			.to_string()
	}

	fn kv_point_id(&self, full_key: &str) -> String {
		Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("kv:{full_key}").as_bytes()).to_string()
	}

	fn memory_point_id(&self, user_id: &str, memory_id: &str) -> String {
		Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("memory:{user_id}:{memory_id}").as_bytes())
			.to_string()
	}

	/// Deterministic unit vector derived from the key, stable under the key.
	fn key_vector(&self, full_key: &str) -> Vec<f32> {
		let mut hasher = blake3::Hasher::new();

		hasher.update(full_key.as_bytes());

		let mut reader = hasher.finalize_xof();
		let dimension = self.settings.dimension as usize;
		let mut out = Vec::with_capacity(dimension);
		let mut buf = [0_u8; 4];

		for _ in 0..dimension {
			reader.fill(&mut buf);

			let raw = u32::from_le_bytes(buf);

			out.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
		}

		let norm = out.iter().map(|value| value * value).sum::<f32>().sqrt();

		if norm > 0.0 {
			for value in &mut out {
				*value /= norm;
			}
		}

		out
	}

	async fn fetch_point_payload(
		&self,
		point_id: &str,
		with_vectors: bool,
	) -> Result<Option<(HashMap<String, qdrant_client::qdrant::Value>, Option<Vec<f32>>)>> {
		let client = self.client()?;
		let max_retries = self.settings.max_retries;
		let base_ms = self.settings.retry_base_ms;
		let response = retry::with_retries("get_points", max_retries, base_ms, || async {
			Ok(client
				.get_points(
					GetPointsBuilder::new(
						self.collection.clone(),
						vec![point_id.to_string().into()],
					)
					.with_payload(true)
					.with_vectors(with_vectors),
				)
				.await?)
		})
		.await?;
		let Some(point) = response.result.into_iter().next() else { return Ok(None) };
		let vector = point.vectors.and_then(|vectors| {
			use qdrant_client::qdrant::vectors_output::VectorsOptions;

			match vectors.vectors_options {
				Some(VectorsOptions::Vector(vector)) => Some(vector.data),
				_ => None,
			}
		});

		Ok(Some((point.payload, vector)))
	}

	async fn delete_points_by_id(&self, ids: Vec<String>) -> Result<()> {
		if ids.is_empty() {
			return Ok(());
		}

		self.client()?
			.delete_points(
				DeletePointsBuilder::new(self.collection.clone()).points(ids).wait(true),
			)
			.await?;

		Ok(())
	}

	/// Scroll every KV point in the effective namespace, dropping expired
	/// entries along the way.
	async fn scroll_kv_keys(&self, ns: &str) -> Result<Vec<String>> {
		let client = self.client()?;
		let now = clock::now_ms();
		let mut keys_out = Vec::new();
		let mut expired = Vec::new();
		let mut offset: Option<qdrant_client::qdrant::PointId> = None;

		loop {
			let mut builder = ScrollPointsBuilder::new(self.collection.clone())
				.filter(Filter::must([
					Condition::matches("_storage_type", "kv".to_string()),
					Condition::matches("_namespace", ns.to_string()),
				]))
				.limit(SCROLL_PAGE)
				.with_payload(true);

			if let Some(offset) = offset.clone() {
				builder = builder.offset(offset);
			}

			let response = client.scroll(builder).await?;

			for point in &response.result {
				let Some(key) = payload_str(&point.payload, "_key") else { continue };

				if payload_i64(&point.payload, "_ttl_expires").is_some_and(|at| now > at) {
					if let Some(id) = point.id.as_ref().and_then(point_id_string) {
						expired.push(id);
					}

					continue;
				}

				keys_out.push(key);
			}

			match response.next_page_offset {
				Some(next) => offset = Some(next),
				None => break,
			}
		}

		self.delete_points_by_id(expired).await?;
		keys_out.sort();

		Ok(keys_out)
	}

	async fn touch_memory_points(&self, hits: &mut [ScoredMemory]) -> Result<()> {
		let now = clock::now_ms();

		for hit in hits {
			hit.record.touch(now);

			let point_id =
				self.memory_point_id(&hit.record.user_id, &hit.record.id);
			let payload = memory_payload(&hit.record)?;

			self.client()?
				.set_payload(
					SetPayloadPointsBuilder::new(self.collection.clone(), payload)
						.points_selector(vec![qdrant_client::qdrant::PointId::from(
							point_id,
						)])
						.wait(true),
				)
				.await?;
		}

		Ok(())
	}

	async fn memory_candidates_by_vector(
		&self,
		user_id: &str,
		agent_id: &str,
		query: &[f32],
		limit: u64,
	) -> Result<Vec<(MemoryRecord, f32)>> {
		let client = self.client()?;
		let builder = SearchPointsBuilder::new(
			self.collection.clone(),
			query.to_vec(),
			limit,
		)
		.filter(memory_filter(user_id, agent_id))
		.with_payload(true);
		let timeout_ms = self.settings.query_timeout_ms;
		let response =
			retry::with_timeout("search_memories", timeout_ms, async {
				Ok(client.search_points(builder).await?)
			})
			.await?;
		let mut out = Vec::with_capacity(response.result.len());

		for hit in response.result {
			let Some(raw) = payload_str(&hit.payload, "_record") else { continue };
			let record: MemoryRecord = serialize::decode_as(&raw, "memory record")?;

			out.push((record, hit.score));
		}

		Ok(out)
	}

	async fn scroll_memory_records(
		&self,
		user_id: &str,
		agent_id: &str,
		cap: usize,
	) -> Result<Vec<MemoryRecord>> {
		let client = self.client()?;
		let mut out = Vec::new();
		let mut offset: Option<qdrant_client::qdrant::PointId> = None;

		loop {
			let mut builder = ScrollPointsBuilder::new(self.collection.clone())
				.filter(memory_filter(user_id, agent_id))
				.limit(SCROLL_PAGE)
				.with_payload(true);

			if let Some(offset) = offset.clone() {
				builder = builder.offset(offset);
			}

			let response = client.scroll(builder).await?;

			for point in &response.result {
				let Some(raw) = payload_str(&point.payload, "_record") else { continue };

				out.push(serialize::decode_as(&raw, "memory record")?);

				if out.len() >= cap {
					return Ok(out);
				}
			}

			match response.next_page_offset {
				Some(next) => offset = Some(next),
				None => break,
			}
		}

		Ok(out)
	}
}

fn point_id_string(id: &qdrant_client::qdrant::PointId) -> Option<String> {
	use qdrant_client::qdrant::point_id::PointIdOptions;

	match id.point_id_options.as_ref()? {
		PointIdOptions::Uuid(uuid) => Some(uuid.clone()),
		PointIdOptions::Num(num) => Some(num.to_string()),
	}
}

fn payload_str(
	payload: &HashMap<String, qdrant_client::qdrant::Value>,
	field: &str,
) -> Option<String> {
	match payload.get(field)?.kind.as_ref()? {
		Kind::StringValue(value) => Some(value.clone()),
		_ => None,
	}
}

fn payload_i64(
	payload: &HashMap<String, qdrant_client::qdrant::Value>,
	field: &str,
) -> Option<i64> {
	match payload.get(field)?.kind.as_ref()? {
		Kind::IntegerValue(value) => Some(*value),
		_ => None,
	}
}

fn kv_payload(
	ns: &str,
	key: &str,
	value: &Value,
	expires_at: Option<i64>,
	now: i64,
) -> Result<Payload> {
	let mut body = json!({
		"_storage_type": "kv",
		"_namespace": ns,
		"_key": key,
		"_value": serialize::encode(value)?,
		"_updated_at": now,
	});

	if let Some(expires_at) = expires_at {
		body["_ttl_expires"] = json!(expires_at);
	}

	Payload::try_from(body)
		.map_err(|err| Error::Serialization(format!("Failed to build payload: {err}.")))
}

fn memory_payload(record: &MemoryRecord) -> Result<Payload> {
	let body = json!({
		"_storage_type": "memory",
		"_user_id": record.user_id,
		"_agent_id": record.agent_id,
		"_status": record.status.as_str(),
		"_type": record.r#type.as_str(),
		"_record": serialize::encode_as(record, "memory record")?,
	});

	Payload::try_from(body)
		.map_err(|err| Error::Serialization(format!("Failed to build payload: {err}.")))
}

fn memory_filter(user_id: &str, agent_id: &str) -> Filter {
	Filter::must([
		Condition::matches("_storage_type", "memory".to_string()),
		Condition::matches("_user_id", user_id.to_string()),
		Condition::matches("_agent_id", agent_id.to_string()),
		Condition::matches("_status", MemoryStatus::Active.as_str().to_string()),
	])
}

fn metric_distance(metric: DistanceMetric) -> Distance {
	match metric {
		DistanceMetric::Cosine => Distance::Cosine,
		DistanceMetric::Euclidean => Distance::Euclid,
		DistanceMetric::Dot => Distance::Dot,
	}
}

#[async_trait]
impl StorageProvider for QdrantProvider {
	fn backend(&self) -> &'static str {
		BACKEND
	}

	fn default_namespace(&self) -> Option<&str> {
		self.settings.namespace.as_deref()
	}

	async fn initialize(&self) -> Result<()> {
		let client = self.client()?;

		if client.collection_exists(self.collection.clone()).await? {
			return Ok(());
		}

		client
			.create_collection(
				CreateCollectionBuilder::new(self.collection.clone()).vectors_config(
					VectorParamsBuilder::new(
						u64::from(self.settings.dimension),
						metric_distance(self.settings.metric),
					),
				),
			)
			.await?;

		Ok(())
	}

	async fn destroy(&self) -> Result<()> {
		if self.destroyed.swap(true, Ordering::SeqCst) {
			return Err(Error::Backend("The qdrant provider has been destroyed.".to_string()));
		}

		Ok(())
	}

	async fn sweep_expired(&self) -> Result<u64> {
		let client = self.client()?;
		let now = clock::now_ms();
		let mut expired = Vec::new();
		let mut offset: Option<qdrant_client::qdrant::PointId> = None;

		loop {
			let mut builder = ScrollPointsBuilder::new(self.collection.clone())
				.filter(Filter::must([Condition::matches(
					"_storage_type",
					"kv".to_string(),
				)]))
				.limit(SCROLL_PAGE)
				.with_payload(true);

			if let Some(offset) = offset.clone() {
				builder = builder.offset(offset);
			}

			let response = client.scroll(builder).await?;

			for point in &response.result {
				if payload_i64(&point.payload, "_ttl_expires").is_some_and(|at| now > at)
					&& let Some(id) = point.id.as_ref().and_then(point_id_string)
				{
					expired.push(id);
				}
			}

			match response.next_page_offset {
				Some(next) => offset = Some(next),
				None => break,
			}
		}

		let removed = expired.len() as u64;

		self.delete_points_by_id(expired).await?;

		Ok(removed)
	}

	async fn get(&self, key: &str, opts: &StorageOptions) -> Result<Option<Value>> {
		keys::validate_key(key)?;

		let full_key = self.full_key(key, opts);
		let point_id = self.kv_point_id(&full_key);
		let Some((payload, _)) = self.fetch_point_payload(&point_id, false).await? else {
			return Ok(None);
		};

		if payload_i64(&payload, "_ttl_expires").is_some_and(|at| clock::now_ms() > at) {
			self.delete_points_by_id(vec![point_id]).await?;

			return Ok(None);
		}

		let Some(raw) = payload_str(&payload, "_value") else {
			return Err(Error::Serialization(
				"KV point carries no value payload.".to_string(),
			));
		};

		Ok(Some(serialize::decode(&raw)?))
	}

	async fn set(&self, key: &str, value: &Value, opts: &StorageOptions) -> Result<()> {
		keys::validate_key(key)?;

		let now = clock::now_ms();
		let expires_at = opts.effective_ttl().map(|ttl| now + ttl * 1_000);
		let ns = self.namespace(opts);
		let full_key = self.full_key(key, opts);
		let point = PointStruct::new(
			self.kv_point_id(&full_key),
			self.key_vector(&full_key),
			kv_payload(&ns, key, value, expires_at, now)?,
		);

		self.client()?
			.upsert_points(
				UpsertPointsBuilder::new(self.collection.clone(), vec![point]).wait(true),
			)
			.await?;

		Ok(())
	}

	async fn delete(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		keys::validate_key(key)?;

		let full_key = self.full_key(key, opts);
		let point_id = self.kv_point_id(&full_key);
		let existed = self.fetch_point_payload(&point_id, false).await?.is_some();

		if existed {
			self.delete_points_by_id(vec![point_id]).await?;
		}

		Ok(existed)
	}

	async fn exists(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		Ok(self.get(key, opts).await?.is_some())
	}

	async fn list(&self, prefix: &str, opts: &StorageOptions) -> Result<Vec<String>> {
		let ns = self.namespace(opts);
		let mut out: Vec<String> = self
			.scroll_kv_keys(&ns)
			.await?
			.into_iter()
			.filter(|key| key.starts_with(prefix))
			.collect();

		if let Some(offset) = opts.offset {
			out = out.into_iter().skip(offset as usize).collect();
		}
		if let Some(limit) = opts.limit {
			out.truncate(limit as usize);
		}

		Ok(out)
	}

	async fn clear(&self, prefix: Option<&str>, opts: &StorageOptions) -> Result<u64> {
		let ns = self.namespace(opts);
		let matched: Vec<String> = self
			.scroll_kv_keys(&ns)
			.await?
			.into_iter()
			.filter(|key| prefix.is_none_or(|prefix| key.starts_with(prefix)))
			.collect();
		let removed = matched.len() as u64;
		let ids: Vec<String> = matched
			.iter()
			.map(|key| {
				let full_key =
					keys::namespaced(if ns.is_empty() { None } else { Some(ns.as_str()) }, key);

				self.kv_point_id(&full_key)
			})
			.collect();

		self.delete_points_by_id(ids).await?;

		Ok(removed)
	}

	async fn get_list(
		&self,
		_key: &str,
		_start: i64,
		_end: i64,
		_opts: &StorageOptions,
	) -> Result<Option<Vec<Value>>> {
		Err(Error::unsupported("get_list", BACKEND))
	}

	async fn save_list(
		&self,
		_key: &str,
		_values: &[Value],
		_opts: &StorageOptions,
	) -> Result<()> {
		Err(Error::unsupported("save_list", BACKEND))
	}

	async fn delete_list(&self, _key: &str, _opts: &StorageOptions) -> Result<bool> {
		Err(Error::unsupported("delete_list", BACKEND))
	}

	fn vectors(&self) -> Option<&dyn VectorStore> {
		Some(self)
	}

	fn vector_memory(&self) -> Option<&dyn VectorMemoryStore> {
		Some(self)
	}
}

#[async_trait]
impl VectorStore for QdrantProvider {
	async fn create_collection(&self, spec: &VectorCollectionSpec) -> Result<()> {
		let client = self.client()?;

		if spec.dimension == 0 {
			return Err(Error::InvalidArgument(
				"Collection dimension must be greater than zero.".to_string(),
			));
		}
		if client.collection_exists(spec.name.clone()).await? {
			return Ok(());
		}

		client
			.create_collection(
				CreateCollectionBuilder::new(spec.name.clone()).vectors_config(
					VectorParamsBuilder::new(
						u64::from(spec.dimension),
						metric_distance(spec.metric),
					),
				),
			)
			.await?;

		Ok(())
	}

	async fn drop_collection(&self, name: &str) -> Result<()> {
		self.client()?.delete_collection(name.to_string()).await?;

		Ok(())
	}

	async fn collection_exists(&self, name: &str) -> Result<bool> {
		Ok(self.client()?.collection_exists(name.to_string()).await?)
	}

	async fn list_collections(&self) -> Result<Vec<String>> {
		let response = self.client()?.list_collections().await?;
		let mut out: Vec<String> =
			response.collections.into_iter().map(|collection| collection.name).collect();

		out.sort();

		Ok(out)
	}

	async fn insert_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
		let client = self.client()?;
		let existing = client
			.get_points(
				GetPointsBuilder::new(
					collection.to_string(),
					records
						.iter()
						.map(|record| record.id.clone().into())
						.collect::<Vec<_>>(),
				)
				.with_payload(false)
				.with_vectors(false),
			)
			.await?;

		if let Some(point) = existing.result.first() {
			let id = point.id.as_ref().and_then(point_id_string).unwrap_or_default();

			return Err(Error::AlreadyExists(format!(
				"Vector {id} already exists in {collection}."
			)));
		}

		self.upsert_vectors(collection, records).await
	}

	async fn update_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
		let client = self.client()?;
		let existing = client
			.get_points(
				GetPointsBuilder::new(
					collection.to_string(),
					records
						.iter()
						.map(|record| record.id.clone().into())
						.collect::<Vec<_>>(),
				)
				.with_payload(false)
				.with_vectors(false),
			)
			.await?;

		if existing.result.len() != records.len() {
			return Err(Error::NotFound(format!(
				"One or more vectors to update are missing from {collection}."
			)));
		}

		self.upsert_vectors(collection, records).await
	}

	async fn upsert_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
		if records.is_empty() {
			return Ok(());
		}

		let mut points = Vec::with_capacity(records.len());

		for record in records {
			let payload = Payload::try_from(json!({ "metadata": record.metadata }))
				.map_err(|err| {
					Error::Serialization(format!("Failed to build payload: {err}."))
				})?;

			points.push(PointStruct::new(
				record.id.clone(),
				record.vector.clone(),
				payload,
			));
		}

		self.client()?
			.upsert_points(
				UpsertPointsBuilder::new(collection.to_string(), points).wait(true),
			)
			.await?;

		Ok(())
	}

	async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<u64> {
		if ids.is_empty() {
			return Ok(0);
		}

		let client = self.client()?;
		let existing = client
			.get_points(
				GetPointsBuilder::new(
					collection.to_string(),
					ids.iter().map(|id| id.clone().into()).collect::<Vec<_>>(),
				)
				.with_payload(false)
				.with_vectors(false),
			)
			.await?;
		let found = existing.result.len() as u64;

		client
			.delete_points(
				DeletePointsBuilder::new(collection.to_string())
					.points(ids.to_vec())
					.wait(true),
			)
			.await?;

		Ok(found)
	}

	async fn search_vectors(
		&self,
		collection: &str,
		query: &[f32],
		opts: &VectorSearchOptions,
	) -> Result<Vec<VectorHit>> {
		let client = self.client()?;
		let builder = SearchPointsBuilder::new(
			collection.to_string(),
			query.to_vec(),
			u64::from(opts.limit),
		)
		.offset(u64::from(opts.offset))
		.with_payload(true);
		let timeout_ms = self.settings.query_timeout_ms;
		let response = retry::with_timeout("search_vectors", timeout_ms, async {
			Ok(client.search_points(builder).await?)
		})
		.await?;

		Ok(response
			.result
			.into_iter()
			.map(|hit| {
				let id = hit.id.as_ref().and_then(point_id_string).unwrap_or_default();
				let metadata = payload_str(&hit.payload, "metadata")
					.and_then(|raw| serde_json::from_str(&raw).ok())
					.unwrap_or_else(|| payload_to_json(&hit.payload, "metadata"));

				VectorHit { id, score: hit.score, metadata }
			})
			.collect())
	}

	async fn get_vector(&self, collection: &str, id: &str) -> Result<Option<VectorRecord>> {
		let client = self.client()?;
		let response = client
			.get_points(
				GetPointsBuilder::new(collection.to_string(), vec![id.to_string().into()])
					.with_payload(true)
					.with_vectors(true),
			)
			.await?;
		let Some(point) = response.result.into_iter().next() else { return Ok(None) };
		let vector = point
			.vectors
			.and_then(|vectors| {
				use qdrant_client::qdrant::vectors_output::VectorsOptions;

				match vectors.vectors_options {
					Some(VectorsOptions::Vector(vector)) => Some(vector.data),
					_ => None,
				}
			})
			.unwrap_or_default();

		Ok(Some(VectorRecord {
			id: id.to_string(),
			vector,
			metadata: payload_to_json(&point.payload, "metadata"),
		}))
	}
}

/// Best-effort conversion of one payload field back into JSON.
fn payload_to_json(
	payload: &HashMap<String, qdrant_client::qdrant::Value>,
	field: &str,
) -> Value {
	payload.get(field).map(qdrant_value_to_json).unwrap_or(Value::Null)
}

fn qdrant_value_to_json(value: &qdrant_client::qdrant::Value) -> Value {
	match value.kind.as_ref() {
		None | Some(Kind::NullValue(_)) => Value::Null,
		Some(Kind::BoolValue(value)) => Value::Bool(*value),
		Some(Kind::IntegerValue(value)) => json!(value),
		Some(Kind::DoubleValue(value)) => json!(value),
		Some(Kind::StringValue(value)) => Value::String(value.clone()),
		Some(Kind::ListValue(list)) =>
			Value::Array(list.values.iter().map(qdrant_value_to_json).collect()),
		Some(Kind::StructValue(object)) => Value::Object(
			object
				.fields
				.iter()
				.map(|(key, value)| (key.clone(), qdrant_value_to_json(value)))
				.collect(),
		),
	}
}

#[async_trait]
impl VectorMemoryStore for QdrantProvider {
	async fn store_memory_with_embedding(
		&self,
		record: &MemoryRecord,
		embedding: &[f32],
	) -> Result<()> {
		keys::validate_tenant(&record.user_id, &record.agent_id)?;
		ensure_dimension(self.settings.dimension, embedding)?;

		let mut stored = record.clone();

		stored.embedding = Some(embedding.to_vec());
		stored.embedding_dimension = Some(embedding.len() as i32);

		let point = PointStruct::new(
			self.memory_point_id(&stored.user_id, &stored.id),
			embedding.to_vec(),
			memory_payload(&stored)?,
		);

		self.client()?
			.upsert_points(
				UpsertPointsBuilder::new(self.collection.clone(), vec![point]).wait(true),
			)
			.await?;

		Ok(())
	}

	async fn search_by_vector(
		&self,
		user_id: &str,
		agent_id: &str,
		query: &[f32],
		limit: u32,
	) -> Result<Vec<ScoredMemory>> {
		keys::validate_tenant(user_id, agent_id)?;
		ensure_dimension(self.settings.dimension, query)?;

		let candidates = self
			.memory_candidates_by_vector(
				user_id,
				agent_id,
				query,
				u64::from(limit) * CANDIDATE_FACTOR,
			)
			.await?;
		let now = clock::now_ms();
		let mut hits: Vec<ScoredMemory> = candidates
			.into_iter()
			.map(|(record, vector_sim)| {
				let days = clock::age_days(record.last_accessed_at, now);

				ScoredMemory {
					score: scoring::composite_score(
						vector_sim,
						record.importance,
						record.resonance,
						days,
					),
					vector_sim: Some(vector_sim),
					text_score: 0.0,
					record,
				}
			})
			.collect();

		hits.sort_by(|a, b| {
			scoring::compare_ranked(
				(a.score, a.record.importance, a.record.last_accessed_at, &a.record.id),
				(b.score, b.record.importance, b.record.last_accessed_at, &b.record.id),
			)
		});
		hits.truncate(limit as usize);
		self.touch_memory_points(&mut hits).await?;

		Ok(hits)
	}

	async fn find_similar_memories(
		&self,
		user_id: &str,
		agent_id: &str,
		memory_id: &str,
		limit: u32,
	) -> Result<Vec<ScoredMemory>> {
		let embedding = self
			.get_memory_embedding(user_id, memory_id)
			.await?
			.ok_or_else(|| {
				Error::InvalidArgument(format!("Memory {memory_id} carries no embedding."))
			})?;
		let mut hits = self.search_by_vector(user_id, agent_id, &embedding, limit + 1).await?;

		hits.retain(|hit| hit.record.id != memory_id);
		hits.truncate(limit as usize);

		Ok(hits)
	}

	async fn hybrid_search(&self, request: &RecallRequest) -> Result<Vec<ScoredMemory>> {
		keys::validate_tenant(&request.user_id, &request.agent_id)?;

		let weights = request.weights.unwrap_or_default();
		let mut by_id: HashMap<String, (MemoryRecord, f32, Option<f32>)> = HashMap::new();

		if !request.query.trim().is_empty() {
			for record in self
				.scroll_memory_records(&request.user_id, &request.agent_id, TEXT_SCAN_CAP)
				.await?
			{
				let text_score = scoring::lexical_score(&request.query, &record.content);

				by_id.insert(record.id.clone(), (record, text_score, None));
			}
		}

		if let Some(query) = request.embedding.as_ref() {
			ensure_dimension(self.settings.dimension, query)?;

			for (record, vector_sim) in self
				.memory_candidates_by_vector(
					&request.user_id,
					&request.agent_id,
					query,
					u64::from(request.limit) * CANDIDATE_FACTOR,
				)
				.await?
			{
				match by_id.get_mut(&record.id) {
					Some(entry) => entry.2 = Some(vector_sim),
					None => {
						let text_score = scoring::lexical_score(&request.query, &record.content);

						by_id.insert(record.id.clone(), (record, text_score, Some(vector_sim)));
					},
				}
			}
		}

		let mut hits: Vec<ScoredMemory> = by_id
			.into_values()
			.filter(|(record, text_score, vector_sim)| {
				if !request.types.is_empty() && !request.types.contains(&record.r#type) {
					return false;
				}

				scoring::row_qualifies(&weights, *vector_sim, *text_score)
			})
			.map(|(record, text_score, vector_sim)| ScoredMemory {
				score: scoring::hybrid_score(&weights, vector_sim, text_score),
				vector_sim,
				text_score,
				record,
			})
			.collect();

		hits.sort_by(|a, b| {
			scoring::compare_ranked(
				(a.score, a.record.importance, a.record.last_accessed_at, &a.record.id),
				(b.score, b.record.importance, b.record.last_accessed_at, &b.record.id),
			)
		});

		let mut hits: Vec<ScoredMemory> = hits
			.into_iter()
			.skip(request.offset as usize)
			.take(request.limit as usize)
			.collect();

		self.touch_memory_points(&mut hits).await?;

		Ok(hits)
	}

	async fn update_memory_embedding(
		&self,
		user_id: &str,
		memory_id: &str,
		embedding: &[f32],
		model: Option<&str>,
	) -> Result<()> {
		ensure_dimension(self.settings.dimension, embedding)?;

		let point_id = self.memory_point_id(user_id, memory_id);
		let Some((payload, _)) = self.fetch_point_payload(&point_id, false).await? else {
			return Err(Error::NotFound(format!("Memory not found; id={memory_id}.")));
		};
		let Some(raw) = payload_str(&payload, "_record") else {
			return Err(Error::Serialization(
				"Memory point carries no record payload.".to_string(),
			));
		};
		let mut record: MemoryRecord = serialize::decode_as(&raw, "memory record")?;

		record.embedding = Some(embedding.to_vec());
		record.embedding_dimension = Some(embedding.len() as i32);
		record.embedding_model = model.map(str::to_string);
		record.updated_at = clock::now_ms();

		let point =
			PointStruct::new(point_id, embedding.to_vec(), memory_payload(&record)?);

		self.client()?
			.upsert_points(
				UpsertPointsBuilder::new(self.collection.clone(), vec![point]).wait(true),
			)
			.await?;

		Ok(())
	}

	async fn get_memory_embedding(
		&self,
		user_id: &str,
		memory_id: &str,
	) -> Result<Option<Vec<f32>>> {
		let point_id = self.memory_point_id(user_id, memory_id);

		Ok(self
			.fetch_point_payload(&point_id, true)
			.await?
			.and_then(|(_, vector)| vector))
	}
}
