use std::{
	collections::{HashMap, HashSet, VecDeque},
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::debug;

use loam_domain::{
	DecayRules, MemoryConnection, MemoryRecord, MemoryStats, MemoryStatus, MemoryUpdate, clock,
	decay::{self, DecayDecision},
	scoring,
};

use crate::{
	Error, Result,
	adapter::{AdapterSettings, ensure_dimension, list_bounds},
	keys,
	provider::{MemoryStore, StorageProvider, VectorMemoryStore, VectorStore},
	types::{
		BatchReport, ConnectedMemories, DecayReport, ProceduralPattern, RecallRequest,
		ScoredMemory, StorageOptions, TraversalOptions, VectorCollectionSpec, VectorHit,
		VectorRecord, VectorSearchOptions,
	},
};

const BACKEND: &str = "memory";

#[derive(Clone, Debug)]
struct StoredEntry {
	value: Value,
	expires_at: Option<i64>,
	created_at: i64,
	updated_at: i64,
}
impl StoredEntry {
	fn live(&self, now_ms: i64) -> bool {
		self.expires_at.map(|at| now_ms <= at).unwrap_or(true)
	}
}

#[derive(Debug)]
struct EphemeralCollection {
	spec: VectorCollectionSpec,
	rows: HashMap<String, VectorRecord>,
}

#[derive(Debug, Default)]
struct Shared {
	kv: RwLock<HashMap<(String, String), StoredEntry>>,
	lists: RwLock<HashMap<(String, String), Vec<Value>>>,
	/// `user_id -> memory id -> record`; agent scoping happens per query.
	memories: RwLock<HashMap<String, HashMap<String, MemoryRecord>>>,
	/// `user_id -> (source, target) -> edge`.
	connections: RwLock<HashMap<String, HashMap<(String, String), MemoryConnection>>>,
	patterns: RwLock<HashMap<(String, String), HashMap<String, ProceduralPattern>>>,
	collections: RwLock<HashMap<String, EphemeralCollection>>,
}

/// In-process, ephemeral provider. TTL is enforced on read; a background
/// sweep purges expired entries on the configured interval. Implements every
/// capability, scoring recall with the same formulas the SQL backends push
/// into their engines.
pub struct EphemeralProvider {
	settings: AdapterSettings,
	shared: Arc<Shared>,
	cleanup: std::sync::Mutex<Option<JoinHandle<()>>>,
	destroyed: AtomicBool,
}
impl EphemeralProvider {
	pub fn new(settings: AdapterSettings) -> Self {
		Self {
			settings,
			shared: Arc::new(Shared::default()),
			cleanup: std::sync::Mutex::new(None),
			destroyed: AtomicBool::new(false),
		}
	}

	fn check_open(&self) -> Result<()> {
		if self.destroyed.load(Ordering::SeqCst) {
			return Err(Error::Backend("The memory provider has been destroyed.".to_string()));
		}

		Ok(())
	}

	fn ns_key(&self, key: &str, opts: &StorageOptions) -> (String, String) {
		let ns = keys::effective_namespace(opts, self.settings.namespace.as_deref());

		(ns.unwrap_or("").to_string(), key.to_string())
	}

	async fn touch_records(&self, user_id: &str, ids: &[String]) {
		if ids.is_empty() {
			return;
		}

		let now = clock::now_ms();
		let mut memories = self.shared.memories.write().await;
		let Some(by_id) = memories.get_mut(user_id) else { return };

		for id in ids {
			if let Some(record) = by_id.get_mut(id) {
				record.touch(now);
			}
		}
	}

	async fn scored_by_vector(
		&self,
		user_id: &str,
		agent_id: &str,
		query: &[f32],
		limit: u32,
		exclude_id: Option<&str>,
	) -> Result<Vec<ScoredMemory>> {
		keys::validate_tenant(user_id, agent_id)?;
		ensure_dimension(self.settings.dimension, query)?;

		let now = clock::now_ms();
		let mut hits = {
			let memories = self.shared.memories.read().await;
			let mut hits = Vec::new();

			for record in memories.get(user_id).into_iter().flat_map(HashMap::values) {
				if record.agent_id != agent_id || record.status != MemoryStatus::Active {
					continue;
				}
				if exclude_id.is_some_and(|id| id == record.id) {
					continue;
				}

				let Some(embedding) = record.embedding.as_ref() else { continue };
				let vector_sim = scoring::cosine_similarity(embedding, query);
				let days = clock::age_days(record.last_accessed_at, now);
				let score = scoring::composite_score(
					vector_sim,
					record.importance,
					record.resonance,
					days,
				);

				hits.push(ScoredMemory {
					record: record.clone(),
					score,
					vector_sim: Some(vector_sim),
					text_score: 0.0,
				});
			}

			hits
		};

		hits.sort_by(|a, b| {
			scoring::compare_ranked(
				(a.score, a.record.importance, a.record.last_accessed_at, &a.record.id),
				(b.score, b.record.importance, b.record.last_accessed_at, &b.record.id),
			)
		});
		hits.truncate(limit as usize);

		let ids: Vec<String> = hits.iter().map(|hit| hit.record.id.clone()).collect();

		self.touch_records(user_id, &ids).await;

		Ok(hits)
	}

	async fn recall_inner(&self, request: &RecallRequest) -> Result<Vec<ScoredMemory>> {
		keys::validate_tenant(&request.user_id, &request.agent_id)?;

		if let Some(embedding) = request.embedding.as_ref() {
			ensure_dimension(self.settings.dimension, embedding)?;
		}

		let weights = request.weights.unwrap_or_default();
		let mut hits = {
			let memories = self.shared.memories.read().await;
			let mut hits = Vec::new();

			for record in memories.get(&request.user_id).into_iter().flat_map(HashMap::values) {
				if record.agent_id != request.agent_id
					|| record.status != MemoryStatus::Active
				{
					continue;
				}
				if !request.types.is_empty() && !request.types.contains(&record.r#type) {
					continue;
				}

				let text_score = scoring::lexical_score(&request.query, &record.content);
				let vector_sim = match (request.embedding.as_ref(), record.embedding.as_ref()) {
					(Some(query), Some(stored)) =>
						Some(scoring::cosine_similarity(stored, query)),
					_ => None,
				};

				if !scoring::row_qualifies(&weights, vector_sim, text_score) {
					continue;
				}

				let score = scoring::hybrid_score(&weights, vector_sim, text_score);

				hits.push(ScoredMemory { record: record.clone(), score, vector_sim, text_score });
			}

			hits
		};

		hits.sort_by(|a, b| {
			scoring::compare_ranked(
				(a.score, a.record.importance, a.record.last_accessed_at, &a.record.id),
				(b.score, b.record.importance, b.record.last_accessed_at, &b.record.id),
			)
		});

		let offset = request.offset as usize;
		let hits: Vec<ScoredMemory> =
			hits.into_iter().skip(offset).take(request.limit as usize).collect();
		let ids: Vec<String> = hits.iter().map(|hit| hit.record.id.clone()).collect();

		self.touch_records(&request.user_id, &ids).await;

		Ok(hits)
	}
}

#[async_trait]
impl StorageProvider for EphemeralProvider {
	fn backend(&self) -> &'static str {
		BACKEND
	}

	fn default_namespace(&self) -> Option<&str> {
		self.settings.namespace.as_deref()
	}

	async fn initialize(&self) -> Result<()> {
		self.check_open()?;

		let mut cleanup = self.cleanup.lock().unwrap_or_else(|err| err.into_inner());

		if cleanup.is_some() {
			return Ok(());
		}

		let shared = Arc::clone(&self.shared);
		let interval = Duration::from_secs(self.settings.cleanup_interval_secs.max(1));

		*cleanup = Some(tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);

			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

			loop {
				ticker.tick().await;

				let purged = purge_expired(&shared).await;

				if purged > 0 {
					debug!(purged, "Purged expired entries.");
				}
			}
		}));

		Ok(())
	}

	async fn sweep_expired(&self) -> Result<u64> {
		self.check_open()?;

		Ok(purge_expired(&self.shared).await)
	}

	async fn destroy(&self) -> Result<()> {
		self.check_open()?;
		self.destroyed.store(true, Ordering::SeqCst);

		if let Some(handle) =
			self.cleanup.lock().unwrap_or_else(|err| err.into_inner()).take()
		{
			handle.abort();
		}

		self.shared.kv.write().await.clear();
		self.shared.lists.write().await.clear();
		self.shared.memories.write().await.clear();
		self.shared.connections.write().await.clear();
		self.shared.collections.write().await.clear();

		Ok(())
	}

	async fn get(&self, key: &str, opts: &StorageOptions) -> Result<Option<Value>> {
		self.check_open()?;
		keys::validate_key(key)?;

		let now = clock::now_ms();
		let kv = self.shared.kv.read().await;

		Ok(kv.get(&self.ns_key(key, opts)).filter(|entry| entry.live(now)).map(|entry| {
			entry.value.clone()
		}))
	}

	async fn set(&self, key: &str, value: &Value, opts: &StorageOptions) -> Result<()> {
		self.check_open()?;
		keys::validate_key(key)?;

		let now = clock::now_ms();
		let expires_at = opts.effective_ttl().map(|ttl| now + ttl * 1_000);
		let mut kv = self.shared.kv.write().await;
		let entry = kv.entry(self.ns_key(key, opts)).or_insert_with(|| StoredEntry {
			value: Value::Null,
			expires_at: None,
			created_at: now,
			updated_at: now,
		});

		entry.value = value.clone();
		entry.expires_at = expires_at;
		entry.updated_at = now;

		Ok(())
	}

	async fn delete(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		self.check_open()?;
		keys::validate_key(key)?;

		Ok(self.shared.kv.write().await.remove(&self.ns_key(key, opts)).is_some())
	}

	async fn exists(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		self.check_open()?;
		keys::validate_key(key)?;

		let now = clock::now_ms();

		Ok(self
			.shared
			.kv
			.read()
			.await
			.get(&self.ns_key(key, opts))
			.is_some_and(|entry| entry.live(now)))
	}

	async fn list(&self, prefix: &str, opts: &StorageOptions) -> Result<Vec<String>> {
		self.check_open()?;

		let ns = keys::effective_namespace(opts, self.settings.namespace.as_deref())
			.unwrap_or("")
			.to_string();
		let now = clock::now_ms();
		let kv = self.shared.kv.read().await;
		let mut out: Vec<String> = kv
			.iter()
			.filter(|((entry_ns, key), entry)| {
				*entry_ns == ns && key.starts_with(prefix) && entry.live(now)
			})
			.map(|((_, key), _)| key.clone())
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
		self.check_open()?;

		let ns = keys::effective_namespace(opts, self.settings.namespace.as_deref());
		let mut removed = 0_u64;
		let mut kv = self.shared.kv.write().await;
		let mut lists = self.shared.lists.write().await;

		match (ns, prefix) {
			(None, None) => {
				removed += (kv.len() + lists.len()) as u64;

				kv.clear();
				lists.clear();
			},
			(ns, prefix) => {
				let ns = ns.unwrap_or("");
				let prefix = prefix.unwrap_or("");
				let matches = |entry_ns: &str, key: &str| {
					entry_ns == ns && key.starts_with(prefix)
				};
				let kv_before = kv.len();
				let lists_before = lists.len();

				kv.retain(|(entry_ns, key), _| !matches(entry_ns, key));
				lists.retain(|(entry_ns, key), _| !matches(entry_ns, key));

				removed += (kv_before - kv.len()) as u64;
				removed += (lists_before - lists.len()) as u64;
			},
		}

		Ok(removed)
	}

	async fn get_list(
		&self,
		key: &str,
		start: i64,
		end: i64,
		opts: &StorageOptions,
	) -> Result<Option<Vec<Value>>> {
		self.check_open()?;
		keys::validate_key(key)?;

		let lists = self.shared.lists.read().await;
		let Some(values) = lists.get(&self.ns_key(key, opts)) else { return Ok(None) };
		let Some((from, to)) = list_bounds(values.len(), start, end) else {
			return Ok(Some(Vec::new()));
		};

		Ok(Some(values[from..=to].to_vec()))
	}

	async fn save_list(&self, key: &str, values: &[Value], opts: &StorageOptions) -> Result<()> {
		self.check_open()?;
		keys::validate_key(key)?;

		self.shared.lists.write().await.insert(self.ns_key(key, opts), values.to_vec());

		Ok(())
	}

	async fn delete_list(&self, key: &str, opts: &StorageOptions) -> Result<bool> {
		self.check_open()?;
		keys::validate_key(key)?;

		Ok(self.shared.lists.write().await.remove(&self.ns_key(key, opts)).is_some())
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

#[async_trait]
impl MemoryStore for EphemeralProvider {
	async fn store(&self, record: &MemoryRecord) -> Result<()> {
		self.check_open()?;
		keys::validate_tenant(&record.user_id, &record.agent_id)?;

		if !(0.0..=1.0).contains(&record.importance) {
			return Err(Error::InvalidArgument(format!(
				"importance must be within [0, 1]; got {}.",
				record.importance
			)));
		}
		if record.resonance < 0.0 {
			return Err(Error::InvalidArgument(format!(
				"resonance must be zero or greater; got {}.",
				record.resonance
			)));
		}
		if let Some(embedding) = record.embedding.as_ref() {
			ensure_dimension(self.settings.dimension, embedding)?;
		}

		let mut stored = record.clone();

		stored.embedding_dimension = stored.embedding.as_ref().map(|vec| vec.len() as i32);

		self.shared
			.memories
			.write()
			.await
			.entry(record.user_id.clone())
			.or_default()
			.insert(record.id.clone(), stored);

		Ok(())
	}

	async fn recall(&self, request: &RecallRequest) -> Result<Vec<ScoredMemory>> {
		self.check_open()?;
		self.recall_inner(request).await
	}

	async fn update(&self, user_id: &str, agent_id: &str, update: &MemoryUpdate) -> Result<()> {
		self.check_open()?;
		keys::validate_tenant(user_id, agent_id)?;

		if let Some(importance) = update.importance
			&& !(0.0..=1.0).contains(&importance)
		{
			return Err(Error::InvalidArgument(format!(
				"importance must be within [0, 1]; got {importance}."
			)));
		}

		let mut memories = self.shared.memories.write().await;
		let record = memories
			.get_mut(user_id)
			.and_then(|by_id| by_id.get_mut(&update.id))
			.filter(|record| record.agent_id == agent_id)
			.ok_or_else(|| Error::NotFound(format!("Memory not found; id={}.", update.id)))?;

		if let Some(content) = update.content.as_ref() {
			record.content = content.clone();
		}
		if let Some(importance) = update.importance {
			record.importance = importance;
		}
		if let Some(resonance) = update.resonance {
			record.resonance = resonance.max(0.0);
		}
		if let Some(keywords) = update.keywords.as_ref() {
			record.keywords = keywords.clone();
		}
		if let Some(metadata) = update.metadata.as_ref() {
			record.metadata = metadata.clone();
		}
		if let Some(status) = update.status {
			record.status = status;
		}
		if let Some(never_decay) = update.never_decay {
			record.never_decay = never_decay;
		}
		if update.custom_half_life.is_some() {
			record.custom_half_life = update.custom_half_life;
		}
		if let Some(reinforceable) = update.reinforceable {
			record.reinforceable = reinforceable;
		}

		record.updated_at = clock::now_ms();

		Ok(())
	}

	async fn delete(&self, user_id: &str, agent_id: &str, id: &str) -> Result<bool> {
		self.check_open()?;
		keys::validate_tenant(user_id, agent_id)?;

		let mut memories = self.shared.memories.write().await;
		let removed = memories
			.get_mut(user_id)
			.filter(|by_id| {
				by_id.get(id).is_some_and(|record| record.agent_id == agent_id)
			})
			.and_then(|by_id| by_id.remove(id))
			.is_some();

		if removed {
			let mut connections = self.shared.connections.write().await;

			if let Some(edges) = connections.get_mut(user_id) {
				edges.retain(|(source, target), _| source != id && target != id);
			}
		}

		Ok(removed)
	}

	async fn get_by_id(&self, user_id: &str, id: &str) -> Result<Option<MemoryRecord>> {
		self.check_open()?;

		if user_id.trim().is_empty() {
			return Err(Error::InvalidArgument("user_id must not be empty.".to_string()));
		}

		let now = clock::now_ms();
		let mut memories = self.shared.memories.write().await;
		let Some(record) =
			memories.get_mut(user_id).and_then(|by_id| by_id.get_mut(id))
		else {
			return Ok(None);
		};

		record.touch(now);

		Ok(Some(record.clone()))
	}

	async fn get_stats(&self, user_id: &str, agent_id: &str) -> Result<MemoryStats> {
		self.check_open()?;
		keys::validate_tenant(user_id, agent_id)?;

		let memories = self.shared.memories.read().await;
		let mut stats = MemoryStats::default();
		let mut importance_sum = 0.0_f32;
		let mut resonance_sum = 0.0_f32;

		for record in memories.get(user_id).into_iter().flat_map(HashMap::values) {
			if record.agent_id != agent_id {
				continue;
			}

			stats.total += 1;
			*stats.by_type.entry(record.r#type.as_str().to_string()).or_insert(0) += 1;
			*stats.by_status.entry(record.status.as_str().to_string()).or_insert(0) += 1;

			importance_sum += record.importance;
			resonance_sum += record.resonance;
			stats.total_tokens += i64::from(record.token_count.unwrap_or(0));
		}

		if stats.total > 0 {
			stats.avg_importance = importance_sum / stats.total as f32;
			stats.avg_resonance = resonance_sum / stats.total as f32;
		}

		Ok(stats)
	}

	async fn batch_update_memories(
		&self,
		user_id: &str,
		agent_id: &str,
		updates: &[MemoryUpdate],
	) -> Result<BatchReport> {
		self.check_open()?;

		let mut report = BatchReport::default();

		for update in updates {
			match self.update(user_id, agent_id, update).await {
				Ok(()) => report.succeeded += 1,
				Err(err) => report.record_failure(&update.id, err.to_string()),
			}
		}

		Ok(report)
	}

	async fn apply_decay(
		&self,
		user_id: &str,
		agent_id: &str,
		rules: &DecayRules,
	) -> Result<DecayReport> {
		self.check_open()?;
		keys::validate_tenant(user_id, agent_id)?;

		let now = clock::now_ms();
		let mut report = DecayReport::default();
		let mut removed_ids = Vec::new();
		let mut memories = self.shared.memories.write().await;
		let Some(by_id) = memories.get_mut(user_id) else { return Ok(report) };

		for record in by_id.values_mut() {
			if record.agent_id != agent_id || record.status != MemoryStatus::Active {
				continue;
			}

			report.processed += 1;

			let age = clock::age_days(record.last_accessed_at, now);
			let decision = decay::evaluate(
				rules,
				record.resonance,
				record.importance,
				record.access_count,
				age,
				record.never_decay,
				record.custom_half_life,
			);

			match decision {
				DecayDecision::Remove => {
					removed_ids.push(record.id.clone());

					report.removed += 1;
				},
				DecayDecision::Update(resonance) => {
					record.resonance = resonance;
					record.updated_at = now;

					report.decayed += 1;
				},
				DecayDecision::Skip => {},
			}
		}

		for id in &removed_ids {
			by_id.remove(id);
		}

		if !removed_ids.is_empty() {
			let removed: HashSet<&String> = removed_ids.iter().collect();
			let mut connections = self.shared.connections.write().await;

			if let Some(edges) = connections.get_mut(user_id) {
				edges.retain(|(source, target), _| {
					!removed.contains(source) && !removed.contains(target)
				});
			}
		}

		Ok(report)
	}

	async fn create_connections(
		&self,
		user_id: &str,
		edges: &[MemoryConnection],
	) -> Result<()> {
		self.check_open()?;

		if user_id.trim().is_empty() {
			return Err(Error::InvalidArgument("user_id must not be empty.".to_string()));
		}

		let memories = self.shared.memories.read().await;
		let by_id = memories.get(user_id);

		for edge in edges {
			if !(0.0..=1.0).contains(&edge.strength) {
				return Err(Error::InvalidArgument(format!(
					"Connection strength must be within [0, 1]; got {}.",
					edge.strength
				)));
			}

			let both_exist = by_id.is_some_and(|by_id| {
				by_id.contains_key(&edge.source_memory_id)
					&& by_id.contains_key(&edge.target_memory_id)
			});

			if !both_exist {
				return Err(Error::NotFound(format!(
					"Both connection endpoints must exist; source={} target={}.",
					edge.source_memory_id, edge.target_memory_id
				)));
			}
		}

		drop(memories);

		let mut connections = self.shared.connections.write().await;
		let stored = connections.entry(user_id.to_string()).or_default();

		for edge in edges {
			let key = (edge.source_memory_id.clone(), edge.target_memory_id.clone());

			match stored.get_mut(&key) {
				Some(existing) => existing.merge(edge),
				None => {
					stored.insert(key, edge.clone());
				},
			}
		}

		Ok(())
	}

	async fn find_connected_memories(
		&self,
		user_id: &str,
		memory_id: &str,
		opts: &TraversalOptions,
	) -> Result<ConnectedMemories> {
		self.check_open()?;

		if user_id.trim().is_empty() {
			return Err(Error::InvalidArgument("user_id must not be empty.".to_string()));
		}

		let connections = self.shared.connections.read().await;
		let edges: Vec<MemoryConnection> = connections
			.get(user_id)
			.into_iter()
			.flat_map(HashMap::values)
			.filter(|edge| edge.strength >= opts.min_strength)
			.cloned()
			.collect();

		drop(connections);

		let mut visited: HashSet<String> = HashSet::from([memory_id.to_string()]);
		let mut frontier: VecDeque<String> = VecDeque::from([memory_id.to_string()]);

		for _ in 0..opts.depth {
			let mut next = VecDeque::new();

			while let Some(current) = frontier.pop_front() {
				for edge in &edges {
					let neighbor = if edge.source_memory_id == current {
						&edge.target_memory_id
					} else if edge.target_memory_id == current {
						&edge.source_memory_id
					} else {
						continue;
					};

					if visited.insert(neighbor.clone()) {
						next.push_back(neighbor.clone());
					}
				}
			}

			if next.is_empty() {
				break;
			}

			frontier = next;
		}

		let memories = self.shared.memories.read().await;
		let by_id = memories.get(user_id);
		let mut reached: Vec<MemoryRecord> = visited
			.iter()
			.filter_map(|id| by_id.and_then(|by_id| by_id.get(id)).cloned())
			.collect();

		reached.sort_by(|a, b| a.id.cmp(&b.id));

		let reached_ids: HashSet<&String> = visited.iter().collect();
		let mut traversed: Vec<MemoryConnection> = edges
			.into_iter()
			.filter(|edge| {
				reached_ids.contains(&edge.source_memory_id)
					&& reached_ids.contains(&edge.target_memory_id)
			})
			.collect();

		traversed.sort_by(|a, b| {
			(&a.source_memory_id, &a.target_memory_id)
				.cmp(&(&b.source_memory_id, &b.target_memory_id))
		});

		Ok(ConnectedMemories { memories: reached, connections: traversed })
	}

	async fn record_pattern(
		&self,
		user_id: &str,
		agent_id: &str,
		pattern: &str,
		success: bool,
	) -> Result<()> {
		self.check_open()?;
		keys::validate_tenant(user_id, agent_id)?;

		if pattern.trim().is_empty() {
			return Err(Error::InvalidArgument("pattern must not be empty.".to_string()));
		}

		let now = clock::now_ms();
		let mut patterns = self.shared.patterns.write().await;
		let entry = patterns
			.entry((user_id.to_string(), agent_id.to_string()))
			.or_default()
			.entry(pattern.to_string())
			.or_insert_with(|| ProceduralPattern {
				pattern: pattern.to_string(),
				success_count: 0,
				failure_count: 0,
				last_used_at: None,
			});

		if success {
			entry.success_count += 1;
		} else {
			entry.failure_count += 1;
		}

		entry.last_used_at = Some(now);

		Ok(())
	}

	async fn list_patterns(
		&self,
		user_id: &str,
		agent_id: &str,
	) -> Result<Vec<ProceduralPattern>> {
		self.check_open()?;
		keys::validate_tenant(user_id, agent_id)?;

		let patterns = self.shared.patterns.read().await;
		let mut out: Vec<ProceduralPattern> = patterns
			.get(&(user_id.to_string(), agent_id.to_string()))
			.into_iter()
			.flat_map(HashMap::values)
			.cloned()
			.collect();

		out.sort_by(|a, b| a.pattern.cmp(&b.pattern));

		Ok(out)
	}
}

#[async_trait]
impl VectorStore for EphemeralProvider {
	async fn create_collection(&self, spec: &VectorCollectionSpec) -> Result<()> {
		self.check_open()?;
		keys::validate_identifier(&spec.name)?;

		if spec.dimension == 0 {
			return Err(Error::InvalidArgument(
				"Collection dimension must be greater than zero.".to_string(),
			));
		}

		let mut collections = self.shared.collections.write().await;

		if let Some(existing) = collections.get(&spec.name) {
			if existing.spec.dimension == spec.dimension && existing.spec.metric == spec.metric {
				return Ok(());
			}

			return Err(Error::AlreadyExists(format!(
				"Collection {} exists with a different configuration.",
				spec.name
			)));
		}

		collections.insert(
			spec.name.clone(),
			EphemeralCollection { spec: spec.clone(), rows: HashMap::new() },
		);

		Ok(())
	}

	async fn drop_collection(&self, name: &str) -> Result<()> {
		self.check_open()?;
		self.shared.collections.write().await.remove(name);

		Ok(())
	}

	async fn collection_exists(&self, name: &str) -> Result<bool> {
		self.check_open()?;

		Ok(self.shared.collections.read().await.contains_key(name))
	}

	async fn list_collections(&self) -> Result<Vec<String>> {
		self.check_open()?;

		let mut out: Vec<String> =
			self.shared.collections.read().await.keys().cloned().collect();

		out.sort();

		Ok(out)
	}

	async fn insert_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
		self.check_open()?;

		let mut collections = self.shared.collections.write().await;
		let target = collections
			.get_mut(collection)
			.ok_or_else(|| Error::NotFound(format!("Collection not found: {collection}.")))?;

		for record in records {
			ensure_dimension(target.spec.dimension, &record.vector)?;

			if target.rows.contains_key(&record.id) {
				return Err(Error::AlreadyExists(format!(
					"Vector {} already exists in {collection}.",
					record.id
				)));
			}
		}
		for record in records {
			target.rows.insert(record.id.clone(), record.clone());
		}

		Ok(())
	}

	async fn update_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
		self.check_open()?;

		let mut collections = self.shared.collections.write().await;
		let target = collections
			.get_mut(collection)
			.ok_or_else(|| Error::NotFound(format!("Collection not found: {collection}.")))?;

		for record in records {
			ensure_dimension(target.spec.dimension, &record.vector)?;

			if !target.rows.contains_key(&record.id) {
				return Err(Error::NotFound(format!(
					"Vector {} not found in {collection}.",
					record.id
				)));
			}
		}
		for record in records {
			target.rows.insert(record.id.clone(), record.clone());
		}

		Ok(())
	}

	async fn upsert_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
		self.check_open()?;

		let mut collections = self.shared.collections.write().await;
		let target = collections
			.get_mut(collection)
			.ok_or_else(|| Error::NotFound(format!("Collection not found: {collection}.")))?;

		for record in records {
			ensure_dimension(target.spec.dimension, &record.vector)?;
		}
		for record in records {
			target.rows.insert(record.id.clone(), record.clone());
		}

		Ok(())
	}

	async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<u64> {
		self.check_open()?;

		let mut collections = self.shared.collections.write().await;
		let target = collections
			.get_mut(collection)
			.ok_or_else(|| Error::NotFound(format!("Collection not found: {collection}.")))?;
		let mut deleted = 0;

		for id in ids {
			if target.rows.remove(id).is_some() {
				deleted += 1;
			}
		}

		Ok(deleted)
	}

	async fn search_vectors(
		&self,
		collection: &str,
		query: &[f32],
		opts: &VectorSearchOptions,
	) -> Result<Vec<VectorHit>> {
		self.check_open()?;

		let collections = self.shared.collections.read().await;
		let target = collections
			.get(collection)
			.ok_or_else(|| Error::NotFound(format!("Collection not found: {collection}.")))?;

		ensure_dimension(target.spec.dimension, query)?;

		let mut hits: Vec<VectorHit> = target
			.rows
			.values()
			.map(|record| VectorHit {
				id: record.id.clone(),
				score: metric_score(target.spec.metric, &record.vector, query),
				metadata: record.metadata.clone(),
			})
			.collect();

		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));

		let hits: Vec<VectorHit> = hits
			.into_iter()
			.skip(opts.offset as usize)
			.take(opts.limit as usize)
			.collect();

		Ok(hits)
	}

	async fn get_vector(&self, collection: &str, id: &str) -> Result<Option<VectorRecord>> {
		self.check_open()?;

		let collections = self.shared.collections.read().await;
		let target = collections
			.get(collection)
			.ok_or_else(|| Error::NotFound(format!("Collection not found: {collection}.")))?;

		Ok(target.rows.get(id).cloned())
	}
}

#[async_trait]
impl VectorMemoryStore for EphemeralProvider {
	async fn store_memory_with_embedding(
		&self,
		record: &MemoryRecord,
		embedding: &[f32],
	) -> Result<()> {
		ensure_dimension(self.settings.dimension, embedding)?;

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
		self.check_open()?;
		self.scored_by_vector(user_id, agent_id, query, limit, None).await
	}

	async fn find_similar_memories(
		&self,
		user_id: &str,
		agent_id: &str,
		memory_id: &str,
		limit: u32,
	) -> Result<Vec<ScoredMemory>> {
		self.check_open()?;

		let origin_embedding = {
			let memories = self.shared.memories.read().await;

			memories
				.get(user_id)
				.and_then(|by_id| by_id.get(memory_id))
				.ok_or_else(|| Error::NotFound(format!("Memory not found; id={memory_id}.")))?
				.embedding
				.clone()
				.ok_or_else(|| {
					Error::InvalidArgument(format!("Memory {memory_id} carries no embedding."))
				})?
		};

		self.scored_by_vector(user_id, agent_id, &origin_embedding, limit, Some(memory_id))
			.await
	}

	async fn hybrid_search(&self, request: &RecallRequest) -> Result<Vec<ScoredMemory>> {
		self.check_open()?;
		self.recall_inner(request).await
	}

	async fn update_memory_embedding(
		&self,
		user_id: &str,
		memory_id: &str,
		embedding: &[f32],
		model: Option<&str>,
	) -> Result<()> {
		self.check_open()?;
		ensure_dimension(self.settings.dimension, embedding)?;

		let mut memories = self.shared.memories.write().await;
		let record = memories
			.get_mut(user_id)
			.and_then(|by_id| by_id.get_mut(memory_id))
			.ok_or_else(|| Error::NotFound(format!("Memory not found; id={memory_id}.")))?;

		record.embedding = Some(embedding.to_vec());
		record.embedding_dimension = Some(embedding.len() as i32);
		record.embedding_model = model.map(str::to_string);
		record.updated_at = clock::now_ms();

		Ok(())
	}

	async fn get_memory_embedding(
		&self,
		user_id: &str,
		memory_id: &str,
	) -> Result<Option<Vec<f32>>> {
		self.check_open()?;

		let memories = self.shared.memories.read().await;

		Ok(memories
			.get(user_id)
			.and_then(|by_id| by_id.get(memory_id))
			.and_then(|record| record.embedding.clone()))
	}
}

async fn purge_expired(shared: &Shared) -> u64 {
	let now = clock::now_ms();
	let mut kv = shared.kv.write().await;
	let before = kv.len();

	kv.retain(|_, entry| entry.live(now));

	(before - kv.len()) as u64
}

fn metric_score(metric: crate::types::DistanceMetric, stored: &[f32], query: &[f32]) -> f32 {
	use crate::types::DistanceMetric;

	match metric {
		DistanceMetric::Cosine => scoring::cosine_similarity(stored, query),
		DistanceMetric::Dot => stored.iter().zip(query).map(|(a, b)| a * b).sum(),
		DistanceMetric::Euclidean => {
			let dist: f32 =
				stored.iter().zip(query).map(|(a, b)| (a - b) * (a - b)).sum::<f32>().sqrt();

			1.0 / (1.0 + dist)
		},
	}
}
