use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::{FromRow, QueryBuilder, Row};

use loam_domain::{
	ConnectionType, DecayRules, MemoryConnection, MemoryRecord, MemoryStats, MemoryUpdate, clock,
};

use crate::{
	Error, Result,
	adapter::{
		ensure_dimension,
		postgres::{MEMORY_COLUMNS, MemoryRow, PostgresProvider, format_vector},
	},
	keys,
	provider::MemoryStore,
	retry,
	types::{
		BatchReport, ConnectedMemories, DecayReport, ProceduralPattern, RecallRequest,
		ScoredMemory, TraversalOptions,
	},
};

const CHUNK: usize = 1_000;

impl PostgresProvider {
	pub(crate) async fn fetch_record(
		&self,
		user_id: &str,
		id: &str,
	) -> Result<Option<MemoryRecord>> {
		let row: Option<MemoryRow> = sqlx::query_as(&format!(
			"SELECT {MEMORY_COLUMNS} FROM {} WHERE user_id = $1 AND id = $2",
			self.table("memories")
		))
		.bind(user_id)
		.bind(id)
		.fetch_optional(self.pool()?)
		.await?;

		row.map(MemoryRow::into_record).transpose()
	}

	pub(crate) async fn touch_ids(&self, ids: &[String]) -> Result<()> {
		if ids.is_empty() {
			return Ok(());
		}

		sqlx::query(&format!(
			"\
UPDATE {}
SET
	access_count = access_count + 1,
	last_accessed_at = $1,
	resonance = CASE WHEN reinforceable THEN LEAST(resonance + 0.1, 2.0) ELSE resonance END
WHERE id = ANY($2)",
			self.table("memories")
		))
		.bind(clock::now_ms())
		.bind(ids)
		.execute(self.pool()?)
		.await?;

		Ok(())
	}

	/// One ranked statement: full-text rank and vector similarity are computed
	/// in the engine, the gate and ordering applied over the derived columns.
	pub(crate) async fn recall_inner(
		&self,
		request: &RecallRequest,
	) -> Result<Vec<ScoredMemory>> {
		keys::validate_tenant(&request.user_id, &request.agent_id)?;

		if let Some(embedding) = request.embedding.as_ref() {
			ensure_dimension(self.settings().dimension, embedding)?;
		}

		let weights = request.weights.unwrap_or_default();
		let vector_text = request.embedding.as_ref().map(|vec| format_vector(vec));
		let language = self.settings().text_search_language.clone();
		let mut builder = QueryBuilder::new(format!(
			"\
SELECT * FROM (
	SELECT {MEMORY_COLUMNS},
		CASE WHEN embedding IS NOT NULL THEN 1 - (embedding <=> "
		));

		builder.push_bind(vector_text.clone());
		builder.push(
			"::vector) END AS vector_sim,
		ts_rank(to_tsvector(",
		);
		builder.push_bind(language.clone());
		builder.push("::regconfig, content), plainto_tsquery(");
		builder.push_bind(language);
		builder.push("::regconfig, ");
		builder.push_bind(&request.query);
		builder.push(format!(
			"), 32) AS text_score
	FROM {}
	WHERE user_id = ",
			self.table("memories")
		));
		builder.push_bind(&request.user_id);
		builder.push(" AND agent_id = ");
		builder.push_bind(&request.agent_id);
		builder.push(" AND status = 'active'");

		if !request.types.is_empty() {
			let types: Vec<String> =
				request.types.iter().map(|r#type| r#type.as_str().to_string()).collect();

			builder.push(" AND type = ANY(");
			builder.push_bind(types);
			builder.push(")");
		}

		builder.push(
			"\
) scored
WHERE text_score > 0 OR (vector_sim IS NOT NULL AND vector_sim > ",
		);
		builder.push_bind(weights.threshold);
		builder.push(")
ORDER BY (");
		builder.push_bind(weights.vector_weight);
		builder.push(" * COALESCE(vector_sim, 0) + ");
		builder.push_bind(weights.text_weight);
		builder.push(
			" * text_score) DESC, importance DESC, last_accessed_at DESC, id ASC LIMIT ",
		);
		builder.push_bind(i64::from(request.limit));
		builder.push(" OFFSET ");
		builder.push_bind(i64::from(request.offset));

		let timeout_ms = self.settings().query_timeout_ms;
		let pool = self.pool()?.clone();
		let rows = retry::with_timeout("recall", timeout_ms, async {
			Ok(builder.build().fetch_all(&pool).await?)
		})
		.await?;
		let mut hits = Vec::with_capacity(rows.len());

		for row in rows {
			let vector_sim: Option<f64> = row.try_get("vector_sim")?;
			let text_score: f32 = row.try_get("text_score")?;
			let record = MemoryRow::from_row(&row)?.into_record()?;
			let vector_sim = vector_sim.map(|sim| sim as f32);
			let score = loam_domain::scoring::hybrid_score(&weights, vector_sim, text_score);

			hits.push(ScoredMemory { record, score, vector_sim, text_score });
		}

		let ids: Vec<String> = hits.iter().map(|hit| hit.record.id.clone()).collect();

		self.touch_ids(&ids).await?;

		Ok(hits)
	}
}

fn validate_record(record: &MemoryRecord) -> Result<()> {
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

	Ok(())
}

#[async_trait]
impl MemoryStore for PostgresProvider {
	async fn store(&self, record: &MemoryRecord) -> Result<()> {
		validate_record(record)?;

		if let Some(embedding) = record.embedding.as_ref() {
			ensure_dimension(self.settings().dimension, embedding)?;
		}

		let embedding_text = record.embedding.as_ref().map(|vec| format_vector(vec));
		let embedding_dimension = record.embedding.as_ref().map(|vec| vec.len() as i32);

		sqlx::query(&format!(
			"\
INSERT INTO {} (
	id, user_id, agent_id, type, content, importance, resonance, access_count, created_at,
	updated_at, last_accessed_at, session_id, token_count, keywords, metadata,
	extraction_method, batch_id, source_message_ids, embedding, embedding_model,
	embedding_dimension, never_decay, custom_half_life, reinforceable, status
)
VALUES (
	$1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
	$19::vector, $20, $21, $22, $23, $24, $25
)
ON CONFLICT (id) DO UPDATE
SET
	content = EXCLUDED.content,
	importance = EXCLUDED.importance,
	resonance = EXCLUDED.resonance,
	updated_at = EXCLUDED.updated_at,
	session_id = EXCLUDED.session_id,
	token_count = EXCLUDED.token_count,
	keywords = EXCLUDED.keywords,
	metadata = EXCLUDED.metadata,
	extraction_method = EXCLUDED.extraction_method,
	batch_id = EXCLUDED.batch_id,
	source_message_ids = EXCLUDED.source_message_ids,
	embedding = EXCLUDED.embedding,
	embedding_model = EXCLUDED.embedding_model,
	embedding_dimension = EXCLUDED.embedding_dimension,
	never_decay = EXCLUDED.never_decay,
	custom_half_life = EXCLUDED.custom_half_life,
	reinforceable = EXCLUDED.reinforceable,
	status = EXCLUDED.status",
			self.table("memories")
		))
		.bind(&record.id)
		.bind(&record.user_id)
		.bind(&record.agent_id)
		.bind(record.r#type.as_str())
		.bind(&record.content)
		.bind(record.importance)
		.bind(record.resonance)
		.bind(record.access_count)
		.bind(record.created_at)
		.bind(record.updated_at)
		.bind(record.last_accessed_at)
		.bind(&record.session_id)
		.bind(record.token_count)
		.bind(serde_json::to_value(&record.keywords)?)
		.bind(&record.metadata)
		.bind(&record.extraction_method)
		.bind(&record.batch_id)
		.bind(serde_json::to_value(&record.source_message_ids)?)
		.bind(embedding_text)
		.bind(&record.embedding_model)
		.bind(embedding_dimension)
		.bind(record.never_decay)
		.bind(record.custom_half_life)
		.bind(record.reinforceable)
		.bind(record.status.as_str())
		.execute(self.pool()?)
		.await?;

		Ok(())
	}

	async fn recall(&self, request: &RecallRequest) -> Result<Vec<ScoredMemory>> {
		self.recall_inner(request).await
	}

	async fn update(&self, user_id: &str, agent_id: &str, update: &MemoryUpdate) -> Result<()> {
		keys::validate_tenant(user_id, agent_id)?;

		if let Some(importance) = update.importance
			&& !(0.0..=1.0).contains(&importance)
		{
			return Err(Error::InvalidArgument(format!(
				"importance must be within [0, 1]; got {importance}."
			)));
		}

		let mut builder =
			QueryBuilder::new(format!("UPDATE {} SET updated_at = ", self.table("memories")));

		builder.push_bind(clock::now_ms());

		if let Some(content) = update.content.as_ref() {
			builder.push(", content = ");
			builder.push_bind(content);
		}
		if let Some(importance) = update.importance {
			builder.push(", importance = ");
			builder.push_bind(importance);
		}
		if let Some(resonance) = update.resonance {
			builder.push(", resonance = ");
			builder.push_bind(resonance.max(0.0));
		}
		if let Some(keywords) = update.keywords.as_ref() {
			builder.push(", keywords = ");
			builder.push_bind(serde_json::to_value(keywords)?);
		}
		if let Some(metadata) = update.metadata.as_ref() {
			builder.push(", metadata = ");
			builder.push_bind(metadata);
		}
		if let Some(status) = update.status {
			builder.push(", status = ");
			builder.push_bind(status.as_str());
		}
		if let Some(never_decay) = update.never_decay {
			builder.push(", never_decay = ");
			builder.push_bind(never_decay);
		}
		if let Some(custom_half_life) = update.custom_half_life {
			builder.push(", custom_half_life = ");
			builder.push_bind(custom_half_life);
		}
		if let Some(reinforceable) = update.reinforceable {
			builder.push(", reinforceable = ");
			builder.push_bind(reinforceable);
		}

		builder.push(" WHERE id = ");
		builder.push_bind(&update.id);
		builder.push(" AND user_id = ");
		builder.push_bind(user_id);
		builder.push(" AND agent_id = ");
		builder.push_bind(agent_id);

		let result = builder.build().execute(self.pool()?).await?;

		if result.rows_affected() == 0 {
			return Err(Error::NotFound(format!("Memory not found; id={}.", update.id)));
		}

		Ok(())
	}

	async fn delete(&self, user_id: &str, agent_id: &str, id: &str) -> Result<bool> {
		keys::validate_tenant(user_id, agent_id)?;

		let result = sqlx::query(&format!(
			"DELETE FROM {} WHERE id = $1 AND user_id = $2 AND agent_id = $3",
			self.table("memories")
		))
		.bind(id)
		.bind(user_id)
		.bind(agent_id)
		.execute(self.pool()?)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	async fn get_by_id(&self, user_id: &str, id: &str) -> Result<Option<MemoryRecord>> {
		if user_id.trim().is_empty() {
			return Err(Error::InvalidArgument("user_id must not be empty.".to_string()));
		}

		let Some(record) = self.fetch_record(user_id, id).await? else { return Ok(None) };

		self.touch_ids(std::slice::from_ref(&record.id)).await?;
		self.fetch_record(user_id, id).await
	}

	async fn get_stats(&self, user_id: &str, agent_id: &str) -> Result<MemoryStats> {
		keys::validate_tenant(user_id, agent_id)?;

		let pool = self.pool()?;
		let mut stats = MemoryStats::default();
		let totals = sqlx::query(&format!(
			"\
SELECT
	COUNT(*) AS total,
	COALESCE(AVG(importance), 0)::real AS avg_importance,
	COALESCE(AVG(resonance), 0)::real AS avg_resonance,
	COALESCE(SUM(token_count), 0)::bigint AS total_tokens
FROM {}
WHERE user_id = $1 AND agent_id = $2",
			self.table("memories")
		))
		.bind(user_id)
		.bind(agent_id)
		.fetch_one(pool)
		.await?;

		stats.total = totals.try_get("total")?;
		stats.avg_importance = totals.try_get("avg_importance")?;
		stats.avg_resonance = totals.try_get("avg_resonance")?;
		stats.total_tokens = totals.try_get("total_tokens")?;

		let by_type: Vec<(String, i64)> = sqlx::query_as(&format!(
			"SELECT type, COUNT(*) FROM {} WHERE user_id = $1 AND agent_id = $2 GROUP BY type",
			self.table("memories")
		))
		.bind(user_id)
		.bind(agent_id)
		.fetch_all(pool)
		.await?;
		let by_status: Vec<(String, i64)> = sqlx::query_as(&format!(
			"SELECT status, COUNT(*) FROM {} WHERE user_id = $1 AND agent_id = $2 GROUP BY status",
			self.table("memories")
		))
		.bind(user_id)
		.bind(agent_id)
		.fetch_all(pool)
		.await?;

		stats.by_type = by_type.into_iter().collect();
		stats.by_status = by_status.into_iter().collect();

		Ok(stats)
	}

	async fn batch_update_memories(
		&self,
		user_id: &str,
		agent_id: &str,
		updates: &[MemoryUpdate],
	) -> Result<BatchReport> {
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
		keys::validate_tenant(user_id, agent_id)?;

		let pool = self.pool()?;
		let now = clock::now_ms();
		let (processed,): (i64,) = sqlx::query_as(&format!(
			"SELECT COUNT(*) FROM {} WHERE user_id = $1 AND agent_id = $2 AND status = 'active'",
			self.table("memories")
		))
		.bind(user_id)
		.bind(agent_id)
		.fetch_one(pool)
		.await?;
		// Resonance math runs in the engine; the pass only partitions ids.
		let candidates: Vec<(String, f32, f64)> = sqlx::query_as(&format!(
			"\
SELECT
	id,
	resonance,
	GREATEST(
		0,
		resonance * CASE
			WHEN custom_half_life IS NOT NULL AND custom_half_life > 0 THEN
				exp(-0.6931471805599453 * (($3 - last_accessed_at)::double precision / 3600000.0)
					/ custom_half_life)
			ELSE exp(-$4::double precision * (($3 - last_accessed_at)::double precision / 86400000.0))
		END
		+ importance * $5 + ln(access_count + 1) * $6
	) AS new_resonance
FROM {}
WHERE user_id = $1 AND agent_id = $2 AND status = 'active' AND never_decay = FALSE",
			self.table("memories")
		))
		.bind(user_id)
		.bind(agent_id)
		.bind(now)
		.bind(f64::from(rules.rate))
		.bind(f64::from(rules.importance_weight))
		.bind(f64::from(rules.access_boost))
		.fetch_all(pool)
		.await?;
		let mut report = DecayReport { processed: processed as u64, ..Default::default() };
		let mut updates: Vec<(String, f32)> = Vec::new();
		let mut removals: Vec<String> = Vec::new();

		for (id, resonance, new_resonance) in candidates {
			let new_resonance = new_resonance as f32;

			if new_resonance <= rules.removal_threshold {
				removals.push(id);
			} else if (new_resonance - resonance).abs() > rules.update_epsilon {
				updates.push((id, new_resonance));
			}
		}

		for chunk in updates.chunks(CHUNK) {
			let ids: Vec<String> = chunk.iter().map(|(id, _)| id.clone()).collect();
			let resonances: Vec<f32> = chunk.iter().map(|(_, resonance)| *resonance).collect();
			let mut tx = pool.begin().await?;

			sqlx::query(&format!(
				"\
UPDATE {} AS m
SET resonance = v.resonance, updated_at = $3
FROM (SELECT UNNEST($1::text[]) AS id, UNNEST($2::real[]) AS resonance) v
WHERE m.id = v.id",
				self.table("memories")
			))
			.bind(&ids)
			.bind(&resonances)
			.bind(now)
			.execute(&mut *tx)
			.await?;
			tx.commit().await?;

			report.decayed += chunk.len() as u64;
		}

		for chunk in removals.chunks(CHUNK) {
			let ids: Vec<String> = chunk.to_vec();
			let mut tx = pool.begin().await?;

			sqlx::query(&format!(
				"DELETE FROM {} WHERE id = ANY($1)",
				self.table("memories")
			))
			.bind(&ids)
			.execute(&mut *tx)
			.await?;
			tx.commit().await?;

			report.removed += chunk.len() as u64;
		}

		Ok(report)
	}

	async fn create_connections(
		&self,
		user_id: &str,
		edges: &[MemoryConnection],
	) -> Result<()> {
		if user_id.trim().is_empty() {
			return Err(Error::InvalidArgument("user_id must not be empty.".to_string()));
		}
		if edges.is_empty() {
			return Ok(());
		}

		let mut endpoint_ids: HashSet<String> = HashSet::new();

		for edge in edges {
			if !(0.0..=1.0).contains(&edge.strength) {
				return Err(Error::InvalidArgument(format!(
					"Connection strength must be within [0, 1]; got {}.",
					edge.strength
				)));
			}

			endpoint_ids.insert(edge.source_memory_id.clone());
			endpoint_ids.insert(edge.target_memory_id.clone());
		}

		let endpoint_ids: Vec<String> = endpoint_ids.into_iter().collect();
		let known: Vec<(String,)> = sqlx::query_as(&format!(
			"SELECT id FROM {} WHERE user_id = $1 AND id = ANY($2)",
			self.table("memories")
		))
		.bind(user_id)
		.bind(&endpoint_ids)
		.fetch_all(self.pool()?)
		.await?;
		let known: HashSet<String> = known.into_iter().map(|(id,)| id).collect();

		for id in &endpoint_ids {
			if !known.contains(id) {
				return Err(Error::NotFound(format!(
					"Connection endpoint does not exist for this user; id={id}."
				)));
			}
		}

		let mut tx = self.pool()?.begin().await?;
		let table = self.table("memory_connections");

		for edge in edges {
			sqlx::query(&format!(
				"\
INSERT INTO {table} (
	id, source_memory_id, target_memory_id, connection_type, strength, reason, created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (source_memory_id, target_memory_id) DO UPDATE
SET
	strength = GREATEST({table}.strength, EXCLUDED.strength),
	reason = COALESCE(EXCLUDED.reason, {table}.reason)"
			))
			.bind(&edge.id)
			.bind(&edge.source_memory_id)
			.bind(&edge.target_memory_id)
			.bind(edge.connection_type.as_str())
			.bind(edge.strength)
			.bind(&edge.reason)
			.bind(edge.created_at)
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;

		Ok(())
	}

	async fn find_connected_memories(
		&self,
		user_id: &str,
		memory_id: &str,
		opts: &TraversalOptions,
	) -> Result<ConnectedMemories> {
		if user_id.trim().is_empty() {
			return Err(Error::InvalidArgument("user_id must not be empty.".to_string()));
		}

		let pool = self.pool()?;
		let mut visited: HashSet<String> = HashSet::from([memory_id.to_string()]);
		let mut frontier: Vec<String> = vec![memory_id.to_string()];
		let mut edges: HashMap<(String, String), MemoryConnection> = HashMap::new();

		for _ in 0..opts.depth {
			if frontier.is_empty() {
				break;
			}

			let rows: Vec<(String, String, String, String, f32, Option<String>, i64)> =
				sqlx::query_as(&format!(
					"\
SELECT c.id, c.source_memory_id, c.target_memory_id, c.connection_type, c.strength, c.reason, c.created_at
FROM {} c
JOIN {} ms ON ms.id = c.source_memory_id
JOIN {} mt ON mt.id = c.target_memory_id
WHERE c.strength >= $1
	AND ms.user_id = $2
	AND mt.user_id = $2
	AND (c.source_memory_id = ANY($3) OR c.target_memory_id = ANY($3))",
					self.table("memory_connections"),
					self.table("memories"),
					self.table("memories")
				))
				.bind(opts.min_strength)
				.bind(user_id)
				.bind(&frontier)
				.fetch_all(pool)
				.await?;
			let mut next = Vec::new();

			for (id, source, target, connection_type, strength, reason, created_at) in rows {
				let Some(connection_type) = ConnectionType::parse(&connection_type) else {
					continue;
				};

				edges.entry((source.clone(), target.clone())).or_insert(MemoryConnection {
					id,
					source_memory_id: source.clone(),
					target_memory_id: target.clone(),
					connection_type,
					strength,
					reason,
					created_at,
				});

				for endpoint in [source, target] {
					if visited.insert(endpoint.clone()) {
						next.push(endpoint);
					}
				}
			}

			frontier = next;
		}

		let visited: Vec<String> = visited.into_iter().collect();
		let rows: Vec<MemoryRow> = sqlx::query_as(&format!(
			"SELECT {MEMORY_COLUMNS} FROM {} WHERE user_id = $1 AND id = ANY($2) ORDER BY id",
			self.table("memories")
		))
		.bind(user_id)
		.bind(&visited)
		.fetch_all(pool)
		.await?;
		let memories: Vec<MemoryRecord> =
			rows.into_iter().map(MemoryRow::into_record).collect::<Result<_>>()?;
		let reached: HashSet<&String> = memories.iter().map(|record| &record.id).collect();
		let mut connections: Vec<MemoryConnection> = edges
			.into_values()
			.filter(|edge| {
				reached.contains(&edge.source_memory_id)
					&& reached.contains(&edge.target_memory_id)
			})
			.collect();

		connections.sort_by(|a, b| {
			(&a.source_memory_id, &a.target_memory_id)
				.cmp(&(&b.source_memory_id, &b.target_memory_id))
		});

		Ok(ConnectedMemories { memories, connections })
	}

	async fn record_pattern(
		&self,
		user_id: &str,
		agent_id: &str,
		pattern: &str,
		success: bool,
	) -> Result<()> {
		keys::validate_tenant(user_id, agent_id)?;

		if pattern.trim().is_empty() {
			return Err(Error::InvalidArgument("pattern must not be empty.".to_string()));
		}

		let now = clock::now_ms();
		let (success_inc, failure_inc) = if success { (1_i64, 0_i64) } else { (0, 1) };
		let table = self.table("procedural_patterns");

		sqlx::query(&format!(
			"\
INSERT INTO {table} (
	user_id, agent_id, pattern, success_count, failure_count, last_used_at, created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $6)
ON CONFLICT (user_id, agent_id, pattern) DO UPDATE
SET
	success_count = {table}.success_count + EXCLUDED.success_count,
	failure_count = {table}.failure_count + EXCLUDED.failure_count,
	last_used_at = EXCLUDED.last_used_at"
		))
		.bind(user_id)
		.bind(agent_id)
		.bind(pattern)
		.bind(success_inc)
		.bind(failure_inc)
		.bind(now)
		.execute(self.pool()?)
		.await?;

		Ok(())
	}

	async fn list_patterns(
		&self,
		user_id: &str,
		agent_id: &str,
	) -> Result<Vec<ProceduralPattern>> {
		keys::validate_tenant(user_id, agent_id)?;

		let rows: Vec<(String, i64, i64, Option<i64>)> = sqlx::query_as(&format!(
			"\
SELECT pattern, success_count, failure_count, last_used_at
FROM {}
WHERE user_id = $1 AND agent_id = $2
ORDER BY pattern",
			self.table("procedural_patterns")
		))
		.bind(user_id)
		.bind(agent_id)
		.fetch_all(self.pool()?)
		.await?;

		Ok(rows
			.into_iter()
			.map(|(pattern, success_count, failure_count, last_used_at)| ProceduralPattern {
				pattern,
				success_count,
				failure_count,
				last_used_at,
			})
			.collect())
	}
}
