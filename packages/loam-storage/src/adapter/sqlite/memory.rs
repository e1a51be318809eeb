use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row};

use loam_domain::{
	DecayRules, MemoryConnection, MemoryRecord, MemoryStats, MemoryUpdate, clock,
	decay::{self, DecayDecision},
	scoring,
};

use crate::{
	Error, Result,
	adapter::{
		ensure_dimension,
		sqlite::{MEMORY_COLUMNS, MemoryRow, SqliteProvider},
	},
	keys,
	provider::{MemoryStore, VectorMemoryStore},
	retry, serialize,
	types::{
		BatchReport, ConnectedMemories, DecayReport, ProceduralPattern, RecallRequest,
		ScoredMemory, TraversalOptions,
	},
};

const CHUNK: usize = 1_000;
const CANDIDATE_CAP: i64 = 256;

struct Candidate {
	record: MemoryRecord,
	text_score: f32,
	vector_sim: Option<f32>,
}

impl SqliteProvider {
	async fn fetch_record(
		&self,
		user_id: &str,
		agent_id: Option<&str>,
		id: &str,
	) -> Result<Option<MemoryRecord>> {
		let mut builder = QueryBuilder::new(format!(
			"SELECT {MEMORY_COLUMNS} FROM memories WHERE user_id = "
		));

		builder.push_bind(user_id);
		builder.push(" AND id = ");
		builder.push_bind(id);

		if let Some(agent_id) = agent_id {
			builder.push(" AND agent_id = ");
			builder.push_bind(agent_id);
		}

		let row: Option<MemoryRow> =
			builder.build_query_as().fetch_optional(self.pool()?).await?;

		row.map(MemoryRow::into_record).transpose()
	}

	async fn sync_vec_row(&self, id: &str, embedding: Option<&[f32]>) -> Result<()> {
		if !self.vec_enabled() {
			return Ok(());
		}

		let pool = self.pool()?;
		let row: Option<(i64,)> = sqlx::query_as("SELECT rowid FROM memories WHERE id = ?1")
			.bind(id)
			.fetch_optional(pool)
			.await?;
		let Some((rowid,)) = row else { return Ok(()) };

		sqlx::query("DELETE FROM memory_vectors WHERE rowid = ?1")
			.bind(rowid)
			.execute(pool)
			.await?;

		if let Some(embedding) = embedding {
			sqlx::query("INSERT INTO memory_vectors (rowid, embedding) VALUES (?1, ?2)")
				.bind(rowid)
				.bind(serialize::encode_as(&embedding, "embedding")?)
				.execute(pool)
				.await?;
		}

		Ok(())
	}

	async fn touch_ids(&self, ids: &[String]) -> Result<()> {
		if ids.is_empty() {
			return Ok(());
		}

		let mut builder = QueryBuilder::new(
			"\
UPDATE memories
SET
	access_count = access_count + 1,
	last_accessed_at = ",
		);

		builder.push_bind(clock::now_ms());
		builder.push(
			",
	resonance = CASE WHEN reinforceable THEN MIN(resonance + 0.1, 2.0) ELSE resonance END
WHERE id IN (",
		);

		let mut separated = builder.separated(", ");

		for id in ids {
			separated.push_bind(id);
		}

		builder.push(")");
		builder.build().execute(self.pool()?).await?;

		Ok(())
	}

	/// Candidate gathering: FTS5 for the lexical side, vec0 KNN (or an
	/// in-process scan when the extension is absent) for the vector side.
	async fn gather_candidates(&self, request: &RecallRequest) -> Result<Vec<Candidate>> {
		let mut by_id: HashMap<String, Candidate> = HashMap::new();
		let tokens = scoring::tokenize(&request.query, 32);

		if !tokens.is_empty() {
			let match_expr = tokens
				.iter()
				.map(|token| format!("\"{token}\""))
				.collect::<Vec<_>>()
				.join(" OR ");
			let mut builder = QueryBuilder::new(format!(
				"\
SELECT {MEMORY_COLUMNS}
FROM memories
WHERE rowid IN (SELECT rowid FROM memories_fts WHERE memories_fts MATCH "
			));

			builder.push_bind(match_expr);
			builder.push(") AND user_id = ");
			builder.push_bind(&request.user_id);
			builder.push(" AND agent_id = ");
			builder.push_bind(&request.agent_id);
			builder.push(" AND status = 'active'");
			push_type_filter(&mut builder, request);
			builder.push(" LIMIT ");
			builder.push_bind(CANDIDATE_CAP);

			let rows: Vec<MemoryRow> =
				builder.build_query_as().fetch_all(self.pool()?).await?;

			for row in rows {
				let record = row.into_record()?;
				let text_score = scoring::lexical_score(&request.query, &record.content);

				by_id.insert(
					record.id.clone(),
					Candidate { record, text_score, vector_sim: None },
				);
			}
		}

		if let Some(query_embedding) = request.embedding.as_ref() {
			ensure_dimension(self.settings().dimension, query_embedding)?;

			let rows: Vec<MemoryRow> = if self.vec_enabled() {
				let mut builder = QueryBuilder::new(format!(
					"\
SELECT {MEMORY_COLUMNS}
FROM memories
WHERE rowid IN (
	SELECT rowid FROM memory_vectors WHERE embedding MATCH "
				));

				builder.push_bind(serialize::encode_as(query_embedding, "query embedding")?);
				builder.push(" ORDER BY distance LIMIT ");
				builder.push_bind(CANDIDATE_CAP);
				builder.push(") AND user_id = ");
				builder.push_bind(&request.user_id);
				builder.push(" AND agent_id = ");
				builder.push_bind(&request.agent_id);
				builder.push(" AND status = 'active'");
				push_type_filter(&mut builder, request);

				builder.build_query_as().fetch_all(self.pool()?).await?
			} else {
				let mut builder = QueryBuilder::new(format!(
					"SELECT {MEMORY_COLUMNS} FROM memories WHERE user_id = "
				));

				builder.push_bind(&request.user_id);
				builder.push(" AND agent_id = ");
				builder.push_bind(&request.agent_id);
				builder.push(" AND status = 'active' AND embedding IS NOT NULL");
				push_type_filter(&mut builder, request);

				builder.build_query_as().fetch_all(self.pool()?).await?
			};

			for row in rows {
				let record = row.into_record()?;
				let vector_sim = record
					.embedding
					.as_ref()
					.map(|stored| scoring::cosine_similarity(stored, query_embedding));

				match by_id.get_mut(&record.id) {
					Some(candidate) => candidate.vector_sim = vector_sim,
					None => {
						by_id.insert(
							record.id.clone(),
							Candidate { record, text_score: 0.0, vector_sim },
						);
					},
				}
			}
		}

		Ok(by_id.into_values().collect())
	}

	async fn recall_inner(&self, request: &RecallRequest) -> Result<Vec<ScoredMemory>> {
		keys::validate_tenant(&request.user_id, &request.agent_id)?;

		let timeout_ms = self.settings().query_timeout_ms;
		let candidates =
			retry::with_timeout("recall", timeout_ms, self.gather_candidates(request)).await?;
		let weights = request.weights.unwrap_or_default();
		let mut hits: Vec<ScoredMemory> = candidates
			.into_iter()
			.filter(|candidate| {
				scoring::row_qualifies(&weights, candidate.vector_sim, candidate.text_score)
			})
			.map(|candidate| ScoredMemory {
				score: scoring::hybrid_score(
					&weights,
					candidate.vector_sim,
					candidate.text_score,
				),
				vector_sim: candidate.vector_sim,
				text_score: candidate.text_score,
				record: candidate.record,
			})
			.collect();

		hits.sort_by(|a, b| {
			scoring::compare_ranked(
				(a.score, a.record.importance, a.record.last_accessed_at, &a.record.id),
				(b.score, b.record.importance, b.record.last_accessed_at, &b.record.id),
			)
		});

		let hits: Vec<ScoredMemory> = hits
			.into_iter()
			.skip(request.offset as usize)
			.take(request.limit as usize)
			.collect();
		let ids: Vec<String> = hits.iter().map(|hit| hit.record.id.clone()).collect();

		self.touch_ids(&ids).await?;

		Ok(hits)
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

		let request = RecallRequest {
			user_id: user_id.to_string(),
			agent_id: agent_id.to_string(),
			query: String::new(),
			embedding: Some(query.to_vec()),
			weights: None,
			types: Vec::new(),
			limit,
			offset: 0,
		};
		let candidates = self.gather_candidates(&request).await?;
		let now = clock::now_ms();
		let mut hits: Vec<ScoredMemory> = candidates
			.into_iter()
			.filter(|candidate| {
				candidate.vector_sim.is_some()
					&& exclude_id.is_none_or(|id| id != candidate.record.id)
			})
			.map(|candidate| {
				let vector_sim = candidate.vector_sim.unwrap_or(0.0);
				let days = clock::age_days(candidate.record.last_accessed_at, now);

				ScoredMemory {
					score: scoring::composite_score(
						vector_sim,
						candidate.record.importance,
						candidate.record.resonance,
						days,
					),
					vector_sim: Some(vector_sim),
					text_score: 0.0,
					record: candidate.record,
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

		let ids: Vec<String> = hits.iter().map(|hit| hit.record.id.clone()).collect();

		self.touch_ids(&ids).await?;

		Ok(hits)
	}
}

fn push_type_filter(builder: &mut QueryBuilder<'_, sqlx::Sqlite>, request: &RecallRequest) {
	if request.types.is_empty() {
		return;
	}

	builder.push(" AND type IN (");

	let mut separated = builder.separated(", ");

	for r#type in &request.types {
		separated.push_bind(r#type.as_str());
	}

	builder.push(")");
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
impl MemoryStore for SqliteProvider {
	async fn store(&self, record: &MemoryRecord) -> Result<()> {
		validate_record(record)?;

		if let Some(embedding) = record.embedding.as_ref() {
			ensure_dimension(self.settings().dimension, embedding)?;
		}

		let embedding_payload = record
			.embedding
			.as_ref()
			.map(|embedding| serialize::encode_as(embedding, "embedding"))
			.transpose()?;
		let embedding_dimension = record.embedding.as_ref().map(|vec| vec.len() as i64);

		sqlx::query(
			"\
INSERT INTO memories (
	id, user_id, agent_id, type, content, importance, resonance, access_count, created_at,
	updated_at, last_accessed_at, session_id, token_count, keywords, metadata,
	extraction_method, batch_id, source_message_ids, embedding, embedding_model,
	embedding_dimension, never_decay, custom_half_life, reinforceable, status
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)
ON CONFLICT (id) DO UPDATE
SET
	content = excluded.content,
	importance = excluded.importance,
	resonance = excluded.resonance,
	updated_at = excluded.updated_at,
	session_id = excluded.session_id,
	token_count = excluded.token_count,
	keywords = excluded.keywords,
	metadata = excluded.metadata,
	extraction_method = excluded.extraction_method,
	batch_id = excluded.batch_id,
	source_message_ids = excluded.source_message_ids,
	embedding = excluded.embedding,
	embedding_model = excluded.embedding_model,
	embedding_dimension = excluded.embedding_dimension,
	never_decay = excluded.never_decay,
	custom_half_life = excluded.custom_half_life,
	reinforceable = excluded.reinforceable,
	status = excluded.status",
		)
		.bind(&record.id)
		.bind(&record.user_id)
		.bind(&record.agent_id)
		.bind(record.r#type.as_str())
		.bind(&record.content)
		.bind(f64::from(record.importance))
		.bind(f64::from(record.resonance))
		.bind(record.access_count)
		.bind(record.created_at)
		.bind(record.updated_at)
		.bind(record.last_accessed_at)
		.bind(&record.session_id)
		.bind(record.token_count.map(i64::from))
		.bind(serialize::encode_as(&record.keywords, "keywords")?)
		.bind(serialize::encode(&record.metadata)?)
		.bind(&record.extraction_method)
		.bind(&record.batch_id)
		.bind(serialize::encode_as(&record.source_message_ids, "source_message_ids")?)
		.bind(embedding_payload)
		.bind(&record.embedding_model)
		.bind(embedding_dimension)
		.bind(record.never_decay)
		.bind(record.custom_half_life)
		.bind(record.reinforceable)
		.bind(record.status.as_str())
		.execute(self.pool()?)
		.await?;

		self.sync_vec_row(&record.id, record.embedding.as_deref()).await?;

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

		let mut builder = QueryBuilder::new("UPDATE memories SET updated_at = ");

		builder.push_bind(clock::now_ms());

		if let Some(content) = update.content.as_ref() {
			builder.push(", content = ");
			builder.push_bind(content);
		}
		if let Some(importance) = update.importance {
			builder.push(", importance = ");
			builder.push_bind(f64::from(importance));
		}
		if let Some(resonance) = update.resonance {
			builder.push(", resonance = ");
			builder.push_bind(f64::from(resonance.max(0.0)));
		}
		if let Some(keywords) = update.keywords.as_ref() {
			builder.push(", keywords = ");
			builder.push_bind(serialize::encode_as(keywords, "keywords")?);
		}
		if let Some(metadata) = update.metadata.as_ref() {
			builder.push(", metadata = ");
			builder.push_bind(serialize::encode(metadata)?);
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
		self.sync_vec_row(id, None).await?;

		let result = sqlx::query(
			"DELETE FROM memories WHERE id = ?1 AND user_id = ?2 AND agent_id = ?3",
		)
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

		let Some(record) = self.fetch_record(user_id, None, id).await? else {
			return Ok(None);
		};

		self.touch_ids(std::slice::from_ref(&record.id)).await?;
		self.fetch_record(user_id, None, id).await
	}

	async fn get_stats(&self, user_id: &str, agent_id: &str) -> Result<MemoryStats> {
		keys::validate_tenant(user_id, agent_id)?;

		let pool = self.pool()?;
		let mut stats = MemoryStats::default();
		let totals = sqlx::query(
			"\
SELECT
	COUNT(*) AS total,
	COALESCE(AVG(importance), 0) AS avg_importance,
	COALESCE(AVG(resonance), 0) AS avg_resonance,
	COALESCE(SUM(token_count), 0) AS total_tokens
FROM memories
WHERE user_id = ?1 AND agent_id = ?2",
		)
		.bind(user_id)
		.bind(agent_id)
		.fetch_one(pool)
		.await?;

		stats.total = totals.try_get("total")?;
		stats.avg_importance = totals.try_get::<f64, _>("avg_importance")? as f32;
		stats.avg_resonance = totals.try_get::<f64, _>("avg_resonance")? as f32;
		stats.total_tokens = totals.try_get("total_tokens")?;

		let by_type: Vec<(String, i64)> = sqlx::query_as(
			"SELECT type, COUNT(*) FROM memories WHERE user_id = ?1 AND agent_id = ?2 GROUP BY type",
		)
		.bind(user_id)
		.bind(agent_id)
		.fetch_all(pool)
		.await?;
		let by_status: Vec<(String, i64)> = sqlx::query_as(
			"SELECT status, COUNT(*) FROM memories WHERE user_id = ?1 AND agent_id = ?2 GROUP BY status",
		)
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

		let now = clock::now_ms();
		let candidates: Vec<(String, f64, f64, i64, i64, bool, Option<i64>)> = sqlx::query_as(
			"\
SELECT id, resonance, importance, access_count, last_accessed_at, never_decay, custom_half_life
FROM memories
WHERE user_id = ?1 AND agent_id = ?2 AND status = 'active'",
		)
		.bind(user_id)
		.bind(agent_id)
		.fetch_all(self.pool()?)
		.await?;
		let mut report = DecayReport { processed: candidates.len() as u64, ..Default::default() };
		let mut updates: Vec<(String, f64)> = Vec::new();
		let mut removals: Vec<String> = Vec::new();

		for (id, resonance, importance, access_count, last_accessed_at, never_decay, half_life) in
			candidates
		{
			let age = clock::age_days(last_accessed_at, now);
			let decision = decay::evaluate(
				rules,
				resonance as f32,
				importance as f32,
				access_count,
				age,
				never_decay,
				half_life,
			);

			match decision {
				DecayDecision::Remove => removals.push(id),
				DecayDecision::Update(new_resonance) => {
					updates.push((id, f64::from(new_resonance)));
				},
				DecayDecision::Skip => {},
			}
		}

		for chunk in updates.chunks(CHUNK) {
			let mut tx = self.pool()?.begin().await?;
			let mut builder = QueryBuilder::new(
				"\
UPDATE memories
SET resonance = v.column2, updated_at = ",
			);

			builder.push_bind(now);
			builder.push(" FROM (VALUES ");

			let mut separated = builder.separated(", ");

			for (id, resonance) in chunk {
				separated.push("(");
				separated.push_bind_unseparated(id);
				separated.push_unseparated(", ");
				separated.push_bind_unseparated(*resonance);
				separated.push_unseparated(")");
			}

			builder.push(") AS v WHERE memories.id = v.column1");
			builder.build().execute(&mut *tx).await?;
			tx.commit().await?;

			report.decayed += chunk.len() as u64;
		}

		for chunk in removals.chunks(CHUNK) {
			let mut tx = self.pool()?.begin().await?;

			if self.vec_enabled() {
				let mut builder = QueryBuilder::new(
					"\
DELETE FROM memory_vectors
WHERE rowid IN (SELECT rowid FROM memories WHERE id IN (",
				);
				let mut separated = builder.separated(", ");

				for id in chunk {
					separated.push_bind(id);
				}

				builder.push("))");
				builder.build().execute(&mut *tx).await?;
			}

			let mut builder = QueryBuilder::new("DELETE FROM memories WHERE id IN (");
			let mut separated = builder.separated(", ");

			for id in chunk {
				separated.push_bind(id);
			}

			builder.push(")");
			builder.build().execute(&mut *tx).await?;
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

		let mut endpoint_ids: HashSet<&String> = HashSet::new();

		for edge in edges {
			if !(0.0..=1.0).contains(&edge.strength) {
				return Err(Error::InvalidArgument(format!(
					"Connection strength must be within [0, 1]; got {}.",
					edge.strength
				)));
			}

			endpoint_ids.insert(&edge.source_memory_id);
			endpoint_ids.insert(&edge.target_memory_id);
		}

		let mut builder =
			QueryBuilder::new("SELECT id FROM memories WHERE user_id = ");

		builder.push_bind(user_id);
		builder.push(" AND id IN (");

		let mut separated = builder.separated(", ");

		for id in &endpoint_ids {
			separated.push_bind(id.as_str());
		}

		builder.push(")");

		let known: Vec<(String,)> =
			builder.build_query_as().fetch_all(self.pool()?).await?;
		let known: HashSet<String> = known.into_iter().map(|(id,)| id).collect();

		for id in &endpoint_ids {
			if !known.contains(id.as_str()) {
				return Err(Error::NotFound(format!(
					"Connection endpoint does not exist for this user; id={id}."
				)));
			}
		}

		let mut tx = self.pool()?.begin().await?;

		for edge in edges {
			sqlx::query(
				"\
INSERT INTO memory_connections (
	id, source_memory_id, target_memory_id, connection_type, strength, reason, created_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT (source_memory_id, target_memory_id) DO UPDATE
SET
	strength = MAX(strength, excluded.strength),
	reason = COALESCE(excluded.reason, reason)",
			)
			.bind(&edge.id)
			.bind(&edge.source_memory_id)
			.bind(&edge.target_memory_id)
			.bind(edge.connection_type.as_str())
			.bind(f64::from(edge.strength))
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

			let mut builder = QueryBuilder::new(
				"\
SELECT c.id, c.source_memory_id, c.target_memory_id, c.connection_type, c.strength, c.reason, c.created_at
FROM memory_connections c
JOIN memories ms ON ms.id = c.source_memory_id
JOIN memories mt ON mt.id = c.target_memory_id
WHERE c.strength >= ",
			);

			builder.push_bind(f64::from(opts.min_strength));
			builder.push(" AND ms.user_id = ");
			builder.push_bind(user_id);
			builder.push(" AND mt.user_id = ");
			builder.push_bind(user_id);
			builder.push(" AND (c.source_memory_id IN (");

			let mut separated = builder.separated(", ");

			for id in &frontier {
				separated.push_bind(id);
			}

			builder.push(") OR c.target_memory_id IN (");

			let mut separated = builder.separated(", ");

			for id in &frontier {
				separated.push_bind(id);
			}

			builder.push("))");

			let rows: Vec<(String, String, String, String, f64, Option<String>, i64)> =
				builder.build_query_as().fetch_all(pool).await?;
			let mut next = Vec::new();

			for (id, source, target, connection_type, strength, reason, created_at) in rows {
				let Some(connection_type) =
					loam_domain::ConnectionType::parse(&connection_type)
				else {
					continue;
				};

				edges.entry((source.clone(), target.clone())).or_insert(MemoryConnection {
					id,
					source_memory_id: source.clone(),
					target_memory_id: target.clone(),
					connection_type,
					strength: strength as f32,
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

		let mut builder = QueryBuilder::new(format!(
			"SELECT {MEMORY_COLUMNS} FROM memories WHERE user_id = "
		));

		builder.push_bind(user_id);
		builder.push(" AND id IN (");

		let mut separated = builder.separated(", ");

		for id in &visited {
			separated.push_bind(id.as_str());
		}

		builder.push(") ORDER BY id");

		let rows: Vec<MemoryRow> = builder.build_query_as().fetch_all(pool).await?;
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

		sqlx::query(
			"\
INSERT INTO procedural_patterns (
	user_id, agent_id, pattern, success_count, failure_count, last_used_at, created_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
ON CONFLICT (user_id, agent_id, pattern) DO UPDATE
SET
	success_count = success_count + excluded.success_count,
	failure_count = failure_count + excluded.failure_count,
	last_used_at = excluded.last_used_at",
		)
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

		let rows: Vec<(String, i64, i64, Option<i64>)> = sqlx::query_as(
			"\
SELECT pattern, success_count, failure_count, last_used_at
FROM procedural_patterns
WHERE user_id = ?1 AND agent_id = ?2
ORDER BY pattern",
		)
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

#[async_trait]
impl VectorMemoryStore for SqliteProvider {
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
			.fetch_record(user_id, None, memory_id)
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

		let result = sqlx::query(
			"\
UPDATE memories
SET
	embedding = ?1,
	embedding_model = ?2,
	embedding_dimension = ?3,
	updated_at = ?4
WHERE user_id = ?5 AND id = ?6",
		)
		.bind(serialize::encode_as(&embedding, "embedding")?)
		.bind(model)
		.bind(embedding.len() as i64)
		.bind(clock::now_ms())
		.bind(user_id)
		.bind(memory_id)
		.execute(self.pool()?)
		.await?;

		if result.rows_affected() == 0 {
			return Err(Error::NotFound(format!("Memory not found; id={memory_id}.")));
		}

		self.sync_vec_row(memory_id, Some(embedding)).await?;

		Ok(())
	}

	async fn get_memory_embedding(
		&self,
		user_id: &str,
		memory_id: &str,
	) -> Result<Option<Vec<f32>>> {
		let row: Option<(Option<String>,)> = sqlx::query_as(
			"SELECT embedding FROM memories WHERE user_id = ?1 AND id = ?2",
		)
		.bind(user_id)
		.bind(memory_id)
		.fetch_optional(self.pool()?)
		.await?;

		match row {
			Some((Some(raw),)) => Ok(Some(serialize::decode_as(&raw, "embedding")?)),
			Some((None,)) => Ok(None),
			None => Ok(None),
		}
	}
}
