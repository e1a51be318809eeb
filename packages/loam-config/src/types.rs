use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	#[serde(default)]
	pub decay: Decay,
	#[serde(default)]
	pub cost: Cost,
	#[serde(default)]
	pub sweeper: Sweeper,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	/// Adapter selected when a caller asks the factory for a provider without
	/// naming one: `memory`, `redis`, `sqlite`, `postgres`, or `qdrant`.
	pub default_provider: String,
	/// Default namespace prefixed onto every key; operations may override it.
	pub namespace: Option<String>,
	pub default_dimension: u32,
	#[serde(default = "default_metric")]
	pub default_metric: String,
	#[serde(default = "default_index_type")]
	pub default_index_type: String,
	#[serde(default = "default_text_search_language")]
	pub text_search_language: String,
	#[serde(default = "default_query_timeout_ms")]
	pub query_timeout_ms: u64,
	#[serde(default = "default_cleanup_interval_secs")]
	pub cleanup_interval_secs: u64,
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	#[serde(default = "default_retry_base_ms")]
	pub retry_base_ms: u64,
	pub redis: Option<Redis>,
	pub sqlite: Option<Sqlite>,
	pub postgres: Option<Postgres>,
	pub qdrant: Option<Qdrant>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Redis {
	pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Sqlite {
	pub path: String,
	/// Filesystem hint for the vector extension; vector capabilities stay
	/// disabled when absent.
	pub vec_extension_path: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
	#[serde(default = "default_pool_idle_timeout_ms")]
	pub pool_idle_timeout_ms: u64,
	#[serde(default = "default_pool_connect_timeout_ms")]
	pub pool_connect_timeout_ms: u64,
	#[serde(default = "default_schema")]
	pub schema: String,
	#[serde(default = "default_prepared_statements")]
	pub prepared_statements: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct Decay {
	pub rate: f32,
	pub importance_weight: f32,
	pub access_boost: f32,
	pub removal_threshold: f32,
	pub update_epsilon: f32,
}
impl Default for Decay {
	fn default() -> Self {
		Self {
			rate: 0.1,
			importance_weight: 0.0,
			access_boost: 0.0,
			removal_threshold: 0.01,
			update_epsilon: 0.001,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Cost {
	pub daily_ttl_secs: i64,
	/// Extra period labels mapped to their length in seconds; the built-in
	/// `1h`/`24h`/`7d`/`30d` map applies underneath.
	pub periods: HashMap<String, i64>,
	pub record_key_template: String,
	pub daily_key_template: String,
}
impl Default for Cost {
	fn default() -> Self {
		Self {
			daily_ttl_secs: 7 * 86_400,
			periods: HashMap::new(),
			record_key_template: "cost-record:{agent_id}:{record_id}".to_string(),
			daily_key_template: "cost-daily:{agent_id}:{date}".to_string(),
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Sweeper {
	pub interval_secs: u64,
	pub tenants: Vec<SweeperTenant>,
}
impl Default for Sweeper {
	fn default() -> Self {
		Self { interval_secs: 3_600, tenants: Vec::new() }
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct SweeperTenant {
	pub user_id: String,
	pub agent_id: String,
}

fn default_metric() -> String {
	"cosine".to_string()
}

fn default_index_type() -> String {
	"hnsw".to_string()
}

fn default_text_search_language() -> String {
	"english".to_string()
}

fn default_query_timeout_ms() -> u64 {
	5_000
}

fn default_cleanup_interval_secs() -> u64 {
	60
}

fn default_max_retries() -> u32 {
	3
}

fn default_retry_base_ms() -> u64 {
	500
}

fn default_pool_idle_timeout_ms() -> u64 {
	600_000
}

fn default_pool_connect_timeout_ms() -> u64 {
	30_000
}

fn default_schema() -> String {
	"public".to_string()
}

fn default_prepared_statements() -> bool {
	true
}
