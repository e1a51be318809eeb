mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, Cost, Decay, Postgres, Qdrant, Redis, Service, Sqlite, Storage, Sweeper, SweeperTenant,
};

use std::{fs, path::Path};

pub const KNOWN_PROVIDERS: [&str; 5] = ["memory", "redis", "sqlite", "postgres", "qdrant"];

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	validate_service(cfg)?;
	validate_storage(cfg)?;
	validate_decay(cfg)?;
	validate_cost(cfg)?;
	validate_sweeper(cfg)?;

	Ok(())
}

fn validate_service(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}

	Ok(())
}

fn validate_storage(cfg: &Config) -> Result<()> {
	let storage = &cfg.storage;
	let default_provider = storage.default_provider.trim();

	if !KNOWN_PROVIDERS.contains(&default_provider) {
		return Err(Error::Validation {
			message: format!(
				"storage.default_provider must be one of memory, redis, sqlite, postgres, or qdrant. Got {default_provider}."
			),
		});
	}

	let section_present = match default_provider {
		"memory" => true,
		"redis" => storage.redis.is_some(),
		"sqlite" => storage.sqlite.is_some(),
		"postgres" => storage.postgres.is_some(),
		"qdrant" => storage.qdrant.is_some(),
		_ => false,
	};

	if !section_present {
		return Err(Error::Validation {
			message: format!(
				"storage.{default_provider} must be configured when it is the default provider."
			),
		});
	}
	if storage.default_dimension == 0 {
		return Err(Error::Validation {
			message: "storage.default_dimension must be greater than zero.".to_string(),
		});
	}
	if !matches!(storage.default_metric.as_str(), "cosine" | "euclidean" | "dot") {
		return Err(Error::Validation {
			message: "storage.default_metric must be one of cosine, euclidean, or dot.".to_string(),
		});
	}
	if !matches!(storage.default_index_type.as_str(), "ivfflat" | "hnsw" | "flat") {
		return Err(Error::Validation {
			message: "storage.default_index_type must be one of ivfflat, hnsw, or flat.".to_string(),
		});
	}
	if storage.text_search_language.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.text_search_language must be non-empty.".to_string(),
		});
	}
	if storage.query_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "storage.query_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if storage.cleanup_interval_secs == 0 {
		return Err(Error::Validation {
			message: "storage.cleanup_interval_secs must be greater than zero.".to_string(),
		});
	}

	if let Some(redis) = storage.redis.as_ref()
		&& redis.url.trim().is_empty()
	{
		return Err(Error::Validation {
			message: "storage.redis.url must be non-empty.".to_string(),
		});
	}
	if let Some(sqlite) = storage.sqlite.as_ref()
		&& sqlite.path.trim().is_empty()
	{
		return Err(Error::Validation {
			message: "storage.sqlite.path must be non-empty.".to_string(),
		});
	}
	if let Some(postgres) = storage.postgres.as_ref() {
		if postgres.dsn.trim().is_empty() {
			return Err(Error::Validation {
				message: "storage.postgres.dsn must be non-empty.".to_string(),
			});
		}
		if postgres.pool_max_conns == 0 {
			return Err(Error::Validation {
				message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
			});
		}
		if postgres.schema.trim().is_empty() {
			return Err(Error::Validation {
				message: "storage.postgres.schema must be non-empty.".to_string(),
			});
		}
	}
	if let Some(qdrant) = storage.qdrant.as_ref() {
		if qdrant.url.trim().is_empty() {
			return Err(Error::Validation {
				message: "storage.qdrant.url must be non-empty.".to_string(),
			});
		}
		if qdrant.collection.trim().is_empty() {
			return Err(Error::Validation {
				message: "storage.qdrant.collection must be non-empty.".to_string(),
			});
		}
	}

	Ok(())
}

fn validate_decay(cfg: &Config) -> Result<()> {
	let decay = &cfg.decay;

	for (path, value) in [
		("decay.rate", decay.rate),
		("decay.importance_weight", decay.importance_weight),
		("decay.access_boost", decay.access_boost),
		("decay.removal_threshold", decay.removal_threshold),
		("decay.update_epsilon", decay.update_epsilon),
	] {
		if !value.is_finite() {
			return Err(Error::Validation { message: format!("{path} must be a finite number.") });
		}
		if value < 0.0 {
			return Err(Error::Validation { message: format!("{path} must be zero or greater.") });
		}
	}

	Ok(())
}

fn validate_cost(cfg: &Config) -> Result<()> {
	let cost = &cfg.cost;

	if cost.daily_ttl_secs <= 0 {
		return Err(Error::Validation {
			message: "cost.daily_ttl_secs must be greater than zero.".to_string(),
		});
	}

	for (path, template, placeholder) in [
		("cost.record_key_template", &cost.record_key_template, "{record_id}"),
		("cost.daily_key_template", &cost.daily_key_template, "{date}"),
	] {
		if !template.contains("{agent_id}") || !template.contains(placeholder) {
			return Err(Error::Validation {
				message: format!("{path} must contain {{agent_id}} and {placeholder}."),
			});
		}
	}

	for (label, seconds) in &cost.periods {
		if label.trim().is_empty() {
			return Err(Error::Validation {
				message: "cost.periods labels must be non-empty.".to_string(),
			});
		}
		if *seconds <= 0 {
			return Err(Error::Validation {
				message: format!("cost.periods.{label} must be greater than zero."),
			});
		}
	}

	Ok(())
}

fn validate_sweeper(cfg: &Config) -> Result<()> {
	if cfg.sweeper.interval_secs == 0 {
		return Err(Error::Validation {
			message: "sweeper.interval_secs must be greater than zero.".to_string(),
		});
	}

	for (idx, tenant) in cfg.sweeper.tenants.iter().enumerate() {
		if tenant.user_id.trim().is_empty() || tenant.agent_id.trim().is_empty() {
			return Err(Error::Validation {
				message: format!(
					"sweeper.tenants[{idx}] must carry non-empty user_id and agent_id."
				),
			});
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use crate::{Config, validate};

	fn parse(raw: &str) -> Config {
		toml::from_str(raw).expect("config should parse")
	}

	fn base_config() -> String {
		r#"
[service]
log_level = "info"

[storage]
default_provider = "memory"
default_dimension = 4
"#
		.to_string()
	}

	#[test]
	fn minimal_memory_config_validates() {
		let cfg = parse(&base_config());

		assert!(validate(&cfg).is_ok());
		assert_eq!(cfg.storage.query_timeout_ms, 5_000);
		assert_eq!(cfg.storage.cleanup_interval_secs, 60);
		assert_eq!(cfg.cost.daily_ttl_secs, 7 * 86_400);
	}

	#[test]
	fn default_provider_requires_its_section() {
		let cfg = parse(
			r#"
[service]
log_level = "info"

[storage]
default_provider = "postgres"
default_dimension = 4
"#,
		);
		let err = validate(&cfg).expect_err("missing postgres section");

		assert!(err.to_string().contains("storage.postgres"));
	}

	#[test]
	fn unknown_metric_is_rejected() {
		let raw = format!("{}default_metric = \"taxicab\"\n", base_config());
		let cfg = parse(&raw);

		assert!(validate(&cfg).is_err());
	}

	#[test]
	fn cost_templates_require_placeholders() {
		let raw = format!("{}\n[cost]\nrecord_key_template = \"cost:{{agent_id}}\"\n", base_config());
		let cfg = parse(&raw);

		assert!(validate(&cfg).is_err());
	}
}
