use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
	Error, Result,
	adapter::{
		AdapterSettings, ephemeral::EphemeralProvider, postgres::PostgresProvider,
		qdrant::QdrantProvider, redis::RedisProvider, sqlite::SqliteProvider,
	},
	provider::StorageProvider,
};

#[derive(Clone, Debug, Default)]
pub struct ProviderOptions {
	/// Adapter type; the factory default applies when absent.
	pub r#type: Option<String>,
	/// Overrides the configured default namespace for this provider.
	pub namespace: Option<String>,
	/// Free-form per-request config folded into the cache fingerprint.
	pub config: Value,
}
impl ProviderOptions {
	pub fn of_type(r#type: &str) -> Self {
		Self { r#type: Some(r#type.to_string()), ..Default::default() }
	}

	pub fn with_namespace(mut self, namespace: &str) -> Self {
		self.namespace = Some(namespace.to_string());

		self
	}
}

pub type ProviderFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn StorageProvider>>> + Send>>;
pub type ProviderBuilder = Arc<dyn Fn(ProviderOptions) -> ProviderFuture + Send + Sync>;

#[derive(Default)]
struct Inner {
	builders: HashMap<String, ProviderBuilder>,
	cache: HashMap<String, Arc<dyn StorageProvider>>,
	default_type: Option<String>,
}

/// Explicitly constructed provider registry. Builders are registered per
/// adapter type; `get_provider` caches instances by the fingerprint of
/// `(type, namespace, config)`, and failed builds are never cached.
pub struct ProviderFactory {
	inner: Mutex<Inner>,
}
impl ProviderFactory {
	pub fn new() -> Self {
		Self { inner: Mutex::new(Inner::default()) }
	}

	/// Register every adapter the config carries. The ephemeral adapter is
	/// always available; a backend section opts its adapter in. A section
	/// that later fails to connect surfaces at build time and leaves the
	/// remaining providers usable.
	pub fn from_config(cfg: &loam_config::Storage) -> Result<Self> {
		let factory = Self::new();
		let settings = AdapterSettings::from_config(cfg)?;

		{
			let mut inner = factory.inner.try_lock().expect("factory not shared yet");

			inner.builders.insert("memory".to_string(), memory_builder(settings.clone()));

			if let Some(redis) = cfg.redis.clone() {
				inner
					.builders
					.insert("redis".to_string(), redis_builder(redis, settings.clone()));
			}
			if let Some(sqlite) = cfg.sqlite.clone() {
				inner
					.builders
					.insert("sqlite".to_string(), sqlite_builder(sqlite, settings.clone()));
			}
			if let Some(postgres) = cfg.postgres.clone() {
				inner.builders.insert(
					"postgres".to_string(),
					postgres_builder(postgres, settings.clone()),
				);
			}
			if let Some(qdrant) = cfg.qdrant.clone() {
				inner
					.builders
					.insert("qdrant".to_string(), qdrant_builder(qdrant, settings.clone()));
			}

			if !inner.builders.contains_key(&cfg.default_provider) {
				return Err(Error::InvalidArgument(format!(
					"Default provider {} is not registered.",
					cfg.default_provider
				)));
			}

			inner.default_type = Some(cfg.default_provider.clone());
		}

		Ok(factory)
	}

	pub async fn register_adapter(&self, r#type: &str, builder: ProviderBuilder) {
		self.inner.lock().await.builders.insert(r#type.to_string(), builder);
	}

	pub async fn registered_types(&self) -> Vec<String> {
		let mut out: Vec<String> =
			self.inner.lock().await.builders.keys().cloned().collect();

		out.sort();

		out
	}

	pub async fn set_default_type(&self, r#type: &str) -> Result<()> {
		let mut inner = self.inner.lock().await;

		if !inner.builders.contains_key(r#type) {
			return Err(Error::InvalidArgument(format!(
				"Cannot default to unregistered provider type {}.",
				r#type
			)));
		}

		inner.default_type = Some(r#type.to_string());

		Ok(())
	}

	/// Cached lookup; the builder runs on first miss. Builder failures
	/// surface to the caller and leave the cache untouched.
	pub async fn get_provider(
		&self,
		opts: ProviderOptions,
	) -> Result<Arc<dyn StorageProvider>> {
		let (r#type, builder) = self.resolve(&opts).await?;
		let fingerprint = fingerprint(&r#type, &opts);

		if let Some(provider) = self.inner.lock().await.cache.get(&fingerprint) {
			return Ok(Arc::clone(provider));
		}

		let provider = builder(opts).await?;
		let mut inner = self.inner.lock().await;
		let provider = inner
			.cache
			.entry(fingerprint)
			.or_insert_with(|| Arc::clone(&provider))
			.clone();

		debug!(provider = %r#type, "Provider instantiated and cached.");

		Ok(provider)
	}

	/// Always builds a fresh instance; never cached.
	pub async fn create_provider(
		&self,
		opts: ProviderOptions,
	) -> Result<Arc<dyn StorageProvider>> {
		let (_, builder) = self.resolve(&opts).await?;

		builder(opts).await
	}

	pub async fn get_default_provider(&self) -> Result<Arc<dyn StorageProvider>> {
		self.get_provider(ProviderOptions::default()).await
	}

	async fn resolve(&self, opts: &ProviderOptions) -> Result<(String, ProviderBuilder)> {
		let inner = self.inner.lock().await;
		let r#type = match opts.r#type.as_ref() {
			Some(r#type) => r#type.clone(),
			None => inner.default_type.clone().ok_or_else(|| {
				Error::InvalidArgument("No default provider type is set.".to_string())
			})?,
		};
		let builder = inner.builders.get(&r#type).cloned().ok_or_else(|| {
			Error::InvalidArgument(format!("Unknown provider type: {}.", r#type))
		})?;

		Ok((r#type, builder))
	}
}
impl Default for ProviderFactory {
	fn default() -> Self {
		Self::new()
	}
}

fn fingerprint(r#type: &str, opts: &ProviderOptions) -> String {
	let mut hasher = blake3::Hasher::new();

	hasher.update(r#type.as_bytes());
	hasher.update(&[0x1f]);
	hasher.update(opts.namespace.as_deref().unwrap_or("").as_bytes());
	hasher.update(&[0x1f]);
	hasher.update(opts.config.to_string().as_bytes());

	hasher.finalize().to_hex().to_string()
}

fn apply_namespace(settings: &AdapterSettings, opts: &ProviderOptions) -> AdapterSettings {
	let mut settings = settings.clone();

	if opts.namespace.is_some() {
		settings.namespace = opts.namespace.clone();
	}

	settings
}

fn memory_builder(settings: AdapterSettings) -> ProviderBuilder {
	Arc::new(move |opts| {
		let settings = apply_namespace(&settings, &opts);

		Box::pin(async move {
			let provider = EphemeralProvider::new(settings);

			provider.initialize().await?;

			Ok(Arc::new(provider) as Arc<dyn StorageProvider>)
		})
	})
}

fn redis_builder(cfg: loam_config::Redis, settings: AdapterSettings) -> ProviderBuilder {
	Arc::new(move |opts| {
		let cfg = cfg.clone();
		let settings = apply_namespace(&settings, &opts);

		Box::pin(async move {
			let provider = RedisProvider::connect(&cfg, settings).await?;

			provider.initialize().await?;

			Ok(Arc::new(provider) as Arc<dyn StorageProvider>)
		})
	})
}

fn sqlite_builder(cfg: loam_config::Sqlite, settings: AdapterSettings) -> ProviderBuilder {
	Arc::new(move |opts| {
		let cfg = cfg.clone();
		let settings = apply_namespace(&settings, &opts);

		Box::pin(async move {
			let provider = SqliteProvider::connect(&cfg, settings).await?;

			provider.initialize().await?;

			Ok(Arc::new(provider) as Arc<dyn StorageProvider>)
		})
	})
}

fn postgres_builder(cfg: loam_config::Postgres, settings: AdapterSettings) -> ProviderBuilder {
	Arc::new(move |opts| {
		let cfg = cfg.clone();
		let settings = apply_namespace(&settings, &opts);

		Box::pin(async move {
			let provider = PostgresProvider::connect(&cfg, settings).await?;

			provider.initialize().await?;

			Ok(Arc::new(provider) as Arc<dyn StorageProvider>)
		})
	})
}

fn qdrant_builder(cfg: loam_config::Qdrant, settings: AdapterSettings) -> ProviderBuilder {
	Arc::new(move |opts| {
		let cfg = cfg.clone();
		let settings = apply_namespace(&settings, &opts);

		Box::pin(async move {
			let provider = QdrantProvider::new(&cfg, settings)?;

			provider.initialize().await?;

			Ok(Arc::new(provider) as Arc<dyn StorageProvider>)
		})
	})
}
