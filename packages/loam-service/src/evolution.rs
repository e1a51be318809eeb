use std::sync::Arc;

use loam_domain::MemoryEvolution;
use loam_storage::{keys::KeyTemplate, provider::StorageProvider, types::StorageOptions};

use crate::{Error, Result};

const EVOLUTION_KEY_TEMPLATE: &str = "evolution:{memory_id}:{evolution_id}";

/// Per-memory append-only audit history stored as KV entries under
/// `evolution:{memory_id}:{evolution_id}`.
pub struct EvolutionLog {
	provider: Arc<dyn StorageProvider>,
	template: KeyTemplate,
}
impl EvolutionLog {
	pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
		Self {
			provider,
			template: KeyTemplate::new(EVOLUTION_KEY_TEMPLATE)
				.expect("static template is well-formed"),
		}
	}

	/// Override the key template; it must carry `{memory_id}` and
	/// `{evolution_id}` slots.
	pub fn with_template(provider: Arc<dyn StorageProvider>, template: &str) -> Result<Self> {
		if !template.contains("{memory_id}") || !template.contains("{evolution_id}") {
			return Err(Error::InvalidRequest {
				message: "Evolution key template must contain {memory_id} and {evolution_id}."
					.to_string(),
			});
		}

		Ok(Self { provider, template: KeyTemplate::new(template)? })
	}

	pub async fn append(&self, evolution: &MemoryEvolution) -> Result<()> {
		if evolution.memory_id.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "memory_id must not be empty.".to_string(),
			});
		}

		let key = self.template.render(&[
			("memory_id", &evolution.memory_id),
			("evolution_id", &evolution.id),
		])?;

		self.provider
			.set(&key, &serde_json::to_value(evolution)?, &StorageOptions::default())
			.await?;

		Ok(())
	}

	/// Entries for one memory, oldest first.
	pub async fn list(&self, memory_id: &str) -> Result<Vec<MemoryEvolution>> {
		let prefix = self.template.prefix(&[("memory_id", memory_id)]);
		let keys = self.provider.list(&prefix, &StorageOptions::default()).await?;
		let values = self.provider.get_many(&keys, &StorageOptions::default()).await?;
		let mut out = Vec::with_capacity(values.len());

		for value in values.into_values().flatten() {
			out.push(serde_json::from_value::<MemoryEvolution>(value)?);
		}

		out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

		Ok(out)
	}
}
