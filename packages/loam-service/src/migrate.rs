use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use loam_storage::{provider::StorageProvider, types::StorageOptions};

use crate::Result;

const LIST_KEY_PREFIXES: [&str; 3] = ["list:", "lists:", "_list_"];

pub type ProgressCallback = Arc<dyn Fn(&MigrationProgress) + Send + Sync>;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
	Scan,
	MigrateKv,
	MigrateLists,
	Verify,
}

#[derive(Clone, Debug)]
pub struct MigrationProgress {
	pub phase: MigrationPhase,
	pub processed: u64,
	pub total: u64,
}

#[derive(Clone, Default)]
pub struct MigrationOptions {
	/// Keys per batch during the KV phase.
	pub batch_size: Option<usize>,
	/// Run `destination.clear()` before copying.
	pub clear_destination: bool,
	/// Namespaces to copy; empty means the source provider's default.
	pub namespaces: Vec<String>,
	pub prefix_filter: Option<String>,
	/// Re-read every migrated key from both sides and compare JSON-equal.
	pub verify: bool,
	pub on_progress: Option<ProgressCallback>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MigrationResult {
	pub total_migrated: u64,
	pub total_failed: u64,
	pub failed_keys: Vec<String>,
	pub duration_ms: u64,
	pub verification_passed: Option<bool>,
}

/// Copy KV entries and lists from one provider to another, preserving
/// namespaces. Per-key failures are recorded but never abort the run.
pub async fn migrate(
	source: &dyn StorageProvider,
	destination: &dyn StorageProvider,
	opts: MigrationOptions,
) -> Result<MigrationResult> {
	let started = Instant::now();
	let batch_size = opts.batch_size.unwrap_or(100).max(1);
	let mut result = MigrationResult::default();
	let namespaces: Vec<Option<String>> = if opts.namespaces.is_empty() {
		vec![source.default_namespace().map(str::to_string)]
	} else {
		opts.namespaces.iter().cloned().map(Some).collect()
	};

	if opts.clear_destination {
		destination.clear(None, &StorageOptions::default()).await?;
	}

	// Scan phase: enumerate (key, namespace) pairs up front so later phases
	// can report totals.
	let mut scanned: Vec<(Option<String>, String)> = Vec::new();

	for ns in &namespaces {
		let ns_opts = ns_options(ns);
		let keys =
			source.list(opts.prefix_filter.as_deref().unwrap_or(""), &ns_opts).await?;

		for key in keys {
			scanned.push((ns.clone(), key));
		}

		report(&opts, MigrationPhase::Scan, scanned.len() as u64, scanned.len() as u64);
	}

	info!(keys = scanned.len(), "Migration scan complete.");

	// KV phase.
	let total = scanned.len() as u64;
	let mut processed = 0_u64;

	for batch in scanned.chunks(batch_size) {
		for (ns, key) in batch {
			let ns_opts = ns_options(ns);
			let outcome = async {
				let value = source.get(key, &ns_opts).await?;
				let Some(value) = value else { return Ok::<bool, crate::Error>(false) };

				destination.set(key, &value, &ns_opts).await?;

				Ok(true)
			}
			.await;

			match outcome {
				Ok(true) => result.total_migrated += 1,
				// Expired between scan and copy; nothing to move.
				Ok(false) => {},
				Err(err) => {
					warn!(key, error = %err, "Failed to migrate key.");

					result.total_failed += 1;
					result.failed_keys.push(key.clone());
				},
			}

			processed += 1;
		}

		report(&opts, MigrationPhase::MigrateKv, processed, total);
	}

	// List phase: probe the conventional list prefixes and copy whatever
	// answers to get_list.
	let mut list_processed = 0_u64;

	for ns in &namespaces {
		let ns_opts = ns_options(ns);

		for prefix in LIST_KEY_PREFIXES {
			let keys = match source.list(prefix, &ns_opts).await {
				Ok(keys) => keys,
				Err(err) => {
					warn!(prefix, error = %err, "List key probe failed.");

					continue;
				},
			};

			for key in keys {
				let outcome = async {
					let Some(values) = source.get_list(&key, 0, -1, &ns_opts).await? else {
						return Ok::<bool, crate::Error>(false);
					};

					destination.save_list(&key, &values, &ns_opts).await?;

					Ok(true)
				}
				.await;

				match outcome {
					Ok(true) => result.total_migrated += 1,
					Ok(false) => {},
					Err(err) => {
						warn!(key, error = %err, "Failed to migrate list.");

						result.total_failed += 1;
						result.failed_keys.push(key.clone());
					},
				}

				list_processed += 1;

				report(&opts, MigrationPhase::MigrateLists, list_processed, list_processed);
			}
		}
	}

	// Verify phase.
	if opts.verify {
		let mut passed = true;
		let mut verified = 0_u64;

		for (ns, key) in &scanned {
			let ns_opts = ns_options(ns);
			let source_value = source.get(key, &ns_opts).await?;
			let destination_value = destination.get(key, &ns_opts).await?;

			if source_value != destination_value {
				warn!(key, "Verification mismatch.");

				passed = false;
			}

			verified += 1;

			report(&opts, MigrationPhase::Verify, verified, total);
		}

		result.verification_passed = Some(passed);
	}

	result.duration_ms = started.elapsed().as_millis() as u64;

	Ok(result)
}

fn ns_options(ns: &Option<String>) -> StorageOptions {
	StorageOptions { namespace: ns.clone(), ..Default::default() }
}

fn report(opts: &MigrationOptions, phase: MigrationPhase, processed: u64, total: u64) {
	if let Some(on_progress) = opts.on_progress.as_ref() {
		on_progress(&MigrationProgress { phase, processed, total });
	}
}
