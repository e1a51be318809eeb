use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result, types::StorageOptions};

const MAX_KEY_LEN: usize = 512;

static IDENTIFIER: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern"));
static PLACEHOLDER: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder pattern"));

pub fn validate_key(key: &str) -> Result<()> {
	if key.is_empty() {
		return Err(Error::InvalidArgument("Key must not be empty.".to_string()));
	}
	if key.len() > MAX_KEY_LEN {
		return Err(Error::InvalidArgument(format!(
			"Key exceeds {MAX_KEY_LEN} bytes; got {}.",
			key.len()
		)));
	}

	Ok(())
}

pub fn validate_tenant(user_id: &str, agent_id: &str) -> Result<()> {
	if user_id.trim().is_empty() {
		return Err(Error::InvalidArgument("user_id must not be empty.".to_string()));
	}
	if agent_id.trim().is_empty() {
		return Err(Error::InvalidArgument("agent_id must not be empty.".to_string()));
	}

	Ok(())
}

/// The namespace an operation actually runs under: the per-call override when
/// present, the provider default otherwise.
pub fn effective_namespace<'a>(
	opts: &'a StorageOptions,
	default: Option<&'a str>,
) -> Option<&'a str> {
	opts.namespace.as_deref().or(default)
}

/// Flat `"{ns}:{key}"` prefixing. Returned keys are always stripped back via
/// [`strip_namespace`].
pub fn namespaced(namespace: Option<&str>, key: &str) -> String {
	match namespace {
		Some(ns) if !ns.is_empty() => format!("{ns}:{key}"),
		_ => key.to_string(),
	}
}

pub fn strip_namespace(namespace: Option<&str>, full: &str) -> String {
	match namespace {
		Some(ns) if !ns.is_empty() => full
			.strip_prefix(ns)
			.and_then(|rest| rest.strip_prefix(':'))
			.unwrap_or(full)
			.to_string(),
		_ => full.to_string(),
	}
}

/// Caller-supplied SQL identifiers (schema, collection, table names) pass a
/// whitelist and are always quoted when interpolated.
pub fn validate_identifier(name: &str) -> Result<()> {
	if IDENTIFIER.is_match(name) {
		return Ok(());
	}

	Err(Error::InvalidArgument(format!("Invalid SQL identifier: {name:?}.")))
}

pub fn quote_identifier(name: &str) -> Result<String> {
	validate_identifier(name)?;

	Ok(format!("\"{name}\""))
}

/// A key template with `{placeholder}` slots, e.g.
/// `cost-record:{agent_id}:{record_id}`.
#[derive(Clone, Debug)]
pub struct KeyTemplate {
	template: String,
}
impl KeyTemplate {
	pub fn new(template: &str) -> Result<Self> {
		if template.trim().is_empty() {
			return Err(Error::InvalidArgument("Key template must not be empty.".to_string()));
		}

		Ok(Self { template: template.to_string() })
	}

	/// Render with every placeholder bound; unbound placeholders are an error.
	pub fn render(&self, bindings: &[(&str, &str)]) -> Result<String> {
		let mut out = self.template.clone();

		for (name, value) in bindings {
			if value.is_empty() {
				return Err(Error::InvalidArgument(format!(
					"Template placeholder {name} must not bind an empty value."
				)));
			}

			out = out.replace(&format!("{{{name}}}"), value);
		}

		if let Some(unbound) = PLACEHOLDER.captures(&out) {
			return Err(Error::InvalidArgument(format!(
				"Template placeholder {} is unbound.",
				&unbound[1]
			)));
		}

		Ok(out)
	}

	/// The static prefix up to the first placeholder, for prefix listing.
	pub fn prefix(&self, bindings: &[(&str, &str)]) -> String {
		let mut out = self.template.clone();

		for (name, value) in bindings {
			out = out.replace(&format!("{{{name}}}"), value);
		}

		match out.find('{') {
			Some(idx) => out[..idx].to_string(),
			None => out,
		}
	}
}

#[cfg(test)]
mod tests {
	use crate::keys::{
		KeyTemplate, namespaced, quote_identifier, strip_namespace, validate_identifier,
		validate_key,
	};

	#[test]
	fn namespace_round_trip() {
		assert_eq!(namespaced(Some("t1"), "shared"), "t1:shared");
		assert_eq!(namespaced(None, "shared"), "shared");
		assert_eq!(strip_namespace(Some("t1"), "t1:shared"), "shared");
		assert_eq!(strip_namespace(Some("t1"), "other:shared"), "other:shared");
	}

	#[test]
	fn empty_keys_are_rejected() {
		assert!(validate_key("").is_err());
		assert!(validate_key("session:abc").is_ok());
	}

	#[test]
	fn identifier_whitelist_blocks_injection() {
		assert!(validate_identifier("memories").is_ok());
		assert!(validate_identifier("_private_1").is_ok());
		assert!(validate_identifier("1bad").is_err());
		assert!(validate_identifier("drop table;--").is_err());
		assert!(validate_identifier("").is_err());
		assert_eq!(quote_identifier("kv_store").unwrap(), "\"kv_store\"");
	}

	#[test]
	fn template_renders_and_flags_unbound_slots() {
		let template = KeyTemplate::new("cost-record:{agent_id}:{record_id}").unwrap();

		assert_eq!(
			template.render(&[("agent_id", "a1"), ("record_id", "r9")]).unwrap(),
			"cost-record:a1:r9"
		);
		assert!(template.render(&[("agent_id", "a1")]).is_err());
		assert_eq!(template.prefix(&[("agent_id", "a1")]), "cost-record:a1:");
	}
}
