use serde_json::Value;

use crate::{Error, Result};

/// Values cross every adapter boundary as JSON text. Decoding failures are
/// fatal for the calling operation; stored bytes are never coerced.
pub fn encode(value: &Value) -> Result<String> {
	serde_json::to_string(value)
		.map_err(|err| Error::Serialization(format!("Failed to encode value: {err}.")))
}

pub fn decode(raw: &str) -> Result<Value> {
	serde_json::from_str(raw)
		.map_err(|err| Error::Serialization(format!("Failed to decode stored value: {err}.")))
}

pub fn encode_as<T: serde::Serialize>(value: &T, label: &str) -> Result<String> {
	serde_json::to_string(value)
		.map_err(|err| Error::Serialization(format!("Failed to encode {label}: {err}.")))
}

pub fn decode_as<T: serde::de::DeserializeOwned>(raw: &str, label: &str) -> Result<T> {
	serde_json::from_str(raw)
		.map_err(|err| Error::Serialization(format!("Failed to decode {label}: {err}.")))
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use crate::serialize::{decode, encode};

	#[test]
	fn json_round_trips_structurally() {
		for value in [
			json!(null),
			json!(true),
			json!(42),
			json!(1.5),
			json!("text"),
			json!([1, 2, 3]),
			json!({"nested": {"x": 1}}),
		] {
			assert_eq!(decode(&encode(&value).unwrap()).unwrap(), value);
		}
	}

	#[test]
	fn malformed_payloads_fail_loudly() {
		assert!(decode("{not json").is_err());
	}
}
