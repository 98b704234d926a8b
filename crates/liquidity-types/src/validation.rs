//! Configuration validation for pluggable implementations.
//!
//! Every chain adapter, storage backend, price oracle and notification sink
//! exposes a `ConfigSchema` describing the TOML settings it accepts. The
//! settings are checked against the schema before the implementation is
//! constructed, so misconfiguration fails at startup rather than mid-tick.

use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	MissingField(String),
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
}

/// Expected TOML type of a field.
#[derive(Debug)]
pub enum FieldType {
	String,
	Integer { min: Option<i64>, max: Option<i64> },
	Boolean,
	/// A decimal amount written as a TOML string, e.g. `"0.005"`.
	Decimal { min: Option<Decimal> },
	/// A table whose values are all decimal strings.
	DecimalTable,
	Table,
	Array(Box<FieldType>),
}

pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}
}

/// Required and optional fields of a settings table.
#[derive(Debug, Default)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config
			.as_table()
			.ok_or_else(|| ValidationError::TypeMismatch {
				field: "root".to_string(),
				expected: "table".to_string(),
				actual: config.type_str().to_string(),
			})?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| ValidationError::MissingField(field.name.clone()))?;
			check_field(field, value)?;
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				check_field(field, value)?;
			}
		}

		Ok(())
	}
}

/// Implemented by every configurable backend.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}

fn check_field(field: &Field, value: &toml::Value) -> Result<(), ValidationError> {
	check_type(&field.name, value, &field.field_type)?;
	if let Some(validator) = &field.validator {
		validator(value).map_err(|message| ValidationError::InvalidValue {
			field: field.name.clone(),
			message,
		})?;
	}
	Ok(())
}

fn mismatch(name: &str, expected: &str, value: &toml::Value) -> ValidationError {
	ValidationError::TypeMismatch {
		field: name.to_string(),
		expected: expected.to_string(),
		actual: value.type_str().to_string(),
	}
}

fn check_type(name: &str, value: &toml::Value, expected: &FieldType) -> Result<(), ValidationError> {
	match expected {
		FieldType::String => {
			value.as_str().ok_or_else(|| mismatch(name, "string", value))?;
		}
		FieldType::Boolean => {
			value.as_bool().ok_or_else(|| mismatch(name, "boolean", value))?;
		}
		FieldType::Integer { min, max } => {
			let number = value
				.as_integer()
				.ok_or_else(|| mismatch(name, "integer", value))?;
			if min.is_some_and(|min| number < min) || max.is_some_and(|max| number > max) {
				return Err(ValidationError::InvalidValue {
					field: name.to_string(),
					message: format!("{} is out of range", number),
				});
			}
		}
		FieldType::Decimal { min } => {
			let number = parse_decimal(name, value)?;
			if let Some(min) = min {
				if number < *min {
					return Err(ValidationError::InvalidValue {
						field: name.to_string(),
						message: format!("{} is below minimum {}", number, min),
					});
				}
			}
		}
		FieldType::DecimalTable => {
			let table = value
				.as_table()
				.ok_or_else(|| mismatch(name, "table", value))?;
			for (key, entry) in table {
				parse_decimal(&format!("{}.{}", name, key), entry)?;
			}
		}
		FieldType::Table => {
			value.as_table().ok_or_else(|| mismatch(name, "table", value))?;
		}
		FieldType::Array(inner) => {
			let items = value
				.as_array()
				.ok_or_else(|| mismatch(name, "array", value))?;
			for (index, item) in items.iter().enumerate() {
				check_type(&format!("{}[{}]", name, index), item, inner)?;
			}
		}
	}
	Ok(())
}

/// Parses a decimal written as a string (preferred) or an integer.
pub fn parse_decimal(name: &str, value: &toml::Value) -> Result<Decimal, ValidationError> {
	match value {
		toml::Value::String(text) => {
			Decimal::from_str(text).map_err(|e| ValidationError::InvalidValue {
				field: name.to_string(),
				message: e.to_string(),
			})
		}
		toml::Value::Integer(number) => Ok(Decimal::from(*number)),
		other => Err(mismatch(name, "decimal string", other)),
	}
}

/// Validator accepting only http(s) URLs.
pub fn http_url(value: &toml::Value) -> Result<(), String> {
	match value.as_str() {
		Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(()),
		_ => Err("URL must start with http:// or https://".to_string()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn schema() -> Schema {
		Schema::new(
			vec![Field::new("base_url", FieldType::String).with_validator(http_url)],
			vec![
				Field::new(
					"timeout_secs",
					FieldType::Integer {
						min: Some(1),
						max: Some(600),
					},
				),
				Field::new("fee", FieldType::Decimal { min: Some(Decimal::ZERO) }),
				Field::new("balances", FieldType::DecimalTable),
			],
		)
	}

	fn parse(document: &str) -> toml::Value {
		toml::Value::Table(toml::from_str(document).unwrap())
	}

	#[test]
	fn test_valid_config() {
		let config = parse(
			r#"
base_url = "https://gateway.local"
timeout_secs = 30
fee = "0.001"
[balances]
ETH = "12.5"
USDT = 1000
"#,
		);
		assert!(schema().validate(&config).is_ok());
	}

	#[test]
	fn test_missing_and_invalid_fields() {
		let missing = parse("timeout_secs = 30");
		assert_eq!(
			schema().validate(&missing),
			Err(ValidationError::MissingField("base_url".to_string()))
		);

		let bad_url = parse(r#"base_url = "ftp://x""#);
		assert!(matches!(
			schema().validate(&bad_url),
			Err(ValidationError::InvalidValue { .. })
		));

		let negative_fee = parse("base_url = \"http://x\"\nfee = \"-1\"");
		assert!(matches!(
			schema().validate(&negative_fee),
			Err(ValidationError::InvalidValue { .. })
		));

		let bad_balance = parse("base_url = \"http://x\"\n[balances]\nETH = \"lots\"");
		assert!(matches!(
			schema().validate(&bad_balance),
			Err(ValidationError::InvalidValue { .. })
		));
	}
}
