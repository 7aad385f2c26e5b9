//! Body configuration loaded from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::immediate::{ImmediateService, ImmediateServices};

/// Startup configuration of one body.
///
/// ```toml
/// name = "solver"
/// service_timeout_ms = 250
///
/// [[immediate_services]]
/// method = "progress"
///
/// [[immediate_services]]
/// method = "resize"
/// parameters = ["u32", "u32"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BodyConfig {
	/// Human-readable body name, used for logs and the service thread name.
	#[serde(default = "default_name")]
	pub name: String,
	/// Methods served on arrival in addition to the seeded defaults.
	#[serde(default)]
	pub immediate_services: Vec<ImmediateService>,
	/// Seed the receiver with the default introspection and termination methods.
	#[serde(default = "default_seed")]
	pub seed_default_immediate_services: bool,
	/// How long one blocking serve waits for a request. 0 waits forever.
	#[serde(default)]
	pub service_timeout_ms: u64,
	/// Prefix of the service thread name; the body name is appended.
	#[serde(default = "default_thread_name_prefix")]
	pub thread_name_prefix: String,
}

fn default_name() -> String {
	"body".to_string()
}

fn default_seed() -> bool {
	true
}

fn default_thread_name_prefix() -> String {
	"aorta-".to_string()
}

impl Default for BodyConfig {
	fn default() -> Self {
		Self {
			name: default_name(),
			immediate_services: Vec::new(),
			seed_default_immediate_services: default_seed(),
			service_timeout_ms: 0,
			thread_name_prefix: default_thread_name_prefix(),
		}
	}
}

impl BodyConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and parses the TOML file at `path`.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		let config = Self::from_toml_str(&input)?;
		tracing::debug!(path = %path.display(), name = %config.name, "config.loaded");
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if let Some(index) = self.immediate_services.iter().position(|s| s.method.trim().is_empty()) {
			return Err(ConfigError::EmptyMethodName { index });
		}
		if self.thread_name_prefix.contains('\0') || self.name.contains('\0') {
			return Err(ConfigError::InvalidThreadName);
		}
		Ok(())
	}

	/// Blocking-serve timeout; `None` waits forever.
	pub fn service_timeout(&self) -> Option<Duration> {
		(self.service_timeout_ms > 0).then(|| Duration::from_millis(self.service_timeout_ms))
	}

	/// Name of the OS thread running this body's activity.
	pub fn thread_name(&self) -> String {
		format!("{}{}", self.thread_name_prefix, self.name)
	}

	/// Builds the receiver allow-list this configuration describes.
	pub fn immediate_services(&self) -> ImmediateServices {
		let services = if self.seed_default_immediate_services {
			ImmediateServices::with_defaults()
		} else {
			ImmediateServices::new()
		};
		for service in &self.immediate_services {
			services.register(service.clone());
		}
		services
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use pretty_assertions::assert_eq;

	use super::*;

	const CONFIG: &str = r#"
		name = "solver"
		service_timeout_ms = 250
		thread_name_prefix = "ao-"

		[[immediate_services]]
		method = "progress"

		[[immediate_services]]
		method = "resize"
		parameters = ["u32", "u32"]
	"#;

	#[test]
	fn parses_full_document() {
		let config = BodyConfig::from_toml_str(CONFIG).unwrap();
		assert_eq!(config.name, "solver");
		assert_eq!(config.service_timeout(), Some(Duration::from_millis(250)));
		assert_eq!(config.thread_name(), "ao-solver");
		assert_eq!(
			config.immediate_services,
			vec![ImmediateService::method("progress"), ImmediateService::with_signature("resize", ["u32", "u32"])]
		);
		assert!(config.seed_default_immediate_services);
	}

	#[test]
	fn empty_document_uses_defaults() {
		let config = BodyConfig::from_toml_str("").unwrap();
		assert_eq!(config, BodyConfig::default());
		assert_eq!(config.service_timeout(), None);
	}

	#[test]
	fn seeding_can_be_disabled() {
		let config = BodyConfig::from_toml_str(
			r#"
			seed_default_immediate_services = false
			[[immediate_services]]
			method = "progress"
			"#,
		)
		.unwrap();
		let services = config.immediate_services();
		assert_eq!(services.len(), 1);
		assert!(!services.contains_method("equals"));
	}

	#[test]
	fn seeded_services_include_configured_ones() {
		let services = BodyConfig::from_toml_str(CONFIG).unwrap().immediate_services();
		assert!(services.contains_method("equals"));
		assert!(services.contains_method("progress"));
		assert!(services.contains_method("resize"));
	}

	#[test]
	fn rejects_unknown_fields() {
		let err = BodyConfig::from_toml_str("queue_size = 3").unwrap_err();
		assert!(matches!(err, ConfigError::Toml(_)), "got {err:?}");
	}

	#[test]
	fn rejects_empty_method_names() {
		let err = BodyConfig::from_toml_str("[[immediate_services]]\nmethod = \" \"").unwrap_err();
		assert!(matches!(err, ConfigError::EmptyMethodName { index: 0 }), "got {err:?}");
	}

	#[test]
	fn loads_from_file() {
		let mut file = tempfile::NamedTempFile::new().expect("create temp file");
		file.write_all(CONFIG.as_bytes()).unwrap();

		let config = BodyConfig::load(file.path()).unwrap();
		assert_eq!(config.name, "solver");
	}

	#[test]
	fn missing_file_reports_path() {
		let dir = tempfile::tempdir().expect("create tempdir");
		let path = dir.path().join("absent.toml");

		let err = BodyConfig::load(&path).unwrap_err();
		match err {
			ConfigError::Io { path: reported, .. } => assert_eq!(reported, path),
			other => panic!("expected I/O error, got {other:?}"),
		}
	}
}
