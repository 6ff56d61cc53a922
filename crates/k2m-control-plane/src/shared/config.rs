use k2m_deploy::{
    BackendKind, BackendSettings, DockerEngineSettings, RancherV1Settings, RancherV2Settings,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the JSON config file.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_port: String,
    pub kafka_bootstrap: String,
    pub mqtt_broker: String,
    pub mqtt_user: String,
    pub mqtt_pw: String,
    pub transfer_image: String,
    pub deploy_mode: String,
    pub docker_network: String,
    pub docker_pull: bool,
    pub rancher_url: String,
    pub rancher_access_key: String,
    pub rancher_secret_key: String,
    pub rancher_stack_id: String,
    pub rancher_namespace_id: String,
    pub rancher_project_id: String,
    pub rancher_insecure_tls: bool,
    pub verify_input: bool,
    pub import_deploy_url: String,
    pub analytics_pipeline_url: String,
    pub startup_ensure_deployed: bool,
    /// Empty disables the permission service integration.
    pub permissions_v2_url: String,
    pub permissions_admin_token: String,
    /// Empty keeps instances in memory only.
    pub store_path: String,
    pub call_timeout_secs: u64,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: "8080".to_string(),
            kafka_bootstrap: String::new(),
            mqtt_broker: String::new(),
            mqtt_user: String::new(),
            mqtt_pw: String::new(),
            transfer_image: String::new(),
            deploy_mode: "docker".to_string(),
            docker_network: String::new(),
            docker_pull: false,
            rancher_url: String::new(),
            rancher_access_key: String::new(),
            rancher_secret_key: String::new(),
            rancher_stack_id: String::new(),
            rancher_namespace_id: String::new(),
            rancher_project_id: String::new(),
            rancher_insecure_tls: true,
            verify_input: false,
            import_deploy_url: String::new(),
            analytics_pipeline_url: String::new(),
            startup_ensure_deployed: false,
            permissions_v2_url: String::new(),
            permissions_admin_token: String::new(),
            store_path: String::new(),
            call_timeout_secs: 10,
            debug: false,
        }
    }
}

type Apply = Box<dyn Fn(&mut Config, &str) -> Result<(), String>>;

/// One `ENV_NAME -> field` override entry.
struct EnvOverride {
    name: &'static str,
    apply: Apply,
}

impl EnvOverride {
    fn text(name: &'static str, field: fn(&mut Config) -> &mut String) -> Self {
        Self {
            name,
            apply: Box::new(move |config: &mut Config, value: &str| {
                *field(config) = value.to_string();
                Ok(())
            }),
        }
    }

    fn flag(name: &'static str, field: fn(&mut Config) -> &mut bool) -> Self {
        Self {
            name,
            apply: Box::new(move |config: &mut Config, value: &str| {
                *field(config) = value
                    .trim()
                    .parse()
                    .map_err(|_| format!("expected true or false, got {value:?}"))?;
                Ok(())
            }),
        }
    }

    fn number(name: &'static str, field: fn(&mut Config) -> &mut u64) -> Self {
        Self {
            name,
            apply: Box::new(move |config: &mut Config, value: &str| {
                *field(config) = value
                    .trim()
                    .parse()
                    .map_err(|_| format!("expected an unsigned integer, got {value:?}"))?;
                Ok(())
            }),
        }
    }
}

fn env_overrides() -> Vec<EnvOverride> {
    vec![
        EnvOverride::text("API_PORT", |c| &mut c.api_port),
        EnvOverride::text("KAFKA_BOOTSTRAP", |c| &mut c.kafka_bootstrap),
        EnvOverride::text("MQTT_BROKER", |c| &mut c.mqtt_broker),
        EnvOverride::text("MQTT_USER", |c| &mut c.mqtt_user),
        EnvOverride::text("MQTT_PW", |c| &mut c.mqtt_pw),
        EnvOverride::text("TRANSFER_IMAGE", |c| &mut c.transfer_image),
        EnvOverride::text("DEPLOY_MODE", |c| &mut c.deploy_mode),
        EnvOverride::text("DOCKER_NETWORK", |c| &mut c.docker_network),
        EnvOverride::flag("DOCKER_PULL", |c| &mut c.docker_pull),
        EnvOverride::text("RANCHER_URL", |c| &mut c.rancher_url),
        EnvOverride::text("RANCHER_ACCESS_KEY", |c| &mut c.rancher_access_key),
        EnvOverride::text("RANCHER_SECRET_KEY", |c| &mut c.rancher_secret_key),
        EnvOverride::text("RANCHER_STACK_ID", |c| &mut c.rancher_stack_id),
        EnvOverride::text("RANCHER_NAMESPACE_ID", |c| &mut c.rancher_namespace_id),
        EnvOverride::text("RANCHER_PROJECT_ID", |c| &mut c.rancher_project_id),
        EnvOverride::flag("RANCHER_INSECURE_TLS", |c| &mut c.rancher_insecure_tls),
        EnvOverride::flag("VERIFY_INPUT", |c| &mut c.verify_input),
        EnvOverride::text("IMPORT_DEPLOY_URL", |c| &mut c.import_deploy_url),
        EnvOverride::text("ANALYTICS_PIPELINE_URL", |c| &mut c.analytics_pipeline_url),
        EnvOverride::flag("STARTUP_ENSURE_DEPLOYED", |c| &mut c.startup_ensure_deployed),
        EnvOverride::text("PERMISSIONS_V2_URL", |c| &mut c.permissions_v2_url),
        EnvOverride::text("PERMISSIONS_ADMIN_TOKEN", |c| &mut c.permissions_admin_token),
        EnvOverride::text("STORE_PATH", |c| &mut c.store_path),
        EnvOverride::number("CALL_TIMEOUT_SECS", |c| &mut c.call_timeout_secs),
        EnvOverride::flag("DEBUG", |c| &mut c.debug),
    ]
}

impl Config {
    /// Loads the file named by `CONFIG_PATH` (or `config.json`) and applies
    /// process environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load(explicit.as_deref(), |name| std::env::var(name).ok())
    }

    /// `explicit` must exist when given; the default location may be absent.
    pub fn load(
        explicit: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::read_file(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::read_file(path)?
                } else {
                    Config::default()
                }
            }
        };
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        for entry in env_overrides() {
            if let Some(value) = lookup(entry.name).filter(|v| !v.is_empty()) {
                (entry.apply)(self, &value).map_err(|reason| ConfigError::InvalidValue {
                    name: entry.name,
                    reason,
                })?;
            }
        }
        Ok(())
    }

    pub fn backend_kind(&self) -> Result<BackendKind, ConfigError> {
        self.deploy_mode
            .parse()
            .map_err(|e: k2m_core::CoreError| ConfigError::InvalidValue {
                name: "DEPLOY_MODE",
                reason: e.to_string(),
            })
    }

    pub fn port(&self) -> Result<u16, ConfigError> {
        self.api_port.parse().map_err(|_| ConfigError::InvalidValue {
            name: "API_PORT",
            reason: format!("not a port number: {:?}", self.api_port),
        })
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn permissions_enabled(&self) -> bool {
        !self.permissions_v2_url.is_empty()
    }

    /// Startup checks across fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.port()?;
        let kind = self.backend_kind()?;

        if self.call_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "CALL_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if kind != BackendKind::InMemory && self.transfer_image.is_empty() {
            return Err(ConfigError::Invalid(
                "transfer_image is required".to_string(),
            ));
        }
        if self.verify_input {
            require(&[
                ("permissions_v2_url", &self.permissions_v2_url),
                ("analytics_pipeline_url", &self.analytics_pipeline_url),
                ("import_deploy_url", &self.import_deploy_url),
            ])
            .map_err(|missing| {
                ConfigError::Invalid(format!("verify_input requires {missing}"))
            })?;
        }

        let rancher_fields: Vec<(&str, &String)> = match kind {
            BackendKind::RancherV1 => vec![
                ("rancher_url", &self.rancher_url),
                ("rancher_access_key", &self.rancher_access_key),
                ("rancher_secret_key", &self.rancher_secret_key),
                ("rancher_stack_id", &self.rancher_stack_id),
            ],
            BackendKind::RancherV2 => vec![
                ("rancher_url", &self.rancher_url),
                ("rancher_access_key", &self.rancher_access_key),
                ("rancher_secret_key", &self.rancher_secret_key),
                ("rancher_namespace_id", &self.rancher_namespace_id),
                ("rancher_project_id", &self.rancher_project_id),
            ],
            BackendKind::DockerEngine | BackendKind::InMemory => Vec::new(),
        };
        require(&rancher_fields).map_err(|missing| {
            ConfigError::Invalid(format!("deploy_mode {kind} requires {missing}"))
        })?;

        Ok(())
    }

    pub fn backend_settings(&self) -> Result<BackendSettings, ConfigError> {
        let settings = match self.backend_kind()? {
            BackendKind::DockerEngine => BackendSettings::DockerEngine(DockerEngineSettings {
                network: Some(self.docker_network.clone()).filter(|n| !n.is_empty()),
                pull: self.docker_pull,
            }),
            BackendKind::RancherV1 => BackendSettings::RancherV1(RancherV1Settings {
                url: self.rancher_url.clone(),
                access_key: self.rancher_access_key.clone(),
                secret_key: self.rancher_secret_key.clone(),
                stack_id: self.rancher_stack_id.clone(),
                timeout: self.call_timeout(),
            }),
            BackendKind::RancherV2 => BackendSettings::RancherV2(RancherV2Settings {
                url: self.rancher_url.clone(),
                access_key: self.rancher_access_key.clone(),
                secret_key: self.rancher_secret_key.clone(),
                namespace_id: self.rancher_namespace_id.clone(),
                project_id: self.rancher_project_id.clone(),
                accept_invalid_certs: self.rancher_insecure_tls,
                timeout: self.call_timeout(),
            }),
            BackendKind::InMemory => BackendSettings::InMemory,
        };
        Ok(settings)
    }
}

fn require(fields: &[(&str, &String)]) -> Result<(), String> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn temp_config(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("k2m-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_port, "8080");
        assert_eq!(config.deploy_mode, "docker");
        assert!(config.rancher_insecure_tls);
        assert_eq!(config.call_timeout(), Duration::from_secs(10));
        assert!(!config.permissions_enabled());
    }

    #[test]
    fn test_file_values_and_env_overrides() {
        let path = temp_config(
            r#"{"kafka_bootstrap":"kafka:9092","transfer_image":"bridge:1","docker_pull":true}"#,
        );
        let env: HashMap<&str, &str> =
            HashMap::from([("TRANSFER_IMAGE", "bridge:2"), ("CALL_TIMEOUT_SECS", "3")]);

        let config = Config::load(Some(&path), |name| env.get(name).map(|v| v.to_string())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.kafka_bootstrap, "kafka:9092");
        assert_eq!(config.transfer_image, "bridge:2");
        assert!(config.docker_pull);
        assert_eq!(config.call_timeout_secs, 3);
        assert_eq!(config.api_port, "8080");
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let path = temp_config(r#"{"transfer_image":"bridge:1","docker_pull":true}"#);
        let env: HashMap<&str, &str> = HashMap::from([
            ("DOCKER_PULL", ""),
            ("TRANSFER_IMAGE", ""),
            ("CALL_TIMEOUT_SECS", ""),
        ]);

        let config = Config::load(Some(&path), |name| env.get(name).map(|v| v.to_string())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(config.docker_pull);
        assert_eq!(config.transfer_image, "bridge:1");
        assert_eq!(config.call_timeout_secs, 10);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let path = std::env::temp_dir().join("k2m-config-does-not-exist.json");
        assert!(matches!(
            Config::load(Some(&path), no_env),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_invalid_flag_fails() {
        let result = Config::load(None, |name| (name == "DOCKER_PULL").then(|| "yes".to_string()));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { name: "DOCKER_PULL", .. })
        ));
    }

    #[test]
    fn test_validate_requires_verification_urls() {
        let config = Config {
            transfer_image: "bridge".to_string(),
            verify_input: true,
            permissions_v2_url: "http://perm".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("analytics_pipeline_url"));
        assert!(err.contains("import_deploy_url"));
    }

    #[test]
    fn test_validate_rancher_settings() {
        let config = Config {
            transfer_image: "bridge".to_string(),
            deploy_mode: "rancher2".to_string(),
            rancher_url: "https://rancher/v3/".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            rancher_access_key: "a".to_string(),
            rancher_secret_key: "s".to_string(),
            rancher_namespace_id: "ns".to_string(),
            rancher_project_id: "p".to_string(),
            ..config
        };
        config.validate().unwrap();
        assert!(matches!(
            config.backend_settings().unwrap(),
            BackendSettings::RancherV2(RancherV2Settings {
                accept_invalid_certs: true,
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_mode() {
        let config = Config {
            transfer_image: "bridge".to_string(),
            deploy_mode: "nomad".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { name: "DEPLOY_MODE", .. })
        ));
    }

    #[test]
    fn test_memory_mode_needs_no_image() {
        let config = Config {
            deploy_mode: "memory".to_string(),
            ..Default::default()
        };
        config.validate().unwrap();
        assert!(matches!(config.backend_settings().unwrap(), BackendSettings::InMemory));
    }

    #[test]
    fn test_docker_settings_skip_empty_network() {
        let config = Config {
            docker_pull: true,
            ..Default::default()
        };
        match config.backend_settings().unwrap() {
            BackendSettings::DockerEngine(settings) => {
                assert_eq!(settings.network, None);
                assert!(settings.pull);
            }
            other => panic!("unexpected settings: {other:?}"),
        }
    }
}
