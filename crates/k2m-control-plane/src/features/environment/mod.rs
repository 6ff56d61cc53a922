//! Environment handed to a bridge workload.
//!
//! Derivation is split into pure resolution steps ([`resolve_filter`],
//! [`resolve_mqtt_target`]) that reject invalid instances before any network
//! call, followed by the optional upstream probe.

use crate::features::verification::ExistenceVerifier;
use crate::shared::config::Config;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::timeout::bounded;
use crate::shared::types::{Caller, Instance};
use k2m_core::{Environment, FilterType};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub const KAFKA_BOOTSTRAP: &str = "KAFKA_BOOTSTRAP";
pub const KAFKA_TOPIC: &str = "KAFKA_TOPIC";
pub const KAFKA_GROUP_ID: &str = "KAFKA_GROUP_ID";
pub const KAFKA_OFFSET: &str = "KAFKA_OFFSET";
pub const FILTER_QUERY: &str = "FILTER_QUERY";
pub const MQTT_BROKER: &str = "MQTT_BROKER";
pub const MQTT_USER: &str = "MQTT_USER";
pub const MQTT_PW: &str = "MQTT_PW";
pub const MQTT_CLIENT_ID: &str = "MQTT_CLIENT_ID";
pub const MQTT_QOS: &str = "MQTT_QOS";
pub const MQTT_TOPIC_MAPPING: &str = "MQTT_TOPIC_MAPPING";
pub const DEBUG: &str = "DEBUG";

/// Global inputs of the derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSettings {
    pub kafka_bootstrap: String,
    pub mqtt_broker: String,
    pub mqtt_user: String,
    pub mqtt_pw: String,
    pub verify_input: bool,
    pub debug: bool,
    pub call_timeout: Duration,
}

impl EnvironmentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            kafka_bootstrap: config.kafka_bootstrap.clone(),
            mqtt_broker: config.mqtt_broker.clone(),
            mqtt_user: config.mqtt_user.clone(),
            mqtt_pw: config.mqtt_pw.clone(),
            verify_input: config.verify_input,
            debug: config.debug,
            call_timeout: config.call_timeout(),
        }
    }
}

/// Upstream entity a filter refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Device(String),
    Pipeline(String),
    Import(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPlan {
    pub query: String,
    pub probe: Probe,
}

/// Builds the record filter of `instance`.
pub fn resolve_filter(instance: &Instance) -> ControlPlaneResult<FilterPlan> {
    let kind = instance
        .parsed_filter_type()
        .map_err(ControlPlaneError::ValidationError)?;

    let plan = match kind {
        FilterType::DeviceId => FilterPlan {
            query: format!(".device_id==\"{}\"", instance.filter),
            probe: Probe::Device(instance.filter.clone()),
        },
        FilterType::OperatorId => {
            let parts: Vec<&str> = instance.filter.split(':').collect();
            let [pipeline, operator] = parts.as_slice() else {
                return Err(ControlPlaneError::ValidationError(
                    "filterType is operatorId, but filter has not exactly two parts".to_string(),
                ));
            };
            FilterPlan {
                query: format!(".pipeline_id==\"{pipeline}\"and.operator_id==\"{operator}\""),
                probe: Probe::Pipeline(pipeline.to_string()),
            }
        }
        FilterType::ImportId => FilterPlan {
            query: format!(".import_id==\"{}\"", instance.filter),
            probe: Probe::Import(instance.filter.clone()),
        },
    };
    Ok(plan)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttTarget {
    pub broker: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub base_topic: String,
}

/// Picks the broker and base topic of `instance`.
pub fn resolve_mqtt_target(
    instance: &Instance,
    settings: &EnvironmentSettings,
) -> ControlPlaneResult<MqttTarget> {
    let default_base = format!("export/{}/{}/", instance.user_id, instance.id);

    match &instance.custom_mqtt_broker {
        Some(broker) => {
            let base_topic = match instance.custom_mqtt_base_topic.as_deref() {
                Some(topic) if !topic.is_empty() && !topic.ends_with('/') => format!("{topic}/"),
                Some(topic) => topic.to_string(),
                None => default_base,
            };
            Ok(MqttTarget {
                broker: broker.clone(),
                user: instance.custom_mqtt_user.clone(),
                password: instance.custom_mqtt_password.clone(),
                base_topic,
            })
        }
        None if instance.has_custom_mqtt_options() => Err(ControlPlaneError::ValidationError(
            "must not set custom mqtt options with default broker".to_string(),
        )),
        None => Ok(MqttTarget {
            broker: settings.mqtt_broker.clone(),
            user: Some(settings.mqtt_user.clone()),
            password: Some(settings.mqtt_pw.clone()),
            base_topic: default_base,
        }),
    }
}

#[derive(Serialize)]
struct TopicMapping {
    query: String,
    topic: String,
}

fn topic_mapping(instance: &Instance, base_topic: &str) -> ControlPlaneResult<String> {
    let mappings: Vec<TopicMapping> = instance
        .values
        .iter()
        .map(|value| TopicMapping {
            query: format!(".{}", value.path),
            topic: format!("{base_topic}{}", value.name),
        })
        .collect();
    serde_json::to_string(&mappings).map_err(|e| ControlPlaneError::ValidationError(e.to_string()))
}

async fn verify(
    probe: &Probe,
    caller: &Caller,
    settings: &EnvironmentSettings,
    verifier: &dyn ExistenceVerifier,
) -> ControlPlaneResult<()> {
    let (found, what) = match probe {
        Probe::Device(id) => (
            bounded(
                settings.call_timeout,
                "verifier.verify_device",
                verifier.verify_device(id, &caller.token),
            )
            .await?,
            "device",
        ),
        Probe::Pipeline(id) => (
            bounded(
                settings.call_timeout,
                "verifier.verify_pipeline",
                verifier.verify_pipeline(id, &caller.token, &caller.user_id),
            )
            .await?,
            "pipeline",
        ),
        Probe::Import(id) => (
            bounded(
                settings.call_timeout,
                "verifier.verify_import",
                verifier.verify_import(id, &caller.token, &caller.user_id),
            )
            .await?,
            "import",
        ),
    };

    if found {
        Ok(())
    } else {
        Err(ControlPlaneError::VerificationFailed(format!(
            "filtered {what} not found"
        )))
    }
}

/// Derives the workload environment of `instance`.
///
/// The filter target is probed only when both `verify` and the global
/// `verify_input` setting are on.
pub async fn derive_environment(
    instance: &Instance,
    caller: &Caller,
    verify_filter: bool,
    settings: &EnvironmentSettings,
    verifier: &dyn ExistenceVerifier,
) -> ControlPlaneResult<Environment> {
    let filter = resolve_filter(instance)?;
    let target = resolve_mqtt_target(instance, settings)?;

    if verify_filter && settings.verify_input {
        debug!(instance_id = %instance.id, probe = ?filter.probe, "Verifying filter target");
        verify(&filter.probe, caller, settings, verifier).await?;
    }

    let mut env = Environment::new();
    env.insert(KAFKA_BOOTSTRAP.into(), settings.kafka_bootstrap.clone());
    env.insert(KAFKA_TOPIC.into(), instance.topic.clone());
    env.insert(
        KAFKA_GROUP_ID.into(),
        instance.effective_consumer_group_id().to_string(),
    );
    env.insert(KAFKA_OFFSET.into(), instance.offset.clone());
    env.insert(FILTER_QUERY.into(), filter.query);
    env.insert(MQTT_BROKER.into(), target.broker);
    if let Some(user) = target.user {
        env.insert(MQTT_USER.into(), user);
    }
    if let Some(password) = target.password {
        env.insert(MQTT_PW.into(), password);
    }
    env.insert(MQTT_CLIENT_ID.into(), instance.id.clone());
    env.insert(MQTT_QOS.into(), "1".into());
    env.insert(
        MQTT_TOPIC_MAPPING.into(),
        topic_mapping(instance, &target.base_topic)?,
    );
    env.insert(DEBUG.into(), settings.debug.to_string());
    Ok(env)
}
