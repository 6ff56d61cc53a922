use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace prefix of every server-generated instance id.
pub const ID_PREFIX: &str = "urn:infai:ses:broker-export:";

/// Prefix of the workload name derived from an instance id.
pub const WORKLOAD_NAME_PREFIX: &str = "k2m-";

/// Offset value that makes the bridge replay the topic from the beginning.
pub const OFFSET_SMALLEST: &str = "smallest";

/// Environment handed to a spawned bridge workload. Ordered so that every
/// backend receives the entries in the same sequence.
pub type Environment = BTreeMap<String, String>;

/// Kind of record filter applied by the bridge to the source topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterType {
    DeviceId,
    OperatorId,
    ImportId,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::DeviceId => "deviceId",
            FilterType::OperatorId => "operatorId",
            FilterType::ImportId => "import_id",
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deviceId" => Ok(FilterType::DeviceId),
            "operatorId" => Ok(FilterType::OperatorId),
            "import_id" => Ok(FilterType::ImportId),
            other => Err(format!("unknown filterType: {other}")),
        }
    }
}

/// One value extracted from a record and published on its own sub-topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Path")]
    pub path: String,
}

impl Value {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// A declared Kafka-to-MQTT export.
///
/// `user_id`, `service_id` and `consumer_group_id` are managed by the control
/// plane and never read from or written to client JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "EntityName", default)]
    pub entity_name: String,
    #[serde(rename = "ServiceName", default)]
    pub service_name: String,
    #[serde(
        rename = "Description",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub description: String,
    #[serde(rename = "Topic", default)]
    pub topic: String,
    #[serde(rename = "Offset", default)]
    pub offset: String,
    #[serde(rename = "FilterType", default)]
    pub filter_type: String,
    #[serde(rename = "Filter", default)]
    pub filter: String,
    #[serde(rename = "Values", default)]
    pub values: Vec<Value>,
    #[serde(rename = "generated", default)]
    pub generated: bool,
    #[serde(
        rename = "CustomMqttBroker",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_mqtt_broker: Option<String>,
    #[serde(
        rename = "CustomMqttUser",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_mqtt_user: Option<String>,
    #[serde(
        rename = "CustomMqttPassword",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_mqtt_password: Option<String>,
    #[serde(
        rename = "CustomMqttBaseTopic",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_mqtt_base_topic: Option<String>,
    #[serde(skip)]
    pub user_id: String,
    #[serde(skip)]
    pub service_id: String,
    #[serde(skip)]
    pub consumer_group_id: Option<String>,
    #[serde(rename = "CreatedAt", default = "epoch")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "UpdatedAt", default = "epoch")]
    pub updated_at: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

impl Default for Instance {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            entity_name: String::new(),
            service_name: String::new(),
            description: String::new(),
            topic: String::new(),
            offset: String::new(),
            filter_type: String::new(),
            filter: String::new(),
            values: Vec::new(),
            generated: false,
            custom_mqtt_broker: None,
            custom_mqtt_user: None,
            custom_mqtt_password: None,
            custom_mqtt_base_topic: None,
            user_id: String::new(),
            service_id: String::new(),
            consumer_group_id: None,
            created_at: epoch(),
            updated_at: epoch(),
        }
    }
}

impl Instance {
    /// Parsed filter kind, or the rejection message for an unknown one.
    pub fn parsed_filter_type(&self) -> Result<FilterType, String> {
        self.filter_type.parse()
    }

    /// Consumer group the bridge joins; the instance id unless rotated.
    pub fn effective_consumer_group_id(&self) -> &str {
        self.consumer_group_id.as_deref().unwrap_or(&self.id)
    }

    /// Name of the runtime unit that executes this instance.
    pub fn workload_name(&self) -> String {
        workload_name(&self.id)
    }

    /// Appends the missing trailing `/` to a non-empty custom base topic.
    pub fn normalize_custom_base_topic(&mut self) {
        if let Some(topic) = self.custom_mqtt_base_topic.as_mut() {
            if !topic.is_empty() && !topic.ends_with('/') {
                topic.push('/');
            }
        }
    }

    /// Whether any custom MQTT option besides the broker is set.
    pub fn has_custom_mqtt_options(&self) -> bool {
        self.custom_mqtt_user.is_some()
            || self.custom_mqtt_password.is_some()
            || self.custom_mqtt_base_topic.is_some()
    }
}

/// Generates a fresh namespaced instance id.
pub fn generate_instance_id() -> String {
    format!("{ID_PREFIX}{}", Uuid::new_v4())
}

/// Generates a consumer group id that has never been used for `instance_id`.
pub fn rotated_consumer_group_id(instance_id: &str) -> String {
    format!("{instance_id}_{}", Uuid::new_v4())
}

pub fn workload_name(instance_id: &str) -> String {
    format!(
        "{WORKLOAD_NAME_PREFIX}{}",
        instance_id.strip_prefix(ID_PREFIX).unwrap_or(instance_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_type_round_trips_wire_names() {
        for kind in [
            FilterType::DeviceId,
            FilterType::OperatorId,
            FilterType::ImportId,
        ] {
            assert_eq!(kind.as_str().parse::<FilterType>(), Ok(kind));
        }
    }

    #[test]
    fn test_filter_type_rejects_unknown_kind() {
        assert!("device_id".parse::<FilterType>().is_err());
        assert!("".parse::<FilterType>().is_err());
    }

    #[test]
    fn test_generated_id_carries_prefix() {
        let id = generate_instance_id();
        assert!(id.starts_with(ID_PREFIX));
        assert_ne!(id, generate_instance_id());
    }

    #[test]
    fn test_workload_name_strips_prefix() {
        let id = format!("{ID_PREFIX}abc-123");
        assert_eq!(workload_name(&id), "k2m-abc-123");
        assert_eq!(workload_name("plain"), "k2m-plain");
    }

    #[test]
    fn test_rotated_group_id_is_prefixed_and_unique() {
        let first = rotated_consumer_group_id("inst");
        let second = rotated_consumer_group_id("inst");
        assert!(first.starts_with("inst_"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_effective_consumer_group_defaults_to_id() {
        let mut instance = Instance {
            id: "inst-1".to_string(),
            ..Default::default()
        };
        assert_eq!(instance.effective_consumer_group_id(), "inst-1");

        instance.consumer_group_id = Some("inst-1_x".to_string());
        assert_eq!(instance.effective_consumer_group_id(), "inst-1_x");
    }

    #[test]
    fn test_normalize_custom_base_topic() {
        let mut instance = Instance {
            custom_mqtt_base_topic: Some("base".to_string()),
            ..Default::default()
        };
        instance.normalize_custom_base_topic();
        assert_eq!(instance.custom_mqtt_base_topic.as_deref(), Some("base/"));

        instance.normalize_custom_base_topic();
        assert_eq!(instance.custom_mqtt_base_topic.as_deref(), Some("base/"));

        instance.custom_mqtt_base_topic = Some(String::new());
        instance.normalize_custom_base_topic();
        assert_eq!(instance.custom_mqtt_base_topic.as_deref(), Some(""));
    }

    #[test]
    fn test_managed_fields_never_leave_or_enter_json() {
        let instance = Instance {
            id: "inst-1".to_string(),
            user_id: "owner".to_string(),
            service_id: "svc".to_string(),
            consumer_group_id: Some("group".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&instance).unwrap();
        assert_eq!(json["ID"], "inst-1");
        assert!(json.get("UserId").is_none());
        assert!(json.get("ServiceId").is_none());

        let parsed: Instance = serde_json::from_str(
            r#"{"ID":"x","UserId":"attacker","ServiceId":"evil","generated":true}"#,
        )
        .unwrap();
        assert!(parsed.user_id.is_empty());
        assert!(parsed.service_id.is_empty());
        assert!(parsed.generated);
    }

    #[test]
    fn test_deserializes_client_body() {
        let body = r#"{
            "Name": "export",
            "FilterType": "deviceId",
            "Filter": "dev-1",
            "Topic": "t",
            "Offset": "largest",
            "Values": [{"Name": "temp", "Path": "value.temp"}],
            "CustomMqttBroker": "tcp://broker:1883"
        }"#;
        let instance: Instance = serde_json::from_str(body).unwrap();
        assert_eq!(instance.parsed_filter_type(), Ok(FilterType::DeviceId));
        assert_eq!(instance.values, vec![Value::new("temp", "value.temp")]);
        assert_eq!(
            instance.custom_mqtt_broker.as_deref(),
            Some("tcp://broker:1883")
        );
        assert!(instance.id.is_empty());
    }
}
