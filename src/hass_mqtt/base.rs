use crate::hass_mqtt::remote::DeviceInfo;
use crate::service::hass::{availability_topic, topic_safe_string};
use crate::version_info::remo_version;
use serde::Serialize;

const MODEL: &str = "remo2mqtt";

#[derive(Serialize, Clone, Debug, Default)]
pub struct EntityConfig {
    pub availability: Vec<AvailabilityTopic>,
    /// When more than one availability topic is listed, "all" requires
    /// each of them to report online
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_mode: Option<&'static str>,
    pub name: Option<String>,
    pub origin: Origin,
    pub device: Device,
    pub unique_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct AvailabilityTopic {
    pub topic: String,
}

impl AvailabilityTopic {
    /// The service-wide topic that carries our last-will
    pub fn global() -> Vec<Self> {
        vec![Self {
            topic: availability_topic(),
        }]
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct Origin {
    pub name: &'static str,
    pub sw_version: &'static str,
}

impl Default for Origin {
    fn default() -> Self {
        Self {
            name: MODEL,
            sw_version: remo_version(),
        }
    }
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct Device {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via_device: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<String>,
}

impl Device {
    pub fn for_appliance(info: &DeviceInfo) -> Self {
        Self {
            name: info.name.to_string(),
            manufacturer: info.manufacturer.clone(),
            model: info.model.clone(),
            sw_version: None,
            via_device: Some(MODEL.to_string()),
            identifiers: vec![format!(
                "{MODEL}-{}",
                topic_safe_string(&info.identifier)
            )],
        }
    }

    pub fn this_service() -> Self {
        Self {
            name: "Remo to MQTT".to_string(),
            manufacturer: Some(MODEL.to_string()),
            model: Some(MODEL.to_string()),
            sw_version: Some(remo_version().to_string()),
            via_device: None,
            identifiers: vec![MODEL.to_string()],
        }
    }
}
