use crate::hass_mqtt::base::{AvailabilityTopic, Device, EntityConfig, Origin};
use crate::hass_mqtt::instance::{publish_entity_config, EntityInstance};
use crate::service::hass::{topic_safe_string, HassClient};
use crate::service::hass_gc::PublishedEntity;
use crate::service::state::StateHandle;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Serialize, Clone, Debug)]
pub struct SensorConfig {
    #[serde(flatten)]
    pub base: EntityConfig,

    pub state_topic: String,
}

impl SensorConfig {
    pub async fn publish(
        &self,
        state: &StateHandle,
        client: &HassClient,
    ) -> anyhow::Result<PublishedEntity> {
        publish_entity_config("sensor", state, client, &self.base, self).await
    }

    pub async fn notify_state(&self, client: &HassClient, value: &str) -> anyhow::Result<()> {
        client.publish(&self.state_topic, value).await
    }
}

/// A diagnostic sensor attached to the service device whose
/// value never changes while we are running
#[derive(Clone)]
pub struct GlobalFixedDiagnostic {
    sensor: SensorConfig,
    value: String,
}

#[async_trait]
impl EntityInstance for GlobalFixedDiagnostic {
    async fn publish_config(
        &self,
        state: &StateHandle,
        client: &HassClient,
    ) -> anyhow::Result<PublishedEntity> {
        self.sensor.publish(state, client).await
    }

    async fn notify_state(&self, client: &HassClient) -> anyhow::Result<()> {
        self.sensor.notify_state(client, &self.value).await
    }
}

impl GlobalFixedDiagnostic {
    pub fn new<NAME: Into<String>, VALUE: Into<String>>(name: NAME, value: VALUE) -> Self {
        let name = name.into();
        let unique_id = format!("remo2mqtt-global-{}", topic_safe_string(&name));

        Self {
            sensor: SensorConfig {
                base: EntityConfig {
                    availability: AvailabilityTopic::global(),
                    availability_mode: None,
                    name: Some(name),
                    entity_category: Some("diagnostic".to_string()),
                    origin: Origin::default(),
                    device: Device::this_service(),
                    unique_id: unique_id.clone(),
                    icon: None,
                },
                state_topic: format!("remo2mqtt/sensor/{unique_id}/state"),
            },
            value: value.into(),
        }
    }
}

#[cfg(test)]
#[test]
fn test_global_fixed_diagnostic() {
    let diag = GlobalFixedDiagnostic::new("Version", "1.2.3");
    let config = serde_json::to_value(&diag.sensor).unwrap();
    k9::assert_equal!(config["unique_id"], serde_json::json!("remo2mqtt-global-version"));
    k9::assert_equal!(
        config["state_topic"],
        serde_json::json!("remo2mqtt/sensor/remo2mqtt-global-version/state")
    );
    k9::assert_equal!(config["entity_category"], serde_json::json!("diagnostic"));
    k9::assert_equal!(config["name"], serde_json::json!("Version"));
}
