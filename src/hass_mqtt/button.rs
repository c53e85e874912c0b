use crate::hass_mqtt::base::{AvailabilityTopic, Device, EntityConfig, Origin};
use crate::hass_mqtt::instance::{publish_entity_config, EntityInstance};
use crate::service::hass::{topic_safe_string, HassClient};
use crate::service::hass_gc::PublishedEntity;
use crate::service::state::StateHandle;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Serialize, Clone, Debug)]
pub struct ButtonConfig {
    #[serde(flatten)]
    pub base: EntityConfig,

    pub command_topic: String,
}

impl ButtonConfig {
    /// A button that belongs to the service itself rather than
    /// to any appliance
    pub fn global_button<NAME: Into<String>, TOPIC: Into<String>>(
        name: NAME,
        topic: TOPIC,
    ) -> Self {
        let name = name.into();
        let unique_id = format!("remo2mqtt-global-{}", topic_safe_string(&name));
        Self {
            base: EntityConfig {
                availability: AvailabilityTopic::global(),
                availability_mode: None,
                name: Some(name),
                entity_category: Some("config".to_string()),
                origin: Origin::default(),
                device: Device::this_service(),
                unique_id,
                icon: None,
            },
            command_topic: topic.into(),
        }
    }
}

#[async_trait]
impl EntityInstance for ButtonConfig {
    async fn publish_config(
        &self,
        state: &StateHandle,
        client: &HassClient,
    ) -> anyhow::Result<PublishedEntity> {
        publish_entity_config("button", state, client, &self.base, self).await
    }

    async fn notify_state(&self, _client: &HassClient) -> anyhow::Result<()> {
        // Buttons have no state
        Ok(())
    }
}

#[cfg(test)]
#[test]
fn test_global_button() {
    let button = ButtonConfig::global_button("Refresh Appliances", "remo2mqtt/refresh");
    k9::assert_equal!(
        button.base.unique_id,
        "remo2mqtt-global-refresh_appliances".to_string()
    );
    let config = serde_json::to_value(&button).unwrap();
    k9::assert_equal!(config["command_topic"], serde_json::json!("remo2mqtt/refresh"));
    k9::assert_equal!(
        config["availability"],
        serde_json::json!([{"topic": "remo2mqtt/availability"}])
    );
    k9::assert_equal!(config["entity_category"], serde_json::json!("config"));
}
