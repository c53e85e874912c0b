//! TV remotes.
//!
//! Each appliance of type TV becomes one `TvRemote`. Home Assistant has
//! no MQTT remote platform, so the remote is surfaced as a `select`
//! whose options are the TV's button names; choosing an option sends
//! that button. The command topic also accepts a JSON list of buttons,
//! of which only the first is sent.

use crate::cloud_api::{is_empty_response, Button, RemoApi};
use crate::hass_mqtt::base::{AvailabilityTopic, Device, EntityConfig, Origin};
use crate::hass_mqtt::instance::{
    publish_entity_config, EntityInstance, WriteStateRequest, WriteStateSender,
};
use crate::service::appliance::LinkedAppliance;
use crate::service::coordinator::CoordinatorHandle;
use crate::service::hass::{topic_safe_string, HassClient};
use crate::service::hass_gc::PublishedEntity;
use crate::service::state::StateHandle;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Present when the service asks for the TV platform to be set up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryInfo;

/// Creates a TvRemote for each TV in the coordinator's current snapshot
/// and hands them, as a single batch, to `add_entities`.
/// Does nothing at all when `discovery_info` is None.
pub fn setup_tv_platform<F>(
    discovery_info: Option<DiscoveryInfo>,
    coordinator: &CoordinatorHandle,
    api: &Arc<dyn RemoApi>,
    add_entities: F,
) where
    F: FnOnce(Vec<TvRemote>),
{
    if discovery_info.is_none() {
        return;
    }
    log::debug!("Setting up TV platform.");

    let data = coordinator.data();
    let remotes = data
        .sorted()
        .into_iter()
        .filter(|appliance| appliance.is_tv())
        .map(|appliance| TvRemote::new(coordinator.clone(), api.clone(), appliance.clone()))
        .collect();

    add_entities(remotes);
}

/// A button press request; either a single button name or a
/// sequence of names, of which only the first is used.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum RemoteCommand {
    Single(String),
    Sequence(Vec<String>),
}

impl RemoteCommand {
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Single(command) => Some(command),
            Self::Sequence(commands) => commands.first().map(|c| c.as_str()),
        }
    }

    /// Interpret an MQTT payload. JSON strings and lists of strings are
    /// decoded; anything else is taken verbatim as a button name.
    pub fn from_payload(payload: &str) -> Self {
        serde_json::from_str(payload).unwrap_or_else(|_| Self::Single(payload.to_string()))
    }
}

impl From<&str> for RemoteCommand {
    fn from(command: &str) -> Self {
        Self::Single(command.to_string())
    }
}

impl From<Vec<String>> for RemoteCommand {
    fn from(commands: Vec<String>) -> Self {
        Self::Sequence(commands)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command '{command}' not valid for TV {name}")]
    Invalid { command: String, name: String },
    #[error("No command given for TV {name}")]
    Missing { name: String },
    #[error("Failed to send command '{command}' to TV {name}: {reason}")]
    Failed {
        command: String,
        name: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAttributes {
    pub commands: Vec<String>,
}

#[derive(Serialize, Clone, Debug)]
pub struct RemoteConfig {
    #[serde(flatten)]
    pub base: EntityConfig,

    pub command_topic: String,
    /// Only ever carries "None", so that the select shows no current
    /// option and picking the same button twice sends it twice
    pub state_topic: String,
    pub options: Vec<String>,
    pub json_attributes_topic: String,
}

pub struct TvRemote {
    base: LinkedAppliance,
    api: Arc<dyn RemoApi>,
    name: String,
    buttons: Vec<Button>,
    available: bool,
    write_state: OnceCell<WriteStateSender>,
}

impl TvRemote {
    pub fn new(
        coordinator: CoordinatorHandle,
        api: Arc<dyn RemoApi>,
        appliance: crate::cloud_api::Appliance,
    ) -> Self {
        let name = appliance.display_name();
        let buttons = appliance.tv_buttons().to_vec();
        Self {
            base: LinkedAppliance::new(coordinator, appliance),
            api,
            name,
            buttons,
            available: true,
            write_state: OnceCell::new(),
        }
    }

    pub fn base(&self) -> &LinkedAppliance {
        &self.base
    }

    pub fn id(&self) -> &str {
        self.base.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn device_info(&self) -> DeviceInfo {
        let appliance = self.base.appliance();
        DeviceInfo {
            identifier: self.id().to_string(),
            name: self.name.to_string(),
            manufacturer: appliance.manufacturer().map(|s| s.to_string()),
            model: appliance.model_name().map(|s| s.to_string()),
        }
    }

    fn valid_commands(&self) -> BTreeSet<&str> {
        self.buttons
            .iter()
            .filter_map(|b| b.name.as_deref())
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Picks the button to send, ignoring all but the first entry
    /// of a sequence.
    pub fn validate_command<'a>(
        &self,
        command: &'a RemoteCommand,
    ) -> Result<&'a str, CommandError> {
        let command = command.first().ok_or_else(|| CommandError::Missing {
            name: self.name.to_string(),
        })?;

        if !self.valid_commands().contains(command) {
            return Err(CommandError::Invalid {
                command: command.to_string(),
                name: self.name.to_string(),
            });
        }

        Ok(command)
    }

    /// Sends a button press via `/appliances/{id}/tv`.
    /// Problems are logged and never reported to the caller.
    pub async fn send_command(&self, command: &RemoteCommand) {
        if let Err(err) = self.try_send_command(command).await {
            log::error!("{err}");
        }
    }

    async fn try_send_command(&self, command: &RemoteCommand) -> Result<(), CommandError> {
        let command = self.validate_command(command)?;

        let body = serde_json::json!({"button": command});
        let endpoint = format!("/appliances/{}/tv", self.id());
        let failed = |reason: String| CommandError::Failed {
            command: command.to_string(),
            name: self.name.to_string(),
            reason,
        };

        match self.api.post(&endpoint, &body).await {
            Ok(response) if !is_empty_response(&response) => {
                log::debug!(
                    "Sent command '{command}' to TV {} successfully",
                    self.name
                );
                Ok(())
            }
            Ok(response) => Err(failed(format!("empty response {response}"))),
            Err(err) => Err(failed(format!("{err:#}"))),
        }
    }

    pub fn extra_state_attributes(&self) -> RemoteAttributes {
        RemoteAttributes {
            commands: self
                .valid_commands()
                .into_iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Connects this remote to the service so that `update_callback`
    /// has somewhere to send its requests. Only the first call has
    /// any effect.
    pub fn attach(&self, write_state: WriteStateSender) {
        if self.write_state.set(write_state).is_err() {
            log::trace!("{} is already attached", self.base);
        }
    }

    /// Invoked when the coordinator has refreshed. Only asks for the
    /// current state to be published again; name and buttons stay
    /// as they were when this remote was created.
    pub fn update_callback(&self) {
        match self.write_state.get() {
            Some(tx) => {
                let request = WriteStateRequest {
                    unique_id: self.unique_id(),
                };
                if tx.send(request).is_err() {
                    log::trace!("write state for {}: service is gone", self.base);
                }
            }
            None => {
                log::trace!("write state for {}: not attached", self.base);
            }
        }
    }

    pub fn unique_id(&self) -> String {
        format!("remo2mqtt-{}", self.topic_id())
    }

    fn topic_id(&self) -> String {
        topic_safe_string(self.id())
    }

    pub fn command_topic(&self) -> String {
        format!("remo2mqtt/remote/{}/command", self.topic_id())
    }

    pub fn state_topic(&self) -> String {
        format!("remo2mqtt/remote/{}/state", self.topic_id())
    }

    pub fn attributes_topic(&self) -> String {
        format!("remo2mqtt/remote/{}/attributes", self.topic_id())
    }

    pub fn entity_availability_topic(&self) -> String {
        format!("remo2mqtt/remote/{}/availability", self.topic_id())
    }

    pub fn config(&self) -> RemoteConfig {
        let mut availability = AvailabilityTopic::global();
        availability.push(AvailabilityTopic {
            topic: self.entity_availability_topic(),
        });

        RemoteConfig {
            base: EntityConfig {
                availability,
                availability_mode: Some("all"),
                // Take the device name
                name: None,
                origin: Origin::default(),
                device: Device::for_appliance(&self.device_info()),
                unique_id: self.unique_id(),
                entity_category: None,
                icon: Some("mdi:remote-tv".to_string()),
            },
            command_topic: self.command_topic(),
            state_topic: self.state_topic(),
            options: self.extra_state_attributes().commands,
            json_attributes_topic: self.attributes_topic(),
        }
    }

    /// Home Assistant resets a select to "unknown" when its state is "None"
    pub async fn clear_selection(&self, client: &HassClient) -> anyhow::Result<()> {
        client.publish(self.state_topic(), "None").await
    }
}

#[async_trait]
impl EntityInstance for TvRemote {
    async fn publish_config(
        &self,
        state: &StateHandle,
        client: &HassClient,
    ) -> anyhow::Result<PublishedEntity> {
        let config = self.config();
        publish_entity_config("select", state, client, &config.base, &config).await
    }

    async fn notify_state(&self, client: &HassClient) -> anyhow::Result<()> {
        let availability = if self.available { "online" } else { "offline" };
        client
            .publish(self.entity_availability_topic(), availability)
            .await?;
        client
            .publish_obj(self.attributes_topic(), self.extra_state_attributes(), false)
            .await?;
        self.clear_selection(client).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cloud_api::{Appliance, ApplianceDevice, ApplianceType, TvSettings};
    use crate::service::coordinator::test::{coordinator_with, FakeRemoApi};
    use crate::service::coordinator::ApplianceCoordinator;
    use serde_json::json;
    use tokio::time::Duration;

    const BEDROOM_TV: &str = "5f0e4c1d-9a8b-4b7c-a6d5-e4f3a2b1c0d9";

    fn tv_appliance(id: &str, names: &[Option<&str>]) -> Appliance {
        Appliance {
            id: id.to_string(),
            nickname: Some(format!("TV {id}")),
            device: ApplianceDevice {
                id: "remo".to_string(),
                name: "Remo".to_string(),
                firmware_version: None,
            },
            model: None,
            appliance_type: ApplianceType::Tv,
            tv: Some(TvSettings {
                state: None,
                buttons: names
                    .iter()
                    .map(|name| Button {
                        name: name.map(|n| n.to_string()),
                        ..Button::default()
                    })
                    .collect(),
            }),
        }
    }

    async fn discover(api: &Arc<FakeRemoApi>) -> Vec<TvRemote> {
        let coordinator = coordinator_with(api.clone()).await;
        let client: Arc<dyn RemoApi> = api.clone();
        let mut found = vec![];
        setup_tv_platform(Some(DiscoveryInfo), &coordinator, &client, |remotes| {
            found = remotes
        });
        found
    }

    fn remote_for(api: &Arc<FakeRemoApi>, appliance: Appliance) -> TvRemote {
        let coordinator = ApplianceCoordinator::new(api.clone(), Duration::from_secs(60));
        TvRemote::new(coordinator, api.clone(), appliance)
    }

    #[tokio::test]
    async fn discovery_creates_one_remote_per_tv() {
        let api = FakeRemoApi::with_fixture();
        let remotes = discover(&api).await;
        let names: Vec<_> = remotes.iter().map(|r| r.name().to_string()).collect();
        k9::assert_equal!(
            names,
            vec!["Bedroom TV".to_string(), "Remo mini".to_string()]
        );
    }

    #[tokio::test]
    async fn discovery_without_tvs() {
        let api = FakeRemoApi::with_fixture();
        api.appliances.lock().retain(|a| !a.is_tv());
        let coordinator = coordinator_with(api.clone()).await;
        let client: Arc<dyn RemoApi> = api.clone();
        let mut batches = vec![];
        setup_tv_platform(Some(DiscoveryInfo), &coordinator, &client, |remotes| {
            batches.push(remotes.len())
        });
        k9::assert_equal!(batches, vec![0usize]);
    }

    #[tokio::test]
    async fn discovery_without_payload_does_nothing() {
        let api = FakeRemoApi::with_fixture();
        let coordinator = coordinator_with(api.clone()).await;
        let client: Arc<dyn RemoApi> = api.clone();
        let mut called = false;
        setup_tv_platform(None, &coordinator, &client, |_| called = true);
        assert!(!called);
    }

    #[tokio::test]
    async fn metadata() {
        let api = FakeRemoApi::with_fixture();
        let remotes = discover(&api).await;
        let tv = &remotes[0];
        k9::assert_equal!(tv.id(), BEDROOM_TV);
        assert!(tv.available());
        k9::assert_equal!(
            tv.device_info(),
            DeviceInfo {
                identifier: BEDROOM_TV.to_string(),
                name: "Bedroom TV".to_string(),
                manufacturer: Some("sharp".to_string()),
                model: Some("Sharp TV 001".to_string()),
            }
        );

        let mini = &remotes[1];
        assert!(mini.available());
        k9::assert_equal!(mini.device_info().manufacturer, None);
        k9::assert_equal!(mini.device_info().model, None);
        k9::assert_equal!(mini.extra_state_attributes().commands.len(), 0usize);
    }

    #[tokio::test]
    async fn commands_are_sorted_and_deduplicated() {
        let api = FakeRemoApi::with_fixture();
        let tv = remote_for(
            &api,
            tv_appliance("t1", &[Some("B"), Some("A"), Some("B"), Some(""), None]),
        );
        k9::assert_equal!(
            tv.extra_state_attributes(),
            RemoteAttributes {
                commands: vec!["A".to_string(), "B".to_string()]
            }
        );
        k9::assert_equal!(
            serde_json::to_value(tv.extra_state_attributes()).unwrap(),
            json!({"commands": ["A", "B"]})
        );
    }

    #[tokio::test]
    async fn valid_command_is_posted() {
        let api = FakeRemoApi::with_fixture();
        let tv = remote_for(&api, tv_appliance("t1", &[Some("A"), Some("B")]));

        tv.send_command(&"A".into()).await;

        k9::assert_equal!(
            api.posts.lock().clone(),
            vec![("/appliances/t1/tv".to_string(), json!({"button": "A"}))]
        );
    }

    #[tokio::test]
    async fn invalid_command_is_not_posted() {
        let api = FakeRemoApi::with_fixture();
        let tv = remote_for(&api, tv_appliance("t1", &[Some("A"), Some("")]));

        tv.send_command(&"Z".into()).await;
        // The empty name is not a valid button either
        tv.send_command(&"".into()).await;

        k9::assert_equal!(api.post_count(), 0usize);
        let command: RemoteCommand = "Z".into();
        k9::assert_equal!(
            tv.validate_command(&command),
            Err(CommandError::Invalid {
                command: "Z".to_string(),
                name: "TV t1".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn only_the_first_of_a_sequence_is_used() {
        let api = FakeRemoApi::with_fixture();
        let tv = remote_for(&api, tv_appliance("t1", &[Some("A"), Some("B")]));

        tv.send_command(&vec!["A".to_string(), "X".to_string()].into())
            .await;
        tv.send_command(&vec!["A".to_string(), "B".to_string()].into())
            .await;
        tv.send_command(&vec!["X".to_string(), "A".to_string()].into())
            .await;
        tv.send_command(&RemoteCommand::Sequence(vec![])).await;

        k9::assert_equal!(
            api.posts.lock().clone(),
            vec![
                ("/appliances/t1/tv".to_string(), json!({"button": "A"})),
                ("/appliances/t1/tv".to_string(), json!({"button": "A"})),
            ]
        );
    }

    #[tokio::test]
    async fn failed_post_is_swallowed() {
        let api = FakeRemoApi::with_fixture();
        let tv = remote_for(&api, tv_appliance("t1", &[Some("A")]));
        let command: RemoteCommand = "A".into();

        // An error from the client
        *api.reply.lock() = None;
        let result = tv.try_send_command(&command).await;
        assert!(matches!(result, Err(CommandError::Failed { .. })));

        // Replies that carry nothing
        for reply in [json!({}), serde_json::Value::Null] {
            *api.reply.lock() = Some(reply);
            let result = tv.try_send_command(&command).await;
            assert!(matches!(result, Err(CommandError::Failed { .. })));
        }

        // The public entry point only logs
        tv.send_command(&command).await;

        k9::assert_equal!(api.post_count(), 4usize);
        assert!(tv.available());
    }

    #[tokio::test]
    async fn successful_post() {
        let api = FakeRemoApi::with_fixture();
        let tv = remote_for(&api, tv_appliance("t1", &[Some("A")]));
        let command: RemoteCommand = "A".into();

        *api.reply.lock() = Some(json!({"input": "t"}));
        let result = tv.try_send_command(&command).await;
        k9::assert_equal!(result, Ok(()));

        *api.reply.lock() = None;
        let result = tv.try_send_command(&command).await;
        k9::assert_equal!(
            result.map_err(|err| err.to_string()),
            Err("Failed to send command 'A' to TV TV t1: request failed".to_string())
        );
    }

    #[tokio::test]
    async fn buttons_are_frozen_at_creation() {
        let api = FakeRemoApi::with_fixture();
        let coordinator = coordinator_with(api.clone()).await;
        let client: Arc<dyn RemoApi> = api.clone();
        let mut remotes = vec![];
        setup_tv_platform(Some(DiscoveryInfo), &coordinator, &client, |r| remotes = r);
        let tv = &remotes[0];
        let before = tv.extra_state_attributes();

        {
            let mut appliances = api.appliances.lock();
            for a in appliances.iter_mut() {
                if a.id == BEDROOM_TV {
                    a.nickname = Some("Renamed".to_string());
                    a.tv = Some(TvSettings::default());
                }
            }
        }
        coordinator.refresh().await.unwrap();

        k9::assert_equal!(tv.name(), "Bedroom TV");
        k9::assert_equal!(tv.extra_state_attributes(), before);
    }

    #[tokio::test]
    async fn update_callback_requests_write_state() {
        let api = FakeRemoApi::with_fixture();
        let tv = remote_for(&api, tv_appliance("T1", &[Some("A")]));

        // Not attached yet; nothing to do
        tv.update_callback();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tv.attach(tx);
        tv.update_callback();

        let request = rx.recv().await;
        k9::assert_equal!(
            request,
            Some(WriteStateRequest {
                unique_id: "remo2mqtt-t1".to_string()
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn entity_config() {
        let api = FakeRemoApi::with_fixture();
        let remotes = discover(&api).await;
        let config = serde_json::to_value(remotes[0].config()).unwrap();

        k9::assert_equal!(
            config["unique_id"],
            json!("remo2mqtt-5f0e4c1d-9a8b-4b7c-a6d5-e4f3a2b1c0d9")
        );
        k9::assert_equal!(
            config["command_topic"],
            json!("remo2mqtt/remote/5f0e4c1d-9a8b-4b7c-a6d5-e4f3a2b1c0d9/command")
        );
        k9::assert_equal!(
            config["options"],
            json!(["ch-up", "mute", "power", "vol-down", "vol-up"])
        );
        k9::assert_equal!(
            config["state_topic"],
            json!("remo2mqtt/remote/5f0e4c1d-9a8b-4b7c-a6d5-e4f3a2b1c0d9/state")
        );
        k9::assert_equal!(config["availability_mode"], json!("all"));
        k9::assert_equal!(config["device"]["name"], json!("Bedroom TV"));
        k9::assert_equal!(config["device"]["manufacturer"], json!("sharp"));
    }

    #[test]
    fn command_payloads() {
        k9::assert_equal!(
            RemoteCommand::from_payload("power"),
            RemoteCommand::Single("power".to_string())
        );
        k9::assert_equal!(
            RemoteCommand::from_payload("\"power\""),
            RemoteCommand::Single("power".to_string())
        );
        k9::assert_equal!(
            RemoteCommand::from_payload(r#"["power", "mute"]"#),
            RemoteCommand::Sequence(vec!["power".to_string(), "mute".to_string()])
        );
        k9::assert_equal!(
            RemoteCommand::from_payload("123"),
            RemoteCommand::Single("123".to_string())
        );
        let empty = RemoteCommand::from_payload("[]");
        k9::assert_equal!(empty.first(), None);
    }
}
