use crate::hass_mqtt::button::ButtonConfig;
use crate::hass_mqtt::instance::{
    discovery_config_topic, EntityInstance, EntityList, WriteStateReceiver,
};
use crate::hass_mqtt::remote::RemoteCommand;
use crate::hass_mqtt::sensor::GlobalFixedDiagnostic;
use crate::opt_env_var;
use crate::service::hass_gc::{
    load_published_entities, save_published_entities, stale_entities, PublishedEntity,
};
use crate::service::state::StateHandle;
use crate::version_info::remo_version;
use anyhow::Context;
use async_channel::Receiver;
use mosquitto_rs::router::{MqttRouter, Params, Payload, State};
use mosquitto_rs::{Client, Event, QoS};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(clap::Parser, Debug)]
pub struct HassArguments {
    /// The mqtt broker hostname or address.
    /// You may also set this via the REMO_MQTT_HOST environment variable.
    #[arg(long, global = true)]
    mqtt_host: Option<String>,

    /// The mqtt broker port
    /// You may also set this via the REMO_MQTT_PORT environment variable.
    /// If unspecified, uses 1883
    #[arg(long, global = true)]
    mqtt_port: Option<u16>,

    /// The username to authenticate against the broker
    /// You may also set this via the REMO_MQTT_USER environment variable.
    #[arg(long, global = true)]
    mqtt_username: Option<String>,

    /// The password to authenticate against the broker
    /// You may also set this via the REMO_MQTT_PASSWORD environment variable.
    #[arg(long, global = true)]
    mqtt_password: Option<String>,

    #[arg(long, global = true)]
    mqtt_bind_address: Option<String>,

    #[arg(long, global = true, default_value = "homeassistant")]
    hass_discovery_prefix: String,
}

impl HassArguments {
    pub fn opt_mqtt_host(&self) -> anyhow::Result<Option<String>> {
        match &self.mqtt_host {
            Some(h) => Ok(Some(h.to_string())),
            None => opt_env_var("REMO_MQTT_HOST"),
        }
    }

    pub fn mqtt_host(&self) -> anyhow::Result<String> {
        self.opt_mqtt_host()?.ok_or_else(|| {
            anyhow::anyhow!(
                "Please specify the mqtt broker either via the \
                --mqtt-host parameter or by setting $REMO_MQTT_HOST"
            )
        })
    }

    pub fn mqtt_port(&self) -> anyhow::Result<u16> {
        match self.mqtt_port {
            Some(p) => Ok(p),
            None => Ok(opt_env_var("REMO_MQTT_PORT")?.unwrap_or(1883)),
        }
    }

    pub fn mqtt_username(&self) -> anyhow::Result<Option<String>> {
        match self.mqtt_username.clone() {
            Some(u) => Ok(Some(u)),
            None => opt_env_var("REMO_MQTT_USER"),
        }
    }

    pub fn mqtt_password(&self) -> anyhow::Result<Option<String>> {
        match self.mqtt_password.clone() {
            Some(u) => Ok(Some(u)),
            None => opt_env_var("REMO_MQTT_PASSWORD"),
        }
    }
}

#[derive(Clone)]
pub struct HassClient {
    client: Client,
}

impl HassClient {
    async fn register_with_hass(&self, state: &StateHandle) -> anyhow::Result<()> {
        let mut entities = EntityList::new();
        entities.add(GlobalFixedDiagnostic::new("Version", remo_version()));
        entities.add(ButtonConfig::global_button(
            "Refresh Appliances",
            refresh_topic(),
        ));

        let remotes = state
            .discover_remotes()
            .await
            .context("register_with_hass: discover_remotes")?;
        for remote in remotes {
            entities.add_shared(remote);
        }

        // Register the configs
        log::trace!("register_with_hass: register entities");
        let published = entities.publish_config(state, self).await?;

        if let Err(err) = self.remove_stale_entities(state, &published).await {
            log::warn!("Failed to remove stale entities: {err:#}");
        }

        // Allow hass time to register the entities
        tokio::time::sleep(tokio::time::Duration::from_millis(
            (50 * entities.len()) as u64,
        ))
        .await;

        // Mark as available
        log::trace!("register_with_hass: mark as online");
        self.publish_retained(availability_topic(), "online")
            .await
            .context("online -> availability_topic")?;

        // report initial state
        log::trace!("register_with_hass: reporting state");
        entities.notify_state(self).await.context("notify_state")?;

        log::trace!("register_with_hass: done");

        Ok(())
    }

    /// Deletes the discovery config of anything that we published
    /// previously but which no longer exists, such as a TV that was
    /// removed from the account.
    async fn remove_stale_entities(
        &self,
        state: &StateHandle,
        published: &HashSet<PublishedEntity>,
    ) -> anyhow::Result<()> {
        let previous = load_published_entities().context("load_published_entities")?;
        let disco = state.get_hass_disco_prefix().await;

        for entity in stale_entities(&previous, published) {
            log::info!(
                "Removing stale {} entity {}",
                entity.integration,
                entity.unique_id
            );
            let topic = discovery_config_topic(&disco, &entity.integration, &entity.unique_id);
            self.publish_retained(topic, "").await?;
        }

        save_published_entities(published).context("save_published_entities")
    }

    pub async fn publish<T: AsRef<str> + std::fmt::Display, P: AsRef<[u8]> + std::fmt::Display>(
        &self,
        topic: T,
        payload: P,
    ) -> anyhow::Result<()> {
        log::trace!("{topic} -> {payload}");
        self.client
            .publish(topic, payload, QoS::AtMostOnce, false)
            .await?;
        Ok(())
    }

    pub async fn publish_retained<
        T: AsRef<str> + std::fmt::Display,
        P: AsRef<[u8]> + std::fmt::Display,
    >(
        &self,
        topic: T,
        payload: P,
    ) -> anyhow::Result<()> {
        log::trace!("{topic} -> {payload} (retained)");
        self.client
            .publish(topic, payload, QoS::AtMostOnce, true)
            .await?;
        Ok(())
    }

    pub async fn publish_obj<T: AsRef<str> + std::fmt::Display, P: Serialize>(
        &self,
        topic: T,
        payload: P,
        retain: bool,
    ) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&payload)?;
        log::trace!("{topic} -> {payload}");
        self.client
            .publish(topic, payload, QoS::AtMostOnce, retain)
            .await?;
        Ok(())
    }
}

pub fn topic_safe_string(s: &str) -> String {
    let mut result = String::new();
    for c in s.chars() {
        if c == ':' || c == ' ' || c == '/' || c == '+' || c == '#' {
            result.push('_');
        } else {
            result.push(c.to_ascii_lowercase());
        }
    }
    result
}

/// All entities use the same topic so that we can mark unavailable
/// via last-will
pub fn availability_topic() -> String {
    "remo2mqtt/availability".to_string()
}

pub fn refresh_topic() -> String {
    "remo2mqtt/refresh-appliances".to_string()
}

#[derive(Deserialize)]
struct IdParameter {
    id: String,
}

/// HASS is asking a TV remote to press a button
async fn mqtt_remote_command(
    Payload(payload): Payload<String>,
    Params(IdParameter { id }): Params<IdParameter>,
    State(state): State<StateHandle>,
) -> anyhow::Result<()> {
    let remote = state
        .resolve_remote(&id)
        .ok_or_else(|| anyhow::anyhow!("remote '{id}' not found"))?;

    log::info!("Command for {}: {payload}", remote.base());
    remote
        .send_command(&RemoteCommand::from_payload(&payload))
        .await;

    let client = state
        .get_hass_client()
        .await
        .ok_or_else(|| anyhow::anyhow!("hass client is not available"))?;
    remote.clear_selection(&client).await
}

/// Re-fetch the appliance list and re-run discovery, so that
/// renamed or newly added TVs show up
async fn mqtt_refresh_appliances(State(state): State<StateHandle>) -> anyhow::Result<()> {
    log::info!("mqtt_refresh_appliances");
    state
        .get_coordinator()
        .await
        .ok_or_else(|| anyhow::anyhow!("appliance coordinator is not available"))?
        .refresh()
        .await?;
    state
        .get_hass_client()
        .await
        .ok_or_else(|| anyhow::anyhow!("hass client is not available"))?
        .register_with_hass(&state)
        .await
        .context("register_with_hass")
}

/// HASS is advising us that its status has changed
async fn mqtt_homeassitant_status(
    Payload(status): Payload<String>,
    State(state): State<StateHandle>,
) -> anyhow::Result<()> {
    log::info!("Home Assistant status changed: {status}");

    let client = state
        .get_hass_client()
        .await
        .ok_or_else(|| anyhow::anyhow!("hass client is not available"))?;

    client.register_with_hass(&state).await?;

    Ok(())
}

/// Serves the requests made by entities that want their
/// state to be published again
async fn run_write_state_loop(state: StateHandle, mut requests: WriteStateReceiver) {
    while let Some(request) = requests.recv().await {
        let Some(remote) = state.remote_by_unique_id(&request.unique_id) else {
            log::trace!("write state: {} is no longer registered", request.unique_id);
            continue;
        };
        let Some(client) = state.get_hass_client().await else {
            continue;
        };
        if let Err(err) = remote.notify_state(&client).await {
            log::error!("write state for {}: {err:#}", remote.base());
        }
    }
}

async fn run_mqtt_loop(
    state: StateHandle,
    subscriber: Receiver<Event>,
    client: Client,
) -> anyhow::Result<()> {
    async fn rebuild_router(
        client: &Client,
        state: &StateHandle,
    ) -> anyhow::Result<Arc<MqttRouter<StateHandle>>> {
        let disco_prefix = state.get_hass_disco_prefix().await;
        let mut router: MqttRouter<StateHandle> = MqttRouter::new(client.clone());

        router
            .route(format!("{disco_prefix}/status"), mqtt_homeassitant_status)
            .await?;

        router
            .route("remo2mqtt/remote/:id/command", mqtt_remote_command)
            .await?;

        router
            .route(refresh_topic(), mqtt_refresh_appliances)
            .await?;

        state
            .get_hass_client()
            .await
            .ok_or_else(|| anyhow::anyhow!("hass client is not available"))?
            .register_with_hass(state)
            .await
            .context("register_with_hass")?;

        Ok(Arc::new(router))
    }

    let mut router = rebuild_router(&client, &state).await?;
    let mut need_rebuild = false;

    while let Ok(event) = subscriber.recv().await {
        match event {
            Event::Message(msg) => {
                let router = router.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(err) = router.dispatch(msg.clone(), state.clone()).await {
                        log::error!("While dispatching {msg:?}: {err:#}");
                    }
                });
            }
            Event::Disconnected(reason) => {
                log::warn!("MQTT disconnected with reason={reason}");
                need_rebuild = true;
            }
            Event::Connected(status) => {
                log::info!("MQTT connected with status={status}");
                if need_rebuild {
                    router = rebuild_router(&client, &state).await?;
                    need_rebuild = false;
                }
            }
        }
    }

    log::info!("subscriber.recv loop terminated");

    Ok(())
}

pub async fn spawn_hass_integration(
    state: StateHandle,
    args: &HassArguments,
) -> anyhow::Result<()> {
    let client = Client::with_auto_id()?;

    let mqtt_host = args.mqtt_host()?;
    let mqtt_username = args.mqtt_username()?;
    let mqtt_password = args.mqtt_password()?;
    let mqtt_port = args.mqtt_port()?;

    client.set_last_will(availability_topic(), "offline", QoS::AtMostOnce, true)?;

    if mqtt_username.is_some() != mqtt_password.is_some() {
        log::error!(
            "MQTT username and password either both need to be set, or both need to be unset"
        );
    }
    client.set_username_and_password(mqtt_username.as_deref(), mqtt_password.as_deref())?;
    client
        .connect(
            &mqtt_host,
            mqtt_port.into(),
            Duration::from_secs(120),
            args.mqtt_bind_address.as_deref(),
        )
        .await
        .with_context(|| format!("connecting to mqtt broker {mqtt_host}:{mqtt_port}"))?;
    let subscriber = client
        .subscriber()
        .ok_or_else(|| anyhow::anyhow!("mqtt subscriber was already taken"))?;

    state
        .set_hass_client(HassClient {
            client: client.clone(),
        })
        .await;

    let disco_prefix = args.hass_discovery_prefix.clone();
    state.set_hass_disco_prefix(disco_prefix).await;

    let (write_state_tx, write_state_rx) = tokio::sync::mpsc::unbounded_channel();
    state.set_write_state_sender(write_state_tx);
    tokio::spawn(run_write_state_loop(state.clone(), write_state_rx));

    tokio::spawn(async move {
        let res = run_mqtt_loop(state, subscriber, client).await;
        if let Err(err) = res {
            log::error!("run_mqtt_loop: {err:#}");
            log::error!("FATAL: hass integration will not function.");
            log::error!("Pausing for 30 seconds before terminating.");
            tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
            std::process::exit(1);
        } else {
            log::info!("run_mqtt_loop exited. We should do something to shutdown gracefully here");
            std::process::exit(0);
        }
    });

    Ok(())
}

#[cfg(test)]
#[test]
fn test_topic_safe_string() {
    assert_eq!(topic_safe_string("Bedroom TV"), "bedroom_tv");
    assert_eq!(
        topic_safe_string("5F0E4C1D-9a8b:4b7c"),
        "5f0e4c1d-9a8b_4b7c"
    );
    assert_eq!(topic_safe_string("a/b+c#"), "a_b_c_");
}
