use crate::cloud_api::RemoApi;
use crate::hass_mqtt::instance::WriteStateSender;
use crate::hass_mqtt::remote::{setup_tv_platform, DiscoveryInfo, TvRemote};
use crate::service::coordinator::CoordinatorHandle;
use crate::service::hass::{topic_safe_string, HassClient};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A remote that has been handed to us by the TV platform, along with
/// the task relaying coordinator updates to it.
struct RegisteredRemote {
    remote: Arc<TvRemote>,
    listener: JoinHandle<()>,
}

impl Drop for RegisteredRemote {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[derive(Default)]
pub struct State {
    coordinator: Mutex<Option<CoordinatorHandle>>,
    api_client: Mutex<Option<Arc<dyn RemoApi>>>,
    hass_client: Mutex<Option<HassClient>>,
    hass_discovery_prefix: Mutex<String>,
    // Keyed by appliance id. These two are accessed from the
    // synchronous entity registration callback.
    remotes: parking_lot::Mutex<BTreeMap<String, RegisteredRemote>>,
    write_state: parking_lot::Mutex<Option<WriteStateSender>>,
}

pub type StateHandle = Arc<State>;

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_hass_disco_prefix(&self, prefix: String) {
        *self.hass_discovery_prefix.lock().await = prefix;
    }

    pub async fn get_hass_disco_prefix(&self) -> String {
        self.hass_discovery_prefix.lock().await.to_string()
    }

    pub async fn set_coordinator(&self, coordinator: CoordinatorHandle) {
        self.coordinator.lock().await.replace(coordinator);
    }

    pub async fn get_coordinator(&self) -> Option<CoordinatorHandle> {
        self.coordinator.lock().await.clone()
    }

    pub async fn set_api_client(&self, client: Arc<dyn RemoApi>) {
        self.api_client.lock().await.replace(client);
    }

    pub async fn get_api_client(&self) -> Option<Arc<dyn RemoApi>> {
        self.api_client.lock().await.clone()
    }

    pub async fn set_hass_client(&self, client: HassClient) {
        self.hass_client.lock().await.replace(client);
    }

    pub async fn get_hass_client(&self) -> Option<HassClient> {
        self.hass_client.lock().await.clone()
    }

    pub fn set_write_state_sender(&self, tx: WriteStateSender) {
        self.write_state.lock().replace(tx);
    }

    /// Runs TV discovery against the coordinator's current data,
    /// replacing any previously registered remotes.
    pub async fn discover_remotes(&self) -> anyhow::Result<Vec<Arc<TvRemote>>> {
        let coordinator = self
            .get_coordinator()
            .await
            .ok_or_else(|| anyhow::anyhow!("appliance coordinator is not available"))?;
        let api = self
            .get_api_client()
            .await
            .ok_or_else(|| anyhow::anyhow!("Nature Remo API client is not available"))?;

        setup_tv_platform(Some(DiscoveryInfo), &coordinator, &api, |remotes| {
            self.add_remotes(remotes)
        });

        Ok(self.remotes())
    }

    /// Takes ownership of a batch of newly discovered remotes.
    /// Each one is attached to the write-state channel, if we have
    /// one, and subscribed to coordinator updates.
    pub fn add_remotes(&self, remotes: Vec<TvRemote>) {
        let write_state = self.write_state.lock().clone();
        let mut registered = BTreeMap::new();

        for remote in remotes {
            if let Some(tx) = &write_state {
                remote.attach(tx.clone());
            }
            let remote = Arc::new(remote);
            let listener = remote.base().listen({
                let remote = remote.clone();
                move || remote.update_callback()
            });
            log::info!("Registered TV remote {}", remote.base());
            registered.insert(
                remote.id().to_string(),
                RegisteredRemote { remote, listener },
            );
        }

        // Dropping the old entries stops their listeners
        *self.remotes.lock() = registered;
    }

    pub fn remotes(&self) -> Vec<Arc<TvRemote>> {
        self.remotes
            .lock()
            .values()
            .map(|r| r.remote.clone())
            .collect()
    }

    pub fn remote_by_unique_id(&self, unique_id: &str) -> Option<Arc<TvRemote>> {
        self.remotes
            .lock()
            .values()
            .find(|r| r.remote.unique_id() == unique_id)
            .map(|r| r.remote.clone())
    }

    /// Resolve a remote by its appliance id, topic-safe id or name,
    /// ignoring case.
    pub fn resolve_remote(&self, label: &str) -> Option<Arc<TvRemote>> {
        let remotes = self.remotes.lock();

        // Try by id first
        if let Some(r) = remotes.get(label) {
            return Some(r.remote.clone());
        }

        let safe_label = topic_safe_string(label);
        for r in remotes.values() {
            let remote = &r.remote;
            if remote.id().eq_ignore_ascii_case(label)
                || topic_safe_string(remote.id()) == safe_label
                || remote.name().eq_ignore_ascii_case(label)
            {
                return Some(remote.clone());
            }
        }

        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::coordinator::test::{coordinator_with, FakeRemoApi};

    async fn state_with_fixture() -> (StateHandle, Arc<FakeRemoApi>) {
        let api = FakeRemoApi::with_fixture();
        let state = StateHandle::default();
        state.set_coordinator(coordinator_with(api.clone()).await).await;
        state.set_api_client(api.clone()).await;
        (state, api)
    }

    #[tokio::test]
    async fn discover_and_resolve() {
        let (state, _api) = state_with_fixture().await;
        let remotes = state.discover_remotes().await.unwrap();
        k9::assert_equal!(remotes.len(), 2usize);

        let by_id = state
            .resolve_remote("5f0e4c1d-9a8b-4b7c-a6d5-e4f3a2b1c0d9")
            .unwrap();
        k9::assert_equal!(by_id.name(), "Bedroom TV");
        let by_name = state.resolve_remote("bedroom tv").unwrap();
        k9::assert_equal!(by_name.id(), by_id.id());
        let by_unique_id = state.remote_by_unique_id(&by_id.unique_id()).unwrap();
        k9::assert_equal!(by_unique_id.id(), by_id.id());
        assert!(state.resolve_remote("Living Room AC").is_none());
    }

    #[tokio::test]
    async fn discovery_requires_coordinator() {
        let state = StateHandle::default();
        assert!(state.discover_remotes().await.is_err());
    }

    #[tokio::test]
    async fn coordinator_refresh_requests_write_state() {
        let (state, _api) = state_with_fixture().await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        state.set_write_state_sender(tx);
        state.discover_remotes().await.unwrap();

        state.get_coordinator().await.unwrap().refresh().await.unwrap();

        let mut unique_ids = vec![];
        for _ in 0..2 {
            unique_ids.push(rx.recv().await.unwrap().unique_id);
        }
        unique_ids.sort();
        k9::assert_equal!(
            unique_ids,
            vec![
                "remo2mqtt-5f0e4c1d-9a8b-4b7c-a6d5-e4f3a2b1c0d9".to_string(),
                "remo2mqtt-a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn rediscovery_replaces_remotes() {
        let (state, api) = state_with_fixture().await;
        state.discover_remotes().await.unwrap();

        api.appliances
            .lock()
            .retain(|a| a.id != "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d");
        state.get_coordinator().await.unwrap().refresh().await.unwrap();
        let remotes = state.discover_remotes().await.unwrap();
        k9::assert_equal!(remotes.len(), 1usize);
    }
}
