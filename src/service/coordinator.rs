use crate::cloud_api::{Appliance, RemoApi};
use crate::opt_env_var;
use anyhow::Context;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

#[derive(clap::Parser, Debug)]
pub struct RefreshArguments {
    /// How often, in seconds, to re-fetch the appliance list from
    /// the Nature Remo cloud.
    /// You may also set this via the REMO_POLL_INTERVAL environment variable.
    /// If unspecified, uses 60
    #[arg(long, global = true)]
    poll_interval: Option<u64>,
}

impl RefreshArguments {
    pub fn poll_interval(&self) -> anyhow::Result<Duration> {
        let secs = match self.poll_interval {
            Some(secs) => secs,
            None => opt_env_var("REMO_POLL_INTERVAL")?.unwrap_or(60),
        };
        if secs == 0 {
            anyhow::bail!("poll interval must be at least 1 second");
        }
        Ok(Duration::from_secs(secs))
    }
}

/// The most recently fetched view of the account's appliances
#[derive(Default, Debug, Clone)]
pub struct ApplianceSnapshot {
    pub appliances: HashMap<String, Appliance>,
    /// When this snapshot was fetched; None before the first refresh
    pub updated: Option<DateTime<Utc>>,
}

impl ApplianceSnapshot {
    pub fn new(appliances: Vec<Appliance>) -> Self {
        Self {
            appliances: appliances
                .into_iter()
                .map(|a| (a.id.to_string(), a))
                .collect(),
            updated: Some(Utc::now()),
        }
    }

    /// Returns the appliances sorted by display name, for stable output
    pub fn sorted(&self) -> Vec<&Appliance> {
        let mut appliances: Vec<_> = self.appliances.values().collect();
        appliances.sort_by_key(|a| (a.display_name(), a.id.to_string()));
        appliances
    }
}

/// The ApplianceCoordinator fetches the appliance list from the cloud,
/// caches it and lets interested parties know when it has been
/// refreshed. Readers always see a complete snapshot; a refresh
/// swaps in a new one rather than mutating the current one.
pub struct ApplianceCoordinator {
    api: Arc<dyn RemoApi>,
    snapshot: ArcSwap<ApplianceSnapshot>,
    // Each successful refresh bumps the generation, waking subscribers
    generation: watch::Sender<u64>,
    interval: Duration,
}

pub type CoordinatorHandle = Arc<ApplianceCoordinator>;

impl ApplianceCoordinator {
    pub fn new(api: Arc<dyn RemoApi>, interval: Duration) -> CoordinatorHandle {
        let (generation, _) = watch::channel(0);
        Arc::new(Self {
            api,
            snapshot: ArcSwap::from_pointee(ApplianceSnapshot::default()),
            generation,
            interval,
        })
    }

    /// Returns the current snapshot.
    pub fn data(&self) -> Arc<ApplianceSnapshot> {
        self.snapshot.load_full()
    }

    /// Fetch the appliance list and notify subscribers.
    /// On failure the previous snapshot remains in place.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let appliances = self
            .api
            .get_appliances()
            .await
            .context("ApplianceCoordinator::refresh")?;
        log::trace!("refresh: {} appliances", appliances.len());
        self.snapshot
            .store(Arc::new(ApplianceSnapshot::new(appliances)));
        self.generation.send_modify(|g| *g += 1);
        Ok(())
    }

    /// Returns a receiver that is marked as changed after each
    /// successful refresh.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    pub fn spawn_periodic_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                sleep(coordinator.interval).await;
                if let Err(err) = coordinator.refresh().await {
                    log::error!("periodic appliance refresh: {err:#}");
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::cloud_api::from_json;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value as JsonValue;

    pub const APPLIANCES: &str = include_str!("../../test-data/appliances.json");

    /// Stands in for the cloud: serves a fixed appliance list and
    /// records the POSTs made against it.
    #[derive(Default)]
    pub struct FakeRemoApi {
        pub appliances: Mutex<Vec<Appliance>>,
        pub posts: Mutex<Vec<(String, JsonValue)>>,
        pub reply: Mutex<Option<JsonValue>>,
        pub fail_get: Mutex<bool>,
    }

    impl FakeRemoApi {
        pub fn with_fixture() -> Arc<Self> {
            let fake = Self::default();
            *fake.appliances.lock() = from_json(APPLIANCES).unwrap();
            *fake.reply.lock() = Some(serde_json::json!({"input": "t"}));
            Arc::new(fake)
        }

        pub fn post_count(&self) -> usize {
            self.posts.lock().len()
        }
    }

    #[async_trait]
    impl RemoApi for FakeRemoApi {
        async fn get_appliances(&self) -> anyhow::Result<Vec<Appliance>> {
            if *self.fail_get.lock() {
                anyhow::bail!("cloud unavailable");
            }
            Ok(self.appliances.lock().clone())
        }

        async fn post(&self, path: &str, body: &JsonValue) -> anyhow::Result<JsonValue> {
            self.posts.lock().push((path.to_string(), body.clone()));
            match self.reply.lock().clone() {
                Some(reply) => Ok(reply),
                None => anyhow::bail!("request failed"),
            }
        }
    }

    pub async fn coordinator_with(api: Arc<FakeRemoApi>) -> CoordinatorHandle {
        let coordinator = ApplianceCoordinator::new(api, Duration::from_secs(60));
        coordinator.refresh().await.unwrap();
        coordinator
    }

    #[test]
    fn poll_interval_must_be_positive() {
        let args = RefreshArguments {
            poll_interval: Some(15),
        };
        k9::assert_equal!(args.poll_interval().unwrap(), Duration::from_secs(15));

        let args = RefreshArguments {
            poll_interval: Some(0),
        };
        assert!(args.poll_interval().is_err());
    }

    #[tokio::test]
    async fn refresh_populates_snapshot() {
        let api = FakeRemoApi::with_fixture();
        let coordinator = ApplianceCoordinator::new(api.clone(), Duration::from_secs(60));
        k9::assert_equal!(coordinator.data().appliances.len(), 0usize);
        assert!(coordinator.data().updated.is_none());

        coordinator.refresh().await.unwrap();
        let data = coordinator.data();
        k9::assert_equal!(data.appliances.len(), 6usize);
        assert!(data.updated.is_some());
        assert!(data
            .appliances
            .contains_key("5f0e4c1d-9a8b-4b7c-a6d5-e4f3a2b1c0d9"));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let api = FakeRemoApi::with_fixture();
        let coordinator = coordinator_with(api.clone()).await;
        let rx = coordinator.subscribe();

        *api.fail_get.lock() = true;
        assert!(coordinator.refresh().await.is_err());
        k9::assert_equal!(coordinator.data().appliances.len(), 6usize);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn refresh_notifies_subscribers() {
        let api = FakeRemoApi::with_fixture();
        let coordinator = coordinator_with(api.clone()).await;
        let mut rx = coordinator.subscribe();
        assert!(!rx.has_changed().unwrap());

        api.appliances.lock().truncate(1);
        coordinator.refresh().await.unwrap();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        k9::assert_equal!(coordinator.data().appliances.len(), 1usize);
    }
}
