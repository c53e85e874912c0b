use crate::cloud_api::Appliance;
use crate::service::coordinator::CoordinatorHandle;
use tokio::task::JoinHandle;

/// An appliance as seen at discovery time, together with the
/// coordinator that keeps the account's appliance data fresh.
/// Entity types embed this to get device linkage and the
/// coordinator update hook.
#[derive(Clone)]
pub struct LinkedAppliance {
    appliance: Appliance,
    coordinator: CoordinatorHandle,
}

impl LinkedAppliance {
    pub fn new(coordinator: CoordinatorHandle, appliance: Appliance) -> Self {
        Self {
            appliance,
            coordinator,
        }
    }

    pub fn id(&self) -> &str {
        &self.appliance.id
    }

    /// The descriptor captured when this entity was created.
    /// It is not updated when the coordinator refreshes.
    pub fn appliance(&self) -> &Appliance {
        &self.appliance
    }

    /// Calls `on_update` each time the coordinator completes a refresh.
    /// The task ends when the coordinator goes away, or can be
    /// stopped early by aborting the returned handle.
    pub fn listen<F>(&self, on_update: F) -> JoinHandle<()>
    where
        F: Fn() + Send + 'static,
    {
        let mut rx = self.coordinator.subscribe();
        let id = self.id().to_string();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                log::trace!("coordinator update for {id}");
                on_update();
            }
        })
    }
}

impl std::fmt::Display for LinkedAppliance {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "{} ({} {})",
            self.appliance.display_name(),
            self.appliance.appliance_type,
            self.appliance.id
        )
    }
}
