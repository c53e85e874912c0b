use crate::cloud_api::RemoApi;
use crate::service::coordinator::ApplianceCoordinator;
use crate::service::hass::spawn_hass_integration;
use crate::service::http::run_http_server;
use crate::service::state::State;
use crate::version_info::remo_version;
use anyhow::Context;
use std::sync::Arc;

#[derive(clap::Parser, Debug)]
pub struct ServeCommand {
    /// The port on which the HTTP API will listen
    #[arg(long, default_value_t = 8057)]
    http_port: u16,
}

impl ServeCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        log::info!("Starting service. version {}", remo_version());
        let state = Arc::new(State::new());

        let api: Arc<dyn RemoApi> = Arc::new(args.api_args.api_client()?);
        let coordinator =
            ApplianceCoordinator::new(api.clone(), args.refresh_args.poll_interval()?);

        log::info!("Querying Nature Remo API for appliance list");
        coordinator
            .refresh()
            .await
            .context("initial appliance refresh")?;

        log::info!("Appliances returned from the Nature Remo API");
        let data = coordinator.data();
        for appliance in data.sorted() {
            log::info!(
                "{name} ({kind} {id})",
                name = appliance.display_name(),
                kind = appliance.appliance_type,
                id = appliance.id
            );
            if appliance.is_tv() {
                log::info!("  TV with {} buttons", appliance.tv_buttons().len());
            } else {
                log::info!("  Not a TV; it will not be exposed to Home Assistant.");
            }
            log::trace!("{appliance:#?}");
            log::info!("");
        }

        state.set_api_client(api).await;
        state.set_coordinator(coordinator.clone()).await;

        // Start periodic appliance refresh
        coordinator.spawn_periodic_refresh();

        // start advertising on local mqtt
        spawn_hass_integration(state.clone(), &args.hass_args).await?;

        run_http_server(state.clone(), self.http_port).await
    }
}
