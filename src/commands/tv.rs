use crate::cloud_api::RemoApi;
use crate::hass_mqtt::remote::RemoteCommand;
use crate::service::coordinator::ApplianceCoordinator;
use crate::service::state::State;
use std::sync::Arc;

#[derive(clap::Parser, Debug)]
pub struct TvCommand {
    /// The appliance id or name of the TV
    #[arg(long)]
    pub id: String,

    #[command(subcommand)]
    cmd: SubCommand,
}

#[derive(clap::Parser, Debug, PartialEq)]
enum SubCommand {
    /// Show the buttons that the TV accepts
    Buttons,
    /// Press a button. When more than one is given, only the
    /// first is sent
    Press {
        #[arg(required = true)]
        buttons: Vec<String>,
    },
}

impl TvCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        let api: Arc<dyn RemoApi> = Arc::new(args.api_args.api_client()?);
        let coordinator =
            ApplianceCoordinator::new(api.clone(), args.refresh_args.poll_interval()?);
        coordinator.refresh().await?;

        let state = Arc::new(State::new());
        state.set_api_client(api).await;
        state.set_coordinator(coordinator).await;
        state.discover_remotes().await?;

        let remote = state
            .resolve_remote(&self.id)
            .ok_or_else(|| anyhow::anyhow!("TV '{}' not found", self.id))?;

        match &self.cmd {
            SubCommand::Buttons => {
                for command in remote.extra_state_attributes().commands {
                    println!("{command}");
                }
            }
            SubCommand::Press { buttons } => {
                let command = match buttons.as_slice() {
                    [single] => RemoteCommand::Single(single.to_string()),
                    _ => RemoteCommand::Sequence(buttons.clone()),
                };
                remote.send_command(&command).await;
            }
        }

        Ok(())
    }
}
