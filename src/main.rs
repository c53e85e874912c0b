use crate::cloud_api::RemoApiArguments;
use crate::service::coordinator::RefreshArguments;
use crate::service::hass::HassArguments;
use crate::version_info::remo_version;
use clap::Parser;
use std::str::FromStr;

mod cloud_api;
mod commands {
    pub mod list;
    pub mod serve;
    pub mod tv;
}
mod hass_mqtt {
    pub mod base;
    pub mod button;
    pub mod instance;
    pub mod remote;
    pub mod sensor;
}
mod service {
    pub mod appliance;
    pub mod coordinator;
    pub mod hass;
    pub mod hass_gc;
    pub mod http;
    pub mod state;
}
mod version_info;

#[derive(clap::Parser, Debug)]
#[command(version = remo_version(), propagate_version = true)]
pub struct Args {
    #[command(flatten)]
    api_args: RemoApiArguments,
    #[command(flatten)]
    hass_args: HassArguments,
    #[command(flatten)]
    refresh_args: RefreshArguments,

    #[command(subcommand)]
    cmd: SubCommand,
}

#[derive(clap::Parser, Debug)]
enum SubCommand {
    /// List the appliances registered to the account
    List(commands::list::ListCommand),
    /// Inspect or control a TV
    Tv(commands::tv::TvCommand),
    /// Run the MQTT bridge and HTTP API
    Serve(commands::serve::ServeCommand),
}

pub fn opt_env_var<T: FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    <T as FromStr>::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(p) => {
            Ok(Some(p.trim().parse().map_err(|err| {
                anyhow::anyhow!("parsing ${name}: {err:#}")
            })?))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => anyhow::bail!("${name} is invalid: {err:#}"),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    color_backtrace::install();
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loading environment overrides from {path:?}");
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("remo2mqtt=info"),
    )
    .init();

    let args = Args::parse();
    match &args.cmd {
        SubCommand::List(cmd) => cmd.run(&args).await,
        SubCommand::Tv(cmd) => cmd.run(&args).await,
        SubCommand::Serve(cmd) => cmd.run(&args).await,
    }
}
