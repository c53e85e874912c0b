use crate::cloud_api::RemoApi;
use crate::service::coordinator::ApplianceSnapshot;

#[derive(clap::Parser, Debug)]
pub struct ListCommand {
    /// Only show TVs
    #[arg(long)]
    tv_only: bool,
}

impl ListCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        let client = args.api_args.api_client()?;
        let snapshot = ApplianceSnapshot::new(client.get_appliances().await?);

        for a in snapshot.sorted() {
            if self.tv_only && !a.is_tv() {
                continue;
            }
            println!(
                "{kind:<6} {id} {name}",
                kind = a.appliance_type.to_string(),
                id = a.id,
                name = a.display_name(),
            );
        }

        Ok(())
    }
}
