use clap::Args;

use pulsarbeat_engine::EngineError;

#[derive(Args)]
pub struct CheckArgs {
    /// Path to the configuration file (.toml or .hcl).
    #[arg(long, default_value = "pulsarbeat.toml", env = "PULSARBEAT_CONFIG")]
    pub config: String,
}

pub fn execute(args: CheckArgs) -> Result<(), EngineError> {
    let config = super::load_config(&args.config)?;
    let auth = config.client.auth_provider()?;
    tracing::info!(
        url = %config.client.url,
        auth = ?auth,
        topics = ?config.consumer.topic_list(),
        subscription = %config.consumer.subscription_name,
        workers = config.consumer.num_workers,
        "configuration is valid"
    );
    Ok(())
}
