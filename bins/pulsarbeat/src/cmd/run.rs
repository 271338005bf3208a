use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Args;

use broker_memory::MemoryBroker;
use pulsarbeat_api::Sink;
use pulsarbeat_engine::config::{BeatConfig, OutputKind};
use pulsarbeat_engine::{Beater, EngineError};
use sink_console::ConsoleSink;

use crate::os_signals::wait_for_shutdown_signal;

#[derive(Args)]
pub struct RunArgs {
    /// Path to the configuration file (.toml or .hcl).
    #[arg(long, default_value = "pulsarbeat.toml", env = "PULSARBEAT_CONFIG")]
    pub config: String,

    /// JSON-lines file published to the memory broker once consumers are attached.
    #[arg(long)]
    pub replay: Option<String>,
}

pub async fn execute(args: RunArgs) -> Result<(), EngineError> {
    let config = super::load_config(&args.config)?;

    let broker = connect(&config)?;
    let sink = open_sink(&config)?;

    let beater = Beater::new(config, Arc::new(broker.clone()), sink);
    let consumer = &beater.config().consumer;
    tracing::info!(
        topics = ?consumer.topic_list(),
        subscription = %consumer.subscription_name,
        workers = consumer.num_workers,
        "starting pulsarbeat"
    );

    // Polled for the first time only after every consumer is subscribed,
    // so subscriptions starting at `Latest` still see the replayed messages.
    let replay = args.replay;
    let replay_failed = Arc::new(AtomicBool::new(false));
    let failed = replay_failed.clone();
    let shutdown = async move {
        if let Some(path) = replay {
            if let Err(e) = replay_file(&broker, &path) {
                tracing::error!(replay = %path, error = %e, "replay failed");
                failed.store(true, Ordering::Release);
                return;
            }
        }
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::error!(error = %e, "failed to listen for shutdown signals");
            return;
        }
        tracing::info!("shutting down...");
    };

    let report = beater.run(shutdown).await?;
    let totals = report.totals();
    tracing::info!(
        received = totals.received,
        acked = totals.acked,
        nacked = totals.nacked,
        receive_errors = totals.receive_errors,
        "pump stopped"
    );

    let aborted = report.abnormal().count();
    if aborted > 0 {
        return Err(EngineError::WorkersAborted(aborted));
    }
    if replay_failed.load(Ordering::Acquire) {
        return Err(EngineError::Config("replay failed".into()));
    }
    Ok(())
}

fn connect(config: &BeatConfig) -> Result<MemoryBroker, EngineError> {
    let url = &config.client.url;
    if !url.starts_with(broker_memory::SCHEME) {
        return Err(EngineError::Config(format!(
            "client.url {url}: only {} brokers are supported",
            broker_memory::SCHEME
        )));
    }
    tracing::info!(url = %url, "using in-process broker");
    Ok(MemoryBroker::new())
}

fn open_sink(config: &BeatConfig) -> Result<Arc<dyn Sink>, EngineError> {
    let output = &config.output;
    let sink = match output.kind {
        OutputKind::Console => ConsoleSink::stdout(output.pretty),
        OutputKind::File => ConsoleSink::file(&output.path, output.pretty)?,
    };
    Ok(Arc::new(sink))
}

fn replay_file(broker: &MemoryBroker, path: &str) -> Result<usize, EngineError> {
    let file = std::fs::File::open(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
    let count = broker_memory::replay::replay_jsonl(broker, std::io::BufReader::new(file))
        .map_err(|e| EngineError::from(e).with_context(path))?;
    Ok(count)
}
