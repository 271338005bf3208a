use std::future::Future;
use std::sync::Arc;

use pulsarbeat_api::{Broker, Sink, SubscriptionHandle};

use crate::config::BeatConfig;
use crate::error::EngineError;
use crate::mapper::{EventMapper, PulsarMapper};
use crate::supervisor::{Pump, PumpHandle, PumpReport};

/// Wires configuration, broker and sink into a pump run.
pub struct Beater {
    config: BeatConfig,
    broker: Arc<dyn Broker>,
    sink: Arc<dyn Sink>,
    mapper: Arc<dyn EventMapper>,
}

impl std::fmt::Debug for Beater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Beater").field("config", &self.config).finish()
    }
}

impl Beater {
    pub fn new(config: BeatConfig, broker: Arc<dyn Broker>, sink: Arc<dyn Sink>) -> Self {
        Self {
            config,
            broker,
            sink,
            mapper: Arc::new(PulsarMapper),
        }
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn EventMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn config(&self) -> &BeatConfig {
        &self.config
    }

    /// Create `num_workers` consumers on the configured subscription.
    ///
    /// All or nothing: if one subscribe fails, the consumers created so far
    /// are closed before the error is returned.
    pub async fn subscribe_all(&self) -> Result<Vec<Box<dyn SubscriptionHandle>>, EngineError> {
        let consumer = &self.config.consumer;
        let mut handles: Vec<Box<dyn SubscriptionHandle>> = Vec::with_capacity(consumer.num_workers);

        for index in 1..=consumer.num_workers {
            let options = consumer.subscribe_options(index);
            match self.broker.subscribe(&options).await {
                Ok(handle) => {
                    tracing::info!(
                        consumer = %options.consumer_name,
                        subscription = %options.subscription_name,
                        topics = ?options.topics,
                        subscription_type = ?options.subscription_type,
                        "subscribed"
                    );
                    handles.push(handle);
                }
                Err(source) => {
                    for handle in handles {
                        let name = handle.name().to_string();
                        if let Err(e) = handle.close().await {
                            tracing::warn!(consumer = %name, error = %e, "failed to close consumer");
                        }
                    }
                    return Err(EngineError::Subscribe {
                        consumer: options.consumer_name,
                        source,
                    });
                }
            }
        }
        Ok(handles)
    }

    /// Subscribe and start the pump.
    pub async fn start(&self) -> Result<PumpHandle, EngineError> {
        let handles = self.subscribe_all().await?;
        Ok(Pump::start(handles, self.sink.clone(), self.mapper.clone()))
    }

    /// Run until `shutdown` completes (or every worker ended on its own),
    /// then drain, close the sink and close the broker client.
    pub async fn run<F>(self, shutdown: F) -> Result<PumpReport, EngineError>
    where
        F: Future<Output = ()>,
    {
        let pump = match self.start().await {
            Ok(pump) => pump,
            Err(e) => {
                self.close_outputs().await;
                return Err(e);
            }
        };

        let stopper = pump.stopper();
        let wait = pump.wait();
        tokio::pin!(wait);

        let report = tokio::select! {
            report = &mut wait => {
                tracing::warn!("every worker ended before shutdown was requested");
                report
            }
            _ = shutdown => {
                stopper.stop();
                wait.await
            }
        };

        for worker in report.abnormal() {
            tracing::error!(worker = %worker.name, outcome = ?worker.outcome, "worker ended abnormally");
        }

        self.close_outputs().await;
        tracing::info!("beater exited");
        Ok(report)
    }

    async fn close_outputs(&self) {
        if let Err(e) = self.sink.close().await {
            tracing::warn!(error = %e, "failed to close sink");
        }
        match self.broker.close().await {
            Ok(()) => tracing::debug!("broker client closed"),
            Err(e) => tracing::warn!(error = %e, "failed to close broker client"),
        }
    }
}
