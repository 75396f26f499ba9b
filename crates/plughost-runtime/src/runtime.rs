//! Process-level orchestration.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use plughost_runtime::{InstanceDefinition, PlugInRuntime};
//!
//! let runtime = PlugInRuntime::builder()
//!     .config_file("config/plughost.toml")
//!     .update_queue(my_queue)
//!     .build()?;
//!
//! runtime.start();
//! runtime.host().create_instance(InstanceDefinition::new(1, 1, "sensor", "libsensor.so"))?;
//! runtime.host().start_instance(1)?;
//! runtime.run().await?;
//! ```

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use plughost_core::LogSink;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigLoader, ConfigResult, PlugHostConfig};
use crate::error::HostResult;
use crate::host::InstanceHost;
use crate::load::UnitLoader;
use crate::logging;
use crate::updates::{DeviceUpdateHandler, UpdateQueue, update_channel};

/// Owns the instance host and the device update handler.
pub struct PlugInRuntime {
    config: PlugHostConfig,
    host: InstanceHost,
    handler: Mutex<Option<DeviceUpdateHandler>>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl PlugInRuntime {
    /// Loads configuration from the current directory, falling back to
    /// defaults.
    pub fn new() -> Self {
        let config = ConfigLoader::new().load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config ({e}), using defaults");
            PlugHostConfig::default()
        });
        Self::from_config(&config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime without device update routing.
    pub fn from_config(config: &PlugHostConfig) -> Self {
        RuntimeParts::default().assemble(config)
    }

    pub fn config(&self) -> &PlugHostConfig {
        &self.config
    }

    pub fn host(&self) -> &InstanceHost {
        &self.host
    }

    /// Starts background services. Must be called within a Tokio runtime.
    pub fn start(&self) {
        if let Some(handler) = self.handler.lock().take() {
            let task = handler.spawn(self.shutdown.child_token());
            *self.handler_task.lock() = Some(task);
            debug!("Device update handler spawned");
        }
        info!(
            max_executing_instances = self.config.host.max_executing_instances,
            configuration_support = self.config.host.configuration_support,
            "Plug-in runtime started"
        );
    }

    /// Stops every instance, then the background services.
    pub async fn stop(&self) -> HostResult<()> {
        info!("Stopping plug-in runtime");
        self.host.stop_all().await;

        self.shutdown.cancel();
        let task = self.handler_task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!(error = %e, "Device update handler failed");
        }

        info!("Plug-in runtime stopped");
        Ok(())
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> HostResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> HostResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start();
        shutdown.await;
        self.stop().await
    }
}

impl Default for PlugInRuntime {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

/// Optional collaborators of a runtime.
#[derive(Default)]
struct RuntimeParts {
    queue: Option<Arc<dyn UpdateQueue>>,
    loader: Option<Arc<dyn UnitLoader>>,
    log_sink: Option<Arc<dyn LogSink>>,
}

impl RuntimeParts {
    fn assemble(self, config: &PlugHostConfig) -> PlugInRuntime {
        logging::init_from_config(&config.logging);

        let mut host = InstanceHost::builder(config.host.clone());
        if let Some(loader) = self.loader {
            host = host.loader(loader);
        }
        if let Some(sink) = self.log_sink {
            host = host.log_sink(sink);
        }

        let handler = match self.queue {
            Some(queue) => {
                let (sender, rx) = update_channel();
                host = host.device_updates(sender);
                Some(DeviceUpdateHandler::new(rx, queue))
            }
            None => None,
        };

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            "Runtime initialized from configuration"
        );

        PlugInRuntime {
            config: config.clone(),
            host: host.build(),
            handler: Mutex::new(handler),
            handler_task: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Builder for a [`PlugInRuntime`] with custom configuration sources.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    parts: RuntimeParts,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            parts: RuntimeParts::default(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Reads environment variables under `prefix` instead of `PLUGHOST_`.
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.env_prefix(prefix);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: PlugHostConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Persistence queue receiving device updates.
    pub fn update_queue(mut self, queue: Arc<dyn UpdateQueue>) -> Self {
        self.parts.queue = Some(queue);
        self
    }

    /// Replaces the native library loader.
    pub fn loader(mut self, loader: Arc<dyn UnitLoader>) -> Self {
        self.parts.loader = Some(loader);
        self
    }

    /// Replaces the `tracing` sink for plug-in log records.
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.parts.log_sink = Some(sink);
        self
    }

    pub fn build(self) -> ConfigResult<PlugInRuntime> {
        let config = self.config_loader.load()?;
        Ok(self.parts.assemble(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
