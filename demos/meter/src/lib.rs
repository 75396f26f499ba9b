//! Meter Plug-in Example
//!
//! A plug-in package exporting one plug-in type. Build it as a shared
//! library and point the demo host at it:
//!
//! ```bash
//! cargo build --package plughost-demo-meter
//! cargo run --package plughost-demo-host -- --plug-in target/debug/libplughost_demo_meter.so
//! ```
//!
//! The plug-in runs inside the host's Tokio runtime but has its own copy of
//! every crate it links, so it only awaits the cancellation token it is
//! given and never touches Tokio timers or the global `tracing` dispatcher.

use plughost_core::prelude::*;

#[derive(Debug, Serialize, Deserialize, PlugInConfiguration)]
#[configuration(name = "MeterConfig")]
pub struct MeterConfig {
    /// External id reported for the simulated device.
    pub device: String,
    /// Reported power draw in watts.
    pub watts: f64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            device: "meter-1".to_string(),
            watts: 230.0,
        }
    }
}

pub struct Meter {
    logger: PlugInLogger,
    publisher: DevicePublisher,
    config: MeterConfig,
}

#[async_trait]
impl PlugIn for Meter {
    async fn execute(&self, cancellation: CancellationToken) -> Result<(), PlugInError> {
        self.logger
            .info(format_args!("reporting meter {}", self.config.device));

        self.publisher.device_added(DeviceRecord {
            external_id: self.config.device.clone(),
            name: "Simulated meter".to_string(),
            parameters: vec![ParameterRecord {
                name: "power".to_string(),
                value: self.config.watts.into(),
                unit: Some("W".to_string()),
            }],
        });
        self.publisher.signal_level_changed(&self.config.device, 100);

        cancellation.cancelled().await;
        self.logger.info("meter stopped");
        Err(PlugInError::Cancelled)
    }

    fn dispose(&self) {
        self.publisher.device_removed(&self.config.device);
    }
}

impl PlugInFactory for Meter {
    type Configuration = MeterConfig;

    fn create(context: PlugInContext<MeterConfig>) -> BuildResult<Self> {
        if context.configuration.watts < 0.0 {
            return Err(BuildError::invalid_configuration(
                MeterConfig::TYPE_NAME,
                "watts cannot be negative",
            ));
        }
        Ok(Self {
            logger: context.logger,
            publisher: context.publisher,
            config: context.configuration,
        })
    }
}

export_plug_in!(Meter);
