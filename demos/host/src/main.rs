//! Demo Host
//!
//! Loads one plug-in package, starts an instance of it and prints device
//! updates and state changes until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package plughost-demo-host -- \
//!     --plug-in target/debug/libplughost_demo_meter.so \
//!     --configuration '{"device":"kitchen","watts":1200}'
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use plughost::prelude::*;
use plughost::runtime::ChannelUpdateQueue;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file (plughost.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Shared library of the plug-in package
    #[arg(short, long)]
    plug_in: PathBuf,

    /// Package id the library belongs to
    #[arg(long, default_value_t = 1)]
    package: PlugInId,

    /// Stored configuration JSON for the instance
    #[arg(long)]
    configuration: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (queue, mut commands) = ChannelUpdateQueue::new();
    let mut builder = PlugInRuntime::builder().update_queue(Arc::new(queue));
    if let Some(config) = &args.config {
        builder = builder.config_file(config);
    }
    let runtime = builder.build()?;

    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            info!(?command, "Device update");
        }
    });

    tokio::spawn(observe(runtime.host().subscribe()));

    let mut definition = InstanceDefinition::new(1, args.package, "demo", args.plug_in);
    if let Some(json) = args.configuration {
        definition = definition.with_configuration(InstanceConfiguration::new(json));
    }

    runtime.start();
    let host = runtime.host();
    host.create_instance(definition)?;
    host.start_instance(1)?;

    runtime.run().await?;
    Ok(())
}

/// Logs state changes until the host goes away. Returns how many were seen.
async fn observe(mut changes: broadcast::Receiver<InstanceStateChanged>) -> usize {
    let mut seen = 0;
    loop {
        match changes.recv().await {
            Ok(change) => {
                seen += 1;
                info!(
                    instance_id = change.instance_id,
                    state = %change.state,
                    fault = ?change.fault,
                    "Instance state changed"
                );
            }
            Err(RecvError::Lagged(missed)) => warn!(missed, "State change observer lagged"),
            Err(RecvError::Closed) => return seen,
        }
    }
}
