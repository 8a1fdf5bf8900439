//! Main entry point for the order hub service.
//!
//! Loads the configuration, wires the configured storage and webhook
//! delivery backends into an [`OrderEngine`], and runs the engine's
//! background loop next to the HTTP API until interrupted.

use clap::Parser;
use orderhub_config::Config;
use orderhub_core::{EngineBuilder, EngineFactories, OrderEngine};
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod server;

use orderhub_delivery::implementations::http::create_http_delivery;
use orderhub_storage::implementations::file::create_storage as create_file_storage;
use orderhub_storage::implementations::memory::create_storage as create_memory_storage;

/// Command-line arguments for the order hub service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config/orderhub.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let config_path = args
		.config
		.to_str()
		.ok_or("configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!(service_id = %config.service.id, "Loaded configuration");

	let engine = Arc::new(build_engine(config.clone())?);
	engine.initialize().await?;

	match config.api.clone().filter(|api| api.enabled) {
		Some(api_config) => {
			let api_engine = Arc::clone(&engine);
			tokio::select! {
				result = engine.run() => {
					tracing::info!("Engine loop finished");
					result?;
				}
				result = server::start_server(api_config, api_engine) => {
					tracing::info!("API server finished");
					result?;
				}
			}
		},
		None => {
			tracing::info!("API disabled, running engine only");
			engine.run().await?;
		},
	}

	engine.shutdown().await?;
	tracing::info!("Stopped order hub");
	Ok(())
}

/// Creates a factory map, coercing each factory to the shared fn pointer type.
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

/// Builds the engine with every storage and delivery backend this binary
/// ships. Only the configured primaries are instantiated.
fn build_engine(config: Config) -> Result<OrderEngine, Box<dyn std::error::Error>> {
	let storage_factories = create_factory_map!(
		orderhub_storage::StorageInterface,
		orderhub_storage::StorageError,
		"file" => create_file_storage,
		"memory" => create_memory_storage,
	);

	let delivery_factories = create_factory_map!(
		orderhub_delivery::DeliveryInterface,
		orderhub_delivery::DeliveryError,
		"http" => create_http_delivery,
	);

	let factories = EngineFactories {
		storage_factories,
		delivery_factories,
	};

	Ok(EngineBuilder::new(config).build(factories)?)
}
