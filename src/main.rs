//! Process entry point.
//!
//! ```no_run
//! use wisp_edge::config::Config;
//! use wisp_edge::{supervisor, telemetry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let logs = telemetry::init(&config.log_level);
//!     let services = supervisor::bootstrap(config, logs).await?;
//!     supervisor::run(services).await?;
//!     Ok(())
//! }
//! ```

use wisp_edge::config::Config;
use wisp_edge::{supervisor, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let logs = telemetry::init(&config.log_level);

    tracing::info!(version = wisp_edge::VERSION, "wisp-edge starting");

    let services = supervisor::bootstrap(config, logs).await?;
    supervisor::run(services).await?;

    Ok(())
}
