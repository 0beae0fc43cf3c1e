//! Entry point for the Attendance Engine binary.
//!
//! Running this binary starts an HTTP server that processes punches
//! into daily attendance.  Configuration comes from `ATTENDANCE_*`
//! environment variables (see [`attendance_engine::config`]); reference
//! data is read from `ATTENDANCE_DATA_DIR`, which defaults to a `data`
//! folder relative to the current working directory.  Log verbosity
//! follows `RUST_LOG` and defaults to `info`.

use anyhow::Result;
use attendance_engine::{api, config::EngineConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::from_env()?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        utc_offset_minutes = config.utc_offset_minutes,
        "starting attendance engine"
    );
    if let Err(err) = api::serve(config).await {
        tracing::error!(error = %err, "server stopped with an error");
        return Err(err);
    }
    Ok(())
}
