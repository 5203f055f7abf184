//! Patient identifier service entry point.
//!
//! Loads configuration, builds the Tokio runtime with the configured worker
//! count, and runs the HTTP server.

use patient_idgen::config::AppConfig;
use patient_idgen::run;

fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let config = AppConfig::load()?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if config.server.workers > 0 {
        builder.worker_threads(config.server.workers);
    }

    builder.build()?.block_on(run(config))
}
