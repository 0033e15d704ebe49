// src/logging.rs
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Installs the global console subscriber. `debug` raises the level to DEBUG.
pub fn init(debug: bool) -> anyhow::Result<()> {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
