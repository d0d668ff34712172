//! Subcommands of the peerlink binary.

use std::path::PathBuf;

pub mod demo;
pub mod inspect;

/// Config from `--config` / `PEERLINK_CONFIG`, or the defaults.
pub async fn load_config(path: Option<PathBuf>) -> eyre::Result<peerlink::Config> {
    match path {
        Some(path) => {
            let config = peerlink::Config::load(&path).await?;
            println!("📁 Config: {}", path.display());
            Ok(config)
        }
        None => Ok(peerlink::Config::default()),
    }
}
