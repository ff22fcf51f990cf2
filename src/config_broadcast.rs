//! Hot-reload broadcast of configuration to running pipeline stages.

use crate::config::Config;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Broadcasts configuration updates to all pipeline stages.
///
/// Stages hold a `watch::Receiver<Arc<Config>>` and pick up the new value
/// at their next loop iteration; nothing is restarted.
pub struct ConfigBroadcaster {
    sender: watch::Sender<Arc<Config>>,
    current: Arc<Config>,
}

impl ConfigBroadcaster {
    /// Create a new broadcaster with the initial configuration.
    pub fn new(config: Config) -> (Self, watch::Receiver<Arc<Config>>) {
        let config = Arc::new(config);
        let (sender, receiver) = watch::channel(Arc::clone(&config));

        let broadcaster = Self {
            sender,
            current: config,
        };

        (broadcaster, receiver)
    }

    /// Replace the configuration and broadcast to all receivers.
    pub fn update(&mut self, config: Config) {
        let config = Arc::new(config);
        self.current = Arc::clone(&config);
        // Send only fails when every receiver is gone, which means the
        // pipeline is shutting down anyway.
        let _ = self.sender.send(config);
    }

    /// Re-read the config file and broadcast it if it parses.
    ///
    /// A file that fails to parse leaves the running configuration
    /// untouched; a reload must never degrade a healthy pipeline.
    pub fn reload_from(&mut self, path: &Path) {
        match Config::load(path) {
            Ok(config) => {
                info!("Config reloaded from {}", path.display());
                self.update(config);
            }
            Err(e) => {
                warn!("Config reload failed, keeping current config: {}", e);
            }
        }
    }

    /// Get the current configuration.
    pub fn current(&self) -> Arc<Config> {
        Arc::clone(&self.current)
    }

    /// Subscribe to configuration updates.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.sender.subscribe()
    }
}
