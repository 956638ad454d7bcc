//! Small app state that survives restarts
//!
//! Kept in `state.toml` next to the object store rather than in it, so the
//! persisting tier stays the only writer of the database file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Visible map area
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapRegion {
    pub latitude: f64,
    pub longitude: f64,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    /// True until the first clean shutdown
    #[serde(default = "default_first_launch")]
    pub is_first_launch: bool,

    #[serde(default)]
    pub map_region: Option<MapRegion>,
}

fn default_first_launch() -> bool {
    true
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            is_first_launch: default_first_launch(),
            map_region: None,
        }
    }
}

/// Reads and writes [`AppState`] at a fixed path
#[derive(Debug, Clone)]
pub struct AppStateStore {
    path: PathBuf,
}

impl AppStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved state; a missing or unreadable file yields defaults
    pub fn load(&self) -> AppState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No app state at {}, first launch", self.path.display());
                return AppState::default();
            }
            Err(e) => {
                warn!("Could not read app state {}: {}", self.path.display(), e);
                return AppState::default();
            }
        };

        match toml::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                warn!("Ignoring corrupt app state {}: {}", self.path.display(), e);
                AppState::default()
            }
        }
    }

    pub fn save(&self, state: &AppState) -> vt_common::Result<()> {
        let content = toml::to_string(state)?;
        std::fs::write(&self.path, content)?;
        debug!("App state saved to {}", self.path.display());
        Ok(())
    }
}
