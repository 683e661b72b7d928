use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use kiln_types::PackageRef;

/// Fingerprint cache events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CacheEvent {
    /// Entry found; no build phase will run
    Hit {
        package: PackageRef,
        fingerprint: String,
    },

    Miss {
        package: PackageRef,
        fingerprint: String,
    },

    /// Another task holds this fingerprint; waiting for it to finish
    WaitingForInFlight {
        package: PackageRef,
        fingerprint: String,
    },

    /// Completed package moved into the cache
    Published {
        package: PackageRef,
        fingerprint: String,
        path: PathBuf,
    },

    /// Entries removed by `kiln cache clean`
    Cleaned { removed: usize },
}
