use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the device monitor that leave removal detection impossible.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("no device event command configured")]
    EmptyCommand,

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{0}` was started without a readable stdout")]
    MissingStdout(String),
}

/// Reasons the root device could not be determined at startup.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("failed to read the mount table {path:?}: {source}")]
    MountTable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("none of the live medium mount points {0:?} is mounted from a block device")]
    NoMountedMedium(Vec<PathBuf>),

    #[error("device name `{0}` has no usable final path segment")]
    InvalidDeviceName(String),
}
