use thiserror::Error;

use crate::types::TileId;

/// Errors observable by callers.
///
/// Out-of-bounds inserts, unconfigured autotile groups, the flood-fill cap and
/// deletes of absent objects are not errors; those paths are silent no-ops.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{group}:{tile_id} is an invalid tile reference")]
    InvalidReference { group: String, tile_id: TileId },
    #[error("`{0}` is an invalid tile group")]
    UnknownGroup(String),
    #[error("bad composite key `{0}`")]
    BadKey(String),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the lookup failures (unknown group or unknown tile id).
    pub fn is_invalid_reference(&self) -> bool {
        matches!(self, Error::InvalidReference { .. } | Error::UnknownGroup(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
