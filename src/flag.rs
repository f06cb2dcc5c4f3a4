use std::fmt::{Display, Formatter};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How `STORE` alters the flags of a message.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreType {
    Replace,
    Add,
    Remove,
}

/// Whether the server answers a `STORE` with the updated flags.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreResponse {
    Answer,
    Silent,
}

/// The data item name of a `STORE` command, e.g., `+FLAGS.SILENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct StoreItem(pub StoreType, pub StoreResponse);

impl Display for StoreItem {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.0 {
            StoreType::Replace => {}
            StoreType::Add => f.write_str("+")?,
            StoreType::Remove => f.write_str("-")?,
        }

        f.write_str("FLAGS")?;

        match self.1 {
            StoreResponse::Answer => Ok(()),
            StoreResponse::Silent => f.write_str(".SILENT"),
        }
    }
}
