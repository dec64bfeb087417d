use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::StorageError;
use crate::storage::{StorageHandle, THEME_KEY};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "lowercase")]
pub enum ThemeName {
    #[default]
    Light,
    Dark,
}

impl ThemeName {
    pub fn toggled(self) -> Self {
        match self {
            ThemeName::Light => ThemeName::Dark,
            ThemeName::Dark => ThemeName::Light,
        }
    }
}

/// Reads the persisted theme token, falling back when absent or unrecognised.
pub fn load_preference(
    storage: &StorageHandle,
    fallback: ThemeName,
) -> Result<ThemeName, StorageError> {
    let Some(raw) = storage.read_document(THEME_KEY)? else {
        return Ok(fallback);
    };
    match ThemeName::from_str(raw.trim()) {
        Ok(theme) => Ok(theme),
        Err(_) => {
            tracing::warn!(token = %raw, "unknown theme token, using fallback");
            Ok(fallback)
        }
    }
}

pub fn save_preference(storage: &StorageHandle, theme: ThemeName) -> Result<(), StorageError> {
    storage.write_document(THEME_KEY, &theme.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;
    use tempfile::TempDir;

    #[test]
    fn theme_token_round_trips_through_storage() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let storage = storage::open(&temp.path().join("t.db"), 1000)?;
        assert_eq!(load_preference(&storage, ThemeName::Light)?, ThemeName::Light);

        save_preference(&storage, ThemeName::Dark)?;
        assert_eq!(storage.read_document(THEME_KEY)?.as_deref(), Some("dark"));
        assert_eq!(load_preference(&storage, ThemeName::Light)?, ThemeName::Dark);
        Ok(())
    }

    #[test]
    fn garbage_token_falls_back() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let storage = storage::open(&temp.path().join("t.db"), 1000)?;
        storage.write_document(THEME_KEY, "neon")?;
        assert_eq!(load_preference(&storage, ThemeName::Dark)?, ThemeName::Dark);
        assert_eq!(ThemeName::Dark.toggled(), ThemeName::Light);
        Ok(())
    }
}
