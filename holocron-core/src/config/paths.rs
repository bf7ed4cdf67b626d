use std::path::PathBuf;

use super::settings::{SettingsError, StorageSettings};

pub const GRAPH_DB_FILE: &str = "graph.sqlite3";

/// Root data directory: `$HOLOCRON_DATA_DIR` or `<platform data dir>/holocron`.
pub fn data_root() -> Result<PathBuf, SettingsError> {
    if let Ok(override_dir) = std::env::var("HOLOCRON_DATA_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let dir = dirs::data_dir().ok_or(SettingsError::ConfigDirNotFound)?;
    Ok(dir.join("holocron"))
}

pub fn graph_db_path(storage: &StorageSettings) -> Result<PathBuf, SettingsError> {
    if let Some(path) = &storage.graph_db_path {
        return Ok(path.clone());
    }
    Ok(data_root()?.join(GRAPH_DB_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_graph_path_wins() {
        let storage = StorageSettings {
            graph_db_path: Some(PathBuf::from("/srv/kg.sqlite3")),
            ..StorageSettings::default()
        };
        assert_eq!(
            graph_db_path(&storage).unwrap(),
            PathBuf::from("/srv/kg.sqlite3")
        );
    }

    #[test]
    fn default_graph_path_lives_under_data_root() {
        let path = graph_db_path(&StorageSettings::default()).unwrap();
        assert!(path.ends_with(GRAPH_DB_FILE));
        assert_eq!(path.parent().unwrap(), data_root().unwrap());
    }
}
