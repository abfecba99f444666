use std::path::PathBuf;

use reelfetch_config::{AppConfig, AppPaths, ConfigError, ConfigStore, default_download_dir};
use tempfile::TempDir;

#[test]
fn store_round_trips_download_path() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let paths = AppPaths::rooted(temp.path());
    let store = ConfigStore::for_paths(&paths);

    assert_eq!(store.load()?, AppConfig::default());
    assert_eq!(store.load()?.download_path, default_download_dir());

    let target = temp.path().join("movies");
    let updated = store.set_download_path(&target)?;
    assert_eq!(updated.download_path, target);

    let reopened = ConfigStore::new(paths.config_file());
    assert_eq!(reopened.load()?.download_path, target);

    let raw = std::fs::read_to_string(paths.config_file())?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    assert_eq!(value["downloadPath"], target.display().to_string());
    Ok(())
}

#[test]
fn invalid_paths_are_not_persisted() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let store = ConfigStore::for_paths(&AppPaths::rooted(temp.path()));

    let err = store
        .set_download_path(&PathBuf::from("relative/movies"))
        .expect_err("relative path must be rejected");
    assert!(matches!(err, ConfigError::InvalidField { .. }));
    assert!(!store.path().exists());
    Ok(())
}
