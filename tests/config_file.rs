use std::error::Error;
use std::fs;
use std::path::PathBuf;

use tempdir::TempDir;

use dronelander::{ConfigError, FeatureLayout, TrainingConfig};

#[test]
fn config_file_overrides_only_the_listed_fields() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new("config_file")?;
    let path = dir.path().join("run.json");
    fs::write(
        &path,
        r#"{
            "codec": { "layout": "kinematic", "target": { "x": 5.0, "z": -5.0 } },
            "agent": { "batch_size": 16, "target_sync_period": 25 },
            "episode": { "episodes": 3, "checkpoint_dir": "runs/a" }
        }"#,
    )?;
    let config = TrainingConfig::from_file(&path)?;
    assert_eq!(config.codec.layout, FeatureLayout::Kinematic);
    assert_eq!(config.codec.target.y, 0.0);
    assert_eq!(config.codec.target.z, -5.0);
    assert_eq!(config.agent.batch_size, 16);
    assert_eq!(config.agent.target_sync_period, 25);
    assert_eq!(config.agent.gamma, 0.95);
    assert_eq!(config.episode.episodes, 3);
    assert_eq!(config.episode.checkpoint_dir, PathBuf::from("runs/a"));
    assert_eq!(config.transport.url, "ws://localhost:8765");
    Ok(())
}

#[test]
fn invalid_values_in_a_file_are_rejected() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new("config_invalid")?;
    let path = dir.path().join("run.json");
    fs::write(&path, r#"{ "agent": { "batch_size": 0 } }"#)?;
    assert!(matches!(
        TrainingConfig::from_file(&path),
        Err(ConfigError::Invalid(_))
    ));

    fs::write(&path, "{ not json")?;
    assert!(matches!(
        TrainingConfig::from_file(&path),
        Err(ConfigError::Parse(_))
    ));

    assert!(matches!(
        TrainingConfig::from_file(&dir.path().join("missing.json")),
        Err(ConfigError::Io(_))
    ));
    Ok(())
}
