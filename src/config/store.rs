use std::path::Path;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Load configuration from an optional JSON file
///
/// Without a path the defaults are used. Missing keys in the file keep
/// their default values.
pub async fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let Some(path) = path else {
        return Ok(AppConfig::default());
    };

    let json = tokio::fs::read_to_string(path).await.map_err(|e| {
        AppError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let config: AppConfig = serde_json::from_str(&json)
        .map_err(|e| AppError::Config(format!("Invalid config {}: {}", path.display(), e)))?;

    tracing::info!("Configuration loaded from {}", path.display());
    Ok(config)
}

/// Write configuration as pretty JSON
pub async fn save_config(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_path_uses_defaults() {
        let config = load_config(None).await.unwrap();
        assert_eq!(config.video.file, "test.mp4");
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("streamer.json");

        let mut config = AppConfig::default();
        config.web.http_port = 8088;
        config.webrtc.stun_servers = vec!["stun:stun.l.google.com:19302".to_string()];
        save_config(&path, &config).await.unwrap();

        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.web.http_port, 8088);
        assert_eq!(loaded.webrtc.stun_servers.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("nope.json"))).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(matches!(
            load_config(Some(&path)).await,
            Err(AppError::Config(_))
        ));
    }
}
