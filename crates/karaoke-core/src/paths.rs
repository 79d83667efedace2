use std::path::PathBuf;

const APP_NAME: &str = "karaoke";

/// Returns the platform-specific data directory for karaoke.
///
/// - macOS: `~/Library/Application Support/karaoke/`
/// - Linux: `~/.local/share/karaoke/`
/// - Windows: `%LOCALAPPDATA%/karaoke/`
///
/// Falls back to `~/.karaoke/` if the platform directory cannot be determined.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(format!(".{APP_NAME}"))
        })
        .join(APP_NAME)
}

/// Returns the configs directory: `<data_dir>/configs/`
pub fn configs_dir() -> PathBuf {
    data_dir().join("configs")
}

/// Config file used when `--config` is not given: `<data_dir>/configs/client.yaml`
pub fn default_config_path() -> PathBuf {
    configs_dir().join("client.yaml")
}

/// Directory downloaded logs are written to: `<data_dir>/logs/`
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}
