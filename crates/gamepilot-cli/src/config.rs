//! User configuration – reads/writes `~/.gamepilot/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gamepilot_runtime::{EstimatorConfig, NavigatorConfig, RecoveryConfig};
use gamepilot_types::PilotError;
use serde::{Deserialize, Serialize};

/// Persisted loop tuning.  Every field has a default, so an empty file is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Content file loaded when a command is given none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_path: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub freshness_ms: u64,
    pub unknown_threshold: f32,
    pub hop_radius: usize,
    pub max_transition_attempts: usize,
    pub max_replans: u32,
    pub anomaly_budget: u32,
    pub anchor_timeout_ms: u64,
    pub settle_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            content_path: None,
            poll_interval_ms: 100,
            freshness_ms: 500,
            unknown_threshold: 0.6,
            hop_radius: 2,
            max_transition_attempts: 3,
            max_replans: 8,
            anomaly_budget: 3,
            anchor_timeout_ms: 10_000,
            settle_ms: 300,
        }
    }
}

impl Config {
    pub fn estimator(&self) -> EstimatorConfig {
        EstimatorConfig {
            unknown_threshold: self.unknown_threshold,
            hop_radius: self.hop_radius,
        }
    }

    pub fn navigator(&self) -> NavigatorConfig {
        NavigatorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            freshness: Duration::from_millis(self.freshness_ms),
            max_transition_attempts: self.max_transition_attempts,
            max_replans: self.max_replans,
        }
    }

    /// Timing and budget knobs applied on top of the content's recipes.
    pub fn recovery(&self, recipes: RecoveryConfig) -> RecoveryConfig {
        RecoveryConfig {
            anchor_timeout: Duration::from_millis(self.anchor_timeout_ms),
            settle: Duration::from_millis(self.settle_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            anomaly_budget: self.anomaly_budget,
            ..recipes
        }
    }

    /// # Errors
    ///
    /// [`PilotError::Config`] naming the first out-of-range field.
    pub fn validate(&self) -> Result<(), PilotError> {
        if !(0.0..=1.0).contains(&self.unknown_threshold) {
            return Err(PilotError::Config(format!(
                "unknown_threshold must be within [0, 1], got {}",
                self.unknown_threshold
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(PilotError::Config("poll_interval_ms must be positive".to_string()));
        }
        if self.anchor_timeout_ms == 0 {
            return Err(PilotError::Config("anchor_timeout_ms must be positive".to_string()));
        }
        if self.max_transition_attempts == 0 {
            return Err(PilotError::Config(
                "max_transition_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Return the path to `~/.gamepilot/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".gamepilot").join("config.toml")
}

/// Effective configuration: the file when present, else defaults, then
/// environment overrides.
pub fn load() -> Result<Config, PilotError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// `None` when the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, PilotError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| PilotError::Config(format!("cannot read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| PilotError::Config(format!("cannot parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `GAMEPILOT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `GAMEPILOT_CONTENT` | `content_path` |
/// | `GAMEPILOT_POLL_MS` | `poll_interval_ms` |
/// | `GAMEPILOT_UNKNOWN_THRESHOLD` | `unknown_threshold` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("GAMEPILOT_CONTENT") {
        cfg.content_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("GAMEPILOT_POLL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.poll_interval_ms = ms;
    }
    if let Ok(v) = std::env::var("GAMEPILOT_UNKNOWN_THRESHOLD")
        && let Ok(t) = v.parse::<f32>()
    {
        cfg.unknown_threshold = t;
    }
}

/// Write `cfg` to `~/.gamepilot/config.toml`.
pub fn save(cfg: &Config) -> Result<PathBuf, PilotError> {
    let path = config_path();
    save_to(cfg, &path)?;
    Ok(path)
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), PilotError> {
    let io = |what: &str, e: std::io::Error| PilotError::Config(format!("{what}: {e}"));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io("cannot create config directory", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io("cannot restrict config directory", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| PilotError::Config(format!("cannot serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io(&format!("cannot write {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io(&format!("cannot write {}", path.display()), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_loop_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.estimator(), EstimatorConfig::default());
        assert_eq!(cfg.navigator(), NavigatorConfig::default());
        let recovery = cfg.recovery(RecoveryConfig::default());
        assert_eq!(recovery.anchor_timeout, Duration::from_secs(10));
        assert_eq!(recovery.anomaly_budget, 3);
    }

    #[test]
    fn recovery_keeps_content_recipes() {
        let recipes = RecoveryConfig {
            dismiss: vec![gamepilot_types::ActionRecipe::tap("closePopup", 1, 1)],
            ..RecoveryConfig::default()
        };
        let cfg = Config {
            settle_ms: 50,
            ..Config::default()
        };
        let merged = cfg.recovery(recipes);
        assert_eq!(merged.dismiss.len(), 1);
        assert_eq!(merged.settle, Duration::from_millis(50));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_replans = 2\nhop_radius = 5\n").expect("write");
        let cfg = load_from(&path).expect("load").expect("some");
        assert_eq!(cfg.max_replans, 2);
        assert_eq!(cfg.hop_radius, 5);
        assert_eq!(cfg.poll_interval_ms, 100);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_replans = \"lots\"").expect("write");
        assert!(matches!(load_from(&path), Err(PilotError::Config(_))));
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load").expect("some");
        assert_eq!(loaded, Config::default());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().expect("parent"))
            .expect("dir")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_gamepilot_dir() {
        let p = config_path_for_home("/home/player");
        assert!(p.starts_with("/home/player/.gamepilot"));
        assert!(p.ends_with("config.toml"));
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        // SAFETY: only this test touches these variables.
        unsafe {
            std::env::set_var("GAMEPILOT_CONTENT", "/srv/game/content.toml");
            std::env::set_var("GAMEPILOT_POLL_MS", "250");
            std::env::set_var("GAMEPILOT_UNKNOWN_THRESHOLD", "high");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.content_path, Some(PathBuf::from("/srv/game/content.toml")));
        assert_eq!(cfg.poll_interval_ms, 250);
        assert_eq!(cfg.unknown_threshold, 0.6);
        unsafe {
            std::env::remove_var("GAMEPILOT_CONTENT");
            std::env::remove_var("GAMEPILOT_POLL_MS");
            std::env::remove_var("GAMEPILOT_UNKNOWN_THRESHOLD");
        }
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let cfg = Config {
            unknown_threshold: 1.5,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(PilotError::Config(_))));
        assert!(Config::default().validate().is_ok());
    }
}
