//! Configuration vault – reads/writes `~/.binpick/config.toml`.

use binpick_planner::PlannerConfig;
use binpick_runtime::{LoopConfig, PerceptionParams};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Persisted run configuration stored in `~/.binpick/config.toml`.
///
/// Every table is optional; missing keys take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub perception: PerceptionParams,

    /// Driving-loop timing, stored as the `[loop]` table.
    #[serde(default, rename = "loop")]
    pub run: LoopConfig,
}

/// Return the path to `~/.binpick/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".binpick").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `BINPICK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `BINPICK_PROMPT` | `perception.prompt` |
/// | `BINPICK_TRIALS` | `perception.sampler.trials` |
/// | `BINPICK_SEED` | `planner.seed` and `perception.sampler.seed` |
/// | `BINPICK_MAX_TIME` | `loop.max_duration` (simulated seconds) |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("BINPICK_PROMPT") {
        cfg.perception.prompt = v;
    }
    if let Ok(v) = std::env::var("BINPICK_TRIALS")
        && let Ok(trials) = v.trim().parse::<usize>()
    {
        cfg.perception.sampler.trials = trials;
    }
    if let Ok(v) = std::env::var("BINPICK_SEED")
        && let Ok(seed) = v.trim().parse::<u64>()
    {
        cfg.planner.seed = Some(seed);
        cfg.perception.sampler.seed = Some(seed);
    }
    if let Ok(v) = std::env::var("BINPICK_MAX_TIME")
        && let Ok(secs) = v.trim().parse::<f64>()
        && secs.is_finite()
        && secs > 0.0
    {
        cfg.run.max_duration = secs;
    }
}

/// Save the config to disk, creating `~/.binpick/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        // rwx------
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // rw-------
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.planner.grasp_attempts, 5);
        assert_eq!(loaded.planner.place_x, [0.35, 0.65]);
        assert_eq!(loaded.run.tick_period, 0.1);
        assert_eq!(loaded.perception.roi_camera, 0);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[loop]\ntick_period = 0.05\n\n[planner]\nmax_attempts = 2\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.run.tick_period, 0.05);
        assert_eq!(loaded.run.max_duration, 160.0);
        assert_eq!(loaded.planner.max_attempts, 2);
        assert_eq!(loaded.planner.settle_time, 1.0);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[planner\nsettle_time = ").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("Failed to parse config"));
    }

    #[test]
    fn config_path_points_to_binpick_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".binpick"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn apply_env_overrides_changes_prompt() {
        // SAFETY: each test touches its own variable.
        unsafe { std::env::set_var("BINPICK_PROMPT", "blue mug") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.perception.prompt, "blue mug");
        unsafe { std::env::remove_var("BINPICK_PROMPT") };
    }

    #[test]
    fn apply_env_overrides_changes_trials() {
        // SAFETY: each test touches its own variable.
        unsafe { std::env::set_var("BINPICK_TRIALS", "12") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.perception.sampler.trials, 12);
        unsafe { std::env::remove_var("BINPICK_TRIALS") };
    }

    #[test]
    fn apply_env_overrides_seeds_planner_and_sampler() {
        // SAFETY: each test touches its own variable.
        unsafe { std::env::set_var("BINPICK_SEED", "42") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.planner.seed, Some(42));
        assert_eq!(cfg.perception.sampler.seed, Some(42));
        unsafe { std::env::remove_var("BINPICK_SEED") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_max_time() {
        // SAFETY: each test touches its own variable.
        unsafe { std::env::set_var("BINPICK_MAX_TIME", "-3") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.run.max_duration, 160.0);

        unsafe { std::env::set_var("BINPICK_MAX_TIME", "30.5") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.run.max_duration, 30.5);
        unsafe { std::env::remove_var("BINPICK_MAX_TIME") };
    }
}
