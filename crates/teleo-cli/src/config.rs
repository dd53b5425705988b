//! Configuration file – reads/writes `~/.teleo/config.toml`.
//!
//! Every field has a default, so a missing file, or a file containing only
//! the settings you care about, is fine:
//!
//! ```toml
//! [agent]
//! steps_per_second = 10
//!
//! [link]
//! host = "192.168.0.42"
//! redirect = { host = "127.0.0.1", port = 9001 }
//!
//! [kit]
//! enabled = false
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use teleo_hal::KitConfig;
use teleo_runtime::{AgentConfig, LinkConfig, RedirectConfig, RuntimeConfig};

/// The `[kit]` section.  The kit number itself comes from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KitSection {
    /// Set to `false` to run the agent without a robot kit.
    pub enabled: bool,
    /// Kit address; defaults to `192.168.0.(15 + kit_id)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub send_port: u16,
    pub recv_port: u16,
    pub bind_host: String,
    pub broadcast: bool,
}

impl Default for KitSection {
    fn default() -> Self {
        let kit = KitConfig::default();
        Self {
            enabled: true,
            host: None,
            send_port: kit.send_port,
            recv_port: kit.recv_port,
            bind_host: kit.bind_host,
            broadcast: kit.broadcast,
        }
    }
}

impl KitSection {
    pub fn to_kit_config(&self, kit_id: i32) -> KitConfig {
        KitConfig {
            kit_id,
            host: self.host.clone(),
            send_port: self.send_port,
            recv_port: self.recv_port,
            bind_host: self.bind_host.clone(),
            broadcast: self.broadcast,
        }
    }
}

/// Persisted configuration stored in `~/.teleo/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub link: LinkConfig,
    pub kit: KitSection,
}

impl Config {
    /// Assemble the runtime configuration for kit number `kit_id`.
    ///
    /// `use_kit = false` (from `--no-kit`) wins over `[kit] enabled`.
    pub fn runtime_config(&self, kit_id: i32, use_kit: bool) -> RuntimeConfig {
        let kit = (use_kit && self.kit.enabled).then(|| self.kit.to_kit_config(kit_id));
        RuntimeConfig {
            agent: self.agent.clone(),
            link: self.link.clone(),
            kit,
        }
    }
}

/// Return the path to `~/.teleo/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".teleo").join("config.toml")
}

/// Load `path` (defaults when it does not exist) and apply `TELEO_*`
/// environment overrides.
pub fn load(path: &Path) -> Result<Config, String> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse the config at `path`.  Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `TELEO_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TELEO_FPS` | `agent.steps_per_second` |
/// | `TELEO_LINK_HOST` | `link.host` |
/// | `TELEO_KIT_HOST` | `kit.host` |
/// | `TELEO_REDIRECT_HOST` | `link.redirect.host` (enables the redirect) |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("TELEO_FPS")
        && let Ok(fps) = v.trim().parse::<u32>()
        && fps > 0
    {
        cfg.agent.steps_per_second = fps;
    }
    if let Some(v) = lookup("TELEO_LINK_HOST") {
        cfg.link.host = v;
    }
    if let Some(v) = lookup("TELEO_KIT_HOST") {
        cfg.kit.host = Some(v);
    }
    if let Some(v) = lookup("TELEO_REDIRECT_HOST") {
        cfg.link.redirect.get_or_insert_with(RedirectConfig::default).host = v;
    }
}

/// Save the config to a specific path, creating the parent directory.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
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
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use teleo_types::PeerIdentity;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_reference_deployment() {
        let cfg = Config::default();
        assert_eq!(cfg.agent.steps_per_second, 5);
        assert_eq!(cfg.link.peer(), PeerIdentity::new("localhost", 8000));
        assert_eq!(cfg.link.recv_port, 8001);
        assert!(cfg.link.redirect.is_none());
        assert!(cfg.kit.enabled);
        assert_eq!(cfg.kit.send_port, 8888);
        assert_eq!(cfg.kit.recv_port, 8889);
    }

    #[test]
    fn partial_file_keeps_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[agent]\nsteps_per_second = 10\n\n[link]\nredirect = { host = \"10.0.0.2\" }\n\n[kit]\nenabled = false\n",
        )?;

        let cfg = load_from(&path)?.ok_or("config missing")?;
        assert_eq!(cfg.agent.steps_per_second, 10);
        assert_eq!(cfg.agent.upkeep_cost, 0.1);
        assert_eq!(cfg.link.host, "localhost");
        assert_eq!(
            cfg.link.redirect,
            Some(RedirectConfig {
                host: "10.0.0.2".to_string(),
                port: 9001
            })
        );
        assert!(!cfg.kit.enabled);
        Ok(())
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[agent]\nsteps_per_second = \"fast\"\n").expect("write");
        let err = load_from(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse config"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_saved_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.agent.weights.w_trust = 0.75;
        cfg.kit.host = Some("192.168.1.20".to_string());
        cfg.link.redirect = Some(RedirectConfig::default());
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn config_path_points_to_teleo_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.teleo/config.toml"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn overrides_replace_hosts_and_rate() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            lookup_from(&[
                ("TELEO_FPS", "12"),
                ("TELEO_LINK_HOST", "192.168.0.50"),
                ("TELEO_KIT_HOST", "192.168.0.60"),
            ]),
        );
        assert_eq!(cfg.agent.steps_per_second, 12);
        assert_eq!(cfg.link.host, "192.168.0.50");
        assert_eq!(cfg.kit.host.as_deref(), Some("192.168.0.60"));
        assert!(cfg.link.redirect.is_none());
    }

    #[test]
    fn redirect_host_override_enables_redirect() {
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, lookup_from(&[("TELEO_REDIRECT_HOST", "10.1.1.1")]));
        let redirect = cfg.link.redirect.expect("redirect enabled");
        assert_eq!(redirect.host, "10.1.1.1");
        assert_eq!(redirect.port, 9001);
    }

    #[test]
    fn loopback_redirect_override_does_not_target_the_agent() {
        for host in ["127.0.0.1", "localhost"] {
            let mut cfg = Config::default();
            apply_overrides(&mut cfg, lookup_from(&[("TELEO_REDIRECT_HOST", host)]));
            let link = cfg.runtime_config(1, false).link;
            assert!(link.check_redirect(link.recv_port).is_ok(), "{host}");
        }
    }

    #[test]
    fn invalid_fps_override_is_ignored() {
        for bad in ["fast", "0", "-3"] {
            let mut cfg = Config::default();
            apply_overrides(&mut cfg, lookup_from(&[("TELEO_FPS", bad)]));
            assert_eq!(cfg.agent.steps_per_second, 5, "override {bad:?} should be ignored");
        }
    }

    #[test]
    fn no_kit_flag_wins_over_enabled_section() {
        let cfg = Config::default();
        let with_kit = cfg.runtime_config(2, true);
        let kit = with_kit.kit.expect("kit configured");
        assert_eq!(kit.kit_id, 2);
        assert_eq!(kit.peer(), PeerIdentity::new("192.168.0.17", 8888));
        assert!(cfg.runtime_config(2, false).kit.is_none());

        let mut disabled = Config::default();
        disabled.kit.enabled = false;
        assert!(disabled.runtime_config(2, true).kit.is_none());
    }
}
