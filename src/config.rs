use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variables that override file-based credentials. Secrets are
/// injected this way on CI schedulers so they never live in the config file.
const ENV_PORTAL_EMAIL: &str = "PORTAL_EMAIL";
const ENV_PORTAL_PASSWORD: &str = "PORTAL_PASSWORD";
const ENV_SMTP_USER: &str = "SMTP_USER";
const ENV_SMTP_PASS: &str = "SMTP_PASS";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub portal: PortalConfig,
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub mail: MailConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortalConfig {
    pub base_url: String,
    pub email: String,
    pub password: String,
}

/// A named clipping rule: target section, required organization substring,
/// and an OR-combined keyword set.
#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    pub name: String,
    /// Gazette section the filter listens to (e.g. `DO1`).
    pub section: String,
    pub organization_contains: String,
    pub keywords_any: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: String,
    #[serde(default)]
    pub smtp_pass: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub to_emails: Vec<String>,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            smtp_user: String::new(),
            smtp_pass: String::new(),
            from_email: String::new(),
            to_emails: Vec::new(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_subject_prefix() -> String {
    "[gazette-clip]".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    /// Trailing days re-scanned on each run to catch late-published extras.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
        }
    }
}

fn default_lookback_days() -> u32 {
    2
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config);

    if config.filters.is_empty() {
        anyhow::bail!("at least one [[filters]] entry is required");
    }
    for filter in &config.filters {
        if filter.keywords_any.is_empty() {
            anyhow::bail!("filter '{}' has an empty keywords_any list", filter.name);
        }
        if filter.organization_contains.trim().is_empty() {
            anyhow::bail!("filter '{}' has an empty organization_contains", filter.name);
        }
    }

    if config.run.lookback_days < 1 {
        anyhow::bail!("run.lookback_days must be >= 1");
    }

    if config.mail.enabled {
        if config.mail.smtp_host.is_empty() {
            anyhow::bail!("mail.smtp_host is required when mail.enabled");
        }
        if config.mail.from_email.is_empty() {
            anyhow::bail!("mail.from_email is required when mail.enabled");
        }
        if config.mail.to_emails.is_empty() {
            anyhow::bail!("mail.to_emails must not be empty when mail.enabled");
        }
    }

    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var(ENV_PORTAL_EMAIL) {
        config.portal.email = v;
    }
    if let Ok(v) = std::env::var(ENV_PORTAL_PASSWORD) {
        config.portal.password = v;
    }
    if let Ok(v) = std::env::var(ENV_SMTP_USER) {
        config.mail.smtp_user = v;
    }
    if let Ok(v) = std::env::var(ENV_SMTP_PASS) {
        config.mail.smtp_pass = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
[portal]
base_url = "https://portal.example.gov"
email = "file@example.com"
password = "file-secret"

[[filters]]
name = "rail"
section = "DO1"
organization_contains = "Transit Agency"
keywords_any = ["authorization", "concession"]

[storage]
db_path = "data/clip.sqlite"
"#
        .to_string()
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let mut config: Config = toml::from_str(&base_toml()).unwrap();
        apply_env_overrides(&mut config);
        assert_eq!(config.run.lookback_days, 2);
        assert_eq!(config.mail.smtp_port, 587);
        assert!(!config.mail.enabled);
        assert_eq!(config.filters.len(), 1);
        assert_eq!(config.filters[0].section, "DO1");
    }

    #[test]
    fn filter_without_keywords_rejected() {
        let toml_text = base_toml().replace(
            r#"keywords_any = ["authorization", "concession"]"#,
            "keywords_any = []",
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gclip.toml");
        std::fs::write(&path, toml_text).unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("keywords_any"));
    }

    #[test]
    fn mail_enabled_requires_host_and_recipients() {
        let toml_text = format!("{}\n[mail]\nenabled = true\n", base_toml());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gclip.toml");
        std::fs::write(&path, toml_text).unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("smtp_host"));
    }
}
