// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use snapbridge_app::{
    DEFAULT_TIME_ZONE, OffsetPolicy, ServiceType, TimeBucketNormalizer,
};
use snapbridge_console::{COMMAND_INTERVAL, Endpoint};
use snapbridge_pco::{Credentials, DEFAULT_BASE_URL, DEFAULT_PLAN_COUNT};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "snapbridge";
const CONFIG_VERSION: i64 = 1;
const DEFAULT_PCO_TIMEOUT: &str = "20s";
const DEFAULT_PRESELECT: &str = "9:00 AM";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub version: i64,
    #[serde(default)]
    pub pco: Pco,
    #[serde(default)]
    pub console: Console,
    #[serde(default)]
    pub times: Times,
    #[serde(default)]
    pub snapshots: Snapshots,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            pco: Pco::default(),
            console: Console::default(),
            times: Times::default(),
            snapshots: Snapshots::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Pco {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Console {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Times {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preselect: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Snapshots {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_existing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_count: Option<String>,
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os("SNAPBRIDGE_CONFIG_PATH") {
            return Ok(PathBuf::from(path));
        }

        let config_root = dirs::config_dir().ok_or_else(|| {
            anyhow!("cannot resolve config directory; set SNAPBRIDGE_CONFIG_PATH to the config file")
        })?;

        let app_dir = config_root.join(APP_NAME);
        fs::create_dir_all(&app_dir)
            .with_context(|| format!("create config directory {}", app_dir.display()))?;
        Ok(app_dir.join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parse TOML config {}", path.display()))?;

        let version = value
            .get("version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| {
                anyhow!(
                    "config file {} has no version; add `version = 1` and put values under [pco], [console], [times], and [snapshots]",
                    path.display()
                )
            })?;

        if version != CONFIG_VERSION {
            bail!(
                "unsupported config version {} in {}; expected version = 1",
                version,
                path.display()
            );
        }

        let config: Config = value
            .try_into()
            .with_context(|| format!("decode config {}", path.display()))?;
        config.validate(path)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config directory {}", parent.display()))?;
        }
        let rendered = toml::to_string_pretty(self).context("render config as TOML")?;
        fs::write(path, rendered).with_context(|| format!("write config {}", path.display()))
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if let Some(timeout) = &self.pco.timeout {
            let parsed = parse_duration(timeout)?;
            if parsed <= Duration::ZERO {
                bail!(
                    "pco.timeout in {} must be positive, got {}",
                    path.display(),
                    timeout
                );
            }
        }

        if let Some(count) = self.pco.plan_count
            && count <= 0
        {
            bail!(
                "pco.plan_count in {} must be positive, got {}",
                path.display(),
                count
            );
        }

        if let Some(port) = self.console.port
            && !(1..=i64::from(u16::MAX)).contains(&port)
        {
            bail!(
                "console.port in {} must be between 1 and 65535, got {}",
                path.display(),
                port
            );
        }

        if let Some(interval) = &self.console.command_interval {
            parse_duration(interval)?;
        }

        if let Some(zone) = &self.times.time_zone {
            TimeBucketNormalizer::new(zone)
                .with_context(|| format!("times.time_zone in {}", path.display()))?;
        }

        Ok(())
    }

    /// Credentials from the environment win over the file.
    pub fn pco_credentials(&self) -> Result<Credentials> {
        let app_id = env::var("SNAPBRIDGE_PCO_APP_ID")
            .ok()
            .or_else(|| self.pco.app_id.clone())
            .unwrap_or_default();
        let secret = env::var("SNAPBRIDGE_PCO_SECRET")
            .ok()
            .or_else(|| self.pco.secret.clone())
            .unwrap_or_default();
        Credentials::new(&app_id, &secret)
    }

    pub fn pco_base_url(&self) -> &str {
        self.pco
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    pub fn pco_timeout(&self) -> Result<Duration> {
        parse_duration(self.pco.timeout.as_deref().unwrap_or(DEFAULT_PCO_TIMEOUT))
    }

    pub fn plan_count(&self) -> u32 {
        self.pco
            .plan_count
            .and_then(|count| u32::try_from(count).ok())
            .filter(|count| *count > 0)
            .unwrap_or(DEFAULT_PLAN_COUNT)
    }

    pub fn saved_service_type(&self) -> Option<&ServiceType> {
        self.pco.service_type.as_ref()
    }

    pub fn remember_service_type(&mut self, service_type: &ServiceType) {
        self.pco.service_type = Some(service_type.clone());
    }

    /// Console target, with command-line values taking precedence.
    pub fn console_endpoint(&self, host: Option<&str>, port: Option<&str>) -> Result<Endpoint> {
        let host = host
            .map(str::to_owned)
            .or_else(|| self.console.host.clone())
            .unwrap_or_default();
        let port = port
            .map(str::to_owned)
            .or_else(|| self.console.port.map(|port| port.to_string()))
            .unwrap_or_default();
        Endpoint::parse(&host, &port)
    }

    pub fn command_interval(&self) -> Result<Duration> {
        match &self.console.command_interval {
            Some(raw) => parse_duration(raw),
            None => Ok(COMMAND_INTERVAL),
        }
    }

    pub fn time_zone(&self) -> &str {
        self.times.time_zone.as_deref().unwrap_or(DEFAULT_TIME_ZONE)
    }

    pub fn preselect(&self) -> &str {
        self.times.preselect.as_deref().unwrap_or(DEFAULT_PRESELECT)
    }

    /// `existing` from the command line implies the console already has snapshots.
    pub fn offset_policy(&self, existing: Option<&str>) -> OffsetPolicy {
        match existing {
            Some(count) => OffsetPolicy {
                has_existing: true,
                existing_count: count.to_owned(),
            },
            None => OffsetPolicy {
                has_existing: self.snapshots.has_existing.unwrap_or(false),
                existing_count: self.snapshots.existing_count.clone().unwrap_or_default(),
            },
        }
    }

    pub fn example_config(path: &Path) -> String {
        format!(
            "# snapbridge config\n# Place this file at: {}\n\nversion = 1\n\n[pco]\n# Personal access token from https://api.planningcenteronline.com/oauth/applications\n# (or set SNAPBRIDGE_PCO_APP_ID / SNAPBRIDGE_PCO_SECRET)\napp_id = \"\"\nsecret = \"\"\nbase_url = \"{}\"\ntimeout = \"{}\"\nplan_count = {}\n\n[console]\n# DiGiCo OSC receive address\nhost = \"192.168.1.50\"\nport = 8000\ncommand_interval = \"200ms\"\n\n[times]\ntime_zone = \"{}\"\npreselect = \"{}\"\n\n[snapshots]\nhas_existing = false\nexisting_count = \"0\"\n",
            path.display(),
            DEFAULT_BASE_URL,
            DEFAULT_PCO_TIMEOUT,
            DEFAULT_PLAN_COUNT,
            DEFAULT_TIME_ZONE,
            DEFAULT_PRESELECT,
        )
    }
}

fn parse_duration(raw: &str) -> Result<Duration> {
    if let Some(value) = raw.strip_suffix("ms") {
        let millis: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(value) = raw.strip_suffix('s') {
        let secs: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(value) = raw.strip_suffix('m') {
        let mins: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_secs(mins * 60));
    }

    bail!("invalid duration {raw:?}; use one of: <N>ms, <N>s, <N>m (for example 200ms or 20s)")
}

#[cfg(test)]
mod tests {
    use super::{Config, parse_duration};
    use anyhow::Result;
    use snapbridge_app::ServiceType;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    fn write_config(content: &str) -> Result<(tempfile::TempDir, PathBuf)> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        std::fs::write(&path, content)?;
        Ok((temp, path))
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[test]
    fn missing_config_uses_defaults() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let config = Config::load(&temp.path().join("missing.toml"))?;
        assert_eq!(config.version, 1);
        assert_eq!(config.time_zone(), "America/Chicago");
        assert_eq!(config.preselect(), "9:00 AM");
        assert_eq!(config.plan_count(), 5);
        assert_eq!(config.command_interval()?, Duration::from_millis(200));
        assert_eq!(config.pco_timeout()?, Duration::from_secs(20));
        Ok(())
    }

    #[test]
    fn unversioned_config_is_rejected_with_actionable_message() -> Result<()> {
        let (_temp, path) = write_config("[console]\nhost = \"10.0.0.5\"\n")?;
        let error = Config::load(&path).expect_err("unversioned config should fail");
        let message = error.to_string();
        assert!(message.contains("version = 1"));
        assert!(message.contains("[console]"));
        Ok(())
    }

    #[test]
    fn unsupported_config_version_is_rejected() -> Result<()> {
        let (_temp, path) = write_config("version = 7\n")?;
        let error = Config::load(&path).expect_err("v7 config should fail");
        assert!(error.to_string().contains("unsupported config version 7"));
        Ok(())
    }

    #[test]
    fn malformed_config_returns_parse_error() -> Result<()> {
        let (_temp, path) = write_config("{{not toml")?;
        let error = Config::load(&path).expect_err("malformed config should fail");
        assert!(error.to_string().contains("parse TOML config"));
        Ok(())
    }

    #[test]
    fn full_config_parses() -> Result<()> {
        let (_temp, path) = write_config(
            "version = 1\n[pco]\nbase_url = \"https://pco.example/services/v2/\"\ntimeout = \"5s\"\nplan_count = 3\n[pco.service_type]\nid = \"77\"\nname = \"Sunday\"\n[console]\nhost = \"10.0.0.5\"\nport = 8000\ncommand_interval = \"250ms\"\n[times]\ntime_zone = \"America/New_York\"\npreselect = \"10:30 AM\"\n[snapshots]\nhas_existing = true\nexisting_count = \"12\"\n",
        )?;

        let config = Config::load(&path)?;
        assert_eq!(config.pco_base_url(), "https://pco.example/services/v2");
        assert_eq!(config.pco_timeout()?, Duration::from_secs(5));
        assert_eq!(config.plan_count(), 3);
        assert_eq!(
            config.saved_service_type().map(|st| st.name.as_str()),
            Some("Sunday")
        );
        assert_eq!(config.console_endpoint(None, None)?.to_string(), "10.0.0.5:8000");
        assert_eq!(config.command_interval()?, Duration::from_millis(250));
        assert_eq!(config.time_zone(), "America/New_York");
        assert_eq!(config.preselect(), "10:30 AM");
        assert_eq!(config.offset_policy(None).resolve(), 12);
        Ok(())
    }

    #[test]
    fn command_line_values_override_file() -> Result<()> {
        let (_temp, path) = write_config(
            "version = 1\n[console]\nhost = \"10.0.0.5\"\nport = 8000\n[snapshots]\nhas_existing = false\n",
        )?;
        let config = Config::load(&path)?;
        let endpoint = config.console_endpoint(Some("10.0.0.9"), Some("9000"))?;
        assert_eq!(endpoint.to_string(), "10.0.0.9:9000");
        assert_eq!(config.offset_policy(Some("4")).resolve(), 4);
        assert_eq!(config.offset_policy(Some("-5")).resolve(), 0);
        assert_eq!(config.offset_policy(None).resolve(), 0);
        Ok(())
    }

    #[test]
    fn missing_console_port_is_rejected_before_send() -> Result<()> {
        let (_temp, path) = write_config("version = 1\n[console]\nhost = \"10.0.0.5\"\n")?;
        let config = Config::load(&path)?;
        let error = config
            .console_endpoint(None, None)
            .expect_err("missing port should fail");
        assert!(error.to_string().contains("console port is required"));
        Ok(())
    }

    #[test]
    fn invalid_values_are_validated() -> Result<()> {
        for content in [
            "version = 1\n[console]\nport = 70000\n",
            "version = 1\n[pco]\nplan_count = 0\n",
            "version = 1\n[pco]\ntimeout = \"0s\"\n",
            "version = 1\n[times]\ntime_zone = \"Nowhere/Special\"\n",
            "version = 1\n[console]\ncommand_interval = \"soon\"\n",
        ] {
            let (_temp, path) = write_config(content)?;
            assert!(Config::load(&path).is_err(), "expected failure for {content:?}");
        }
        Ok(())
    }

    #[test]
    fn saved_service_type_round_trips_through_file() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.console.host = Some("10.0.0.5".to_owned());
        config.remember_service_type(&ServiceType {
            id: "77".into(),
            name: "Sunday Morning".to_owned(),
        });
        config.save(&path)?;

        let reloaded = Config::load(&path)?;
        assert_eq!(reloaded.saved_service_type(), config.saved_service_type());
        assert_eq!(reloaded.console.host.as_deref(), Some("10.0.0.5"));
        Ok(())
    }

    #[test]
    fn credentials_prefer_environment() -> Result<()> {
        let _guard = env_lock();
        let (_temp, path) =
            write_config("version = 1\n[pco]\napp_id = \"file-id\"\nsecret = \"file-secret\"\n")?;
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("SNAPBRIDGE_PCO_APP_ID", "env-id");
        }
        let config = Config::load(&path)?;
        let credentials = config.pco_credentials();
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("SNAPBRIDGE_PCO_APP_ID");
        }
        assert_eq!(credentials?.app_id(), "env-id");
        Ok(())
    }

    #[test]
    fn missing_credentials_are_reported() -> Result<()> {
        let _guard = env_lock();
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::remove_var("SNAPBRIDGE_PCO_APP_ID");
            std::env::remove_var("SNAPBRIDGE_PCO_SECRET");
        }
        let error = Config::default()
            .pco_credentials()
            .expect_err("no credentials should fail");
        assert!(error.to_string().contains("app id and secret"));
        Ok(())
    }

    #[test]
    fn default_path_honors_env_override() -> Result<()> {
        let _guard = env_lock();
        let temp = tempfile::tempdir()?;
        let override_path = temp.path().join("custom-config.toml");
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("SNAPBRIDGE_CONFIG_PATH", &override_path);
        }
        let resolved = Config::default_path()?;
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("SNAPBRIDGE_CONFIG_PATH");
        }
        assert_eq!(resolved, override_path);
        Ok(())
    }

    #[test]
    fn durations_parse_ms_seconds_and_minutes() -> Result<()> {
        assert_eq!(parse_duration("200ms")?, Duration::from_millis(200));
        assert_eq!(parse_duration("20s")?, Duration::from_secs(20));
        assert_eq!(parse_duration("2m")?, Duration::from_secs(120));
        assert!(parse_duration("oops").is_err());
        Ok(())
    }

    #[test]
    fn example_config_loads_cleanly() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        std::fs::write(&path, Config::example_config(&path))?;
        let config = Config::load(&path)?;
        assert_eq!(config.console_endpoint(None, None)?.port, 8000);
        Ok(())
    }
}
