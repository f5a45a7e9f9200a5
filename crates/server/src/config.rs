//! Server configuration: an optional TOML file, then command-line overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use cubeworld_engine::jobs::PoolConfig;
use cubeworld_engine::tick::TickBudget;
use cubeworld_engine::world::Dimensions;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory holding saved levels.
    pub world_dir: PathBuf,
    /// Level loaded (or generated) at startup.
    pub main_level: String,
    pub level_width: u16,
    pub level_height: u16,
    pub level_depth: u16,
    pub tick_interval_ms: u64,
    pub physics_budget: usize,
    pub update_budget: usize,
    /// Zero disables autosave.
    pub autosave_secs: u64,
    pub dashboard_port: u16,
    pub pool_poll_ms: u64,
    pub pool_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let budget = TickBudget::default();
        Self {
            world_dir: "world".into(),
            main_level: "main".into(),
            level_width: 128,
            level_height: 64,
            level_depth: 128,
            tick_interval_ms: 100,
            physics_budget: budget.physics,
            update_budget: budget.updates,
            autosave_secs: 300,
            dashboard_port: 8000,
            pool_poll_ms: 10,
            pool_idle_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("parsing server config")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Build the effective config from process arguments: `--config <path>`
    /// first, then the individual flag overrides.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = match flag_value(args, "--config") {
            Some(path) => Self::from_file(Path::new(path))?,
            None => Self::default(),
        };
        config.apply_args(args)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &[String]) -> Result<()> {
        if let Some(dir) = flag_value(args, "--world") {
            self.world_dir = dir.into();
        }
        if let Some(name) = flag_value(args, "--level") {
            self.main_level = name.to_string();
        }
        if let Some(port) = flag_value(args, "--dashboard-port") {
            self.dashboard_port = port
                .parse()
                .with_context(|| format!("--dashboard-port {}", port))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.level_dims().volume().is_none() {
            bail!("level dimensions must be non-zero: {:?}", self.level_dims());
        }
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be positive");
        }
        if self.main_level.is_empty() {
            bail!("main_level must not be empty");
        }
        Ok(())
    }

    pub fn level_dims(&self) -> Dimensions {
        Dimensions::new(self.level_width, self.level_height, self.level_depth)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn budget(&self) -> TickBudget {
        TickBudget {
            physics: self.physics_budget,
            updates: self.update_budget,
        }
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        (self.autosave_secs > 0).then(|| Duration::from_secs(self.autosave_secs))
    }

    pub fn pool_config(&self, name: &str) -> PoolConfig {
        PoolConfig {
            name: name.to_string(),
            poll_interval: Duration::from_millis(self.pool_poll_ms.max(1)),
            idle_timeout: Duration::from_secs(self.pool_idle_secs),
        }
    }
}

/// Value following `flag` in `args`, if present.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .skip_while(|a| *a != flag)
        .nth(1)
        .map(String::as_str)
}
