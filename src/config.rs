use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_OPTION_LIMIT: usize = 5;
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_CACHE_TTL_SEC: u64 = 300;
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Engine-wide knobs. Layered as defaults, then an optional YAML file, then
/// `CHI_FORMS_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Page size used when a select field fetches its options remotely.
    pub option_limit: usize,
    pub debounce: Duration,
    /// `None` disables the client-side list cache.
    pub cache_ttl: Option<Duration>,
    pub page_size: usize,
    pub cache_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            option_limit: DEFAULT_OPTION_LIMIT,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            cache_ttl: Some(Duration::from_secs(DEFAULT_CACHE_TTL_SEC)),
            page_size: DEFAULT_PAGE_SIZE,
            cache_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    option_limit: Option<usize>,
    #[serde(default)]
    debounce_ms: Option<u64>,
    #[serde(default)]
    cache_ttl_sec: Option<u64>,
    #[serde(default)]
    page_size: Option<usize>,
    #[serde(default)]
    cache_dir: Option<PathBuf>,
}

fn ttl_from_secs(secs: u64) -> Option<Duration> {
    match secs {
        0 => None,
        s => Some(Duration::from_secs(s)),
    }
}

impl EngineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(text).context("parsing engine config")?;
        let mut cfg = Self::default();
        cfg.merge_file(file);
        Ok(cfg)
    }

    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(p) = path {
            let text =
                std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            let file: ConfigFile = serde_yaml::from_str(&text).map_err(|e| match e.location() {
                Some(loc) => anyhow::anyhow!(
                    "{}:{}:{}: {}",
                    p.display(),
                    loc.line(),
                    loc.column(),
                    e
                ),
                None => anyhow::anyhow!("{}: {}", p.display(), e),
            })?;
            cfg.merge_file(file);
        }
        cfg.merge_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    fn merge_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.option_limit {
            self.option_limit = v.max(1);
        }
        if let Some(v) = file.debounce_ms {
            self.debounce = Duration::from_millis(v);
        }
        if let Some(v) = file.cache_ttl_sec {
            self.cache_ttl = ttl_from_secs(v);
        }
        if let Some(v) = file.page_size {
            self.page_size = v.max(1);
        }
        if file.cache_dir.is_some() {
            self.cache_dir = file.cache_dir;
        }
    }

    /// Unparsable values are ignored rather than rejected.
    pub(crate) fn merge_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let num = |k: &str| lookup(k).and_then(|s| s.trim().parse::<u64>().ok());
        if let Some(v) = num("CHI_FORMS_OPTION_LIMIT") {
            self.option_limit = (v as usize).max(1);
        }
        if let Some(v) = num("CHI_FORMS_DEBOUNCE_MS") {
            self.debounce = Duration::from_millis(v);
        }
        if let Some(v) = num("CHI_FORMS_CACHE_TTL_SEC") {
            self.cache_ttl = ttl_from_secs(v);
        }
        if let Some(v) = num("CHI_FORMS_PAGE_SIZE") {
            self.page_size = (v as usize).max(1);
        }
        if let Some(dir) = lookup("CHI_FORMS_CACHE_DIR").filter(|s| !s.trim().is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }
}
