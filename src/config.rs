use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub path: PathBuf,
    pub config: SourceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source: SourceMeta,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub map: BTreeMap<String, FieldRule>,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub relevance: RelevanceConfig,
    #[serde(default)]
    pub custom: CustomConfig,
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.source.key.trim().is_empty() {
            bail!("source.key must not be empty");
        }
        if self.source.platform.trim().is_empty() {
            bail!("source.platform must not be empty");
        }

        match self.fetch.mode {
            FetchMode::Http => {
                if self.fetch.base_url.is_none() {
                    bail!("fetch.base_url is required for http mode");
                }
            }
            FetchMode::File => {
                if self.fetch.file_path.is_none() {
                    bail!("fetch.file_path is required for file mode");
                }
            }
            FetchMode::Inline => {
                if self.fetch.inline_data.is_none() {
                    bail!("fetch.inline_data is required for inline mode");
                }
            }
        }

        if self.extract.format == ExtractFormat::Html
            && self.map.is_empty()
            && !(self.custom.enabled && self.custom.parser.is_some())
        {
            bail!("map section must not be empty for html extraction");
        }

        if self.search.max_results == 0 {
            bail!("search.max_results must be at least 1");
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceMeta {
    pub key: String,
    pub platform: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub offline: bool,
    #[serde(default)]
    pub location_hint: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    #[default]
    Http,
    File,
    Inline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub mode: FetchMode,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub inline_data: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u8,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::Http,
            base_url: None,
            file_path: None,
            inline_data: None,
            headers: BTreeMap::new(),
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_page_param")]
    pub page_param: String,
    #[serde(default)]
    pub start_page: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_true")]
    pub stop_when_no_results: bool,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            page_param: default_page_param(),
            start_page: 0,
            max_pages: default_max_pages(),
            stop_when_no_results: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractFormat {
    #[default]
    Html,
    Json,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExtractConfig {
    #[serde(default)]
    pub format: ExtractFormat,
    #[serde(default)]
    pub root_selector: Option<String>,
    #[serde(default)]
    pub root_jsonpath: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FieldRule {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(rename = "const", default)]
    pub const_value: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub trim: bool,
    #[serde(default)]
    pub absolutize: bool,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub capture: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_search_results")]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_results: default_search_results(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RelevanceConfig {
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CustomConfig {
    #[serde(default)]
    pub parser: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

pub fn load_sources_from_dir(config_dir: &Path) -> Result<Vec<LoadedSource>> {
    if !config_dir.exists() {
        bail!("config dir does not exist: {}", config_dir.display());
    }

    let mut loaded = Vec::new();
    for entry in WalkDir::new(config_dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("toml") {
            continue;
        }
        loaded.push(load_source_file(path)?);
    }

    loaded.sort_by(|a, b| a.config.source.key.cmp(&b.config.source.key));
    Ok(loaded)
}

pub fn load_source_file(config_path: &Path) -> Result<LoadedSource> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("failed to read source config: {}", config_path.display()))?;
    let config: SourceConfig = toml::from_str(&text)
        .with_context(|| format!("failed to parse toml in {}", config_path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid source config {}", config_path.display()))?;
    Ok(LoadedSource {
        path: config_path.to_path_buf(),
        config,
    })
}

pub fn resolve_path(base_config_path: &Path, maybe_relative: &Path) -> Result<PathBuf> {
    if maybe_relative.is_absolute() {
        return Ok(maybe_relative.to_path_buf());
    }

    let parent = base_config_path.parent().ok_or_else(|| {
        anyhow!(
            "source config has no parent directory: {}",
            base_config_path.display()
        )
    })?;

    Ok(parent.join(maybe_relative))
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_retry_attempts() -> u8 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_max_pages() -> usize {
    1
}

fn default_search_results() -> usize {
    3
}
