//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use repofetch_core::download::{MAX_CONCURRENCY, MAX_RETRIES_LIMIT, MIN_CONCURRENCY};
use repofetch_core::{EngineConfig, Endpoints, EvictionPolicy, RepositoryId};

/// Directory name used under the user's download folder.
const DEFAULT_DOWNLOAD_FOLDER: &str = "huggingface_models";

/// Upper bound for `max_depth` in the config file.
const MAX_DEPTH_LIMIT: usize = 20;

/// Key/value file configuration for repofetch defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Root folder for downloads without an explicit target directory.
    pub download_dir: Option<PathBuf>,
    /// Default concurrent transfers (same range as CLI).
    pub concurrency: Option<usize>,
    /// Default retries per file (same range as CLI).
    pub max_retries: Option<u32>,
    pub max_files: Option<usize>,
    pub max_depth: Option<usize>,
    /// Default branch, tag or commit.
    pub revision: Option<String>,
    /// Listing cache entry ceiling.
    pub cache_max_entries: Option<usize>,
    pub eviction: Option<EvictionPolicy>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency)
        {
            bail!(
                "Invalid config value for `concurrency`: {concurrency}. Expected range: {MIN_CONCURRENCY}..={MAX_CONCURRENCY}"
            );
        }

        if let Some(max_retries) = self.max_retries
            && max_retries > MAX_RETRIES_LIMIT
        {
            bail!(
                "Invalid config value for `max_retries`: {max_retries}. Expected range: 0..={MAX_RETRIES_LIMIT}"
            );
        }

        if self.max_files == Some(0) {
            bail!("Invalid config value for `max_files`: 0. Expected a positive integer");
        }

        if let Some(max_depth) = self.max_depth
            && max_depth > MAX_DEPTH_LIMIT
        {
            bail!(
                "Invalid config value for `max_depth`: {max_depth}. Expected range: 0..={MAX_DEPTH_LIMIT}"
            );
        }

        if self.cache_max_entries == Some(0) {
            bail!("Invalid config value for `cache_max_entries`: 0. Expected a positive integer");
        }

        if let Some(revision) = &self.revision
            && revision.trim().is_empty()
        {
            bail!("Invalid config value for `revision`: expected a non-empty string");
        }

        Ok(())
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
    /// Indicates whether configuration was loaded from disk.
    pub loaded_from_file: bool,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/repofetch/config.toml`
/// 2. `$HOME/.config/repofetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("repofetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("repofetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig {
            path,
            config: None,
            loaded_from_file: false,
        });
    };

    if !path_ref.exists() {
        return Ok(LoadedConfig {
            path,
            config: None,
            loaded_from_file: false,
        });
    }

    let config = load_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config: Some(config),
        loaded_from_file: true,
    })
}

/// Loads and validates the config file at `path`.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let line_no = line_index + 1;

        match key {
            "download_dir" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `download_dir` value on line {line_no}"))?;
                cfg.download_dir = Some(PathBuf::from(parsed));
            }
            "concurrency" => {
                let parsed = parse_integer_usize(value)
                    .with_context(|| format!("Invalid `concurrency` value on line {line_no}"))?;
                cfg.concurrency = Some(parsed);
            }
            "max_retries" => {
                let parsed = parse_integer_usize(value)
                    .with_context(|| format!("Invalid `max_retries` value on line {line_no}"))?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("max_retries out of range for u32"))?;
                cfg.max_retries = Some(n);
            }
            "max_files" => {
                let parsed = parse_integer_usize(value)
                    .with_context(|| format!("Invalid `max_files` value on line {line_no}"))?;
                cfg.max_files = Some(parsed);
            }
            "max_depth" => {
                let parsed = parse_integer_usize(value)
                    .with_context(|| format!("Invalid `max_depth` value on line {line_no}"))?;
                cfg.max_depth = Some(parsed);
            }
            "revision" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `revision` value on line {line_no}"))?;
                cfg.revision = Some(parsed);
            }
            "cache_max_entries" => {
                let parsed = parse_integer_usize(value).with_context(|| {
                    format!("Invalid `cache_max_entries` value on line {line_no}")
                })?;
                cfg.cache_max_entries = Some(parsed);
            }
            "eviction" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `eviction` value on line {line_no}"))?;
                let policy = parsed
                    .parse::<EvictionPolicy>()
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("Invalid `eviction` value on line {line_no}"))?;
                cfg.eviction = Some(policy);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_usize(raw_value: &str) -> Result<usize> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    usize::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range"))
}

/// Settings read from the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// `HUGGINGFACE_TOKEN`, else `HF_TOKEN`.
    pub token: Option<String>,
    /// `HUGGINGFETCH_DOWNLOAD_DIR`.
    pub download_dir: Option<PathBuf>,
    /// `HF_DOWNLOAD_TIMEOUT`, in seconds.
    pub download_timeout: Option<Duration>,
    /// `HF_ENDPOINT`, the hub root serving both APIs.
    pub endpoint: Option<String>,
}

impl EnvConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the variables through `lookup`; empty values count as unset.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let download_timeout = get("HF_DOWNLOAD_TIMEOUT").and_then(|raw| {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                _ => {
                    tracing::warn!(value = %raw, "ignoring invalid HF_DOWNLOAD_TIMEOUT");
                    None
                }
            }
        });
        Self {
            token: get("HUGGINGFACE_TOKEN").or_else(|| get("HF_TOKEN")),
            download_dir: get("HUGGINGFETCH_DOWNLOAD_DIR").map(PathBuf::from),
            download_timeout,
            endpoint: get("HF_ENDPOINT"),
        }
    }
}

/// Builds the engine configuration.
///
/// Precedence per field: CLI flag, environment, config file, library default.
pub fn build_engine_config(
    cli_token: Option<&str>,
    cli_endpoint: Option<&str>,
    env: &EnvConfig,
    file: &FileConfig,
) -> Result<EngineConfig> {
    let mut config = EngineConfig {
        token: cli_token
            .map(str::to_string)
            .or_else(|| env.token.clone()),
        ..EngineConfig::default()
    };

    if let Some(root) = cli_endpoint.or(env.endpoint.as_deref()) {
        config.endpoints = Endpoints::from_hub_root(root)
            .with_context(|| format!("Invalid hub endpoint '{root}'"))?;
    }

    if let Some(concurrency) = file.concurrency {
        config.download.concurrency = concurrency;
    }
    if let Some(max_retries) = file.max_retries {
        config.download.max_retries = max_retries;
    }
    if let Some(ceiling) = env.download_timeout {
        config.download.timeout.ceiling = ceiling.max(config.download.timeout.floor);
    }
    if let Some(max_entries) = file.cache_max_entries {
        config.cache.max_entries = max_entries;
    }
    if let Some(eviction) = file.eviction {
        config.cache.eviction = eviction;
    }

    Ok(config)
}

/// Directory a download writes into.
///
/// An explicit directory is used as is; otherwise the repository gets its
/// own `owner--name` folder under the configured download root.
#[must_use]
pub fn resolve_target_dir(
    explicit: Option<&Path>,
    repo: &RepositoryId,
    env: &EnvConfig,
    file: &FileConfig,
) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    let root = env
        .download_dir
        .clone()
        .or_else(|| file.download_dir.clone())
        .unwrap_or_else(default_download_root);
    root.join(repo.folder_name())
}

fn default_download_root() -> PathBuf {
    env_var_non_empty_os("HOME").map_or_else(
        || PathBuf::from("models"),
        |home| {
            PathBuf::from(home)
                .join("Downloads")
                .join(DEFAULT_DOWNLOAD_FOLDER)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_string())
        }
    }

    // ==================== Config File Tests ====================

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
concurrency = 8
revision = "v1.0"
"#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.concurrency, Some(8));
        assert_eq!(cfg.revision.as_deref(), Some("v1.0"));
        assert!(cfg.download_dir.is_none());
    }

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"
download_dir = "/data/models"
concurrency = 4
max_retries = 2
max_files = 500
max_depth = 5
revision = "main"
cache_max_entries = 50
eviction = "lfu"
"#,
        )
        .expect("full config should parse");
        assert_eq!(cfg.download_dir, Some(PathBuf::from("/data/models")));
        assert_eq!(cfg.max_retries, Some(2));
        assert_eq!(cfg.max_files, Some(500));
        assert_eq!(cfg.max_depth, Some(5));
        assert_eq!(cfg.cache_max_entries, Some(50));
        assert_eq!(cfg.eviction, Some(EvictionPolicy::Lfu));
    }

    #[test]
    fn test_parse_config_rejects_invalid_concurrency() {
        let err = parse_config_str("concurrency = 0").expect_err("invalid concurrency expected");
        assert!(
            err.to_string().contains("concurrency"),
            "expected concurrency validation error"
        );
    }

    #[test]
    fn test_parse_config_rejects_invalid_max_retries() {
        let err = parse_config_str("max_retries = 11").expect_err("invalid max_retries expected");
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_parse_config_rejects_zero_max_files() {
        let err = parse_config_str("max_files = 0").expect_err("invalid max_files expected");
        assert!(err.to_string().contains("max_files"));
    }

    #[test]
    fn test_parse_config_rejects_numeric_values_with_trailing_tokens() {
        let err =
            parse_config_str("concurrency = 4 trailing").expect_err("expected trailing token error");
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_parse_config_rejects_unquoted_string() {
        let err = parse_config_str("revision = main").expect_err("expected quoting error");
        assert!(err.to_string().contains("revision"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_eviction() {
        let err = parse_config_str(r#"eviction = "random""#).expect_err("unknown policy");
        assert!(err.to_string().contains("eviction"));
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r##"
concurrency = 4 # workers
revision = "refs/pr/1" # review branch
"##,
        )
        .expect("config with comments should parse");
        assert_eq!(cfg.concurrency, Some(4));
        assert_eq!(cfg.revision.as_deref(), Some("refs/pr/1"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("unknown_key = 123").expect_err("unknown key error expected");
        assert!(err.to_string().contains("Unknown configuration key"));
        assert!(err.to_string().contains("unknown_key"));
    }

    #[test]
    fn test_parse_config_rejects_missing_equals() {
        let err = parse_config_str("concurrency 4").expect_err("syntax error expected");
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_load_file_config_reports_path() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_depth = 99\n").expect("write config");
        let err = load_file_config(&path).expect_err("max_depth out of range");
        assert!(format!("{err:#}").contains("max_depth"));
        assert!(err.to_string().contains("config.toml"));
    }

    // ==================== Environment Tests ====================

    #[test]
    fn test_env_config_reads_variables() {
        let vars = [
            ("HF_TOKEN", "hf_fallback"),
            ("HUGGINGFETCH_DOWNLOAD_DIR", "/tmp/models"),
            ("HF_DOWNLOAD_TIMEOUT", "600"),
            ("HF_ENDPOINT", "https://mirror.example"),
        ];
        let env = EnvConfig::from_lookup(lookup(&vars));
        assert_eq!(env.token.as_deref(), Some("hf_fallback"));
        assert_eq!(env.download_dir, Some(PathBuf::from("/tmp/models")));
        assert_eq!(env.download_timeout, Some(Duration::from_secs(600)));
        assert_eq!(env.endpoint.as_deref(), Some("https://mirror.example"));
    }

    #[test]
    fn test_env_config_prefers_huggingface_token() {
        let vars = [("HF_TOKEN", "second"), ("HUGGINGFACE_TOKEN", "first")];
        let env = EnvConfig::from_lookup(lookup(&vars));
        assert_eq!(env.token.as_deref(), Some("first"));
    }

    #[test]
    fn test_env_config_ignores_empty_and_invalid_values() {
        let vars = [("HF_TOKEN", "  "), ("HF_DOWNLOAD_TIMEOUT", "soon")];
        let env = EnvConfig::from_lookup(lookup(&vars));
        assert!(env.token.is_none());
        assert!(env.download_timeout.is_none());
    }

    // ==================== Precedence Tests ====================

    #[test]
    fn test_engine_config_defaults_without_sources() {
        let config = build_engine_config(None, None, &EnvConfig::default(), &FileConfig::default())
            .expect("defaults should build");
        assert_eq!(config.endpoints.api_base(), "https://huggingface.co/api/models");
        assert_eq!(config.download.concurrency, 5);
        assert!(config.token.is_none());
    }

    #[test]
    fn test_engine_config_cli_token_beats_env() {
        let env = EnvConfig {
            token: Some("from-env".to_string()),
            ..EnvConfig::default()
        };
        let config = build_engine_config(Some("from-cli"), None, &env, &FileConfig::default())
            .expect("config should build");
        assert_eq!(config.token.as_deref(), Some("from-cli"));

        let config = build_engine_config(None, None, &env, &FileConfig::default())
            .expect("config should build");
        assert_eq!(config.token.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_engine_config_applies_file_and_env() {
        let env = EnvConfig {
            download_timeout: Some(Duration::from_secs(300)),
            endpoint: Some("https://mirror.example".to_string()),
            ..EnvConfig::default()
        };
        let file = FileConfig {
            concurrency: Some(12),
            max_retries: Some(1),
            cache_max_entries: Some(10),
            eviction: Some(EvictionPolicy::Fifo),
            ..FileConfig::default()
        };
        let config = build_engine_config(None, None, &env, &file).expect("config should build");
        assert_eq!(config.endpoints.api_base(), "https://mirror.example/api/models");
        assert_eq!(config.download.concurrency, 12);
        assert_eq!(config.download.max_retries, 1);
        assert_eq!(config.download.timeout.ceiling, Duration::from_secs(300));
        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.cache.eviction, EvictionPolicy::Fifo);
    }

    #[test]
    fn test_engine_config_rejects_bad_endpoint() {
        let err = build_engine_config(
            None,
            Some("not a url"),
            &EnvConfig::default(),
            &FileConfig::default(),
        )
        .expect_err("invalid endpoint");
        assert!(err.to_string().contains("not a url"));
    }

    #[test]
    fn test_resolve_target_dir() {
        let repo = RepositoryId::parse("gpt2/gpt2").expect("valid id");
        let env = EnvConfig {
            download_dir: Some(PathBuf::from("/env/models")),
            ..EnvConfig::default()
        };
        let file = FileConfig {
            download_dir: Some(PathBuf::from("/file/models")),
            ..FileConfig::default()
        };

        assert_eq!(
            resolve_target_dir(Some(Path::new("out")), &repo, &env, &file),
            PathBuf::from("out")
        );
        assert_eq!(
            resolve_target_dir(None, &repo, &env, &file),
            PathBuf::from("/env/models/gpt2--gpt2")
        );
        assert_eq!(
            resolve_target_dir(None, &repo, &EnvConfig::default(), &file),
            PathBuf::from("/file/models/gpt2--gpt2")
        );
    }
}
