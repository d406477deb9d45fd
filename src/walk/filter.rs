//! Glob patterns, file categories and the walk filter predicate.
//!
//! # Glob Syntax
//!
//! | Token | Matches |
//! |-------|---------|
//! | `*` | any run of characters except `/` |
//! | `?` | one character except `/` |
//! | `**` | any run of characters including `/` |
//! | `[abc]`, `[!abc]` | character class |
//! | `{a,b}` | alternation |
//!
//! A pattern without `/` is matched against the file name, so `*.json`
//! selects JSON files at any depth and `config.json` selects every file
//! named `config.json`.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::entry::FileEntry;
use crate::error::RepositoryError;

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
    name_only: bool,
}

impl GlobPattern {
    /// Compiles `pattern`.
    ///
    /// # Errors
    ///
    /// [`crate::ErrorCode::InvalidParams`] for empty or malformed patterns.
    pub fn new(pattern: &str) -> Result<Self, RepositoryError> {
        Self::build(pattern, false)
    }

    /// Compiles `pattern` for case-insensitive matching.
    ///
    /// # Errors
    ///
    /// [`crate::ErrorCode::InvalidParams`] for empty or malformed patterns.
    pub fn case_insensitive(pattern: &str) -> Result<Self, RepositoryError> {
        Self::build(pattern, true)
    }

    fn build(pattern: &str, case_insensitive: bool) -> Result<Self, RepositoryError> {
        let trimmed = pattern.trim().trim_start_matches("./");
        if trimmed.is_empty() {
            return Err(RepositoryError::invalid_params(
                "pattern",
                pattern,
                "glob pattern must not be empty",
            ));
        }
        let translated = translate(trimmed).map_err(|message| {
            RepositoryError::invalid_params("pattern", pattern, message)
        })?;
        let regex = RegexBuilder::new(&translated)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| {
                RepositoryError::invalid_params("pattern", pattern, format!("invalid glob: {e}"))
            })?;
        Ok(Self {
            source: trimmed.to_string(),
            regex,
            name_only: !trimmed.contains('/'),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when `path` (POSIX, repository-relative) matches.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let path = path.trim_start_matches('/');
        if self.name_only {
            let name = path.rsplit('/').next().unwrap_or(path);
            self.regex.is_match(name)
        } else {
            self.regex.is_match(path)
        }
    }
}

impl fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Glob predicate over a single pattern. Malformed patterns never match.
#[must_use]
pub fn matches(path: &str, pattern: &str) -> bool {
    GlobPattern::new(pattern).is_ok_and(|glob| glob.matches(path))
}

fn translate(glob: &str) -> Result<String, String> {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    let mut brace_depth = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    if chars.get(i + 2) == Some(&'/') {
                        out.push_str("(?:.*/)?");
                        i += 3;
                    } else {
                        out.push_str(".*");
                        i += 2;
                    }
                    continue;
                }
                out.push_str("[^/]*");
            }
            '?' => out.push_str("[^/]"),
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .map(|offset| i + 1 + offset)
                    .ok_or_else(|| format!("unclosed '[' in pattern '{glob}'"))?;
                push_class(&mut out, &chars[i + 1..close])
                    .map_err(|message| format!("{message} in pattern '{glob}'"))?;
                i = close + 1;
                continue;
            }
            '{' => {
                brace_depth += 1;
                out.push_str("(?:");
            }
            '}' if brace_depth > 0 => {
                brace_depth -= 1;
                out.push(')');
            }
            ',' if brace_depth > 0 => out.push('|'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }
    if brace_depth > 0 {
        return Err(format!("unclosed '{{' in pattern '{glob}'"));
    }
    out.push('$');
    Ok(out)
}

/// Writes a glob character class as a regex class.
///
/// Only ranges survive untranslated. Every other ASCII symbol is escaped so
/// regex class syntax (`&&`, `--`, `~~`, `[:alpha:]`, nested `[`) stays literal.
fn push_class(out: &mut String, body: &[char]) -> Result<(), String> {
    let (negate, body) = match body.split_first() {
        Some(('!' | '^', rest)) => (true, rest),
        _ => (false, body),
    };
    if body.is_empty() {
        return Err("empty character class".to_string());
    }
    out.push('[');
    if negate {
        out.push('^');
    }
    let last = body.len() - 1;
    for (j, &ch) in body.iter().enumerate() {
        let range_dash = ch == '-'
            && j != 0
            && j != last
            && body[j - 1] != '-'
            && body[j + 1] != '-';
        if ch.is_ascii_punctuation() && !range_dash {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push(']');
    Ok(())
}

static PRESET_GLOBS: LazyLock<Vec<(FileCategory, Vec<GlobPattern>)>> = LazyLock::new(|| {
    FileCategory::PRESETS
        .into_iter()
        .map(|category| {
            let globs = category
                .patterns()
                .iter()
                .filter_map(|pattern| GlobPattern::new(pattern).ok())
                .collect();
            (category, globs)
        })
        .collect()
});

/// Preset file categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Models,
    Configs,
    Docs,
    Code,
    Data,
    Media,
    Archives,
    Other,
}

impl FileCategory {
    /// Categories in match priority order (excluding `Other`).
    pub const PRESETS: [Self; 7] = [
        Self::Models,
        Self::Configs,
        Self::Docs,
        Self::Code,
        Self::Data,
        Self::Media,
        Self::Archives,
    ];

    /// Glob patterns defining the category.
    #[must_use]
    pub fn patterns(self) -> &'static [&'static str] {
        match self {
            Self::Models => &[
                "*.safetensors", "*.bin", "*.pt", "*.pth", "*.onnx", "*.ckpt", "*.h5", "*.gguf",
                "*.ggml",
            ],
            Self::Configs => &["*.json", "*.yaml", "*.yml", "*.toml", "config.*"],
            Self::Docs => &["*.md", "*.txt", "*.rst", "README*", "LICENSE*"],
            Self::Code => &["*.py", "*.js", "*.ts", "*.jsx", "*.tsx", "*.java", "*.cpp", "*.c"],
            Self::Data => &["*.csv", "*.tsv", "*.jsonl", "*.parquet", "*.arrow"],
            Self::Media => &["*.jpg", "*.jpeg", "*.png", "*.gif", "*.mp4", "*.mp3", "*.wav"],
            Self::Archives => &["*.zip", "*.tar", "*.tar.gz", "*.tgz", "*.tar.bz2", "*.rar", "*.7z"],
            Self::Other => &[],
        }
    }

    /// First preset whose patterns match `path`, else `Other`.
    #[must_use]
    pub fn of(path: &str) -> Self {
        PRESET_GLOBS
            .iter()
            .find(|(_, globs)| globs.iter().any(|glob| glob.matches(path)))
            .map_or(Self::Other, |(category, _)| *category)
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Models => "models",
            Self::Configs => "configs",
            Self::Docs => "docs",
            Self::Code => "code",
            Self::Data => "data",
            Self::Media => "media",
            Self::Archives => "archives",
            Self::Other => "other",
        })
    }
}

impl FromStr for FileCategory {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "models" => Ok(Self::Models),
            "configs" => Ok(Self::Configs),
            "docs" => Ok(Self::Docs),
            "code" => Ok(Self::Code),
            "data" => Ok(Self::Data),
            "media" => Ok(Self::Media),
            "archives" => Ok(Self::Archives),
            "other" => Ok(Self::Other),
            _ => Err(RepositoryError::invalid_params(
                "file_types",
                s,
                format!("unknown file category '{s}'"),
            )),
        }
    }
}

/// Pure predicate applied to every listed file before it is yielded.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include: Vec<GlobPattern>,
    exclude: Vec<GlobPattern>,
    min_size: Option<u64>,
    max_size: Option<u64>,
    categories: Vec<FileCategory>,
    contains: Option<String>,
    query_glob: Option<GlobPattern>,
    paths: Option<HashSet<String>>,
}

impl FileFilter {
    /// A filter that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires a match against at least one of `patterns`.
    ///
    /// # Errors
    ///
    /// [`crate::ErrorCode::InvalidParams`] for malformed patterns.
    pub fn include<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self, RepositoryError> {
        for pattern in patterns {
            self.include.push(GlobPattern::new(pattern.as_ref())?);
        }
        Ok(self)
    }

    /// Rejects files matching any of `patterns`.
    ///
    /// # Errors
    ///
    /// [`crate::ErrorCode::InvalidParams`] for malformed patterns.
    pub fn exclude<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self, RepositoryError> {
        for pattern in patterns {
            self.exclude.push(GlobPattern::new(pattern.as_ref())?);
        }
        Ok(self)
    }

    /// Inclusive size bounds. Files of unknown size pass.
    ///
    /// # Errors
    ///
    /// [`crate::ErrorCode::InvalidParams`] when `min > max`.
    pub fn size_range(mut self, min: Option<u64>, max: Option<u64>) -> Result<Self, RepositoryError> {
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(RepositoryError::invalid_params(
                    "min_size",
                    min,
                    format!("min_size ({min}) exceeds max_size ({max})"),
                ));
            }
        }
        self.min_size = min;
        self.max_size = max;
        Ok(self)
    }

    /// Restricts to the given categories.
    #[must_use]
    pub fn categories(mut self, categories: &[FileCategory]) -> Self {
        self.categories = categories.to_vec();
        self
    }

    /// Requires a case-insensitive substring (or glob, when it contains
    /// wildcards) match against the whole path.
    ///
    /// # Errors
    ///
    /// [`crate::ErrorCode::InvalidParams`] for malformed glob queries.
    pub fn query(mut self, query: &str) -> Result<Self, RepositoryError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(self);
        }
        if query.contains(['*', '?', '[', '{']) {
            let glob = if query.contains('/') || query.starts_with("**") {
                query.to_string()
            } else {
                format!("**/{query}")
            };
            self.query_glob = Some(GlobPattern::case_insensitive(&glob)?);
        } else {
            self.contains = Some(query.to_lowercase());
        }
        Ok(self)
    }

    /// Restricts to exactly these repository paths. An empty list leaves
    /// the filter unchanged.
    #[must_use]
    pub fn paths<S: AsRef<str>>(mut self, paths: &[S]) -> Self {
        if !paths.is_empty() {
            let set = self.paths.get_or_insert_with(HashSet::new);
            set.extend(
                paths
                    .iter()
                    .map(|p| p.as_ref().trim().trim_start_matches("./").to_string()),
            );
        }
        self
    }

    /// True when no criterion is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
            && self.exclude.is_empty()
            && self.min_size.is_none()
            && self.max_size.is_none()
            && self.categories.is_empty()
            && self.contains.is_none()
            && self.query_glob.is_none()
            && self.paths.is_none()
    }

    #[must_use]
    pub fn matches(&self, file: &FileEntry) -> bool {
        let path = file.path.as_str();
        if self.paths.as_ref().is_some_and(|paths| !paths.contains(path)) {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|g| g.matches(path)) {
            return false;
        }
        if self.exclude.iter().any(|g| g.matches(path)) {
            return false;
        }
        if let Some(size) = file.size {
            if self.min_size.is_some_and(|min| size < min) {
                return false;
            }
            if self.max_size.is_some_and(|max| size > max) {
                return false;
            }
        }
        if !self.categories.is_empty() && !self.categories.contains(&FileCategory::of(path)) {
            return false;
        }
        if let Some(needle) = &self.contains {
            if !path.to_lowercase().contains(needle) {
                return false;
            }
        }
        if self.query_glob.as_ref().is_some_and(|g| !g.matches(path)) {
            return false;
        }
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn file(path: &str, size: Option<u64>) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            size,
            oid: None,
            lfs: false,
        }
    }

    // ==================== Glob Tests ====================

    #[test]
    fn test_glob_name_only_matches_any_depth() {
        assert!(matches("model.safetensors", "*.safetensors"));
        assert!(matches("unet/model.safetensors", "*.safetensors"));
        assert!(!matches("model.safetensors.index", "*.safetensors"));
    }

    #[test]
    fn test_glob_bare_name_is_exact_file_name() {
        assert!(matches("config.json", "config.json"));
        assert!(matches("text_encoder/config.json", "config.json"));
        assert!(!matches("generation_config.json", "config.json"));
    }

    #[test]
    fn test_glob_with_slash_is_anchored_to_path() {
        assert!(matches("onnx/model.onnx", "onnx/*.onnx"));
        assert!(!matches("onnx/fp16/model.onnx", "onnx/*.onnx"));
        assert!(matches("onnx/fp16/model.onnx", "onnx/**/*.onnx"));
        assert!(matches("onnx/model.onnx", "onnx/**/*.onnx"));
        assert!(matches("a/b/c.txt", "**/c.txt"));
    }

    #[test]
    fn test_glob_classes_braces_and_question_mark() {
        assert!(matches("model-1.bin", "model-[0-9].bin"));
        assert!(!matches("model-x.bin", "model-[!a-z].bin"));
        assert!(matches("model-1.bin", "model-[!a-z].bin"));
        assert!(matches("a.yaml", "*.{yml,yaml}"));
        assert!(matches("a.yml", "*.{yml,yaml}"));
        assert!(!matches("a.json", "*.{yml,yaml}"));
        assert!(matches("v1.txt", "v?.txt"));
        assert!(!matches("v10.txt", "v?.txt"));
    }

    #[test]
    fn test_glob_class_keeps_regex_class_syntax_literal() {
        assert!(matches("a&b", "a[&&]b"));
        assert!(matches("a-b", "a[-_]b"));
        assert!(matches("a_b", "a[_-]b"));
        assert!(matches("a-b", "a[x--]b"));
        assert!(!matches("ayb", "a[x--]b"));
        assert!(matches("x:.txt", "x[:alpha:].txt"));
        assert!(!matches("xb.txt", "x[:alpha:].txt"));
        assert!(matches("[v1].txt", "[[]v1].txt"));
        assert!(matches("a~b", "a[~~]b"));
        assert!(GlobPattern::new("a[]b").is_err());
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        assert!(matches("a+b(1).txt", "a+b(1).txt"));
        assert!(!matches("aXtxt", "a.txt"));
    }

    #[test]
    fn test_glob_invalid_patterns() {
        assert_eq!(
            GlobPattern::new("[abc").unwrap_err().code(),
            ErrorCode::InvalidParams
        );
        assert!(GlobPattern::new("{a,b").is_err());
        assert!(GlobPattern::new("  ").is_err());
        assert!(!matches("x", "[abc"));
    }

    // ==================== Category Tests ====================

    #[test]
    fn test_file_category_of() {
        assert_eq!(FileCategory::of("model.safetensors"), FileCategory::Models);
        assert_eq!(FileCategory::of("tokenizer/config.json"), FileCategory::Configs);
        assert_eq!(FileCategory::of("README.md"), FileCategory::Docs);
        assert_eq!(FileCategory::of("train.py"), FileCategory::Code);
        assert_eq!(FileCategory::of("data/train.parquet"), FileCategory::Data);
        assert_eq!(FileCategory::of("sample.png"), FileCategory::Media);
        assert_eq!(FileCategory::of("bundle.tar.gz"), FileCategory::Archives);
        assert_eq!(FileCategory::of(".gitattributes"), FileCategory::Other);
    }

    #[test]
    fn test_preset_globs_cover_every_pattern() {
        let compiled: Vec<usize> = PRESET_GLOBS.iter().map(|(_, globs)| globs.len()).collect();
        let declared: Vec<usize> = FileCategory::PRESETS
            .iter()
            .map(|category| category.patterns().len())
            .collect();
        assert_eq!(compiled, declared);
        assert_eq!(FileCategory::of("weights.gguf"), FileCategory::Models);
    }

    #[test]
    fn test_file_category_parse() {
        assert_eq!("Models".parse::<FileCategory>().unwrap(), FileCategory::Models);
        assert!("weights".parse::<FileCategory>().is_err());
    }

    // ==================== FileFilter Tests ====================

    #[test]
    fn test_empty_filter_accepts_everything() {
        let filter = FileFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&file("anything/at/all", None)));
    }

    #[test]
    fn test_include_and_exclude() {
        let filter = FileFilter::new()
            .include(&["*.onnx", "*.json"])
            .unwrap()
            .exclude(&["onnx/fp16/*"])
            .unwrap();
        assert!(filter.matches(&file("onnx/model.onnx", None)));
        assert!(filter.matches(&file("config.json", None)));
        assert!(!filter.matches(&file("onnx/fp16/model.onnx", None)));
        assert!(!filter.matches(&file("README.md", None)));
    }

    #[test]
    fn test_size_range() {
        let filter = FileFilter::new().size_range(Some(10), Some(100)).unwrap();
        assert!(filter.matches(&file("a", Some(10))));
        assert!(filter.matches(&file("a", Some(100))));
        assert!(!filter.matches(&file("a", Some(9))));
        assert!(!filter.matches(&file("a", Some(101))));
        assert!(filter.matches(&file("a", None)));
        assert!(FileFilter::new().size_range(Some(5), Some(1)).is_err());
    }

    #[test]
    fn test_categories() {
        let filter = FileFilter::new().categories(&[FileCategory::Models]);
        assert!(filter.matches(&file("pytorch_model.bin", None)));
        assert!(!filter.matches(&file("config.json", None)));
    }

    #[test]
    fn test_query_substring_and_glob() {
        let filter = FileFilter::new().query("Tokenizer").unwrap();
        assert!(filter.matches(&file("tokenizer.json", None)));
        assert!(filter.matches(&file("sub/my_tokenizer_config.json", None)));
        assert!(!filter.matches(&file("config.json", None)));

        let filter = FileFilter::new().query("*.ONNX").unwrap();
        assert!(!filter.is_empty());
        assert!(filter.matches(&file("onnx/deep/model.onnx", None)));
        assert!(!filter.matches(&file("model.bin", None)));
    }

    #[test]
    fn test_glob_query_narrows_include() {
        let filter = FileFilter::new()
            .include(&["*.json"])
            .unwrap()
            .query("*.onnx")
            .unwrap();
        assert!(!filter.matches(&file("config.json", None)));
        assert!(!filter.matches(&file("onnx/model.onnx", None)));

        let filter = FileFilter::new()
            .include(&["*.json"])
            .unwrap()
            .query("tokenizer*")
            .unwrap();
        assert!(filter.matches(&file("tokenizer_config.json", None)));
        assert!(!filter.matches(&file("config.json", None)));
        assert!(!filter.matches(&file("tokenizer.model", None)));
    }

    #[test]
    fn test_exact_paths() {
        let filter = FileFilter::new().paths(&["./onnx/model.onnx", "[v1].txt"]);
        assert!(filter.matches(&file("onnx/model.onnx", None)));
        assert!(filter.matches(&file("[v1].txt", None)));
        assert!(!filter.matches(&file("model.onnx", None)));
        assert!(FileFilter::new().paths::<&str>(&[]).is_empty());
    }
}
