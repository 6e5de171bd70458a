//! 派生路径解析
//!
//! 节点的磁盘路径 = 下载根目录 + 从根到该节点的名称链。
//! 根目录在构造时做 `~` 与环境变量展开；未配置时返回 `ConfigurationError`，不做默认值。

use crate::config::DOWNLOAD_DIRECTORY_KEY;
use crate::error::ConfigurationError;
use regex::Regex;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("环境变量正则是常量")
    })
}

/// 展开 `~`、`$VAR` 与 `${VAR}`；未定义的变量保持原样
pub fn expand_path(raw: &str) -> PathBuf {
    let expanded = env_var_pattern().replace_all(raw, |caps: &regex::Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });

    if expanded == "~" {
        if let Some(home) = crate::dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = expanded
        .strip_prefix("~/")
        .or_else(|| expanded.strip_prefix("~\\"))
    {
        if let Some(home) = crate::dirs::home_dir() {
            return home.join(rest);
        }
    }

    PathBuf::from(expanded.into_owned())
}

/// 规范化单个名称段：本平台的路径分隔符与 `.`/`..` 不允许逃出父目录
///
/// 只替换本平台文件名里不可能出现的字符，本地扫描得到的名称原样保留。
pub fn normalize_segment(name: &str) -> Cow<'_, str> {
    if name.is_empty() {
        return Cow::Borrowed("_");
    }
    if name == "." || name == ".." {
        return Cow::Owned("_".repeat(name.len()));
    }
    let invalid = |c: char| std::path::is_separator(c) || c == '\0';
    if name.contains(invalid) {
        return Cow::Owned(name.replace(invalid, "_"));
    }
    Cow::Borrowed(name)
}

/// 派生路径解析器
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    root: Option<PathBuf>,
}

impl PathResolver {
    pub fn new(download_root: Option<&str>) -> Self {
        let root = download_root
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(expand_path);
        Self { root }
    }

    /// 未配置下载目录的解析器（仅用于不需要磁盘路径的场景）
    pub fn unconfigured() -> Self {
        Self { root: None }
    }

    pub fn is_configured(&self) -> bool {
        self.root.is_some()
    }

    /// 已展开的下载根目录
    pub fn root(&self) -> Result<&Path, ConfigurationError> {
        let root = self
            .root
            .as_deref()
            .ok_or(ConfigurationError::MissingDownloadRoot {
                key: DOWNLOAD_DIRECTORY_KEY,
            })?;

        if !root.is_absolute() {
            return Err(ConfigurationError::InvalidDownloadRoot {
                path: root.to_path_buf(),
                reason: "必须是绝对路径".to_string(),
            });
        }
        Ok(root)
    }

    /// 把根到叶的名称链拼到下载根目录上
    pub fn resolve_segments<'a, I>(&self, segments: I) -> Result<PathBuf, ConfigurationError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut path = self.root()?.to_path_buf();
        for segment in segments {
            path.push(normalize_segment(segment).as_ref());
        }
        Ok(path)
    }
}
