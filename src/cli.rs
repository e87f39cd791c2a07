use std::path::{Path, PathBuf};

use clap::Parser;

use crate::config::{substitute_env_vars, EnvProvider, SystemEnvProvider};
use crate::error::{CheckError, Result};

/// Markdown project-documentation toolbox
#[derive(Parser, Debug, Clone)]
#[command(name = "mdkit")]
#[command(about = "Format Markdown files uniformly (GFM) and validate their links")]
#[command(long_about = "
Formats given markdown files in-place following GFM, rewriting links through
the configured transforms and validating local files, header anchors, email
addresses and remote URLs.

EXAMPLES:
    mdkit docs/
    mdkit --check README.md docs/
    mdkit --links-validate --anchor-dir docs docs/
    mdkit --links-validate --links-validate-config-file .mdkit.validate.yaml docs/
    mdkit --links-localize-address-regex 'example\\.com/docs/' docs/
")]
#[command(version)]
pub struct Cli {
    /// Markdown files or directories to process
    #[arg(required = true, help = "Markdown files or directories to format")]
    pub files: Vec<PathBuf>,

    /// Check only: do not modify files, fail when formatting is needed
    #[arg(
        long = "check",
        help = "If set, files are not modified; instead a diff is printed and the exit code reflects whether files need formatting"
    )]
    pub check: bool,

    /// Anchor directory for all transformers
    #[arg(
        long = "anchor-dir",
        value_name = "DIR",
        help = "Anchor directory for link resolution; all input files must live under it. Working directory is used if not specified"
    )]
    pub anchor_dir: Option<PathBuf>,

    /// Validate all links
    #[arg(
        short = 'l',
        long = "links-validate",
        help = "If set, all links are validated (local files, anchors, emails and remote URLs)"
    )]
    pub links_validate: bool,

    /// Link validation config file
    #[arg(
        long = "links-validate-config-file",
        value_name = "FILE",
        conflicts_with = "links_validate_config",
        help = "Path to the YAML link validation config; $(VAR) environment substitution is applied to its content"
    )]
    pub links_validate_config_file: Option<PathBuf>,

    /// Inline link validation config
    #[arg(
        long = "links-validate-config",
        value_name = "YAML",
        help = "Inline YAML link validation config, alternative to --links-validate-config-file"
    )]
    pub links_validate_config: Option<String>,

    /// Localize matching remote links
    #[arg(
        long = "links-localize-address-regex",
        value_name = "REGEX",
        help = "HTTP(s) links whose address matches this regex are rewritten to paths relative to the anchor dir when the target exists locally"
    )]
    pub links_localize_address_regex: Option<String>,

    /// Preserve source newlines
    #[arg(
        long = "soft-wraps",
        help = "Preserve source newlines in rendered output instead of reflowing paragraphs"
    )]
    pub soft_wraps: bool,

    /// Disable code fence normalization
    #[arg(
        long = "no-code-format",
        help = "Disable normalization of fenced code block content"
    )]
    pub no_code_format: bool,

    /// URL cache database path
    #[arg(
        long = "cache-path",
        value_name = "FILE",
        default_value = ".mdkitcache",
        help = "Path of the SQLite database caching visited URLs"
    )]
    pub cache_path: PathBuf,

    /// Clear the URL cache on start
    #[arg(long = "clear-cache", help = "Drop all cached URL entries on start")]
    pub clear_cache: bool,

    /// File extensions to process (comma-separated)
    #[arg(
        short = 'e',
        long = "extensions",
        value_name = "EXT1,EXT2",
        default_value = "md",
        help = "File extensions collected when walking directories"
    )]
    pub extensions: String,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable debug logging")]
    pub verbose: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn get_extensions(&self) -> Vec<String> {
        self.extensions
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Load the validate configuration content from the file flag (with env
    /// substitution) or the inline flag.
    pub fn validate_config_content(&self) -> Result<String> {
        if let Some(path) = &self.links_validate_config_file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                CheckError::from(e).wrap(format!("read config file {}", path.display()))
            })?;
            return Ok(substitute_env_vars(&content, &SystemEnvProvider));
        }
        Ok(self.links_validate_config.clone().unwrap_or_default())
    }

    /// Load the validate config content substituting from the given
    /// environment, for tests.
    pub fn validate_config_content_with_env(&self, env: &dyn EnvProvider) -> Result<String> {
        if let Some(path) = &self.links_validate_config_file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                CheckError::from(e).wrap(format!("read config file {}", path.display()))
            })?;
            return Ok(substitute_env_vars(&content, env));
        }
        Ok(self.links_validate_config.clone().unwrap_or_default())
    }
}

/// Resolve the anchor directory to an absolute path and verify that every
/// input file is contained in it. Defaults to the working directory.
pub fn resolve_anchor_dir(anchor_dir: Option<&Path>, files: &[PathBuf]) -> Result<PathBuf> {
    let base = match anchor_dir {
        Some(dir) => {
            if dir.is_absolute() {
                dir.to_path_buf()
            } else {
                std::env::current_dir()
                    .map_err(|e| CheckError::from(e).wrap("resolve working dir"))?
                    .join(dir)
            }
        }
        None => std::env::current_dir()
            .map_err(|e| CheckError::from(e).wrap("resolve working dir"))?,
    };

    for file in files {
        if !file.starts_with(&base) {
            return Err(CheckError::Config(format!(
                "anchor dir {} is not in path of provided file {}",
                base.display(),
                file.display()
            )));
        }
    }
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extensions_split() {
        let cli = Cli::parse_from(["mdkit", "--extensions", "md, markdown", "x.md"]);
        assert_eq!(cli.get_extensions(), vec!["md", "markdown"]);
    }

    #[test]
    fn test_config_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "mdkit",
            "--links-validate-config-file",
            "a.yaml",
            "--links-validate-config",
            "version: 1",
            "x.md",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_resolve_anchor_dir_prefix_check() {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        let inside = docs.join("a.md");
        let outside = dir.path().join("b.md");

        assert_eq!(
            resolve_anchor_dir(Some(&docs), &[inside.clone()]).unwrap(),
            docs
        );
        let err = resolve_anchor_dir(Some(&docs), &[outside]).unwrap_err();
        assert!(err.to_string().contains("not in path"));
    }

    #[test]
    fn test_inline_config_content() {
        let cli = Cli::parse_from(["mdkit", "--links-validate-config", "version: 1", "x.md"]);
        assert_eq!(cli.validate_config_content().unwrap(), "version: 1");
    }
}
