//! Two-pass Markdown formatter.
//!
//! The first pass parses the document and renders it with the transforms
//! installed (link rewrites, inline-HTML replacement, code-block splicing)
//! into a staging buffer; `close(file)` then drains the deferred link work
//! and surfaces the per-file diagnostics. The second pass re-parses the
//! staging buffer and renders it with no transformer, which guarantees
//! whitespace-stable, idempotent output. Do not collapse the passes: the
//! first one mutates content.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pulldown_cmark::{Event, Options, Parser};
use pulldown_cmark_to_cmark::cmark;
use similar::TextDiff;

use crate::diagnostics::Diagnostics;
use crate::error::{CheckError, Result};
use crate::extract::{transform_events, CodeBlockTransformer};
use crate::frontmatter::{self, FormatFrontMatter, FrontMatterTransformer};
use crate::metrics::LinkMetrics;
use crate::transform::{SourceContext, TransformChain};

/// Unified diffs for files that are not formatted, in check mode.
#[derive(Debug, Default)]
pub struct Diffs(Vec<String>);

impl Diffs {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    fn push(&mut self, diff: String) {
        self.0.push(diff);
    }
}

impl std::fmt::Display for Diffs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "files the same; no diff");
        }
        for diff in &self.0 {
            write!(f, "{}", diff)?;
        }
        Ok(())
    }
}

/// Markdown formatter with optional transform hooks.
pub struct Formatter {
    front_matter: Option<Box<dyn FrontMatterTransformer>>,
    link: Option<TransformChain>,
    code_block: Option<Box<dyn CodeBlockTransformer>>,
    soft_wraps: bool,
    no_code_format: bool,
    metrics: Option<Arc<LinkMetrics>>,
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter {
    pub fn new() -> Self {
        Self {
            front_matter: Some(Box::new(FormatFrontMatter)),
            link: None,
            code_block: None,
            soft_wraps: false,
            no_code_format: false,
            metrics: None,
        }
    }

    /// Override the default front-matter serialization.
    pub fn with_front_matter_transformer(
        mut self,
        transformer: Box<dyn FrontMatterTransformer>,
    ) -> Self {
        self.front_matter = Some(transformer);
        self
    }

    /// Install a link transform chain.
    pub fn with_link_transformer(mut self, chain: TransformChain) -> Self {
        self.link = Some(chain);
        self
    }

    /// Install a fenced code block transform.
    pub fn with_code_block_transformer(
        mut self,
        transformer: Box<dyn CodeBlockTransformer>,
    ) -> Self {
        self.code_block = Some(transformer);
        self
    }

    /// Preserve source newlines in rendered output instead of reflowing
    /// paragraphs.
    pub fn with_soft_wraps(mut self, soft_wraps: bool) -> Self {
        self.soft_wraps = soft_wraps;
        self
    }

    /// Disable the default normalization of code fences.
    pub fn with_no_code_format(mut self, no_code_format: bool) -> Self {
        self.no_code_format = no_code_format;
        self
    }

    /// Install a metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<LinkMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn metrics(&self) -> Option<&Arc<LinkMetrics>> {
        self.metrics.as_ref()
    }

    /// Format one document. Returns the formatted content; deferred link
    /// diagnostics for the file are returned as the error, wrapped with the
    /// file path.
    pub async fn format_content(&mut self, path: &Path, input: &str) -> Result<String> {
        let ctx = SourceContext::new(path.to_path_buf());
        let doc = frontmatter::split(path, input)?;

        let mut out = String::new();
        if let (Some(fm_transformer), Some(front_matter)) =
            (self.front_matter.as_mut(), doc.front_matter.as_ref())
        {
            if let Some(header) = fm_transformer.transform_front_matter(&ctx, front_matter)? {
                out.push_str(&String::from_utf8_lossy(&header));
            }
            fm_transformer.close(&ctx)?;
        }

        // First pass: parse, transform, render into the staging buffer.
        let events: Vec<Event> = Parser::new_ext(doc.body, md_options()).collect();
        let transformed = transform_events(
            doc.body,
            &ctx,
            doc.front_matter_lines,
            self.link.as_mut(),
            self.code_block.as_mut(),
            self.soft_wraps,
            self.no_code_format,
            events,
        )?;
        let mut staging = String::new();
        cmark(transformed.iter(), &mut staging).map_err(|e| CheckError::Format {
            path: path.to_path_buf(),
            details: format!("first formatting phase: {}", e),
        })?;
        drop(transformed);

        // Drain deferred link work; per-file diagnostics surface here.
        if let Some(chain) = self.link.as_mut() {
            chain
                .close(&ctx)
                .await
                .map_err(|e| e.wrap(path.display().to_string()))?;
        }
        if let Some(code_block) = self.code_block.as_mut() {
            code_block.close(&ctx)?;
        }

        // Second pass: no transformer, stabilizes whitespace.
        let events: Vec<Event> = Parser::new_ext(&staging, md_options()).collect();
        let plain = transform_events(
            &staging,
            &ctx,
            0,
            None,
            None,
            self.soft_wraps,
            self.no_code_format,
            events,
        )?;
        let mut body = String::new();
        cmark(plain.iter(), &mut body).map_err(|e| CheckError::Format {
            path: path.to_path_buf(),
            details: format!("second formatting phase: {}", e),
        })?;

        out.push_str(&body);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }
}

/// GFM extensions plus `{#id}` header attributes.
fn md_options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_HEADING_ATTRIBUTES
}

/// Format the files in place. Failures are aggregated per file; one file's
/// error never aborts its siblings.
pub async fn format(files: &[PathBuf], formatter: &mut Formatter) -> Result<()> {
    run(files, None, formatter).await
}

/// Dry-run variant: returns unified diffs for files whose formatted output
/// differs from their current content. Empty diffs mean everything is
/// formatted.
pub async fn is_formatted(files: &[PathBuf], formatter: &mut Formatter) -> Result<Diffs> {
    let mut diffs = Diffs::default();
    run(files, Some(&mut diffs), formatter).await?;
    Ok(diffs)
}

async fn run(
    files: &[PathBuf],
    mut diffs: Option<&mut Diffs>,
    formatter: &mut Formatter,
) -> Result<()> {
    let mut diag = Diagnostics::new();
    for file in files {
        let result = process_file(file, diffs.as_deref_mut(), formatter).await;
        diag.add_result(result);
    }
    diag.into_result()
}

async fn process_file(
    path: &Path,
    diffs: Option<&mut Diffs>,
    formatter: &mut Formatter,
) -> Result<()> {
    let input = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CheckError::from(e).wrap(format!("open {}", path.display())))?;

    let formatted = formatter.format_content(path, &input).await?;

    match diffs {
        Some(diffs) => {
            if input != formatted {
                diffs.push(unified_diff(path, &input, &formatted));
            }
            Ok(())
        }
        None => tokio::fs::write(path, formatted.as_bytes())
            .await
            .map_err(|e| CheckError::from(e).wrap(format!("write {}", path.display()))),
    }
}

fn unified_diff(path: &Path, original: &str, formatted: &str) -> String {
    let diff = TextDiff::from_lines(original, formatted);
    let mut out = String::new();
    let _ = write!(
        out,
        "{}",
        diff.unified_diff()
            .context_radius(3)
            .header(
                &path.display().to_string(),
                &format!("{} (formatted)", path.display())
            )
    );
    out
}
