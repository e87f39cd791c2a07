//! Link transform chain and the localizer transform.
//!
//! A [`LinkTransformer`] may rewrite a link destination while the document
//! renders and defer per-link checks until `close` is called for the file.
//! Transforms compose through [`TransformChain`], which applies them in
//! order and closes every member even when earlier ones fail.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::anchors::{abs_local_link, abs_to_rel_link, clean_join, AnchorIndex};
use crate::diagnostics::Diagnostics;
use crate::error::Result;

/// Matches destinations that point at a remote HTTP(S) target.
pub static REMOTE_LINK_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^http[s]?://").expect("static pattern"));

/// Where a link occurrence came from: the absolute document path and the
/// comma-joined 1-based line numbers the destination appears on.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub filepath: PathBuf,
    pub line_numbers: String,
}

impl SourceContext {
    pub fn new(filepath: PathBuf) -> Self {
        Self {
            filepath,
            line_numbers: String::new(),
        }
    }

    pub fn with_lines(&self, line_numbers: String) -> Self {
        Self {
            filepath: self.filepath.clone(),
            line_numbers,
        }
    }
}

/// A transform applied to every link destination of a document.
///
/// `transform_destination` runs synchronously during the render walk and
/// must return the destination byte-identically when it has nothing to do.
/// `close` is called once per file and drains any deferred work.
#[async_trait]
pub trait LinkTransformer: Send {
    fn transform_destination(&mut self, ctx: &SourceContext, destination: &str) -> Result<String>;

    async fn close(&mut self, ctx: &SourceContext) -> Result<()>;
}

/// Ordered pipeline of link transforms.
#[derive(Default)]
pub struct TransformChain {
    chain: Vec<Box<dyn LinkTransformer>>,
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, transformer: Box<dyn LinkTransformer>) -> Self {
        self.chain.push(transformer);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Run the destination through every transform in order; the first
    /// failure aborts the walk.
    pub fn transform_destination(
        &mut self,
        ctx: &SourceContext,
        destination: &str,
    ) -> Result<String> {
        let mut dest = destination.to_string();
        for transformer in &mut self.chain {
            dest = transformer.transform_destination(ctx, &dest)?;
        }
        Ok(dest)
    }

    /// Close every transform, combining their errors.
    pub async fn close(&mut self, ctx: &SourceContext) -> Result<()> {
        let mut diag = Diagnostics::new();
        for transformer in &mut self.chain {
            diag.add_result(transformer.close(ctx).await);
        }
        diag.into_result()
    }
}

/// Rewrites remote links that match the configured address regex to local
/// relative paths when the target exists under the anchor directory, and
/// normalizes local destinations to relative form. Destinations that do not
/// resolve locally are left untouched.
pub struct Localizer {
    address: Regex,
    anchor_dir: PathBuf,
    local_links: AnchorIndex,
}

impl Localizer {
    pub fn new(address: Regex, anchor_dir: &Path) -> Self {
        Self {
            address,
            anchor_dir: anchor_dir.to_path_buf(),
            local_links: AnchorIndex::new(),
        }
    }
}

#[async_trait]
impl LinkTransformer for Localizer {
    fn transform_destination(&mut self, ctx: &SourceContext, destination: &str) -> Result<String> {
        if let Some(m) = REMOTE_LINK_PREFIX_RE.find(destination) {
            // URL: strip the scheme, then the matched address prefix.
            let without_scheme = &destination[m.end()..];
            let Some(addr) = self.address.find(without_scheme) else {
                return Ok(destination.to_string());
            };
            let candidate = clean_join(&self.anchor_dir, &without_scheme[addr.end()..]);
            if let Err(err) = self.local_links.lookup(&candidate) {
                tracing::debug!(
                    destination,
                    error = %err,
                    "attempted localization failed, no such local link; skipping"
                );
                return Ok(destination.to_string());
            }
            return Ok(abs_to_rel_link(&candidate, &ctx.filepath));
        }

        // Relative or absolute path.
        let candidate = abs_local_link(&self.anchor_dir, &ctx.filepath, destination);
        if let Err(err) = self.local_links.lookup(&candidate) {
            tracing::debug!(
                destination,
                error = %err,
                "attempted localization failed, no such local link; skipping"
            );
            return Ok(destination.to_string());
        }
        Ok(abs_to_rel_link(&candidate, &ctx.filepath))
    }

    async fn close(&mut self, _ctx: &SourceContext) -> Result<()> {
        Ok(())
    }
}
