//! AST walk that surfaces links to the transform chain.
//!
//! The parsed event stream is rewritten in place: link, image and autolink
//! destinations go through the [`TransformChain`]; inline HTML is rewritten
//! through an HTML tokenizer touching only `<a href>` and `<img src>`
//! attributes; fenced code blocks go through the code-block hook. Line
//! numbers are recovered by matching the literal destination against raw
//! source lines, because AST positions are unreliable once content has been
//! transformed.

use std::cell::RefCell;

use lol_html::{element, RewriteStrSettings};
use pulldown_cmark::{CodeBlockKind, CowStr, Event, LinkType, Tag, TagEnd};
use regex::Regex;

use crate::error::{CheckError, Result};
use crate::transform::{SourceContext, TransformChain};

/// Transform applied to fenced code blocks; returning `None` leaves the
/// block unchanged.
pub trait CodeBlockTransformer: Send {
    fn transform_code_block(
        &mut self,
        ctx: &SourceContext,
        info_string: &str,
        code: &str,
    ) -> Result<Option<String>>;

    fn close(&mut self, _ctx: &SourceContext) -> Result<()> {
        Ok(())
    }
}

/// Comma-joined 1-based source lines the destination appears on, offset by
/// the front-matter block so reported numbers map to original file lines.
pub(crate) fn link_lines(source: &str, link: &str, front_matter_lines: usize) -> String {
    let offset = if front_matter_lines > 0 {
        front_matter_lines + 2
    } else {
        0
    };

    // Word-ish boundary guards on both sides so destinations sharing a host
    // but differing in parameters do not cross-match.
    let pattern = format!(
        r"(?:^|[^/\-~&=#?@%a-zA-Z0-9]){}(?:$|[^/\-~&=#?@%a-zA-Z0-9])",
        regex::escape(link)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return String::new();
    };

    let mut lines = String::new();
    for (i, line) in source.lines().enumerate() {
        if re.is_match(line) {
            if !lines.is_empty() {
                lines.push(',');
            }
            lines.push_str(&(i + 1 + offset).to_string());
        }
    }
    lines
}

/// Rewrite the destinations of a parsed event stream. Destinations returned
/// unchanged by the chain are emitted byte-identically.
#[allow(clippy::too_many_arguments)]
pub(crate) fn transform_events<'a>(
    source: &'a str,
    ctx: &SourceContext,
    front_matter_lines: usize,
    mut chain: Option<&mut TransformChain>,
    mut code_block: Option<&mut Box<dyn CodeBlockTransformer>>,
    soft_wraps: bool,
    no_code_format: bool,
    events: Vec<Event<'a>>,
) -> Result<Vec<Event<'a>>> {
    let mut out = Vec::with_capacity(events.len());
    let mut iter = events.into_iter();

    while let Some(event) = iter.next() {
        match event {
            Event::Start(Tag::Link {
                link_type,
                dest_url,
                title,
                id,
            }) => {
                // Email autolinks are not link destinations to check.
                let Some(chain) = chain.as_deref_mut().filter(|_| link_type != LinkType::Email)
                else {
                    out.push(Event::Start(Tag::Link {
                        link_type,
                        dest_url,
                        title,
                        id,
                    }));
                    continue;
                };

                let lines = link_lines(source, &dest_url, front_matter_lines);
                let new_dest = chain.transform_destination(&ctx.with_lines(lines), &dest_url)?;

                if link_type == LinkType::Autolink && new_dest != dest_url.as_ref() {
                    // A rewritten autolink cannot keep its `<...>` form;
                    // replace the whole node with a literal string.
                    for inner in iter.by_ref() {
                        if matches!(inner, Event::End(TagEnd::Link)) {
                            break;
                        }
                    }
                    out.push(Event::Text(CowStr::from(new_dest)));
                } else {
                    out.push(Event::Start(Tag::Link {
                        link_type,
                        dest_url: CowStr::from(new_dest),
                        title,
                        id,
                    }));
                }
            }

            Event::Start(Tag::Image {
                link_type,
                dest_url,
                title,
                id,
            }) => {
                let Some(chain) = chain.as_deref_mut() else {
                    out.push(Event::Start(Tag::Image {
                        link_type,
                        dest_url,
                        title,
                        id,
                    }));
                    continue;
                };
                let lines = link_lines(source, &dest_url, front_matter_lines);
                let new_dest = chain.transform_destination(&ctx.with_lines(lines), &dest_url)?;
                out.push(Event::Start(Tag::Image {
                    link_type,
                    dest_url: CowStr::from(new_dest),
                    title,
                    id,
                }));
            }

            Event::Start(Tag::HtmlBlock) => {
                let mut html = String::new();
                for inner in iter.by_ref() {
                    match inner {
                        Event::Html(h) => html.push_str(&h),
                        Event::End(TagEnd::HtmlBlock) => break,
                        other => {
                            // HTML blocks only carry HTML events; anything
                            // else is passed through untouched.
                            out.push(other);
                        }
                    }
                }
                let html = match chain.as_deref_mut() {
                    Some(chain) => {
                        rewrite_inline_html(&html, source, ctx, front_matter_lines, chain)?
                    }
                    None => html,
                };
                out.push(Event::Start(Tag::HtmlBlock));
                out.push(Event::Html(CowStr::from(html)));
                out.push(Event::End(TagEnd::HtmlBlock));
            }

            Event::InlineHtml(h) => {
                let html = match chain.as_deref_mut() {
                    Some(chain) => {
                        rewrite_inline_html(&h, source, ctx, front_matter_lines, chain)?
                    }
                    None => h.to_string(),
                };
                out.push(Event::InlineHtml(CowStr::from(html)));
            }

            Event::Start(Tag::CodeBlock(kind)) => {
                let mut code = String::new();
                for inner in iter.by_ref() {
                    match inner {
                        Event::Text(t) => code.push_str(&t),
                        Event::End(TagEnd::CodeBlock) => break,
                        _ => {}
                    }
                }

                if let CodeBlockKind::Fenced(info) = &kind {
                    if let Some(cb) = code_block.as_deref_mut() {
                        if let Some(replaced) =
                            cb.transform_code_block(&ctx.with_lines(String::new()), info, &code)?
                        {
                            code = replaced;
                        }
                    }
                }
                if !no_code_format && !code.is_empty() && !code.ends_with('\n') {
                    code.push('\n');
                }

                out.push(Event::Start(Tag::CodeBlock(kind)));
                out.push(Event::Text(CowStr::from(code)));
                out.push(Event::End(TagEnd::CodeBlock));
            }

            Event::SoftBreak if !soft_wraps => {
                // Reflow: soft line breaks join into a single line.
                out.push(Event::Text(CowStr::from(" ")));
            }

            other => out.push(other),
        }
    }
    Ok(out)
}

/// Rewrite `<a href>` and `<img src>` attribute values through the chain,
/// preserving every other byte of the HTML fragment verbatim.
fn rewrite_inline_html(
    html: &str,
    source: &str,
    ctx: &SourceContext,
    front_matter_lines: usize,
    chain: &mut TransformChain,
) -> Result<String> {
    let failure: RefCell<Option<CheckError>> = RefCell::new(None);
    let chain = RefCell::new(chain);

    let result = lol_html::rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("a[href]", |el| {
                    let href = el.get_attribute("href").unwrap_or_default();
                    let lines = link_lines(source, &href, front_matter_lines);
                    match chain
                        .borrow_mut()
                        .transform_destination(&ctx.with_lines(lines), &href)
                    {
                        Ok(dest) => el.set_attribute("href", &dest)?,
                        Err(err) => {
                            *failure.borrow_mut() = Some(err);
                            return Err("link transform failed".into());
                        }
                    }
                    Ok(())
                }),
                element!("img[src]", |el| {
                    let src = el.get_attribute("src").unwrap_or_default();
                    let lines = link_lines(source, &src, front_matter_lines);
                    match chain
                        .borrow_mut()
                        .transform_destination(&ctx.with_lines(lines), &src)
                    {
                        Ok(dest) => el.set_attribute("src", &dest)?,
                        Err(err) => {
                            *failure.borrow_mut() = Some(err);
                            return Err("link transform failed".into());
                        }
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    );

    match result {
        Ok(rewritten) => Ok(rewritten),
        Err(err) => Err(failure.into_inner().unwrap_or_else(|| CheckError::Format {
            path: ctx.filepath.clone(),
            details: format!("rewriting inline HTML: {}", err),
        })),
    }
}
