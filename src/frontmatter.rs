//! YAML front matter handling.
//!
//! A document may start with a `---` delimited YAML block. The block is
//! split off before the Markdown passes and re-serialized through a
//! front-matter transform; the default transform writes keys in reverse
//! lexicographic order, quoting string values that contain `:`.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::error::{CheckError, Result};
use crate::transform::SourceContext;

/// Transform applied to the parsed front matter map. Returning `None`
/// removes the block from the output.
pub trait FrontMatterTransformer: Send {
    fn transform_front_matter(
        &mut self,
        ctx: &SourceContext,
        front_matter: &Mapping,
    ) -> Result<Option<Vec<u8>>>;

    fn close(&mut self, _ctx: &SourceContext) -> Result<()> {
        Ok(())
    }
}

/// Default transform: stable re-serialization with reverse-sorted keys.
pub struct FormatFrontMatter;

impl FrontMatterTransformer for FormatFrontMatter {
    fn transform_front_matter(
        &mut self,
        _ctx: &SourceContext,
        front_matter: &Mapping,
    ) -> Result<Option<Vec<u8>>> {
        if front_matter.is_empty() {
            return Ok(None);
        }
        Ok(Some(serialize(front_matter)))
    }
}

/// Transform that drops the front matter entirely.
pub struct RemoveFrontMatter;

impl FrontMatterTransformer for RemoveFrontMatter {
    fn transform_front_matter(
        &mut self,
        _ctx: &SourceContext,
        _front_matter: &Mapping,
    ) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// The split parts of a document: parsed front matter (if any), the body,
/// and the number of source lines the front-matter block occupied
/// (delimiters excluded).
pub struct SplitDocument<'a> {
    pub front_matter: Option<Mapping>,
    pub body: &'a str,
    pub front_matter_lines: usize,
}

/// Split a leading `---` front-matter block from the content. Content
/// without a well-formed block is returned whole.
pub fn split<'a>(path: &Path, content: &'a str) -> Result<SplitDocument<'a>> {
    let Some(rest) = content.strip_prefix("---\n") else {
        return Ok(SplitDocument {
            front_matter: None,
            body: content,
            front_matter_lines: 0,
        });
    };
    let Some(end) = rest.find("\n---\n") else {
        return Ok(SplitDocument {
            front_matter: None,
            body: content,
            front_matter_lines: 0,
        });
    };

    let block = &rest[..end];
    let body = &rest[end + "\n---\n".len()..];
    let mapping: Mapping = serde_yaml::from_str(block).map_err(|e| CheckError::Format {
        path: path.to_path_buf(),
        details: format!("parsing front matter: {}", e),
    })?;

    // The body keeps any leading blank lines so reported line numbers stay
    // aligned with the original file.
    Ok(SplitDocument {
        front_matter: Some(mapping),
        body,
        front_matter_lines: block.lines().count(),
    })
}

/// Serialize the map with keys in reverse lexicographic order. One level of
/// nesting is indented; scalar strings containing `:` are double-quoted.
fn serialize(front_matter: &Mapping) -> Vec<u8> {
    let mut entries: Vec<(String, &Value)> = front_matter
        .iter()
        .map(|(k, v)| (scalar_to_string(k), v))
        .collect();
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    let mut out = String::from("---");
    for (key, value) in entries {
        match value {
            Value::Mapping(nested) => {
                out.push_str(&format!("\n{}:", key));
                for (k, v) in nested {
                    out.push_str(&format!(
                        "\n  {}: {}",
                        scalar_to_string(k),
                        value_to_string(v)
                    ));
                }
            }
            other => {
                out.push_str(&format!("\n{}: {}", key, value_to_string(other)));
            }
        }
    }
    out.push_str("\n---\n\n");
    out.into_bytes()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) if s.contains(':') => format!("{:?}", s),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ctx() -> SourceContext {
        SourceContext::new(PathBuf::from("/doc.md"))
    }

    #[test]
    fn test_split_without_front_matter() {
        let doc = split(Path::new("/doc.md"), "# Title\n\nbody\n").unwrap();
        assert!(doc.front_matter.is_none());
        assert_eq!(doc.body, "# Title\n\nbody\n");
        assert_eq!(doc.front_matter_lines, 0);
    }

    #[test]
    fn test_split_with_front_matter() {
        let content = "---\ntitle: Hello\nweight: 10\n---\n\n# Title\n";
        let doc = split(Path::new("/doc.md"), content).unwrap();
        let fm = doc.front_matter.unwrap();
        assert_eq!(
            fm.get(Value::String("title".into())),
            Some(&Value::String("Hello".into()))
        );
        assert_eq!(doc.front_matter_lines, 2);
        assert_eq!(doc.body, "\n# Title\n");
    }

    #[test]
    fn test_default_transform_reverse_sorts_keys() {
        let content = "---\nauthor: someone\nweight: 10\ntitle: Hello\n---\n\nbody\n";
        let doc = split(Path::new("/doc.md"), content).unwrap();
        let mut transform = FormatFrontMatter;
        let out = transform
            .transform_front_matter(&ctx(), &doc.front_matter.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "---\nweight: 10\ntitle: Hello\nauthor: someone\n---\n\n"
        );
    }

    #[test]
    fn test_colon_values_are_quoted() {
        let content = "---\nurl: \"https://example.com\"\n---\n\nbody\n";
        let doc = split(Path::new("/doc.md"), content).unwrap();
        let mut transform = FormatFrontMatter;
        let out = transform
            .transform_front_matter(&ctx(), &doc.front_matter.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "---\nurl: \"https://example.com\"\n---\n\n"
        );
    }

    #[test]
    fn test_remove_front_matter() {
        let mut transform = RemoveFrontMatter;
        let mut fm = Mapping::new();
        fm.insert(Value::String("k".into()), Value::String("v".into()));
        assert!(transform
            .transform_front_matter(&ctx(), &fm)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_empty_front_matter_is_dropped() {
        let mut transform = FormatFrontMatter;
        assert!(transform
            .transform_front_matter(&ctx(), &Mapping::new())
            .unwrap()
            .is_none());
    }
}
