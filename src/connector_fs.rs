//! Filesystem discovery.
//!
//! Walks `sources.root`, keeps files matching the include globs and none of
//! the exclude globs, and turns each into a [`Document`] keyed by its path
//! relative to the root (always `/`-separated).

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use mdrag_core::chunk::first_heading;
use mdrag_core::models::Document;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::SourcesConfig;

pub fn scan_documents(sources: &SourcesConfig) -> Result<Vec<Document>> {
    let root = &sources.root;
    if !root.exists() {
        bail!("Sources root does not exist: {}", root.display());
    }

    let include_set = build_globset(&sources.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(sources.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();

    let walker = WalkDir::new(root).follow_links(sources.follow_symlinks);
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match file_to_document(path, &rel_str)? {
            Some(doc) => documents.push(doc),
            None => continue,
        }
    }

    // Sort for deterministic ordering
    documents.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    debug!(root = %root.display(), documents = documents.len(), "scan complete");

    Ok(documents)
}

/// Read one file. Returns `None` for files that are not valid UTF-8.
fn file_to_document(path: &Path, relative_path: &str) -> Result<Option<Document>> {
    let metadata = std::fs::metadata(path)?;
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_default();

    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let content = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(_) => {
            warn!(path = %relative_path, "skipping file that is not valid UTF-8");
            return Ok(None);
        }
    };

    let meta = read_front_matter(&content);
    let title = meta.title.clone().or_else(|| first_heading(&content, 1));

    let mut doc = Document::new(relative_path, content, modified).with_tags(meta.tags);
    if let Some(title) = title {
        doc = doc.with_title(title);
    }
    if let Some(doc_type) = meta.doc_type {
        doc = doc.with_doc_type(doc_type);
    }
    Ok(Some(doc))
}

/// Fields picked out of a leading `---` front-matter block.
#[derive(Debug, Default, PartialEq)]
pub struct FrontMatter {
    pub title: Option<String>,
    pub doc_type: Option<String>,
    pub tags: Vec<String>,
}

/// Read `title`, `type` and `tags` from a leading `---` block.
///
/// Understands the two common tag spellings, inline (`tags: [a, b]`) and
/// block (`tags:` followed by `- a` lines). Anything else is ignored.
pub fn read_front_matter(content: &str) -> FrontMatter {
    let mut meta = FrontMatter::default();
    let mut lines = content.lines();
    if lines.next().map(|l| l.trim_end()) != Some("---") {
        return meta;
    }

    let mut in_tag_list = false;
    for line in lines {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            return meta;
        }
        if in_tag_list {
            if let Some(item) = trimmed.trim_start().strip_prefix("- ") {
                push_tag(&mut meta.tags, item);
                continue;
            }
            in_tag_list = false;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "title" => meta.title = non_empty(unquote(value)),
            "type" => meta.doc_type = non_empty(unquote(value)),
            "tags" => {
                if value.is_empty() {
                    in_tag_list = true;
                } else if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']'))
                {
                    for item in inner.split(',') {
                        push_tag(&mut meta.tags, item);
                    }
                } else {
                    push_tag(&mut meta.tags, value);
                }
            }
            _ => {}
        }
    }

    // No closing delimiter: not front matter after all.
    FrontMatter::default()
}

fn push_tag(tags: &mut Vec<String>, raw: &str) {
    if let Some(tag) = non_empty(unquote(raw.trim())) {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
}

fn non_empty(value: &str) -> Option<String> {
    let v = value.trim();
    (!v.is_empty()).then(|| v.to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {pattern}"))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_matter_inline_tags() {
        let text = "---\ntitle: \"Deploy Guide\"\ntype: runbook\ntags: [ops, 'k8s']\n---\n# Other\n";
        let meta = read_front_matter(text);
        assert_eq!(meta.title.as_deref(), Some("Deploy Guide"));
        assert_eq!(meta.doc_type.as_deref(), Some("runbook"));
        assert_eq!(meta.tags, vec!["ops".to_string(), "k8s".to_string()]);
    }

    #[test]
    fn test_front_matter_block_tags() {
        let text = "---\ntags:\n  - alpha\n  - beta\ntitle: T\n---\nbody";
        let meta = read_front_matter(text);
        assert_eq!(meta.tags, vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(meta.title.as_deref(), Some("T"));
    }

    #[test]
    fn test_unterminated_front_matter_ignored() {
        assert_eq!(read_front_matter("---\ntitle: x\nbody"), FrontMatter::default());
        assert_eq!(read_front_matter("no front matter"), FrontMatter::default());
    }

    #[test]
    fn test_title_falls_back_to_first_h1() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cases = [
            ("fenced.md", "````\n# not a title\n~~~\n# still code\n````\n## Sub\n# Real Title #\n", Some("Real Title")),
            ("indented.md", "  #\tTabbed Title\n", Some("Tabbed Title")),
            ("h2.md", "## only h2\n", None),
        ];
        for (name, body, expected) in cases {
            let path = tmp.path().join(name);
            std::fs::write(&path, body).unwrap();
            let doc = file_to_document(&path, name).unwrap().unwrap();
            assert_eq!(doc.title.as_deref(), expected, "{name}");
        }
    }

    fn sources(root: &Path, exclude: &[&str]) -> SourcesConfig {
        SourcesConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".into(), "**/*.mdx".into()],
            exclude_globs: exclude.iter().map(|s| s.to_string()).collect(),
            follow_symlinks: false,
        }
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("guides/drafts")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::write(root.join("zeta.md"), "# Zeta\n").unwrap();
        std::fs::write(
            root.join("guides/setup.mdx"),
            "---\ntitle: Setup\ntags: [intro]\n---\n# Ignored H1\n",
        )
        .unwrap();
        std::fs::write(root.join("guides/drafts/wip.md"), "draft").unwrap();
        std::fs::write(root.join("node_modules/pkg/readme.md"), "vendored").unwrap();
        std::fs::write(root.join("notes.txt"), "not markdown").unwrap();
        std::fs::write(root.join("binary.md"), [0xff, 0xfe, 0x00]).unwrap();

        let docs = scan_documents(&sources(root, &["guides/drafts/**"])).unwrap();
        let paths: Vec<&str> = docs.iter().map(|d| d.file_path.as_str()).collect();
        assert_eq!(paths, vec!["guides/setup.mdx", "zeta.md"]);

        assert_eq!(docs[0].title.as_deref(), Some("Setup"));
        assert_eq!(docs[0].tags, vec!["intro".to_string()]);
        assert_eq!(docs[1].title.as_deref(), Some("Zeta"));
        assert_eq!(docs[1].checksum.len(), 64);
    }

    #[test]
    fn test_scan_missing_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = scan_documents(&sources(&tmp.path().join("nope"), &[])).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
