//! Scheme-to-handler resource opening.
//!
//! Connectors never open URLs themselves; they go through a
//! [`ResourceOpener`] constructed at startup. The default implementation
//! handles `file:` URLs, bare paths, and `-` for standard streams.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;

/// Opens byte streams for resource URIs.
pub trait ResourceOpener: Send + Sync {
    fn open_read(&self, url: &str) -> anyhow::Result<Box<dyn Read + Send>>;

    fn open_write(&self, url: &str) -> anyhow::Result<Box<dyn Write + Send>>;
}

/// The default opener: local filesystem plus standard streams.
#[derive(Debug, Default)]
pub struct FileSystemOpener;

/// Resolves a `file:` URL or bare path to a filesystem path.
pub fn to_path(url: &str) -> PathBuf {
    match url.strip_prefix("file://") {
        Some(rest) => PathBuf::from(rest),
        None => PathBuf::from(url.strip_prefix("file:").unwrap_or(url)),
    }
}

/// Renders a path back to the canonical resource URI form.
pub fn to_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

impl ResourceOpener for FileSystemOpener {
    fn open_read(&self, url: &str) -> anyhow::Result<Box<dyn Read + Send>> {
        if url == "-" {
            return Ok(Box::new(std::io::stdin()));
        }
        let path = to_path(url);
        let file = File::open(&path)
            .with_context(|| format!("cannot open {} for reading", path.display()))?;
        Ok(Box::new(file))
    }

    fn open_write(&self, url: &str) -> anyhow::Result<Box<dyn Write + Send>> {
        if url == "-" {
            return Ok(Box::new(std::io::stdout()));
        }
        let path = to_path(url);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let file = File::create(&path)
            .with_context(|| format!("cannot open {} for writing", path.display()))?;
        Ok(Box::new(file))
    }
}

/// Expands a URL to the ordered list of readable resources beneath it:
/// a file URL yields itself, a directory yields its matching children.
pub fn enumerate_resources(url: &str, extension: &str) -> anyhow::Result<Vec<String>> {
    if url == "-" {
        return Ok(vec!["-".to_string()]);
    }
    let path = to_path(url);
    if path.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&path)
            .with_context(|| format!("cannot list {}", path.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .map(|e| e.eq_ignore_ascii_case(extension))
                        .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files.iter().map(|p| to_url(p)).collect())
    } else {
        anyhow::ensure!(path.is_file(), "no such resource: {url}");
        Ok(vec![to_url(&path)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn file_url_and_bare_path_resolve_alike() {
        assert_eq!(to_path("file:///tmp/x.csv"), PathBuf::from("/tmp/x.csv"));
        assert_eq!(to_path("/tmp/x.csv"), PathBuf::from("/tmp/x.csv"));
    }

    #[test]
    fn directory_enumeration_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.csv", "a.csv", "skip.txt"] {
            let mut f = File::create(dir.path().join(name)).unwrap();
            writeln!(f, "x").unwrap();
        }
        let urls = enumerate_resources(dir.path().to_str().unwrap(), "csv").unwrap();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].ends_with("a.csv"));
        assert!(urls[1].ends_with("b.csv"));
    }

    #[test]
    fn missing_resource_is_an_error() {
        assert!(enumerate_resources("/definitely/not/here.csv", "csv").is_err());
    }
}
