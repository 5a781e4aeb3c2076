//! Eligibility filter: decides whether a file is worth indexing at all.
//!
//! Two stages, matching what callers can afford at each point: a pure path
//! check (denylisted directories and extensions) that runs before any I/O,
//! and a content check (size ceiling, empty files) that runs after the file
//! has been read.

use std::path::Path;

/// Directory fragments that are never indexed regardless of project ignores
const DIR_DENYLIST: &[&str] = &[
  // Version control
  ".git",
  ".hg",
  ".svn",
  // Dependencies
  "node_modules",
  "vendor",
  ".venv",
  "venv",
  // Build outputs
  "target",
  "dist",
  "build",
  ".next",
  ".nuxt",
  // Caches
  ".cache",
  "__pycache__",
  ".pytest_cache",
  ".mypy_cache",
  ".tox",
  // Coverage
  "coverage",
  ".nyc_output",
  // Editor state
  ".idea",
  ".vscode",
];

/// Binary, media, and generated assets that carry nothing to index
const EXT_DENYLIST: &[&str] = &[
  // Images
  "png", "jpg", "jpeg", "gif", "ico", "bmp", "webp", // Audio/video
  "mp3", "mp4", "avi", "mov", "mkv", "wav", "ogg", // Fonts
  "woff", "woff2", "ttf", "eot", "otf", // Archives
  "zip", "tar", "gz", "bz2", "xz", "7z", "rar", // Compiled artifacts
  "exe", "dll", "so", "dylib", "a", "o", "class", "pyc", "wasm", // Documents
  "pdf", "doc", "docx", "xls", "xlsx", // Misc binary
  "db", "sqlite", "bin", "dat", "lock", "map",
];

/// Generated-file suffixes that an extension check alone would miss
const SUFFIX_DENYLIST: &[&str] = &[".min.js", ".min.css"];

/// Why a file was rejected by the filter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
  #[error("path is under denylisted directory '{0}'")]
  DeniedDirectory(String),
  #[error("extension '{0}' is denylisted")]
  DeniedExtension(String),
  #[error("file is {size} bytes, over the {limit} byte ceiling")]
  TooLarge { size: usize, limit: usize },
  #[error("file has no meaningful content")]
  Empty,
}

/// Path-only check; no I/O. Run this before reading the file.
pub fn check_path(path: &Path) -> Result<(), Rejection> {
  for component in path.components() {
    let name = component.as_os_str().to_string_lossy();
    if DIR_DENYLIST.contains(&name.as_ref()) {
      return Err(Rejection::DeniedDirectory(name.into_owned()));
    }
  }

  let file_name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
  for suffix in SUFFIX_DENYLIST {
    if file_name.ends_with(suffix) {
      return Err(Rejection::DeniedExtension(suffix.to_string()));
    }
  }

  if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
    let lower = ext.to_ascii_lowercase();
    if EXT_DENYLIST.contains(&lower.as_str()) {
      return Err(Rejection::DeniedExtension(lower));
    }
  }

  Ok(())
}

/// Content check after the file has been read.
pub fn check_content(content: &str, max_size: usize) -> Result<(), Rejection> {
  if content.len() > max_size {
    return Err(Rejection::TooLarge {
      size: content.len(),
      limit: max_size,
    });
  }

  if content.trim().is_empty() {
    return Err(Rejection::Empty);
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  #[test]
  fn test_denylisted_directories_rejected() {
    for path in [
      "project/node_modules/lodash/index.js",
      "project/.git/HEAD",
      "project/target/debug/main.rs",
      "deep/nested/__pycache__/mod.pyc",
      ".venv/lib/python3.12/site.py",
    ] {
      assert!(check_path(&PathBuf::from(path)).is_err(), "{path} should be rejected");
    }
  }

  #[test]
  fn test_directory_fragment_must_match_whole_component() {
    // "targets" is not "target"; "distribution" is not "dist"
    assert!(check_path(&PathBuf::from("src/targets/mod.rs")).is_ok());
    assert!(check_path(&PathBuf::from("docs/distribution/notes.md")).is_ok());
  }

  #[test]
  fn test_denylisted_extensions_rejected() {
    for path in ["logo.png", "movie.MP4", "lib/native.so", "app.exe", "styles.css.map"] {
      assert!(check_path(&PathBuf::from(path)).is_err(), "{path} should be rejected");
    }
  }

  #[test]
  fn test_minified_suffixes_rejected() {
    assert_eq!(
      check_path(&PathBuf::from("assets/bundle.min.js")),
      Err(Rejection::DeniedExtension(".min.js".to_string()))
    );
    assert!(check_path(&PathBuf::from("assets/site.min.css")).is_err());
  }

  #[test]
  fn test_source_files_eligible() {
    for path in ["src/main.rs", "lib/app.ts", "README.md", "scripts/deploy.sh", "Makefile"] {
      assert!(check_path(&PathBuf::from(path)).is_ok(), "{path} should be eligible");
    }
  }

  #[test]
  fn test_content_over_ceiling_rejected() {
    let content = "x".repeat(101);
    assert_eq!(
      check_content(&content, 100),
      Err(Rejection::TooLarge { size: 101, limit: 100 })
    );
    assert!(check_content(&"x".repeat(100), 100).is_ok());
  }

  #[test]
  fn test_empty_content_rejected() {
    assert_eq!(check_content("", 1024), Err(Rejection::Empty));
    assert_eq!(check_content("  \n\t\n ", 1024), Err(Rejection::Empty));
    assert!(check_content("fn main() {}", 1024).is_ok());
  }
}
