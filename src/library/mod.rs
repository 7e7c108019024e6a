//! Library folder access
//!
//! Lists and reads documents under one root directory. Every caller-supplied
//! path is resolved lexically against the root and rejected if it would
//! escape it. Relative paths use `/` separators and double as source ids.

mod extract;

pub use extract::{PlainTextExtractor, TextExtractor, BINARY_EXTENSIONS};

use crate::error::{LibragError, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Default extension allow-list
pub const DEFAULT_EXTENSIONS: &str =
    "txt,md,csv,json,xml,yaml,yml,properties,java,kt,py,js,ts,tsx,sql,gradle,sh,bat";

/// Lowercase extension allow-list; an empty filter allows every file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionFilter {
    allowed: BTreeSet<String>,
}

impl ExtensionFilter {
    /// Parse a comma-separated list such as `"txt, .MD,csv"`
    pub fn parse(csv: &str) -> Self {
        Self::from_iter(csv.split(','))
    }

    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn allows(&self, path: &Path) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&extension_of(path))
    }
}

impl<S: AsRef<str>> FromIterator<S> for ExtensionFilter {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let allowed = iter
            .into_iter()
            .map(|s| s.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { allowed }
    }
}

impl fmt::Display for ExtensionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.allowed.is_empty() {
            return write!(f, "*");
        }
        let joined: Vec<&str> = self.allowed.iter().map(String::as_str).collect();
        write!(f, "{}", joined.join(","))
    }
}

/// Lowercased extension without the dot, empty if there is none
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// A regular file under the library root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the root with `/` separators
    pub relative_path: String,
    pub size: u64,
    pub modified: SystemTime,
}

/// Normalize a caller-supplied relative path
///
/// Backslashes are treated as separators, `.` segments are dropped and `..`
/// segments pop the previous one. Absolute paths and paths that climb above
/// the root are rejected.
pub fn normalize_relative(relative: &str) -> Result<String> {
    let unified = relative.trim().replace('\\', "/");
    let escapes = || LibragError::PathEscapesRoot {
        path: relative.to_string(),
    };

    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(escapes());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escapes()),
        }
    }

    if parts.is_empty() {
        return Err(LibragError::InvalidRequest(format!(
            "Path does not name a file: '{}'",
            relative
        )));
    }
    Ok(parts.join("/"))
}

/// The library root and operations on the files beneath it
#[derive(Debug, Clone)]
pub struct LibraryFiles {
    root: PathBuf,
}

impl LibraryFiles {
    /// Open (creating if missing) the library directory
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| LibragError::io(e, "Failed to resolve current directory"))?
                .join(root)
        };

        if root.exists() {
            if !root.is_dir() {
                return Err(LibragError::Config(format!(
                    "Configured library path exists but is not a directory: {}",
                    root.display()
                )));
            }
        } else {
            fs::create_dir_all(&root).map_err(|e| {
                LibragError::io(
                    e,
                    format!("Failed to create library directory: {}", root.display()),
                )
            })?;
            tracing::info!("Created library directory at {}", root.display());
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every regular file matching `filter`, sorted by relative path
    pub fn list(&self, filter: &ExtensionFilter) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(&self.root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if e.depth() == 0 {
                        let context = format!("Failed to walk library: {}", self.root.display());
                        return Err(match e.into_io_error() {
                            Some(io) => LibragError::io(io, context),
                            None => LibragError::Config(context),
                        });
                    }
                    tracing::warn!("Skipping unreadable library entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !filter.allows(entry.path()) {
                continue;
            }

            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
                Err(_) => continue,
            };

            match entry.metadata() {
                Ok(meta) => entries.push(FileEntry {
                    relative_path: relative,
                    size: meta.len(),
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                }),
                Err(e) => {
                    tracing::warn!("Failed to read attributes for {}: {}", relative, e);
                }
            }
        }

        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(entries)
    }

    /// Relative paths of every file matching `filter`
    pub fn live_sources(&self, filter: &ExtensionFilter) -> Result<std::collections::HashSet<String>> {
        Ok(self
            .list(filter)?
            .into_iter()
            .map(|e| e.relative_path)
            .collect())
    }

    /// Resolve a relative path to an existing regular file under the root
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let normalized = normalize_relative(relative)?;
        let path = self.root.join(&normalized);
        if !path.is_file() {
            return Err(LibragError::NotFound { path: normalized });
        }
        Ok(path)
    }

    pub fn read_bytes(&self, relative: &str) -> Result<Vec<u8>> {
        let path = self.resolve(relative)?;
        fs::read(&path)
            .map_err(|e| LibragError::io(e, format!("Failed to read file: {}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn library() -> (TempDir, LibraryFiles) {
        let temp_dir = TempDir::new().unwrap();
        let lib = LibraryFiles::open(temp_dir.path().join("library")).unwrap();
        (temp_dir, lib)
    }

    #[test]
    fn test_extension_filter() {
        let filter = ExtensionFilter::parse("txt, .MD,,csv ");
        assert!(filter.allows(Path::new("a/b.txt")));
        assert!(filter.allows(Path::new("README.md")));
        assert!(!filter.allows(Path::new("image.png")));
        assert!(!filter.allows(Path::new("Makefile")));
        assert_eq!(filter.to_string(), "csv,md,txt");

        let all = ExtensionFilter::parse("");
        assert!(all.is_empty());
        assert!(all.allows(Path::new("anything.bin")));
    }

    #[test]
    fn test_normalize_relative() {
        assert_eq!(normalize_relative("a/b.txt").unwrap(), "a/b.txt");
        assert_eq!(normalize_relative("./a/./b.txt").unwrap(), "a/b.txt");
        assert_eq!(normalize_relative("a\\b.txt").unwrap(), "a/b.txt");
        assert_eq!(normalize_relative("a/../b.txt").unwrap(), "b.txt");

        assert!(matches!(
            normalize_relative("../etc/passwd"),
            Err(LibragError::PathEscapesRoot { .. })
        ));
        assert!(matches!(
            normalize_relative("a/../../x"),
            Err(LibragError::PathEscapesRoot { .. })
        ));
        assert!(matches!(
            normalize_relative("/etc/passwd"),
            Err(LibragError::PathEscapesRoot { .. })
        ));
        assert!(normalize_relative(".").is_err());
    }

    #[test]
    fn test_open_creates_root() {
        let (temp_dir, lib) = library();
        assert!(lib.root().is_dir());
        assert_eq!(lib.root(), temp_dir.path().join("library"));
    }

    #[test]
    fn test_open_rejects_file_root() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        assert!(LibraryFiles::open(&file).is_err());
    }

    #[test]
    fn test_list_sorted_and_filtered() {
        let (_temp_dir, lib) = library();
        fs::create_dir_all(lib.root().join("sub")).unwrap();
        fs::write(lib.root().join("b.txt"), "bb").unwrap();
        fs::write(lib.root().join("sub/a.md"), "a").unwrap();
        fs::write(lib.root().join("photo.png"), "png").unwrap();

        let entries = lib.list(&ExtensionFilter::parse("txt,md")).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(names, vec!["b.txt", "sub/a.md"]);
        assert_eq!(entries[0].size, 2);

        let all = lib.list(&ExtensionFilter::allow_all()).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_resolve_and_read() {
        let (_temp_dir, lib) = library();
        fs::write(lib.root().join("note.txt"), "hello").unwrap();

        assert_eq!(lib.read_bytes("note.txt").unwrap(), b"hello");
        assert!(matches!(
            lib.read_bytes("missing.txt"),
            Err(LibragError::NotFound { .. })
        ));
        assert!(matches!(
            lib.read_bytes("../outside.txt"),
            Err(LibragError::PathEscapesRoot { .. })
        ));

        fs::create_dir_all(lib.root().join("dir")).unwrap();
        assert!(matches!(lib.resolve("dir"), Err(LibragError::NotFound { .. })));
    }
}
