//! Source Tree Orientation
//!
//! Bounded enumeration of the agent's source tree plus best-effort
//! reads of the README and manifest. Absent files are tolerated; the
//! later pipeline stages work with whatever was found.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Hard caps on the orientation walk.
pub const MAX_FILES: usize = 200;
pub const MAX_DEPTH: usize = 4;

/// Directories that never contain agent-defining source.
const EXCLUDED_DIRS: [&str; 12] = [
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    "target",
    "dist",
    "build",
    "out",
    ".next",
    "__pycache__",
    "vendor",
    ".venv",
];

const README_CANDIDATES: [&str; 3] = ["README.md", "readme.md", "README"];
const MANIFEST_CANDIDATES: [&str; 6] = [
    "package.json",
    "Cargo.toml",
    "pyproject.toml",
    "requirements.txt",
    "go.mod",
    "composer.json",
];

/// Filesystem capability handed to the discovery pipeline.
#[async_trait]
pub trait FileReader: Send + Sync {
    /// Relative paths of up to [`MAX_FILES`] files, depth-bounded.
    async fn list_files(&self) -> Result<Vec<String>>;

    async fn read_file(&self, path: &str) -> Result<String>;
}

pub struct LocalFileReader {
    root: PathBuf,
}

impl LocalFileReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn walk(&self, dir: &Path, depth: usize, files: &mut Vec<String>) {
        if depth > MAX_DEPTH || files.len() >= MAX_FILES {
            return;
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };

        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            if files.len() >= MAX_FILES {
                return;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            if path.is_dir() {
                if EXCLUDED_DIRS.contains(&name.as_str()) {
                    continue;
                }
                self.walk(&path, depth + 1, files);
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                files.push(rel.to_string_lossy().to_string());
            }
        }
    }
}

#[async_trait]
impl FileReader for LocalFileReader {
    async fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        self.walk(&self.root.clone(), 1, &mut files);
        Ok(files)
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let full = self.root.join(path);
        std::fs::read_to_string(&full)
            .with_context(|| format!("failed to read {}", full.display()))
    }
}

/// What orientation produced: the tree plus README and manifest text.
#[derive(Debug, Default)]
pub struct Orientation {
    pub files: Vec<String>,
    pub readme: Option<String>,
    pub manifest: Option<String>,
    pub manifest_name: Option<String>,
}

/// Enumerate the tree and read README/manifest best-effort.
pub async fn orient(reader: &dyn FileReader) -> Result<Orientation> {
    let files = reader.list_files().await?;

    let mut readme = None;
    for candidate in README_CANDIDATES {
        if files.iter().any(|f| f == candidate) {
            if let Ok(content) = reader.read_file(candidate).await {
                readme = Some(content);
                break;
            }
        }
    }

    let mut manifest = None;
    let mut manifest_name = None;
    for candidate in MANIFEST_CANDIDATES {
        if files.iter().any(|f| f == candidate) {
            if let Ok(content) = reader.read_file(candidate).await {
                manifest = Some(content);
                manifest_name = Some(candidate.to_string());
                break;
            }
        }
    }

    Ok(Orientation { files, readme, manifest, manifest_name })
}

/// Pull dependency names out of a `package.json` manifest. Other
/// manifest kinds yield an empty list.
pub fn manifest_dependencies(manifest_name: Option<&str>, manifest: Option<&str>) -> Vec<String> {
    if manifest_name != Some("package.json") {
        return Vec::new();
    }
    let Some(raw) = manifest else {
        return Vec::new();
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Vec::new();
    };

    let mut deps: Vec<String> = Vec::new();
    for section in ["dependencies", "devDependencies"] {
        if let Some(map) = parsed.get(section).and_then(|v| v.as_object()) {
            deps.extend(map.keys().cloned());
        }
    }
    deps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaffold() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# Support Bot\nA helpful agent.").unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            "{\"dependencies\": {\"openai\": \"^4.0.0\"}, \"devDependencies\": {\"vitest\": \"^1.0.0\"}}",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/agent.ts"), "const x = 1;").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/junk")).unwrap();
        std::fs::write(dir.path().join("node_modules/junk/index.js"), "junk").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_walk_excludes_node_modules() {
        let dir = scaffold();
        let reader = LocalFileReader::new(dir.path());
        let files = reader.list_files().await.unwrap();

        assert!(files.iter().any(|f| f == "src/agent.ts"));
        assert!(!files.iter().any(|f| f.contains("node_modules")));
    }

    #[tokio::test]
    async fn test_walk_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b/c/d/e");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(deep.join("too-deep.ts"), "x").unwrap();
        std::fs::write(dir.path().join("a/b/c/ok.ts"), "x").unwrap();

        let reader = LocalFileReader::new(dir.path());
        let files = reader.list_files().await.unwrap();
        assert!(files.iter().any(|f| f.ends_with("ok.ts")));
        assert!(!files.iter().any(|f| f.ends_with("too-deep.ts")));
    }

    #[tokio::test]
    async fn test_orient_reads_readme_and_manifest() {
        let dir = scaffold();
        let reader = LocalFileReader::new(dir.path());
        let orientation = orient(&reader).await.unwrap();

        assert!(orientation.readme.as_deref().unwrap().contains("Support Bot"));
        assert_eq!(orientation.manifest_name.as_deref(), Some("package.json"));
    }

    #[tokio::test]
    async fn test_orient_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "print('hi')").unwrap();

        let reader = LocalFileReader::new(dir.path());
        let orientation = orient(&reader).await.unwrap();
        assert!(orientation.readme.is_none());
        assert!(orientation.manifest.is_none());
        assert_eq!(orientation.files, vec!["main.py"]);
    }

    #[test]
    fn test_manifest_dependencies() {
        let deps = manifest_dependencies(
            Some("package.json"),
            Some("{\"dependencies\": {\"openai\": \"^4\"}}"),
        );
        assert_eq!(deps, vec!["openai"]);

        assert!(manifest_dependencies(Some("Cargo.toml"), Some("[package]")).is_empty());
        assert!(manifest_dependencies(None, None).is_empty());
    }
}
