//! Artifact discovery

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::EngineError;

/// Files of one input directory, as `/`-separated paths relative to `root`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    pub root: PathBuf,
    /// `.class` files, sorted
    pub classes: Vec<String>,
    /// Everything else, sorted; copied verbatim into an output directory
    pub resources: Vec<String>,
}

impl Artifacts {
    pub fn path_of(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn len(&self) -> usize {
        self.classes.len() + self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

/// Walk `root` and sort its files into class files and resources
pub fn discover(root: &Path) -> Result<Artifacts, EngineError> {
    if !root.is_dir() {
        return Err(EngineError::InputNotFound(root.to_path_buf()));
    }

    let mut artifacts = Artifacts {
        root: root.to_path_buf(),
        ..Default::default()
    };
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            EngineError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = relative_name(root, entry.path()) else {
            tracing::warn!(path = %entry.path().display(), "skipping file with a non UTF-8 name");
            continue;
        };
        if name.ends_with(".class") {
            artifacts.classes.push(name);
        } else {
            artifacts.resources.push(name);
        }
    }
    artifacts.classes.sort();
    artifacts.resources.sort();
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_discover_sorts_classes_and_resources() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("com/example")).unwrap();
        fs::write(dir.path().join("com/example/Foo.class"), b"x").unwrap();
        fs::write(dir.path().join("com/example/Bar.class"), b"x").unwrap();
        fs::write(dir.path().join("META-INF.txt"), b"x").unwrap();

        let artifacts = discover(dir.path()).unwrap();
        assert_eq!(artifacts.classes, ["com/example/Bar.class", "com/example/Foo.class"]);
        assert_eq!(artifacts.resources, ["META-INF.txt"]);
        assert_eq!(artifacts.len(), 3);
    }

    #[test]
    fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(&dir.path().join("nope")).unwrap_err();
        assert_eq!(err.code(), "E-ENGINE-002");
    }
}
