//! Mapping `SourceFile` names back to files on disk

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Source files under the configured roots, keyed by file name
#[derive(Debug, Clone, Default)]
pub struct SourceIndex {
    by_name: HashMap<String, Vec<PathBuf>>,
}

impl SourceIndex {
    /// Walk every root once; unreadable entries are skipped
    pub fn build<P: AsRef<Path>>(roots: &[P]) -> Self {
        let mut by_name: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for root in roots {
            let root = root.as_ref();
            for entry in WalkDir::new(root).follow_links(true).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str() else {
                    continue;
                };
                let path = entry.path();
                let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
                by_name.entry(name.to_string()).or_default().push(absolute);
            }
        }
        for paths in by_name.values_mut() {
            paths.sort();
            paths.dedup();
        }
        tracing::debug!(files = by_name.values().map(Vec::len).sum::<usize>(), "indexed source roots");
        Self { by_name }
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Path reported for a call in class `class_internal` compiled from `source_file`
    ///
    /// Preference order: a file whose path ends with the class's package path,
    /// then the only file of that name, then the package-relative path.
    pub fn resolve(&self, class_internal: &str, source_file: &str) -> String {
        let file_name = base_name(source_file);
        let relative = match class_internal.rfind('/') {
            Some(i) => format!("{}/{}", &class_internal[..i], file_name),
            None => file_name.to_string(),
        };

        if let Some(paths) = self.by_name.get(file_name) {
            if let Some(path) = paths.iter().find(|p| p.ends_with(Path::new(&relative))) {
                return path.display().to_string();
            }
            if let [only] = paths.as_slice() {
                return only.display().to_string();
            }
        }
        relative
    }
}

/// Last path component of a `SourceFile` value
pub fn base_name(source_file: &str) -> &str {
    source_file
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(source_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_prefers_package_path() {
        let dir = tempfile::tempdir().unwrap();
        let java = dir.path().join("src/main/java/com/example");
        let other = dir.path().join("src/test/java/org/other");
        fs::create_dir_all(&java).unwrap();
        fs::create_dir_all(&other).unwrap();
        fs::write(java.join("Foo.java"), "class Foo {}").unwrap();
        fs::write(other.join("Foo.java"), "class Foo {}").unwrap();
        fs::write(other.join("Bar.java"), "class Bar {}").unwrap();

        let index = SourceIndex::build(&[dir.path()]);
        let foo = index.resolve("com/example/Foo", "Foo.java");
        assert!(Path::new(&foo).is_absolute());
        assert!(foo.ends_with("com/example/Foo.java") || foo.ends_with("com\\example\\Foo.java"));

        // unique name found outside the package directory
        let bar = index.resolve("com/example/Bar", "Bar.java");
        assert!(bar.contains("other"));

        // nothing on disk: package-relative path
        assert_eq!(index.resolve("com/example/Baz", "Baz.java"), "com/example/Baz.java");
        assert_eq!(index.resolve("Main", "Main.kt"), "Main.kt");
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("Foo.java"), "Foo.java");
        assert_eq!(base_name("src/com/Foo.kt"), "Foo.kt");
    }
}
