//! Recursive directory walking.

use std::collections::VecDeque;
use std::fs::{self, Metadata};
use std::path::Path;

use crate::Result;

/// Receives every file found under a walk root.
pub trait Visitor {
    /// Called once per file. Returning an error aborts the walk.
    fn on_file(&mut self, path: &Path, metadata: &Metadata) -> Result<()>;
}

/// Walks `root` breadth first, visiting every file under it. A `root` that
/// is itself a file is visited directly. Unreadable directories and entries
/// are skipped; `fs::metadata` traverses symbolic links.
pub fn walk(root: &Path, visitor: &mut dyn Visitor) -> Result<()> {
    let metadata = match fs::metadata(root) {
        Ok(metadata) => metadata,
        Err(_) => return Ok(()),
    };
    if metadata.is_file() {
        return visitor.on_file(root, &metadata);
    }

    let mut dirs = VecDeque::new();
    dirs.push_back(root.to_path_buf());
    while let Some(dir) = dirs.pop_front() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            if metadata.is_dir() {
                dirs.push_back(path);
            } else if metadata.is_file() {
                visitor.on_file(&path, &metadata)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::Error;

    struct Collect {
        seen: Vec<PathBuf>,
        stop_after: Option<usize>,
    }

    impl Visitor for Collect {
        fn on_file(&mut self, path: &Path, _metadata: &Metadata) -> Result<()> {
            self.seen.push(path.to_path_buf());
            if self.stop_after == Some(self.seen.len()) {
                return Err(Error::Cancelled);
            }
            Ok(())
        }
    }

    #[test]
    fn visits_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"b").unwrap();

        let mut visitor = Collect { seen: Vec::new(), stop_after: None };
        walk(dir.path(), &mut visitor).unwrap();
        let mut names: Vec<_> = visitor
            .seen
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["a.txt", "b.txt"]);
    }

    #[test]
    fn file_root_is_visited_directly() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("only.ass");
        std::fs::write(&file, b"x").unwrap();
        let mut visitor = Collect { seen: Vec::new(), stop_after: None };
        walk(&file, &mut visitor).unwrap();
        assert_eq!(visitor.seen, [file]);
    }

    #[test]
    fn missing_root_is_skipped() {
        let mut visitor = Collect { seen: Vec::new(), stop_after: None };
        walk(Path::new("/definitely/not/here"), &mut visitor).unwrap();
        assert!(visitor.seen.is_empty());
    }

    #[test]
    fn visitor_error_aborts() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("{i}.txt")), b"x").unwrap();
        }
        let mut visitor = Collect { seen: Vec::new(), stop_after: Some(2) };
        let err = walk(dir.path(), &mut visitor).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(visitor.seen.len(), 2);
    }
}
