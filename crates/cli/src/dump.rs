//! Migration file on disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Operator path, or `<source>-<cluster>-apps.yaml` in the working directory.
pub fn dump_path(explicit: Option<&Path>, source: &str, workload_cluster: &str) -> PathBuf {
    match explicit {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(format!("{}-{}-apps.yaml", source, workload_cluster)),
    }
}

pub fn write(path: &Path, payload: &[u8]) -> Result<()> {
    std::fs::write(path, payload).with_context(|| format!("writing {}", path.display()))
}

pub fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_name_uses_source_and_cluster() {
        assert_eq!(dump_path(None, "gauss", "atlastest"), PathBuf::from("gauss-atlastest-apps.yaml"));
        assert_eq!(dump_path(Some(Path::new("/tmp/x.yaml")), "gauss", "atlastest"), PathBuf::from("/tmp/x.yaml"));
    }

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauss-wc1-apps.yaml");
        write(&path, b"kind: App\n---\n").unwrap();
        assert_eq!(read(&path).unwrap(), b"kind: App\n---\n");
    }

    #[test]
    fn missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let err = read(&path).unwrap_err();
        assert!(err.to_string().contains("absent.yaml"), "err={}", err);
    }
}
