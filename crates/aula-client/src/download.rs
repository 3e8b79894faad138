use std::path::{Path, PathBuf};

use aula_core::{AulaError, ErrorCategory, ExportArtifact};
use aula_platform::write_atomically;
use tracing::debug;

/// Write an export artifact into `dir` under its own file name, replacing any
/// earlier export with that name. An interrupted save leaves the old file.
pub fn save_artifact(dir: &Path, artifact: &ExportArtifact) -> Result<PathBuf, AulaError> {
    let target = dir.join(&artifact.file_name);
    write_atomically(&target, &artifact.bytes).map_err(|err| {
        storage_error(format!("failed writing {}: {err}", target.display()))
    })?;

    debug!(path = %target.display(), bytes = artifact.bytes.len(), "export saved");
    Ok(target)
}

fn storage_error(message: String) -> AulaError {
    AulaError::new(ErrorCategory::Storage, "export_save_failed", message)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn artifact(bytes: &[u8]) -> ExportArtifact {
        ExportArtifact {
            file_name: "quizzes_export_2026-10-19.json".to_owned(),
            mime_type: "application/json",
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn saves_into_nested_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let out = dir.path().join("exports").join("october");

        let path = save_artifact(&out, &artifact(b"[1]")).expect("save works");
        assert_eq!(path, out.join("quizzes_export_2026-10-19.json"));
        assert_eq!(fs::read(&path).expect("read back"), b"[1]");
    }

    #[test]
    fn replaces_existing_export_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        save_artifact(dir.path(), &artifact(b"old")).expect("first save");
        let path = save_artifact(dir.path(), &artifact(b"new")).expect("second save");

        assert_eq!(fs::read(&path).expect("read back"), b"new");
        let entries = fs::read_dir(dir.path())
            .expect("list dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(entries, vec!["quizzes_export_2026-10-19.json".to_owned()]);
    }
}
