use anyhow::{Context, Result};
use cargo_metadata::MetadataCommand;
use std::fs;
use std::path::Path;

use crate::domain::element::SourceFile;

pub struct ProjectLoader;

impl ProjectLoader {
    /// Load all source files from a Cargo workspace manifest.
    pub fn load_workspace(manifest_path: &Path) -> Result<Vec<SourceFile>> {
        let metadata = MetadataCommand::new()
            .manifest_path(manifest_path)
            .no_deps()
            .exec()
            .context("Failed to execute cargo metadata")?;

        let mut files = Vec::new();

        for package_id in &metadata.workspace_members {
            let Some(package) = metadata.packages.iter().find(|p| &p.id == package_id) else {
                continue;
            };
            for target in &package.targets {
                // Tests, benches and examples do not describe the program.
                if !target
                    .kind
                    .iter()
                    .any(|k| k == "lib" || k == "bin" || k == "proc-macro")
                {
                    continue;
                }
                let src_path = &target.src_path;
                let src_dir = src_path.parent().unwrap_or(src_path);
                Self::collect_rs_recursive(src_dir.as_std_path(), &package.name, &mut files)?;
            }
        }

        // lib and bin targets usually share src/
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);

        tracing::info!(
            manifest = %manifest_path.display(),
            files = files.len(),
            "loaded workspace sources"
        );
        Ok(files)
    }

    /// Load every `.rs` file under `dir` (or `dir` itself if it is a file).
    pub fn load_path(path: &Path, crate_name: &str) -> Result<Vec<SourceFile>> {
        if !path.exists() {
            anyhow::bail!("Source path not found: {}", path.display());
        }
        let mut files = Vec::new();
        Self::collect_rs_recursive(path, crate_name, &mut files)?;
        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!(path = %path.display(), files = files.len(), "loaded sources");
        Ok(files)
    }

    fn collect_rs_recursive(dir: &Path, crate_name: &str, out: &mut Vec<SourceFile>) -> Result<()> {
        if dir.ends_with("target") || dir.ends_with(".git") {
            return Ok(());
        }
        if !dir.exists() {
            return Ok(());
        }

        if dir.is_file() {
            if dir.extension().is_some_and(|ext| ext == "rs") {
                out.push(Self::read(dir, crate_name)?);
            }
            return Ok(());
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::collect_rs_recursive(&path, crate_name, out)?;
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                out.push(Self::read(&path, crate_name)?);
            }
        }
        Ok(())
    }

    fn read(path: &Path, crate_name: &str) -> Result<SourceFile> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read file {}", path.display()))?;
        Ok(SourceFile {
            crate_name: crate_name.to_string(),
            path: path.display().to_string(),
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_path_skips_target_and_non_rust() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join("target/debug")).unwrap();
        fs::write(root.join("src/lib.rs"), "fn a() {}").unwrap();
        fs::write(root.join("src/nested/b.rs"), "fn b() {}").unwrap();
        fs::write(root.join("src/notes.md"), "# notes").unwrap();
        fs::write(root.join("target/debug/gen.rs"), "fn g() {}").unwrap();

        let files = ProjectLoader::load_path(root, "demo").unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.crate_name == "demo"));
        assert!(files[0].path.ends_with("lib.rs"));
    }

    #[test]
    fn test_load_missing_path() {
        assert!(ProjectLoader::load_path(Path::new("/definitely/not/here"), "x").is_err());
    }
}
