//! Materializes a configuration bundle into a per-job working directory

use std::path::{Component, Path};

use futures::future::join_all;
use tracing::{debug, warn};

use crate::deploy::StageError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::ConfigurationBundle;
use crate::utils::slugify;

/// A staged working directory, threaded through the later stages
#[derive(Debug, Clone)]
pub struct Workspace {
    pub dir: Dir,
    pub plan_file: File,
}

impl Workspace {
    /// Plan file name relative to the working directory
    pub fn plan_file_name(&self) -> String {
        self.plan_file
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// A plan artifact exists and is non-empty
    pub async fn has_valid_plan(&self) -> bool {
        self.plan_file.size().await.is_some_and(|size| size > 0)
    }
}

/// Writes bundles under `workspaces`, one fresh directory per job
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    workspaces: Dir,
    plan_file: String,
}

impl ArtifactWriter {
    pub fn new(workspaces: Dir, plan_file: impl Into<String>) -> Self {
        Self {
            workspaces,
            plan_file: plan_file.into(),
        }
    }

    /// `<workspaces>/<slug(subject)>-<job_id>`
    pub fn workspace_for(&self, subject_name: &str, job_id: &str) -> Workspace {
        let dir = self
            .workspaces
            .subdir(&format!("{}-{}", slugify(subject_name), job_id));
        let plan_file = dir.file(&self.plan_file);
        Workspace { dir, plan_file }
    }

    /// Create the working directory and write every file of the bundle.
    ///
    /// All-or-nothing: on any failure the directory is removed again.
    pub async fn stage(
        &self,
        subject_name: &str,
        job_id: &str,
        bundle: &ConfigurationBundle,
    ) -> Result<Workspace, StageError> {
        if bundle.is_empty() {
            return Err(StageError::StagingFailure("bundle contains no files".to_string()));
        }
        for file in &bundle.files {
            validate_name(&file.name)?;
        }

        let workspace = self.workspace_for(subject_name, job_id);
        workspace.dir.create_new().await.map_err(|e| {
            StageError::StagingFailure(format!(
                "cannot create working directory {}: {}",
                workspace.dir.path().display(),
                e
            ))
        })?;

        let writes = bundle.files.iter().map(|file| {
            let target = workspace.dir.file(&file.name);
            async move {
                target
                    .write_string(&file.content)
                    .await
                    .map_err(|e| format!("cannot write {}: {}", file.name, e))
            }
        });

        // Every write settles before cleanup so none lands after the delete
        let failure = join_all(writes).await.into_iter().find_map(Result::err);
        if let Some(reason) = failure {
            if let Err(e) = workspace.dir.delete().await {
                warn!(
                    "Failed to remove partially staged directory {}: {}",
                    workspace.dir.path().display(),
                    e
                );
            }
            return Err(StageError::StagingFailure(reason));
        }

        debug!(
            "Staged {} files into {}",
            bundle.files.len(),
            workspace.dir.path().display()
        );
        Ok(workspace)
    }
}

/// Relative, non-empty, and never escaping the working directory
fn validate_name(name: &str) -> Result<(), StageError> {
    let invalid = |why: &str| StageError::StagingFailure(format!("invalid path {:?}: {}", name, why));

    if name.trim().is_empty() {
        return Err(invalid("empty name"));
    }
    let path = Path::new(name);
    if path.is_absolute() || path.has_root() {
        return Err(invalid("absolute path"));
    }

    let mut has_normal = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => has_normal = true,
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("parent directory reference")),
            Component::RootDir | Component::Prefix(_) => return Err(invalid("absolute path")),
        }
    }
    if !has_normal {
        return Err(invalid("no file name"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deployment::BundleFile;

    fn writer(root: &Path) -> ArtifactWriter {
        ArtifactWriter::new(Dir::new(root.join("workspaces")), "tfplan")
    }

    #[tokio::test]
    async fn test_stage_writes_every_file() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle = ConfigurationBundle::new(vec![
            BundleFile::new("main.tf", "resource \"null_resource\" \"x\" {}"),
            BundleFile::new("modules/net/vars.tf", "variable \"cidr\" {}"),
        ]);

        let workspace = writer(tmp.path()).stage("Acme Web", "job-1", &bundle).await.unwrap();

        assert!(workspace.dir.path().ends_with("workspaces/acme-web-job-1"));
        assert_eq!(
            workspace.dir.file("modules/net/vars.tf").read_string().await.unwrap(),
            "variable \"cidr\" {}"
        );
        assert_eq!(workspace.plan_file_name(), "tfplan");
        assert!(!workspace.has_valid_plan().await);
    }

    #[tokio::test]
    async fn test_existing_directory_is_not_reused() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle = ConfigurationBundle::new(vec![BundleFile::new("main.tf", "")]);
        let writer = writer(tmp.path());

        writer.stage("web", "job-1", &bundle).await.unwrap();
        let err = writer.stage("web", "job-1", &bundle).await.unwrap_err();
        assert!(matches!(err, StageError::StagingFailure(_)));
    }

    #[tokio::test]
    async fn test_rejects_escaping_names_before_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = writer(tmp.path());

        for name in ["../evil.tf", "/etc/passwd", "", "./", "a/../../b"] {
            let bundle = ConfigurationBundle::new(vec![
                BundleFile::new("main.tf", "ok"),
                BundleFile::new(name, "x"),
            ]);
            let err = writer.stage("web", "job-2", &bundle).await.unwrap_err();
            assert!(err.to_string().contains("invalid path"), "{}: {}", name, err);
        }
        assert!(!writer.workspace_for("web", "job-2").dir.exists().await);
    }

    #[tokio::test]
    async fn test_failed_write_removes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = writer(tmp.path());
        // "main.tf" cannot be both a file and a directory
        let bundle = ConfigurationBundle::new(vec![
            BundleFile::new("main.tf", "ok"),
            BundleFile::new("main.tf/inner.tf", "x"),
        ]);

        let err = writer.stage("web", "job-3", &bundle).await.unwrap_err();
        assert!(matches!(err, StageError::StagingFailure(_)));
        assert!(!writer.workspace_for("web", "job-3").dir.exists().await);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = writer(tmp.path());
        let mut files: Vec<BundleFile> = (0..32)
            .map(|i| BundleFile::new(format!("modules/m{i}/nested/deep/main.tf"), "x"))
            .collect();
        files.push(BundleFile::new("main.tf", "ok"));
        files.push(BundleFile::new("main.tf/inner.tf", "x"));

        let err = writer
            .stage("web", "job-5", &ConfigurationBundle::new(files))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::StagingFailure(_)));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let mut entries = tokio::fs::read_dir(tmp.path().join("workspaces")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_bundle_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = writer(tmp.path())
            .stage("web", "job-4", &ConfigurationBundle::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no files"));
    }
}
