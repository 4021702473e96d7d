//! Bundles dropped on disk, one directory per reference id

use async_trait::async_trait;
use tracing::debug;

use crate::bundle::{BundleError, BundleSource};
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::{BundleFile, ConfigurationBundle};

/// Reads every regular file of `<root>/<reference_id>/`, sorted by name
#[derive(Debug, Clone)]
pub struct DirectoryBundleSource {
    root: Dir,
}

impl DirectoryBundleSource {
    pub fn new(root: Dir) -> Self {
        Self { root }
    }
}

fn validate_reference(reference_id: &str) -> Result<(), BundleError> {
    let valid = !reference_id.is_empty()
        && reference_id != "."
        && reference_id != ".."
        && reference_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(BundleError::InvalidReference(reference_id.to_string()))
    }
}

#[async_trait]
impl BundleSource for DirectoryBundleSource {
    async fn fetch(&self, reference_id: &str) -> Result<ConfigurationBundle, BundleError> {
        validate_reference(reference_id)?;

        let dir = self.root.subdir(reference_id);
        if !dir.exists().await {
            return Err(BundleError::NotFound(reference_id.to_string()));
        }

        let unreadable = |message: String| BundleError::Unreadable {
            reference: reference_id.to_string(),
            message,
        };

        let mut files = Vec::new();
        for path in dir.list_files().await.map_err(|e| unreadable(e.to_string()))? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let content = File::new(&path)
                .read_string()
                .await
                .map_err(|e| unreadable(format!("{}: {}", name, e)))?;
            files.push(BundleFile { name, content });
        }

        debug!("Loaded bundle {} with {} files", reference_id, files.len());
        Ok(ConfigurationBundle::new(files))
    }
}
