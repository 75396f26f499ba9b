//! Location of installed package files.

use std::path::{Path, PathBuf};

use crate::instance::PlugInId;

/// Maps package files to paths on disk.
pub trait FileStore: Send + Sync {
    fn path_for(&self, plug_in_id: PlugInId, file_name: &Path) -> PathBuf;
}

/// Stores each package under `<root>/<plug_in_id>/`.
#[derive(Debug, Clone)]
pub struct DirectoryFileStore {
    root: PathBuf,
}

impl DirectoryFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files of one package.
    pub fn package_dir(&self, plug_in_id: PlugInId) -> PathBuf {
        self.root.join(plug_in_id.to_string())
    }
}

impl FileStore for DirectoryFileStore {
    fn path_for(&self, plug_in_id: PlugInId, file_name: &Path) -> PathBuf {
        if file_name.is_absolute() {
            return file_name.to_path_buf();
        }
        self.package_dir(plug_in_id).join(file_name)
    }
}
