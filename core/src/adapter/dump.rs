//! Diagnostic dumps of generated adapter classes.

use std::path::{Path, PathBuf};

use crate::config::EngineOptions;

/// Sink for generated class bytes. Called once per class, when it is first
/// defined.
pub trait BytecodeDump: Send + Sync {
    fn dump(&self, class_name: &str, bytes: &[u8]);
}

/// Writes `<dir>/<class/name>.slad` when a directory is configured.
#[derive(Debug, Clone, Default)]
pub struct DumpBytecode {
    dir: Option<PathBuf>,
}

impl DumpBytecode {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn from_options(options: &EngineOptions) -> Self {
        Self::new(options.dump_dir.clone())
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn path_for(&self, class_name: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        Some(dir.join(format!("{}.slad", class_name.replace('.', "/"))))
    }
}

impl BytecodeDump for DumpBytecode {
    fn dump(&self, class_name: &str, bytes: &[u8]) {
        let Some(path) = self.path_for(class_name) else {
            tracing::trace!(class = class_name, len = bytes.len(), "no dump directory configured");
            return;
        };
        let written = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::write(&path, bytes));
        match written {
            Ok(()) => tracing::debug!(class = class_name, path = %path.display(), "dumped adapter class"),
            Err(err) => tracing::warn!("failed to dump {} to {}: {}", class_name, path.display(), err),
        }
    }
}
