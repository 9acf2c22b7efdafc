use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, instrument};

use crate::{
    core::{ConfigError, Result},
    format::{Charset, ConfigFormat},
    tree::{ConfigTree, ParsingMode},
};

use super::{FileNotFoundAction, LoadOutcome, scheduler::WriteScheduler};

/// Reads the file into the tree, deferring to the write scheduler.
pub(crate) struct LoadGate {
    pub(crate) path: PathBuf,
    pub(crate) format: Arc<dyn ConfigFormat>,
    pub(crate) charset: Charset,
    pub(crate) parsing_mode: ParsingMode,
    pub(crate) not_found: FileNotFoundAction,
    pub(crate) tree: ConfigTree,
}

impl LoadGate {
    /// Loads the file unless the handle is writing it.
    ///
    /// The writing check and the read are not atomic: a save starting right
    /// after the check may race with the read. A skipped load is reported as
    /// `LoadOutcome::Skipped`.
    ///
    /// # Errors
    /// * `ConfigError::Closed` - If the handle was closed
    /// * `ConfigError::Read` - If the file cannot be read, decoded or parsed,
    ///   or is missing under `FileNotFoundAction::ThrowError`
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub(crate) fn load(&self, scheduler: &WriteScheduler) -> Result<LoadOutcome> {
        if scheduler.is_closed() {
            return Err(ConfigError::Closed {
                path: self.path.clone(),
                operation: "load",
            });
        }

        if scheduler.is_writing() {
            debug!("Write in flight, skipping load");
            return Ok(LoadOutcome::Skipped);
        }

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => match self.recover_missing()? {
                Some(bytes) => bytes,
                None => {
                    debug!("File not found, tree left untouched");
                    return Ok(LoadOutcome::NotFound);
                }
            },
            Err(e) => return Err(ConfigError::read(e, &self.path)),
        };

        let text = self
            .charset
            .decode(&bytes)
            .map_err(|e| ConfigError::read(e, &self.path))?;
        let parsed = self
            .format
            .parse(&text)
            .map_err(|e| ConfigError::read(e, &self.path))?;

        self.tree.apply(parsed, self.parsing_mode);
        debug!(entries = self.tree.len(), "Config loaded");

        Ok(LoadOutcome::Loaded)
    }

    /// Applies the file-not-found policy.
    ///
    /// Returns the bytes to parse, or `None` when the tree must stay untouched.
    fn recover_missing(&self) -> Result<Option<Vec<u8>>> {
        match &self.not_found {
            FileNotFoundAction::ThrowError => {
                Err(ConfigError::read("file does not exist", &self.path))
            }
            FileNotFoundAction::ReadNothing => Ok(None),
            FileNotFoundAction::CreateEmpty => {
                let bytes = self
                    .charset
                    .encode(self.format.empty_document())
                    .map_err(|e| ConfigError::read(e, &self.path))?;
                self.create_with(&bytes)?;
                Ok(Some(bytes))
            }
            FileNotFoundAction::CopyData(data) => {
                self.create_with(data)?;
                Ok(Some(data.to_vec()))
            }
        }
    }

    fn create_with(&self, bytes: &[u8]) -> Result<()> {
        debug!(len = bytes.len(), "Creating missing config file");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ConfigError::read(e, parent))?;
        }

        fs::write(&self.path, bytes).map_err(|e| ConfigError::read(e, &self.path))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
