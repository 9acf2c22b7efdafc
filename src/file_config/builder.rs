use std::{
    path::{self, Path, PathBuf},
    sync::Arc,
};

use tokio::runtime::Handle;
use tracing::{debug, error};

use crate::{
    core::{ConfigError, Result, WriteFault},
    format::{Charset, ConfigFormat, detect_format},
    tree::{ConfigTree, ParsingMode},
    watch::WatchRegistry,
};

use super::{
    AutoreloadFileConfig, AutosaveFileConfig, ByteSink, CheckedFileConfig, ConfigFile, DiskSink,
    FileConfig, FileNotFoundAction, WritingMode,
    load_gate::LoadGate,
    scheduler::{Producer, Strategy, WriteErrorHandler, WriteScheduler},
};

enum StrategyChoice {
    Sync,
    AsyncCurrent,
    AsyncOn(Handle),
}

enum ReloadChoice {
    Off,
    Shared,
    On(Arc<WatchRegistry>),
}

/// Builder for [`FileConfig`] handles and decorator chains.
///
/// The default settings are:
/// - charset: UTF-8
/// - writing mode: [`WritingMode::Replace`]
/// - parsing mode: [`ParsingMode::Replace`]
/// - file not found: [`FileNotFoundAction::CreateEmpty`]
/// - synchronous writes
/// - no autosave, no autoreload, no value checking
pub struct FileConfigBuilder {
    path: PathBuf,
    format: Arc<dyn ConfigFormat>,
    charset: Charset,
    writing_mode: WritingMode,
    parsing_mode: ParsingMode,
    not_found: FileNotFoundAction,
    strategy: StrategyChoice,
    sink: Arc<dyn ByteSink>,
    on_write_error: Option<WriteErrorHandler>,
    tree: Option<ConfigTree>,
    autosave: bool,
    autoreload: ReloadChoice,
    checked: bool,
}

impl FileConfigBuilder {
    pub(crate) fn new(path: &Path, format: Arc<dyn ConfigFormat>) -> Self {
        Self {
            path: path.to_path_buf(),
            format,
            charset: Charset::default(),
            writing_mode: WritingMode::default(),
            parsing_mode: ParsingMode::default(),
            not_found: FileNotFoundAction::default(),
            strategy: StrategyChoice::Sync,
            sink: Arc::new(DiskSink),
            on_write_error: None,
            tree: None,
            autosave: false,
            autoreload: ReloadChoice::Off,
            checked: false,
        }
    }

    pub(crate) fn detect(path: &Path) -> Result<Self> {
        let format = detect_format(path).ok_or_else(|| ConfigError::NoFormat {
            path: path.to_path_buf(),
        })?;

        Ok(Self::new(path, format))
    }

    /// Sets the text encoding of the file.
    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    /// Sets where saves write their content.
    pub fn writing_mode(mut self, mode: WritingMode) -> Self {
        self.writing_mode = mode;
        self
    }

    /// Sets how loads apply the parsed document.
    pub fn parsing_mode(mut self, mode: ParsingMode) -> Self {
        self.parsing_mode = mode;
        self
    }

    /// Sets what loads do when the file does not exist.
    pub fn on_file_not_found(mut self, action: FileNotFoundAction) -> Self {
        self.not_found = action;
        self
    }

    /// Saves block the calling thread until the write completes.
    pub fn sync_writes(mut self) -> Self {
        self.strategy = StrategyChoice::Sync;
        self
    }

    /// Saves return immediately and write on the tokio runtime that is
    /// current when `build` is called.
    pub fn async_writes(mut self) -> Self {
        self.strategy = StrategyChoice::AsyncCurrent;
        self
    }

    /// Saves return immediately and write on the given runtime.
    pub fn async_writes_on(mut self, runtime: Handle) -> Self {
        self.strategy = StrategyChoice::AsyncOn(runtime);
        self
    }

    /// Replaces the destination of physical writes.
    pub fn sink(mut self, sink: Arc<dyn ByteSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Receives async write failures.
    ///
    /// Failures are still delivered to the tickets of the failed write. By
    /// default they are also logged.
    pub fn on_write_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Path, &WriteFault) + Send + Sync + 'static,
    {
        self.on_write_error = Some(Arc::new(handler));
        self
    }

    /// Uses an existing tree instead of a new empty one.
    pub fn tree(mut self, tree: ConfigTree) -> Self {
        self.tree = Some(tree);
        self
    }

    /// Saves after every `set`/`remove` made through the built chain.
    pub fn autosave(mut self) -> Self {
        self.autosave = true;
        self
    }

    /// Reloads whenever the file changes, using `registry`.
    pub fn autoreload(mut self, registry: Arc<WatchRegistry>) -> Self {
        self.autoreload = ReloadChoice::On(registry);
        self
    }

    /// Reloads whenever the file changes, using the process-wide registry.
    pub fn autoreload_shared(mut self) -> Self {
        self.autoreload = ReloadChoice::Shared;
        self
    }

    /// Rejects values the format cannot store.
    pub fn checked(mut self) -> Self {
        self.checked = true;
        self
    }

    /// Builds the base handle, ignoring autosave, autoreload and checking.
    ///
    /// # Errors
    /// * `ConfigError::NoRuntime` - If async writes were requested outside a tokio runtime
    /// * `ConfigError::Read` - If the path cannot be made absolute
    pub fn build(self) -> Result<FileConfig> {
        self.build_parts().map(|(config, _)| config)
    }

    /// Builds the handle wrapped in the configured decorators.
    ///
    /// Decorators are applied in the order autoreload, checked, autosave.
    ///
    /// # Errors
    /// * `ConfigError::NoRuntime` - If async writes were requested outside a tokio runtime
    /// * `ConfigError::Watch` - If autoreload cannot watch the file
    /// * `ConfigError::Read` - If the path cannot be made absolute
    pub fn build_chain(self) -> Result<Arc<dyn ConfigFile>> {
        let (config, options) = self.build_parts()?;
        let mut chain: Arc<dyn ConfigFile> = Arc::new(config);

        let registry = match options.autoreload {
            ReloadChoice::Off => None,
            ReloadChoice::Shared => Some(WatchRegistry::shared()?),
            ReloadChoice::On(registry) => Some(registry),
        };
        if let Some(registry) = registry {
            chain = Arc::new(AutoreloadFileConfig::new(chain, registry)?);
        }
        if options.checked {
            chain = Arc::new(CheckedFileConfig::new(chain));
        }
        if options.autosave {
            chain = Arc::new(AutosaveFileConfig::new(chain));
        }

        Ok(chain)
    }

    fn build_parts(self) -> Result<(FileConfig, ChainOptions)> {
        let path = path::absolute(&self.path).map_err(|e| ConfigError::read(e, &self.path))?;

        let strategy = match self.strategy {
            StrategyChoice::Sync => Strategy::Sync,
            StrategyChoice::AsyncOn(runtime) => Strategy::Async(runtime),
            StrategyChoice::AsyncCurrent => {
                let runtime = Handle::try_current().map_err(|e| ConfigError::NoRuntime {
                    path: path.clone(),
                    details: e.to_string(),
                })?;
                Strategy::Async(runtime)
            }
        };

        let tree = self.tree.unwrap_or_default();
        let producer = encoder(tree.clone(), Arc::clone(&self.format), self.charset);
        let on_write_error: WriteErrorHandler = match self.on_write_error {
            Some(handler) => handler,
            None => Arc::new(log_write_error),
        };

        debug!(
            path = %path.display(),
            format = self.format.name(),
            writing_mode = ?self.writing_mode,
            parsing_mode = ?self.parsing_mode,
            "Building config file handle"
        );

        let scheduler = WriteScheduler::new(
            path.clone(),
            self.writing_mode,
            strategy,
            self.sink,
            producer,
            on_write_error,
        );
        let gate = LoadGate {
            path,
            format: self.format,
            charset: self.charset,
            parsing_mode: self.parsing_mode,
            not_found: self.not_found,
            tree,
        };

        let options = ChainOptions {
            autosave: self.autosave,
            autoreload: self.autoreload,
            checked: self.checked,
        };

        Ok((FileConfig::from_parts(scheduler, gate), options))
    }
}

struct ChainOptions {
    autosave: bool,
    autoreload: ReloadChoice,
    checked: bool,
}

fn encoder(tree: ConfigTree, format: Arc<dyn ConfigFormat>, charset: Charset) -> Producer {
    Arc::new(move || {
        let text = format
            .write(&tree.read())
            .map_err(|e| WriteFault::Encode(e.to_string()))?;
        charset.encode(&text).map_err(WriteFault::Encode)
    })
}

fn log_write_error(path: &Path, fault: &WriteFault) {
    error!(path = %path.display(), error = %fault, "Config write failed");
}
