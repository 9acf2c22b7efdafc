//! Unit tests for file handles, the write scheduler and the load gate.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use tempfile::TempDir;
use toml::Value;

use crate::{
    core::{ConfigError, WriteFault},
    format::{Charset, JsonFormat},
    tree::ParsingMode,
};

use super::{
    ByteSink, CloseOutcome, CloseWait, ConfigFile, FileConfig, FileNotFoundAction, LoadOutcome,
    SchedulerState, WritingMode,
};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Sink that records every write and holds writers until opened.
#[derive(Default)]
struct GatedSink {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    open: bool,
    started: usize,
    writes: Vec<Vec<u8>>,
}

impl GatedSink {
    fn closed() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn open(&self) {
        self.state.lock().unwrap().open = true;
        self.changed.notify_all();
    }

    fn wait_started(&self, count: usize) {
        let deadline = Instant::now() + WAIT_LIMIT;
        let mut state = self.state.lock().unwrap();
        while state.started < count {
            let now = Instant::now();
            assert!(now < deadline, "write {count} never started");
            state = self.changed.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    fn started(&self) -> usize {
        self.state.lock().unwrap().started
    }

    fn writes(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .map(|bytes| String::from_utf8(bytes.clone()).unwrap())
            .collect()
    }
}

impl ByteSink for GatedSink {
    fn write_all(&self, _path: &Path, _mode: WritingMode, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.started += 1;
        self.changed.notify_all();

        while !state.open {
            state = self.changed.wait(state).unwrap();
        }

        state.writes.push(bytes.to_vec());
        Ok(())
    }
}

struct FailingSink;

impl ByteSink for FailingSink {
    fn write_all(&self, _path: &Path, _mode: WritingMode, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
    }
}

/// Sink that fails the test if two writes ever overlap.
#[derive(Default)]
struct OverlapSink {
    busy: AtomicBool,
    overlapped: AtomicBool,
    writes: AtomicUsize,
}

impl ByteSink for OverlapSink {
    fn write_all(&self, _path: &Path, _mode: WritingMode, _bytes: &[u8]) -> io::Result<()> {
        if self.busy.swap(true, Ordering::AcqRel) {
            self.overlapped.store(true, Ordering::Release);
        }
        thread::sleep(Duration::from_millis(1));
        self.writes.fetch_add(1, Ordering::AcqRel);
        self.busy.store(false, Ordering::Release);
        Ok(())
    }
}

fn config_path(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

fn gated_async(dir: &TempDir) -> (FileConfig, Arc<GatedSink>) {
    let sink = GatedSink::closed();
    let config = FileConfig::builder(config_path(dir, "app.toml"))
        .unwrap()
        .async_writes()
        .sink(sink.clone())
        .build()
        .unwrap();
    (config, sink)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT_LIMIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition never became true");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

mod write_scheduler {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn second_save_during_write_produces_exactly_two_writes() {
        let dir = TempDir::new().unwrap();
        let (config, sink) = gated_async(&dir);

        config.set("value", Value::Integer(1)).unwrap();
        let first = config.save().unwrap();
        sink.wait_started(1);

        config.set("value", Value::Integer(2)).unwrap();
        let second = config.save().unwrap();
        assert_eq!(config.state(), SchedulerState::WritingDirty);

        sink.open();
        first.wait().await.unwrap();
        second.wait().await.unwrap();
        wait_until(|| config.state() == SchedulerState::Idle).await;

        let writes = sink.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes[0].contains("value = 1"));
        assert!(writes[1].contains("value = 2"));
        assert_eq!(config.physical_writes(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn saves_during_write_collapse_to_latest_state() {
        let dir = TempDir::new().unwrap();
        let (config, sink) = gated_async(&dir);

        config.set("value", Value::Integer(0)).unwrap();
        let mut tickets = vec![config.save().unwrap()];
        sink.wait_started(1);

        for i in 1..=10 {
            config.set("value", Value::Integer(i)).unwrap();
            tickets.push(config.save().unwrap());
        }

        sink.open();
        for ticket in tickets {
            ticket.wait().await.unwrap();
        }
        wait_until(|| config.state() == SchedulerState::Idle).await;

        let writes = sink.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes[1].contains("value = 10"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn async_save_returns_before_write_finishes() {
        let dir = TempDir::new().unwrap();
        let (config, sink) = gated_async(&dir);

        let ticket = config.save().unwrap();

        assert!(ticket.is_pending());
        assert!(config.is_async());
        sink.wait_started(1);
        assert_eq!(config.state(), SchedulerState::Writing);

        sink.open();
        ticket.wait().await.unwrap();
    }

    #[test]
    fn sync_saves_never_overlap() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(OverlapSink::default());
        let config = FileConfig::builder(config_path(&dir, "app.toml"))
            .unwrap()
            .sink(sink.clone())
            .build()
            .unwrap();

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let config = config.clone();
                thread::spawn(move || {
                    for i in 0..10 {
                        config.set("last", Value::Integer(worker * 100 + i)).unwrap();
                        config.save().unwrap().wait_blocking().unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(!sink.overlapped.load(Ordering::Acquire));
        assert_eq!(sink.writes.load(Ordering::Acquire), 40);
        assert_eq!(config.state(), SchedulerState::Idle);
    }

    #[test]
    fn sync_save_writes_file_before_returning() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir, "app.toml");
        let config = FileConfig::builder(&path).unwrap().build().unwrap();

        config.set("name", Value::String("demo".into())).unwrap();
        let ticket = config.save().unwrap();

        assert!(!ticket.is_pending());
        assert!(fs::read_to_string(&path).unwrap().contains("name = \"demo\""));
    }

    #[test]
    fn sync_write_failure_is_returned() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig::builder(config_path(&dir, "app.toml"))
            .unwrap()
            .sink(Arc::new(FailingSink))
            .build()
            .unwrap();

        let result = config.save();

        assert!(matches!(
            result,
            Err(ConfigError::Write {
                source: WriteFault::Io(_),
                ..
            })
        ));
        assert_eq!(config.state(), SchedulerState::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn async_write_failure_reaches_ticket_and_handler() {
        let dir = TempDir::new().unwrap();
        let reported = Arc::new(AtomicUsize::new(0));
        let counter = reported.clone();
        let config = FileConfig::builder(config_path(&dir, "app.toml"))
            .unwrap()
            .async_writes()
            .sink(Arc::new(FailingSink))
            .on_write_error(move |_, _| {
                counter.fetch_add(1, Ordering::AcqRel);
            })
            .build()
            .unwrap();

        let result = config.save().unwrap().wait().await;

        assert!(matches!(result, Err(ConfigError::Write { .. })));
        assert_eq!(reported.load(Ordering::Acquire), 1);
        assert_eq!(config.physical_writes(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn encoding_failure_reaches_ticket() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig::builder(config_path(&dir, "app.toml"))
            .unwrap()
            .async_writes()
            .charset(Charset::Latin1)
            .sink(GatedSink::closed())
            .on_write_error(|_, _| {})
            .build()
            .unwrap();

        config.set("symbol", Value::String("€".into())).unwrap();
        let result = config.save().unwrap().wait().await;

        assert!(matches!(
            result,
            Err(ConfigError::Write {
                source: WriteFault::Encode(_),
                ..
            })
        ));
        assert_eq!(config.state(), SchedulerState::Idle);
    }

    #[test]
    fn async_writes_need_a_runtime() {
        let dir = TempDir::new().unwrap();

        let result = FileConfig::builder(config_path(&dir, "app.toml"))
            .unwrap()
            .async_writes()
            .build();

        assert!(matches!(result, Err(ConfigError::NoRuntime { .. })));
    }

    #[test]
    fn append_mode_keeps_previous_content() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir, "log.toml");
        let config = FileConfig::builder(&path)
            .unwrap()
            .writing_mode(WritingMode::Append)
            .build()
            .unwrap();

        config.set("a", Value::Integer(1)).unwrap();
        config.save().unwrap().wait_blocking().unwrap();
        config.save().unwrap().wait_blocking().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("a = 1").count(), 2);
    }
}

mod closing {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn close_waits_for_in_flight_write() {
        let dir = TempDir::new().unwrap();
        let (config, sink) = gated_async(&dir);

        config.set("value", Value::Integer(1)).unwrap();
        let _first = config.save().unwrap();
        sink.wait_started(1);
        config.set("value", Value::Integer(2)).unwrap();
        let _second = config.save().unwrap();

        let closer = config.clone();
        let closing = tokio::task::spawn_blocking(move || closer.close());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!closing.is_finished());

        sink.open();
        assert_eq!(closing.await.unwrap(), CloseOutcome::Drained);

        let writes = sink.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes[1].contains("value = 2"));
        assert_eq!(config.state(), SchedulerState::Closed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_gives_up_after_timeout() {
        let dir = TempDir::new().unwrap();
        let (config, sink) = gated_async(&dir);

        let ticket = config.save().unwrap();
        sink.wait_started(1);

        let outcome = config.close_with(CloseWait::Timeout(Duration::from_millis(30)));
        assert_eq!(outcome, CloseOutcome::TimedOut);
        assert!(config.is_closed());
        assert_eq!(config.close(), CloseOutcome::AlreadyClosed);

        sink.open();
        ticket.wait().await.unwrap();
        wait_until(|| config.state() == SchedulerState::Closed).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unbounded_timeout_waits_for_the_write() {
        let dir = TempDir::new().unwrap();
        let (config, sink) = gated_async(&dir);

        let ticket = config.save().unwrap();
        sink.wait_started(1);

        let closer = config.clone();
        let closing =
            tokio::task::spawn_blocking(move || closer.close_with(CloseWait::Timeout(Duration::MAX)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!closing.is_finished());

        sink.open();
        assert_eq!(closing.await.unwrap(), CloseOutcome::Drained);
        ticket.wait().await.unwrap();
        assert_eq!(config.state(), SchedulerState::Closed);
        assert!(!config.interrupt_close());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn waiting_close_can_be_interrupted() {
        let dir = TempDir::new().unwrap();
        let (config, sink) = gated_async(&dir);

        let ticket = config.save().unwrap();
        sink.wait_started(1);
        assert!(!config.interrupt_close());

        let closer = config.clone();
        let closing = tokio::task::spawn_blocking(move || closer.close());
        wait_until(|| config.interrupt_close()).await;

        assert_eq!(closing.await.unwrap(), CloseOutcome::Interrupted);
        assert!(!CloseOutcome::Interrupted.is_drained());

        sink.open();
        ticket.wait().await.unwrap();
    }

    #[test]
    fn idle_close_returns_immediately() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig::builder(config_path(&dir, "app.toml"))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.close(), CloseOutcome::Drained);
        assert_eq!(config.close(), CloseOutcome::AlreadyClosed);
        assert_eq!(config.state(), SchedulerState::Closed);
    }

    #[test]
    fn closed_handle_rejects_save_and_load() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig::builder(config_path(&dir, "app.toml"))
            .unwrap()
            .build()
            .unwrap();
        config.close();

        match config.save() {
            Err(ConfigError::Closed { operation, .. }) => assert_eq!(operation, "save"),
            other => panic!("expected closed error, got {other:?}"),
        }
        match config.load() {
            Err(ConfigError::Closed { operation, .. }) => assert_eq!(operation, "load"),
            other => panic!("expected closed error, got {other:?}"),
        }
    }
}

mod loading {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn load_is_skipped_while_writing() {
        let dir = TempDir::new().unwrap();
        let (config, sink) = gated_async(&dir);
        fs::write(config_path(&dir, "app.toml"), "value = 99").unwrap();

        config.set("value", Value::Integer(1)).unwrap();
        let ticket = config.save().unwrap();
        sink.wait_started(1);

        assert_eq!(config.load().unwrap(), LoadOutcome::Skipped);
        assert_eq!(config.get("value").unwrap(), Value::Integer(1));

        sink.open();
        ticket.wait().await.unwrap();
        wait_until(|| config.state() == SchedulerState::Idle).await;

        assert_eq!(config.load().unwrap(), LoadOutcome::Loaded);
        assert_eq!(config.get("value").unwrap(), Value::Integer(99));
    }

    #[test]
    fn repeated_load_leaves_tree_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir, "app.toml");
        fs::write(&path, "[server]\nport = 80\nhosts = [\"a\", \"b\"]\n").unwrap();
        let config = FileConfig::builder(&path)
            .unwrap()
            .parsing_mode(ParsingMode::Merge)
            .build()
            .unwrap();

        config.load().unwrap();
        let first = config.tree().snapshot();
        config.load().unwrap();

        assert_eq!(config.tree().snapshot(), first);
    }

    #[test]
    fn replace_mode_drops_keys_missing_from_file() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir, "app.toml");
        fs::write(&path, "kept = 1").unwrap();
        let config = FileConfig::builder(&path).unwrap().build().unwrap();

        config.set("local", Value::Boolean(true)).unwrap();
        config.load().unwrap();

        assert!(!config.tree().contains("local"));
        assert_eq!(config.get("kept").unwrap(), Value::Integer(1));
    }

    #[test]
    fn malformed_file_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir, "app.toml");
        fs::write(&path, "this is = = not toml").unwrap();
        let config = FileConfig::builder(&path).unwrap().build().unwrap();

        match config.load() {
            Err(ConfigError::Read { details, .. }) => {
                assert!(details.starts_with("TOML codec error"), "{details}");
            }
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[test]
    fn unencodable_tree_is_a_write_error() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig::builder(config_path(&dir, "app.json"))
            .unwrap()
            .build()
            .unwrap();
        let datetime: Value = "2024-01-01T00:00:00Z"
            .parse::<toml::value::Datetime>()
            .unwrap()
            .into();
        config.set("created", datetime).unwrap();

        match config.save() {
            Err(ConfigError::Write {
                source: WriteFault::Encode(details),
                ..
            }) => assert!(details.starts_with("JSON codec error"), "{details}"),
            other => panic!("expected encode failure, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_throws_when_asked() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig::builder(config_path(&dir, "missing.toml"))
            .unwrap()
            .on_file_not_found(FileNotFoundAction::ThrowError)
            .build()
            .unwrap();

        assert!(matches!(config.load(), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn missing_file_is_created_empty_by_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/settings.json");
        let config = FileConfig::builder(&path).unwrap().build().unwrap();

        assert_eq!(config.load().unwrap(), LoadOutcome::Loaded);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        assert!(config.tree().is_empty());
    }

    #[test]
    fn missing_file_can_be_ignored() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir, "missing.toml");
        let config = FileConfig::builder(&path)
            .unwrap()
            .on_file_not_found(FileNotFoundAction::ReadNothing)
            .build()
            .unwrap();
        config.set("kept", Value::Integer(1)).unwrap();

        assert_eq!(config.load().unwrap(), LoadOutcome::NotFound);
        assert_eq!(config.get("kept").unwrap(), Value::Integer(1));
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_is_seeded_from_defaults() {
        let dir = TempDir::new().unwrap();
        let defaults = config_path(&dir, "defaults.toml");
        fs::write(&defaults, "theme = \"light\"").unwrap();
        let path = config_path(&dir, "user.toml");
        let config = FileConfig::builder(&path)
            .unwrap()
            .on_file_not_found(FileNotFoundAction::copy_from_file(&defaults).unwrap())
            .build()
            .unwrap();

        assert_eq!(config.load().unwrap(), LoadOutcome::Loaded);
        assert_eq!(
            config.get("theme").unwrap(),
            Value::String("light".to_string())
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "theme = \"light\"");
    }

    #[test]
    fn latin1_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir, "app.toml");
        let config = FileConfig::builder(&path)
            .unwrap()
            .charset(Charset::Latin1)
            .build()
            .unwrap();

        config.set("city", Value::String("Zürich".into())).unwrap();
        config.save().unwrap().wait_blocking().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.contains(&0xFC));
        assert!(String::from_utf8(bytes).is_err());

        config.tree().clear();
        config.load().unwrap();
        assert_eq!(
            config.get("city").unwrap(),
            Value::String("Zürich".to_string())
        );
    }

    #[test]
    fn unknown_extension_has_no_format() {
        assert!(matches!(
            FileConfig::builder("settings.ini"),
            Err(ConfigError::NoFormat { .. })
        ));
    }

    #[test]
    fn explicit_format_ignores_extension() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir, "settings.conf");
        let config = FileConfig::builder_with_format(&path, JsonFormat)
            .build()
            .unwrap();

        config.set("a", Value::Integer(1)).unwrap();
        config.save().unwrap().wait_blocking().unwrap();

        assert!(fs::read_to_string(&path).unwrap().contains("\"a\": 1"));
        assert!(config.path().is_absolute());
    }
}

mod decorators {
    use super::*;

    #[test]
    fn autosave_writes_after_set_and_remove() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir, "app.toml");
        let chain = FileConfig::builder(&path)
            .unwrap()
            .autosave()
            .build_chain()
            .unwrap();

        chain.set("a", Value::Integer(1)).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("a = 1"));

        chain.remove("a").unwrap();
        assert!(!fs::read_to_string(&path).unwrap().contains("a = 1"));
    }

    #[test]
    fn autosave_on_closed_handle_keeps_the_change_in_memory() {
        let dir = TempDir::new().unwrap();
        let chain = FileConfig::builder(config_path(&dir, "app.toml"))
            .unwrap()
            .autosave()
            .build_chain()
            .unwrap();
        chain.close();

        chain.set("late", Value::Integer(1)).unwrap();

        assert_eq!(chain.get("late").unwrap(), Value::Integer(1));
    }

    #[test]
    fn checked_rejects_values_the_format_cannot_store() {
        let dir = TempDir::new().unwrap();
        let chain = FileConfig::builder(config_path(&dir, "app.json"))
            .unwrap()
            .checked()
            .build_chain()
            .unwrap();
        let datetime: Value = "2024-01-01T00:00:00Z"
            .parse::<toml::value::Datetime>()
            .unwrap()
            .into();

        let result = chain.set("created", datetime);

        match result {
            Err(ConfigError::UnsupportedValue {
                format, value_type, ..
            }) => {
                assert_eq!(format, "JSON");
                assert_eq!(value_type, "datetime");
            }
            other => panic!("expected unsupported value, got {other:?}"),
        }
        assert!(!chain.tree().contains("created"));
        assert!(chain.set("count", Value::Integer(1)).is_ok());
    }

    #[test]
    fn checked_autosave_does_not_save_rejected_values() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir, "app.json");
        let chain = FileConfig::builder(&path)
            .unwrap()
            .checked()
            .autosave()
            .build_chain()
            .unwrap();
        let datetime: Value = "2024-01-01T00:00:00Z"
            .parse::<toml::value::Datetime>()
            .unwrap()
            .into();

        assert!(chain.set("created", datetime).is_err());
        assert!(!path.exists());
    }
}
