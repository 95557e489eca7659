//! File watcher for the transcripts directory.
//!
//! Forwards create/modify/delete events for accepted transcript files,
//! debounced per path so that editor write storms collapse into one event.
//! Hidden and temporary files are filtered before they reach the debouncer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::parser::accepted_format;

/// Suffixes editors and browsers use for files still being written.
const TEMP_SUFFIXES: &[&str] = &[".tmp", ".swp", ".swx", ".part", ".crdownload", ".download", "~"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

/// Stable transcript files only: accepted extension, not hidden, not an
/// editor temp file.
pub fn is_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') || name.starts_with("~$") || name.starts_with(".#") {
        return false;
    }
    let lower = name.to_lowercase();
    if TEMP_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return false;
    }
    accepted_format(path).is_some()
}

/// Every candidate file under `dir`, for the startup scan.
pub fn scan_directory(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                log::warn!("Watcher: skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file() && is_candidate(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Per-path debounce state. An event is released once its path has been
/// quiet for the whole window.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, (FileEventKind, Instant)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Fold an event into the pending state for its path and restart that
    /// path's quiet period.
    pub fn record(&mut self, event: FileEvent, now: Instant) {
        let kind = match (self.pending.get(&event.path).map(|(k, _)| *k), event.kind) {
            (_, FileEventKind::Delete) => FileEventKind::Delete,
            (Some(FileEventKind::Create), _) => FileEventKind::Create,
            // Deleted then recreated within the window: content changed.
            (Some(FileEventKind::Delete), _) => FileEventKind::Modify,
            (_, kind) => kind,
        };
        self.pending.insert(event.path, (kind, now));
    }

    /// Remove and return every event whose quiet period has elapsed.
    pub fn due(&mut self, now: Instant) -> Vec<FileEvent> {
        let window = self.window;
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| now.duration_since(*at) >= window)
            .map(|(path, _)| path.clone())
            .collect();
        let mut events: Vec<FileEvent> = ready
            .into_iter()
            .filter_map(|path| {
                self.pending
                    .remove(&path)
                    .map(|(kind, _)| FileEvent { path, kind })
            })
            .collect();
        events.sort_by(|a, b| a.path.cmp(&b.path));
        events
    }

    /// When the earliest pending event becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|(_, at)| *at + self.window).min()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Translate a raw notify event into zero or more candidate file events.
fn translate(event: &Event) -> Vec<FileEvent> {
    let mut out = Vec::new();
    let mut push = |path: &PathBuf, kind: FileEventKind| {
        if is_candidate(path) {
            out.push(FileEvent {
                path: path.clone(),
                kind,
            });
        }
    };
    match &event.kind {
        EventKind::Create(_) => event.paths.iter().for_each(|p| push(p, FileEventKind::Create)),
        EventKind::Remove(_) => event.paths.iter().for_each(|p| push(p, FileEventKind::Delete)),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                push(from, FileEventKind::Delete);
                push(to, FileEventKind::Create);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().for_each(|p| push(p, FileEventKind::Delete))
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().for_each(|p| push(p, FileEventKind::Create))
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => {}
        EventKind::Modify(_) => event.paths.iter().for_each(|p| push(p, FileEventKind::Modify)),
        _ => {}
    }
    out
}

/// Start watching `dir`, sending debounced events on `out`.
///
/// Creates the directory if needed. Returns once the watch is registered;
/// the debounce loop runs until `shutdown` fires or `out` is closed.
pub fn start_watcher(
    dir: PathBuf,
    debounce: Duration,
    out: mpsc::Sender<FileEvent>,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>, notify::Error> {
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(notify::Error::io)?;
        log::info!("Watcher: created {}", dir.display());
    }

    let (raw_tx, mut raw_rx) = mpsc::channel::<FileEvent>(256);
    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                for file_event in translate(&event) {
                    // Runs on notify's own thread, so blocking is fine.
                    if raw_tx.blocking_send(file_event).is_err() {
                        return;
                    }
                }
            }
            Err(e) => log::warn!("Watcher: notify error: {}", e),
        },
        notify::Config::default(),
    )?;
    watcher.watch(&dir, RecursiveMode::Recursive)?;
    log::info!("Watcher: watching {} for transcripts", dir.display());

    Ok(tokio::spawn(async move {
        // Keep the watcher alive for the lifetime of the loop.
        let _watcher = watcher;
        let mut debouncer = Debouncer::new(debounce);

        loop {
            let deadline = debouncer.next_deadline();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                raw = raw_rx.recv() => match raw {
                    Some(event) => {
                        log::debug!("Watcher: {:?} {}", event.kind, event.path.display());
                        debouncer.record(event, Instant::now());
                    }
                    None => break,
                },
                _ = sleep_until_deadline(deadline) => {}
            }

            for event in debouncer.due(Instant::now()) {
                if out.send(event).await.is_err() {
                    log::info!("Watcher: receiver closed, stopping");
                    return;
                }
            }
        }
        log::info!("Watcher: stopped");
    }))
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
