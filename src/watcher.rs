use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};

use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::config::{AppPaths, Settings};
use crate::errors::{ClothError, Result};
use crate::photo::{ImportOutcome, catalogue_photo, is_photo_path};
use crate::repository::ClothRepository;
use crate::storage::ClothStorage;
use crate::storage::sqlite::SqliteStorage;

/// The file recording which process is running `watch run`.
pub struct PidFile<'a> {
    path: &'a Path,
}

impl<'a> PidFile<'a> {
    pub fn at(path: &'a Path) -> Self {
        Self { path }
    }

    /// Records this process as the watcher.
    pub fn claim(&self) -> Result<()> {
        fs::write(self.path, format!("{}\n", std::process::id()))
            .map_err(|e| ClothError::Watcher(format!("{}: {e}", self.path.display())))
    }

    /// The recorded pid. A missing or unparsable file reads as no watcher.
    pub fn pid(&self) -> Result<Option<u32>> {
        let contents = match fs::read_to_string(self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ClothError::Watcher(format!("{}: {e}", self.path.display()))),
        };
        Ok(contents.trim().parse().ok())
    }

    /// The pid of a watcher that is still alive. A file left behind by a dead
    /// process is removed.
    pub fn live(&self) -> Result<Option<u32>> {
        match self.pid()? {
            Some(pid) if process_alive(pid) => Ok(Some(pid)),
            Some(pid) => {
                info!(pid, "removing stale watcher pid file");
                self.clear()?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Removes the file only if it still names this process, so a watcher
    /// shutting down late cannot erase its successor's record.
    pub fn release(&self) -> Result<()> {
        if self.pid()? == Some(std::process::id()) {
            self.clear()?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(ClothError::Watcher(format!("{}: {e}", self.path.display())))
            }
            _ => Ok(()),
        }
    }
}

fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks the target; EPERM still means it exists.
    (unsafe { libc::kill(pid, 0) == 0 })
        || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn send_signal(pid: u32, signal: libc::c_int) -> Result<()> {
    let target = libc::pid_t::try_from(pid)
        .map_err(|_| ClothError::Watcher(format!("pid {pid} out of range")))?;
    if unsafe { libc::kill(target, signal) } == -1 {
        let e = std::io::Error::last_os_error();
        return Err(ClothError::Watcher(format!("signal {signal} to {pid}: {e}")));
    }
    Ok(())
}

/// Asks a running watcher to shut down. Returns false when none was running.
pub fn stop_watcher(paths: &AppPaths) -> Result<bool> {
    let pid_file = PidFile::at(&paths.pid_file);
    let Some(pid) = pid_file.live()? else {
        return Ok(false);
    };
    send_signal(pid, libc::SIGTERM)?;
    pid_file.clear()?;
    info!(pid, "sent SIGTERM to watcher");
    Ok(true)
}

pub fn watcher_status(paths: &AppPaths) -> Result<Option<u32>> {
    PidFile::at(&paths.pid_file).live()
}

/// Spawns `watch run` detached, logging to the watch log file.
pub fn spawn_watcher(paths: &AppPaths, home_arg: Option<&Path>) -> Result<u32> {
    let exe = std::env::current_exe().map_err(|e| ClothError::Watcher(e.to_string()))?;
    fs::create_dir_all(&paths.base_dir).map_err(|e| ClothError::Watcher(e.to_string()))?;
    let log_file =
        fs::File::create(&paths.log_file).map_err(|e| ClothError::Watcher(e.to_string()))?;

    let mut command = std::process::Command::new(exe);
    if let Some(home) = home_arg {
        command.arg("--home").arg(home);
    }
    let child = command
        .args(["watch", "run"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::from(log_file))
        .spawn()
        .map_err(|e| ClothError::Watcher(e.to_string()))?;

    Ok(child.id())
}


pub fn run_watcher(paths: &AppPaths, settings: &Settings) -> Result<()> {
    let inbox = settings.inbox(paths);
    paths.ensure_dirs()?;
    fs::create_dir_all(&inbox).map_err(|e| ClothError::Watcher(e.to_string()))?;

    let pid_file = PidFile::at(&paths.pid_file);
    pid_file.claim()?;

    let conn = Connection::open(&paths.db_path)?;
    let repo = ClothRepository::new(SqliteStorage::new(conn)?);

    let running = Arc::new(AtomicBool::new(true));
    if let Err(e) = install_shutdown_handler(running.clone()) {
        warn!(error = %e, "signals will stop the watcher without cleanup");
    }

    let mut inbox_watch = Inbox::new(inbox.clone());
    let interval = Duration::from_millis(settings.watch_interval_ms.max(50));

    info!(pid = std::process::id(), inbox = %inbox.display(), "watching inbox");

    while running.load(Ordering::Relaxed) {
        if let Err(e) = inbox_watch.poll_once(&repo, paths, settings) {
            error!(error = %e, "poll failed");
        }
        thread::sleep(interval);
    }

    info!("shutting down");
    pid_file.release()
}

/// Clears `running` on SIGINT, SIGTERM or SIGHUP.
fn install_shutdown_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::Relaxed);
    })
    .map_err(|e| ClothError::Watcher(format!("could not install signal handler: {e}")))
}

/// Size and modification time of an inbox file, taken when it was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn of(meta: &fs::Metadata) -> Self {
        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        }
    }
}

/// Inbox directory scanner. A file that fails to import is reported once and
/// then skipped until its size or mtime changes, so a photo caught mid-copy
/// is picked up once the copy completes.
pub struct Inbox {
    dir: PathBuf,
    rejected: HashMap<PathBuf, FileStamp>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollReport {
    pub added: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

impl Inbox {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            rejected: HashMap::new(),
        }
    }

    fn pending(&mut self) -> Result<Vec<(PathBuf, FileStamp)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !is_photo_path(&path) {
                continue;
            }
            // Gone or unreadable since the listing; try again next poll.
            let Ok(meta) = fs::metadata(&path) else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let stamp = FileStamp::of(&meta);
            if self.rejected.get(&path) != Some(&stamp) {
                files.push((path, stamp));
            }
        }
        self.rejected.retain(|path, _| path.exists());
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    pub fn poll_once<S: ClothStorage>(
        &mut self,
        repo: &ClothRepository<S>,
        paths: &AppPaths,
        settings: &Settings,
    ) -> Result<PollReport> {
        let mut report = PollReport::default();
        for (file, stamp) in self.pending()? {
            match catalogue_photo(repo, &file, &paths.images_dir, settings.default_tags(), None) {
                Ok(outcome) => {
                    match outcome {
                        ImportOutcome::Added(ref item) => {
                            info!(id = item.id, file = %file.display(), "imported photo");
                            report.added += 1;
                        }
                        ImportOutcome::AlreadyCatalogued(ref item) => {
                            info!(id = item.id, file = %file.display(), "photo already catalogued");
                            report.duplicates += 1;
                        }
                    }
                    match fs::remove_file(&file) {
                        Ok(()) => {
                            self.rejected.remove(&file);
                        }
                        Err(e) => {
                            warn!(file = %file.display(), error = %e, "could not remove inbox file");
                            self.rejected.insert(file, stamp);
                        }
                    }
                }
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "skipping inbox file");
                    self.rejected.insert(file, stamp);
                    report.rejected += 1;
                }
            }
        }
        Ok(report)
    }
}
