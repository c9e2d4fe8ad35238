use super::{StateBackend, StoreState};
use crate::error::{CourtError, Result};
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const LOCK_TIMEOUT_SECS: u64 = 5;
const LOCK_RETRY_MS: u64 = 50;

/// JSON file store shared between CLI invocations.
///
/// Every operation takes an advisory lock on a sibling `.lock` file, so
/// concurrent processes see each update as a whole. Locking and file I/O run
/// on the blocking pool.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

struct StoreLock {
    file: std::fs::File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn io_error(context: &str, err: std::io::Error) -> CourtError {
    CourtError::Store(format!("{}: {}", context, err))
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self, exclusive: bool) -> Result<StoreLock> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_error("Failed to create store directory", e))?;
        }

        let lock_path = self.path.with_extension("lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| io_error("Failed to open store lock", e))?;

        let start = Instant::now();
        loop {
            let result = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match result {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(io_error("Failed to lock store", err));
                    }
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        return Err(CourtError::Store(format!(
                            "Timed out waiting for store lock ({}s)",
                            LOCK_TIMEOUT_SECS
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
            }
        }

        Ok(StoreLock { file })
    }

    fn load(&self) -> Result<StoreState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StoreState::default()),
            Err(err) => return Err(io_error("Failed to read store", err)),
        };
        serde_json::from_str(&content).map_err(|e| {
            CourtError::Store(format!(
                "{} is not a valid store file: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, state: &StoreState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| CourtError::Store(format!("Failed to serialize store: {}", e)))?;
        write_atomic(&self.path, &content).map_err(|e| io_error("Failed to write store", e))
    }
}

#[async_trait]
impl StateBackend for FileStore {
    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreState) -> T + Send + 'static,
    {
        let store = self.clone();
        run_blocking(move || {
            let _lock = store.lock(false)?;
            Ok(f(&store.load()?))
        })
        .await
    }

    async fn update<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreState) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        run_blocking(move || {
            let _lock = store.lock(true)?;
            let mut state = store.load()?;
            let value = f(&mut state)?;
            store.save(&state)?;
            Ok(value)
        })
        .await
    }
}

async fn run_blocking<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| CourtError::Store(format!("store task panicked: {}", e)))?
}

fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600));
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
