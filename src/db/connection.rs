use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

/// How long SQLite waits on a locked database before reporting SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// The worker thread runs until every task sender is gone.
struct Worker {
    tasks: Mutex<Option<mpsc::Sender<DbTask>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn sender(&self) -> Option<mpsc::Sender<DbTask>> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if let Err(err) = thread.join() {
                error!("Activity database thread panicked: {err:?}");
            }
        }
    }
}

/// Handle to the activity database, owned by a dedicated worker thread.
///
/// Statements run on that thread in submission order; callers await the reply
/// over a oneshot channel.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
}

impl Database {
    /// Opens (creating if needed) and migrates the database at `db_path`.
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let (task_tx, task_rx) = mpsc::channel::<DbTask>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name("lefocus-tracker-db".into())
            .spawn(move || {
                let mut conn = match open_activity_db(&db_path) {
                    Ok(conn) => {
                        info!("Activity database ready at {}", db_path.display());
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                for task in task_rx {
                    task(&mut conn);
                }
                info!("Activity database thread shutting down");
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        Ok(Self {
            worker: Arc::new(Worker {
                tasks: Mutex::new(Some(task_tx)),
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self
            .worker
            .sender()
            .ok_or_else(|| anyhow!("activity database is closed"))?;
        let (reply_tx, reply_rx) = oneshot::channel();

        sender
            .send(Box::new(move |conn| {
                // The caller may have given up waiting.
                let _ = reply_tx.send(task(conn));
            }))
            .map_err(|_| anyhow!("activity database thread has stopped"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("activity database thread dropped the request"))?
    }
}

/// Creates the parent directory, opens the connection in WAL mode with a short
/// busy timeout, and brings the schema up to date.
fn open_activity_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create database directory {}", parent.display())
        })?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open activity database {}", path.display()))?;

    // Some filesystems refuse WAL; the default journal still works.
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("WAL journal unavailable for {}: {err}", path.display());
    }
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to configure busy timeout")?;

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}
