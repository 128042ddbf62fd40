use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info};
use tokio::{task, time};

use super::{CheckpointState, Result, Saver, Session};

/// How long `CheckpointLoader` waits between polls by default.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Restores the latest checkpoint into `session`.
///
/// # Arguments
/// * `saver` - The saver that reads the checkpoint files.
/// * `session` - The session to restore into.
/// * `logdir` - The log directory holding the checkpoint state file.
/// * `ckptpath` - An explicit checkpoint to restore instead of the latest one.
///
/// # Returns
/// `true` if a checkpoint was restored, `false` if there is none yet, or a `CkptErr`
/// if restoring failed.
pub fn load_from_checkpoint<S, Sv>(
    saver: &Sv,
    session: &mut S,
    logdir: &Path,
    ckptpath: Option<&Path>,
) -> Result<bool>
where
    Sv: Saver<S>,
{
    if let Some(path) = ckptpath {
        saver.restore(session, path)?;
        return Ok(true);
    }

    let Some(state) = CheckpointState::read(logdir)? else {
        return Ok(false);
    };

    saver.restore(session, &state.model_path(logdir))?;
    Ok(true)
}

/// Blocks until a checkpoint newer than the last one it loaded shows up.
///
/// Used by processes running alongside the trainers, such as evaluators, that
/// have to follow the training progress one checkpoint at a time.
#[derive(Debug)]
pub struct CheckpointLoader<Sv> {
    saver: Sv,
    logdir: PathBuf,
    ckptpath: Option<PathBuf>,
    poll_interval: Duration,
    last_global_step: u64,
}

impl<Sv> CheckpointLoader<Sv> {
    /// Creates a new `CheckpointLoader`.
    ///
    /// # Arguments
    /// * `saver` - The saver that reads the checkpoint files.
    /// * `logdir` - The log directory holding the checkpoint state file.
    /// * `ckptpath` - An explicit checkpoint to restore instead of the latest one.
    pub fn new(saver: Sv, logdir: impl Into<PathBuf>, ckptpath: Option<PathBuf>) -> Self {
        Self {
            saver,
            logdir: logdir.into(),
            ckptpath,
            poll_interval: DEFAULT_POLL_INTERVAL,
            last_global_step: 0,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Resumes from a known step, the next load will only accept a newer one.
    pub fn with_last_global_step(mut self, step: u64) -> Self {
        self.last_global_step = step;
        self
    }

    pub fn last_global_step(&self) -> u64 {
        self.last_global_step
    }

    pub fn logdir(&self) -> &Path {
        &self.logdir
    }

    /// Restores the next checkpoint into `session`, waiting for it if needed.
    ///
    /// A missing checkpoint, or one that isn't newer than the last loaded step, is
    /// retried after the poll interval for as long as it takes.
    ///
    /// Reading the checkpoint is blocking file io, it runs on the current worker
    /// through `task::block_in_place`, so this must be awaited on a multi thread runtime.
    ///
    /// # Arguments
    /// * `session` - The session to restore into.
    ///
    /// # Returns
    /// The global step of the loaded checkpoint, or the first non recoverable `CkptErr`.
    pub async fn load_checkpoint<S>(&mut self, session: &mut S) -> Result<u64>
    where
        S: Session,
        Sv: Saver<S>,
    {
        loop {
            let ckptpath = self.ckptpath.as_deref();
            let loaded = task::block_in_place(|| {
                load_from_checkpoint(&self.saver, &mut *session, &self.logdir, ckptpath)
            })?;

            if loaded {
                let step = session.global_step();

                if step > self.last_global_step {
                    info!(step = step; "successfully loaded model");
                    self.last_global_step = step;
                    return Ok(step);
                }

                info!(step = step, last = self.last_global_step; "waiting for a new checkpoint");
            } else {
                info!("no checkpoint found in {}, waiting", self.logdir.display());
            }

            debug!("sleeping for {:?}", self.poll_interval);
            time::sleep(self.poll_interval).await;
        }
    }
}
