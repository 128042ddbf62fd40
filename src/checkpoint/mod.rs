mod error;
mod loader;
mod saver;
mod session;
mod state;

pub use error::{CkptErr, Result};
pub use loader::{CheckpointLoader, DEFAULT_POLL_INTERVAL, load_from_checkpoint};
pub use saver::{SafetensorsSaver, Saver};
pub use session::{Session, VarStore, Variable};
pub use state::{CheckpointState, STATE_FILENAME};
