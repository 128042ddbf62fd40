use std::{env, path::Path};

use log::{debug, info};
use tokio::signal;

use tower_utils::{
    checkpoint::{CheckpointLoader, Result, SafetensorsSaver, VarStore},
    config::WatchConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::var("CONFIG") {
        Ok(path) => WatchConfig::from_json(Path::new(&path))?,
        Err(_) => WatchConfig::from_env()?,
    };

    info!(
        "watching {} for checkpoints every {}s",
        config.logdir.display(),
        config.poll_secs
    );

    let mut loader = config.loader(SafetensorsSaver::default());
    let mut session = VarStore::new();
    let key = config.var_key.as_deref().unwrap_or("");

    tokio::select! {
        ret = watch(&mut loader, &mut session, key) => ret?,
        _ = signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
    }

    Ok(())
}

/// Follows the training run, restoring every new checkpoint as it shows up.
async fn watch(
    loader: &mut CheckpointLoader<SafetensorsSaver>,
    session: &mut VarStore,
    key: &str,
) -> Result<()> {
    loop {
        let step = loader.load_checkpoint(session).await?;
        let vars = session.trainable_variables(key)?;

        let params: usize = vars.iter().map(|(_, value)| value.len()).sum();
        info!(step = step, vars = vars.len(), params = params; "restored checkpoint");

        for (name, value) in vars {
            debug!("{name}: {:?}", value.shape());
        }
    }
}
