use std::{
    fs, io,
    path::{Path, PathBuf},
};

use super::Result;

/// Name of the file that tracks the checkpoints inside a log directory.
pub const STATE_FILENAME: &str = "checkpoint";

/// The checkpoints recorded in a log directory, newest last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointState {
    pub model_checkpoint_path: String,
    pub all_model_checkpoint_paths: Vec<String>,
}

impl CheckpointState {
    /// Creates a new `CheckpointState` whose only checkpoint is `path`.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();

        Self {
            all_model_checkpoint_paths: vec![path.clone()],
            model_checkpoint_path: path,
        }
    }

    /// Reads the state file of a log directory.
    ///
    /// # Arguments
    /// * `logdir` - The log directory the checkpoints are written to.
    ///
    /// # Returns
    /// The state, `None` if there is no state file or it names no checkpoint, or an
    /// io error if the file couldn't be read.
    pub fn read(logdir: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(logdir.join(STATE_FILENAME)) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the state file into a log directory, replacing the previous one.
    ///
    /// The file is written aside and renamed so readers never see half of it.
    pub fn write(&self, logdir: &Path) -> Result<()> {
        let tmp = logdir.join(format!("{STATE_FILENAME}.tmp"));
        fs::write(&tmp, self.to_text())?;
        fs::rename(tmp, logdir.join(STATE_FILENAME))?;
        Ok(())
    }

    /// Resolves the latest checkpoint's path.
    ///
    /// # Arguments
    /// * `logdir` - The log directory the state was read from.
    ///
    /// # Returns
    /// The path as is if it's absolute, otherwise joined onto `logdir`.
    pub fn model_path(&self, logdir: &Path) -> PathBuf {
        let path = Path::new(&self.model_checkpoint_path);

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            logdir.join(path)
        }
    }

    /// Records `path` as the latest checkpoint.
    pub fn push(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.all_model_checkpoint_paths.retain(|p| *p != path);
        self.all_model_checkpoint_paths.push(path.clone());
        self.model_checkpoint_path = path;
    }

    fn parse(content: &str) -> Option<Self> {
        let mut model_checkpoint_path = None;
        let mut all_model_checkpoint_paths = Vec::new();

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };

            let value = unquote(value.trim()).to_string();
            match key.trim() {
                "model_checkpoint_path" => model_checkpoint_path = Some(value),
                "all_model_checkpoint_paths" => all_model_checkpoint_paths.push(value),
                _ => {}
            }
        }

        let model_checkpoint_path = model_checkpoint_path.filter(|path| !path.is_empty())?;

        Some(Self {
            model_checkpoint_path,
            all_model_checkpoint_paths,
        })
    }

    fn to_text(&self) -> String {
        let mut out = format!("model_checkpoint_path: \"{}\"\n", self.model_checkpoint_path);

        for path in &self.all_model_checkpoint_paths {
            out.push_str(&format!("all_model_checkpoint_paths: \"{path}\"\n"));
        }

        out
    }
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|&q| value.strip_prefix(q)?.strip_suffix(q))
        .unwrap_or(value)
}
