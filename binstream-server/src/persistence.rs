//! Persistence of admin-created pipelines to the local config file.
//!
//! The snapshot is first written and fsynced to a sibling `<file>_buffer`
//! path, then renamed over the target, so readers never observe a torn file.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::PumpError;
use crate::registry::Pipeline;

pub fn save_pipelines(path: &Path, pipelines: &[Pipeline]) -> Result<(), PumpError> {
    let buffer = buffer_path(path);
    let payload = serde_json::to_vec(pipelines)?;

    let mut file = File::create(&buffer)?;
    file.write_all(&payload)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&buffer, path)?;
    debug!(path = %path.display(), count = pipelines.len(), "persisted pipelines");
    Ok(())
}

/// Load the persisted pipelines, forcing each one enabled. An absent,
/// empty or unparseable file yields no pipelines and no error.
pub fn load_pipelines(path: &Path) -> Vec<Pipeline> {
    let raw = match fs::read(path) {
        Ok(raw) if !raw.is_empty() => raw,
        Ok(_) => return Vec::new(),
        Err(error) => {
            info!(%error, path = %path.display(), "local pipelines file not read");
            return Vec::new();
        }
    };

    let mut pipelines: Vec<Pipeline> = match serde_json::from_slice(&raw) {
        Ok(pipelines) => pipelines,
        Err(error) => {
            info!(%error, path = %path.display(), "local pipelines file not parseable");
            return Vec::new();
        }
    };

    for pipeline in &mut pipelines {
        pipeline.enabled = true;
        pipeline.canonicalize();
    }

    info!(count = pipelines.len(), "loaded local pipeline configs");
    pipelines
}

fn buffer_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push("_buffer");
    PathBuf::from(name)
}
