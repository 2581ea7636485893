//! Job state files for `voxreel status` and other outside observers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::orchestrator::SnapshotSink;
use crate::state_machine::JobSnapshot;

pub const STATE_FILE: &str = "state.json";

/// Writes each snapshot to `<work_root>/job_<id>/state.json`, replacing the
/// previous one atomically.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    work_root: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(work_root: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
        }
    }

    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.work_root.join(format!("job_{job_id}")).join(STATE_FILE)
    }
}

impl SnapshotSink for JsonSnapshotStore {
    fn persist(&self, snapshot: &JobSnapshot) -> io::Result<()> {
        let path = self.path_for(&snapshot.job_id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        fs::rename(&tmp, &path)
    }
}

/// Reads the snapshot of a job, given its directory or its state file.
pub fn load(path: &Path) -> io::Result<JobSnapshot> {
    let file = if path.is_dir() { path.join(STATE_FILE) } else { path.to_path_buf() };
    let bytes = fs::read(&file)?;
    Ok(serde_json::from_slice(&bytes)?)
}
