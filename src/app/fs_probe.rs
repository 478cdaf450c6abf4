use std::fs;
use std::io;

/// Filesystem-existence capability. Classification and parsing only ever ask
/// "is there an entry at this path"; injecting the probe keeps them testable
/// against a plain path set.
pub trait FsProbe: Send + Sync {
    fn exists(&self, path: &str) -> bool;
}

/// Probe backed by the real filesystem. An inaccessible path (permissions,
/// transient I/O) reads as absent; the batch never aborts on a probe failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFsProbe;

impl FsProbe for RealFsProbe {
    fn exists(&self, path: &str) -> bool {
        if path.trim().is_empty() {
            return false;
        }
        match fs::metadata(path) {
            Ok(_) => true,
            Err(error) => {
                if error.kind() != io::ErrorKind::NotFound {
                    tracing::debug!(
                        event = "fs_probe_inaccessible",
                        path,
                        error = error.to_string()
                    );
                }
                false
            }
        }
    }
}
