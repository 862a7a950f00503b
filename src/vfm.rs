//! Video frame manager (VFM) topology control.
//!
//! The VFM map decides where decoded frames are routed. The pump needs the
//! decoder's output wired to the ionvideo sink instead of the regular
//! display chain, which is done by writing textual directives into a sysfs
//! node. The directives are opaque to this crate; applying them is just a
//! side-effecting write.

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default sysfs node controlling the VFM map.
pub const VFM_MAP_PATH: &str = "/sys/class/vfm/map";

#[derive(Debug, Error)]
#[error("applying VFM directive '{directive}' to {path} failed: {source}")]
pub struct VfmError {
    directive: String,
    path: PathBuf,
    source: io::Error,
}

/// Handle on the VFM map sysfs node.
pub struct VfmMap {
    path: PathBuf,
}

impl VfmMap {
    pub fn new() -> Self {
        Self::at_path(Path::new(VFM_MAP_PATH))
    }

    /// Uses an alternate node path. Mostly useful for tests.
    pub fn at_path(path: &Path) -> Self {
        VfmMap {
            path: path.to_path_buf(),
        }
    }

    /// Applies a single textual directive to the map.
    pub fn apply(&self, directive: &str) -> Result<(), VfmError> {
        let to_error = |source| VfmError {
            directive: directive.to_string(),
            path: self.path.clone(),
            source,
        };

        let mut node = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(to_error)?;
        node.write_all(directive.as_bytes()).map_err(to_error)?;

        Ok(())
    }

    /// Routes the default decoder path into the ionvideo sink.
    pub fn route_to_ionvideo(&self) -> Result<(), VfmError> {
        self.apply("rm default")?;
        self.apply("add default decoder ionvideo")
    }

    /// Restores the regular display chain.
    pub fn restore_default(&self) -> Result<(), VfmError> {
        self.apply("rm default")?;
        self.apply("add default decoder ppmgr deinterlace amvideo")
    }
}

impl Default for VfmMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct TempNode(PathBuf);

    impl TempNode {
        fn create(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!("ionpump-vfm-{}-{}", name, std::process::id()));
            fs::write(&path, "").unwrap();
            TempNode(path)
        }
    }

    impl Drop for TempNode {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
        }
    }

    #[test]
    fn directives_are_written_to_the_node() {
        let node = TempNode::create("apply");
        let map = VfmMap::at_path(&node.0);

        map.apply("rm default").unwrap();
        assert_eq!(fs::read_to_string(&node.0).unwrap(), "rm default");

        // Each directive is a fresh write, as sysfs expects.
        map.route_to_ionvideo().unwrap();
        assert_eq!(
            fs::read_to_string(&node.0).unwrap(),
            "add default decoder ionvideo"
        );
    }

    #[test]
    fn missing_node_is_reported_with_the_directive() {
        let map = VfmMap::at_path(Path::new("/nonexistent/vfm/map"));
        let err = map.apply("rm default").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("rm default"));
        assert!(message.contains("/nonexistent/vfm/map"));
    }
}
