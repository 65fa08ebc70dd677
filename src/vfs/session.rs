use crate::types::Remote;
use crate::vfs::{LocalDir, RemoteDir, VirtualDir};
use crate::Result;
use log::debug;
use std::path::{Path, PathBuf};

/// Opens a scoped virtual directory: remote when the connection record
/// carries a hostname, local otherwise. Relative local paths resolve against
/// `base`. The returned backend owns its transport; dropping it tears the
/// SSH session down, also on abnormal exit.
pub fn open_dir(
    path: &str,
    remote: Option<&Remote>,
    base: &Path,
) -> Result<Box<dyn VirtualDir>> {
    match remote {
        Some(record) if record.is_remote() => {
            debug!("entering remote path: {path}");
            Ok(Box::new(RemoteDir::open(record, path)?))
        }
        _ => {
            debug!("entering local path: {path}");
            let full = if Path::new(path).is_absolute() {
                PathBuf::from(path)
            } else {
                base.join(path)
            };
            Ok(Box::new(LocalDir::open(&full)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_tmp_dir;

    #[test]
    fn null_hostname_means_local() {
        let tmp = new_tmp_dir!();
        let remote = Remote::default();
        let mut dir = open_dir("input", Some(&remote), tmp.dir()).unwrap();
        assert!(dir.is_dir(""));
        assert!(tmp.join("input").is_dir());
    }

    #[test]
    fn two_sessions_are_independent() {
        let tmp = new_tmp_dir!();
        let mut first = open_dir("a", None, tmp.dir()).unwrap();
        let mut second = open_dir("b", None, tmp.dir()).unwrap();
        first.write_bytes("x.txt", b"1").unwrap();
        assert!(!second.exists("x.txt"));
    }
}
