use crate::vfs::wildcard_match;
use crate::{Error, Result};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

/// Subset of stat information both backends can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Permission bits (`st_mode & 0o7777`).
    pub mode: u32,
    pub size: u64,
    /// Seconds since the epoch, when the backend reports it.
    pub mtime: Option<u64>,
}

/// The virtual-directory contract. A session is bound to a root; all relative
/// paths are resolved against it. Methods take `&mut self` because the remote
/// backend re-establishes its transport before every operation.
///
/// Streams returned by `open_read`/`open_write` release their resources when
/// dropped, the scoped-acquisition half of the contract.
pub trait VirtualDir {
    fn exists(&mut self, path: &str) -> bool;
    fn is_file(&mut self, path: &str) -> bool;
    fn is_dir(&mut self, path: &str) -> bool;
    fn stat(&mut self, path: &str) -> Result<FileStat>;
    fn chmod(&mut self, path: &str, mode: u32) -> Result<()>;
    /// Absolute path string as the backend sees it.
    fn get_abs(&mut self, path: &str) -> Result<String>;
    fn open_read(&mut self, path: &str) -> Result<Box<dyn Read + '_>>;
    /// Creates the file if absent.
    fn open_write(&mut self, path: &str) -> Result<Box<dyn Write + '_>>;
    /// Creates every missing component; idempotent.
    fn make_dirs(&mut self, path: &str) -> Result<()>;
    /// Removes a single file or an empty directory.
    fn remove(&mut self, path: &str) -> Result<()>;
    /// Removes a directory recursively; refuses the session root.
    fn rmtree(&mut self, path: &str) -> Result<()>;
    /// Renames within the same parent directory.
    fn rename(&mut self, path: &str, new_name: &str) -> Result<()>;
    /// Internal copy; a directory is copied as the folder itself into `outpath`.
    fn copy(&mut self, inpath: &str, outpath: &str) -> Result<()>;
    /// Ingress from a local source outside the session.
    fn copy_from(&mut self, source: &Path, path: &str) -> Result<()>;
    /// Egress to a local target outside the session.
    fn copy_to(&mut self, path: &str, target: &Path) -> Result<()>;
    /// Paths matching `pattern`, relative to the root, in walk order.
    fn glob(&mut self, pattern: &str) -> Result<Vec<String>>;
    /// Direct children of `path`.
    fn iter_dir(&mut self, path: &str) -> Result<Vec<String>>;
    /// Runs `cmnd` with working directory `path`, streaming output to the
    /// logger. Returns whether the command succeeded; with `raise_on_error`
    /// a non-zero exit becomes [`Error::ExecFailed`].
    fn exec_cmnd(
        &mut self,
        cmnd: &str,
        path: &str,
        raise_on_error: bool,
        timeout: Option<Duration>,
    ) -> Result<bool>;

    fn read_bytes(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_read(path)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn read_string(&mut self, path: &str) -> Result<String> {
        let mut buf = String::new();
        self.open_read(path)?.read_to_string(&mut buf)?;
        Ok(buf)
    }

    fn write_bytes(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        self.open_write(path)?.write_all(contents)?;
        Ok(())
    }
}

/// Destructive command lines that are never passed to a shell.
static SECURITY_RISKS: &[&str] = &[
    "rm -rf / ",
    "rm -rf /;",
    ":(){:|:&};:",
    " > /dev/sda",
    " > /dev/hda",
    "mv * /dev/null",
    "mkfs.ext3 /dev/sda",
    "mkfs.ext3 /dev/hda",
    "dd if=/dev/random of=/dev/sda",
    "dd if=/dev/zero of=/dev/hda",
    "dd if=/dev/zero of=/dev/sda",
    "mv / /dev/null",
    "dd if=/dev/random of=/dev/port",
    "echo 1 > /proc/sys/kernel/panic",
    "cat /dev/port",
    "cat /dev/zero > /dev/mem",
    "wget * -O- | sh",
    "rm -f /usr/bin/sudo",
    "rm -f /bin/su",
];

/// Prefilter run before any command is handed to a shell, local or remote.
/// Returns the matched risk for the caller to report.
pub fn check_cmndline_security(line: &str) -> Option<&'static str> {
    SECURITY_RISKS
        .iter()
        .find(|risk| wildcard_match(line, &format!("*{risk}*")))
        .copied()
}

/// Shared outcome handling for a denied command line.
pub(crate) fn reject_cmndline(risk: &str, raise_on_error: bool) -> Result<bool> {
    if raise_on_error {
        return Err(Error::SecurityRejected(risk.to_string()));
    }
    log::error!("command line contains security risk: {risk}");
    Ok(false)
}

/// Shared outcome handling for a non-zero exit code.
pub(crate) fn handle_exit_code(cmnd: &str, code: i32, raise_on_error: bool) -> Result<bool> {
    if code == 0 {
        return Ok(true);
    }
    let err = Error::ExecFailed {
        cmnd: cmnd.to_string(),
        code,
    };
    log::error!("{err}");
    if raise_on_error {
        return Err(err);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_filter_catches_known_risks() {
        assert!(check_cmndline_security("rm -rf / ").is_some());
        assert!(check_cmndline_security("echo hi && rm -rf /; true").is_some());
        assert!(check_cmndline_security("wget http://x -O- | sh").is_some());
        assert!(check_cmndline_security("echo hello > out.txt").is_none());
        assert!(check_cmndline_security("rm -rf ./scratch").is_none());
    }

    #[test]
    fn rejection_raises_or_returns_false() {
        assert!(matches!(
            reject_cmndline("rm -rf / ", true),
            Err(Error::SecurityRejected(_))
        ));
        assert_eq!(reject_cmndline("rm -rf / ", false).unwrap(), false);
    }
}
