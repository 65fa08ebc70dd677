use crate::exec_log;
use crate::vfs::{
    check_cmndline_security, glob_walk, handle_exit_code, join_rel, reject_cmndline, Entry,
    FileStat, VirtualDir,
};
use crate::{Error, Result};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Virtual directory over the host filesystem, rooted at an absolute path.
pub struct LocalDir {
    root: PathBuf,
}

impl LocalDir {
    /// Opens the root, creating it if missing. Errors when it is not a directory.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.exists() {
            fs::create_dir_all(root)?;
        }
        if !root.is_dir() {
            return Err(Error::Invalid(format!(
                "the path is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full(&self, path: &str) -> PathBuf {
        if path.is_empty() || path == "." {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }

    fn copy_into(&self, source: &Path, dir: &Path) -> Result<()> {
        let name = source
            .file_name()
            .ok_or_else(|| Error::Invalid(format!("source has no basename: {source:?}")))?;
        let target = dir.join(name);
        if source.is_file() {
            fs::copy(source, &target)?;
        } else if source.is_dir() {
            copy_tree(source, &target)?;
        } else {
            return Err(Error::NotFound(source.display().to_string()));
        }
        Ok(())
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(target_family = "unix")]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(target_family = "unix"))]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(target_family = "unix")]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(target_family = "unix"))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

impl VirtualDir for LocalDir {
    fn exists(&mut self, path: &str) -> bool {
        self.full(path).exists()
    }

    fn is_file(&mut self, path: &str) -> bool {
        self.full(path).is_file()
    }

    fn is_dir(&mut self, path: &str) -> bool {
        self.full(path).is_dir()
    }

    fn stat(&mut self, path: &str) -> Result<FileStat> {
        let metadata = fs::metadata(self.full(path)).map_err(|e| Error::from_io(e, path))?;
        Ok(FileStat {
            mode: mode_of(&metadata),
            size: metadata.len(),
            mtime: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
        })
    }

    fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
        if !self.exists(path) {
            return Err(Error::NotFound(path.to_string()));
        }
        set_mode(&self.full(path), mode).map_err(|e| Error::from_io(e, path))
    }

    fn get_abs(&mut self, path: &str) -> Result<String> {
        Ok(self.full(path).to_string_lossy().into_owned())
    }

    fn open_read(&mut self, path: &str) -> Result<Box<dyn Read + '_>> {
        let file = File::open(self.full(path)).map_err(|e| Error::from_io(e, path))?;
        Ok(Box::new(file))
    }

    fn open_write(&mut self, path: &str) -> Result<Box<dyn Write + '_>> {
        let file = File::create(self.full(path)).map_err(|e| Error::from_io(e, path))?;
        Ok(Box::new(file))
    }

    fn make_dirs(&mut self, path: &str) -> Result<()> {
        debug!("making directories: {path}");
        fs::create_dir_all(self.full(path)).map_err(|e| Error::from_io(e, path))
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        debug!("removing path: {path}");
        let full = self.full(path);
        if full.is_file() {
            fs::remove_file(&full).map_err(|e| Error::from_io(e, path))
        } else if full.is_dir() {
            if fs::read_dir(&full)?.next().is_some() {
                return Err(Error::NonEmpty(path.to_string()));
            }
            fs::remove_dir(&full).map_err(|e| Error::from_io(e, path))
        } else {
            Err(Error::NotFound(path.to_string()))
        }
    }

    fn rmtree(&mut self, path: &str) -> Result<()> {
        debug!("removing directories: {path}");
        if crate::vfs::split_components(path).is_empty() {
            return Err(Error::Invalid(
                "attempting to remove the root directory".into(),
            ));
        }
        let full = self.full(path);
        if !full.exists() {
            return Err(Error::NotFound(path.to_string()));
        }
        if !full.is_dir() {
            return Err(Error::Invalid(format!("not a directory: {path}")));
        }
        fs::remove_dir_all(&full).map_err(|e| Error::from_io(e, path))
    }

    fn rename(&mut self, path: &str, new_name: &str) -> Result<()> {
        debug!("renaming path: {path} to {new_name}");
        let full = self.full(path);
        if !full.exists() {
            return Err(Error::NotFound(path.to_string()));
        }
        let parent = full
            .parent()
            .ok_or_else(|| Error::Invalid(format!("path has no parent: {path}")))?;
        fs::rename(&full, parent.join(new_name)).map_err(|e| Error::from_io(e, path))
    }

    fn copy(&mut self, inpath: &str, outpath: &str) -> Result<()> {
        debug!("internally copying {inpath} to {outpath}");
        let src = self.full(inpath);
        let dst = self.full(outpath);
        if !src.exists() {
            return Err(Error::NotFound(inpath.to_string()));
        }
        if !dst.exists() {
            return Err(Error::NotFound(outpath.to_string()));
        }
        self.copy_into(&src, &dst)
    }

    fn copy_from(&mut self, source: &Path, path: &str) -> Result<()> {
        debug!("copying external source {source:?} to {path}");
        let dir = self.full(path);
        if !dir.exists() {
            return Err(Error::NotFound(path.to_string()));
        }
        if !source.exists() {
            return Err(Error::NotFound(source.display().to_string()));
        }
        self.copy_into(source, &dir)
    }

    fn copy_to(&mut self, path: &str, target: &Path) -> Result<()> {
        debug!("copying {path} to external target {target:?}");
        let src = self.full(path);
        if !src.exists() {
            return Err(Error::NotFound(path.to_string()));
        }
        if !target.is_dir() {
            return Err(Error::NotFound(target.display().to_string()));
        }
        self.copy_into(&src, target)
    }

    fn glob(&mut self, pattern: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let mut lister = |dir: &str| -> Result<Vec<Entry>> {
            let full = if dir.is_empty() {
                root.clone()
            } else {
                root.join(dir)
            };
            let mut entries = Vec::new();
            for entry in fs::read_dir(&full)? {
                let entry = entry?;
                entries.push(Entry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    is_dir: entry.file_type()?.is_dir(),
                });
            }
            Ok(entries)
        };
        glob_walk(pattern, &mut lister)
    }

    fn iter_dir(&mut self, path: &str) -> Result<Vec<String>> {
        self.glob(&join_rel(path, "*"))
    }

    fn exec_cmnd(
        &mut self,
        cmnd: &str,
        path: &str,
        raise_on_error: bool,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        if let Some(risk) = check_cmndline_security(cmnd) {
            return reject_cmndline(risk, raise_on_error);
        }
        let cwd = self.full(path);
        if !cwd.is_dir() {
            return Err(Error::NotFound(path.to_string()));
        }
        exec_log!("executing command in {path}: {cmnd}");

        let (shell, flag) = if cfg!(target_family = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };
        let mut child = Command::new(shell)
            .arg(flag)
            .arg(cmnd)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().expect("stdout is piped");
        let stderr = child.stderr.take().expect("stderr is piped");
        let (tx, rx) = bounded::<StreamLine>(256);
        let tx_err = tx.clone();
        let out_drain = thread::spawn(move || drain_pipe(stdout, StreamKind::Out, tx));
        let err_drain = thread::spawn(move || drain_pipe(stderr, StreamKind::Err, tx_err));

        // the single consumer keeps lines in per-stream order; the drains end
        // with one sentinel each
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut timed_out = false;
        let mut eofs = 0;
        while eofs < 2 {
            if let Some(deadline) = deadline {
                if !timed_out && Instant::now() >= deadline {
                    child.kill().ok();
                    timed_out = true;
                }
            }
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(StreamLine::Line(StreamKind::Out, line)) => info!("{line}"),
                Ok(StreamLine::Line(StreamKind::Err, line)) => warn!("{line}"),
                Ok(StreamLine::Eof) => eofs += 1,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        out_drain.join().ok();
        err_drain.join().ok();

        let status = child.wait()?;
        if timed_out {
            let err = Error::ExecTimeout {
                cmnd: cmnd.to_string(),
                timeout: timeout.map(|t| t.as_secs()).unwrap_or_default(),
            };
            log::error!("{err}");
            if raise_on_error {
                return Err(err);
            }
            return Ok(false);
        }
        let ok = handle_exit_code(cmnd, status.code().unwrap_or(-1), raise_on_error)?;
        if ok {
            debug!("successfully executed command in {path}: {cmnd}");
        }
        Ok(ok)
    }
}

#[derive(Clone, Copy)]
enum StreamKind {
    Out,
    Err,
}

enum StreamLine {
    Line(StreamKind, String),
    Eof,
}

fn drain_pipe(pipe: impl Read, kind: StreamKind, tx: Sender<StreamLine>) {
    let reader = BufReader::new(pipe);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if tx.send(StreamLine::Line(kind, line)).is_err() {
            return;
        }
    }
    tx.send(StreamLine::Eof).ok();
}
