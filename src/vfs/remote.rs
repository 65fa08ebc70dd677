use crate::exec_log;
use crate::types::Remote;
use crate::vfs::{
    check_cmndline_security, glob_walk, handle_exit_code, join_rel, reject_cmndline, Entry,
    FileStat, VirtualDir,
};
use crate::{Error, Result};
use log::{debug, info, warn};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Virtual directory over one SSH transport and one SFTP channel, rooted at a
/// remote directory (created if absent).
///
/// Every public operation passes through [`RemoteDir::ensure_connected`]: if
/// the transport dropped (idle timeout, server restart) it reconnects once,
/// reopens SFTP and re-resolves the root before proceeding.
pub struct RemoteDir {
    host: String,
    port: u16,
    timeout: Option<Duration>,
    auth: RemoteAuth,
    root: String,
    sess: ssh2::Session,
    sftp: ssh2::Sftp,
}

#[derive(Debug, Clone)]
enum RemoteAuth {
    Password { username: String, password: String },
    KeyMemory { username: String, pkey: String },
    KeyFile { username: String, key_filename: PathBuf },
}

impl RemoteAuth {
    fn from_record(remote: &Remote, host: &str) -> Result<Self> {
        let username = remote.username.clone().ok_or_else(|| {
            Error::ConfigInvalid(format!("remote {host} requires a username"))
        })?;
        if let Some(password) = &remote.password {
            Ok(RemoteAuth::Password {
                username,
                password: password.clone(),
            })
        } else if let Some(pkey) = &remote.pkey {
            Ok(RemoteAuth::KeyMemory {
                username,
                pkey: pkey.clone(),
            })
        } else if let Some(key_filename) = &remote.key_filename {
            Ok(RemoteAuth::KeyFile {
                username,
                key_filename: PathBuf::from(key_filename),
            })
        } else {
            Err(Error::ConfigInvalid(format!(
                "remote {host} has neither a password nor a private key"
            )))
        }
    }
}

fn connect(
    host: &str,
    port: u16,
    timeout: Option<Duration>,
    auth: &RemoteAuth,
) -> Result<(ssh2::Session, ssh2::Sftp)> {
    let addr = format!("{host}:{port}");
    let tcp = match timeout {
        Some(t) => {
            let sockaddr = addr
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| Error::Invalid(format!("cannot resolve {addr}")))?;
            TcpStream::connect_timeout(&sockaddr, t)?
        }
        None => TcpStream::connect(&addr)?,
    };
    let mut sess = ssh2::Session::new()?;
    sess.set_tcp_stream(tcp);
    sess.handshake()?;
    match auth {
        RemoteAuth::Password { username, password } => {
            sess.userauth_password(username, password)?
        }
        RemoteAuth::KeyMemory { username, pkey } => {
            sess.userauth_pubkey_memory(username, None, pkey, None)?
        }
        RemoteAuth::KeyFile {
            username,
            key_filename,
        } => sess.userauth_pubkey_file(username, None, key_filename, None)?,
    }
    if !sess.authenticated() {
        return Err(Error::Invalid(format!("authentication rejected by {host}")));
    }
    if let Some(t) = timeout {
        sess.set_timeout(t.as_millis() as u32);
    }
    // lets the reconnection guard probe the transport cheaply
    sess.set_keepalive(true, 30);
    let sftp = sess.sftp()?;
    Ok((sess, sftp))
}

impl RemoteDir {
    /// Connects, authenticates and binds the session to `path` on the remote
    /// host, creating the directory when missing.
    pub fn open(remote: &Remote, path: &str) -> Result<Self> {
        let host = remote
            .hostname
            .clone()
            .ok_or_else(|| Error::ConfigInvalid("remote record has no hostname".into()))?;
        let auth = RemoteAuth::from_record(remote, &host)?;
        let timeout = remote.timeout.map(Duration::from_secs);
        let (sess, sftp) =
            connect(&host, remote.port, timeout, &auth).map_err(|e| Error::ConnectFailed {
                host: host.clone(),
                reason: e.to_string(),
            })?;
        let mut dir = Self {
            host,
            port: remote.port,
            timeout,
            auth,
            root: normalize_root(path),
            sess,
            sftp,
        };
        dir.ensure_root()?;
        Ok(dir)
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if self.sess.authenticated() && self.sess.keepalive_send().is_ok() {
            return Ok(());
        }
        debug!("renewing connection to remote host {}", self.host);
        let (sess, sftp) =
            connect(&self.host, self.port, self.timeout, &self.auth).map_err(|e| {
                Error::ConnectFailed {
                    host: self.host.clone(),
                    reason: e.to_string(),
                }
            })?;
        self.sess = sess;
        self.sftp = sftp;
        self.ensure_root()
    }

    fn ensure_root(&mut self) -> Result<()> {
        let root = self.root.clone();
        self.mkdirs_raw(&root)?;
        // resolve symlinks and a home-relative root to an absolute path once
        self.root = self
            .sftp
            .realpath(Path::new(&root))?
            .to_string_lossy()
            .into_owned();
        Ok(())
    }

    fn full(&self, path: &str) -> String {
        if path.is_empty() || path == "." {
            self.root.clone()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.root, path)
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        PathBuf::from(self.full(path))
    }

    /// mkdir -p over SFTP; `path` may be absolute or root-relative.
    fn mkdirs_raw(&mut self, path: &str) -> Result<()> {
        let mut current = if path.starts_with('/') {
            "/".to_string()
        } else {
            String::new()
        };
        for part in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            if !current.is_empty() && current != "/" {
                current.push('/');
            }
            current.push_str(part);
            if self.sftp.stat(Path::new(&current)).is_err() {
                debug!("making sub-directory: {current}");
                self.sftp.mkdir(Path::new(&current), 0o775)?;
            }
        }
        Ok(())
    }

    fn stat_raw(&mut self, path: &str) -> Result<ssh2::FileStat> {
        self.sftp
            .stat(&self.full_path(path))
            .map_err(|_| Error::NotFound(path.to_string()))
    }

    fn copy_from_inner(&mut self, source: &Path, path: &str) -> Result<()> {
        if source.is_file() {
            let mut local = std::fs::File::open(source)?;
            let name = source
                .file_name()
                .ok_or_else(|| Error::Invalid(format!("source has no basename: {source:?}")))?;
            let dest = self.full_path(&join_rel(path, &name.to_string_lossy()));
            let mut remote = self.sftp.create(&dest)?;
            std::io::copy(&mut local, &mut remote)?;
        } else if source.is_dir() {
            let name = source
                .file_name()
                .ok_or_else(|| Error::Invalid(format!("source has no basename: {source:?}")))?
                .to_string_lossy()
                .into_owned();
            let subpath = join_rel(path, &name);
            self.mkdirs_raw(&subpath)?;
            for entry in std::fs::read_dir(source)? {
                self.copy_from_inner(&entry?.path(), &subpath)?;
            }
        } else {
            return Err(Error::NotFound(source.display().to_string()));
        }
        Ok(())
    }

    fn copy_to_inner(&mut self, path: &str, target: &Path) -> Result<()> {
        let name = if path.is_empty() || path == "." {
            crate::vfs::basename(&self.root).to_string()
        } else {
            crate::vfs::basename(path).to_string()
        };
        let target_child = target.join(name);
        if self.is_file(path) {
            let mut remote = self.sftp.open(&self.full_path(path))?;
            let mut local = std::fs::File::create(&target_child)?;
            std::io::copy(&mut remote, &mut local)?;
        } else {
            std::fs::create_dir_all(&target_child)?;
            for child in self.iter_dir(path)? {
                self.copy_to_inner(&child, &target_child)?;
            }
        }
        Ok(())
    }
}

fn normalize_root(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        ".".to_string()
    } else {
        trimmed.to_string()
    }
}

impl VirtualDir for RemoteDir {
    fn exists(&mut self, path: &str) -> bool {
        if self.ensure_connected().is_err() {
            return false;
        }
        self.sftp.stat(&self.full_path(path)).is_ok()
    }

    fn is_file(&mut self, path: &str) -> bool {
        if self.ensure_connected().is_err() {
            return false;
        }
        self.stat_raw(path).map(|st| st.is_file()).unwrap_or(false)
    }

    fn is_dir(&mut self, path: &str) -> bool {
        if self.ensure_connected().is_err() {
            return false;
        }
        self.stat_raw(path).map(|st| st.is_dir()).unwrap_or(false)
    }

    fn stat(&mut self, path: &str) -> Result<FileStat> {
        self.ensure_connected()?;
        let st = self.stat_raw(path)?;
        Ok(FileStat {
            mode: st.perm.unwrap_or(0) & 0o7777,
            size: st.size.unwrap_or(0),
            mtime: st.mtime,
        })
    }

    fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
        self.ensure_connected()?;
        self.stat_raw(path)?;
        let stat = ssh2::FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: Some(mode),
            atime: None,
            mtime: None,
        };
        self.sftp
            .setstat(&self.full_path(path), stat)
            .map_err(|e| Error::Ssh(e))
    }

    fn get_abs(&mut self, path: &str) -> Result<String> {
        self.ensure_connected()?;
        Ok(self.full(path))
    }

    fn open_read(&mut self, path: &str) -> Result<Box<dyn Read + '_>> {
        self.ensure_connected()?;
        debug!("opening {path} for reading");
        let file = self
            .sftp
            .open(&self.full_path(path))
            .map_err(|_| Error::NotFound(path.to_string()))?;
        Ok(Box::new(file))
    }

    fn open_write(&mut self, path: &str) -> Result<Box<dyn Write + '_>> {
        self.ensure_connected()?;
        debug!("opening {path} for writing");
        let file = self.sftp.create(&self.full_path(path))?;
        Ok(Box::new(file))
    }

    fn make_dirs(&mut self, path: &str) -> Result<()> {
        self.ensure_connected()?;
        debug!("making directories: {path}");
        self.mkdirs_raw(path)
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        self.ensure_connected()?;
        debug!("removing path: {path}");
        if self.is_file(path) {
            self.sftp
                .unlink(&self.full_path(path))
                .map_err(|e| Error::Ssh(e))
        } else if self.is_dir(path) {
            if !self.iter_dir(path)?.is_empty() {
                return Err(Error::NonEmpty(path.to_string()));
            }
            self.sftp
                .rmdir(&self.full_path(path))
                .map_err(|e| Error::Ssh(e))
        } else {
            Err(Error::NotFound(path.to_string()))
        }
    }

    fn rmtree(&mut self, path: &str) -> Result<()> {
        self.ensure_connected()?;
        debug!("removing directories: {path}");
        if crate::vfs::split_components(path).is_empty() {
            return Err(Error::Invalid(
                "attempting to remove the root directory".into(),
            ));
        }
        if !self.exists(path) {
            return Err(Error::NotFound(path.to_string()));
        }
        if !self.is_dir(path) {
            return Err(Error::Invalid(format!("not a directory: {path}")));
        }
        // reverse-sorted so children are deleted before their parents
        let mut subpaths = self.glob(&format!("{path}/**/*"))?;
        subpaths.sort();
        for subpath in subpaths.iter().rev() {
            self.remove(subpath)?;
        }
        self.remove(path)
    }

    fn rename(&mut self, path: &str, new_name: &str) -> Result<()> {
        self.ensure_connected()?;
        debug!("renaming path: {path} to {new_name}");
        let parent = crate::vfs::parent(path);
        let dest = join_rel(parent, new_name);
        self.sftp
            .rename(&self.full_path(path), &self.full_path(&dest), None)
            .map_err(|e| Error::Ssh(e))
    }

    fn copy(&mut self, inpath: &str, outpath: &str) -> Result<()> {
        debug!("internally copying {inpath} to {outpath}");
        self.ensure_connected()?;
        if !self.exists(inpath) {
            return Err(Error::NotFound(inpath.to_string()));
        }
        if !self.is_dir(outpath) {
            return Err(Error::NotFound(outpath.to_string()));
        }
        // unix remote targets only
        self.exec_cmnd(&format!("cp -pR {inpath} {outpath}/"), "", true, None)?;
        Ok(())
    }

    fn copy_from(&mut self, source: &Path, path: &str) -> Result<()> {
        self.ensure_connected()?;
        debug!("copying external source {source:?} to {path}");
        if !self.exists(path) {
            return Err(Error::NotFound(path.to_string()));
        }
        if !source.exists() {
            return Err(Error::NotFound(source.display().to_string()));
        }
        self.copy_from_inner(source, path)
    }

    fn copy_to(&mut self, path: &str, target: &Path) -> Result<()> {
        self.ensure_connected()?;
        debug!("copying {path} to external target {target:?}");
        if !self.exists(path) {
            return Err(Error::NotFound(path.to_string()));
        }
        if !target.is_dir() {
            return Err(Error::NotFound(target.display().to_string()));
        }
        self.copy_to_inner(path, target)
    }

    fn glob(&mut self, pattern: &str) -> Result<Vec<String>> {
        self.ensure_connected()?;
        let root = PathBuf::from(self.root.clone());
        let sftp = &self.sftp;
        let mut lister = |dir: &str| -> Result<Vec<Entry>> {
            let full = if dir.is_empty() {
                root.clone()
            } else {
                root.join(dir)
            };
            let mut entries = Vec::new();
            for (child, stat) in sftp.readdir(&full)? {
                let name = child
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if name.is_empty() || name == "." || name == ".." {
                    continue;
                }
                entries.push(Entry {
                    name,
                    is_dir: stat.is_dir(),
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
        self.ensure_connected()?;
        if !self.exists(path) {
            return Err(Error::NotFound(path.to_string()));
        }
        exec_log!("executing command in {path}: {cmnd}");

        let full_cmnd = format!("cd {}; {}", self.full(path), cmnd);
        let mut channel = self.sess.channel_session()?;
        channel.exec(&full_cmnd)?;
        // we never write to stdin
        channel.send_eof()?;

        // select on both streams until the channel reports exit, forwarding
        // complete lines as they arrive
        let deadline = timeout.map(|t| Instant::now() + t);
        self.sess.set_blocking(false);
        let drained = drain_streams(&mut channel, deadline);
        self.sess.set_blocking(true);
        match drained {
            Ok(DrainOutcome::Finished) => {}
            Ok(DrainOutcome::TimedOut) => {
                channel.close().ok();
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
            Err(e) => return Err(e.into()),
        }
        channel.wait_close()?;
        let code = channel.exit_status()?;
        let ok = handle_exit_code(cmnd, code, raise_on_error)?;
        if ok {
            debug!("successfully executed command in {path}: {cmnd}");
        }
        Ok(ok)
    }
}

enum DrainOutcome {
    Finished,
    TimedOut,
}

/// Polls stdout and stderr of a non-blocking channel until the remote side
/// signals EOF, logging lines as they arrive. Partial buffers are flushed on
/// close.
fn drain_streams(
    channel: &mut ssh2::Channel,
    deadline: Option<Instant>,
) -> std::io::Result<DrainOutcome> {
    let mut stdout_lines = LineBuffer::stdout();
    let mut stderr_lines = LineBuffer::stderr();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                stdout_lines.flush();
                stderr_lines.flush();
                return Ok(DrainOutcome::TimedOut);
            }
        }
        let mut got_data = false;
        got_data |= read_available(&mut channel.stream(0), &mut stdout_lines, &mut chunk)?;
        got_data |= read_available(&mut channel.stderr(), &mut stderr_lines, &mut chunk)?;
        if !got_data {
            if channel.eof() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
    stdout_lines.flush();
    stderr_lines.flush();
    Ok(DrainOutcome::Finished)
}

/// Reads everything currently buffered on one stream; returns whether any
/// data arrived.
fn read_available(
    stream: &mut impl Read,
    lines: &mut LineBuffer,
    chunk: &mut [u8],
) -> std::io::Result<bool> {
    let mut got_data = false;
    loop {
        match stream.read(chunk) {
            Ok(0) => break,
            Ok(n) => {
                got_data = true;
                lines.push(&chunk[..n]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(got_data)
}

/// Accumulates stream bytes and emits one log record per completed line,
/// keeping per-stream ordering.
struct LineBuffer {
    pending: Vec<u8>,
    is_stderr: bool,
}

impl LineBuffer {
    fn stdout() -> Self {
        Self {
            pending: Vec::new(),
            is_stderr: false,
        }
    }

    fn stderr() -> Self {
        Self {
            pending: Vec::new(),
            is_stderr: true,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1]);
        }
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit(&line);
        }
    }

    fn emit(&self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        if self.is_stderr {
            warn!("{line}");
        } else {
            info!("{line}");
        }
    }
}
