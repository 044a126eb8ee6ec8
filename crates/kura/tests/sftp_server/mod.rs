//! Loopback SSH server with an SFTP subsystem over a local directory.
//!
//! Rename follows SFTP v3 and refuses an existing target, like OpenSSH
//! without the posix-rename extension.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use russh::keys::PrivateKey;
use russh::keys::ssh_key::private::Ed25519Keypair;
use russh::server::{self, Auth, Msg, Server as _, Session};
use russh::{Channel, ChannelId};
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const USER: &str = "test";
pub const PASSWORD: &str = "tiger";

/// Entries sent per `SSH_FXP_NAME` reply.
const READDIR_CHUNK: usize = 128;

/// Deterministic ed25519 host key built from `seed`.
pub fn host_key(seed: u8) -> PrivateKey {
    PrivateKey::from(Ed25519Keypair::from_seed(&[seed; 32]))
}

/// Public half of `key` in SSH wire format, URL-safe base64.
pub fn encoded_public_key(key: &PrivateKey) -> String {
    let wire = key.public_key().to_bytes().unwrap();
    URL_SAFE_NO_PAD.encode(wire)
}

/// A running server. The accept loop stops when the runtime shuts down.
pub struct TestServer {
    pub addr: SocketAddr,
    root: tempfile::TempDir,
}

impl TestServer {
    /// Serve a fresh temp dir on a free loopback port.
    pub async fn start(key: PrivateKey) -> Self {
        let root = tempfile::tempdir().unwrap();
        let config = server::Config {
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            keys: vec![key],
            ..Default::default()
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut factory = Server {
            root: root.path().to_path_buf(),
        };
        tokio::spawn(async move {
            if let Err(e) = factory.run_on_socket(Arc::new(config), &listener).await {
                tracing::error!(error = %e, "test ssh server stopped");
            }
        });
        Self { addr, root }
    }

    /// Directory the server exposes as `/`.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Connection string for the served tree, pinning `host_key`.
    pub fn url(&self, host_key: &str) -> String {
        format!(
            "sftp://{USER}:{PASSWORD}@{}:{}/?host_key={host_key}",
            self.addr.ip(),
            self.addr.port()
        )
    }
}

// ============================================================================
// SSH
// ============================================================================

struct Server {
    root: PathBuf,
}

impl server::Server for Server {
    type Handler = ConnectionHandler;

    fn new_client(&mut self, _peer_addr: Option<SocketAddr>) -> Self::Handler {
        ConnectionHandler {
            root: self.root.clone(),
            channels: HashMap::new(),
        }
    }

    fn handle_session_error(&mut self, error: <Self::Handler as server::Handler>::Error) {
        tracing::debug!(error = %error, "test ssh session ended");
    }
}

struct ConnectionHandler {
    root: PathBuf,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl server::Handler for ConnectionHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == USER && password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match self.channels.remove(&channel_id) {
            Some(channel) if name == "sftp" => {
                session.channel_success(channel_id)?;
                russh_sftp::server::run(channel.into_stream(), SftpFs::new(self.root.clone()))
                    .await;
            }
            _ => session.channel_failure(channel_id)?,
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.close(channel)?;
        Ok(())
    }
}

// ============================================================================
// SFTP
// ============================================================================

enum OpenHandle {
    File(tokio::fs::File),
    Dir(VecDeque<File>),
}

/// SFTP v3 file operations on paths below `root`.
struct SftpFs {
    root: PathBuf,
    handles: HashMap<String, OpenHandle>,
    next_handle: u64,
}

impl SftpFs {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            handles: HashMap::new(),
            next_handle: 0,
        }
    }

    /// Map a client path into `root`, dropping `..` and `.` components.
    fn local(&self, path: &str) -> PathBuf {
        let mut local = self.root.clone();
        for component in Path::new(path).components() {
            if let Component::Normal(part) = component {
                local.push(part);
            }
        }
        local
    }

    fn insert(&mut self, id: u32, handle: OpenHandle) -> Handle {
        self.next_handle += 1;
        let key = self.next_handle.to_string();
        self.handles.insert(key.clone(), handle);
        Handle { id, handle: key }
    }

    fn file(&mut self, handle: &str) -> Result<&mut tokio::fs::File, StatusCode> {
        match self.handles.get_mut(handle) {
            Some(OpenHandle::File(file)) => Ok(file),
            _ => Err(StatusCode::Failure),
        }
    }
}

fn ok(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

fn status(err: std::io::Error) -> StatusCode {
    match err.kind() {
        std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ => StatusCode::Failure,
    }
}

impl russh_sftp::server::Handler for SftpFs {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        _version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let options = tokio::fs::OpenOptions::from(std::fs::OpenOptions::from(pflags));
        let file = options
            .open(self.local(&filename))
            .await
            .map_err(status)?;
        Ok(self.insert(id, OpenHandle::File(file)))
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        match self.handles.remove(&handle) {
            Some(OpenHandle::File(mut file)) => file.flush().await.map_err(status)?,
            Some(OpenHandle::Dir(_)) => {}
            None => return Err(StatusCode::Failure),
        }
        Ok(ok(id))
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let file = self.file(&handle)?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(status)?;
        let mut data = vec![0u8; len as usize];
        let mut filled = 0;
        while filled < data.len() {
            let n = file.read(&mut data[filled..]).await.map_err(status)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 && len > 0 {
            return Err(StatusCode::Eof);
        }
        data.truncate(filled);
        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let file = self.file(&handle)?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(status)?;
        file.write_all(&data).await.map_err(status)?;
        Ok(ok(id))
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let meta = tokio::fs::symlink_metadata(self.local(&path))
            .await
            .map_err(status)?;
        Ok(Attrs {
            id,
            attrs: FileAttributes::from(&meta),
        })
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs, Self::Error> {
        let meta = self.file(&handle)?.metadata().await.map_err(status)?;
        Ok(Attrs {
            id,
            attrs: FileAttributes::from(&meta),
        })
    }

    async fn setstat(
        &mut self,
        id: u32,
        path: String,
        attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        if let Some(mode) = attrs.permissions {
            let perms = std::fs::Permissions::from_mode(mode & 0o7777);
            tokio::fs::set_permissions(self.local(&path), perms)
                .await
                .map_err(status)?;
        }
        Ok(ok(id))
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        let mut dir = tokio::fs::read_dir(self.local(&path))
            .await
            .map_err(status)?;
        let mut entries = VecDeque::new();
        while let Some(entry) = dir.next_entry().await.map_err(status)? {
            let meta = entry.metadata().await.map_err(status)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push_back(File::new(name, FileAttributes::from(&meta)));
        }
        Ok(self.insert(id, OpenHandle::Dir(entries)))
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        let Some(OpenHandle::Dir(entries)) = self.handles.get_mut(&handle) else {
            return Err(StatusCode::Failure);
        };
        if entries.is_empty() {
            return Err(StatusCode::Eof);
        }
        let take = entries.len().min(READDIR_CHUNK);
        Ok(Name {
            id,
            files: entries.drain(..take).collect(),
        })
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        tokio::fs::remove_file(self.local(&filename))
            .await
            .map_err(status)?;
        Ok(ok(id))
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        tokio::fs::create_dir(self.local(&path))
            .await
            .map_err(status)?;
        Ok(ok(id))
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        tokio::fs::remove_dir(self.local(&path))
            .await
            .map_err(status)?;
        Ok(ok(id))
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let meta = tokio::fs::metadata(self.local(&path))
            .await
            .map_err(status)?;
        Ok(Attrs {
            id,
            attrs: FileAttributes::from(&meta),
        })
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> Result<Status, Self::Error> {
        let target = self.local(&newpath);
        if tokio::fs::try_exists(&target).await.map_err(status)? {
            return Err(StatusCode::Failure);
        }
        tokio::fs::rename(self.local(&oldpath), target)
            .await
            .map_err(status)?;
        Ok(ok(id))
    }
}
