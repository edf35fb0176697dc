//! Unix socket server for the broker control plane.
//!
//! The server owns the listening socket and hands out framed connections
//! with their peer credentials already read. Connections start with the
//! handshake frame limit; [`Connection::upgrade_to_full_frame_size`] lifts
//! it once the handshake completes.
//!
//! # Security Considerations
//!
//! - Socket permissions are set after binding, from the configured mode
//! - The parent directory is created with mode 0700 when missing; an
//!   existing directory keeps its permissions
//! - A symlink at the parent path is refused outright
//! - Stale socket files are removed before binding; anything else at the
//!   path is an error
//! - Concurrent connections are capped by a semaphore

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use procwarden_core::config::DaemonSection;

use super::credentials::PeerCredentials;
use super::error::{MAX_FRAME_SIZE, MAX_HANDSHAKE_FRAME_SIZE, ProtocolError, ProtocolResult};
use super::framing::FrameCodec;

/// Mode for a parent directory the server creates itself.
const DIRECTORY_MODE: u32 = 0o700;

/// Listener configuration, usually derived from the `[daemon]` section of
/// the broker configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the control socket.
    pub socket_path: PathBuf,

    /// Permission bits applied to the socket after binding.
    pub socket_mode: u32,

    /// Maximum concurrent client connections.
    pub max_connections: usize,

    /// Server identity sent during the handshake.
    pub server_info: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: procwarden_core::config::default_socket_path(),
            socket_mode: 0o600,
            max_connections: 64,
            server_info: default_server_info(),
        }
    }
}

impl ServerConfig {
    /// Config for a specific socket path with default limits.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }

    /// Set the socket permission bits.
    #[must_use]
    pub const fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }

    /// Set the maximum concurrent connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the server identity string.
    #[must_use]
    pub fn with_server_info(mut self, info: impl Into<String>) -> Self {
        self.server_info = info.into();
        self
    }
}

impl From<&DaemonSection> for ServerConfig {
    fn from(daemon: &DaemonSection) -> Self {
        Self {
            socket_path: daemon.socket_path.clone(),
            socket_mode: daemon.socket_mode,
            max_connections: daemon.max_connections,
            server_info: default_server_info(),
        }
    }
}

/// Identity string sent to clients during the handshake.
#[must_use]
pub fn default_server_info() -> String {
    format!("procwarden-daemon/{}", env!("CARGO_PKG_VERSION"))
}

/// A framed connection and the credentials of its peer.
#[derive(Debug)]
pub struct Connection {
    framed: Framed<UnixStream, FrameCodec>,
    peer: Option<PeerCredentials>,
}

impl Connection {
    /// Wrap a stream with the handshake frame limit and no credentials,
    /// as a client does for its own end.
    #[must_use]
    pub fn new(stream: UnixStream) -> Self {
        Self::new_with_credentials(stream, None)
    }

    /// Wrap a stream with the handshake frame limit.
    #[must_use]
    pub fn new_with_credentials(stream: UnixStream, peer: Option<PeerCredentials>) -> Self {
        Self {
            framed: Framed::new(
                stream,
                FrameCodec::with_max_frame_size(MAX_HANDSHAKE_FRAME_SIZE),
            ),
            peer,
        }
    }

    /// The framed transport for sending and receiving payloads.
    pub fn framed(&mut self) -> &mut Framed<UnixStream, FrameCodec> {
        &mut self.framed
    }

    /// Credentials read at accept time, `None` on the client side.
    #[must_use]
    pub const fn peer_credentials(&self) -> Option<PeerCredentials> {
        self.peer
    }

    /// Lift the frame limit to [`MAX_FRAME_SIZE`] after the handshake.
    pub fn upgrade_to_full_frame_size(&mut self) {
        self.framed.codec_mut().set_max_frame_size(MAX_FRAME_SIZE);
    }

    /// Current frame limit.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.framed.codec().max_frame_size()
    }
}

/// Permit held for the lifetime of a connection; dropping it frees a slot.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Listening end of the control socket.
#[derive(Debug)]
pub struct ProtocolServer {
    config: ServerConfig,
    listener: UnixListener,
    connection_sem: Arc<Semaphore>,
}

impl ProtocolServer {
    /// Bind the control socket.
    ///
    /// Creates the parent directory when missing, removes a stale socket
    /// file, binds, and applies the configured permission bits.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be prepared, the
    /// path is occupied by something other than a socket, the bind fails,
    /// or permissions cannot be set.
    pub fn bind(config: ServerConfig) -> ProtocolResult<Self> {
        if let Some(parent) = config.socket_path.parent() {
            Self::ensure_directory(parent)?;
        }
        Self::cleanup_socket(&config.socket_path)?;

        let listener = UnixListener::bind(&config.socket_path).map_err(|e| {
            ProtocolError::Io(io::Error::new(
                e.kind(),
                format!(
                    "failed to bind control socket at {}: {e}",
                    config.socket_path.display()
                ),
            ))
        })?;

        Self::set_socket_permissions(&config.socket_path, config.socket_mode)?;

        info!(
            socket = %config.socket_path.display(),
            mode = format_args!("{:04o}", config.socket_mode),
            max_connections = config.max_connections,
            "control socket bound"
        );

        Ok(Self {
            connection_sem: Arc::new(Semaphore::new(config.max_connections)),
            config,
            listener,
        })
    }

    /// Ensure the socket's parent directory exists.
    ///
    /// A directory created here gets mode 0700. An existing directory is
    /// left exactly as found so a misconfigured path cannot clobber system
    /// directories. A symlink is refused: resolving it would let another
    /// user redirect where the socket lands.
    fn ensure_directory(path: &Path) -> ProtocolResult<()> {
        match std::fs::symlink_metadata(path) {
            Ok(metadata) => {
                if metadata.file_type().is_symlink() {
                    return Err(ProtocolError::Io(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!(
                            "{} is a symlink, refusing to use as socket directory",
                            path.display()
                        ),
                    )));
                }
                if !metadata.is_dir() {
                    return Err(ProtocolError::Io(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} exists but is not a directory", path.display()),
                    )));
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                std::fs::create_dir_all(path).map_err(|e| {
                    ProtocolError::Io(io::Error::new(
                        e.kind(),
                        format!("failed to create directory {}: {e}", path.display()),
                    ))
                })?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = std::fs::Permissions::from_mode(DIRECTORY_MODE);
                    std::fs::set_permissions(path, perms).map_err(|e| {
                        ProtocolError::Io(io::Error::new(
                            e.kind(),
                            format!("failed to set permissions on {}: {e}", path.display()),
                        ))
                    })?;
                }
                Ok(())
            }
            Err(e) => Err(ProtocolError::Io(io::Error::new(
                e.kind(),
                format!("failed to stat {}: {e}", path.display()),
            ))),
        }
    }

    #[cfg(unix)]
    fn set_socket_permissions(path: &Path, mode: u32) -> ProtocolResult<()> {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(mode);
        std::fs::set_permissions(path, perms).map_err(|e| {
            ProtocolError::Io(io::Error::new(
                e.kind(),
                format!("failed to set socket permissions on {}: {e}", path.display()),
            ))
        })
    }

    #[cfg(not(unix))]
    fn set_socket_permissions(_path: &Path, _mode: u32) -> ProtocolResult<()> {
        Ok(())
    }

    /// Remove a leftover socket file from a previous run. Anything at the
    /// path that is not a socket stays untouched and fails the bind.
    fn cleanup_socket(path: &Path) -> ProtocolResult<()> {
        let metadata = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(ProtocolError::Io(io::Error::new(
                    e.kind(),
                    format!("failed to stat {}: {e}", path.display()),
                )));
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if !metadata.file_type().is_socket() {
                return Err(ProtocolError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("path {} exists but is not a socket", path.display()),
                )));
            }
        }

        std::fs::remove_file(path).map_err(|e| {
            ProtocolError::Io(io::Error::new(
                e.kind(),
                format!("failed to remove stale socket {}: {e}", path.display()),
            ))
        })?;

        debug!(path = %path.display(), "removed stale socket file");
        Ok(())
    }

    /// Accept the next connection.
    ///
    /// Waits for a connection slot when the concurrency cap is reached.
    /// Peer credentials are read before the connection is returned; a peer
    /// whose credentials cannot be read is rejected.
    ///
    /// # Errors
    ///
    /// Returns an error for listener I/O failures or an unreadable
    /// `SO_PEERCRED`. The accept loop should log and continue.
    pub async fn accept(&self) -> ProtocolResult<(Connection, ConnectionPermit)> {
        let permit = self
            .connection_sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProtocolError::Io(io::Error::other("connection semaphore closed")))?;

        let (stream, _addr) = self.listener.accept().await?;

        let peer = PeerCredentials::from_stream(&stream)
            .map_err(|e| ProtocolError::credential_check(format!("SO_PEERCRED read failed: {e}")))?;

        debug!(
            uid = peer.uid,
            gid = peer.gid,
            pid = ?peer.pid,
            "accepted connection"
        );

        Ok((
            Connection::new_with_credentials(stream, Some(peer)),
            ConnectionPermit { _permit: permit },
        ))
    }

    /// Path of the bound socket.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Listener configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Remove the socket file. Called on orderly shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists and cannot be removed.
    pub fn cleanup(&self) -> ProtocolResult<()> {
        match std::fs::remove_file(&self.config.socket_path) {
            Ok(()) => {
                info!(
                    socket = %self.config.socket_path.display(),
                    "removed control socket file"
                );
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProtocolError::Io(io::Error::new(
                e.kind(),
                format!(
                    "failed to remove socket {}: {e}",
                    self.config.socket_path.display()
                ),
            ))),
        }
    }
}

impl Drop for ProtocolServer {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("failed to clean up socket on drop: {e}");
        }
    }
}

/// Connect to a broker socket as a client.
///
/// # Errors
///
/// Returns an error if the socket cannot be reached.
pub async fn connect(path: impl AsRef<Path>) -> ProtocolResult<Connection> {
    let stream = UnixStream::connect(path.as_ref()).await?;
    Ok(Connection::new(stream))
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    use nix::unistd::getuid;
    use tempfile::TempDir;
    use tokio::time::timeout;

    use super::*;

    fn test_config(dir: &TempDir) -> ServerConfig {
        ServerConfig::new(dir.path().join("broker.sock"))
    }

    #[tokio::test]
    async fn bind_applies_configured_socket_mode() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp).with_socket_mode(0o660);
        let server = ProtocolServer::bind(config).unwrap();

        let mode = std::fs::metadata(server.socket_path())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o660, "socket mode should be 0660, got {mode:04o}");
    }

    #[tokio::test]
    async fn bind_creates_missing_parent_with_0700() {
        let tmp = TempDir::new().unwrap();
        let socket_dir = tmp.path().join("nested");
        let config = ServerConfig::new(socket_dir.join("broker.sock"));
        let _server = ProtocolServer::bind(config).unwrap();

        let mode = std::fs::metadata(&socket_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[tokio::test]
    async fn bind_preserves_permissions_of_existing_parent() {
        let tmp = TempDir::new().unwrap();
        let socket_dir = tmp.path().join("existing");
        std::fs::create_dir_all(&socket_dir).unwrap();
        std::fs::set_permissions(&socket_dir, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = ServerConfig::new(socket_dir.join("broker.sock"));
        let _server = ProtocolServer::bind(config).unwrap();

        let mode = std::fs::metadata(&socket_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[tokio::test]
    async fn bind_refuses_symlinked_parent() {
        let tmp = TempDir::new().unwrap();
        let real_dir = tmp.path().join("real");
        std::fs::create_dir_all(&real_dir).unwrap();
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(&real_dir, &link).unwrap();

        let config = ServerConfig::new(link.join("broker.sock"));
        let err = ProtocolServer::bind(config).unwrap_err();
        assert!(err.to_string().contains("symlink"));
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broker.sock");

        {
            let server = ProtocolServer::bind(ServerConfig::new(&path)).unwrap();
            // Skip cleanup to leave a stale socket behind.
            std::mem::forget(server);
        }
        assert!(path.exists());

        let server = ProtocolServer::bind(ServerConfig::new(&path)).unwrap();
        assert!(server.socket_path().exists());
    }

    #[tokio::test]
    async fn bind_refuses_non_socket_at_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broker.sock");
        std::fs::write(&path, b"not a socket").unwrap();

        let err = ProtocolServer::bind(ServerConfig::new(&path)).unwrap_err();
        assert!(err.to_string().contains("not a socket"));
        // The impostor file must survive the failed bind.
        assert_eq!(std::fs::read(&path).unwrap(), b"not a socket");
    }

    #[tokio::test]
    async fn cleanup_removes_the_socket_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broker.sock");
        let server = ProtocolServer::bind(ServerConfig::new(&path)).unwrap();

        assert!(path.exists());
        server.cleanup().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn accept_reads_peer_credentials() {
        let tmp = TempDir::new().unwrap();
        let server = Arc::new(ProtocolServer::bind(test_config(&tmp)).unwrap());

        let accepting = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.accept().await.unwrap() })
        };

        let _client = connect(server.socket_path()).await.unwrap();
        let (conn, _permit) = accepting.await.unwrap();

        let peer = conn.peer_credentials().unwrap();
        assert_eq!(peer.uid, getuid().as_raw());
        assert!(peer.pid.is_some());
    }

    #[tokio::test]
    async fn connection_limit_gates_the_accept_loop() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp).with_max_connections(1);
        let server = Arc::new(ProtocolServer::bind(config).unwrap());

        let first_accept = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.accept().await.unwrap() })
        };
        let _first_client = connect(server.socket_path()).await.unwrap();
        let (_conn, first_permit) = first_accept.await.unwrap();

        // With the only slot held, the next accept must not complete even
        // though the kernel has queued the connection.
        let second_accept = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.accept().await.unwrap() })
        };
        let _second_client = connect(server.socket_path()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!second_accept.is_finished());

        drop(first_permit);
        let (_conn, _permit) = timeout(Duration::from_secs(1), second_accept)
            .await
            .expect("accept should resume once a slot frees")
            .unwrap();
    }

    #[tokio::test]
    async fn connections_start_at_the_handshake_frame_limit() {
        let (client, _server) = UnixStream::pair().unwrap();
        let mut conn = Connection::new(client);

        assert_eq!(conn.max_frame_size(), MAX_HANDSHAKE_FRAME_SIZE);
        conn.upgrade_to_full_frame_size();
        assert_eq!(conn.max_frame_size(), MAX_FRAME_SIZE);
    }

    #[test]
    fn config_derives_from_daemon_section() {
        let daemon = DaemonSection {
            socket_path: PathBuf::from("/run/procwarden/broker.sock"),
            socket_mode: 0o660,
            max_connections: 16,
            ..Default::default()
        };
        let config = ServerConfig::from(&daemon);

        assert_eq!(
            config.socket_path,
            PathBuf::from("/run/procwarden/broker.sock")
        );
        assert_eq!(config.socket_mode, 0o660);
        assert_eq!(config.max_connections, 16);
        assert!(config.server_info.starts_with("procwarden-daemon/"));
    }
}
