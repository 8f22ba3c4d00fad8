//! SFTP (SSH File Transfer Protocol) backend
//!
//! SFTP has no server-side working directory. The backend tracks one on the
//! client: `None` stands for the home directory the server resolves relative
//! paths against, `Some` holds a canonical absolute path.

use ssh2::{ErrorCode, Session, Sftp};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::config::Protocol;
use crate::error::{Operation, TransferError, TransferResult};
use crate::protocols::{
    create_local, open_local, open_socket, pump, resolve, CopyError, DefaultDirectory,
    TransferBackend,
};

// SFTP status codes (libssh2 LIBSSH2_FX_*)
const FX_NO_SUCH_FILE: i32 = 2;
const FX_NO_SUCH_PATH: i32 = 10;

// libssh2 session error codes (LIBSSH2_ERROR_*)
const ERROR_SOCKET_SEND: i32 = -7;
const ERROR_TIMEOUT: i32 = -9;
const ERROR_SOCKET_DISCONNECT: i32 = -13;
const ERROR_AUTHENTICATION_FAILED: i32 = -18;
const ERROR_SOCKET_TIMEOUT: i32 = -30;
const ERROR_SOCKET_RECV: i32 = -43;

fn is_socket_failure(code: i32) -> bool {
    matches!(
        code,
        ERROR_SOCKET_SEND
            | ERROR_TIMEOUT
            | ERROR_SOCKET_DISCONNECT
            | ERROR_SOCKET_TIMEOUT
            | ERROR_SOCKET_RECV
    )
}

/// Maps an ssh2 error raised after login onto the session error taxonomy
fn classify(err: ssh2::Error, operation: Operation, path: &str) -> TransferError {
    let protocol = Protocol::Sftp;
    match err.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH) => {
            TransferError::RemoteNotFound {
                protocol,
                operation,
                path: path.to_string(),
                detail: err.to_string(),
            }
        }
        ErrorCode::Session(code) if is_socket_failure(code) => TransferError::ConnectionLost {
            protocol,
            operation,
            detail: err.to_string(),
        },
        _ => TransferError::Remote {
            protocol,
            operation,
            detail: err.to_string(),
        },
    }
}

/// Resolves `path` against the tracked working directory
fn resolve_remote(cwd: Option<&str>, path: &str) -> String {
    match cwd {
        // Relative paths resolve against the home directory server side
        None => path.to_string(),
        Some(_) if path.starts_with('/') => path.to_string(),
        Some(cwd) => format!("{}/{}", cwd.trim_end_matches('/'), path),
    }
}

fn millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

/// SFTP backend over an SSH transport
pub struct SftpBackend {
    session: Session,
    /// Opened at login, dropped at disconnect
    sftp: Option<Sftp>,
    cwd: Option<String>,
    address: String,
    timeout: Duration,
}

impl SftpBackend {
    fn channel(&self, operation: Operation) -> TransferResult<&Sftp> {
        self.sftp.as_ref().ok_or_else(|| TransferError::Remote {
            protocol: Protocol::Sftp,
            operation,
            detail: "SFTP channel not open, log in first".to_string(),
        })
    }

    /// Verifies `directory` is a directory and makes it the working directory
    fn change_dir(&mut self, directory: &str, operation: Operation) -> TransferResult<()> {
        let path = resolve_remote(self.cwd.as_deref(), directory);
        let sftp = self.channel(operation)?;

        let stat = sftp
            .stat(Path::new(&path))
            .map_err(|e| classify(e, operation, &path))?;
        if !stat.is_dir() {
            return Err(TransferError::Remote {
                protocol: Protocol::Sftp,
                operation,
                detail: format!("'{}' is not a directory", path),
            });
        }

        let canonical = sftp
            .realpath(Path::new(&path))
            .map_err(|e| classify(e, operation, &path))?;
        self.cwd = Some(canonical.to_string_lossy().into_owned());
        Ok(())
    }

    fn download(&mut self, filename: &str, local_path: &Path) -> TransferResult<u64> {
        let remote = resolve_remote(self.cwd.as_deref(), filename);
        let mut file = self
            .channel(Operation::Get)?
            .open(Path::new(&remote))
            .map_err(|e| classify(e, Operation::Get, &remote))?;
        let mut local = create_local(local_path)?;

        pump(&mut file, &mut local).map_err(|e| match e {
            CopyError::Read(e) => TransferError::ConnectionLost {
                protocol: Protocol::Sftp,
                operation: Operation::Get,
                detail: format!("reading '{}': {}", remote, e),
            },
            CopyError::Write(source) => TransferError::LocalIo {
                operation: Operation::Get,
                path: local_path.to_path_buf(),
                source,
            },
        })
    }

    fn upload(&mut self, filename: &str, local_path: &Path) -> TransferResult<u64> {
        let mut local = open_local(local_path)?;
        let remote = resolve_remote(self.cwd.as_deref(), filename);
        let mut file = self
            .channel(Operation::Put)?
            .create(Path::new(&remote))
            .map_err(|e| classify(e, Operation::Put, &remote))?;

        let bytes = pump(&mut local, &mut file).map_err(|e| match e {
            CopyError::Read(source) => TransferError::LocalIo {
                operation: Operation::Put,
                path: local_path.to_path_buf(),
                source,
            },
            CopyError::Write(e) => TransferError::ConnectionLost {
                protocol: Protocol::Sftp,
                operation: Operation::Put,
                detail: format!("writing '{}': {}", remote, e),
            },
        })?;

        // Deferred write failures (quota, disk full) arrive with the close status
        file.close().map_err(|e| classify(e, Operation::Put, &remote))?;
        Ok(bytes)
    }
}

/// Opens an SSH transport to the first address that completes a handshake
fn open_transport(
    addrs: &[SocketAddr],
    address: &str,
    timeout: Duration,
) -> TransferResult<Session> {
    let mut last_error = None;
    for addr in addrs {
        let stream = match open_socket(addr, timeout) {
            Ok(s) => s,
            Err(e) => {
                last_error = Some(e.to_string());
                continue;
            }
        };

        let mut session = match Session::new() {
            Ok(session) => session,
            Err(e) => {
                last_error = Some(format!("failed to create SSH session: {}", e));
                continue;
            }
        };
        session.set_timeout(millis(timeout));
        session.set_tcp_stream(stream);
        match session.handshake() {
            Ok(()) => return Ok(session),
            Err(e) => last_error = Some(format!("SSH handshake failed with {}: {}", addr, e)),
        }
    }

    Err(TransferError::Connection {
        protocol: Protocol::Sftp,
        operation: Operation::Connect,
        address: address.to_string(),
        detail: last_error.unwrap_or_else(|| "No addresses available".to_string()),
    })
}

impl TransferBackend for SftpBackend {
    fn connect(host: &str, port: u16, timeout: Duration) -> TransferResult<Self>
    where
        Self: Sized,
    {
        let address = format!("{}:{}", host, port);
        let addrs = resolve(Protocol::Sftp, host, port)?;
        let session = open_transport(&addrs, &address, timeout)?;

        Ok(SftpBackend {
            session,
            sftp: None,
            cwd: None,
            address,
            timeout,
        })
    }

    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    fn login(&mut self, user: &str, password: &str) -> TransferResult<DefaultDirectory> {
        self.session
            .userauth_password(user, password)
            .map_err(|e| match e.code() {
                ErrorCode::Session(code) if is_socket_failure(code) => TransferError::Connection {
                    protocol: Protocol::Sftp,
                    operation: Operation::Login,
                    address: self.address.clone(),
                    detail: e.to_string(),
                },
                ErrorCode::Session(ERROR_AUTHENTICATION_FAILED) => TransferError::Authentication {
                    protocol: Protocol::Sftp,
                    user: user.to_string(),
                    detail: e.to_string(),
                },
                _ => classify(e, Operation::Login, "."),
            })?;

        if !self.session.authenticated() {
            return Err(TransferError::Authentication {
                protocol: Protocol::Sftp,
                user: user.to_string(),
                detail: "server did not accept the password".to_string(),
            });
        }

        let sftp = self
            .session
            .sftp()
            .map_err(|e| classify(e, Operation::Login, "."))?;
        // Applies to the socket the channel runs over
        self.session.set_timeout(millis(self.timeout));

        self.sftp = Some(sftp);
        self.cwd = None;
        Ok(DefaultDirectory::Home)
    }

    fn pwd(&mut self) -> TransferResult<String> {
        if let Some(cwd) = &self.cwd {
            return Ok(cwd.clone());
        }
        let home = self
            .channel(Operation::Pwd)?
            .realpath(Path::new("."))
            .map_err(|e| classify(e, Operation::Pwd, "."))?;
        Ok(home.to_string_lossy().into_owned())
    }

    fn cwd(&mut self, directory: Option<&str>) -> TransferResult<()> {
        match directory {
            Some(directory) => self.change_dir(directory, Operation::Cwd),
            None => {
                self.cwd = None;
                Ok(())
            }
        }
    }

    fn get(
        &mut self,
        filename: &str,
        remote_directory: Option<&str>,
        local_path: &Path,
    ) -> TransferResult<u64> {
        let result = match remote_directory {
            Some(directory) => self.change_dir(directory, Operation::Get),
            None => Ok(()),
        }
        .and_then(|_| self.download(filename, local_path));
        // Every transfer leaves the session in the home directory
        self.cwd = None;
        result
    }

    fn put(
        &mut self,
        filename: &str,
        remote_directory: Option<&str>,
        local_path: &Path,
    ) -> TransferResult<u64> {
        let result = match remote_directory {
            Some(directory) => self.change_dir(directory, Operation::Put),
            None => Ok(()),
        }
        .and_then(|_| self.upload(filename, local_path));
        self.cwd = None;
        result
    }

    fn disconnect(&mut self) -> TransferResult<()> {
        // Channel first, then the transport under it
        drop(self.sftp.take());
        self.cwd = None;
        self.session
            .disconnect(None, "session closed by client", None)
            .map_err(|e| classify(e, Operation::Disconnect, "."))
    }
}
