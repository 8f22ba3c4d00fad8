//! Protocol-independent transfer session
//!
//! A `Session` owns exactly one backend from construction until
//! `disconnect()`. It is single-threaded by contract: every call blocks until
//! the network operation completes or the timeout expires, and the FTP
//! directory save/restore inside `get`/`put` is not re-entrant.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{OsStyle, Protocol, SessionConfig, DEFAULT_TIMEOUT_SECS};
use crate::error::{Operation, TransferError, TransferResult};
use crate::logging::{Level, Logger};
use crate::path::remote_path_join;
use crate::protocols::{DefaultDirectory, FtpBackend, SftpBackend, TransferBackend};

pub struct Session {
    protocol: Protocol,
    hostname: String,
    port: u16,
    timeout: Duration,
    separator: char,
    /// Captured at login; `cwd` never touches it
    default_directory: Option<DefaultDirectory>,
    /// `None` once disconnected
    backend: Option<Box<dyn TransferBackend>>,
    logger: Option<Logger>,
}

impl Session {
    /// Opens the transport-level connection to `hostname`
    ///
    /// # Arguments
    /// * `protocol` - FTP or SFTP, fixed for the life of the session
    /// * `hostname` - Server hostname or IP address
    /// * `os` - Remote path style, selects the separator for `remote_path_join`
    /// * `port` - Explicit port, 21 (FTP) or 22 (SFTP) when `None`
    /// * `timeout` - Connect/handshake and per-call timeout, 30 seconds when `None`
    ///
    /// # Errors
    /// `Connection` if the host cannot be reached or the handshake fails
    /// within `timeout`.
    pub fn connect(
        protocol: Protocol,
        hostname: &str,
        os: OsStyle,
        port: Option<u16>,
        timeout: Option<Duration>,
    ) -> TransferResult<Self> {
        Self::establish(protocol, hostname, os, port, timeout, None)
    }

    /// Opens a session from a connection profile, logging through `logger`
    pub fn open(config: &SessionConfig, logger: Option<Logger>) -> TransferResult<Self> {
        config
            .validate()
            .map_err(|e| TransferError::InvalidConfig(e.to_string()))?;
        Self::establish(
            config.protocol,
            &config.host,
            config.os,
            config.port,
            Some(config.timeout()),
            logger,
        )
    }

    fn establish(
        protocol: Protocol,
        hostname: &str,
        os: OsStyle,
        port: Option<u16>,
        timeout: Option<Duration>,
        logger: Option<Logger>,
    ) -> TransferResult<Self> {
        let port = port.unwrap_or_else(|| protocol.default_port());
        let timeout = timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        if timeout.is_zero() {
            return Err(TransferError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }

        if let Some(logger) = &logger {
            let _ = logger.info(&format!("Connecting to {}://{}:{}", protocol, hostname, port));
        }

        let backend: TransferResult<Box<dyn TransferBackend>> = match protocol {
            Protocol::Ftp => FtpBackend::connect(hostname, port, timeout)
                .map(|b| Box::new(b) as Box<dyn TransferBackend>),
            Protocol::Sftp => SftpBackend::connect(hostname, port, timeout)
                .map(|b| Box::new(b) as Box<dyn TransferBackend>),
        };

        let backend = match backend {
            Ok(backend) => backend,
            Err(e) => {
                if let Some(logger) = &logger {
                    let _ = logger.error(&e.to_string());
                }
                return Err(e);
            }
        };

        let mut session = Session::from_backend(backend, hostname, os, port, timeout);
        session.logger = logger;
        session.note(Level::Info, &format!("Connected to {}", session.address()));
        Ok(session)
    }

    /// Wraps an already connected backend
    pub(crate) fn from_backend(
        backend: Box<dyn TransferBackend>,
        hostname: &str,
        os: OsStyle,
        port: u16,
        timeout: Duration,
    ) -> Self {
        Session {
            protocol: backend.protocol(),
            hostname: hostname.to_string(),
            port,
            timeout,
            separator: os.separator(),
            default_directory: None,
            backend: Some(backend),
            logger: None,
        }
    }

    /// Attaches a logger for connection and transfer events
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Authenticates over the open transport
    ///
    /// Records the default directory: the server-reported working directory
    /// for FTP, the home directory for SFTP.
    pub fn connection(&mut self, username: &str, password: &str) -> TransferResult<()> {
        self.note(
            Level::Info,
            &format!("Logging in to {} as '{}'", self.address(), username),
        );
        let result = self
            .backend(Operation::Login)
            .and_then(|backend| backend.login(username, password));
        let directory = self.logged(result)?;

        self.note(Level::Debug, &format!("Default directory: {:?}", directory));
        self.default_directory = Some(directory);
        Ok(())
    }

    /// Current remote working directory
    pub fn pwd(&mut self) -> TransferResult<String> {
        let result = self.backend(Operation::Pwd).and_then(|backend| backend.pwd());
        self.logged(result)
    }

    /// Changes the remote working directory
    ///
    /// `None` goes back home: the SFTP home directory, or the FTP login
    /// directory.
    pub fn cwd(&mut self, remote_directory: Option<&str>) -> TransferResult<()> {
        self.note(
            Level::Debug,
            &format!("Changing directory to {}", remote_directory.unwrap_or("<home>")),
        );
        let result = self
            .backend(Operation::Cwd)
            .and_then(|backend| backend.cwd(remote_directory));
        self.logged(result)
    }

    /// Returns to the directory recorded at login
    pub fn set_default_directory(&mut self) -> TransferResult<()> {
        let protocol = self.protocol;
        let target = match self.default_directory.clone() {
            Some(DefaultDirectory::Path(path)) => Some(path),
            Some(DefaultDirectory::Home) => None,
            None => {
                // disconnected sessions report that first
                self.backend(Operation::Cwd)?;
                return Err(TransferError::Remote {
                    protocol,
                    operation: Operation::Cwd,
                    detail: "no default directory recorded, log in first".to_string(),
                });
            }
        };
        self.cwd(target.as_deref())
    }

    /// Downloads `filename` into `local_directory`
    ///
    /// `local_directory` defaults to the directory of the running program.
    /// The local file is written in binary; on failure a partially written
    /// file is left in place.
    ///
    /// # Returns
    /// Number of bytes written locally
    pub fn get(
        &mut self,
        filename: &str,
        remote_directory: Option<&str>,
        local_directory: Option<&Path>,
    ) -> TransferResult<u64> {
        let result = self.backend(Operation::Get).and_then(|backend| {
            let local_path = local_file(Operation::Get, local_directory, filename)?;
            backend.get(filename, remote_directory, &local_path)
        });
        if let Ok(bytes) = &result {
            self.note(
                Level::Info,
                &format!("Downloaded {} ({} bytes) from {}", filename, bytes, self.address()),
            );
        }
        self.logged(result)
    }

    /// Uploads `filename` from `local_directory`
    ///
    /// `local_directory` defaults to the directory of the running program.
    ///
    /// # Returns
    /// Number of bytes sent
    pub fn put(
        &mut self,
        filename: &str,
        remote_directory: Option<&str>,
        local_directory: Option<&Path>,
    ) -> TransferResult<u64> {
        let result = self.backend(Operation::Put).and_then(|backend| {
            let local_path = local_file(Operation::Put, local_directory, filename)?;
            backend.put(filename, remote_directory, &local_path)
        });
        if let Ok(bytes) = &result {
            self.note(
                Level::Info,
                &format!("Uploaded {} ({} bytes) to {}", filename, bytes, self.address()),
            );
        }
        self.logged(result)
    }

    /// Closes the channel and the transport
    ///
    /// The backend is released even if the server does not acknowledge the
    /// close. Any later call, including a second `disconnect`, fails with
    /// `AlreadyDisconnected`.
    pub fn disconnect(&mut self) -> TransferResult<()> {
        let protocol = self.protocol;
        let mut backend = self
            .backend
            .take()
            .ok_or(TransferError::AlreadyDisconnected {
                protocol,
                operation: Operation::Disconnect,
            })?;
        let result = backend.disconnect();
        drop(backend);
        self.default_directory = None;

        self.note(Level::Info, &format!("Disconnected from {}", self.address()));
        self.logged(result)
    }

    /// Joins remote path segments with this session's separator
    pub fn remote_path_join<S: AsRef<str>>(&self, segments: &[S]) -> Option<String> {
        remote_path_join(self.separator, segments)
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn default_directory(&self) -> Option<&DefaultDirectory> {
        self.default_directory.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_some()
    }

    fn address(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.hostname, self.port)
    }

    fn backend(&mut self, operation: Operation) -> TransferResult<&mut dyn TransferBackend> {
        let protocol = self.protocol;
        match self.backend.as_deref_mut() {
            Some(backend) => Ok(backend),
            None => Err(TransferError::AlreadyDisconnected { protocol, operation }),
        }
    }

    fn note(&self, level: Level, message: &str) {
        if let Some(logger) = &self.logger {
            let _ = logger.log(level, message);
        }
    }

    fn logged<T>(&self, result: TransferResult<T>) -> TransferResult<T> {
        if let Err(e) = &result {
            self.note(Level::Error, &e.to_string());
        }
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            let _ = backend.disconnect();
        }
    }
}

/// Full local path for `filename`, in the program's directory by default
fn local_file(
    operation: Operation,
    local_directory: Option<&Path>,
    filename: &str,
) -> TransferResult<PathBuf> {
    let directory = match local_directory {
        Some(directory) => directory.to_path_buf(),
        None => program_directory(operation)?,
    };
    Ok(directory.join(filename))
}

fn program_directory(operation: Operation) -> TransferResult<PathBuf> {
    let exe = env::current_exe().map_err(|source| TransferError::LocalIo {
        operation,
        path: PathBuf::from("."),
        source,
    })?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| TransferError::LocalIo {
            operation,
            path: exe.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "executable has no parent directory"),
        })
}
