//! Plain FTP backend
//!
//! The server owns the working directory here: `pwd` asks the server, and
//! transfers into another directory save and restore it around the call.

use std::fs::File;
use std::path::Path;
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Status};

use crate::config::Protocol;
use crate::error::{Operation, TransferError, TransferResult};
use crate::protocols::{
    create_local, open_local, open_socket, pump, resolve, CopyError, DefaultDirectory,
    TransferBackend,
};

/// FTP backend for plain (unencrypted) FTP connections
pub struct FtpBackend {
    stream: FtpStream,
    /// Server-reported directory right after login
    login_directory: Option<String>,
    address: String,
}

/// Maps a suppaftp error onto the session error taxonomy
fn classify(err: FtpError, operation: Operation, path: &str) -> TransferError {
    let protocol = Protocol::Ftp;
    match err {
        FtpError::ConnectionError(e) => TransferError::ConnectionLost {
            protocol,
            operation,
            detail: e.to_string(),
        },
        FtpError::UnexpectedResponse(ref response) => match response.status {
            Status::FileUnavailable => TransferError::RemoteNotFound {
                protocol,
                operation,
                path: path.to_string(),
                detail: err.to_string(),
            },
            Status::NotAvailable | Status::TransferAborted => TransferError::ConnectionLost {
                protocol,
                operation,
                detail: err.to_string(),
            },
            _ => TransferError::Remote {
                protocol,
                operation,
                detail: err.to_string(),
            },
        },
        other => TransferError::Remote {
            protocol,
            operation,
            detail: other.to_string(),
        },
    }
}

impl FtpBackend {
    /// Changes into `remote_directory` if given and returns the directory to
    /// come back to afterwards
    fn enter(
        &mut self,
        remote_directory: Option<&str>,
        operation: Operation,
    ) -> TransferResult<Option<String>> {
        let Some(directory) = remote_directory else {
            return Ok(None);
        };
        let previous = self
            .stream
            .pwd()
            .map_err(|e| classify(e, operation, "."))?;
        self.stream
            .cwd(directory)
            .map_err(|e| classify(e, operation, directory))?;
        Ok(Some(previous))
    }

    /// Returns to `previous` and merges a failed restore into the result
    fn leave(
        &mut self,
        previous: Option<String>,
        operation: Operation,
        result: TransferResult<u64>,
    ) -> TransferResult<u64> {
        let Some(directory) = previous else {
            return result;
        };
        match (self.stream.cwd(&directory), result) {
            (Ok(()), result) => result,
            (Err(e), Ok(_)) => Err(classify(e, operation, &directory)),
            (Err(e), Err(source)) => Err(TransferError::DirectoryNotRestored {
                directory,
                detail: e.to_string(),
                source: Box::new(source),
            }),
        }
    }

    fn retrieve(&mut self, filename: &str, local_path: &Path) -> TransferResult<u64> {
        let mut data = self
            .stream
            .retr_as_stream(filename)
            .map_err(|e| classify(e, Operation::Get, filename))?;

        // the local file only exists once the server accepted RETR
        let copied = create_local(local_path).and_then(|mut file| {
            pump(&mut data, &mut file).map_err(|e| match e {
                CopyError::Read(e) => TransferError::ConnectionLost {
                    protocol: Protocol::Ftp,
                    operation: Operation::Get,
                    detail: e.to_string(),
                },
                CopyError::Write(source) => TransferError::LocalIo {
                    operation: Operation::Get,
                    path: local_path.to_path_buf(),
                    source,
                },
            })
        });

        // Always read the closing reply, keeps the control channel in sync
        let finalized = self
            .stream
            .finalize_retr_stream(data)
            .map_err(|e| classify(e, Operation::Get, filename));

        let bytes = copied?;
        finalized?;
        Ok(bytes)
    }

    fn store(&mut self, filename: &str, local: &mut File, local_path: &Path) -> TransferResult<u64> {
        let mut data = self
            .stream
            .put_with_stream(filename)
            .map_err(|e| classify(e, Operation::Put, filename))?;

        let copied = pump(local, &mut data).map_err(|e| match e {
            CopyError::Read(source) => TransferError::LocalIo {
                operation: Operation::Put,
                path: local_path.to_path_buf(),
                source,
            },
            CopyError::Write(e) => TransferError::ConnectionLost {
                protocol: Protocol::Ftp,
                operation: Operation::Put,
                detail: e.to_string(),
            },
        });

        let finalized = self
            .stream
            .finalize_put_stream(data)
            .map_err(|e| classify(e, Operation::Put, filename));

        let bytes = copied?;
        finalized?;
        Ok(bytes)
    }
}

impl TransferBackend for FtpBackend {
    fn connect(host: &str, port: u16, timeout: Duration) -> TransferResult<Self>
    where
        Self: Sized,
    {
        let addrs = resolve(Protocol::Ftp, host, port)?;
        let connection_error = |detail: String| TransferError::Connection {
            protocol: Protocol::Ftp,
            operation: Operation::Connect,
            address: format!("{}:{}", host, port),
            detail,
        };

        // Try each address until one succeeds
        let mut last_error = None;
        for addr in addrs {
            // Socket timeouts go on before the greeting is read
            let socket = match open_socket(&addr, timeout) {
                Ok(socket) => socket,
                Err(e) => {
                    last_error = Some(e.to_string());
                    continue;
                }
            };
            match FtpStream::connect_with_stream(socket) {
                Ok(stream) => {
                    let stream = stream.passive_stream_builder(move |data_addr| {
                        open_socket(&data_addr, timeout).map_err(FtpError::ConnectionError)
                    });
                    return Ok(FtpBackend {
                        stream,
                        login_directory: None,
                        address: format!("{}:{}", host, port),
                    });
                }
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        Err(connection_error(
            last_error.unwrap_or_else(|| "No addresses available".to_string()),
        ))
    }

    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    fn login(&mut self, user: &str, password: &str) -> TransferResult<DefaultDirectory> {
        self.stream.login(user, password).map_err(|e| match e {
            FtpError::UnexpectedResponse(ref response)
                if matches!(response.status, Status::NotLoggedIn | Status::InvalidCredentials) =>
            {
                TransferError::Authentication {
                    protocol: Protocol::Ftp,
                    user: user.to_string(),
                    detail: e.to_string(),
                }
            }
            FtpError::ConnectionError(e) => TransferError::Connection {
                protocol: Protocol::Ftp,
                operation: Operation::Login,
                address: self.address.clone(),
                detail: e.to_string(),
            },
            other => classify(other, Operation::Login, "."),
        })?;

        // Binary for every transfer; ASCII mode corrupts non-text payloads
        self.stream
            .transfer_type(FileType::Binary)
            .map_err(|e| classify(e, Operation::Login, "."))?;

        let directory = self
            .stream
            .pwd()
            .map_err(|e| classify(e, Operation::Login, "."))?;
        self.login_directory = Some(directory.clone());
        Ok(DefaultDirectory::Path(directory))
    }

    fn pwd(&mut self) -> TransferResult<String> {
        self.stream.pwd().map_err(|e| classify(e, Operation::Pwd, "."))
    }

    fn cwd(&mut self, directory: Option<&str>) -> TransferResult<()> {
        let target = match directory {
            Some(directory) => directory.to_string(),
            None => self.login_directory.clone().ok_or_else(|| TransferError::Remote {
                protocol: Protocol::Ftp,
                operation: Operation::Cwd,
                detail: "no login directory recorded, log in first".to_string(),
            })?,
        };
        self.stream
            .cwd(&target)
            .map_err(|e| classify(e, Operation::Cwd, &target))
    }

    fn get(
        &mut self,
        filename: &str,
        remote_directory: Option<&str>,
        local_path: &Path,
    ) -> TransferResult<u64> {
        let previous = self.enter(remote_directory, Operation::Get)?;
        let result = self.retrieve(filename, local_path);
        self.leave(previous, Operation::Get, result)
    }

    fn put(
        &mut self,
        filename: &str,
        remote_directory: Option<&str>,
        local_path: &Path,
    ) -> TransferResult<u64> {
        // Fail on an unreadable local file before touching remote state
        let mut local = open_local(local_path)?;
        let previous = self.enter(remote_directory, Operation::Put)?;
        let result = self.store(filename, &mut local, local_path);
        self.leave(previous, Operation::Put, result)
    }

    fn disconnect(&mut self) -> TransferResult<()> {
        self.stream
            .quit()
            .map_err(|e| classify(e, Operation::Disconnect, "."))
    }
}
