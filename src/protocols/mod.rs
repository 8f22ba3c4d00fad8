//! Protocol backends for the unified session
//!
//! Each protocol implements the `TransferBackend` trait, so `Session` can
//! hold one backend behind a trait object and never look at the protocol
//! itself.

pub mod ftp;
pub mod sftp;

pub use ftp::FtpBackend;
pub use sftp::SftpBackend;

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use crate::config::Protocol;
use crate::error::{Operation, TransferError, TransferResult};

/// Working directory captured at login, restorable later
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultDirectory {
    /// Server-reported path (FTP)
    Path(String),
    /// The home directory; the protocol records no explicit path (SFTP)
    Home,
}

/// Capability set every protocol backend provides
///
/// Remote directory arguments and filenames are plain protocol paths;
/// `local_path` always names the full local file path.
pub trait TransferBackend: Send {
    /// Opens the transport-level connection, not yet authenticated
    ///
    /// # Arguments
    /// * `host` - Server hostname or IP address
    /// * `port` - Server port number
    /// * `timeout` - Applies to connect, handshake and every later blocking call
    fn connect(host: &str, port: u16, timeout: Duration) -> TransferResult<Self>
    where
        Self: Sized;

    fn protocol(&self) -> Protocol;

    /// Authenticates and reports the directory to restore later
    fn login(&mut self, user: &str, password: &str) -> TransferResult<DefaultDirectory>;

    /// Current remote working directory
    fn pwd(&mut self) -> TransferResult<String>;

    /// Changes the working directory; `None` returns to the login directory
    fn cwd(&mut self, directory: Option<&str>) -> TransferResult<()>;

    /// Downloads `filename` into `local_path`, returns the number of bytes written
    fn get(
        &mut self,
        filename: &str,
        remote_directory: Option<&str>,
        local_path: &Path,
    ) -> TransferResult<u64>;

    /// Uploads `local_path` as `filename`, returns the number of bytes sent
    fn put(
        &mut self,
        filename: &str,
        remote_directory: Option<&str>,
        local_path: &Path,
    ) -> TransferResult<u64>;

    /// Closes the channel and the transport under it
    fn disconnect(&mut self) -> TransferResult<()>;
}

/// Resolves host to all of its addresses
pub(crate) fn resolve(protocol: Protocol, host: &str, port: u16) -> TransferResult<Vec<SocketAddr>> {
    let connection_error = |detail: String| TransferError::Connection {
        protocol,
        operation: Operation::Connect,
        address: format!("{}:{}", host, port),
        detail,
    };

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| connection_error(e.to_string()))?
        .collect();

    if addrs.is_empty() {
        return Err(connection_error("No addresses found".to_string()));
    }
    Ok(addrs)
}

/// Connects to `addr` within `timeout`; every later read and write on the
/// socket is bounded by the same timeout
pub(crate) fn open_socket(addr: &SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(stream)
}

/// Which side of a copy failed
#[derive(Debug)]
pub(crate) enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

/// Copies `reader` into `writer` and flushes, telling read and write
/// failures apart so local and remote errors can be classified
pub(crate) fn pump<R, W>(reader: &mut R, writer: &mut W) -> Result<u64, CopyError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = [0u8; 32 * 1024];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        total += n as u64;
    }
    writer.flush().map_err(CopyError::Write)?;
    Ok(total)
}

/// Creates (truncating) the local target of a download
pub(crate) fn create_local(path: &Path) -> TransferResult<File> {
    File::create(path).map_err(|source| TransferError::LocalIo {
        operation: Operation::Get,
        path: path.to_path_buf(),
        source,
    })
}

/// Opens the local source of an upload
pub(crate) fn open_local(path: &Path) -> TransferResult<File> {
    File::open(path).map_err(|source| TransferError::LocalIo {
        operation: Operation::Put,
        path: path.to_path_buf(),
        source,
    })
}
