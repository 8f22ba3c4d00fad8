//! Unified FTP/SFTP client library
//!
//! One `Session` type moves files to and from a remote host over either
//! FTP or SFTP. The protocol is picked once at construction; after that,
//! login, directory navigation, binary get/put and disconnect look the same
//! for both.
//!
//! ```no_run
//! use filexfer::{OsStyle, Protocol, Session};
//!
//! let mut session = Session::connect(Protocol::Sftp, "test.rebex.net", OsStyle::Unix, None, None)?;
//! session.connection("demo", "password")?;
//! session.cwd(Some("pub/example"))?;
//! println!("{}", session.pwd()?);
//! session.set_default_directory()?;
//! session.get("readme.txt", Some("/pub/example"), Some(std::path::Path::new("/tmp")))?;
//! session.disconnect()?;
//! # Ok::<(), filexfer::TransferError>(())
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod logging;
pub mod path;
pub mod protocols;
pub mod session;

// Re-export key items
pub use config::{parse_config, OsStyle, Protocol, SessionConfig};
pub use error::{Operation, TransferError, TransferResult};
pub use logging::{Level, Logger};
pub use path::remote_path_join;
pub use protocols::{DefaultDirectory, TransferBackend};
pub use session::Session;
