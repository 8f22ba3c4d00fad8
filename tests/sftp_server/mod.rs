//! In-process SSH server with an SFTP subsystem for integration tests
//!
//! One password account and an in-memory file tree shared with the test, so
//! uploads can be compared byte for byte. Relative paths resolve against
//! `HOME`, the way OpenSSH resolves them against the login directory.

use std::collections::{HashMap, HashSet};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId};
use russh_keys::key::KeyPair;
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};

pub const USER: &str = "demo";
pub const PASSWORD: &str = "password";
pub const HOME: &str = "/home/demo";

const DIR_MODE: u32 = 0o040755;
const FILE_MODE: u32 = 0o100644;

pub struct Tree {
    pub files: HashMap<String, Vec<u8>>,
    pub dirs: HashSet<String>,
}

impl Tree {
    fn new() -> Self {
        let dirs = ["/", "/home", HOME, "/pub", "/pub/example", "/upload"]
            .iter()
            .map(|d| d.to_string())
            .collect();
        let mut files = HashMap::new();
        files.insert(
            "/pub/example/readme.txt".to_string(),
            b"Welcome to the mock server.\r\n".to_vec(),
        );
        files.insert(
            format!("{}/notes.txt", HOME),
            b"notes in the home directory\n".to_vec(),
        );
        Tree { files, dirs }
    }

    fn attributes(&self, path: &str) -> Option<FileAttributes> {
        let mut attrs = FileAttributes::default();
        if self.dirs.contains(path) {
            attrs.permissions = Some(DIR_MODE);
            attrs.size = Some(0);
        } else {
            let data = self.files.get(path)?;
            attrs.permissions = Some(FILE_MODE);
            attrs.size = Some(data.len() as u64);
        }
        Some(attrs)
    }
}

pub struct MockSftpServer {
    pub port: u16,
    pub tree: Arc<Mutex<Tree>>,
}

impl MockSftpServer {
    pub fn start() -> Self {
        let tree = Arc::new(Mutex::new(Tree::new()));
        let shared = tree.clone();
        let (ready, port) = mpsc::channel();

        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(serve(shared, ready));
        });

        MockSftpServer {
            port: port.recv().unwrap(),
            tree,
        }
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.tree.lock().unwrap().files.get(path).cloned()
    }
}

async fn serve(tree: Arc<Mutex<Tree>>, ready: mpsc::Sender<u16>) {
    let config = Arc::new(russh::server::Config {
        auth_rejection_time: Duration::ZERO,
        auth_rejection_time_initial: Some(Duration::ZERO),
        keys: vec![KeyPair::generate_ed25519().unwrap()],
        ..Default::default()
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    ready.send(listener.local_addr().unwrap().port()).unwrap();

    while let Ok((socket, _)) = listener.accept().await {
        let handler = SshHandler {
            tree: tree.clone(),
            channels: HashMap::new(),
        };
        let config = config.clone();
        tokio::spawn(async move {
            let _ = russh::server::run_stream(config, socket, handler).await;
        });
    }
}

/// Resolves `path` against `HOME`, folding `.` and `..`
fn normalize(path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", HOME, path)
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

struct SshHandler {
    tree: Arc<Mutex<Tree>>,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

#[async_trait]
impl russh::server::Handler for SshHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == USER && password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
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
                session.channel_success(channel_id);
                let sftp = SftpHandler::new(self.tree.clone());
                russh_sftp::server::run(channel.into_stream(), sftp).await;
            }
            _ => {
                session.channel_failure(channel_id);
            }
        }
        Ok(())
    }
}

struct OpenFile {
    path: String,
    data: Vec<u8>,
    write: bool,
}

struct SftpHandler {
    tree: Arc<Mutex<Tree>>,
    handles: HashMap<String, OpenFile>,
    next_handle: u32,
}

impl SftpHandler {
    fn new(tree: Arc<Mutex<Tree>>) -> Self {
        SftpHandler {
            tree,
            handles: HashMap::new(),
            next_handle: 0,
        }
    }

    fn lookup(&self, path: &str) -> Result<FileAttributes, StatusCode> {
        let tree = self.tree.lock().unwrap();
        tree.attributes(&normalize(path)).ok_or(StatusCode::NoSuchFile)
    }

    fn open_file(&mut self, filename: &str, flags: OpenFlags) -> Result<String, StatusCode> {
        let path = normalize(filename);
        let file = {
            let tree = self.tree.lock().unwrap();
            if flags.contains(OpenFlags::WRITE) {
                if !tree.dirs.contains(&parent(&path)) {
                    return Err(StatusCode::NoSuchFile);
                }
                OpenFile {
                    path,
                    data: Vec::new(),
                    write: true,
                }
            } else {
                let data = tree.files.get(&path).cloned().ok_or(StatusCode::NoSuchFile)?;
                OpenFile {
                    path,
                    data,
                    write: false,
                }
            }
        };
        self.next_handle += 1;
        let handle = format!("handle-{}", self.next_handle);
        self.handles.insert(handle.clone(), file);
        Ok(handle)
    }

    fn read_at(&self, handle: &str, offset: u64, len: u32) -> Result<Vec<u8>, StatusCode> {
        let file = self.handles.get(handle).ok_or(StatusCode::Failure)?;
        let start = offset as usize;
        if start >= file.data.len() {
            return Err(StatusCode::Eof);
        }
        let end = (start + len as usize).min(file.data.len());
        Ok(file.data[start..end].to_vec())
    }

    fn write_at(&mut self, handle: &str, offset: u64, data: &[u8]) -> Result<(), StatusCode> {
        let file = self.handles.get_mut(handle).ok_or(StatusCode::Failure)?;
        let start = offset as usize;
        let end = start + data.len();
        if file.data.len() < end {
            file.data.resize(end, 0);
        }
        file.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn close_file(&mut self, handle: &str) -> Result<(), StatusCode> {
        let file = self.handles.remove(handle).ok_or(StatusCode::Failure)?;
        if file.write {
            self.tree.lock().unwrap().files.insert(file.path, file.data);
        }
        Ok(())
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

#[async_trait]
impl russh_sftp::server::Handler for SftpHandler {
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

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let path = normalize(&path);
        Ok(Name {
            id,
            files: vec![File::dummy(path.as_str())],
        })
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let attrs = self.lookup(&path)?;
        Ok(Attrs { id, attrs })
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let attrs = self.lookup(&path)?;
        Ok(Attrs { id, attrs })
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let handle = self.open_file(&filename, pflags)?;
        Ok(Handle { id, handle })
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let data = self.read_at(&handle, offset, len)?;
        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        self.write_at(&handle, offset, &data)?;
        Ok(ok(id))
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.close_file(&handle)?;
        Ok(ok(id))
    }
}
