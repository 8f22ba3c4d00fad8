//! Scripted FTP server for integration tests
//!
//! Speaks just enough FTP for the client: USER/PASS, TYPE, PWD, CWD,
//! PASV/EPSV, RETR, STOR and QUIT, over an in-memory file tree.

use std::collections::{HashMap, HashSet};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

pub const USER: &str = "demo";
pub const PASSWORD: &str = "password";
pub const HOME: &str = "/home/demo";

pub struct ServerState {
    pub files: HashMap<String, Vec<u8>>,
    pub dirs: HashSet<String>,
    pub commands: Vec<String>,
    /// Accept data connections for RETR but never send on them
    pub stall_data: bool,
}

impl ServerState {
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
        ServerState {
            files,
            dirs,
            commands: Vec::new(),
            stall_data: false,
        }
    }
}

pub struct MockFtpServer {
    pub port: u16,
    pub state: Arc<Mutex<ServerState>>,
}

impl MockFtpServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(ServerState::new()));

        let shared = state.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let shared = shared.clone();
                thread::spawn(move || {
                    let _ = serve(stream, shared);
                });
            }
        });

        MockFtpServer { port, state }
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn stall_data(&self) {
        self.state.lock().unwrap().stall_data = true;
    }
}

fn reply(out: &mut TcpStream, line: &str) -> io::Result<()> {
    out.write_all(format!("{}\r\n", line).as_bytes())?;
    out.flush()
}

/// Resolves `path` against `cwd`, folding `.` and `..`
fn absolute(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", cwd, path)
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

fn serve(stream: TcpStream, state: Arc<Mutex<ServerState>>) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut out = stream;
    reply(&mut out, "220 mock FTP ready")?;

    let mut cwd = HOME.to_string();
    let mut user = String::new();
    let mut logged_in = false;
    let mut passive: Option<TcpListener> = None;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        let (cmd, arg) = match line.split_once(' ') {
            Some((cmd, arg)) => (cmd.to_ascii_uppercase(), arg.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };
        state.lock().unwrap().commands.push(line.clone());

        match cmd.as_str() {
            "USER" => {
                user = arg;
                reply(&mut out, "331 Password required")?;
            }
            "PASS" => {
                if user == USER && arg == PASSWORD {
                    logged_in = true;
                    reply(&mut out, "230 Logged in")?;
                } else {
                    reply(&mut out, "530 Login incorrect")?;
                }
            }
            "QUIT" => {
                reply(&mut out, "221 Goodbye")?;
                return Ok(());
            }
            _ if !logged_in => reply(&mut out, "530 Not logged in")?,
            "TYPE" => reply(&mut out, &format!("200 Type set to {}", arg))?,
            "PWD" => reply(&mut out, &format!("257 \"{}\" is the current directory", cwd))?,
            "CWD" => {
                let target = absolute(&cwd, &arg);
                if state.lock().unwrap().dirs.contains(&target) {
                    cwd = target;
                    reply(&mut out, "250 Directory changed")?;
                } else {
                    reply(&mut out, "550 No such directory")?;
                }
            }
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0")?;
                let port = listener.local_addr()?.port();
                reply(
                    &mut out,
                    &format!(
                        "227 Entering Passive Mode (127,0,0,1,{},{})",
                        port / 256,
                        port % 256
                    ),
                )?;
                passive = Some(listener);
            }
            "EPSV" => {
                let listener = TcpListener::bind("127.0.0.1:0")?;
                let port = listener.local_addr()?.port();
                reply(
                    &mut out,
                    &format!("229 Entering Extended Passive Mode (|||{}|)", port),
                )?;
                passive = Some(listener);
            }
            "RETR" => {
                let Some(listener) = passive.take() else {
                    reply(&mut out, "425 Use PASV first")?;
                    continue;
                };
                let path = absolute(&cwd, &arg);
                let (data, stall) = {
                    let state = state.lock().unwrap();
                    (state.files.get(&path).cloned(), state.stall_data)
                };
                match data {
                    None => reply(&mut out, "550 No such file")?,
                    Some(_) if stall => {
                        reply(&mut out, "150 Opening BINARY mode data connection")?;
                        let (mut conn, _) = listener.accept()?;
                        // Hold the channel open and silent until the client drops it
                        let mut sink = Vec::new();
                        let _ = conn.read_to_end(&mut sink);
                        reply(&mut out, "426 Connection closed; transfer aborted")?;
                    }
                    Some(bytes) => {
                        reply(&mut out, "150 Opening BINARY mode data connection")?;
                        let (mut conn, _) = listener.accept()?;
                        let sent = conn.write_all(&bytes);
                        drop(conn);
                        match sent {
                            Ok(()) => reply(&mut out, "226 Transfer complete")?,
                            Err(_) => reply(&mut out, "426 Connection closed; transfer aborted")?,
                        }
                    }
                }
            }
            "STOR" => {
                let Some(listener) = passive.take() else {
                    reply(&mut out, "425 Use PASV first")?;
                    continue;
                };
                let path = absolute(&cwd, &arg);
                if !state.lock().unwrap().dirs.contains(&parent(&path)) {
                    reply(&mut out, "550 No such directory")?;
                    continue;
                }
                reply(&mut out, "150 Ok to send data")?;
                let (mut conn, _) = listener.accept()?;
                let mut buf = Vec::new();
                conn.read_to_end(&mut buf)?;
                state.lock().unwrap().files.insert(path, buf);
                reply(&mut out, "226 Transfer complete")?;
            }
            _ => reply(&mut out, "502 Command not implemented")?,
        }
    }
}
