//! In-process FTP server speaking just enough RFC 959 / 3659 for the
//! backend tests. Every received command is recorded.

#![allow(dead_code)]

use sorng_ftp::FtpBackendFactory;
use sorng_remotefs::{
    BackendFactory, Collaborators, Credentials, Host, LogListener, Protocol, Session,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

pub struct FakeState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub commands: Vec<String>,
    pub features: Vec<String>,
    pub password: String,
    pub workdir: String,
    /// Pace RETR data so a transfer stays in flight.
    pub slow_data: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            dirs: ["/", "/home"].iter().map(|d| d.to_string()).collect(),
            commands: Vec::new(),
            features: ["MDTM", "SIZE", "REST STREAM", "UTF8", "MFMT", "EPSV"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
            password: "secret".into(),
            workdir: "/home".into(),
            slow_data: false,
        }
    }
}

impl FakeState {
    pub fn file(&mut self, path: &str, data: &[u8]) {
        self.files.insert(path.to_string(), data.to_vec());
    }

    pub fn dir(&mut self, path: &str) {
        self.dirs.insert(path.to_string());
    }

    fn children(&self, dir: &str) -> Vec<(String, Option<usize>)> {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
        let direct = |p: &String| {
            p.starts_with(&prefix) && p.len() > prefix.len() && !p[prefix.len()..].contains('/')
        };
        let mut out: Vec<(String, Option<usize>)> = self
            .dirs
            .iter()
            .filter(|d| direct(d))
            .map(|d| (d[prefix.len()..].to_string(), None))
            .collect();
        out.extend(
            self.files
                .iter()
                .filter(|(p, _)| direct(p))
                .map(|(p, data)| (p[prefix.len()..].to_string(), Some(data.len()))),
        );
        out
    }
}

pub type Shared = Arc<Mutex<FakeState>>;

pub fn shared(setup: impl FnOnce(&mut FakeState)) -> Shared {
    let mut state = FakeState::default();
    setup(&mut state);
    Arc::new(Mutex::new(state))
}

pub fn commands(state: &Shared) -> Vec<String> {
    state.lock().unwrap().commands.clone()
}

pub fn count(state: &Shared, prefix: &str) -> usize {
    commands(state).iter().filter(|c| c.starts_with(prefix)).count()
}

pub fn file(state: &Shared, path: &str) -> Option<Vec<u8>> {
    state.lock().unwrap().files.get(path).cloned()
}

pub async fn spawn_server(state: Shared) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((sock, _)) = listener.accept().await {
            tokio::spawn(serve(sock, state.clone()));
        }
    });
    port
}

pub fn host(port: u16) -> Host {
    let mut host = Host::new(Protocol::Ftp, "127.0.0.1")
        .with_port(port)
        .with_credentials(Credentials::new("alice", "secret"));
    host.connect_timeout_sec = 5;
    host.data_timeout_sec = 5;
    host
}

pub fn session_for(host: Host) -> Arc<Session> {
    let backend = FtpBackendFactory::new()
        .create(&host, Arc::new(LogListener))
        .unwrap();
    Session::new(host, backend, Collaborators::default())
}

pub async fn connected(state: &Shared) -> Arc<Session> {
    let port = spawn_server(state.clone()).await;
    session_for(host(port))
}

// ─── Server ──────────────────────────────────────────────────────────

type Control = Arc<AsyncMutex<OwnedWriteHalf>>;

async fn reply(ctl: &Control, text: &str) {
    let mut w = ctl.lock().await;
    let _ = w.write_all(format!("{}\r\n", text).as_bytes()).await;
}

struct Conn {
    state: Shared,
    ctl: Control,
    data: Option<TcpListener>,
    rest: u64,
    rename_from: Option<String>,
    transfer: Option<(JoinHandle<()>, Arc<AtomicBool>)>,
}

async fn serve(sock: TcpStream, state: Shared) {
    let (rd, wr) = sock.into_split();
    let ctl: Control = Arc::new(AsyncMutex::new(wr));
    let mut lines = BufReader::new(rd).lines();
    reply(&ctl, "220-fake FTP").await;
    reply(&ctl, "220 ready").await;

    let mut conn = Conn {
        state,
        ctl,
        data: None,
        rest: 0,
        rename_from: None,
        transfer: None,
    };
    while let Ok(Some(line)) = lines.next_line().await {
        conn.state.lock().unwrap().commands.push(line.clone());
        if !conn.handle(&line).await {
            break;
        }
    }
}

impl Conn {
    async fn say(&self, text: &str) {
        reply(&self.ctl, text).await;
    }

    async fn bind_data(&mut self) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        self.data = Some(listener);
        port
    }

    async fn accept_data(&mut self) -> Option<TcpStream> {
        let listener = self.data.take()?;
        tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .ok()?
            .ok()
            .map(|(s, _)| s)
    }

    async fn handle(&mut self, line: &str) -> bool {
        let (verb, arg) = line.split_once(' ').unwrap_or((line, ""));
        let arg = arg.to_string();
        match verb.to_uppercase().as_str() {
            "USER" => self.say("331 Password required").await,
            "PASS" => {
                let ok = self.state.lock().unwrap().password == arg;
                if ok {
                    self.say("230 Logged in").await
                } else {
                    self.say("530 Login incorrect").await
                }
            }
            "FEAT" => {
                let features = self.state.lock().unwrap().features.clone();
                self.say("211-Features:").await;
                for f in features {
                    self.say(&format!(" {}", f)).await;
                }
                self.say("211 End").await;
            }
            "OPTS" => self.say("200 UTF8 set to on").await,
            "SYST" => self.say("215 UNIX Type: L8").await,
            "PWD" => {
                let wd = self.state.lock().unwrap().workdir.clone();
                self.say(&format!("257 \"{}\" is the current directory", wd)).await
            }
            "TYPE" | "NOOP" => self.say("200 OK").await,
            "QUIT" => {
                self.say("221 Goodbye").await;
                return false;
            }
            "PASV" => {
                let port = self.bind_data().await;
                self.say(&format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{})",
                    port / 256,
                    port % 256
                ))
                .await
            }
            "EPSV" => {
                let port = self.bind_data().await;
                self.say(&format!("229 Entering Extended Passive Mode (|||{}|)", port))
                    .await
            }
            "REST" => {
                self.rest = arg.parse().unwrap_or(0);
                self.say("350 Restarting").await
            }
            "LIST" | "MLSD" => {
                let dir = arg.trim_start_matches("-a").trim().to_string();
                let body = {
                    let state = self.state.lock().unwrap();
                    if !state.dirs.contains(&dir) {
                        None
                    } else {
                        Some(render_listing(&state.children(&dir), verb == "MLSD"))
                    }
                };
                match body {
                    None => self.say("550 No such file or directory").await,
                    Some(body) => {
                        self.say("150 Here comes the directory listing").await;
                        if let Some(mut ds) = self.accept_data().await {
                            let _ = ds.write_all(body.as_bytes()).await;
                            let _ = ds.shutdown().await;
                        }
                        self.say("226 Directory send OK").await
                    }
                }
            }
            "RETR" => {
                let (data, slow) = {
                    let state = self.state.lock().unwrap();
                    (state.files.get(&arg).cloned(), state.slow_data)
                };
                let rest = std::mem::take(&mut self.rest) as usize;
                match data {
                    None => self.say("550 No such file or directory").await,
                    Some(data) => {
                        self.say("150 Opening BINARY mode data connection").await;
                        let ds = self.accept_data().await;
                        let ctl = self.ctl.clone();
                        let done = Arc::new(AtomicBool::new(false));
                        let finished = done.clone();
                        let task = tokio::spawn(async move {
                            let Some(mut ds) = ds else { return };
                            let tail = data.get(rest..).unwrap_or(&[]).to_vec();
                            for chunk in tail.chunks(4096) {
                                if ds.write_all(chunk).await.is_err() {
                                    return;
                                }
                                if slow {
                                    tokio::time::sleep(Duration::from_millis(5)).await;
                                }
                            }
                            let _ = ds.shutdown().await;
                            // reply and flag flip together so ABOR sees one or the other
                            let mut w = ctl.lock().await;
                            let _ = w.write_all(b"226 Transfer complete\r\n").await;
                            finished.store(true, Ordering::SeqCst);
                        });
                        self.transfer = Some((task, done));
                    }
                }
            }
            "STOR" | "APPE" => {
                let append = verb == "APPE";
                self.say("150 Ok to send data").await;
                let ds = self.accept_data().await;
                let state = self.state.clone();
                let ctl = self.ctl.clone();
                tokio::spawn(async move {
                    let mut received = Vec::new();
                    if let Some(mut ds) = ds {
                        let _ = ds.read_to_end(&mut received).await;
                    }
                    {
                        let mut state = state.lock().unwrap();
                        let entry = state.files.entry(arg).or_default();
                        if !append {
                            entry.clear();
                        }
                        entry.extend_from_slice(&received);
                    }
                    reply(&ctl, "226 Transfer complete").await;
                });
            }
            "ABOR" => {
                let mut w = self.ctl.lock().await;
                let text: &[u8] = match self.transfer.take() {
                    Some((task, done)) if !done.load(Ordering::SeqCst) => {
                        task.abort();
                        b"426 Transfer aborted\r\n226 ABOR successful\r\n"
                    }
                    // the transfer's 226 is already on the wire
                    Some(_) => b"226 ABOR successful\r\n",
                    None => b"225 No transfer to abort\r\n",
                };
                let _ = w.write_all(text).await;
            }
            "SIZE" => {
                let size = self.state.lock().unwrap().files.get(&arg).map(|d| d.len());
                match size {
                    Some(n) => self.say(&format!("213 {}", n)).await,
                    None => self.say("550 No such file or directory").await,
                }
            }
            "MDTM" => {
                let exists = self.state.lock().unwrap().files.contains_key(&arg);
                if exists {
                    self.say("213 20240102030405").await
                } else {
                    self.say("550 No such file or directory").await
                }
            }
            "MFMT" => self.say("213 Modify=20240102030405").await,
            "MKD" => {
                self.state.lock().unwrap().dirs.insert(arg.clone());
                self.say(&format!("257 \"{}\" created", arg)).await
            }
            "RMD" => {
                let removed = self.state.lock().unwrap().dirs.remove(&arg);
                if removed {
                    self.say("250 Directory removed").await
                } else {
                    self.say("550 No such file or directory").await
                }
            }
            "DELE" => {
                let removed = self.state.lock().unwrap().files.remove(&arg).is_some();
                if removed {
                    self.say("250 File deleted").await
                } else {
                    self.say("550 No such file or directory").await
                }
            }
            "RNFR" => {
                let exists = {
                    let state = self.state.lock().unwrap();
                    state.files.contains_key(&arg) || state.dirs.contains(&arg)
                };
                if exists {
                    self.rename_from = Some(arg);
                    self.say("350 Ready for RNTO").await
                } else {
                    self.say("550 No such file or directory").await
                }
            }
            "RNTO" => match self.rename_from.take() {
                Some(from) => {
                    {
                        let mut state = self.state.lock().unwrap();
                        if let Some(data) = state.files.remove(&from) {
                            state.files.insert(arg.clone(), data);
                        } else if state.dirs.remove(&from) {
                            state.dirs.insert(arg.clone());
                        }
                    }
                    self.say("250 Rename successful").await
                }
                None => self.say("503 RNFR required first").await,
            },
            "SITE" => self.say("200 SITE command successful").await,
            _ => self.say("502 Command not implemented").await,
        }
        true
    }
}

fn render_listing(children: &[(String, Option<usize>)], mlsd: bool) -> String {
    let mut out = String::new();
    for (name, size) in children {
        let line = match (mlsd, size) {
            (true, None) => format!("type=dir;modify=20240101000000;UNIX.mode=0755; {}", name),
            (true, Some(n)) => format!(
                "type=file;size={};modify=20240101000000;UNIX.mode=0644; {}",
                n, name
            ),
            (false, None) => format!("drwxr-xr-x   2 alice staff     4096 Jan  1  2024 {}", name),
            (false, Some(n)) => format!("-rw-r--r--   1 alice staff {:>8} Jan  1  2024 {}", n, name),
        };
        out.push_str(&line);
        out.push_str("\r\n");
    }
    out
}
