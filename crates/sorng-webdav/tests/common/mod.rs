//! In-process WebDAV server answering one request per connection. It
//! understands enough RFC 4918 for the backend tests and records every
//! request as `METHOD /decoded/path`.

#![allow(dead_code)]

use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use sorng_remotefs::{
    BackendFactory, Collaborators, Credentials, Host, LogListener, Protocol, Session,
};
use sorng_webdav::WebDavBackendFactory;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// `alice:secret`
const AUTH: &str = "Basic YWxpY2U6c2VjcmV0";
pub const MODIFIED: &str = "Tue, 02 Jan 2024 03:04:05 GMT";

pub struct FakeDav {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub requests: Vec<String>,
    /// Answer ranged GETs with the whole body.
    pub ignore_range: bool,
    /// Last `Range` header seen.
    pub last_range: Option<String>,
    /// Answer every PUT with this status before reading its body.
    pub reject_put: Option<u16>,
}

impl Default for FakeDav {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            dirs: ["/"].iter().map(|d| d.to_string()).collect(),
            requests: Vec::new(),
            ignore_range: false,
            last_range: None,
            reject_put: None,
        }
    }
}

impl FakeDav {
    pub fn file(&mut self, path: &str, data: &[u8]) {
        self.files.insert(path.to_string(), data.to_vec());
    }

    pub fn dir(&mut self, path: &str) {
        self.dirs.insert(path.to_string());
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
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
            .map(|d| (d.clone(), None))
            .collect();
        out.extend(
            self.files
                .iter()
                .filter(|(p, _)| direct(p))
                .map(|(p, data)| (p.clone(), Some(data.len()))),
        );
        out
    }

    fn remove_tree(&mut self, path: &str) {
        let prefix = format!("{}/", path);
        self.files.retain(|p, _| p != path && !p.starts_with(&prefix));
        self.dirs.retain(|p| p != path && !p.starts_with(&prefix));
    }

    fn move_tree(&mut self, from: &str, to: &str) {
        let prefix = format!("{}/", from);
        let rebase = |p: &str| format!("{}{}", to, &p[from.len()..]);
        let files: Vec<(String, Vec<u8>)> = self
            .files
            .iter()
            .filter(|(p, _)| *p == from || p.starts_with(&prefix))
            .map(|(p, d)| (rebase(p), d.clone()))
            .collect();
        let dirs: Vec<String> = self
            .dirs
            .iter()
            .filter(|p| *p == from || p.starts_with(&prefix))
            .map(|p| rebase(p))
            .collect();
        self.remove_tree(from);
        self.files.extend(files);
        self.dirs.extend(dirs);
    }
}

pub type Shared = Arc<Mutex<FakeDav>>;

pub fn shared(setup: impl FnOnce(&mut FakeDav)) -> Shared {
    let mut state = FakeDav::default();
    setup(&mut state);
    Arc::new(Mutex::new(state))
}

pub fn requests(state: &Shared) -> Vec<String> {
    state.lock().unwrap().requests.clone()
}

pub fn count(state: &Shared, prefix: &str) -> usize {
    requests(state).iter().filter(|r| r.starts_with(prefix)).count()
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

pub fn host(port: u16, password: &str) -> Host {
    let mut host = Host::new(Protocol::WebDav, "127.0.0.1")
        .with_port(port)
        .with_credentials(Credentials::new("alice", password));
    host.connect_timeout_sec = 5;
    host.data_timeout_sec = 5;
    host
}

pub fn session_for(host: Host) -> Arc<Session> {
    let backend = WebDavBackendFactory::new()
        .create(&host, Arc::new(LogListener))
        .unwrap();
    Session::new(host, backend, Collaborators::default())
}

pub async fn connected(state: &Shared) -> Arc<Session> {
    let port = spawn_server(state.clone()).await;
    session_for(host(port, "secret"))
}

// ─── Server ──────────────────────────────────────────────────────────

struct Request {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn decode_path(target: &str) -> String {
    let raw = target.split('?').next().unwrap_or("/");
    let decoded = percent_decode_str(raw).decode_utf8_lossy().to_string();
    let trimmed = decoded.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn href(path: &str, collection: bool) -> String {
    let mut out: String = path
        .split('/')
        .map(|seg| utf8_percent_encode(seg, NON_ALPHANUMERIC).to_string())
        .collect::<Vec<_>>()
        .join("/");
    if collection && !out.ends_with('/') {
        out.push('/');
    }
    out
}

async fn read_request(reader: &mut BufReader<TcpStream>, state: &Shared) -> Option<Request> {
    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = decode_path(parts.next()?);

    let mut headers = Vec::new();
    loop {
        let mut h = String::new();
        reader.read_line(&mut h).await.ok()?;
        let h = h.trim_end();
        if h.is_empty() {
            break;
        }
        if let Some((n, v)) = h.split_once(':') {
            headers.push((n.trim().to_string(), v.trim().to_string()));
        }
    }

    let mut req = Request {
        method,
        path,
        headers,
        body: Vec::new(),
    };
    if req.method == "PUT" && state.lock().unwrap().reject_put.is_some() {
        return Some(req);
    }
    if let Some(len) = req.header("content-length").and_then(|l| l.parse::<usize>().ok()) {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await.ok()?;
        req.body = body;
    } else if req
        .header("transfer-encoding")
        .map_or(false, |t| t.eq_ignore_ascii_case("chunked"))
    {
        loop {
            let mut size_line = String::new();
            reader.read_line(&mut size_line).await.ok()?;
            let size = usize::from_str_radix(size_line.trim().split(';').next()?, 16).ok()?;
            let mut chunk = vec![0u8; size + 2];
            reader.read_exact(&mut chunk).await.ok()?;
            if size == 0 {
                break;
            }
            req.body.extend_from_slice(&chunk[..size]);
        }
    }
    Some(req)
}

struct Reply {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

fn reply(status: u16) -> Reply {
    Reply {
        status,
        headers: Vec::new(),
        body: Vec::new(),
    }
}

async fn serve(sock: TcpStream, state: Shared) {
    let mut reader = BufReader::new(sock);
    let Some(req) = read_request(&mut reader, &state).await else {
        return;
    };
    state
        .lock()
        .unwrap()
        .requests
        .push(format!("{} {}", req.method, req.path));

    let rejected = state.lock().unwrap().reject_put.filter(|_| req.method == "PUT");
    let out = if req.header("authorization") != Some(AUTH) {
        let mut r = reply(401);
        r.headers.push(("WWW-Authenticate", "Basic realm=\"fake\"".into()));
        r
    } else if let Some(status) = rejected {
        reply(status)
    } else {
        handle(&state, &req)
    };

    let mut head = format!(
        "HTTP/1.1 {} Fake\r\nContent-Length: {}\r\nConnection: close\r\n",
        out.status,
        out.body.len()
    );
    for (n, v) in &out.headers {
        head.push_str(&format!("{}: {}\r\n", n, v));
    }
    head.push_str("\r\n");
    let sock = reader.get_mut();
    let _ = sock.write_all(head.as_bytes()).await;
    let _ = sock.write_all(&out.body).await;
    let _ = sock.shutdown().await;
    if rejected.is_some() {
        // swallow the unread body so the client sees the reply, not a reset
        let mut sink = vec![0u8; 64 * 1024];
        let drain = async {
            while let Ok(n) = reader.read(&mut sink).await {
                if n == 0 {
                    break;
                }
            }
        };
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), drain).await;
    }
}

fn handle(state: &Shared, req: &Request) -> Reply {
    let mut s = state.lock().unwrap();
    let path = req.path.clone();
    let parent = match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    };

    match req.method.as_str() {
        "PROPFIND" => {
            let depth_one = req.header("depth") == Some("1");
            let mut items: Vec<(String, Option<usize>)> = if s.dirs.contains(&path) {
                vec![(path.clone(), None)]
            } else if let Some(data) = s.files.get(&path) {
                vec![(path.clone(), Some(data.len()))]
            } else {
                return reply(404);
            };
            if depth_one && s.dirs.contains(&path) {
                items.extend(s.children(&path));
            }
            let mut xml = String::from(
                "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<D:multistatus xmlns:D=\"DAV:\">\n",
            );
            for (p, size) in items {
                let props = match size {
                    None => "<D:resourcetype><D:collection/></D:resourcetype>".to_string(),
                    Some(n) => format!(
                        "<D:resourcetype/><D:getcontentlength>{}</D:getcontentlength>",
                        n
                    ),
                };
                xml.push_str(&format!(
                    "<D:response><D:href>{}</D:href><D:propstat><D:prop>{}\
                     <D:getlastmodified>{}</D:getlastmodified></D:prop>\
                     <D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>\n",
                    href(&p, size.is_none()),
                    props,
                    MODIFIED
                ));
            }
            xml.push_str("</D:multistatus>\n");
            let mut r = reply(207);
            r.headers
                .push(("Content-Type", "application/xml; charset=utf-8".into()));
            r.body = xml.into_bytes();
            r
        }
        "GET" => {
            let Some(data) = s.files.get(&path).cloned() else {
                return reply(404);
            };
            let range = req.header("range").map(str::to_string);
            s.last_range = range.clone();
            let start = range
                .as_deref()
                .and_then(|r| r.strip_prefix("bytes="))
                .and_then(|r| r.trim_end_matches('-').parse::<usize>().ok());
            match start {
                Some(_) if s.ignore_range => {
                    let mut r = reply(200);
                    r.body = data;
                    r
                }
                Some(n) if n >= data.len() => reply(416),
                Some(n) => {
                    let mut r = reply(206);
                    r.headers.push((
                        "Content-Range",
                        format!("bytes {}-{}/{}", n, data.len() - 1, data.len()),
                    ));
                    r.body = data[n..].to_vec();
                    r
                }
                None => {
                    let mut r = reply(200);
                    r.body = data;
                    r
                }
            }
        }
        "PUT" => {
            if !s.dirs.contains(&parent) {
                return reply(409);
            }
            let created = !s.files.contains_key(&path);
            s.files.insert(path, req.body.clone());
            reply(if created { 201 } else { 204 })
        }
        "MKCOL" => {
            if s.exists(&path) {
                reply(405)
            } else if !s.dirs.contains(&parent) {
                reply(409)
            } else {
                s.dirs.insert(path);
                reply(201)
            }
        }
        "DELETE" => {
            if !s.exists(&path) {
                return reply(404);
            }
            s.remove_tree(&path);
            reply(204)
        }
        "MOVE" => {
            let Some(dest) = req
                .header("destination")
                .and_then(|d| url::Url::parse(d).ok())
                .map(|u| decode_path(u.path()))
            else {
                return reply(400);
            };
            if !s.exists(&path) {
                return reply(404);
            }
            if s.exists(&dest) && req.header("overwrite") == Some("F") {
                return reply(412);
            }
            s.move_tree(&path, &dest);
            reply(201)
        }
        _ => reply(405),
    }
}
