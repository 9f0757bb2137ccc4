#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Mock MPD for testing
//!
//! Speaks enough of the MPD text protocol for the player client: queue
//! editing, transport, volume and status.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub const GREETING: &str = "OK MPD 0.23.5\n";

/// One queue entry
#[derive(Debug, Clone)]
pub struct MockSong {
    pub id: u32,
    pub file: String,
    pub tags: Vec<(String, String)>,
}

impl MockSong {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Mock MPD state
#[derive(Debug, Clone)]
pub struct MockMpdState {
    pub queue: Vec<MockSong>,
    pub next_id: u32,
    pub playlist_version: u32,
    pub state: &'static str, // "stop", "play" or "pause"
    pub current: Option<usize>,
    pub elapsed: f64,
    /// kbit/s reported while playing
    pub bitrate: u32,
    /// -1 means no mixer
    pub volume: i32,
    pub repeat: bool,
    pub random: bool,
    pub single: bool,
    pub consume: bool,
    pub addtagid: bool,
    pub password: Option<String>,
    /// Every command line received, in order
    pub log: Vec<String>,
    /// Close the connection instead of answering this many commands
    pub pending_drops: usize,
    pub connections: usize,
}

impl Default for MockMpdState {
    fn default() -> Self {
        Self {
            queue: Vec::new(),
            next_id: 1,
            playlist_version: 1,
            state: "stop",
            current: None,
            elapsed: 0.0,
            bitrate: 1411,
            volume: 50,
            repeat: false,
            random: false,
            single: false,
            consume: false,
            addtagid: true,
            password: None,
            log: Vec::new(),
            pending_drops: 0,
            connections: 0,
        }
    }
}

impl MockMpdState {
    fn bump(&mut self) {
        self.playlist_version += 1;
    }

    fn position_of(&self, id: u32) -> Option<usize> {
        self.queue.iter().position(|s| s.id == id)
    }

    fn song_record(&self, pos: usize) -> String {
        let song = &self.queue[pos];
        let mut out = format!("file: {}\n", song.file);
        for (k, v) in &song.tags {
            out.push_str(&format!("{}: {}\n", k, v));
        }
        out.push_str(&format!("Pos: {}\nId: {}\n", pos, song.id));
        out
    }

    fn remove_at(&mut self, pos: usize) {
        self.queue.remove(pos);
        match self.current {
            Some(cur) if cur == pos => {
                self.current = None;
                self.state = "stop";
            }
            Some(cur) if cur > pos => self.current = Some(cur - 1),
            _ => {}
        }
        self.bump();
    }
}

/// Mock MPD server
pub struct MockMpdServer {
    addr: SocketAddr,
    state: Arc<RwLock<MockMpdState>>,
    handle: JoinHandle<()>,
}

impl MockMpdServer {
    /// Start a mock MPD server on a random port
    pub async fn start() -> Self {
        let state = Arc::new(RwLock::new(MockMpdState::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state_clone = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let state = state_clone.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, state).await;
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn snapshot(&self) -> MockMpdState {
        self.state.read().await.clone()
    }

    /// Queue entries as (id, file)
    pub async fn queue(&self) -> Vec<(u32, String)> {
        self.state
            .read()
            .await
            .queue
            .iter()
            .map(|s| (s.id, s.file.clone()))
            .collect()
    }

    /// Append songs to the queue, returning their ids
    pub async fn add_songs(&self, files: &[&str]) -> Vec<u32> {
        let mut state = self.state.write().await;
        let mut ids = Vec::new();
        for file in files {
            let id = state.next_id;
            state.next_id += 1;
            state.queue.push(MockSong {
                id,
                file: file.to_string(),
                tags: vec![("Title".to_string(), format!("Title of {}", file))],
            });
            ids.push(id);
        }
        state.bump();
        ids
    }

    pub async fn set_playing(&self, pos: usize, elapsed: f64) {
        let mut state = self.state.write().await;
        state.current = Some(pos);
        state.state = "play";
        state.elapsed = elapsed;
    }

    pub async fn set_bitrate(&self, kbit: u32) {
        self.state.write().await.bitrate = kbit;
    }

    pub async fn set_volume(&self, volume: i32) {
        self.state.write().await.volume = volume;
    }

    pub async fn set_addtagid(&self, on: bool) {
        self.state.write().await.addtagid = on;
    }

    pub async fn set_password(&self, password: &str) {
        self.state.write().await.password = Some(password.to_string());
    }

    /// Close the connection on the next `count` commands
    pub async fn drop_next(&self, count: usize) {
        self.state.write().await.pending_drops = count;
    }

    /// Received command names, without arguments
    pub async fn command_names(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .log
            .iter()
            .map(|l| l.split_whitespace().next().unwrap_or("").to_string())
            .collect()
    }

    pub async fn clear_log(&self) {
        self.state.write().await.log.clear();
    }

    /// Stop the mock server
    pub async fn stop(self) {
        self.handle.abort();
    }
}

/// Handle a single TCP connection
async fn handle_connection(stream: TcpStream, state: Arc<RwLock<MockMpdState>>) {
    state.write().await.connections += 1;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    if writer.write_all(GREETING.as_bytes()).await.is_err() {
        return;
    }
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let command = line.trim_end().to_string();
                {
                    let mut st = state.write().await;
                    st.log.push(command.clone());
                    if st.pending_drops > 0 {
                        st.pending_drops -= 1;
                        break;
                    }
                }
                if command == "close" {
                    break;
                }
                let response = process_command(&command, &state).await;
                if writer.write_all(response.as_bytes()).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

/// Split a command line into its name and unquoted arguments
pub fn tokenize(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c == ' ' {
            chars.next();
            continue;
        }
        let mut word = String::new();
        if c == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            word.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => word.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                word.push(c);
                chars.next();
            }
        }
        words.push(word);
    }
    words
}

fn ack(code: u32, command: &str, message: &str) -> String {
    format!("ACK [{}@0] {{{}}} {}\n", code, command, message)
}

fn no_exist(command: &str) -> String {
    ack(50, command, "No such song")
}

fn bad_arg(command: &str) -> String {
    ack(2, command, "Bad song index")
}

fn parse_flag(arg: Option<&String>) -> bool {
    arg.map(|a| a == "1").unwrap_or(false)
}

/// Process a command and return the full response
async fn process_command(command: &str, state: &Arc<RwLock<MockMpdState>>) -> String {
    let words = tokenize(command);
    let Some(name) = words.first().map(String::as_str) else {
        return ack(5, "", "No command given");
    };
    let args = &words[1..];
    let arg_u32 = |i: usize| args.get(i).and_then(|a| a.parse::<u32>().ok());
    let mut st = state.write().await;

    let body = match name {
        "password" => {
            if st.password.as_deref() == args.first().map(String::as_str) {
                String::new()
            } else {
                return ack(3, name, "incorrect password");
            }
        }
        "commands" => {
            let mut out = String::new();
            for cmd in ["addid", "clear", "deleteid", "play", "playid", "status"] {
                out.push_str(&format!("command: {}\n", cmd));
            }
            if st.addtagid {
                out.push_str("command: addtagid\n");
            }
            out
        }
        "status" => {
            let mut out = String::new();
            if st.volume >= 0 {
                out.push_str(&format!("volume: {}\n", st.volume));
            }
            out.push_str(&format!(
                "repeat: {}\nrandom: {}\nsingle: {}\nconsume: {}\n",
                st.repeat as u8, st.random as u8, st.single as u8, st.consume as u8
            ));
            out.push_str(&format!(
                "playlist: {}\nplaylistlength: {}\nstate: {}\n",
                st.playlist_version,
                st.queue.len(),
                st.state
            ));
            if let Some(cur) = st.current.filter(|&c| c < st.queue.len()) {
                out.push_str(&format!("song: {}\nsongid: {}\n", cur, st.queue[cur].id));
                if st.state != "stop" {
                    out.push_str(&format!(
                        "elapsed: {:.3}\nduration: 240.000\nbitrate: {}\naudio: 44100:16:2\n",
                        st.elapsed, st.bitrate
                    ));
                }
            }
            out
        }
        "currentsong" => match st.current.filter(|&c| c < st.queue.len()) {
            Some(cur) => st.song_record(cur),
            None => String::new(),
        },
        "playlistinfo" => match args.first() {
            Some(_) => match arg_u32(0).map(|p| p as usize) {
                Some(pos) if pos < st.queue.len() => st.song_record(pos),
                _ => return bad_arg(name),
            },
            None => (0..st.queue.len()).map(|p| st.song_record(p)).collect(),
        },
        "playlistid" => match arg_u32(0).and_then(|id| st.position_of(id)) {
            Some(pos) => st.song_record(pos),
            None => return no_exist(name),
        },
        "addid" => {
            let Some(uri) = args.first().cloned() else {
                return ack(2, name, "missing argument");
            };
            let pos = match args.get(1) {
                Some(_) => match arg_u32(1).map(|p| p as usize) {
                    Some(pos) if pos <= st.queue.len() => pos,
                    _ => return bad_arg(name),
                },
                None => st.queue.len(),
            };
            let id = st.next_id;
            st.next_id += 1;
            st.queue.insert(
                pos,
                MockSong {
                    id,
                    file: uri,
                    tags: Vec::new(),
                },
            );
            if let Some(cur) = st.current {
                if cur >= pos {
                    st.current = Some(cur + 1);
                }
            }
            st.bump();
            format!("Id: {}\n", id)
        }
        "addtagid" => {
            if !st.addtagid {
                return ack(5, name, "unknown command \"addtagid\"");
            }
            let (Some(pos), Some(tag), Some(value)) =
                (arg_u32(0).and_then(|id| st.position_of(id)), args.get(1), args.get(2))
            else {
                return no_exist(name);
            };
            st.queue[pos].tags.push((tag.clone(), value.clone()));
            st.bump();
            String::new()
        }
        "deleteid" => match arg_u32(0).and_then(|id| st.position_of(id)) {
            Some(pos) => {
                st.remove_at(pos);
                String::new()
            }
            None => return no_exist(name),
        },
        "delete" => {
            let range = args.first().cloned().unwrap_or_default();
            let (start, end) = match range.split_once(':') {
                Some((a, b)) => (a.parse::<usize>().ok(), b.parse::<usize>().ok()),
                None => (range.parse::<usize>().ok(), range.parse::<usize>().ok().map(|p| p + 1)),
            };
            match (start, end) {
                (Some(start), Some(end)) if start <= end && end <= st.queue.len() => {
                    for pos in (start..end).rev() {
                        st.remove_at(pos);
                    }
                    String::new()
                }
                _ => return bad_arg(name),
            }
        }
        "clear" => {
            st.queue.clear();
            st.current = None;
            st.state = "stop";
            st.bump();
            String::new()
        }
        "play" => {
            let pos = match args.first() {
                Some(_) => match arg_u32(0).map(|p| p as usize) {
                    Some(pos) if pos < st.queue.len() => Some(pos),
                    _ => return bad_arg(name),
                },
                None => st.current.or(if st.queue.is_empty() { None } else { Some(0) }),
            };
            if let Some(pos) = pos {
                if st.current != Some(pos) {
                    st.elapsed = 0.0;
                }
                st.current = Some(pos);
                st.state = "play";
            }
            String::new()
        }
        "playid" => match arg_u32(0).and_then(|id| st.position_of(id)) {
            Some(pos) => {
                st.current = Some(pos);
                st.elapsed = 0.0;
                st.state = "play";
                String::new()
            }
            None => return no_exist(name),
        },
        "pause" => {
            if st.state != "stop" {
                let on = match args.first() {
                    Some(a) => a == "1",
                    None => st.state == "play",
                };
                st.state = if on { "pause" } else { "play" };
            }
            String::new()
        }
        "stop" => {
            st.state = "stop";
            String::new()
        }
        "next" | "previous" => {
            if let Some(cur) = st.current {
                let target = if name == "next" {
                    cur + 1
                } else {
                    cur.saturating_sub(1)
                };
                if target < st.queue.len() {
                    st.current = Some(target);
                    st.elapsed = 0.0;
                } else {
                    st.current = None;
                    st.state = "stop";
                }
            }
            String::new()
        }
        "seek" => match (arg_u32(0).map(|p| p as usize), arg_u32(1)) {
            (Some(pos), Some(secs)) if pos < st.queue.len() => {
                st.current = Some(pos);
                st.elapsed = secs as f64;
                String::new()
            }
            _ => return bad_arg(name),
        },
        "setvol" => {
            if st.volume < 0 {
                return ack(52, name, "problems setting volume");
            }
            match arg_u32(0) {
                Some(v) if v <= 100 => {
                    st.volume = v as i32;
                    String::new()
                }
                _ => return ack(2, name, "Invalid volume value"),
            }
        }
        "repeat" => {
            st.repeat = parse_flag(args.first());
            String::new()
        }
        "random" => {
            st.random = parse_flag(args.first());
            String::new()
        }
        "single" => {
            st.single = parse_flag(args.first());
            String::new()
        }
        "consume" => {
            st.consume = parse_flag(args.first());
            String::new()
        }
        _ => return ack(5, name, &format!("unknown command \"{}\"", name)),
    };

    format!("{}OK\n", body)
}
