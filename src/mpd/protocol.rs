//! MPD text protocol: command encoding, response parsing, errors.
//!
//! A command is one line of space-separated words, arguments quoted. A
//! response is a run of `key: value` lines terminated by `OK`, or a single
//! `ACK [code@index] {command} message` line.

use std::fmt;
use thiserror::Error;

/// ACK error code reported for unknown ids/positions
pub const ACK_ERROR_NO_EXIST: u32 = 50;

#[derive(Debug, Error)]
pub enum MpdError {
    #[error("not connected to MPD")]
    NotConnected,
    #[error("connection closed by MPD")]
    Closed,
    #[error("MPD did not answer in time")]
    Timeout,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected response: {0}")]
    Protocol(String),
    #[error("MPD rejected {command}: {message} (code {code})")]
    Ack {
        code: u32,
        command: String,
        message: String,
    },
    #[error("no current song")]
    NoCurrentSong,
}

impl MpdError {
    /// True when the session is unusable and a reconnect may help.
    ///
    /// After a timeout or a garbled response the request/response stream is
    /// out of step, so those count as lost too.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            MpdError::NotConnected
                | MpdError::Closed
                | MpdError::Timeout
                | MpdError::Io(_)
                | MpdError::Protocol(_)
        )
    }
}

/// A protocol command ready to be written on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpdCommand {
    name: &'static str,
    args: Vec<String>,
}

impl MpdCommand {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Encoded line including the trailing newline
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for MpdCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        for arg in &self.args {
            write!(f, " \"{}\"", escape_arg(arg))?;
        }
        Ok(())
    }
}

fn escape_arg(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len());
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Encode a boolean the way MPD expects it
pub fn flag(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

/// Key/value pairs of one successful response, in wire order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pairs: Vec<(String, String)>,
}

impl Response {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// First value for `key` (keys compare case-insensitively)
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Split a multi-record response into records, each starting at a
    /// line whose key is `first_key`.
    pub fn split_records(&self, first_key: &str) -> Vec<Response> {
        let mut records: Vec<Response> = Vec::new();
        for (k, v) in &self.pairs {
            if k.eq_ignore_ascii_case(first_key) || records.is_empty() {
                records.push(Response::default());
            }
            if let Some(last) = records.last_mut() {
                last.pairs.push((k.clone(), v.clone()));
            }
        }
        records
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// One classified response line
#[derive(Debug, PartialEq)]
pub enum Line {
    Ok,
    Pair(String, String),
}

/// Classify one response line (without its newline).
pub fn parse_line(line: &str) -> Result<Line, MpdError> {
    if line == "OK" {
        return Ok(Line::Ok);
    }
    if line.starts_with("ACK ") {
        return Err(parse_ack(line));
    }
    match line.split_once(": ") {
        Some((key, value)) => Ok(Line::Pair(key.to_string(), value.to_string())),
        None => Err(MpdError::Protocol(line.to_string())),
    }
}

/// Decode `ACK [code@index] {command} message`.
pub fn parse_ack(line: &str) -> MpdError {
    let rest = line.trim_start_matches("ACK ").trim();
    let (code, rest) = match rest
        .strip_prefix('[')
        .and_then(|r| r.split_once(']'))
    {
        Some((inner, rest)) => {
            let code = inner
                .split('@')
                .next()
                .and_then(|c| c.parse().ok())
                .unwrap_or(0);
            (code, rest.trim_start())
        }
        None => (0, rest),
    };
    let (command, message) = match rest.strip_prefix('{').and_then(|r| r.split_once('}')) {
        Some((command, message)) => (command.to_string(), message.trim().to_string()),
        None => (String::new(), rest.to_string()),
    };
    MpdError::Ack {
        code,
        command,
        message,
    }
}

/// Parse the `OK MPD x.y.z` greeting into a version triple.
pub fn parse_greeting(line: &str) -> Result<(u32, u32, u32), MpdError> {
    let version = line
        .trim()
        .strip_prefix("OK MPD ")
        .ok_or_else(|| MpdError::Protocol(format!("bad greeting: {}", line.trim())))?;
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    Ok((
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    ))
}
