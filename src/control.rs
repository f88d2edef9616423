//! Client for the sensor controller's Unix domain control socket.

use std::fmt;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use log::debug;

/// Tried in order until one accepts the connection.
pub const SOCKET_PATHS: [&str; 4] = [
    "/tmp/sensor_ctrl.sock",
    "/run/sensor_ctrl.sock",
    "./sensor_ctrl.sock",
    "sensor_ctrl.sock",
];

/// Largest reply read back from the controller.
pub const MAX_REPLY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Status,
    SetRate(String),
}

impl Command {
    /// Parses command line words, e.g. `["SET_RATE", "10000"]`.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self, Error> {
        let name = args.first().ok_or(Error::MissingCommand)?.as_ref();
        match name {
            "START" => Ok(Command::Start),
            "STOP" => Ok(Command::Stop),
            "STATUS" => Ok(Command::Status),
            "SET_RATE" => args
                .get(1)
                .map(|value| Command::SetRate(value.as_ref().to_string()))
                .ok_or(Error::MissingRate),
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start => write!(f, "START"),
            Command::Stop => write!(f, "STOP"),
            Command::Status => write!(f, "STATUS"),
            Command::SetRate(value) => write!(f, "SET_RATE {}", value),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no command given")]
    MissingCommand,

    #[error("SET_RATE requires a value")]
    MissingRate,

    #[error("unknown command {0} (expected START, STOP, STATUS or SET_RATE <value>)")]
    UnknownCommand(String),

    #[error("no sensor controller socket answered (tried {tried}); last error: {last}")]
    Unreachable { tried: String, last: String },
}

fn describe(path: &Path, err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => format!("socket not found at {}", path.display()),
        io::ErrorKind::ConnectionRefused => format!("connection refused to {}", path.display()),
        _ => format!("error connecting to {}: {}", path.display(), err),
    }
}

fn exchange(stream: &mut UnixStream, command: &Command) -> io::Result<String> {
    stream.write_all(format!("{}\n", command).as_bytes())?;
    let mut reply = vec![0u8; MAX_REPLY];
    let n = stream.read(&mut reply)?;
    reply.truncate(n);
    Ok(String::from_utf8_lossy(&reply).into_owned())
}

/// Sends `command` to the first reachable socket in `paths` and returns the
/// reply.
pub fn send<P: AsRef<Path>>(paths: &[P], command: &Command) -> Result<String, Error> {
    let mut last = String::from("no socket paths given");
    for path in paths {
        let path = path.as_ref();
        let mut stream = match UnixStream::connect(path) {
            Ok(stream) => stream,
            Err(e) => {
                last = describe(path, &e);
                debug!("{}", last);
                continue;
            }
        };

        match exchange(&mut stream, command) {
            Ok(reply) => return Ok(reply),
            Err(e) => {
                last = format!("error talking to {}: {}", path.display(), e);
                debug!("{}", last);
            }
        }
    }

    Err(Error::Unreachable {
        tried: paths
            .iter()
            .map(|p| p.as_ref().display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
        last,
    })
}

pub fn default_paths() -> Vec<PathBuf> {
    SOCKET_PATHS.iter().map(PathBuf::from).collect()
}
