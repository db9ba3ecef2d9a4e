/*
 * This file is a part of Arn
 */

//! The error taxonomy used across the crate (see the error handling design
//! section of the expanded spec). `ArnError` is a flat `{kind, origin, dmsg}`
//! triple rather than a tree of per-module error types: every subsystem
//! classifies its failures into one of [`ErrorKind`]'s variants and attaches
//! its own [`Subsystem`] tag and an optional human-readable `dmsg`.

use core::fmt;

pub type ArnResult<T> = Result<T, ArnError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorKind {
    /// operation attempted on a closed handle
    NotOpen,
    /// invalid path or bad template passed to a constructor
    CreateError,
    /// attempted to assign a value to a folder link
    AssignToFolder,
    /// bind/connect/accept failure
    ConnectionError,
    /// malformed frame or an operation forbidden by the protocol
    Protocol,
    /// missing allow bits for the requested operation
    NotAuthorized,
    /// resolve/lookup/dependency-refresh exceeded its deadline
    Timeout,
    /// underlying I/O failure
    Io,
    /// malformed or inconsistent configuration
    Config,
    /// informational / warning / unclassified diagnostic
    Info,
    Warning,
    Undef,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotOpen => "item not open",
            Self::CreateError => "bad path or template",
            Self::AssignToFolder => "cannot assign a value to a folder",
            Self::ConnectionError => "connection error",
            Self::Protocol => "protocol error",
            Self::NotAuthorized => "not authorized",
            Self::Timeout => "timed out",
            Self::Io => "i/o error",
            Self::Config => "configuration error",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Undef => "undefined error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Tree,
    Handle,
    Monitor,
    Pipe,
    Net,
    Auth,
    Depend,
    Persist,
    Config,
    Discovery,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::Handle => "handle",
            Self::Monitor => "monitor",
            Self::Pipe => "pipe",
            Self::Net => "net",
            Self::Auth => "auth",
            Self::Depend => "depend",
            Self::Persist => "persist",
            Self::Config => "config",
            Self::Discovery => "discovery",
        }
    }
}

#[derive(Debug)]
pub struct ArnError {
    kind: ErrorKind,
    origin: Option<Subsystem>,
    dmsg: Option<String>,
}

impl ArnError {
    pub fn with_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            origin: None,
            dmsg: None,
        }
    }
    pub fn new(kind: ErrorKind, origin: Subsystem, dmsg: impl Into<String>) -> Self {
        Self {
            kind,
            origin: Some(origin),
            dmsg: Some(dmsg.into()),
        }
    }
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
    pub fn origin(&self) -> Option<Subsystem> {
        self.origin
    }
}

impl fmt::Display for ArnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            Some(origin) => write!(f, "{} error: ", origin.as_str())?,
            None => write!(f, "error: ")?,
        }
        if let Some(dmsg) = self.dmsg.as_ref() {
            write!(f, "{dmsg}; ")?;
        }
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for ArnError {}

impl From<std::io::Error> for ArnError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, Subsystem::Net, e.to_string())
    }
}

impl From<serde_yaml::Error> for ArnError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::new(ErrorKind::Config, Subsystem::Config, e.to_string())
    }
}

/// Tag a `Result`'s error with an origin/dmsg at the call site, without the
/// thread-local context inheritance the teacher's `fractal::error` carries
/// (see DESIGN.md for why that was simplified away).
pub trait ErrorContext<T> {
    fn set_origin(self, origin: Subsystem) -> ArnResult<T>;
    fn set_dmsg(self, dmsg: impl Into<String>) -> ArnResult<T>;
}

impl<T, E: Into<ArnError>> ErrorContext<T> for Result<T, E> {
    fn set_origin(self, origin: Subsystem) -> ArnResult<T> {
        self.map_err(|e| {
            let mut e: ArnError = e.into();
            e.origin = Some(origin);
            e
        })
    }
    fn set_dmsg(self, dmsg: impl Into<String>) -> ArnResult<T> {
        let dmsg = dmsg.into();
        self.map_err(|e| {
            let mut e: ArnError = e.into();
            e.dmsg = Some(dmsg);
            e
        })
    }
}
