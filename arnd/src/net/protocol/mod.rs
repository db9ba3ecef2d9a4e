/*
 * This file is a part of Arn
 */

//! Frame parsing for the sync protocol (§4.6.2). Each frame is one line; the
//! wire representation is produced/consumed through [`crate::net::xstring`].

pub mod handshake;
pub mod session;

use crate::net::xstring::XStringMap;
use crate::tree::{Mode, Path, SyncMode, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Ver { major: u32, minor: u32, info: String },
    WhoIAm(XStringMap),
    /// Sent by the server right after `whoIAm` when this peer does not need
    /// to authenticate (§4.6.1 step 3), so the client never blind-reads a
    /// `LoginChallenge` that isn't coming.
    LoginNotRequired,
    LoginChallenge { salt: String },
    LoginResponse { user: String, hash: String },
    Sync { path: Path, id: u64, mode: Mode, smode: SyncMode },
    SyncR { peer_id: u64, rid: u64 },
    Set { id: u64, value: Value },
    Pipe { id: u64, value: Value, seq: Option<u32> },
    Mode { id: u64, mode: Mode },
    Del { path: Path },
    NoKill,
    Msg { kind: String, data: Vec<u8> },
    Err { code: u32, text: String },
}

impl Frame {
    pub fn to_line(&self) -> String {
        let mut m = XStringMap::new();
        match self {
            Frame::Ver { major, minor, info } => {
                m.push_command("ver");
                m.push("ver", &format!("{major}.{minor}"));
                m.push("info", info);
            }
            Frame::WhoIAm(info) => {
                m.push_command("whoIAm");
                m.push("whoIAm", &info.encode_line());
            }
            Frame::LoginNotRequired => {
                m.push_command("nologin");
            }
            Frame::LoginChallenge { salt } => {
                m.push_command("login");
                m.push("login", salt);
            }
            Frame::LoginResponse { user, hash } => {
                m.push_command("login");
                m.push("user", user);
                m.push("hash", hash);
            }
            Frame::Sync { path, id, mode, smode } => {
                m.push_command("sync");
                m.push("path", path.as_str());
                m.push("id", &id.to_string());
                m.push("mode", &mode.bits().to_string());
                m.push("smode", &smode.bits().to_string());
            }
            Frame::SyncR { peer_id, rid } => {
                m.push_command("syncr");
                m.push("id", &peer_id.to_string());
                m.push("rid", &rid.to_string());
            }
            Frame::Set { id, value } => {
                m.push_command("set");
                m.push("id", &id.to_string());
                m.push("v", &bytes_to_latin1(&value.export()));
            }
            Frame::Pipe { id, value, seq } => {
                m.push_command("p");
                m.push("id", &id.to_string());
                m.push("v", &bytes_to_latin1(&value.export()));
                if let Some(seq) = seq {
                    m.push("seq", &seq.to_string());
                }
            }
            Frame::Mode { id, mode } => {
                m.push_command("mode");
                m.push("id", &id.to_string());
                m.push("m", &mode.bits().to_string());
            }
            Frame::Del { path } => {
                m.push_command("del");
                m.push("path", path.as_str());
            }
            Frame::NoKill => {
                m.push_command("nokill");
            }
            Frame::Msg { kind, data } => {
                m.push_command("msg");
                m.push("t", kind);
                m.push("d", &bytes_to_latin1(data));
            }
            Frame::Err { code, text } => {
                m.push_command("err");
                m.push("code", &code.to_string());
                m.push("text", text);
            }
        }
        m.encode_line()
    }

    pub fn parse_line(line: &str) -> Option<Frame> {
        let m = XStringMap::parse_line(line);
        match m.command()?.as_str() {
            "ver" => {
                let verstr = m.get("ver")?;
                let (maj, min) = verstr.split_once('.')?;
                Some(Frame::Ver {
                    major: maj.parse().ok()?,
                    minor: min.parse().ok()?,
                    info: m.get("info").unwrap_or_default(),
                })
            }
            "whoIAm" => Some(Frame::WhoIAm(XStringMap::parse_line(&m.get("whoIAm")?))),
            "nologin" => Some(Frame::LoginNotRequired),
            "login" => {
                if let Some(user) = m.get("user") {
                    Some(Frame::LoginResponse { user, hash: m.get("hash")? })
                } else {
                    Some(Frame::LoginChallenge { salt: m.get("login")? })
                }
            }
            "sync" => Some(Frame::Sync {
                path: Path::parse(&m.get("path")?).ok()?,
                id: m.get("id")?.parse().ok()?,
                mode: Mode::from_bits(m.get("mode")?.parse().ok()?),
                smode: SyncMode::from_bits(m.get("smode")?.parse().ok()?),
            }),
            "syncr" => Some(Frame::SyncR {
                peer_id: m.get("id")?.parse().ok()?,
                rid: m.get("rid")?.parse().ok()?,
            }),
            "set" => Some(Frame::Set {
                id: m.get("id")?.parse().ok()?,
                value: Value::import(&latin1_to_bytes(&m.get("v")?)),
            }),
            "p" => Some(Frame::Pipe {
                id: m.get("id")?.parse().ok()?,
                value: Value::import(&latin1_to_bytes(&m.get("v")?)),
                seq: m.get("seq").and_then(|s| s.parse().ok()),
            }),
            "mode" => Some(Frame::Mode {
                id: m.get("id")?.parse().ok()?,
                mode: Mode::from_bits(m.get("m")?.parse().ok()?),
            }),
            "del" => Some(Frame::Del { path: Path::parse(&m.get("path")?).ok()? }),
            "nokill" => Some(Frame::NoKill),
            "msg" => Some(Frame::Msg {
                kind: m.get("t")?,
                data: latin1_to_bytes(&m.get("d")?),
            }),
            "err" => Some(Frame::Err {
                code: m.get("code")?.parse().ok()?,
                text: m.get("text").unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

/// Binary payloads (`v=`/`d=`) ride inside an XString value as one
/// "character" per byte via Latin-1, so every byte round-trips through the
/// escaping table in §6.2 without a second base64-style layer.
fn bytes_to_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn latin1_to_bytes(s: &str) -> Vec<u8> {
    s.chars().map(|c| c as u32 as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_frame_roundtrips() {
        let f = Frame::Set { id: 7, value: Value::String("hello world".into()) };
        let line = f.to_line();
        assert!(!line.contains(' ') || line.split(' ').count() >= 1);
        let parsed = Frame::parse_line(&line).unwrap();
        assert_eq!(parsed, f);
    }

    #[test]
    fn sync_frame_roundtrips() {
        let f = Frame::Sync {
            path: Path::parse("//House/Lamp").unwrap(),
            id: 3,
            mode: Mode::from_bits(Mode::BIDIR),
            smode: SyncMode::from_bits(SyncMode::MASTER),
        };
        let line = f.to_line();
        assert_eq!(Frame::parse_line(&line).unwrap(), f);
    }

    #[test]
    fn pipe_frame_with_binary_payload_roundtrips() {
        let f = Frame::Pipe { id: 1, value: Value::Bytes(vec![0, 1, 2, 255]), seq: Some(41) };
        let line = f.to_line();
        assert_eq!(Frame::parse_line(&line).unwrap(), f);
    }

    #[test]
    fn login_not_required_frame_roundtrips() {
        let line = Frame::LoginNotRequired.to_line();
        assert_eq!(Frame::parse_line(&line).unwrap(), Frame::LoginNotRequired);
    }
}
