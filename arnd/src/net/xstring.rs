/*
 * This file is a part of Arn
 */

//! XString encoding (§6.2): the reversible byte escaping used for every
//! value inside a protocol line, plus the `key=value key=value ...` map
//! built on top of it that frames every sync session line (§4.6).

pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            0x20 => out.push('_'),
            b'_' => out.push_str("\\_"),
            b'\\' => out.push_str("\\\\"),
            b'^' => out.push_str("\\^"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            0x00 => out.push_str("\\0"),
            c if c < 0x20 => {
                out.push('^');
                out.push((b'A' + c - 1) as char);
            }
            c => out.push(c as char),
        }
    }
    out
}

pub fn encode_str(s: &str) -> String {
    encode(s.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    TrailingEscape,
    BadCaretEscape,
}

pub fn decode(input: &str) -> Result<Vec<u8>, DecodeError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(0x20);
                i += 1;
            }
            b'\\' => {
                let next = *bytes.get(i + 1).ok_or(DecodeError::TrailingEscape)?;
                match next {
                    b'_' => out.push(b'_'),
                    b'\\' => out.push(b'\\'),
                    b'^' => out.push(b'^'),
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b'0' => out.push(0x00),
                    _ => return Err(DecodeError::BadCaretEscape),
                }
                i += 2;
            }
            b'^' => {
                let letter = *bytes.get(i + 1).ok_or(DecodeError::TrailingEscape)?;
                if !letter.is_ascii_uppercase() {
                    return Err(DecodeError::BadCaretEscape);
                }
                out.push(letter - b'A' + 1);
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

pub fn decode_to_string(input: &str) -> Result<String, DecodeError> {
    Ok(String::from_utf8_lossy(&decode(input)?).into_owned())
}

/// An ordered `key=value` line, decoded in place. The first pair with an
/// empty key is the positional command value (§6.2).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XStringMap {
    pairs: Vec<(String, String)>,
}

impl XStringMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: &str) -> &mut Self {
        self.pairs.push((key.to_string(), encode_str(value)));
        self
    }

    pub fn push_command(&mut self, value: &str) -> &mut Self {
        self.push("", value)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| decode_to_string(v).ok())
    }

    pub fn command(&self) -> Option<String> {
        self.get("")
    }

    pub fn encode_line(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| if k.is_empty() { v.clone() } else { format!("{k}={v}") })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn parse_line(line: &str) -> XStringMap {
        let mut map = XStringMap::new();
        for token in line.split(' ').filter(|t| !t.is_empty()) {
            match token.split_once('=') {
                Some((k, v)) => map.pairs.push((k.to_string(), v.to_string())),
                None => map.pairs.push((String::new(), token.to_string())),
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_all_bytes() {
        let all: Vec<u8> = (0u8..=255).collect();
        let encoded = encode(&all);
        assert!(!encoded.contains(' '));
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, all);
    }

    #[test]
    fn space_and_control_chars_are_escaped() {
        assert_eq!(encode(b"a b"), "a_b");
        assert_eq!(encode(b"a_b"), "a\\_b");
        assert_eq!(encode(b"a\\b"), "a\\\\b");
        assert_eq!(encode(b"a\nb"), "a\\nb");
        assert_eq!(encode(b"a\0b"), "a\\0b");
        assert_eq!(encode(&[1]), "^A");
    }

    #[test]
    fn map_roundtrips_command_and_pairs() {
        let mut m = XStringMap::new();
        m.push_command("sync");
        m.push("path", "//House/Kitchen Lamp");
        m.push("id", "7");
        let line = m.encode_line();
        let parsed = XStringMap::parse_line(&line);
        assert_eq!(parsed.command().as_deref(), Some("sync"));
        assert_eq!(parsed.get("path").as_deref(), Some("//House/Kitchen Lamp"));
        assert_eq!(parsed.get("id").as_deref(), Some("7"));
    }
}
