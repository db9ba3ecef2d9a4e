/*
 * This file is a part of Arn
 */

//! `Value` is the tree's variant type (data model §3.2) and also implements
//! the self-describing export/import encoding of §6.3, which doubles as the
//! on-wire representation carried by `set`/`p` frames (§4.6.2): both the
//! handle-level `arn_export`/`arn_import` operations and the sync session's
//! frame codec go through [`Value::export`]/[`Value::import`].

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportCode {
    Null = 0x00,
    String = 0x01,
    Int = 0x02,
    Real = 0x03,
    Bool = 0x04,
    ByteArray = 0x05,
    VariantTxt = 0x06,
}

impl ExportCode {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Null),
            0x01 => Some(Self::String),
            0x02 => Some(Self::Int),
            0x03 => Some(Self::Real),
            0x04 => Some(Self::Bool),
            0x05 => Some(Self::ByteArray),
            0x06 => Some(Self::VariantTxt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Real(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    String(String),
    /// `<type-name>:<repr>` pairs not covered by the typed variants above,
    /// the analogue of an opaque `QVariant` carried by the original system.
    Generic { ty: String, repr: String },
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encode into the self-describing byte form of §6.3.
    pub fn export(&self) -> Vec<u8> {
        match self {
            Value::Null => vec![ExportCode::Null as u8],
            Value::Bool(b) => vec![ExportCode::Bool as u8, *b as u8],
            Value::Int(i) => {
                let mut v = vec![ExportCode::Int as u8];
                v.extend_from_slice(&i.to_le_bytes());
                v
            }
            Value::Real(r) => {
                let mut v = vec![ExportCode::Real as u8];
                v.extend_from_slice(&r.to_le_bytes());
                v
            }
            Value::Bytes(b) => {
                let mut v = Vec::with_capacity(b.len() + 1);
                v.push(ExportCode::ByteArray as u8);
                v.extend_from_slice(b);
                v
            }
            Value::String(s) => {
                let mut v = Vec::with_capacity(s.len() + 1);
                v.push(ExportCode::String as u8);
                v.extend_from_slice(s.as_bytes());
                v
            }
            Value::Generic { ty, repr } => {
                let mut v = vec![ExportCode::VariantTxt as u8];
                v.extend_from_slice(ty.as_bytes());
                v.push(b':');
                v.extend_from_slice(repr.as_bytes());
                v
            }
        }
    }

    /// Decode the self-describing byte form. Per §6.3, an unrecognized
    /// control-range first byte falls back to treating the whole buffer as
    /// UTF-8 text rather than failing the import.
    pub fn import(bytes: &[u8]) -> Value {
        if bytes.is_empty() {
            return Value::Null;
        }
        match ExportCode::from_byte(bytes[0]) {
            Some(ExportCode::Null) => Value::Null,
            Some(ExportCode::Bool) => Value::Bool(bytes.get(1).map(|b| *b != 0).unwrap_or(false)),
            Some(ExportCode::Int) => {
                if bytes.len() >= 9 {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(&bytes[1..9]);
                    Value::Int(i64::from_le_bytes(buf))
                } else {
                    Value::Int(0)
                }
            }
            Some(ExportCode::Real) => {
                if bytes.len() >= 9 {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(&bytes[1..9]);
                    Value::Real(f64::from_le_bytes(buf))
                } else {
                    Value::Real(0.0)
                }
            }
            Some(ExportCode::ByteArray) => Value::Bytes(bytes[1..].to_vec()),
            Some(ExportCode::String) => {
                Value::String(String::from_utf8_lossy(&bytes[1..]).into_owned())
            }
            Some(ExportCode::VariantTxt) => {
                let rest = String::from_utf8_lossy(&bytes[1..]);
                match rest.split_once(':') {
                    Some((ty, repr)) => Value::Generic {
                        ty: ty.to_string(),
                        repr: repr.to_string(),
                    },
                    None => Value::Generic {
                        ty: String::new(),
                        repr: rest.into_owned(),
                    },
                }
            }
            None => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let bytes = v.export();
        assert_eq!(Value::import(&bytes), v);
    }

    #[test]
    fn roundtrips_all_typed_variants() {
        roundtrip(Value::Null);
        roundtrip(Value::Int(-42));
        roundtrip(Value::Real(3.5));
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bytes(vec![1, 2, 3]));
        roundtrip(Value::String("hello".into()));
        roundtrip(Value::Generic {
            ty: "Point".into(),
            repr: "1,2".into(),
        });
    }

    #[test]
    fn unrecognized_control_byte_falls_back_to_string() {
        // 0x07 is below 0x20 and not a recognized ExportCode
        let bytes = [0x07, b'h', b'i'];
        assert_eq!(
            Value::import(&bytes),
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        );
    }

    #[test]
    fn export_bytes_compare_equal_for_ignore_same() {
        let a = Value::Int(5).export();
        let b = Value::Int(5).export();
        assert_eq!(a, b);
    }
}
