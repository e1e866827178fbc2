//! Backup frame types and their wire encoding.

use serde::{Deserialize, Serialize};

use super::MAX_FRAME_BYTES;
use crate::error::{BackupError, Result};

/// Largest header the reader will decode; real headers are well under 100 bytes.
pub(crate) const MAX_HEADER_BYTES: usize = 4096;

/// Plaintext header written once at the start of a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// 16-byte IV; its first four bytes seed the frame counter
    pub iv: Vec<u8>,
    /// 32-byte salt for key derivation; empty in some legacy backups
    pub salt: Vec<u8>,
    /// Container format version; absent means version 0
    pub version: Option<u32>,
}

/// A single bound parameter of a replayed SQL statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlParameter {
    String(String),
    Double(f64),
    Integer(i64),
    Blob(Vec<u8>),
    Null,
}

/// A SQL statement with positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlStatement {
    pub statement: String,
    pub parameters: Vec<SqlParameter>,
}

impl SqlStatement {
    /// A statement without parameters, as used for schema DDL.
    pub fn bare(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            parameters: Vec::new(),
        }
    }
}

/// Value of a single shared preference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreferenceValue {
    String(String),
    Boolean(bool),
    StringSet(Vec<String>),
}

/// One preference entry, addressed by preference file and key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedPreference {
    pub file: String,
    pub key: String,
    pub value: PreferenceValue,
}

/// Typed value held by the key-value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyValueData {
    Blob(Vec<u8>),
    Boolean(bool),
    Float(f32),
    Integer(i32),
    Long(i64),
    String(String),
}

/// One key-value store entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: KeyValueData,
}

/// Every frame that can appear in a backup stream.
///
/// `Attachment`, `Sticker` and `Avatar` are each followed on the wire by an
/// encrypted blob of exactly `length` plaintext bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackupFrame {
    Header(Header),
    DatabaseVersion { version: i64 },
    Statement(SqlStatement),
    Preference(SharedPreference),
    KeyValue(KeyValue),
    Attachment { row_id: i64, length: u64 },
    Sticker { row_id: i64, length: u64 },
    Avatar {
        name: String,
        recipient_id: Option<String>,
        length: u64,
    },
    End,
}

impl BackupFrame {
    /// Short name used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupFrame::Header(_) => "header",
            BackupFrame::DatabaseVersion { .. } => "database_version",
            BackupFrame::Statement(_) => "statement",
            BackupFrame::Preference(_) => "preference",
            BackupFrame::KeyValue(_) => "key_value",
            BackupFrame::Attachment { .. } => "attachment",
            BackupFrame::Sticker { .. } => "sticker",
            BackupFrame::Avatar { .. } => "avatar",
            BackupFrame::End => "end",
        }
    }

    /// Declared length of the blob that follows this frame, if any.
    pub fn blob_length(&self) -> Option<u64> {
        match self {
            BackupFrame::Attachment { length, .. }
            | BackupFrame::Sticker { length, .. }
            | BackupFrame::Avatar { length, .. } => Some(*length),
            _ => None,
        }
    }
}

pub(crate) fn encode_frame(frame: &BackupFrame) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(frame, bincode::config::standard())
        .map_err(|e| BackupError::MalformedFrame(format!("Failed to encode frame: {}", e)))
}

pub(crate) fn decode_frame(bytes: &[u8]) -> Result<BackupFrame> {
    let config = bincode::config::standard().with_limit::<MAX_FRAME_BYTES>();
    let (frame, consumed) = bincode::serde::decode_from_slice(bytes, config)
        .map_err(|e| BackupError::MalformedFrame(format!("Failed to decode frame: {}", e)))?;
    ensure_consumed(consumed, bytes.len())?;
    Ok(frame)
}

pub(crate) fn decode_header(bytes: &[u8]) -> Result<Header> {
    let config = bincode::config::standard().with_limit::<MAX_HEADER_BYTES>();
    let (frame, consumed) = bincode::serde::decode_from_slice(bytes, config)
        .map_err(|e| BackupError::MalformedFrame(format!("Failed to decode header: {}", e)))?;
    ensure_consumed(consumed, bytes.len())?;
    match frame {
        BackupFrame::Header(header) => Ok(header),
        other => Err(BackupError::MalformedFrame(format!(
            "Backup starts with a {} frame instead of a header",
            other.kind()
        ))),
    }
}

fn ensure_consumed(consumed: usize, total: usize) -> Result<()> {
    if consumed != total {
        return Err(BackupError::MalformedFrame(format!(
            "{} trailing bytes after frame",
            total - consumed
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_frame_decodes_to_same_value() {
        let frame = BackupFrame::Statement(SqlStatement {
            statement: "INSERT INTO \"message\" VALUES (?,?,?,?,?)".to_string(),
            parameters: vec![
                SqlParameter::Integer(1),
                SqlParameter::String("hello".to_string()),
                SqlParameter::Double(0.5),
                SqlParameter::Blob(vec![0, 1, 2]),
                SqlParameter::Null,
            ],
        });

        let bytes = encode_frame(&frame).unwrap();
        assert_eq!(decode_frame(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let mut bytes = encode_frame(&BackupFrame::End).unwrap();
        bytes.push(0);
        assert!(matches!(
            decode_frame(&bytes),
            Err(BackupError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_unknown_variant_is_rejected() {
        assert!(matches!(
            decode_frame(&[200]),
            Err(BackupError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_header_decoder_rejects_other_frames() {
        let bytes = encode_frame(&BackupFrame::DatabaseVersion { version: 3 }).unwrap();
        let err = decode_header(&bytes).unwrap_err();
        assert!(err.to_string().contains("database_version"));
    }

    #[test]
    fn test_blob_length_only_for_blob_frames() {
        assert_eq!(
            BackupFrame::Attachment { row_id: 1, length: 10 }.blob_length(),
            Some(10)
        );
        assert_eq!(
            BackupFrame::Avatar {
                name: "5".to_string(),
                recipient_id: None,
                length: 3
            }
            .blob_length(),
            Some(3)
        );
        assert_eq!(BackupFrame::End.blob_length(), None);
        assert_eq!(
            BackupFrame::DatabaseVersion { version: 1 }.blob_length(),
            None
        );
    }
}
