//! Conversion from raw replies into the type a command was declared with.

use std::collections::{BTreeSet, HashSet};

use loopkv_common::RespValue;

/// Why a reply could not be turned into the declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// The server answered nil.
    Nil,
    /// The reply had a different shape; carries `RespValue::kind`.
    WrongType(&'static str),
}

/// Types a command reply can be converted into.
///
/// Error replies never reach `from_reply`; they complete the command with
/// `Status::ErrorReply` before conversion.
pub trait FromReply: Sized + Send + 'static {
    fn from_reply(value: RespValue) -> Result<Self, Mismatch>;
}

impl FromReply for RespValue {
    fn from_reply(value: RespValue) -> Result<Self, Mismatch> {
        Ok(value)
    }
}

impl FromReply for Vec<u8> {
    fn from_reply(value: RespValue) -> Result<Self, Mismatch> {
        match value {
            RespValue::Bulk(Some(data)) | RespValue::Simple(data) => Ok(data),
            RespValue::Bulk(None) => Err(Mismatch::Nil),
            other => Err(Mismatch::WrongType(other.kind())),
        }
    }
}

impl FromReply for String {
    fn from_reply(value: RespValue) -> Result<Self, Mismatch> {
        let data = Vec::<u8>::from_reply(value)?;
        String::from_utf8(data).map_err(|_| Mismatch::WrongType("binary"))
    }
}

impl FromReply for i64 {
    fn from_reply(value: RespValue) -> Result<Self, Mismatch> {
        match value {
            RespValue::Integer(value) => Ok(value),
            RespValue::Bulk(None) => Err(Mismatch::Nil),
            other => Err(Mismatch::WrongType(other.kind())),
        }
    }
}

impl FromReply for Vec<String> {
    fn from_reply(value: RespValue) -> Result<Self, Mismatch> {
        match value {
            RespValue::Array(items) => items.into_iter().map(element).collect(),
            RespValue::Bulk(None) => Err(Mismatch::Nil),
            other => Err(Mismatch::WrongType(other.kind())),
        }
    }
}

impl FromReply for HashSet<String> {
    fn from_reply(value: RespValue) -> Result<Self, Mismatch> {
        Vec::<String>::from_reply(value).map(|items| items.into_iter().collect())
    }
}

impl FromReply for BTreeSet<String> {
    fn from_reply(value: RespValue) -> Result<Self, Mismatch> {
        Vec::<String>::from_reply(value).map(|items| items.into_iter().collect())
    }
}

// Array members must be strings; a nil member is a shape error here.
fn element(item: RespValue) -> Result<String, Mismatch> {
    match item {
        RespValue::Bulk(Some(data)) | RespValue::Simple(data) => {
            String::from_utf8(data).map_err(|_| Mismatch::WrongType("binary"))
        }
        other => Err(Mismatch::WrongType(other.kind())),
    }
}
