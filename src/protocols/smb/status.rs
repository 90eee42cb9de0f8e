//! NT status classification for client library errors
//!
//! A client library reports server failures as an NT status, printed either
//! by name (`STATUS_LOGON_FAILURE`, `LogonFailure`) or by code in hex or
//! decimal. [`classify`] recognises all three forms.

use super::error::SmbError;

/// What a failure means for the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Auth,
    Permission,
    NotFound,
    Collision,
    /// The session or socket went away
    Dropped,
    Other,
}

struct Known {
    name: &'static str,
    code: u32,
    class: StatusClass,
}

const fn known(name: &'static str, code: u32, class: StatusClass) -> Known {
    Known { name, code, class }
}

const KNOWN: &[Known] = &[
    known("logonfailure", 0xC000_006D, StatusClass::Auth),
    known("wrongpassword", 0xC000_006A, StatusClass::Auth),
    known("passwordexpired", 0xC000_0071, StatusClass::Auth),
    known("accountdisabled", 0xC000_0072, StatusClass::Auth),
    known("accountlockedout", 0xC000_0234, StatusClass::Auth),
    known("networkaccessdenied", 0xC000_00CA, StatusClass::Permission),
    known("accessdenied", 0xC000_0022, StatusClass::Permission),
    known("objectnamenotfound", 0xC000_0034, StatusClass::NotFound),
    known("objectpathnotfound", 0xC000_003A, StatusClass::NotFound),
    known("nosuchfile", 0xC000_000F, StatusClass::NotFound),
    known("badnetworkname", 0xC000_00CC, StatusClass::NotFound),
    known("objectnamecollision", 0xC000_0035, StatusClass::Collision),
    known("networknamedeleted", 0xC000_00C9, StatusClass::Dropped),
    known("connectiondisconnected", 0xC000_020C, StatusClass::Dropped),
    known("usersessiondeleted", 0xC000_0203, StatusClass::Dropped),
    known("networksessionexpired", 0xC000_035C, StatusClass::Dropped),
    known("iotimeout", 0xC000_00B5, StatusClass::Dropped),
];

/// Socket-level signatures, matched after separators are stripped
const DROPPED: &[&str] = &[
    "connectionreset",
    "connectionaborted",
    "connectionrefused",
    "brokenpipe",
    "notconnected",
    "unexpectedeof",
    "timedout",
    "timeout",
    "disconnected",
    "ioerror",
];

pub fn classify(text: &str) -> StatusClass {
    let lower = text.to_ascii_lowercase();
    let squashed: String = lower.chars().filter(|c| c.is_ascii_alphanumeric()).collect();

    for entry in KNOWN {
        let hex = format!("0x{:08x}", entry.code);
        if squashed.contains(entry.name) || lower.contains(&hex) || has_number(&lower, entry.code) {
            return entry.class;
        }
    }
    if DROPPED.iter().any(|sig| squashed.contains(sig)) {
        StatusClass::Dropped
    } else {
        StatusClass::Other
    }
}

fn has_number(text: &str, code: u32) -> bool {
    let code = code.to_string();
    text.split(|c: char| !c.is_ascii_digit()).any(|run| run == code)
}

/// Turn a client library error into an [`SmbError`]
///
/// `endpoint` names the share and `path` the object the call touched.
pub fn map_error(endpoint: &str, path: &str, err: impl std::fmt::Debug) -> SmbError {
    let text = format!("{:?}", err);
    match classify(&text) {
        StatusClass::Auth => SmbError::Auth(format!("{}: {}", endpoint, text)),
        StatusClass::Permission => SmbError::Permission(path.to_string()),
        StatusClass::NotFound => SmbError::NotFound(path.to_string()),
        StatusClass::Collision => SmbError::AlreadyExists(path.to_string()),
        StatusClass::Dropped => SmbError::Connection {
            endpoint: endpoint.to_string(),
            message: text,
        },
        StatusClass::Other => SmbError::Protocol(text),
    }
}
