/*!
The JSON envelope used on the command and monitoring channels.

Every message is an object with a fixed `header` (numeric type, string
subtype, epoch time, source and target process names, priority) and a
subtype-specific `body`. Commands are routed by `pidtarget`: a process acts
on messages addressed to its own name, to `"all"`, or to `"*"`.
*/

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

pub const TYPE_COMMAND: u8 = 0;
pub const TYPE_ALARM: u8 = 2;
pub const TYPE_CONFIG: u8 = 3;
pub const TYPE_LOG: u8 = 4;
pub const TYPE_INFO: u8 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgHeader {
    #[serde(rename = "type")]
    pub msg_type: u8,
    pub subtype: String,
    pub time: f64,
    pub pidsource: String,
    pub pidtarget: String,
    pub priority: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub header: MsgHeader,
    #[serde(default)]
    pub body: Value,
}

fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl Envelope {
    fn build(
        msg_type: u8,
        subtype: &str,
        pidsource: &str,
        pidtarget: &str,
        priority: &str,
        body: Value,
    ) -> Envelope {
        Envelope {
            header: MsgHeader {
                msg_type,
                subtype: subtype.to_owned(),
                time: epoch_seconds(),
                pidsource: pidsource.to_owned(),
                pidtarget: pidtarget.to_owned(),
                priority: priority.to_owned(),
            },
            body,
        }
    }

    /// A command addressed to `pidtarget` (used by operators and tests).
    pub fn command(subtype: &str, pidsource: &str, pidtarget: &str) -> Envelope {
        Envelope::build(TYPE_COMMAND, subtype, pidsource, pidtarget, "Low", Value::Null)
    }

    pub fn info(level: i64, message: &str, pidsource: &str, code: i64, priority: &str) -> Envelope {
        Envelope::build(
            TYPE_INFO,
            "info",
            pidsource,
            "*",
            priority,
            json!({ "level": level, "code": code, "message": message }),
        )
    }

    pub fn alarm(level: i64, message: &str, pidsource: &str, code: i64, priority: &str) -> Envelope {
        Envelope::build(
            TYPE_ALARM,
            "alarm",
            pidsource,
            "*",
            priority,
            json!({ "level": level, "code": code, "message": message }),
        )
    }

    pub fn log(level: i64, message: &str, pidsource: &str, code: i64, priority: &str) -> Envelope {
        Envelope::build(
            TYPE_LOG,
            "log",
            pidsource,
            "*",
            priority,
            json!({ "level": level, "code": code, "message": message }),
        )
    }

    /// A monitoring snapshot addressed to the process that asked for it.
    pub fn status(pidsource: &str, pidtarget: &str, body: Value) -> Envelope {
        Envelope::build(TYPE_INFO, "info", pidsource, pidtarget, "Low", body)
    }

    /// Whether a process called `name` should act on this message.
    pub fn is_for(&self, name: &str) -> bool {
        self.header.pidtarget == name
            || self.header.pidtarget == "all"
            || self.header.pidtarget == "*"
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // An Envelope always serializes: fixed field types, Value body.
        serde_json::to_vec(self).unwrap_or_default()
    }
}
