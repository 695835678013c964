//! Core protocol types shared by all roslink components.
//!
//! The device speaks a session-oriented control protocol whose wire encoding
//! is owned by the transport layer; this module only defines the framework's
//! view of it: command tokens, query/reply frames, and the priority classes
//! used for admission and queueing.

pub mod error;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

pub type QueryId = u64;
pub type CommandParams = serde_json::Value;

static QUERY_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Priority class for a command execution.
///
/// Five strict classes: dispatch always drains the highest non-empty lane
/// first. Within one class, ordering is FIFO. No fairness guarantee is made
/// across classes under sustained high-priority load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Background,
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// All classes, highest first. Used for lane scanning.
    pub const ALL_DESC: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
    ];

    /// Lane index, 0 = critical .. 4 = background.
    pub fn lane(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
            Priority::Background => 4,
        }
    }

    /// The next class up, or self for `Critical`. Used by the rate limiter's
    /// fairness promotion.
    pub fn promoted(self) -> Priority {
        match self {
            Priority::Background => Priority::Low,
            Priority::Low => Priority::Normal,
            Priority::Normal => Priority::High,
            Priority::High => Priority::Critical,
            Priority::Critical => Priority::Critical,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Coarse classification of a command token, driving cache eligibility and
/// per-class TTL selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Slow-changing device/system information (`/system/...` reads).
    SystemInfo,
    /// User/session/profile listings; changes frequently.
    Listing,
    /// Anything that mutates device state. Never cached.
    Mutation,
}

/// Returns whether a command token names an idempotent read.
///
/// Read commands end in a query verb (`print`, `getall`, `monitor`); only
/// those are cache-eligible. Everything else is treated as a mutation.
pub fn is_read_command(command: &str) -> bool {
    command
        .rsplit('/')
        .next()
        .map(|verb| matches!(verb, "print" | "getall" | "monitor"))
        .unwrap_or(false)
}

/// Classifies a command token for cache TTL selection.
pub fn classify_command(command: &str) -> CommandClass {
    if !is_read_command(command) {
        return CommandClass::Mutation;
    }
    if command.starts_with("/system") || command.starts_with("/interface") {
        CommandClass::SystemInfo
    } else {
        CommandClass::Listing
    }
}

/// A single query sent to the device through a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryFrame {
    pub id: QueryId,
    pub command: String,
    pub params: CommandParams,
}

impl QueryFrame {
    pub fn new(command: impl Into<String>, params: CommandParams) -> Self {
        QueryFrame {
            id: generate_query_id(),
            command: command.into(),
            params,
        }
    }
}

/// Reply to a [`QueryFrame`], as decoded by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyFrame {
    pub id: QueryId,
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ReplyFrame {
    pub fn success(id: QueryId, data: serde_json::Value) -> Self {
        ReplyFrame {
            id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: QueryId, error: impl Into<String>) -> Self {
        ReplyFrame {
            id,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

fn generate_query_id() -> QueryId {
    // Timestamp in the upper bits, counter in the lower bits: unique even
    // when two queries are created within the same nanosecond.
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = QUERY_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    (timestamp & 0xFFFFFFFF00000000) | (counter & 0xFFFFFFFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert!(Priority::Low > Priority::Background);
    }

    #[test]
    fn test_priority_lanes_are_distinct() {
        let lanes: Vec<usize> = Priority::ALL_DESC.iter().map(|p| p.lane()).collect();
        assert_eq!(lanes, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_priority_promotion() {
        assert_eq!(Priority::Background.promoted(), Priority::Low);
        assert_eq!(Priority::High.promoted(), Priority::Critical);
        assert_eq!(Priority::Critical.promoted(), Priority::Critical);
    }

    #[test]
    fn test_is_read_command() {
        assert!(is_read_command("/user/print"));
        assert!(is_read_command("/ip/hotspot/active/print"));
        assert!(is_read_command("/interface/monitor"));
        assert!(!is_read_command("/user/add"));
        assert!(!is_read_command("/user/disable"));
        assert!(!is_read_command(""));
    }

    #[test]
    fn test_classify_command() {
        assert_eq!(classify_command("/system/resource/print"), CommandClass::SystemInfo);
        assert_eq!(classify_command("/user/print"), CommandClass::Listing);
        assert_eq!(classify_command("/user/add"), CommandClass::Mutation);
        assert_eq!(classify_command("/system/reboot"), CommandClass::Mutation);
    }

    #[test]
    fn test_query_ids_are_unique() {
        let a = QueryFrame::new("/user/print", json!({}));
        let b = QueryFrame::new("/user/print", json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_reply_frame_roundtrip() {
        let reply = ReplyFrame::success(42, json!([{"name": "alice"}]));
        let bytes = serde_json::to_vec(&reply).unwrap();
        let decoded: ReplyFrame = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_failure_reply_carries_message() {
        let reply = ReplyFrame::failure(7, "no such user");
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("no such user"));
        assert!(reply.data.is_none());
    }
}
