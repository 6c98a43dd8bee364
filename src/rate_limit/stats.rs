//! Container Statistics
//!
//! Serializable views of the bucket container for logging and debugging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bucket::Bucket;

/// Copy of one live slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryView {
    /// Slot index
    pub index: usize,

    /// Bucket hash, `None` while pending the first response
    pub hash: Option<String>,

    /// Routes sharing this bucket
    pub routes: Vec<String>,

    /// Bucket state
    pub bucket: Bucket,
}

/// Point-in-time view of a bucket container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStats {
    /// Timestamp of data generation
    pub timestamp: DateTime<Utc>,

    /// Total slots
    pub capacity: usize,

    /// Slots holding an entry
    pub live_slots: usize,

    /// Free slots
    pub dead_slots: usize,

    /// Routes tracked across all entries
    pub routes: usize,

    /// Requests admitted and not yet answered
    pub in_flight: u64,

    /// Live entries, by slot index
    pub entries: Vec<EntryView>,
}

impl ContainerStats {
    /// Summarise a list of live entries
    pub fn new(capacity: usize, entries: Vec<EntryView>) -> Self {
        let live_slots = entries.len();
        Self {
            timestamp: Utc::now(),
            capacity,
            live_slots,
            dead_slots: capacity.saturating_sub(live_slots),
            routes: entries.iter().map(|e| e.routes.len()).sum(),
            in_flight: entries.iter().map(|e| e.bucket.reservations as u64).sum(),
            entries,
        }
    }

    /// Entries whose bucket hash is still unknown
    pub fn pending(&self) -> impl Iterator<Item = &EntryView> {
        self.entries.iter().filter(|e| e.hash.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: usize, hash: Option<&str>, routes: &[&str], reservations: u32) -> EntryView {
        let mut bucket = Bucket::new();
        bucket.reservations = reservations;
        EntryView {
            index,
            hash: hash.map(str::to_string),
            routes: routes.iter().map(|r| r.to_string()).collect(),
            bucket,
        }
    }

    #[test]
    fn test_summary() {
        let stats = ContainerStats::new(
            8,
            vec![
                entry(0, Some("abc"), &["/a", "/b"], 2),
                entry(3, None, &["/c"], 1),
            ],
        );

        assert_eq!(stats.live_slots, 2);
        assert_eq!(stats.dead_slots, 6);
        assert_eq!(stats.routes, 3);
        assert_eq!(stats.in_flight, 3);
        assert_eq!(stats.pending().count(), 1);
    }

    #[test]
    fn test_serialization() {
        let stats = ContainerStats::new(2, vec![entry(1, Some("h"), &["/x"], 0)]);
        let json = serde_json::to_string(&stats).unwrap();
        let parsed: ContainerStats = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.entries, stats.entries);
    }
}
