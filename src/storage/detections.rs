use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::analytics::Detection;

/// All detections produced for one frame of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionRecord {
    pub source: String,
    pub timestamp: f64,
    pub detections: Vec<Detection>,
}

/// Bounded FIFO of recent detection records, shared across all devices.
pub struct DetectionLog {
    records: Arc<Mutex<VecDeque<DetectionRecord>>>,
    capacity: usize,
}

impl DetectionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    pub fn append(&self, record: DetectionRecord) {
        let mut records = self.records.lock().unwrap();
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    /// Owned newest-first copy. Readers are never affected by later appends.
    pub fn snapshot(&self) -> Vec<DetectionRecord> {
        self.records.lock().unwrap().iter().rev().cloned().collect()
    }

}

impl Clone for DetectionLog {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: &str, timestamp: f64) -> DetectionRecord {
        DetectionRecord {
            source: source.to_string(),
            timestamp,
            detections: vec![Detection {
                bbox: [0.0, 0.0, 10.0, 10.0],
                score: 0.5,
                label_id: 2,
                label_name: "car".to_string(),
            }],
        }
    }

    #[test]
    fn append_keeps_arrival_order_and_snapshot_reverses_it() {
        let log = DetectionLog::new(50);
        log.append(record("10.0.0.5", 1.0));
        log.append(record("10.0.0.5", 2.0));
        log.append(record("10.0.0.6", 3.0));

        let snapshot = log.snapshot();
        let timestamps: Vec<f64> = snapshot.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn capacity_is_never_exceeded_and_oldest_records_are_evicted() {
        let log = DetectionLog::new(50);
        for i in 0..120 {
            log.append(record("10.0.0.5", i as f64));
            assert!(log.snapshot().len() <= 50);
        }

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 50);
        assert_eq!(snapshot[0].timestamp, 119.0);
        assert_eq!(snapshot[49].timestamp, 70.0);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_appends() {
        let log = DetectionLog::new(50);
        log.append(record("10.0.0.5", 1.0));
        let snapshot = log.snapshot();
        log.append(record("10.0.0.5", 2.0));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].timestamp, 1.0);
    }

    #[test]
    fn record_serializes_with_the_wire_field_names() {
        let json = serde_json::to_value(record("10.0.0.5", 1.5)).unwrap();
        assert_eq!(json["source"], "10.0.0.5");
        assert_eq!(json["timestamp"], 1.5);
        assert_eq!(json["detections"][0]["label_name"], "car");
        assert_eq!(json["detections"][0]["score"], 0.5);
        assert_eq!(json["detections"][0]["bbox"][2], 10.0);
    }
}
