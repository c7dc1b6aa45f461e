use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Most recent annotated frame published for a device.
#[derive(Clone)]
pub struct FrameEntry {
    pub jpeg: Vec<u8>,
    pub timestamp: f64,
}

/// Latest-frame map shared between stream workers and HTTP handlers.
/// One writer per key, many readers; last writer wins, no history.
pub struct FrameStore {
    frames: Arc<RwLock<HashMap<String, FrameEntry>>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self {
            frames: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn put(&self, device: &str, jpeg: Vec<u8>) {
        let entry = FrameEntry {
            jpeg,
            timestamp: super::unix_timestamp(),
        };
        self.frames
            .write()
            .unwrap()
            .insert(device.to_string(), entry);
    }

    pub fn get(&self, device: &str) -> Option<FrameEntry> {
        self.frames.read().unwrap().get(device).cloned()
    }

    pub fn remove(&self, device: &str) {
        self.frames.write().unwrap().remove(device);
    }
}

impl Clone for FrameStore {
    fn clone(&self) -> Self {
        Self {
            frames: Arc::clone(&self.frames),
        }
    }
}
