use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use image::DynamicImage;

/// A decoded camera image plus the instant it was published.
#[derive(Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub captured_at: DateTime<Utc>,
}

/// Single-slot holder for the most recent camera frame.
///
/// The ingestion loop is the only writer; any number of capture requests
/// read concurrently. No history is kept: attendance always acts on "now",
/// so coalescing writes into one slot is correct and avoids backpressure.
/// The lock is held only for the replace or the clone-out, never across I/O.
#[derive(Clone, Default)]
pub struct FrameCache {
    slot: Arc<Mutex<Option<Frame>>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) {
        let mut guard = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(frame);
    }

    /// Copies out the latest frame; `None` before the first publish.
    pub fn latest(&self) -> Option<Frame> {
        let guard = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(side: u32) -> Frame {
        Frame {
            image: DynamicImage::new_rgb8(side, side),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn latest_is_none_before_first_publish() {
        let cache = FrameCache::new();
        assert!(cache.latest().is_none());
    }

    #[test]
    fn publish_replaces_previous_frame() {
        let cache = FrameCache::new();
        cache.publish(frame(2));
        cache.publish(frame(4));

        let latest = cache.latest().expect("frame missing");
        assert_eq!(latest.image.width(), 4);
    }

    #[test]
    fn concurrent_readers_never_observe_a_torn_frame() {
        let cache = FrameCache::new();
        cache.publish(frame(2));

        let writer = {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    cache.publish(frame(2));
                    cache.publish(frame(4));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let latest = cache.latest().expect("frame missing");
                        // Every published frame is square; a torn read would not be.
                        assert_eq!(latest.image.width(), latest.image.height());
                    }
                })
            })
            .collect();

        writer.join().expect("writer panicked");
        for reader in readers {
            reader.join().expect("reader panicked");
        }
    }
}
