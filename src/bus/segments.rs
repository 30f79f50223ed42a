// Per-ID routing for a bus split into two physical segments
//
// Some controller boards wire a second connector to a separate transceiver
// that shares the same UART. Each device ID lives on one of the two; the
// direction line of that segment is the one flipped when talking to it.

use super::transport::Route;
use crate::protocol::{BROADCAST_ID, MAX_DEVICE_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Segment {
    #[default]
    Primary,
    Secondary,
}

#[derive(Debug, Clone)]
pub struct SegmentMap {
    secondary: [bool; MAX_DEVICE_ID as usize + 1],
}

impl Default for SegmentMap {
    fn default() -> Self {
        Self {
            secondary: [false; MAX_DEVICE_ID as usize + 1],
        }
    }
}

impl SegmentMap {
    /// IDs above the device range are ignored.
    pub fn with_secondary(ids: &[u8]) -> Self {
        let mut map = Self::default();
        for &id in ids {
            if let Some(slot) = map.secondary.get_mut(id as usize) {
                *slot = true;
            }
        }
        map
    }

    pub fn is_split(&self) -> bool {
        self.secondary.iter().any(|&s| s)
    }

    pub fn segment(&self, id: u8) -> Segment {
        match self.secondary.get(id as usize) {
            Some(true) => Segment::Secondary,
            _ => Segment::Primary,
        }
    }

    /// Broadcast reaches every segment.
    pub fn route(&self, id: u8) -> Route {
        if id == BROADCAST_ID {
            Route::All
        } else {
            Route::Segment(self.segment(id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsplit_routes_primary() {
        let map = SegmentMap::default();
        assert!(!map.is_split());
        assert_eq!(map.route(1), Route::Segment(Segment::Primary));
        assert_eq!(map.route(BROADCAST_ID), Route::All);
    }

    #[test]
    fn test_secondary_ids() {
        let map = SegmentMap::with_secondary(&[10, 11, 0xFF]);
        assert!(map.is_split());
        assert_eq!(map.segment(10), Segment::Secondary);
        assert_eq!(map.segment(12), Segment::Primary);
        assert_eq!(map.segment(0xFF), Segment::Primary);
    }
}
