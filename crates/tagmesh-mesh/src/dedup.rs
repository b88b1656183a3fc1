//! Duplicate suppression for flooded frames
//!
//! Each origin numbers its frames with a wrapping 16-bit sequence within a
//! session it picks at startup. A sliding bitmap window per origin remembers
//! which recent sequence numbers were already accepted. Anything older than
//! the window is treated as a duplicate; the hop budget still bounds any
//! frame that slips through.
//!
//! A frame carrying a new session means the origin restarted: its window is
//! rebuilt from that frame. Stragglers from the session just replaced are
//! dropped.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tagmesh_core::NodeId;

/// Largest window the bitmap can hold
pub const MAX_WINDOW: u16 = 64;

/// Sliding acceptance window for one origin
#[derive(Clone, Debug)]
pub struct SequenceWindow {
    /// Oldest sequence number still tracked
    min_seq: u16,
    /// Bit `i` set means `min_seq + i` was accepted
    bitmap: u64,
    size: u16,
    primed: bool,
}

impl SequenceWindow {
    pub fn new(size: u16) -> Self {
        SequenceWindow {
            min_seq: 0,
            bitmap: 0,
            size: size.clamp(1, MAX_WINDOW),
            primed: false,
        }
    }

    /// Whether `seq` would be accepted
    pub fn check(&self, seq: u16) -> bool {
        if !self.primed {
            return true;
        }
        let offset = seq.wrapping_sub(self.min_seq);
        if offset > u16::MAX / 2 {
            // Behind the window
            return false;
        }
        if offset >= self.size {
            return true;
        }
        self.bitmap & (1u64 << offset) == 0
    }

    /// Record `seq`; returns false if it was already seen
    pub fn accept(&mut self, seq: u16) -> bool {
        if !self.primed {
            // First frame from this origin anchors the window
            self.primed = true;
            self.min_seq = seq.wrapping_sub(self.size - 1);
            self.bitmap = 1u64 << (self.size - 1);
            return true;
        }
        if !self.check(seq) {
            return false;
        }

        let offset = seq.wrapping_sub(self.min_seq);
        if offset >= self.size {
            let advance = offset - self.size + 1;
            if advance >= MAX_WINDOW {
                self.bitmap = 0;
            } else {
                self.bitmap >>= advance;
            }
            self.min_seq = seq.wrapping_sub(self.size - 1);
        }

        self.bitmap |= 1u64 << seq.wrapping_sub(self.min_seq);
        true
    }

    #[inline]
    pub fn min_seq(&self) -> u16 {
        self.min_seq
    }
}

/// Outcome of offering a frame to the filter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// First sighting within the origin's current session
    Accepted,
    /// First frame of a new session; the origin restarted
    Restarted,
    /// Seen before, behind the window, or from a replaced session
    Duplicate,
}

impl Admission {
    #[inline]
    pub fn is_accepted(self) -> bool {
        !matches!(self, Admission::Duplicate)
    }
}

#[derive(Clone, Debug)]
struct OriginState {
    session: u32,
    retired: Option<u32>,
    window: SequenceWindow,
}

/// Per-origin duplicate filter
#[derive(Debug, Default)]
pub struct DedupFilter {
    origins: HashMap<NodeId, OriginState>,
    window_size: u16,
}

impl DedupFilter {
    pub fn new(window_size: u16) -> Self {
        DedupFilter {
            origins: HashMap::new(),
            window_size,
        }
    }

    /// Record a frame
    pub fn accept(&mut self, origin: NodeId, session: u32, seq: u16) -> Admission {
        let size = self.window_size;
        let state = match self.origins.entry(origin) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut window = SequenceWindow::new(size);
                window.accept(seq);
                entry.insert(OriginState {
                    session,
                    retired: None,
                    window,
                });
                return Admission::Accepted;
            }
        };

        if state.session == session {
            return if state.window.accept(seq) {
                Admission::Accepted
            } else {
                Admission::Duplicate
            };
        }
        if state.retired == Some(session) {
            return Admission::Duplicate;
        }

        state.retired = Some(state.session);
        state.session = session;
        state.window = SequenceWindow::new(size);
        state.window.accept(seq);
        Admission::Restarted
    }

    /// Drop state for an origin that left the mesh
    pub fn forget(&mut self, origin: NodeId) {
        self.origins.remove(&origin);
    }

    /// Number of origins tracked
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}
