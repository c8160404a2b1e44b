//! Packed control word of the triple buffer
//!
//! The reader and the writer agree on which storage slot plays which role
//! through a single byte, so that a role change is one compare-and-swap:
//!
//! ```text
//!   bit:    7        6        5 4      3 2      1 0
//!       (unused) (new write) (dirty)  (clean)  (snap)
//! ```
//!
//! The three 2-bit indices always form a permutation of {0, 1, 2}.

use crossbeam_utils::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Index of one of the three storage slots
pub(crate) type SlotIndex = usize;

/// Snapshot of the control word
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct ControlWord(u8);
//
impl ControlWord {
    /// Set when a published value has not been claimed by the reader yet
    const NEW_WRITE: u8 = 0b0100_0000;

    // Position of each role index within the word
    const DIRTY_SHIFT: u32 = 4;
    const CLEAN_SHIFT: u32 = 2;
    const SNAP_SHIFT: u32 = 0;
    const INDEX_MASK: u8 = 0b11;

    /// Dirty = 0, clean = 1, snap = 2, nothing published
    pub const INITIAL: Self = Self::pack(false, 0, 1, 2);

    /// Assemble a control word from its four fields
    pub const fn pack(
        new_write: bool,
        dirty: SlotIndex,
        clean: SlotIndex,
        snap: SlotIndex,
    ) -> Self {
        let mut bits = ((dirty as u8) << Self::DIRTY_SHIFT)
            | ((clean as u8) << Self::CLEAN_SHIFT)
            | ((snap as u8) << Self::SNAP_SHIFT);
        if new_write {
            bits |= Self::NEW_WRITE;
        }
        Self(bits)
    }

    /// Raw byte, as stored in the atomic
    pub const fn bits(self) -> u8 {
        self.0
    }

    const fn index(self, shift: u32) -> SlotIndex {
        ((self.0 >> shift) & Self::INDEX_MASK) as SlotIndex
    }

    /// Slot currently owned by the writer
    pub const fn dirty(self) -> SlotIndex {
        self.index(Self::DIRTY_SHIFT)
    }

    /// Slot holding the latest published value
    pub const fn clean(self) -> SlotIndex {
        self.index(Self::CLEAN_SHIFT)
    }

    /// Slot currently exposed to the reader
    pub const fn snap(self) -> SlotIndex {
        self.index(Self::SNAP_SHIFT)
    }

    /// Truth that the clean slot holds a value the reader has not claimed
    pub const fn is_new_write(self) -> bool {
        self.0 & Self::NEW_WRITE != 0
    }

    /// State after the writer publishes its dirty slot
    ///
    /// The freshly written slot becomes clean, the former clean slot is
    /// recycled as the next dirty slot. Whatever was in the clean slot and
    /// unclaimed is thereby dropped from the reader's view.
    pub const fn flip_writer(self) -> Self {
        Self::pack(true, self.clean(), self.dirty(), self.snap())
    }

    /// State after the reader claims the clean slot, if there is anything
    /// new to claim
    pub const fn claim_snap(self) -> Option<Self> {
        if self.is_new_write() {
            Some(Self::pack(false, self.dirty(), self.snap(), self.clean()))
        } else {
            None
        }
    }

    /// Check that each role owns a distinct, in-range slot
    pub const fn is_permutation(self) -> bool {
        let (dirty, clean, snap) = (self.dirty(), self.clean(), self.snap());
        (self.0 & 0b1000_0000 == 0)
            && dirty < 3
            && clean < 3
            && snap < 3
            && dirty != clean
            && dirty != snap
            && clean != snap
    }
}
//
impl fmt::Debug for ControlWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlWord")
            .field("new_write", &self.is_new_write())
            .field("dirty", &self.dirty())
            .field("clean", &self.clean())
            .field("snap", &self.snap())
            .finish()
    }
}

/// Control word shared by the reader and the writer
///
/// Kept on its own cache line, since both sides hammer it while they work
/// on their own slots.
pub(crate) struct AtomicControlWord(CachePadded<AtomicU8>);
//
impl AtomicControlWord {
    pub fn new(word: ControlWord) -> Self {
        Self(CachePadded::new(AtomicU8::new(word.bits())))
    }

    pub fn load(&self, order: Ordering) -> ControlWord {
        ControlWord(self.0.load(order))
    }

    /// Publish the dirty slot, returning the resulting control word
    ///
    /// Only the reader's `claim_snap` can interfere, and it never touches
    /// the dirty index, so each retry sees at most one foreign update.
    pub fn flip_writer(&self) -> ControlWord {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            let flipped = current.flip_writer();
            debug_assert!(flipped.is_permutation());
            match self.0.compare_exchange_weak(
                current.bits(),
                flipped.bits(),
                // Release publishes the slot we wrote. Acquire orders our next
                // writes after the reader's last access to the recycled slot.
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return flipped,
                Err(observed) => current = ControlWord(observed),
            }
        }
    }

    /// Move the latest published value into the snap slot
    ///
    /// Returns the resulting control word, or `None` if nothing was
    /// published since the previous claim.
    pub fn claim_snap(&self) -> Option<ControlWord> {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            let claimed = current.claim_snap()?;
            debug_assert!(claimed.is_permutation());
            match self.0.compare_exchange_weak(
                current.bits(),
                claimed.bits(),
                // Acquire makes the writer's data visible. Release hands our
                // former snap slot back once we are done reading it.
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(claimed),
                Err(observed) => current = ControlWord(observed),
            }
        }
    }
}
//
impl fmt::Debug for AtomicControlWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.load(Ordering::Relaxed).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Enumerate every valid control word
    fn all_valid_words() -> Vec<ControlWord> {
        const PERMUTATIONS: [(SlotIndex, SlotIndex, SlotIndex); 6] = [
            (0, 1, 2),
            (0, 2, 1),
            (1, 0, 2),
            (1, 2, 0),
            (2, 0, 1),
            (2, 1, 0),
        ];
        PERMUTATIONS
            .iter()
            .flat_map(|&(dirty, clean, snap)| {
                [false, true]
                    .into_iter()
                    .map(move |new_write| ControlWord::pack(new_write, dirty, clean, snap))
            })
            .collect()
    }

    #[test]
    fn initial_layout() {
        let word = ControlWord::INITIAL;
        assert_eq!(word.bits(), 0x06);
        assert!(!word.is_new_write());
        assert_eq!((word.dirty(), word.clean(), word.snap()), (0, 1, 2));
        assert!(word.is_permutation());
    }

    #[test]
    fn field_packing() {
        let word = ControlWord::pack(true, 2, 0, 1);
        assert_eq!(word.bits(), 0b0110_0001);
        assert!(word.is_new_write());
        assert_eq!((word.dirty(), word.clean(), word.snap()), (2, 0, 1));
    }

    /// Flipping always raises the flag and swaps dirty with clean
    #[test]
    fn flip_writer_algebra() {
        for word in all_valid_words() {
            let flipped = word.flip_writer();
            assert!(flipped.is_new_write());
            assert_eq!(flipped.dirty(), word.clean());
            assert_eq!(flipped.clean(), word.dirty());
            assert_eq!(flipped.snap(), word.snap());
            assert!(flipped.is_permutation());
        }
    }

    /// Claiming only succeeds on fresh data, and swaps snap with clean
    #[test]
    fn claim_snap_algebra() {
        for word in all_valid_words() {
            match word.claim_snap() {
                None => assert!(!word.is_new_write()),
                Some(claimed) => {
                    assert!(word.is_new_write());
                    assert!(!claimed.is_new_write());
                    assert_eq!(claimed.dirty(), word.dirty());
                    assert_eq!(claimed.clean(), word.snap());
                    assert_eq!(claimed.snap(), word.clean());
                    assert!(claimed.is_permutation());
                }
            }
        }
    }

    #[test]
    fn permutation_check() {
        assert!(!ControlWord::pack(false, 1, 1, 2).is_permutation());
        assert!(!ControlWord::pack(true, 0, 3, 2).is_permutation());
        assert!(!ControlWord(0x86).is_permutation());
        assert_eq!(all_valid_words().len(), 12);
        assert!(all_valid_words().into_iter().all(ControlWord::is_permutation));
    }

    #[test]
    fn atomic_transitions() {
        let control = AtomicControlWord::new(ControlWord::INITIAL);

        // Nothing to claim yet
        assert_eq!(control.claim_snap(), None);
        assert_eq!(control.load(Ordering::Relaxed), ControlWord::INITIAL);

        // Two publications in a row keep swapping dirty and clean
        let first = control.flip_writer();
        assert_eq!(first, ControlWord::pack(true, 1, 0, 2));
        let second = control.flip_writer();
        assert_eq!(second, ControlWord::pack(true, 0, 1, 2));

        // Claim takes the last publication, then there is nothing left
        let claimed = control.claim_snap();
        assert_eq!(claimed, Some(ControlWord::pack(false, 0, 2, 1)));
        assert_eq!(control.claim_snap(), None);
        assert_eq!(control.load(Ordering::Relaxed), ControlWord::pack(false, 0, 2, 1));
    }
}
