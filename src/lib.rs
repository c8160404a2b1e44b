//! A triple buffer driven by a single packed control word
//!
//! In this crate, we implement a triple buffering mechanism, suitable for
//! emulating a shared memory cell between one single writer and one single
//! reader in a thread-safe, lock-free and allocation-free fashion.
//!
//! Three storage slots rotate between three roles:
//!
//! - **dirty**: the slot the writer is currently filling
//! - **clean**: the last fully written slot, not yet claimed by the reader
//! - **snap**: the slot currently exposed to the reader
//!
//! Which slot plays which role, plus a "new write" flag, is packed into one
//! atomic byte. Publishing a value and claiming it are each a single
//! compare-and-swap on that byte, so the writer never waits for the reader
//! and vice versa. If the writer publishes several values between two claims,
//! only the latest one reaches the reader.
//!
//! ```
//! use packed_triple_buffer::TripleBuffer;
//!
//! let (mut writer, mut reader) = TripleBuffer::new(0u32).split();
//!
//! writer.update(4);
//! writer.update(5);
//! assert_eq!(reader.read_last(), 5);
//!
//! // Nothing new was published, the reader keeps its snapshot
//! assert!(!reader.new_snap());
//! assert_eq!(reader.snap(), 5);
//! ```

#![deny(missing_debug_implementations, missing_docs)]

mod control;

use crate::control::{AtomicControlWord, ControlWord};
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A triple buffer, useful for nonblocking and thread-safe data sharing
///
/// A triple buffer is a single-producer single-consumer nonblocking
/// communication channel which behaves like a shared variable: the writer
/// submits regular updates, the reader accesses the latest available value
/// at any time.
///
/// The whole operation set is available on this struct for single-threaded
/// use. To share the buffer between two threads, [`split`](Self::split) it
/// into its [`Writer`] and [`Reader`] halves. Since neither half can be
/// cloned, there is always at most one writer and one reader.
#[derive(Debug)]
pub struct TripleBuffer<T> {
    writer: Writer<T>,
    reader: Reader<T>,
}
//
impl<T: Clone> TripleBuffer<T> {
    /// Construct a triple buffer with a certain initial value
    ///
    /// The value is replicated into all three slots.
    pub fn new(initial: T) -> Self {
        Self::from_slots([initial.clone(), initial.clone(), initial])
    }
}
//
impl<T: Default> Default for TripleBuffer<T> {
    /// Construct a triple buffer with a default-constructed value in each slot
    fn default() -> Self {
        Self::from_slots([T::default(), T::default(), T::default()])
    }
}
//
impl<T> TripleBuffer<T> {
    /// Build the shared state, then the two halves that access it
    fn from_slots(slots: [T; 3]) -> Self {
        let shared_state = Arc::new(SharedState {
            buffers: slots.map(UnsafeCell::new),
            control: AtomicControlWord::new(ControlWord::INITIAL),
        });
        TripleBuffer {
            writer: Writer {
                shared: shared_state.clone(),
            },
            reader: Reader {
                shared: shared_state,
                _borrows_t: PhantomData,
            },
        }
    }

    /// Extract the writer and reader halves of the triple buffer
    pub fn split(self) -> (Writer<T>, Reader<T>) {
        (self.writer, self.reader)
    }

    /// Store a value into the dirty slot, see [`Writer::write`]
    pub fn write(&mut self, value: T) {
        self.writer.write(value)
    }

    /// Publish the dirty slot, see [`Writer::flip_writer`]
    pub fn flip_writer(&mut self) {
        self.writer.flip_writer()
    }

    /// Write and publish a value, see [`Writer::update`]
    pub fn update(&mut self, value: T) {
        self.writer.update(value)
    }

    /// Claim the latest published value, see [`Reader::new_snap`]
    pub fn new_snap(&mut self) -> bool {
        self.reader.new_snap()
    }

    /// Borrow the reader's current snapshot, see [`Reader::peek`]
    pub fn peek(&self) -> &T {
        self.reader.peek()
    }
}
//
impl<T: Clone> TripleBuffer<T> {
    /// Copy the reader's current snapshot, see [`Reader::snap`]
    pub fn snap(&self) -> T {
        self.reader.snap()
    }

    /// Claim then copy the latest value, see [`Reader::read_last`]
    pub fn read_last(&mut self) -> T {
        self.reader.read_last()
    }
}

/// Producer interface to the triple buffer
///
/// The producer of data can use this struct to submit updates to the triple
/// buffer whenever it likes. These updates are nonblocking: a collision
/// between the producer and the consumer will result in a retried
/// compare-and-swap on the control word, but deadlocks and scheduling-induced
/// slowdowns cannot happen.
#[derive(Debug)]
pub struct Writer<T> {
    shared: Arc<SharedState<T>>,
}
//
impl<T> Writer<T> {
    /// Store a value into the dirty slot, without publishing it
    ///
    /// The previous contents of the dirty slot are dropped. The reader will
    /// not see the new value until [`flip_writer`](Self::flip_writer) is
    /// called.
    pub fn write(&mut self, value: T) {
        *self.dirty_buffer_mut() = value;
    }

    /// Access the dirty slot for in-place modification
    ///
    /// This avoids moving large values around. The slot contents are
    /// whatever was recycled from an older publication (or the initial
    /// value), so callers usually overwrite them fully before calling
    /// [`flip_writer`](Self::flip_writer).
    pub fn dirty_buffer_mut(&mut self) -> &mut T {
        let shared_state = &*self.shared;

        // Only the writer changes the dirty index, so the value we load is
        // one we stored ourselves.
        let dirty_idx = shared_state.control.load(Ordering::Relaxed).dirty();

        // Exclusive access is guaranteed because the reader never touches the
        // dirty slot and we hold &mut self
        let dirty_ptr = shared_state.buffers[dirty_idx].get();
        unsafe { &mut *dirty_ptr }
    }

    /// Publish the dirty slot
    ///
    /// The slot we just wrote becomes the clean slot, and the former clean
    /// slot becomes the dirty slot for the next write. A value that was
    /// published earlier and never claimed by the reader is discarded.
    pub fn flip_writer(&mut self) {
        self.shared.control.flip_writer();
    }

    /// Write a value, then publish it
    pub fn update(&mut self, value: T) {
        self.write(value);
        self.flip_writer();
    }

    /// Truth that the reader has claimed the last published value
    ///
    /// Also true if nothing was ever published. This is only a hint, as the
    /// reader may claim a value right after the check.
    pub fn consumed(&self) -> bool {
        !self.shared.control.load(Ordering::Relaxed).is_new_write()
    }
}

/// Consumer interface to the triple buffer
///
/// The consumer of data can use this struct to access the latest published
/// update from the producer whenever it likes. Readout is nonblocking: a
/// collision between the producer and consumer will result in a retried
/// compare-and-swap on the control word, but deadlocks and
/// scheduling-induced slowdowns cannot happen.
///
/// [`peek`](Self::peek) hands out `&T` through `&self`, so a `Reader` can
/// only be shared between threads when `T` itself is `Sync`.
#[derive(Debug)]
pub struct Reader<T> {
    shared: Arc<SharedState<T>>,

    /// Makes `Reader<T>: Sync` require `T: Sync`, since `SharedState` is
    /// `Sync` for any `T: Send`
    _borrows_t: PhantomData<T>,
}
//
impl<T> Reader<T> {
    /// Claim the latest published value, if there is one
    ///
    /// Returns `false` if nothing was published since the last successful
    /// claim, in which case the current snapshot is left untouched.
    pub fn new_snap(&mut self) -> bool {
        self.shared.control.claim_snap().is_some()
    }

    /// Borrow the current snapshot
    ///
    /// The snapshot only changes when [`new_snap`](Self::new_snap) succeeds,
    /// so repeated calls return the same value.
    pub fn peek(&self) -> &T {
        let shared_state = &*self.shared;

        // Only the reader changes the snap index
        let snap_idx = shared_state.control.load(Ordering::Relaxed).snap();

        // The writer never touches the snap slot, and new_snap needs &mut self
        let snap_ptr = shared_state.buffers[snap_idx].get();
        unsafe { &*snap_ptr }
    }

    /// Truth that a published value is waiting to be claimed
    ///
    /// This is only a hint, as the writer may publish right after the check.
    pub fn updated(&self) -> bool {
        self.shared.control.load(Ordering::Relaxed).is_new_write()
    }
}
//
impl<T: Clone> Reader<T> {
    /// Copy the current snapshot
    pub fn snap(&self) -> T {
        self.peek().clone()
    }

    /// Claim the latest published value if any, then copy the snapshot
    ///
    /// Use [`new_snap`](Self::new_snap) and [`snap`](Self::snap) separately
    /// to find out whether the value is fresh.
    pub fn read_last(&mut self) -> T {
        self.new_snap();
        self.snap()
    }
}

/// Triple buffer shared state
///
/// The reader and writer share three storage slots, and one control word
/// telling which slot currently plays the dirty, clean and snap role.
#[derive(Debug)]
struct SharedState<T> {
    /// Data storage slots
    buffers: [UnsafeCell<T>; 3],

    /// Role assignment and "new write" flag
    control: AtomicControlWord,
}
//
// The writer only ever accesses the dirty slot and the reader only ever
// accesses the snap slot. Ownership of a slot changes hands through the
// control word, which provides the required acquire/release ordering.
// Shared `&T` access to the snap slot is gated by `Reader`'s own Sync bound.
unsafe impl<T: Send> Sync for SharedState<T> {}
