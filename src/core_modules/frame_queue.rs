// THEORY:
// The `frame_queue` module is the hand-off point between the capture thread and
// the analysis thread. It is a triple buffer, not a queue: it only ever delivers
// the freshest complete frame, and older frames are silently dropped when the
// consumer falls behind.
//
// Key architectural principles:
// 1.  **Three Slots, Three Roles**: At any instant one slot is the producer's
//     *back* buffer, one is the consumer's *front* buffer and the third is the
//     *spare*, which is either a finished frame waiting to be picked up or a
//     retired frame waiting to be reused. The roles are always a permutation of
//     the three slot indices.
// 2.  **One Atomic Word**: The spare's index, plus a "fresh" bit saying whether
//     it holds an unread frame, is the only shared state. The producer publishes
//     by exchanging its back index into that word; the consumer adopts a fresh
//     frame by exchanging its front index in. Neither side ever waits on the
//     other.
// 3.  **Payload Visibility**: Both exchanges are `AcqRel`. The producer's release
//     makes the frame contents visible together with the index, and the
//     consumer's release guarantees it has stopped reading a slot before the
//     producer can get it back.
// 4.  **Borrow-Scoped Access**: `back` and `swap` hand out references tied to a
//     `&mut` borrow of the owning half, so a slot reference can never outlive
//     the role it was handed out under.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const INDEX_MASK: u8 = 0b011;
const FRESH_BIT: u8 = 0b100;

struct Slots<T> {
    frames: [UnsafeCell<T>; 3],
    spare: AtomicU8,
}

// SAFETY: a slot is only ever reachable through the half that currently holds
// its index (`back` or `front`). Indices change hands exclusively through the
// `AcqRel` exchanges on `spare`, so no slot is accessed from two threads at once.
unsafe impl<T: Send> Sync for Slots<T> {}

/// Writing half of the triple buffer, owned by the capture thread.
pub struct FrameProducer<T> {
    slots: Arc<Slots<T>>,
    back: u8,
    pending: bool,
}

/// Reading half of the triple buffer, owned by the analysis thread.
pub struct FrameConsumer<T> {
    slots: Arc<Slots<T>>,
    front: u8,
}

/// Creates a triple buffer whose three slots are built by `init`.
pub fn frame_queue<T>(mut init: impl FnMut() -> T) -> (FrameProducer<T>, FrameConsumer<T>) {
    let slots = Arc::new(Slots {
        frames: [
            UnsafeCell::new(init()),
            UnsafeCell::new(init()),
            UnsafeCell::new(init()),
        ],
        spare: AtomicU8::new(1),
    });

    let producer = FrameProducer {
        slots: Arc::clone(&slots),
        back: 0,
        pending: false,
    };
    let consumer = FrameConsumer { slots, front: 2 };
    (producer, consumer)
}

impl<T> FrameProducer<T> {
    /// The slot the producer may write. Returns the same slot until `publish`.
    pub fn back(&mut self) -> &mut T {
        // SAFETY: `back` is owned by this half until it is exchanged in `publish`.
        unsafe { &mut *self.slots.frames[self.back as usize].get() }
    }

    /// Makes the back slot the newest frame and takes over the spare slot as
    /// the new back. If the consumer never picked up the previous frame, that
    /// frame is the one reclaimed and overwritten.
    pub fn publish(&mut self) {
        let previous = self
            .slots
            .spare
            .swap(self.back | FRESH_BIT, Ordering::AcqRel);
        self.back = previous & INDEX_MASK;
        self.pending = false;
    }

    /// Publishes whatever was written into the slot returned by the previous
    /// `push`, then returns the new back slot.
    pub fn push(&mut self) -> &mut T {
        if self.pending {
            self.publish();
        }
        self.pending = true;
        self.back()
    }
}

impl<T> FrameConsumer<T> {
    /// Whether a frame newer than the current front is waiting.
    pub fn has_new(&self) -> bool {
        self.slots.spare.load(Ordering::Acquire) & FRESH_BIT != 0
    }

    /// Adopts the newest published frame, if any, and returns the front slot.
    /// Without a new frame this returns the same slot as the previous call.
    pub fn swap(&mut self) -> &T {
        // Only the consumer clears the fresh bit, so it cannot vanish between
        // this check and the exchange.
        if self.has_new() {
            let previous = self.slots.spare.swap(self.front, Ordering::AcqRel);
            self.front = previous & INDEX_MASK;
        }
        self.front()
    }

    /// The current front slot, without looking for a newer frame.
    pub fn front(&self) -> &T {
        // SAFETY: `front` is owned by this half until it is exchanged in `swap`.
        unsafe { &*self.slots.frames[self.front as usize].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
    use std::thread;

    #[test]
    fn swap_without_push_returns_initial_front() {
        let (_producer, mut consumer) = frame_queue(|| 0u32);
        assert!(!consumer.has_new());
        assert_eq!(*consumer.swap(), 0);
    }

    #[test]
    fn swap_returns_most_recent_of_many_publishes() {
        let (mut producer, mut consumer) = frame_queue(|| 0u32);
        for value in 1..=5 {
            *producer.back() = value;
            producer.publish();
        }
        assert!(consumer.has_new());
        assert_eq!(*consumer.swap(), 5);
    }

    #[test]
    fn repeated_swap_is_idempotent() {
        let (mut producer, mut consumer) = frame_queue(|| 0u32);
        *producer.back() = 42;
        producer.publish();
        assert_eq!(*consumer.swap(), 42);
        assert!(!consumer.has_new());
        assert_eq!(*consumer.swap(), 42);
        assert_eq!(*consumer.swap(), 42);
    }

    #[test]
    fn back_is_stable_until_published() {
        let (mut producer, _consumer) = frame_queue(|| 0u32);
        *producer.back() = 1;
        *producer.back() += 1;
        assert_eq!(*producer.back(), 2);
        producer.publish();
        assert_ne!(*producer.back(), 2);
    }

    #[test]
    fn push_publishes_previous_write() {
        let (mut producer, mut consumer) = frame_queue(|| 0u32);
        *producer.push() = 1;
        assert!(!consumer.has_new());
        *producer.push() = 2;
        assert_eq!(*consumer.swap(), 1);
        *producer.push() = 3;
        assert_eq!(*consumer.swap(), 2);
    }

    #[test]
    fn roles_remain_a_permutation() {
        let (mut producer, mut consumer) = frame_queue(|| 0u32);
        for round in 0..20 {
            producer.publish();
            if round % 3 == 0 {
                consumer.swap();
            }
            let spare = producer.slots.spare.load(SeqCst) & INDEX_MASK;
            let mut roles = [producer.back, consumer.front, spare];
            roles.sort();
            assert_eq!(roles, [0, 1, 2]);
        }
    }

    struct Payload {
        busy: AtomicUsize,
        sequence: u64,
        data: [u64; 32],
    }

    impl Payload {
        fn new() -> Self {
            Self {
                busy: AtomicUsize::new(0),
                sequence: 0,
                data: [0; 32],
            }
        }
    }

    #[test]
    fn concurrent_handoff_never_aliases_or_tears() {
        const FRAMES: u64 = 20_000;
        let (mut producer, mut consumer) = frame_queue(Payload::new);

        thread::scope(|scope| {
            scope.spawn(move || {
                for sequence in 1..=FRAMES {
                    let slot = producer.back();
                    assert_eq!(slot.busy.fetch_add(1, SeqCst), 0, "slot shared while writing");
                    slot.sequence = sequence;
                    slot.data = [sequence; 32];
                    slot.busy.fetch_sub(1, SeqCst);
                    producer.publish();
                }
            });

            scope.spawn(move || {
                let mut last_seen = 0;
                while last_seen < FRAMES {
                    let frame = consumer.swap();
                    assert_eq!(frame.busy.fetch_add(1, SeqCst), 0, "slot shared while reading");
                    assert!(frame.data.iter().all(|&v| v == frame.sequence), "torn frame");
                    assert!(frame.sequence >= last_seen, "frame went back in time");
                    last_seen = frame.sequence;
                    frame.busy.fetch_sub(1, SeqCst);
                    thread::yield_now();
                }
            });
        });
    }
}
