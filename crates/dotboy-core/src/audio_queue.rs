use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Single-producer / single-consumer queue of stereo i16 frames.
///
/// The emulator thread produces samples while an audio callback thread
/// consumes them, without locks on either side. Each frame is packed into
/// one `AtomicU32` slot (left sample in the low half, right in the high
/// half), so the queue needs no unsafe code: a slot is published by the
/// release store of the producer's position counter and reclaimed by the
/// release store of the consumer's.
///
/// Positions count monotonically and are reduced modulo the power-of-two
/// capacity on access; the queue is full when the producer runs a whole
/// capacity ahead of the consumer. The queue is *lossy* when full: new
/// pushes are dropped. The host paces emulation against
/// [`AudioProducer::len`] so this only happens when the machine runs faster
/// than the sink drains.
#[derive(Clone)]
pub struct AudioProducer {
    inner: Arc<Inner>,
}

#[derive(Clone)]
pub struct AudioConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    slots: Box<[AtomicU32]>,
    /// Capacity (a power of two) minus one; slot index is `position & mask`.
    mask: usize,
    /// Total frames ever pushed.
    head: AtomicUsize,
    /// Total frames ever popped.
    tail: AtomicUsize,
}

impl Inner {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }
}

fn pack(left: i16, right: i16) -> u32 {
    (left as u16 as u32) | ((right as u16 as u32) << 16)
}

fn unpack(frame: u32) -> (i16, i16) {
    (frame as u16 as i16, (frame >> 16) as u16 as i16)
}

/// Create a queue holding at least `capacity_frames` stereo frames (rounded
/// up to a power of two).
pub fn audio_queue(capacity_frames: usize) -> (AudioProducer, AudioConsumer) {
    let cap = capacity_frames.max(2).next_power_of_two();
    let mut slots = Vec::with_capacity(cap);
    slots.resize_with(cap, || AtomicU32::new(0));

    let inner = Arc::new(Inner {
        slots: slots.into_boxed_slice(),
        mask: cap - 1,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });

    (
        AudioProducer {
            inner: Arc::clone(&inner),
        },
        AudioConsumer { inner },
    )
}

impl AudioProducer {
    /// Append one stereo frame. Returns false (dropping the frame) when full.
    #[inline]
    pub fn push_stereo(&self, left: i16, right: i16) -> bool {
        let inner = &*self.inner;
        let head = inner.head.load(Ordering::Relaxed);
        let tail = inner.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) > inner.mask {
            return false;
        }

        inner.slots[head & inner.mask].store(pack(left, right), Ordering::Relaxed);
        inner.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AudioConsumer {
    /// Pop the oldest stereo frame, in FIFO order.
    #[inline]
    pub fn pop_stereo(&self) -> Option<(i16, i16)> {
        let inner = &*self.inner;
        let tail = inner.tail.load(Ordering::Relaxed);
        let head = inner.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        let frame = inner.slots[tail & inner.mask].load(Ordering::Relaxed);
        inner.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(unpack(frame))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
