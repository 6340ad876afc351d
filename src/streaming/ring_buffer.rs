//! Sample ring between a voice worker and the device callback
//!
//! One producer (the voice's worker, through its output line) and one
//! consumer (the rodio source pulled by the device thread). Memory use is
//! fixed at `capacity * size_of::<f32>()` however long the sound is.

use crate::{AudioError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Largest ring we agree to allocate, in samples (64 MB of f32)
const MAX_CAPACITY: usize = 64 * 1024 * 1024 / std::mem::size_of::<f32>();

/// Fixed-size single-producer single-consumer sample queue
///
/// Positions grow monotonically and are masked into the storage, so the
/// capacity is a power of two and one slot always stays empty.
#[derive(Debug)]
pub struct RingBuffer {
    samples: Mutex<Vec<f32>>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    capacity: usize,
    mask: usize,
}

impl RingBuffer {
    /// Create a ring holding at least `min_capacity - 1` samples
    ///
    /// # Errors
    ///
    /// [`AudioError::ConfigError`] for a zero or oversized capacity.
    pub fn new(min_capacity: usize) -> Result<Self> {
        if min_capacity == 0 {
            return Err(AudioError::ConfigError(
                "ring capacity must be greater than 0".into(),
            ));
        }
        let capacity = min_capacity.next_power_of_two();
        if capacity > MAX_CAPACITY {
            return Err(AudioError::ConfigError(format!(
                "ring capacity {capacity} exceeds maximum {MAX_CAPACITY}"
            )));
        }

        Ok(RingBuffer {
            samples: Mutex::new(vec![0.0; capacity]),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        })
    }

    /// Slots in the storage, one more than can be queued
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples queued and not yet read
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Samples that can be written without being refused
    pub fn available_write(&self) -> usize {
        self.capacity - 1 - self.available_read()
    }

    /// Queue as many of `src` as fit; returns how many were taken
    pub fn write(&self, src: &[f32]) -> usize {
        let mut storage = self.samples.lock();
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        let free = self.capacity - 1 - write.wrapping_sub(read);

        let n = src.len().min(free);
        if n == 0 {
            return 0;
        }

        let start = write & self.mask;
        let first = n.min(self.capacity - start);
        storage[start..start + first].copy_from_slice(&src[..first]);
        storage[..n - first].copy_from_slice(&src[first..n]);
        drop(storage);

        self.write_pos.store(write.wrapping_add(n), Ordering::Release);
        n
    }

    /// Dequeue up to `dest.len()` samples; returns how many were read
    pub fn read(&self, dest: &mut [f32]) -> usize {
        let storage = self.samples.lock();
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);

        let n = dest.len().min(write.wrapping_sub(read));
        if n == 0 {
            return 0;
        }

        let start = read & self.mask;
        let first = n.min(self.capacity - start);
        dest[..first].copy_from_slice(&storage[start..start + first]);
        dest[first..n].copy_from_slice(&storage[..n - first]);
        drop(storage);

        self.read_pos.store(read.wrapping_add(n), Ordering::Release);
        n
    }

    /// Drop everything queued
    pub fn clear(&self) {
        let _storage = self.samples.lock();
        let write = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounded_up() {
        let ring = RingBuffer::new(1000).unwrap();
        assert_eq!(ring.capacity(), 1024);
        assert_eq!(ring.available_write(), 1023);
        assert_eq!(ring.available_read(), 0);
    }

    #[test]
    fn test_write_then_read() {
        let ring = RingBuffer::new(16).unwrap();
        assert_eq!(ring.write(&[0.1, 0.2, 0.3]), 3);
        let mut out = [0.0; 8];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(&out[..3], &[0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_full_ring_refuses() {
        let ring = RingBuffer::new(8).unwrap();
        assert_eq!(ring.write(&[1.0; 20]), 7);
        assert_eq!(ring.write(&[1.0]), 0);
        assert_eq!(ring.available_write(), 0);
    }

    #[test]
    fn test_wrap_around_keeps_order() {
        let ring = RingBuffer::new(8).unwrap();
        ring.write(&[0.0; 6]);
        let mut sink = [0.0; 6];
        ring.read(&mut sink);

        let data: Vec<f32> = (0..7).map(|i| i as f32).collect();
        assert_eq!(ring.write(&data), 7);
        let mut out = [0.0; 7];
        assert_eq!(ring.read(&mut out), 7);
        assert_eq!(out.to_vec(), data);
    }

    #[test]
    fn test_clear() {
        let ring = RingBuffer::new(16).unwrap();
        ring.write(&[1.0; 8]);
        ring.clear();
        assert_eq!(ring.available_read(), 0);
        assert_eq!(ring.available_write(), 15);
    }

    #[test]
    fn test_invalid_capacity() {
        assert!(RingBuffer::new(0).is_err());
        assert!(RingBuffer::new(MAX_CAPACITY + 1).is_err());
    }
}
