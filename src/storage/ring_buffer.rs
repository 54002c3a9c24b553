use core::cmp::min;
use managed::ManagedSlice;

use super::{Empty, Full, Resettable};

/// A ring buffer.
///
/// This ring buffer implementation provides many ways to interact with it:
///
///  * Enqueuing and dequeuing one element from respectively the back and the front of the
///    buffer;
///  * Enqueuing and dequeuing multiple elements from respectively the back and the front of the
///    buffer;
///  * Accessing the contents of the buffer, and in particular a contiguous range starting at the
///    front of it, without mutating nor dequeuing them.
#[derive(Debug)]
pub struct RingBuffer<'a, T: 'a> {
    storage: ManagedSlice<'a, T>,
    read_at: usize,
    length: usize,
}

impl<'a, T: 'a> RingBuffer<'a, T> {
    /// Create a ring buffer with the given storage.
    ///
    /// During creation, every element in `storage` is reset.
    pub fn new<S>(storage: S) -> RingBuffer<'a, T>
    where
        S: Into<ManagedSlice<'a, T>>,
    {
        RingBuffer {
            storage: storage.into(),
            read_at: 0,
            length: 0,
        }
    }

    /// Clear the ring buffer.
    pub fn clear(&mut self) {
        self.read_at = 0;
        self.length = 0;
    }

    /// Return the maximum number of elements in the ring buffer.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Clear the ring buffer, and reset every element.
    pub fn reset(&mut self)
    where
        T: Resettable,
    {
        self.clear();
        for elem in self.storage.iter_mut() {
            elem.reset();
        }
    }

    /// Return the current number of elements in the ring buffer.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Return the number of elements that can be added to the ring buffer.
    pub fn window(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Query whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Query whether the buffer is full.
    pub fn is_full(&self) -> bool {
        self.window() == 0
    }

    /// Shorthand for `self.enqueue_many_with(|buf| (f(buf), ()))`.
    pub fn enqueue_many_with<'b, R, F>(&'b mut self, f: F) -> (usize, R)
    where
        F: FnOnce(&'b mut [T]) -> (usize, R),
    {
        if self.length == 0 {
            self.read_at = 0;
        }

        let write_at = (self.read_at + self.length) % self.capacity();
        let max_size = self.capacity() - self.length;
        let write_capacity = min(max_size, self.capacity() - write_at);
        let (size, result) = f(&mut self.storage[write_at..write_at + write_capacity]);
        debug_assert!(size <= write_capacity);
        self.length += size;
        (size, result)
    }

    /// Call `f` with the largest contiguous slice of unallocated buffer elements,
    /// and enqueue the amount of elements returned by `f`.
    ///
    /// # Panics
    /// This function panics if the amount of elements returned by `f` is larger
    /// than the size of the slice passed into it.
    pub fn enqueue_many_with_then<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut [T]) -> (usize, R),
    {
        self.enqueue_many_with(f).1
    }

    /// Enqueue a slice of elements up to the given size into the buffer, and return a
    /// reference to them.
    ///
    /// This function may return a slice smaller than the given size if the free space
    /// in the buffer is not contiguous.
    pub fn enqueue_many(&mut self, size: usize) -> &mut [T] {
        self.enqueue_many_with(|buf| {
            let size = min(size, buf.len());
            (size, &mut buf[..size])
        })
        .1
    }

    /// Enqueue as many elements from the given slice into the buffer as possible, and return
    /// the amount of elements that could fit.
    pub fn enqueue_slice(&mut self, data: &[T]) -> usize
    where
        T: Copy,
    {
        let data_len = data.len();
        let (size_1, data) = self.enqueue_many_with(|buf| {
            let size = min(buf.len(), data_len);
            buf[..size].copy_from_slice(&data[..size]);
            (size, &data[size..])
        });
        let (size_2, ()) = self.enqueue_many_with(|buf| {
            let size = min(buf.len(), data.len());
            buf[..size].copy_from_slice(&data[..size]);
            (size, ())
        });
        size_1 + size_2
    }

    /// Enqueue one element into the buffer, and return a reference to it.
    ///
    /// This function returns `Err(Full)` if the buffer is full.
    pub fn enqueue_one_with<'b, R, F>(&'b mut self, f: F) -> Result<R, Full>
    where
        F: FnOnce(&'b mut T) -> R,
    {
        if self.is_full() {
            return Err(Full);
        }

        if self.length == 0 {
            self.read_at = 0;
        }

        let write_at = (self.read_at + self.length) % self.capacity();
        self.length += 1;
        Ok(f(&mut self.storage[write_at]))
    }

    /// Enqueue one element into the buffer.
    ///
    /// This function returns `Err(Full)` if the buffer is full.
    pub fn enqueue_one(&mut self) -> Result<&mut T, Full> {
        self.enqueue_one_with(|elem| elem)
    }

    /// Shorthand for `self.dequeue_many_with(|buf| (f(buf), ()))`.
    pub fn dequeue_many_with<'b, R, F>(&'b mut self, f: F) -> (usize, R)
    where
        F: FnOnce(&'b mut [T]) -> (usize, R),
    {
        let capacity = self.capacity();
        let max_size = self.length;
        let read_capacity = min(max_size, capacity - self.read_at);
        let (size, result) = f(&mut self.storage[self.read_at..self.read_at + read_capacity]);
        debug_assert!(size <= read_capacity);
        self.read_at = if capacity > 0 {
            (self.read_at + size) % capacity
        } else {
            0
        };
        self.length -= size;
        (size, result)
    }

    /// Call `f` with the largest contiguous slice of allocated buffer elements,
    /// and dequeue the amount of elements returned by `f`.
    pub fn dequeue_many_with_then<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut [T]) -> (usize, R),
    {
        self.dequeue_many_with(f).1
    }

    /// Dequeue a slice of elements up to the given size from the buffer, and return a reference
    /// to them.
    pub fn dequeue_many(&mut self, size: usize) -> &mut [T] {
        self.dequeue_many_with(|buf| {
            let size = min(size, buf.len());
            (size, &mut buf[..size])
        })
        .1
    }

    /// Dequeue as many elements from the buffer into the given slice as possible, and return
    /// the amount of elements that could be dequeued.
    pub fn dequeue_slice(&mut self, data: &mut [T]) -> usize
    where
        T: Copy,
    {
        let data_len = data.len();
        let (size_1, data) = self.dequeue_many_with(|buf| {
            let size = min(buf.len(), data_len);
            data[..size].copy_from_slice(&buf[..size]);
            (size, &mut data[size..])
        });
        let (size_2, ()) = self.dequeue_many_with(|buf| {
            let size = min(buf.len(), data.len());
            data[..size].copy_from_slice(&buf[..size]);
            (size, ())
        });
        size_1 + size_2
    }

    /// Dequeue one element from the buffer.
    ///
    /// This function returns `Err(Empty)` if the buffer is empty.
    pub fn dequeue_one_with<'b, R, F>(&'b mut self, f: F) -> Result<R, Empty>
    where
        F: FnOnce(&'b mut T) -> R,
    {
        if self.is_empty() {
            return Err(Empty);
        }

        let next_at = self.read_at;
        self.length -= 1;
        self.read_at = if self.capacity() > 0 {
            (self.read_at + 1) % self.capacity()
        } else {
            0
        };
        Ok(f(&mut self.storage[next_at]))
    }

    /// Dequeue one element from the buffer.
    ///
    /// This function returns `Err(Empty)` if the buffer is empty.
    pub fn dequeue_one(&mut self) -> Result<&mut T, Empty> {
        self.dequeue_one_with(|elem| elem)
    }

    /// Peek at an element in the buffer, without dequeuing, and return a
    /// reference to it, at the given offset from the first (oldest) one.
    pub fn get_allocated(&self, offset: usize, size: usize) -> &[T] {
        let capacity = self.capacity();
        let read_at = if capacity > 0 {
            (self.read_at + offset) % capacity
        } else {
            0
        };
        let clamped_len = min(self.length.saturating_sub(offset), size);
        let read_capacity = min(clamped_len, capacity - read_at);
        &self.storage[read_at..read_at + read_capacity]
    }

    /// Write as many elements from the given slice into the buffer as possible, starting at
    /// `offset`, and return the amount of elements that could be written.
    pub fn write_unallocated(&mut self, offset: usize, data: &[T]) -> usize
    where
        T: Copy,
    {
        let capacity = self.capacity();
        let write_at = if capacity > 0 {
            (self.read_at + self.length + offset) % capacity
        } else {
            0
        };
        let max_size = capacity - self.length - offset;
        let data_len = min(max_size, data.len());

        let size_1 = min(data_len, capacity - write_at);
        self.storage[write_at..write_at + size_1].copy_from_slice(&data[..size_1]);

        let size_2 = data_len - size_1;
        self.storage[..size_2].copy_from_slice(&data[size_1..size_1 + size_2]);

        data_len
    }

    /// Enqueue the given number of unallocated buffer elements.
    ///
    /// # Panics
    /// This function panics if the number of elements given exceeds the number of unallocated
    /// elements.
    pub fn enqueue_unallocated(&mut self, count: usize) {
        assert!(count <= self.window());
        self.length += count;
    }

    /// Return the largest contiguous slice of unallocated buffer elements, and an offset from
    /// which it continues, if the free space is not contiguous.
    pub fn get_unallocated(&mut self, offset: usize, size: usize) -> &mut [T] {
        let capacity = self.capacity();
        let write_at = if capacity > 0 {
            (self.read_at + self.length + offset) % capacity
        } else {
            0
        };
        let max_size = capacity - self.length - offset;
        let write_capacity = min(max_size, capacity - write_at);
        let size = min(size, write_capacity);
        &mut self.storage[write_at..write_at + size]
    }

    /// Dequeue the given number of elements from the buffer, without looking at them.
    ///
    /// # Panics
    /// This function panics if the number of elements given exceeds the number of allocated
    /// elements.
    pub fn dequeue_allocated(&mut self, count: usize) {
        assert!(count <= self.len());
        self.length -= count;
        self.read_at = if self.capacity() > 0 {
            (self.read_at + count) % self.capacity()
        } else {
            0
        };
    }
}

impl<'a, T: 'a> From<ManagedSlice<'a, T>> for RingBuffer<'a, T> {
    fn from(slice: ManagedSlice<'a, T>) -> RingBuffer<'a, T> {
        RingBuffer::new(slice)
    }
}

impl<'a, T: 'a> From<&'a mut [T]> for RingBuffer<'a, T> {
    fn from(slice: &'a mut [T]) -> RingBuffer<'a, T> {
        RingBuffer::new(slice)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_enqueue_dequeue_one() {
        let mut ring = RingBuffer::new(vec![0u8; 4]);
        assert!(ring.is_empty());
        assert!(!ring.is_full());
        assert_eq!(*ring.enqueue_one().unwrap(), 0);
        assert!(!ring.is_empty());
        assert!(!ring.is_full());
        *ring.enqueue_one().unwrap() = 1;
        *ring.enqueue_one().unwrap() = 2;
        *ring.enqueue_one().unwrap() = 3;
        assert!(ring.is_full());
        assert_eq!(ring.enqueue_one(), Err(Full));

        assert_eq!(ring.dequeue_one(), Ok(&mut 0));
        assert_eq!(ring.dequeue_one(), Ok(&mut 1));
        assert_eq!(ring.dequeue_one(), Ok(&mut 2));
        assert_eq!(ring.dequeue_one(), Ok(&mut 3));
        assert_eq!(ring.dequeue_one(), Err(Empty));
    }

    #[test]
    fn test_buffer_wraps() {
        let mut ring = RingBuffer::new(vec![0u8; 4]);
        assert_eq!(ring.enqueue_slice(&[0, 1, 2]), 3);
        assert_eq!(ring.dequeue_many(2), [0, 1]);
        assert_eq!(ring.enqueue_slice(&[3, 4, 5]), 3);
        let mut out = [0; 4];
        assert_eq!(ring.dequeue_slice(&mut out), 4);
        assert_eq!(out, [2, 3, 4, 5]);
    }

    #[test]
    fn test_get_unallocated_respects_contiguity() {
        let mut ring: RingBuffer<'_, u8> = RingBuffer::new(vec![0u8; 4]);
        ring.enqueue_slice(&[1, 2]);
        ring.dequeue_many(2);
        // read_at is now 2; unallocated space wraps, so a single contiguous
        // slice from offset 0 cannot be the full window.
        let slice = ring.get_unallocated(0, 4);
        assert_eq!(slice.len(), 2);
    }
}
