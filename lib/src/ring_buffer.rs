/// Fixed-capacity FIFO backed by an inline array.
///
/// Slots hold `Option<T>` so element types need no `Default`, which lets
/// plain data enums (pending actions, notices) be queued directly.
#[derive(Debug)]
pub struct RingBuffer<T, const N: usize> {
    data: [Option<T>; N],
    head: usize,
    tail: usize,
    count: usize,
}

impl<T: Copy, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy, const N: usize> RingBuffer<T, N> {
    /// Const-compatible constructor, usable in statics.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            data: [None; N],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[inline(always)]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline(always)]
    pub fn reset(&mut self) {
        self.data = [None; N];
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }

    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline(always)]
    pub const fn is_full(&self) -> bool {
        self.count >= N
    }

    /// Push, dropping the oldest element when full.
    #[inline(always)]
    pub fn push_overwrite(&mut self, value: T) {
        if N == 0 {
            return;
        }
        if self.is_full() {
            self.data[self.tail] = None;
            self.tail = (self.tail + 1) % N;
            self.count -= 1;
        }
        self.data[self.head] = Some(value);
        self.head = (self.head + 1) % N;
        self.count += 1;
    }

    /// Push without overwrite; returns false if full.
    #[inline(always)]
    pub fn try_push(&mut self, value: T) -> bool {
        if self.is_full() {
            return false;
        }
        self.data[self.head] = Some(value);
        self.head = (self.head + 1) % N;
        self.count += 1;
        true
    }

    /// Pop the oldest element.
    #[inline(always)]
    pub fn try_pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let value = self.data[self.tail].take();
        self.tail = (self.tail + 1) % N;
        self.count -= 1;
        value
    }

    #[inline(always)]
    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.data[self.tail].as_ref()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.count).filter_map(move |i| self.data[(self.tail + i) % N].as_ref())
    }

    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.iter().any(|v| v == value)
    }

    /// Keep only the elements for which `keep` returns true, preserving order.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        let count = self.count;
        let mut kept = 0;
        for i in 0..count {
            let src = (self.tail + i) % N;
            let Some(value) = self.data[src].take() else {
                continue;
            };
            if keep(&value) {
                self.data[(self.tail + kept) % N] = Some(value);
                kept += 1;
            }
        }
        self.count = kept;
        self.head = (self.tail + kept) % N;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_and_capacity() {
        let mut rb: RingBuffer<u8, 3> = RingBuffer::new();
        assert!(rb.try_push(1));
        assert!(rb.try_push(2));
        assert!(rb.try_push(3));
        assert!(!rb.try_push(4));
        assert_eq!(rb.peek(), Some(&1));
        assert_eq!(rb.try_pop(), Some(1));
        assert!(rb.try_push(4));
        assert_eq!(rb.try_pop(), Some(2));
        assert_eq!(rb.try_pop(), Some(3));
        assert_eq!(rb.try_pop(), Some(4));
        assert_eq!(rb.try_pop(), None);
    }

    #[test]
    fn overwrite_drops_oldest() {
        let mut rb: RingBuffer<u8, 2> = RingBuffer::new();
        rb.push_overwrite(1);
        rb.push_overwrite(2);
        rb.push_overwrite(3);
        assert_eq!(rb.len(), 2);
        assert_eq!(rb.try_pop(), Some(2));
        assert_eq!(rb.try_pop(), Some(3));
    }

    #[test]
    fn retain_compacts_across_wrap() {
        let mut rb: RingBuffer<u8, 4> = RingBuffer::new();
        for v in [9, 9, 1, 2] {
            rb.try_push(v);
        }
        rb.try_pop();
        rb.try_pop();
        rb.try_push(3);
        rb.try_push(4);
        rb.retain(|v| v % 2 == 0);
        assert_eq!(rb.len(), 2);
        assert!(rb.contains(&2));
        assert!(!rb.contains(&3));
        assert_eq!(rb.try_pop(), Some(2));
        assert_eq!(rb.try_pop(), Some(4));
        assert!(rb.is_empty());
        assert!(rb.try_push(5));
    }
}
