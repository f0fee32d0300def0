//! Task buffer pool (spec §3, §5).
//!
//! Each connection borrows a fixed-size buffer for the lifetime of one
//! request/response cycle instead of allocating per frame. The teacher's own
//! buffer pool (`allocator.rs`) is an unsafe intrusive-linked-list arena built
//! for NFS's variable-length chained writes; task buffers here are always the
//! same fixed size (spec §3: "a task buffer is a fixed-size byte slice"), so
//! a lock-free fixed-capacity queue of pre-allocated `Vec<u8>`s covers the
//! same ground without `unsafe`.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// A buffer checked out of the pool. Returns itself on drop.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Arc<Inner>,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    pub fn resize(&mut self, len: usize) {
        self.data.resize(len, 0);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut returned = std::mem::take(&mut self.data);
        returned.clear();
        returned.resize(self.pool.buffer_size, 0);
        // ArrayQueue::push only fails when full, which only happens if more
        // buffers are live than were ever checked out; dropping the buffer is
        // harmless in that case, it just shrinks the steady-state pool.
        let _ = self.pool.free.push(returned);
    }
}

struct Inner {
    free: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
}

/// A bounded pool of fixed-size task buffers (spec §3, §5: "the network
/// layer never allocates per-frame; it checks a buffer out of a shared
/// pool and returns it when the request completes").
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = free.push(vec![0u8; buffer_size]);
        }
        Self { inner: Arc::new(Inner { free, buffer_size }) }
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Checks out a buffer, allocating fresh if the pool is momentarily
    /// exhausted rather than making a connection wait on disk workers that
    /// might be waiting on the network in turn.
    pub fn acquire(&self) -> PooledBuffer {
        let data = match self.inner.free.pop() {
            Some(buf) => buf,
            None => vec![0u8; self.inner.buffer_size],
        };
        PooledBuffer { data, pool: self.inner.clone() }
    }

    pub fn available(&self) -> usize {
        self.inner.free.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reuses_buffers_after_drop() {
        let pool = BufferPool::new(2, 128);
        assert_eq!(pool.available(), 2);
        let buf = pool.acquire();
        assert_eq!(pool.available(), 1);
        drop(buf);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn grows_past_capacity_without_blocking() {
        let pool = BufferPool::new(1, 64);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(b.len(), 64);
        drop(a);
        drop(b);
        assert!(pool.available() <= 1);
    }
}
