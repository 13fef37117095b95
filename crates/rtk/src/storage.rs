//! Thread workspaces.
//!
//! A thread owns its workspace through [`ThreadStorage`]. Static workspaces are
//! never reclaimed; heap and pool workspaces are returned to their owner once
//! the terminated thread's last handle is released.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::sync::{Arc, Mutex};

/// How a workspace was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Static,
    Heap,
    Pool,
}

/// Memory a thread runs on.
pub trait ThreadStorage: Send + 'static {
    fn workspace(&mut self) -> &mut [u8];

    fn kind(&self) -> StorageKind;

    /// Returns the memory to its owner. Called once, after the thread reached
    /// its final state and its last reference is gone.
    fn reclaim(self: Box<Self>) {}
}

/// Workspace carved out of a `'static` buffer.
pub struct StaticWorkspace(&'static mut [u8]);

impl StaticWorkspace {
    pub fn new(buffer: &'static mut [u8]) -> Self {
        Self(buffer)
    }
}

impl ThreadStorage for StaticWorkspace {
    fn workspace(&mut self) -> &mut [u8] {
        &mut *self.0
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Static
    }
}

/// Workspace allocated on the heap, freed on reclaim.
pub struct HeapWorkspace(Box<[u8]>);

impl HeapWorkspace {
    pub fn new(size: usize) -> Self {
        Self(vec![0u8; size].into_boxed_slice())
    }
}

impl ThreadStorage for HeapWorkspace {
    fn workspace(&mut self) -> &mut [u8] {
        &mut self.0
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Heap
    }
}

/// Fixed-size block allocator for thread workspaces.
pub struct MemoryPool {
    block_size: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

impl MemoryPool {
    /// Preallocates `blocks` workspaces of `block_size` bytes.
    pub fn new(block_size: usize, blocks: usize) -> Arc<Self> {
        let free = (0..blocks)
            .map(|_| vec![0u8; block_size].into_boxed_slice())
            .collect();
        Arc::new(Self {
            block_size,
            free: Mutex::new(free),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks currently available.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Takes a block out of the pool, or `None` when the pool is exhausted.
    pub fn alloc(self: &Arc<Self>) -> Option<PoolWorkspace> {
        let block = self.free.lock().pop()?;
        Some(PoolWorkspace {
            block,
            pool: Arc::clone(self),
        })
    }

    fn give_back(&self, block: Box<[u8]>) {
        self.free.lock().push(block);
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("block_size", &self.block_size)
            .field("available", &self.available())
            .finish()
    }
}

/// Workspace borrowed from a [`MemoryPool`].
pub struct PoolWorkspace {
    block: Box<[u8]>,
    pool: Arc<MemoryPool>,
}

impl ThreadStorage for PoolWorkspace {
    fn workspace(&mut self) -> &mut [u8] {
        &mut self.block
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Pool
    }

    fn reclaim(self: Box<Self>) {
        let PoolWorkspace { block, pool } = *self;
        pool.give_back(block);
    }
}
