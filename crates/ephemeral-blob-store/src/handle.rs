//! Handle generation

use crate::types::{Handle, DEFAULT_HANDLE_BYTES};
use rand::RngCore;

/// Source of candidate handles.
///
/// Generators are stateless; uniqueness is checked by the store under its
/// own lock, which retries a bounded number of times.
pub trait HandleGenerator: Send + Sync + 'static {
    fn generate(&self) -> Handle;
}

/// Hex-encoded handles drawn from a cryptographically secure RNG
#[derive(Debug, Clone)]
pub struct RandomHandles {
    len: usize,
}

impl RandomHandles {
    pub fn new(len: usize) -> Self {
        Self { len: len.max(1) }
    }
}

impl Default for RandomHandles {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLE_BYTES)
    }
}

impl HandleGenerator for RandomHandles {
    fn generate(&self) -> Handle {
        let mut bytes = vec![0u8; self.len];
        rand::rng().fill_bytes(&mut bytes);
        Handle::from_bytes(&bytes)
    }
}
