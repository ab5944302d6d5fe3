//! Fixed, little-endian wire helpers for the exchange paths.
//!
//! All multi-byte integers on the wire are little-endian; scalar payloads are
//! native `f64` (the crate targets homogeneous clusters, as the original I/O
//! format's "native" representation does).

use bytemuck::{Pod, Zeroable};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Count of following records, little-endian `u32` on the wire.
#[repr(transparent)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount(u32);

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self((n as u32).to_le())
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.0) as usize
    }
}

const _: () = {
    assert!(std::mem::size_of::<WireCount>() == 4);
};
