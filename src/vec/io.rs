//! Collective binary file I/O.
//!
//! On-disk format: a little-endian `i32` at offset 0 holding the total
//! scalar count (`Nglobal * B`), followed by the scalar values in global
//! node order. The layout is independent of the rank count: every rank
//! writes or reads its owned slab at a positioned offset computed from the
//! owner range.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::comm::collective::broadcast_bytes;
use crate::comm::communicator::{CommTag, Communicator};
use crate::comm::wire::{cast_slice, cast_slice_mut};
use crate::error::BlockVecError;
use crate::vec::BlockVec;
use crate::Scalar;

const TAG_IO: CommTag = CommTag::new(0x6B20);
const HEADER_LEN: u64 = 4;

impl<C: Communicator> BlockVec<C> {
    /// Write the vector to `path`. Collective: rank 0 writes the header,
    /// every rank writes its owned slab; the filename must resolve to the
    /// same file on all ranks.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), BlockVecError> {
        let path = path.as_ref();
        let comm = self.owner_map().comm().clone();
        let b = self.block_size();
        let total = (self.owner_map().global_len() as usize) * b;
        let header = i32::try_from(total).map_err(|_| BlockVecError::HeaderOverflow(total))?;

        if comm.rank() == 0 {
            let f = File::create(path).map_err(|e| BlockVecError::io(path, e))?;
            f.write_all_at(&header.to_le_bytes(), 0)
                .map_err(|e| BlockVecError::io(path, e))?;
        }
        // Writers wait for the file to exist before opening it.
        comm.barrier();

        let start = self.owner_map().owned_range(comm.rank()).start as u64;
        let offset = HEADER_LEN + start * (b as u64) * std::mem::size_of::<Scalar>() as u64;
        let f = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| BlockVecError::io(path, e))?;
        f.write_all_at(cast_slice(self.local_values()), offset)
            .map_err(|e| BlockVecError::io(path, e))?;
        // The file is complete once every rank returns.
        comm.barrier();
        Ok(())
    }

    /// Read the vector from `path`. Collective. If the stored length does
    /// not match this vector's layout, the owned region is zeroed on every
    /// rank and an error is returned, preventing silent partial reads.
    pub fn read_from_file(&mut self, path: impl AsRef<Path>) -> Result<(), BlockVecError> {
        let path = path.as_ref();
        let comm = self.owner_map().comm().clone();
        let b = self.block_size();
        let total = (self.owner_map().global_len() as usize) * b;

        let file = File::open(path).map_err(|e| BlockVecError::io(path, e))?;
        let mut wire = [0u8; 8];
        if comm.rank() == 0 {
            let mut hdr = [0u8; 4];
            let len: i64 = match file.read_exact_at(&mut hdr, 0) {
                Ok(()) => i32::from_le_bytes(hdr) as i64,
                Err(_) => -1,
            };
            wire = len.to_le_bytes();
        }
        broadcast_bytes(comm.as_ref(), 0, &mut wire, TAG_IO)?;
        let len = i64::from_le_bytes(wire);
        if len != total as i64 {
            self.local_values_mut().fill(0.0);
            return Err(BlockVecError::FileLengthMismatch {
                path: path.to_path_buf(),
                expected: total,
                found: len.max(0) as usize,
            });
        }

        let start = self.owner_map().owned_range(comm.rank()).start as u64;
        let offset = HEADER_LEN + start * (b as u64) * std::mem::size_of::<Scalar>() as u64;
        file.read_exact_at(cast_slice_mut(self.local_values_mut()), offset)
            .map_err(|e| BlockVecError::io(path, e))?;
        Ok(())
    }
}
