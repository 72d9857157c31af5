//! Content array and shift-out engine.
//!
//! [`Storage`] owns the persistent cell array and the lock flag; it is the
//! only place cells are mutated. [`ShiftOut`] is the read cursor: it holds
//! the value currently being serialised, one bit per clock edge, and exists
//! only while a read is in progress.

use log::{debug, trace};
use thiserror::Error;

use crate::profile::{DataWidth, Profile};

/// Byte value of a factory-blank cell.
const BLANK: u8 = 0xFF;

/// A persisted image whose length does not match the chip's content array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("image is {found} bytes, storage holds {expected}")]
pub struct ImageSizeError {
    /// Size of the chip's content array.
    pub expected: usize,
    /// Size of the supplied image.
    pub found: usize,
}

/// Persistent cell array plus the write-protect flag.
///
/// 16-bit cells are stored high byte first, so a saved image is laid out
/// exactly as the emulated program sees it through read commands.
pub(crate) struct Storage {
    data: Vec<u8>,
    width: DataWidth,
    locked: bool,
    /// Lockable parts power up locked; this is the state `blank` restores.
    lockable: bool,
}

impl Storage {
    pub(crate) fn new(profile: &Profile) -> Self {
        Self {
            data: vec![BLANK; profile.storage_bytes()],
            width: profile.data_width(),
            locked: profile.lockable(),
            lockable: profile.lockable(),
        }
    }

    /// Number of addressable cells.
    pub(crate) fn cells(&self) -> u16 {
        (self.data.len() / self.width.bytes()) as u16
    }

    pub(crate) fn locked(&self) -> bool {
        self.locked
    }

    /// Restore the factory-blank state: all cells erased, lock reset.
    pub(crate) fn blank(&mut self) {
        self.data.fill(BLANK);
        self.locked = self.lockable;
    }

    pub(crate) fn read_cell(&self, address: u16) -> u16 {
        let i = address as usize * self.width.bytes();
        match self.width {
            DataWidth::Eight => u16::from(self.data[i]),
            DataWidth::Sixteen => (u16::from(self.data[i]) << 8) | u16::from(self.data[i + 1]),
        }
    }

    pub(crate) fn write(&mut self, address: u16, value: u16) {
        if self.locked {
            debug!("write {value:#06x} to cell {address:#04x} ignored while locked");
            return;
        }
        let i = address as usize * self.width.bytes();
        match self.width {
            DataWidth::Eight => self.data[i] = value as u8,
            DataWidth::Sixteen => {
                self.data[i] = (value >> 8) as u8;
                self.data[i + 1] = value as u8;
            }
        }
    }

    pub(crate) fn erase(&mut self, address: u16) {
        if self.locked {
            debug!("erase of cell {address:#04x} ignored while locked");
            return;
        }
        let i = address as usize * self.width.bytes();
        self.data[i..i + self.width.bytes()].fill(0);
    }

    pub(crate) fn lock(&mut self) {
        self.locked = true;
    }

    pub(crate) fn unlock(&mut self) {
        self.locked = false;
    }

    /// Byte-exact restore of a saved image.
    pub(crate) fn load(&mut self, image: &[u8]) -> Result<(), ImageSizeError> {
        if image.len() != self.data.len() {
            return Err(ImageSizeError {
                expected: self.data.len(),
                found: image.len(),
            });
        }
        self.data.copy_from_slice(image);
        Ok(())
    }

    /// The raw content array, byte for byte. No header, no framing.
    pub(crate) fn save(&self) -> &[u8] {
        &self.data
    }

    /// Bulk-seed from a factory-default image. Short images seed a prefix;
    /// over-long images are truncated to the content array.
    pub(crate) fn set_data(&mut self, image: &[u8]) {
        let n = image.len().min(self.data.len());
        self.data[..n].copy_from_slice(&image[..n]);
    }
}

/// Read cursor: the register being shifted out during a read.
pub(crate) struct ShiftOut {
    /// One bit wider than the cell: the loaded value sits below the output
    /// tap, which is why the first observable bit of any read is 0.
    value: u32,
    clock_count: u8,
    address: u16,
    width: DataWidth,
}

impl ShiftOut {
    pub(crate) fn begin(storage: &Storage, address: u16) -> Self {
        Self {
            value: u32::from(storage.read_cell(address)),
            clock_count: 0,
            address,
            width: storage.width,
        }
    }

    /// The bit currently on the output line: bit `data_bits` of the
    /// register.
    pub(crate) fn output_bit(&self) -> u8 {
        ((self.value >> self.width.bits()) & 1) as u8
    }

    /// One clock edge: shift the register left, filling with 1s from the
    /// low end. With `multi_read`, an exhausted register first reloads from
    /// the next address, wrapping at the last cell.
    pub(crate) fn advance(&mut self, storage: &Storage, multi_read: bool) {
        let bits = self.width.bits();
        if multi_read && self.clock_count == bits {
            self.address = (self.address + 1) % storage.cells();
            self.value = u32::from(storage.read_cell(self.address));
            self.clock_count = 0;
            trace!("continuation read from cell {:#04x}", self.address);
        }
        // Keep one bit above the output tap; anything higher is spent.
        let mask = (1u32 << (bits + 1)) - 1;
        self.value = ((self.value << 1) | 1) & mask;
        self.clock_count = self.clock_count.saturating_add(1);
    }
}
