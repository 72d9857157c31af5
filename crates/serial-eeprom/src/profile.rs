//! Static chip configuration.
//!
//! A [`Profile`] describes one EEPROM part the way its datasheet does:
//! address width, cell width, the command bit patterns it answers to, and
//! whether it continues into the next cell after a read. Board code builds
//! one per chip instance:
//!
//! ```
//! use serial_eeprom::{DataWidth, Profile};
//!
//! // The part behind CPS-1 QSound boards: 128 8-bit cells.
//! let profile = Profile::new(7, DataWidth::Eight)?
//!     .with_read("0110")?
//!     .with_write("0101")?
//!     .with_erase("0111")?;
//! assert_eq!(profile.cells(), 128);
//! assert_eq!(profile.storage_bytes(), 128);
//! # Ok::<(), serial_eeprom::ProfileError>(())
//! ```

use std::fmt;

use thiserror::Error;

use crate::COMMAND_BUFFER_BITS;

/// Largest content array any profile may declare, in bytes.
///
/// Inherited from the fixed buffer the original hardware interface was
/// written against. Profiles over this limit are rejected outright instead
/// of silently truncated.
pub const MAX_STORAGE_BYTES: usize = 256;

/// Invalid chip configuration, reported when a [`Profile`] is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProfileError {
    /// A chip needs at least one address bit.
    #[error("address bit count must be at least 1")]
    ZeroAddressBits,
    /// The configured geometry would need more storage than the ceiling.
    #[error("profile needs {bytes} bytes of storage, over the {MAX_STORAGE_BYTES}-byte ceiling")]
    StorageTooLarge {
        /// Bytes the configuration would require.
        bytes: usize,
    },
    /// A command pattern string was empty.
    #[error("command pattern is empty")]
    EmptyPattern,
    /// A command pattern is longer than the command buffer can hold.
    #[error("command pattern is {bits} bits, longer than the {COMMAND_BUFFER_BITS}-bit command buffer")]
    PatternTooLong {
        /// Length of the offending pattern.
        bits: usize,
    },
    /// A command pattern contained a character other than '0' or '1'.
    #[error("command pattern may only contain '0' and '1', found {found:?}")]
    InvalidPatternChar {
        /// The offending character.
        found: char,
    },
}

/// Cell width of the part: 8 or 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWidth {
    /// 8-bit cells, one byte each.
    Eight,
    /// 16-bit cells, stored high byte first.
    Sixteen,
}

impl DataWidth {
    /// Bits per cell.
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            DataWidth::Eight => 8,
            DataWidth::Sixteen => 16,
        }
    }

    /// Bytes per cell.
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            DataWidth::Eight => 1,
            DataWidth::Sixteen => 2,
        }
    }

    /// All-ones mask for one cell.
    #[must_use]
    pub fn mask(self) -> u16 {
        match self {
            DataWidth::Eight => 0x00FF,
            DataWidth::Sixteen => 0xFFFF,
        }
    }
}

/// A command bit pattern: the fixed MSB-first prefix identifying one
/// operation, parsed from the `'0'`/`'1'` strings board tables use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitPattern {
    bits: u64,
    len: u8,
}

// No `is_empty`: empty patterns cannot be constructed.
#[allow(clippy::len_without_is_empty)]
impl BitPattern {
    /// Parse a pattern from a string of `'0'` and `'1'` characters.
    ///
    /// # Errors
    ///
    /// Rejects empty strings, strings longer than the command buffer, and
    /// any character outside `{'0', '1'}`.
    pub fn parse(pattern: &str) -> Result<Self, ProfileError> {
        if pattern.is_empty() {
            return Err(ProfileError::EmptyPattern);
        }
        if pattern.len() > COMMAND_BUFFER_BITS as usize {
            return Err(ProfileError::PatternTooLong {
                bits: pattern.len(),
            });
        }
        let mut bits = 0u64;
        for ch in pattern.chars() {
            bits = (bits << 1)
                | match ch {
                    '0' => 0,
                    '1' => 1,
                    found => return Err(ProfileError::InvalidPatternChar { found }),
                };
        }
        Ok(Self {
            bits,
            len: pattern.len() as u8,
        })
    }

    /// Pattern length in bits.
    #[must_use]
    pub fn len(&self) -> u8 {
        self.len
    }

    pub(crate) fn bits(&self) -> u64 {
        self.bits
    }
}

impl fmt::Display for BitPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..self.len).rev() {
            f.write_str(if (self.bits >> i) & 1 != 0 { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// Datasheet-style description of one serial EEPROM part.
///
/// Commands left unset are disabled: the decoder will never match them.
/// Validation happens here, at construction, so a built `Profile` always
/// describes a representable chip.
#[derive(Debug, Clone)]
pub struct Profile {
    address_bits: u8,
    data_width: DataWidth,
    read: Option<BitPattern>,
    write: Option<BitPattern>,
    erase: Option<BitPattern>,
    lock: Option<BitPattern>,
    unlock: Option<BitPattern>,
    multi_read: bool,
}

impl Profile {
    /// Create a profile with the given geometry and no commands enabled.
    ///
    /// # Errors
    ///
    /// Rejects zero address bits and any geometry whose content array would
    /// exceed [`MAX_STORAGE_BYTES`] (e.g. 8 address bits with 16-bit cells).
    pub fn new(address_bits: u8, data_width: DataWidth) -> Result<Self, ProfileError> {
        if address_bits == 0 {
            return Err(ProfileError::ZeroAddressBits);
        }
        // Saturate past usize::BITS rather than overflow the shift; any such
        // geometry is over the ceiling regardless of the exact byte count.
        let bytes = 1usize
            .checked_shl(u32::from(address_bits))
            .map_or(usize::MAX, |cells| cells.saturating_mul(data_width.bytes()));
        if bytes > MAX_STORAGE_BYTES {
            return Err(ProfileError::StorageTooLarge { bytes });
        }
        Ok(Self {
            address_bits,
            data_width,
            read: None,
            write: None,
            erase: None,
            lock: None,
            unlock: None,
            multi_read: false,
        })
    }

    /// Enable the read command.
    ///
    /// # Errors
    ///
    /// Propagates pattern parse errors.
    pub fn with_read(mut self, pattern: &str) -> Result<Self, ProfileError> {
        self.read = Some(BitPattern::parse(pattern)?);
        Ok(self)
    }

    /// Enable the write command.
    ///
    /// # Errors
    ///
    /// Propagates pattern parse errors.
    pub fn with_write(mut self, pattern: &str) -> Result<Self, ProfileError> {
        self.write = Some(BitPattern::parse(pattern)?);
        Ok(self)
    }

    /// Enable the erase command.
    ///
    /// # Errors
    ///
    /// Propagates pattern parse errors.
    pub fn with_erase(mut self, pattern: &str) -> Result<Self, ProfileError> {
        self.erase = Some(BitPattern::parse(pattern)?);
        Ok(self)
    }

    /// Enable the lock command.
    ///
    /// Lock and unlock patterns carry no operand: the whole pattern string
    /// is the command, dummy bits included (e.g. `"0100110000"`).
    ///
    /// # Errors
    ///
    /// Propagates pattern parse errors.
    pub fn with_lock(mut self, pattern: &str) -> Result<Self, ProfileError> {
        self.lock = Some(BitPattern::parse(pattern)?);
        Ok(self)
    }

    /// Enable the unlock command. A chip with an unlock command powers up
    /// locked.
    ///
    /// # Errors
    ///
    /// Propagates pattern parse errors.
    pub fn with_unlock(mut self, pattern: &str) -> Result<Self, ProfileError> {
        self.unlock = Some(BitPattern::parse(pattern)?);
        Ok(self)
    }

    /// Enable sequential continuation reads: after the last bit of a cell
    /// is shifted out, the device reloads from the next address (wrapping)
    /// without a new read command.
    #[must_use]
    pub fn with_multi_read(mut self) -> Self {
        self.multi_read = true;
        self
    }

    /// Address width in bits.
    #[must_use]
    pub fn address_bits(&self) -> u8 {
        self.address_bits
    }

    /// Cell width.
    #[must_use]
    pub fn data_width(&self) -> DataWidth {
        self.data_width
    }

    /// Number of addressable cells.
    #[must_use]
    pub fn cells(&self) -> usize {
        1 << self.address_bits
    }

    /// Size of the content array in bytes.
    #[must_use]
    pub fn storage_bytes(&self) -> usize {
        self.cells() * self.data_width.bytes()
    }

    /// Read command pattern, if enabled.
    #[must_use]
    pub fn read(&self) -> Option<BitPattern> {
        self.read
    }

    /// Write command pattern, if enabled.
    #[must_use]
    pub fn write(&self) -> Option<BitPattern> {
        self.write
    }

    /// Erase command pattern, if enabled.
    #[must_use]
    pub fn erase(&self) -> Option<BitPattern> {
        self.erase
    }

    /// Lock command pattern, if enabled.
    #[must_use]
    pub fn lock(&self) -> Option<BitPattern> {
        self.lock
    }

    /// Unlock command pattern, if enabled.
    #[must_use]
    pub fn unlock(&self) -> Option<BitPattern> {
        self.unlock
    }

    /// Whether continuation reads are enabled.
    #[must_use]
    pub fn multi_read(&self) -> bool {
        self.multi_read
    }

    /// Whether the part has a lock mechanism. Lockable parts power up
    /// locked.
    #[must_use]
    pub fn lockable(&self) -> bool {
        self.unlock.is_some()
    }
}
