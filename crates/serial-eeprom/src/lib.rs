//! Generic bit-serial EEPROM controller.
//!
//! Standalone IC emulation in the project's chip-level library pattern
//! (like `nec-upd765` and `mos-cia-8520`), covering the 93Cxx-style
//! three-wire command protocol shared by dozens of arcade boards: CPS-1
//! QSound, Taito B, Konami TMNT, Leland, and friends. The chip itself is
//! generic; each board supplies a [`Profile`] describing the part it
//! actually carries.
//!
//! # Wire interface
//!
//! Three input lines and one output line:
//! - **Chip select / reset** — asserting it deselects the chip and aborts
//!   any command or read in progress; deasserting it selects the chip.
//! - **Clock** — each rising edge (or explicit pulse) advances the
//!   protocol by one bit.
//! - **Data in** — latched by [`SerialEeprom::write_bit`], sampled on the
//!   next clock edge.
//! - **Data out** — read at any time via [`SerialEeprom::read_bit`];
//!   idles high.
//!
//! # State machine
//!
//! Inactive (deselected) → Idle (selected, accumulating command bits) →
//! Reading (shifting a value out, one bit per clock edge) → back to
//! Inactive on chip-select. Write, erase, lock, and unlock execute the
//! moment their last bit arrives and leave the chip in Idle.
//!
//! # Board glue
//!
//! How a memory-mapped I/O write decomposes into line changes is
//! per-board wiring, kept outside this crate. On CPS-1 the EEPROM port
//! maps bit 0 to data, bit 6 to clock, and bit 7 (inverted) to chip
//! select:
//!
//! ```
//! use serial_eeprom::{DataWidth, Profile, SerialEeprom};
//!
//! let profile = Profile::new(6, DataWidth::Sixteen)?
//!     .with_read("0110")?
//!     .with_write("0101")?
//!     .with_erase("0111")?;
//! let mut eeprom = SerialEeprom::new(profile);
//!
//! fn port_write(eeprom: &mut SerialEeprom, data: u8) {
//!     eeprom.write_bit(data & 0x01 != 0);
//!     eeprom.set_cs_line(data & 0x80 == 0);
//!     eeprom.set_clock_line(data & 0x40 != 0);
//! }
//!
//! fn port_read(eeprom: &SerialEeprom) -> u8 {
//!     eeprom.read_bit()
//! }
//!
//! port_write(&mut eeprom, 0x80); // selected, clock low
//! assert_eq!(port_read(&eeprom), 1); // output line idles high
//! # Ok::<(), serial_eeprom::ProfileError>(())
//! ```

use log::{trace, warn};

pub mod profile;
mod storage;

pub use profile::{BitPattern, DataWidth, MAX_STORAGE_BYTES, Profile, ProfileError};
pub use storage::ImageSizeError;

use storage::{ShiftOut, Storage};

/// Command buffer capacity in bits. Bits beyond this are dropped until a
/// chip-select reset; the device has no overflow recovery of its own.
pub(crate) const COMMAND_BUFFER_BITS: u8 = 39;

/// Protocol state of the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipState {
    /// Deselected. Line changes other than chip-select are ignored.
    Inactive,
    /// Selected, accumulating command bits.
    Idle,
    /// Selected, shifting a value out one bit per clock edge.
    Reading,
}

/// Accumulated command bits, MSB-first, capped at [`COMMAND_BUFFER_BITS`].
#[derive(Debug, Default)]
struct CommandBuffer {
    bits: u64,
    len: u8,
}

impl CommandBuffer {
    fn clear(&mut self) {
        self.bits = 0;
        self.len = 0;
    }

    /// Append one bit. Returns false when the cap drops it.
    fn push(&mut self, bit: bool) -> bool {
        if self.len >= COMMAND_BUFFER_BITS {
            return false;
        }
        self.bits = (self.bits << 1) | u64::from(bit);
        self.len += 1;
        true
    }

    /// Match the buffer against `pattern` followed by `operand_bits`
    /// operand bits. Requires exact total length and prefix equality;
    /// returns the operand (MSB-first unsigned) on a match.
    fn operand(&self, pattern: BitPattern, operand_bits: u8) -> Option<u64> {
        if self.len != pattern.len() + operand_bits {
            return None;
        }
        if (self.bits >> operand_bits) != pattern.bits() {
            return None;
        }
        Some(self.bits & ((1u64 << operand_bits) - 1))
    }
}

/// One serial EEPROM instance.
///
/// All state lives in the value: boards carrying more than one such part
/// instantiate one `SerialEeprom` per chip, nothing is shared.
pub struct SerialEeprom {
    profile: Profile,
    storage: Storage,
    /// Present exactly while `state == Reading`.
    shift: Option<ShiftOut>,
    state: ChipState,
    buffer: CommandBuffer,
    /// Data-in flip-flop, sampled on the next clock edge.
    latch: bool,
    clock_high: bool,
}

impl SerialEeprom {
    /// Create a chip in the power-on state: deselected, factory-blank
    /// storage (all 0xFF), locked iff the profile has an unlock command.
    #[must_use]
    pub fn new(profile: Profile) -> Self {
        Self {
            storage: Storage::new(&profile),
            profile,
            shift: None,
            state: ChipState::Inactive,
            buffer: CommandBuffer::default(),
            latch: false,
            // The clock line idles high; driving it high first is not an
            // edge.
            clock_high: true,
        }
    }

    /// Power-on reset: protocol state and storage both revert to the
    /// state [`SerialEeprom::new`] builds. Re-seed or re-load afterwards.
    pub fn reset(&mut self) {
        self.storage.blank();
        self.shift = None;
        self.state = ChipState::Inactive;
        self.buffer.clear();
        self.latch = false;
        self.clock_high = true;
    }

    /// Drive the chip-select / reset line.
    ///
    /// Asserting it deselects the chip from any state, discarding the
    /// command buffer and any read in progress (storage is untouched).
    /// Deasserting it selects the chip with an empty command buffer.
    pub fn set_cs_line(&mut self, asserted: bool) {
        if asserted {
            self.state = ChipState::Inactive;
            self.shift = None;
            self.buffer.clear();
        } else if self.state == ChipState::Inactive {
            self.state = ChipState::Idle;
            self.buffer.clear();
        }
    }

    /// Drive the clock line to a level. A low-to-high transition counts
    /// as one clock edge; anything else only records the level.
    pub fn set_clock_line(&mut self, high: bool) {
        let rising = high && !self.clock_high;
        self.clock_high = high;
        if rising {
            self.clock_edge();
        }
    }

    /// One explicit clock pulse, for boards that strobe the line rather
    /// than drive levels. Equivalent to a rising edge; the recorded line
    /// level is left alone.
    pub fn pulse_clock(&mut self) {
        self.clock_edge();
    }

    /// Latch the data-in line. Takes effect on the next clock edge.
    pub fn write_bit(&mut self, bit: bool) {
        self.latch = bit;
    }

    /// The data-out line: the shift register's output bit during a read,
    /// otherwise 1 (an unselected or idle device pulls the line high).
    #[must_use]
    pub fn read_bit(&self) -> u8 {
        match &self.shift {
            Some(shift) => shift.output_bit(),
            None => 1,
        }
    }

    /// Restore a previously saved image. The image must be exactly
    /// [`Profile::storage_bytes`] long.
    ///
    /// # Errors
    ///
    /// [`ImageSizeError`] on a length mismatch; storage is unchanged.
    pub fn load(&mut self, image: &[u8]) -> Result<(), ImageSizeError> {
        self.storage.load(image)
    }

    /// The raw content array, byte for byte — the persisted format, with
    /// no header or framing. 16-bit cells appear high byte first.
    #[must_use]
    pub fn save(&self) -> &[u8] {
        self.storage.save()
    }

    /// Bulk-seed storage with factory-default contents. Short images seed
    /// a prefix of the array; long ones are truncated.
    pub fn set_data(&mut self, image: &[u8]) {
        self.storage.set_data(image);
    }

    /// Current protocol state (for testing/debugging).
    #[must_use]
    pub fn state(&self) -> ChipState {
        self.state
    }

    /// Whether writes and erases are currently gated off.
    #[must_use]
    pub fn locked(&self) -> bool {
        self.storage.locked()
    }

    /// The profile this chip was built with.
    #[must_use]
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn clock_edge(&mut self) {
        match self.state {
            ChipState::Inactive => {}
            ChipState::Reading => {
                if let Some(shift) = self.shift.as_mut() {
                    shift.advance(&self.storage, self.profile.multi_read());
                }
            }
            ChipState::Idle => {
                if self.buffer.push(self.latch) {
                    self.try_execute();
                } else {
                    warn!(
                        "command buffer full at {COMMAND_BUFFER_BITS} bits, \
                         dropping bits until chip-select reset"
                    );
                }
            }
        }
    }

    /// Match the command buffer against the configured patterns, highest
    /// priority first, and execute on the first hit. No hit leaves the
    /// buffer accumulating.
    fn try_execute(&mut self) {
        let address_bits = self.profile.address_bits();
        let data_bits = self.profile.data_width().bits();

        if let Some(pattern) = self.profile.read() {
            if let Some(address) = self.buffer.operand(pattern, address_bits) {
                let address = address as u16;
                trace!("read from cell {address:#04x}");
                self.shift = Some(ShiftOut::begin(&self.storage, address));
                self.state = ChipState::Reading;
                self.buffer.clear();
                return;
            }
        }
        if let Some(pattern) = self.profile.erase() {
            if let Some(address) = self.buffer.operand(pattern, address_bits) {
                trace!("erase cell {address:#04x}");
                self.storage.erase(address as u16);
                self.buffer.clear();
                return;
            }
        }
        if let Some(pattern) = self.profile.write() {
            if let Some(operand) = self.buffer.operand(pattern, address_bits + data_bits) {
                let address = (operand >> data_bits) as u16;
                let value = (operand as u16) & self.profile.data_width().mask();
                trace!("write {value:#06x} to cell {address:#04x}");
                self.storage.write(address, value);
                self.buffer.clear();
                return;
            }
        }
        if let Some(pattern) = self.profile.lock() {
            if self.buffer.operand(pattern, 0).is_some() {
                trace!("lock");
                self.storage.lock();
                self.buffer.clear();
                return;
            }
        }
        if let Some(pattern) = self.profile.unlock() {
            if self.buffer.operand(pattern, 0).is_some() {
                trace!("unlock");
                self.storage.unlock();
                self.buffer.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 6 address bits x 16-bit cells, the pang3/taito_b-style part.
    fn profile_6x16() -> Profile {
        Profile::new(6, DataWidth::Sixteen)
            .expect("valid profile")
            .with_read("0110")
            .expect("valid pattern")
            .with_write("0101")
            .expect("valid pattern")
            .with_erase("0111")
            .expect("valid pattern")
    }

    /// 7 address bits x 8-bit cells with lock/unlock, the tmnt-style part.
    fn profile_7x8_lockable() -> Profile {
        Profile::new(7, DataWidth::Eight)
            .expect("valid profile")
            .with_read("011000")
            .expect("valid pattern")
            .with_write("011100")
            .expect("valid pattern")
            .with_lock("0100000000000")
            .expect("valid pattern")
            .with_unlock("0100110000000")
            .expect("valid pattern")
    }

    /// Cycle chip-select: reset protocol state, then select.
    fn select(eeprom: &mut SerialEeprom) {
        eeprom.set_cs_line(true);
        eeprom.set_cs_line(false);
    }

    /// Clock a bit string in, one latch + pulse per bit.
    fn clock_in(eeprom: &mut SerialEeprom, bits: &str) {
        for ch in bits.chars() {
            eeprom.write_bit(ch == '1');
            eeprom.pulse_clock();
        }
    }

    fn bit_string(value: u16, bits: u8) -> String {
        (0..bits)
            .rev()
            .map(|i| if (value >> i) & 1 != 0 { '1' } else { '0' })
            .collect()
    }

    /// Advance the clock `n` times, collecting the output bit after each
    /// edge.
    fn read_out(eeprom: &mut SerialEeprom, n: usize) -> Vec<u8> {
        (0..n)
            .map(|_| {
                eeprom.pulse_clock();
                eeprom.read_bit()
            })
            .collect()
    }

    fn bits_of(value: u16, bits: u8) -> Vec<u8> {
        (0..bits).rev().map(|i| ((value >> i) & 1) as u8).collect()
    }

    /// Issue a full write command: pattern + address + data.
    fn write_cell(eeprom: &mut SerialEeprom, address: u16, value: u16) {
        let address_bits = eeprom.profile().address_bits();
        let data_bits = eeprom.profile().data_width().bits();
        select(eeprom);
        clock_in(eeprom, "0101");
        clock_in(eeprom, &bit_string(address, address_bits));
        clock_in(eeprom, &bit_string(value, data_bits));
    }

    #[test]
    fn concrete_write_then_read_scenario() {
        let mut eeprom = SerialEeprom::new(profile_6x16());

        // Select, then clock in write "0101" + address 1 + 0x1234.
        select(&mut eeprom);
        clock_in(&mut eeprom, "0101");
        clock_in(&mut eeprom, "000001");
        clock_in(&mut eeprom, "0001001000110100");
        assert_eq!(eeprom.state(), ChipState::Idle);
        assert_eq!(&eeprom.save()[2..4], &[0x12, 0x34]);

        // Cycle CS, read back address 1.
        select(&mut eeprom);
        clock_in(&mut eeprom, "0110");
        clock_in(&mut eeprom, "000001");
        assert_eq!(eeprom.state(), ChipState::Reading);

        // Dummy start bit first, then 0x1234 MSB-first.
        assert_eq!(eeprom.read_bit(), 0);
        let bits = read_out(&mut eeprom, 16);
        assert_eq!(
            bits,
            vec![0, 0, 0, 1, 0, 0, 1, 0, 0, 0, 1, 1, 0, 1, 0, 0],
            "0x1234 MSB-first"
        );
    }

    #[test]
    fn level_driven_clock_counts_rising_edges_only() {
        let mut eeprom = SerialEeprom::new(profile_6x16());
        select(&mut eeprom);

        // Feed the read command driving levels instead of pulses.
        for ch in "0110000010".chars() {
            eeprom.write_bit(ch == '1');
            eeprom.set_clock_line(false);
            eeprom.set_clock_line(true);
            // Holding the line high must not clock again.
            eeprom.set_clock_line(true);
        }
        assert_eq!(eeprom.state(), ChipState::Reading);
    }

    #[test]
    fn latch_is_sampled_at_the_edge_not_when_written() {
        let mut eeprom = SerialEeprom::new(profile_6x16());
        select(&mut eeprom);

        // Several latch writes per edge; only the last one before the
        // edge counts.
        for ch in "0110000000".chars() {
            eeprom.write_bit(ch != '1');
            eeprom.write_bit(ch == '1');
            eeprom.pulse_clock();
        }
        assert_eq!(eeprom.state(), ChipState::Reading);
    }

    #[test]
    fn output_line_idles_high() {
        let mut eeprom = SerialEeprom::new(profile_6x16());
        assert_eq!(eeprom.read_bit(), 1, "deselected");
        select(&mut eeprom);
        assert_eq!(eeprom.read_bit(), 1, "selected, no read in progress");
    }

    #[test]
    fn eight_bit_part_round_trips() {
        let mut eeprom = SerialEeprom::new(
            Profile::new(7, DataWidth::Eight)
                .expect("valid profile")
                .with_read("0110")
                .expect("valid pattern")
                .with_write("0101")
                .expect("valid pattern"),
        );

        select(&mut eeprom);
        clock_in(&mut eeprom, "0101");
        clock_in(&mut eeprom, "1111111"); // address 127
        clock_in(&mut eeprom, "10100101"); // 0xA5

        select(&mut eeprom);
        clock_in(&mut eeprom, "0110");
        clock_in(&mut eeprom, "1111111");
        assert_eq!(eeprom.read_bit(), 0);
        assert_eq!(read_out(&mut eeprom, 8), bits_of(0xA5, 8));
    }

    #[test]
    fn erase_command_zeroes_the_cell() {
        let mut eeprom = SerialEeprom::new(profile_6x16());
        write_cell(&mut eeprom, 9, 0xABCD);

        select(&mut eeprom);
        clock_in(&mut eeprom, "0111");
        clock_in(&mut eeprom, "001001");

        select(&mut eeprom);
        clock_in(&mut eeprom, "0110");
        clock_in(&mut eeprom, "001001");
        assert_eq!(eeprom.read_bit(), 0);
        assert_eq!(read_out(&mut eeprom, 16), vec![0; 16]);
    }

    #[test]
    fn lock_gates_writes_until_unlock_command() {
        let mut eeprom = SerialEeprom::new(profile_7x8_lockable());
        assert!(eeprom.locked(), "lockable parts power up locked");
        let before = eeprom.save().to_vec();

        // Write while locked: storage must stay byte-identical.
        select(&mut eeprom);
        clock_in(&mut eeprom, "011100");
        clock_in(&mut eeprom, "0000011");
        clock_in(&mut eeprom, "01010101");
        assert_eq!(eeprom.save(), &before[..]);

        // Unlock, then the same write succeeds.
        select(&mut eeprom);
        clock_in(&mut eeprom, "0100110000000");
        assert!(!eeprom.locked());
        select(&mut eeprom);
        clock_in(&mut eeprom, "011100");
        clock_in(&mut eeprom, "0000011");
        clock_in(&mut eeprom, "01010101");
        assert_eq!(eeprom.save()[3], 0x55);

        // Lock again and verify gating resumes.
        select(&mut eeprom);
        clock_in(&mut eeprom, "0100000000000");
        assert!(eeprom.locked());
        select(&mut eeprom);
        clock_in(&mut eeprom, "011100");
        clock_in(&mut eeprom, "0000011");
        clock_in(&mut eeprom, "10101010");
        assert_eq!(eeprom.save()[3], 0x55);
    }

    #[test]
    fn overflow_freezes_buffer_until_chip_select_cycle() {
        let mut eeprom = SerialEeprom::new(profile_6x16());
        let blank = eeprom.save().to_vec();

        select(&mut eeprom);
        clock_in(&mut eeprom, &"1".repeat(50));
        assert_eq!(eeprom.state(), ChipState::Idle);
        assert_eq!(eeprom.save(), &blank[..], "no storage mutation");

        // The buffer is stuck: even a well-formed command cannot match
        // until chip-select clears it.
        clock_in(&mut eeprom, "0110000001");
        assert_eq!(eeprom.state(), ChipState::Idle);

        // After a chip-select cycle, matching resumes normally.
        select(&mut eeprom);
        clock_in(&mut eeprom, "0110000001");
        assert_eq!(eeprom.state(), ChipState::Reading);
    }

    #[test]
    fn chip_select_aborts_a_read_without_touching_storage() {
        let mut eeprom = SerialEeprom::new(profile_6x16());
        write_cell(&mut eeprom, 2, 0x5A5A);
        let saved = eeprom.save().to_vec();

        select(&mut eeprom);
        clock_in(&mut eeprom, "0110");
        clock_in(&mut eeprom, "000010");
        let _ = read_out(&mut eeprom, 5);

        eeprom.set_cs_line(true);
        assert_eq!(eeprom.state(), ChipState::Inactive);
        assert_eq!(eeprom.read_bit(), 1);
        assert_eq!(eeprom.save(), &saved[..]);

        // The chip is immediately usable again.
        eeprom.set_cs_line(false);
        clock_in(&mut eeprom, "0110");
        clock_in(&mut eeprom, "000010");
        assert_eq!(eeprom.read_bit(), 0);
        assert_eq!(read_out(&mut eeprom, 16), bits_of(0x5A5A, 16));
    }

    #[test]
    fn multi_read_continues_across_cells_and_wraps() {
        let mut eeprom = SerialEeprom::new(
            Profile::new(2, DataWidth::Sixteen)
                .expect("valid profile")
                .with_read("110")
                .expect("valid pattern")
                .with_write("101")
                .expect("valid pattern")
                .with_multi_read(),
        );
        eeprom.set_data(&[0x11, 0x11, 0x22, 0x22, 0x33, 0x33, 0x44, 0x44]);

        // One read command at address 3, then 4 * 16 edges: cells 3, 0,
        // 1, 2 in order.
        select(&mut eeprom);
        clock_in(&mut eeprom, "110");
        clock_in(&mut eeprom, "11");
        assert_eq!(eeprom.read_bit(), 0);
        let bits = read_out(&mut eeprom, 4 * 16);
        let mut expected = bits_of(0x4444, 16);
        expected.extend(bits_of(0x1111, 16));
        expected.extend(bits_of(0x2222, 16));
        expected.extend(bits_of(0x3333, 16));
        assert_eq!(bits, expected);
    }

    #[test]
    fn disabled_commands_never_match() {
        // Read-only part: the write bit pattern is just noise to it.
        let mut eeprom = SerialEeprom::new(
            Profile::new(6, DataWidth::Sixteen)
                .expect("valid profile")
                .with_read("0110")
                .expect("valid pattern"),
        );
        eeprom.set_data(&[0xC0, 0xDE]);
        let seeded = eeprom.save().to_vec();

        select(&mut eeprom);
        clock_in(&mut eeprom, "0101");
        clock_in(&mut eeprom, "000000");
        clock_in(&mut eeprom, "0000000000000000");
        assert_eq!(eeprom.state(), ChipState::Idle);
        assert_eq!(eeprom.save(), &seeded[..]);
    }

    #[test]
    fn persistence_round_trip_into_a_fresh_chip() {
        let mut eeprom = SerialEeprom::new(profile_6x16());
        write_cell(&mut eeprom, 0, 0xDEAD);
        write_cell(&mut eeprom, 63, 0xBEEF);
        let image = eeprom.save().to_vec();

        let mut restored = SerialEeprom::new(profile_6x16());
        restored.load(&image).expect("image fits");
        assert_eq!(restored.save(), &image[..]);

        select(&mut restored);
        clock_in(&mut restored, "0110");
        clock_in(&mut restored, "111111");
        assert_eq!(restored.read_bit(), 0);
        assert_eq!(read_out(&mut restored, 16), bits_of(0xBEEF, 16));
    }

    #[test]
    fn load_rejects_mismatched_image() {
        let mut eeprom = SerialEeprom::new(profile_6x16());
        let err = eeprom.load(&[0u8; 64]).expect_err("wrong size");
        assert_eq!(err.expected, 128);
        assert_eq!(err.found, 64);
    }

    #[test]
    fn reset_restores_power_on_state() {
        let mut eeprom = SerialEeprom::new(profile_7x8_lockable());
        select(&mut eeprom);
        clock_in(&mut eeprom, "0100110000000"); // unlock
        assert!(!eeprom.locked());

        eeprom.reset();
        assert!(eeprom.locked());
        assert_eq!(eeprom.state(), ChipState::Inactive);
        assert!(eeprom.save().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn two_instances_do_not_share_state() {
        let mut a = SerialEeprom::new(profile_6x16());
        let mut b = SerialEeprom::new(profile_6x16());
        write_cell(&mut a, 0, 0x1234);
        assert_eq!(&a.save()[..2], &[0x12, 0x34]);
        assert_eq!(&b.save()[..2], &[0xFF, 0xFF]);
        write_cell(&mut b, 0, 0x4321);
        assert_eq!(&a.save()[..2], &[0x12, 0x34]);
    }
}
