//! Command Buffer Module
//!
//! Builds the register-write stream consumed by the command processor and
//! decodes it back into individual register writes.

use tracing::{trace, warn};

use crate::protocol::{CommandHeader, FINALIZE_MAGIC, MAX_PARAMS_PER_HEADER, REG_FINALIZE};

/// Words held back so the finalize marker always fits.
const FINALIZE_RESERVE_WORDS: usize = 4;

/// A single decoded register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegWrite {
    pub reg: u16,
    pub mask: u8,
    pub value: u32,
}

/// Append-only command list, reset once per flush cycle.
pub struct CommandBuffer {
    words: Vec<u32>,
    capacity: usize,
    overflowed: bool,
}

impl CommandBuffer {
    pub fn new(capacity_words: usize) -> Self {
        Self {
            words: Vec::with_capacity(capacity_words.min(0x4000)),
            capacity: capacity_words,
            overflowed: false,
        }
    }

    /// Write a full 32-bit value to one register.
    pub fn write(&mut self, reg: u16, value: u32) {
        self.write_masked(reg, 0xF, value);
    }

    /// Write to one register with a byte-enable mask.
    pub fn write_masked(&mut self, reg: u16, mask: u8, value: u32) {
        self.push_command(reg, mask, &[value], false, FINALIZE_RESERVE_WORDS);
    }

    /// Write `values[i]` to `reg + i`.
    pub fn write_incremental(&mut self, reg: u16, values: &[u32]) {
        for (i, chunk) in values.chunks(MAX_PARAMS_PER_HEADER).enumerate() {
            let reg = reg + (i * MAX_PARAMS_PER_HEADER) as u16;
            self.push_command(reg, 0xF, chunk, true, FINALIZE_RESERVE_WORDS);
        }
    }

    /// Write every value to the same register, in order.
    pub fn write_repeated(&mut self, reg: u16, values: &[u32]) {
        for chunk in values.chunks(MAX_PARAMS_PER_HEADER) {
            self.push_command(reg, 0xF, chunk, false, FINALIZE_RESERVE_WORDS);
        }
    }

    fn push_command(&mut self, reg: u16, mask: u8, params: &[u32], incremental: bool, reserve: usize) {
        if params.is_empty() {
            return;
        }

        // param0 + header + remaining params, padded to an even word count
        let mut needed = params.len() + 1;
        if needed % 2 != 0 {
            needed += 1;
        }

        if self.words.len() + needed + reserve > self.capacity {
            if !self.overflowed {
                warn!(
                    "Command buffer full ({} words), dropping write to 0x{:04X}",
                    self.capacity, reg
                );
            }
            self.overflowed = true;
            return;
        }

        let header = CommandHeader {
            reg,
            mask,
            count: params.len(),
            incremental,
        };

        trace!(
            "cmd reg=0x{:04X} mask=0x{:X} count={} inc={}",
            reg,
            mask,
            params.len(),
            incremental
        );

        self.words.push(params[0]);
        self.words.push(header.encode());
        self.words.extend_from_slice(&params[1..]);
        if self.words.len() % 2 != 0 {
            self.words.push(0);
        }
    }

    /// Terminate the list. The finalize write is repeated until the list
    /// length is a multiple of 16 bytes.
    pub fn finalize(&mut self) {
        self.push_command(REG_FINALIZE, 0xF, &[FINALIZE_MAGIC], false, 0);
        if self.words.len() % 4 != 0 {
            self.push_command(REG_FINALIZE, 0xF, &[FINALIZE_MAGIC], false, 0);
        }
    }

    /// Rewind the write cursor to the start of the buffer.
    pub fn reset(&mut self) {
        self.words.clear();
        self.overflowed = false;
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether any write was dropped since the last reset.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Decode the current contents.
    pub fn decode(&self) -> Vec<RegWrite> {
        decode(&self.words)
    }
}

/// Decode a command list into register writes. A truncated trailing
/// command is ignored.
pub fn decode(words: &[u32]) -> Vec<RegWrite> {
    let mut writes = Vec::new();
    let mut pos = 0;

    while pos + 2 <= words.len() {
        let header = CommandHeader::decode(words[pos + 1]);
        let end = pos + 1 + header.count;
        if end > words.len() {
            break;
        }

        let params = std::iter::once(words[pos]).chain(words[pos + 2..end].iter().copied());
        for (i, value) in params.enumerate() {
            let reg = if header.incremental {
                header.reg + i as u16
            } else {
                header.reg
            };
            writes.push(RegWrite {
                reg,
                mask: header.mask,
                value,
            });
        }

        pos = end;
        if pos % 2 != 0 {
            pos += 1;
        }
    }

    writes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_write_layout() {
        let mut cmd = CommandBuffer::new(64);
        cmd.write(0x0040, 2);
        assert_eq!(cmd.words(), &[2, 0x000F_0040]);
    }

    #[test]
    fn test_incremental_padding() {
        let mut cmd = CommandBuffer::new(64);
        cmd.write_incremental(0x0041, &[1, 2, 3, 4]);
        // 1 param0 + header + 3 params = 5 words, padded to 6
        assert_eq!(cmd.len(), 6);

        let writes = cmd.decode();
        let regs: Vec<u16> = writes.iter().map(|w| w.reg).collect();
        assert_eq!(regs, vec![0x41, 0x42, 0x43, 0x44]);
        let values: Vec<u32> = writes.iter().map(|w| w.value).collect();
        assert_eq!(values, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_repeated_targets_same_register() {
        let mut cmd = CommandBuffer::new(64);
        cmd.write_repeated(0x02C1, &[7, 8, 9]);
        let writes = cmd.decode();
        assert!(writes.iter().all(|w| w.reg == 0x02C1));
        assert_eq!(writes.len(), 3);
    }

    #[test]
    fn test_large_write_is_split() {
        let mut cmd = CommandBuffer::new(4096);
        let values: Vec<u32> = (0..300).collect();
        cmd.write_repeated(0x02CC, &values);
        let writes = cmd.decode();
        assert_eq!(writes.len(), 300);
        assert_eq!(writes[299].value, 299);
    }

    #[test]
    fn test_masked_write() {
        let mut cmd = CommandBuffer::new(64);
        cmd.write_masked(0x025E, 0x2, 0x100);
        let writes = cmd.decode();
        assert_eq!(
            writes,
            vec![RegWrite {
                reg: 0x025E,
                mask: 0x2,
                value: 0x100
            }]
        );
    }

    #[test]
    fn test_finalize_aligns_to_16_bytes() {
        let mut cmd = CommandBuffer::new(64);
        cmd.write(0x0040, 0);
        cmd.finalize();
        assert_eq!(cmd.len() % 4, 0);
        assert!(cmd
            .decode()
            .iter()
            .any(|w| w.reg == REG_FINALIZE && w.value == FINALIZE_MAGIC));
    }

    #[test]
    fn test_overflow_drops_and_flags() {
        let mut cmd = CommandBuffer::new(8);
        cmd.write(0x0040, 1);
        cmd.write(0x0040, 2);
        assert!(!cmd.overflowed());
        cmd.write(0x0040, 3);
        assert!(cmd.overflowed());
        assert_eq!(cmd.len(), 4);

        // The finalize marker still fits after an overflow.
        cmd.finalize();
        assert_eq!(cmd.len(), 8);
        assert_eq!(cmd.decode().last().map(|w| w.reg), Some(REG_FINALIZE));

        cmd.reset();
        assert!(cmd.is_empty());
        assert!(!cmd.overflowed());
    }
}
