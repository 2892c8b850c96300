//! MSB-first bit packing over caller-provided byte slices.

/// The output slice ran out of room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow;

pub struct BitWriter<'a> {
    out: &'a mut [u8],
    pos: usize,
    acc: u64,
    filled: u32,
}

impl<'a> BitWriter<'a> {
    pub fn new(out: &'a mut [u8]) -> Self {
        Self {
            out,
            pos: 0,
            acc: 0,
            filled: 0,
        }
    }

    /// Appends the low `count` bits of `value`, `count <= 32`.
    #[inline]
    pub fn write_bits(&mut self, value: u32, count: u32) -> Result<(), Overflow> {
        debug_assert!(count <= 32);
        if count == 0 {
            return Ok(());
        }
        let mask = (1u64 << count) - 1;
        self.acc = (self.acc << count) | (value as u64 & mask);
        self.filled += count;
        while self.filled >= 8 {
            self.filled -= 8;
            let byte = (self.acc >> self.filled) as u8;
            self.push(byte)?;
        }
        self.acc &= (1u64 << self.filled) - 1;
        Ok(())
    }

    pub fn write_zeros(&mut self, mut count: u32) -> Result<(), Overflow> {
        while count > 0 {
            let chunk = count.min(32);
            self.write_bits(0, chunk)?;
            count -= chunk;
        }
        Ok(())
    }

    /// Pads the last byte with zero bits and returns the bytes written.
    pub fn finish(mut self) -> Result<usize, Overflow> {
        if self.filled > 0 {
            let byte = (self.acc << (8 - self.filled)) as u8;
            self.push(byte)?;
        }
        Ok(self.pos)
    }

    #[inline]
    fn push(&mut self, byte: u8) -> Result<(), Overflow> {
        let slot = self.out.get_mut(self.pos).ok_or(Overflow)?;
        *slot = byte;
        self.pos += 1;
        Ok(())
    }
}

pub struct BitReader<'a> {
    input: &'a [u8],
    pos: usize,
    acc: u64,
    avail: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            acc: 0,
            avail: 0,
        }
    }

    #[inline]
    fn refill(&mut self) {
        while self.avail <= 56 && self.pos < self.input.len() {
            self.acc = (self.acc << 8) | self.input[self.pos] as u64;
            self.avail += 8;
            self.pos += 1;
        }
    }

    /// Reads `count <= 32` bits. `None` once the input is exhausted.
    #[inline]
    pub fn read_bits(&mut self, count: u32) -> Option<u32> {
        debug_assert!(count <= 32);
        if count == 0 {
            return Some(0);
        }
        if self.avail < count {
            self.refill();
            if self.avail < count {
                return None;
            }
        }
        self.avail -= count;
        Some(((self.acc >> self.avail) & ((1u64 << count) - 1)) as u32)
    }

    /// Counts zero bits up to and including the terminating one bit.
    ///
    /// Returns the number of zeros, or `None` if more than `limit` zeros
    /// precede the one bit or the input ends first.
    pub fn read_unary(&mut self, limit: u32) -> Option<u32> {
        let mut zeros = 0u32;
        loop {
            if self.avail == 0 {
                self.refill();
                if self.avail == 0 {
                    return None;
                }
            }
            let window = self.acc << (64 - self.avail);
            let leading = window.leading_zeros();
            if leading < self.avail {
                zeros += leading;
                self.avail -= leading + 1;
                return (zeros <= limit).then_some(zeros);
            }
            zeros += self.avail;
            self.avail = 0;
            if zeros > limit {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_widths_survive_packing() {
        let mut out = [0u8; 16];
        let mut writer = BitWriter::new(&mut out);
        writer.write_bits(0b101, 3).unwrap();
        writer.write_zeros(9).unwrap();
        writer.write_bits(1, 1).unwrap();
        writer.write_bits(0xBEEF, 16).unwrap();
        let len = writer.finish().unwrap();
        assert_eq!(len, 4);

        let mut reader = BitReader::new(&out[..len]);
        assert_eq!(reader.read_bits(3), Some(0b101));
        assert_eq!(reader.read_unary(16), Some(9));
        assert_eq!(reader.read_bits(16), Some(0xBEEF));
    }

    #[test]
    fn writer_reports_overflow() {
        let mut out = [0u8; 1];
        let mut writer = BitWriter::new(&mut out);
        writer.write_bits(0xFF, 8).unwrap();
        assert_eq!(writer.write_bits(1, 8), Err(Overflow));
    }

    #[test]
    fn unary_respects_limit() {
        let bytes = [0x00, 0x01];
        assert_eq!(BitReader::new(&bytes).read_unary(15), Some(15));
        assert_eq!(BitReader::new(&bytes).read_unary(14), None);
    }
}
