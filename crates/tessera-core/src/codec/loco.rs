//! Bundled lossless codec: median edge prediction with context-adaptive
//! Rice coding of the residuals.
//!
//! Frame layout, all integers little-endian:
//!
//! ```text
//! 0..2    magic "TL"
//! 2       mode (0 = stored, 1 = predictive)
//! 3       bits per sample
//! 4       component count
//! 5..8    reserved, zero
//! 8..12   width
//! 12..16  height
//! 16..20  CRC-32 of the raw samples
//! 20..    payload
//! ```
//!
//! The predictive payload is a single MSB-first bit stream. A frame whose
//! predictive payload would not beat the raw size is written in stored mode.

use anyhow::{Context as _, anyhow, bail, ensure};

use super::bits::{BitReader, BitWriter};
use super::{Codec, DestinationFull, Geometry};
use crate::buffer::ScratchBuffer;

pub const FRAME_HEADER_LEN: usize = 20;
const MAGIC: [u8; 2] = *b"TL";
const MODE_STORED: u8 = 0;
const MODE_PREDICTIVE: u8 = 1;

const MIN_BITS: u32 = 2;
const MAX_BITS: u32 = 16;
const MAX_COMPONENTS: u32 = 255;

const BUCKETS: usize = 8;
const RESET_THRESHOLD: u32 = 64;
/// Residual plane entry: zigzag residual and context, both u16 LE.
const PLANE_ENTRY: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocoCodec;

impl LocoCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for LocoCodec {
    fn name(&self) -> &'static str {
        "loco"
    }

    fn encode(
        &self,
        src: &[u8],
        geometry: &Geometry,
        dst: &mut [u8],
        workspace: &mut ScratchBuffer,
    ) -> anyhow::Result<usize> {
        let plane = Plane::new(geometry)?;
        let raw_len = geometry.raw_len();
        ensure!(
            src.len() == raw_len,
            "source holds {} bytes, geometry needs {raw_len}",
            src.len()
        );
        let required = FRAME_HEADER_LEN + raw_len;
        if dst.len() < required {
            return Err(DestinationFull {
                required,
                available: dst.len(),
            }
            .into());
        }

        let samples = geometry.samples();
        workspace
            .ensure(samples * PLANE_ENTRY)
            .context("residual plane")?;
        let residuals = &mut workspace[..samples * PLANE_ENTRY];
        plane.fill_residuals(src, residuals)?;

        let checksum = crc32fast::hash(src);
        let (header, payload) = dst.split_at_mut(FRAME_HEADER_LEN);
        let payload_len = match plane.pack(residuals, &mut payload[..raw_len]) {
            Some(len) => {
                write_header(header, MODE_PREDICTIVE, geometry, checksum);
                len
            }
            None => {
                write_header(header, MODE_STORED, geometry, checksum);
                payload[..raw_len].copy_from_slice(src);
                raw_len
            }
        };
        Ok(FRAME_HEADER_LEN + payload_len)
    }

    fn decode(&self, src: &[u8], geometry: &Geometry, dst: &mut [u8]) -> anyhow::Result<usize> {
        let plane = Plane::new(geometry)?;
        let raw_len = geometry.raw_len();
        if dst.len() < raw_len {
            return Err(DestinationFull {
                required: raw_len,
                available: dst.len(),
            }
            .into());
        }
        let (mode, checksum) = read_header(src, geometry)?;
        let payload = &src[FRAME_HEADER_LEN..];
        let out = &mut dst[..raw_len];

        match mode {
            MODE_STORED => {
                ensure!(
                    payload.len() == raw_len,
                    "stored frame carries {} bytes, expected {raw_len}",
                    payload.len()
                );
                out.copy_from_slice(payload);
            }
            MODE_PREDICTIVE => plane.unpack(payload, out)?,
            other => bail!("unknown frame mode {other}"),
        }

        let actual = crc32fast::hash(out);
        ensure!(
            actual == checksum,
            "checksum mismatch: frame says {checksum:#010x}, data hashes to {actual:#010x}"
        );
        Ok(raw_len)
    }
}

fn write_header(header: &mut [u8], mode: u8, geometry: &Geometry, checksum: u32) {
    header[0..2].copy_from_slice(&MAGIC);
    header[2] = mode;
    header[3] = geometry.bits_per_sample as u8;
    header[4] = geometry.component_count as u8;
    header[5..8].fill(0);
    header[8..12].copy_from_slice(&geometry.width.to_le_bytes());
    header[12..16].copy_from_slice(&geometry.height.to_le_bytes());
    header[16..20].copy_from_slice(&checksum.to_le_bytes());
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Checks the frame header against the expected geometry and returns the
/// mode and checksum.
fn read_header(src: &[u8], geometry: &Geometry) -> anyhow::Result<(u8, u32)> {
    ensure!(
        src.len() >= FRAME_HEADER_LEN,
        "frame of {} bytes is shorter than its header",
        src.len()
    );
    ensure!(src[0..2] == MAGIC, "bad frame magic");

    let bits = u32::from(src[3]);
    let components = u32::from(src[4]);
    let width = read_u32(src, 8);
    let height = read_u32(src, 12);
    let found = (width, height, bits, components);
    let expected = (
        geometry.width,
        geometry.height,
        geometry.bits_per_sample,
        geometry.component_count,
    );
    ensure!(
        found == expected,
        "frame geometry {found:?} does not match expected {expected:?} (width, height, bits, components)"
    );
    Ok((src[2], read_u32(src, 16)))
}

/// Sample-interleaved view of a frame with precomputed coding constants.
struct Plane {
    width: usize,
    height: usize,
    components: usize,
    bits: u32,
    bytes_per_sample: usize,
    range: u32,
    escape_limit: u32,
    initial_a: u32,
}

impl Plane {
    fn new(geometry: &Geometry) -> anyhow::Result<Self> {
        let bits = geometry.bits_per_sample;
        ensure!(
            (MIN_BITS..=MAX_BITS).contains(&bits),
            "{bits} bits per sample is outside {MIN_BITS}..={MAX_BITS}"
        );
        ensure!(
            (1..=MAX_COMPONENTS).contains(&geometry.component_count),
            "{} components is outside 1..={MAX_COMPONENTS}",
            geometry.component_count
        );
        ensure!(
            geometry.width > 0 && geometry.height > 0,
            "empty frame {}x{}",
            geometry.width,
            geometry.height
        );
        let range = 1u32 << bits;
        Ok(Self {
            width: geometry.width as usize,
            height: geometry.height as usize,
            components: geometry.component_count as usize,
            bits,
            bytes_per_sample: geometry.bytes_per_sample(),
            range,
            escape_limit: 2 * (bits + bits.max(8)) - bits - 1,
            initial_a: ((range + 32) >> 6).max(2),
        })
    }

    fn contexts(&self) -> usize {
        self.components * BUCKETS
    }

    #[inline]
    fn sample(&self, data: &[u8], index: usize) -> u32 {
        let at = index * self.bytes_per_sample;
        match self.bytes_per_sample {
            1 => u32::from(data[at]),
            _ => u32::from(u16::from_le_bytes([data[at], data[at + 1]])),
        }
    }

    #[inline]
    fn put(&self, data: &mut [u8], index: usize, value: u32) {
        let at = index * self.bytes_per_sample;
        match self.bytes_per_sample {
            1 => data[at] = value as u8,
            _ => data[at..at + 2].copy_from_slice(&(value as u16).to_le_bytes()),
        }
    }

    /// Causal neighbours (left, above, above-left) of a sample.
    #[inline]
    fn neighbours(&self, data: &[u8], x: usize, y: usize, index: usize) -> (u32, u32, u32) {
        let stride = self.width * self.components;
        match (x, y) {
            (0, 0) => (0, 0, 0),
            (_, 0) => {
                let a = self.sample(data, index - self.components);
                (a, a, a)
            }
            (0, _) => {
                let b = self.sample(data, index - stride);
                (b, b, b)
            }
            _ => (
                self.sample(data, index - self.components),
                self.sample(data, index - stride),
                self.sample(data, index - stride - self.components),
            ),
        }
    }

    #[inline]
    fn context(&self, component: usize, a: u32, b: u32, c: u32) -> usize {
        let gradient = a.abs_diff(c) + b.abs_diff(c);
        let q = gradient >> self.bits.saturating_sub(8);
        let bucket = (32 - q.leading_zeros()).min(BUCKETS as u32 - 1) as usize;
        component * BUCKETS + bucket
    }

    #[inline]
    fn to_residual(&self, value: u32, predicted: u32) -> u32 {
        let half = (self.range >> 1) as i32;
        let mask = (self.range - 1) as i32;
        let error = ((value as i32 - predicted as i32 + half) & mask) - half;
        if error >= 0 {
            (error as u32) << 1
        } else {
            ((-error as u32) << 1) - 1
        }
    }

    #[inline]
    fn from_residual(&self, mapped: u32, predicted: u32) -> u32 {
        let error = if mapped & 1 == 0 {
            (mapped >> 1) as i32
        } else {
            -(((mapped + 1) >> 1) as i32)
        };
        (predicted as i32 + error) as u32 & (self.range - 1)
    }

    /// First pass: predict every sample and store its mapped residual and
    /// context in `plane`.
    fn fill_residuals(&self, src: &[u8], plane: &mut [u8]) -> anyhow::Result<()> {
        let mut index = 0;
        for y in 0..self.height {
            for x in 0..self.width {
                for component in 0..self.components {
                    let value = self.sample(src, index);
                    if value >= self.range {
                        bail!(
                            "sample {index} holds {value}, which needs more than {} bits",
                            self.bits
                        );
                    }
                    let (a, b, c) = self.neighbours(src, x, y, index);
                    let mapped = self.to_residual(value, predict(a, b, c));
                    let context = self.context(component, a, b, c);
                    let entry = &mut plane[index * PLANE_ENTRY..(index + 1) * PLANE_ENTRY];
                    entry[0..2].copy_from_slice(&(mapped as u16).to_le_bytes());
                    entry[2..4].copy_from_slice(&(context as u16).to_le_bytes());
                    index += 1;
                }
            }
        }
        Ok(())
    }

    /// Second pass: Rice-code the residual plane into `out`.
    ///
    /// Returns `None` when the stream does not fit, which callers treat as
    /// "store instead".
    fn pack(&self, plane: &[u8], out: &mut [u8]) -> Option<usize> {
        let mut stats = ContextStats::new(self.contexts(), self.initial_a);
        let mut writer = BitWriter::new(out);
        for entry in plane.chunks_exact(PLANE_ENTRY) {
            let mapped = u32::from(u16::from_le_bytes([entry[0], entry[1]]));
            let context = usize::from(u16::from_le_bytes([entry[2], entry[3]]));
            let k = stats.parameter(context, self.bits);
            let quotient = mapped >> k;
            if quotient < self.escape_limit {
                writer.write_zeros(quotient).ok()?;
                writer.write_bits(1, 1).ok()?;
                writer.write_bits(mapped, k).ok()?;
            } else {
                writer.write_zeros(self.escape_limit).ok()?;
                writer.write_bits(1, 1).ok()?;
                writer.write_bits(mapped, self.bits).ok()?;
            }
            stats.update(context, mapped);
        }
        writer.finish().ok()
    }

    fn unpack(&self, payload: &[u8], out: &mut [u8]) -> anyhow::Result<()> {
        let mut stats = ContextStats::new(self.contexts(), self.initial_a);
        let mut reader = BitReader::new(payload);
        let truncated = || anyhow!("predictive stream ended early");

        let mut index = 0;
        for y in 0..self.height {
            for x in 0..self.width {
                for component in 0..self.components {
                    let (a, b, c) = self.neighbours(out, x, y, index);
                    let context = self.context(component, a, b, c);
                    let k = stats.parameter(context, self.bits);
                    let quotient = reader.read_unary(self.escape_limit).ok_or_else(truncated)?;
                    let mapped = if quotient < self.escape_limit {
                        (quotient << k) | reader.read_bits(k).ok_or_else(truncated)?
                    } else {
                        reader.read_bits(self.bits).ok_or_else(truncated)?
                    };
                    ensure!(
                        mapped < self.range,
                        "residual {mapped} at sample {index} is out of range"
                    );
                    self.put(out, index, self.from_residual(mapped, predict(a, b, c)));
                    stats.update(context, mapped);
                    index += 1;
                }
            }
        }
        Ok(())
    }
}

/// Median edge detector.
#[inline]
fn predict(a: u32, b: u32, c: u32) -> u32 {
    if c >= a.max(b) {
        a.min(b)
    } else if c <= a.min(b) {
        a.max(b)
    } else {
        a + b - c
    }
}

/// Running residual magnitude per context.
struct ContextStats {
    accumulated: Vec<u32>,
    counts: Vec<u32>,
}

impl ContextStats {
    fn new(contexts: usize, initial_a: u32) -> Self {
        Self {
            accumulated: vec![initial_a; contexts],
            counts: vec![1; contexts],
        }
    }

    /// Smallest Rice parameter `k` with `N << k >= A`.
    #[inline]
    fn parameter(&self, context: usize, max_k: u32) -> u32 {
        let a = self.accumulated[context];
        let n = self.counts[context];
        let mut k = 0;
        while k < max_k && (n << k) < a {
            k += 1;
        }
        k
    }

    #[inline]
    fn update(&mut self, context: usize, mapped: u32) {
        self.accumulated[context] += mapped;
        self.counts[context] += 1;
        if self.counts[context] >= RESET_THRESHOLD {
            self.accumulated[context] >>= 1;
            self.counts[context] >>= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(width: u32, height: u32, bits: u32, components: u32) -> Geometry {
        Geometry {
            width,
            height,
            bits_per_sample: bits,
            component_count: components,
        }
    }

    fn encode(src: &[u8], geometry: &Geometry) -> Vec<u8> {
        let mut dst = vec![0u8; src.len() + FRAME_HEADER_LEN + 64];
        let mut workspace = ScratchBuffer::default();
        let written = LocoCodec
            .encode(src, geometry, &mut dst, &mut workspace)
            .unwrap();
        dst.truncate(written);
        dst
    }

    fn decode(frame: &[u8], geometry: &Geometry) -> anyhow::Result<Vec<u8>> {
        let mut out = vec![0u8; geometry.raw_len()];
        let written = LocoCodec.decode(frame, geometry, &mut out)?;
        assert_eq!(written, out.len());
        Ok(out)
    }

    #[test]
    fn smooth_gradient_compresses() {
        let geometry = geometry(64, 32, 8, 1);
        let src: Vec<u8> = (0..32u32)
            .flat_map(|y| (0..64u32).map(move |x| ((x + y) / 2) as u8))
            .collect();
        let frame = encode(&src, &geometry);
        assert_eq!(frame[2], MODE_PREDICTIVE);
        assert!(frame.len() < src.len() / 2, "frame is {} bytes", frame.len());
        assert_eq!(decode(&frame, &geometry).unwrap(), src);
    }

    #[test]
    fn noisy_input_is_stored() {
        let geometry = geometry(16, 16, 16, 1);
        let mut state = 0x2545_f491u32;
        let src: Vec<u8> = (0..geometry.raw_len())
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect();
        let frame = encode(&src, &geometry);
        assert_eq!(frame[2], MODE_STORED);
        assert_eq!(frame.len(), FRAME_HEADER_LEN + src.len());
        assert_eq!(decode(&frame, &geometry).unwrap(), src);
    }

    #[test]
    fn interleaved_components_round_trip() {
        let geometry = geometry(10, 7, 8, 3);
        let src: Vec<u8> = (0..geometry.raw_len())
            .map(|i| (i % 3 * 80 + i / 30) as u8)
            .collect();
        let frame = encode(&src, &geometry);
        assert_eq!(decode(&frame, &geometry).unwrap(), src);
    }

    #[test]
    fn twelve_bit_samples_round_trip() {
        let geometry = geometry(9, 5, 12, 1);
        let src: Vec<u8> = (0..45u16)
            .flat_map(|i| (i * 91 % 4096).to_le_bytes())
            .collect();
        let frame = encode(&src, &geometry);
        assert_eq!(decode(&frame, &geometry).unwrap(), src);
    }

    #[test]
    fn sample_wider_than_bit_depth_is_rejected() {
        let geometry = geometry(2, 1, 12, 1);
        let src = [0xFF, 0xFF, 0x00, 0x00];
        let mut dst = [0u8; 64];
        let err = LocoCodec
            .encode(&src, &geometry, &mut dst, &mut ScratchBuffer::default())
            .unwrap_err();
        assert!(err.to_string().contains("more than 12 bits"));
    }

    #[test]
    fn short_destination_reports_required_size() {
        let geometry = geometry(8, 8, 8, 1);
        let src = [7u8; 64];
        let mut dst = [0u8; 40];
        let err = LocoCodec
            .encode(&src, &geometry, &mut dst, &mut ScratchBuffer::default())
            .unwrap_err();
        let full = err.downcast_ref::<DestinationFull>().unwrap();
        assert_eq!(full.required, FRAME_HEADER_LEN + 64);
        assert_eq!(full.available, 40);
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let geometry = geometry(4, 4, 16, 1);
        let src: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(73)).collect();
        let mut frame = encode(&src, &geometry);
        frame[FRAME_HEADER_LEN] ^= 0x80;
        assert!(decode(&frame, &geometry).is_err());
    }

    #[test]
    fn geometry_mismatch_is_rejected() {
        let src = [1u8; 24];
        let frame = encode(&src, &geometry(6, 4, 8, 1));
        let err = decode(&frame, &geometry(4, 6, 8, 1)).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn workspace_is_grown_to_plane_size() {
        let geometry = geometry(5, 3, 8, 1);
        let mut workspace = ScratchBuffer::default();
        let mut dst = [0u8; 64];
        LocoCodec
            .encode(&[3u8; 15], &geometry, &mut dst, &mut workspace)
            .unwrap();
        assert_eq!(workspace.capacity(), 15 * PLANE_ENTRY);
    }
}
