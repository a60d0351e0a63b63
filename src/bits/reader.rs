/*
# Bits Reader Module

 Primitive field decoding for every container decoder in the crate. All readers take
 the source slice, an absolute offset and an explicit byte order, and fail with
 `DecodeError::Truncated` when the slice is too short. Any bit pattern is a valid
 integer, so truncation is the only failure mode.

 Key components:
 - Fixed-width readers: `read_u8()`, `read_u16()`, `read_u24()`, `read_u32()`, `read_u64()`
 - Encoded readers: `read_synchsafe_u32()`, `read_fixed_16_16()`, `read_mac_epoch_datetime()`
 - BitReader: MSB-first bit reading with error accumulation for packed bitfields
*/

use std::io::{self, Read};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::errors::{DecodeError, DecodeResult};

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// Mask for the `n` least significant bits.
pub fn mask(n: u32) -> u32 {
    if n == 32 {
        u32::MAX
    } else {
        (1u32 << n) - 1
    }
}

/// Borrow `N` bytes at `offset` or report how many were missing.
fn take<const N: usize>(data: &[u8], offset: usize) -> DecodeResult<[u8; N]> {
    let end = offset
        .checked_add(N)
        .ok_or_else(|| DecodeError::truncated(usize::MAX, data.len()))?;
    if end > data.len() {
        return Err(DecodeError::truncated(end, data.len()));
    }
    let mut buf = [0u8; N];
    buf.copy_from_slice(&data[offset..end]);
    Ok(buf)
}

/// Borrow `len` bytes at `offset`.
pub fn read_bytes(data: &[u8], offset: usize, len: usize) -> DecodeResult<&[u8]> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| DecodeError::truncated(usize::MAX, data.len()))?;
    data.get(offset..end)
        .ok_or_else(|| DecodeError::truncated(end, data.len()))
}

pub fn read_u8(data: &[u8], offset: usize) -> DecodeResult<u8> {
    Ok(take::<1>(data, offset)?[0])
}

pub fn read_u16(data: &[u8], offset: usize, order: ByteOrder) -> DecodeResult<u16> {
    let buf = take::<2>(data, offset)?;
    Ok(match order {
        ByteOrder::Big => u16::from_be_bytes(buf),
        ByteOrder::Little => u16::from_le_bytes(buf),
    })
}

pub fn read_i16(data: &[u8], offset: usize, order: ByteOrder) -> DecodeResult<i16> {
    read_u16(data, offset, order).map(|v| v as i16)
}

/// Read a 24-bit value.
pub fn read_u24(data: &[u8], offset: usize, order: ByteOrder) -> DecodeResult<u32> {
    let buf = take::<3>(data, offset)?;
    Ok(match order {
        ByteOrder::Big => ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | buf[2] as u32,
        ByteOrder::Little => ((buf[2] as u32) << 16) | ((buf[1] as u32) << 8) | buf[0] as u32,
    })
}

pub fn read_u32(data: &[u8], offset: usize, order: ByteOrder) -> DecodeResult<u32> {
    let buf = take::<4>(data, offset)?;
    Ok(match order {
        ByteOrder::Big => u32::from_be_bytes(buf),
        ByteOrder::Little => u32::from_le_bytes(buf),
    })
}

pub fn read_i32(data: &[u8], offset: usize, order: ByteOrder) -> DecodeResult<i32> {
    read_u32(data, offset, order).map(|v| v as i32)
}

pub fn read_u64(data: &[u8], offset: usize, order: ByteOrder) -> DecodeResult<u64> {
    let buf = take::<8>(data, offset)?;
    Ok(match order {
        ByteOrder::Big => u64::from_be_bytes(buf),
        ByteOrder::Little => u64::from_le_bytes(buf),
    })
}

pub fn read_f32(data: &[u8], offset: usize, order: ByteOrder) -> DecodeResult<f32> {
    read_u32(data, offset, order).map(f32::from_bits)
}

pub fn read_f64(data: &[u8], offset: usize, order: ByteOrder) -> DecodeResult<f64> {
    read_u64(data, offset, order).map(f64::from_bits)
}

/// Read a four character code.
pub fn read_fourcc(data: &[u8], offset: usize) -> DecodeResult<[u8; 4]> {
    take::<4>(data, offset)
}

/// Render a four character code, replacing anything non-printable with `?`.
pub fn fourcc_to_string(code: &[u8]) -> String {
    code.iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '?'
            }
        })
        .collect()
}

/// Decode an ID3v2 synchsafe integer: four bytes, 7 significant bits each.
pub fn read_synchsafe_u32(data: &[u8]) -> DecodeResult<u32> {
    let buf = take::<4>(data, 0)?;
    Ok(buf
        .iter()
        .fold(0u32, |acc, &b| (acc << 7) | (b & 0x7f) as u32))
}

/// Signed 16.16 fixed point.
pub fn read_fixed_16_16(data: &[u8], offset: usize) -> DecodeResult<f64> {
    Ok(read_i32(data, offset, ByteOrder::Big)? as f64 / 65536.0)
}

/// Seconds since 1904-01-01T00:00:00Z, as used by QuickTime and SFNT `head`.
///
/// Returns `Ok(None)` when the value does not map to a representable date;
/// garbage timestamps are common in real files.
pub fn read_mac_epoch_datetime(data: &[u8], offset: usize) -> DecodeResult<Option<String>> {
    let seconds = read_u64(data, offset, ByteOrder::Big)?;
    Ok(mac_epoch_to_iso(seconds))
}

pub fn mac_epoch_to_iso(seconds: u64) -> Option<String> {
    let epoch: DateTime<Utc> = Utc.with_ymd_and_hms(1904, 1, 1, 0, 0, 0).single()?;
    let secs = i64::try_from(seconds).ok()?;
    let delta = Duration::try_seconds(secs)?;
    let ts = epoch.checked_add_signed(delta)?;
    Some(ts.format("%Y-%m-%dT%H:%M:%S").to_string())
}

/// `BitReader` reads bits from an underlying reader and accumulates the first
/// error that occurs.
#[derive(Debug)]
pub struct BitReader<R: Read> {
    rd: R,
    err: Option<io::Error>,
    n: u32,
    value: u64,
    pos: i64,
}

impl<R: Read> BitReader<R> {
    /// Create a new `BitReader` that starts accumulating errors.
    pub fn new(rd: R) -> Self {
        Self {
            rd,
            err: None,
            n: 0,
            value: 0,
            pos: -1,
        }
    }

    /// Return the accumulated error if any.
    pub fn acc_error(&self) -> Option<&io::Error> {
        self.err.as_ref()
    }

    /// Read `n` bits and return them as the lowest bits of a `u32`.
    /// If an error has occurred, 0 is returned.
    pub fn read(&mut self, n: u32) -> u32 {
        if self.err.is_some() {
            return 0;
        }
        while self.n < n {
            let mut buf = [0u8; 1];
            match self.rd.read_exact(&mut buf) {
                Ok(()) => {
                    self.pos += 1;
                    self.value = (self.value << 8) | u64::from(buf[0]);
                    self.n += 8;
                }
                Err(e) => {
                    self.err = Some(e);
                    return 0;
                }
            }
        }
        let value = (self.value >> (self.n - n)) as u32 & mask(n);
        self.n -= n;
        self.value &= (1u64 << self.n) - 1;
        value
    }

    /// Read a single bit interpreted as a boolean flag.
    pub fn read_flag(&mut self) -> bool {
        self.read(1) == 1
    }

    /// Number of bytes read from the underlying reader.
    pub fn nr_bytes_read(&self) -> i64 {
        self.pos + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_read_bits() {
        let data = [0xffu8, 0x0f];
        let mut r = BitReader::new(Cursor::new(&data));
        assert_eq!(r.read(2), 3); // 11
        assert_eq!(r.read(3), 7); // 111
        assert_eq!(r.read(5), 28); // 11100
        assert_eq!(r.read(3), 1); // 001
        assert_eq!(r.read(3), 7); // 111
        assert!(r.acc_error().is_none());
        assert_eq!(r.nr_bytes_read(), 2);
    }

    #[test]
    fn test_bit_reader_past_end_accumulates_error() {
        let data = [0x80u8];
        let mut r = BitReader::new(Cursor::new(&data));
        assert!(r.read_flag());
        assert_eq!(r.read(8), 0);
        assert!(r.acc_error().is_some());
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(8), 0xff);
        assert_eq!(mask(4), 0x0f);
        assert_eq!(mask(32), u32::MAX);
    }

    #[test]
    fn test_fixed_width_byte_orders() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_u16(&data, 0, ByteOrder::Big).unwrap(), 0x0102);
        assert_eq!(read_u16(&data, 0, ByteOrder::Little).unwrap(), 0x0201);
        assert_eq!(read_u24(&data, 1, ByteOrder::Little).unwrap(), 0x040302);
        assert_eq!(read_u32(&data, 4, ByteOrder::Big).unwrap(), 0x05060708);
        assert_eq!(
            read_u64(&data, 0, ByteOrder::Little).unwrap(),
            0x0807060504030201
        );
    }

    #[test]
    fn test_truncated_read_reports_sizes() {
        let data = [0u8; 3];
        assert_eq!(
            read_u32(&data, 0, ByteOrder::Big),
            Err(DecodeError::Truncated {
                needed: 4,
                available: 3
            })
        );
        assert!(read_u16(&data, usize::MAX, ByteOrder::Big).is_err());
    }

    #[test]
    fn test_synchsafe() {
        assert_eq!(read_synchsafe_u32(&[0x00, 0x00, 0x02, 0x01]).unwrap(), 257);
        assert_eq!(
            read_synchsafe_u32(&[0x7f, 0x7f, 0x7f, 0x7f]).unwrap(),
            0x0fff_ffff
        );
        // high bits are ignored
        assert_eq!(read_synchsafe_u32(&[0x80, 0x80, 0x80, 0x81]).unwrap(), 1);
        assert!(read_synchsafe_u32(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn test_fixed_16_16() {
        assert_eq!(read_fixed_16_16(&[0x00, 0x01, 0x80, 0x00], 0).unwrap(), 1.5);
        assert_eq!(read_fixed_16_16(&[0xff, 0xf1, 0x00, 0x00], 0).unwrap(), -15.0);
    }

    #[test]
    fn test_mac_epoch() {
        assert_eq!(mac_epoch_to_iso(0).as_deref(), Some("1904-01-01T00:00:00"));
        // 2004-01-01 is 3_155_760_000 seconds after the epoch
        assert_eq!(
            mac_epoch_to_iso(3_155_760_000).as_deref(),
            Some("2004-01-01T00:00:00")
        );
        assert_eq!(mac_epoch_to_iso(u64::MAX), None);
        let bytes = u64::MAX.to_be_bytes();
        assert_eq!(read_mac_epoch_datetime(&bytes, 0).unwrap(), None);
    }

    #[test]
    fn test_fourcc_rendering() {
        assert_eq!(fourcc_to_string(b"VP8 "), "VP8 ");
        assert_eq!(fourcc_to_string(&[0xa9, b'n', b'a', b'm']), "?nam");
    }

    proptest! {
        #[test]
        fn prop_readers_never_panic(data in proptest::collection::vec(any::<u8>(), 0..16), offset in 0usize..20) {
            let _ = read_u16(&data, offset, ByteOrder::Big);
            let _ = read_u24(&data, offset, ByteOrder::Little);
            let _ = read_u32(&data, offset, ByteOrder::Little);
            let _ = read_u64(&data, offset, ByteOrder::Big);
            let _ = read_mac_epoch_datetime(&data, offset);
        }

        #[test]
        fn prop_synchsafe_matches_manual(b in any::<[u8; 4]>()) {
            let expected = ((b[0] as u32 & 0x7f) << 21)
                | ((b[1] as u32 & 0x7f) << 14)
                | ((b[2] as u32 & 0x7f) << 7)
                | (b[3] as u32 & 0x7f);
            prop_assert_eq!(read_synchsafe_u32(&b).unwrap(), expected);
        }
    }
}
