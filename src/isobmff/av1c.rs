use std::io::Cursor;

use crate::bits::BitReader;
use crate::errors::{DecodeError, DecodeResult};

/// AV1 codec configuration record (`av1C`), first four bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Av1Config {
    pub version: u8,
    pub seq_profile: u8,
    pub seq_level_idx_0: u8,
    pub seq_tier_0: u8,
    pub high_bitdepth: bool,
    pub twelve_bit: bool,
    pub monochrome: bool,
    pub chroma_subsampling_x: bool,
    pub chroma_subsampling_y: bool,
    pub chroma_sample_position: u8,
    pub initial_presentation_delay: Option<u8>,
}

impl Av1Config {
    pub fn bit_depth(&self) -> u8 {
        match (self.high_bitdepth, self.twelve_bit) {
            (true, true) => 12,
            (true, false) => 10,
            _ => 8,
        }
    }

    pub fn chroma_subsampling(&self) -> &'static str {
        match (self.monochrome, self.chroma_subsampling_x, self.chroma_subsampling_y) {
            (true, _, _) => "4:0:0",
            (false, true, true) => "4:2:0",
            (false, true, false) => "4:2:2",
            (false, false, false) => "4:4:4",
            (false, false, true) => "invalid",
        }
    }

    pub fn profile_name(&self) -> &'static str {
        match self.seq_profile {
            0 => "Main",
            1 => "High",
            2 => "Professional",
            _ => "reserved",
        }
    }
}

pub fn parse_av1c(p: &[u8]) -> DecodeResult<Av1Config> {
    if p.len() < 4 {
        return Err(DecodeError::truncated(4, p.len()));
    }
    let mut r = BitReader::new(Cursor::new(&p[..4]));
    let marker = r.read(1);
    let version = r.read(7) as u8;
    if marker != 1 {
        return Err(DecodeError::unsupported("av1C marker bit not set"));
    }
    if version != 1 {
        return Err(DecodeError::unsupported(format!("av1C version {}", version)));
    }
    let seq_profile = r.read(3) as u8;
    let seq_level_idx_0 = r.read(5) as u8;
    let seq_tier_0 = r.read(1) as u8;
    let high_bitdepth = r.read_flag();
    let twelve_bit = r.read_flag();
    let monochrome = r.read_flag();
    let chroma_subsampling_x = r.read_flag();
    let chroma_subsampling_y = r.read_flag();
    let chroma_sample_position = r.read(2) as u8;
    let _reserved = r.read(3);
    let delay_present = r.read_flag();
    let delay_minus_one = r.read(4) as u8;

    Ok(Av1Config {
        version,
        seq_profile,
        seq_level_idx_0,
        seq_tier_0,
        high_bitdepth,
        twelve_bit,
        monochrome,
        chroma_subsampling_x,
        chroma_subsampling_y,
        chroma_sample_position,
        initial_presentation_delay: delay_present.then_some(delay_minus_one + 1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_profile_420_8bit() {
        // marker+v1, profile 0 level 8, tier 0 / 8-bit / 4:2:0, no delay
        let av1c = parse_av1c(&[0x81, 0x08, 0x0C, 0x00]).unwrap();
        assert_eq!(av1c.seq_profile, 0);
        assert_eq!(av1c.seq_level_idx_0, 8);
        assert_eq!(av1c.bit_depth(), 8);
        assert_eq!(av1c.chroma_subsampling(), "4:2:0");
        assert_eq!(av1c.profile_name(), "Main");
        assert_eq!(av1c.initial_presentation_delay, None);
    }

    #[test]
    fn test_professional_12bit_444_with_delay() {
        // profile 2 level 13; tier 1, high, twelve; delay present, minus one = 3
        let av1c = parse_av1c(&[0x81, 0x4D, 0xE0, 0x13]).unwrap();
        assert_eq!(av1c.seq_profile, 2);
        assert_eq!(av1c.seq_level_idx_0, 13);
        assert_eq!(av1c.seq_tier_0, 1);
        assert_eq!(av1c.bit_depth(), 12);
        assert_eq!(av1c.chroma_subsampling(), "4:4:4");
        assert_eq!(av1c.initial_presentation_delay, Some(4));
    }

    #[test]
    fn test_monochrome() {
        let av1c = parse_av1c(&[0x81, 0x00, 0x5C, 0x00]).unwrap();
        assert!(av1c.monochrome);
        assert_eq!(av1c.bit_depth(), 10);
        assert_eq!(av1c.chroma_subsampling(), "4:0:0");
    }

    #[test]
    fn test_bad_marker_and_short_record() {
        assert!(matches!(
            parse_av1c(&[0x01, 0, 0, 0]),
            Err(DecodeError::UnsupportedVariant(_))
        ));
        assert_eq!(parse_av1c(&[0x81, 0]), Err(DecodeError::truncated(4, 2)));
    }
}
