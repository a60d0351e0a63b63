use crate::bits::reader::{fourcc_to_string, read_fourcc, read_u32, ByteOrder};
use crate::errors::DecodeResult;

/// File type box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ftyp {
    pub major_brand: [u8; 4],
    pub minor_version: u32,
    pub compatible_brands: Vec<[u8; 4]>,
}

/// Family a file belongs to, judged by its brands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrandFamily {
    Avif,
    Heif,
    Mp4,
}

impl BrandFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrandFamily::Avif => "AVIF",
            BrandFamily::Heif => "HEIF",
            BrandFamily::Mp4 => "MP4",
        }
    }
}

/// Parse an ftyp payload. Trailing bytes that do not make a whole brand are
/// ignored.
pub fn parse_ftyp(p: &[u8]) -> DecodeResult<Ftyp> {
    let major_brand = read_fourcc(p, 0)?;
    let minor_version = read_u32(p, 4, ByteOrder::Big)?;
    let compatible_brands = p
        .get(8..)
        .unwrap_or_default()
        .chunks_exact(4)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect();
    Ok(Ftyp {
        major_brand,
        minor_version,
        compatible_brands,
    })
}

impl Ftyp {
    pub fn major_brand_string(&self) -> String {
        fourcc_to_string(&self.major_brand)
    }

    pub fn compatible_brand_strings(&self) -> Vec<String> {
        self.compatible_brands
            .iter()
            .map(|b| fourcc_to_string(b))
            .collect()
    }

    fn brands(&self) -> impl Iterator<Item = &[u8; 4]> {
        std::iter::once(&self.major_brand).chain(self.compatible_brands.iter())
    }

    /// AVIF brands win over the generic HEIF ones, since AVIF files also
    /// carry `mif1`.
    pub fn family(&self) -> BrandFamily {
        if self.brands().any(|b| matches!(b, b"avif" | b"avis")) {
            BrandFamily::Avif
        } else if self
            .brands()
            .any(|b| matches!(b, b"heic" | b"heix" | b"mif1" | b"msf1"))
        {
            BrandFamily::Heif
        } else {
            BrandFamily::Mp4
        }
    }
}

/// Human readable name of a major brand.
pub fn brand_description(brand: &[u8; 4]) -> &'static str {
    match brand {
        b"avif" => "AV1 Image File Format",
        b"avis" => "AV1 Image Sequence",
        b"heic" | b"heix" => "High Efficiency Image Container (HEVC)",
        b"mif1" | b"msf1" => "HEIF image",
        b"isom" | b"iso2" | b"iso4" | b"iso5" | b"iso6" | b"mp41" | b"mp42" => "MP4 (ISO Base Media)",
        b"M4V " | b"M4VH" | b"M4VP" => "M4V (iTunes Video)",
        b"M4A " => "M4A (iTunes Audio)",
        b"3gp4" | b"3gp5" | b"3gp6" | b"3gp7" | b"3ge6" | b"3ge7" | b"3gg6" => {
            "3GP (3rd Generation Partnership Project)"
        }
        b"3g2a" | b"3g2b" | b"3g2c" => "3G2 (3GPP2)",
        b"qt  " => "MOV (QuickTime)",
        _ => "unknown brand",
    }
}
