//! Metadata entries and the variant value type they carry.

use std::fmt;

/// A closed enumeration of well-known metadata keys.
///
/// Codecs map their native key strings onto these; anything that does not
/// match becomes [`MetaDataKey::Unknown`] with the original string kept on
/// the entry.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetaDataKey {
    Unknown,
    Title,
    Artist,
    Author,
    Description,
    Comment,
    Copyright,
    Software,
    Disclaimer,
    Warning,
    Source,
    CreationTime,
    Exif,
    Iptc,
    Xmp,
    /// Hex-encoded EXIF carried in a legacy text chunk.
    HexExif,
    HexIptc,
    HexXmp,
}

impl MetaDataKey {
    /// Parse a codec-native key string. Returns `Unknown` when nothing
    /// matches; matching is case-insensitive.
    pub fn from_key_string(s: &str) -> Self {
        use MetaDataKey::*;
        match s.to_ascii_lowercase().as_str() {
            "title" => Title,
            "artist" => Artist,
            "author" => Author,
            "description" => Description,
            "comment" => Comment,
            "copyright" => Copyright,
            "software" => Software,
            "disclaimer" => Disclaimer,
            "warning" => Warning,
            "source" => Source,
            "creation time" | "creation-time" => CreationTime,
            "exif" => Exif,
            "iptc" => Iptc,
            "xmp" => Xmp,
            _ => Unknown,
        }
    }

    /// Canonical key string used when writing.
    pub fn to_key_string(self) -> &'static str {
        use MetaDataKey::*;
        match self {
            Unknown => "Unknown",
            Title => "Title",
            Artist => "Artist",
            Author => "Author",
            Description => "Description",
            Comment => "Comment",
            Copyright => "Copyright",
            Software => "Software",
            Disclaimer => "Disclaimer",
            Warning => "Warning",
            Source => "Source",
            CreationTime => "Creation Time",
            Exif => "EXIF",
            Iptc => "IPTC",
            Xmp => "XMP",
            HexExif => "Hex-EXIF",
            HexIptc => "Hex-IPTC",
            HexXmp => "Hex-XMP",
        }
    }
}

/// A tagged value: one of a fixed set of primitives, a string, or an
/// opaque blob. Variants own their storage; cloning deep-copies.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub enum Variant {
    Bool(bool),
    Char(char),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Data(Vec<u8>),
}

impl Variant {
    /// Size in bytes of the raw storage.
    pub fn storage_size(&self) -> usize {
        match self {
            Variant::Bool(_) | Variant::I8(_) | Variant::U8(_) => 1,
            Variant::I16(_) | Variant::U16(_) => 2,
            Variant::Char(_) | Variant::I32(_) | Variant::U32(_) | Variant::F32(_) => 4,
            Variant::I64(_) | Variant::U64(_) | Variant::F64(_) => 8,
            Variant::Str(s) => s.len(),
            Variant::Data(d) => d.len(),
        }
    }

    /// The string payload, if this is a string variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The blob payload, if this is a data variant.
    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Variant::Data(d) => Some(d),
            _ => None,
        }
    }

    /// A lossless widening view as `i64` for the integer variants.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Variant::I8(v) => Some(v.into()),
            Variant::U8(v) => Some(v.into()),
            Variant::I16(v) => Some(v.into()),
            Variant::U16(v) => Some(v.into()),
            Variant::I32(v) => Some(v.into()),
            Variant::U32(v) => Some(v.into()),
            Variant::I64(v) => Some(v),
            Variant::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// A widening view as `f64` for the float variants.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Variant::F32(v) => Some(v.into()),
            Variant::F64(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Bool(v) => write!(f, "{v}"),
            Variant::Char(v) => write!(f, "{v}"),
            Variant::I8(v) => write!(f, "{v}"),
            Variant::U8(v) => write!(f, "{v}"),
            Variant::I16(v) => write!(f, "{v}"),
            Variant::U16(v) => write!(f, "{v}"),
            Variant::I32(v) => write!(f, "{v}"),
            Variant::U32(v) => write!(f, "{v}"),
            Variant::I64(v) => write!(f, "{v}"),
            Variant::U64(v) => write!(f, "{v}"),
            Variant::F32(v) => write!(f, "{v}"),
            Variant::F64(v) => write!(f, "{v}"),
            Variant::Str(v) => f.write_str(v),
            Variant::Data(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// One metadata entry attached to an image.
///
/// Entries are appended in the order the codec encountered them in the
/// stream and never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct MetaData {
    pub key: MetaDataKey,
    /// The original key string when `key` is [`MetaDataKey::Unknown`].
    pub key_unknown: Option<String>,
    pub value: Variant,
}

impl MetaData {
    /// An entry under a well-known key.
    pub fn known(key: MetaDataKey, value: Variant) -> Self {
        Self {
            key,
            key_unknown: None,
            value,
        }
    }

    /// An entry whose key did not map onto the closed enumeration.
    pub fn unknown(key: impl Into<String>, value: Variant) -> Self {
        Self {
            key: MetaDataKey::Unknown,
            key_unknown: Some(key.into()),
            value,
        }
    }

    /// Parse a codec-native key string into either a known or an unknown
    /// entry.
    pub fn from_key_string(key: &str, value: Variant) -> Self {
        match MetaDataKey::from_key_string(key) {
            MetaDataKey::Unknown => Self::unknown(key, value),
            known => Self::known(known, value),
        }
    }

    /// The key string to write this entry under.
    pub fn key_string(&self) -> &str {
        match (&self.key, &self.key_unknown) {
            (MetaDataKey::Unknown, Some(s)) => s,
            (key, _) => key.to_key_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_strings_roundtrip() {
        assert_eq!(
            MetaDataKey::from_key_string("Comment"),
            MetaDataKey::Comment
        );
        assert_eq!(
            MetaDataKey::from_key_string("creation time"),
            MetaDataKey::CreationTime
        );
        assert_eq!(
            MetaDataKey::from_key_string("X-Custom"),
            MetaDataKey::Unknown
        );
    }

    #[test]
    fn unknown_keys_keep_original_string() {
        let md = MetaData::from_key_string("X-Scanner-Model", Variant::Str("Q300".into()));
        assert_eq!(md.key, MetaDataKey::Unknown);
        assert_eq!(md.key_string(), "X-Scanner-Model");

        let md = MetaData::from_key_string("Author", Variant::Str("me".into()));
        assert_eq!(md.key, MetaDataKey::Author);
        assert_eq!(md.key_string(), "Author");
    }

    #[test]
    fn variant_storage_and_views() {
        assert_eq!(Variant::U16(7).storage_size(), 2);
        assert_eq!(Variant::Str("abc".into()).storage_size(), 3);
        assert_eq!(Variant::U32(9).as_i64(), Some(9));
        assert_eq!(Variant::F64(0.5).as_f64(), Some(0.5));
        assert_eq!(Variant::Bool(true).as_i64(), None);
    }
}
