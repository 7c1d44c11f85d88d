//! Format-agnostic decompression for repository index artifacts.
//!
//! Supports the compressions repositories actually ship indexes in
//! (gzip, zstd, bzip2, xz). [`decoder`] wraps any reader so large artifacts
//! such as RPM `primary.xml` can be inflated while they are parsed;
//! [`decompress`] is the whole-buffer convenience.

use std::io::{self, Read};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("unsupported compression scheme: {0}")]
    UnsupportedScheme(String),

    #[error("corrupt {scheme} data: {source}")]
    CorruptData {
        scheme: Scheme,
        #[source]
        source: io::Error,
    },
}

/// Compression applied to a fetched artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    None,
    Gzip,
    Zstd,
    Bzip2,
    Xz,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::None => "none",
            Scheme::Gzip => "gzip",
            Scheme::Zstd => "zstd",
            Scheme::Bzip2 => "bzip2",
            Scheme::Xz => "xz",
        }
    }

    /// Detect from a file name or URL path.
    pub fn from_extension(path: &str) -> Option<Self> {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        if path.ends_with(".gz") || path.ends_with(".tgz") {
            Some(Scheme::Gzip)
        } else if path.ends_with(".zst") || path.ends_with(".zstd") {
            Some(Scheme::Zstd)
        } else if path.ends_with(".bz2") {
            Some(Scheme::Bzip2)
        } else if path.ends_with(".xz") {
            Some(Scheme::Xz)
        } else {
            None
        }
    }

    /// Detect from leading magic bytes.
    ///
    /// - gzip: `1f 8b`
    /// - zstd: `28 b5 2f fd`
    /// - bzip2: `BZh`
    /// - xz: `fd 37 7a 58 5a 00`
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            Scheme::Gzip
        } else if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Scheme::Zstd
        } else if data.starts_with(b"BZh") {
            Scheme::Bzip2
        } else if data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
            Scheme::Xz
        } else {
            Scheme::None
        }
    }

    /// Map a `Content-Encoding` header value. `identity` carries no
    /// information and yields `None`; unknown encodings are an error.
    pub fn from_content_encoding(header: &str) -> Result<Option<Self>, DecompressError> {
        match header.parse()? {
            Scheme::None => Ok(None),
            scheme => Ok(Some(scheme)),
        }
    }

    /// Pick a scheme for an artifact: the declared one wins, then the
    /// response's `Content-Encoding`, then the URL extension, then sniffing.
    pub fn resolve(
        declared: Option<Scheme>,
        content_encoding: Option<&str>,
        url: &str,
        data: &[u8],
    ) -> Result<Self, DecompressError> {
        if let Some(declared) = declared {
            return Ok(declared);
        }
        if let Some(header) = content_encoding
            && let Some(scheme) = Scheme::from_content_encoding(header)?
        {
            return Ok(scheme);
        }
        Ok(Scheme::from_extension(url).unwrap_or_else(|| Scheme::from_magic_bytes(data)))
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Scheme {
    type Err = DecompressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "identity" | "" => Ok(Scheme::None),
            "gzip" | "gz" | "x-gzip" => Ok(Scheme::Gzip),
            "zstd" | "zst" => Ok(Scheme::Zstd),
            "bzip2" | "bz2" => Ok(Scheme::Bzip2),
            "xz" | "lzma" => Ok(Scheme::Xz),
            other => Err(DecompressError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Wrap `reader` in a streaming decoder for `scheme`.
pub fn decoder<'a, R: Read + 'a>(
    reader: R,
    scheme: Scheme,
) -> Result<Box<dyn Read + 'a>, DecompressError> {
    match scheme {
        Scheme::None => Ok(Box::new(reader)),
        Scheme::Gzip => Ok(Box::new(flate2::read::MultiGzDecoder::new(reader))),
        Scheme::Bzip2 => Ok(Box::new(bzip2::read::MultiBzDecoder::new(reader))),
        Scheme::Xz => Ok(Box::new(xz2::read::XzDecoder::new_multi_decoder(reader))),
        Scheme::Zstd => {
            let decoder = zstd::Decoder::new(reader)
                .map_err(|source| DecompressError::CorruptData { scheme, source })?;
            Ok(Box::new(decoder))
        }
    }
}

/// Decompress a whole buffer.
pub fn decompress(data: &[u8], scheme: Scheme) -> Result<Vec<u8>, DecompressError> {
    let mut reader = decoder(data, scheme)?;
    let mut output = Vec::new();
    reader
        .read_to_end(&mut output)
        .map_err(|source| DecompressError::CorruptData { scheme, source })?;
    Ok(output)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;

    use super::Scheme;

    /// Compress `data` with `scheme` (test fixtures only).
    pub fn compress(data: &[u8], scheme: Scheme) -> Vec<u8> {
        match scheme {
            Scheme::None => data.to_vec(),
            Scheme::Gzip => {
                let mut enc =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                enc.write_all(data).unwrap();
                enc.finish().unwrap()
            }
            Scheme::Zstd => zstd::encode_all(data, 3).unwrap(),
            Scheme::Bzip2 => {
                let mut enc =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
                enc.write_all(data).unwrap();
                enc.finish().unwrap()
            }
            Scheme::Xz => {
                let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
                enc.write_all(data).unwrap();
                enc.finish().unwrap()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::compress;
    use super::*;

    const SAMPLE: &[u8] = b"Package: curl\nVersion: 7.81.0\n\nPackage: wget\nVersion: 1.21.2\n";

    #[test]
    fn test_scheme_from_str() {
        assert_eq!("gzip".parse::<Scheme>().unwrap(), Scheme::Gzip);
        assert_eq!("ZSTD".parse::<Scheme>().unwrap(), Scheme::Zstd);
        assert_eq!("bz2".parse::<Scheme>().unwrap(), Scheme::Bzip2);
        assert_eq!("xz".parse::<Scheme>().unwrap(), Scheme::Xz);
        assert!(matches!(
            "lz4".parse::<Scheme>(),
            Err(DecompressError::UnsupportedScheme(s)) if s == "lz4"
        ));
    }

    #[test]
    fn test_from_extension() {
        assert_eq!(Scheme::from_extension("Packages.gz"), Some(Scheme::Gzip));
        assert_eq!(
            Scheme::from_extension("repodata/abc-primary.xml.zst"),
            Some(Scheme::Zstd)
        );
        assert_eq!(Scheme::from_extension("Packages.bz2"), Some(Scheme::Bzip2));
        assert_eq!(Scheme::from_extension("Packages.xz?x=1"), Some(Scheme::Xz));
        assert_eq!(Scheme::from_extension("repomd.xml"), None);
    }

    #[test]
    fn test_from_magic_bytes() {
        for scheme in [Scheme::Gzip, Scheme::Zstd, Scheme::Bzip2, Scheme::Xz] {
            assert_eq!(Scheme::from_magic_bytes(&compress(SAMPLE, scheme)), scheme);
        }
        assert_eq!(Scheme::from_magic_bytes(SAMPLE), Scheme::None);
        assert_eq!(Scheme::from_magic_bytes(&[0x1f]), Scheme::None);
    }

    #[test]
    fn test_resolve_precedence() {
        let gz = compress(SAMPLE, Scheme::Gzip);
        let resolve = |declared, encoding, url| Scheme::resolve(declared, encoding, url, &gz).unwrap();

        assert_eq!(resolve(Some(Scheme::Bzip2), Some("gzip"), "x/Packages.xz"), Scheme::Bzip2);
        assert_eq!(resolve(None, Some("zstd"), "x/Packages.xz"), Scheme::Zstd);
        assert_eq!(resolve(None, Some("identity"), "x/Packages.xz"), Scheme::Xz);
        assert_eq!(resolve(None, None, "x/Packages.xz"), Scheme::Xz);
        assert_eq!(resolve(None, None, "x/Packages"), Scheme::Gzip);
        assert_eq!(Scheme::resolve(None, None, "x/Packages", SAMPLE).unwrap(), Scheme::None);

        assert!(matches!(
            Scheme::resolve(None, Some("br"), "x/Packages.gz", &gz),
            Err(DecompressError::UnsupportedScheme(name)) if name == "br"
        ));
        assert_eq!(resolve(Some(Scheme::Gzip), Some("br"), "x/Packages"), Scheme::Gzip);
    }

    #[test]
    fn test_all_schemes_decompress_identically() {
        for scheme in [Scheme::None, Scheme::Gzip, Scheme::Zstd, Scheme::Bzip2, Scheme::Xz] {
            let compressed = compress(SAMPLE, scheme);
            assert_eq!(decompress(&compressed, scheme).unwrap(), SAMPLE, "{scheme}");
            let sniffed = Scheme::from_magic_bytes(&compressed);
            assert_eq!(decompress(&compressed, sniffed).unwrap(), SAMPLE, "{scheme}");
        }
    }

    #[test]
    fn test_corrupt_data() {
        let mut gz = compress(SAMPLE, Scheme::Gzip);
        let mid = gz.len() / 2;
        gz[mid..].iter_mut().for_each(|b| *b = 0xff);
        assert!(matches!(
            decompress(&gz, Scheme::Gzip),
            Err(DecompressError::CorruptData { scheme: Scheme::Gzip, .. })
        ));

        assert!(matches!(
            decompress(b"definitely not zstd", Scheme::Zstd),
            Err(DecompressError::CorruptData { .. })
        ));
    }

    #[test]
    fn test_content_encoding_hint() {
        assert_eq!(Scheme::from_content_encoding("x-gzip").unwrap(), Some(Scheme::Gzip));
        assert_eq!(Scheme::from_content_encoding("Identity").unwrap(), None);
        assert!(Scheme::from_content_encoding("br").is_err());
    }
}
