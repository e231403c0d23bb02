use std::fmt;
use std::io::{self, BufRead, BufReader, Read};

use flate2::bufread::MultiGzDecoder;

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    /// Detect compression format from magic bytes.
    pub fn detect(data: &[u8]) -> Self {
        match data {
            // Gzip: 1f 8b
            [0x1f, 0x8b, ..] => Compression::Gzip,
            _ => Compression::None,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
        }
    }
}

enum Inner<R: Read> {
    Plain(BufReader<R>),
    Gzip(MultiGzDecoder<BufReader<R>>),
}

/// Uniform byte stream over a raw or compressed capture.
///
/// The first decompressor error is remembered so the caller can tell a
/// corrupt archive apart from a capture the parser does not understand.
pub struct DecodedStream<R: Read> {
    inner: Inner<R>,
    compression: Compression,
    fault: Option<String>,
}

impl<R: Read> DecodedStream<R> {
    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }
}

impl<R: Read> Read for DecodedStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Plain(reader) => reader.read(buf),
            Inner::Gzip(decoder) => decoder.read(buf).map_err(|e| {
                self.fault.get_or_insert_with(|| e.to_string());
                e
            }),
        }
    }
}

/// Picks the decoder from the leading magic bytes, never the file name.
pub struct ArchiveUnwrapper;

impl ArchiveUnwrapper {
    /// Peeks at the first bytes of `raw` and wraps it in a decompressor when
    /// they carry the gzip magic. Only I/O errors from the peek itself are
    /// returned here; a corrupt gzip body surfaces while reading.
    pub fn unwrap<R: Read>(raw: R) -> io::Result<DecodedStream<R>> {
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, raw);
        let compression = Compression::detect(reader.fill_buf()?);

        let inner = match compression {
            Compression::None => Inner::Plain(reader),
            Compression::Gzip => Inner::Gzip(MultiGzDecoder::new(reader)),
        };

        Ok(DecodedStream {
            inner,
            compression,
            fault: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::{Cursor, Write};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_detect() {
        assert_eq!(Compression::detect(&[0x1f, 0x8b, 0x08]), Compression::Gzip);
        assert_eq!(Compression::detect(&[0xd4, 0xc3, 0xb2, 0xa1]), Compression::None);
        assert_eq!(Compression::detect(&[0x1f]), Compression::None);
        assert_eq!(Compression::detect(&[]), Compression::None);
    }

    #[test]
    fn test_plain_stream_passes_through() {
        let mut stream = ArchiveUnwrapper::unwrap(Cursor::new(b"raw capture bytes".to_vec())).unwrap();
        assert_eq!(stream.compression(), Compression::None);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"raw capture bytes");
        assert_eq!(stream.fault(), None);
    }

    #[test]
    fn test_gzip_stream_is_decoded() {
        let payload = b"compressed capture bytes".repeat(100);
        let mut stream = ArchiveUnwrapper::unwrap(Cursor::new(gzip(&payload))).unwrap();
        assert_eq!(stream.compression(), Compression::Gzip);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_truncated_gzip_records_fault() {
        let mut data = gzip(&b"some capture".repeat(50));
        data.truncate(data.len() - 6);

        let mut stream = ArchiveUnwrapper::unwrap(Cursor::new(data)).unwrap();
        let mut out = Vec::new();
        assert!(stream.read_to_end(&mut out).is_err());
        assert!(stream.fault().is_some());
    }

    #[test]
    fn test_empty_input_is_plain() {
        let stream = ArchiveUnwrapper::unwrap(Cursor::new(Vec::new())).unwrap();
        assert_eq!(stream.compression(), Compression::None);
    }
}
