//! Trace provenance: content digests recorded in reports.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use heapreplay_core::{ReplayError, Trace, read_trace};
use sha2::{Digest, Sha256};

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(&mut out, "{b:02x}").expect("writing to String should not fail");
    }
    out
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_bytes(data: &[u8]) -> String {
    hex_lower(&Sha256::digest(data))
}

/// Lowercase hex SHA-256 of the file at `path`, streamed.
pub fn sha256_hex(path: &Path) -> std::io::Result<String> {
    let mut reader = DigestReader::new(BufReader::new(File::open(path)?));
    std::io::copy(&mut reader, &mut std::io::sink())?;
    Ok(reader.finish())
}

/// Reader adapter that hashes every byte passing through it.
pub struct DigestReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R: Read> DigestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Bytes hashed so far.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    /// Lowercase hex digest of everything read.
    #[must_use]
    pub fn finish(self) -> String {
        hex_lower(&self.hasher.finalize())
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

/// Parse the trace at `path` and digest it in one pass over the file.
pub fn load_trace_with_digest(path: &Path) -> Result<(Trace, String), ReplayError> {
    let io_error = |source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_error)?;
    let mut reader = BufReader::new(DigestReader::new(file));
    let trace = read_trace(&mut reader).map_err(io_error)?;
    Ok((trace, reader.into_inner().finish()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("heapreplay-provenance-{}-{name}", std::process::id()))
    }

    #[test]
    fn digest_of_empty_input_is_the_known_constant() {
        assert_eq!(
            sha256_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_of_abc_is_lowercase_hex() {
        let digest = sha256_bytes(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = temp_path("missing.trace");
        let _ = std::fs::remove_file(&path);
        assert!(sha256_hex(&path).is_err());
        assert!(matches!(
            load_trace_with_digest(&path),
            Err(ReplayError::Io { .. })
        ));
    }

    #[test]
    fn streamed_digest_matches_in_memory_digest_across_buffer_boundaries() {
        // larger than the default BufReader capacity so reads are chunked
        let mut body = String::new();
        for id in 1..=4_000 {
            body.push_str(&format!("N {id} 32 0 1 0 0\n"));
        }
        let path = temp_path("chunked.trace");
        std::fs::write(&path, &body).unwrap();

        let expected = sha256_bytes(body.as_bytes());
        assert_eq!(sha256_hex(&path).unwrap(), expected);

        let (trace, digest) = load_trace_with_digest(&path).unwrap();
        assert_eq!(digest, expected);
        assert_eq!(trace.events.len(), 4_000);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn digest_reader_counts_bytes() {
        let mut reader = DigestReader::new(&b"abc"[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(reader.bytes_read(), 3);
        assert_eq!(reader.finish(), sha256_bytes(b"abc"));
    }
}
