use std::hash::Hasher as _;
use std::io::{self, Read};
use std::sync::Arc;
use twox_hash::XxHash64;

use crate::model::HashType;

const READ_CHUNK: usize = 64 * 1024;

/// Streams a reader into a digest.
pub trait Checksummer: Send + Sync {
    fn hash_type(&self) -> HashType;

    fn checksum(&self, reader: &mut dyn Read) -> io::Result<Vec<u8>>;

    fn checksum_bytes(&self, data: &[u8]) -> Vec<u8> {
        let mut reader = data;
        // Reading from a slice cannot fail.
        self.checksum(&mut reader).unwrap_or_default()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Checksummer;

impl Checksummer for Blake3Checksummer {
    fn hash_type(&self) -> HashType {
        HashType::Blake3
    }

    fn checksum(&self, reader: &mut dyn Read) -> io::Result<Vec<u8>> {
        let mut hasher = blake3::Hasher::new();
        io::copy(reader, &mut hasher)?;
        Ok(hasher.finalize().as_bytes().to_vec())
    }
}

/// Seed-0 XxHash64, big-endian.
#[derive(Debug, Default, Clone, Copy)]
pub struct XxHash64Checksummer;

impl Checksummer for XxHash64Checksummer {
    fn hash_type(&self) -> HashType {
        HashType::XxHash64
    }

    fn checksum(&self, reader: &mut dyn Read) -> io::Result<Vec<u8>> {
        let mut hasher = XxHash64::with_seed(0);
        let mut buffer = vec![0; READ_CHUNK];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.write(&buffer[..read]);
        }
        Ok(hasher.finish().to_be_bytes().to_vec())
    }
}

pub fn checksummer_for(hash_type: HashType) -> Option<Arc<dyn Checksummer>> {
    match hash_type {
        HashType::Blake3 => Some(Arc::new(Blake3Checksummer)),
        HashType::XxHash64 => Some(Arc::new(XxHash64Checksummer)),
        HashType::None => None,
    }
}
