mod checksummer;
mod generate;

pub use checksummer::{checksummer_for, Blake3Checksummer, Checksummer, XxHash64Checksummer};
pub use generate::{generate_checksums, verify_checksums, FileFailure};

pub(crate) use generate::status_for_io_error;
