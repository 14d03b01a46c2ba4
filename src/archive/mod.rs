mod cipher;
mod container;
mod format;
mod manager;
mod writer;

pub use cipher::{ArchiveKey, Cipher, KEYSTREAM_BLOCK_SIZE};
pub use container::{ArchiveIndex, Container, ContainerState, EntryLocation, EntryWindow};
pub use format::{
    parse_directory, ContainerHeader, DirEntry, FLAG_ENCRYPTED, FORMAT_VERSION_MAJOR,
    FORMAT_VERSION_MINOR, HEADER_SIZE, MAGIC_NUMBER, MAX_NAME_LENGTH,
};
pub use manager::{derive_container_path, ArchiveManager};
pub use writer::ArchiveWriter;
