mod cursor;
pub(crate) mod format;
mod manifest;
mod reader;
mod stub;
mod timestamps;
mod writer;

pub use cursor::ByteCursor;
pub use format::{
    find_stub_end, Compression, EntryDescriptor, FileEntry, ManifestHeader, API_VERSION,
    DEFAULT_PERMISSIONS, FLAG_DEFLATE, FLAG_SIGNATURE, HALT_MARKER, PERMISSION_MASK,
};
pub use manifest::{ArchiveManifest, ManifestEntry};
pub use reader::ArchiveReader;
pub use stub::{finish_stub, StubGenerator};
pub use timestamps::TimestampNormalizer;
pub use writer::{ArchiveAssembler, ArchiveLayout, AssembledArchive};
