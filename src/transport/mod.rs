/// Filesystem input discovery and staged output writing.
pub mod fs;
