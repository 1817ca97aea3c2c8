/// Size of one binary chunk on the direct channel (64KB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Sender pauses once the channel buffers more than this (1MB)
pub const HIGH_WATER_MARK: u64 = 1024 * 1024;

/// ...and resumes once the channel drained to this (512KB)
pub const LOW_WATER_MARK: u64 = 512 * 1024;

/// Maximum filename length in bytes
pub const MAX_FILENAME_LENGTH: usize = 255;
