//! Filesystem and digest helpers shared by step tasks.

mod fs;

pub(crate) use fs::{
    StagedFiles, create_dir_owned, read_context_file, replace_dir, sha256_hex, verify_sha256, write_atomic,
};
