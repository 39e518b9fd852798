pub mod helpers;

pub use helpers::{ensure_directory_exists, tail_chars, truncate_chars, write_atomically};
