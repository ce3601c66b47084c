// crates/storyreel-media/src/helpers/mod.rs
//
// Internal helpers for storyreel-media. Not re-exported from lib.rs; these
// are encode plumbing, not part of the public pipeline API.

pub mod aac;
pub mod staging;
pub mod yuv;
