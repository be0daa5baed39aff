//! Creator-media mirroring: catalog enumeration, paced concurrent
//! downloads, content-based classification, integrity verification, and
//! repair of corrupt files.

pub mod catalog;
pub mod config;
pub mod files;
pub mod mirror;
