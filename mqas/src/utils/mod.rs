//! Small parsing helpers shared by configuration and job code.

mod duration;

pub use duration::parse_duration;
