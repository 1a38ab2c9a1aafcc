//! Cooperative stop signalling for background tasks.

mod token;

pub use token::CancellationToken;
