//! Cover Core - render engine for AI song covers
//!
//! Splits each source take into stems, re-sings the lead vocal with a
//! voice model at every configured pitch offset, mixes the result and
//! publishes it. The worker binary is a thin shell around this crate.

pub mod config;
pub mod device;
pub mod external;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod render;
pub mod separation;
pub mod tools;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_returns_value() {
        assert!(!version().is_empty());
    }
}
