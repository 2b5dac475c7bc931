//! Runtime configuration. There is no environment-variable surface — everything here comes from parsed
//! CLI arguments, threaded through as a plain struct rather than a
//! global.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Options {
    pub image: PathBuf,
    pub output: PathBuf,
}
