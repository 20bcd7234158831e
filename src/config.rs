//! Generation settings shared by the library driver and the `fuzzgen` binary.

use crate::functions::Endianness;
use std::path::PathBuf;

/// Environment variable consulted for the seed when none is given explicitly.
pub const SEED_ENV: &str = "FUZZDSL_SEED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Seed for the shared random source; a fixed seed yields a fixed corpus.
    pub seed: u64,
    /// Artifacts to produce.
    pub count: usize,
    /// Consecutive failed passes tolerated before giving up.
    pub max_failures: usize,
    pub endianness: Endianness,
    /// Corpus directory; artifacts are written as `<prefix>-<index>.bin`.
    pub output_dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            seed: 0,
            count: 1,
            max_failures: 16,
            endianness: Endianness::Big,
            output_dir: None,
            file_prefix: "case".to_string(),
        }
    }
}

impl GeneratorConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// File name of artifact `index`, zero-padded so names sort in generation order.
    pub fn file_name(&self, index: usize) -> String {
        let width = self.count.saturating_sub(1).max(1).to_string().len();
        format!("{}-{:0width$}.bin", self.file_prefix, index, width = width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_sort() {
        let config = GeneratorConfig::default().with_count(120);
        assert_eq!(config.file_name(7), "case-007.bin");
        assert_eq!(config.file_name(119), "case-119.bin");
        assert_eq!(GeneratorConfig::default().file_name(0), "case-0.bin");
    }
}
