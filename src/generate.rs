//! Corpus generation: repeated passes over one program with a seeded random source.
//!
//! A pass that fails (for example a reference into an unselected choice branch, or
//! content wider than its field) produces no artifact. The generator logs it and moves
//! on, and gives up only after `max_failures` failures in a row.

use crate::config::GeneratorConfig;
use crate::error::Error;
use crate::field::Field;
use crate::program::Program;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};

/// Failure of a whole generation run, as opposed to a single discarded pass.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("{failures} consecutive passes failed; last error: {last}")]
    TooManyFailures { failures: usize, last: Error },
    #[error("encode: {0}")]
    Encode(Error),
}

/// Summary of a corpus run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusReport {
    pub written: Vec<PathBuf>,
    pub discarded: usize,
}

pub struct Generator {
    program: Program,
    rng: ChaCha8Rng,
    config: GeneratorConfig,
    discarded: usize,
}

impl Generator {
    pub fn new(program: Program, config: &GeneratorConfig) -> Self {
        Generator {
            program: program.with_endianness(config.endianness),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config: config.clone(),
            discarded: 0,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Passes discarded so far.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// One generation pass; errors are returned as-is and nothing is retried.
    pub fn try_next_field(&mut self) -> Result<Field, Error> {
        self.program.generate(&mut self.rng)
    }

    /// Next successfully generated tree, retrying failed passes. A program with a fixed
    /// shape gets a single attempt, since its next pass would fail the same way.
    pub fn next_field(&mut self) -> Result<Field, GenerateError> {
        let limit = if self.program.has_fixed_shape() {
            1
        } else {
            self.config.max_failures.max(1)
        };
        let mut failures = 0;
        loop {
            match self.try_next_field() {
                Ok(root) => return Ok(root),
                Err(e) => {
                    failures += 1;
                    self.discarded += 1;
                    tracing::warn!(error = %e, failures, "discarding generation pass");
                    if failures >= limit {
                        return Err(GenerateError::TooManyFailures { failures, last: e });
                    }
                }
            }
        }
    }

    /// Bytes of the next artifact.
    pub fn next_artifact(&mut self) -> Result<Vec<u8>, GenerateError> {
        let root = self.next_field()?;
        root.to_bytes().map_err(GenerateError::Encode)
    }

    /// `config.count` artifacts in memory.
    pub fn corpus(&mut self) -> Result<Vec<Vec<u8>>, GenerateError> {
        (0..self.config.count).map(|_| self.next_artifact()).collect()
    }

    /// Write `config.count` artifacts into `dir`, creating it if needed.
    pub fn write_corpus(&mut self, dir: &Path) -> Result<CorpusReport, GenerateError> {
        std::fs::create_dir_all(dir)?;
        let start = self.discarded;
        let mut written = Vec::with_capacity(self.config.count);
        for index in 0..self.config.count {
            let bytes = self.next_artifact()?;
            let path = dir.join(self.config.file_name(index));
            std::fs::write(&path, &bytes)?;
            tracing::debug!(path = %path.display(), len = bytes.len(), "wrote artifact");
            written.push(path);
        }
        tracing::info!(
            written = written.len(),
            discarded = self.discarded - start,
            dir = %dir.display(),
            "corpus written"
        );
        Ok(CorpusReport {
            written,
            discarded: self.discarded - start,
        })
    }
}
