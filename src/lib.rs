//! # fuzzdsl — Fuzz Artifact Description Language
//!
//! A small DSL for describing the layout of binary artifacts (file formats, packets)
//! with a PEST grammar, plus a generator that instantiates the layout into a tree of
//! fields, fills each field (random bytes, constants, digests, sizes, checksums) and
//! serializes the result. Every pass yields a new random variant.
//!
//! ## DSL structure
//!
//! - **Leaves**: `block<n>` (fixed bytes), `varblock<min, max>` (size drawn per pass),
//!   `bitfield<n>` (n bits), `auto` (size taken from the filler, e.g. a digest)
//! - **Containers**: `compound { .. }`, `choice { .. }` (one branch per pass),
//!   `bits { .. }` (packed bitfields)
//! - **Templates**: `template Name { .. }` referenced as `Name<min, max>;`, repeated
//!   a random number of times within the bounds
//! - **Fillers**: `= "lit"`, `= 0x2a`, `= other_field`, `= function(a, b)`
//!
//! Fields are filled in declaration order; a filler may read the content of fields
//! declared before it.
//!
//! ## Example
//!
//! ```text
//! template Record {
//!   block<1> tag = random();
//!   block<2> len = size(body);
//!   varblock<0, 32> body;
//! }
//!
//! block<4> magic = "PK\x03\x04";
//! Record<1, 8>;
//! block<4> crc = crc32(magic);
//! auto digest = sha256(magic, crc);
//! ```
//!
//! ## Usage
//!
//! ```
//! use fuzzdsl::{parse, Generator, GeneratorConfig};
//!
//! let program = parse("block<4> a; block<4> b = crc32(a);").unwrap();
//! let mut generator = Generator::new(program, &GeneratorConfig::default().with_seed(7));
//! let artifact = generator.next_artifact().unwrap();
//! assert_eq!(artifact.len(), 8);
//! ```

pub mod ast;
pub mod config;
pub mod context;
pub mod dump;
pub mod error;
pub mod field;
pub mod functions;
pub mod generate;
pub mod mapper;
pub mod parser;
pub mod program;
pub mod value;

pub use config::GeneratorConfig;
pub use context::ParseContext;
pub use dump::dump_field;
pub use error::{Error, Result};
pub use field::{Field, FieldId};
pub use functions::{Endianness, FillContext, Filler, FunctionRegistry, ValueOp};
pub use generate::{CorpusReport, GenerateError, Generator};
pub use mapper::FieldMapper;
pub use parser::{parse, parse_with};
pub use program::Program;
pub use value::{FieldKind, FieldValue, Unit};
