//! # simvec-rs — LSH-based vector storage and approximate nearest-neighbor search
//!
//! Maps real-valued feature vectors into fixed-width bit signatures via a
//! deterministic locality-sensitive hashing projection, stores them behind
//! an ordered key-value store, and answers approximate nearest-neighbor
//! queries with a cascaded Hamming-distance filter.
//!
//! ## Design principles
//!
//! 1. **Trait-first storage**: [`kv::KvBackend`] is the contract between the
//!    typed record layer and whatever ordered embedded store backs it.
//! 2. **Deterministic core**: the LSH model and all bit-signature hashing
//!    are reproducible given a seed — no platform RNG ever reaches a core
//!    boundary (see [`rng`]).
//! 3. **Façade owns the error buffer**: [`storage::Storage`] is the only
//!    layer that swallows errors into a neutral return value; every other
//!    module returns [`error::Result`] normally.
//!
//! ## Quick start
//!
//! ```rust
//! use simvec_rs::kv::MemoryKv;
//! use simvec_rs::storage::Storage;
//!
//! let storage = Storage::create("vecdim=8;bits=4;variations=2", 42, MemoryKv::new()).unwrap();
//! let mut tx = storage.create_transaction().unwrap();
//! tx.define_vector("Word", "hello", vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
//! tx.commit().unwrap();
//!
//! storage.prepare_search("Word");
//! let results = storage.find_similar(
//!     "Word",
//!     &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
//!     1,
//!     0.5,
//!     false,
//! );
//! assert_eq!(results.len(), 1);
//! assert_eq!(results[0].name, "hello");
//! ```

pub mod binfmt;
pub mod bitsignature;
pub mod config;
pub mod error;
pub mod filter;
pub mod index;
pub mod kv;
pub mod lsh;
pub mod ranklist;
pub mod rng;
pub mod searcher;
pub mod storage;
pub mod transaction;
pub mod vecmath;
pub mod version;

pub use bitsignature::BitSignature;
pub use error::{Error, Result};
pub use lsh::LshModel;
pub use storage::{FeatureMatch, Storage};
pub use transaction::Transaction;
