//! The client-facing façade: construction/configuration, read operations,
//! the copy-on-write `SignatureIndex` cache, and the ambient error buffer.
//! Grounded on the teacher's top-level `Graph<B>` façade (one generic client
//! handle wrapping a storage backend, a config, and a central error type)
//! adapted to this system's single-writer-mutex / copy-on-write-cache shape
//! instead of a lock-free graph store.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use crate::bitsignature::BitSignature;
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::index::SignatureIndex;
use crate::kv::{KeyValueAdapter, KvBackend};
use crate::lsh::LshModel;
use crate::ranklist::dist_from_weight;
use crate::transaction::Transaction;
use crate::vecmath::{cosine_similarity, normalize as normalize_vec};

/// One `findSimilar` match, named (not by raw featno) since that is how
/// every other façade read (`featureVector`, `featureTypes`) identifies a
/// feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatch {
    pub name: String,
    pub weight: f64,
}

pub(crate) struct StorageInner<K: KvBackend> {
    pub(crate) adapter: KeyValueAdapter<K>,
    pub(crate) model: LshModel,
    pub(crate) config: StorageConfig,
    pub(crate) index_cache: RwLock<Arc<HashMap<String, Arc<SignatureIndex>>>>,
    pub(crate) last_error: Mutex<Option<Error>>,
    pub(crate) commit_mutex: Mutex<()>,
}

/// The client handle. Cheap to clone; every clone shares the same
/// underlying store, model, index cache, and ambient error buffer.
#[derive(Clone)]
pub struct Storage<K: KvBackend> {
    pub(crate) inner: Arc<StorageInner<K>>,
}

impl<K: KvBackend> Storage<K> {
    /// Builds a fresh store over `backend`: parses `config`, constructs the
    /// `LshModel` from `vecdim`/`bits`/`variations` and `seed`, writes the
    /// version header and the model.
    pub fn create(config_str: &str, seed: u64, backend: K) -> Result<Self> {
        let config = StorageConfig::parse(config_str)?;
        let adapter = KeyValueAdapter::new(backend);
        let model = LshModel::build(config.vecdim, config.bits, config.variations, seed)?;
        adapter.write_version_header()?;
        adapter.write_lsh_model(&model)?;
        let mut batch = adapter.begin_write_batch();
        batch.write_nof_typeno(0)?;
        batch.write_nof_featno(0)?;
        batch.commit()?;
        tracing::info!(vecdim = config.vecdim, bits = config.bits, variations = config.variations, "created storage");
        Ok(Self {
            inner: Arc::new(StorageInner {
                adapter,
                model,
                config,
                index_cache: RwLock::new(Arc::new(HashMap::new())),
                last_error: Mutex::new(None),
                commit_mutex: Mutex::new(()),
            }),
        })
    }

    /// Opens an existing store: validates the version header, loads the
    /// model, and eagerly prepares every type named in `memtypes`.
    pub fn open(config_str: &str, backend: K) -> Result<Self> {
        let config = StorageConfig::parse(config_str)?;
        let adapter = KeyValueAdapter::new(backend);
        adapter.check_version()?;
        let model = adapter
            .read_lsh_model()?
            .ok_or_else(|| Error::not_found("no LSH model stored; storage was never created"))?;

        let storage = Self {
            inner: Arc::new(StorageInner {
                adapter,
                model,
                config: config.clone(),
                index_cache: RwLock::new(Arc::new(HashMap::new())),
                last_error: Mutex::new(None),
                commit_mutex: Mutex::new(()),
            }),
        };

        for type_name in &config.memtypes {
            match storage.inner.adapter.read_typeno(type_name) {
                Ok(Some(_)) => {
                    if !storage.prepare_search(type_name) {
                        tracing::warn!(type_name, "memtypes: failed to prepare search index");
                    }
                }
                Ok(None) => {
                    tracing::warn!(type_name, "memtypes: unknown type at open time, skipping");
                }
                Err(e) => {
                    tracing::warn!(type_name, error = %e, "memtypes: lookup failed, skipping");
                }
            }
        }
        Ok(storage)
    }

    fn record_error(&self, err: Error) {
        tracing::error!(error = %err, kind = err.kind(), "storage operation failed");
        *self.inner.last_error.lock() = Some(err);
    }

    /// The most recent error recorded by a façade call, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.inner.last_error.lock().clone()
    }

    // -- prepareSearch ----------------------------------------------------

    /// Builds (or rebuilds) the `SignatureIndex` for `type_name` eagerly.
    pub fn prepare_search(&self, type_name: &str) -> bool {
        match self.try_prepare_search(type_name) {
            Ok(()) => true,
            Err(e) => {
                self.record_error(e);
                false
            }
        }
    }

    fn try_prepare_search(&self, type_name: &str) -> Result<()> {
        let typeno = self
            .inner
            .adapter
            .read_typeno(type_name)?
            .ok_or_else(|| Error::not_found(format!("unknown type '{type_name}'")))?;
        let rows = self.inner.adapter.read_all_signatures(typeno)?;
        if rows.is_empty() {
            return Err(Error::not_found(format!("type '{type_name}' has no vectors")));
        }
        let bench_count = 4.min(self.inner.model.signature_width() as usize / 64).max(1);
        let threads = self.inner.config.threads;

        // `memtypes` names the types worth keeping fully resident; anything
        // else is database-backed, re-reading full signatures from the
        // adapter on refinement instead of holding them all in memory.
        let index = if self.inner.config.memtypes.iter().any(|t| t == type_name) {
            SignatureIndex::build_resident(rows, bench_count, threads)?
        } else {
            let adapter_handle = self.inner.adapter.clone();
            let reader_typeno = typeno;
            let reader = Box::new(move |featno: u64| {
                adapter_handle
                    .read_signature(reader_typeno, featno)?
                    .ok_or_else(|| Error::not_found(format!("signature for featno {featno} vanished")))
            });
            SignatureIndex::build_backed(rows, bench_count, threads, reader)?
        };
        self.publish_index(type_name, Arc::new(index));
        tracing::info!(type_name, "rebuilt signature index");
        Ok(())
    }

    fn publish_index(&self, type_name: &str, index: Arc<SignatureIndex>) {
        let mut guard = self.inner.index_cache.write();
        let mut next = (**guard).clone();
        next.insert(type_name.to_string(), index);
        *guard = Arc::new(next);
    }

    pub(crate) fn invalidate_index(&self, type_name: &str) {
        let mut guard = self.inner.index_cache.write();
        if guard.contains_key(type_name) {
            let mut next = (**guard).clone();
            next.remove(type_name);
            *guard = Arc::new(next);
        }
    }

    fn cached_index(&self, type_name: &str) -> Option<Arc<SignatureIndex>> {
        self.inner.index_cache.read().get(type_name).cloned()
    }

    // -- findSimilar --------------------------------------------------------

    /// Finds up to `k` features of `type_name` similar to `v`. Returns the
    /// empty list (rather than an error) if `type_name` is unknown, per §7;
    /// `InvalidArgument` inputs are recorded in the ambient error buffer.
    pub fn find_similar(
        &self,
        type_name: &str,
        v: &[f64],
        k: usize,
        min_sim: f64,
        real_weights: bool,
    ) -> Vec<FeatureMatch> {
        match self.try_find_similar(type_name, v, k, min_sim, real_weights) {
            Ok(results) => results,
            Err(e) => {
                self.record_error(e);
                Vec::new()
            }
        }
    }

    fn try_find_similar(
        &self,
        type_name: &str,
        v: &[f64],
        k: usize,
        min_sim: f64,
        real_weights: bool,
    ) -> Result<Vec<FeatureMatch>> {
        if !(0.0..=1.0).contains(&min_sim) {
            return Err(Error::invalid_argument("minSim must be in [0,1]"));
        }
        if k > crate::ranklist::MAX_CAPACITY {
            return Err(Error::invalid_argument(format!(
                "K {k} exceeds the maximum rank list size {}",
                crate::ranklist::MAX_CAPACITY
            )));
        }
        let Some(index) = self.cached_index(type_name) else {
            return Ok(Vec::new());
        };
        let total_bits = index.total_bits();
        let simdist = dist_from_weight(min_sim, total_bits);
        let probsimdist = self.inner.config.probsimdist.unwrap_or(total_bits).max(simdist).min(total_bits);

        let normalized = normalize_vec(v);
        let needle = self.inner.model.sim_hash(&normalized, 0)?;

        let fetch_k = if real_weights {
            (2 * k + 10).min(crate::ranklist::MAX_CAPACITY)
        } else {
            k
        };
        let mut results = index.find_similar(&needle, simdist, probsimdist, fetch_k)?;

        if real_weights {
            let typeno = self
                .inner
                .adapter
                .read_typeno(type_name)?
                .ok_or_else(|| Error::not_found(format!("unknown type '{type_name}'")))?;
            let mut rescored = Vec::with_capacity(results.len());
            for r in &results {
                if let Some(stored) = self.inner.adapter.read_vector(typeno, r.featno)? {
                    let sim = cosine_similarity(&normalized, &stored);
                    rescored.push(crate::index::SimilarityResult { featno: r.featno, weight: sim });
                }
            }
            rescored.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
            rescored.truncate(k);
            results = rescored;
        } else {
            results.truncate(k);
        }

        let mut named = Vec::with_capacity(results.len());
        for r in results {
            if let Some(name) = self.inner.adapter.read_feat_name(r.featno)? {
                named.push(FeatureMatch { name, weight: r.weight });
            }
        }
        Ok(named)
    }

    // -- straightforward reads ----------------------------------------------

    pub fn types(&self) -> Vec<String> {
        match self.inner.adapter.read_types() {
            Ok(t) => t,
            Err(e) => {
                self.record_error(e);
                Vec::new()
            }
        }
    }

    pub fn nof_vectors(&self, type_name: &str) -> u64 {
        match self.try_nof_vectors(type_name) {
            Ok(n) => n,
            Err(e) => {
                self.record_error(e);
                0
            }
        }
    }

    fn try_nof_vectors(&self, type_name: &str) -> Result<u64> {
        match self.inner.adapter.read_typeno(type_name)? {
            Some(typeno) => self.inner.adapter.read_nof_vectors(typeno),
            None => Ok(0),
        }
    }

    pub fn feature_types(&self, feature_name: &str) -> Vec<String> {
        match self.try_feature_types(feature_name) {
            Ok(types) => types,
            Err(e) => {
                self.record_error(e);
                Vec::new()
            }
        }
    }

    fn try_feature_types(&self, feature_name: &str) -> Result<Vec<String>> {
        let Some(featno) = self.inner.adapter.read_featno(feature_name)? else {
            return Ok(Vec::new());
        };
        let typenos = self.inner.adapter.read_relations(featno)?;
        let mut out = Vec::with_capacity(typenos.len());
        for typeno in typenos {
            if let Some(name) = self.inner.adapter.read_type_name(typeno)? {
                out.push(name);
            }
        }
        Ok(out)
    }

    pub fn feature_vector(&self, type_name: &str, feature_name: &str) -> Option<Vec<f64>> {
        match self.try_feature_vector(type_name, feature_name) {
            Ok(v) => v,
            Err(e) => {
                self.record_error(e);
                None
            }
        }
    }

    fn try_feature_vector(&self, type_name: &str, feature_name: &str) -> Result<Option<Vec<f64>>> {
        let Some(typeno) = self.inner.adapter.read_typeno(type_name)? else {
            return Ok(None);
        };
        let Some(featno) = self.inner.adapter.read_featno(feature_name)? else {
            return Ok(None);
        };
        self.inner.adapter.read_vector(typeno, featno)
    }

    /// Cosine similarity of `a` and `b`: a value in `[-1,1]`, or `NaN` if
    /// either input has zero length.
    pub fn vector_similarity(&self, a: &[f64], b: &[f64]) -> f64 {
        cosine_similarity(a, b)
    }

    pub fn normalize(&self, v: &[f64]) -> Vec<f64> {
        normalize_vec(v)
    }

    // -- feature value iterator -----------------------------------------

    /// A restartable cursor over every feature name, fetched in bounded
    /// chunks rather than all at once — the feature-name keyspace can be
    /// far larger than comfortably fits in memory at once.
    pub fn create_feature_value_iterator(&self) -> Result<FeatureCursor<K>> {
        FeatureCursor::new(self.inner.adapter.clone())
    }

    // -- transactions -----------------------------------------------------

    /// Starts a new transaction, or returns `None` (recording
    /// `UnsupportedVersion`) if the store's on-disk version no longer
    /// matches what this code understands.
    pub fn create_transaction(&self) -> Option<Transaction<K>> {
        if let Err(e) = self.inner.adapter.check_version() {
            self.record_error(e);
            return None;
        }
        Some(Transaction::new(self.clone()))
    }

    pub(crate) fn dim(&self) -> usize {
        self.inner.model.dim()
    }

    pub(crate) fn sim_hash(&self, v: &[f64], featno: u64) -> Result<BitSignature> {
        self.inner.model.sim_hash(v, featno)
    }

    pub(crate) fn adapter(&self) -> &KeyValueAdapter<K> {
        &self.inner.adapter
    }

    pub(crate) fn commit_mutex(&self) -> &Mutex<()> {
        &self.inner.commit_mutex
    }

    pub(crate) fn config(&self) -> &StorageConfig {
        &self.inner.config
    }
}

/// Key-value pairs fetched per backend round trip. Small enough to keep a
/// cursor's resident footprint flat regardless of keyspace size, large
/// enough that stepping through it doesn't turn into one round trip per name.
const FEATURE_CURSOR_CHUNK: usize = 256;

/// A restartable, ordered cursor over feature names (§4.3's feature cursor).
/// Holds at most one fetched chunk at a time; `load_next` pulls the next
/// chunk from the backend only once the buffered one is exhausted, so the
/// full feature-name keyspace is never materialized at once.
pub struct FeatureCursor<K: KvBackend> {
    adapter: KeyValueAdapter<K>,
    prefix: Vec<u8>,
    buf: Vec<String>,
    buf_pos: usize,
    last_key: Option<Vec<u8>>,
    exhausted: bool,
}

impl<K: KvBackend> FeatureCursor<K> {
    fn new(adapter: KeyValueAdapter<K>) -> Result<Self> {
        let prefix = crate::kv::keys::feat_to_id_prefix();
        let mut cursor = Self { adapter, prefix: prefix.clone(), buf: Vec::new(), buf_pos: 0, last_key: None, exhausted: false };
        cursor.fetch_from(prefix)?;
        Ok(cursor)
    }

    /// Discards the buffered chunk and refills it with the first
    /// `FEATURE_CURSOR_CHUNK` keys at or after `from`.
    fn fetch_from(&mut self, from: Vec<u8>) -> Result<()> {
        let pairs = self.adapter.backend().iter_range(&self.prefix, &from, FEATURE_CURSOR_CHUNK)?;
        self.exhausted = pairs.len() < FEATURE_CURSOR_CHUNK;
        self.last_key = pairs.last().map(|(k, _)| k.clone());
        self.buf = pairs
            .into_iter()
            .map(|(key, _)| String::from_utf8(key[1..].to_vec()).map_err(|_| Error::corruption("non-UTF8 feature name")))
            .collect::<Result<Vec<_>>>()?;
        self.buf_pos = 0;
        Ok(())
    }

    /// Pulls the chunk right after the last key this cursor has returned, if
    /// the previous fetch didn't already reach the end of the keyspace.
    fn advance(&mut self) -> Result<()> {
        if self.exhausted {
            self.buf.clear();
            self.buf_pos = 0;
            return Ok(());
        }
        // `iter_range` takes an inclusive lower bound; appending a zero byte
        // is the smallest extension of `last_key`, so it sorts just past it
        // without skipping a same-prefixed key that follows immediately.
        let mut resume_from = self.last_key.clone().unwrap_or_else(|| self.prefix.clone());
        resume_from.push(0);
        self.fetch_from(resume_from)
    }

    /// Positions the cursor at or after `key`, re-fetching from the backend.
    pub fn skip(&mut self, key: &str) {
        let mut from = self.prefix.clone();
        from.extend_from_slice(key.as_bytes());
        let _ = self.fetch_from(from);
    }

    /// Positions the cursor at or after the first name with the given prefix.
    pub fn skip_prefix(&mut self, prefix: &str) {
        self.skip(prefix);
    }

    /// Rewinds to the very first feature name, re-fetching from the backend.
    pub fn load_first(&mut self) -> Option<&str> {
        let from = self.prefix.clone();
        if self.fetch_from(from).is_err() {
            self.buf.clear();
            self.buf_pos = 0;
        }
        self.buf.first().map(|s| s.as_str())
    }

    pub fn load_next(&mut self) -> Option<&str> {
        if self.buf_pos >= self.buf.len() {
            if self.advance().is_err() || self.buf.is_empty() {
                return None;
            }
        }
        let item = self.buf.get(self.buf_pos)?;
        self.buf_pos += 1;
        Some(item.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn fresh_storage() -> Storage<MemoryKv> {
        Storage::create("vecdim=16;bits=8;variations=4", 7, MemoryKv::new()).unwrap()
    }

    #[test]
    fn create_writes_version_and_model() {
        let storage = fresh_storage();
        assert!(storage.inner.adapter.check_version().is_ok());
        assert!(storage.inner.adapter.read_lsh_model().unwrap().is_some());
    }

    #[test]
    fn open_rejects_missing_store() {
        let backend = MemoryKv::new();
        assert!(Storage::open("", backend).is_err());
    }

    #[test]
    fn find_similar_on_unknown_type_is_empty_not_error() {
        let storage = fresh_storage();
        let results = storage.find_similar("Nope", &[1.0; 16], 5, 0.5, false);
        assert!(results.is_empty());
        assert!(storage.last_error().is_none());
    }

    #[test]
    fn find_similar_bad_minsim_records_error() {
        let storage = fresh_storage();
        let results = storage.find_similar("T", &[1.0; 16], 5, 2.0, false);
        assert!(results.is_empty());
        assert!(matches!(storage.last_error(), Some(Error::InvalidArgument(_))));
    }

    #[test]
    fn feature_value_iterator_is_ordered_and_restartable() {
        let storage = fresh_storage();
        let mut tx = storage.create_transaction().unwrap();
        tx.define_vector("T", "zebra", vec![1.0; 16]).unwrap();
        tx.define_vector("T", "apple", vec![0.5; 16]).unwrap();
        tx.commit().unwrap();

        let mut cursor = storage.create_feature_value_iterator().unwrap();
        assert_eq!(cursor.load_first(), Some("apple"));
        assert_eq!(cursor.load_next(), Some("zebra"));
        assert_eq!(cursor.load_next(), None);

        cursor.skip_prefix("z");
        assert_eq!(cursor.load_next(), Some("zebra"));
    }

    #[test]
    fn feature_value_iterator_spans_multiple_chunks() {
        let storage = fresh_storage();
        let mut tx = storage.create_transaction().unwrap();
        let count = FEATURE_CURSOR_CHUNK * 2 + 17;
        for i in 0..count {
            tx.define_vector("T", &format!("f{i:05}"), vec![0.5; 16]).unwrap();
        }
        tx.commit().unwrap();

        let mut cursor = storage.create_feature_value_iterator().unwrap();
        let mut seen = Vec::with_capacity(count);
        let mut next = cursor.load_first().map(str::to_string);
        while let Some(name) = next {
            seen.push(name);
            next = cursor.load_next().map(str::to_string);
        }

        let mut expected: Vec<String> = (0..count).map(|i| format!("f{i:05}")).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }
}
