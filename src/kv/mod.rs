//! Typed read/write over an ordered key-value store: key encoding (see
//! [`keys`]), the version header, and the typed accessors the rest of the
//! crate is built on. The underlying store itself is out of scope per the
//! specification — it is accessed through the [`KvBackend`]/[`KvTransaction`]
//! capability contract, the same trait-as-storage-contract idiom this
//! crate's `StorageBackend`-shaped ancestor used, just synchronous: nothing
//! here needs to cross an await point, and every comparable embedded-store
//! crate in this family exposes a blocking API for exactly this reason.

pub mod keys;
pub mod memory;

use crate::bitsignature::BitSignature;
use crate::error::{Error, Result};
use crate::lsh::LshModel;
use crate::version::VersionHeader;

pub use memory::MemoryKv;

/// Capability set an ordered key-value store must provide.
pub trait KvBackend: Send + Sync + Clone + 'static {
    type Tx: KvTransaction;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All key-value pairs whose key starts with `prefix`, in ascending key order.
    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Up to `limit` key-value pairs under `prefix`, in ascending key order,
    /// starting at the first key `>= from` (pass `prefix` itself to start
    /// from the beginning). Backs a chunked cursor over a prefix too large
    /// to materialize in one call; the default falls back to a full prefix
    /// scan, so a backend only needs to override this when it can serve a
    /// bounded window without reading the whole prefix (an ordered store's
    /// own range scan, typically).
    fn iter_range(&self, prefix: &[u8], from: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let pairs = self.iter_prefix(prefix)?;
        Ok(pairs.into_iter().filter(|(k, _)| k.as_slice() >= from).take(limit).collect())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    fn begin_transaction(&self) -> Self::Tx;

    /// Hint that a burst of deletes has just happened and the backend may
    /// want to reclaim space. No-op by default; backends with no such
    /// concept (e.g. an in-memory map) never need to override it.
    fn compaction(&self) -> Result<()> {
        Ok(())
    }
}

/// A buffered write batch: writes apply atomically on `commit`, or are
/// discarded on `rollback`/drop.
pub trait KvTransaction {
    /// Read-your-own-writes: sees pending puts/deletes in this same batch
    /// before falling back to the committed store.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>);
    fn delete(&mut self, key: Vec<u8>);
    fn commit(self) -> Result<bool>;
    fn rollback(self);
}

/// Typed adapter over a [`KvBackend`], implementing the key encoding and
/// record layouts of §4.3/§6.
#[derive(Clone)]
pub struct KeyValueAdapter<K: KvBackend> {
    backend: K,
}

impl<K: KvBackend> KeyValueAdapter<K> {
    pub fn new(backend: K) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &K {
        &self.backend
    }

    // -- version header --------------------------------------------------

    pub fn write_version_header(&self) -> Result<()> {
        self.backend.put(keys::version_key(), VersionHeader::current().serialize())
    }

    /// Reads and validates the version header. `NotFound` if absent (a store
    /// that was never created), `UnsupportedVersion` on mismatch per §7.
    pub fn check_version(&self) -> Result<VersionHeader> {
        let bytes = self
            .backend
            .get(&keys::version_key())?
            .ok_or_else(|| Error::not_found("no version header; storage was never created"))?;
        let header = VersionHeader::deserialize(&bytes)?;
        header.check_compatible()?;
        Ok(header)
    }

    // -- variables ----------------------------------------------------------

    pub fn read_variable(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.backend.get(&keys::variable_key(name))
    }

    pub fn write_variable(&self, name: &str, value: &[u8]) -> Result<()> {
        self.backend.put(keys::variable_key(name), value.to_vec())
    }

    pub fn read_variables(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let prefix = vec![keys::TAG_VARIABLE];
        let pairs = self.backend.iter_prefix(&prefix)?;
        let mut out = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let name = String::from_utf8(key[1..].to_vec())
                .map_err(|_| Error::corruption("non-UTF8 variable name"))?;
            out.push((name, value));
        }
        Ok(out)
    }

    // -- counters -------------------------------------------------------

    pub fn read_nof_typeno(&self) -> Result<u64> {
        self.read_u64(&keys::nof_typeno_key())
    }

    pub fn read_nof_featno(&self) -> Result<u64> {
        self.read_u64(&keys::nof_featno_key())
    }

    pub fn read_nof_vectors(&self, typeno: u64) -> Result<u64> {
        self.read_u64(&keys::nof_vectors_key(typeno)?)
    }

    fn read_u64(&self, key: &[u8]) -> Result<u64> {
        match self.backend.get(key)? {
            None => Ok(0),
            Some(bytes) => {
                if bytes.len() != 8 {
                    return Err(Error::corruption("counter record has wrong length"));
                }
                Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
            }
        }
    }

    // -- interning --------------------------------------------------------

    pub fn read_typeno(&self, type_name: &str) -> Result<Option<u64>> {
        self.read_id(&keys::type_to_id_key(type_name))
    }

    pub fn read_featno(&self, feature_name: &str) -> Result<Option<u64>> {
        self.read_id(&keys::feat_to_id_key(feature_name))
    }

    fn read_id(&self, key: &[u8]) -> Result<Option<u64>> {
        match self.backend.get(key)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(keys::unpack_id(&bytes)?.0)),
        }
    }

    pub fn read_type_name(&self, typeno: u64) -> Result<Option<String>> {
        self.read_name(&keys::id_to_type_key(typeno)?)
    }

    pub fn read_feat_name(&self, featno: u64) -> Result<Option<String>> {
        self.read_name(&keys::id_to_feat_key(featno)?)
    }

    fn read_name(&self, key: &[u8]) -> Result<Option<String>> {
        match self.backend.get(key)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes).map_err(|_| Error::corruption("non-UTF8 name record"))?,
            )),
        }
    }

    pub fn read_types(&self) -> Result<Vec<String>> {
        let prefix = vec![keys::TAG_TYPE_TO_ID];
        let pairs = self.backend.iter_prefix(&prefix)?;
        pairs
            .into_iter()
            .map(|(key, _)| {
                String::from_utf8(key[1..].to_vec()).map_err(|_| Error::corruption("non-UTF8 type name"))
            })
            .collect()
    }

    // -- vectors & signatures ---------------------------------------------

    pub fn read_vector(&self, typeno: u64, featno: u64) -> Result<Option<Vec<f64>>> {
        match self.backend.get(&keys::vector_key(typeno, featno)?)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(decode_vector(&bytes)?)),
        }
    }

    pub fn read_signature(&self, typeno: u64, featno: u64) -> Result<Option<BitSignature>> {
        match self.backend.get(&keys::signature_key(typeno, featno)?)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(BitSignature::deserialize(&bytes)?)),
        }
    }

    /// All (featno, BitSignature) pairs for a type, in featno order —
    /// the sequential build-time load path for `SignatureIndex`.
    pub fn read_all_signatures(&self, typeno: u64) -> Result<Vec<(u64, BitSignature)>> {
        let mut prefix = vec![keys::TAG_SIGNATURE];
        keys::pack_id(&mut prefix, typeno)?;
        let pairs = self.backend.iter_prefix(&prefix)?;
        let mut out = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let (_typeno, consumed) = keys::unpack_id(&key[1..])?;
            let (featno, _) = keys::unpack_id(&key[1 + consumed..])?;
            out.push((featno, BitSignature::deserialize(&value)?));
        }
        Ok(out)
    }

    pub fn read_relations(&self, featno: u64) -> Result<Vec<u64>> {
        match self.backend.get(&keys::relations_key(featno)?)? {
            None => Ok(Vec::new()),
            Some(bytes) => decode_id_list(&bytes),
        }
    }

    pub fn read_lsh_model(&self) -> Result<Option<LshModel>> {
        match self.backend.get(&keys::lsh_model_key())? {
            None => Ok(None),
            Some(bytes) => Ok(Some(LshModel::deserialize(&bytes)?)),
        }
    }

    pub fn write_lsh_model(&self, model: &LshModel) -> Result<()> {
        self.backend.put(keys::lsh_model_key(), model.serialize())
    }

    pub fn begin_write_batch(&self) -> KvWriteBatch<K::Tx> {
        KvWriteBatch { tx: self.backend.begin_transaction() }
    }

    /// Forwards a post-bulk-delete compaction hint to the backend.
    pub fn compaction(&self) -> Result<()> {
        self.backend.compaction()
    }
}

pub fn encode_vector(v: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + v.len() * 8);
    out.extend_from_slice(&(v.len() as u32).to_be_bytes());
    for &x in v {
        crate::binfmt::write_double(&mut out, x);
    }
    out
}

pub fn decode_vector(buf: &[u8]) -> Result<Vec<f64>> {
    if buf.len() < 4 {
        return Err(Error::corruption("vector record truncated"));
    }
    let count = crate::binfmt::read_u32(buf, 0) as usize;
    if buf.len() != 4 + count * 8 {
        return Err(Error::corruption("vector record length mismatch"));
    }
    let mut out = Vec::with_capacity(count);
    let mut off = 4;
    for _ in 0..count {
        out.push(crate::binfmt::read_double(buf, off));
        off += 8;
    }
    Ok(out)
}

fn encode_id_list(ids: &[u64]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&(ids.len() as u32).to_be_bytes());
    for &id in ids {
        keys::pack_id(&mut out, id)?;
    }
    Ok(out)
}

fn decode_id_list(buf: &[u8]) -> Result<Vec<u64>> {
    if buf.len() < 4 {
        return Err(Error::corruption("id list record truncated"));
    }
    let count = crate::binfmt::read_u32(buf, 0) as usize;
    let mut out = Vec::with_capacity(count);
    let mut off = 4;
    for _ in 0..count {
        let (id, consumed) = keys::unpack_id(&buf[off..])?;
        out.push(id);
        off += consumed;
    }
    Ok(out)
}

/// A buffered batch of typed writes over one underlying [`KvTransaction`].
/// Used by `crate::transaction::Transaction::commit` to stage all of a
/// commit's writes before applying them atomically.
pub struct KvWriteBatch<T: KvTransaction> {
    tx: T,
}

impl<T: KvTransaction> KvWriteBatch<T> {
    pub fn write_type(&mut self, type_name: &str, typeno: u64) -> Result<()> {
        let mut id_bytes = Vec::new();
        keys::pack_id(&mut id_bytes, typeno)?;
        self.tx.put(keys::type_to_id_key(type_name), id_bytes);
        self.tx.put(keys::id_to_type_key(typeno)?, type_name.as_bytes().to_vec());
        Ok(())
    }

    pub fn write_feature(&mut self, feature_name: &str, featno: u64) -> Result<()> {
        let mut id_bytes = Vec::new();
        keys::pack_id(&mut id_bytes, featno)?;
        self.tx.put(keys::feat_to_id_key(feature_name), id_bytes);
        self.tx.put(keys::id_to_feat_key(featno)?, feature_name.as_bytes().to_vec());
        Ok(())
    }

    pub fn write_vector(&mut self, typeno: u64, featno: u64, vector: &[f64]) -> Result<()> {
        self.tx.put(keys::vector_key(typeno, featno)?, encode_vector(vector));
        Ok(())
    }

    pub fn write_signature(&mut self, typeno: u64, featno: u64, sig: &BitSignature) -> Result<()> {
        self.tx.put(keys::signature_key(typeno, featno)?, sig.serialize());
        Ok(())
    }

    pub fn write_nof_typeno(&mut self, value: u64) -> Result<()> {
        self.tx.put(keys::nof_typeno_key(), value.to_be_bytes().to_vec());
        Ok(())
    }

    pub fn write_nof_featno(&mut self, value: u64) -> Result<()> {
        self.tx.put(keys::nof_featno_key(), value.to_be_bytes().to_vec());
        Ok(())
    }

    pub fn write_nof_vectors(&mut self, typeno: u64, value: u64) -> Result<()> {
        self.tx.put(keys::nof_vectors_key(typeno)?, value.to_be_bytes().to_vec());
        Ok(())
    }

    pub fn write_relations(&mut self, featno: u64, typenos: &[u64]) -> Result<()> {
        self.tx.put(keys::relations_key(featno)?, encode_id_list(typenos)?);
        Ok(())
    }

    /// Reads through pending writes in this same batch, falling back to the
    /// committed store — needed during commit to look up ids assigned
    /// earlier in the same batch before they are durable.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tx.get(key)
    }

    pub fn commit(self) -> Result<bool> {
        self.tx.commit()
    }

    pub fn rollback(self) {
        self.tx.rollback();
    }
}
