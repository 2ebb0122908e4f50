//! Buffered definition of new types, features, and vectors, committed or
//! rolled back as a unit. Grounded on the teacher's `ExplicitTx` (buffer
//! pending writes, serialize commits under one mutex, leave a failed
//! transaction reusable) generalized from graph mutations to this system's
//! type/feature interning plus vector+signature writes.

use hashbrown::{HashMap, HashSet};

use crate::bitsignature::BitSignature;
use crate::error::{Error, Result};
use crate::kv::KvBackend;
use crate::storage::Storage;

/// Insertion-ordered set: tracks which names have already been noted this
/// transaction without assigning duplicate work at commit time.
#[derive(Default)]
struct Interner {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl Interner {
    fn note(&mut self, name: &str) {
        if self.seen.insert(name.to_string()) {
            self.order.push(name.to_string());
        }
    }
}

struct PendingVector {
    type_name: String,
    feature_name: String,
    vector: Vec<f64>,
}

pub struct Transaction<K: KvBackend> {
    storage: Storage<K>,
    types: Interner,
    features: Interner,
    pending: Vec<PendingVector>,
}

impl<K: KvBackend> Transaction<K> {
    pub(crate) fn new(storage: Storage<K>) -> Self {
        Self { storage, types: Interner::default(), features: Interner::default(), pending: Vec::new() }
    }

    pub fn define_feature_type(&mut self, type_name: &str) -> Result<()> {
        self.types.note(type_name);
        Ok(())
    }

    pub fn define_feature(&mut self, feature_name: &str) -> Result<()> {
        self.features.note(feature_name);
        Ok(())
    }

    /// Buffers a vector definition. Auto-commits first if `commitsize`
    /// pending vectors have already accumulated; fails with
    /// `InvalidArgument` if buffering this one would exceed `maxfeatures`.
    pub fn define_vector(&mut self, type_name: &str, feature_name: &str, v: Vec<f64>) -> Result<()> {
        if v.len() != self.storage.dim() {
            return Err(Error::invalid_argument(format!(
                "dimension mismatch: model expects {}, got {}",
                self.storage.dim(),
                v.len()
            )));
        }
        if self.pending.len() >= self.storage.config().commitsize {
            self.commit()?;
        }
        if self.pending.len() + 1 > self.storage.config().maxfeatures {
            return Err(Error::invalid_argument("transaction buffer would exceed maxfeatures"));
        }
        self.types.note(type_name);
        self.features.note(feature_name);
        self.pending.push(PendingVector {
            type_name: type_name.to_string(),
            feature_name: feature_name.to_string(),
            vector: v,
        });
        Ok(())
    }

    /// Discards all buffered definitions without committing.
    pub fn clear(&mut self) {
        self.types = Interner::default();
        self.features = Interner::default();
        self.pending.clear();
    }

    /// Discards all buffered definitions, same as `clear`, framed as
    /// abandoning this attempt and starting fresh rather than as a no-op.
    pub fn rollback(&mut self) {
        self.clear();
    }

    /// Commits buffered definitions. Returns `Ok(false)` (transaction stays
    /// reusable) if the underlying key-value commit fails; `Ok(true)` on
    /// success, after which buffers are reset.
    pub fn commit(&mut self) -> Result<bool> {
        if self.types.order.is_empty() && self.features.order.is_empty() && self.pending.is_empty() {
            return Ok(true);
        }
        let _guard = self.storage.commit_mutex().lock();
        let adapter = self.storage.adapter();

        let mut nof_typeno = adapter.read_nof_typeno()?;
        let mut nof_featno = adapter.read_nof_featno()?;

        let mut batch = adapter.begin_write_batch();

        let mut type_ids: HashMap<String, u64> = HashMap::new();
        for name in &self.types.order {
            let id = match adapter.read_typeno(name)? {
                Some(existing) => existing,
                None => {
                    nof_typeno += 1;
                    batch.write_type(name, nof_typeno)?;
                    nof_typeno
                }
            };
            type_ids.insert(name.clone(), id);
        }

        let mut feature_ids: HashMap<String, u64> = HashMap::new();
        for name in &self.features.order {
            let id = match adapter.read_featno(name)? {
                Some(existing) => existing,
                None => {
                    nof_featno += 1;
                    batch.write_feature(name, nof_featno)?;
                    nof_featno
                }
            };
            feature_ids.insert(name.clone(), id);
        }

        let mut newly_introduced: HashMap<u64, HashSet<u64>> = HashMap::new();
        let mut relations: HashMap<u64, HashSet<u64>> = HashMap::new();

        for p in &self.pending {
            let type_id = *type_ids
                .get(&p.type_name)
                .ok_or_else(|| Error::corruption("pending vector references unknown type"))?;
            let feat_id = *feature_ids
                .get(&p.feature_name)
                .ok_or_else(|| Error::corruption("pending vector references unknown feature"))?;

            let existing = adapter.read_vector(type_id, feat_id)?;
            if existing.is_none() {
                newly_introduced.entry(type_id).or_default().insert(feat_id);
            }

            let signature: BitSignature = self.storage.sim_hash(&p.vector, feat_id)?;
            batch.write_vector(type_id, feat_id, &p.vector)?;
            batch.write_signature(type_id, feat_id, &signature)?;
            relations.entry(feat_id).or_default().insert(type_id);
        }

        for (type_id, featnos) in &newly_introduced {
            let current = adapter.read_nof_vectors(*type_id)?;
            batch.write_nof_vectors(*type_id, current + featnos.len() as u64)?;
        }

        for (feat_id, typenos) in &relations {
            let mut merged: Vec<u64> = adapter.read_relations(*feat_id)?;
            for &typeno in typenos {
                if !merged.contains(&typeno) {
                    merged.push(typeno);
                }
            }
            batch.write_relations(*feat_id, &merged)?;
        }

        batch.write_nof_typeno(nof_typeno)?;
        batch.write_nof_featno(nof_featno)?;

        let committed = batch.commit()?;
        if !committed {
            tracing::warn!("transaction commit rejected by underlying store");
            return Ok(false);
        }

        for type_id in newly_introduced.keys() {
            if let Some(name) = adapter.read_type_name(*type_id)? {
                self.storage.invalidate_index(&name);
            }
        }
        tracing::info!(
            types = self.types.order.len(),
            features = self.features.order.len(),
            vectors = self.pending.len(),
            "committed transaction"
        );

        self.types = Interner::default();
        self.features = Interner::default();
        self.pending.clear();
        Ok(true)
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
    fn commit_makes_vector_visible() {
        let storage = fresh_storage();
        let mut tx = storage.create_transaction().unwrap();
        tx.define_feature_type("T").unwrap();
        tx.define_vector("T", "f", vec![1.0; 16]).unwrap();
        assert!(tx.commit().unwrap());

        assert_eq!(storage.nof_vectors("T"), 1);
        assert_eq!(storage.feature_vector("T", "f"), Some(vec![1.0; 16]));
        assert_eq!(storage.feature_types("f"), vec!["T".to_string()]);
    }

    #[test]
    fn rollback_discards_everything() {
        let storage = fresh_storage();
        let mut tx = storage.create_transaction().unwrap();
        for i in 0..10 {
            tx.define_vector("T", &format!("f{i}"), vec![i as f64; 16]).unwrap();
        }
        tx.rollback();
        assert!(tx.commit().unwrap());
        assert_eq!(storage.nof_vectors("T"), 0);
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let storage = fresh_storage();
        let mut tx = storage.create_transaction().unwrap();
        assert!(tx.define_vector("T", "f", vec![1.0; 4]).is_err());
    }

    #[test]
    fn maxfeatures_hard_cap_rejects() {
        let storage = Storage::create("vecdim=4;bits=2;variations=1;maxfeatures=2", 1, MemoryKv::new()).unwrap();
        let mut tx = storage.create_transaction().unwrap();
        tx.define_vector("T", "a", vec![1.0; 4]).unwrap();
        tx.define_vector("T", "b", vec![1.0; 4]).unwrap();
        assert!(tx.define_vector("T", "c", vec![1.0; 4]).is_err());
    }

    #[test]
    fn type_isolation_across_transactions() {
        let storage = fresh_storage();
        let mut tx = storage.create_transaction().unwrap();
        tx.define_vector("T1", "f", vec![1.0; 16]).unwrap();
        tx.define_vector("T2", "f", vec![2.0; 16]).unwrap();
        tx.commit().unwrap();

        assert_eq!(storage.feature_vector("T1", "f"), Some(vec![1.0; 16]));
        assert_eq!(storage.feature_vector("T2", "f"), Some(vec![2.0; 16]));
        assert_eq!(storage.nof_vectors("T1"), 1);
        let mut types = storage.feature_types("f");
        types.sort();
        assert_eq!(types, vec!["T1".to_string(), "T2".to_string()]);
    }
}
