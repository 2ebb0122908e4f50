//! End-to-end scenarios run against an in-memory backend.

use pretty_assertions::assert_eq;

use simvec_rs::kv::MemoryKv;
use simvec_rs::lsh::LshModel;
use simvec_rs::storage::Storage;

const SEED: u64 = 20260726;

fn fresh_storage(vecdim: usize) -> Storage<MemoryKv> {
    let bits = vecdim.min(32);
    let config = format!("vecdim={vecdim};bits={bits};variations=4");
    Storage::create(&config, SEED, MemoryKv::new()).unwrap()
}

fn unit(dim: usize, index: usize) -> Vec<f64> {
    let mut v = vec![0.0; dim];
    v[index] = 1.0;
    v
}

/// Two unit vectors in the plane spanned by dims 0 and 1 with the given
/// cosine similarity between them.
fn cos_pair(dim: usize, cos_theta: f64) -> (Vec<f64>, Vec<f64>) {
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
    let a = unit(dim, 0);
    let mut b = vec![0.0; dim];
    b[0] = cos_theta;
    b[1] = sin_theta;
    (a, b)
}

#[test]
fn scenario_1_model_round_trip_preserves_sim_hash() {
    let model = LshModel::build(8, 4, 2, SEED).unwrap();
    let v = unit(8, 0);
    let sig_a = model.sim_hash(&v, 1).unwrap();

    let bytes = model.serialize();
    let reloaded = LshModel::deserialize(&bytes).unwrap();
    let sig_b = reloaded.sim_hash(&v, 1).unwrap();

    assert_eq!(sig_a.words(), sig_b.words());
}

#[test]
fn scenario_2_exact_recall_on_itself() {
    let storage = fresh_storage(64);
    let v = unit(64, 3);

    let mut tx = storage.create_transaction().unwrap();
    tx.define_vector("T", "f", v.clone()).unwrap();
    assert!(tx.commit().unwrap());

    storage.prepare_search("T");
    let results = storage.find_similar("T", &v, 1, 0.0, false);

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "f");
    assert!((results[0].weight - 1.0).abs() < 1e-6);
}

#[test]
fn scenario_3_near_neighbor_recall() {
    let storage = fresh_storage(64);
    let (v, v_prime) = cos_pair(64, 0.97);

    let mut tx = storage.create_transaction().unwrap();
    tx.define_vector("T", "a", v.clone()).unwrap();
    tx.define_vector("T", "b", v_prime).unwrap();
    assert!(tx.commit().unwrap());

    storage.prepare_search("T");
    let results = storage.find_similar("T", &v, 2, 0.9, true);

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].name, "a");
    assert_eq!(results[1].name, "b");
    assert!((results[0].weight - 1.0).abs() < 1e-6);
    assert!(results[1].weight >= 0.95);
}

#[test]
fn scenario_4_rejects_unrelated_vector() {
    let storage = fresh_storage(64);
    let (v, u) = cos_pair(64, 0.1);

    let mut tx = storage.create_transaction().unwrap();
    tx.define_vector("T", "a", v.clone()).unwrap();
    tx.define_vector("T", "c", u).unwrap();
    assert!(tx.commit().unwrap());

    storage.prepare_search("T");
    let results = storage.find_similar("T", &v, 10, 0.9, true);

    assert!(!results.iter().any(|r| r.name == "c"));
}

#[test]
fn scenario_5_type_isolation() {
    let storage = fresh_storage(32);
    let v = unit(32, 0);
    let w = unit(32, 1);

    let mut tx = storage.create_transaction().unwrap();
    tx.define_vector("T1", "f", v.clone()).unwrap();
    tx.define_vector("T2", "f", w.clone()).unwrap();
    assert!(tx.commit().unwrap());

    assert_eq!(storage.feature_vector("T1", "f"), Some(v));
    assert_eq!(storage.feature_vector("T2", "f"), Some(w));

    let mut types = storage.feature_types("f");
    types.sort();
    assert_eq!(types, vec!["T1".to_string(), "T2".to_string()]);
    assert_eq!(storage.nof_vectors("T1"), 1);
}

#[test]
fn scenario_6_transaction_atomicity() {
    let storage = fresh_storage(16);

    let mut tx = storage.create_transaction().unwrap();
    for i in 0..100 {
        let v = unit(16, i % 16);
        tx.define_vector("T", &format!("f{i}"), v).unwrap();
    }
    tx.rollback();
    assert_eq!(storage.nof_vectors("T"), 0);

    let mut tx = storage.create_transaction().unwrap();
    for i in 0..100 {
        let v = unit(16, i % 16);
        tx.define_vector("T", &format!("f{i}"), v).unwrap();
    }
    assert!(tx.commit().unwrap());
    assert_eq!(storage.nof_vectors("T"), 100);
    assert!(storage.feature_vector("T", "f42").is_some());
}
