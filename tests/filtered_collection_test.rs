// tests/filtered_collection_test.rs
// A filtered collection only ever sees its own subset

use mdframe::store::{
    doc, CallFilter, Collection, Database, FilteredCollection, FindOptions, MemoryDatabase,
};
use mdframe::EngineError;
use serde_json::json;

fn filtered() -> FilteredCollection {
    let db = MemoryDatabase::new("test").handle();
    let coll = db.collection("sales");
    coll.insert_many(vec![
        doc(json!({"region": "eu", "amount": 10})),
        doc(json!({"region": "eu", "amount": 20})),
        doc(json!({"region": "us", "amount": 30})),
    ])
    .unwrap();
    FilteredCollection::new(coll, doc(json!({"region": "eu"})))
}

#[test]
fn test_reads_are_restricted() {
    let fc = filtered();
    assert_eq!(fc.count_documents(CallFilter::none()).unwrap(), 2);
    assert_eq!(fc.distinct("region", CallFilter::none()).unwrap(), vec![json!("eu")]);
    let docs = fc.find(CallFilter::none(), FindOptions::default()).unwrap().into_vec();
    assert!(docs.iter().all(|d| d["region"] == json!("eu")));
    let pipeline = vec![doc(json!({"$group": {"_id": null, "total": {"$sum": "$amount"}}}))];
    let total = fc.aggregate(&pipeline, CallFilter::none()).unwrap().into_vec();
    assert_eq!(total[0]["total"], json!(30));
}

#[test]
fn test_call_filter_narrows() {
    let fc = filtered();
    let n = fc
        .count_documents(doc(json!({"amount": {"$gt": 15}})))
        .unwrap();
    assert_eq!(n, 1);
    let narrowed = fc.narrow(&doc(json!({"amount": 10})));
    assert_eq!(narrowed.count_documents(CallFilter::none()).unwrap(), 1);
}

#[test]
fn test_untrusted_operator_keys_are_stripped() {
    let fc = filtered();
    let call = doc(json!({"$where": "this.amount > 0", "$or": [{"region": "us"}]}));
    assert_eq!(fc.count_documents(call.clone()).unwrap(), 2);

    let signature = fc.trust(&call);
    let forged = CallFilter::trusted(call, "0000000000000000".to_string());
    assert_ne!(signature, "0000000000000000");
    assert_eq!(fc.count_documents(forged).unwrap(), 2);
}

#[test]
fn test_trusted_operator_keys_pass() {
    let fc = filtered();
    let call = doc(json!({"$or": [{"amount": 10}, {"amount": 30}]}));
    let signature = fc.trust(&call);
    assert_eq!(fc.count_documents(CallFilter::trusted(call, signature)).unwrap(), 1);
}

#[test]
fn test_legacy_mutations_are_not_implemented() {
    let fc = filtered();
    assert!(matches!(
        fc.insert(doc(json!({"region": "eu"}))),
        Err(EngineError::NotImplemented(_))
    ));
    assert!(matches!(
        fc.update(doc(json!({})), doc(json!({"$set": {"amount": 0}}))),
        Err(EngineError::NotImplemented(_))
    ));
    assert!(matches!(fc.remove(doc(json!({}))), Err(EngineError::NotImplemented(_))));
    assert!(matches!(fc.save(doc(json!({}))), Err(EngineError::NotImplemented(_))));
    assert!(matches!(
        fc.ensure_index(doc(json!({"amount": 1}))),
        Err(EngineError::NotImplemented(_))
    ));
}
