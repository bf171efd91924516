use std::{sync::Arc, time::Duration};

use tonbo_index::{
    store::TableAdmin, IndexOption, MemoryStore, RepositoryError, TableName, Timestamp,
    VerificationResult, VerificationResultRepository, VerifyPhase,
};

fn region(run: u64, start: &'static str, stop: &'static str) -> VerificationResult {
    let mut result = VerificationResult::new(Timestamp::new(run)).with_range(start, stop);
    result.scanned_data_row_count = 100;
    result.rebuilt_index_row_count = 100;
    result.before.valid = 95;
    result.before.missing = 5;
    result.after.valid = 100;
    result.after.missing = 0;
    result
}

#[tokio::test]
async fn rebuild_run_is_logged_and_summed_per_region() {
    let store = Arc::new(MemoryStore::new());
    let option = IndexOption::default()
        .result_table_name("AUDIT")
        .result_ttl(Duration::from_secs(3600));

    let admin = VerificationResultRepository::read_only(store.clone(), &option);
    assert!(admin.create_result_table().await.unwrap());
    assert!(store.exists(&TableName::from("AUDIT")).await.unwrap());
    assert_eq!(
        store.descriptor(&"AUDIT".into()).unwrap().ttl,
        Some(Duration::from_secs(3600))
    );

    let repository = VerificationResultRepository::read_write(store.clone(), "IDX", &option);
    assert!(!repository.create_result_table().await.unwrap());
    for (name, start, stop) in [("r1", "", "g"), ("r2", "g", "p"), ("r3", "p", "")] {
        repository
            .log_result(&region(1_700_000, start, stop), VerifyPhase::Both, name.as_bytes())
            .await
            .unwrap();
    }

    let read = admin.get_result(Timestamp::new(1_700_000)).await.unwrap();
    assert_eq!(read.scanned_data_row_count, 300);
    assert_eq!(read.rebuilt_index_row_count, 300);
    assert_eq!(read.before.valid, 285);
    assert_eq!(read.before.missing, 15);
    assert_eq!(read.after.valid, 300);
    assert_eq!(read.after.missing, 0);
    assert!(!read.is_verification_failed(VerifyPhase::Both));
    assert!(read.is_verification_failed(VerifyPhase::Before));

    let err = admin
        .log_result(&read, VerifyPhase::Both, b"r1")
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::ReadOnly));
}

#[tokio::test]
async fn reading_a_missing_result_table_fails() {
    let store = Arc::new(MemoryStore::new());
    let repository = VerificationResultRepository::read_only(store, &IndexOption::default());

    let err = repository.get_result(Timestamp::new(1)).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Store(_)));
}
