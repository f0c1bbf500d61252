mod support;

use std::time::Duration;

use support::{completion, harness, harness_with_latency, wait};
use treesync::{
    BackendError, EngineError, FailureKind, LocalType, Media, MediaData, MediaKind, Moment,
    MomentData, OperationState, RetryPolicy, StorageLocation, TreeObject,
};

fn photo() -> MediaData {
    MediaData {
        kind: MediaKind::Photo,
        bytes: vec![1, 2, 3],
    }
}

fn encoded_moment(media_id: &str) -> MomentData {
    MomentData {
        caption: "seeded".to_string(),
        media_id: Some(media_id.to_string()),
        markup_ids: Vec::new(),
    }
}

#[test]
fn pending_retrieval_is_claimed_exactly_once() {
    let (ctx, backend) = harness();
    backend.seed_remote("m1", bitcode::serialize(&encoded_moment("md1")).unwrap());
    backend.seed_remote("md1", bitcode::serialize(&photo()).unwrap());

    let moment = Moment::placeholder(&ctx, "m1");
    assert!(moment.core().mark_pending_retrieval());

    let (first_done, first_rx) = completion();
    let (second_done, _second_rx) = completion();

    // Two immediate claims: only the first may win and trigger a fetch.
    let first = moment.retrieve_if_pending(StorageLocation::Both, LocalType::Cache, first_done);
    let second = moment.retrieve_if_pending(StorageLocation::Both, LocalType::Cache, second_done);
    assert!(first);
    assert!(!second);

    assert_eq!(wait(&first_rx), None);
    assert_eq!(moment.core().state(), OperationState::Synced);
    assert_eq!(backend.op_count("retrieve_remote m1"), 1);
}

#[test]
fn local_save_failure_rolls_back_to_modified() {
    let (ctx, backend) = harness();
    backend.fail_next(
        FailureKind::SaveLocal,
        1,
        BackendError::Transient("disk busy".into()),
    );

    let media = Media::create(&ctx, "md1", photo());
    let (done, rx) = completion();
    media.clone().save_recursive(StorageLocation::Both, LocalType::Draft, done);

    assert!(wait(&rx).is_some());
    assert_eq!(media.core().state(), OperationState::Modified);
    assert!(media.core().last_error().is_some());
}

#[test]
fn exhausted_server_save_rolls_back_to_saved_to_local() {
    let (ctx, backend) = harness();
    let ctx = ctx.with_retry(RetryPolicy::new().with_max_attempts(2).with_delay(Duration::from_millis(1)));
    // Fail every attempt the policy will make.
    backend.fail_next(
        FailureKind::SaveRemote,
        2,
        BackendError::Transient("server flapping".into()),
    );

    let media = Media::create(&ctx, "md1", photo());
    let (done, rx) = completion();
    media.clone().save_recursive(StorageLocation::Both, LocalType::Draft, done);

    assert!(wait(&rx).is_some());
    assert_eq!(media.core().state(), OperationState::SavedToLocal);
    assert!(backend.local_contains("md1", LocalType::Draft));
    assert!(!backend.remote_contains("md1"));
    assert_eq!(backend.op_count("save_remote"), 0);

    // The local half is not repeated on retry; the save resumes from the
    // server half and succeeds.
    let (done, rx) = completion();
    media.clone().save_recursive(StorageLocation::Both, LocalType::Draft, done);
    assert_eq!(wait(&rx), None);
    assert_eq!(media.core().state(), OperationState::Synced);
    assert_eq!(backend.op_count("save_local"), 1);
}

#[test]
fn transient_server_blip_is_retried_to_success() {
    let (ctx, backend) = harness();
    let ctx = ctx.with_retry(RetryPolicy::new().with_max_attempts(3).with_delay(Duration::from_millis(1)));
    backend.fail_next(
        FailureKind::SaveRemote,
        1,
        BackendError::Transient("blip".into()),
    );

    let media = Media::create(&ctx, "md1", photo());
    let (done, rx) = completion();
    media.clone().save_recursive(StorageLocation::Both, LocalType::Draft, done);

    assert_eq!(wait(&rx), None);
    assert_eq!(media.core().state(), OperationState::Synced);
    assert!(backend.remote_contains("md1"));
}

#[test]
fn permanent_server_failure_parks_in_save_error() {
    let (ctx, backend) = harness();
    backend.fail_next(
        FailureKind::SaveRemote,
        1,
        BackendError::Permanent("payload rejected".into()),
    );

    let media = Media::create(&ctx, "md1", photo());
    let (done, rx) = completion();
    media.clone().save_recursive(StorageLocation::Both, LocalType::Draft, done);

    assert!(wait(&rx).is_some());
    assert_eq!(media.core().state(), OperationState::SaveError);
}

#[test]
fn concurrent_save_is_rejected_with_typed_error() {
    let (ctx, _backend) = harness_with_latency(Duration::from_millis(50));

    let media = Media::create(&ctx, "md1", photo());
    let (first_done, first_rx) = completion();
    let (second_done, second_rx) = completion();

    media.clone().save_recursive(StorageLocation::Both, LocalType::Draft, first_done);
    media.clone().save_recursive(StorageLocation::Both, LocalType::Draft, second_done);

    match wait(&second_rx) {
        Some(EngineError::OperationInProgress { state, .. }) => {
            assert_eq!(state, OperationState::SavingToLocal);
        }
        other => panic!("expected OperationInProgress, got: {:?}", other),
    }
    // The first save is unaffected.
    assert_eq!(wait(&first_rx), None);
    assert_eq!(media.core().state(), OperationState::Synced);
}

#[test]
fn failed_retrieval_rolls_back_for_a_later_retry() {
    let (ctx, backend) = harness();
    let ctx = ctx.with_retry(RetryPolicy::new().with_max_attempts(1));

    let media = Media::placeholder(&ctx, "md1");
    let (done, rx) = completion();
    media.clone().retrieve_recursive(
        StorageLocation::Both,
        LocalType::Cache,
        false,
        done,
    );
    assert!(wait(&rx).is_some());
    assert_eq!(media.core().state(), OperationState::NotAvailable);

    // Seed the remote copy and retry.
    backend.seed_remote("md1", bitcode::serialize(&photo()).unwrap());
    let (done, rx) = completion();
    media.clone().retrieve_recursive(
        StorageLocation::Both,
        LocalType::Cache,
        false,
        done,
    );
    assert_eq!(wait(&rx), None);
    assert_eq!(media.core().state(), OperationState::Synced);
}

#[test]
fn exhausted_server_delete_is_terminal() {
    let (ctx, backend) = harness();
    let ctx = ctx.with_retry(RetryPolicy::new().with_max_attempts(2).with_delay(Duration::from_millis(1)));
    backend.seed_remote("md1", bitcode::serialize(&photo()).unwrap());
    backend.fail_next(
        FailureKind::DeleteRemote,
        2,
        BackendError::Transient("server down".into()),
    );

    let media = Media::create(&ctx, "md1", photo());
    let (done, rx) = completion();
    media.clone().delete_recursive(StorageLocation::Both, LocalType::Draft, done);

    assert!(wait(&rx).is_some());
    assert_eq!(media.core().state(), OperationState::DeleteError);
}
