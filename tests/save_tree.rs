mod support;

use support::{completion, harness, wait};
use treesync::{
    BackendError, FailureKind, Journal, JournalData, LocalType, Markup, MarkupData, MarkupKind,
    Media, MediaData, MediaKind, Moment, MomentData, OperationState, StorageLocation, TreeObject,
    Venue, VenueData,
};

fn journal_data() -> JournalData {
    JournalData {
        title: "tonkotsu tour".to_string(),
        author_id: "user-7".to_string(),
        thumbnail_id: None,
        moment_ids: Vec::new(),
        markup_ids: Vec::new(),
        venue_id: None,
    }
}

fn photo(byte: u8) -> MediaData {
    MediaData {
        kind: MediaKind::Photo,
        bytes: vec![byte],
    }
}

fn caption(text: &str) -> MarkupData {
    MarkupData {
        kind: MarkupKind::Text {
            content: text.to_string(),
        },
    }
}

fn venue_data() -> VenueData {
    VenueData {
        name: "Ramen Underground".to_string(),
        latitude: 37.79,
        longitude: -122.40,
        category_ids: Vec::new(),
    }
}

/// Seed a retrievable moment (payload plus its media) into the remote
/// store.
fn seed_moment(backend: &treesync::InMemoryBackend, id: &str) {
    let media_id = format!("{}-media", id);
    backend.seed_remote(
        id,
        bitcode::serialize(&MomentData {
            caption: "already synced".to_string(),
            media_id: Some(media_id.clone()),
            markup_ids: Vec::new(),
        })
        .unwrap(),
    );
    backend.seed_remote(&media_id, bitcode::serialize(&photo(9)).unwrap());
}

#[test]
fn save_skips_synced_moments_and_saves_parent_last() {
    let (ctx, backend) = harness();

    // M2 is materialized from storage and fully synced.
    seed_moment(&backend, "m2");
    let m2 = Moment::placeholder(&ctx, "m2");
    let (done, rx) = completion();
    m2.clone()
        .retrieve_recursive(StorageLocation::Both, LocalType::Draft, false, done);
    assert_eq!(wait(&rx), None);
    assert_eq!(m2.core().state(), OperationState::Synced);
    backend.clear();

    // M1 and Mk1 carry unsaved work.
    let m1 = Moment::create(
        &ctx,
        "m1",
        MomentData {
            caption: "fresh".to_string(),
            media_id: None,
            markup_ids: Vec::new(),
        },
    );
    let mk1 = Markup::create(&ctx, "mk1", caption("five stars"));

    let journal = Journal::create(&ctx, "j1", journal_data());
    journal.add_moment(m1.clone()).unwrap();
    journal.add_moment(m2.clone()).unwrap();
    journal.add_markup(mk1.clone()).unwrap();

    let (done, rx) = completion();
    journal
        .clone()
        .save_recursive(StorageLocation::Both, LocalType::Draft, done);
    assert_eq!(wait(&rx), None);

    // Exactly the two dirty children hit the store; the synced moment and
    // its media were not re-saved.
    assert_eq!(backend.op_count("save_remote m1"), 1);
    assert_eq!(backend.op_count("save_remote mk1"), 1);
    assert_eq!(backend.op_count("save_remote m2"), 0);
    assert_eq!(backend.op_count("save_local draft m2"), 0);
    assert_eq!(backend.op_count("save_remote m2-media"), 0);

    // The journal's own payload lands only after both children are fully
    // saved, and everything ends synced.
    let log = backend.op_log();
    let journal_pos = log.iter().position(|l| l == "save_local draft j1").unwrap();
    let m1_pos = log.iter().position(|l| l == "save_remote m1").unwrap();
    let mk1_pos = log.iter().position(|l| l == "save_remote mk1").unwrap();
    assert!(journal_pos > m1_pos);
    assert!(journal_pos > mk1_pos);

    assert_eq!(journal.core().state(), OperationState::Synced);
    assert_eq!(m1.core().state(), OperationState::Synced);
    assert_eq!(mk1.core().state(), OperationState::Synced);
}

#[test]
fn child_failure_prevents_parent_save() {
    let (ctx, backend) = harness();
    backend.fail_next_for(
        FailureKind::SaveLocal,
        "m1",
        1,
        BackendError::Permanent("quota".into()),
    );

    let journal = Journal::create(&ctx, "j1", journal_data());
    journal
        .add_moment(Moment::create(
            &ctx,
            "m1",
            MomentData {
                caption: "doomed".to_string(),
                media_id: None,
                markup_ids: Vec::new(),
            },
        ))
        .unwrap();

    let (done, rx) = completion();
    journal
        .clone()
        .save_recursive(StorageLocation::Both, LocalType::Draft, done);

    assert!(wait(&rx).is_some());
    // Fail-fast: the journal payload was never written anywhere.
    assert_eq!(backend.op_count("save_local draft j1"), 0);
    assert_eq!(backend.op_count("save_remote j1"), 0);
    assert_eq!(journal.core().state(), OperationState::Modified);
    assert!(journal.core().last_error().is_some());
}

/// Build a fully-synced journal tree: thumbnail, one moment (with media
/// and a markup), a journal-level markup, and a venue.
fn synced_tree(
    ctx: &treesync::Context,
    backend: &treesync::InMemoryBackend,
) -> std::sync::Arc<Journal> {
    let journal = Journal::create(ctx, "j1", journal_data());
    journal
        .set_thumbnail(Media::create(ctx, "thumb1", photo(1)))
        .unwrap();

    let moment = Moment::create(
        ctx,
        "m1",
        MomentData {
            caption: "the bowl".to_string(),
            media_id: None,
            markup_ids: Vec::new(),
        },
    );
    moment.set_media(Media::create(ctx, "md1", photo(2))).unwrap();
    moment.add_markup(Markup::create(ctx, "mk-m1", caption("broth!"))).unwrap();
    journal.add_moment(moment).unwrap();
    journal.add_markup(Markup::create(ctx, "mk1", caption("a journey"))).unwrap();
    journal.set_venue(Venue::create(ctx, "v1", venue_data())).unwrap();

    let (done, rx) = completion();
    journal
        .clone()
        .save_recursive(StorageLocation::Both, LocalType::Draft, done);
    assert_eq!(wait(&rx), None);
    assert!(backend.remote_contains("j1"));
    journal
}

#[test]
fn delete_cascades_to_owned_children_but_never_the_venue() {
    let (ctx, backend) = harness();
    let journal = synced_tree(&ctx, &backend);

    let (done, rx) = completion();
    journal
        .clone()
        .delete_recursive(StorageLocation::Both, LocalType::Draft, done);
    assert_eq!(wait(&rx), None);

    // Owned children are gone from the server.
    for id in ["j1", "thumb1", "m1", "md1", "mk-m1", "mk1"] {
        assert!(!backend.remote_contains(id), "{} should be deleted", id);
    }
    // The shared venue is untouched: no delete was even attempted.
    assert!(backend.remote_contains("v1"));
    assert_eq!(backend.op_count("delete_local draft v1"), 0);
    assert_eq!(backend.op_count("delete_remote v1"), 0);
    assert_eq!(
        journal.venue().unwrap().core().state(),
        OperationState::Synced
    );

    assert_eq!(journal.core().state(), OperationState::DeletedFromServer);
}

#[test]
fn failed_self_delete_still_clears_children_best_effort() {
    let (ctx, backend) = harness();
    let journal = synced_tree(&ctx, &backend);

    backend.fail_next_for(
        FailureKind::DeleteLocal,
        "j1",
        1,
        BackendError::Permanent("locked".into()),
    );

    let (done, rx) = completion();
    journal
        .clone()
        .delete_recursive(StorageLocation::Both, LocalType::Draft, done);

    // The journal's own failure is surfaced...
    assert!(wait(&rx).is_some());
    // ...but the children were still cleared so no orphans leak.
    for id in ["thumb1", "m1", "md1", "mk-m1", "mk1"] {
        assert!(!backend.remote_contains(id), "{} should be deleted", id);
    }
    assert!(backend.remote_contains("j1"));
    assert!(backend.remote_contains("v1"));
}
