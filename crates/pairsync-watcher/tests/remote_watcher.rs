//! Remote watcher integration tests against a scripted remote API.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use pairsync_core::domain::cursor::{
    KEY_LAST_FULL_SCAN, KEY_LAST_ROOT_DEFINITIONS, KEY_LAST_SYNC_DATE,
};
use pairsync_core::domain::newtypes::{NodePath, RemoteRef};
use pairsync_core::domain::pair::{HalfState, PairState, ProcessorLease};
use pairsync_core::ports::remote_api::{
    ChangeSummary, IRemoteApi, RemoteChange, RemoteInfo, EVENT_DELETED, EVENT_DOCUMENT_MOVED,
    EVENT_SECURITY_UPDATED,
};
use pairsync_core::ports::state_store::IPairStateStore;
use pairsync_store::MemoryStateStore;
use pairsync_watcher::remote::RemoteChangeWatcher;

const ROOT: &str = "defaultSyncRootFolderItemFactory#default#root-1";
const COLLECTION: &str = "collectionSyncRootFolderItemFactory#default#coll-1";

/// Scripted remote hierarchy: a static tree plus a queue of change
/// summaries, one per `get_changes` call.
#[derive(Default)]
struct FakeRemoteApi {
    infos: Mutex<HashMap<String, RemoteInfo>>,
    children: Mutex<HashMap<String, Vec<RemoteInfo>>>,
    summaries: Mutex<VecDeque<ChangeSummary>>,
    change_calls: Mutex<Vec<(Option<String>, Option<i64>, Option<i64>)>>,
}

impl FakeRemoteApi {
    fn add(&self, info: RemoteInfo) {
        let parent = info.parent_uid.as_str().to_string();
        self.infos
            .lock()
            .unwrap()
            .insert(info.uid.as_str().to_string(), info.clone());
        self.children.lock().unwrap().entry(parent).or_default().push(info);
    }

    /// Replaces an item in place, keeping its position under the parent.
    fn replace(&self, info: RemoteInfo) {
        self.infos
            .lock()
            .unwrap()
            .insert(info.uid.as_str().to_string(), info.clone());
        let mut children = self.children.lock().unwrap();
        if let Some(siblings) = children.get_mut(info.parent_uid.as_str()) {
            siblings.retain(|c| c.uid != info.uid);
            siblings.push(info);
        }
    }

    fn push_summary(&self, summary: ChangeSummary) {
        self.summaries.lock().unwrap().push_back(summary);
    }

    /// Arguments of every `get_changes` call so far, in call order.
    fn change_calls(&self) -> Vec<(Option<String>, Option<i64>, Option<i64>)> {
        self.change_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl IRemoteApi for FakeRemoteApi {
    async fn get_info(&self, remote_ref: &RemoteRef) -> anyhow::Result<Option<RemoteInfo>> {
        Ok(self.infos.lock().unwrap().get(remote_ref.as_str()).cloned())
    }

    async fn get_children_info(
        &self,
        remote_ref: &RemoteRef,
    ) -> anyhow::Result<Vec<RemoteInfo>> {
        Ok(self
            .children
            .lock()
            .unwrap()
            .get(remote_ref.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn get_changes(
        &self,
        root_definitions: Option<&str>,
        last_event_log_id: Option<i64>,
        last_sync_date: Option<i64>,
    ) -> anyhow::Result<ChangeSummary> {
        self.change_calls.lock().unwrap().push((
            root_definitions.map(str::to_string),
            last_event_log_id,
            last_sync_date,
        ));
        Ok(self
            .summaries
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ChangeSummary {
                changes: vec![],
                sync_date: 0,
                upper_bound: None,
                active_roots: "roots-v1".to_string(),
            }))
    }

    fn is_event_log_id_available(&self) -> bool {
        true
    }
}

fn root_info() -> RemoteInfo {
    RemoteInfo {
        uid: RemoteRef::new(ROOT).unwrap(),
        parent_uid: RemoteRef::new("f#default#top").unwrap(),
        name: "Sync Root".to_string(),
        folderish: true,
        last_modified: Some(Utc::now()),
        digest: None,
    }
}

fn file_info(uid: &str, parent: &str, name: &str, digest: &str) -> RemoteInfo {
    RemoteInfo {
        uid: RemoteRef::new(uid).unwrap(),
        parent_uid: RemoteRef::new(parent).unwrap(),
        name: name.to_string(),
        folderish: false,
        last_modified: Some(Utc::now()),
        digest: Some(digest.to_string()),
    }
}

fn folder_info(uid: &str, parent: &str, name: &str) -> RemoteInfo {
    RemoteInfo {
        uid: RemoteRef::new(uid).unwrap(),
        parent_uid: RemoteRef::new(parent).unwrap(),
        name: name.to_string(),
        folderish: true,
        last_modified: Some(Utc::now()),
        digest: None,
    }
}

fn summary(changes: Vec<RemoteChange>, sync_date: i64) -> ChangeSummary {
    ChangeSummary {
        changes,
        sync_date,
        upper_bound: Some(sync_date),
        active_roots: "roots-v1".to_string(),
    }
}

fn setup() -> (Arc<FakeRemoteApi>, Arc<MemoryStateStore>, RemoteChangeWatcher) {
    let remote = Arc::new(FakeRemoteApi::default());
    remote.add(root_info());
    let store = Arc::new(MemoryStateStore::new_bound(RemoteRef::new(ROOT).unwrap()));
    let watcher = RemoteChangeWatcher::new(
        Arc::clone(&remote) as Arc<dyn IRemoteApi>,
        Arc::clone(&store) as Arc<dyn IPairStateStore>,
        30,
    );
    (remote, store, watcher)
}

#[tokio::test]
async fn test_cold_start_scan_persists_cursor_and_watermark() {
    let (remote, store, watcher) = setup();
    remote.add(file_info("f#default#doc-1", ROOT, "doc.txt", "d1"));
    remote.push_summary(summary(vec![], 1_000));

    watcher.full_scan(&CancellationToken::new()).await.unwrap();

    // The tree landed in the store with expected local placement.
    let pair = store
        .get_pair_by_local_path(&NodePath::new("/doc.txt").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pair.remote_state, HalfState::Created);
    assert_eq!(pair.local_state, HalfState::Unknown);
    assert_eq!(pair.pair_state(), PairState::RemotelyCreated);

    // Cursor fetched before the walk plus the scan watermark, all
    // persisted together.
    assert_eq!(
        store.get_config(KEY_LAST_SYNC_DATE).await.unwrap().as_deref(),
        Some("1000")
    );
    assert!(store.get_config(KEY_LAST_FULL_SCAN).await.unwrap().is_some());
    assert_eq!(
        store
            .get_config(KEY_LAST_ROOT_DEFINITIONS)
            .await
            .unwrap()
            .as_deref(),
        Some("roots-v1")
    );
}

#[tokio::test]
async fn test_scan_adopts_local_only_pair_at_expected_path() {
    let (remote, store, watcher) = setup();
    remote.add(file_info("f#default#doc-1", ROOT, "doc.txt", "same-digest"));
    remote.push_summary(summary(vec![], 1_000));

    // The local watcher saw the file first.
    let local = pairsync_core::ports::local_filesystem::LocalInfo {
        path: NodePath::new("/doc.txt").unwrap(),
        folderish: false,
        last_modified: Utc::now(),
        size: 4,
    };
    let id = store
        .insert_local_state(&local, &NodePath::root())
        .await
        .unwrap();
    let mut pair = store.get_pair(id).await.unwrap().unwrap();
    pair.local_digest = Some("same-digest".to_string());
    store.update_local_state(&mut pair, &local, false).await.unwrap();

    watcher.full_scan(&CancellationToken::new()).await.unwrap();

    // One pair, bound to the remote id and settled since both sides
    // already agree on content.
    assert_eq!(store.pair_count(), 2); // root + doc
    let pair = store.get_pair(id).await.unwrap().unwrap();
    assert_eq!(
        pair.remote_ref.as_ref().map(|r| r.as_str()),
        Some("f#default#doc-1")
    );
    assert_eq!(pair.pair_state(), PairState::Synchronized);
    assert_eq!(pair.version, 1);
}

#[tokio::test]
async fn test_cursor_sync_date_never_decreases() {
    let (remote, store, watcher) = setup();
    remote.push_summary(summary(vec![], 5_000));
    watcher.poll_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        store.get_config(KEY_LAST_SYNC_DATE).await.unwrap().as_deref(),
        Some("5000")
    );

    // A server hiccup reports an older sync date with zero changes; the
    // persisted watermark holds.
    remote.push_summary(summary(vec![], 3_000));
    watcher.poll_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        store.get_config(KEY_LAST_SYNC_DATE).await.unwrap().as_deref(),
        Some("5000")
    );

    remote.push_summary(summary(vec![], 8_000));
    watcher.poll_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        store.get_config(KEY_LAST_SYNC_DATE).await.unwrap().as_deref(),
        Some("8000")
    );
}

#[tokio::test]
async fn test_batch_dedup_applies_only_most_recent_event_per_id() {
    let (remote, store, watcher) = setup();
    remote.add(file_info("f#default#doc-1", ROOT, "doc.txt", "d1"));
    remote.push_summary(summary(vec![], 1_000));
    watcher.full_scan(&CancellationToken::new()).await.unwrap();

    // Two entries for the same id: an older rename to stale.txt and a
    // newer rename to final.txt, delivered oldest first.
    let older = RemoteChange {
        event_id: "documentModified".to_string(),
        remote_ref: RemoteRef::new("f#default#doc-1").unwrap(),
        event_date: 2_000,
        fs_item: Some(file_info("f#default#doc-1", ROOT, "stale.txt", "d2")),
    };
    let newer = RemoteChange {
        event_id: "documentModified".to_string(),
        remote_ref: RemoteRef::new("f#default#doc-1").unwrap(),
        event_date: 3_000,
        fs_item: Some(file_info("f#default#doc-1", ROOT, "final.txt", "d3")),
    };
    remote.push_summary(summary(vec![older, newer], 4_000));

    watcher.poll_once(&CancellationToken::new()).await.unwrap();

    let pairs = store
        .get_pairs_by_remote_ref(&RemoteRef::new("f#default#doc-1").unwrap())
        .await
        .unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].remote_name.as_deref(), Some("final.txt"));
    assert_eq!(pairs[0].remote_digest.as_deref(), Some("d3"));
}

#[tokio::test]
async fn test_owned_pair_skips_deletion_until_lease_released() {
    let (remote, store, watcher) = setup();
    remote.add(file_info("f#default#doc-1", ROOT, "doc.txt", "d1"));
    remote.push_summary(summary(vec![], 1_000));
    watcher.full_scan(&CancellationToken::new()).await.unwrap();

    // A transfer worker owns the pair.
    let docref = RemoteRef::new("f#default#doc-1").unwrap();
    let mut pair = store
        .get_pairs_by_remote_ref(&docref)
        .await
        .unwrap()
        .remove(0);
    pair.lease = ProcessorLease::acquire(7, 300, Utc::now());
    let info = file_info("f#default#doc-1", ROOT, "doc.txt", "d1");
    store
        .update_remote_state(&mut pair, &info, "/x")
        .await
        .unwrap();

    let deletion = || RemoteChange {
        event_id: EVENT_DELETED.to_string(),
        remote_ref: docref.clone(),
        event_date: 2_000,
        fs_item: None,
    };
    remote.push_summary(summary(vec![deletion()], 2_500));
    watcher.poll_once(&CancellationToken::new()).await.unwrap();

    // Untouched this pass.
    let held = store.get_pairs_by_remote_ref(&docref).await.unwrap();
    assert_eq!(held.len(), 1);
    assert_ne!(held[0].remote_state, HalfState::Deleted);

    // Lease released; the next poll carries the deletion again.
    let mut pair = held.into_iter().next().unwrap();
    pair.lease.release();
    store
        .update_remote_state(&mut pair, &info, "/x")
        .await
        .unwrap();
    remote.push_summary(summary(vec![deletion()], 3_000));
    watcher.poll_once(&CancellationToken::new()).await.unwrap();

    let after = store.get_pairs_by_remote_ref(&docref).await.unwrap();
    assert!(after.is_empty() || after[0].remote_state == HalfState::Deleted);
}

#[tokio::test]
async fn test_new_document_change_is_inserted_under_tracked_parent() {
    let (remote, store, watcher) = setup();
    remote.push_summary(summary(vec![], 1_000));
    watcher.full_scan(&CancellationToken::new()).await.unwrap();

    let fresh = file_info("f#default#doc-9", ROOT, "fresh.txt", "d9");
    remote.push_summary(summary(
        vec![RemoteChange {
            event_id: "documentCreated".to_string(),
            remote_ref: fresh.uid.clone(),
            event_date: 2_000,
            fs_item: Some(fresh),
        }],
        2_500,
    ));

    watcher.poll_once(&CancellationToken::new()).await.unwrap();

    let pair = store
        .get_pair_by_local_path(&NodePath::new("/fresh.txt").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pair.pair_state(), PairState::RemotelyCreated);
    assert!(store.pending_transfers().contains(&pair.id));
}

#[tokio::test]
async fn test_partial_ref_match_survives_factory_change() {
    let (remote, store, watcher) = setup();
    remote.add(file_info("defaultFileSystemItemFactory#default#doc-1", ROOT, "doc.txt", "d1"));
    remote.push_summary(summary(vec![], 1_000));
    watcher.full_scan(&CancellationToken::new()).await.unwrap();

    // The same document comes back under another factory after a
    // security boundary; the relaxed match still finds the pair.
    let requoted = file_info("otherFactory#default#doc-1", ROOT, "doc.txt", "d2");
    remote.push_summary(summary(
        vec![RemoteChange {
            event_id: "documentModified".to_string(),
            remote_ref: requoted.uid.clone(),
            event_date: 2_000,
            fs_item: Some(requoted),
        }],
        2_500,
    ));

    watcher.poll_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(store.pair_count(), 2); // root + doc, no duplicate
    let pair = store
        .get_pair_by_local_path(&NodePath::new("/doc.txt").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pair.remote_digest.as_deref(), Some("d2"));
}

#[tokio::test]
async fn test_collection_tracked_pair_keeps_known_parent_binding() {
    let (remote, store, watcher) = setup();

    // The pair was synchronized through a collection container.
    let filed = file_info("f#default#doc-5", COLLECTION, "filed.txt", "d1");
    let id = store
        .insert_remote_state(
            &filed,
            "/collectionSyncRootFolderItemFactory#default#coll-1",
            &NodePath::new("/filed.txt").unwrap(),
            &NodePath::root(),
        )
        .await
        .unwrap();

    // The change log reports the same document through the real sync
    // root it also lives under.
    let reported = file_info("f#default#doc-5", ROOT, "filed.txt", "d2");
    remote.push_summary(summary(
        vec![RemoteChange {
            event_id: "documentModified".to_string(),
            remote_ref: reported.uid.clone(),
            event_date: 2_000,
            fs_item: Some(reported),
        }],
        2_500,
    ));
    watcher.poll_once(&CancellationToken::new()).await.unwrap();

    // Content refreshed, but the collection binding is untouched; the
    // path observed through the other container is never stored.
    let pair = store.get_pair(id).await.unwrap().unwrap();
    assert_eq!(pair.remote_digest.as_deref(), Some("d2"));
    assert_eq!(
        pair.remote_parent_ref.as_ref().map(|r| r.as_str()),
        Some(COLLECTION)
    );
    assert_eq!(
        pair.remote_parent_path.as_deref(),
        Some("/collectionSyncRootFolderItemFactory#default#coll-1")
    );
}

#[tokio::test]
async fn test_move_into_collection_container_reads_as_deletion() {
    let (remote, store, watcher) = setup();
    remote.add(file_info("f#default#doc-1", ROOT, "doc.txt", "d1"));
    remote.push_summary(summary(vec![], 1_000));
    watcher.full_scan(&CancellationToken::new()).await.unwrap();

    // Filed into the collection container: the item left the
    // synchronized scope.
    let moved = file_info("f#default#doc-1", COLLECTION, "doc.txt", "d1");
    remote.push_summary(summary(
        vec![RemoteChange {
            event_id: EVENT_DOCUMENT_MOVED.to_string(),
            remote_ref: moved.uid.clone(),
            event_date: 2_000,
            fs_item: Some(moved),
        }],
        2_500,
    ));
    watcher.poll_once(&CancellationToken::new()).await.unwrap();

    // The row was remote-only, so the deletion removes it outright.
    assert!(store
        .get_pairs_by_remote_ref(&RemoteRef::new("f#default#doc-1").unwrap())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_move_out_of_collection_container_reads_as_creation() {
    let (remote, store, watcher) = setup();
    remote.push_summary(summary(vec![], 1_000));
    watcher.full_scan(&CancellationToken::new()).await.unwrap();

    // Tracked only through the collection container so far.
    let filed = file_info("f#default#doc-5", COLLECTION, "filed.txt", "d1");
    store
        .insert_remote_state(
            &filed,
            "/collectionSyncRootFolderItemFactory#default#coll-1",
            &NodePath::new("/filed.txt").unwrap(),
            &NodePath::root(),
        )
        .await
        .unwrap();

    // The move lands it in a real sync root: it enters scope as a
    // creation under the tracked root, not as a refresh of the
    // collection row.
    let promoted = file_info("f#default#doc-5", ROOT, "promoted.txt", "d1");
    remote.push_summary(summary(
        vec![RemoteChange {
            event_id: EVENT_DOCUMENT_MOVED.to_string(),
            remote_ref: promoted.uid.clone(),
            event_date: 2_000,
            fs_item: Some(promoted),
        }],
        2_500,
    ));
    watcher.poll_once(&CancellationToken::new()).await.unwrap();

    let pair = store
        .get_pair_by_local_path(&NodePath::new("/promoted.txt").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pair.pair_state(), PairState::RemotelyCreated);
    assert_eq!(
        pair.remote_parent_ref.as_ref().map(|r| r.as_str()),
        Some(ROOT)
    );
}

#[tokio::test]
async fn test_security_update_with_payload_rescans_subtree() {
    let (remote, store, watcher) = setup();
    remote.add(folder_info("f#default#dir-1", ROOT, "dir"));
    remote.add(file_info("f#default#leaf-1", "f#default#dir-1", "leaf.txt", "d1"));
    remote.push_summary(summary(vec![], 1_000));
    watcher.full_scan(&CancellationToken::new()).await.unwrap();

    // The permission change re-exposed the folder with a child already
    // modified; no per-child entries are delivered.
    remote.replace(file_info("f#default#leaf-1", "f#default#dir-1", "leaf.txt", "d2"));
    remote.push_summary(summary(
        vec![RemoteChange {
            event_id: EVENT_SECURITY_UPDATED.to_string(),
            remote_ref: RemoteRef::new("f#default#dir-1").unwrap(),
            event_date: 2_000,
            fs_item: Some(folder_info("f#default#dir-1", ROOT, "dir")),
        }],
        2_500,
    ));
    watcher.poll_once(&CancellationToken::new()).await.unwrap();

    let leaf = store
        .get_pair_by_local_path(&NodePath::new("/dir/leaf.txt").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(leaf.remote_digest.as_deref(), Some("d2"));
}

#[tokio::test]
async fn test_changed_roots_trigger_rescan_with_live_cursor() {
    let (remote, store, watcher) = setup();
    remote.push_summary(summary(vec![], 1_000));
    watcher.full_scan(&CancellationToken::new()).await.unwrap();

    // A root was added server-side: the poll sees a different root
    // encoding and falls back to a full scan, which discovers the new
    // content without child-level events.
    remote.add(file_info("f#default#doc-2", ROOT, "late.txt", "d2"));
    remote.push_summary(ChangeSummary {
        changes: vec![],
        sync_date: 2_000,
        upper_bound: Some(2_000),
        active_roots: "roots-v2".to_string(),
    });
    remote.push_summary(ChangeSummary {
        changes: vec![],
        sync_date: 3_000,
        upper_bound: Some(3_000),
        active_roots: "roots-v2".to_string(),
    });

    watcher.poll_once(&CancellationToken::new()).await.unwrap();

    assert!(store
        .get_pair_by_local_path(&NodePath::new("/late.txt").unwrap())
        .await
        .unwrap()
        .is_some());
    assert_eq!(
        store
            .get_config(KEY_LAST_ROOT_DEFINITIONS)
            .await
            .unwrap()
            .as_deref(),
        Some("roots-v2")
    );

    // The rescan queried the change log with the persisted cursor, not
    // a blank one.
    let calls = remote.change_calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(
        calls[2],
        (Some("roots-v1".to_string()), Some(1_000), Some(1_000))
    );
}
