//! Collection of unreachable versions and generations.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pubcache_common::config::SnapDictionaryConfig;
use pubcache_common::types::{ContentNode, Generation};
use pubcache_snapdict::SnapDictionary;
use pubcache_test::utils::{content, init_tracing, test_dictionary};

fn g(n: u64) -> Generation {
    Generation::new(n)
}

#[test]
fn test_collects_disposed_generations() {
    let dict = test_dictionary::<i32, Arc<ContentNode>>();

    for id in 0..32 {
        dict.set(id, content(id, "page")).unwrap();
        dict.create_snapshot().unwrap().dispose();
    }
    assert_eq!(dict.gen_count(), 32);
    assert_eq!(dict.snap_count(), 0);

    let result = dict.collect().unwrap();
    assert_eq!(result.generations_dequeued, 32);
    assert_eq!(result.versions_collected, 0);
    assert_eq!(dict.gen_count(), 0);
    assert_eq!(dict.count(), 32);

    // every key still resolves
    let fresh = dict.create_snapshot().unwrap();
    for id in 0..32 {
        assert!(fresh.contains_key(&id).unwrap(), "key {id} lost");
    }
    drop(fresh);
    dict.collect().unwrap();

    for id in 0..32 {
        dict.clear(id).unwrap();
    }
    dict.create_snapshot().unwrap().dispose();
    assert_eq!(dict.gen_count(), 1);
    assert_eq!(dict.count(), 32);

    let result = dict.collect().unwrap();
    assert_eq!(result.chains_pruned, 32);
    assert_eq!(result.versions_collected, 64);
    assert_eq!(dict.count(), 0);
    assert_eq!(dict.gen_count(), 0);
}

#[test]
fn test_collects_values_as_snapshots_go() {
    let dict = test_dictionary::<i32, &str>();
    let helper = dict.test_helper();

    dict.set(1, "a").unwrap();
    let s1 = dict.create_snapshot().unwrap();
    dict.set(1, "b").unwrap();
    let s2 = dict.create_snapshot().unwrap();
    dict.set(1, "c").unwrap();
    let s3 = dict.create_snapshot().unwrap();
    assert_eq!(helper.chain(&1).len(), 3);

    // nothing goes while every snapshot is alive
    dict.collect().unwrap();
    assert_eq!(helper.chain(&1).len(), 3);
    assert_eq!(helper.floor_gen(), g(1));

    drop(s1);
    dict.collect().unwrap();
    assert_eq!(helper.chain(&1), vec![(g(3), Some("c")), (g(2), Some("b"))]);
    assert_eq!(helper.floor_gen(), g(2));
    assert_eq!(s2.get(&1).unwrap(), Some("b"));

    drop(s2);
    dict.collect().unwrap();
    assert_eq!(helper.chain(&1), vec![(g(3), Some("c"))]);

    drop(s3);
    dict.collect().unwrap();
    assert_eq!(helper.chain(&1), vec![(g(3), Some("c"))]);
    assert_eq!(helper.floor_gen(), g(3));
}

#[test]
fn test_collects_tombstones() {
    let dict = test_dictionary::<i32, &str>();

    dict.set(1, "a").unwrap();
    let s1 = dict.create_snapshot().unwrap();
    dict.clear(1).unwrap();
    let s2 = dict.create_snapshot().unwrap();

    dict.collect().unwrap();
    assert_eq!(dict.count(), 1);
    assert_eq!(s1.get(&1).unwrap(), Some("a"));

    drop(s1);
    let result = dict.collect().unwrap();
    assert_eq!(result.chains_pruned, 1);
    assert_eq!(dict.count(), 0);
    assert_eq!(s2.get(&1).unwrap(), None);
}

#[test]
fn test_pinned_snapshot_survives_churn() {
    let dict = test_dictionary::<i32, &str>();
    dict.set(1, "first").unwrap();
    dict.set(2, "second").unwrap();
    let pinned = dict.create_snapshot().unwrap();

    for round in 0..20 {
        dict.set(1, if round % 2 == 0 { "even" } else { "odd" }).unwrap();
        dict.clear(2).unwrap();
        dict.create_snapshot().unwrap().dispose();
        dict.collect().unwrap();

        assert_eq!(pinned.get(&1).unwrap(), Some("first"));
        assert_eq!(pinned.get(&2).unwrap(), Some("second"));
    }
    // generations behind the pinned one wait for it
    assert_eq!(dict.snap_count(), 1);
    assert_eq!(dict.gen_count(), 21);

    drop(pinned);
    dict.collect().unwrap();
    assert_eq!(dict.test_helper().chain(&1).len(), 1);
    assert_eq!(dict.count(), 1);
}

#[test]
fn test_collect_while_locked() {
    let dict = test_dictionary::<i32, &str>();
    dict.set(1, "one").unwrap();
    dict.create_snapshot().unwrap().dispose();

    let lock = dict.write_lock(None).unwrap();
    dict.set_locked(1, "uno").unwrap();
    let during = dict.create_snapshot().unwrap();
    drop(during);
    dict.collect().unwrap();

    // the committed value stays reachable under the open generation
    assert_eq!(dict.test_helper().chain(&1).len(), 2);
    lock.rollback().unwrap();
    assert_eq!(dict.create_snapshot().unwrap().get(&1).unwrap(), Some("one"));
}

#[test]
fn test_stats_accumulate() {
    let dict = test_dictionary::<i32, &str>();
    dict.set(1, "a").unwrap();
    dict.create_snapshot().unwrap().dispose();
    dict.set(1, "b").unwrap();
    dict.create_snapshot().unwrap().dispose();

    let first = dict.collect().unwrap();
    assert!(first.did_work());
    let second = dict.collect().unwrap();
    assert!(!second.did_work());

    let stats = dict.collect_stats();
    assert_eq!(stats.total_runs(), 2);
    assert_eq!(stats.total_versions_collected(), 1);
    assert_eq!(stats.total_generations_dequeued(), 2);
    assert_eq!(stats.total_chains_pruned(), 0);
}

#[tokio::test]
async fn test_collect_async() {
    let dict = test_dictionary::<i32, Arc<ContentNode>>();
    for id in 0..32 {
        dict.set(id, content(id, "page")).unwrap();
        dict.create_snapshot().unwrap().dispose();
    }

    let result = dict.collect_async().await.unwrap();
    assert_eq!(result.generations_dequeued, 32);
    assert_eq!(dict.snap_count(), 0);
    assert_eq!(dict.gen_count(), 0);

    let fresh = dict.create_snapshot().unwrap();
    assert_eq!(fresh.get_all().unwrap().count(), 32);
}

#[test]
fn test_automatic_collection() {
    init_tracing();
    let config = SnapDictionaryConfig::default()
        .with_collect_auto(true)
        .with_collect_min_gen_delta(2);
    let dict: SnapDictionary<i32, &str> = SnapDictionary::with_config(config).unwrap();

    for round in 0..10 {
        dict.set(1, if round % 2 == 0 { "even" } else { "odd" }).unwrap();
        dict.create_snapshot().unwrap().dispose();
    }

    let helper = dict.test_helper();
    let deadline = Instant::now() + Duration::from_secs(5);
    while helper.floor_gen() == Generation::ZERO && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(helper.floor_gen() > Generation::ZERO);
    assert!(dict.collect_stats().total_runs() > 0);

    dict.collect().unwrap();
    assert_eq!(helper.chain(&1).len(), 1);
    assert_eq!(dict.create_snapshot().unwrap().get(&1).unwrap(), Some("odd"));
}

#[test]
fn test_automatic_collection_can_be_switched_off() {
    let config = SnapDictionaryConfig::default().with_collect_min_gen_delta(1);
    let dict: SnapDictionary<i32, &str> = SnapDictionary::with_config(config).unwrap();
    dict.test_helper().set_collect_auto(false);

    for _ in 0..10 {
        dict.set(1, "x").unwrap();
        dict.create_snapshot().unwrap().dispose();
    }
    thread::sleep(Duration::from_millis(50));
    assert_eq!(dict.collect_stats().total_runs(), 0);
    assert_eq!(dict.gen_count(), 10);
}

#[test]
fn test_live_view_survives_collection() {
    let dict = test_dictionary::<i32, &str>();

    let lock = dict.write_lock(None).unwrap();
    dict.set_locked(1, "one").unwrap();
    let live = dict.live_snapshot().unwrap();
    lock.commit().unwrap();

    for value in ["two", "three"] {
        dict.create_snapshot().unwrap().dispose();
        dict.set(1, value).unwrap();
    }
    dict.create_snapshot().unwrap().dispose();
    dict.collect().unwrap();

    assert_eq!(live.get(&1).unwrap(), Some("one"));
    assert_eq!(dict.create_snapshot().unwrap().get(&1).unwrap(), Some("three"));

    drop(live);
    dict.collect().unwrap();
    assert_eq!(dict.test_helper().chain(&1).len(), 1);
}
