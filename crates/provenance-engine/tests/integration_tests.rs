//! Integration tests for provenance-engine
//!
//! These run the engine against a real SQLite DAO: end-to-end scenarios,
//! commit atomicity, restart recovery, and maintenance operations.

use provenance_domain::{BuildId, BuildStatus, Fingerprint, ProvenanceDao, Role};
use provenance_engine::{
    read_events, BuildPhase, IngestConfig, IngestError, ProvenanceEngine,
};
use provenance_store::SqliteDao;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn engine() -> ProvenanceEngine<SqliteDao> {
    ProvenanceEngine::open(Arc::new(SqliteDao::in_memory().unwrap()), IngestConfig::default())
        .unwrap()
}

fn id(s: &str) -> BuildId {
    BuildId::parse(s).unwrap()
}

fn fp(s: &str) -> Fingerprint {
    Fingerprint::new(s).unwrap()
}

fn produce(engine: &ProvenanceEngine<SqliteDao>, job: &str, number: u32, at: u64, outputs: &[&str], inputs: &[&str]) {
    engine.on_build_start_at(job, number, at).unwrap();
    for checksum in inputs {
        engine.on_dependency_resolved(job, number, checksum, "compile").unwrap();
    }
    for checksum in outputs {
        engine
            .on_artifact_generated(job, number, &format!("target/{}.jar", checksum), checksum)
            .unwrap();
    }
    engine
        .on_build_complete_at(job, number, BuildStatus::Success, at + 100)
        .unwrap();
}

#[test]
fn test_web_service_scenario() {
    let engine = engine();

    engine.on_build_start_at("job/web", 12, 1_000).unwrap();
    engine
        .on_artifact_generated("job/web", 12, "target/app.jar", "abc123")
        .unwrap();
    engine
        .on_build_complete_at("job/web", 12, BuildStatus::Success, 1_500)
        .unwrap();

    engine.on_build_start_at("job/service", 5, 2_000).unwrap();
    engine
        .on_dependency_resolved("job/service", 5, "abc123", "compile")
        .unwrap();
    engine
        .on_build_complete_at("job/service", 5, BuildStatus::Success, 2_500)
        .unwrap();

    assert_eq!(
        engine.query_downstream("abc123").unwrap(),
        BTreeSet::from([id("job/service#5")])
    );
    assert_eq!(
        engine.query_upstream("job/service", 5).unwrap(),
        BTreeSet::from([fp("abc123")])
    );

    let occurrences = engine.query_fingerprint("abc123").unwrap();
    assert_eq!(occurrences.len(), 2);
    assert_eq!(occurrences[0].build, id("job/web#12"));
    assert_eq!(occurrences[0].role, Role::Produced);
    assert_eq!(occurrences[0].timestamp, 1_000);
    assert_eq!(occurrences[1].build, id("job/service#5"));
    assert_eq!(occurrences[1].role, Role::Consumed);
    assert_eq!(occurrences[1].timestamp, 2_000);

    let producer = engine.query_producer("abc123").unwrap().unwrap();
    assert_eq!(producer.build, id("job/web#12"));
    assert!(producer.canonical);
}

#[test]
fn test_unknown_fingerprint_yields_empty_results() {
    let engine = engine();
    assert!(engine.query_fingerprint("ffff").unwrap().is_empty());
    assert!(engine.query_downstream("ffff").unwrap().is_empty());
    assert!(engine.query_upstream("job/none", 1).unwrap().is_empty());
    assert!(engine.query_producer("ffff").unwrap().is_none());
}

#[test]
fn test_cancelled_build_leaves_nothing() {
    let engine = engine();
    engine.on_build_start("job/x", 1).unwrap();
    engine.on_artifact_generated("job/x", 1, "x.jar", "aa").unwrap();
    engine.on_dependency_resolved("job/x", 1, "bb", "test").unwrap();
    engine.cancel_build("job/x", 1).unwrap();

    assert!(engine.query_fingerprint("aa").unwrap().is_empty());
    assert!(engine.query_downstream("bb").unwrap().is_empty());
    assert!(engine.query_upstream("job/x", 1).unwrap().is_empty());
    assert_eq!(engine.dao().stats().unwrap().builds, 0);
    assert_eq!(engine.build_phase("job/x", 1).unwrap(), Some(BuildPhase::Failed));
    assert!(matches!(
        engine.on_build_complete("job/x", 1, BuildStatus::Aborted),
        Err(IngestError::InvalidTransition { .. })
    ));
}

#[test]
fn test_records_invisible_until_commit() {
    let engine = engine();
    let checksums: Vec<String> = (0..20).map(|n| format!("{:04x}", n)).collect();

    engine.on_build_start("job/big", 1).unwrap();
    for checksum in &checksums {
        engine
            .on_artifact_generated("job/big", 1, &format!("{}.jar", checksum), checksum)
            .unwrap();
        assert!(engine.query_fingerprint(checksum).unwrap().is_empty());
    }
    assert_eq!(engine.dao().stats().unwrap().generations, 0);

    let receipt = engine
        .on_build_complete("job/big", 1, BuildStatus::Success)
        .unwrap();
    assert_eq!(receipt.generations.len(), 20);
    for checksum in &checksums {
        assert_eq!(engine.query_fingerprint(checksum).unwrap().len(), 1);
    }
}

#[test]
fn test_concurrent_reader_sees_all_or_nothing() {
    let engine = Arc::new(engine());
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let engine = Arc::clone(&engine);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut observed = BTreeSet::new();
            while !done.load(Ordering::SeqCst) {
                observed.insert(engine.query_fingerprint("cafe").unwrap().len());
            }
            observed.insert(engine.query_fingerprint("cafe").unwrap().len());
            observed
        })
    };

    engine.on_build_start("job/multi", 1).unwrap();
    for n in 0..50 {
        engine
            .on_artifact_generated("job/multi", 1, &format!("copy-{}/app.jar", n), "cafe")
            .unwrap();
    }
    engine
        .on_build_complete("job/multi", 1, BuildStatus::Success)
        .unwrap();
    done.store(true, Ordering::SeqCst);

    let observed = reader.join().unwrap();
    assert!(observed.iter().all(|&n| n == 0 || n == 50), "saw {:?}", observed);
    assert!(observed.contains(&50));
}

#[test]
fn test_concurrent_builds_ingest_independently() {
    let engine = Arc::new(engine());
    let handles: Vec<_> = (0..16u32)
        .map(|n| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let job = format!("job/parallel-{}", n);
                engine.on_build_start(&job, 1).unwrap();
                engine
                    .on_artifact_generated(&job, 1, "out.jar", &format!("{:08x}", n))
                    .unwrap();
                engine.on_dependency_resolved(&job, 1, "ee", "compile").unwrap();
                engine.on_build_complete(&job, 1, BuildStatus::Success).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.query_downstream("ee").unwrap().len(), 16);
    let stats = engine.stats().unwrap();
    assert_eq!(stats.stored.builds, 16);
    assert_eq!(stats.ingest.committed, 16);
    assert_eq!(stats.in_flight, 0);
}

#[test]
fn test_restart_rebuilds_identical_indexes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("provenance.db");

    let before = {
        let engine =
            ProvenanceEngine::open(Arc::new(SqliteDao::open(&path).unwrap()), IngestConfig::default())
                .unwrap();
        produce(&engine, "job/lib", 1, 100, &["11", "12"], &["ee"]);
        produce(&engine, "job/app", 1, 300, &["21"], &["11", "12"]);
        produce(&engine, "job/lib", 2, 200, &["11"], &[]);
        produce(&engine, "job/it", 1, 250, &[], &["21", "11"]);
        let snapshot = engine.index().snapshot();
        engine.close().unwrap();
        snapshot
    };

    let engine =
        ProvenanceEngine::open(Arc::new(SqliteDao::open(&path).unwrap()), IngestConfig::default())
            .unwrap();
    assert_eq!(engine.index().snapshot(), before);
    assert_eq!(
        engine.query_transitive_upstream("job/it", 1).unwrap(),
        BTreeSet::from([id("job/app#1"), id("job/lib#1"), id("job/lib#2")])
    );
}

#[test]
fn test_committed_build_cannot_be_ingested_again_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("provenance.db");
    let open = || {
        ProvenanceEngine::open(Arc::new(SqliteDao::open(&path).unwrap()), IngestConfig::default())
            .unwrap()
    };

    {
        let engine = open();
        produce(&engine, "job/web", 12, 1_000, &["aa"], &[]);
        produce(&engine, "job/x", 1, 1_100, &[], &["aa"]);
        engine.close().unwrap();
    }

    let engine = open();
    assert_eq!(engine.build_phase("job/web", 12).unwrap(), Some(BuildPhase::Committed));
    assert!(matches!(
        engine.on_build_start_at("job/web", 12, 9_000),
        Err(IngestError::AlreadyCommitted(_))
    ));

    // Maintenance on an unrelated job leaves the guard in place
    assert_eq!(engine.rename_job("job/x", "job/y").unwrap(), 1);
    assert!(matches!(
        engine.on_build_start_at("job/web", 12, 9_000),
        Err(IngestError::AlreadyCommitted(_))
    ));
    assert!(matches!(
        engine.on_artifact_generated("job/web", 12, "late.jar", "bb"),
        Err(IngestError::InvalidTransition { from: BuildPhase::Committed, .. })
    ));

    let stored = engine.dao().find_build(&id("job/web#12")).unwrap().unwrap();
    assert_eq!(stored.started_at, 1_000);
    assert_eq!(stored.status, BuildStatus::Success);

    let incremental = engine.index().snapshot();
    engine.rebuild_indexes().unwrap();
    assert_eq!(engine.index().snapshot(), incremental);
    assert_eq!(engine.query_fingerprint("aa").unwrap()[0].timestamp, 1_000);
}

#[test]
fn test_transitive_queries_and_cycles() {
    let engine = engine();
    produce(&engine, "job/base", 1, 100, &["0a"], &[]);
    produce(&engine, "job/mid", 1, 200, &["0b"], &["0a"]);
    produce(&engine, "job/top", 1, 300, &[], &["0b"]);

    assert_eq!(
        engine.query_transitive_downstream("job/base", 1).unwrap(),
        BTreeSet::from([id("job/mid#1"), id("job/top#1")])
    );
    assert_eq!(
        engine.query_upstream_builds("job/top", 1).unwrap(),
        BTreeSet::from([id("job/mid#1")])
    );

    // job/loop-a consumes what job/loop-b produces and vice versa
    produce(&engine, "job/loop-a", 1, 400, &["1a"], &["1b"]);
    produce(&engine, "job/loop-b", 1, 500, &["1b"], &["1a"]);
    assert!(matches!(
        engine.query_transitive_upstream("job/loop-a", 1),
        Err(IngestError::Graph(_))
    ));

    // Queries elsewhere in the graph are unaffected
    assert!(engine.query_transitive_upstream("job/top", 1).is_ok());
}

#[test]
fn test_delete_build_updates_queries() {
    let engine = engine();
    produce(&engine, "job/a", 1, 100, &["aa"], &[]);
    produce(&engine, "job/b", 1, 200, &["aa"], &[]);
    produce(&engine, "job/c", 1, 300, &[], &["aa"]);

    assert!(engine.delete_build("job/a", 1).unwrap());
    assert!(!engine.delete_build("job/a", 1).unwrap());

    let builds: Vec<BuildId> = engine
        .query_fingerprint("aa")
        .unwrap()
        .into_iter()
        .map(|o| o.build)
        .collect();
    assert_eq!(builds, vec![id("job/b#1"), id("job/c#1")]);
    assert_eq!(engine.query_producer("aa").unwrap().unwrap().build, id("job/b#1"));

    // A deleted build can be ingested again
    produce(&engine, "job/a", 1, 400, &["ab"], &[]);
    assert_eq!(engine.query_fingerprint("ab").unwrap().len(), 1);
}

#[test]
fn test_delete_and_rename_job() {
    let engine = engine();
    produce(&engine, "folder/app", 3, 100, &["aa"], &[]);
    produce(&engine, "folder/app/module", 1, 150, &[], &["aa"]);
    produce(&engine, "folder/other", 1, 200, &[], &["aa"]);

    assert_eq!(engine.rename_job("folder/app", "folder/svc").unwrap(), 2);
    assert_eq!(
        engine.query_downstream("aa").unwrap(),
        BTreeSet::from([id("folder/other#1"), id("folder/svc/module#1")])
    );
    assert_eq!(engine.query_fingerprint("aa").unwrap()[0].build, id("folder/svc#3"));

    assert_eq!(engine.delete_job("folder/svc").unwrap(), 2);
    assert_eq!(
        engine.query_downstream("aa").unwrap(),
        BTreeSet::from([id("folder/other#1")])
    );
    assert!(engine.query_producer("aa").unwrap().is_none());
}

#[test]
fn test_replay_event_stream() {
    let input = r#"
# two builds, one cancelled
{"event":"build_started","job":"job/web","number":12,"timestamp":1000}
{"event":"artifact_generated","job":"job/web","number":12,"file_path":"target/app.jar","checksum":"abc123"}
{"event":"build_completed","job":"job/web","number":12,"status":"success","timestamp":1500}
{"event":"build_started","job":"job/x","number":1,"timestamp":1600}
{"event":"dependency_resolved","job":"job/x","number":1,"checksum":"abc123","scope":"test"}
{"event":"build_cancelled","job":"job/x","number":1}
"#;
    let engine = engine();
    let mut committed = 0;
    for event in read_events(input.as_bytes()).unwrap() {
        if engine.apply_event(event).unwrap().is_some() {
            committed += 1;
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(engine.query_fingerprint("abc123").unwrap().len(), 1);
    assert!(engine.query_downstream("abc123").unwrap().is_empty());
}

#[test]
fn test_close_rejects_further_work() {
    let engine = engine();
    engine.on_build_start("job/open", 1).unwrap();
    engine.close().unwrap();
    engine.close().unwrap();

    assert!(matches!(
        engine.on_build_complete("job/open", 1, BuildStatus::Success),
        Err(IngestError::DaoClosed)
    ));
    assert!(matches!(engine.query_producer("aa"), Err(IngestError::DaoClosed)));
}
