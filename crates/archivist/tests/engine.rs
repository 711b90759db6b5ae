//! End-to-end runs of the link and job state machines through the worker
//! pools, with scripted extractors in place of external tools.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use archivist::models::{ArchiveOptions, HistoryStatus, JobStatus, LinkStatus};
use archivist::output::MANIFEST_FILENAME;
use archivist::{ArchiveError, Archivist, ExtractorError, LinkEdit};
use tempfile::tempdir;

use common::{fast_settings, memory_archivist, registry, sqlite_store, Scripted};

const DEADLINE: Duration = Duration::from_secs(20);

fn statuses(history: &[archivist::models::HistoryRecord], extractor: &str) -> Vec<HistoryStatus> {
    history
        .iter()
        .filter(|r| r.extractor == extractor)
        .map(|r| r.entry.status)
        .collect()
}

#[tokio::test]
async fn test_all_extractors_succeed_and_link_seals() {
    let dir = tempdir().unwrap();
    let extractors = vec![Scripted::ok("a"), Scripted::ok("b"), Scripted::ok("c")];
    let archivist = memory_archivist(fast_settings(dir.path()), extractors.clone());

    let id = archivist
        .submit("https://example.com/page", vec!["news".into()], ArchiveOptions::default())
        .await
        .unwrap();
    let report = archivist.orchestrator().run_until_idle(DEADLINE).await.unwrap();
    assert!(report.settled(), "{:?}", report);

    let snapshot = archivist.get_status(&id).await.unwrap();
    assert_eq!(snapshot.link.status, LinkStatus::Sealed);
    assert!(snapshot.link.retry_at.is_none());
    assert_eq!(snapshot.jobs.len(), 3);
    assert!(snapshot.jobs.iter().all(|j| j.status == JobStatus::Succeeded));
    assert!(snapshot.jobs.iter().all(|j| j.retries == 1));

    assert_eq!(snapshot.history.len(), 3);
    assert!(snapshot
        .history
        .iter()
        .all(|r| r.entry.status == HistoryStatus::Succeeded));

    let expected: BTreeMap<String, String> = ["a", "b", "c"]
        .iter()
        .map(|n| (n.to_string(), format!("{}.txt", n)))
        .collect();
    assert_eq!(snapshot.latest, expected);

    let link_dir = archivist.layout().link_dir(&id);
    assert!(link_dir.join("a.txt").is_file());
    assert!(link_dir.join(MANIFEST_FILENAME).is_file());
    for extractor in &extractors {
        assert_eq!(extractor.runs(), 1);
    }
}

#[tokio::test]
async fn test_transient_failures_back_off_then_succeed() {
    let dir = tempdir().unwrap();
    let mut settings = fast_settings(dir.path());
    settings.retry.max_retries = 5;
    let flaky = Scripted::failing(
        "flaky",
        vec![
            ExtractorError::Timeout(Duration::from_millis(20)),
            ExtractorError::Timeout(Duration::from_millis(20)),
        ],
    );
    let archivist = memory_archivist(settings, vec![flaky.clone()]);

    let id = archivist
        .submit("https://example.com/", vec![], ArchiveOptions::default())
        .await
        .unwrap();
    let report = archivist.orchestrator().run_until_idle(DEADLINE).await.unwrap();
    assert!(report.settled());

    let snapshot = archivist.get_status(&id).await.unwrap();
    let job = &snapshot.jobs[0];
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.retries, 3);
    assert_eq!(job.output.as_deref(), Some("flaky.txt"));
    assert_eq!(
        statuses(&snapshot.history, "flaky"),
        vec![HistoryStatus::Failed, HistoryStatus::Failed, HistoryStatus::Succeeded]
    );
    assert_eq!(flaky.runs(), 3);
}

#[tokio::test]
async fn test_persistent_transient_failure_gives_up_after_max_retries() {
    let dir = tempdir().unwrap();
    let failures = (0..10)
        .map(|_| ExtractorError::ServerError("503".into()))
        .collect();
    let broken = Scripted::failing("broken", failures);
    let fine = Scripted::ok("fine");
    let archivist = memory_archivist(fast_settings(dir.path()), vec![broken.clone(), fine]);

    let id = archivist
        .submit("https://example.com/", vec![], ArchiveOptions::default())
        .await
        .unwrap();
    archivist.orchestrator().run_until_idle(DEADLINE).await.unwrap();

    let snapshot = archivist.get_status(&id).await.unwrap();
    assert_eq!(snapshot.link.status, LinkStatus::Sealed);
    let job = snapshot.jobs.iter().find(|j| j.extractor == "broken").unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retries, 3);
    assert!(job.error.as_deref().unwrap_or("").contains("503"));
    assert_eq!(statuses(&snapshot.history, "broken").len(), 3);
    assert_eq!(broken.runs(), 3);
    assert!(!snapshot.latest.contains_key("broken"));
    assert!(snapshot.latest.contains_key("fine"));
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let dir = tempdir().unwrap();
    let gone = Scripted::failing("gone", vec![ExtractorError::NotFound]);
    let archivist = memory_archivist(fast_settings(dir.path()), vec![gone.clone()]);

    let id = archivist
        .submit("https://example.com/missing", vec![], ArchiveOptions::default())
        .await
        .unwrap();
    archivist.orchestrator().run_until_idle(DEADLINE).await.unwrap();

    let snapshot = archivist.get_status(&id).await.unwrap();
    assert_eq!(snapshot.jobs[0].status, JobStatus::Failed);
    assert_eq!(snapshot.jobs[0].retries, 1);
    assert_eq!(gone.runs(), 1);
    assert_eq!(snapshot.link.status, LinkStatus::Sealed);
}

#[tokio::test]
async fn test_link_waits_for_every_job() {
    let dir = tempdir().unwrap();
    let slow = Scripted::slow("slow", Duration::from_millis(300));
    let archivist = memory_archivist(
        fast_settings(dir.path()),
        vec![Scripted::ok("quick"), slow],
    );

    let id = archivist
        .submit("https://example.com/", vec![], ArchiveOptions::default())
        .await
        .unwrap();
    let orchestrator = archivist.orchestrator();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let running = tokio::spawn(async move { orchestrator.run(rx).await });

    let mut saw_partial = false;
    for _ in 0..200 {
        let snapshot = archivist.get_status(&id).await.unwrap();
        let done = snapshot
            .jobs
            .iter()
            .filter(|j| j.status.is_terminal())
            .count();
        if snapshot.link.status == LinkStatus::Sealed {
            assert_eq!(done, snapshot.jobs.len());
            break;
        }
        if done > 0 && done < snapshot.jobs.len() {
            saw_partial = true;
            assert_ne!(snapshot.link.status, LinkStatus::Sealed);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tx.send(true).unwrap();
    let report = running.await.unwrap().unwrap();

    assert!(saw_partial);
    assert!(report.settled());
}

#[tokio::test]
async fn test_competing_orchestrators_run_each_job_once() {
    let dir = tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    let extractors = vec![
        Scripted::slow("a", Duration::from_millis(30)),
        Scripted::slow("b", Duration::from_millis(30)),
        Scripted::slow("c", Duration::from_millis(30)),
    ];
    let archivist = Archivist::with_store(
        fast_settings(dir.path()),
        store.clone(),
        registry(extractors.clone()),
    )
    .unwrap();

    let mut ids = Vec::new();
    for i in 0..5 {
        let url = format!("https://example.com/{}", i);
        ids.push(
            archivist
                .submit(&url, vec![], ArchiveOptions::default())
                .await
                .unwrap(),
        );
    }

    let first = archivist.orchestrator();
    let second = archivist.orchestrator();
    let (a, b) = tokio::join!(first.run_until_idle(DEADLINE), second.run_until_idle(DEADLINE));
    a.unwrap();
    b.unwrap();

    for id in &ids {
        let snapshot = archivist.get_status(id).await.unwrap();
        assert_eq!(snapshot.link.status, LinkStatus::Sealed);
        assert_eq!(snapshot.jobs.len(), 3);
        for job in &snapshot.jobs {
            assert_eq!(job.retries, 1, "{} ran more than once", job.id);
            assert_eq!(statuses(&snapshot.history, &job.extractor).len(), 1);
        }
    }
    for extractor in &extractors {
        assert_eq!(extractor.runs(), ids.len());
    }
}

#[tokio::test]
async fn test_rearchive_skips_existing_artifacts() {
    let dir = tempdir().unwrap();
    let extractors = vec![Scripted::ok("a"), Scripted::ok("b")];
    let archivist = memory_archivist(fast_settings(dir.path()), extractors.clone());

    let id = archivist
        .submit("https://example.com/", vec![], ArchiveOptions::default())
        .await
        .unwrap();
    let orchestrator = archivist.orchestrator();
    orchestrator.run_until_idle(DEADLINE).await.unwrap();

    // Only a sealed link can be re-queued.
    archivist.rearchive(&id, false).await.unwrap();
    assert!(matches!(
        archivist.rearchive(&id, false).await,
        Err(ArchiveError::InProgress(_))
    ));
    orchestrator.run_until_idle(DEADLINE).await.unwrap();

    let snapshot = archivist.get_status(&id).await.unwrap();
    assert_eq!(snapshot.link.status, LinkStatus::Sealed);
    assert_eq!(
        statuses(&snapshot.history, "a"),
        vec![HistoryStatus::Succeeded, HistoryStatus::Skipped]
    );
    assert!(snapshot.jobs.iter().all(|j| j.status == JobStatus::Succeeded));
    assert_eq!(snapshot.latest.get("a").map(String::as_str), Some("a.txt"));
    for extractor in &extractors {
        assert_eq!(extractor.runs(), 1);
    }

    archivist.rearchive(&id, true).await.unwrap();
    orchestrator.run_until_idle(DEADLINE).await.unwrap();
    let snapshot = archivist.get_status(&id).await.unwrap();
    assert_eq!(
        statuses(&snapshot.history, "a"),
        vec![
            HistoryStatus::Succeeded,
            HistoryStatus::Skipped,
            HistoryStatus::Succeeded
        ]
    );
    for extractor in &extractors {
        assert_eq!(extractor.runs(), 2);
    }
}

#[tokio::test]
async fn test_only_option_limits_jobs() {
    let dir = tempdir().unwrap();
    let archivist = memory_archivist(
        fast_settings(dir.path()),
        vec![Scripted::ok("a"), Scripted::ok("b"), Scripted::ok("c")],
    );

    let options = ArchiveOptions {
        overwrite: false,
        only: vec!["b".into()],
    };
    let id = archivist
        .submit("https://example.com/", vec![], options)
        .await
        .unwrap();
    archivist.orchestrator().run_until_idle(DEADLINE).await.unwrap();

    let snapshot = archivist.get_status(&id).await.unwrap();
    let names: Vec<&str> = snapshot.jobs.iter().map(|j| j.extractor.as_str()).collect();
    assert_eq!(names, vec!["b"]);
    assert_eq!(snapshot.link.status, LinkStatus::Sealed);
}

#[tokio::test]
async fn test_identifiers_are_stable() {
    let dir = tempdir().unwrap();
    let archivist = memory_archivist(fast_settings(dir.path()), vec![Scripted::ok("a")]);

    let id = archivist
        .submit("https://example.com/#section", vec!["x".into()], ArchiveOptions::default())
        .await
        .unwrap();
    let again = archivist
        .submit("https://example.com/", vec!["y".into()], ArchiveOptions::default())
        .await
        .unwrap();
    assert_eq!(id, again);

    let orchestrator = archivist.orchestrator();
    orchestrator.run_until_idle(DEADLINE).await.unwrap();
    let before = archivist.get_status(&id).await.unwrap();
    assert_eq!(before.link.tags, vec!["x".to_string(), "y".to_string()]);

    archivist.rearchive(&id, true).await.unwrap();
    orchestrator.run_until_idle(DEADLINE).await.unwrap();
    let after = archivist.get_status(&id).await.unwrap();
    assert_eq!(after.link.id, before.link.id);
    assert_eq!(after.jobs[0].id, before.jobs[0].id);

    let edited = archivist
        .edit_link(
            &id,
            LinkEdit {
                title: Some("Example".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.id, id);

    let moved = archivist
        .edit_link(
            &id,
            LinkEdit {
                url: Some("https://other.example/".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(moved, Err(ArchiveError::IdentifierConflict(_))));
    let unchanged = archivist.get_status(&id).await.unwrap();
    assert_eq!(unchanged.link.url, "https://example.com/");
}

#[tokio::test]
async fn test_sqlite_store_runs_end_to_end() {
    let dir = tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    let archivist = Archivist::with_store(
        fast_settings(dir.path()),
        store,
        registry(vec![
            Scripted::ok("a"),
            Scripted::failing("b", vec![ExtractorError::RateLimited]),
        ]),
    )
    .unwrap();

    let id = archivist
        .submit("https://example.com/", vec![], ArchiveOptions::default())
        .await
        .unwrap();
    let report = archivist.orchestrator().run_until_idle(DEADLINE).await.unwrap();
    assert!(report.settled());

    let snapshot = archivist.get_status(&id).await.unwrap();
    assert_eq!(snapshot.link.status, LinkStatus::Sealed);
    assert_eq!(
        statuses(&snapshot.history, "b"),
        vec![HistoryStatus::Failed, HistoryStatus::Succeeded]
    );
    assert_eq!(snapshot.latest.len(), 2);
    let listed = archivist
        .list_links(Some(LinkStatus::Sealed), 10)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}
