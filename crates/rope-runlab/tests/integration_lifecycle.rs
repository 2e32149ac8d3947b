//! Integration tests for the run engine
//!
//! These tests drive runs by hand on a manual clock and verify lifecycle
//! transitions, ingestion policy, metrics and the export views.

use rope_runlab::*;
use std::sync::Arc;
use std::time::Duration;

fn engine() -> (RunEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let engine = RunEngine::with_clock(EngineConfig::development(), clock.clone()).unwrap();
    (engine, clock)
}

fn config(name: &str, duration_secs: u64) -> RunConfig {
    RunConfig {
        name: name.to_string(),
        duration_secs,
        target_rate_per_sec: 2,
        concurrency: 1,
        target: "https://dcscan.io/api/v1/health".to_string(),
        ..Default::default()
    }
}

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_twenty_successes_complete_the_run() {
        let (engine, clock) = engine();
        let id = engine.create_run(config("steady", 10)).unwrap();
        engine.start(id).unwrap();

        for i in 1..=20 {
            clock.advance(Duration::from_millis(500));
            let receipt = engine
                .ingest(id, ProbeOutcome::success(format!("request {}", i)))
                .unwrap();
            if i < 20 {
                assert_eq!(receipt.state, RunState::Running);
            }
        }

        let run = engine.get_run(id).unwrap();
        assert_eq!(run.state, RunState::Completed);
        assert_eq!(run.progress_fraction, 1.0);
        assert_eq!(run.aggregate.total_events, 20);
        assert_eq!(run.aggregate.success_rate_percent, 100.0);
        assert_eq!(run.aggregate.observed_throughput_per_sec, 2.0);
        assert!(run.ended_at.is_some());
    }

    #[test]
    fn test_silent_run_completes_on_tick() {
        let (engine, clock) = engine();
        let id = engine.create_run(config("silent", 5)).unwrap();
        engine.start(id).unwrap();

        clock.advance(Duration::from_secs(4));
        assert_eq!(engine.tick(id).unwrap(), RunState::Running);

        clock.advance(Duration::from_secs(1));
        assert_eq!(engine.tick(id).unwrap(), RunState::Completed);

        let run = engine.get_run(id).unwrap();
        assert_eq!(run.aggregate.total_events, 0);
        assert_eq!(run.progress_fraction, 1.0);
        assert_eq!(engine.active_runs(), 0);
    }

    #[test]
    fn test_tick_all_reports_completions() {
        let (engine, clock) = engine();
        let short = engine.create_run(config("short", 2)).unwrap();
        let long = engine.create_run(config("long", 20)).unwrap();
        engine.start(short).unwrap();
        engine.start(long).unwrap();

        clock.advance(Duration::from_secs(3));
        assert_eq!(engine.tick_all().unwrap(), 1);
        assert_eq!(engine.get_run(short).unwrap().state, RunState::Completed);
        assert_eq!(engine.get_run(long).unwrap().state, RunState::Running);
    }

    #[test]
    fn test_pause_rejects_and_freezes_progress() {
        let (engine, clock) = engine();
        let id = engine.create_run(config("pausable", 10)).unwrap();
        engine.start(id).unwrap();

        clock.advance(Duration::from_secs(2));
        engine.ingest(id, ProbeOutcome::success("before pause")).unwrap();
        engine.pause(id).unwrap();
        assert_eq!(engine.get_run(id).unwrap().progress_fraction, 0.2);

        clock.advance(Duration::from_secs(30));
        let err = engine.ingest(id, ProbeOutcome::success("while paused")).unwrap_err();
        assert!(matches!(err, EngineError::Rejected { state: RunState::Paused, .. }));
        assert!(err.is_retryable());
        assert_eq!(engine.tick(id).unwrap(), RunState::Paused);

        let paused = engine.get_run(id).unwrap();
        assert_eq!(paused.progress_fraction, 0.2);
        assert_eq!(paused.log.len(), 1);

        engine.resume(id).unwrap();
        clock.advance(Duration::from_secs(1));
        let receipt = engine.ingest(id, ProbeOutcome::success("after resume")).unwrap();
        assert_eq!(receipt.progress_fraction, 0.3);
        assert_eq!(receipt.sequence, 1);
    }

    #[test]
    fn test_illegal_transitions() {
        let (engine, _) = engine();
        let id = engine.create_run(config("strict", 10)).unwrap();

        assert!(matches!(
            engine.pause(id),
            Err(EngineError::IllegalState { from: RunState::Draft, action: Transition::Pause, .. })
        ));
        assert!(matches!(
            engine.resume(id),
            Err(EngineError::IllegalState { action: Transition::Resume, .. })
        ));

        engine.start(id).unwrap();
        assert!(matches!(
            engine.start(id),
            Err(EngineError::IllegalState { from: RunState::Running, .. })
        ));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (engine, _) = engine();
        let id = engine.create_run(config("stoppable", 10)).unwrap();
        engine.start(id).unwrap();

        assert_eq!(engine.stop(id).unwrap(), RunState::Stopped);
        assert_eq!(engine.stop(id).unwrap(), RunState::Stopped);
        assert_eq!(engine.telemetry().active_runs.get(), 0);
    }

    #[test]
    fn test_stop_on_completed_run_reports_completed() {
        let (engine, clock) = engine();
        let id = engine.create_run(config("done", 1)).unwrap();
        engine.start(id).unwrap();
        clock.advance(Duration::from_secs(1));
        engine.tick(id).unwrap();

        assert_eq!(engine.stop(id).unwrap(), RunState::Completed);
    }

    #[test]
    fn test_unknown_run() {
        let (engine, _) = engine();
        let id = RunId::new();

        assert!(matches!(engine.start(id), Err(EngineError::NotFound(missing)) if missing == id));
        assert!(matches!(engine.get_run(id), Err(EngineError::NotFound(_))));
        assert!(matches!(
            engine.ingest(id, ProbeOutcome::success("x")),
            Err(EngineError::NotFound(_))
        ));
    }
}

mod registry_tests {
    use super::*;

    #[test]
    fn test_create_reports_every_violation() {
        let (engine, _) = engine();
        let err = engine
            .create_run(RunConfig {
                name: String::new(),
                duration_secs: 10,
                ramp_up_secs: 10,
                concurrency: 0,
                ..config("ignored", 10)
            })
            .unwrap_err();

        let EngineError::Validation(validation) = err else {
            panic!("expected validation error");
        };
        assert!(validation.has_field("name"));
        assert!(validation.has_field("ramp_up_secs"));
        assert!(validation.has_field("concurrency"));
    }

    #[test]
    fn test_duplicate_name_until_terminal() {
        let (engine, _) = engine();
        let first = engine.create_run(config("nightly", 10)).unwrap();

        assert!(matches!(
            engine.create_run(config("nightly", 10)),
            Err(EngineError::DuplicateName(name)) if name == "nightly"
        ));

        engine.stop(first).unwrap();
        let second = engine.create_run(config("nightly", 10)).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_capacity_counts_paused_runs() {
        let (engine, _) = engine();
        let limit = engine.config().max_active_runs;
        let ids: Vec<RunId> = (0..=limit)
            .map(|i| engine.create_run(config(&format!("run-{}", i), 10)).unwrap())
            .collect();

        for id in &ids[..limit] {
            engine.start(*id).unwrap();
        }
        engine.pause(ids[0]).unwrap();

        assert!(matches!(
            engine.start(ids[limit]),
            Err(EngineError::Capacity { limit: l }) if l == limit
        ));
        // The rejected run stays in Draft
        assert_eq!(engine.get_run(ids[limit]).unwrap().state, RunState::Draft);

        // Resume never competes for a slot
        engine.resume(ids[0]).unwrap();

        engine.stop(ids[1]).unwrap();
        engine.start(ids[limit]).unwrap();
        assert_eq!(engine.active_runs(), limit);
    }

    #[test]
    fn test_remove_only_terminal_runs() {
        let (engine, _) = engine();
        let id = engine.create_run(config("removable", 10)).unwrap();
        engine.start(id).unwrap();

        assert!(matches!(
            engine.remove_run(id),
            Err(EngineError::IllegalState { action: Transition::Remove, .. })
        ));

        engine.stop(id).unwrap();
        engine.remove_run(id).unwrap();
        assert!(matches!(engine.get_run(id), Err(EngineError::NotFound(_))));
        assert!(matches!(engine.remove_run(id), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_list_runs_in_creation_order() {
        let (engine, _) = engine();
        let a = engine.create_run(config("api-a", 10)).unwrap();
        let b = engine.create_run(config("smtp-b", 10)).unwrap();
        let c = engine.create_run(config("api-c", 10)).unwrap();
        engine.start(b).unwrap();

        let all: Vec<RunId> = engine.list_runs(None).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(all, vec![a, b, c]);

        let drafts = RunListFilter {
            states: Some(vec![RunState::Draft]),
            name_contains: Some("api".to_string()),
        };
        let filtered: Vec<RunId> = engine
            .list_runs(Some(&drafts))
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(filtered, vec![a, c]);
    }

    #[test]
    fn test_engines_are_isolated() {
        let (first, _) = engine();
        let (second, _) = engine();
        first.create_run(config("shared-name", 10)).unwrap();

        assert!(second.create_run(config("shared-name", 10)).is_ok());
        assert_eq!(first.list_runs(None).unwrap().len(), 1);
    }
}

mod ingestion_tests {
    use super::*;

    #[test]
    fn test_arrival_order_not_timestamp_order() {
        let (engine, clock) = engine();
        let id = engine.create_run(config("skewed", 60)).unwrap();
        engine.start(id).unwrap();
        let now = clock.now();

        engine
            .ingest(id, ProbeOutcome::success("late clock").at(now + chrono::Duration::seconds(30)))
            .unwrap();
        engine
            .ingest(id, ProbeOutcome::success("early clock").at(now - chrono::Duration::seconds(30)))
            .unwrap();

        let run = engine.get_run(id).unwrap();
        let details: Vec<&str> = run.log.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(details, vec!["late clock", "early clock"]);
        assert_eq!(run.log[1].sequence, 1);
    }

    #[test]
    fn test_in_progress_outcomes() {
        let (engine, _) = engine();
        let id = engine.create_run(config("smtp", 60)).unwrap();
        engine.start(id).unwrap();

        engine.ingest(id, ProbeOutcome::info("connecting", "EHLO")).unwrap();
        engine.ingest(id, ProbeOutcome::info("sending", "DATA")).unwrap();
        engine.ingest(id, ProbeOutcome::success("250 OK")).unwrap();

        let metrics = engine.get_run(id).unwrap().aggregate;
        assert_eq!(metrics.total_events, 3);
        assert_eq!(metrics.in_progress_count, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.success_rate_percent, 100.0);
    }

    #[test]
    fn test_concurrent_ingest_keeps_counts_consistent() {
        let (engine, _) = engine();
        let id = engine.create_run(config("parallel", 600)).unwrap();
        engine.start(id).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let outcome = if i % 5 == 0 {
                            ProbeOutcome::failure(format!("t{} #{}", t, i))
                        } else {
                            ProbeOutcome::success(format!("t{} #{}", t, i))
                        };
                        loop {
                            match engine.ingest(id, outcome.clone()) {
                                Ok(_) => break,
                                Err(EngineError::Busy(_)) => continue,
                                Err(e) => panic!("unexpected error: {e}"),
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let run = engine.get_run(id).unwrap();
        assert_eq!(run.log.len(), 200);
        assert_eq!(run.aggregate.total_events, 200);
        assert_eq!(run.aggregate.failure_count, 40);
        assert_eq!(run.aggregate.success_count, 160);
        let sequences: Vec<u64> = run.log.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (0..200).collect::<Vec<u64>>());
    }

    #[test]
    fn test_notifications_follow_run() {
        let (engine, clock) = engine();
        let mut rx = engine.subscribe();
        let id = engine.create_run(config("watched", 10)).unwrap();
        engine.start(id).unwrap();
        clock.advance(Duration::from_secs(1));
        engine.pause(id).unwrap();
        engine.resume(id).unwrap();
        engine.stop(id).unwrap();

        let received: Vec<RunNotification> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(received.iter().all(|n| n.run_id() == id));
        assert!(matches!(received[2], RunNotification::RunPaused { progress, .. } if progress == 0.1));
        assert_eq!(received.last().and_then(|n| n.terminal_state()), Some(RunState::Stopped));
    }
}

mod export_tests {
    use super::*;

    fn finished_run(engine: &RunEngine, clock: &ManualClock) -> RunId {
        let id = engine.create_run(config("exported", 10)).unwrap();
        engine.start(id).unwrap();
        for i in 0..6u64 {
            clock.advance(Duration::from_millis(250));
            let outcome = if i % 3 == 2 {
                ProbeOutcome::failure("503 Service Unavailable").with_tag("status_code", "503")
            } else {
                ProbeOutcome::success("200 OK").with_tag("status_code", "200")
            };
            engine.ingest(id, outcome.with_latency(10 + i * 7).with_tag("region", "eu")).unwrap();
        }
        engine.stop(id).unwrap();
        id
    }

    #[test]
    fn test_json_round_trip() {
        let (engine, clock) = engine();
        let id = finished_run(&engine, &clock);
        let run = engine.get_run(id).unwrap();

        let bytes = engine.export(id, ExportFormat::Json).unwrap();
        let parsed = parse_structured(&bytes).unwrap();

        assert_eq!(parsed.run.aggregate, run.aggregate);
        assert_eq!(parsed.run.config, run.config);
        assert_eq!(parsed.run.state, RunState::Stopped);
        let sequences: Vec<u64> = parsed.run.log.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(parsed.latency.samples, 6);
    }

    #[test]
    fn test_csv_rows_and_tag_columns() {
        let (engine, clock) = engine();
        let id = finished_run(&engine, &clock);

        let bytes = engine.export(id, ExportFormat::Csv).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();

        let header = lines.next().unwrap();
        assert!(header.starts_with("timestamp,kind,outcome_status,latency_millis,detail"));
        assert!(header.ends_with("tag.region,tag.status_code"));
        assert_eq!(lines.count(), 6);
    }

    #[test]
    fn test_unsupported_format() {
        let err = "xml".parse::<ExportFormat>().unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(f) if f == "xml"));
    }

    #[test]
    fn test_query_views_snapshot() {
        let (engine, clock) = engine();
        let id = finished_run(&engine, &clock);

        let all = engine.query(id, &EventFilter::new()).unwrap();
        assert_eq!(all.len(), 6);
        assert!(all.windows(2).all(|w| w[0].sequence < w[1].sequence));

        let failures = engine
            .query(id, &EventFilter::new().kinds([EventKind::Error]).tag("status_code", "503"))
            .unwrap();
        assert_eq!(failures.len(), 2);

        let text = engine.query(id, &EventFilter::new().text("service")).unwrap();
        assert_eq!(text.len(), 2);
    }

    #[test]
    fn test_latency_percentiles() {
        let (engine, clock) = engine();
        let id = finished_run(&engine, &clock);

        let latency = engine.latency_percentiles(id).unwrap();
        assert_eq!(latency.samples, 6);
        assert!(latency.p50_millis >= 10 && latency.p50_millis <= 45);
        assert!(latency.p99_millis >= latency.p50_millis);
    }
}

mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use std::result::Result;

    fn status() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just("success"),
            Just("failed"),
            Just("timeout"),
            Just("connecting"),
            Just("queued"),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_counters_never_exceed_total(statuses in prop::collection::vec(status(), 0..80)) {
            let (engine, clock) = engine();
            let id = engine.create_run(config("prop", 3600)).unwrap();
            engine.start(id).unwrap();

            for status in &statuses {
                clock.advance(Duration::from_millis(10));
                engine.ingest(id, ProbeOutcome::info(*status, "")).unwrap();

                let metrics = engine.get_run(id).unwrap().aggregate;
                prop_assert!(metrics.success_count + metrics.failure_count <= metrics.total_events);
                prop_assert!(metrics.in_progress_count <= metrics.total_events);
                prop_assert!((0.0..=100.0).contains(&metrics.success_rate_percent));
            }

            let run = engine.get_run(id).unwrap();
            prop_assert_eq!(run.log.len() as u64, run.aggregate.total_events);
        }
    }
}
