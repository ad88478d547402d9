//! Supervisor scenarios driven tick by tick against scripted doubles.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FnFactory, ScriptedPayload, ScriptedScheduler, context, fill, idle, job};
use procflow_sched::{
    CategorySource, DataCategory, DataReadiness, Job, JobKey, JobStatus, LocalTracker,
    OverallStatus, RemoteJobState, RunOutcome, SchedError, SetStatus, Supervisor, YearSet,
    build_year_sets, run_guarded,
};

#[tokio::test(start_paused = true)]
async fn test_dependent_job_waits_for_completed_sibling() {
    let dir = tempfile::tempdir().unwrap();
    let climo = ScriptedPayload::submits(100);
    let diags = ScriptedPayload::submits(200);
    let (c, d) = (Arc::clone(&climo), Arc::clone(&diags));
    let factory = FnFactory(move |set: &YearSet| {
        vec![
            job(set, "climo", c.clone()),
            job(set, "diags", d.clone()).depends_on("climo"),
        ]
    });

    let ctx = Arc::new(context(
        dir.path().join("state.txt"),
        build_year_sets(2000, 2001, 2),
        ScriptedScheduler::new(),
        factory,
    ));
    fill(&ctx.grid, 2000, 2001);
    let mut supervisor = Supervisor::new(Arc::clone(&ctx));

    assert_eq!(supervisor.tick().await, OverallStatus::StillRunning);
    assert_eq!(supervisor.dispatcher().pool().spawn_count(), 1);
    let set = &ctx.sets[0];
    assert_eq!(set.status().await, SetStatus::Running);

    idle().await;
    assert_eq!(set.job("climo").unwrap().status().await, JobStatus::Completed);
    assert_eq!(set.job("diags").unwrap().status().await, JobStatus::Valid);
    assert_eq!(diags.executions(), 0);

    supervisor.tick().await;
    assert_eq!(supervisor.dispatcher().pool().spawn_count(), 2);

    idle().await;
    assert_eq!(set.job("diags").unwrap().status().await, JobStatus::Completed);
    assert_eq!(supervisor.tick().await, OverallStatus::AllCompleted);
    assert_eq!(set.status().await, SetStatus::Completed);
    assert_eq!(climo.executions(), 1);
    assert_eq!(diags.executions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_remote_failure_fails_set_despite_completed_sibling() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = ScriptedScheduler::new();
    scheduler.script(
        7,
        [Some(RemoteJobState::Running), Some(RemoteJobState::Failed)],
    );
    let factory = FnFactory(|set: &YearSet| {
        vec![
            job(set, "climo", ScriptedPayload::already_complete()),
            job(set, "amwg", ScriptedPayload::submits(7)),
        ]
    });

    let ctx = Arc::new(context(
        dir.path().join("state.txt"),
        build_year_sets(1, 5, 5),
        scheduler,
        factory,
    ));
    fill(&ctx.grid, 1, 5);
    let mut supervisor = Supervisor::new(Arc::clone(&ctx));

    supervisor.tick().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    let set = &ctx.sets[0];
    let amwg = set.job("amwg").unwrap();
    let state = amwg.state().await;
    assert_eq!(state.status, JobStatus::Failed);
    assert!(state.end_time.is_some());
    assert_eq!(set.job("climo").unwrap().status().await, JobStatus::Completed);
    assert_eq!(set.status().await, SetStatus::Failed);
    assert_eq!(
        ctx.events.messages_for(&amwg.key).last().map(String::as_str),
        Some("Job 7 has failed")
    );
    assert_eq!(supervisor.tick().await, OverallStatus::OneOrMoreFailed);
}

#[tokio::test(start_paused = true)]
async fn test_already_complete_skips_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = ScriptedScheduler::new();
    let factory = FnFactory(|set: &YearSet| {
        vec![job(set, "climo", ScriptedPayload::already_complete())]
    });

    let ctx = Arc::new(context(
        dir.path().join("state.txt"),
        build_year_sets(1, 2, 2),
        Arc::clone(&scheduler),
        factory,
    ));
    fill(&ctx.grid, 1, 2);
    let mut supervisor = Supervisor::new(Arc::clone(&ctx));

    supervisor.tick().await;
    idle().await;

    assert_eq!(scheduler.queries(), 0);
    let climo = ctx.sets[0].job("climo").unwrap();
    assert_eq!(climo.status().await, JobStatus::Completed);
    assert_eq!(climo.state().await.remote_id, None);
    assert_eq!(supervisor.tick().await, OverallStatus::AllCompleted);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_ticks_spawn_no_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let payload = ScriptedPayload::needs_input();
    let p = Arc::clone(&payload);
    let factory = FnFactory(move |set: &YearSet| vec![job(set, "climo", p.clone())]);

    let ctx = Arc::new(context(
        dir.path().join("state.txt"),
        build_year_sets(1, 2, 2),
        ScriptedScheduler::new(),
        factory,
    ));
    fill(&ctx.grid, 1, 2);
    let mut supervisor = Supervisor::new(Arc::clone(&ctx));

    supervisor.tick().await;
    idle().await;
    supervisor.tick().await;
    supervisor.tick().await;

    assert_eq!(supervisor.dispatcher().pool().spawn_count(), 1);
    assert!(payload.executions() >= 1);
    assert_eq!(
        ctx.sets[0].job("climo").unwrap().status().await,
        JobStatus::WaitingOnInput
    );

    ctx.cancel_token().cancel();
    assert_eq!(supervisor.run().await, RunOutcome::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_sets_wait_for_primary_data() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FnFactory(|set: &YearSet| {
        vec![job(set, "climo", ScriptedPayload::already_complete())]
    });

    let ctx = Arc::new(context(
        dir.path().join("state.txt"),
        build_year_sets(2000, 2001, 2),
        ScriptedScheduler::new(),
        factory,
    ));
    fill(&ctx.grid, 2000, 2001);
    ctx.grid.set(&DataCategory::new("atm"), 2001, 12, DataReadiness::InTransit);
    let mut supervisor = Supervisor::new(Arc::clone(&ctx));

    supervisor.tick().await;
    assert_eq!(ctx.sets[0].status().await, SetStatus::PartialData);
    assert!(!ctx.sets[0].has_jobs());
    assert_eq!(supervisor.dispatcher().pool().spawn_count(), 0);

    ctx.grid.set(&DataCategory::new("atm"), 2001, 12, DataReadiness::DataReady);
    supervisor.tick().await;
    assert_eq!(supervisor.dispatcher().pool().spawn_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_to_completion_from_local_files() {
    let data = tempfile::tempdir().unwrap();
    for year in 1..=4 {
        for month in 1..=12 {
            let name = format!("case.cam.h0.{year:04}-{month:02}.nc");
            std::fs::write(data.path().join(name), b"history").unwrap();
        }
    }
    let out = tempfile::tempdir().unwrap();
    let state_path = out.path().join("run_state.txt");

    let scheduler = ScriptedScheduler::new();
    scheduler.script(
        10,
        [
            Some(RemoteJobState::Pending),
            Some(RemoteJobState::Running),
            Some(RemoteJobState::Completed),
        ],
    );
    let factory = FnFactory(|set: &YearSet| {
        let id = u64::from(set.set_number);
        vec![
            job(set, "climo", ScriptedPayload::submits(id * 10)),
            job(set, "amwg", ScriptedPayload::submits(id * 10 + 1)).depends_on("climo"),
            job(set, "e3sm_diags", ScriptedPayload::already_complete())
                .depends_on_all(["climo", "amwg"]),
        ]
    });

    let ctx = Arc::new(context(
        state_path.clone(),
        build_year_sets(1, 4, 2),
        scheduler,
        factory,
    ));
    let tracker = LocalTracker::new(
        Arc::clone(&ctx.grid),
        vec![CategorySource::dated("atm", data.path()).with_pattern("cam.h0")],
        4,
    );
    assert_eq!(tracker.scan().await, 48);

    let outcome = Supervisor::new(Arc::clone(&ctx)).run().await;
    assert_eq!(outcome, RunOutcome::Finished(OverallStatus::AllCompleted));

    for set in &ctx.sets {
        assert_eq!(set.status().await, SetStatus::Completed);
    }
    let state = std::fs::read_to_string(&state_path).unwrap();
    assert!(state.contains("Year_set 1: 1 - 2\nstatus: Completed\n"));
    assert!(state.contains("Year_set 2: 3 - 4\nstatus: Completed\n"));
    assert!(state.contains("  >   amwg -- 21: Completed\n"));
    assert!(state.contains("Submitted climo for year_set 2"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_set_does_not_halt_others() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FnFactory(|set: &YearSet| {
        let valid = set.set_number != 1;
        vec![job(
            set,
            "climo",
            ScriptedPayload::with(procflow_sched::ExecuteOutcome::AlreadyComplete, valid),
        )]
    });

    let ctx = Arc::new(context(
        dir.path().join("state.txt"),
        build_year_sets(1, 4, 2),
        ScriptedScheduler::new(),
        factory,
    ));
    fill(&ctx.grid, 1, 4);

    let outcome = Supervisor::new(Arc::clone(&ctx)).run().await;
    assert_eq!(outcome, RunOutcome::Finished(OverallStatus::OneOrMoreFailed));
    assert_eq!(ctx.sets[0].status().await, SetStatus::Failed);
    assert_eq!(ctx.sets[1].status().await, SetStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_run_writes_final_state() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.txt");
    let factory = FnFactory(|set: &YearSet| vec![job(set, "climo", ScriptedPayload::needs_input())]);

    let ctx = Arc::new(context(
        state_path.clone(),
        build_year_sets(1, 2, 2),
        ScriptedScheduler::new(),
        factory,
    ));
    fill(&ctx.grid, 1, 2);

    let task = tokio::spawn(Supervisor::new(Arc::clone(&ctx)).run());
    tokio::time::sleep(Duration::from_secs(25)).await;
    ctx.cancel_token().cancel();

    assert_eq!(task.await.unwrap(), RunOutcome::Cancelled);
    let state = std::fs::read_to_string(&state_path).unwrap();
    assert!(state.contains("  >   climo -- -: WaitingOnInput\n"));
}

#[tokio::test(start_paused = true)]
async fn test_factory_panic_still_writes_state() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.txt");
    let factory = FnFactory(|_: &YearSet| -> Vec<Job> { panic!("factory bug") });

    let ctx = Arc::new(context(
        state_path.clone(),
        build_year_sets(1, 2, 2),
        ScriptedScheduler::new(),
        factory,
    ));
    fill(&ctx.grid, 1, 2);

    let err = run_guarded(Arc::clone(&ctx)).await.unwrap_err();
    assert!(matches!(err, SchedError::Internal(ref msg) if msg.contains("panicked")));
    assert!(ctx.cancel_token().is_cancelled());
    let state = std::fs::read_to_string(&state_path).unwrap();
    assert!(state.contains("Year_set 1"));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_job_is_never_spawned() {
    let dir = tempfile::tempdir().unwrap();
    let payload = ScriptedPayload::submits(100);
    let p = Arc::clone(&payload);
    let factory = FnFactory(move |set: &YearSet| {
        vec![Job::invalid(JobKey::new(set.set_number, "climo"), p.clone())]
    });

    let ctx = Arc::new(context(
        dir.path().join("state.txt"),
        build_year_sets(1, 2, 2),
        ScriptedScheduler::new(),
        factory,
    ));
    fill(&ctx.grid, 1, 2);
    let mut supervisor = Supervisor::new(Arc::clone(&ctx));

    assert_eq!(supervisor.tick().await, OverallStatus::StillRunning);
    idle().await;
    assert_eq!(supervisor.tick().await, OverallStatus::StillRunning);

    let set = &ctx.sets[0];
    assert_eq!(set.status().await, SetStatus::DataReady);
    assert_eq!(supervisor.dispatcher().pool().spawn_count(), 0);
    assert_eq!(set.job("climo").unwrap().status().await, JobStatus::Invalid);
    assert_eq!(payload.executions(), 0);
}
