// tests/pool_runahead.rs

use cycler::cycling::CyclePoint;
use cycler::task::{TaskProxy, TaskStatus};
use cycler_test_utils::builders::{TaskConfigBuilder, WorkflowConfigBuilder};
use cycler_test_utils::harness::{all_ids, id, pool_for, t0};
use cycler_test_utils::init_tracing;

fn runahead_names(pool: &cycler::pool::TaskPool) -> Vec<String> {
    pool.runahead_ids().iter().map(|i| i.to_string()).collect()
}

#[test]
fn count_limit_releases_the_first_three_points_only() {
    init_tracing();
    let config = WorkflowConfigBuilder::new()
        .final_point(5)
        .max_active_cycle_points(3)
        .with_task("foo", TaskConfigBuilder::new())
        .build();
    let mut pool = pool_for(config);
    for point in 1..=5 {
        pool.spawn(None, "foo", CyclePoint::new(point), None, false, t0());
    }

    assert!(pool.release_runahead_tasks(t0()));

    for point in 1..=3 {
        assert!(!pool.is_in_runahead(&id("foo", point)), "foo.{point} should be released");
        assert!(pool.get_task(&id("foo", point)).is_some());
    }
    assert_eq!(runahead_names(&pool), vec!["4/foo", "5/foo"]);
}

#[test]
fn waiting_main_pool_does_not_advance_the_limit() {
    init_tracing();
    let config = WorkflowConfigBuilder::new()
        .max_active_cycle_points(3)
        .with_task("foo", TaskConfigBuilder::new())
        .build();
    let mut pool = pool_for(config);
    pool.load_from_point(t0());

    pool.release_runahead_tasks(t0());
    // foo.1 released, its successor auto-spawned into the runahead pool.
    assert_eq!(runahead_names(&pool), vec!["2/foo"]);

    // Nothing in the main pool is under way yet.
    assert!(!pool.release_runahead_tasks(t0()));
    assert_eq!(runahead_names(&pool), vec!["2/foo"]);

    // Once foo.1 is queued, point 1 is the base and foo.2 may go.
    let ready = pool.get_ready_tasks(t0());
    assert_eq!(ready, vec![id("foo", 1)]);
    assert!(pool.release_runahead_tasks(t0()));
    assert!(!pool.is_in_runahead(&id("foo", 2)));
    assert_eq!(runahead_names(&pool), vec!["3/foo"]);
}

#[test]
fn future_trigger_extension_is_clipped_to_the_stop_point() {
    init_tracing();
    let config = WorkflowConfigBuilder::new()
        .max_active_cycle_points(5)
        .stop_point(6)
        .with_task("bar", TaskConfigBuilder::new())
        .with_task("foo", TaskConfigBuilder::new().after("bar[P2]"))
        .build();
    let mut pool = pool_for(config);
    pool.spawn(None, "foo", CyclePoint::new(1), None, false, t0());
    pool.spawn(None, "foo", CyclePoint::new(5), None, false, t0());

    // foo.5 waits on bar.7, beyond the stop point.
    assert!(pool.get_task(&id("foo", 5)).map(|t| t.state.is_held).unwrap_or(false));

    pool.release_runahead_tasks(t0());
    assert!(!pool.is_in_runahead(&id("foo", 1)));
    assert_eq!(pool.max_future_offset().map(|o| o.value()), Some(2));

    pool.get_task_mut(&id("foo", 1))
        .expect("foo.1 in pool")
        .state
        .reset(Some(TaskStatus::Running), None);

    // Five points from 1 reach 5; the +2 future offset would give 7.
    assert_eq!(pool.compute_runahead(), Some(CyclePoint::new(6)));
}

#[test]
fn interval_limit_is_measured_from_the_base_point() {
    init_tracing();
    let config = WorkflowConfigBuilder::new()
        .runahead_limit("P2")
        .with_task("foo", TaskConfigBuilder::new())
        .build();
    let mut pool = pool_for(config);
    pool.load_from_point(t0());
    pool.release_runahead_tasks(t0());
    pool.get_task_mut(&id("foo", 1))
        .expect("foo.1 in pool")
        .state
        .reset(Some(TaskStatus::Running), None);

    // Auto-spawned successors are released one round later each.
    for _ in 0..4 {
        pool.release_runahead_tasks(t0());
    }

    assert_eq!(pool.compute_runahead(), Some(CyclePoint::new(3)));
    assert_eq!(runahead_names(&pool), vec!["4/foo"]);
    assert_eq!(all_ids(&pool), vec!["1/foo", "2/foo", "3/foo", "4/foo"]);
}

#[test]
fn future_trigger_offset_does_not_extend_an_interval_limit() {
    init_tracing();
    let config = WorkflowConfigBuilder::new()
        .runahead_limit("P2")
        .with_task("bar", TaskConfigBuilder::new())
        .with_task("foo", TaskConfigBuilder::new().after("bar[P2]"))
        .build();
    let mut pool = pool_for(config);
    pool.spawn(None, "foo", CyclePoint::new(1), None, false, t0());
    pool.release_runahead_tasks(t0());
    assert_eq!(pool.max_future_offset().map(|o| o.value()), Some(2));
    pool.get_task_mut(&id("foo", 1))
        .expect("foo.1 in pool")
        .state
        .reset(Some(TaskStatus::Running), None);

    assert_eq!(pool.compute_runahead(), Some(CyclePoint::new(3)));
}

#[test]
fn finished_instances_are_released_regardless_of_the_limit() {
    init_tracing();
    let config = WorkflowConfigBuilder::new()
        .max_active_cycle_points(1)
        .with_task("foo", TaskConfigBuilder::new())
        .with_task("bar", TaskConfigBuilder::new().after("foo"))
        .build();
    let mut pool = pool_for(config.clone());
    let tdef = config.taskdefs["bar"].clone();
    let done = TaskProxy::new(tdef, CyclePoint::new(9), &config, TaskStatus::Succeeded, false, "f1");
    pool.add_to_runahead_pool(done, false, t0());
    pool.spawn(None, "foo", CyclePoint::new(1), None, false, t0());

    assert!(pool.release_runahead_tasks(t0()));

    assert!(!pool.is_in_runahead(&id("bar", 9)));
    assert!(!pool.is_in_runahead(&id("foo", 1)));
}

#[test]
fn beyond_final_point_is_never_spawned() {
    init_tracing();
    let config = WorkflowConfigBuilder::new()
        .final_point(2)
        .with_task("foo", TaskConfigBuilder::new())
        .build();
    let mut pool = pool_for(config);
    pool.load_from_point(t0());
    for _ in 0..3 {
        pool.release_runahead_tasks(t0());
        pool.get_ready_tasks(t0());
    }

    assert_eq!(all_ids(&pool), vec!["1/foo", "2/foo"]);
    assert!(pool.spawn(None, "foo", CyclePoint::new(3), None, false, t0()).is_none());
}
