// tests/pool_removal.rs

use cycler::pool::TaskPool;
use cycler::task::TaskStatus;
use cycler_test_utils::builders::{TaskConfigBuilder, WorkflowConfigBuilder};
use cycler_test_utils::harness::{all_ids, id, pool_for, t0};
use cycler_test_utils::init_tracing;

/// `up` feeds `down`; `other` is independent. All at point 1.
fn up_down_other() -> TaskPool {
    let config = WorkflowConfigBuilder::new()
        .final_point(1)
        .with_task("up", TaskConfigBuilder::new())
        .with_task("down", TaskConfigBuilder::new().after("up"))
        .with_task("other", TaskConfigBuilder::new())
        .build();
    let mut pool = pool_for(config);
    pool.load_from_point(t0());
    pool.spawn_on_output(&id("up", 1), "succeeded", t0());
    pool.release_runahead_tasks(t0());
    pool
}

fn set_status(pool: &mut TaskPool, name: &str, status: TaskStatus) {
    pool.get_task_mut(&id(name, 1))
        .expect("task in pool")
        .state
        .reset(Some(status), None);
}

fn finish(pool: &mut TaskPool, name: &str, status: TaskStatus) {
    set_status(pool, name, status);
    pool.queue_finished(&id(name, 1));
}

#[test]
fn nothing_queued_means_nothing_removed() {
    init_tracing();
    let mut pool = up_down_other();

    assert!(!pool.remove_finished_tasks());
    assert_eq!(all_ids(&pool), vec!["1/down", "1/other", "1/up"]);
}

#[test]
fn stalled_pool_keeps_finished_instances() {
    init_tracing();
    let mut pool = up_down_other();
    set_status(&mut pool, "down", TaskStatus::Waiting);
    finish(&mut pool, "up", TaskStatus::Failed);
    finish(&mut pool, "other", TaskStatus::Succeeded);

    assert!(!pool.remove_finished_tasks());

    assert_eq!(all_ids(&pool), vec!["1/down", "1/other", "1/up"]);
    assert_eq!(pool.finished_queue(), &[id("up", 1), id("other", 1)]);
}

#[test]
fn child_waits_for_its_parent_before_removal() {
    init_tracing();
    let mut pool = up_down_other();
    set_status(&mut pool, "up", TaskStatus::Running);
    set_status(&mut pool, "other", TaskStatus::Running);
    finish(&mut pool, "down", TaskStatus::Succeeded);

    // up is still running, so down stays for a later pass.
    assert!(!pool.remove_finished_tasks());
    assert!(pool.get_task(&id("down", 1)).is_some());
    assert_eq!(pool.finished_queue(), &[id("down", 1)]);

    finish(&mut pool, "up", TaskStatus::Succeeded);
    assert!(pool.remove_finished_tasks());

    assert_eq!(all_ids(&pool), vec!["1/other"]);
    assert!(pool.finished_queue().is_empty());
}
