// tests/property/scheduler.rs

use std::collections::BTreeSet;

use proptest::prelude::*;

use cycler::pool::TaskPool;
use cycler::task::{TaskId, TaskStatus};
use cycler_test_utils::builders::{TaskConfigBuilder, WorkflowConfigBuilder};
use cycler_test_utils::harness::{pool_for, t0};

/// What the test driver does between scheduling rounds.
#[derive(Debug, Clone, Copy)]
enum Action {
    /// Queue ready tasks and submit what the queues release.
    Schedule,
    /// An active job starts running.
    Start(usize),
    /// An active job succeeds.
    Finish(usize),
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        2 => Just(Action::Schedule),
        1 => any::<usize>().prop_map(Action::Start),
        2 => any::<usize>().prop_map(Action::Finish),
    ]
}

fn set_status(pool: &mut TaskPool, id: &TaskId, status: TaskStatus) {
    if let Some(itask) = pool.get_task_mut(id) {
        itask.state.reset(Some(status), None);
    }
}

/// Submit everything the queues release, as the job manager would.
fn schedule(pool: &mut TaskPool) -> Vec<TaskId> {
    let ready = pool.get_ready_tasks(t0());
    for id in &ready {
        set_status(pool, id, TaskStatus::Submitted);
    }
    ready
}

fn finish(pool: &mut TaskPool, pick: usize) {
    let active = pool.task_ids_with(&TaskStatus::ACTIVE);
    if active.is_empty() {
        return;
    }
    let id = active[pick % active.len()].clone();
    set_status(pool, &id, TaskStatus::Succeeded);
    pool.spawn_on_output(&id, "succeeded", t0());
    pool.queue_finished(&id);
    pool.remove_finished_tasks();
}

fn start(pool: &mut TaskPool, pick: usize) {
    let submitted = pool.task_ids_with(&[TaskStatus::Submitted]);
    if let Some(id) = submitted.get(pick % submitted.len().max(1)).cloned() {
        set_status(pool, &id, TaskStatus::Running);
    }
}

proptest! {
    #[test]
    fn active_queue_members_never_exceed_the_limit(
        n_tasks in 1..8usize,
        limit in 1..4usize,
        actions in proptest::collection::vec(action_strategy(), 1..60),
    ) {
        let names: Vec<String> = (0..n_tasks).map(|i| format!("t{i}")).collect();
        let members: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut builder = WorkflowConfigBuilder::new()
            .final_point(1)
            .with_queue("q", limit, &members);
        for name in &names {
            builder = builder.with_task(name, TaskConfigBuilder::new());
        }
        let mut pool = pool_for(builder.build());
        pool.load_from_point(t0());
        pool.release_runahead_tasks(t0());

        for action in actions {
            match action {
                Action::Schedule => {
                    schedule(&mut pool);
                }
                Action::Start(pick) => start(&mut pool, pick),
                Action::Finish(pick) => finish(&mut pool, pick),
            }
            let active = pool.task_ids_with(&TaskStatus::ACTIVE).len();
            prop_assert!(active <= limit, "{active} active with limit {limit}");
        }
    }

    #[test]
    fn released_points_stay_within_the_runahead_limit(
        final_point in 1..10i64,
        max_active in 1..4usize,
        actions in proptest::collection::vec(action_strategy(), 1..80),
    ) {
        let config = WorkflowConfigBuilder::new()
            .final_point(final_point)
            .max_active_cycle_points(max_active)
            .with_task("foo", TaskConfigBuilder::new())
            .with_task("bar", TaskConfigBuilder::new().after("foo"))
            .build();
        let mut pool = pool_for(config);
        pool.load_from_point(t0());

        for action in actions {
            let before: BTreeSet<TaskId> = pool.runahead_ids().into_iter().collect();
            let limit = pool.compute_runahead();
            pool.release_runahead_tasks(t0());
            let after: BTreeSet<TaskId> = pool.runahead_ids().into_iter().collect();

            for released in before.difference(&after) {
                match limit {
                    Some(limit) => prop_assert!(
                        released.point <= limit,
                        "{released} released beyond limit {limit}"
                    ),
                    None => prop_assert!(false, "{released} released with no limit"),
                }
            }
            if let Some(limit) = limit {
                for kept in before.intersection(&after) {
                    prop_assert!(kept.point > limit, "{kept} held back within limit {limit}");
                }
            }
            for itask in pool.get_all_tasks() {
                prop_assert!(itask.identity.point.value() <= final_point);
            }

            match action {
                Action::Schedule => {
                    schedule(&mut pool);
                }
                Action::Start(pick) => start(&mut pool, pick),
                Action::Finish(pick) => finish(&mut pool, pick),
            }
        }
    }
}
