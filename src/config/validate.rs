// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::duration::parse_duration;
use crate::config::model::{RawWorkflowConfig, RuntimeSection};
use crate::config::platform::{platform_select_command, Platform, LOCALHOST};
use crate::config::runtime::RuntimeConfig;
use crate::config::workflow::{
    GlobalConfig, PointClock, QueueConfig, RunaheadLimit, WorkflowConfig, DEFAULT_QUEUE, ROOT_NAMESPACE,
};
use crate::cycling::{CyclePoint, IntegerSequence, Interval, SequenceRef};
use crate::errors::{Result, SchedulerError};
use crate::task::outputs::TaskOutputs;
use crate::task::{TaskDefinition, TriggerGroup, TriggerRef};

const DEFAULT_MAX_ACTIVE_CYCLE_POINTS: usize = 3;

impl TryFrom<RawWorkflowConfig> for WorkflowConfig {
    type Error = SchedulerError;

    fn try_from(raw: RawWorkflowConfig) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        let global = resolve_global(&raw)?;
        let (initial_point, final_point) = resolve_points(&raw)?;
        let runahead_limit = resolve_runahead(&raw)?;
        let named_sequences = resolve_sequences(&raw, initial_point, final_point)?;
        let hierarchies = resolve_namespaces(&raw)?;
        let queues = resolve_queues(&raw, &hierarchies)?;
        let platforms = resolve_platforms(&raw)?;
        let clock = resolve_clock(&raw)?;
        validate_triggers(&raw)?;
        validate_graph(&raw)?;

        let default_sequence: SequenceRef = Arc::new(
            IntegerSequence::new(initial_point, 1, final_point).map_err(SchedulerError::ConfigError)?,
        );

        let mut taskdefs = BTreeMap::new();
        let mut used_sequences: Vec<SequenceRef> = Vec::new();
        for (name, section) in &raw.task {
            let hierarchy = hierarchies
                .get(name)
                .cloned()
                .unwrap_or_else(|| vec![name.clone(), ROOT_NAMESPACE.to_string()]);
            let runtime = merged_runtime(&raw, &hierarchy);
            let rtconfig = RuntimeConfig::from_section(&runtime)
                .map_err(|e| SchedulerError::ConfigError(format!("[runtime] for task '{name}': {e}")))?;
            validate_platform_name(name, &rtconfig, &platforms)?;

            let sequences: Vec<SequenceRef> = if section.sequences.is_empty() {
                vec![default_sequence.clone()]
            } else {
                section
                    .sequences
                    .iter()
                    .map(|s| {
                        named_sequences.get(s).cloned().ok_or_else(|| {
                            SchedulerError::ConfigError(format!(
                                "task '{name}' uses unknown sequence '{s}'"
                            ))
                        })
                    })
                    .collect::<Result<_>>()?
            };
            for seq in &sequences {
                if !used_sequences.iter().any(|s| Arc::ptr_eq(s, seq)) {
                    used_sequences.push(seq.clone());
                }
            }

            let queue = queues
                .iter()
                .find(|(_, q)| q.members.contains(name))
                .map(|(q, _)| q.clone())
                .unwrap_or_else(|| DEFAULT_QUEUE.to_string());

            let tdef = TaskDefinition {
                name: name.clone(),
                generation: 0,
                namespace_hierarchy: hierarchy,
                sequences,
                triggers: trigger_groups(&section.after, &section.after_any)?,
                suicide_triggers: trigger_groups(&section.suicide, &[])?,
                outputs: section.outputs.clone(),
                xtriggers: section.xtriggers.clone(),
                clock_offset: parse_interval(name, "clock_offset", &section.clock_offset)?,
                expire_offset: parse_interval(name, "expire_offset", &section.expire_offset)?,
                queue,
                runtime,
                rtconfig,
            };
            taskdefs.insert(name.clone(), Arc::new(tdef));
        }

        let mut queues = queues;
        let default_members: BTreeSet<String> = taskdefs
            .values()
            .filter(|d| d.queue == DEFAULT_QUEUE)
            .map(|d| d.name.clone())
            .collect();
        let default_limit = raw
            .queues
            .get(DEFAULT_QUEUE)
            .map(|q| q.limit)
            .or(raw.scheduling.default_queue_limit)
            .unwrap_or(0);
        queues.insert(
            DEFAULT_QUEUE.to_string(),
            QueueConfig {
                limit: default_limit,
                members: default_members,
            },
        );

        Ok(WorkflowConfig {
            global,
            initial_point,
            final_point,
            stop_point: raw.scheduling.stop_point.map(CyclePoint::new),
            hold_point: raw.scheduling.hold_point.map(CyclePoint::new),
            runahead_limit,
            run_mode: raw.scheduling.run_mode.unwrap_or_default(),
            sequences: used_sequences,
            queues,
            taskdefs,
            platforms,
            clock,
            generation: 0,
        })
    }
}

fn config_err(msg: impl Into<String>) -> SchedulerError {
    SchedulerError::ConfigError(msg.into())
}

fn ensure_has_tasks(cfg: &RawWorkflowConfig) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(config_err(
            "config must contain at least one [task.<name>] section",
        ));
    }
    Ok(())
}

fn resolve_global(cfg: &RawWorkflowConfig) -> Result<GlobalConfig> {
    let s = &cfg.scheduler;
    let defaults = GlobalConfig::default();
    let run_dir = s.run_dir.as_deref().map(PathBuf::from).unwrap_or(defaults.run_dir);
    let duration = |field: &str, v: &Option<String>, default| {
        v.as_deref()
            .map(parse_duration)
            .transpose()
            .map(|d| d.unwrap_or(default))
            .map_err(|e| config_err(format!("[scheduler].{field}: {e}")))
    };

    let batch_size = s.batch_size.unwrap_or(defaults.batch_size);
    if batch_size == 0 {
        return Err(config_err("[scheduler].batch_size must be >= 1 (got 0)"));
    }
    let process_pool_size = s.process_pool_size.unwrap_or(defaults.process_pool_size);
    if process_pool_size == 0 {
        return Err(config_err("[scheduler].process_pool_size must be >= 1 (got 0)"));
    }

    Ok(GlobalConfig {
        workflow_name: s.workflow_name.clone().unwrap_or(defaults.workflow_name),
        state_file: run_dir.join(s.state_file.as_deref().unwrap_or("state.toml")),
        run_dir,
        job_cmd: s.job_cmd.clone().unwrap_or(defaults.job_cmd),
        batch_size,
        process_pool_size,
        tick: duration("tick", &s.tick, defaults.tick)?,
        db_retries: s.db_retries.unwrap_or(defaults.db_retries),
        db_retry_delay: duration("db_retry_delay", &s.db_retry_delay, defaults.db_retry_delay)?,
        abort_if_stalled: s.abort_if_stalled.unwrap_or(defaults.abort_if_stalled),
    })
}

fn resolve_points(cfg: &RawWorkflowConfig) -> Result<(CyclePoint, Option<CyclePoint>)> {
    let initial = cfg
        .scheduling
        .initial_point
        .map(CyclePoint::new)
        .ok_or_else(|| config_err("[scheduling].initial_point is required"))?;
    let final_point = cfg.scheduling.final_point.map(CyclePoint::new);
    if let Some(fp) = final_point {
        if fp < initial {
            return Err(config_err(format!(
                "[scheduling].final_point {fp} is before initial_point {initial}"
            )));
        }
    }
    Ok((initial, final_point))
}

fn resolve_clock(cfg: &RawWorkflowConfig) -> Result<Option<PointClock>> {
    let s = &cfg.scheduling;
    match (s.clock_origin.as_deref(), s.clock_cycle.as_deref()) {
        (None, None) => Ok(None),
        (Some(origin), Some(cycle)) => {
            let origin = DateTime::parse_from_rfc3339(origin)
                .map_err(|e| config_err(format!("[scheduling].clock_origin: {e}")))?
                .with_timezone(&Utc);
            let cycle = parse_duration(cycle)
                .map_err(|e| config_err(format!("[scheduling].clock_cycle: {e}")))?;
            if cycle.is_zero() {
                return Err(config_err("[scheduling].clock_cycle must be positive"));
            }
            Ok(Some(PointClock { origin, cycle }))
        }
        _ => Err(config_err(
            "[scheduling].clock_origin and clock_cycle must be set together",
        )),
    }
}

fn resolve_runahead(cfg: &RawWorkflowConfig) -> Result<RunaheadLimit> {
    match (
        cfg.scheduling.max_active_cycle_points,
        cfg.scheduling.runahead_limit.as_deref(),
    ) {
        (Some(_), Some(_)) => Err(config_err(
            "set either [scheduling].max_active_cycle_points or runahead_limit, not both",
        )),
        (Some(0), None) => Err(config_err(
            "[scheduling].max_active_cycle_points must be >= 1 (got 0)",
        )),
        (Some(n), None) => Ok(RunaheadLimit::Count(n)),
        (None, Some(limit)) => {
            let interval: Interval = limit
                .parse()
                .map_err(|e| config_err(format!("[scheduling].runahead_limit: {e}")))?;
            if interval.value() < 0 {
                return Err(config_err("[scheduling].runahead_limit must not be negative"));
            }
            Ok(RunaheadLimit::Interval(interval))
        }
        (None, None) => Ok(RunaheadLimit::Count(DEFAULT_MAX_ACTIVE_CYCLE_POINTS)),
    }
}

fn resolve_sequences(
    cfg: &RawWorkflowConfig,
    initial: CyclePoint,
    final_point: Option<CyclePoint>,
) -> Result<BTreeMap<String, SequenceRef>> {
    let mut out = BTreeMap::new();
    for (name, s) in &cfg.scheduling.sequences {
        let start = s.start.map(CyclePoint::new).unwrap_or(initial);
        let end = s.end.map(CyclePoint::new).or(final_point);
        let seq = IntegerSequence::new(start, s.step, end)
            .map_err(|e| config_err(format!("sequence '{name}': {e}")))?;
        out.insert(name.clone(), Arc::new(seq) as SequenceRef);
    }
    Ok(out)
}

/// Namespace hierarchy (self first, `root` last) for every task.
fn resolve_namespaces(cfg: &RawWorkflowConfig) -> Result<BTreeMap<String, Vec<String>>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for (name, section) in &cfg.runtime {
        graph.add_node(name.as_str());
        if let Some(parent) = section.inherit.as_deref() {
            if parent != ROOT_NAMESPACE && !cfg.runtime.contains_key(parent) {
                return Err(config_err(format!(
                    "[runtime.{name}] inherits unknown namespace '{parent}'"
                )));
            }
            if cfg.task.contains_key(parent) {
                return Err(config_err(format!(
                    "[runtime.{name}] cannot inherit from task '{parent}'"
                )));
            }
            graph.add_edge(parent, name.as_str(), ());
        }
    }
    if let Err(cycle) = toposort(&graph, None) {
        return Err(SchedulerError::GraphCycle(format!(
            "namespace inheritance loops through '{}'",
            cycle.node_id()
        )));
    }

    let mut out = BTreeMap::new();
    for name in cfg.task.keys() {
        let mut chain = vec![name.clone()];
        let mut current = name.as_str();
        while let Some(parent) = cfg.runtime.get(current).and_then(|r| r.inherit.as_deref()) {
            if parent == ROOT_NAMESPACE {
                break;
            }
            chain.push(parent.to_string());
            current = parent;
        }
        if name != ROOT_NAMESPACE {
            chain.push(ROOT_NAMESPACE.to_string());
        }
        out.insert(name.clone(), chain);
    }
    Ok(out)
}

/// Runtime sections merged from `root` down to the task itself.
fn merged_runtime(cfg: &RawWorkflowConfig, hierarchy: &[String]) -> RuntimeSection {
    let mut merged = RuntimeSection::default();
    for ns in hierarchy.iter().rev() {
        if let Some(section) = cfg.runtime.get(ns) {
            merged.merge_from(section);
        }
    }
    merged.inherit = None;
    merged
}

fn resolve_queues(
    cfg: &RawWorkflowConfig,
    hierarchies: &BTreeMap<String, Vec<String>>,
) -> Result<BTreeMap<String, QueueConfig>> {
    let mut out = BTreeMap::new();
    let mut assigned: BTreeMap<String, String> = BTreeMap::new();

    for (qname, q) in cfg.queues.iter().filter(|(n, _)| n.as_str() != DEFAULT_QUEUE) {
        let mut members = BTreeSet::new();
        for member in &q.members {
            let matched: Vec<&String> = hierarchies
                .iter()
                .filter(|(_, h)| h.contains(member))
                .map(|(task, _)| task)
                .collect();
            if matched.is_empty() {
                return Err(config_err(format!(
                    "queue '{qname}' has unknown member '{member}'"
                )));
            }
            for task in matched {
                if let Some(other) = assigned.get(task) {
                    if other != qname {
                        return Err(config_err(format!(
                            "task '{task}' is in both queue '{other}' and queue '{qname}'"
                        )));
                    }
                }
                assigned.insert(task.clone(), qname.clone());
                members.insert(task.clone());
            }
        }
        out.insert(
            qname.clone(),
            QueueConfig {
                limit: q.limit,
                members,
            },
        );
    }
    Ok(out)
}

fn resolve_platforms(cfg: &RawWorkflowConfig) -> Result<BTreeMap<String, Platform>> {
    let mut out = BTreeMap::new();
    out.insert(LOCALHOST.to_string(), Platform::localhost());
    for (name, section) in &cfg.platforms {
        let platform = Platform::from_section(name, section).map_err(config_err)?;
        out.insert(name.clone(), platform);
    }
    Ok(out)
}

fn validate_platform_name(
    task: &str,
    rtconfig: &RuntimeConfig,
    platforms: &BTreeMap<String, Platform>,
) -> Result<()> {
    match rtconfig.platform.as_deref() {
        Some(p) if platform_select_command(p).is_none() && !platforms.contains_key(p) => {
            Err(config_err(format!("task '{task}' uses unknown platform '{p}'")))
        }
        _ => Ok(()),
    }
}

fn parse_trigger(s: &str) -> Result<TriggerRef> {
    TriggerRef::parse(s).map_err(config_err)
}

fn trigger_groups(all_of: &[String], any_of: &[Vec<String>]) -> Result<Vec<TriggerGroup>> {
    let mut groups = Vec::new();
    for t in all_of {
        groups.push(TriggerGroup {
            conditional: false,
            triggers: vec![parse_trigger(t)?],
        });
    }
    for any in any_of {
        groups.push(TriggerGroup {
            conditional: true,
            triggers: any.iter().map(|t| parse_trigger(t)).collect::<Result<_>>()?,
        });
    }
    Ok(groups)
}

fn parse_interval(task: &str, field: &str, v: &Option<String>) -> Result<Option<Interval>> {
    v.as_deref()
        .map(|s| s.parse::<Interval>())
        .transpose()
        .map_err(|e| config_err(format!("[task.{task}].{field}: {e}")))
}

fn validate_triggers(cfg: &RawWorkflowConfig) -> Result<()> {
    for (name, task) in &cfg.task {
        for label in task.outputs.keys() {
            if TaskOutputs::is_standard(label) {
                return Err(config_err(format!(
                    "task '{name}' redefines standard output '{label}'"
                )));
            }
        }
        let all = task
            .after
            .iter()
            .chain(task.after_any.iter().flatten())
            .chain(task.suicide.iter());
        for raw in all {
            let trigger = parse_trigger(raw)?;
            let Some(upstream) = cfg.task.get(&trigger.task) else {
                return Err(config_err(format!(
                    "task '{name}' has unknown dependency '{}' in trigger '{raw}'",
                    trigger.task
                )));
            };
            if trigger.task == *name && trigger.offset == Interval::ZERO {
                return Err(config_err(format!(
                    "task '{name}' cannot depend on itself at the same point"
                )));
            }
            if !TaskOutputs::is_standard(&trigger.output)
                && !upstream.outputs.contains_key(&trigger.output)
            {
                return Err(config_err(format!(
                    "task '{name}' triggers off undefined output '{}' of '{}'",
                    trigger.output, trigger.task
                )));
            }
        }
    }
    Ok(())
}

/// Same-point dependencies must form a DAG.
fn validate_graph(cfg: &RawWorkflowConfig) -> Result<()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }
    for (name, task) in &cfg.task {
        for raw in task.after.iter().chain(task.after_any.iter().flatten()) {
            let trigger = parse_trigger(raw)?;
            if trigger.offset == Interval::ZERO {
                if let Some((upstream, _)) = cfg.task.get_key_value(&trigger.task) {
                    graph.add_edge(upstream.as_str(), name.as_str(), ());
                }
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(SchedulerError::GraphCycle(format!(
            "cycle detected in task graph involving task '{}'",
            cycle.node_id()
        ))),
    }
}
