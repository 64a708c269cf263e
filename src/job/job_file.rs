// src/job/job_file.rs

//! Writing job scripts.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::runtime::RuntimeConfig;
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::task::TaskProxy;

pub const JOB_FILE_NAME: &str = "job";

/// What goes into one job script.
#[derive(Debug, Clone)]
pub struct JobConf<'a> {
    pub workflow_name: &'a str,
    pub itask: &'a TaskProxy,
    pub rtconfig: &'a RuntimeConfig,
    pub job_runner: &'a str,
    /// Replace the task's scripts with a sleep of the simulated run length.
    pub dummy: bool,
}

/// Single-quote `value` for the shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn script_section(out: &mut String, name: &str, body: &str) {
    if body.trim().is_empty() {
        return;
    }
    let _ = writeln!(out, "\n# {name}");
    let _ = writeln!(out, "{}", body.trim_end());
}

pub fn render(conf: &JobConf<'_>) -> String {
    let itask = conf.itask;
    let rt = conf.rtconfig;
    let mut out = String::new();
    let _ = writeln!(out, "#!/bin/bash -l");
    let _ = writeln!(out, "# job: {}", itask.job_ref());
    let _ = writeln!(out, "# job runner: {}", conf.job_runner);
    for (key, value) in &rt.directives {
        let _ = writeln!(out, "# DIRECTIVE {key}={value}");
    }

    let _ = writeln!(out);
    let vars = [
        ("CYCLER_WORKFLOW_NAME", conf.workflow_name.to_string()),
        ("CYCLER_TASK_NAME", itask.name().to_string()),
        ("CYCLER_TASK_CYCLE_POINT", itask.point().to_string()),
        ("CYCLER_TASK_SUBMIT_NUMBER", itask.submit_num.to_string()),
        ("CYCLER_TASK_TRY_NUMBER", itask.try_num().to_string()),
        ("CYCLER_TASK_JOB", itask.job_ref().to_string()),
        ("CYCLER_TASK_FLOW", itask.flow_label.clone()),
    ];
    for (key, value) in vars.iter() {
        let _ = writeln!(out, "export {key}={}", shell_quote(value));
    }
    for (key, value) in &rt.environment {
        let _ = writeln!(out, "export {key}={}", shell_quote(value));
    }

    if !rt.err_script.trim().is_empty() {
        let _ = writeln!(out, "\ntrap '{}' ERR", rt.err_script.trim().replace('\'', r"'\''"));
    }
    script_section(&mut out, "init-script", &rt.init_script);
    script_section(&mut out, "env-script", &rt.env_script);
    if conf.dummy {
        let secs = rt.simulation.run_length.as_secs();
        script_section(&mut out, "script", &format!("sleep {secs}"));
    } else {
        script_section(&mut out, "pre-script", &rt.pre_script);
        script_section(&mut out, "script", &rt.script);
        script_section(&mut out, "post-script", &rt.post_script);
    }
    script_section(&mut out, "exit-script", &rt.exit_script);
    out
}

/// Write the job script into the job log directory and make it executable.
pub fn write_job_file(fs: &dyn FileSystem, log_dir: &Path, conf: &JobConf<'_>) -> Result<PathBuf> {
    // A first submission starts from a clean slate: drop logs of earlier runs.
    if conf.itask.submit_num == 1 {
        if let Some(task_dir) = log_dir.parent() {
            fs.remove_dir_all(task_dir)
                .with_context(|| format!("clearing old job logs for {}", conf.itask.identity))?;
        }
    }
    let path = log_dir.join(JOB_FILE_NAME);
    let contents = render(conf);
    fs.write(&path, contents.as_bytes())
        .with_context(|| format!("writing job file for {}", conf.itask.identity))?;
    fs.set_executable(&path)
        .with_context(|| format!("making job file executable for {}", conf.itask.identity))?;
    Ok(path)
}
