// src/job/remote.rs

//! Remote host management: dynamic platform selection and one-off
//! initialisation of each remote `(host, owner)` before jobs go there.
//!
//! Both are asynchronous. The first request issues a command and reports
//! "pending"; the result lands in a cache that later requests read.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{info, warn};

use crate::config::platform::Platform;
use crate::subproc::{CommandContext, CommandKind, CommandResult};

/// Initialisation state of one remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteInitStatus {
    /// The platform is local.
    NotRequired,
    Pending,
    Done,
    Failed,
}

/// Result of a platform selection expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HostSelect {
    Pending,
    Done(String),
    Failed(String),
}

type RemoteKey = (String, Option<String>);

#[derive(Debug)]
pub struct TaskRemoteManager {
    uuid: String,
    init_map: BTreeMap<RemoteKey, RemoteInitStatus>,
    host_select: BTreeMap<String, HostSelect>,
}

impl TaskRemoteManager {
    /// `seed` identifies this run; the derived id is handed to every remote
    /// so stale files from other runs can be told apart.
    pub fn new(seed: &str) -> Self {
        let uuid = blake3::hash(seed.as_bytes()).to_hex()[..32].to_string();
        Self {
            uuid,
            init_map: BTreeMap::new(),
            host_select: BTreeMap::new(),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    fn key(platform: &Platform) -> RemoteKey {
        (platform.host().to_string(), platform.owner.clone())
    }

    /// Current status, or `None` if initialisation was never requested.
    ///
    /// A failed entry is forgotten once read so the next request retries.
    pub fn remote_init_status(&mut self, platform: &Platform) -> Option<RemoteInitStatus> {
        if !platform.is_remote() {
            return Some(RemoteInitStatus::NotRequired);
        }
        let key = Self::key(platform);
        let status = *self.init_map.get(&key)?;
        if status == RemoteInitStatus::Failed {
            self.init_map.remove(&key);
        }
        Some(status)
    }

    /// Start initialising a remote. Returns the command to run, or `None`
    /// if it is local or already requested.
    pub fn remote_init(
        &mut self,
        platform: &Platform,
        job_cmd: &[String],
        run_dir: &Path,
    ) -> Option<CommandContext> {
        if !platform.is_remote() {
            return None;
        }
        let key = Self::key(platform);
        if self.init_map.contains_key(&key) {
            return None;
        }
        info!(host = %key.0, owner = ?key.1, "initialising remote");
        self.init_map.insert(key.clone(), RemoteInitStatus::Pending);

        let target = match &key.1 {
            Some(owner) => format!("{owner}@{}", key.0),
            None => key.0.clone(),
        };
        let mut argv = platform.ssh_command.clone();
        argv.push(target);
        argv.extend(job_cmd.iter().cloned());
        argv.extend([
            "remote-init".to_string(),
            format!("--uuid={}", self.uuid),
            platform.install_target.clone(),
            run_dir.display().to_string(),
        ]);
        let mut ctx = CommandContext::new(
            CommandKind::RemoteInit {
                host: key.0,
                owner: key.1,
            },
            argv,
        );
        ctx.platform = Some(platform.name.clone());
        Some(ctx)
    }

    pub fn remote_init_callback(&mut self, result: &CommandResult) {
        let CommandKind::RemoteInit { host, owner } = &result.ctx.kind else {
            return;
        };
        let status = if result.ret_code == 0 {
            info!(%host, "remote initialised");
            RemoteInitStatus::Done
        } else {
            warn!(
                %host,
                ret_code = result.ret_code,
                err = %result.err.trim(),
                "remote initialisation failed"
            );
            RemoteInitStatus::Failed
        };
        self.init_map.insert((host.clone(), owner.clone()), status);
    }

    /// Evaluate a platform selection expression.
    ///
    /// Returns `Ok(Some(name))` once known, `Ok(None)` while pending (the
    /// command to issue, if any, is pushed onto `outbox`), and `Err` if the
    /// command failed. Failures are forgotten once reported.
    pub fn subshell_eval(
        &mut self,
        expr: &str,
        outbox: &mut Vec<CommandContext>,
    ) -> Result<Option<String>, String> {
        match self.host_select.get(expr) {
            Some(HostSelect::Done(name)) => Ok(Some(name.clone())),
            Some(HostSelect::Pending) => Ok(None),
            Some(HostSelect::Failed(err)) => {
                let err = err.clone();
                self.host_select.remove(expr);
                Err(err)
            }
            None => {
                self.host_select
                    .insert(expr.to_string(), HostSelect::Pending);
                outbox.push(CommandContext::new(
                    CommandKind::HostSelect {
                        expr: expr.to_string(),
                    },
                    vec!["sh".to_string(), "-c".to_string(), expr.to_string()],
                ));
                Ok(None)
            }
        }
    }

    pub fn host_select_callback(&mut self, result: &CommandResult) {
        let CommandKind::HostSelect { expr } = &result.ctx.kind else {
            return;
        };
        let selected = result
            .out
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty());
        let entry = match (result.ret_code, selected) {
            (0, Some(name)) => HostSelect::Done(name.to_string()),
            (0, None) => HostSelect::Failed(format!("platform selection `{expr}` printed nothing")),
            (ret, _) => HostSelect::Failed(format!(
                "platform selection `{expr}` failed ({ret}): {}",
                result.err.trim()
            )),
        };
        self.host_select.insert(expr.clone(), entry);
    }

    /// Forget consumed selection results so the next submission re-evaluates.
    pub fn host_select_reset(&mut self) {
        self.host_select
            .retain(|_, v| matches!(v, HostSelect::Pending | HostSelect::Failed(_)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_platform() -> Platform {
        Platform {
            name: "hpc".to_string(),
            hosts: vec!["hpc1".to_string()],
            ..Platform::localhost()
        }
    }

    #[test]
    fn local_platforms_need_no_init() {
        let mut mgr = TaskRemoteManager::new("wf");
        let local = Platform::localhost();
        assert_eq!(
            mgr.remote_init_status(&local),
            Some(RemoteInitStatus::NotRequired)
        );
        assert!(mgr.remote_init(&local, &[], Path::new("/run")).is_none());
    }

    #[test]
    fn failed_init_is_forgotten_once_read() {
        let mut mgr = TaskRemoteManager::new("wf");
        let platform = remote_platform();
        assert_eq!(mgr.remote_init_status(&platform), None);

        let ctx = mgr
            .remote_init(&platform, &["cycler-job".to_string()], Path::new("/run"))
            .expect("remote init command");
        assert!(ctx.argv.contains(&"hpc1".to_string()));
        assert!(mgr
            .remote_init(&platform, &[], Path::new("/run"))
            .is_none());
        assert_eq!(
            mgr.remote_init_status(&platform),
            Some(RemoteInitStatus::Pending)
        );

        mgr.remote_init_callback(&CommandResult::new(ctx, 1, "", "no route"));
        assert_eq!(
            mgr.remote_init_status(&platform),
            Some(RemoteInitStatus::Failed)
        );
        assert_eq!(mgr.remote_init_status(&platform), None);
    }

    #[test]
    fn host_select_caches_until_reset() {
        let mut mgr = TaskRemoteManager::new("wf");
        let mut outbox = Vec::new();
        assert_eq!(mgr.subshell_eval("echo hpc", &mut outbox), Ok(None));
        assert_eq!(outbox.len(), 1);
        assert_eq!(mgr.subshell_eval("echo hpc", &mut outbox), Ok(None));
        assert_eq!(outbox.len(), 1);

        let ctx = outbox.remove(0);
        mgr.host_select_callback(&CommandResult::new(ctx, 0, "hpc\n", ""));
        assert_eq!(
            mgr.subshell_eval("echo hpc", &mut outbox),
            Ok(Some("hpc".to_string()))
        );

        mgr.host_select_reset();
        assert_eq!(mgr.subshell_eval("echo hpc", &mut outbox), Ok(None));
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn uuid_is_stable_for_a_seed() {
        assert_eq!(TaskRemoteManager::new("a").uuid(), TaskRemoteManager::new("a").uuid());
        assert_ne!(TaskRemoteManager::new("a").uuid(), TaskRemoteManager::new("b").uuid());
        assert_eq!(TaskRemoteManager::new("a").uuid().len(), 32);
    }
}
