//! Rank process orchestration.
//!
//! One OS process per rank, no shared memory: all ranks are spawned before
//! any is joined, so the kernel's own rendezvous over the shared endpoint
//! sees every participant alive at once. The join loop is sequential; a
//! failing rank broadcasts a cooperative cancellation marker to its
//! siblings but never force-kills them — only join-timeout expiry reaps.

use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use matcomm_common::case::TestCase;
use matcomm_common::{HarnessConfig, HarnessError, Result};

use crate::layout::{CaseLayout, CANCEL_FILE, LOG_FILE};
use crate::rendezvous::allocate_endpoint;

/// Poll interval for the timed join loop.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle of one case execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Init,
    EndpointAllocated,
    Spawning,
    Running,
    Joined,
    Passed,
    Failed,
}

/// One spawned rank process.
pub struct RankHandle {
    pub id: usize,
    pub dir: PathBuf,
    pub log_path: PathBuf,
    child: Child,
    exited: Option<std::process::ExitStatus>,
}

impl RankHandle {
    /// Drop a cooperative cancellation marker into the rank's working
    /// directory. The kernel may poll for it; the harness never kills on
    /// plain sibling failure.
    fn request_cancel(&self) {
        if let Err(err) = fs::write(self.dir.join(CANCEL_FILE), b"cancelled\n") {
            warn!(rank = self.id, %err, "failed to write cancellation marker");
        }
    }
}

/// Spawns one kernel process per rank against a shared rendezvous endpoint
/// and aggregates their exit statuses.
pub struct RankOrchestrator<'a> {
    case: &'a TestCase,
    config: &'a HarnessConfig,
    layout: &'a CaseLayout,
    state: OrchestratorState,
}

impl<'a> RankOrchestrator<'a> {
    pub fn new(case: &'a TestCase, config: &'a HarnessConfig, layout: &'a CaseLayout) -> Self {
        Self {
            case,
            config,
            layout,
            state: OrchestratorState::Init,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Run the kernel across all ranks. Returns once every rank has been
    /// joined; the first failure (in rank order) becomes the error.
    pub fn run(&mut self) -> Result<()> {
        let endpoint = allocate_endpoint()?;
        self.state = OrchestratorState::EndpointAllocated;
        debug!(case = %self.case.label(), %endpoint, "rendezvous endpoint allocated");

        self.state = OrchestratorState::Spawning;
        let mut handles = Vec::with_capacity(self.case.world_size);
        for rank in 0..self.case.world_size {
            match self.spawn_rank(rank, &endpoint) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // A rank that never started counts as a failure; let the
                    // already-running siblings wind down cooperatively.
                    warn!(rank, %err, "failed to spawn rank");
                    for handle in &handles {
                        handle.request_cancel();
                    }
                    self.join_all(&mut handles).ok();
                    self.state = OrchestratorState::Failed;
                    return Err(err);
                }
            }
        }
        self.state = OrchestratorState::Running;
        info!(
            case = %self.case.label(),
            world_size = self.case.world_size,
            "all ranks spawned"
        );

        let joined = self.join_all(&mut handles);
        self.state = OrchestratorState::Joined;

        match joined {
            Ok(()) => {
                self.state = OrchestratorState::Passed;
                Ok(())
            }
            Err(err) => {
                self.state = OrchestratorState::Failed;
                Err(err)
            }
        }
    }

    fn spawn_rank(&self, rank: usize, endpoint: &str) -> Result<RankHandle> {
        let dir = self.layout.rank_dir(rank);
        fs::create_dir_all(&dir)?;
        let log_path = dir.join(LOG_FILE);
        let log = File::create(&log_path)?;
        let log_err = log.try_clone()?;

        // Positional kernel contract:
        // world_size rank endpoint device_id_base M K N data_dir
        let child = Command::new(&self.config.kernel_path)
            .arg(self.case.world_size.to_string())
            .arg(rank.to_string())
            .arg(endpoint)
            .arg(self.config.device_id_base.to_string())
            .arg(self.case.m.to_string())
            .arg(self.case.k.to_string())
            .arg(self.case.n.to_string())
            .arg(&dir)
            .current_dir(&dir)
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()?;

        debug!(rank, dir = %dir.display(), "rank spawned");
        Ok(RankHandle {
            id: rank,
            dir,
            log_path,
            child,
            exited: None,
        })
    }

    /// Join every rank. Without a timeout this blocks on each rank in
    /// order; with one, all ranks are polled until the deadline and any
    /// survivors are reaped.
    fn join_all(&self, handles: &mut [RankHandle]) -> Result<()> {
        let mut cancelled = false;
        match self.config.join_timeout {
            None => {
                for idx in 0..handles.len() {
                    let status = handles[idx].child.wait()?;
                    handles[idx].exited = Some(status);
                    if !status.success() {
                        warn!(rank = handles[idx].id, ?status, "rank exited non-zero");
                        if !cancelled {
                            cancelled = true;
                            broadcast_cancel(handles);
                        }
                    }
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                loop {
                    let mut all_done = true;
                    let mut newly_failed = false;
                    for handle in handles.iter_mut() {
                        if handle.exited.is_some() {
                            continue;
                        }
                        match handle.child.try_wait()? {
                            Some(status) => {
                                handle.exited = Some(status);
                                if !status.success() {
                                    warn!(rank = handle.id, ?status, "rank exited non-zero");
                                    newly_failed = true;
                                }
                            }
                            None => all_done = false,
                        }
                    }
                    if newly_failed && !cancelled {
                        cancelled = true;
                        broadcast_cancel(handles);
                    }
                    if all_done {
                        break;
                    }
                    if Instant::now() >= deadline {
                        return self.reap_stragglers(handles, timeout);
                    }
                    std::thread::sleep(JOIN_POLL_INTERVAL);
                }
            }
        }

        self.first_failure(handles)
    }

    /// Deadline expired: kill whatever is still running. This is the only
    /// path on which the harness terminates a rank.
    fn reap_stragglers(&self, handles: &mut [RankHandle], timeout: Duration) -> Result<()> {
        let mut timed_out_rank = None;
        for handle in handles.iter_mut() {
            if handle.exited.is_none() {
                warn!(rank = handle.id, "join timeout expired, reaping rank");
                handle.child.kill().ok();
                handle.child.wait().ok();
                timed_out_rank.get_or_insert(handle.id);
            }
        }
        match timed_out_rank {
            Some(rank) => Err(HarnessError::JoinTimeout {
                rank,
                timeout_secs: timeout.as_secs(),
            }),
            // All ranks actually finished on the last poll.
            None => self.first_failure(handles),
        }
    }

    fn first_failure(&self, handles: &[RankHandle]) -> Result<()> {
        for handle in handles {
            let status = handle.exited.expect("rank joined");
            if !status.success() {
                return Err(HarnessError::RankProcessFailure {
                    rank: handle.id,
                    code: status.code(),
                    log_path: handle.log_path.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Drop cancellation markers for every rank that has not exited yet.
fn broadcast_cancel(handles: &[RankHandle]) {
    for handle in handles {
        if handle.exited.is_none() {
            handle.request_cancel();
        }
    }
}

/// Read the captured log of a failed rank for diagnostics.
pub fn read_rank_log(handle_log_path: &std::path::Path) -> String {
    fs::read_to_string(handle_log_path).unwrap_or_else(|_| String::from("<log unavailable>"))
}
