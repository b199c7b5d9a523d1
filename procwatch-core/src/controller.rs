use crate::config::ControllerConfig;
use crate::sampler::{full_name, refresh_kind};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, System};
use thiserror::Error;
use tracing::{info, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_PID: u32 = 2_147_483_647;
const COMM_LEN: usize = 15;

#[cfg(target_os = "linux")]
const CRITICAL_PROCESSES: &[&str] = &[
    "systemd",
    "init",
    "kthreadd",
    "ksoftirqd",
    "systemd-journald",
    "systemd-udevd",
    "systemd-logind",
    "dbus-daemon",
    "dbus-broker",
    "networkmanager",
    "accounts-daemon",
    "polkitd",
    "gdm",
    "gdm-x-session",
    "xorg",
    "x",
    "snapd",
    "rsyslogd",
];

#[cfg(target_os = "macos")]
const CRITICAL_PROCESSES: &[&str] = &[
    "kernel_task",
    "launchd",
    "windowserver",
    "loginwindow",
    "systemstats",
    "usereventagent",
    "cfprefsd",
    "distnoted",
    "mds",
    "mds_stores",
    "notifyd",
    "coreservicesd",
];

// other Unix systems
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const CRITICAL_PROCESSES: &[&str] = &["init", "launchd", "systemd", "syslogd", "sshd"];

/// Names that are never terminated, whatever the caller's privileges.
///
/// A name at the kernel's 15-byte `comm` limit also matches any critical
/// name it is a truncation of.
pub fn is_critical(name: &str) -> bool {
    let name = name.to_lowercase();
    CRITICAL_PROCESSES.iter().any(|critical| {
        *critical == name || (name.len() == COMM_LEN && critical.starts_with(name.as_str()))
    })
}

/// Validates a pid typed by a user.
pub fn parse_pid(text: &str) -> Result<u32, KillError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(KillError::InvalidPid("PID cannot be empty".to_string()));
    }
    let pid: i64 = text
        .parse()
        .map_err(|_| KillError::InvalidPid(format!("'{}' is not an integer", text)))?;
    if pid <= 0 {
        return Err(KillError::InvalidPid("PID must be greater than 0".to_string()));
    }
    if pid > MAX_PID as i64 {
        return Err(KillError::InvalidPid("PID out of range".to_string()));
    }
    Ok(pid as u32)
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillError {
    #[error("refusing to terminate critical system process {name} (PID {pid})")]
    Critical { pid: u32, name: String },

    #[error("process {0} does not exist")]
    NotFound(u32),

    #[error("access denied for PID {0}; try running with elevated privileges (root/administrator)")]
    AccessDenied(u32),

    #[error("failed to terminate PID {pid}: {message}")]
    Os { pid: u32, message: String },

    #[error("invalid PID: {0}")]
    InvalidPid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillOutcome {
    /// Exited after the graceful signal.
    Terminated { pid: u32, name: String },
    /// Ignored the graceful signal until the timeout and was killed.
    ForceKilled { pid: u32, name: String },
    /// Killed outright because the caller asked for force.
    Killed { pid: u32, name: String },
}

impl KillOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            KillOutcome::Terminated { pid, .. }
            | KillOutcome::ForceKilled { pid, .. }
            | KillOutcome::Killed { pid, .. } => *pid,
        }
    }
}

impl fmt::Display for KillOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillOutcome::Terminated { pid, name } => {
                write!(f, "Process {} (PID {}) terminated", name, pid)
            }
            KillOutcome::ForceKilled { pid, name } => {
                write!(f, "Process {} (PID {}) force killed after timeout", name, pid)
            }
            KillOutcome::Killed { pid, name } => write!(f, "Process {} (PID {}) killed", name, pid),
        }
    }
}

/// OS signal capability used by [`ProcessController`].
pub trait Signaller: Send + Sync {
    fn process_name(&self, pid: u32) -> Result<String, KillError>;
    fn terminate(&self, pid: u32) -> Result<(), KillError>;
    fn force_kill(&self, pid: u32) -> Result<(), KillError>;
    /// Returns `Ok(true)` once the process is gone, `Ok(false)` on timeout.
    fn wait(&self, pid: u32, timeout: Duration) -> Result<bool, KillError>;
}

/// Unix signals through `nix`; names are resolved with `sysinfo`.
pub struct UnixSignaller {
    system: Mutex<System>,
}

impl UnixSignaller {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn target(pid: u32) -> Result<nix::unistd::Pid, KillError> {
        // pid 0 and negative values address process groups
        match i32::try_from(pid) {
            Ok(raw) if raw > 0 => Ok(nix::unistd::Pid::from_raw(raw)),
            _ => Err(KillError::InvalidPid(format!("{} is not a process id", pid))),
        }
    }

    fn send(&self, pid: u32, sig: Signal) -> Result<(), KillError> {
        let target = Self::target(pid)?;
        signal::kill(target, sig).map_err(|errno| classify(pid, errno))
    }

    /// Refreshes one process and reads it, `None` if it no longer exists.
    fn inspect<R>(&self, pid: u32, read: impl FnOnce(&Process) -> R) -> Option<R> {
        let mut system = self.system.lock();
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[sys_pid]), true, refresh_kind());
        system.process(sys_pid).map(read)
    }

    fn is_alive(&self, pid: u32) -> Result<bool, KillError> {
        let target = Self::target(pid)?;
        // reap it if it is our own child; ECHILD for everyone else is fine
        let _ = waitpid(target, Some(WaitPidFlag::WNOHANG));

        match signal::kill(target, None) {
            Err(Errno::ESRCH) => return Ok(false),
            Ok(()) | Err(Errno::EPERM) => {}
            Err(errno) => return Err(classify(pid, errno)),
        }

        Ok(self.inspect(pid, |p| !has_exited(p)).unwrap_or(false))
    }
}

impl Default for UnixSignaller {
    fn default() -> Self {
        Self::new()
    }
}

/// Zombies have exited; only their parent can still observe them.
fn has_exited(process: &Process) -> bool {
    matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
}

fn classify(pid: u32, errno: Errno) -> KillError {
    match errno {
        Errno::ESRCH => KillError::NotFound(pid),
        Errno::EPERM => KillError::AccessDenied(pid),
        other => KillError::Os {
            pid,
            message: other.desc().to_string(),
        },
    }
}

impl Signaller for UnixSignaller {
    fn process_name(&self, pid: u32) -> Result<String, KillError> {
        self.inspect(pid, |p| (!has_exited(p)).then(|| full_name(p)))
            .flatten()
            .ok_or(KillError::NotFound(pid))
    }

    fn terminate(&self, pid: u32) -> Result<(), KillError> {
        self.send(pid, Signal::SIGTERM)
    }

    fn force_kill(&self, pid: u32) -> Result<(), KillError> {
        self.send(pid, Signal::SIGKILL)
    }

    fn wait(&self, pid: u32, timeout: Duration) -> Result<bool, KillError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive(pid)? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
        }
    }
}

/// Terminates processes on request, refusing anything on the critical list.
pub struct ProcessController {
    signaller: Box<dyn Signaller>,
    terminate_timeout: Duration,
}

impl ProcessController {
    pub fn new(signaller: impl Signaller + 'static, config: &ControllerConfig) -> Self {
        Self {
            signaller: Box::new(signaller),
            terminate_timeout: config.terminate_timeout(),
        }
    }

    pub fn system(config: &ControllerConfig) -> Self {
        Self::new(UnixSignaller::new(), config)
    }

    /// Asks `pid` to exit. Without `force` the process gets SIGTERM and the
    /// terminate timeout to exit before being killed. Blocks for at most that
    /// timeout.
    pub fn kill(&self, pid: u32, force: bool) -> Result<KillOutcome, KillError> {
        let name = self.signaller.process_name(pid)?;
        if is_critical(&name) {
            warn!(pid, name = %name, "refused to terminate critical process");
            return Err(KillError::Critical { pid, name });
        }

        if force {
            self.signaller.force_kill(pid)?;
            info!(pid, name = %name, "process killed");
            return Ok(KillOutcome::Killed { pid, name });
        }

        self.signaller.terminate(pid)?;
        if self.signaller.wait(pid, self.terminate_timeout)? {
            info!(pid, name = %name, "process terminated");
            return Ok(KillOutcome::Terminated { pid, name });
        }

        match self.signaller.force_kill(pid) {
            // exited between the last poll and the kill
            Err(KillError::NotFound(_)) => Ok(KillOutcome::Terminated { pid, name }),
            Err(e) => Err(e),
            Ok(()) => {
                warn!(pid, name = %name, "process ignored SIGTERM, force killed");
                Ok(KillOutcome::ForceKilled { pid, name })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeSignaller {
        names: HashMap<u32, String>,
        exits_on_terminate: bool,
        terminate_error: Option<KillError>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSignaller {
        fn with_process(pid: u32, name: &str) -> Self {
            let mut names = HashMap::new();
            names.insert(pid, name.to_string());
            Self {
                names,
                exits_on_terminate: true,
                ..Self::default()
            }
        }
    }

    impl Signaller for Arc<FakeSignaller> {
        fn process_name(&self, pid: u32) -> Result<String, KillError> {
            self.names.get(&pid).cloned().ok_or(KillError::NotFound(pid))
        }

        fn terminate(&self, pid: u32) -> Result<(), KillError> {
            self.calls.lock().push(format!("term {}", pid));
            match &self.terminate_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        fn force_kill(&self, pid: u32) -> Result<(), KillError> {
            self.calls.lock().push(format!("kill {}", pid));
            Ok(())
        }

        fn wait(&self, pid: u32, _timeout: Duration) -> Result<bool, KillError> {
            self.calls.lock().push(format!("wait {}", pid));
            Ok(self.exits_on_terminate)
        }
    }

    fn controller(fake: FakeSignaller) -> (ProcessController, Arc<FakeSignaller>) {
        let fake = Arc::new(fake);
        let controller = ProcessController::new(Arc::clone(&fake), &ControllerConfig::default());
        (controller, fake)
    }

    #[test]
    fn test_critical_process_is_refused_without_signalling() {
        let mut fake = FakeSignaller::with_process(1, "Systemd");
        fake.terminate_error = Some(KillError::AccessDenied(1));
        let (controller, fake) = controller(fake);

        for force in [false, true] {
            let result = controller.kill(1, force);
            assert!(matches!(result, Err(KillError::Critical { pid: 1, .. })));
        }
        assert!(fake.calls.lock().is_empty());
    }

    #[test]
    fn test_graceful_terminate() {
        let (controller, fake) = controller(FakeSignaller::with_process(42, "sleep"));
        let outcome = controller.kill(42, false).unwrap();

        assert_eq!(
            outcome,
            KillOutcome::Terminated {
                pid: 42,
                name: "sleep".to_string()
            }
        );
        assert_eq!(*fake.calls.lock(), vec!["term 42", "wait 42"]);
        assert_eq!(outcome.to_string(), "Process sleep (PID 42) terminated");
    }

    #[test]
    fn test_timeout_escalates_to_force_kill() {
        let mut fake = FakeSignaller::with_process(42, "stubborn");
        fake.exits_on_terminate = false;
        let (controller, fake) = controller(fake);

        let outcome = controller.kill(42, false).unwrap();
        assert!(matches!(outcome, KillOutcome::ForceKilled { pid: 42, .. }));
        assert!(outcome.to_string().contains("force killed"));
        assert_eq!(*fake.calls.lock(), vec!["term 42", "wait 42", "kill 42"]);
    }

    #[test]
    fn test_force_skips_terminate() {
        let (controller, fake) = controller(FakeSignaller::with_process(7, "worker"));
        let outcome = controller.kill(7, true).unwrap();
        assert!(matches!(outcome, KillOutcome::Killed { pid: 7, .. }));
        assert_eq!(*fake.calls.lock(), vec!["kill 7"]);
    }

    #[test]
    fn test_failures_are_classified() {
        let (missing, _) = controller(FakeSignaller::default());
        assert_eq!(missing.kill(99, false), Err(KillError::NotFound(99)));

        let mut fake = FakeSignaller::with_process(5, "daemon");
        fake.terminate_error = Some(KillError::AccessDenied(5));
        let (denied, _) = controller(fake);
        let error = denied.kill(5, false).unwrap_err();
        assert_eq!(error, KillError::AccessDenied(5));
        assert!(error.to_string().contains("elevated privileges"));

        let mut fake = FakeSignaller::with_process(6, "daemon");
        fake.terminate_error = Some(KillError::Os {
            pid: 6,
            message: "Invalid argument".to_string(),
        });
        let (failing, _) = controller(fake);
        assert!(matches!(failing.kill(6, false), Err(KillError::Os { pid: 6, .. })));
    }

    #[test]
    fn test_is_critical_ignores_case() {
        assert!(is_critical("init"));
        assert!(is_critical("INIT"));
        assert!(!is_critical("firefox"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_is_critical_matches_truncated_comm() {
        assert!(is_critical("systemd-journal"));
        assert!(is_critical("Systemd-Journal"));
        // prefixes shorter than the comm limit are different programs
        assert!(!is_critical("systemd-jour"));
        assert!(!is_critical("systemd-journald-extra"));
    }

    #[test]
    fn test_parse_pid() {
        assert_eq!(parse_pid(" 1234 "), Ok(1234));
        assert!(matches!(parse_pid(""), Err(KillError::InvalidPid(_))));
        assert!(matches!(parse_pid("abc"), Err(KillError::InvalidPid(_))));
        assert!(matches!(parse_pid("0"), Err(KillError::InvalidPid(_))));
        assert!(matches!(parse_pid("-5"), Err(KillError::InvalidPid(_))));
        assert!(matches!(parse_pid("2147483648"), Err(KillError::InvalidPid(_))));
    }

    #[test]
    fn test_unix_signaller_terminates_child() {
        let child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();

        let controller = ProcessController::system(&ControllerConfig::default());
        let outcome = controller.kill(pid, false).unwrap();
        assert_eq!(outcome.pid(), pid);
        assert!(matches!(outcome, KillOutcome::Terminated { .. }));

        assert_eq!(controller.kill(pid, false), Err(KillError::NotFound(pid)));
    }

    #[test]
    fn test_exited_child_is_not_found() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        // exited but not reaped: a zombie until waited on
        let signaller = UnixSignaller::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while signaller.inspect(pid, has_exited) != Some(true) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(signaller.process_name(pid), Err(KillError::NotFound(pid)));
        let controller = ProcessController::system(&ControllerConfig::default());
        assert_eq!(controller.kill(pid, false), Err(KillError::NotFound(pid)));
        let _ = child.wait();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_long_critical_name_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut child = crate::sampler::testing::spawn_renamed_sleep(dir.path(), "systemd-journald");
        let pid = child.id();

        let signaller = UnixSignaller::new();
        let name = signaller.process_name(pid);
        let controller = ProcessController::system(&ControllerConfig::default());
        let result = controller.kill(pid, false);

        child.kill().unwrap();
        child.wait().unwrap();
        assert_eq!(name.as_deref(), Ok("systemd-journald"));
        assert!(matches!(result, Err(KillError::Critical { pid: p, .. }) if p == pid));
    }

    #[test]
    fn test_unix_signaller_rejects_group_pids() {
        let signaller = UnixSignaller::new();
        assert!(matches!(signaller.terminate(0), Err(KillError::InvalidPid(_))));
        assert!(matches!(signaller.terminate(u32::MAX), Err(KillError::InvalidPid(_))));
    }
}
