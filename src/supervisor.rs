//! Server process supervision
//!
//! Each server is tracked through `<root>/<server>.pid`. Status is derived
//! from that file plus the OS process table:
//! - running:  pid file names a live process whose name starts with the server name
//! - missing:  pid file present but that process is gone (or is something else)
//! - orphaned: no pid file, yet processes named like the server exist
//! - stopped:  neither

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::install::Installation;

/// Poll interval while waiting for a process to exit.
const EXIT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("pid file {} does not contain a pid: {content:?}", path.display())]
    BadPidFile { path: PathBuf, content: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to run {}: {source}", executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ran {} but failed to find process {pid}", executable.display())]
    Vanished { executable: PathBuf, pid: u32 },
}

/// Signals used to stop a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM, ask politely
    Terminate,
    /// SIGKILL
    Kill,
}

impl StopSignal {
    pub fn as_raw(self) -> libc::c_int {
        match self {
            StopSignal::Terminate => libc::SIGTERM,
            StopSignal::Kill => libc::SIGKILL,
        }
    }
}

/// The slice of the OS process table the supervisor needs.
pub trait ProcessTable {
    /// Name of the live process `pid`, or `None` if there is none.
    fn name(&self, pid: u32) -> Option<String>;

    /// Every live pid.
    fn pids(&self) -> Vec<u32>;

    fn signal(&self, pid: u32, signal: StopSignal) -> io::Result<()>;

    /// Start `executable` detached from our stdin, returning its pid.
    fn spawn(&self, executable: &Path, workdir: &Path) -> io::Result<u32>;

    fn exists(&self, pid: u32) -> bool {
        self.name(pid).is_some()
    }
}

/// `/proc` for lookups, `kill(2)` for signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

impl ProcessTable for SystemProcesses {
    fn name(&self, pid: u32) -> Option<String> {
        let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        let (name, state) = parse_proc_stat(&stat)?;
        // a zombie has exited, it just has not been reaped
        (state != 'Z').then(|| name.to_string())
    }

    fn pids(&self) -> Vec<u32> {
        let Ok(entries) = fs::read_dir("/proc") else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
            .collect()
    }

    fn signal(&self, pid: u32, signal: StopSignal) -> io::Result<()> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid, signal.as_raw()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn spawn(&self, executable: &Path, workdir: &Path) -> io::Result<u32> {
        let child = Command::new(executable)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .spawn()?;
        Ok(child.id())
    }
}

/// `(comm, state)` from the contents of `/proc/<pid>/stat`.
fn parse_proc_stat(stat: &str) -> Option<(&str, char)> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let name = stat.get(open + 1..close)?;
    let state = stat.get(close + 1..)?.trim_start().chars().next()?;
    Some((name, state))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Running(u32),
    Missing(u32),
    Orphaned(Vec<u32>),
    Stopped,
}

impl ServerStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ServerStatus::Running(_) => "running",
            ServerStatus::Missing(_) => "missing",
            ServerStatus::Orphaned(_) => "orphaned",
            ServerStatus::Stopped => "stopped",
        }
    }

    /// Pids that belong to live server processes.
    fn live_pids(&self) -> Vec<u32> {
        match self {
            ServerStatus::Running(pid) => vec![*pid],
            ServerStatus::Orphaned(pids) => pids.clone(),
            ServerStatus::Missing(_) | ServerStatus::Stopped => Vec::new(),
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::Running(pid) | ServerStatus::Missing(pid) => {
                write!(f, "{} (pid: {pid})", self.label())
            }
            ServerStatus::Orphaned(pids) => {
                let pids: Vec<String> = pids.iter().map(u32::to_string).collect();
                write!(f, "{} (pid: {})", self.label(), pids.join(", "))
            }
            ServerStatus::Stopped => write!(f, "{} (pid: none)", self.label()),
        }
    }
}

pub struct Supervisor<P = SystemProcesses> {
    install: Installation,
    processes: P,
    stop_timeout: Duration,
}

impl Supervisor<SystemProcesses> {
    pub fn new(install: Installation, stop_timeout: Duration) -> Self {
        Self::with_processes(install, SystemProcesses, stop_timeout)
    }
}

impl<P: ProcessTable> Supervisor<P> {
    pub fn with_processes(install: Installation, processes: P, stop_timeout: Duration) -> Self {
        Self {
            install,
            processes,
            stop_timeout,
        }
    }

    /// The pid stored for `server`, if it has a pid file.
    pub fn stored_pid(&self, server: &str) -> Result<Option<u32>, SupervisorError> {
        let path = self.install.pid_file(server);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SupervisorError::Io { path, source }),
        };
        match content.trim().parse() {
            Ok(pid) => Ok(Some(pid)),
            Err(_) => Err(SupervisorError::BadPidFile { path, content }),
        }
    }

    pub fn status(&self, server: &str) -> Result<ServerStatus, SupervisorError> {
        if let Some(pid) = self.stored_pid(server)? {
            let status = match self.processes.name(pid) {
                Some(name) if name.starts_with(server) => ServerStatus::Running(pid),
                _ => ServerStatus::Missing(pid),
            };
            return Ok(status);
        }

        let mut matching: Vec<u32> = self
            .processes
            .pids()
            .into_iter()
            .filter(|&pid| {
                self.processes
                    .name(pid)
                    .is_some_and(|name| name.starts_with(server))
            })
            .collect();
        matching.sort_unstable();

        match matching.len() {
            0 => Ok(ServerStatus::Stopped),
            n => {
                if n > 1 {
                    tracing::warn!("[supervisor] [multiple] Found {n} processes matching {server}!");
                }
                Ok(ServerStatus::Orphaned(matching))
            }
        }
    }

    /// Start `server` unless it is already running; `force` restarts it.
    /// Orphaned processes are stopped and stale pid files removed first.
    pub async fn start(&self, server: &str, force: bool) -> Result<u32, SupervisorError> {
        match self.status(server)? {
            ServerStatus::Running(pid) if !force => {
                tracing::info!(
                    "[supervisor] [skip] {server} already running on pid {pid}, not starting another."
                );
                return Ok(pid);
            }
            status @ (ServerStatus::Running(_) | ServerStatus::Orphaned(_)) => {
                tracing::info!("[supervisor] [restart] {server} {status}, killing...");
                self.stop(server).await?;
            }
            ServerStatus::Missing(pid) => {
                tracing::info!("[supervisor] [stale] {server} missing on pid {pid}, removing pidfile.");
                self.remove_pid_file(server)?;
            }
            ServerStatus::Stopped => {}
        }

        let executable = self.install.executable(server);
        let pid = self
            .processes
            .spawn(&executable, self.install.root())
            .map_err(|source| SupervisorError::Spawn {
                executable: executable.clone(),
                source,
            })?;
        if !self.processes.exists(pid) {
            return Err(SupervisorError::Vanished { executable, pid });
        }

        let path = self.install.pid_file(server);
        fs::write(&path, format!("{pid}\n")).map_err(|source| SupervisorError::Io { path, source })?;
        tracing::info!("[supervisor] [started] Started {server} with pid {pid}.");
        Ok(pid)
    }

    /// Stop `server`: SIGTERM, then SIGKILL after the stop timeout.
    pub async fn stop(&self, server: &str) -> Result<(), SupervisorError> {
        let status = self.status(server)?;
        let pids = status.live_pids();

        if pids.is_empty() {
            tracing::info!("[supervisor] [idle] {server} is {}, no need to stop.", status.label());
        } else {
            for &pid in &pids {
                tracing::info!("[supervisor] [stop] Asking {server} (pid {pid}) to shut down.");
                if let Err(e) = self.processes.signal(pid, StopSignal::Terminate) {
                    tracing::warn!("[supervisor] [signal] SIGTERM to {pid} failed: {e}");
                }
            }

            let survivors = self.wait_for_exit(&pids).await;
            for pid in survivors {
                tracing::warn!(
                    "[supervisor] [kill] {server} failed to exit within {} seconds, killing process!",
                    self.stop_timeout.as_secs()
                );
                if let Err(e) = self.processes.signal(pid, StopSignal::Kill) {
                    tracing::warn!("[supervisor] [signal] SIGKILL to {pid} failed: {e}");
                }
            }
        }

        if self.install.pid_file(server).exists() {
            tracing::info!("[supervisor] [pidfile] Removing pidfile for {server}.");
            self.remove_pid_file(server)?;
        }
        Ok(())
    }

    /// Wait until every pid has exited or the timeout passes; returns the survivors.
    async fn wait_for_exit(&self, pids: &[u32]) -> Vec<u32> {
        let deadline = Instant::now() + self.stop_timeout;
        loop {
            let alive: Vec<u32> = pids
                .iter()
                .copied()
                .filter(|&pid| self.processes.exists(pid))
                .collect();
            if alive.is_empty() || Instant::now() >= deadline {
                return alive;
            }
            sleep(EXIT_POLL).await;
        }
    }

    fn remove_pid_file(&self, server: &str) -> Result<(), SupervisorError> {
        let path = self.install.pid_file(server);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SupervisorError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// In-memory process table. Pids in `stubborn` ignore SIGTERM.
    #[derive(Default)]
    struct FakeProcesses {
        procs: Mutex<HashMap<u32, String>>,
        stubborn: Mutex<HashSet<u32>>,
        signals: Mutex<Vec<(u32, StopSignal)>>,
        next_pid: Mutex<u32>,
    }

    impl FakeProcesses {
        fn with(procs: &[(u32, &str)]) -> Self {
            let fake = Self::default();
            for &(pid, name) in procs {
                fake.procs.lock().unwrap().insert(pid, name.to_string());
            }
            *fake.next_pid.lock().unwrap() = 5000;
            fake
        }

        fn alive(&self, pid: u32) -> bool {
            self.procs.lock().unwrap().contains_key(&pid)
        }
    }

    impl ProcessTable for FakeProcesses {
        fn name(&self, pid: u32) -> Option<String> {
            self.procs.lock().unwrap().get(&pid).cloned()
        }

        fn pids(&self) -> Vec<u32> {
            self.procs.lock().unwrap().keys().copied().collect()
        }

        fn signal(&self, pid: u32, signal: StopSignal) -> io::Result<()> {
            self.signals.lock().unwrap().push((pid, signal));
            let stubborn = self.stubborn.lock().unwrap().contains(&pid);
            if signal == StopSignal::Kill || !stubborn {
                self.procs.lock().unwrap().remove(&pid);
            }
            Ok(())
        }

        fn spawn(&self, executable: &Path, _workdir: &Path) -> io::Result<u32> {
            let mut next = self.next_pid.lock().unwrap();
            *next += 1;
            let name = executable.file_stem().unwrap().to_string_lossy().into_owned();
            self.procs.lock().unwrap().insert(*next, name);
            Ok(*next)
        }
    }

    fn scratch(name: &str) -> Installation {
        let dir = std::env::temp_dir().join(format!("autolycus-sup-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        Installation::new(dir)
    }

    fn supervisor(install: &Installation, fake: FakeProcesses) -> Supervisor<FakeProcesses> {
        Supervisor::with_processes(install.clone(), fake, Duration::from_millis(300))
    }

    #[test]
    fn test_parse_proc_stat() {
        assert_eq!(parse_proc_stat("42 (map-server) S 1 42"), Some(("map-server", 'S')));
        assert_eq!(parse_proc_stat("7 (a (b) c) Z 1"), Some(("a (b) c", 'Z')));
        assert_eq!(parse_proc_stat("garbage"), None);
    }

    #[test]
    fn test_status_stopped() {
        let install = scratch("stopped");
        let sup = supervisor(&install, FakeProcesses::with(&[(1, "init")]));
        assert_eq!(sup.status("map-server").unwrap(), ServerStatus::Stopped);
    }

    #[test]
    fn test_status_running() {
        let install = scratch("running");
        fs::write(install.pid_file("char-server"), "77\n").unwrap();
        let sup = supervisor(&install, FakeProcesses::with(&[(77, "char-server")]));
        assert_eq!(sup.status("char-server").unwrap(), ServerStatus::Running(77));
    }

    #[test]
    fn test_status_missing_when_pid_reused() {
        let install = scratch("missing");
        fs::write(install.pid_file("char-server"), "77").unwrap();
        let sup = supervisor(&install, FakeProcesses::with(&[(77, "bash")]));
        assert_eq!(sup.status("char-server").unwrap(), ServerStatus::Missing(77));
    }

    #[test]
    fn test_status_orphaned() {
        let install = scratch("orphaned");
        let sup = supervisor(
            &install,
            FakeProcesses::with(&[(9, "login-server"), (3, "login-server"), (4, "map-server")]),
        );
        assert_eq!(sup.status("login-server").unwrap(), ServerStatus::Orphaned(vec![3, 9]));
    }

    #[test]
    fn test_bad_pid_file() {
        let install = scratch("badpid");
        fs::write(install.pid_file("map-server"), "not a pid").unwrap();
        let sup = supervisor(&install, FakeProcesses::default());
        assert!(matches!(
            sup.status("map-server"),
            Err(SupervisorError::BadPidFile { .. })
        ));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ServerStatus::Running(5).to_string(), "running (pid: 5)");
        assert_eq!(ServerStatus::Orphaned(vec![1, 2]).to_string(), "orphaned (pid: 1, 2)");
        assert_eq!(ServerStatus::Stopped.to_string(), "stopped (pid: none)");
    }

    #[tokio::test]
    async fn test_start_writes_pid_file() {
        let install = scratch("start");
        let sup = supervisor(&install, FakeProcesses::with(&[]));
        let pid = sup.start("map-server", false).await.unwrap();
        assert_eq!(sup.stored_pid("map-server").unwrap(), Some(pid));
        assert_eq!(sup.status("map-server").unwrap(), ServerStatus::Running(pid));
    }

    #[tokio::test]
    async fn test_start_skips_running() {
        let install = scratch("skip");
        fs::write(install.pid_file("map-server"), "12").unwrap();
        let sup = supervisor(&install, FakeProcesses::with(&[(12, "map-server")]));
        assert_eq!(sup.start("map-server", false).await.unwrap(), 12);
        assert!(sup.processes.signals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_force_start_replaces_running() {
        let install = scratch("force");
        fs::write(install.pid_file("map-server"), "12").unwrap();
        let sup = supervisor(&install, FakeProcesses::with(&[(12, "map-server")]));
        let pid = sup.start("map-server", true).await.unwrap();
        assert_ne!(pid, 12);
        assert!(!sup.processes.alive(12));
        assert_eq!(sup.stored_pid("map-server").unwrap(), Some(pid));
    }

    #[tokio::test]
    async fn test_start_clears_stale_pid_file() {
        let install = scratch("stale");
        fs::write(install.pid_file("login-server"), "31337").unwrap();
        let sup = supervisor(&install, FakeProcesses::with(&[]));
        let pid = sup.start("login-server", false).await.unwrap();
        assert_ne!(pid, 31337);
        assert_eq!(sup.stored_pid("login-server").unwrap(), Some(pid));
    }

    #[tokio::test]
    async fn test_start_kills_orphans() {
        let install = scratch("orphans");
        let sup = supervisor(&install, FakeProcesses::with(&[(40, "char-server")]));
        let pid = sup.start("char-server", false).await.unwrap();
        assert!(!sup.processes.alive(40));
        assert!(sup.processes.alive(pid));
    }

    #[tokio::test]
    async fn test_stop_terminates_and_removes_pid_file() {
        let install = scratch("stop");
        fs::write(install.pid_file("map-server"), "12").unwrap();
        let sup = supervisor(&install, FakeProcesses::with(&[(12, "map-server")]));
        sup.stop("map-server").await.unwrap();
        assert!(!install.pid_file("map-server").exists());
        assert_eq!(
            *sup.processes.signals.lock().unwrap(),
            vec![(12, StopSignal::Terminate)]
        );
    }

    #[tokio::test]
    async fn test_stop_kills_after_timeout() {
        let install = scratch("stubborn");
        fs::write(install.pid_file("map-server"), "12").unwrap();
        let fake = FakeProcesses::with(&[(12, "map-server")]);
        fake.stubborn.lock().unwrap().insert(12);
        let sup = supervisor(&install, fake);
        sup.stop("map-server").await.unwrap();
        assert_eq!(
            *sup.processes.signals.lock().unwrap(),
            vec![(12, StopSignal::Terminate), (12, StopSignal::Kill)]
        );
        assert!(!sup.processes.alive(12));
    }

    #[tokio::test]
    async fn test_stop_missing_only_removes_pid_file() {
        let install = scratch("stopmissing");
        fs::write(install.pid_file("char-server"), "99").unwrap();
        let sup = supervisor(&install, FakeProcesses::with(&[]));
        sup.stop("char-server").await.unwrap();
        assert!(!install.pid_file("char-server").exists());
        assert!(sup.processes.signals.lock().unwrap().is_empty());
    }
}
