//! End-to-end lifecycle tests for the `drover` binary.
//!
//! Each test writes a TOML configuration into a temporary directory, runs the
//! real binary against shell-script workers and drives it with signals.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin_cmd;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use rstest::{fixture, rstest};
use tempfile::TempDir;

const WORKER: &str = "trap 'exit 0' QUIT TERM; while :; do sleep 0.1; done";
const PATIENCE: Duration = Duration::from_secs(10);

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn pid_path(&self) -> PathBuf {
        self.path("drover.pid")
    }

    /// Writes a configuration with recording hooks plus `extra` lines.
    fn write_config(&self, extra: &str) -> PathBuf {
        let setup = self.path("setup.log");
        let teardown = self.path("teardown.log");
        let contents = format!(
            concat!(
                "worker_processes = 2\n",
                "work_interval = 0.5\n",
                "log_format = \"compact\"\n",
                "pid_path = {pid:?}\n",
                "worker_command = {worker:?}\n",
                "setup_command = \"echo $DROVER_PID >> '{setup}'\"\n",
                "teardown_command = \"echo $DROVER_PID >> '{teardown}'\"\n",
                "{extra}",
            ),
            pid = self.pid_path().display().to_string(),
            worker = WORKER,
            setup = setup.display(),
            teardown = teardown.display(),
            extra = extra,
        );
        let path = self.path("drover.toml");
        fs::write(&path, contents).expect("write configuration");
        path
    }

    fn spawn(&self, config: &Path) -> Child {
        Command::new(env!("CARGO_BIN_EXE_drover"))
            .arg("--config-path")
            .arg(config)
            .env_remove("DROVER_REINCARNATION")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn drover")
    }

    fn lines(&self, name: &str) -> Vec<String> {
        fs::read_to_string(self.path(name))
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn wait_for_lines(&self, name: &str, count: usize) -> Vec<String> {
        wait_until(|| {
            let lines = self.lines(name);
            (lines.len() >= count).then_some(lines)
        })
        .unwrap_or_else(|| panic!("{name} never reached {count} lines"))
    }

    fn read_pid(&self) -> Pid {
        let raw = wait_until(|| fs::read_to_string(self.pid_path()).ok())
            .expect("pid file should appear");
        Pid::from_raw(raw.trim().parse().expect("pid file should hold a pid"))
    }
}

#[fixture]
fn sandbox() -> Sandbox {
    Sandbox {
        dir: TempDir::new().expect("create temp dir"),
    }
}

fn wait_until<T>(mut poll: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + PATIENCE;
    while Instant::now() < deadline {
        if let Some(value) = poll() {
            return Some(value);
        }
        thread::sleep(Duration::from_millis(50));
    }
    None
}

fn wait_for_exit(child: &mut Child) -> ExitStatus {
    wait_until(|| child.try_wait().expect("poll drover"))
        .unwrap_or_else(|| {
            child.kill().ok();
            panic!("drover did not exit");
        })
}

fn signal(pid: Pid, signal: Signal) {
    kill(pid, signal).expect("signal drover");
}

#[rstest]
fn quit_stops_workers_and_removes_the_pid_file(sandbox: Sandbox) {
    let config = sandbox.write_config("");
    let mut child = sandbox.spawn(&config);
    let pid = sandbox.read_pid();
    assert_eq!(pid.as_raw().unsigned_abs(), child.id());
    sandbox.wait_for_lines("setup.log", 1);

    signal(pid, Signal::SIGQUIT);
    let status = wait_for_exit(&mut child);

    assert!(status.success(), "unexpected status: {status}");
    assert!(!sandbox.pid_path().exists());
    assert_eq!(sandbox.lines("teardown.log"), [pid.to_string()]);
}

#[rstest]
fn workers_receive_their_partition_and_interval(sandbox: Sandbox) {
    let assignments = sandbox.path("assignments.log");
    let config = sandbox.write_config("");
    let contents = fs::read_to_string(&config)
        .expect("read configuration")
        .lines()
        .filter(|line| !line.starts_with("worker_") && !line.starts_with("work_interval"))
        .map(str::to_owned)
        .chain([
            "workload = [\"a\", \"b\"]".to_owned(),
            "work_interval = 2".to_owned(),
            format!(
                "worker_command = {:?}",
                format!(
                    "echo \"$DROVER_WORKER_INDEX $QUEUES $INTERVAL\" >> '{}'; {WORKER}",
                    assignments.display()
                )
            ),
        ])
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(&config, contents).expect("rewrite configuration");

    let mut child = sandbox.spawn(&config);
    let pid = sandbox.read_pid();
    let mut lines = sandbox.wait_for_lines("assignments.log", 2);
    lines.sort();
    assert_eq!(lines, ["0 a 2", "1 b 2"]);

    signal(pid, Signal::SIGQUIT);
    assert!(wait_for_exit(&mut child).success());
}

#[rstest]
fn a_minimal_configuration_runs_one_worker_on_every_queue(sandbox: Sandbox) {
    let assignments = sandbox.path("assignments.log");
    let worker = format!(
        "echo \"$DROVER_WORKER_INDEX $QUEUES\" >> '{}'; {WORKER}",
        assignments.display()
    );
    let config = sandbox.path("drover.toml");
    let contents = format!(
        "pid_path = {:?}\nworker_command = {worker:?}\n",
        sandbox.pid_path().display().to_string(),
    );
    fs::write(&config, contents).expect("write configuration");

    let mut child = sandbox.spawn(&config);
    let pid = sandbox.read_pid();
    let lines = sandbox.wait_for_lines("assignments.log", 1);
    assert_eq!(lines, ["0 *"]);

    signal(pid, Signal::SIGQUIT);
    let status = wait_for_exit(&mut child);

    assert!(status.success(), "unexpected status: {status}");
    assert_eq!(sandbox.lines("assignments.log"), ["0 *"]);
    assert!(!sandbox.pid_path().exists());
}

#[rstest]
fn hangup_reincarnates_under_the_same_pid(sandbox: Sandbox) {
    let config = sandbox.write_config("");
    let mut child = sandbox.spawn(&config);
    let pid = sandbox.read_pid();
    sandbox.wait_for_lines("setup.log", 1);

    signal(pid, Signal::SIGHUP);
    let setups = sandbox.wait_for_lines("setup.log", 2);
    assert_eq!(setups, [pid.to_string(), pid.to_string()]);
    assert_eq!(sandbox.read_pid(), pid);

    signal(pid, Signal::SIGQUIT);
    let status = wait_for_exit(&mut child);

    assert!(status.success(), "unexpected status: {status}");
    assert_eq!(sandbox.lines("teardown.log").len(), 2);
    assert!(!sandbox.pid_path().exists());
}

#[rstest]
fn slow_teardown_does_not_hold_the_exit(sandbox: Sandbox) {
    let config = sandbox.write_config("");
    let contents = fs::read_to_string(&config)
        .expect("read configuration")
        .lines()
        .filter(|line| !line.starts_with("teardown_command"))
        .chain(["teardown_command = \"sleep 5\"", "teardown_timeout = 0.5"])
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(&config, contents).expect("rewrite configuration");

    let mut child = sandbox.spawn(&config);
    let pid = sandbox.read_pid();
    sandbox.wait_for_lines("setup.log", 1);

    let started = Instant::now();
    signal(pid, Signal::SIGQUIT);
    let status = wait_for_exit(&mut child);

    assert!(status.success(), "unexpected status: {status}");
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[rstest]
fn daemon_reports_its_pid_and_stops_on_quit(sandbox: Sandbox) {
    let extra = format!(
        "daemon = true\nrunpath = {:?}\nstderr_path = {:?}\n",
        sandbox.dir.path().display().to_string(),
        sandbox.path("drover.err").display().to_string(),
    );
    let config = sandbox.write_config(&extra);

    cargo_bin_cmd!("drover")
        .arg("--config-path")
        .arg(&config)
        .env_remove("DROVER_REINCARNATION")
        .assert()
        .success()
        .stdout(contains("started with pid"));

    let pid = sandbox.read_pid();
    sandbox.wait_for_lines("setup.log", 1);
    signal(pid, Signal::SIGQUIT);

    let removed = wait_until(|| (!sandbox.pid_path().exists()).then_some(()));
    assert!(removed.is_some(), "the daemon should remove its pid file");
    assert_eq!(sandbox.lines("teardown.log"), [pid.to_string()]);
}

#[rstest]
fn daemon_failure_is_reported_by_the_launcher(sandbox: Sandbox) {
    let extra = format!(
        "daemon = true\nrunpath = {:?}\n",
        sandbox.path("missing").display().to_string(),
    );
    let config = sandbox.write_config(&extra);

    cargo_bin_cmd!("drover")
        .arg("--config-path")
        .arg(&config)
        .env_remove("DROVER_REINCARNATION")
        .assert()
        .failure()
        .stderr(contains("failed to start").and(contains("runpath")));

    assert!(!sandbox.pid_path().exists());
    assert!(sandbox.lines("setup.log").is_empty());
}

#[test]
fn missing_worker_command_fails_before_starting() {
    cargo_bin_cmd!("drover")
        .env_remove("DROVER_REINCARNATION")
        .env_remove("DROVER_WORKER_COMMAND")
        .assert()
        .failure()
        .stderr(contains("worker_command must be set"));
}
