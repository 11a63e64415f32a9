//! Process-spawning end-to-end scenarios covering all three IPC methods.
//! These fork real child processes, bind a real TCP port, and create real
//! FIFOs/PID files, so they are `#[ignore]`d by default — opt in with
//! `cargo test -- --ignored`.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

fn manage_bin() -> &'static str {
    env!("CARGO_BIN_EXE_manage")
}
fn compute_bin() -> &'static str {
    env!("CARGO_BIN_EXE_compute")
}
fn report_bin() -> &'static str {
    env!("CARGO_BIN_EXE_report")
}

fn kill_child(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Scenario 1: SHMEM basic — `manage m 500`, one worker, `report m`
/// prints the three known perfect numbers below 500 and "Testing complete".
#[test]
#[ignore]
fn shmem_basic() {
    let dir = tempfile::tempdir().unwrap();
    let manage = Command::new(manage_bin())
        .args(["m", "500"])
        .current_dir(dir.path())
        .env("PERFNUM_SHM_NAME", "perfnum-e2e-shmem-basic")
        .spawn()
        .expect("spawn manage");

    std::thread::sleep(Duration::from_millis(200));

    let compute = Command::new(compute_bin())
        .arg("m")
        .current_dir(dir.path())
        .env("PERFNUM_SHM_NAME", "perfnum-e2e-shmem-basic")
        .status()
        .expect("run compute");
    assert!(compute.success());

    let output = Command::new(report_bin())
        .arg("m")
        .current_dir(dir.path())
        .env("PERFNUM_SHM_NAME", "perfnum-e2e-shmem-basic")
        .output()
        .expect("run report");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains('6'));
    assert!(stdout.contains("28"));
    assert!(stdout.contains("496"));
    assert!(stdout.contains("Testing complete"));

    Command::new(report_bin())
        .args(["m", "-k"])
        .current_dir(dir.path())
        .env("PERFNUM_SHM_NAME", "perfnum-e2e-shmem-basic")
        .status()
        .ok();
    kill_child(manage);
}

/// Scenario 2: SHMEM parallel race — three workers against `limit=100`
/// must between them test every candidate exactly once and find `{6, 28}`.
#[test]
#[ignore]
fn shmem_parallel_race() {
    let dir = tempfile::tempdir().unwrap();
    let manage = Command::new(manage_bin())
        .args(["m", "100"])
        .current_dir(dir.path())
        .env("PERFNUM_SHM_NAME", "perfnum-e2e-shmem-race")
        .spawn()
        .expect("spawn manage");

    std::thread::sleep(Duration::from_millis(200));

    let workers: Vec<Child> = (0..3)
        .map(|_| {
            Command::new(compute_bin())
                .arg("m")
                .current_dir(dir.path())
                .env("PERFNUM_SHM_NAME", "perfnum-e2e-shmem-race")
                .spawn()
                .expect("spawn compute")
        })
        .collect();
    for mut w in workers {
        let _ = w.wait();
    }

    let output = Command::new(report_bin())
        .arg("m")
        .current_dir(dir.path())
        .env("PERFNUM_SHM_NAME", "perfnum-e2e-shmem-race")
        .output()
        .expect("run report");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains('6'));
    assert!(stdout.contains("28"));
    assert!(stdout.contains("total-tested 100"));

    Command::new(report_bin())
        .args(["m", "-k"])
        .current_dir(dir.path())
        .env("PERFNUM_SHM_NAME", "perfnum-e2e-shmem-race")
        .status()
        .ok();
    kill_child(manage);
}

/// Scenario 3: PIPES pre-partition — `manage p 30 3`; reporter observes
/// `6` and `28` exactly once, then "Computation complete".
#[test]
#[ignore]
fn pipes_pre_partition() {
    let dir = tempfile::tempdir().unwrap();
    let manage = Command::new(manage_bin())
        .args(["p", "30", "3"])
        .current_dir(dir.path())
        .spawn()
        .expect("spawn manage");

    std::thread::sleep(Duration::from_millis(100));
    let output = Command::new(report_bin())
        .arg("p")
        .current_dir(dir.path())
        .output()
        .expect("run report");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let hits: Vec<&str> = stdout.lines().filter(|l| *l == "6" || *l == "28").collect();
    assert_eq!(hits, vec!["6", "28"]);
    assert!(stdout.contains("Computation complete"));

    kill_child(manage);
}

/// Scenario 4: PIPES worker crash — one of four workers is killed before
/// it finishes; the reporter should see the lost-results warning while
/// the remaining workers keep going.
#[test]
#[ignore]
fn pipes_worker_crash() {
    let dir = tempfile::tempdir().unwrap();
    let manage = Command::new(manage_bin())
        .args(["p", "1000", "4"])
        .current_dir(dir.path())
        .spawn()
        .expect("spawn manage");

    std::thread::sleep(Duration::from_millis(100));
    if let Some(victim) = youngest_child_pid(manage.id()) {
        let _ = Command::new("kill").args(["-INT", &victim.to_string()]).status();
    }

    let output = Command::new(report_bin())
        .arg("p")
        .current_dir(dir.path())
        .output()
        .expect("run report");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("exited prematurely"));

    kill_child(manage);
}

/// Lists the immediate child pids of `ppid` via `ps`, returning the last
/// one found. Linux-only; good enough for this opt-in integration test.
fn youngest_child_pid(ppid: u32) -> Option<u32> {
    let output = Command::new("ps")
        .args(["--no-headers", "-o", "pid", "--ppid", &ppid.to_string()])
        .output()
        .ok()?;
    String::from_utf8_lossy(&output.stdout)
        .split_whitespace()
        .filter_map(|s| s.parse().ok())
        .last()
}

/// Scenario 5: SOCKET late subscriber — a reporter connecting after two
/// perfect numbers are already found receives the replayed history.
#[test]
#[ignore]
fn socket_late_subscriber() {
    let dir = tempfile::tempdir().unwrap();
    let manage = Command::new(manage_bin())
        .args(["s", "30"])
        .current_dir(dir.path())
        .env("PERFNUM_TCP_PORT", "20054")
        .spawn()
        .expect("spawn manage");

    std::thread::sleep(Duration::from_millis(200));
    let mut worker = Command::new(compute_bin())
        .args(["s", "127.0.0.1"])
        .env("PERFNUM_TCP_PORT", "20054")
        .spawn()
        .expect("spawn compute");
    let _ = worker.wait();

    let output = Command::new(report_bin())
        .args(["s", "127.0.0.1"])
        .env("PERFNUM_TCP_PORT", "20054")
        .output()
        .expect("run report");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains('6'));
    assert!(stdout.contains("28"));

    Command::new(report_bin())
        .args(["s", "127.0.0.1", "-k"])
        .env("PERFNUM_TCP_PORT", "20054")
        .status()
        .ok();
    kill_child(manage);
}

/// Scenario 6: SOCKET remote kill — `report s 127.0.0.1 -k` tears the
/// server down cleanly while a worker is still connected.
#[test]
#[ignore]
fn socket_remote_kill() {
    let dir = tempfile::tempdir().unwrap();
    let mut manage = Command::new(manage_bin())
        .args(["s", "1000"])
        .current_dir(dir.path())
        .env("PERFNUM_TCP_PORT", "20154")
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn manage");

    std::thread::sleep(Duration::from_millis(200));
    let _worker = Command::new(compute_bin())
        .args(["s", "127.0.0.1"])
        .env("PERFNUM_TCP_PORT", "20154")
        .spawn()
        .expect("spawn compute");

    std::thread::sleep(Duration::from_millis(100));
    let status = Command::new(report_bin())
        .args(["s", "127.0.0.1", "-k"])
        .env("PERFNUM_TCP_PORT", "20154")
        .status()
        .expect("run report -k");
    assert!(status.success());

    let exit = manage.wait().expect("manage exits after KILL");
    assert!(exit.success());

    if let Some(stdout) = manage.stdout.take() {
        let reader = BufReader::new(stdout);
        for line in reader.lines().flatten() {
            let _ = line;
        }
    }
}
