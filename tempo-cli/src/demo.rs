//! Paced demo: one worker alternating a fixed idle and compute phase,
//! sampled once per second by the monitor.

use crate::Role;
use std::thread;
use std::time::Duration;
use tempo_core::{Application, Monitor};

const IDLE: Duration = Duration::from_millis(100);
const COMPUTE: Duration = Duration::from_millis(300);
const SAMPLING_INTERVAL: Duration = Duration::from_secs(1);

pub fn run(channel: &str, role: Role, iterations: u64) -> anyhow::Result<()> {
    match role {
        Role::Monitor => run_monitor(channel),
        Role::Application => run_application(channel, iterations),
    }
}

fn run_monitor(channel: &str) -> anyhow::Result<()> {
    let mut monitor = Monitor::bind(channel)?;
    println!("[monitor] waiting for application start");
    let pid = monitor.wait_start()?;
    println!("[monitor] application started, pid {pid}");

    loop {
        thread::sleep(SAMPLING_INTERVAL);
        match monitor.sample()? {
            Some(sample) => println!("received sample: {sample}"),
            None => break,
        }
    }
    println!(
        "[monitor] application terminated: {} tasks in {} ms",
        monitor.total_tasks(),
        monitor.execution_time_ms()
    );
    Ok(())
}

fn run_application(channel: &str, iterations: u64) -> anyhow::Result<()> {
    let mut app = Application::connect(channel, 1, None)?;
    println!("[application] connected");

    for _ in 0..iterations {
        thread::sleep(IDLE);
        app.begin(0);
        thread::sleep(COMPUTE);
        app.end(0);
    }
    app.terminate()?;
    println!(
        "[application] done: {} tasks in {} ms",
        app.total_tasks(),
        app.execution_time_ms()
    );
    Ok(())
}
