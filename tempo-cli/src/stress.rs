//! Stress driver: how many begin/end pairs per second can the hot path
//! sustain, and what does one pair cost on top of a tight transcendental
//! loop.

use crate::Role;
use std::hint::black_box;
use std::thread;
use std::time::{Duration, Instant};
use tempo_core::{Application, Monitor};

const START_X: f64 = 16031.099125085183;

pub fn run(channel: &str, role: Role, iterations: u64, threads: usize) -> anyhow::Result<()> {
    match role {
        Role::Monitor => run_monitor(channel),
        Role::Application => run_application(channel, iterations, threads),
    }
}

fn run_monitor(channel: &str) -> anyhow::Result<()> {
    let mut monitor = Monitor::bind(channel)?;
    monitor.wait_start()?;
    loop {
        thread::sleep(Duration::from_secs(1));
        match monitor.sample()? {
            Some(sample) => println!("received sample: {sample}"),
            None => break,
        }
    }
    println!(
        "[monitor] final summary: {} tasks in {} ms",
        monitor.total_tasks(),
        monitor.execution_time_ms()
    );
    Ok(())
}

fn run_application(channel: &str, iterations: u64, threads: usize) -> anyhow::Result<()> {
    let mut app = Application::connect(channel, threads, None)?;
    let per_thread = iterations / threads as u64;

    let start = Instant::now();
    thread::scope(|scope| {
        for thread_id in 0..threads {
            let app = &app;
            scope.spawn(move || {
                let mut x = START_X;
                for _ in 0..per_thread {
                    app.begin(thread_id);
                    x = x.sin();
                    app.end(thread_id);
                }
                black_box(x);
            });
        }
    });
    let instrumented = start.elapsed();

    app.terminate()?;
    println!(
        "maximum throughput (iterations/sec): {:.0}",
        app.total_tasks() as f64 / (app.execution_time_ms() as f64 / 1000.0)
    );

    // Re-run without instrumentation for the overhead baseline. Retry if a
    // scheduling outlier makes the bare run slower than the instrumented
    // one.
    let bare = loop {
        let start = Instant::now();
        thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| {
                    let mut x = START_X;
                    for _ in 0..per_thread {
                        x = x.sin();
                    }
                    black_box(x);
                });
            }
        });
        let bare = start.elapsed();
        if bare <= instrumented {
            break bare;
        }
    };

    println!(
        "begin/end pair overhead (ns): {:.2}",
        (instrumented - bare).as_nanos() as f64 / iterations as f64
    );
    Ok(())
}
