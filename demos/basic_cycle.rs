//! Small runnable demonstration of the cyclic executive: two periodic tasks
//! sharing a frame and one aperiodic task serviced via slack-stealing.
//!
//! The schedule table itself is caller-driven configuration (spec §1 marks
//! its construction out of scope for the core); this binary is just a thin
//! wiring harness, not a general-purpose CLI for arbitrary schedules.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cyclic_executive::prelude::*;

const DEFAULT_AFTER_HELP: &str = "Refer to the crate's documentation for further detail";

#[derive(clap::Parser, Debug)]
#[command(after_help = DEFAULT_AFTER_HELP)]
struct Args {
    /// Frame length, in time units
    #[arg(long, default_value_t = 10)]
    frame_length: u64,

    /// Duration of one time unit, in milliseconds
    #[arg(long, default_value_t = TimeBase::DEFAULT_UNIT_MS)]
    unit_ms: u64,

    /// How long to run the demo before exiting, in seconds
    #[arg(long, default_value_t = 3)]
    run_seconds: u64,
}

fn main() {
    env_logger::init();
    let args = <Args as clap::Parser>::parse();

    let exec = Arc::new(Executive::new(2, args.frame_length, args.unit_ms));

    let releases_a = Arc::new(AtomicU32::new(0));
    {
        let releases_a = releases_a.clone();
        exec.set_periodic_task(0, Quanta::new(2), move || {
            releases_a.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
        })
        .expect("task id 0 is in range");
    }

    let releases_b = Arc::new(AtomicU32::new(0));
    {
        let releases_b = releases_b.clone();
        exec.set_periodic_task(1, Quanta::new(2), move || {
            releases_b.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
        })
        .expect("task id 1 is in range");
    }

    let aperiodic_runs = Arc::new(AtomicU32::new(0));
    {
        let aperiodic_runs = aperiodic_runs.clone();
        exec.set_aperiodic_task(Quanta::new(3), move || {
            aperiodic_runs.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
        })
        .expect("aperiodic registered at most once");
    }

    exec.add_frame(vec![0, 1]).expect("task ids 0 and 1 are in range");
    exec.start().expect("configuration is valid");

    // Request the aperiodic a few times over the run, exercising
    // slack-stealing and latch coalescing.
    {
        let exec = exec.clone();
        thread::spawn(move || {
            for _ in 0..3 {
                exec.ap_task_request();
                thread::sleep(Duration::from_millis(40));
            }
        });
    }

    thread::sleep(Duration::from_secs(args.run_seconds));

    println!(
        "task 0 releases: {}, task 1 releases: {}, aperiodic runs: {}",
        releases_a.load(Ordering::SeqCst),
        releases_b.load(Ordering::SeqCst),
        aperiodic_runs.load(Ordering::SeqCst),
    );
    for snapshot in exec.snapshot() {
        println!("{:?}", snapshot.state);
    }
}
