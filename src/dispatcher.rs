//! The dispatcher (executive) loop: spec §4.2, Steps A–H.
//!
//! Runs on its own thread at [`Priority::P_MAX`], strictly above every task,
//! so it always preempts to make scheduling decisions. Never terminates
//! (spec: "the dispatcher thread is created by `start()` and not meant to
//! terminate").

use std::time::Instant;

use crate::executive::ExecutiveCore;
use crate::priority::Priority;
use crate::task::{DeadlineAudit, Task, TaskState};
use crate::time;

/// Drive the frame clock forever. Spawned by
/// [`crate::executive::Executive::start`] on a dedicated thread.
pub(crate) fn run(core: &ExecutiveCore) {
    core.controller
        .set_priority(&core.dispatcher_priority, Priority::P_MAX);

    let mut frame_id = 0usize;
    let mut next_time = Instant::now();

    loop {
        // Step A: frame boundary carry-over audit (informational only; the
        // deadline-miss audit at the end of the *previous* frame already
        // recorded any miss).
        for task in &core.periodic {
            if task.state() == TaskState::Running {
                log::debug!(
                    "frame {frame_id}: task {} carried over from the previous frame",
                    task.id()
                );
            }
        }

        // Step B: timebase.
        let frame_start = next_time;
        next_time = time::advance(frame_start, &core.base, core.schedule.frame_length() as i64);
        let frame_deadline = next_time;
        let slack = core.schedule.slack(frame_id);

        // Step C: aperiodic arbitration.
        let aperiodic_active_high = core
            .aperiodic
            .as_ref()
            .map(|ap| arbitrate_aperiodic(ap, core, frame_id, frame_start, frame_deadline, slack))
            .unwrap_or(false);

        // Step D: periodic release, in frame order.
        release_periodics(core, frame_id, frame_start, frame_deadline, aperiodic_active_high);

        // Step E: slack boundary, only if the aperiodic is stealing slack
        // this frame.
        if aperiodic_active_high {
            let slack_end = time::advance(frame_start, &core.base, slack);
            time::sleep_until(slack_end);
            if let Some(ap) = &core.aperiodic {
                core.controller.set_priority(ap.priority_handle(), Priority::P_MIN);
            }
        }

        // Step F: frame end.
        time::sleep_until(next_time);

        // Step G: deadline audit, periodic and aperiodic alike.
        audit_deadlines(core, frame_id);

        // Step H.
        frame_id = core.schedule.next_frame_index(frame_id);
    }
}

/// Step C. Returns whether the aperiodic is running at `P_MAX - 1`
/// (slack-stealing) this frame.
fn arbitrate_aperiodic(
    ap: &Task,
    core: &ExecutiveCore,
    frame_id: usize,
    frame_start: Instant,
    frame_deadline: Instant,
    slack: i64,
) -> bool {
    if core.latch.sample_and_clear() {
        match ap.state() {
            TaskState::Idle if ap.skip_count() == 0 => {
                ap.release(frame_start, frame_deadline);
            }
            TaskState::Idle => {
                // skip_count > 0 from a prior penalty: drop this request,
                // but the penalty only ever suppresses one admission (spec
                // §3/P5), so clear it now that a release was attempted.
                log::debug!(
                    "frame {frame_id}: aperiodic ({}) request dropped, skip_count pending",
                    ap.thread_name().unwrap_or("<unnamed>")
                );
                ap.clear_skip_count();
            }
            TaskState::Running | TaskState::Pending => {
                log::warn!(
                    "frame {frame_id}: aperiodic ({}) overrun, request dropped while still {:?}",
                    ap.thread_name().unwrap_or("<unnamed>"),
                    ap.state()
                );
                ap.set_skip_count(1);
            }
        }
    }

    if ap.state() == TaskState::Pending {
        if slack > 0 {
            core.controller
                .set_priority(ap.priority_handle(), Priority::P_MAX.minus(1));
            true
        } else {
            core.controller.set_priority(ap.priority_handle(), Priority::P_MIN);
            false
        }
    } else {
        false
    }
}

/// Step D.
fn release_periodics(
    core: &ExecutiveCore,
    frame_id: usize,
    frame_start: Instant,
    frame_deadline: Instant,
    aperiodic_active_high: bool,
) {
    let offset = if aperiodic_active_high { 2 } else { 1 };
    let low = Priority::P_MIN.plus(1);
    let high = Priority::P_MAX.minus(offset);

    for (i, &task_id) in core.schedule.frame(frame_id).tasks.iter().enumerate() {
        let task = &core.periodic[task_id];
        if task.consume_skip() {
            log::debug!("frame {frame_id}: task {task_id} release suppressed (skip penalty)");
            continue;
        }

        let priority = Priority::P_MAX.minus(i as i32 + offset).clamp_between(low, high);
        core.controller.set_priority(task.priority_handle(), priority);
        task.release(frame_start, frame_deadline);
    }
}

/// Step G.
fn audit_deadlines(core: &ExecutiveCore, frame_id: usize) {
    for task in core.periodic.iter().chain(core.aperiodic.as_ref()) {
        match task.audit_deadline() {
            DeadlineAudit::Met => {}
            DeadlineAudit::MissedRunning => {
                log::warn!(
                    "frame {frame_id}: deadline miss, task {} ({}) still running",
                    task.id(),
                    task.thread_name().unwrap_or("<unnamed>")
                );
                core.controller.set_priority(task.priority_handle(), Priority::P_MIN);
            }
            DeadlineAudit::MissedPending => {
                log::warn!(
                    "frame {frame_id}: deadline miss, task {} ({}) never started, release abandoned",
                    task.id(),
                    task.thread_name().unwrap_or("<unnamed>")
                );
                core.controller.set_priority(task.priority_handle(), Priority::P_MIN);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aperiodic::RequestLatch;
    use crate::executive::{Executive, ExecutiveCore};
    use crate::priority::{PriorityHandle, RecordingController};
    use crate::schedule::{Frame, Schedule};
    use crate::time::{Quanta, TimeBase};
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Build an [`ExecutiveCore`] directly (bypassing [`Executive`]'s
    /// configuration API) so Steps C/D/G can be exercised in isolation,
    /// without waiting on real frame sleeps.
    fn core_with(frame_length: u64, frames: &[Vec<usize>], periodic: Vec<Task>, aperiodic: Option<Task>) -> ExecutiveCore {
        let wcets: Vec<Quanta> = periodic.iter().map(Task::wcet).collect();
        let mut schedule = Schedule::new(frame_length);
        for frame in frames {
            schedule.push(Frame::new(frame.clone()), |t| wcets[t]);
        }
        ExecutiveCore {
            base: TimeBase::from_millis(10),
            schedule,
            periodic,
            aperiodic,
            latch: Arc::new(RequestLatch::new()),
            controller: Arc::new(RecordingController),
            dispatcher_priority: PriorityHandle::new(Priority::P_MIN),
        }
    }

    fn spawn(id: usize, wcet: u64) -> Task {
        Task::spawn(id, Quanta::new(wcet), Priority::P_MIN, || {}).expect("failed to spawn test worker thread")
    }

    // P1 (priority strictness) / scenario 3 (priority ordering).
    #[test]
    fn release_periodics_assigns_strictly_decreasing_priority_by_position() {
        let core = core_with(10, &[vec![0, 1]], vec![spawn(0, 1), spawn(1, 1)], None);

        let now = Instant::now();
        release_periodics(&core, 0, now, now, false);

        let p0 = core.periodic[0].priority_handle().get();
        let p1 = core.periodic[1].priority_handle().get();
        assert!(p0 > p1, "earlier frame position must get strictly higher priority");
        assert!(Priority::P_MAX > p0, "dispatcher priority must dominate every released task");
    }

    // P5 (skip penalty) / scenario 2 (overrun + skip), periodic side.
    #[test]
    fn release_periodics_suppresses_exactly_one_release_on_skip() {
        let (start_tx, start_rx) = mpsc::channel();
        let (hold_tx, hold_rx) = mpsc::channel::<()>();
        let task = Task::spawn(0, Quanta::new(1), Priority::P_MIN, move || {
            start_tx.send(()).unwrap();
            hold_rx.recv().unwrap();
        })
        .expect("failed to spawn test worker thread");
        task.set_skip_count(1);
        let core = core_with(10, &[vec![0]], vec![task], None);

        let now = Instant::now();
        release_periodics(&core, 0, now, now, false);
        assert!(core.periodic[0].is_idle(), "the penalized release must be suppressed");
        assert_eq!(core.periodic[0].skip_count(), 0, "the penalty is consumed, not reapplied");

        release_periodics(&core, 0, now, now, false);
        start_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(core.periodic[0].state(), TaskState::Running, "the following release must proceed normally");

        hold_tx.send(()).unwrap();
    }

    // P5 / scenario 2, via the Step G audit path: a still-Running task is
    // demoted and penalized once.
    #[test]
    fn audit_deadlines_demotes_and_penalizes_a_running_task() {
        let (start_tx, start_rx) = mpsc::channel();
        let (hold_tx, hold_rx) = mpsc::channel::<()>();
        let task = Task::spawn(0, Quanta::new(1), Priority::P_MAX, move || {
            start_tx.send(()).unwrap();
            hold_rx.recv().unwrap();
        })
        .expect("failed to spawn test worker thread");
        task.release(Instant::now(), Instant::now());
        start_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let core = core_with(10, &[vec![0]], vec![task], None);
        audit_deadlines(&core, 0);

        assert_eq!(core.periodic[0].skip_count(), 1);
        assert_eq!(core.periodic[0].priority_handle().get(), Priority::P_MIN);
        assert_eq!(core.periodic[0].state(), TaskState::Running, "a missed-but-running task carries over, it is not reset");

        hold_tx.send(()).unwrap();
    }

    // P4 (slack safety) / scenario 4 (slack stealing admitted): a pending
    // aperiodic in a frame with slack is admitted above periodics.
    #[test]
    fn arbitrate_aperiodic_with_slack_steals_priority_above_periodics() {
        let core = core_with(10, &[vec![]], vec![], Some(spawn(1, 1)));
        core.latch.request();

        let now = Instant::now();
        let active = arbitrate_aperiodic(core.aperiodic.as_ref().unwrap(), &core, 0, now, now, 5);

        assert!(active, "a request with positive slack must be admitted at slack-stealing priority");
        assert_eq!(core.aperiodic.as_ref().unwrap().priority_handle().get(), Priority::P_MAX.minus(1));
    }

    // P4 / scenario 6 (no-slack frame): a pending aperiodic with no slack
    // runs only at the bare floor.
    #[test]
    fn arbitrate_aperiodic_without_slack_runs_at_floor_priority() {
        let core = core_with(10, &[vec![]], vec![], Some(spawn(1, 1)));
        core.latch.request();

        let now = Instant::now();
        let active = arbitrate_aperiodic(core.aperiodic.as_ref().unwrap(), &core, 0, now, now, 0);

        assert!(!active, "a no-slack frame must never admit the aperiodic above P_MIN");
        assert_eq!(core.aperiodic.as_ref().unwrap().priority_handle().get(), Priority::P_MIN);
    }

    // spec §7 "aperiodic overrun": a request arriving while the previous
    // release is still outstanding is dropped and penalized.
    #[test]
    fn arbitrate_aperiodic_overrun_drops_request_and_penalizes() {
        let (start_tx, start_rx) = mpsc::channel();
        let (hold_tx, hold_rx) = mpsc::channel::<()>();
        let ap = Task::spawn(1, Quanta::new(1), Priority::P_MIN, move || {
            start_tx.send(()).unwrap();
            hold_rx.recv().unwrap();
        })
        .expect("failed to spawn test worker thread");
        ap.release(Instant::now(), Instant::now());
        start_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let core = core_with(10, &[vec![]], vec![], Some(ap));
        core.latch.request();

        let now = Instant::now();
        let active = arbitrate_aperiodic(core.aperiodic.as_ref().unwrap(), &core, 0, now, now, 5);

        assert!(!active);
        assert_eq!(core.aperiodic.as_ref().unwrap().skip_count(), 1);

        hold_tx.send(()).unwrap();
    }

    // P5, aperiodic side: the standing penalty suppresses exactly the next
    // attempted release, then clears (not a permanent drop).
    #[test]
    fn arbitrate_aperiodic_standing_penalty_clears_after_one_drop() {
        let core = core_with(10, &[vec![]], vec![], Some(spawn(1, 1)));
        core.aperiodic.as_ref().unwrap().set_skip_count(1);
        core.latch.request();

        let now = Instant::now();
        let active = arbitrate_aperiodic(core.aperiodic.as_ref().unwrap(), &core, 0, now, now, 5);
        assert!(!active, "the penalized request must still be dropped");
        assert_eq!(
            core.aperiodic.as_ref().unwrap().skip_count(),
            0,
            "the penalty must clear after being applied once (P5), not persist forever"
        );

        // the very next request must be admitted normally.
        core.latch.request();
        let active = arbitrate_aperiodic(core.aperiodic.as_ref().unwrap(), &core, 1, now, now, 5);
        assert!(active, "once cleared, a subsequent request must be admitted");
    }

    // P7 (latch coalescing) at the dispatcher's own sampling boundary:
    // several requests collapse into a single admission.
    #[test]
    fn arbitrate_aperiodic_coalesces_repeated_requests_into_one_admission() {
        let core = core_with(10, &[vec![]], vec![], Some(spawn(1, 1)));
        core.latch.request();
        core.latch.request();
        core.latch.request();

        let now = Instant::now();
        let active = arbitrate_aperiodic(core.aperiodic.as_ref().unwrap(), &core, 0, now, now, 5);
        assert!(active);
        assert_eq!(core.aperiodic.as_ref().unwrap().state(), TaskState::Pending);

        // no further requests were latched; a second sampling finds nothing.
        assert!(!core.latch.sample_and_clear());
    }

    // P6 (frame periodicity) / scenario 1, end to end through the public
    // `Executive` API: consecutive releases land one frame period apart,
    // within generous jitter tolerance (see SPEC_FULL.md §8).
    #[test]
    fn frame_period_matches_nominal_within_tolerance() {
        let exec = Arc::new(Executive::new(1, 5, 10)); // frame_length = 50ms
        let timestamps = Arc::new(Mutex::new(Vec::new()));
        {
            let timestamps = timestamps.clone();
            exec.set_periodic_task(0, Quanta::new(1), move || {
                timestamps.lock().push(Instant::now());
            })
            .unwrap();
        }
        exec.add_frame(vec![0]).unwrap();
        exec.start().unwrap();

        thread::sleep(Duration::from_millis(560));
        let stamps = timestamps.lock().clone();
        assert!(stamps.len() >= 8, "expected at least 8 releases, got {}", stamps.len());

        for pair in stamps.windows(2) {
            let delta_ms = pair[1].duration_since(pair[0]).as_millis() as i64;
            assert!(
                (35..=70).contains(&delta_ms),
                "frame period drifted outside tolerance: {delta_ms}ms"
            );
        }
    }

    // P4 / scenario 5 (slack stealing bounded): an aperiodic body that
    // outlasts the frame's slack budget is demoted at the slack boundary
    // and carries over as a deadline miss, while the periodic still meets
    // its own deadline.
    #[test]
    fn aperiodic_body_exceeding_slack_is_demoted_and_carries_over() {
        // frame_length = 10 units = 100ms, periodic wcet = 1 -> slack = 9
        // units = 90ms; aperiodic body sleeps well past the slack boundary.
        let exec = Arc::new(Executive::new(1, 10, 10));
        exec.set_periodic_task(0, Quanta::new(1), || {}).unwrap();
        exec.set_aperiodic_task(Quanta::new(3), || {
            thread::sleep(Duration::from_millis(500));
        })
        .unwrap();
        exec.add_frame(vec![0]).unwrap();
        exec.start().unwrap();

        exec.ap_task_request();
        thread::sleep(Duration::from_millis(250));

        let snapshot = exec.snapshot();
        let aperiodic = snapshot.last().expect("aperiodic snapshot present");
        assert!(
            aperiodic.skip_count >= 1,
            "an aperiodic body outlasting its slack must be recorded as a deadline miss"
        );
    }
}
