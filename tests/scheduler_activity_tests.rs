//! Scheduler activity-detection tests with scriptable devices.

use juice_monitor::device::PolledDevice;
use juice_monitor::sched::Scheduler;
use juice_monitor::sim::SimDevice;

fn cycle(sched: &mut Scheduler, devices: &mut [&mut dyn PolledDevice], now: i64) -> bool {
    sched.begin_cycle(now);
    sched.poll_all(devices);
    sched.end_cycle(now + 100).should_sleep
}

#[test]
fn all_stale_and_quiet_console_means_sleep() {
    let mut sched = Scheduler::new();
    let mut a = SimDevice::new("a");
    let mut b = SimDevice::new("b");
    let mut c = SimDevice::new("c");

    let sleep = cycle(&mut sched, &mut [&mut a, &mut b, &mut c], 0);
    assert!(sleep);
    assert_eq!(a.polls(), 1);
    assert_eq!(b.polls(), 1);
    assert_eq!(c.polls(), 1);
}

#[test]
fn one_fresh_device_wakes_regardless_of_the_others() {
    let mut sched = Scheduler::new();
    let mut a = SimDevice::new("a");
    let mut b = SimDevice::new("b");
    let mut c = SimDevice::new("c");
    b.set_fresh();

    let sleep = cycle(&mut sched, &mut [&mut a, &mut b, &mut c], 0);
    assert!(!sleep);
}

#[test]
fn consume_and_refill_produces_a_new_transition() {
    let mut sched = Scheduler::new();
    let mut dev = SimDevice::new("dev");

    dev.set_fresh();
    assert!(!cycle(&mut sched, &mut [&mut dev], 0));
    // Unconsumed: no new transition
    assert!(cycle(&mut sched, &mut [&mut dev], 200));

    dev.consume();
    assert!(cycle(&mut sched, &mut [&mut dev], 400));
    dev.set_fresh();
    assert!(!cycle(&mut sched, &mut [&mut dev], 600));
}

#[test]
fn devices_poll_in_registration_order_every_cycle() {
    let mut sched = Scheduler::new();
    let mut a = SimDevice::new("a");
    let mut b = SimDevice::new("b");

    for n in 0..5 {
        cycle(&mut sched, &mut [&mut a, &mut b], n * 100);
    }
    assert_eq!(a.polls(), 5);
    assert_eq!(b.polls(), 5);
    assert_eq!(sched.cycles(), 5);
}

#[test]
fn cycle_timer_is_observability_only() {
    let mut sched = Scheduler::new();
    let mut dev = SimDevice::new("dev");

    // Wildly different durations change the stopwatch, never the decision
    sched.begin_cycle(0);
    sched.poll_all(&mut [&mut dev]);
    let slow = sched.end_cycle(50_000);
    assert!(slow.should_sleep);
    assert_eq!(slow.duration_us, 50_000);

    dev.set_fresh();
    sched.begin_cycle(60_000);
    sched.poll_all(&mut [&mut dev]);
    let fast = sched.end_cycle(60_001);
    assert!(!fast.should_sleep);
    assert_eq!(fast.duration_us, 1);

    assert_eq!(sched.stopwatch().worst_us(), 50_000);
    assert_eq!(sched.stopwatch().best_us(), 1);
}
