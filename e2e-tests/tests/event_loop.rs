//! End-to-end scenarios for the scheduler: full loop turns driven by the
//! scripted driver and the mock clock.

use rstest::rstest;
use vault_e2e_tests::{
    init, journal_finalizer, Closer, Journal, RaceParent, Returner, Sleeper, SignalSender,
    SignalWaiter, Waiter, YieldsGarbage,
};
use vault_executor::{
    clear, close, run, schedule, schedule_with, stats, Error, Race, Signal, Value,
    QUEUE_CAPACITY,
};
use vault_mock::{MockClock, MockDriver};
use vault_timers::Ticks;

fn fresh() -> (MockClock, MockDriver, Journal) {
    init();
    clear();
    let clock = MockClock::install();
    let driver = MockDriver::new(clock.clone());
    (clock, driver, Journal::new())
}

#[test]
fn sleep_orders_by_deadline_not_by_insertion() {
    let (_clock, mut driver, journal) = fresh();
    schedule(Sleeper::new("A", 2000, &journal)).unwrap();
    schedule(Sleeper::new("B", 1000, &journal)).unwrap();
    run(&mut driver).unwrap();
    // Each resumed value equals the task's computed deadline.
    assert_eq!(journal.entries(), ["B@1000", "A@2000"]);
}

#[rstest]
#[case(300, 100)]
#[case(100_000, 7)]
#[case(2, 1)]
fn shorter_sleep_always_wins(#[case] slow: u32, #[case] fast: u32) {
    let (_clock, mut driver, journal) = fresh();
    schedule(Sleeper::new("slow", slow, &journal)).unwrap();
    schedule(Sleeper::new("fast", fast, &journal)).unwrap();
    run(&mut driver).unwrap();
    assert_eq!(
        journal.entries(),
        [format!("fast@{fast}"), format!("slow@{slow}")]
    );
}

#[test]
fn signal_rendezvous() {
    let (_clock, mut driver, journal) = fresh();
    let signal = Signal::new();
    schedule(SignalWaiter::new("W", &signal, &journal)).unwrap();
    schedule(SignalSender::new("P", &signal, 42, &journal)).unwrap();
    run(&mut driver).unwrap();
    // The waiter resumes on the loop turn after the send.
    assert_eq!(journal.entries(), ["P:sent", "W:42"]);
    assert!(signal.is_empty());
}

#[test]
fn race_first_wins_and_cancels_the_rest() {
    let (_clock, mut driver, journal) = fresh();
    let race = Race::new()
        .with(Sleeper::new("fast", 500, &journal))
        .with(Sleeper::new("slow", 2000, &journal));
    schedule(RaceParent::new("parent", &race, &journal)).unwrap();
    run(&mut driver).unwrap();
    assert_eq!(race.winner(), Some(0));
    assert_eq!(race.finished(), [0]);
    // The losing sleeper is unwound before the parent resumes, and its timer
    // entry is gone: the loop finished without ever reaching deadline 2000.
    assert_eq!(
        journal.entries(),
        ["fast@500", "slow:cancelled", "parent:won0:500"]
    );
    let after = stats();
    assert_eq!((after.scheduled, after.paused, after.tasks), (0, 0, 0));
}

#[test]
fn race_io_against_timeout() {
    let (_clock, mut driver, journal) = fresh();
    let race = Race::new()
        .with(Waiter::new("touch", 7, &journal))
        .with(Sleeper::new("timeout", 1000, &journal));
    schedule(RaceParent::new("parent", &race, &journal)).unwrap();
    // No message is ever scripted for interface 7: the timer side wins.
    run(&mut driver).unwrap();
    assert_eq!(race.winner(), Some(1));
    assert_eq!(
        journal.entries(),
        ["timeout@1000", "touch:cancelled", "parent:won1:1000"]
    );
    let after = stats();
    assert_eq!((after.scheduled, after.paused, after.tasks), (0, 0, 0));
}

#[test]
fn unknown_request_is_absorbed() {
    let (_clock, mut driver, journal) = fresh();
    schedule(YieldsGarbage).unwrap();
    schedule(Sleeper::new("A", 100, &journal)).unwrap();
    run(&mut driver).unwrap();
    // The garbage task vanished without output; the loop kept going.
    assert_eq!(journal.entries(), ["A@100"]);
    let after = stats();
    assert_eq!((after.scheduled, after.paused, after.tasks), (0, 0, 0));
}

#[test]
fn wrap_aware_ordering_across_the_counter_boundary() {
    let (clock, mut driver, journal) = fresh();
    clock.set(Ticks::from_micros(4_294_966_000));
    schedule_with(
        Returner::new("A", &journal),
        None,
        Some(Ticks::from_micros(4_294_967_000)),
        None,
    )
    .unwrap();
    schedule_with(
        Returner::new("B", &journal),
        None,
        Some(Ticks::from_micros(500)), // numerically smaller, but after the wrap
        None,
    )
    .unwrap();
    run(&mut driver).unwrap();
    assert_eq!(journal.entries(), ["A:ran", "B:ran"]);
    assert_eq!(clock.now(), Ticks::from_micros(500));
}

#[test]
fn fifo_among_equal_deadlines() {
    let (_clock, mut driver, journal) = fresh();
    let deadline = Some(Ticks::from_micros(700));
    for label in ["A", "B", "C"] {
        schedule_with(Returner::new(label, &journal), None, deadline, None).unwrap();
    }
    run(&mut driver).unwrap();
    assert_eq!(journal.entries(), ["A:ran", "B:ran", "C:ran"]);
}

#[test]
fn message_wakes_every_waiter_before_the_next_turn() {
    let (_clock, mut driver, journal) = fresh();
    schedule(Waiter::new("W1", 7, &journal)).unwrap();
    schedule(Waiter::new("W2", 7, &journal)).unwrap();
    schedule(Sleeper::new("A", 50_000, &journal)).unwrap();
    driver.deliver_at(Ticks::from_micros(100), 7, Value::new(9u32));
    run(&mut driver).unwrap();
    assert_eq!(journal.entries(), ["W1:9", "W2:9", "A@50000"]);
}

#[test]
fn closed_task_is_never_resumed() {
    let (_clock, mut driver, journal) = fresh();
    let id = schedule_with(
        Sleeper::new("A", 1000, &journal),
        None,
        None,
        Some(journal_finalizer(&journal, "A")),
    )
    .unwrap();
    close(id);
    close(id); // second close is a no-op
    run(&mut driver).unwrap();
    assert_eq!(journal.entries(), ["A:cancelled", "fin:A:cancelled"]);
    assert_eq!(stats().tasks, 0);
}

#[test]
fn finalizer_fires_once_on_normal_completion() {
    let (_clock, mut driver, journal) = fresh();
    schedule_with(
        Sleeper::new("A", 200, &journal),
        None,
        None,
        Some(journal_finalizer(&journal, "A")),
    )
    .unwrap();
    run(&mut driver).unwrap();
    assert_eq!(journal.entries(), ["A@200", "fin:A:ok"]);
}

#[test]
fn cancelled_signal_waiter_does_not_resurrect_on_send() {
    let (_clock, mut driver, journal) = fresh();
    let signal = Signal::new();
    let waiter = schedule(SignalWaiter::new("W", &signal, &journal)).unwrap();
    schedule(Closer::new(waiter)).unwrap();
    run(&mut driver).unwrap();
    assert_eq!(journal.entries(), ["W:cancelled"]);
    // The unwind cleared the waiter slot, so this send parks the value
    // instead of waking a dead task.
    signal.send(Value::new(42u32)).unwrap();
    assert!(!signal.is_empty());
    assert_eq!(stats().tasks, 0);
}

#[test]
fn cancelled_race_parent_fans_out_cancellation() {
    let (_clock, mut driver, journal) = fresh();
    let race = Race::new()
        .with(Sleeper::new("fast", 500, &journal))
        .with(Sleeper::new("slow", 2000, &journal));
    let parent = schedule_with(
        RaceParent::new("parent", &race, &journal),
        None,
        None,
        Some(journal_finalizer(&journal, "parent")),
    )
    .unwrap();
    schedule(Closer::new(parent)).unwrap();
    run(&mut driver).unwrap();
    assert_eq!(
        journal.entries(),
        [
            "parent:cancelled",
            "fast:cancelled",
            "slow:cancelled",
            "fin:parent:cancelled"
        ]
    );
    // Nobody won, and no cancelled task was ever resumed.
    assert_eq!(race.winner(), None);
    let after = stats();
    assert_eq!((after.scheduled, after.paused, after.tasks), (0, 0, 0));
}

#[test]
fn empty_race_fails_the_parent() {
    let (_clock, mut driver, journal) = fresh();
    let race = Race::new();
    schedule(RaceParent::new("parent", &race, &journal)).unwrap();
    run(&mut driver).unwrap();
    assert_eq!(
        journal.entries(),
        ["parent:err:race has no children to run"]
    );
}

#[test]
fn race_keep_others_lets_losers_finish() {
    let (_clock, mut driver, journal) = fresh();
    let race = Race::new()
        .with(Sleeper::new("fast", 500, &journal))
        .with(Sleeper::new("slow", 2000, &journal))
        .keep_others();
    schedule(RaceParent::new("parent", &race, &journal)).unwrap();
    run(&mut driver).unwrap();
    // Only the winner is recorded; the loser still runs to completion.
    assert_eq!(race.finished(), [0]);
    assert_eq!(
        journal.entries(),
        ["fast@500", "parent:won0:500", "slow@2000"]
    );
}

#[test]
fn queue_capacity_surfaces_to_schedule() {
    let (_clock, mut driver, journal) = fresh();
    for n in 0..QUEUE_CAPACITY {
        schedule_with(
            Returner::new("bulk", &journal),
            None,
            Some(Ticks::from_micros(n as u32)),
            None,
        )
        .unwrap();
    }
    let overflow = schedule(Returner::new("extra", &journal));
    assert!(matches!(overflow, Err(Error::QueueFull(_))));
    run(&mut driver).unwrap();
    assert_eq!(journal.entries().len(), QUEUE_CAPACITY);
}

#[test]
fn driver_failure_is_fatal() {
    let (_clock, mut driver, journal) = fresh();
    schedule(Sleeper::new("A", 1000, &journal)).unwrap();
    driver.fail_next("usb controller fault");
    let outcome = run(&mut driver);
    match outcome {
        Err(Error::Driver(err)) => assert_eq!(err.0, "usb controller fault"),
        other => panic!("expected a driver failure, got {other:?}"),
    }
    // The task never got to run.
    assert_eq!(journal.entries(), Vec::<String>::new());
    clear();
}

#[test]
fn spurious_timeout_fires_the_earliest_timer_early() {
    let (clock, mut driver, journal) = fresh();
    schedule(Sleeper::new("A", 1000, &journal)).unwrap();
    driver.spurious_timeout(); // first turn starts the sleeper
    driver.spurious_timeout(); // second turn wakes the loop early
    run(&mut driver).unwrap();
    // The sleeper still resumes with its computed deadline, even though the
    // clock never reached it.
    assert_eq!(journal.entries(), ["A@1000"]);
    assert_eq!(clock.now(), Ticks::from_micros(0));
}

#[test]
fn poll_budget_tracks_the_earliest_deadline() {
    let (_clock, mut driver, journal) = fresh();
    schedule_with(
        Returner::new("A", &journal),
        None,
        Some(Ticks::from_micros(700)),
        None,
    )
    .unwrap();
    run(&mut driver).unwrap();
    assert_eq!(driver.budgets(), &[700]);
}

#[test]
fn io_short_circuits_a_due_timer() {
    let (_clock, mut driver, journal) = fresh();
    schedule(Waiter::new("W", 7, &journal)).unwrap();
    schedule(Sleeper::new("A", 100, &journal)).unwrap();
    driver.deliver_next(7, Value::new(5u32));
    run(&mut driver).unwrap();
    // Once the waiter is parked, the scripted message preempts the pending
    // timer pop; the sleeper fires on the following turns.
    assert_eq!(journal.entries(), ["W:5", "A@100"]);
}
