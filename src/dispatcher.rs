//! Cooperative tick dispatcher.
//!
//! One call to [`Dispatcher::run_once`] is one pass of the main loop. Each cadence bucket whose
//! period has elapsed since it last ran is serviced, none of them blocks:
//!
//! * poll: one step of the active fleet's poll scheduler. Fleets take turns, one node cycle each.
//! * aggregate: every fleet with new data is aggregated.
//! * housekeeping: the caller's input processing.
//! * heartbeat: run indicator and [`LoopStats`].

use log::trace;

use crate::{
    aggregate::LinkObserver,
    config::DispatcherConfig,
    flags::SyncFlags,
    group::{DeviceGroup, PollStatus},
    profile::RegisterProfile,
    transport::{Duration, Instant, Transport},
};

/// A polled fleet as seen by the dispatcher.
pub trait Fleet {
    fn label(&self) -> &'static str;

    /// One non-blocking step of the poll scheduler.
    fn poll(&mut self, now: Instant) -> PollStatus;

    /// Whether any new-data flag is raised.
    fn has_new_data(&self) -> bool;

    fn aggregate(&mut self, observer: &mut dyn LinkObserver) -> SyncFlags;
}

impl<D: RegisterProfile, T: Transport, const N: usize> Fleet for DeviceGroup<D, T, N> {
    fn label(&self) -> &'static str {
        DeviceGroup::label(self)
    }

    fn poll(&mut self, now: Instant) -> PollStatus {
        DeviceGroup::poll(self, now)
    }

    fn has_new_data(&self) -> bool {
        !self.flags().is_empty()
    }

    fn aggregate(&mut self, observer: &mut dyn LinkObserver) -> SyncFlags {
        DeviceGroup::aggregate(self, observer)
    }
}

/// Main loop throughput over one heartbeat window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    /// Dispatcher passes in the window.
    pub passes: u32,
    pub window: Duration,
}

impl LoopStats {
    /// Average duration of one pass in microseconds, 0 if there were no passes.
    pub fn average_pass_us(&self) -> u32 {
        if self.passes == 0 {
            return 0;
        }
        let micros = u64::from(self.window.to_millis()) * 1000;
        (micros / u64::from(self.passes)) as u32
    }
}

/// Slow cadence collaborators: digital inputs, keyboard, run LED, statistics output.
pub trait Housekeeping {
    fn housekeeping(&mut self, _now: Instant) {}

    fn heartbeat(&mut self, _stats: LoopStats) {}
}

impl Housekeeping for () {}

/// Which buckets were serviced by a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pass {
    pub polled: bool,
    pub aggregated: bool,
    pub housekeeping: bool,
    pub heartbeat: bool,
}

#[derive(Debug, Clone, Copy)]
struct Cadence {
    period: Duration,
    last: Instant,
}

impl Cadence {
    fn new(period: Duration, now: Instant) -> Self {
        Self { period, last: now }
    }

    /// True once per elapsed period. A late check is not caught up.
    fn due(&mut self, now: Instant) -> bool {
        match now.checked_duration_since(self.last) {
            Some(elapsed) if elapsed >= self.period => {
                self.last = now;
                true
            }
            _ => false,
        }
    }
}

pub struct Dispatcher {
    poll: Cadence,
    aggregate: Cadence,
    housekeeping: Cadence,
    heartbeat: Cadence,
    /// Index of the fleet owning the bus turn.
    active: usize,
    passes: u32,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, now: Instant) -> Self {
        Self {
            poll: Cadence::new(config.poll_period, now),
            aggregate: Cadence::new(config.aggregate_period, now),
            housekeeping: Cadence::new(config.housekeeping_period, now),
            heartbeat: Cadence::new(config.heartbeat_period, now),
            active: 0,
            passes: 0,
        }
    }

    /// Index into the `fleets` slice of the fleet polled next.
    pub fn active(&self) -> usize {
        self.active
    }

    /// Run one pass of the main loop.
    pub fn run_once(
        &mut self,
        now: Instant,
        fleets: &mut [&mut dyn Fleet],
        observer: &mut dyn LinkObserver,
        housekeeping: &mut dyn Housekeeping,
    ) -> Pass {
        let mut pass = Pass::default();
        self.passes = self.passes.saturating_add(1);
        let heartbeat_window_start = self.heartbeat.last;

        if self.poll.due(now) && !fleets.is_empty() {
            self.active %= fleets.len();
            let fleet = &mut fleets[self.active];
            if let PollStatus::Advance(transaction) = fleet.poll(now) {
                if transaction.completes_node() {
                    trace!("{}: node {} cycle done", fleet.label(), transaction.node);
                    self.active = (self.active + 1) % fleets.len();
                }
            }
            pass.polled = true;
        }

        if self.aggregate.due(now) {
            for fleet in fleets.iter_mut().filter(|fleet| fleet.has_new_data()) {
                fleet.aggregate(observer);
            }
            pass.aggregated = true;
        }

        if self.housekeeping.due(now) {
            housekeeping.housekeeping(now);
            pass.housekeeping = true;
        }

        if self.heartbeat.due(now) {
            let stats = LoopStats {
                passes: self.passes,
                window: now
                    .checked_duration_since(heartbeat_window_start)
                    .unwrap_or(Duration::from_ticks(0)),
            };
            self.passes = 0;
            housekeeping.heartbeat(stats);
            pass.heartbeat = true;
        }

        pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::LinkEvent,
        config::GroupBuilder,
        group::{Outcome, Transaction},
        mock_transport::{MockTransport, Reply, Request},
        profile::{GensetController, InverterModel, Variable},
    };

    fn at(ms: u32) -> Instant {
        Instant::from_ticks(ms)
    }

    /// Fleet that answers every read after `latency` busy polls and records when it was polled.
    struct FakeFleet {
        label: &'static str,
        latency: u32,
        waited: u32,
        variable: Variable,
        flags: SyncFlags,
        polled: heapless::Vec<u32, 512>,
        aggregations: u32,
    }

    impl FakeFleet {
        fn new(label: &'static str, latency: u32) -> Self {
            Self {
                label,
                latency,
                waited: 0,
                variable: Variable::ActivePower,
                flags: SyncFlags::new(),
                polled: heapless::Vec::new(),
                aggregations: 0,
            }
        }
    }

    impl Fleet for FakeFleet {
        fn label(&self) -> &'static str {
            self.label
        }

        fn poll(&mut self, now: Instant) -> PollStatus {
            self.polled.push(now.ticks()).unwrap();
            if self.waited < self.latency {
                self.waited += 1;
                return PollStatus::Busy;
            }
            self.waited = 0;
            let variable = self.variable;
            self.variable = variable.next();
            self.flags.set_variable(variable, true);
            PollStatus::Advance(Transaction {
                node: 0,
                variable,
                outcome: Outcome::Success,
            })
        }

        fn has_new_data(&self) -> bool {
            !self.flags.is_empty()
        }

        fn aggregate(&mut self, _observer: &mut dyn LinkObserver) -> SyncFlags {
            self.aggregations += 1;
            let consumed = self.flags;
            self.flags.clear(consumed);
            consumed
        }
    }

    #[derive(Default)]
    struct Recorder {
        housekeeping: u32,
        heartbeats: heapless::Vec<LoopStats, 8>,
    }

    impl Housekeeping for Recorder {
        fn housekeeping(&mut self, _now: Instant) {
            self.housekeeping += 1;
        }

        fn heartbeat(&mut self, stats: LoopStats) {
            self.heartbeats.push(stats).unwrap();
        }
    }

    fn run(
        dispatcher: &mut Dispatcher,
        now: u32,
        a: &mut dyn Fleet,
        b: &mut dyn Fleet,
        housekeeping: &mut dyn Housekeeping,
    ) -> Pass {
        let mut fleets: [&mut dyn Fleet; 2] = [a, b];
        dispatcher.run_once(at(now), &mut fleets, &mut |_: LinkEvent| {}, housekeeping)
    }

    #[test]
    fn test_fleets_take_turns_per_node_cycle() {
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), at(0));
        let mut pv = FakeFleet::new("pv", 0);
        let mut genset = FakeFleet::new("genset", 0);

        for now in 1..=8 {
            run(&mut dispatcher, now, &mut pv, &mut genset, &mut ());
        }
        assert_eq!(pv.polled.as_slice(), &[1, 2, 5, 6]);
        assert_eq!(genset.polled.as_slice(), &[3, 4, 7, 8]);
    }

    #[test]
    fn test_slow_fleet_does_not_starve_the_other() {
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), at(0));
        let mut slow = FakeFleet::new("slow", 20);
        let mut fast = FakeFleet::new("fast", 0);

        for now in 1..=200 {
            run(&mut dispatcher, now, &mut slow, &mut fast, &mut ());
        }
        // The slow fleet needs 42 polls per node cycle, the fast one 2.
        assert_eq!(slow.polled.len(), 4 * 42 + 24);
        assert_eq!(fast.polled.len(), 4 * 2);
        assert_eq!(fast.polled.as_slice(), &[43, 44, 87, 88, 131, 132, 175, 176]);
    }

    #[test]
    fn test_buckets_run_at_their_periods() {
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), at(0));
        let mut a = FakeFleet::new("a", 0);
        let mut b = FakeFleet::new("b", 0);
        let mut recorder = Recorder::default();

        // Several passes per millisecond: polling is rate limited too.
        let mut polls = 0;
        let mut aggregations = 0;
        for now in 1..=1000 {
            for _ in 0..3 {
                let pass = run(&mut dispatcher, now, &mut a, &mut b, &mut recorder);
                polls += pass.polled as u32;
                aggregations += pass.aggregated as u32;
            }
        }
        assert_eq!(polls, 1000);
        assert_eq!(aggregations, 100);
        assert_eq!(recorder.housekeeping, 10);
        assert_eq!(recorder.heartbeats.len(), 2);
        // Both fleets had new data at every aggregation tick.
        assert_eq!(a.aggregations, 100);
        assert_eq!(b.aggregations, 100);
    }

    #[test]
    fn test_idle_fleets_are_not_aggregated() {
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), at(0));
        // Never completes a read within the test.
        let mut a = FakeFleet::new("a", 1000);
        let mut b = FakeFleet::new("b", 1000);
        for now in 1..=100 {
            let pass = run(&mut dispatcher, now, &mut a, &mut b, &mut ());
            assert_eq!(pass.aggregated, now % 10 == 0);
        }
        assert_eq!(a.aggregations, 0);
        assert_eq!(b.aggregations, 0);
    }

    #[test]
    fn test_heartbeat_reports_loop_statistics() {
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), at(0));
        let mut a = FakeFleet::new("a", 0);
        let mut b = FakeFleet::new("b", 0);
        let mut recorder = Recorder::default();

        for now in 1..=500 {
            run(&mut dispatcher, now, &mut a, &mut b, &mut recorder);
        }
        let stats = recorder.heartbeats[0];
        assert_eq!(stats.passes, 500);
        assert_eq!(stats.window, Duration::millis(500));
        assert_eq!(stats.average_pass_us(), 1000);

        assert_eq!(
            LoopStats {
                passes: 0,
                window: Duration::millis(500)
            }
            .average_pass_us(),
            0
        );
    }

    #[test]
    fn test_late_passes_are_not_caught_up() {
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), at(0));
        let mut a = FakeFleet::new("a", 0);
        let mut b = FakeFleet::new("b", 0);

        let pass = run(&mut dispatcher, 35, &mut a, &mut b, &mut ());
        assert!(pass.polled && pass.aggregated && !pass.housekeeping);
        let pass = run(&mut dispatcher, 36, &mut a, &mut b, &mut ());
        assert!(pass.polled && !pass.aggregated);
        assert_eq!(a.polled.as_slice(), &[35, 36]);
    }

    #[test]
    fn test_no_fleets() {
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), at(0));
        let pass = dispatcher.run_once(at(10), &mut [], &mut |_: LinkEvent| {}, &mut ());
        assert!(!pass.polled);
        assert!(pass.aggregated);
    }

    fn inverter_reply(request: &Request) -> Reply {
        match request.start {
            5031 => Reply::pair(40, 0),
            _ => Reply::single(500),
        }
    }

    fn genset_reply(request: &Request) -> Reply {
        match request.start {
            // 2560 / 256 = 10 kW
            61 => Reply::pair(2560, 0),
            _ => Reply::single(80),
        }
    }

    #[test]
    fn test_plant_end_to_end() {
        let mut inverters = GroupBuilder::<InverterModel, 4>::new("inverters")
            .with_nodes(2)
            .with_all_devices(InverterModel::Sungrow)
            .build(MockTransport::new(inverter_reply).with_latency(2))
            .unwrap();
        let mut gensets = GroupBuilder::<GensetController, 4>::new("gensets")
            .with_nodes(3)
            .with_device(0, GensetController::Sices)
            .with_device(2, GensetController::Sices)
            .build(MockTransport::new(genset_reply).with_latency(5))
            .unwrap();

        let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), at(0));
        let mut connected = 0;
        for now in 1..=500 {
            let mut fleets: [&mut dyn Fleet; 2] = [&mut inverters, &mut gensets];
            dispatcher.run_once(
                at(now),
                &mut fleets,
                &mut |event: LinkEvent| {
                    if event.state == crate::health::LinkState::Connected {
                        connected += 1;
                    }
                },
                &mut (),
            );
        }

        assert_eq!(inverters.totals().active_power, 80.0);
        assert!((inverters.totals().nominal_power - 100.0).abs() < 1e-3);
        assert_eq!(gensets.totals().active_power, 20.0);
        assert_eq!(gensets.totals().nominal_power, 160.0);
        assert_eq!(connected, 4);
        assert!(!inverters.transport().requests().is_empty());
        assert!(!gensets.transport().requests().is_empty());
    }
}
