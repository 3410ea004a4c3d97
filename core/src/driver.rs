// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::future::{poll_fn, Future};
use std::io;
use std::task::Poll;
use std::time::Instant;
use futures::future::LocalBoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use crate::config::DriverConfig;
use crate::frame::FrameSource;
use crate::frame_sync::FrameSynchronizer;
use crate::registry::{AttachOutcome, CompletionAction, DepartTarget, DeviceRegistry};
use crate::telemetry::Telemetry;
use crate::transport::{ClaimedDevice, HotplugEvent, TransferCompletion, Transport};
use crate::usb::errors::ArrivalError;

/// Errors that end [`Driver::run`].
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("USB transport unavailable: {0}")]
    Transport(#[from] io::Error),

    #[error("No configured breakout board found")]
    NoMatchingDevice,

    #[error("Failed to claim breakout board: {0}")]
    InterfaceClaimFailed(String),
}

/// Totals of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
}

struct Arrival<K, R> {
    description: String,
    at_startup: bool,
    result: Result<ClaimedDevice<K, R>, ArrivalError>,
}

type ArrivalFuture<T> = LocalBoxFuture<'static, Arrival<<T as Transport>::Key, <T as Transport>::Ring>>;

/// Bookkeeping of the devices found by the initial enumeration.
#[derive(Debug, Default)]
struct StartupProbe {
    pending: usize,
    claim_failure: Option<String>,
    finished: bool,
}

/// Process-wide driver context: the device table, the frame barrier and the
/// counters, all owned by the single control loop.
pub struct Driver<T: Transport> {
    transport: T,
    config: DriverConfig,
    registry: DeviceRegistry<T::Key, T::Ring>,
    sync: FrameSynchronizer,
    telemetry: Telemetry,
    source: Box<dyn FrameSource>,
    arrivals: FuturesUnordered<ArrivalFuture<T>>,
    startup: StartupProbe,
}

impl<T: Transport> Driver<T> {
    pub fn new(transport: T, config: DriverConfig, source: Box<dyn FrameSource>) -> Self {
        let registry = DeviceRegistry::new(&config);
        Self {
            transport,
            config,
            registry,
            sync: FrameSynchronizer::new(),
            telemetry: Telemetry::new(Instant::now()),
            source,
            arrivals: FuturesUnordered::new(),
            startup: StartupProbe::default(),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry<T::Key, T::Ring> {
        &self.registry
    }

    pub fn sync(&self) -> &FrameSynchronizer {
        &self.sync
    }

    /// Streams until `shutdown` resolves, then releases every board.
    ///
    /// Hotplug events, device claims, transfer completions and the telemetry
    /// tick are all serviced from this one task; the barrier is checked before
    /// every wait.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<RunSummary, DriverError> {
        let mut hotplug = self.transport.watch()?.fuse();
        self.render(0);
        for candidate in self.transport.enumerate()? {
            self.begin_arrival(candidate, true);
        }
        info!("Waiting for {} breakout board(s)", self.registry.len());

        let mut telemetry_tick = tokio::time::interval(self.config.telemetry_interval());
        telemetry_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        telemetry_tick.reset();
        tokio::pin!(shutdown);

        let outcome = loop {
            if let Err(e) = self.check_startup() {
                break Err(e);
            }
            self.service_barrier();

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                Some(event) = hotplug.next() => self.on_hotplug(event),
                Some(arrival) = self.arrivals.next() => self.on_arrival(arrival),
                (slot, completion) = poll_fn(|cx| self.registry.poll_completion(cx)) => {
                    self.on_completion(slot, completion);
                }
                _ = telemetry_tick.tick() => self.on_tick(Instant::now()),
            }
        };

        self.shut_down().await;
        outcome.map(|()| RunSummary { frames: self.sync.frame_number() })
    }

    fn on_hotplug(&mut self, event: HotplugEvent<T::Candidate, T::Key>) {
        match event {
            HotplugEvent::Arrived(candidate) => self.begin_arrival(candidate, false),
            HotplugEvent::Departed(key) => self.depart(DepartTarget::Device(key)),
        }
    }

    fn begin_arrival(&mut self, candidate: T::Candidate, at_startup: bool) {
        let description = self.transport.describe(&candidate);
        debug!("Probing device {}", description);
        let claim = self.transport.claim(candidate);
        if at_startup {
            self.startup.pending += 1;
        }
        self.arrivals.push(
            async move {
                let result = claim.await;
                Arrival { description, at_startup, result }
            }
            .boxed_local(),
        );
    }

    fn on_arrival(&mut self, arrival: Arrival<T::Key, T::Ring>) {
        let Arrival { description, at_startup, result } = arrival;
        if at_startup {
            self.startup.pending = self.startup.pending.saturating_sub(1);
        }
        let device = match result {
            Ok(device) => device,
            Err(e) if e.is_mismatch() => {
                debug!("Skipping device {}: {}", description, e);
                return;
            }
            Err(e) => {
                warn!("Failed to initialize device {}: {}", description, e);
                if at_startup && matches!(e, ArrivalError::ClaimInterface { .. } | ArrivalError::Open(_)) {
                    self.startup.claim_failure = Some(e.to_string());
                }
                return;
            }
        };

        match self.registry.attach(device) {
            AttachOutcome::Streaming { slot, sweeps_completed } => {
                info!("Breakout board found: {} as slot {}", description, slot);
                self.sync.activate(slot);
                for _ in 0..sweeps_completed {
                    self.sync.sweep_complete(slot);
                }
            }
            AttachOutcome::PrimeFailed { error, .. } if at_startup => {
                self.startup.claim_failure = Some(error.to_string());
            }
            AttachOutcome::PrimeFailed { .. } | AttachOutcome::UnknownSerial | AttachOutcome::AlreadyClaimed { .. } => {}
        }
    }

    fn on_completion(&mut self, slot: usize, completion: TransferCompletion) {
        match self.registry.on_completion(slot, completion) {
            CompletionAction::Resubmitted { bytes, sweep_complete } => {
                self.telemetry.record_bytes(bytes);
                if sweep_complete {
                    self.sync.sweep_complete(slot);
                }
            }
            CompletionAction::Suppressed => {}
            CompletionAction::DeviceLost(error) => {
                warn!("Lost device in slot {}: {}", slot, error);
                if self.registry.depart_slot(slot) {
                    self.sync.deactivate(slot);
                }
            }
        }
    }

    fn depart(&mut self, target: DepartTarget<T::Key>) {
        for slot in self.registry.depart(target) {
            self.sync.deactivate(slot);
        }
    }

    fn service_barrier(&mut self) {
        if let Some(frame_number) = self.sync.try_open() {
            self.telemetry.record_frame();
            self.render(frame_number);
        }
    }

    fn render(&mut self, frame_number: u64) {
        let source = &mut self.source;
        self.registry.render_frames(|slot, frame| source.render(frame_number, slot, frame));
    }

    fn on_tick(&mut self, now: Instant) {
        info!("{}", self.telemetry.take_report(now));
        for slot in self.registry.reap_stalled(now, self.config.transfer_timeout()) {
            self.sync.deactivate(slot);
        }
    }

    fn check_startup(&mut self) -> Result<(), DriverError> {
        if self.startup.finished || self.startup.pending > 0 {
            return Ok(());
        }
        self.startup.finished = true;
        let claimed = self.registry.claimed_count();
        info!("Start-up scan finished, {} of {} board(s) streaming", claimed, self.registry.len());
        if !self.config.require_device || claimed > 0 {
            return Ok(());
        }
        Err(match self.startup.claim_failure.take() {
            Some(reason) => DriverError::InterfaceClaimFailed(reason),
            None => DriverError::NoMatchingDevice,
        })
    }

    async fn shut_down(&mut self) {
        self.arrivals.clear();
        self.depart(DepartTarget::All);

        let registry = &mut self.registry;
        let drained = poll_fn(|cx| {
            let _ = registry.poll_completion(cx);
            if registry.draining_count() == 0 {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        });
        if tokio::time::timeout(self.config.shutdown_drain(), drained).await.is_err() {
            let abandoned = self.registry.release_draining();
            warn!("{} device(s) did not confirm cancellation in time, releasing anyway", abandoned);
        }
        info!("All devices released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;
    use futures::task::noop_waker_ref;
    use crate::definitions::Color;
    use crate::encoder::EncoderState;
    use crate::frame::LedFrame;
    use crate::transport::mock::{MockCandidate, MockTransport, SharedRingLog};
    use crate::usb::errors::TransferError;

    type Renders = Rc<RefCell<Vec<(u64, usize)>>>;

    fn config(require_device: bool) -> DriverConfig {
        DriverConfig {
            serials: vec!["A".into(), "B".into()],
            leds_per_strand: 7,
            transfers_in_flight: 2,
            require_device,
            ..DriverConfig::default()
        }
    }

    fn driver(transport: MockTransport, config: DriverConfig) -> (Driver<MockTransport>, Renders) {
        let renders = Renders::default();
        let log = renders.clone();
        let source = move |frame_number: u64, slot: usize, frame: &mut LedFrame| {
            log.borrow_mut().push((frame_number, slot));
            frame.fill(Color::from_bits(frame_number as u32));
        };
        (Driver::new(transport, config, Box::new(source)), renders)
    }

    /// Runs every ready arrival and completion, checking the barrier in between
    /// like the control loop does.
    fn pump(driver: &mut Driver<MockTransport>) {
        let mut cx = std::task::Context::from_waker(noop_waker_ref());
        loop {
            driver.service_barrier();
            if let Poll::Ready(Some(arrival)) = driver.arrivals.poll_next_unpin(&mut cx) {
                driver.on_arrival(arrival);
                continue;
            }
            match driver.registry.poll_completion(&mut cx) {
                Poll::Ready((slot, completion)) => driver.on_completion(slot, completion),
                Poll::Pending => break,
            }
        }
    }

    fn ring(transport_rings: &Rc<RefCell<std::collections::HashMap<u32, SharedRingLog>>>, key: u32) -> SharedRingLog {
        transport_rings.borrow()[&key].clone()
    }

    fn release(ring: &SharedRingLog, count: usize) {
        ring.borrow_mut().ready += count;
    }

    #[test]
    fn late_joiner_holds_the_barrier_until_its_first_sweep() {
        let (transport, _events) = MockTransport::new(&["A", "B"], vec![]);
        let rings = transport.rings();
        let (mut driver, renders) = driver(transport, config(false));

        driver.begin_arrival(MockCandidate::new(1, "A"), false);
        pump(&mut driver);
        let a = ring(&rings, 1);
        while driver.sync().frame_number() < 3 {
            release(&a, 1);
            pump(&mut driver);
        }
        assert_eq!(driver.sync().frame_number(), 3);

        driver.begin_arrival(MockCandidate::new(2, "B"), false);
        pump(&mut driver);
        assert_eq!(driver.sync().active_mask(), 0b11);
        let b = ring(&rings, 2);

        // A keeps sweeping, the barrier keeps waiting for B
        release(&a, 8);
        pump(&mut driver);
        assert_eq!(driver.sync().frame_number(), 3);
        assert_eq!(driver.sync().complete_mask(), 0b01);

        // B's first completion is its configuration packet; the refill closes its first sweep
        release(&b, 1);
        pump(&mut driver);
        assert_eq!(driver.sync().frame_number(), 4);
        assert_eq!(driver.sync().complete_mask(), 0);

        let renders = renders.borrow();
        assert!(renders.contains(&(4, 0)) && renders.contains(&(4, 1)));
    }

    #[test]
    fn departure_releases_the_barrier() {
        let (transport, _events) = MockTransport::new(&["A", "B"], vec![]);
        let rings = transport.rings();
        let (mut driver, _renders) = driver(transport, config(false));
        driver.begin_arrival(MockCandidate::new(1, "A"), false);
        driver.begin_arrival(MockCandidate::new(2, "B"), false);
        pump(&mut driver);

        release(&ring(&rings, 1), 1);
        pump(&mut driver);
        assert_eq!(driver.sync().complete_mask(), 0b01);
        assert_eq!(driver.sync().frame_number(), 0);

        driver.on_hotplug(HotplugEvent::Departed(2));
        driver.on_hotplug(HotplugEvent::Departed(2));
        pump(&mut driver);
        assert_eq!(driver.sync().active_mask(), 0b01);
        assert_eq!(driver.sync().frame_number(), 1);
        assert_eq!(driver.registry().draining_count(), 0);
    }

    #[test]
    fn transfer_failure_departs_and_rearrival_reconfigures() {
        let (transport, _events) = MockTransport::new(&["A", "B"], vec![]);
        let rings = transport.rings();
        let (mut driver, _renders) = driver(transport, config(false));
        driver.begin_arrival(MockCandidate::new(1, "A"), false);
        pump(&mut driver);

        let first = ring(&rings, 1);
        {
            let mut log = first.borrow_mut();
            log.fail_next = Some(TransferError::Stall);
            log.ready = 1;
        }
        pump(&mut driver);
        assert!(!driver.registry().slot(0).unwrap().is_claimed());
        assert_eq!(driver.sync().active_mask(), 0);
        assert_eq!(first.borrow().submitted_after_cancel, 0);

        driver.on_hotplug(HotplugEvent::Arrived(MockCandidate::new(3, "A")));
        pump(&mut driver);
        let second = ring(&rings, 3);
        assert_eq!(second.borrow().in_flight[0].len(), 12);
        assert_eq!(
            driver.registry().slot(0).unwrap().encoder_state(),
            Some(EncoderState::Streaming { cursor: 5 })
        );
        assert_eq!(driver.sync().active_mask(), 0b01);
    }

    #[test]
    fn resubmit_failure_departs_and_clears_the_sync_bit() {
        let (transport, _events) = MockTransport::new(&["A", "B"], vec![]);
        let rings = transport.rings();
        let (mut driver, _renders) = driver(transport, config(false));
        driver.begin_arrival(MockCandidate::new(1, "A"), false);
        pump(&mut driver);
        assert_eq!(driver.sync().active_mask(), 0b01);

        let a = ring(&rings, 1);
        {
            let mut log = a.borrow_mut();
            log.reject_submit = true;
            log.ready = 1;
        }
        pump(&mut driver);

        assert!(!driver.registry().slot(0).unwrap().is_claimed());
        assert_eq!(driver.sync().active_mask(), 0);
        assert_eq!(driver.sync().complete_mask(), 0);
        assert_eq!(driver.registry().draining_count(), 0);
        let log = a.borrow();
        assert!(log.cancelled);
        assert!(log.in_flight.is_empty());
    }

    #[test]
    fn foreign_serial_is_ignored() {
        let (transport, _events) = MockTransport::new(&["A", "B"], vec![]);
        let (mut driver, _renders) = driver(transport, config(false));
        driver.begin_arrival(MockCandidate::new(1, "Z"), false);
        pump(&mut driver);
        assert_eq!(driver.registry().claimed_count(), 0);
        assert_eq!(driver.sync().active_mask(), 0);
    }

    #[tokio::test]
    async fn required_device_missing_exits_with_no_match() {
        let (transport, _events) = MockTransport::new(&["A", "B"], vec![MockCandidate::new(1, "Z")]);
        let (mut driver, _renders) = driver(transport, config(true));
        let result = driver.run(std::future::pending()).await;
        assert!(matches!(result, Err(DriverError::NoMatchingDevice)));
    }

    #[tokio::test]
    async fn required_device_claim_failure_is_reported() {
        let mut candidate = MockCandidate::new(1, "A");
        candidate.claim_fails = true;
        let (transport, _events) = MockTransport::new(&["A", "B"], vec![candidate]);
        let (mut driver, _renders) = driver(transport, config(true));
        let result = driver.run(std::future::pending()).await;
        assert!(matches!(result, Err(DriverError::InterfaceClaimFailed(_))));
    }

    #[tokio::test]
    async fn hotplug_events_reach_the_running_loop() {
        let (transport, events) = MockTransport::new(&["A", "B"], vec![]);
        let rings = transport.rings();
        let (mut driver, _renders) = driver(transport, config(false));

        let session = async {
            let mut candidate = MockCandidate::new(1, "A");
            candidate.ready = 6;
            events.unbounded_send(HotplugEvent::Arrived(candidate)).unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            let a = ring(&rings, 1);
            assert_eq!(a.borrow().sent.len(), 6);
            assert!(!a.borrow().cancelled);

            events.unbounded_send(HotplugEvent::Departed(1)).unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            let log = a.borrow();
            assert!(log.cancelled);
            assert!(log.in_flight.is_empty());
            assert_eq!(log.submitted_after_cancel, 0);
        };

        let summary = driver.run(session).await.unwrap();
        // 6 refills, every second one closes a sweep
        assert_eq!(summary.frames, 3);
        assert_eq!(driver.registry().claimed_count(), 0);
        assert_eq!(driver.sync().active_mask(), 0);
    }

    #[tokio::test]
    async fn run_streams_until_shutdown_and_releases_everything() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut candidate = MockCandidate::new(1, "A");
        candidate.ready = 40;
        let (transport, _events) = MockTransport::new(&["A", "B"], vec![candidate]);
        let rings = transport.rings();
        let (mut driver, renders) = driver(transport, config(true));

        let summary = driver.run(tokio::time::sleep(Duration::from_millis(50))).await.unwrap();

        let a = ring(&rings, 1);
        let log = a.borrow();
        assert_eq!(log.sent.len(), 40);
        assert_eq!(log.sent[0].len(), 12);
        assert!(log.cancelled);
        assert_eq!(log.submitted_after_cancel, 0);
        assert!(log.in_flight.is_empty());
        assert_eq!(driver.registry().claimed_count(), 0);
        assert_eq!(driver.registry().draining_count(), 0);
        // 40 completions refill 40 packets, every second one closes a sweep
        assert_eq!(summary.frames, 20);
        assert_eq!(renders.borrow().last(), Some(&(20, 1)));
    }
}
