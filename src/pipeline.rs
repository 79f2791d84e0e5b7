//! The satellite subsystem: fetch, propagate, double-buffer, display.
//!
//! `SatelliteSystem` is the single owned context behind the satellite
//! layer. The app calls [`SatelliteSystem::poll`] once per frame; it never
//! blocks. State moves through
//! `Uninitialized -> Fetching -> Live(Worker) | Live(Fallback) | Synthetic`.

use std::sync::mpsc;

use chrono::{DateTime, Utc};

use crate::buffers::{DoubleBufferStore, FrameView};
use crate::config::AppConfig;
use crate::propagation::{LibraryLoader, PreparedBatch, PropagationLibrary};
use crate::synthetic::SyntheticSwarm;
use crate::tle::{
    parse_element_sets, ElementSetCollection, ElementSetEntry, ElementSource, FetchError, FetchResult,
};
use crate::worker::{PropagationWorker, WorkerReply};

/// Updates allowed to queue up at the worker before we stop asking.
const MAX_IN_FLIGHT: usize = 2;

/// Set on synthetic frame generations so they never collide with store
/// generations in the renderer's upload check.
const SYNTHETIC_GENERATION_BIT: u64 = 1 << 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivePath {
    Worker,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatelliteMode {
    Uninitialized,
    Fetching,
    Live(LivePath),
    Synthetic,
}

impl SatelliteMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Uninitialized => "Idle",
            Self::Fetching => "Fetching",
            Self::Live(LivePath::Worker) => "Live (worker)",
            Self::Live(LivePath::Fallback) => "Live (main thread)",
            Self::Synthetic => "Synthetic",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub use_worker: bool,
    pub update_interval_secs: f64,
    pub blend_duration_secs: f64,
    pub synthetic_count: usize,
    pub synthetic_seed: u64,
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            use_worker: config.use_worker,
            update_interval_secs: config.update_interval_secs,
            blend_duration_secs: config.blend_duration_secs,
            synthetic_count: config.synthetic_count,
            synthetic_seed: config.synthetic_seed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub fetches: u64,
    pub batches: u64,
    pub last_failures: usize,
    pub stale_replies: u64,
    pub last_fetch_error: Option<FetchError>,
}

enum Phase {
    Uninitialized,
    Fetching { results: mpsc::Receiver<FetchResult> },
    /// Element sets handed to the worker; waiting for its `Ready`.
    Handshake { worker: PropagationWorker },
    LiveWorker { worker: PropagationWorker },
    LiveFallback { library: Box<dyn PropagationLibrary>, batch: PreparedBatch },
    Synthetic,
}

enum Dispatch {
    Ignored,
    Acknowledged,
    LibraryFailed,
    Installed,
}

pub struct SatelliteSystem {
    settings: PipelineSettings,
    loader: LibraryLoader,
    source: Box<dyn ElementSource>,
    phase: Phase,
    collection: Option<ElementSetCollection>,
    store: DoubleBufferStore,
    swarm: Option<SyntheticSwarm>,
    synthetic_positions: Vec<f32>,
    synthetic_frames: u64,
    generation: u64,
    next_request_id: u64,
    last_installed_request: u64,
    in_flight: usize,
    next_update_at: f64,
    stats: PipelineStats,
}

impl SatelliteSystem {
    pub fn new(settings: PipelineSettings, source: Box<dyn ElementSource>, loader: LibraryLoader) -> Self {
        Self {
            store: DoubleBufferStore::new(settings.blend_duration_secs),
            settings,
            loader,
            source,
            phase: Phase::Uninitialized,
            collection: None,
            swarm: None,
            synthetic_positions: Vec::new(),
            synthetic_frames: 0,
            generation: 0,
            next_request_id: 1,
            last_installed_request: 0,
            in_flight: 0,
            next_update_at: 0.0,
            stats: PipelineStats::default(),
        }
    }

    pub fn mode(&self) -> SatelliteMode {
        match self.phase {
            Phase::Uninitialized => SatelliteMode::Uninitialized,
            Phase::Fetching { .. } | Phase::Handshake { .. } => SatelliteMode::Fetching,
            Phase::LiveWorker { .. } => SatelliteMode::Live(LivePath::Worker),
            Phase::LiveFallback { .. } => SatelliteMode::Live(LivePath::Fallback),
            Phase::Synthetic => SatelliteMode::Synthetic,
        }
    }

    /// First population request; later calls are no-ops (use
    /// [`Self::retry_fetch`] to fetch again).
    pub fn request_population(&mut self) {
        if matches!(self.phase, Phase::Uninitialized) {
            self.start_fetch();
        }
    }

    /// Starts a new fetch generation from any state. Whatever is on screen
    /// keeps animating until the fetch resolves.
    pub fn retry_fetch(&mut self) {
        self.start_fetch();
    }

    pub fn set_source(&mut self, source: Box<dyn ElementSource>) {
        self.source = source;
        self.start_fetch();
    }

    fn start_fetch(&mut self) {
        if let Phase::Handshake { worker } | Phase::LiveWorker { worker } =
            std::mem::replace(&mut self.phase, Phase::Uninitialized)
        {
            worker.terminate();
        }
        log::info!("fetching element sets from {}", self.source.describe());
        let (tx, rx) = mpsc::channel();
        self.source.request(tx);
        self.stats.fetches += 1;
        self.phase = Phase::Fetching { results: rx };
    }

    /// Advances the subsystem by one frame. `now` is the frame clock in
    /// seconds, `utc` the instant satellites are propagated to.
    pub fn poll(&mut self, now: f64, utc: DateTime<Utc>) {
        self.phase = match std::mem::replace(&mut self.phase, Phase::Uninitialized) {
            Phase::Fetching { results } => self.poll_fetch(results, now),
            Phase::Handshake { worker } => self.poll_handshake(worker, now),
            Phase::LiveWorker { worker } => self.poll_worker(worker, now, utc),
            Phase::LiveFallback { library, batch } => self.poll_fallback(library, batch, now, utc),
            phase => phase,
        };

        if let Some(swarm) = &mut self.swarm {
            swarm.advance();
            swarm.write_positions(&mut self.synthetic_positions);
            self.synthetic_frames += 1;
        }
    }

    fn poll_fetch(&mut self, results: mpsc::Receiver<FetchResult>, now: f64) -> Phase {
        let outcome = match results.try_recv() {
            Ok(outcome) => outcome,
            Err(mpsc::TryRecvError::Empty) => return Phase::Fetching { results },
            Err(mpsc::TryRecvError::Disconnected) => Err(FetchError::Abandoned),
        };
        let entries = outcome.and_then(|text| {
            let entries = parse_element_sets(&text);
            match (entries.is_empty(), text.trim().is_empty()) {
                (false, _) => Ok(entries),
                (true, true) => Err(FetchError::Empty),
                (true, false) => Err(FetchError::Malformed),
            }
        });
        match entries {
            Ok(entries) => {
                self.stats.last_fetch_error = None;
                self.adopt_collection(entries);
                self.begin_live(now)
            }
            Err(e) => {
                log::warn!("element fetch failed: {}; showing synthetic satellites", e);
                self.stats.last_fetch_error = Some(e);
                self.enter_synthetic()
            }
        }
    }

    fn adopt_collection(&mut self, entries: Vec<ElementSetEntry>) {
        self.generation += 1;
        let collection = ElementSetCollection::new(self.generation, entries);
        log::info!("element set generation {}: {} entries", self.generation, collection.len());
        self.collection = Some(collection);
        self.store.reset();
        self.swarm = None;
        self.synthetic_positions.clear();
        self.in_flight = 0;
    }

    fn begin_live(&mut self, now: f64) -> Phase {
        let Some(collection) = self.collection.clone() else {
            return self.enter_synthetic();
        };
        if !self.settings.use_worker {
            return self.enter_fallback(now);
        }
        let worker = match PropagationWorker::spawn(self.loader.clone()) {
            Ok(worker) => worker,
            Err(e) => {
                log::info!("{}; propagating on the main thread", e);
                return self.enter_fallback(now);
            }
        };
        match worker.set_elements(collection) {
            Ok(()) => Phase::Handshake { worker },
            Err(e) => {
                log::info!("{}; propagating on the main thread", e);
                worker.terminate();
                self.enter_fallback(now)
            }
        }
    }

    fn enter_fallback(&mut self, now: f64) -> Phase {
        let Some(collection) = &self.collection else {
            return self.enter_synthetic();
        };
        match (self.loader)() {
            Ok(library) => {
                let batch = PreparedBatch::prepare(library.as_ref(), collection.entries());
                self.next_update_at = now;
                Phase::LiveFallback { library, batch }
            }
            Err(e) => {
                log::warn!("{} on the main thread too; showing synthetic satellites", e);
                self.enter_synthetic()
            }
        }
    }

    fn enter_synthetic(&mut self) -> Phase {
        let swarm = SyntheticSwarm::generate(self.settings.synthetic_count, self.settings.synthetic_seed);
        let entries = (0..swarm.len()).map(|i| ElementSetEntry::placeholder(format!("SYNTH-{i}"))).collect();
        self.adopt_collection(entries);
        swarm.write_positions(&mut self.synthetic_positions);
        self.swarm = Some(swarm);
        Phase::Synthetic
    }

    fn poll_handshake(&mut self, worker: PropagationWorker, now: f64) -> Phase {
        loop {
            match worker.try_recv() {
                Ok(Some(reply)) => match self.dispatch_reply(reply, now) {
                    Dispatch::Acknowledged => {
                        self.next_update_at = now;
                        return Phase::LiveWorker { worker };
                    }
                    Dispatch::LibraryFailed => {
                        worker.terminate();
                        return self.enter_fallback(now);
                    }
                    Dispatch::Ignored | Dispatch::Installed => {}
                },
                Ok(None) => return Phase::Handshake { worker },
                Err(e) => {
                    log::warn!("{} during handshake", e);
                    return self.enter_fallback(now);
                }
            }
        }
    }

    fn poll_worker(&mut self, worker: PropagationWorker, now: f64, utc: DateTime<Utc>) -> Phase {
        loop {
            match worker.try_recv() {
                Ok(Some(reply)) => {
                    if let Dispatch::LibraryFailed = self.dispatch_reply(reply, now) {
                        worker.terminate();
                        return self.enter_fallback(now);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("{}; switching to main-thread propagation", e);
                    return self.enter_fallback(now);
                }
            }
        }

        if now >= self.next_update_at && self.in_flight < MAX_IN_FLIGHT {
            let request_id = self.next_request_id;
            self.next_request_id += 1;
            if let Err(e) = worker.request_update(request_id, utc) {
                log::warn!("{}; switching to main-thread propagation", e);
                return self.enter_fallback(now);
            }
            self.in_flight += 1;
            self.next_update_at = now + self.settings.update_interval_secs;
        }
        Phase::LiveWorker { worker }
    }

    /// The one place worker replies are interpreted.
    fn dispatch_reply(&mut self, reply: WorkerReply, now: f64) -> Dispatch {
        match reply {
            WorkerReply::Ready { generation, library_supported, count } => {
                if !library_supported {
                    log::warn!("worker has no propagation library; using the main thread");
                    return Dispatch::LibraryFailed;
                }
                if generation != self.generation {
                    return Dispatch::Ignored;
                }
                log::info!("worker ready with {} element sets", count);
                Dispatch::Acknowledged
            }
            WorkerReply::Positions { generation, request_id, buffer, failures } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if generation != self.generation || request_id <= self.last_installed_request {
                    log::debug!("dropping stale positions for request {}", request_id);
                    self.stats.stale_replies += 1;
                    return Dispatch::Ignored;
                }
                self.last_installed_request = request_id;
                self.install(buffer, failures, now);
                Dispatch::Installed
            }
        }
    }

    fn poll_fallback(
        &mut self,
        library: Box<dyn PropagationLibrary>,
        batch: PreparedBatch,
        now: f64,
        utc: DateTime<Utc>,
    ) -> Phase {
        if now >= self.next_update_at {
            let out = batch.compute(library.as_ref(), utc);
            self.install(out.buffer, out.failures, now);
            self.next_update_at = now + self.settings.update_interval_secs;
        }
        Phase::LiveFallback { library, batch }
    }

    fn install(&mut self, buffer: Vec<f32>, failures: usize, now: f64) {
        if failures > 0 {
            log::debug!("{} of {} element sets failed to propagate", failures, buffer.len() / 3);
        }
        self.stats.batches += 1;
        self.stats.last_failures = failures;
        self.store.install(buffer, now);
    }

    /// What the render set should draw this frame.
    pub fn frame(&self, now: f64) -> FrameView<'_> {
        if self.swarm.is_some() {
            FrameView {
                prev: &self.synthetic_positions,
                next: &self.synthetic_positions,
                blend: 1.0,
                generation: SYNTHETIC_GENERATION_BIT | self.synthetic_frames,
            }
        } else {
            self.store.view(now)
        }
    }

    pub fn collection(&self) -> Option<&ElementSetCollection> {
        self.collection.as_ref()
    }

    pub fn store(&self) -> &DoubleBufferStore {
        &self.store
    }

    pub fn synthetic(&self) -> Option<&SyntheticSwarm> {
        self.swarm.as_ref()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn source_description(&self) -> String {
        self.source.describe()
    }

    /// Current position of one satellite, blended like the shader does.
    pub fn position_of(&self, index: usize, now: f64) -> Option<[f32; 3]> {
        if self.swarm.is_some() {
            let p = self.synthetic_positions.get(index * 3..index * 3 + 3)?;
            return Some([p[0], p[1], p[2]]);
        }
        self.store.interpolated(index, self.store.blend(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::sgp4_loader;
    use crate::propagation::tests::{iss_epoch, ISS_LINE1, ISS_LINE2};
    use crate::tle::StaticSource;
    use std::time::{Duration, Instant};

    fn tle_text(count: usize) -> String {
        (0..count).map(|i| format!("SAT {i}\n{ISS_LINE1}\n{ISS_LINE2}\n")).collect()
    }

    fn settings(use_worker: bool) -> PipelineSettings {
        PipelineSettings {
            use_worker,
            update_interval_secs: 1.0,
            blend_duration_secs: 1.0,
            synthetic_count: 20,
            synthetic_seed: 3,
        }
    }

    fn live_worker_system() -> (SatelliteSystem, f64) {
        let mut sys = SatelliteSystem::new(settings(true), Box::new(StaticSource::text(tle_text(4))), sgp4_loader());
        sys.request_population();
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut now = 0.0;
        while sys.mode() != SatelliteMode::Live(LivePath::Worker) {
            assert!(Instant::now() < deadline, "worker never acknowledged");
            sys.poll(now, iss_epoch());
            now += 0.01;
            std::thread::sleep(Duration::from_millis(1));
        }
        (sys, now)
    }

    #[test]
    fn stale_and_foreign_replies_are_dropped() {
        let (mut sys, now) = live_worker_system();
        let generation = sys.generation;
        let fresh = WorkerReply::Positions { generation, request_id: 50, buffer: vec![0.5; 12], failures: 0 };
        assert!(matches!(sys.dispatch_reply(fresh, now), Dispatch::Installed));

        let old = WorkerReply::Positions { generation, request_id: 49, buffer: vec![0.9; 12], failures: 0 };
        assert!(matches!(sys.dispatch_reply(old, now), Dispatch::Ignored));

        let foreign =
            WorkerReply::Positions { generation: generation + 7, request_id: 99, buffer: vec![0.9; 12], failures: 0 };
        assert!(matches!(sys.dispatch_reply(foreign, now), Dispatch::Ignored));

        assert_eq!(sys.store().next(), &[0.5; 12]);
        assert_eq!(sys.stats().stale_replies, 2);
    }

    #[test]
    fn late_library_failure_is_reported() {
        let (mut sys, now) = live_worker_system();
        let late = WorkerReply::Ready { generation: sys.generation, library_supported: false, count: 0 };
        assert!(matches!(sys.dispatch_reply(late, now), Dispatch::LibraryFailed));
    }

    #[test]
    fn fallback_installs_on_its_timer() {
        let mut sys = SatelliteSystem::new(settings(false), Box::new(StaticSource::text(tle_text(3))), sgp4_loader());
        sys.request_population();
        sys.poll(0.0, iss_epoch());
        assert_eq!(sys.mode(), SatelliteMode::Live(LivePath::Fallback));

        sys.poll(0.1, iss_epoch());
        assert_eq!(sys.stats().batches, 1);
        sys.poll(0.5, iss_epoch());
        assert_eq!(sys.stats().batches, 1);
        sys.poll(1.1, iss_epoch() + chrono::Duration::seconds(60));
        assert_eq!(sys.stats().batches, 2);
        assert_eq!(sys.store().blend(1.1), 0.0);
        assert_ne!(sys.store().prev(), sys.store().next());
    }

    #[test]
    fn request_population_only_fetches_once() {
        let mut sys = SatelliteSystem::new(settings(false), Box::new(StaticSource::text(tle_text(1))), sgp4_loader());
        sys.request_population();
        sys.request_population();
        assert_eq!(sys.stats().fetches, 1);
        assert_eq!(sys.mode(), SatelliteMode::Fetching);
    }

    #[test]
    fn synthetic_frames_change_every_poll() {
        let mut sys = SatelliteSystem::new(
            settings(false),
            Box::new(StaticSource::failing(FetchError::Status(503))),
            sgp4_loader(),
        );
        sys.request_population();
        sys.poll(0.0, iss_epoch());
        let first = sys.frame(0.0).generation;
        let first_pos = sys.position_of(0, 0.0);
        sys.poll(0.016, iss_epoch());
        assert_ne!(sys.frame(0.016).generation, first);
        assert_ne!(sys.position_of(0, 0.016), first_pos);
        assert_eq!(sys.stats().last_fetch_error, Some(FetchError::Status(503)));
    }
}
