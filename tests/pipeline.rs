use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use nalgebra::Vector3;
use pretty_assertions::assert_eq;

use sat_globe::pipeline::{LivePath, PipelineSettings, SatelliteMode, SatelliteSystem};
use sat_globe::propagation::{
    Geodetic, LibraryLoader, OrbitRecord, PreparedBatch, PropagationError, PropagationLibrary, Sgp4Library,
};
use sat_globe::tle::{parse_element_sets, FetchError, StaticSource};

const ISS_LINE1: &str = "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927";
const ISS_LINE2: &str = "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";
const WORKER_THREAD: &str = "propagation-worker";

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2008, 9, 20, 12, 25, 40).unwrap()
}

fn tle_text(count: usize) -> String {
    let mut text: String = (0..count).map(|i| format!("SAT {i}\n{ISS_LINE1}\n{ISS_LINE2}\n")).collect();
    text.push_str("BROKEN\n1 00000U garbage\n2 00000 garbage\n");
    text
}

fn settings(use_worker: bool) -> PipelineSettings {
    PipelineSettings {
        use_worker,
        update_interval_secs: 0.5,
        blend_duration_secs: 1.0,
        synthetic_count: 25,
        synthetic_seed: 11,
    }
}

fn in_worker_thread() -> bool {
    std::thread::current().name() == Some(WORKER_THREAD)
}

fn sgp4_boxed() -> Result<Box<dyn PropagationLibrary>, PropagationError> {
    Sgp4Library::load().map(|lib| Box::new(lib) as Box<dyn PropagationLibrary>)
}

/// Loader that counts calls and refuses to load inside the worker.
fn main_thread_only(calls: Arc<AtomicUsize>) -> LibraryLoader {
    Arc::new(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        if in_worker_thread() {
            Err(PropagationError::LibraryUnavailable("not in workers".to_string()))
        } else {
            sgp4_boxed()
        }
    })
}

/// Loads everywhere, but crashes the worker on its first propagation.
struct CrashesInWorker(Sgp4Library);

impl PropagationLibrary for CrashesInWorker {
    fn parse_elements(&self, line1: &str, line2: &str) -> Result<OrbitRecord, PropagationError> {
        self.0.parse_elements(line1, line2)
    }

    fn propagate(&self, record: &OrbitRecord, timestamp: DateTime<Utc>) -> Result<Vector3<f64>, PropagationError> {
        if in_worker_thread() {
            panic!("worker lost its propagation library");
        }
        self.0.propagate(record, timestamp)
    }

    fn sidereal_time(&self, timestamp: DateTime<Utc>) -> f64 {
        self.0.sidereal_time(timestamp)
    }

    fn eci_to_geodetic(&self, position: &Vector3<f64>, sidereal_time: f64) -> Geodetic {
        self.0.eci_to_geodetic(position, sidereal_time)
    }
}

/// Polls with a fake frame clock until `done` holds or ten real seconds pass.
fn poll_until(sys: &mut SatelliteSystem, now: &mut f64, done: impl Fn(&SatelliteSystem) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(sys) {
        assert!(Instant::now() < deadline, "stuck in {:?}", sys.mode());
        sys.poll(*now, epoch());
        *now += 0.05;
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn worker_path_matches_main_thread_propagation() {
    let text = tle_text(5);
    let mut sys = SatelliteSystem::new(settings(true), Box::new(StaticSource::text(text.clone())), Arc::new(sgp4_boxed));
    sys.request_population();

    let mut now = 0.0;
    poll_until(&mut sys, &mut now, |s| s.stats().batches >= 1);
    assert_eq!(sys.mode(), SatelliteMode::Live(LivePath::Worker));
    assert_eq!(sys.collection().map(|c| c.len()), Some(6));

    let entries = parse_element_sets(&text);
    let local = PreparedBatch::prepare(&Sgp4Library, &entries).compute(&Sgp4Library, epoch());
    let installed = sys.store().next();
    assert_eq!(installed.len(), local.buffer.len());
    assert!(installed.iter().zip(&local.buffer).all(|(a, b)| a.to_bits() == b.to_bits()));
    assert_eq!(sys.stats().last_failures, 1);
    assert_eq!(&installed[15..18], &[0.0; 3]);

    let frame = sys.frame(now);
    assert_eq!(frame.point_count(), 6);
    assert_eq!(frame.prev, frame.next);
}

#[test]
fn worker_without_library_falls_back_once_without_refetching() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut sys = SatelliteSystem::new(
        settings(true),
        Box::new(StaticSource::text(tle_text(3))),
        main_thread_only(calls.clone()),
    );
    sys.request_population();

    let mut now = 0.0;
    poll_until(&mut sys, &mut now, |s| s.mode() == SatelliteMode::Live(LivePath::Fallback));
    poll_until(&mut sys, &mut now, |s| s.stats().batches >= 2);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(sys.stats().fetches, 1);
    assert_eq!(sys.store().reallocations(), 1);
}

#[test]
fn worker_crash_after_handshake_switches_to_fallback() {
    let loader: LibraryLoader =
        Arc::new(|| Sgp4Library::load().map(|lib| Box::new(CrashesInWorker(lib)) as Box<dyn PropagationLibrary>));
    let mut sys = SatelliteSystem::new(settings(true), Box::new(StaticSource::text(tle_text(2))), loader);
    sys.request_population();

    let mut now = 0.0;
    poll_until(&mut sys, &mut now, |s| s.mode() == SatelliteMode::Live(LivePath::Worker));
    poll_until(&mut sys, &mut now, |s| s.mode() == SatelliteMode::Live(LivePath::Fallback));
    poll_until(&mut sys, &mut now, |s| s.stats().batches >= 1);

    assert_eq!(sys.stats().fetches, 1);
    assert_eq!(sys.frame(now).point_count(), 3);
}

#[test]
fn disabled_worker_goes_straight_to_fallback() {
    let mut sys = SatelliteSystem::new(settings(false), Box::new(StaticSource::text(tle_text(2))), Arc::new(sgp4_boxed));
    assert_eq!(sys.mode(), SatelliteMode::Uninitialized);
    sys.request_population();
    assert_eq!(sys.mode(), SatelliteMode::Fetching);
    sys.poll(0.0, epoch());
    assert_eq!(sys.mode(), SatelliteMode::Live(LivePath::Fallback));
}

#[test]
fn no_library_anywhere_shows_synthetic_swarm() {
    let loader: LibraryLoader = Arc::new(|| Err(PropagationError::LibraryUnavailable("none".to_string())));
    let mut sys = SatelliteSystem::new(settings(true), Box::new(StaticSource::text(tle_text(2))), loader);
    sys.request_population();

    let mut now = 0.0;
    poll_until(&mut sys, &mut now, |s| s.mode() == SatelliteMode::Synthetic);
    assert_eq!(sys.collection().map(|c| c.len()), Some(25));
    assert_eq!(sys.synthetic().map(|s| s.len()), Some(25));
    assert_eq!(sys.frame(now).point_count(), 25);
}

#[test]
fn failed_fetch_then_retry_recovers_live_positions() {
    let mut sys = SatelliteSystem::new(
        settings(false),
        Box::new(StaticSource::failing(FetchError::Transport("offline".to_string()))),
        Arc::new(sgp4_boxed),
    );
    sys.request_population();
    sys.poll(0.0, epoch());
    assert_eq!(sys.mode(), SatelliteMode::Synthetic);
    assert!(matches!(sys.stats().last_fetch_error, Some(FetchError::Transport(_))));
    let swarm = sys.synthetic().unwrap();
    assert_eq!(swarm.len(), 25);
    assert_eq!(sys.collection().map(|c| c.len()), Some(25));
    assert!(swarm.satellites().iter().all(|s| (1.05..1.55).contains(&s.altitude)));

    sys.set_source(Box::new(StaticSource::text(tle_text(4))));
    assert_eq!(sys.mode(), SatelliteMode::Fetching);
    sys.poll(0.1, epoch());
    assert_eq!(sys.mode(), SatelliteMode::Live(LivePath::Fallback));
    assert!(sys.synthetic().is_none());
    assert_eq!(sys.stats().last_fetch_error, None);
    assert_eq!(sys.stats().fetches, 2);

    sys.poll(0.2, epoch());
    assert_eq!(sys.frame(0.2).point_count(), 5);
}

#[test]
fn empty_response_is_treated_as_a_failed_fetch() {
    let mut sys = SatelliteSystem::new(settings(false), Box::new(StaticSource::text("\n\n")), Arc::new(sgp4_boxed));
    sys.request_population();
    sys.poll(0.0, epoch());
    assert_eq!(sys.mode(), SatelliteMode::Synthetic);
    assert_eq!(sys.stats().last_fetch_error, Some(FetchError::Empty));
}

#[test]
fn non_tle_response_is_treated_as_a_failed_fetch() {
    let page = "<html>\n<head><title>502 Bad Gateway</title></head>\n<body>oops</body>\n</html>\n";
    let mut sys = SatelliteSystem::new(settings(false), Box::new(StaticSource::text(page)), Arc::new(sgp4_boxed));
    sys.request_population();
    sys.poll(0.0, epoch());
    sys.poll(0.1, epoch());
    assert_eq!(sys.mode(), SatelliteMode::Synthetic);
    assert_eq!(sys.stats().last_fetch_error, Some(FetchError::Malformed));
    assert_eq!(sys.frame(0.1).point_count(), 25);
}

#[test]
fn batches_blend_from_previous_positions() {
    let mut sys = SatelliteSystem::new(settings(false), Box::new(StaticSource::text(tle_text(1))), Arc::new(sgp4_boxed));
    sys.request_population();
    sys.poll(0.0, epoch());
    sys.poll(0.0, epoch());
    let first = sys.store().next().to_vec();

    sys.poll(1.0, epoch() + chrono::Duration::minutes(5));
    assert_eq!(sys.store().prev(), first.as_slice());
    let start = sys.position_of(0, 1.0).unwrap();
    assert_eq!(start.as_slice(), &first[0..3]);

    let end = sys.position_of(0, 2.0).unwrap();
    assert_eq!(end.as_slice(), &sys.store().next()[0..3]);
    assert_ne!(start, end);
}
