//! Synthetic satellites for when no element sets are available.
//!
//! Each body flies an inclined circular orbit defined at generation time;
//! positions are recomputed every frame, no propagation involved.

use std::f64::consts::{PI, TAU};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub const ALTITUDE_RANGE: std::ops::Range<f64> = 1.05..1.55;
pub const SPEED_RANGE: std::ops::Range<f64> = 0.002..0.012;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticSatellite {
    /// Orbit radius in scene units.
    pub altitude: f64,
    /// Radians per frame tick.
    pub speed: f64,
    pub phase: f64,
    pub inclination: f64,
}

impl SyntheticSatellite {
    pub fn position(&self) -> [f32; 3] {
        let (r, a, i) = (self.altitude, self.phase, self.inclination);
        [
            (r * a.cos()) as f32,
            (r * a.sin() * i.sin()) as f32,
            (r * a.sin() * i.cos()) as f32,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticSwarm {
    satellites: Vec<SyntheticSatellite>,
}

impl SyntheticSwarm {
    pub fn generate(count: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let satellites = (0..count)
            .map(|_| SyntheticSatellite {
                altitude: rng.gen_range(ALTITUDE_RANGE),
                speed: rng.gen_range(SPEED_RANGE),
                phase: rng.gen_range(0.0..TAU),
                inclination: rng.gen_range(0.0..PI),
            })
            .collect();
        Self { satellites }
    }

    /// One frame tick.
    pub fn advance(&mut self) {
        for sat in &mut self.satellites {
            sat.phase = (sat.phase + sat.speed).rem_euclid(TAU);
        }
    }

    pub fn write_positions(&self, out: &mut Vec<f32>) {
        out.clear();
        out.reserve(self.satellites.len() * 3);
        for sat in &self.satellites {
            out.extend_from_slice(&sat.position());
        }
    }

    pub fn positions(&self) -> Vec<f32> {
        let mut out = Vec::new();
        self.write_positions(&mut out);
        out
    }

    pub fn satellites(&self) -> &[SyntheticSatellite] {
        &self.satellites
    }

    pub fn len(&self) -> usize {
        self.satellites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.satellites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_fall_in_ranges() {
        let swarm = SyntheticSwarm::generate(2000, 7);
        assert_eq!(swarm.len(), 2000);
        for s in swarm.satellites() {
            assert!(ALTITUDE_RANGE.contains(&s.altitude));
            assert!(SPEED_RANGE.contains(&s.speed));
            assert!((0.0..TAU).contains(&s.phase));
            assert!((0.0..PI).contains(&s.inclination));
        }
    }

    #[test]
    fn same_seed_same_swarm() {
        let a = SyntheticSwarm::generate(50, 42);
        let b = SyntheticSwarm::generate(50, 42);
        let c = SyntheticSwarm::generate(50, 43);
        assert_eq!(a.satellites(), b.satellites());
        assert_ne!(a.satellites(), c.satellites());
    }

    #[test]
    fn advance_moves_every_body_by_its_speed() {
        let mut swarm = SyntheticSwarm::generate(10, 1);
        let before: Vec<_> = swarm.satellites().to_vec();
        swarm.advance();
        for (b, a) in before.iter().zip(swarm.satellites()) {
            let expected = (b.phase + b.speed).rem_euclid(TAU);
            assert_eq!(a.phase, expected);
        }
    }

    #[test]
    fn positions_stay_on_orbit_radius() {
        let mut swarm = SyntheticSwarm::generate(25, 9);
        for _ in 0..100 {
            swarm.advance();
        }
        let positions = swarm.positions();
        assert_eq!(positions.len(), 75);
        for (p, s) in positions.chunks_exact(3).zip(swarm.satellites()) {
            let r = ((p[0] * p[0] + p[1] * p[1] + p[2] * p[2]) as f64).sqrt();
            assert!((r - s.altitude).abs() < 1e-5);
        }
    }

    #[test]
    fn equatorial_orbit_has_no_vertical_component() {
        let sat = SyntheticSatellite { altitude: 1.2, speed: 0.01, phase: 1.0, inclination: 0.0 };
        let [_, y, _] = sat.position();
        assert_eq!(y, 0.0);
    }
}
