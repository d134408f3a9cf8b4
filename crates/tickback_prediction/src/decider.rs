//! Resimulation policy.
//!
//! A decider compares the locally predicted state at tick `T` with the
//! authoritative state at `T` and says whether the prediction can stand.

use tickback_core::{EntityId, StateRecord};

use crate::config::{CorrectionMode, DeciderConfig};
use crate::events::{CheckReport, EventSink, PredictionEvent};

/// Outcome of one comparison, ordered by severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PredictionDecision {
    /// Prediction stands.
    #[default]
    NoOp,
    /// Copy the authoritative state.
    Snap,
    /// Replay from the authoritative state.
    Resimulate,
}

/// Divergence policy.
pub trait ResimulationDecider {
    /// Compares `local` to `authoritative` for `entity`.
    fn check(&mut self, entity: EntityId, local: &StateRecord, authoritative: &StateRecord) -> PredictionDecision;
}

/// Single-threshold variant: any closure returning `true` requests a
/// resimulation.
impl<F> ResimulationDecider for F
where
    F: FnMut(&StateRecord, &StateRecord) -> bool,
{
    fn check(&mut self, _entity: EntityId, local: &StateRecord, authoritative: &StateRecord) -> PredictionDecision {
        if self(local, authoritative) {
            PredictionDecision::Resimulate
        } else {
            PredictionDecision::NoOp
        }
    }
}

/// Running comparison statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DeciderStats {
    /// Comparisons made.
    pub checks: u64,
    /// Comparisons that requested a correction.
    pub corrections: u64,
    /// Largest position distance seen.
    pub max_distance: f32,
    /// Mean position distance.
    pub avg_distance: f32,
    /// Largest orientation difference seen (degrees).
    pub max_rotation: f32,
    /// Mean orientation difference (degrees).
    pub avg_rotation: f32,
}

impl DeciderStats {
    fn record(&mut self, report: &CheckReport) {
        self.checks += 1;
        if report.decision != PredictionDecision::NoOp {
            self.corrections += 1;
        }
        let n = self.checks as f32;
        self.max_distance = self.max_distance.max(report.distance);
        self.avg_distance += (report.distance - self.avg_distance) / n;
        self.max_rotation = self.max_rotation.max(report.rotation_degrees);
        self.avg_rotation += (report.rotation_degrees - self.avg_rotation) / n;
    }
}

/// Independent OR'd thresholds over position, orientation, velocity
/// direction, speed and angular velocity.
#[derive(Debug, Clone)]
pub struct ThresholdDecider {
    config: DeciderConfig,
    stats: DeciderStats,
    events: EventSink,
}

impl ThresholdDecider {
    /// Creates a decider reporting every comparison to `events`.
    #[must_use]
    pub fn new(config: DeciderConfig, events: EventSink) -> Self {
        Self {
            config,
            stats: DeciderStats::default(),
            events,
        }
    }

    /// Thresholds in use.
    #[must_use]
    pub fn config(&self) -> &DeciderConfig {
        &self.config
    }

    /// Statistics so far.
    #[must_use]
    pub fn stats(&self) -> DeciderStats {
        self.stats
    }

    /// Measures every quantity and applies the thresholds without side effects.
    #[must_use]
    pub fn evaluate(&self, entity: EntityId, local: &StateRecord, authoritative: &StateRecord) -> CheckReport {
        let distance = local.position.distance(authoritative.position);
        let rotation_degrees = local.orientation.angle_degrees(authoritative.orientation);
        let velocity_angle_degrees = local.velocity.angle_degrees(authoritative.velocity);
        let speed_delta = (local.velocity.length() - authoritative.velocity.length()).abs();
        let angular_velocity_delta = local.angular_velocity.distance(authoritative.angular_velocity);

        let c = &self.config;
        let exceeded = exceeds(distance, c.distance)
            || exceeds(rotation_degrees, c.rotation_degrees)
            || exceeds(velocity_angle_degrees, c.velocity_angle_degrees)
            || exceeds(speed_delta, c.speed_delta)
            || exceeds(angular_velocity_delta, c.angular_velocity_delta);

        let decision = match (exceeded, c.correction) {
            (false, _) => PredictionDecision::NoOp,
            (true, CorrectionMode::Resimulate) => PredictionDecision::Resimulate,
            (true, CorrectionMode::Snap) => PredictionDecision::Snap,
        };

        CheckReport {
            entity,
            tick: authoritative.tick,
            distance,
            rotation_degrees,
            velocity_angle_degrees,
            speed_delta,
            angular_velocity_delta,
            decision,
        }
    }
}

impl ResimulationDecider for ThresholdDecider {
    fn check(&mut self, entity: EntityId, local: &StateRecord, authoritative: &StateRecord) -> PredictionDecision {
        let report = self.evaluate(entity, local, authoritative);
        let decision = report.decision;
        self.stats.record(&report);
        self.events.emit(PredictionEvent::DeciderCheck(report));
        decision
    }
}

/// Threshold of zero or below disables the check.
#[inline]
fn exceeds(value: f32, threshold: f32) -> bool {
    threshold > 0.0 && value > threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::drain;
    use tickback_core::{BodyState, Quaternion, Tick, Vec3};

    fn record(position: Vec3, velocity: Vec3) -> StateRecord {
        StateRecord::from_body(
            Tick(10),
            BodyState {
                position,
                velocity,
                ..BodyState::default()
            },
        )
    }

    fn decider(config: DeciderConfig) -> ThresholdDecider {
        ThresholdDecider::new(config, EventSink::new())
    }

    #[test]
    fn test_identical_states_are_accepted() {
        let mut d = decider(DeciderConfig::default());
        let a = record(Vec3::new(1.0, 2.0, 3.0), Vec3::X);
        assert_eq!(d.check(EntityId(1), &a, &a.clone()), PredictionDecision::NoOp);
    }

    #[test]
    fn test_each_threshold_triggers_alone() {
        let base = record(Vec3::ZERO, Vec3::X);
        let only = |f: fn(&mut DeciderConfig)| {
            let mut config = DeciderConfig {
                distance: 0.0,
                rotation_degrees: 0.0,
                velocity_angle_degrees: 0.0,
                speed_delta: 0.0,
                angular_velocity_delta: 0.0,
                correction: CorrectionMode::Resimulate,
            };
            f(&mut config);
            decider(config)
        };

        let moved = record(Vec3::new(0.5, 0.0, 0.0), Vec3::X);
        assert_eq!(only(|c| c.distance = 0.1).check(EntityId(1), &base, &moved), PredictionDecision::Resimulate);

        let mut turned = base.clone();
        turned.orientation = Quaternion::from_axis_angle(Vec3::Y, 10.0);
        assert_eq!(
            only(|c| c.rotation_degrees = 1.0).check(EntityId(1), &base, &turned),
            PredictionDecision::Resimulate
        );

        let veered = record(Vec3::ZERO, Vec3::Y);
        assert_eq!(
            only(|c| c.velocity_angle_degrees = 5.0).check(EntityId(1), &base, &veered),
            PredictionDecision::Resimulate
        );
        // Same direction change, speed unchanged
        assert_eq!(only(|c| c.speed_delta = 0.1).check(EntityId(1), &base, &veered), PredictionDecision::NoOp);

        let faster = record(Vec3::ZERO, Vec3::X * 2.0);
        assert_eq!(only(|c| c.speed_delta = 0.1).check(EntityId(1), &base, &faster), PredictionDecision::Resimulate);

        let mut spinning = base.clone();
        spinning.angular_velocity = Vec3::Z;
        assert_eq!(
            only(|c| c.angular_velocity_delta = 0.5).check(EntityId(1), &base, &spinning),
            PredictionDecision::Resimulate
        );
    }

    #[test]
    fn test_disabled_thresholds_accept_anything() {
        let mut d = decider(DeciderConfig {
            distance: 0.0,
            rotation_degrees: -1.0,
            velocity_angle_degrees: 0.0,
            speed_delta: 0.0,
            angular_velocity_delta: 0.0,
            correction: CorrectionMode::Resimulate,
        });
        let a = record(Vec3::ZERO, Vec3::ZERO);
        let b = record(Vec3::new(100.0, 0.0, 0.0), Vec3::new(0.0, 50.0, 0.0));
        assert_eq!(d.check(EntityId(1), &a, &b), PredictionDecision::NoOp);
    }

    #[test]
    fn test_snap_mode() {
        let mut d = decider(DeciderConfig {
            correction: CorrectionMode::Snap,
            ..DeciderConfig::default()
        });
        let a = record(Vec3::ZERO, Vec3::ZERO);
        let b = record(Vec3::X, Vec3::ZERO);
        assert_eq!(d.check(EntityId(1), &a, &b), PredictionDecision::Snap);
    }

    #[test]
    fn test_raising_thresholds_never_rejects_accepted_pair() {
        let a = record(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        let b = record(Vec3::new(0.05, 0.0, 0.0), Vec3::new(1.0, 0.02, 0.0));

        let loose = DeciderConfig {
            distance: 0.1,
            rotation_degrees: 1.0,
            velocity_angle_degrees: 2.0,
            speed_delta: 0.01,
            angular_velocity_delta: 0.01,
            correction: CorrectionMode::Resimulate,
        };
        assert_eq!(decider(loose.clone()).check(EntityId(1), &a, &b), PredictionDecision::NoOp);

        for scale in [1.5_f32, 2.0, 10.0, 1000.0] {
            let raised = DeciderConfig {
                distance: loose.distance * scale,
                rotation_degrees: loose.rotation_degrees * scale,
                velocity_angle_degrees: loose.velocity_angle_degrees * scale,
                speed_delta: loose.speed_delta * scale,
                angular_velocity_delta: loose.angular_velocity_delta * scale,
                correction: CorrectionMode::Resimulate,
            };
            assert_eq!(decider(raised).check(EntityId(1), &a, &b), PredictionDecision::NoOp);
        }
    }

    #[test]
    fn test_every_check_is_reported_and_counted() {
        let sink = EventSink::new();
        let rx = sink.subscribe();
        let mut d = ThresholdDecider::new(DeciderConfig::default(), sink);

        let a = record(Vec3::ZERO, Vec3::ZERO);
        let b = record(Vec3::new(3.0, 4.0, 0.0), Vec3::ZERO);
        d.check(EntityId(5), &a, &a.clone());
        d.check(EntityId(5), &a, &b);

        let reports: Vec<CheckReport> = drain(&rx)
            .into_iter()
            .filter_map(|e| match e {
                PredictionEvent::DeciderCheck(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].distance, 5.0);
        assert_eq!(reports[1].decision, PredictionDecision::Resimulate);

        let stats = d.stats();
        assert_eq!(stats.checks, 2);
        assert_eq!(stats.corrections, 1);
        assert_eq!(stats.max_distance, 5.0);
        assert_eq!(stats.avg_distance, 2.5);
    }

    #[test]
    fn test_closure_decider() {
        let mut strict = |l: &StateRecord, a: &StateRecord| l != a;
        let a = record(Vec3::ZERO, Vec3::ZERO);
        let b = record(Vec3::Z, Vec3::ZERO);
        assert_eq!(strict.check(EntityId(1), &a, &a.clone()), PredictionDecision::NoOp);
        assert_eq!(strict.check(EntityId(1), &a, &b), PredictionDecision::Resimulate);
    }
}
