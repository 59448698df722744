//! Scenario runner - drives the full risk pipeline against ground truth.

use crate::context::SimContext;
use crate::error::SimError;
use crate::exporter::{SimEvent, SimExport, SimFrame, VehiclePosition};
use crate::oracle::Oracle;
use crate::scenarios::ScenarioId;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use v2x_core::{
    CycleReport, LoadBucket, OnboardUnit, PipelineConfig, RiskLevel, RsuCycle, StateEstimator,
    TrackedVehicle, Waypoint,
};
use v2x_env::{create_sensor, ManagedSensor, SensorConfig, SensorKind, V2xContext, VehicleId};

/// HIGH records before this time are attributed to filter start-up.
pub const WARMUP_SECS: f64 = 3.0;

/// Largest acceptable fused position error in the dropout scenario.
const MAX_RMS_ERROR_M: f64 = 5.0;

/// OBUs spawned by the OBU loop scenario.
const OBU_COUNT: u64 = 4;

/// Latitude offset between simulated OBU start points (~33 m).
const OBU_SPACING_DEG: f64 = 0.0003;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed its assertion
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Vehicles tracked by the RSU at the end
    pub final_vehicle_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// RSU cycles executed
    pub cycles: u64,

    /// Risk records produced across all cycles
    pub records: u64,

    pub high_records: u64,

    pub warnings_issued: u64,

    /// Warnings issued for HIGH records
    pub high_warnings: u64,

    /// Policy decisions taken
    pub decisions: u64,

    /// Cycles in which some decision saw the HIGH load bucket
    pub saturated_cycles: u64,

    pub peak_hotspots: usize,

    pub evicted_cells: u64,

    /// Observations delivered to estimators
    pub observations: u64,

    /// Observations lost to dropout
    pub dropped_observations: u64,

    /// Estimator updates skipped on a singular innovation
    pub skipped_updates: u64,

    /// Failed sensor reads (OBU scenarios)
    pub sensor_failures: u64,

    /// OBU ticks that produced a predicted trajectory
    pub predicted_trajectories: u64,

    /// First HIGH record after the warm-up
    pub first_high_secs: Option<f64>,

    /// RMS distance between fused and true positions at the end
    pub rms_position_error_m: Option<f64>,
}

/// Where tracked vehicles come from.
enum Fleet {
    /// Ground truth observed through the oracle, fused by bare estimators
    Oracle {
        oracle: Oracle,
        estimators: BTreeMap<VehicleId, StateEstimator>,
    },
    /// Full OBUs on simulated sensor drivers
    Obus {
        obus: Vec<OnboardUnit>,
        trajectories: BTreeMap<VehicleId, Vec<Waypoint>>,
    },
}

/// One scenario in flight.
struct Simulation {
    scenario: ScenarioId,
    seed: u64,
    ctx: Arc<SimContext>,
    fleet: Fleet,
    rsu: RsuCycle<SimContext>,
    metrics: ScenarioMetrics,
    export: Option<SimExport>,
    dt: f64,
    ticks: u64,
    tracked: usize,
}

impl Simulation {
    fn new(
        scenario: ScenarioId,
        seed: u64,
        config: &PipelineConfig,
        dt: f64,
        export: bool,
    ) -> Result<Self, SimError> {
        let physics_seed = seed.wrapping_mul(0x9e3779b97f4a7c15);
        let ctx = SimContext::shared(seed);

        let fleet = if scenario.uses_obus() {
            Fleet::Obus {
                obus: Self::spawn_obus(&ctx, config)?,
                trajectories: BTreeMap::new(),
            }
        } else {
            let mut oracle = Oracle::new(physics_seed)
                .with_noise(scenario.noise())
                .with_projection(config.estimator.reference);
            scenario.populate(&mut oracle);

            let mut estimators = BTreeMap::new();
            for vehicle in oracle.active_vehicles() {
                estimators.insert(vehicle.id.clone(), StateEstimator::new(config.estimator.clone())?);
            }
            Fleet::Oracle { oracle, estimators }
        };

        let rsu = RsuCycle::new(Arc::clone(&ctx), config)?;

        Ok(Self {
            scenario,
            seed,
            ctx,
            fleet,
            rsu,
            metrics: ScenarioMetrics::default(),
            export: export.then(|| SimExport::new(scenario.name(), seed)),
            dt,
            ticks: 0,
            tracked: 0,
        })
    }

    fn spawn_obus(ctx: &Arc<SimContext>, config: &PipelineConfig) -> Result<Vec<OnboardUnit>, SimError> {
        let kinds = [SensorKind::Gps, SensorKind::Imu, SensorKind::Radar];
        let mut obus = Vec::with_capacity(OBU_COUNT as usize);

        for index in 1..=OBU_COUNT {
            let defaults = SensorConfig::simulated();
            let sensor_config = SensorConfig {
                start_lat: defaults.start_lat + OBU_SPACING_DEG * (index - 1) as f64,
                ..defaults
            };

            let mut sensors = Vec::with_capacity(kinds.len());
            for (stream, kind) in kinds.iter().enumerate() {
                let rng = ctx.derive_rng(index * 16 + stream as u64);
                let driver = create_sensor(*kind, &sensor_config, rng, Arc::clone(ctx) as Arc<dyn V2xContext>)?;
                sensors.push(ManagedSensor::new(driver));
            }

            let mut obu = OnboardUnit::new(VehicleId::from_seed(index), sensors, config)?;
            obu.connect_all()?;
            obus.push(obu);
        }
        Ok(obus)
    }

    /// Advances one tick: physics, fusion, then one RSU cycle.
    fn step(&mut self) -> CycleReport {
        self.ticks += 1;
        self.ctx.advance_time(Duration::from_secs_f64(self.dt));
        let dt = self.dt;

        let snapshot: Vec<TrackedVehicle> = match &mut self.fleet {
            Fleet::Oracle { oracle, estimators } => {
                oracle.step(dt);
                for (id, observations) in oracle.observe_all() {
                    let Some(estimator) = estimators.get_mut(&id) else {
                        continue;
                    };
                    estimator.predict(dt);
                    for observation in &observations {
                        estimator.apply(observation);
                    }
                }
                estimators
                    .iter()
                    .filter(|(_, e)| e.is_initialised())
                    .map(|(id, e)| TrackedVehicle::new(id.clone(), e.get_state()))
                    .collect()
            }
            Fleet::Obus { obus, trajectories } => {
                let mut next = BTreeMap::new();
                for obu in obus.iter_mut() {
                    let neighbours: Vec<Vec<Waypoint>> = trajectories
                        .iter()
                        .filter(|(id, _)| *id != obu.vehicle_id())
                        .map(|(_, t)| t.clone())
                        .collect();

                    let report = obu.tick(dt, &neighbours);
                    if let Some(trajectory) = report.trajectory {
                        self.metrics.predicted_trajectories += 1;
                        next.insert(report.vehicle_id, trajectory);
                    }
                }
                *trajectories = next;

                obus.iter()
                    .filter(|o| o.estimator().is_initialised())
                    .map(|o| o.tracked())
                    .collect()
            }
        };

        self.tracked = snapshot.len();
        let report = self.rsu.run_cycle(&snapshot);
        self.record(&report, &snapshot);
        report
    }

    fn record(&mut self, report: &CycleReport, snapshot: &[TrackedVehicle]) {
        let mut events = Vec::new();
        let m = &mut self.metrics;

        let high = report
            .records
            .iter()
            .filter(|r| r.record.risk_level == RiskLevel::High)
            .count() as u64;
        let saturated = report
            .records
            .iter()
            .any(|r| r.decision.state.load == LoadBucket::High);

        m.cycles += 1;
        m.records += report.records.len() as u64;
        m.decisions += report.records.len() as u64;
        m.high_records += high;
        m.warnings_issued += report.warnings_issued as u64;
        m.high_warnings += report
            .warned()
            .filter(|r| r.record.risk_level == RiskLevel::High)
            .count() as u64;
        m.peak_hotspots = m.peak_hotspots.max(report.hotspots.len());
        m.evicted_cells += report.evicted_cells as u64;

        if saturated {
            if m.saturated_cycles == 0 {
                events.push(SimEvent::info(format!(
                    "channel saturated ({} records)",
                    report.records.len()
                )));
            }
            m.saturated_cycles += 1;
        }

        if high > 0 && m.first_high_secs.is_none() && report.timestamp > WARMUP_SECS {
            m.first_high_secs = Some(report.timestamp);
            if let Some(top) = report.records.first() {
                events.push(SimEvent::warn(format!(
                    "first HIGH risk: {} / {} (score {:.4})",
                    top.record.vehicle_a,
                    top.record
                        .vehicle_b
                        .as_ref()
                        .map_or("-", |id| id.as_str()),
                    top.record.risk_score
                )));
            }
        }

        if self.ticks % 10 == 0 {
            debug!(
                "  t={:.1}s | tracked={} | records={} | high={} | warnings={} | cells={}",
                report.timestamp,
                snapshot.len(),
                report.records.len(),
                high,
                report.warnings_issued,
                report.active_cells
            );
        }

        if let Some(export) = self.export.as_mut() {
            let ground_truth = match &self.fleet {
                Fleet::Oracle { oracle, .. } => oracle
                    .ground_truth()
                    .into_iter()
                    .map(|(id, state)| VehiclePosition::new(id, &state))
                    .collect(),
                Fleet::Obus { .. } => Vec::new(),
            };
            export.add_frame(SimFrame {
                time_sec: report.timestamp,
                ground_truth,
                estimates: snapshot
                    .iter()
                    .map(|v| VehiclePosition::new(v.id.clone(), &v.state))
                    .collect(),
                records: report.records.clone(),
                hotspots: report.hotspots.clone(),
                events,
            });
        }
    }

    /// RMS distance between fused estimates and truth.
    fn position_rms(&self) -> Option<f64> {
        let Fleet::Oracle { oracle, estimators } = &self.fleet else {
            return None;
        };

        let errors: Vec<f64> = oracle
            .ground_truth()
            .iter()
            .filter_map(|(id, truth)| {
                let estimator = estimators.get(id).filter(|e| e.is_initialised())?;
                let state = estimator.get_state();
                Some((state.x - truth.x).powi(2) + (state.y - truth.y).powi(2))
            })
            .collect();

        if errors.is_empty() {
            return None;
        }
        Some((errors.iter().sum::<f64>() / errors.len() as f64).sqrt())
    }

    /// Collects end-of-run metrics and applies the scenario's assertion.
    fn finish(mut self, export_path: Option<&str>) -> ScenarioResult {
        self.metrics.rms_position_error_m = self.position_rms();
        match &self.fleet {
            Fleet::Oracle { oracle, estimators } => {
                self.metrics.observations = oracle.generated_observations();
                self.metrics.dropped_observations = oracle.dropped_observations();
                self.metrics.skipped_updates = estimators.values().map(|e| e.skipped_updates()).sum();
            }
            Fleet::Obus { obus, .. } => {
                self.metrics.sensor_failures = obus
                    .iter()
                    .flat_map(|o| o.sensors())
                    .map(|s| s.failures())
                    .sum();
                self.metrics.skipped_updates =
                    obus.iter().map(|o| o.estimator().skipped_updates()).sum();
            }
        }

        let failure_reason = self.evaluate().err();
        let passed = failure_reason.is_none();

        if let (Some(export), Some(path)) = (self.export.as_mut(), export_path) {
            export.finalize(passed, self.metrics.rms_position_error_m);
            match export.write_to_file(path) {
                Ok(()) => info!("Exported {} frames to {}", export.frames.len(), path),
                Err(e) => error!("{}", SimError::io(path, e)),
            }
        }

        ScenarioResult {
            scenario: self.scenario,
            seed: self.seed,
            passed,
            total_ticks: self.ticks,
            final_time_secs: self.ctx.now_secs(),
            final_vehicle_count: self.tracked,
            failure_reason,
            metrics: self.metrics,
        }
    }

    fn evaluate(&self) -> Result<(), String> {
        let m = &self.metrics;
        match self.scenario {
            ScenarioId::HeadOn | ScenarioId::Intersection => {
                let conflict = self.scenario.conflict_time_secs().unwrap_or(f64::INFINITY);
                match m.first_high_secs {
                    None => Err("no HIGH risk record before the end of the run".to_string()),
                    Some(t) if t > conflict => Err(format!(
                        "HIGH risk first raised at {:.1}s, after the {:.1}s conflict",
                        t, conflict
                    )),
                    Some(_) if m.high_warnings == 0 => {
                        Err("HIGH risk pair was never warned".to_string())
                    }
                    Some(t) => {
                        info!("✓ HIGH risk raised {:.1}s before the conflict", conflict - t);
                        Ok(())
                    }
                }
            }
            ScenarioId::Platoon => match m.first_high_secs {
                Some(t) => Err(format!("false HIGH alarm at {:.1}s in a matched-speed convoy", t)),
                None if m.records == 0 => Err("convoy produced no risk records".to_string()),
                None => Ok(()),
            },
            ScenarioId::ChannelSaturation => {
                if m.saturated_cycles == 0 {
                    Err(format!("channel never saturated ({} records)", m.records))
                } else if self.rsu.policy().stats().total_decisions != m.decisions {
                    Err("policy skipped records under load".to_string())
                } else {
                    Ok(())
                }
            }
            ScenarioId::SensorDropout => match m.rms_position_error_m {
                _ if m.dropped_observations == 0 => Err("no observations were dropped".to_string()),
                Some(rms) if rms < MAX_RMS_ERROR_M => Ok(()),
                Some(rms) => Err(format!(
                    "RMS error {:.2}m exceeds threshold {:.1}m",
                    rms, MAX_RMS_ERROR_M
                )),
                None => Err("no estimator was ever initialised".to_string()),
            },
            ScenarioId::ObuLoop => {
                let Fleet::Obus { obus, .. } = &self.fleet else {
                    return Err("OBU loop ran without OBUs".to_string());
                };
                if let Some(obu) = obus.iter().find(|o| !o.estimator().is_initialised()) {
                    Err(format!("OBU {} never received a GPS fix", obu.vehicle_id()))
                } else if let Some(obu) = obus.iter().find(|o| !o.tracked().state.x.is_finite()) {
                    Err(format!("OBU {} state diverged", obu.vehicle_id()))
                } else if m.sensor_failures > 0 {
                    Err(format!("{} sensor reads failed", m.sensor_failures))
                } else if m.predicted_trajectories == 0 {
                    Err("no OBU produced a trajectory".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Runs traffic scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Tick rate in Hz
    tick_rate_hz: u32,

    /// Maximum duration in seconds
    max_duration_secs: f64,

    /// Pipeline configuration shared by every component
    config: PipelineConfig,

    /// Where to write the frame export, if anywhere
    export_path: Option<String>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner at 10 Hz for 10 s.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            tick_rate_hz: 10,
            max_duration_secs: 10.0,
            config: PipelineConfig::default(),
            export_path: None,
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Writes a frame-by-frame JSON export of each run to `path`.
    pub fn with_export(mut self, path: impl Into<String>) -> Self {
        self.export_path = Some(path.into());
        self
    }

    fn dt(&self) -> f64 {
        1.0 / self.tick_rate_hz as f64
    }

    fn target_ticks(&self) -> u64 {
        (self.max_duration_secs * self.tick_rate_hz as f64).round().max(0.0) as u64
    }

    fn prepare(&self, scenario: ScenarioId) -> Result<Simulation, ScenarioResult> {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        Simulation::new(
            scenario,
            self.seed,
            &self.config,
            self.dt(),
            self.export_path.is_some(),
        )
        .map_err(|e| ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_vehicle_count: 0,
            failure_reason: Some(format!("setup failed: {}", e)),
            metrics: ScenarioMetrics::default(),
        })
    }

    /// Runs a scenario as fast as possible and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        let mut sim = match self.prepare(scenario) {
            Ok(sim) => sim,
            Err(result) => return result,
        };

        for _ in 0..self.target_ticks() {
            sim.step();
        }
        sim.finish(self.export_path.as_deref())
    }

    /// Runs a scenario, sleeping one tick on `pacer` between cycles.
    ///
    /// With a `TokioContext` this paces the pipeline against the wall
    /// clock; the virtual clock of the simulation is unaffected.
    pub async fn run_paced<P: V2xContext>(&self, scenario: ScenarioId, pacer: &P) -> ScenarioResult {
        let mut sim = match self.prepare(scenario) {
            Ok(sim) => sim,
            Err(result) => return result,
        };

        let tick = Duration::from_secs_f64(self.dt());
        for _ in 0..self.target_ticks() {
            let started = pacer.now();
            sim.step();
            let elapsed = pacer.now().saturating_sub(started);
            pacer.sleep(tick.saturating_sub(elapsed)).await;
        }
        sim.finish(self.export_path.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_on_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::HeadOn);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.total_ticks, 100);
        let first_high = result.metrics.first_high_secs.unwrap();
        assert!(first_high > WARMUP_SECS && first_high <= 6.0);
        assert!(result.metrics.high_warnings > 0);
    }

    #[test]
    fn test_intersection_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::Intersection);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.peak_hotspots > 0);
    }

    #[test]
    fn test_platoon_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::Platoon);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_vehicle_count, 5);
        assert!(result.metrics.records > 0);
        assert!(result.metrics.first_high_secs.is_none());
    }

    #[test]
    fn test_channel_saturation_scenario() {
        let result = ScenarioRunner::new(42)
            .with_duration(2.0)
            .run(ScenarioId::ChannelSaturation);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.saturated_cycles > 0);
        assert_eq!(result.metrics.decisions, result.metrics.records);
        let capacity = v2x_core::DisseminationConfig::default().max_channel_capacity as u64;
        assert!(result.metrics.warnings_issued <= result.metrics.cycles * capacity);
    }

    #[test]
    fn test_sensor_dropout_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::SensorDropout);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.dropped_observations > 0);
        assert!(result.metrics.rms_position_error_m.unwrap() < MAX_RMS_ERROR_M);
    }

    #[test]
    fn test_obu_loop_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::ObuLoop);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_vehicle_count, 4);
        assert!(result.metrics.predicted_trajectories > 0);
        assert_eq!(result.metrics.sensor_failures, 0);
    }

    #[test]
    fn test_same_seed_same_run() {
        let run = || {
            ScenarioRunner::new(7)
                .with_duration(3.0)
                .run(ScenarioId::SensorDropout)
        };
        let first = run();
        let second = run();

        assert_eq!(first.metrics.dropped_observations, second.metrics.dropped_observations);
        assert_eq!(first.metrics.warnings_issued, second.metrics.warnings_issued);
        assert_eq!(first.metrics.rms_position_error_m, second.metrics.rms_position_error_m);
    }

    #[test]
    fn test_invalid_config_fails_setup() {
        let mut config = PipelineConfig::default();
        config.dissemination.max_channel_capacity = 0;

        let result = ScenarioRunner::new(1)
            .with_config(config)
            .run(ScenarioId::HeadOn);

        assert!(!result.passed);
        assert_eq!(result.total_ticks, 0);
        assert!(result.failure_reason.unwrap().starts_with("setup failed"));
    }

    #[tokio::test]
    async fn test_paced_run_on_virtual_clock() {
        let pacer = SimContext::new(0);
        let result = ScenarioRunner::new(42)
            .with_duration(1.0)
            .run_paced(ScenarioId::Platoon, &pacer)
            .await;

        assert_eq!(result.total_ticks, 10);
        assert_eq!(pacer.now(), Duration::from_secs(1));
    }
}
