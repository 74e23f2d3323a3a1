//! Fuzzing orchestrator with concurrent process dispatch

use super::factory::FuzzProcessFactory;
use super::location::{Combination, FuzzGap};
use super::process::{FuzzProcess, FuzzResult, FuzzResultState, FuzzerListener};
use super::results::FuzzResultsModel;
use super::FuzzerStats;
use crate::app::FuzzerSettings;
use crate::error::FuzzerError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Attack mode determines how payloads are combined across gaps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttackMode {
    /// One gap at a time, the others keep their original text
    Sniper,
    /// First gap's payloads applied to every gap at once
    BatteringRam,
    /// Gap payload lists zipped; the shortest list wins
    Pitchfork,
    /// Cartesian product of all gap payload lists
    #[default]
    ClusterBomb,
}

impl AttackMode {
    pub fn all() -> &'static [AttackMode] {
        &[
            AttackMode::Sniper,
            AttackMode::BatteringRam,
            AttackMode::Pitchfork,
            AttackMode::ClusterBomb,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            AttackMode::Sniper => "Sniper",
            AttackMode::BatteringRam => "Battering Ram",
            AttackMode::Pitchfork => "Pitchfork",
            AttackMode::ClusterBomb => "Cluster Bomb",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AttackMode::Sniper => "Single gap at a time with its payloads",
            AttackMode::BatteringRam => "Same payload in all gaps",
            AttackMode::Pitchfork => "Parallel iteration through gap payloads",
            AttackMode::ClusterBomb => "All combinations of gap payloads",
        }
    }
}

impl std::str::FromStr for AttackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "sniper" => Ok(AttackMode::Sniper),
            "battering_ram" | "battering" => Ok(AttackMode::BatteringRam),
            "pitchfork" => Ok(AttackMode::Pitchfork),
            "cluster_bomb" | "clusterbomb" => Ok(AttackMode::ClusterBomb),
            other => Err(format!(
                "unknown attack mode '{}' (expected sniper, battering_ram, pitchfork or cluster_bomb)",
                other
            )),
        }
    }
}

/// Fuzzer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzerState {
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
}

/// Fuzzer configuration
#[derive(Debug, Clone)]
pub struct FuzzerConfig {
    /// Maximum concurrently running processes
    pub max_concurrent: usize,
    /// Delay between dispatches in milliseconds
    pub delay_ms: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            delay_ms: 0,
        }
    }
}

impl From<&FuzzerSettings> for FuzzerConfig {
    fn from(settings: &FuzzerSettings) -> Self {
        Self {
            max_concurrent: settings.max_concurrent,
            delay_ms: settings.delay_ms,
        }
    }
}

/// Feeds completed processes into the results model and statistics
struct ResultCollector {
    results: Arc<RwLock<FuzzResultsModel>>,
    stats: Arc<RwLock<FuzzerStats>>,
}

impl FuzzerListener for ResultCollector {
    fn on_complete(&self, process_id: usize, result: Option<&FuzzResult>) {
        let mut stats = self.stats.write();
        stats.requests_remaining = stats.requests_remaining.saturating_sub(1);

        let result = match result {
            Some(result) => result,
            None => {
                tracing::debug!(process = process_id, "Process stopped before completion");
                return;
            }
        };

        stats.requests_sent += 1;
        match result.state {
            FuzzResultState::Error => stats.errors += 1,
            FuzzResultState::Reflected => stats.reflected_count += 1,
            _ => {}
        }
        if let Some(start_time) = stats.start_time {
            stats.elapsed_ms = start_time.elapsed().as_millis() as u64;
            if stats.elapsed_ms > 0 {
                stats.requests_per_second =
                    stats.requests_sent as f64 / (stats.elapsed_ms as f64 / 1000.0);
            }
        }
        drop(stats);

        self.results.write().add_result(result);
    }
}

/// Dispatches fuzz processes for every payload combination
pub struct Fuzzer {
    config: FuzzerConfig,
    state: Arc<RwLock<FuzzerState>>,
    results: Arc<RwLock<FuzzResultsModel>>,
    stats: Arc<RwLock<FuzzerStats>>,
    /// Dispatched processes that have not finished running
    active: Arc<RwLock<Vec<Arc<FuzzProcess>>>>,
}

impl Fuzzer {
    pub fn new(config: FuzzerConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(FuzzerState::Idle)),
            results: Arc::new(RwLock::new(FuzzResultsModel::new())),
            stats: Arc::new(RwLock::new(FuzzerStats::default())),
            active: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Run one fuzzing session and return its results
    pub async fn fuzz(
        &self,
        factory: Arc<FuzzProcessFactory>,
        gaps: &[FuzzGap],
        mode: AttackMode,
    ) -> Result<FuzzResultsModel, FuzzerError> {
        let combinations = generate_combinations(gaps, mode)?;

        {
            *self.state.write() = FuzzerState::Running;
            *self.results.write() = FuzzResultsModel::new();
            self.active.write().clear();
            let mut stats = self.stats.write();
            *stats = FuzzerStats::default();
            stats.start_time = Some(Instant::now());
            stats.requests_remaining = combinations.len();
        }

        tracing::info!(
            mode = mode.name(),
            gaps = gaps.len(),
            combinations = combinations.len(),
            "Starting fuzzer"
        );

        let collector: Arc<dyn FuzzerListener> = Arc::new(ResultCollector {
            results: self.results.clone(),
            stats: self.stats.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut handles = Vec::new();

        for combination in combinations {
            if self.state() == FuzzerState::Stopped {
                break;
            }

            while self.dispatch_paused() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            if self.state() == FuzzerState::Stopped {
                break;
            }

            if self.config.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            // Registered under the state lock so a concurrent stop either
            // sees the process or prevents its dispatch
            let process = {
                let state = self.state.read();
                if *state == FuzzerState::Stopped {
                    break;
                }
                let process = Arc::new(factory.get_fuzz_process(combination));
                process.add_fuzzer_listener(collector.clone());
                self.active.write().push(process.clone());
                process
            };

            let active = self.active.clone();
            handles.push(tokio::spawn(async move {
                process.run().await;
                active.write().retain(|p| !Arc::ptr_eq(p, &process));
                drop(permit);
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Fuzz task panicked");
            }
        }

        {
            let mut state = self.state.write();
            if *state != FuzzerState::Stopped {
                *state = FuzzerState::Completed;
            }
        }
        self.active.write().clear();

        let stats = self.stats();
        tracing::info!(
            sent = stats.requests_sent,
            errors = stats.errors,
            reflected = stats.reflected_count,
            elapsed_ms = stats.elapsed_ms,
            "Fuzzer finished"
        );

        Ok(self.results())
    }

    /// Stop dispatching and complete every dispatched process
    pub fn stop(&self) {
        *self.state.write() = FuzzerState::Stopped;
        let active = self.active.read().clone();
        for process in active {
            process.stop();
        }
    }

    /// Hold further dispatches and flag every running process as paused
    pub fn pause(&self) {
        {
            let mut state = self.state.write();
            if *state != FuzzerState::Running {
                return;
            }
            *state = FuzzerState::Paused;
        }
        let active = self.active.read().clone();
        for process in active {
            process.pause();
        }
    }

    pub fn resume(&self) {
        {
            let mut state = self.state.write();
            if *state != FuzzerState::Paused {
                return;
            }
            *state = FuzzerState::Running;
        }
        let active = self.active.read().clone();
        for process in active {
            process.resume();
        }
    }

    /// Dispatch waits while the run or any dispatched process is paused
    fn dispatch_paused(&self) -> bool {
        match self.state() {
            FuzzerState::Paused => true,
            FuzzerState::Stopped => false,
            _ => self.active.read().iter().any(|p| p.is_paused()),
        }
    }

    pub fn state(&self) -> FuzzerState {
        *self.state.read()
    }

    pub fn stats(&self) -> FuzzerStats {
        self.stats.read().clone()
    }

    pub fn results(&self) -> FuzzResultsModel {
        self.results.read().clone()
    }
}

/// Payload combinations for the attack mode, in dispatch order
pub fn generate_combinations(
    gaps: &[FuzzGap],
    mode: AttackMode,
) -> Result<Vec<Combination>, FuzzerError> {
    if gaps.is_empty() {
        return Err(FuzzerError::NoGaps);
    }
    if let Some(gap) = gaps.iter().find(|g| g.payloads().is_empty()) {
        return Err(FuzzerError::NoPayloads {
            begin: gap.location().begin(),
            end: gap.location().end(),
        });
    }

    let combinations: Vec<Combination> = match mode {
        AttackMode::Sniper => gaps
            .iter()
            .flat_map(|gap| {
                gap.payloads().iter().map(move |payload| {
                    let mut combination = Combination::new();
                    combination.insert(gap.location(), payload.clone());
                    combination
                })
            })
            .collect(),
        AttackMode::BatteringRam => gaps[0]
            .payloads()
            .iter()
            .map(|payload| {
                gaps.iter()
                    .map(|gap| (gap.location(), payload.clone()))
                    .collect()
            })
            .collect(),
        AttackMode::Pitchfork => {
            let min_len = gaps.iter().map(|g| g.payloads().len()).min().unwrap_or(0);
            (0..min_len)
                .map(|i| {
                    gaps.iter()
                        .map(|gap| (gap.location(), gap.payloads()[i].clone()))
                        .collect()
                })
                .collect()
        }
        AttackMode::ClusterBomb => {
            let mut combinations = vec![Combination::new()];
            for gap in gaps {
                let mut next = Vec::with_capacity(combinations.len() * gap.payloads().len());
                for existing in &combinations {
                    for payload in gap.payloads() {
                        let mut combination = existing.clone();
                        combination.insert(gap.location(), payload.clone());
                        next.push(combination);
                    }
                }
                combinations = next;
            }
            combinations
        }
    };

    Ok(combinations)
}
