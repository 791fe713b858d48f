//! Core population engine for the Warren rabbit simulator.
//!
//! One [`SimulationRun`] drives a single independent population over a monthly
//! tick loop: every occupied slot in the [`RabbitStore`] is aged, survival-
//! checked, and given a chance to mature, conceive, and give birth. Runs are
//! embarrassingly parallel; [`run_batch`] fans them out across a rayon pool,
//! folds their [`RunResult`]s into per-worker [`BatchAccumulator`]s, and
//! reduces those with an exact associative merge into a [`BatchReport`].

use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;
use thiserror::Error;
use tracing::{info, warn};

/// Survival rate (percent per month) assigned to newborn kits.
pub const INITIAL_SURVIVAL_RATE: f64 = 35.0;
/// Survival rate (percent per month) once a rabbit reaches maturity.
pub const ADULT_SURVIVAL_RATE: f64 = 60.0;
/// Youngest age (months) at which a maturity roll is attempted.
pub const MATURITY_MIN_AGE: u32 = 5;
/// Age (months) past which old-age survival penalties accrue.
pub const SENESCENCE_AGE: u32 = 120;
/// Survival penalty (percentage points) per full year past [`SENESCENCE_AGE`].
pub const SENESCENCE_PENALTY_PER_YEAR: f64 = 10.0;
/// Age assigned to both founders in the two-rabbit seeding mode.
pub const FOUNDER_AGE: u32 = 9;
/// Survival rate granted to founders until the first monthly recompute.
pub const FOUNDER_SURVIVAL_RATE: f64 = 100.0;
/// Record capacity reserved per run before the first doubling.
pub const DEFAULT_INITIAL_CAPACITY: usize = 1_000_000;

/// Standard deviation of the Gaussian survival model.
const GAUSSIAN_SPREAD: f64 = 5.0;
/// Half-width multiplier for a 95% normal confidence interval.
const CI_95_Z: f64 = 1.96;

/// Biological sex of a rabbit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Sex {
    Female,
    Male,
}

impl Sex {
    /// Draw a sex with equal probability.
    pub fn sample(rng: &mut SmallRng) -> Self {
        if rng.random::<f64>() < 0.5 {
            Self::Male
        } else {
            Self::Female
        }
    }
}

/// Stable handle into a [`RabbitStore`].
///
/// Handles are plain slot indices: after the occupant dies the same index is
/// recycled for the next allocation, so a handle is only meaningful while its
/// rabbit is alive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RabbitId(pub u32);

impl RabbitId {
    #[inline]
    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One simulated rabbit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Rabbit {
    pub sex: Sex,
    pub alive: bool,
    pub age_months: u32,
    pub mature: bool,
    /// Valid only while `mature` is set.
    pub maturity_age: u32,
    pub pregnant: bool,
    pub litters_per_year: u32,
    pub litters_this_year: u32,
    /// Percent in `[0, 100]`, recomputed every month by the survival model.
    pub survival_rate: f64,
    /// Suppresses a second survival roll within the same month.
    pub survival_checked: bool,
}

impl Rabbit {
    /// A freshly born, immature kit.
    #[must_use]
    pub const fn newborn(sex: Sex) -> Self {
        Self {
            sex,
            alive: true,
            age_months: 0,
            mature: false,
            maturity_age: 0,
            pregnant: false,
            litters_per_year: 0,
            litters_this_year: 0,
            survival_rate: INITIAL_SURVIVAL_RATE,
            survival_checked: false,
        }
    }

    /// A mature adult of the given age at the adult base survival rate.
    #[must_use]
    pub const fn adult(sex: Sex, age_months: u32) -> Self {
        Self {
            sex,
            alive: true,
            age_months,
            mature: true,
            maturity_age: 0,
            pregnant: false,
            litters_per_year: 0,
            litters_this_year: 0,
            survival_rate: ADULT_SURVIVAL_RATE,
            survival_checked: false,
        }
    }

    /// A founder: mature, age [`FOUNDER_AGE`], survival pinned at 100 until
    /// the first monthly recompute.
    #[must_use]
    pub const fn founder(sex: Sex) -> Self {
        let mut rabbit = Self::adult(sex, FOUNDER_AGE);
        rabbit.survival_rate = FOUNDER_SURVIVAL_RATE;
        rabbit
    }
}

/// Live head-count per sex, maintained exactly at birth and death.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SexTally {
    pub males: u32,
    pub females: u32,
}

impl SexTally {
    fn record_birth(&mut self, sex: Sex) {
        match sex {
            Sex::Male => self.males += 1,
            Sex::Female => self.females += 1,
        }
    }

    fn record_death(&mut self, sex: Sex) {
        match sex {
            Sex::Male => self.males -= 1,
            Sex::Female => self.females -= 1,
        }
    }

    /// Total living rabbits across both sexes.
    #[must_use]
    pub const fn live(&self) -> u32 {
        self.males + self.females
    }
}

/// Errors that abort a single simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    /// The store could not grow its backing storage.
    #[error("rabbit store allocation failed: {0}")]
    OutOfMemory(#[from] TryReserveError),
}

/// Slot-recycling arena owning every rabbit record of one run.
///
/// Records are never removed: a death marks the slot and pushes its index on
/// a LIFO free stack, and the next allocation pops it. The backing vector
/// grows by doubling from a configurable initial reservation.
#[derive(Debug)]
pub struct RabbitStore {
    records: Vec<Rabbit>,
    free: Vec<RabbitId>,
    dead_count: u64,
    tally: SexTally,
    initial_capacity: usize,
}

impl Default for RabbitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RabbitStore {
    /// Create an empty store with the default initial reservation.
    #[must_use]
    pub fn new() -> Self {
        Self::with_initial_capacity(DEFAULT_INITIAL_CAPACITY)
    }

    /// Create an empty store that will reserve `initial_capacity` records on
    /// first growth and double from there.
    #[must_use]
    pub fn with_initial_capacity(initial_capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            free: Vec::new(),
            dead_count: 0,
            tally: SexTally::default(),
            initial_capacity: initial_capacity.max(1),
        }
    }

    /// Total slots, live and dead.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when no slot has ever been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of living rabbits.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.records.len() - self.free.len()
    }

    /// Cumulative deaths over the run; never decremented.
    #[must_use]
    pub const fn dead_count(&self) -> u64 {
        self.dead_count
    }

    /// Live head-count per sex.
    #[must_use]
    pub const fn tally(&self) -> SexTally {
        self.tally
    }

    /// Borrow the record behind `id`.
    #[must_use]
    pub fn slot(&self, id: RabbitId) -> &Rabbit {
        &self.records[id.index()]
    }

    /// Mutably borrow the record behind `id`.
    #[must_use]
    pub fn slot_mut(&mut self, id: RabbitId) -> &mut Rabbit {
        &mut self.records[id.index()]
    }

    /// Iterate over living rabbits in slot order.
    pub fn live_rabbits(&self) -> impl Iterator<Item = &Rabbit> {
        self.records.iter().filter(|rabbit| rabbit.alive)
    }

    fn ensure_capacity(&mut self) -> Result<(), SimError> {
        if self.records.len() < self.records.capacity() {
            return Ok(());
        }
        let target = if self.records.capacity() == 0 {
            self.initial_capacity
        } else {
            self.records.capacity() * 2
        };
        let additional = target - self.records.len();
        self.records.try_reserve_exact(additional)?;
        self.free.try_reserve_exact(additional)?;
        Ok(())
    }

    /// Place a live rabbit in a recycled slot if one is free, otherwise
    /// append a new record, growing the backing storage as needed.
    pub fn allocate(&mut self, rabbit: Rabbit) -> Result<RabbitId, SimError> {
        debug_assert!(rabbit.alive, "allocating a dead rabbit");
        let sex = rabbit.sex;
        let id = if let Some(id) = self.free.pop() {
            self.records[id.index()] = rabbit;
            id
        } else {
            self.ensure_capacity()?;
            let id = RabbitId(self.records.len() as u32);
            self.records.push(rabbit);
            id
        };
        self.tally.record_birth(sex);
        Ok(id)
    }

    /// Mark the rabbit behind `id` dead and recycle its slot.
    ///
    /// Not idempotent: callers must only pass ids of known-live rabbits, or
    /// the death counter and free stack are corrupted.
    pub fn kill(&mut self, id: RabbitId) {
        let rabbit = &mut self.records[id.index()];
        debug_assert!(rabbit.alive, "kill on an already-dead slot");
        rabbit.alive = false;
        self.tally.record_death(rabbit.sex);
        self.free.push(id);
        self.dead_count += 1;
    }
}

/// Pluggable policy converting a base survival rate into the value used for
/// this month's survival draw.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SurvivalModel {
    /// Use the base rate unchanged.
    #[default]
    Static,
    /// Box-Muller noise around the base rate, sd 5.0, clamped to [0, 100].
    Gaussian,
    /// Exponential tail with `lambda = 10 / base`, clamped to [0, 100].
    Exponential,
}

impl SurvivalModel {
    /// Produce this month's effective survival rate from `base_rate`.
    pub fn sample(self, base_rate: f64, rng: &mut SmallRng) -> f64 {
        match self {
            Self::Static => base_rate,
            Self::Gaussian => {
                // 1 - u keeps the draw in (0, 1] so the logarithm is finite.
                let u1 = 1.0 - rng.random::<f64>();
                let u2 = rng.random::<f64>();
                let normal =
                    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
                (base_rate + GAUSSIAN_SPREAD * normal).clamp(0.0, 100.0)
            }
            Self::Exponential => {
                if base_rate <= 0.0 {
                    return 0.0;
                }
                let u = 1.0 - rng.random::<f64>();
                let lambda = 10.0 / base_rate;
                (100.0 * (1.0 - (-(-u.ln() / lambda)).exp())).clamp(0.0, 100.0)
            }
        }
    }
}

/// Draw an annual litter target from the fixed fertility distribution:
/// P(3)=5%, P(4)=10%, P(5)=25%, P(6)=30%, P(7)=20%, P(8)=7%, P(9)=3%.
pub fn sample_litters_per_year(rng: &mut SmallRng) -> u32 {
    let draw = rng.random::<f64>();
    if draw < 0.05 {
        3
    } else if draw < 0.15 {
        4
    } else if draw < 0.40 {
        5
    } else if draw < 0.70 {
        6
    } else if draw < 0.90 {
        7
    } else if draw < 0.97 {
        8
    } else {
        9
    }
}

/// Months left in the current maturity year, counting the current one.
///
/// A full window of 12 at each anniversary, shrinking to 1 just before the
/// next one.
const fn pregnancy_window(age_months: u32, maturity_age: u32) -> u32 {
    12 - (age_months - maturity_age) % 12
}

/// Errors raised when validating a batch configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Static configuration for one batch of simulation runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
    /// Month horizon per run; zero is a legal degenerate horizon.
    pub months: u32,
    /// Rabbits seeded per run; exactly 2 selects the founder-pair mode.
    pub initial_population: u32,
    /// Number of independent runs.
    pub runs: u32,
    /// Base seed; each run derives its own seed from this and its index.
    pub base_seed: u64,
    /// Survival model applied to every run in the batch.
    pub survival_model: SurvivalModel,
    /// Records reserved per run before the first capacity doubling.
    pub initial_capacity: usize,
    /// Number of leading runs that record per-month snapshots.
    pub snapshot_runs: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            months: 240,
            initial_population: 100_000,
            runs: 100,
            base_seed: 1_234_997_890_123_456_700,
            survival_model: SurvivalModel::Static,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            snapshot_runs: 0,
        }
    }
}

impl BatchConfig {
    /// Reject configurations no run should ever start under.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_population == 0 {
            return Err(ConfigError::Invalid(
                "initial_population must be at least 1",
            ));
        }
        if self.runs == 0 {
            return Err(ConfigError::Invalid("runs must be at least 1"));
        }
        if self.initial_capacity == 0 {
            return Err(ConfigError::Invalid("initial_capacity must be non-zero"));
        }
        if self.snapshot_runs > self.runs {
            return Err(ConfigError::Invalid(
                "snapshot_runs cannot exceed runs",
            ));
        }
        Ok(())
    }
}

/// Derive the per-run RNG seed from the batch seed and run index.
///
/// Splitmix64 finalizer so neighbouring indices land far apart; identical
/// `(base_seed, run_index)` pairs always yield the same stream regardless of
/// which worker executes the run.
#[must_use]
pub fn run_seed(base_seed: u64, run_index: u64) -> u64 {
    let mut z = base_seed ^ run_index.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Population extreme observed during a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PopulationMark {
    pub population: u32,
    pub month: u32,
}

/// Per-month observation of one run, recorded for opted-in runs only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MonthSnapshot {
    pub month: u32,
    pub alive: u32,
    pub males: u32,
    pub females: u32,
    pub mature: u32,
    pub pregnant: u32,
    pub births: u32,
    pub deaths: u32,
    pub average_age: f64,
    pub min_age: u32,
    pub max_age: u32,
}

/// Per-month snapshot sequence for one opted-in run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunTrace {
    pub run_index: u32,
    pub snapshots: Vec<MonthSnapshot>,
}

/// Immutable summary of one completed run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub run_index: u32,
    pub final_alive: u32,
    pub final_dead: u64,
    pub males: u32,
    pub females: u32,
    pub peak: PopulationMark,
    pub trough: PopulationMark,
    /// Month the population hit zero; `None` if it survived to the horizon.
    pub extinction_month: Option<u32>,
    pub months_simulated: u32,
    /// Present only when this run was inside the snapshot quota.
    pub snapshots: Option<Vec<MonthSnapshot>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct MonthDelta {
    births: u32,
    deaths: u32,
}

/// One independent simulation run: a private store, a private RNG, and the
/// monthly tick loop.
#[derive(Debug)]
pub struct SimulationRun {
    months: u32,
    initial_population: u32,
    model: SurvivalModel,
    run_index: u32,
    record_snapshots: bool,
    rng: SmallRng,
    store: RabbitStore,
    snapshots: Vec<MonthSnapshot>,
}

impl SimulationRun {
    /// Build the run for `run_index` under `config`. The store starts empty;
    /// [`execute`](Self::execute) seeds it unless a caller pre-seeded via
    /// [`seed_with`](Self::seed_with).
    #[must_use]
    pub fn new(config: &BatchConfig, run_index: u32) -> Self {
        Self {
            months: config.months,
            initial_population: config.initial_population,
            model: config.survival_model,
            run_index,
            record_snapshots: run_index < config.snapshot_runs,
            rng: SmallRng::seed_from_u64(run_seed(config.base_seed, u64::from(run_index))),
            store: RabbitStore::with_initial_capacity(config.initial_capacity),
            snapshots: Vec::new(),
        }
    }

    /// Borrow the run's store, mainly for inspection in tests and tools.
    #[must_use]
    pub fn store(&self) -> &RabbitStore {
        &self.store
    }

    /// Seed an explicit population instead of the default one.
    pub fn seed_with(
        &mut self,
        rabbits: impl IntoIterator<Item = Rabbit>,
    ) -> Result<(), SimError> {
        for rabbit in rabbits {
            self.store.allocate(rabbit)?;
        }
        Ok(())
    }

    /// Default seeding: a founder pair for a population of exactly 2,
    /// otherwise N random adults aged 10..=19 at the adult base rate.
    fn seed_default(&mut self) -> Result<(), SimError> {
        if self.initial_population == 2 {
            self.store.allocate(Rabbit::founder(Sex::Female))?;
            self.store.allocate(Rabbit::founder(Sex::Male))?;
        } else {
            for _ in 0..self.initial_population {
                let sex = Sex::sample(&mut self.rng);
                let age = self.rng.random_range(10..20);
                self.store.allocate(Rabbit::adult(sex, age))?;
            }
        }
        Ok(())
    }

    /// Update one live rabbit for the current month and return the number of
    /// kits it delivered. The step order is load-bearing; reordering changes
    /// every downstream draw.
    fn update_rabbit(&mut self, id: RabbitId) -> u32 {
        self.store.slot_mut(id).age_months += 1;

        // Survival roll; a set flag counts as automatic survival.
        let survived = {
            let rabbit = self.store.slot(id);
            rabbit.survival_checked
                || self.rng.random::<f64>() * 100.0 <= rabbit.survival_rate
        };
        if !survived {
            self.store.kill(id);
            return 0;
        }
        self.store.slot_mut(id).survival_checked = true;

        // Monthly survival-rate recompute through the active model.
        {
            let rabbit = self.store.slot_mut(id);
            rabbit.survival_checked = false;
            let mut base = if rabbit.mature {
                ADULT_SURVIVAL_RATE
            } else {
                INITIAL_SURVIVAL_RATE
            };
            if rabbit.age_months >= SENESCENCE_AGE {
                let years_past = f64::from((rabbit.age_months - SENESCENCE_AGE) / 12);
                base = (base - SENESCENCE_PENALTY_PER_YEAR * years_past).max(0.0);
            }
            rabbit.survival_rate = self.model.sample(base, &mut self.rng);
        }

        // Maturity ramp: certain by age 8, never rolled before age 5.
        {
            let rabbit = self.store.slot(id);
            if !rabbit.mature && rabbit.age_months >= MATURITY_MIN_AGE {
                let chance = f64::from(rabbit.age_months) / 8.0;
                if self.rng.random::<f64>() <= chance {
                    let rabbit = self.store.slot_mut(id);
                    rabbit.mature = true;
                    rabbit.maturity_age = rabbit.age_months;
                    rabbit.survival_rate = ADULT_SURVIVAL_RATE;
                }
            }
        }

        // Annual litter-target refresh on each anniversary of maturity.
        {
            let rabbit = self.store.slot(id);
            if rabbit.sex == Sex::Female
                && rabbit.mature
                && (rabbit.age_months - rabbit.maturity_age) % 12 == 0
            {
                let target = sample_litters_per_year(&mut self.rng);
                let rabbit = self.store.slot_mut(id);
                rabbit.litters_per_year = target;
                rabbit.litters_this_year = 0;
            }
        }

        // Delivery. Kits are counted here and materialized after the pass.
        let mut births = 0;
        {
            let rabbit = self.store.slot_mut(id);
            if rabbit.pregnant {
                rabbit.pregnant = false;
                rabbit.litters_this_year += 1;
                births = 3 + self.rng.random_range(0..4u32);
            }
        }

        // Conception roll against the remaining annual quota.
        {
            let rabbit = self.store.slot(id);
            if rabbit.sex == Sex::Female
                && rabbit.mature
                && rabbit.litters_this_year < rabbit.litters_per_year
            {
                let window = pregnancy_window(rabbit.age_months, rabbit.maturity_age);
                let chance = f64::from(rabbit.litters_per_year - rabbit.litters_this_year)
                    / f64::from(window);
                if self.rng.random::<f64>() <= chance {
                    self.store.slot_mut(id).pregnant = true;
                }
            }
        }

        births
    }

    /// One full monthly pass: update every occupied slot, then materialize
    /// the month's newborns so the live set is never mutated mid-iteration.
    fn monthly_pass(&mut self) -> Result<MonthDelta, SimError> {
        let deaths_before = self.store.dead_count();
        let mut newborns = 0u32;
        for index in 0..self.store.len() {
            let id = RabbitId(index as u32);
            if !self.store.slot(id).alive {
                continue;
            }
            newborns += self.update_rabbit(id);
        }
        for _ in 0..newborns {
            let sex = Sex::sample(&mut self.rng);
            self.store.allocate(Rabbit::newborn(sex))?;
        }
        Ok(MonthDelta {
            births: newborns,
            deaths: (self.store.dead_count() - deaths_before) as u32,
        })
    }

    fn capture_snapshot(&mut self, month: u32, delta: MonthDelta) {
        let tally = self.store.tally();
        let mut mature = 0u32;
        let mut pregnant = 0u32;
        let mut age_sum = 0u64;
        let mut min_age = u32::MAX;
        let mut max_age = 0u32;
        let mut alive = 0u32;
        for rabbit in self.store.live_rabbits() {
            alive += 1;
            mature += u32::from(rabbit.mature);
            pregnant += u32::from(rabbit.pregnant);
            age_sum += u64::from(rabbit.age_months);
            min_age = min_age.min(rabbit.age_months);
            max_age = max_age.max(rabbit.age_months);
        }
        let average_age = if alive > 0 {
            age_sum as f64 / f64::from(alive)
        } else {
            0.0
        };
        self.snapshots.push(MonthSnapshot {
            month,
            alive,
            males: tally.males,
            females: tally.females,
            mature,
            pregnant,
            births: delta.births,
            deaths: delta.deaths,
            average_age,
            min_age: if alive > 0 { min_age } else { 0 },
            max_age,
        });
    }

    /// Run to extinction or the month horizon and produce the summary.
    pub fn execute(mut self) -> Result<RunResult, SimError> {
        if self.store.is_empty() {
            self.seed_default()?;
        }
        let initial_alive = self.store.live_count() as u32;
        let mut peak = PopulationMark {
            population: initial_alive,
            month: 0,
        };
        // Reported as-is unless a later month genuinely went lower.
        let mut trough = PopulationMark {
            population: initial_alive,
            month: 0,
        };
        let mut extinction_month = None;
        let mut months_simulated = 0;

        if self.record_snapshots {
            self.capture_snapshot(0, MonthDelta::default());
        }

        for month in 0..self.months {
            let live = self.store.live_count() as u32;
            if live > peak.population {
                peak = PopulationMark {
                    population: live,
                    month,
                };
            }
            if month > 0 && live < trough.population {
                trough = PopulationMark {
                    population: live,
                    month,
                };
            }
            if live == 0 {
                extinction_month = Some(month);
                break;
            }
            let delta = self.monthly_pass()?;
            months_simulated = month + 1;
            if self.record_snapshots {
                self.capture_snapshot(month + 1, delta);
            }
        }

        // Horizon exhausted: the state after the final pass still counts.
        if extinction_month.is_none() && self.months > 0 {
            let live = self.store.live_count() as u32;
            if live > peak.population {
                peak = PopulationMark {
                    population: live,
                    month: self.months,
                };
            }
            if live < trough.population {
                trough = PopulationMark {
                    population: live,
                    month: self.months,
                };
            }
            if live == 0 {
                extinction_month = Some(self.months);
            }
        }

        let tally = self.store.tally();
        Ok(RunResult {
            run_index: self.run_index,
            final_alive: self.store.live_count() as u32,
            final_dead: self.store.dead_count(),
            males: tally.males,
            females: tally.females,
            peak,
            trough,
            extinction_month,
            months_simulated,
            snapshots: if self.record_snapshots {
                Some(self.snapshots)
            } else {
                None
            },
        })
    }
}

/// Running sum / sum-of-squares / extrema for one tracked metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricAccumulator {
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
    samples: u64,
}

impl Default for MetricAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricAccumulator {
    /// Empty accumulator: zero sums, min at +inf, max at -inf.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            samples: 0,
        }
    }

    /// Fold one sample.
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.sum_sq += value * value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        self.samples += 1;
    }

    /// Combine with an accumulator fed a disjoint sample set. Exact: sums
    /// add, extrema take the pairwise extremum, counters add.
    pub fn merge(&mut self, other: &Self) {
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
        self.samples += other.samples;
    }

    /// Number of samples folded so far.
    #[must_use]
    pub const fn samples(&self) -> u64 {
        self.samples
    }

    /// Derive the summary statistics. All zero when no sample was folded.
    #[must_use]
    pub fn summary(&self) -> MetricSummary {
        if self.samples == 0 {
            return MetricSummary::default();
        }
        let n = self.samples as f64;
        let mean = self.sum / n;
        // Clamp against floating-point underflow around zero variance.
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        let std_dev = variance.sqrt();
        let half_width = CI_95_Z * std_dev / n.sqrt();
        MetricSummary {
            mean,
            std_dev,
            min: self.min,
            max: self.max,
            ci_low: mean - half_width,
            ci_high: mean + half_width,
        }
    }
}

/// Derived statistics for one tracked metric.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

/// Mergeable accumulator over run results, one metric accumulator per
/// tracked quantity plus extinction/failure/run counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchAccumulator {
    final_alive: MetricAccumulator,
    final_dead: MetricAccumulator,
    peak_population: MetricAccumulator,
    peak_month: MetricAccumulator,
    trough_population: MetricAccumulator,
    trough_month: MetricAccumulator,
    extinction_month: MetricAccumulator,
    extinctions: u64,
    failures: u64,
    runs: u64,
}

impl BatchAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one completed run.
    pub fn add(&mut self, result: &RunResult) {
        self.final_alive.add(f64::from(result.final_alive));
        self.final_dead.add(result.final_dead as f64);
        self.peak_population.add(f64::from(result.peak.population));
        self.peak_month.add(f64::from(result.peak.month));
        self.trough_population
            .add(f64::from(result.trough.population));
        self.trough_month.add(f64::from(result.trough.month));
        if let Some(month) = result.extinction_month {
            self.extinction_month.add(f64::from(month));
            self.extinctions += 1;
        }
        self.runs += 1;
    }

    /// Record a run that aborted with an error. Failures never feed the
    /// metric accumulators and are not extinctions.
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Combine with an accumulator fed a disjoint set of runs.
    pub fn merge(&mut self, other: &Self) {
        self.final_alive.merge(&other.final_alive);
        self.final_dead.merge(&other.final_dead);
        self.peak_population.merge(&other.peak_population);
        self.peak_month.merge(&other.peak_month);
        self.trough_population.merge(&other.trough_population);
        self.trough_month.merge(&other.trough_month);
        self.extinction_month.merge(&other.extinction_month);
        self.extinctions += other.extinctions;
        self.failures += other.failures;
        self.runs += other.runs;
    }

    /// Completed runs folded so far.
    #[must_use]
    pub const fn runs(&self) -> u64 {
        self.runs
    }

    /// Derive the batch report.
    #[must_use]
    pub fn report(&self, config: &BatchConfig, traces: Vec<RunTrace>) -> BatchReport {
        let extinction_rate = if self.runs > 0 {
            100.0 * self.extinctions as f64 / self.runs as f64
        } else {
            0.0
        };
        BatchReport {
            config: config.clone(),
            runs: self.runs,
            failures: self.failures,
            extinctions: self.extinctions,
            extinction_rate,
            final_alive: self.final_alive.summary(),
            final_dead: self.final_dead.summary(),
            peak_population: self.peak_population.summary(),
            peak_month: self.peak_month.summary(),
            trough_population: self.trough_population.summary(),
            trough_month: self.trough_month.summary(),
            extinction_month: self.extinction_month.summary(),
            traces,
        }
    }
}

/// Batch-level statistics over all completed runs, plus the opt-in
/// per-month snapshot traces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
    pub config: BatchConfig,
    /// Runs that completed (extinct or not).
    pub runs: u64,
    /// Runs aborted by an error; disjoint from `runs`.
    pub failures: u64,
    pub extinctions: u64,
    /// Percent of completed runs that went extinct.
    pub extinction_rate: f64,
    pub final_alive: MetricSummary,
    pub final_dead: MetricSummary,
    pub peak_population: MetricSummary,
    pub peak_month: MetricSummary,
    pub trough_population: MetricSummary,
    pub trough_month: MetricSummary,
    pub extinction_month: MetricSummary,
    pub traces: Vec<RunTrace>,
}

/// Execute every run of the batch across the rayon pool and aggregate.
///
/// Each run owns a fresh store and an RNG seeded from
/// `(base_seed, run_index)`, so per-run results are reproducible no matter
/// how the pool schedules them. Workers fold into private accumulators
/// which are then reduced with [`BatchAccumulator::merge`].
pub fn run_batch(config: &BatchConfig) -> Result<BatchReport, ConfigError> {
    config.validate()?;
    info!(
        runs = config.runs,
        months = config.months,
        initial_population = config.initial_population,
        model = ?config.survival_model,
        "starting simulation batch"
    );

    let (accumulator, mut traces) = (0..config.runs)
        .into_par_iter()
        .map(|run_index| SimulationRun::new(config, run_index).execute())
        .fold(
            || (BatchAccumulator::new(), Vec::new()),
            |(mut accumulator, mut traces), outcome| {
                match outcome {
                    Ok(mut result) => {
                        if let Some(snapshots) = result.snapshots.take() {
                            traces.push(RunTrace {
                                run_index: result.run_index,
                                snapshots,
                            });
                        }
                        accumulator.add(&result);
                    }
                    Err(error) => {
                        warn!(%error, "simulation run aborted");
                        accumulator.record_failure();
                    }
                }
                (accumulator, traces)
            },
        )
        .reduce(
            || (BatchAccumulator::new(), Vec::new()),
            |(mut left, mut left_traces), (right, right_traces)| {
                left.merge(&right);
                left_traces.extend(right_traces);
                (left, left_traces)
            },
        );

    traces.sort_by_key(|trace| trace.run_index);
    info!(
        completed = accumulator.runs(),
        failures = accumulator.failures,
        "simulation batch finished"
    );
    Ok(accumulator.report(config, traces))
}
