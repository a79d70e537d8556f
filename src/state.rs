//! The storage-state engine: per-timeslot protocol and migration.

use std::fmt;

use tracing::{debug, error, warn};

use crate::config::EngineConfig;
use crate::demand::DemandElement;
use crate::element::StorageElement;
use crate::ring::RingHorizon;
use crate::subscription::Subscription;
use crate::PHYS_TOLERANCE;

/// Consumption bounds for one timeslot, in kWh.
///
/// Consuming less than `min_kwh` breaks charging commitments; consuming more
/// than `max_kwh` is physically impossible for the connected population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandBounds {
    /// Least energy that must be consumed this hour.
    pub min_kwh: f64,
    /// Most energy the connected chargers can absorb this hour.
    pub max_kwh: f64,
    /// Midpoint of min and max, the default trading target.
    pub nominal_kwh: f64,
}

impl fmt::Display for DemandBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min={:.3} kWh  nominal={:.3} kWh  max={:.3} kWh",
            self.min_kwh, self.nominal_kwh, self.max_kwh
        )
    }
}

/// Forward-looking storage state of the charger population subscribed to one
/// tariff.
///
/// Owns a ring of [`StorageElement`] cells covering the commitment horizon
/// and holds a read-only handle onto its subscription. The per-timeslot
/// entry points must be called in the canonical order for each timeslot `t`:
///
/// 1. [`distribute_regulation`](Self::distribute_regulation)
/// 2. [`collapse_elements`](Self::collapse_elements)
/// 3. [`rebalance`](Self::rebalance)
/// 4. [`distribute_demand`](Self::distribute_demand)
/// 5. [`min_max`](Self::min_max), then
///    [`distribute_usage`](Self::distribute_usage)
///
/// [`move_subscribers`](Self::move_subscribers) runs between timeslots,
/// before any phase of the new timeslot, and before subscription counts are
/// updated on either side.
///
/// The engine is single-threaded and not reentrant; one instance belongs to
/// exactly one subscription.
#[derive(Debug, Clone)]
pub struct StorageState<S: Subscription> {
    subscription: S,
    unit_capacity: f64,
    max_horizon: usize,
    horizon: RingHorizon<StorageElement>,
}

impl<S: Subscription> StorageState<S> {
    /// Creates an engine bound to `subscription`.
    ///
    /// # Arguments
    ///
    /// * `subscription` - Handle onto the tariff subscription this state
    ///   describes
    /// * `unit_capacity` - Rated per-charger power in kW (must be > 0)
    /// * `max_horizon` - Ring capacity in timeslots, the hard lookahead
    ///   limit (must be > 1)
    ///
    /// # Panics
    ///
    /// Panics if `unit_capacity` or `max_horizon` is out of range.
    pub fn new(subscription: S, unit_capacity: f64, max_horizon: usize) -> Self {
        assert!(unit_capacity > 0.0, "unit_capacity must be > 0");
        assert!(max_horizon > 1, "max_horizon must be > 1");
        Self {
            subscription,
            unit_capacity,
            max_horizon,
            horizon: RingHorizon::with_capacity(max_horizon),
        }
    }

    /// Creates an engine from a validated [`EngineConfig`].
    pub fn from_config(subscription: S, config: &EngineConfig) -> Self {
        Self::new(subscription, config.unit_capacity_kw, config.max_horizon)
    }

    /// The subscription handle this engine is bound to.
    pub fn subscription(&self) -> &S {
        &self.subscription
    }

    /// Committed customer count of the bound subscription.
    pub fn population(&self) -> f64 {
        f64::from(self.subscription.customers_committed())
    }

    /// Rated per-charger power in kW.
    pub fn unit_capacity(&self) -> f64 {
        self.unit_capacity
    }

    /// Replaces the unit capacity, rejecting non-positive values.
    pub fn with_unit_capacity(mut self, capacity: f64) -> Self {
        if capacity <= 0.0 {
            error!(capacity, "invalid unit capacity, keeping previous value");
        } else {
            self.unit_capacity = capacity;
        }
        self
    }

    /// Hard limit on the commitment lookahead, in timeslots.
    pub fn max_horizon(&self) -> usize {
        self.max_horizon
    }

    /// Number of future timeslots with active charging commitments,
    /// starting at `timeslot`.
    pub fn horizon_len(&self, timeslot: usize) -> usize {
        self.horizon.active_length(timeslot)
    }

    /// The commitment cell at `timeslot`, if any.
    pub fn element(&self, timeslot: usize) -> Option<&StorageElement> {
        self.horizon.get(timeslot)
    }

    pub(crate) fn ring(&self) -> &RingHorizon<StorageElement> {
        &self.horizon
    }

    pub(crate) fn ring_mut(&mut self) -> &mut RingHorizon<StorageElement> {
        &mut self.horizon
    }

    /// Distributes exercised regulation from the previous hour over the
    /// horizon starting at `timeslot`.
    ///
    /// Positive `regulation_kwh` is up-regulation: we consumed that much
    /// less than planned and the energy must be re-added to future
    /// commitments. Negative is down-regulation and is subtracted. Bucket 0
    /// of every cell is must-run and never regulated.
    ///
    /// Must run before [`distribute_demand`](Self::distribute_demand):
    /// regulation applies to the population that was present when the prior
    /// capacity was reported.
    pub fn distribute_regulation(&mut self, timeslot: usize, regulation_kwh: f64) {
        if regulation_kwh == 0.0 {
            return;
        }
        let length = self.horizon.active_length(timeslot);
        let flexible = self.flexible_demand(timeslot, timeslot + length);
        if flexible <= PHYS_TOLERANCE {
            error!(
                regulation_kwh,
                "regulation signalled but no regulable flexibility remains"
            );
            return;
        }
        // Positive ratio shrinks commitments (down-reg), negative grows them.
        let mut ratio = -regulation_kwh / flexible;
        if ratio.abs() > 1.0 {
            warn!(
                regulation_kwh,
                flexible_kwh = flexible,
                "regulation exceeds flexibility, clipping"
            );
            ratio = ratio.signum();
        }
        let unit = self.unit_capacity;
        for ts in timeslot..timeslot + length {
            let Some(cell) = self.horizon.get_mut(ts) else {
                continue;
            };
            for i in 1..cell.len() {
                let hr_energy = (cell.population()[i] * unit).min(cell.energy()[i]);
                cell.energy_mut()[i] -= hr_energy * ratio;
            }
        }
    }

    /// Closes out a timeslot by shrinking every cell's histograms by one
    /// bucket.
    ///
    /// The trailing bucket needs at most one more charger-hour, so any
    /// residual energy (and its population) is folded into the next-higher
    /// bucket first. A residual below −10⁻³ kWh is an invariant violation:
    /// logged and zeroed. One-bucket cells are left unchanged.
    pub fn collapse_elements(&mut self, timeslot: usize) {
        let length = self.horizon.active_length(timeslot);
        for ts in timeslot..timeslot + length {
            let Some(cell) = self.horizon.get_mut(ts) else {
                continue;
            };
            let len = cell.len();
            if len < 2 {
                continue;
            }
            let last = len - 1;
            let residual = cell.energy()[last];
            if residual < -PHYS_TOLERANCE {
                error!(
                    timeslot = ts,
                    residual_kwh = residual,
                    "negative commitment in trailing cohort"
                );
                cell.energy_mut()[last] = 0.0;
                cell.population_mut()[last] = 0.0;
            } else if residual > 0.0 {
                cell.energy_mut()[last - 1] += residual;
                let moved_population = cell.population()[last];
                cell.population_mut()[last - 1] += moved_population;
            }
            cell.collapse();
        }
    }

    /// Shifts population toward higher-need cohorts after an hour in which
    /// less than the full flexible demand was satisfied.
    ///
    /// Each bucket `i` of a cell with `k` buckets should hold
    /// `(k − i − 0.5) · unit_capacity` kWh per vehicle. Buckets whose
    /// per-vehicle surplus ratio exceeds 0.5 hand the excess fraction of
    /// their population up one bucket, and both energies are recomputed
    /// from the band invariant. Ratios above 1.5 indicate corruption and
    /// are clipped. Runs after regulation and collapse, before demand and
    /// usage.
    pub fn rebalance(&mut self, timeslot: usize) {
        let unit = self.unit_capacity;
        let length = self.horizon.active_length(timeslot);
        // The current timeslot's single cohort is already fully committed.
        for ts in timeslot + 1..timeslot + length {
            let Some(cell) = self.horizon.get_mut(ts) else {
                continue;
            };
            let len = cell.len();
            for i in 1..len {
                let chunk = unit * cell.population()[i];
                if chunk <= f64::EPSILON {
                    continue;
                }
                let full_hours = chunk * (len - i - 1) as f64;
                let mut ratio = (cell.energy()[i] - full_hours) / chunk;
                if ratio <= 0.5 {
                    continue;
                }
                if ratio > 1.5 {
                    error!(timeslot = ts, bucket = i, ratio, "cohort energy outside its band");
                    ratio = 1.0;
                }
                let moved = cell.population()[i] * (ratio - 0.5);
                cell.population_mut()[i - 1] += moved;
                cell.energy_mut()[i - 1] =
                    cell.population()[i - 1] * unit * (0.5 + (len - i) as f64);
                cell.population_mut()[i] -= moved;
                cell.energy_mut()[i] =
                    cell.population()[i] * unit * (0.5 + (len - i - 1) as f64);
            }
        }
    }

    /// Distributes newly arriving demand over the horizon.
    ///
    /// `new_demand` must be sorted by ascending horizon; `ratio` is the
    /// fraction of the total customer population subscribed to this tariff.
    /// Every arriving vehicle starts charging now, so each timeslot up to a
    /// cohort's departure is credited with the cohort's activations; the
    /// cohort's population and energy are injected into its departure cell,
    /// bucketed by the demand distribution, with bucket energies set from
    /// the band invariant `unit · pop · (k − ix − 0.5)`.
    ///
    /// # Panics
    ///
    /// Panics if a demand horizon reaches past the ring capacity (a
    /// programming error in the demand source).
    pub fn distribute_demand(&mut self, timeslot: usize, new_demand: &[DemandElement], ratio: f64) {
        if new_demand.is_empty() {
            return;
        }
        // Drop stale wrap-around cells before the horizon may extend.
        self.horizon.clean(timeslot);

        let mut activations: f64 = new_demand.iter().map(|de| de.n_vehicles() * ratio).sum();
        let farthest = new_demand
            .iter()
            .map(DemandElement::horizon)
            .max()
            .unwrap_or(0);
        assert!(
            farthest < self.max_horizon,
            "demand horizon {farthest} exceeds ring capacity {}",
            self.max_horizon
        );
        let max_ts = timeslot + farthest;

        let unit = self.unit_capacity;
        let mut pending = new_demand.iter();
        let mut next = pending.next();
        for ts in timeslot..=max_ts {
            let Some(de) = next else {
                break;
            };
            let len = ts - timeslot + 1;
            let cell = self
                .horizon
                .get_or_insert_with(ts, || StorageElement::new(len));
            // Departing vehicles still occupy their chargers in the
            // departure hour, so credit activations before decrementing.
            cell.add_chargers(activations);
            if ts == timeslot + de.horizon() {
                activations -= de.n_vehicles() * ratio;
                let n = len.min(de.distribution().len());
                let mut population = vec![0.0; n];
                let mut energy = vec![0.0; n];
                for (ix, share) in de.distribution()[..n].iter().enumerate() {
                    population[ix] = de.n_vehicles() * share * ratio;
                    energy[ix] = unit * population[ix] * (len as f64 - ix as f64 - 0.5);
                }
                cell.add_commitments(&population, &energy);
                next = pending.next();
            }
        }

        for (ts, cell) in self.horizon.iter_active(timeslot).take(6) {
            debug!(timeslot = ts, cell = %cell, "state after demand");
        }
    }

    /// Computes the consumption bounds for `timeslot`.
    ///
    /// The minimum covers the cohort departing this hour plus a full
    /// charger-hour for every future must-run cohort; the maximum adds one
    /// charger-hour (capped by remaining need) for every flexible cohort.
    pub fn min_max(&self, timeslot: usize) -> DemandBounds {
        let unit = self.unit_capacity;
        let mut min_kwh = 0.0;
        if let Some(cell) = self.horizon.get(timeslot) {
            min_kwh += cell.energy()[0];
        }
        let mut flexible = 0.0;
        let length = self.horizon.active_length(timeslot);
        for ts in timeslot + 1..timeslot + length {
            let Some(cell) = self.horizon.get(ts) else {
                continue;
            };
            min_kwh += (cell.population()[0] * unit).min(cell.energy()[0]);
            for i in 1..cell.len() {
                flexible += (cell.population()[i] * unit).min(cell.energy()[i]);
            }
        }
        let max_kwh = min_kwh + flexible;
        DemandBounds {
            min_kwh,
            max_kwh,
            nominal_kwh: min_kwh + (max_kwh - min_kwh) / 2.0,
        }
    }

    /// Distributes the energy actually delivered this hour across the
    /// connected population.
    ///
    /// The cohort departing this hour is satisfied first, then every future
    /// must-run cohort draws a full charger-hour, and the remainder is
    /// spread over the flexible cohorts in proportion to what each can
    /// absorb. `capacity_kwh` is the amount for this subscription, within
    /// the bounds last reported by [`min_max`](Self::min_max).
    pub fn distribute_usage(&mut self, timeslot: usize, capacity_kwh: f64) {
        let unit = self.unit_capacity;
        let mut remaining = capacity_kwh;

        // Finish off the departing cohort.
        match self.horizon.get_mut(timeslot) {
            Some(cell) => {
                if cell.len() > 1 {
                    error!(timeslot, cell = %cell, "multiple cohorts in current timeslot");
                    for i in 0..cell.len() {
                        remaining -= cell.energy()[i];
                        cell.energy_mut()[i] = 0.0;
                    }
                } else {
                    remaining -= cell.energy()[0];
                    cell.energy_mut()[0] = 0.0;
                }
            }
            None => {
                error!(timeslot, "no commitment cell in current timeslot");
            }
        }

        // Must-run cohorts in future timeslots draw full power this hour.
        let length = self.horizon.active_length(timeslot);
        for ts in timeslot + 1..timeslot + length {
            let Some(cell) = self.horizon.get_mut(ts) else {
                continue;
            };
            let usage = unit * cell.population()[0];
            cell.energy_mut()[0] -= usage;
            remaining -= usage;
        }

        // Spread what is left across the flexible cohorts.
        let flexible = self.flexible_demand(timeslot + 1, timeslot + length);
        if flexible <= PHYS_TOLERANCE {
            if remaining.abs() > PHYS_TOLERANCE {
                warn!(
                    remaining_kwh = remaining,
                    "capacity left over with no flexible demand to absorb it"
                );
            }
            return;
        }
        // A ratio below 1.0 means we under-spent; the next timeslot's
        // rebalance redistributes the slack.
        let capacity_ratio = remaining / flexible;
        for ts in timeslot + 1..timeslot + length {
            let Some(cell) = self.horizon.get_mut(ts) else {
                continue;
            };
            for i in 1..cell.len() {
                let hr_energy = (cell.population()[i] * unit).min(cell.energy()[i]);
                cell.energy_mut()[i] -= hr_energy * capacity_ratio;
            }
        }
    }

    /// Transfers `count` subscribers out of `old` into this engine.
    ///
    /// Called on the destination before subscription counts are updated on
    /// either side. A previously empty destination receives a scaled copy
    /// of the source horizon; a populated one accumulates scaled copies
    /// into its existing cells. The source is then scaled down by the
    /// departing fraction, conserving population and energy bucket by
    /// bucket.
    pub fn move_subscribers<S2: Subscription>(
        &mut self,
        timeslot: usize,
        count: u32,
        old: &mut StorageState<S2>,
    ) {
        let source_population = old.population();
        if source_population <= 0.0 {
            error!(count, "migration from a subscription with no population");
            return;
        }
        let fraction = f64::from(count) / source_population;
        if !(0.0..=1.0).contains(&fraction) {
            error!(fraction, "migration fraction outside [0, 1]");
            return;
        }

        if self.population() == 0.0 {
            self.horizon.clear();
            for (ts, cell) in old.horizon.iter_active(timeslot) {
                self.horizon.set(ts, cell.copy_scaled(fraction));
            }
        } else if count > 0 {
            for (ts, cell) in old.horizon.iter_active(timeslot) {
                match self.horizon.get_mut(ts) {
                    Some(destination) => destination.add_scaled(cell, fraction),
                    None => self.horizon.set(ts, cell.copy_scaled(fraction)),
                }
            }
        }

        for (_, cell) in old.horizon.iter_active_mut(timeslot) {
            cell.scale(1.0 - fraction);
        }
    }

    /// Total energy the flexible (non-must-run) cohorts can absorb in one
    /// hour, over cells in `[from, to)`.
    fn flexible_demand(&self, from: usize, to: usize) -> f64 {
        let unit = self.unit_capacity;
        let mut total = 0.0;
        for ts in from..to {
            let Some(cell) = self.horizon.get(ts) else {
                continue;
            };
            for i in 1..cell.len() {
                total += (cell.population()[i] * unit).min(cell.energy()[i]);
            }
        }
        total
    }
}
