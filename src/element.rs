//! Mutable per-timeslot cell of the forward commitment horizon.

use std::fmt;

use tracing::error;

/// State of the charger population during one future timeslot.
///
/// `active_chargers` counts every charger occupied during the hour.
/// `population` and `energy` are equal-length histograms over the
/// sub-population of vehicles that will *depart* at this cell's timeslot,
/// bucketed by remaining charger-hours: bucket 0 is the highest-need
/// ("must-run") cohort, the last bucket the lowest. `energy[i]` is the
/// undelivered energy still owed to `population[i]`.
///
/// All values are population-level expectations; per-vehicle values, where
/// needed, are ratios of these.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageElement {
    active_chargers: f64,
    population: Vec<f64>,
    energy: Vec<f64>,
}

impl StorageElement {
    /// Creates an empty cell with `len` zeroed buckets.
    pub fn new(len: usize) -> Self {
        Self {
            active_chargers: 0.0,
            population: vec![0.0; len],
            energy: vec![0.0; len],
        }
    }

    /// Creates a populated cell.
    ///
    /// # Panics
    ///
    /// Panics if the histogram lengths differ.
    pub fn from_parts(active_chargers: f64, population: Vec<f64>, energy: Vec<f64>) -> Self {
        assert_eq!(
            population.len(),
            energy.len(),
            "population and energy histograms must have equal length"
        );
        Self {
            active_chargers,
            population,
            energy,
        }
    }

    /// Number of buckets in the histograms.
    pub fn len(&self) -> usize {
        self.population.len()
    }

    /// True if the cell has no buckets.
    pub fn is_empty(&self) -> bool {
        self.population.is_empty()
    }

    /// Chargers occupied during this cell's timeslot.
    pub fn active_chargers(&self) -> f64 {
        self.active_chargers
    }

    /// Departure-cohort histogram by remaining charger-hours.
    pub fn population(&self) -> &[f64] {
        &self.population
    }

    /// Undelivered energy per bucket, in kWh.
    pub fn energy(&self) -> &[f64] {
        &self.energy
    }

    pub(crate) fn population_mut(&mut self) -> &mut [f64] {
        &mut self.population
    }

    pub(crate) fn energy_mut(&mut self) -> &mut [f64] {
        &mut self.energy
    }

    /// Sum of the population histogram.
    pub fn total_population(&self) -> f64 {
        self.population.iter().sum()
    }

    /// Sum of the energy histogram, in kWh.
    pub fn total_energy(&self) -> f64 {
        self.energy.iter().sum()
    }

    /// Adds `n` chargers to the activation count.
    pub fn add_chargers(&mut self, n: f64) {
        self.active_chargers += n;
    }

    /// Adds new commitments element-wise. The incoming arrays may be shorter
    /// than the cell's; missing entries count as zero. Longer input is an
    /// invariant violation: logged, then added over the overlapping prefix.
    pub fn add_commitments(&mut self, population: &[f64], energy: &[f64]) {
        if population.len() > self.population.len() {
            error!(
                incoming = population.len(),
                cell = self.population.len(),
                "commitment histogram longer than cell, truncating"
            );
        }
        let n = population.len().min(self.population.len());
        for i in 0..n {
            self.population[i] += population[i];
            self.energy[i] += energy[i];
        }
    }

    /// Drops the trailing bucket, shrinking both histograms by one. The
    /// caller folds any residual into the previous bucket first. A cell
    /// with fewer than two buckets is left unchanged.
    pub fn collapse(&mut self) {
        if self.population.len() < 2 {
            return;
        }
        self.population.pop();
        self.energy.pop();
    }

    /// Returns an independent copy with every value multiplied by `scale`.
    pub fn copy_scaled(&self, scale: f64) -> Self {
        Self {
            active_chargers: self.active_chargers * scale,
            population: self.population.iter().map(|p| p * scale).collect(),
            energy: self.energy.iter().map(|e| e * scale).collect(),
        }
    }

    /// Adds `scale` times another cell to this one, element-wise. A length
    /// mismatch is an invariant violation: logged, then added over the
    /// overlapping prefix.
    pub fn add_scaled(&mut self, other: &StorageElement, scale: f64) {
        if other.population.len() != self.population.len() {
            error!(
                source = other.population.len(),
                destination = self.population.len(),
                "adding cell of mismatched length"
            );
        }
        self.active_chargers += other.active_chargers * scale;
        let n = other.population.len().min(self.population.len());
        for i in 0..n {
            self.population[i] += other.population[i] * scale;
            self.energy[i] += other.energy[i] * scale;
        }
    }

    /// Multiplies every value in place. Preserves the population/energy
    /// relationship.
    pub fn scale(&mut self, fraction: f64) {
        self.active_chargers *= fraction;
        for p in &mut self.population {
            *p *= fraction;
        }
        for e in &mut self.energy {
            *e *= fraction;
        }
    }
}

impl fmt::Display for StorageElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch{:.3} {:?} {:?}",
            self.active_chargers, self.population, self.energy
        )
    }
}
