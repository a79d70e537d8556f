//! Immutable demand carriers handed to the engine by the demand source.

use std::fmt;

/// Energy requirement of a cohort of vehicles that all unplug at the same
/// future timeslot.
///
/// If `t` is the current timeslot, the cohort departs at `t + horizon`, so
/// `horizon` is the number of timeslots available for charging. The
/// distribution is a histogram over sub-cohorts by remaining charger-hours:
/// entry 0 is the fraction needing roughly `horizon` charger-hours (the
/// must-run end), the last entry is the fraction that is essentially
/// satisfied already. Entries are trusted to sum to 1.0 and `horizon` is
/// trusted to respect the engine's ring capacity; neither is re-checked.
#[derive(Debug, Clone, PartialEq)]
pub struct DemandElement {
    horizon: usize,
    n_vehicles: f64,
    energy_kwh: f64,
    distribution: Vec<f64>,
}

impl DemandElement {
    /// Creates a demand element.
    ///
    /// # Arguments
    ///
    /// * `horizon` - Timeslots until the cohort departs
    /// * `n_vehicles` - Expected vehicle count (a weighted expectation, not
    ///   an integer)
    /// * `energy_kwh` - Total energy the cohort must receive by departure
    /// * `distribution` - Histogram over sub-cohorts by remaining
    ///   charger-hours, summing to 1.0
    pub fn new(horizon: usize, n_vehicles: f64, energy_kwh: f64, distribution: Vec<f64>) -> Self {
        Self {
            horizon,
            n_vehicles,
            energy_kwh,
            distribution,
        }
    }

    /// Timeslots until the cohort departs.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Expected number of vehicles in the cohort.
    pub fn n_vehicles(&self) -> f64 {
        self.n_vehicles
    }

    /// Total energy owed to the cohort by departure.
    pub fn energy_kwh(&self) -> f64 {
        self.energy_kwh
    }

    /// Sub-cohort histogram by remaining charger-hours.
    pub fn distribution(&self) -> &[f64] {
        &self.distribution
    }
}

impl fmt::Display for DemandElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(h{},n{:.3},e{:.3} {:?})",
            self.horizon, self.n_vehicles, self.energy_kwh, self.distribution
        )
    }
}
