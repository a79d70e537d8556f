//! End-to-end scenarios for the storage-state engine: the per-timeslot
//! protocol, migration conservation, and boot-record round trips.

use assert_approx_eq::assert_approx_eq;
use evflex::{DemandElement, StaticSubscription, StorageElement, StorageState, EQ_TOLERANCE};

fn engine(committed: u32, unit_capacity: f64) -> StorageState<StaticSubscription> {
    StorageState::new(StaticSubscription::new(committed), unit_capacity, 48)
}

/// Sum of all committed energy over the active horizon starting at `from`.
fn total_energy(ss: &StorageState<StaticSubscription>, from: usize) -> f64 {
    (from..from + ss.horizon_len(from))
        .filter_map(|ts| ss.element(ts))
        .map(StorageElement::total_energy)
        .sum()
}

/// Sum of all departure-cohort populations starting at `from`.
fn total_population(ss: &StorageState<StaticSubscription>, from: usize) -> f64 {
    (from..from + ss.horizon_len(from))
        .filter_map(|ts| ss.element(ts))
        .map(StorageElement::total_population)
        .sum()
}

/// A mixed five-hour demand pattern used by the usage and codec scenarios.
fn mixed_demand() -> Vec<DemandElement> {
    vec![
        DemandElement::new(0, 5.0, 0.0, vec![1.0]),
        DemandElement::new(2, 10.0, 120.0, vec![0.2, 0.5, 0.3]),
        DemandElement::new(4, 5.0, 90.0, vec![0.5, 0.25, 0.25, 0.0, 0.0]),
    ]
}

#[test]
fn activation_counts_match_future_departures() {
    let mut ss = engine(800, 6.0);
    ss.distribute_demand(30, &mixed_demand(), 0.8);

    for ts in 30..30 + ss.horizon_len(30) {
        let still_departing: f64 = (ts..30 + ss.horizon_len(30))
            .filter_map(|s| ss.element(s))
            .map(StorageElement::total_population)
            .sum();
        let cell = ss.element(ts).expect("active cell");
        assert_approx_eq!(cell.active_chargers(), still_departing, 1e-9);
    }
}

// Up-regulation is absorbed by flexible cohorts only; every must-run
// bucket keeps its committed energy.
#[test]
fn up_regulation_lands_on_flexible_cohorts() {
    let mut ss = engine(1000, 6.0);
    let demand = vec![
        DemandElement::new(0, 2.0, 0.0, vec![1.0]),
        DemandElement::new(1, 3.0, 0.0, vec![1.0, 0.0]),
        DemandElement::new(2, 4.0, 0.0, vec![0.6, 0.0, 0.4]),
    ];
    ss.distribute_demand(43, &demand, 1.0);

    let before = total_energy(&ss, 43);
    ss.distribute_regulation(43, 3.0);

    assert_approx_eq!(ss.element(43).expect("cell 43").energy()[0], 6.0, EQ_TOLERANCE);
    assert_approx_eq!(ss.element(44).expect("cell 44").energy()[0], 27.0, EQ_TOLERANCE);
    let far = ss.element(45).expect("cell 45");
    assert_approx_eq!(far.energy()[0], 36.0, EQ_TOLERANCE);
    // the single flexible cohort absorbs all 3 kWh
    assert_approx_eq!(far.energy()[2], 4.8 + 3.0, EQ_TOLERANCE);
    assert_approx_eq!(total_energy(&ss, 43) - before, 3.0, 1e-9);
}

#[test]
fn usage_drains_exactly_the_delivered_energy() {
    let mut ss = engine(800, 6.0);
    ss.distribute_demand(30, &mixed_demand(), 0.8);

    let bounds = ss.min_max(30);
    assert_approx_eq!(bounds.min_kwh, 33.6, EQ_TOLERANCE);
    assert_approx_eq!(bounds.max_kwh, 76.8, EQ_TOLERANCE);
    assert!(bounds.min_kwh <= bounds.nominal_kwh && bounds.nominal_kwh <= bounds.max_kwh);

    let must_run_before: Vec<(usize, f64, f64)> = (31..30 + ss.horizon_len(30))
        .filter_map(|ts| ss.element(ts).map(|c| (ts, c.population()[0], c.energy()[0])))
        .collect();
    let before = total_energy(&ss, 30);

    ss.distribute_usage(30, bounds.nominal_kwh);

    // departing cohort fully satisfied
    assert_approx_eq!(ss.element(30).expect("cell 30").energy()[0], 0.0, 1e-9);
    // every future must-run bucket drew exactly one charger-hour
    for (ts, population, energy) in must_run_before {
        let cell = ss.element(ts).expect("future cell");
        assert_approx_eq!(cell.energy()[0], energy - population * 6.0, 1e-9);
    }
    // the whole delivery is accounted for
    assert_approx_eq!(before - total_energy(&ss, 30), bounds.nominal_kwh, 1e-9);
    // nothing went negative
    for ts in 30..30 + ss.horizon_len(30) {
        for &e in ss.element(ts).expect("cell").energy() {
            assert!(e >= -1e-9, "negative energy {e} at ts {ts}");
        }
    }
}

// One full timeslot cycle: demand, usage at nominal, then collapse and
// rebalance at the next timeslot. Rebalance must conserve every total.
#[test]
fn collapse_and_rebalance_conserve_totals() {
    let mut ss = engine(1000, 6.0);
    let demand = vec![DemandElement::new(2, 10.0, 150.0, vec![0.3, 0.3, 0.4])];
    ss.distribute_demand(50, &demand, 1.0);

    let bounds = ss.min_max(50);
    ss.distribute_usage(50, bounds.nominal_kwh);

    ss.collapse_elements(51);
    let cell = ss.element(52).expect("cell 52");
    assert_eq!(cell.len(), 2);
    assert_approx_eq!(cell.population()[1], 7.0, 1e-9);
    assert_approx_eq!(cell.energy()[1], 24.0, 1e-9);

    let population_before = total_population(&ss, 51);
    let energy_before = total_energy(&ss, 51);
    let chargers_before = ss.element(52).expect("cell 52").active_chargers();

    ss.rebalance(51);

    assert_approx_eq!(total_population(&ss, 51), population_before, EQ_TOLERANCE);
    assert_approx_eq!(total_energy(&ss, 51), energy_before, EQ_TOLERANCE);
    let cell = ss.element(52).expect("cell 52");
    assert_approx_eq!(cell.active_chargers(), chargers_before, EQ_TOLERANCE);
    // the over-full cohort handed population up to the must-run bucket
    assert_approx_eq!(cell.population()[0], 3.5, 1e-9);
    assert_approx_eq!(cell.energy()[0], 31.5, 1e-9);
    assert_approx_eq!(cell.population()[1], 6.5, 1e-9);
    assert_approx_eq!(cell.energy()[1], 19.5, 1e-9);
}

#[test]
fn migration_splits_population_conservatively() {
    let mut old = engine(1000, 5.0);
    let demand = vec![
        DemandElement::new(2, 11.0, 42.0, vec![0.5, 0.3, 0.2]),
        DemandElement::new(3, 15.0, 80.0, vec![0.25, 0.25, 0.25, 0.25]),
        DemandElement::new(5, 12.0, 60.0, vec![0.5, 0.5, 0.0, 0.0, 0.0, 0.0]),
        DemandElement::new(7, 25.0, 130.0, vec![0.2, 0.2, 0.2, 0.2, 0.2, 0.0, 0.0, 0.0]),
    ];
    old.distribute_demand(40, &demand, 1.0);

    let pre: Vec<StorageElement> = (40..48)
        .map(|ts| ss_cell(&old, ts))
        .collect();

    let mut new = engine(0, 5.0);
    new.move_subscribers(40, 400, &mut old);

    for (offset, pre_cell) in pre.iter().enumerate() {
        let ts = 40 + offset;
        let new_cell = new.element(ts).expect("migrated cell");
        let old_cell = old.element(ts).expect("source cell");
        assert_approx_eq!(
            new_cell.active_chargers(),
            pre_cell.active_chargers() * 0.4,
            1e-9
        );
        assert_approx_eq!(
            old_cell.active_chargers(),
            pre_cell.active_chargers() * 0.6,
            1e-9
        );
        for i in 0..pre_cell.len() {
            assert_approx_eq!(
                new_cell.population()[i] + old_cell.population()[i],
                pre_cell.population()[i],
                1e-9
            );
            assert_approx_eq!(
                new_cell.energy()[i] + old_cell.energy()[i],
                pre_cell.energy()[i],
                1e-9
            );
        }
    }
}

#[test]
fn migration_into_populated_state_accumulates() {
    let mut old = engine(600, 6.0);
    let source_demand = vec![DemandElement::new(1, 6.0, 0.0, vec![0.4, 0.6])];
    old.distribute_demand(42, &source_demand, 1.0);

    let mut destination = engine(200, 6.0);
    let own_demand = vec![DemandElement::new(1, 3.0, 0.0, vec![0.5, 0.5])];
    destination.distribute_demand(42, &own_demand, 1.0);

    let own = ss_cell(&destination, 43);
    let source_pre = ss_cell(&old, 43);

    destination.move_subscribers(42, 100, &mut old);

    let fraction = 100.0 / 600.0;
    let merged = destination.element(43).expect("cell 43");
    for i in 0..merged.len() {
        assert_approx_eq!(
            merged.population()[i],
            own.population()[i] + source_pre.population()[i] * fraction,
            1e-9
        );
        assert_approx_eq!(
            merged.energy()[i],
            own.energy()[i] + source_pre.energy()[i] * fraction,
            1e-9
        );
    }
    let source_post = old.element(43).expect("source cell");
    for i in 0..source_post.len() {
        assert_approx_eq!(
            source_post.population()[i],
            source_pre.population()[i] * (1.0 - fraction),
            1e-9
        );
    }
}

#[test]
fn boot_record_round_trips_to_six_decimals() {
    let mut ss = engine(800, 6.0);
    ss.distribute_demand(30, &mixed_demand(), 0.8);
    let bounds = ss.min_max(30);
    ss.distribute_usage(30, bounds.nominal_kwh);

    let record = ss.gather_state(30);

    let mut restored = engine(800, 6.0);
    restored.restore_state(30, &record).expect("valid record");

    assert_eq!(restored.horizon_len(30), ss.horizon_len(30));
    for ts in 30..30 + ss.horizon_len(30) {
        let original = ss.element(ts).expect("original cell");
        let rebuilt = restored.element(ts).expect("restored cell");
        assert_approx_eq!(rebuilt.active_chargers(), original.active_chargers(), EQ_TOLERANCE);
        assert_eq!(rebuilt.len(), original.len());
        for i in 0..original.len() {
            assert_approx_eq!(rebuilt.population()[i], original.population()[i], EQ_TOLERANCE);
            assert_approx_eq!(rebuilt.energy()[i], original.energy()[i], EQ_TOLERANCE);
        }
    }
}

#[test]
fn bounds_never_exceed_rated_power_of_active_chargers() {
    let mut ss = engine(800, 6.0);
    ss.distribute_demand(30, &mixed_demand(), 0.8);

    let bounds = ss.min_max(30);
    let rated: f64 = (30..30 + ss.horizon_len(30))
        .filter_map(|ts| ss.element(ts))
        .map(|cell| cell.active_chargers() * 6.0)
        .sum();
    assert!(bounds.max_kwh <= rated + 1e-9);
}

fn ss_cell(ss: &StorageState<StaticSubscription>, ts: usize) -> StorageElement {
    ss.element(ts).expect("cell must exist").clone()
}
