use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::state::DemandBounds;

pub const FLEXIBILITY_SCHEMA_V1_HEADER: &str = "timeslot,min_kwh,nominal_kwh,max_kwh";

/// One timeslot's flexibility bounds, as reported to the broker.
#[derive(Clone, Debug)]
pub struct FlexibilityRow {
    pub timeslot: usize,
    pub min_kwh: f64,
    pub nominal_kwh: f64,
    pub max_kwh: f64,
}

impl FlexibilityRow {
    /// Builds a row from the bounds computed for `timeslot`.
    pub fn from_bounds(timeslot: usize, bounds: &DemandBounds) -> Self {
        Self {
            timeslot,
            min_kwh: bounds.min_kwh,
            nominal_kwh: bounds.nominal_kwh,
            max_kwh: bounds.max_kwh,
        }
    }
}

pub fn write_flexibility_csv<W: Write>(writer: &mut W, rows: &[FlexibilityRow]) -> io::Result<()> {
    writeln!(writer, "{FLEXIBILITY_SCHEMA_V1_HEADER}")?;
    for row in rows {
        writeln!(
            writer,
            "{},{:.6},{:.6},{:.6}",
            row.timeslot, row.min_kwh, row.nominal_kwh, row.max_kwh
        )?;
    }
    Ok(())
}

pub fn write_flexibility_to_path(path: &Path, rows: &[FlexibilityRow]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_flexibility_csv(&mut writer, rows)?;
    writer.flush()
}
