//! Textual serialisation of the horizon for simulation restart.
//!
//! The boot record is a bracketed list of cells, each
//! `[ts, chargers, [population...], [energy...]]` with every numeric fixed
//! to six decimal places:
//!
//! ```text
//! state := '[' cell (', ' cell)* ']'
//! cell  := '[' ts ', ' chargers ', ' array ', ' array ']'
//! array := '[' num (', ' num)* ']'
//! num   := digits '.' digits
//! ```
//!
//! Restoration accepts exactly this grammar; round-trip fidelity to six
//! decimal places is the contract.

use std::fmt;

use tracing::{error, warn};

use crate::element::StorageElement;
use crate::state::StorageState;
use crate::subscription::Subscription;

/// Boot-record parse failure: position and offending prefix.
#[derive(Debug, Clone)]
pub struct CodecError {
    /// Byte offset at which parsing failed.
    pub position: usize,
    /// What the parser expected.
    pub expected: String,
    /// Up to 16 characters of input at the failure point.
    pub found: String,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "boot record parse error at {}: expected {}, found \"{}\"",
            self.position, self.expected, self.found
        )
    }
}

impl<S: Subscription> StorageState<S> {
    /// Renders the active horizon starting at `timeslot` as a boot record.
    pub fn gather_state(&self, timeslot: usize) -> String {
        let mut cells = Vec::new();
        for (ts, cell) in self.ring().iter_active(timeslot) {
            cells.push(format!(
                "[{}, {:.6}, [{}], [{}]]",
                ts,
                cell.active_chargers(),
                join_fixed(cell.population()),
                join_fixed(cell.energy())
            ));
        }
        format!("[{}]", cells.join(", "))
    }

    /// Rebuilds the horizon from a boot record produced by
    /// [`gather_state`](Self::gather_state).
    ///
    /// On any grammar mismatch the parse is abandoned, the state is left
    /// empty, and the offending prefix is logged. A record whose first cell
    /// is not at `timeslot` restores anyway, with a warning.
    pub fn restore_state(&mut self, timeslot: usize, record: &str) -> Result<(), CodecError> {
        self.ring_mut().clear();
        let cells = match parse_record(record) {
            Ok(cells) => cells,
            Err(e) => {
                error!(error = %e, "cannot restore boot record");
                self.ring_mut().clear();
                return Err(e);
            }
        };
        if let Some(first) = cells.first() {
            if first.timeslot != timeslot {
                warn!(
                    expected = timeslot,
                    found = first.timeslot,
                    "boot record starts at an unexpected timeslot"
                );
            }
        }
        for cell in cells {
            self.ring_mut().set(
                cell.timeslot,
                StorageElement::from_parts(cell.chargers, cell.population, cell.energy),
            );
        }
        Ok(())
    }
}

fn join_fixed(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format!("{v:.6}"))
        .collect::<Vec<_>>()
        .join(", ")
}

struct ParsedCell {
    timeslot: usize,
    chargers: f64,
    population: Vec<f64>,
    energy: Vec<f64>,
}

fn parse_record(record: &str) -> Result<Vec<ParsedCell>, CodecError> {
    let mut scanner = Scanner::new(record);
    scanner.expect("[")?;
    let mut cells = Vec::new();
    if scanner.take("]") {
        scanner.expect_end()?;
        return Ok(cells);
    }
    loop {
        cells.push(parse_cell(&mut scanner)?);
        if scanner.take(", ") {
            continue;
        }
        scanner.expect("]")?;
        break;
    }
    scanner.expect_end()?;
    Ok(cells)
}

fn parse_cell(scanner: &mut Scanner<'_>) -> Result<ParsedCell, CodecError> {
    scanner.expect("[")?;
    let timeslot = scanner.parse_usize()?;
    scanner.expect(", ")?;
    let chargers = scanner.parse_number()?;
    scanner.expect(", ")?;
    let population = parse_array(scanner)?;
    scanner.expect(", ")?;
    let energy = parse_array(scanner)?;
    scanner.expect("]")?;
    if population.len() != energy.len() {
        return Err(scanner.error("matching population and energy lengths"));
    }
    Ok(ParsedCell {
        timeslot,
        chargers,
        population,
        energy,
    })
}

fn parse_array(scanner: &mut Scanner<'_>) -> Result<Vec<f64>, CodecError> {
    scanner.expect("[")?;
    let mut values = vec![scanner.parse_number()?];
    while scanner.take(", ") {
        values.push(scanner.parse_number()?);
    }
    scanner.expect("]")?;
    Ok(values)
}

/// Cursor over the record text. The grammar is regular, so a position and a
/// handful of lookahead helpers are all the state needed.
struct Scanner<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.position..]
    }

    fn error(&self, expected: &str) -> CodecError {
        let found: String = self.rest().chars().take(16).collect();
        CodecError {
            position: self.position,
            expected: expected.to_string(),
            found,
        }
    }

    fn take(&mut self, literal: &str) -> bool {
        if self.rest().starts_with(literal) {
            self.position += literal.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, literal: &str) -> Result<(), CodecError> {
        if self.take(literal) {
            Ok(())
        } else {
            Err(self.error(&format!("\"{literal}\"")))
        }
    }

    fn expect_end(&self) -> Result<(), CodecError> {
        if self.rest().is_empty() {
            Ok(())
        } else {
            Err(self.error("end of record"))
        }
    }

    fn take_digits(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        self.position += len;
        &rest[..len]
    }

    fn parse_usize(&mut self) -> Result<usize, CodecError> {
        let digits = self.take_digits();
        digits
            .parse()
            .map_err(|_| self.error("timeslot integer"))
    }

    fn parse_number(&mut self) -> Result<f64, CodecError> {
        let start = self.position;
        let whole = self.take_digits();
        if whole.is_empty() || !self.take(".") {
            return Err(self.error("number as digits.digits"));
        }
        let fraction = self.take_digits();
        if fraction.is_empty() {
            return Err(self.error("fractional digits"));
        }
        self.input[start..self.position]
            .parse()
            .map_err(|_| self.error("parseable number"))
    }
}
