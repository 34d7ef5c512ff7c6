//! The Before / Adapt / Fed scoreboard.

use std::{
    error::Error,
    fmt::{self, Display},
    path::Path,
};

use log::info;
use rust_xlsxwriter::{Workbook, XlsxError};

/// File name of the exported scoreboard.
pub const OUTCOME_FILE: &str = "outcome.xlsx";

/// Errors raised while exporting the scoreboard.
#[derive(Debug)]
pub struct ReportErr(XlsxError);

impl Display for ReportErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot write the scoreboard: {}", self.0)
    }
}

impl Error for ReportErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.0)
    }
}

impl From<XlsxError> for ReportErr {
    fn from(value: XlsxError) -> Self {
        Self(value)
    }
}

/// The phase of a round a score was measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The client's model before adapting on the batch.
    Before,
    /// The logits produced while adapting.
    Adapt,
    /// After aggregation.
    Fed,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Before, Role::Adapt, Role::Fed];

    pub fn label(self) -> &'static str {
        match self {
            Role::Before => "Before",
            Role::Adapt => "Adapt",
            Role::Fed => "Fed",
        }
    }
}

/// Mean accuracy per role and corruption slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTable {
    corruptions: Vec<String>,
    rows: [Vec<Option<f64>>; 3],
}

impl ScoreTable {
    /// Creates a new `ScoreTable`.
    ///
    /// # Arguments
    /// * `corruptions` - The column names, one per corruption slot.
    /// * `rows` - One accuracy per corruption slot for Before, Adapt and Fed,
    ///   `None` where nothing was measured.
    pub fn new(corruptions: Vec<String>, rows: [Vec<Option<f64>>; 3]) -> Self {
        Self { corruptions, rows }
    }

    pub fn corruptions(&self) -> &[String] {
        &self.corruptions
    }

    /// Returns the scores of `role`, one per corruption slot.
    pub fn row(&self, role: Role) -> &[Option<f64>] {
        &self.rows[role as usize]
    }

    pub fn get(&self, role: Role, slot: usize) -> Option<f64> {
        self.row(role).get(slot).copied().flatten()
    }

    /// Returns the mean of the measured scores of `role`.
    pub fn average(&self, role: Role) -> Option<f64> {
        let values: Vec<f64> = self.row(role).iter().flatten().copied().collect();

        if values.is_empty() {
            return None;
        }

        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Returns the amount of rows and columns, the `Avg` column included.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.corruptions.len() + 1)
    }

    /// Writes the table as a spreadsheet with a `No.` label column and an
    /// `Avg` column. Unmeasured cells are left blank.
    pub fn write_xlsx(&self, path: &Path) -> Result<(), ReportErr> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        let avg_col = (self.corruptions.len() + 1) as u16;

        sheet.write_string(0, 0, "No.")?;
        for (col, name) in self.corruptions.iter().enumerate() {
            sheet.write_string(0, col as u16 + 1, name)?;
        }
        sheet.write_string(0, avg_col, "Avg")?;

        for (r, role) in Role::ALL.into_iter().enumerate() {
            let row = r as u32 + 1;
            sheet.write_string(row, 0, role.label())?;

            for (col, value) in self.row(role).iter().enumerate() {
                if let Some(value) = value {
                    sheet.write_number(row, col as u16 + 1, *value)?;
                }
            }

            if let Some(avg) = self.average(role) {
                sheet.write_number(row, avg_col, avg)?;
            }
        }

        workbook.save(path)?;
        info!("scoreboard written to {}", path.display());
        Ok(())
    }
}

impl Display for ScoreTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<8}", "No.")?;
        for name in &self.corruptions {
            write!(f, " {name:>16}")?;
        }
        writeln!(f, " {:>8}", "Avg")?;

        for role in Role::ALL {
            write!(f, "{:<8}", role.label())?;
            for value in self.row(role) {
                match value {
                    Some(v) => write!(f, " {v:>16.4}")?,
                    None => write!(f, " {:>16}", "-")?,
                }
            }
            match self.average(role) {
                Some(v) => writeln!(f, " {v:>8.4}")?,
                None => writeln!(f, " {:>8}", "-")?,
            }
        }

        Ok(())
    }
}
