//! The tracking sheet itself: where a new booking row goes and what it
//! contains.

use crate::error::AppResult;

use super::client::SheetsClient;

/// Status every freshly appended row carries.
pub const STATUS_CONTACTED: &str = "CONTACTED";

/// One row of the hold grid, in column order A through E.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRow {
    pub email: String,
    pub city: String,
    pub venue: String,
    pub dates: String,
}

impl BookingRow {
    pub fn into_values(self) -> Vec<String> {
        vec![
            self.email,
            self.city,
            self.venue,
            self.dates,
            STATUS_CONTACTED.to_string(),
        ]
    }
}

pub struct TrackingSheet {
    client: SheetsClient,
    spreadsheet_id: String,
    range: String,
    /// Tab qualifier of the configured range. `None` for a bare range
    /// like "A:F", which addresses the spreadsheet's first sheet.
    tab: Option<String>,
}

impl TrackingSheet {
    pub fn new(client: SheetsClient) -> Self {
        use crate::app_config::cfg;

        Self::with_target(client, &cfg.sheet.spreadsheet_id, &cfg.sheet.range)
    }

    pub fn with_target(client: SheetsClient, spreadsheet_id: &str, range: &str) -> Self {
        // "Hold Grid!A:F" -> tab "Hold Grid"
        let tab = range.split_once('!').map(|(tab, _)| tab.to_string());

        Self {
            client,
            spreadsheet_id: spreadsheet_id.to_string(),
            range: range.to_string(),
            tab,
        }
    }

    /// Appends one row at the first free position. Reads the existing
    /// grid, scans for the first row with an empty leading (email)
    /// column, and writes the five values there in a single update.
    pub async fn append_booking(&self, row: BookingRow) -> AppResult<()> {
        let existing = self
            .client
            .read_range(&self.spreadsheet_id, &self.range)
            .await?;

        let target = next_data_row(&existing.values);
        let update_range = match &self.tab {
            Some(tab) => format!("{tab}!A{target}:E{target}"),
            None => format!("A{target}:E{target}"),
        };

        tracing::info!("Appending booking at row {}", target);

        self.client
            .write_range(&self.spreadsheet_id, &update_range, vec![row.into_values()])
            .await
    }
}

/// 1-indexed row of the first empty leading column. Rows count as
/// occupied only while their first cell holds non-whitespace text; the
/// scan stops at the first gap, so stray data below a gap is ignored.
pub fn next_data_row(values: &[Vec<String>]) -> usize {
    let mut next = 1;
    for row in values {
        match row.first() {
            Some(cell) if !cell.trim().is_empty() => next += 1,
            _ => break,
        }
    }
    next
}
