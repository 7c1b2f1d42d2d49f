//! Calendar / date-range selector used to filter dashboard and transaction
//! listings.
//!
//! State machine per instance:
//! - `Single`: each click replaces the selected date.
//! - `Range`: first click opens `{from, None}`, second click closes it
//!   (ordered so `from <= to`), a third click starts over. Hovering while
//!   half-open only previews the interval.
//!
//! Switching mode resets everything to today. `apply` emits a `DateFilter`
//! or a warning when a range is incomplete.

use chrono::{Datelike, Duration, Local, Months, NaiveDate};
use serde::Serialize;
use thiserror::Error;

const GRID_CELLS: usize = 42;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarMode {
    Single,
    Range,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn is_complete(&self) -> bool {
        self.from.is_some() && self.to.is_some()
    }

    pub fn is_half_open(&self) -> bool {
        self.from.is_some() && self.to.is_none()
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        match (self.from, self.to) {
            (Some(from), Some(to)) => from <= day && day <= to,
            (Some(from), None) => from == day,
            _ => false,
        }
    }
}

/// What `apply` hands to the listing views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DateFilter {
    Single { date: NaiveDate },
    Range { from: NaiveDate, to: NaiveDate },
}

impl DateFilter {
    /// Query parameters for the read endpoints.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            DateFilter::Single { date } => vec![("date", date.format("%Y-%m-%d").to_string())],
            DateFilter::Range { from, to } => vec![
                ("from", from.format("%Y-%m-%d").to_string()),
                ("to", to.format("%Y-%m-%d").to_string()),
            ],
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        match self {
            DateFilter::Single { date } => *date == day,
            DateFilter::Range { from, to } => *from <= day && day <= *to,
        }
    }
}

/// Shown to the user instead of emitting a partial filter.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CalendarWarning {
    #[error("Select an end date to apply the range")]
    IncompleteRange,
}

/// One cell of the month view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayCell {
    pub date: NaiveDate,
    pub in_current_month: bool,
    pub is_today: bool,
    pub selected: bool,
    pub in_range: bool,
    pub in_preview: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Calendar {
    mode: CalendarMode,
    today: NaiveDate,
    selected_date: NaiveDate,
    range: DateRange,
    current_month: NaiveDate,
    hover: Option<NaiveDate>,
}

/// The local calendar date.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn first_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

impl Calendar {
    pub fn new(mode: CalendarMode, today: NaiveDate) -> Self {
        Self {
            mode,
            today,
            selected_date: today,
            range: DateRange::default(),
            current_month: first_of_month(today),
            hover: None,
        }
    }

    /// A selector opened on the local date.
    pub fn starting_today(mode: CalendarMode) -> Self {
        Self::new(mode, today())
    }

    pub fn mode(&self) -> CalendarMode {
        self.mode
    }

    pub fn selected_date(&self) -> NaiveDate {
        self.selected_date
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    /// First day of the displayed month.
    pub fn current_month(&self) -> NaiveDate {
        self.current_month
    }

    /// Switch mode and reset date, range, hover and displayed month to
    /// `today`.
    pub fn set_mode(&mut self, mode: CalendarMode, today: NaiveDate) {
        *self = Self::new(mode, today);
    }

    pub fn click(&mut self, day: NaiveDate) {
        self.hover = None;
        match self.mode {
            CalendarMode::Single => {
                self.selected_date = day;
                self.current_month = first_of_month(day);
            }
            CalendarMode::Range => {
                self.range = match (self.range.from, self.range.to) {
                    (Some(from), None) if day < from => DateRange {
                        from: Some(day),
                        to: Some(from),
                    },
                    (Some(from), None) => DateRange {
                        from: Some(from),
                        to: Some(day),
                    },
                    // Nothing open, or a complete range: start over.
                    _ => DateRange {
                        from: Some(day),
                        to: None,
                    },
                };
            }
        }
    }

    /// Record the hovered day and return the preview interval, if any.
    pub fn hover(&mut self, day: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        if self.mode == CalendarMode::Range && self.range.is_half_open() {
            self.hover = Some(day);
        } else {
            self.hover = None;
        }
        self.preview()
    }

    pub fn clear_hover(&mut self) {
        self.hover = None;
    }

    /// Interval between `from` and the hovered day while the range is
    /// half-open. Never part of the committed range.
    pub fn preview(&self) -> Option<(NaiveDate, NaiveDate)> {
        if self.mode != CalendarMode::Range {
            return None;
        }
        match (self.range.from, self.range.to, self.hover) {
            (Some(from), None, Some(hover)) => Some((from.min(hover), from.max(hover))),
            _ => None,
        }
    }

    pub fn apply(&self) -> Result<DateFilter, CalendarWarning> {
        match self.mode {
            CalendarMode::Single => Ok(DateFilter::Single {
                date: self.selected_date,
            }),
            CalendarMode::Range => match (self.range.from, self.range.to) {
                (Some(from), Some(to)) => Ok(DateFilter::Range { from, to }),
                _ => Err(CalendarWarning::IncompleteRange),
            },
        }
    }

    pub fn next_month(&mut self) {
        if let Some(next) = self.current_month.checked_add_months(Months::new(1)) {
            self.current_month = next;
        }
    }

    pub fn prev_month(&mut self) {
        if let Some(prev) = self.current_month.checked_sub_months(Months::new(1)) {
            self.current_month = prev;
        }
    }

    /// Six Monday-first weeks covering the displayed month.
    pub fn month_grid(&self) -> Vec<DayCell> {
        let offset = self.current_month.weekday().num_days_from_monday();
        let start = self.current_month - Duration::days(i64::from(offset));
        let preview = self.preview();

        (0..GRID_CELLS)
            .filter_map(|i| start.checked_add_signed(Duration::days(i as i64)))
            .map(|date| DayCell {
                date,
                in_current_month: date.month() == self.current_month.month()
                    && date.year() == self.current_month.year(),
                is_today: date == self.today,
                selected: match self.mode {
                    CalendarMode::Single => date == self.selected_date,
                    CalendarMode::Range => {
                        self.range.from == Some(date) || self.range.to == Some(date)
                    }
                },
                in_range: self.mode == CalendarMode::Range && self.range.contains(date),
                in_preview: preview
                    .map(|(a, b)| a <= date && date <= b)
                    .unwrap_or(false),
            })
            .collect()
    }
}
