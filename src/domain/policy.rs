use crate::domain::error::ScheduleError;
use crate::domain::models::TimeSlot;
use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
    Weekday,
};
use chrono_tz::Tz;

pub const MAX_HOLIDAY_RANGES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WorkWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MealWindow {
    pub name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl MealWindow {
    pub fn new(name: impl Into<String>, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }
}

/// Inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HolidayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl HolidayRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarPolicy {
    pub timezone: Tz,
    pub weekday: WorkWindow,
    pub weekend: WorkWindow,
    pub meal_windows: Vec<MealWindow>,
    pub meal_duration_minutes: u32,
    pub break_duration_minutes: u32,
    pub break_interval_minutes: u32,
    pub holidays: Vec<HolidayRange>,
    pub history_days: u32,
}

impl Default for CalendarPolicy {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            weekday: WorkWindow::new(clock(7, 0), clock(22, 0)),
            weekend: WorkWindow::new(clock(9, 0), clock(22, 0)),
            meal_windows: vec![
                MealWindow::new("Breakfast", clock(7, 0), clock(9, 0)),
                MealWindow::new("Lunch", clock(12, 0), clock(14, 0)),
                MealWindow::new("Dinner", clock(18, 0), clock(20, 0)),
            ],
            meal_duration_minutes: 30,
            break_duration_minutes: 15,
            break_interval_minutes: 90,
            holidays: Vec::new(),
            history_days: 7,
        }
    }
}

impl CalendarPolicy {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if !self.weekday.is_valid() {
            return Err(ScheduleError::Configuration(format!(
                "weekday window {}-{} is empty or inverted",
                self.weekday.start.format("%H:%M"),
                self.weekday.end.format("%H:%M")
            )));
        }
        for meal in &self.meal_windows {
            if meal.name.trim().is_empty() {
                return Err(ScheduleError::Configuration(
                    "meal window name must not be empty".to_string(),
                ));
            }
            if meal.end <= meal.start {
                return Err(ScheduleError::Configuration(format!(
                    "meal window '{}' is empty or inverted",
                    meal.name
                )));
            }
        }
        if self.meal_duration_minutes == 0 {
            return Err(ScheduleError::Configuration(
                "meal duration must be > 0".to_string(),
            ));
        }
        if self.break_duration_minutes == 0 {
            return Err(ScheduleError::Configuration(
                "break duration must be > 0".to_string(),
            ));
        }
        if self.holidays.len() > MAX_HOLIDAY_RANGES {
            return Err(ScheduleError::Configuration(format!(
                "at most {MAX_HOLIDAY_RANGES} holiday ranges are supported"
            )));
        }
        if let Some(range) = self.holidays.iter().find(|range| range.end < range.start) {
            return Err(ScheduleError::Configuration(format!(
                "holiday range {} to {} is inverted",
                range.start, range.end
            )));
        }
        Ok(())
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.iter().any(|range| range.contains(date))
    }

    pub fn is_weekend_like(&self, date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun) || self.is_holiday(date)
    }

    pub fn window_for(&self, date: NaiveDate) -> WorkWindow {
        if self.is_weekend_like(date) && self.weekend.is_valid() {
            self.weekend
        } else {
            self.weekday
        }
    }

    pub fn get_day_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let window = self.window_for(date);
        (self.at_local(date, window.start), self.at_local(date, window.end))
    }

    pub fn day_slot(&self, date: NaiveDate) -> TimeSlot {
        let (start, end) = self.get_day_bounds(date);
        TimeSlot { start, end }
    }

    pub fn meal_slot(&self, date: NaiveDate, meal: &MealWindow) -> TimeSlot {
        TimeSlot {
            start: self.at_local(date, meal.start),
            end: self.at_local(date, meal.end),
        }
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }

    pub fn at_local(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        self.resolve_local(date.and_time(time))
    }

    pub fn local_midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        self.at_local(date, NaiveTime::MIN)
    }

    pub fn meal_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.meal_duration_minutes))
    }

    pub fn break_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.break_duration_minutes))
    }

    pub fn add_holiday(&mut self, start: NaiveDate, end: NaiveDate) -> Result<(), ScheduleError> {
        if end < start {
            return Err(ScheduleError::Configuration(format!(
                "holiday range {start} to {end} is inverted"
            )));
        }
        if self.holidays.len() >= MAX_HOLIDAY_RANGES {
            return Err(ScheduleError::Configuration(format!(
                "at most {MAX_HOLIDAY_RANGES} holiday ranges are supported"
            )));
        }
        self.holidays.push(HolidayRange { start, end });
        Ok(())
    }

    pub fn clean_past_holidays(&mut self, today: NaiveDate) {
        self.holidays.retain(|range| range.end >= today);
    }

    // Times skipped by a DST jump are read as UTC wall time.
    fn resolve_local(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        match self.timezone.from_local_datetime(&naive) {
            LocalResult::Single(local) => local.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => Utc.from_utc_datetime(&naive),
        }
    }
}

pub(crate) fn clock(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}
