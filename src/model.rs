use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

// ── Days ─────────────────────────────────────────────────────────

/// Day of the week, Monday-first. `Mon = 1 .. Sun = 7` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Day {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

pub const DAY_COUNT: usize = 6;

/// Columns of the weekly grid. Sunday is not a teaching day.
pub const DAYS: [Day; DAY_COUNT] = [Day::Mon, Day::Tue, Day::Wed, Day::Thu, Day::Fri, Day::Sat];

impl Day {
    pub fn from_number(n: u8) -> Option<Day> {
        match n {
            1 => Some(Day::Mon),
            2 => Some(Day::Tue),
            3 => Some(Day::Wed),
            4 => Some(Day::Thu),
            5 => Some(Day::Fri),
            6 => Some(Day::Sat),
            7 => Some(Day::Sun),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        self as u8 + 1
    }

    pub fn of(date: NaiveDate) -> Day {
        match date.weekday() {
            Weekday::Mon => Day::Mon,
            Weekday::Tue => Day::Tue,
            Weekday::Wed => Day::Wed,
            Weekday::Thu => Day::Thu,
            Weekday::Fri => Day::Fri,
            Weekday::Sat => Day::Sat,
            Weekday::Sun => Day::Sun,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Day::Mon => "Monday",
            Day::Tue => "Tuesday",
            Day::Wed => "Wednesday",
            Day::Thu => "Thursday",
            Day::Fri => "Friday",
            Day::Sat => "Saturday",
            Day::Sun => "Sunday",
        }
    }

    /// Column of this day in [`DAYS`], `None` for Sunday.
    pub fn grid_column(self) -> Option<usize> {
        DAYS.iter().position(|d| *d == self)
    }
}

// ── Clock times and slots ────────────────────────────────────────

pub const SLOT_COUNT: usize = 10;
pub const OPENING_HOUR: u8 = 8;
pub const CLOSING_HOUR: u8 = OPENING_HOUR + SLOT_COUNT as u8;

/// Start times of the hourly slots, 08:00 through 17:00.
pub const TIME_SLOTS: [ClockTime; SLOT_COUNT] = [
    ClockTime::on_the_hour(8),
    ClockTime::on_the_hour(9),
    ClockTime::on_the_hour(10),
    ClockTime::on_the_hour(11),
    ClockTime::on_the_hour(12),
    ClockTime::on_the_hour(13),
    ClockTime::on_the_hour(14),
    ClockTime::on_the_hour(15),
    ClockTime::on_the_hour(16),
    ClockTime::on_the_hour(17),
];

/// Wall-clock time of day, `"HH:MM"` on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    pub const fn on_the_hour(hour: u8) -> Self {
        Self { hour, minute: 0 }
    }

    pub fn new(hour: u8, minute: u8) -> Result<Self, ModelError> {
        if hour > 23 || minute > 59 {
            return Err(ModelError::BadTime(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }

    /// Minutes since midnight.
    pub fn minutes(self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }

    /// Index of this time in [`TIME_SLOTS`].
    pub fn slot_index(self) -> Option<usize> {
        TIME_SLOTS.iter().position(|t| *t == self)
    }

    /// Index of this time as a slot boundary: 08:00 is 0, 18:00 is [`SLOT_COUNT`].
    pub fn boundary_index(self) -> Option<usize> {
        if self.minute != 0 || self.hour < OPENING_HOUR || self.hour > CLOSING_HOUR {
            return None;
        }
        Some((self.hour - OPENING_HOUR) as usize)
    }

    /// `None` when the result would pass midnight.
    pub fn plus_hours(self, hours: u8) -> Option<ClockTime> {
        let hour = self.hour.checked_add(hours)?;
        if hour > 23 {
            return None;
        }
        Some(Self { hour, minute: self.minute })
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl fmt::Debug for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for ClockTime {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ModelError::BadTime(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(bad());
        }
        let hour: u8 = h.parse().map_err(|_| bad())?;
        let minute: u8 = m.parse().map_err(|_| bad())?;
        ClockTime::new(hour, minute).map_err(|_| bad())
    }
}

impl From<ClockTime> for String {
    fn from(t: ClockTime) -> String {
        t.to_string()
    }
}

impl TryFrom<String> for ClockTime {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Parse a `yyyy-MM-dd` date. A trailing ISO time part (`T...`) is ignored.
pub fn parse_date(s: &str) -> Result<NaiveDate, ModelError> {
    let s = s.trim();
    let day_part = s.split_once('T').map_or(s, |(d, _)| d);
    NaiveDate::parse_from_str(day_part, "%Y-%m-%d").map_err(|_| ModelError::BadDate(s.to_string()))
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - chrono::Duration::days(date.weekday().num_days_from_monday() as i64)
}

// ── Bookings ─────────────────────────────────────────────────────

/// When a booking happens: every week on a day, or once on a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingDate {
    Recurring(Day),
    Dated(NaiveDate),
}

impl BookingDate {
    pub fn day(&self) -> Day {
        match self {
            BookingDate::Recurring(day) => *day,
            BookingDate::Dated(date) => Day::of(*date),
        }
    }

    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        match self {
            BookingDate::Recurring(day) => *day == Day::of(date),
            BookingDate::Dated(d) => *d == date,
        }
    }

    /// True if both can fall on the same calendar day.
    pub fn collides_with(&self, other: &BookingDate) -> bool {
        match (self, other) {
            (BookingDate::Dated(a), BookingDate::Dated(b)) => a == b,
            _ => self.day() == other.day(),
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, BookingDate::Recurring(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub location_id: Ulid,
    pub title: String,
    pub organizer: String,
    pub when: BookingDate,
    pub start: ClockTime,
    /// `None` reads as a one-hour booking.
    pub end: Option<ClockTime>,
}

impl Booking {
    /// `[start, end)` in minutes since midnight.
    pub fn minute_range(&self) -> (u32, u32) {
        let start = self.start.minutes();
        let end = self.end.map_or(start + 60, |e| e.minutes());
        (start, end)
    }

    pub fn overlaps(&self, other: &Booking) -> bool {
        if !self.when.collides_with(&other.when) {
            return false;
        }
        let (a_start, a_end) = self.minute_range();
        let (b_start, b_end) = other.minute_range();
        a_start < b_end && b_start < a_end
    }

    /// Normalize a legacy booking document into a typed booking.
    pub fn from_document(
        id: Ulid,
        location_id: Ulid,
        doc: BookingDocument,
    ) -> Result<Booking, ModelError> {
        let when = match (doc.date.as_deref().filter(|s| !s.is_empty()), doc.day_of_week) {
            (Some(date), None) => BookingDate::Dated(parse_date(date)?),
            (None, Some(n)) => BookingDate::Recurring(Day::from_number(n).ok_or(ModelError::BadDay(n))?),
            (Some(_), Some(_)) => {
                return Err(ModelError::Shape("document has both date and dayOfWeek".into()));
            }
            (None, None) => {
                return Err(ModelError::Shape("document has neither date nor dayOfWeek".into()));
            }
        };
        let end = match doc.end_time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(s.parse()?),
        };
        Ok(Booking {
            id,
            location_id,
            title: doc.title,
            organizer: doc.organizer,
            when,
            start: doc.start_time.parse()?,
            end,
        })
    }
}

/// Booking as stored by the old document database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDocument {
    pub title: String,
    #[serde(default)]
    pub organizer: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub day_of_week: Option<u8>,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
}

/// Fields an update may change. `end: Some(None)` clears the end time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub title: Option<String>,
    pub organizer: Option<String>,
    pub when: Option<BookingDate>,
    pub start: Option<ClockTime>,
    pub end: Option<Option<ClockTime>>,
}

impl BookingPatch {
    pub fn is_empty(&self) -> bool {
        self == &BookingPatch::default()
    }

    pub fn apply(&self, booking: &Booking) -> Booking {
        let mut next = booking.clone();
        if let Some(title) = &self.title {
            next.title = title.clone();
        }
        if let Some(organizer) = &self.organizer {
            next.organizer = organizer.clone();
        }
        if let Some(when) = self.when {
            next.when = when;
        }
        if let Some(start) = self.start {
            next.start = start;
        }
        if let Some(end) = self.end {
            next.end = end;
        }
        next
    }
}

// ── Locations ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LocationState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Bookings in creation order. Updates keep their position.
    pub bookings: Vec<Booking>,
}

impl LocationState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            bookings: Vec::new(),
        }
    }

    pub fn insert_booking(&mut self, booking: Booking) {
        self.bookings.push(booking);
    }

    /// Replace in place. Returns false if the id is unknown.
    pub fn replace_booking(&mut self, booking: Booking) -> bool {
        match self.bookings.iter_mut().find(|b| b.id == booking.id) {
            Some(slot) => {
                *slot = booking;
                true
            }
            None => false,
        }
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// First existing booking that overlaps `candidate`, ignoring the candidate's own id.
    pub fn colliding(&self, candidate: &Booking) -> Option<&Booking> {
        self.bookings
            .iter()
            .filter(|b| b.id != candidate.id)
            .find(|b| b.overlaps(candidate))
    }

    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(move |b| b.when.occurs_on(date))
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LocationCreated { id: Ulid, name: Option<String> },
    LocationRenamed { id: Ulid, name: Option<String> },
    LocationDeleted { id: Ulid },
    BookingCreated { booking: Booking },
    BookingUpdated { booking: Booking },
    BookingCancelled { id: Ulid, location_id: Ulid },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub booking_count: usize,
}

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("bad time {0:?}: expected HH:MM")]
    BadTime(String),
    #[error("bad date {0:?}: expected yyyy-MM-dd")]
    BadDate(String),
    #[error("bad day of week {0}: expected 1 (Monday) to 7 (Sunday)")]
    BadDay(u8),
    #[error("malformed booking document: {0}")]
    Shape(String),
}
