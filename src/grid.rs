//! Weekly timetable grid: recurring bookings laid out on a 6-day by
//! 10-slot grid, multi-hour bookings merged into one span.

use tracing::debug;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellBooking {
    pub id: Ulid,
    pub location_id: Ulid,
    pub title: String,
    pub organizer: String,
}

impl From<&Booking> for CellBooking {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            location_id: b.location_id,
            title: b.title.clone(),
            organizer: b.organizer.clone(),
        }
    }
}

/// One occupied grid cell. The first hour of a booking carries the span
/// length; the cells it covers after that are continuations with
/// `total_hours == 0`, skipped by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridCell {
    pub booking: CellBooking,
    pub first_hour: bool,
    pub total_hours: u32,
}

/// A cell written twice. `kept` is the later booking, which holds the cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridConflict {
    pub day: Day,
    pub slot: ClockTime,
    pub kept: Ulid,
    pub displaced: Ulid,
}

#[derive(Debug, Clone)]
pub struct WeeklyGrid {
    cells: [[Option<GridCell>; SLOT_COUNT]; DAY_COUNT],
    conflicts: Vec<GridConflict>,
}

impl Default for WeeklyGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl WeeklyGrid {
    pub fn new() -> Self {
        Self {
            cells: std::array::from_fn(|_| std::array::from_fn(|_| None)),
            conflicts: Vec::new(),
        }
    }

    pub fn cell(&self, day: Day, slot: ClockTime) -> Option<&GridCell> {
        let col = day.grid_column()?;
        let row = slot.slot_index()?;
        self.cells[col][row].as_ref()
    }

    pub fn conflicts(&self) -> &[GridConflict] {
        &self.conflicts
    }

    /// Occupied cells in day-major, slot-minor order.
    pub fn rows(&self) -> impl Iterator<Item = (Day, ClockTime, &GridCell)> {
        DAYS.iter().enumerate().flat_map(move |(col, day)| {
            self.cells[col]
                .iter()
                .enumerate()
                .filter_map(move |(row, cell)| cell.as_ref().map(|c| (*day, TIME_SLOTS[row], c)))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows().next().is_none()
    }

    /// Lay one booking onto the grid. Later placements win contested cells.
    pub fn place(&mut self, booking: &Booking) {
        let day = booking.when.day();
        let Some(col) = day.grid_column() else {
            debug!(booking = %booking.id, ?day, "day not on the weekly grid, dropped");
            return;
        };
        let Some(start_index) = booking.start.slot_index() else {
            debug!(booking = %booking.id, start = %booking.start, "start is not a slot, dropped");
            return;
        };
        let end_index = booking
            .end
            .and_then(ClockTime::boundary_index)
            .filter(|&end| end > start_index)
            .unwrap_or(start_index + 1);
        let total_hours = (end_index - start_index).max(1) as u32;

        let summary = CellBooking::from(booking);
        for row in start_index..end_index.min(SLOT_COUNT) {
            let first_hour = row == start_index;
            let cell = GridCell {
                booking: summary.clone(),
                first_hour,
                total_hours: if first_hour { total_hours } else { 0 },
            };
            if let Some(previous) = self.cells[col][row].replace(cell) {
                self.conflicts.push(GridConflict {
                    day,
                    slot: TIME_SLOTS[row],
                    kept: booking.id,
                    displaced: previous.booking.id,
                });
            }
        }
    }
}

/// Build the weekly grid from bookings in the given order.
pub fn build_weekly_grid<'a>(bookings: impl IntoIterator<Item = &'a Booking>) -> WeeklyGrid {
    let mut grid = WeeklyGrid::new();
    for booking in bookings {
        grid.place(booking);
    }
    if !grid.conflicts.is_empty() {
        debug!(conflicts = grid.conflicts.len(), "weekly grid has overlapping bookings");
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> ClockTime {
        s.parse().unwrap()
    }

    fn recurring(day: u8, start: &str, end: Option<&str>) -> Booking {
        Booking {
            id: Ulid::new(),
            location_id: Ulid::nil(),
            title: format!("{start} class"),
            organizer: "Dept".into(),
            when: BookingDate::Recurring(Day::from_number(day).unwrap()),
            start: t(start),
            end: end.map(t),
        }
    }

    #[test]
    fn multi_hour_booking_merges_into_one_span() {
        let b = recurring(2, "10:00", Some("13:00"));
        let grid = build_weekly_grid([&b]);

        let first = grid.cell(Day::Tue, t("10:00")).unwrap();
        assert!(first.first_hour);
        assert_eq!(first.total_hours, 3);

        for slot in ["11:00", "12:00"] {
            let cont = grid.cell(Day::Tue, t(slot)).unwrap();
            assert!(!cont.first_hour);
            assert_eq!(cont.total_hours, 0);
            assert_eq!(cont.booking.id, b.id);
        }
        assert!(grid.cell(Day::Tue, t("13:00")).is_none());
        assert!(grid.cell(Day::Tue, t("09:00")).is_none());
        assert_eq!(grid.rows().filter(|(_, _, c)| c.first_hour).count(), 1);
        assert!(grid.conflicts().is_empty());
    }

    #[test]
    fn every_in_window_booking_has_one_head_and_tail_of_continuations() {
        for start in 0..SLOT_COUNT {
            for end in (start + 1)..=SLOT_COUNT {
                let end_time = ClockTime::on_the_hour(OPENING_HOUR + end as u8);
                let b = recurring(1, &TIME_SLOTS[start].to_string(), Some(&end_time.to_string()));
                let grid = build_weekly_grid([&b]);
                let rows: Vec<_> = grid.rows().collect();
                assert_eq!(rows.len(), end - start);
                assert!(rows[0].2.first_hour);
                assert_eq!(rows[0].1, TIME_SLOTS[start]);
                assert_eq!(rows[0].2.total_hours as usize, end - start);
                assert!(rows[1..].iter().all(|(_, _, c)| !c.first_hour && c.total_hours == 0));
            }
        }
    }

    #[test]
    fn missing_end_is_one_hour() {
        let b = recurring(5, "15:00", None);
        let grid = build_weekly_grid([&b]);
        let cell = grid.cell(Day::Fri, t("15:00")).unwrap();
        assert_eq!(cell.total_hours, 1);
        assert!(grid.cell(Day::Fri, t("16:00")).is_none());
    }

    #[test]
    fn end_outside_slot_set_defaults_to_one_hour() {
        let b = recurring(1, "09:00", Some("19:00"));
        let grid = build_weekly_grid([&b]);
        assert_eq!(grid.cell(Day::Mon, t("09:00")).unwrap().total_hours, 1);
        assert_eq!(grid.rows().count(), 1);
    }

    #[test]
    fn end_at_closing_time_reaches_last_slot() {
        let b = recurring(6, "16:00", Some("18:00"));
        let grid = build_weekly_grid([&b]);
        assert_eq!(grid.cell(Day::Sat, t("16:00")).unwrap().total_hours, 2);
        assert!(grid.cell(Day::Sat, t("17:00")).is_some());
    }

    #[test]
    fn inverted_end_still_writes_one_cell() {
        let b = recurring(3, "12:00", Some("10:00"));
        let grid = build_weekly_grid([&b]);
        assert_eq!(grid.cell(Day::Wed, t("12:00")).unwrap().total_hours, 1);
        assert_eq!(grid.rows().count(), 1);
    }

    #[test]
    fn sunday_and_off_slot_starts_are_dropped() {
        let sunday = recurring(7, "10:00", Some("11:00"));
        let half_past = recurring(1, "10:30", Some("11:30"));
        let early = recurring(1, "07:00", Some("09:00"));
        let grid = build_weekly_grid([&sunday, &half_past, &early]);
        assert!(grid.is_empty());
        assert!(grid.conflicts().is_empty());
    }

    #[test]
    fn later_booking_wins_and_conflict_is_recorded() {
        let first = recurring(4, "10:00", Some("12:00"));
        let second = recurring(4, "11:00", Some("12:00"));
        let grid = build_weekly_grid([&first, &second]);

        let head = grid.cell(Day::Thu, t("10:00")).unwrap();
        assert_eq!(head.booking.id, first.id);
        let contested = grid.cell(Day::Thu, t("11:00")).unwrap();
        assert_eq!(contested.booking.id, second.id);
        assert!(contested.first_hour);

        assert_eq!(
            grid.conflicts(),
            &[GridConflict {
                day: Day::Thu,
                slot: t("11:00"),
                kept: second.id,
                displaced: first.id,
            }]
        );
    }

    #[test]
    fn dated_booking_lands_on_its_weekday() {
        let b = Booking {
            id: Ulid::new(),
            location_id: Ulid::nil(),
            title: "Workshop".into(),
            organizer: "Robotics club".into(),
            // Wednesday
            when: BookingDate::Dated(parse_date("2026-10-21").unwrap()),
            start: t("14:00"),
            end: Some(t("16:00")),
        };
        let grid = build_weekly_grid([&b]);
        assert_eq!(grid.cell(Day::Wed, t("14:00")).unwrap().total_hours, 2);
    }

    #[test]
    fn rows_are_day_major() {
        let a = recurring(2, "08:00", None);
        let b = recurring(1, "17:00", None);
        let grid = build_weekly_grid([&a, &b]);
        let order: Vec<_> = grid.rows().map(|(d, s, _)| (d, s)).collect();
        assert_eq!(order, vec![(Day::Mon, t("17:00")), (Day::Tue, t("08:00"))]);
    }
}
