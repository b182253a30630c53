//! Hourly slot board for one day and the two-click range selector that
//! runs on top of it.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotOccupant {
    pub booking_id: Ulid,
    pub title: String,
}

/// Free/booked state of the ten slots on one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotBoard {
    date: NaiveDate,
    slots: [Option<SlotOccupant>; SLOT_COUNT],
}

impl SlotBoard {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            slots: std::array::from_fn(|_| None),
        }
    }

    /// A slot is booked when `slot_start < booking_end && slot_end > booking_start`.
    pub fn for_day<'a>(date: NaiveDate, bookings: impl IntoIterator<Item = &'a Booking>) -> Self {
        let mut board = Self::empty(date);
        for booking in bookings {
            if !booking.when.occurs_on(date) {
                continue;
            }
            let (start, end) = booking.minute_range();
            for (i, slot) in TIME_SLOTS.iter().enumerate() {
                let slot_start = slot.minutes();
                let slot_end = slot_start + 60;
                if slot_start < end && slot_end > start && board.slots[i].is_none() {
                    board.slots[i] = Some(SlotOccupant {
                        booking_id: booking.id,
                        title: booking.title.clone(),
                    });
                }
            }
        }
        board
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn is_booked(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(Option::is_some)
    }

    pub fn any_booked(&self, from: usize, to: usize) -> bool {
        (from.min(to)..=from.max(to)).any(|i| self.is_booked(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClockTime, Option<&SlotOccupant>)> {
        TIME_SLOTS.iter().copied().zip(self.slots.iter().map(Option::as_ref))
    }

    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }
}

/// In-progress selection. Slots are indices into [`TIME_SLOTS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    Empty,
    AnchorSet(usize),
    RangeConfirmed { start: usize, end: usize },
}

impl Selection {
    pub fn label(&self) -> &'static str {
        match self {
            Selection::Empty => "empty",
            Selection::AnchorSet(_) => "anchor_set",
            Selection::RangeConfirmed { .. } => "range_confirmed",
        }
    }

    /// Selected slot range, inclusive.
    pub fn bounds(&self) -> Option<(usize, usize)> {
        match *self {
            Selection::Empty => None,
            Selection::AnchorSet(a) => Some((a, a)),
            Selection::RangeConfirmed { start, end } => Some((start, end)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Booked slot; nothing changed.
    Ignored,
    Anchored,
    RangeConfirmed,
    /// A booked slot lies between the two clicks; selection was reset.
    Conflict,
}

impl ClickOutcome {
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            ClickOutcome::Conflict => Some("conflict detected: choose a different range"),
            ClickOutcome::Ignored | ClickOutcome::Anchored | ClickOutcome::RangeConfirmed => None,
        }
    }
}

/// What a confirmed selection hands to the booking form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PickedRange {
    pub start: ClockTime,
    pub end: ClockTime,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PickError {
    #[error("no date selected")]
    NoDate,
    #[error("no slot selected")]
    NoSelection,
    #[error("{0} is not a bookable slot")]
    NotASlot(ClockTime),
}

#[derive(Debug, Clone, Default)]
pub struct Picker {
    location_id: Option<Ulid>,
    board: Option<SlotBoard>,
    selection: Selection,
}

impl Picker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the board for a new date. Any selection is dropped.
    pub fn select_date(&mut self, location_id: Ulid, board: SlotBoard) {
        self.location_id = Some(location_id);
        self.board = Some(board);
        self.selection = Selection::Empty;
    }

    pub fn location_id(&self) -> Option<Ulid> {
        self.location_id
    }

    pub fn board(&self) -> Option<&SlotBoard> {
        self.board.as_ref()
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn click(&mut self, slot: ClockTime) -> Result<ClickOutcome, PickError> {
        let board = self.board.as_ref().ok_or(PickError::NoDate)?;
        let index = slot.slot_index().ok_or(PickError::NotASlot(slot))?;
        if board.is_booked(index) {
            return Ok(ClickOutcome::Ignored);
        }

        let (next, outcome) = match self.selection {
            Selection::Empty | Selection::RangeConfirmed { .. } => {
                (Selection::AnchorSet(index), ClickOutcome::Anchored)
            }
            Selection::AnchorSet(anchor) if board.any_booked(anchor, index) => {
                (Selection::Empty, ClickOutcome::Conflict)
            }
            Selection::AnchorSet(anchor) => (
                Selection::RangeConfirmed {
                    start: anchor.min(index),
                    end: anchor.max(index),
                },
                ClickOutcome::RangeConfirmed,
            ),
        };
        self.selection = next;
        Ok(outcome)
    }

    /// Emit the selected range and reset. The end is one hour past the
    /// later selected slot.
    pub fn confirm(&mut self) -> Result<PickedRange, PickError> {
        let board = self.board.as_ref().ok_or(PickError::NoDate)?;
        let (start, end) = self.selection.bounds().ok_or(PickError::NoSelection)?;
        let last = TIME_SLOTS[end];
        let picked = PickedRange {
            start: TIME_SLOTS[start],
            end: last.plus_hours(1).ok_or(PickError::NotASlot(last))?,
            date: board.date(),
        };
        self.selection = Selection::Empty;
        Ok(picked)
    }

    pub fn clear(&mut self) {
        self.selection = Selection::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> ClockTime {
        s.parse().unwrap()
    }

    fn day() -> NaiveDate {
        parse_date("2026-10-20").unwrap()
    }

    fn dated(start: &str, end: Option<&str>) -> Booking {
        Booking {
            id: Ulid::new(),
            location_id: Ulid::nil(),
            title: "Taken".into(),
            organizer: "Someone".into(),
            when: BookingDate::Dated(day()),
            start: t(start),
            end: end.map(t),
        }
    }

    fn picker_with(bookings: &[Booking]) -> Picker {
        let mut p = Picker::new();
        p.select_date(Ulid::nil(), SlotBoard::for_day(day(), bookings));
        p
    }

    #[test]
    fn board_marks_overlapping_slots() {
        let bookings = [dated("10:30", Some("12:00")), dated("15:00", None)];
        let board = SlotBoard::for_day(day(), &bookings);
        let booked: Vec<_> = board
            .iter()
            .filter(|(_, occ)| occ.is_some())
            .map(|(slot, _)| slot.to_string())
            .collect();
        assert_eq!(booked, vec!["10:00", "11:00", "15:00"]);
        assert_eq!(board.free_count(), 7);
    }

    #[test]
    fn board_applies_recurring_on_matching_weekday_only() {
        let mut tuesday = dated("08:00", Some("09:00"));
        tuesday.when = BookingDate::Recurring(Day::Tue);
        let mut monday = dated("09:00", Some("10:00"));
        monday.when = BookingDate::Recurring(Day::Mon);
        let mut other_date = dated("13:00", None);
        other_date.when = BookingDate::Dated(parse_date("2026-10-27").unwrap());

        let board = SlotBoard::for_day(day(), [&tuesday, &monday, &other_date]);
        assert!(board.is_booked(0));
        assert!(!board.is_booked(1));
        assert!(!board.is_booked(5));
    }

    #[test]
    fn two_free_clicks_confirm_a_range() {
        let mut p = picker_with(&[]);
        assert_eq!(p.click(t("10:00")), Ok(ClickOutcome::Anchored));
        assert_eq!(p.click(t("12:00")), Ok(ClickOutcome::RangeConfirmed));
        assert_eq!(p.selection(), Selection::RangeConfirmed { start: 2, end: 4 });

        let picked = p.confirm().unwrap();
        assert_eq!(picked.start, t("10:00"));
        assert_eq!(picked.end, t("13:00"));
        assert_eq!(picked.date, day());
        assert_eq!(p.selection(), Selection::Empty);
    }

    #[test]
    fn reversed_clicks_are_normalized() {
        let mut p = picker_with(&[]);
        p.click(t("15:00")).unwrap();
        p.click(t("13:00")).unwrap();
        assert_eq!(p.selection(), Selection::RangeConfirmed { start: 5, end: 7 });
    }

    #[test]
    fn booked_slot_between_clicks_resets_selection() {
        let mut p = picker_with(&[dated("11:00", Some("12:00"))]);
        p.click(t("10:00")).unwrap();
        assert_eq!(p.click(t("12:00")), Ok(ClickOutcome::Conflict));
        assert_eq!(p.selection(), Selection::Empty);
        assert_eq!(p.confirm(), Err(PickError::NoSelection));
    }

    #[test]
    fn single_slot_confirms_as_one_hour() {
        let mut p = picker_with(&[]);
        p.click(t("14:00")).unwrap();
        let picked = p.confirm().unwrap();
        assert_eq!((picked.start, picked.end), (t("14:00"), t("15:00")));
    }

    #[test]
    fn last_slot_ends_at_closing() {
        let mut p = picker_with(&[]);
        p.click(t("17:00")).unwrap();
        assert_eq!(p.confirm().unwrap().end, t("18:00"));
    }

    #[test]
    fn confirm_without_selection_is_rejected() {
        let mut p = picker_with(&[]);
        assert_eq!(p.confirm(), Err(PickError::NoSelection));
    }

    #[test]
    fn no_date_rejects_clicks_and_confirm() {
        let mut p = Picker::new();
        assert_eq!(p.click(t("10:00")), Err(PickError::NoDate));
        assert_eq!(p.confirm(), Err(PickError::NoDate));
        assert_eq!(p.selection(), Selection::Empty);
    }

    #[test]
    fn booked_slot_click_never_changes_state() {
        let mut p = picker_with(&[dated("09:00", None)]);
        assert_eq!(p.click(t("09:00")), Ok(ClickOutcome::Ignored));
        assert_eq!(p.selection(), Selection::Empty);

        p.click(t("11:00")).unwrap();
        assert_eq!(p.click(t("09:00")), Ok(ClickOutcome::Ignored));
        assert_eq!(p.selection(), Selection::AnchorSet(3));

        p.click(t("12:00")).unwrap();
        let before = p.selection();
        assert_eq!(p.click(t("09:00")), Ok(ClickOutcome::Ignored));
        assert_eq!(p.selection(), before);
        assert_eq!(ClickOutcome::Ignored.notice(), None);
    }

    #[test]
    fn click_after_confirmed_range_starts_over() {
        let mut p = picker_with(&[]);
        p.click(t("08:00")).unwrap();
        p.click(t("09:00")).unwrap();
        assert_eq!(p.click(t("16:00")), Ok(ClickOutcome::Anchored));
        assert_eq!(p.selection(), Selection::AnchorSet(8));
    }

    #[test]
    fn non_slot_time_is_rejected() {
        let mut p = picker_with(&[]);
        assert_eq!(p.click(t("18:00")), Err(PickError::NotASlot(t("18:00"))));
        assert_eq!(p.click(t("10:30")), Err(PickError::NotASlot(t("10:30"))));
    }

    #[test]
    fn clear_and_new_date_drop_selection() {
        let mut p = picker_with(&[]);
        p.click(t("10:00")).unwrap();
        p.clear();
        assert_eq!(p.selection(), Selection::Empty);

        p.click(t("10:00")).unwrap();
        p.select_date(Ulid::nil(), SlotBoard::empty(parse_date("2026-10-21").unwrap()));
        assert_eq!(p.selection(), Selection::Empty);
    }

    #[test]
    fn picked_range_json_shape() {
        let picked = PickedRange {
            start: t("14:00"),
            end: t("15:00"),
            date: day(),
        };
        assert_eq!(
            serde_json::to_value(picked).unwrap(),
            serde_json::json!({"start": "14:00", "end": "15:00", "date": "2026-10-20"})
        );
    }
}
