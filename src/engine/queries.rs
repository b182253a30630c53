use chrono::NaiveDate;
use ulid::Ulid;

use crate::grid::{build_weekly_grid, WeeklyGrid};
use crate::model::*;
use crate::picker::SlotBoard;

use super::{Engine, EngineError};

impl Engine {
    /// Dated bookings on `date` plus recurring bookings on its weekday.
    /// Unknown locations read as empty.
    pub async fn fetch_bookings_for_day(
        &self,
        date: NaiveDate,
        location_id: Ulid,
    ) -> Result<Vec<Booking>, EngineError> {
        let ls = match self.get_location(&location_id) {
            Some(ls) => ls,
            None => return Ok(vec![]),
        };
        let guard = ls.read().await;
        Ok(guard.on_date(date).cloned().collect())
    }

    /// Everything the weekly grid shows: all recurring bookings, plus dated
    /// bookings inside the Monday-started week of `week_of` when given.
    /// Locations are visited in id order, bookings in creation order.
    pub async fn fetch_all_bookings_for_grid(
        &self,
        location_id: Option<Ulid>,
        week_of: Option<NaiveDate>,
    ) -> Result<Vec<Booking>, EngineError> {
        let mut location_ids: Vec<Ulid> = match location_id {
            Some(id) => vec![id],
            None => self.state.iter().map(|e| *e.key()).collect(),
        };
        location_ids.sort();

        let week = week_of.map(|d| {
            let monday = week_start(d);
            (monday, monday + chrono::Duration::days(7))
        });

        let mut out = Vec::new();
        for id in location_ids {
            let Some(ls) = self.get_location(&id) else { continue };
            let guard = ls.read().await;
            out.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| match (b.when, week) {
                        (BookingDate::Recurring(_), _) => true,
                        (BookingDate::Dated(d), Some((from, to))) => d >= from && d < to,
                        (BookingDate::Dated(_), None) => false,
                    })
                    .cloned(),
            );
        }
        Ok(out)
    }

    pub async fn weekly_grid(
        &self,
        location_id: Option<Ulid>,
        week_of: Option<NaiveDate>,
    ) -> Result<WeeklyGrid, EngineError> {
        let bookings = self.fetch_all_bookings_for_grid(location_id, week_of).await?;
        Ok(build_weekly_grid(&bookings))
    }

    pub async fn slot_board(&self, date: NaiveDate, location_id: Ulid) -> Result<SlotBoard, EngineError> {
        let bookings = self.fetch_bookings_for_day(date, location_id).await?;
        Ok(SlotBoard::for_day(date, &bookings))
    }

    pub async fn list_locations(&self) -> Vec<LocationInfo> {
        let locations: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(locations.len());
        for ls in locations {
            let guard = ls.read().await;
            out.push(LocationInfo {
                id: guard.id,
                name: guard.name.clone(),
                booking_count: guard.bookings.len(),
            });
        }
        out.sort_by_key(|l| l.id);
        out
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let location_id = self.get_location_for_booking(&id)?;
        let ls = self.get_location(&location_id)?;
        let guard = ls.read().await;
        guard.booking(id).cloned()
    }
}
