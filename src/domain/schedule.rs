//! Collection due-date computation.
//!
//! Every due date is the last second (23:59:59) of some calendar day in the
//! anchor's own time zone.

use super::group::Cycle;
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, TimeZone};

/// Computes when the next collection falls due for `cycle`, counted from `anchor`.
///
/// - daily: end of the anchor's day.
/// - weekly: end of the coming Sunday; an anchor on a Sunday rolls to the next one.
/// - monthly: end of the last day of the month after the anchor's month.
/// - yearly: end of December 31 of the anchor's year.
///
/// Returns `None` only when the result falls outside chrono's calendar range.
pub fn next_due_date<Tz: TimeZone>(cycle: Cycle, anchor: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let day = anchor.date_naive();
    let due = match cycle {
        Cycle::Daily => day,
        Cycle::Weekly => {
            let ahead = 7 - u64::from(day.weekday().num_days_from_sunday());
            day.checked_add_days(Days::new(ahead))?
        }
        Cycle::Monthly => day
            .with_day(1)?
            .checked_add_months(Months::new(2))?
            .pred_opt()?,
        Cycle::Yearly => NaiveDate::from_ymd_opt(day.year(), 12, 31)?,
    };
    end_of_day(&anchor.timezone(), due)
}

fn end_of_day<Tz: TimeZone>(tz: &Tz, day: NaiveDate) -> Option<DateTime<Tz>> {
    let local = day.and_hms_opt(23, 59, 59)?;
    // A zone transition can make 23:59:59 ambiguous or skip it entirely.
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| Some(tz.from_utc_datetime(&local)))
}
