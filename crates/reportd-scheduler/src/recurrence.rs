//! Next-run computation for calendar recurrences.
//!
//! All calendar arithmetic happens in a fixed reference offset so that
//! results do not depend on the host timezone. Monthly and quarterly
//! rules clamp the day of month to the last day of shorter months.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc,
};

use reportd_types::{Frequency, Recurrence};

use crate::error::{Result, SchedulerError};

/// Computes next due instants in a fixed reference timezone.
#[derive(Debug, Clone, Copy)]
pub struct RecurrenceCalculator {
    offset: FixedOffset,
}

impl Default for RecurrenceCalculator {
    fn default() -> Self {
        Self::utc()
    }
}

impl RecurrenceCalculator {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// Build from an offset expressed in minutes east of UTC.
    pub fn from_offset_minutes(minutes: i32) -> Result<Self> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(Self::new)
            .ok_or_else(|| {
                SchedulerError::InvalidConfig(format!("utc offset out of range: {minutes} minutes"))
            })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Day of month of `at` in the reference timezone.
    pub fn local_day_of_month(&self, at: DateTime<Utc>) -> u8 {
        at.with_timezone(&self.offset).day() as u8
    }

    /// Month of `at` in the reference timezone.
    pub fn local_month(&self, at: DateTime<Utc>) -> u8 {
        at.with_timezone(&self.offset).month() as u8
    }

    /// Next instant at which `recurrence` is due, strictly after `reference`
    /// except for a weekly rule whose slot later on the same day is still ahead.
    pub fn next_run(
        &self,
        recurrence: &Recurrence,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        validate_recurrence(recurrence)?;

        let local = reference.with_timezone(&self.offset);
        let now = local.naive_local();
        let time = NaiveTime::from_hms_opt(
            u32::from(recurrence.time_of_day.hour),
            u32::from(recurrence.time_of_day.minute),
            0,
        )
        .ok_or_else(|| invalid(format!("time_of_day {}", recurrence.time_of_day)))?;
        let candidate = local.date_naive().and_time(time);

        let next = match recurrence.frequency {
            Frequency::Daily => {
                if candidate <= now {
                    candidate + Duration::days(1)
                } else {
                    candidate
                }
            }
            Frequency::Weekly => {
                let target = i64::from(required(recurrence.day_of_week, "day_of_week")?);
                let weekday = i64::from(candidate.weekday().num_days_from_sunday());
                let delta = (target - weekday + 7) % 7;
                if delta == 0 && candidate <= now {
                    candidate + Duration::days(7)
                } else {
                    candidate + Duration::days(delta)
                }
            }
            Frequency::Monthly => {
                let day = required(recurrence.day_of_month, "day_of_month")?;
                month_step(now, day, time, 0, 1)?
            }
            Frequency::Quarterly => {
                // Jobs are normalized with an anchor day and month at
                // creation; the fallbacks keep older rows schedulable.
                let day = recurrence.day_of_month.unwrap_or(local.day() as u8);
                let lead = recurrence.anchor_month.map_or(0, |anchor| {
                    (i32::from(anchor) - now.month() as i32).rem_euclid(3)
                });
                month_step(now, day, time, lead, 3)?
            }
        };

        next.and_local_timezone(self.offset)
            .single()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| invalid(format!("no instant for {next}")))
    }
}

/// Next run in UTC, the default reference timezone.
pub fn compute_next_run(
    recurrence: &Recurrence,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    RecurrenceCalculator::utc().next_run(recurrence, reference)
}

/// Check the range invariants of a recurrence.
///
/// Out-of-range `day_of_week`/`day_of_month` values are rejected even when
/// the frequency ignores them.
pub fn validate_recurrence(recurrence: &Recurrence) -> Result<()> {
    if !recurrence.time_of_day.is_valid() {
        return Err(invalid(format!(
            "time_of_day {} out of range",
            recurrence.time_of_day
        )));
    }
    if let Some(dow) = recurrence.day_of_week {
        if dow > 6 {
            return Err(invalid(format!("day_of_week {dow} not in 0..=6")));
        }
    }
    if let Some(dom) = recurrence.day_of_month {
        if !(1..=31).contains(&dom) {
            return Err(invalid(format!("day_of_month {dom} not in 1..=31")));
        }
    }
    if let Some(month) = recurrence.anchor_month {
        if !(1..=12).contains(&month) {
            return Err(invalid(format!("anchor_month {month} not in 1..=12")));
        }
    }
    match recurrence.frequency {
        Frequency::Weekly => {
            required(recurrence.day_of_week, "day_of_week")?;
        }
        Frequency::Monthly => {
            required(recurrence.day_of_month, "day_of_month")?;
        }
        Frequency::Daily | Frequency::Quarterly => {}
    }
    Ok(())
}

/// Candidate `lead` months after the current one at `day` (clamped); if it
/// is not in the future, the same day `step` months later (clamped again).
fn month_step(
    now: NaiveDateTime,
    day: u8,
    time: NaiveTime,
    lead: i32,
    step: i32,
) -> Result<NaiveDateTime> {
    let (year, month) = add_months(now.year(), now.month(), lead);
    let candidate = clamped_date(year, month, day)?.and_time(time);
    if candidate > now {
        return Ok(candidate);
    }
    let (year, month) = add_months(year, month, step);
    Ok(clamped_date(year, month, day)?.and_time(time))
}

fn clamped_date(year: i32, month: u32, day: u8) -> Result<NaiveDate> {
    let day = u32::from(day).min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| invalid(format!("no date {year}-{month:02}-{day:02}")))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = add_months(year, month, 1);
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(28, |last| last.day())
}

fn add_months(year: i32, month: u32, months: i32) -> (i32, u32) {
    let index = year * 12 + (month as i32 - 1) + months;
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

fn required(value: Option<u8>, field: &str) -> Result<u8> {
    value.ok_or_else(|| invalid(format!("{field} is required for this frequency")))
}

fn invalid(msg: String) -> SchedulerError {
    SchedulerError::InvalidRecurrence(msg)
}
