//! Usage accounting sink and an in-memory daily ledger

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use chrono::{Datelike, Days, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use log::trace;

/// Receives token counts once per completed call
pub trait UsageSink: Send + Sync
{   fn record(&self, input_tokens: u64, output_tokens: u64);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUsageSink;

impl UsageSink for NoopUsageSink
{   fn record(&self, _input_tokens: u64, _output_tokens: u64) {}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals
{   pub input_tokens: u64
  , pub output_tokens: u64
  , pub request_count: u64
}

impl std::ops::AddAssign for UsageTotals
{   fn add_assign(&mut self, other: Self)
    {   self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.request_count += other.request_count;
    }
}

/// Per-day totals keyed by local date
#[derive(Debug, Default)]
pub struct MemoryUsageSink
{   days: Mutex<BTreeMap<NaiveDate, UsageTotals>>
}

impl MemoryUsageSink
{   pub fn new() -> Self
    {   Self::default()
    }

    /// Add one request's usage to the bucket for `date`
    pub fn record_on(
      &self
    , date: NaiveDate
    , input_tokens: u64
    , output_tokens: u64
    )
    {   trace!(
          "Usage on {}: {} in / {} out",
          date, input_tokens, output_tokens
        );
        let mut days = self.days
          .lock()
          .unwrap_or_else(PoisonError::into_inner);
        *days.entry(date).or_default() += UsageTotals
        {   input_tokens
          , output_tokens
          , request_count: 1
        };
    }

    /// Sum of every bucket from `start` onward
    pub fn since(&self, start: NaiveDate) -> UsageTotals
    {   let days = self.days
          .lock()
          .unwrap_or_else(PoisonError::into_inner);
        let mut total = UsageTotals::default();
        for (_, day) in days.range(start..)
        {   total += *day;
        }
        total
    }

    pub fn on(&self, date: NaiveDate) -> UsageTotals
    {   let days = self.days
          .lock()
          .unwrap_or_else(PoisonError::into_inner);
        days.get(&date).copied().unwrap_or_default()
    }

    pub fn today(&self) -> UsageTotals
    {   self.on(Local::now().date_naive())
    }

    /// Since Monday of the current week
    pub fn week(&self) -> UsageTotals
    {   let today = Local::now().date_naive();
        self.since(week_start(today))
    }

    pub fn month(&self) -> UsageTotals
    {   let today = Local::now().date_naive();
        let first = today.with_day(1).unwrap_or(today);
        self.since(first)
    }
}

fn week_start(date: NaiveDate) -> NaiveDate
{   let back = u64::from(date.weekday().num_days_from_monday());
    date.checked_sub_days(Days::new(back)).unwrap_or(date)
}

impl UsageSink for MemoryUsageSink
{   fn record(&self, input_tokens: u64, output_tokens: u64)
    {   self.record_on(Local::now().date_naive(), input_tokens, output_tokens);
    }
}
