use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// A recurring weekly class slot.
///
/// The concrete dates a class meets on are never stored; they are expanded
/// on demand from this schedule (see `attendance::calendar`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSchedule {
    pub class_id: String,
    pub name: String,
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
}

impl ClassSchedule {
    pub fn validate(&self) -> Result<()> {
        if self.first_date > self.last_date {
            bail!(
                "class {} has first_date {} after last_date {}",
                self.class_id,
                self.first_date,
                self.last_date
            );
        }
        if self.start_time >= self.end_time {
            bail!(
                "class {} has start_time {} at or after end_time {}",
                self.class_id,
                self.start_time,
                self.end_time
            );
        }
        Ok(())
    }
}
