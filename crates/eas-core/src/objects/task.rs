//! Task model (Tasks + AirSyncBase pages).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codepage::ns;
use crate::error::{CoreError, CoreResult};
use crate::model::TaggedNode;

use super::event::{Recurrence, Sensitivity};
use super::{
    application_data, bool_text, datetime, push_body, push_categories, push_opt, read_body,
    read_bool, read_categories, read_number, read_opt,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
}

impl Importance {
    pub fn code(&self) -> u8 {
        match self {
            Importance::Low => 0,
            Importance::Normal => 1,
            Importance::High => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Importance::Low),
            1 => Some(Importance::Normal),
            2 => Some(Importance::High),
            _ => None,
        }
    }
}

/// A to-do item. Dates are UTC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskObject {
    pub subject: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub due: Option<DateTime<Utc>>,
    pub complete: bool,
    pub date_completed: Option<DateTime<Utc>>,
    pub importance: Importance,
    pub sensitivity: Sensitivity,
    pub reminder: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    pub categories: Vec<String>,
    pub notes: Option<String>,
}

impl TaskObject {
    pub fn to_application_data(&self) -> TaggedNode {
        let mut data = application_data();
        let t = ns::TASKS;
        let extended = datetime::format_extended;

        push_body(&mut data, &self.notes);
        push_categories(&mut data, t, &self.categories);
        data.push_text_ns(t, "Complete", bool_text(self.complete));
        if let Some(done) = &self.date_completed {
            data.push_text_ns(t, "DateCompleted", extended(done));
        }
        if let Some(due) = &self.due {
            data.push_text_ns(t, "DueDate", extended(due));
            data.push_text_ns(t, "UtcDueDate", extended(due));
        }
        data.push_text_ns(t, "Importance", self.importance.code().to_string());
        if let Some(recurrence) = &self.recurrence {
            let mut node = recurrence.to_node(t, extended);
            // Tasks require the series start alongside the rule.
            if let Some(start) = &self.start {
                node.push_text("Start", extended(start));
            }
            data.push_node("Recurrence", node);
        }
        data.push_text_ns(t, "ReminderSet", bool_text(self.reminder.is_some()));
        if let Some(reminder) = &self.reminder {
            data.push_text_ns(t, "ReminderTime", extended(reminder));
        }
        data.push_text_ns(t, "Sensitivity", self.sensitivity.code().to_string());
        if let Some(start) = &self.start {
            data.push_text_ns(t, "StartDate", extended(start));
            data.push_text_ns(t, "UtcStartDate", extended(start));
        }
        push_opt(&mut data, t, "Subject", &self.subject);
        data
    }

    pub fn from_application_data(data: &TaggedNode) -> CoreResult<Self> {
        // Prefer the UTC variants; fall back to the local ones.
        let time = |tags: &[&str]| -> CoreResult<Option<DateTime<Utc>>> {
            for tag in tags {
                if let Some(value) = data.text(tag) {
                    return datetime::parse(tag, value).map(Some);
                }
            }
            Ok(None)
        };

        let importance = match read_number::<u8>(data, "Importance")? {
            None => Importance::default(),
            Some(code) => Importance::from_code(code)
                .ok_or_else(|| CoreError::invalid("Importance", code.to_string()))?,
        };

        let reminder = match read_bool(data, "ReminderSet")? {
            Some(false) => None,
            _ => time(&["ReminderTime"])?,
        };

        Ok(TaskObject {
            subject: read_opt(data, "Subject"),
            start: time(&["UtcStartDate", "StartDate"])?,
            due: time(&["UtcDueDate", "DueDate"])?,
            complete: read_bool(data, "Complete")?.unwrap_or(false),
            date_completed: time(&["DateCompleted"])?,
            importance,
            sensitivity: Sensitivity::read(data)?,
            reminder,
            recurrence: data.node("Recurrence").map(Recurrence::from_node).transpose()?,
            categories: read_categories(data),
            notes: read_body(data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::RecurrenceType;
    use crate::wbxml;
    use chrono::TimeZone;

    #[test]
    fn test_round_trip_through_wire() {
        let mut monthly = Recurrence::new(RecurrenceType::Monthly);
        monthly.day_of_month = Some(15);
        monthly.occurrences = Some(12);

        let task = TaskObject {
            subject: Some("Pay rent".into()),
            start: Some(Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap()),
            due: Some(Utc.with_ymd_and_hms(2026, 1, 15, 17, 0, 0).unwrap()),
            importance: Importance::High,
            reminder: Some(Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap()),
            recurrence: Some(monthly),
            categories: vec!["Home".into()],
            notes: Some("Transfer from checking".into()),
            ..Default::default()
        };

        let root = TaggedNode::new(ns::AIR_SYNC).with_node("ApplicationData", task.to_application_data());
        let decoded = wbxml::decode(&wbxml::encode(&root).unwrap()).unwrap();
        let parsed = TaskObject::from_application_data(decoded.node("ApplicationData").unwrap()).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_reminder_ignored_when_not_set() {
        let data = TaggedNode::new(ns::TASKS)
            .with_text("ReminderSet", "0")
            .with_text("ReminderTime", "2026-01-01T00:00:00.000Z");
        let task = TaskObject::from_application_data(&data).unwrap();
        assert_eq!(task.reminder, None);
    }

    #[test]
    fn test_completed_task() {
        let done = Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap();
        let task = TaskObject {
            subject: Some("Done".into()),
            complete: true,
            date_completed: Some(done),
            ..Default::default()
        };
        let data = task.to_application_data();
        assert_eq!(data.text("Complete"), Some("1"));
        assert_eq!(TaskObject::from_application_data(&data).unwrap(), task);
    }
}
