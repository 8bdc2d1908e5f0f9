//! Calendar event model (Calendar + AirSyncBase pages).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codepage::ns;
use crate::error::{CoreError, CoreResult};
use crate::model::TaggedNode;

use super::{
    application_data, bool_text, datetime, push_body, push_categories, push_opt, read_body,
    read_bool, read_categories, read_number, read_opt,
};

/// Size of the binary TIME_ZONE_INFORMATION blob carried in `TimeZone`.
const TIME_ZONE_BLOB_LEN: usize = 172;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyStatus {
    Free,
    Tentative,
    #[default]
    Busy,
    OutOfOffice,
    WorkingElsewhere,
}

impl BusyStatus {
    pub fn code(&self) -> u8 {
        match self {
            BusyStatus::Free => 0,
            BusyStatus::Tentative => 1,
            BusyStatus::Busy => 2,
            BusyStatus::OutOfOffice => 3,
            BusyStatus::WorkingElsewhere => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(BusyStatus::Free),
            1 => Some(BusyStatus::Tentative),
            2 => Some(BusyStatus::Busy),
            3 => Some(BusyStatus::OutOfOffice),
            4 => Some(BusyStatus::WorkingElsewhere),
            _ => None,
        }
    }
}

/// Shared by events and tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    #[default]
    Normal,
    Personal,
    Private,
    Confidential,
}

impl Sensitivity {
    pub fn code(&self) -> u8 {
        match self {
            Sensitivity::Normal => 0,
            Sensitivity::Personal => 1,
            Sensitivity::Private => 2,
            Sensitivity::Confidential => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Sensitivity::Normal),
            1 => Some(Sensitivity::Personal),
            2 => Some(Sensitivity::Private),
            3 => Some(Sensitivity::Confidential),
            _ => None,
        }
    }

    pub(crate) fn read(data: &TaggedNode) -> CoreResult<Self> {
        match read_number::<u8>(data, "Sensitivity")? {
            None => Ok(Sensitivity::Normal),
            Some(code) => Sensitivity::from_code(code)
                .ok_or_else(|| CoreError::invalid("Sensitivity", code.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    pub name: Option<String>,
    /// 0 unknown, 2 tentative, 3 accept, 4 decline, 5 not responded.
    pub status: Option<u8>,
    /// 1 required, 2 optional, 3 resource.
    pub attendee_type: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceType {
    Daily,
    Weekly,
    Monthly,
    MonthlyByWeekday,
    Yearly,
    YearlyByWeekday,
}

impl RecurrenceType {
    pub fn code(&self) -> u8 {
        match self {
            RecurrenceType::Daily => 0,
            RecurrenceType::Weekly => 1,
            RecurrenceType::Monthly => 2,
            RecurrenceType::MonthlyByWeekday => 3,
            RecurrenceType::Yearly => 5,
            RecurrenceType::YearlyByWeekday => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RecurrenceType::Daily),
            1 => Some(RecurrenceType::Weekly),
            2 => Some(RecurrenceType::Monthly),
            3 => Some(RecurrenceType::MonthlyByWeekday),
            5 => Some(RecurrenceType::Yearly),
            6 => Some(RecurrenceType::YearlyByWeekday),
            _ => None,
        }
    }
}

/// Recurrence rule. Same element names on the Calendar and Tasks pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub frequency: RecurrenceType,
    pub interval: Option<u32>,
    pub until: Option<DateTime<Utc>>,
    pub occurrences: Option<u32>,
    /// Bitmask: Sunday = 1 ... Saturday = 64.
    pub day_of_week: Option<u32>,
    pub day_of_month: Option<u32>,
    pub week_of_month: Option<u32>,
    pub month_of_year: Option<u32>,
}

impl Recurrence {
    pub fn new(frequency: RecurrenceType) -> Self {
        Self {
            frequency,
            interval: None,
            until: None,
            occurrences: None,
            day_of_week: None,
            day_of_month: None,
            week_of_month: None,
            month_of_year: None,
        }
    }

    /// `until` is written with `format` (compact for Calendar, extended for Tasks).
    pub(crate) fn to_node(
        &self,
        namespace: &str,
        format: fn(&DateTime<Utc>) -> String,
    ) -> TaggedNode {
        let mut node = TaggedNode::new(namespace);
        node.push_text("Type", self.frequency.code().to_string());
        if let Some(until) = &self.until {
            node.push_text("Until", format(until));
        }
        let numbers = [
            ("Occurrences", self.occurrences),
            ("Interval", self.interval),
            ("DayOfWeek", self.day_of_week),
            ("DayOfMonth", self.day_of_month),
            ("WeekOfMonth", self.week_of_month),
            ("MonthOfYear", self.month_of_year),
        ];
        for (tag, value) in numbers {
            if let Some(v) = value {
                node.push_text(tag, v.to_string());
            }
        }
        node
    }

    pub(crate) fn from_node(node: &TaggedNode) -> CoreResult<Self> {
        let code = read_number::<u8>(node, "Type")?
            .ok_or_else(|| CoreError::MissingField("Recurrence/Type".into()))?;
        let frequency = RecurrenceType::from_code(code)
            .ok_or_else(|| CoreError::invalid("Recurrence/Type", code.to_string()))?;
        Ok(Self {
            frequency,
            interval: read_number(node, "Interval")?,
            until: node
                .text("Until")
                .map(|v| datetime::parse("Until", v))
                .transpose()?,
            occurrences: read_number(node, "Occurrences")?,
            day_of_week: read_number(node, "DayOfWeek")?,
            day_of_month: read_number(node, "DayOfMonth")?,
            week_of_month: read_number(node, "WeekOfMonth")?,
            month_of_year: read_number(node, "MonthOfYear")?,
        })
    }
}

/// A calendar event. Times are UTC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventObject {
    pub uid: Option<String>,
    pub subject: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub busy_status: BusyStatus,
    pub sensitivity: Sensitivity,
    /// Minutes before start.
    pub reminder: Option<u32>,
    pub organizer_name: Option<String>,
    pub organizer_email: Option<String>,
    pub attendees: Vec<Attendee>,
    pub recurrence: Option<Recurrence>,
    pub categories: Vec<String>,
    pub notes: Option<String>,
    pub dtstamp: Option<DateTime<Utc>>,
}

impl EventObject {
    pub fn to_application_data(&self) -> TaggedNode {
        let mut data = application_data();
        let cal = ns::CALENDAR;

        // Times are always sent in UTC, so the zone blob is all zeroes.
        data.push_text_ns(cal, "TimeZone", STANDARD.encode([0u8; TIME_ZONE_BLOB_LEN]));
        data.push_text_ns(cal, "AllDayEvent", bool_text(self.all_day));
        push_body(&mut data, &self.notes);
        data.push_text_ns(cal, "BusyStatus", self.busy_status.code().to_string());
        push_opt(&mut data, cal, "OrganizerName", &self.organizer_name);
        push_opt(&mut data, cal, "OrganizerEmail", &self.organizer_email);
        if let Some(stamp) = &self.dtstamp {
            data.push_text_ns(cal, "DtStamp", datetime::format_compact(stamp));
        }
        if let Some(end) = &self.end {
            data.push_text_ns(cal, "EndTime", datetime::format_compact(end));
        }
        push_opt(&mut data, cal, "Location", &self.location);
        if let Some(minutes) = self.reminder {
            data.push_text_ns(cal, "Reminder", minutes.to_string());
        }
        data.push_text_ns(cal, "Sensitivity", self.sensitivity.code().to_string());
        push_opt(&mut data, cal, "Subject", &self.subject);
        if let Some(start) = &self.start {
            data.push_text_ns(cal, "StartTime", datetime::format_compact(start));
        }
        push_opt(&mut data, cal, "UID", &self.uid);

        if !self.attendees.is_empty() {
            let mut attendees = TaggedNode::new(cal);
            for attendee in &self.attendees {
                let mut node = TaggedNode::new(cal);
                node.push_text("Email", attendee.email.as_str());
                node.push_text("Name", attendee.name.clone().unwrap_or_default());
                if let Some(status) = attendee.status {
                    node.push_text("AttendeeStatus", status.to_string());
                }
                if let Some(kind) = attendee.attendee_type {
                    node.push_text("AttendeeType", kind.to_string());
                }
                attendees.push_node("Attendee", node);
            }
            data.push_node("Attendees", attendees);
        }

        if let Some(recurrence) = &self.recurrence {
            data.push_node("Recurrence", recurrence.to_node(cal, datetime::format_compact));
        }
        push_categories(&mut data, cal, &self.categories);
        data
    }

    pub fn from_application_data(data: &TaggedNode) -> CoreResult<Self> {
        let time = |tag: &str| -> CoreResult<Option<DateTime<Utc>>> {
            data.text(tag).map(|v| datetime::parse(tag, v)).transpose()
        };

        let busy_status = match read_number::<u8>(data, "BusyStatus")? {
            None => BusyStatus::default(),
            Some(code) => BusyStatus::from_code(code)
                .ok_or_else(|| CoreError::invalid("BusyStatus", code.to_string()))?,
        };

        let mut attendees = Vec::new();
        if let Some(list) = data.node("Attendees") {
            for node in list.nodes("Attendee") {
                let email = node
                    .text("Email")
                    .ok_or_else(|| CoreError::MissingField("Attendee/Email".into()))?;
                attendees.push(Attendee {
                    email: email.to_string(),
                    name: node.text("Name").filter(|n| !n.is_empty()).map(str::to_string),
                    status: read_number(node, "AttendeeStatus")?,
                    attendee_type: read_number(node, "AttendeeType")?,
                });
            }
        }

        Ok(EventObject {
            uid: read_opt(data, "UID"),
            subject: read_opt(data, "Subject"),
            location: read_opt(data, "Location"),
            start: time("StartTime")?,
            end: time("EndTime")?,
            all_day: read_bool(data, "AllDayEvent")?.unwrap_or(false),
            busy_status,
            sensitivity: Sensitivity::read(data)?,
            reminder: read_number(data, "Reminder")?,
            organizer_name: read_opt(data, "OrganizerName"),
            organizer_email: read_opt(data, "OrganizerEmail"),
            attendees,
            recurrence: data.node("Recurrence").map(Recurrence::from_node).transpose()?,
            categories: read_categories(data),
            notes: read_body(data),
            dtstamp: time("DtStamp")?,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wbxml;
    use chrono::TimeZone;

    fn sample() -> EventObject {
        let mut weekly = Recurrence::new(RecurrenceType::Weekly);
        weekly.interval = Some(1);
        weekly.day_of_week = Some(2);
        weekly.until = Some(Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap());

        EventObject {
            uid: Some("evt-1@example.com".into()),
            subject: Some("Standup".into()),
            location: Some("Room 4".into()),
            start: Some(Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2026, 1, 5, 9, 15, 0).unwrap()),
            busy_status: BusyStatus::Busy,
            sensitivity: Sensitivity::Private,
            reminder: Some(10),
            organizer_name: Some("Jane".into()),
            organizer_email: Some("jane@example.com".into()),
            attendees: vec![Attendee {
                email: "bob@example.com".into(),
                name: Some("Bob".into()),
                status: Some(3),
                attendee_type: Some(1),
            }],
            recurrence: Some(weekly),
            categories: vec!["Team".into()],
            notes: Some("Daily sync".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_round_trip_through_wire() {
        let event = sample();
        let root = TaggedNode::new(ns::AIR_SYNC).with_node("ApplicationData", event.to_application_data());
        let decoded = wbxml::decode(&wbxml::encode(&root).unwrap()).unwrap();
        let parsed = EventObject::from_application_data(decoded.node("ApplicationData").unwrap()).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_compact_times_on_wire() {
        let data = sample().to_application_data();
        assert_eq!(data.text("StartTime"), Some("20260105T090000Z"));
        assert_eq!(data.text("AllDayEvent"), Some("0"));
        assert_eq!(
            STANDARD.decode(data.text("TimeZone").unwrap()).unwrap().len(),
            TIME_ZONE_BLOB_LEN
        );
    }

    #[test]
    fn test_extended_times_accepted() {
        let data = TaggedNode::new(ns::AIR_SYNC)
            .with_text("Subject", "x")
            .with_text("StartTime", "2026-01-05T09:00:00.000Z");
        let event = EventObject::from_application_data(&data).unwrap();
        assert_eq!(event.start, Some(Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()));
    }

    #[test]
    fn test_invalid_busy_status() {
        let data = TaggedNode::new(ns::CALENDAR).with_text("BusyStatus", "9");
        let err = EventObject::from_application_data(&data).unwrap_err();
        assert!(matches!(err, CoreError::InvalidField { .. }));
    }
}
