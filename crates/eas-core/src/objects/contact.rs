//! Contact model (Contacts + Contacts2 + AirSyncBase pages).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::codepage::ns;
use crate::error::CoreResult;
use crate::model::TaggedNode;

use super::{
    application_data, datetime, push_body, push_categories, push_opt, read_body, read_categories,
    read_opt,
};

/// Email slots ActiveSync carries per contact.
pub const MAX_EMAILS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactName {
    pub first: Option<String>,
    pub middle: Option<String>,
    pub last: Option<String>,
    /// Honorific prefix (`Title`).
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneKind {
    Business,
    Business2,
    Home,
    Home2,
    Mobile,
    Car,
    Pager,
    Radio,
    BusinessFax,
    HomeFax,
    Assistant,
    CompanyMain,
    Mms,
}

impl PhoneKind {
    pub const ALL: [PhoneKind; 13] = [
        PhoneKind::Business,
        PhoneKind::Business2,
        PhoneKind::Home,
        PhoneKind::Home2,
        PhoneKind::Mobile,
        PhoneKind::Car,
        PhoneKind::Pager,
        PhoneKind::Radio,
        PhoneKind::BusinessFax,
        PhoneKind::HomeFax,
        PhoneKind::Assistant,
        PhoneKind::CompanyMain,
        PhoneKind::Mms,
    ];

    /// `(namespace, tag)` the number travels in.
    pub fn element(&self) -> (&'static str, &'static str) {
        match self {
            PhoneKind::Business => (ns::CONTACTS, "BusinessPhoneNumber"),
            PhoneKind::Business2 => (ns::CONTACTS, "Business2PhoneNumber"),
            PhoneKind::Home => (ns::CONTACTS, "HomePhoneNumber"),
            PhoneKind::Home2 => (ns::CONTACTS, "Home2PhoneNumber"),
            PhoneKind::Mobile => (ns::CONTACTS, "MobilePhoneNumber"),
            PhoneKind::Car => (ns::CONTACTS, "CarPhoneNumber"),
            PhoneKind::Pager => (ns::CONTACTS, "PagerNumber"),
            PhoneKind::Radio => (ns::CONTACTS, "RadioPhoneNumber"),
            PhoneKind::BusinessFax => (ns::CONTACTS, "BusinessFaxNumber"),
            PhoneKind::HomeFax => (ns::CONTACTS, "HomeFaxNumber"),
            PhoneKind::Assistant => (ns::CONTACTS, "AssistantPhoneNumber"),
            PhoneKind::CompanyMain => (ns::CONTACTS2, "CompanyMainPhone"),
            PhoneKind::Mms => (ns::CONTACTS2, "MMS"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPhone {
    pub kind: PhoneKind,
    pub number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    Home,
    Business,
    Other,
}

impl AddressKind {
    pub const ALL: [AddressKind; 3] = [AddressKind::Home, AddressKind::Business, AddressKind::Other];

    fn prefix(&self) -> &'static str {
        match self {
            AddressKind::Home => "HomeAddress",
            AddressKind::Business => "BusinessAddress",
            AddressKind::Other => "OtherAddress",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactAddress {
    pub kind: AddressKind,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl ContactAddress {
    fn is_empty(&self) -> bool {
        self.street.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.postal_code.is_none()
            && self.country.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Spouse,
    Assistant,
    Manager,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRelation {
    pub kind: RelationKind,
    pub name: String,
}

/// A contact card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactObject {
    pub name: ContactName,
    pub file_as: Option<String>,
    pub nickname: Option<String>,
    pub organization: Option<String>,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub phones: Vec<ContactPhone>,
    pub emails: Vec<String>,
    pub addresses: Vec<ContactAddress>,
    pub relations: Vec<ContactRelation>,
    pub birthday: Option<NaiveDate>,
    pub anniversary: Option<NaiveDate>,
    pub web_page: Option<String>,
    pub categories: Vec<String>,
    pub notes: Option<String>,
}

impl ContactObject {
    pub fn add_phone(&mut self, kind: PhoneKind, number: impl Into<String>) {
        self.phones.push(ContactPhone {
            kind,
            number: number.into(),
        });
    }

    pub fn add_email(&mut self, address: impl Into<String>) {
        self.emails.push(address.into());
    }

    pub fn add_relation(&mut self, kind: RelationKind, name: impl Into<String>) {
        self.relations.push(ContactRelation {
            kind,
            name: name.into(),
        });
    }

    pub fn phone(&self, kind: PhoneKind) -> Option<&str> {
        self.phones
            .iter()
            .find(|p| p.kind == kind)
            .map(|p| p.number.as_str())
    }

    pub fn address(&self, kind: AddressKind) -> Option<&ContactAddress> {
        self.addresses.iter().find(|a| a.kind == kind)
    }

    /// FileAs, else "First Last", else the organization.
    pub fn label(&self) -> Option<String> {
        if let Some(file_as) = &self.file_as {
            return Some(file_as.clone());
        }
        let parts: Vec<&str> = [&self.name.first, &self.name.last]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect();
        if !parts.is_empty() {
            return Some(parts.join(" "));
        }
        self.organization.clone()
    }

    pub fn to_application_data(&self) -> TaggedNode {
        let mut data = application_data();
        let c = ns::CONTACTS;

        push_body(&mut data, &self.notes);
        push_opt(&mut data, c, "FileAs", &self.file_as);
        push_opt(&mut data, c, "FirstName", &self.name.first);
        push_opt(&mut data, c, "MiddleName", &self.name.middle);
        push_opt(&mut data, c, "LastName", &self.name.last);
        push_opt(&mut data, c, "Title", &self.name.prefix);
        push_opt(&mut data, c, "Suffix", &self.name.suffix);
        push_opt(&mut data, c, "CompanyName", &self.organization);
        push_opt(&mut data, c, "Department", &self.department);
        push_opt(&mut data, c, "JobTitle", &self.job_title);
        push_opt(&mut data, c, "WebPage", &self.web_page);

        for (slot, email) in ["Email1Address", "Email2Address", "Email3Address"]
            .iter()
            .zip(self.emails.iter().take(MAX_EMAILS))
        {
            data.push_text_ns(c, *slot, email.as_str());
        }

        for kind in PhoneKind::ALL {
            if let Some(number) = self.phone(kind) {
                let (namespace, tag) = kind.element();
                data.push_text_ns(namespace, tag, number);
            }
        }

        for kind in AddressKind::ALL {
            if let Some(address) = self.address(kind) {
                let prefix = kind.prefix();
                let fields = [
                    ("Street", &address.street),
                    ("City", &address.city),
                    ("State", &address.state),
                    ("PostalCode", &address.postal_code),
                    ("Country", &address.country),
                ];
                for (suffix, value) in fields {
                    push_opt(&mut data, c, &format!("{prefix}{suffix}"), value);
                }
            }
        }

        if let Some(birthday) = &self.birthday {
            data.push_text_ns(c, "Birthday", datetime::format_date(birthday));
        }
        if let Some(anniversary) = &self.anniversary {
            data.push_text_ns(c, "Anniversary", datetime::format_date(anniversary));
        }

        let mut children = TaggedNode::new(c);
        for relation in &self.relations {
            match relation.kind {
                RelationKind::Spouse => data.push_text_ns(c, "Spouse", relation.name.as_str()),
                RelationKind::Assistant => {
                    data.push_text_ns(c, "AssistantName", relation.name.as_str())
                }
                RelationKind::Manager => {
                    data.push_text_ns(ns::CONTACTS2, "ManagerName", relation.name.as_str())
                }
                RelationKind::Child => children.push_text("Child", relation.name.as_str()),
            }
        }
        if !children.is_empty() {
            data.push_node("Children", children);
        }

        push_categories(&mut data, c, &self.categories);
        push_opt(&mut data, ns::CONTACTS2, "NickName", &self.nickname);
        data
    }

    pub fn from_application_data(data: &TaggedNode) -> CoreResult<Self> {
        let mut contact = ContactObject {
            name: ContactName {
                first: read_opt(data, "FirstName"),
                middle: read_opt(data, "MiddleName"),
                last: read_opt(data, "LastName"),
                prefix: read_opt(data, "Title"),
                suffix: read_opt(data, "Suffix"),
            },
            file_as: read_opt(data, "FileAs"),
            nickname: read_opt(data, "NickName"),
            organization: read_opt(data, "CompanyName"),
            department: read_opt(data, "Department"),
            job_title: read_opt(data, "JobTitle"),
            web_page: read_opt(data, "WebPage"),
            categories: read_categories(data),
            notes: read_body(data),
            ..Default::default()
        };

        for slot in ["Email1Address", "Email2Address", "Email3Address"] {
            if let Some(email) = data.text(slot).filter(|e| !e.is_empty()) {
                contact.add_email(email);
            }
        }

        for kind in PhoneKind::ALL {
            let (_, tag) = kind.element();
            if let Some(number) = data.text(tag).filter(|n| !n.is_empty()) {
                contact.add_phone(kind, number);
            }
        }

        for kind in AddressKind::ALL {
            let prefix = kind.prefix();
            let field = |suffix: &str| read_opt(data, &format!("{prefix}{suffix}"));
            let address = ContactAddress {
                kind,
                street: field("Street"),
                city: field("City"),
                state: field("State"),
                postal_code: field("PostalCode"),
                country: field("Country"),
            };
            if !address.is_empty() {
                contact.addresses.push(address);
            }
        }

        if let Some(value) = data.text("Birthday") {
            contact.birthday = Some(datetime::parse_date("Birthday", value)?);
        }
        if let Some(value) = data.text("Anniversary") {
            contact.anniversary = Some(datetime::parse_date("Anniversary", value)?);
        }

        if let Some(name) = data.text("Spouse") {
            contact.add_relation(RelationKind::Spouse, name);
        }
        if let Some(name) = data.text("AssistantName") {
            contact.add_relation(RelationKind::Assistant, name);
        }
        if let Some(name) = data.text("ManagerName") {
            contact.add_relation(RelationKind::Manager, name);
        }
        if let Some(children) = data.node("Children") {
            for name in children.texts("Child") {
                contact.add_relation(RelationKind::Child, name);
            }
        }

        Ok(contact)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wbxml;

    fn sample() -> ContactObject {
        let mut contact = ContactObject {
            name: ContactName {
                first: Some("Jane".into()),
                last: Some("Doe".into()),
                ..Default::default()
            },
            file_as: Some("Doe, Jane".into()),
            nickname: Some("JD".into()),
            organization: Some("Acme".into()),
            job_title: Some("Engineer".into()),
            birthday: NaiveDate::from_ymd_opt(1990, 7, 15),
            categories: vec!["Work".into(), "VIP".into()],
            notes: Some("Met at the conference".into()),
            ..Default::default()
        };
        contact.add_email("jane@example.com");
        contact.add_email("jane.doe@home.example");
        contact.add_phone(PhoneKind::Mobile, "+1 555 0100");
        contact.add_phone(PhoneKind::CompanyMain, "+1 555 0000");
        contact.addresses.push(ContactAddress {
            kind: AddressKind::Business,
            street: Some("1 Main St".into()),
            city: Some("Springfield".into()),
            state: None,
            postal_code: Some("12345".into()),
            country: Some("US".into()),
        });
        contact.add_relation(RelationKind::Spouse, "John Doe");
        contact.add_relation(RelationKind::Child, "Amy");
        contact.add_relation(RelationKind::Child, "Ben");
        contact
    }

    #[test]
    fn test_add_relation_goes_to_relations_not_phones() {
        let mut contact = ContactObject::default();
        contact.add_phone(PhoneKind::Home, "555-1234");
        contact.add_relation(RelationKind::Manager, "Pat");

        assert_eq!(contact.phones.len(), 1);
        assert_eq!(contact.relations.len(), 1);
        assert_eq!(contact.relations[0].kind, RelationKind::Manager);
        assert_eq!(contact.relations[0].name, "Pat");
    }

    #[test]
    fn test_application_data_round_trip() {
        let contact = sample();
        let data = contact.to_application_data();
        assert_eq!(data.text("FileAs"), Some("Doe, Jane"));
        assert_eq!(data.text("Email2Address"), Some("jane.doe@home.example"));
        assert_eq!(data.node("Children").unwrap().texts("Child").count(), 2);

        let parsed = ContactObject::from_application_data(&data).unwrap();
        assert_eq!(parsed, contact);
    }

    #[test]
    fn test_survives_wire_encoding() {
        let contact = sample();
        let root = TaggedNode::new(ns::AIR_SYNC).with_node("ApplicationData", contact.to_application_data());
        let decoded = wbxml::decode(&wbxml::encode(&root).unwrap()).unwrap();
        let data = decoded.node("ApplicationData").unwrap();
        assert_eq!(ContactObject::from_application_data(data).unwrap(), contact);
    }

    #[test]
    fn test_label_fallbacks() {
        let mut contact = ContactObject {
            organization: Some("Acme".into()),
            ..Default::default()
        };
        assert_eq!(contact.label().as_deref(), Some("Acme"));
        contact.name.first = Some("Jane".into());
        assert_eq!(contact.label().as_deref(), Some("Jane"));
        contact.file_as = Some("Doe, Jane".into());
        assert_eq!(contact.label().as_deref(), Some("Doe, Jane"));
    }

    #[test]
    fn test_extra_emails_dropped_on_wire() {
        let mut contact = ContactObject::default();
        for i in 0..5 {
            contact.add_email(format!("a{i}@example.com"));
        }
        let data = contact.to_application_data();
        assert!(data.text("Email3Address").is_some());
        let parsed = ContactObject::from_application_data(&data).unwrap();
        assert_eq!(parsed.emails.len(), MAX_EMAILS);
    }
}
