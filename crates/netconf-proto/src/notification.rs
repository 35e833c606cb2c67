//! RFC 5277 event notifications.

use chrono::{DateTime, FixedOffset, TimeDelta};

use crate::error::Error;
use crate::xml::{NOTIFICATION_NS, QName, XmlElement};

/// A received `<notification>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub event_time: DateTime<FixedOffset>,
    /// The event content element.
    pub content: XmlElement,
}

impl Notification {
    pub fn new(event_time: DateTime<FixedOffset>, content: XmlElement) -> Self {
        Self { event_time, content }
    }

    /// Whether a decoded message is a notification rather than a reply.
    pub fn is_notification(doc: &XmlElement) -> bool {
        doc.is(NOTIFICATION_NS, "notification")
    }

    pub fn parse(doc: &XmlElement) -> Result<Self, Error> {
        if !Self::is_notification(doc) {
            return Err(Error::MalformedNotification(format!(
                "expected <notification>, got <{}>",
                doc.name()
            )));
        }

        let event_time = doc
            .child_elements()
            .find(|el| el.is(NOTIFICATION_NS, "eventTime"))
            .ok_or_else(|| Error::MalformedNotification("missing <eventTime>".into()))?;
        let event_time = parse_event_time(event_time.text().trim())?;

        let content = doc
            .child_elements()
            .find(|el| !el.is(NOTIFICATION_NS, "eventTime"))
            .cloned()
            .ok_or_else(|| Error::MalformedNotification("no event content".into()))?;

        Ok(Self { event_time, content })
    }

    pub fn to_element(&self) -> XmlElement {
        XmlElement::new(QName::new(NOTIFICATION_NS, "notification"))
            .with_child(
                XmlElement::new(QName::new(NOTIFICATION_NS, "eventTime"))
                    .with_text(self.event_time.to_rfc3339()),
            )
            .with_child(self.content.clone())
    }
}

/// Parse an RFC 3339 `eventTime`.
///
/// A seconds field of `60` is read as `59` plus one second, so a leap
/// second lands on the first instant of the following minute.
// TODO: re-check this adjustment against current RFC 3339 validators; it
// also accepts a `:60` that is not at the end of a UTC day.
pub fn parse_event_time(raw: &str) -> Result<DateTime<FixedOffset>, Error> {
    let bad = |reason: String| Error::MalformedNotification(format!("invalid eventTime '{raw}': {reason}"));

    // YYYY-MM-DDThh:mm:ss: seconds occupy bytes 17..19.
    if raw.get(17..19) == Some("60") {
        let adjusted = format!("{}59{}", &raw[..17], &raw[19..]);
        let parsed = DateTime::parse_from_rfc3339(&adjusted).map_err(|e| bad(e.to_string()))?;
        return Ok(parsed + TimeDelta::seconds(1));
    }

    DateTime::parse_from_rfc3339(raw).map_err(|e| bad(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_plain_timestamps() {
        let t = parse_event_time("2024-05-01T10:00:00.25+02:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-05-01T10:00:00.250+02:00");
    }

    #[test]
    fn leap_second_rolls_into_next_minute() {
        let t = parse_event_time("2016-12-31T23:59:60Z").unwrap();
        assert_eq!(t, DateTime::parse_from_rfc3339("2017-01-01T00:00:00Z").unwrap());

        let t = parse_event_time("2016-12-31T18:59:60.5-05:00").unwrap();
        assert_eq!(t, DateTime::parse_from_rfc3339("2016-12-31T19:00:00.5-05:00").unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_event_time("yesterday").is_err());
        assert!(parse_event_time("2016-12-31T23:59:61Z").is_err());
    }

    #[test]
    fn parses_notification_document() {
        let doc = XmlElement::parse(
            r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0">
                 <eventTime>2024-05-01T10:00:00Z</eventTime>
                 <link-down xmlns="urn:x"><if-name>eth0</if-name></link-down>
               </notification>"#,
        )
        .unwrap();
        let n = Notification::parse(&doc).unwrap();
        assert_eq!(n.content.local_name(), "link-down");
        assert_eq!(n.event_time.timestamp(), 1_714_557_600);

        let again = Notification::parse(&n.to_element()).unwrap();
        assert_eq!(again, n);
    }

    #[test]
    fn missing_event_time_is_malformed() {
        let doc = XmlElement::parse(
            r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"><x xmlns="urn:x"/></notification>"#,
        )
        .unwrap();
        assert!(matches!(
            Notification::parse(&doc),
            Err(Error::MalformedNotification(_))
        ));
    }
}
