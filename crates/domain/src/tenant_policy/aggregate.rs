//! Tenant policy aggregate implementation.

use std::time::Duration;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, RecordedEvent};

use super::{
    CreatePolicy, TenantPolicyCommand, TenantPolicyCreated, TenantPolicyError, TenantPolicyEvent,
    TenantPolicyUpdated, UpdatePolicy,
};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Parses an `HH:MM` time of day.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, TenantPolicyError> {
    NaiveTime::parse_from_str(value, hhmm::FORMAT)
        .map_err(|_| TenantPolicyError::InvalidTimeOfDay(value.to_string()))
}

/// `HH:MM` serde representation for [`NaiveTime`].
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let value = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&value, FORMAT).map_err(D::Error::custom)
    }
}

/// Daily quiet hours, compared by minute of day in UTC.
///
/// `from < to` is a same-day window, `from > to` wraps midnight and
/// `from == to` is treated as no window at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietWindow {
    #[serde(with = "hhmm")]
    pub from: NaiveTime,
    #[serde(with = "hhmm")]
    pub to: NaiveTime,
}

impl QuietWindow {
    pub fn new(from: NaiveTime, to: NaiveTime) -> Self {
        Self { from, to }
    }

    fn minute_of_day(time: NaiveTime) -> u32 {
        time.hour() * 60 + time.minute()
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let now = Self::minute_of_day(now.time());
        let from = Self::minute_of_day(self.from);
        let to = Self::minute_of_day(self.to);

        if from < to {
            from <= now && now < to
        } else if from > to {
            now >= from || now < to
        } else {
            false
        }
    }

    /// Time left until the window closes, `None` outside the window.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.contains(now) {
            return None;
        }
        let now_secs = i64::from(now.time().num_seconds_from_midnight());
        let to_secs = i64::from(self.to.num_seconds_from_midnight());
        let secs = (to_secs - now_secs).rem_euclid(SECONDS_PER_DAY);
        Some(Duration::from_secs(secs as u64))
    }
}

/// Tenant cart abandonment policy aggregate root. The aggregate id is the
/// tenant id.
#[derive(Debug, Clone)]
pub struct TenantPolicy {
    tenant_id: AggregateId,
    version: Version,
    title: String,
    abandoned_minutes: i64,
    quiet: Option<QuietWindow>,
    changes: Vec<RecordedEvent<TenantPolicyEvent>>,
}

impl Aggregate for TenantPolicy {
    type Event = TenantPolicyEvent;
    type Command = TenantPolicyCommand;
    type Error = TenantPolicyError;

    fn aggregate_type() -> &'static str {
        "TenantCartAbandonedPolicy"
    }

    fn new(id: AggregateId) -> Self {
        Self {
            tenant_id: id,
            version: Version::NEW,
            title: String::new(),
            abandoned_minutes: 0,
            quiet: None,
            changes: Vec::new(),
        }
    }

    fn id(&self) -> AggregateId {
        self.tenant_id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn execute(&mut self, command: TenantPolicyCommand) -> Result<(), TenantPolicyError> {
        match command {
            TenantPolicyCommand::Create(cmd) => self.create(cmd),
            TenantPolicyCommand::Update(cmd) => self.update(cmd),
        }
    }

    fn apply(&mut self, event: &TenantPolicyEvent, version: Version) {
        match event {
            TenantPolicyEvent::Created(data) => {
                self.tenant_id = data.tenant_id;
                self.title = data.title.clone();
                self.abandoned_minutes = data.abandoned_minutes;
                self.quiet = Some(QuietWindow::new(data.quiet_from, data.quiet_to));
            }
            TenantPolicyEvent::Updated(data) => {
                self.title = data.title.clone();
                self.abandoned_minutes = data.abandoned_minutes;
                self.quiet = Some(QuietWindow::new(data.quiet_from, data.quiet_to));
            }
        }
        self.version = version;
    }

    fn uncommitted_events(&self) -> &[RecordedEvent<TenantPolicyEvent>] {
        &self.changes
    }

    fn uncommitted_events_mut(&mut self) -> &mut Vec<RecordedEvent<TenantPolicyEvent>> {
        &mut self.changes
    }
}

// Query methods
impl TenantPolicy {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn abandoned_minutes(&self) -> i64 {
        self.abandoned_minutes
    }

    pub fn quiet_window(&self) -> Option<QuietWindow> {
        self.quiet
    }

    /// How long a cart may sit untouched before it counts as abandoned.
    pub fn cart_abandoned_delay(&self) -> Duration {
        Duration::from_secs(self.abandoned_minutes.max(0) as u64 * 60)
    }

    pub fn is_within_quiet_time(&self, now: DateTime<Utc>) -> bool {
        self.quiet.is_some_and(|window| window.contains(now))
    }

    pub fn quiet_time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.quiet.and_then(|window| window.remaining(now))
    }
}

// Command methods
impl TenantPolicy {
    fn create(&mut self, cmd: CreatePolicy) -> Result<(), TenantPolicyError> {
        if !self.is_new() {
            return Err(TenantPolicyError::AlreadyExists);
        }
        if cmd.abandoned_minutes <= 0 {
            return Err(TenantPolicyError::InvalidMinutes);
        }

        self.raise(TenantPolicyEvent::Created(TenantPolicyCreated {
            tenant_id: cmd.tenant_id,
            title: cmd.title,
            abandoned_minutes: cmd.abandoned_minutes,
            quiet_from: cmd.quiet_from,
            quiet_to: cmd.quiet_to,
            created_at: Utc::now(),
        }));
        Ok(())
    }

    fn update(&mut self, cmd: UpdatePolicy) -> Result<(), TenantPolicyError> {
        if self.is_new() {
            return Err(TenantPolicyError::NotCreated);
        }
        if cmd.abandoned_minutes <= 0 {
            return Err(TenantPolicyError::InvalidMinutes);
        }

        let window = QuietWindow::new(cmd.quiet_from, cmd.quiet_to);
        if self.title == cmd.title
            && self.abandoned_minutes == cmd.abandoned_minutes
            && self.quiet == Some(window)
        {
            return Ok(());
        }

        self.raise(TenantPolicyEvent::Updated(TenantPolicyUpdated {
            title: cmd.title,
            abandoned_minutes: cmd.abandoned_minutes,
            quiet_from: cmd.quiet_from,
            quiet_to: cmd.quiet_to,
            updated_at: Utc::now(),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn time(value: &str) -> NaiveTime {
        parse_time_of_day(value).unwrap()
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, hour, minute, 0).unwrap()
    }

    fn create_cmd(tenant_id: AggregateId, minutes: i64) -> TenantPolicyCommand {
        TenantPolicyCommand::Create(CreatePolicy {
            tenant_id,
            title: "Default".to_string(),
            abandoned_minutes: minutes,
            quiet_from: time("22:00"),
            quiet_to: time("08:00"),
        })
    }

    fn update_cmd(tenant_id: AggregateId, title: &str, minutes: i64) -> TenantPolicyCommand {
        TenantPolicyCommand::Update(UpdatePolicy {
            tenant_id,
            title: title.to_string(),
            abandoned_minutes: minutes,
            quiet_from: time("22:00"),
            quiet_to: time("08:00"),
        })
    }

    #[test]
    fn test_create_once() {
        let tenant_id = AggregateId::new();
        let mut policy = TenantPolicy::new(tenant_id);

        policy.execute(create_cmd(tenant_id, 30)).unwrap();
        assert_eq!(policy.version(), Version::first());
        assert_eq!(policy.cart_abandoned_delay(), Duration::from_secs(1800));

        assert_eq!(
            policy.execute(create_cmd(tenant_id, 30)).unwrap_err(),
            TenantPolicyError::AlreadyExists
        );
        assert_eq!(policy.uncommitted_events().len(), 1);
    }

    #[test]
    fn test_update_requires_policy() {
        let tenant_id = AggregateId::new();
        let mut policy = TenantPolicy::new(tenant_id);
        assert_eq!(
            policy.execute(update_cmd(tenant_id, "x", 5)).unwrap_err(),
            TenantPolicyError::NotCreated
        );
    }

    #[test]
    fn test_identical_update_is_a_no_op() {
        let tenant_id = AggregateId::new();
        let mut policy = TenantPolicy::new(tenant_id);
        policy.execute(create_cmd(tenant_id, 30)).unwrap();
        policy.mark_committed();

        policy.execute(update_cmd(tenant_id, "Default", 30)).unwrap();
        assert!(policy.uncommitted_events().is_empty());
        assert_eq!(policy.version(), Version::first());

        policy.execute(update_cmd(tenant_id, "Default", 45)).unwrap();
        assert_eq!(policy.uncommitted_events().len(), 1);
        assert_eq!(policy.version(), Version::new(2));
        assert_eq!(policy.abandoned_minutes(), 45);
    }

    #[test]
    fn test_minutes_must_be_positive() {
        let tenant_id = AggregateId::new();
        let mut policy = TenantPolicy::new(tenant_id);
        assert_eq!(
            policy.execute(create_cmd(tenant_id, 0)).unwrap_err(),
            TenantPolicyError::InvalidMinutes
        );
        assert!(policy.is_new());
    }

    #[test]
    fn test_wrapping_quiet_window() {
        let window = QuietWindow::new(time("22:00"), time("08:00"));
        assert!(window.contains(at(23, 30)));
        assert!(window.contains(at(22, 0)));
        assert!(window.contains(at(3, 0)));
        assert!(!window.contains(at(8, 0)));
        assert!(!window.contains(at(10, 0)));
    }

    #[test]
    fn test_same_day_and_empty_windows() {
        let window = QuietWindow::new(time("01:00"), time("05:00"));
        assert!(window.contains(at(1, 0)));
        assert!(window.contains(at(4, 59)));
        assert!(!window.contains(at(5, 0)));

        let empty = QuietWindow::new(time("09:00"), time("09:00"));
        assert!(!empty.contains(at(9, 0)));
    }

    #[test]
    fn test_quiet_time_remaining() {
        let tenant_id = AggregateId::new();
        let mut policy = TenantPolicy::new(tenant_id);
        policy.execute(create_cmd(tenant_id, 30)).unwrap();

        assert_eq!(
            policy.quiet_time_remaining(at(23, 30)),
            Some(Duration::from_secs(8 * 3600 + 30 * 60))
        );
        assert_eq!(
            policy.quiet_time_remaining(at(7, 0)),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(policy.quiet_time_remaining(at(12, 0)), None);
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(time("07:05"), NaiveTime::from_hms_opt(7, 5, 0).unwrap());
        assert!(matches!(
            parse_time_of_day("25:00"),
            Err(TenantPolicyError::InvalidTimeOfDay(_))
        ));
        assert!(parse_time_of_day("noon").is_err());
    }

    #[test]
    fn test_created_event_serializes_hhmm() {
        let tenant_id = AggregateId::new();
        let mut policy = TenantPolicy::new(tenant_id);
        policy.execute(create_cmd(tenant_id, 30)).unwrap();

        let json = serde_json::to_value(&policy.uncommitted_events()[0].event).unwrap();
        assert_eq!(json["quiet_from"], "22:00");
        assert_eq!(json["quiet_to"], "08:00");
    }
}
