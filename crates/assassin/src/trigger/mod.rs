//! Trigger compilation
//!
//! Turns a stored `(trigger_kind, spec)` pair into a [`ScheduleDirective`]
//! that the in-process scheduler consumes. Compilation is pure: it never
//! touches the job table or the database, so it doubles as the validation
//! step of the admin surface.

use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::fmt;

use crate::errors::{TriggerError, TriggerResult};
pub use crate::models::TriggerKind;

pub mod crontab;

/// Literal date spec meaning "run once, right away"
pub const NOW: &str = "now";

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneShot {
    Immediate,
    At(DateTime<Utc>),
}

/// A validated 5-field crontab expression
#[derive(Clone)]
pub struct CronExpression {
    expression: String,
    schedule: Schedule,
}

impl CronExpression {
    pub fn parse(spec: &str) -> TriggerResult<Self> {
        let schedule = crontab::parse(spec).map_err(|reason| TriggerError::InvalidCron {
            spec: spec.to_string(),
            reason,
        })?;
        Ok(Self {
            expression: spec.split_whitespace().collect::<Vec<_>>().join(" "),
            schedule,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// First firing strictly after `after`, evaluated in `timezone`
    pub fn next_after(&self, after: DateTime<Utc>, timezone: Tz) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&timezone))
            .next()
            .map(|at| at.with_timezone(&Utc))
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpression").field(&self.expression).finish()
    }
}

/// What the scheduler should do for one job
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleDirective {
    Once(OneShot),
    Every { seconds: u64 },
    Cron(CronExpression),
}

impl ScheduleDirective {
    pub fn kind(&self) -> TriggerKind {
        match self {
            ScheduleDirective::Once(_) => TriggerKind::Date,
            ScheduleDirective::Every { .. } => TriggerKind::Interval,
            ScheduleDirective::Cron(_) => TriggerKind::Cron,
        }
    }

    /// Render a spec that compiles back to this directive
    pub fn spec_string(&self, timezone: Tz) -> String {
        match self {
            ScheduleDirective::Once(OneShot::Immediate) => NOW.to_string(),
            ScheduleDirective::Once(OneShot::At(at)) => at.with_timezone(&timezone).to_rfc3339(),
            ScheduleDirective::Every { seconds } => seconds.to_string(),
            ScheduleDirective::Cron(cron) => cron.as_str().to_string(),
        }
    }

    /// First firing of a job registered (or rescheduled) at `now`
    pub fn first_fire_time(&self, now: DateTime<Utc>, timezone: Tz) -> Option<DateTime<Utc>> {
        match self {
            ScheduleDirective::Once(OneShot::Immediate) => Some(now),
            ScheduleDirective::Once(OneShot::At(at)) => Some(*at),
            ScheduleDirective::Every { seconds } => now.checked_add_signed(interval_delta(*seconds)?),
            ScheduleDirective::Cron(cron) => cron.next_after(now, timezone),
        }
    }

    /// Firing that follows `previous`; one-shots have none
    pub fn next_fire_after(&self, previous: DateTime<Utc>, timezone: Tz) -> Option<DateTime<Utc>> {
        match self {
            ScheduleDirective::Once(_) => None,
            ScheduleDirective::Every { seconds } => {
                previous.checked_add_signed(interval_delta(*seconds)?)
            }
            ScheduleDirective::Cron(cron) => cron.next_after(previous, timezone),
        }
    }
}

// A zero interval would spin; it runs every second instead.
fn interval_delta(seconds: u64) -> Option<TimeDelta> {
    let seconds = i64::try_from(seconds.max(1)).ok()?;
    TimeDelta::try_seconds(seconds)
}

/// A reschedule of an existing job
#[derive(Debug, Clone, PartialEq)]
pub struct RescheduleDirective {
    pub job_id: String,
    pub directive: ScheduleDirective,
}

/// Compiles trigger kind / spec pairs in a fixed timezone
#[derive(Debug, Clone, Copy)]
pub struct TriggerCompiler {
    timezone: Tz,
}

impl Default for TriggerCompiler {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl TriggerCompiler {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Directive for a job that is not scheduled yet
    pub fn build_registration(&self, trigger_kind: &str, spec: &str) -> TriggerResult<ScheduleDirective> {
        self.compile(TriggerKind::from_stored(trigger_kind), spec)
    }

    /// Directive replacing the trigger of the live job `job_id`
    pub fn build_reschedule(
        &self,
        trigger_kind: &str,
        spec: &str,
        job_id: &str,
    ) -> TriggerResult<RescheduleDirective> {
        Ok(RescheduleDirective {
            job_id: job_id.to_string(),
            directive: self.build_registration(trigger_kind, spec)?,
        })
    }

    /// Strict validation for input that is about to be persisted: unlike
    /// stored rows, an unknown trigger kind is rejected here.
    pub fn validate(&self, trigger_kind: &str, spec: &str) -> TriggerResult<ScheduleDirective> {
        let kind = trigger_kind
            .parse::<TriggerKind>()
            .map_err(|_| TriggerError::UnknownKind(trigger_kind.to_string()))?;
        self.compile(kind, spec)
    }

    pub fn compile(&self, kind: TriggerKind, spec: &str) -> TriggerResult<ScheduleDirective> {
        match kind {
            TriggerKind::Date => self.compile_date(spec),
            TriggerKind::Interval => Self::compile_interval(spec),
            TriggerKind::Cron => Ok(ScheduleDirective::Cron(CronExpression::parse(spec)?)),
        }
    }

    fn compile_date(&self, spec: &str) -> TriggerResult<ScheduleDirective> {
        let trimmed = spec.trim();
        if trimmed == NOW {
            return Ok(ScheduleDirective::Once(OneShot::Immediate));
        }

        if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(ScheduleDirective::Once(OneShot::At(at.with_timezone(&Utc))));
        }

        let naive = NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
            .ok_or_else(|| TriggerError::InvalidDate {
                spec: spec.to_string(),
                reason: "expected `now`, RFC 3339 or `YYYY-MM-DD HH:MM:SS`".to_string(),
            })?;

        let at = self
            .timezone
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| TriggerError::InvalidDate {
                spec: spec.to_string(),
                reason: format!("does not exist in {}", self.timezone),
            })?;

        Ok(ScheduleDirective::Once(OneShot::At(at.with_timezone(&Utc))))
    }

    fn compile_interval(spec: &str) -> TriggerResult<ScheduleDirective> {
        let trimmed = spec.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TriggerError::InvalidInterval {
                spec: spec.to_string(),
            });
        }
        let seconds = trimmed.parse::<u64>().map_err(|_| TriggerError::InvalidInterval {
            spec: spec.to_string(),
        })?;
        Ok(ScheduleDirective::Every { seconds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use rstest::rstest;

    fn compiler() -> TriggerCompiler {
        TriggerCompiler::default()
    }

    #[test]
    fn date_now_is_immediate_one_shot() {
        let directive = compiler().build_registration("date", "now").unwrap();
        assert_eq!(directive, ScheduleDirective::Once(OneShot::Immediate));

        let now = Utc::now();
        assert_eq!(directive.first_fire_time(now, Tz::UTC), Some(now));
        assert_eq!(directive.next_fire_after(now, Tz::UTC), None);
    }

    #[test]
    fn unparseable_date_is_a_validation_error() {
        let err = compiler().validate("date", "not-a-date").unwrap_err();
        assert!(matches!(err, TriggerError::InvalidDate { .. }));
    }

    #[test]
    fn naive_dates_use_the_compiler_timezone() {
        let shanghai = TriggerCompiler::new(chrono_tz::Asia::Shanghai);
        let directive = shanghai.validate("date", "2030-01-02 08:00:00").unwrap();
        let ScheduleDirective::Once(OneShot::At(at)) = directive else {
            panic!("expected a one-shot at a fixed instant");
        };
        assert_eq!((at.day(), at.hour()), (2, 0));
    }

    #[rstest]
    #[case("10", 10)]
    #[case(" 60 ", 60)]
    #[case("0", 0)]
    fn intervals_parse_as_seconds(#[case] spec: &str, #[case] seconds: u64) {
        assert_eq!(
            compiler().validate("interval", spec).unwrap(),
            ScheduleDirective::Every { seconds }
        );
    }

    #[rstest]
    #[case("-5")]
    #[case("+5")]
    #[case("1.5")]
    #[case("ten")]
    #[case("")]
    fn bad_intervals_are_rejected(#[case] spec: &str) {
        assert!(matches!(
            compiler().validate("interval", spec),
            Err(TriggerError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn zero_interval_fires_every_second() {
        let directive = ScheduleDirective::Every { seconds: 0 };
        let now = Utc::now();
        assert_eq!(
            directive.first_fire_time(now, Tz::UTC),
            Some(now + TimeDelta::seconds(1))
        );
    }

    #[test]
    fn unknown_kind_is_strict_for_validation_only() {
        assert_eq!(
            compiler().validate("weekly", "* * * * *"),
            Err(TriggerError::UnknownKind("weekly".to_string()))
        );
        assert!(matches!(
            compiler().build_registration("weekly", "* * * * *"),
            Ok(ScheduleDirective::Cron(_))
        ));
    }

    #[test]
    fn cron_fires_on_cadence_in_timezone() {
        let directive = compiler().validate("cron", "30 2 * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2030, 5, 1, 0, 0, 0).unwrap();
        let first = directive.first_fire_time(start, Tz::UTC).unwrap();
        assert_eq!(first, Utc.with_ymd_and_hms(2030, 5, 1, 2, 30, 0).unwrap());
        let second = directive.next_fire_after(first, Tz::UTC).unwrap();
        assert_eq!(second, Utc.with_ymd_and_hms(2030, 5, 2, 2, 30, 0).unwrap());
    }

    #[test]
    fn weekday_ranges_through_seven_reach_sunday() {
        // 2030-05-01 is a Wednesday
        let start = Utc.with_ymd_and_hms(2030, 5, 1, 0, 0, 0).unwrap();
        let at_nine = |day| Utc.with_ymd_and_hms(2030, 5, day, 9, 0, 0).unwrap();

        let every_day = compiler().validate("cron", "0 9 * * 0-7").unwrap();
        let first = every_day.first_fire_time(start, Tz::UTC).unwrap();
        assert_eq!(first, at_nine(1));
        assert_eq!(every_day.next_fire_after(first, Tz::UTC), Some(at_nine(2)));

        let stepped = compiler().validate("cron", "0 9 * * 3-7/2").unwrap();
        let mut fired = vec![stepped.first_fire_time(start, Tz::UTC).unwrap()];
        for _ in 0..2 {
            let last = *fired.last().unwrap();
            fired.push(stepped.next_fire_after(last, Tz::UTC).unwrap());
        }
        assert_eq!(fired, vec![at_nine(1), at_nine(3), at_nine(5)]);
    }

    #[test]
    fn reschedule_carries_job_id() {
        let reschedule = compiler().build_reschedule("interval", "30", "3_sync").unwrap();
        assert_eq!(reschedule.job_id, "3_sync");
        assert_eq!(reschedule.directive, ScheduleDirective::Every { seconds: 30 });
    }

    #[rstest]
    #[case("date", "now")]
    #[case("date", "2031-07-04 12:30:00")]
    #[case("date", "2031-07-04T12:30:00.250+02:00")]
    #[case("interval", "0")]
    #[case("interval", "3600")]
    #[case("cron", "*/5   *  * * *")]
    #[case("cron", "0 9 * * 1-5")]
    fn accepted_directives_round_trip(#[case] kind: &str, #[case] spec: &str) {
        for compiler in [TriggerCompiler::default(), TriggerCompiler::new(chrono_tz::Europe::London)] {
            let directive = compiler.validate(kind, spec).unwrap();
            let rendered = directive.spec_string(compiler.timezone());
            let again = compiler.validate(directive.kind().as_str(), &rendered).unwrap();
            assert_eq!(directive, again, "{kind} {spec} -> {rendered}");
        }
    }
}
