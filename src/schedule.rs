use std::collections::BTreeSet;

pub const SLOT_KIND_PERIOD: &str = "period";
pub const SLOT_KIND_BREAK: &str = "break";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    /// Canonical `HH:MM:SS` form. Seconds are always zero; the planner has no
    /// sub-minute resolution. Canonical strings compare lexicographically in
    /// chronological order.
    pub fn canonical(&self) -> String {
        format!("{:02}:{:02}:00", self.hour, self.minute)
    }

    pub fn plus_minutes(&self, minutes: u32) -> Result<TimeOfDay, DayOverflow> {
        let total = self.hour as u32 * 60 + self.minute as u32 + minutes;
        if total >= 24 * 60 {
            return Err(DayOverflow);
        }
        Ok(TimeOfDay {
            hour: (total / 60) as u8,
            minute: (total % 60) as u8,
        })
    }
}

/// An interval arithmetic result would land at or past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayOverflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeParseError {
    InvalidFormat,
    InvalidMinutes,
    InvalidHour,
}

impl TimeParseError {
    pub fn code(&self) -> &'static str {
        match self {
            TimeParseError::InvalidFormat => "invalid_format",
            TimeParseError::InvalidMinutes => "invalid_minutes",
            TimeParseError::InvalidHour => "invalid_hour",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            TimeParseError::InvalidFormat => "time must be digits like 930, 2p or 12:30",
            TimeParseError::InvalidMinutes => "minutes must be between 00 and 59",
            TimeParseError::InvalidHour => "hour must be between 0 and 23",
        }
    }
}

/// Parses keyboard-friendly 24-hour clock shorthand into a [`TimeOfDay`].
///
/// Accepted digit forms: `9` (hour only), `930` (H/MM), `1230` (HH/MM, last
/// two digits are minutes), and colon forms `9:30` / `09:30:00`. A trailing
/// `a`/`p` anywhere in the token selects AM/PM; with a meridiem the hour must
/// be 1-12 before adjustment (`12a` -> 00:00, `12p` -> 12:00, `1p` -> 13:00).
pub fn parse_time(raw: &str) -> Result<TimeOfDay, TimeParseError> {
    let mut digits = String::new();
    let mut am = false;
    let mut pm = false;
    for c in raw.chars() {
        match c {
            '0'..='9' | ':' => digits.push(c),
            'a' | 'A' => am = true,
            'p' | 'P' => pm = true,
            // Tolerated so "9am" / "9 PM" round-trip from the dashboard.
            'm' | 'M' => {}
            c if c.is_whitespace() => {}
            _ => return Err(TimeParseError::InvalidFormat),
        }
    }
    if digits.is_empty() || (am && pm) {
        return Err(TimeParseError::InvalidFormat);
    }

    let (mut hour, minute) = if digits.contains(':') {
        split_colon_form(&digits)?
    } else {
        split_compact_form(&digits)?
    };

    if minute > 59 {
        return Err(TimeParseError::InvalidMinutes);
    }
    if am || pm {
        if hour < 1 || hour > 12 {
            return Err(TimeParseError::InvalidHour);
        }
        hour %= 12;
        if pm {
            hour += 12;
        }
    } else if hour > 23 {
        return Err(TimeParseError::InvalidHour);
    }

    Ok(TimeOfDay {
        hour: hour as u8,
        minute: minute as u8,
    })
}

fn split_colon_form(digits: &str) -> Result<(u32, u32), TimeParseError> {
    let parts: Vec<&str> = digits.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(TimeParseError::InvalidFormat);
    }
    let hour = parse_part(parts[0])?;
    let minute = parse_part(parts[1])?;
    if parts.len() == 3 {
        // Seconds are accepted on canonical input and discarded.
        parse_part(parts[2])?;
    }
    Ok((hour, minute))
}

fn split_compact_form(digits: &str) -> Result<(u32, u32), TimeParseError> {
    match digits.len() {
        1 | 2 => Ok((parse_part(digits)?, 0)),
        3 => Ok((parse_part(&digits[..1])?, parse_part(&digits[1..])?)),
        _ => {
            let split = digits.len() - 2;
            Ok((parse_part(&digits[..split])?, parse_part(&digits[split..])?))
        }
    }
}

fn parse_part(part: &str) -> Result<u32, TimeParseError> {
    if part.is_empty() {
        return Err(TimeParseError::InvalidFormat);
    }
    part.parse::<u32>().map_err(|_| TimeParseError::InvalidFormat)
}

/// One existing slot of a schedule day, reduced to what conflict checking and
/// suggestion need. Times are canonical `HH:MM:SS` strings as stored.
#[derive(Debug, Clone)]
pub struct SlotInterval {
    pub id: String,
    pub period_number: i64,
    pub start: String,
    pub end: String,
}

/// Half-open overlap: intervals that merely touch do not conflict, so
/// back-to-back periods are legal.
pub fn overlaps(a_start: &str, a_end: &str, b_start: &str, b_end: &str) -> bool {
    a_start.max(b_start) < a_end.min(b_end)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayConflict {
    InvalidInterval,
    Conflict { slot_id: String, period_number: i64 },
}

/// Checks a candidate interval against every other slot of the day, skipping
/// the slot being edited so a no-time change never conflicts with itself.
/// Reports the first conflicting slot in day order.
pub fn validate_against_day(
    start: &str,
    end: &str,
    day_slots: &[SlotInterval],
    exclude_id: Option<&str>,
) -> Result<(), DayConflict> {
    if end <= start {
        return Err(DayConflict::InvalidInterval);
    }
    for slot in day_slots {
        if exclude_id == Some(slot.id.as_str()) {
            continue;
        }
        if overlaps(start, end, &slot.start, &slot.end) {
            return Err(DayConflict::Conflict {
                slot_id: slot.id.clone(),
                period_number: slot.period_number,
            });
        }
    }
    Ok(())
}

/// Next free interval after the latest existing end time, or from
/// `default_start` on an empty day. Advisory only: the caller still runs the
/// result through [`validate_against_day`] on save, since a manually edited
/// slot elsewhere in the day can still collide.
pub fn suggest_next(
    day_slots: &[SlotInterval],
    duration_minutes: u32,
    default_start: TimeOfDay,
) -> Result<(TimeOfDay, TimeOfDay), DayOverflow> {
    let latest_end = day_slots.iter().map(|s| s.end.as_str()).max();
    let start = match latest_end {
        Some(end) => parse_time(end).map_err(|_| DayOverflow)?,
        None => default_start,
    };
    let end = start.plus_minutes(duration_minutes)?;
    Ok((start, end))
}

#[derive(Debug, Clone)]
pub struct BatchSpec {
    pub start: TimeOfDay,
    pub period_minutes: u32,
    pub period_count: u32,
    pub break_after: BTreeSet<u32>,
    pub break_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftKind {
    Period,
    Break { name: String },
}

/// Skeleton slot produced by batch generation; content (subject, teacher,
/// syllabus refs) is assigned afterwards through normal edits.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotDraft {
    pub period_number: i64,
    pub kind: DraftKind,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

/// Generates a full day: periods back to back from `spec.start`, a break after
/// each listed period index (never after the last period), periods and breaks
/// numbered in one shared sequence. The break right after the third generated
/// item is "Lunch Break" by convention, any other break is plain "Break".
pub fn generate_batch(spec: &BatchSpec) -> Result<Vec<SlotDraft>, DayOverflow> {
    let mut drafts: Vec<SlotDraft> = Vec::new();
    let mut clock = spec.start;
    for idx in 1..=spec.period_count {
        let end = clock.plus_minutes(spec.period_minutes)?;
        drafts.push(SlotDraft {
            period_number: drafts.len() as i64 + 1,
            kind: DraftKind::Period,
            start: clock,
            end,
        });
        clock = end;
        if spec.break_after.contains(&idx) && idx != spec.period_count {
            let break_end = clock.plus_minutes(spec.break_minutes)?;
            let name = if drafts.len() == 3 {
                "Lunch Break"
            } else {
                "Break"
            };
            drafts.push(SlotDraft {
                period_number: drafts.len() as i64 + 1,
                kind: DraftKind::Break {
                    name: name.to_string(),
                },
                start: clock,
                end: break_end,
            });
            clock = break_end;
        }
    }
    Ok(drafts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tod(hour: u8, minute: u8) -> TimeOfDay {
        TimeOfDay { hour, minute }
    }

    #[test]
    fn parse_compact_shorthand() {
        assert_eq!(parse_time("9"), Ok(tod(9, 0)));
        assert_eq!(parse_time("930"), Ok(tod(9, 30)));
        assert_eq!(parse_time("1230"), Ok(tod(12, 30)));
        assert_eq!(parse_time("0830"), Ok(tod(8, 30)));
    }

    #[test]
    fn parse_meridiem_adjustment() {
        assert_eq!(parse_time("2p"), Ok(tod(14, 0)));
        assert_eq!(parse_time("1p"), Ok(tod(13, 0)));
        assert_eq!(parse_time("12p"), Ok(tod(12, 0)));
        assert_eq!(parse_time("12a"), Ok(tod(0, 0)));
        assert_eq!(parse_time("9am"), Ok(tod(9, 0)));
        assert_eq!(parse_time("9 PM"), Ok(tod(21, 0)));
        assert_eq!(parse_time("13p"), Err(TimeParseError::InvalidHour));
    }

    #[test]
    fn parse_rejects_out_of_range() {
        // 1-2 digit tokens are hour-only, never an H/M split.
        assert_eq!(parse_time("99"), Err(TimeParseError::InvalidHour));
        assert_eq!(parse_time("61"), Err(TimeParseError::InvalidHour));
        assert_eq!(parse_time("24"), Err(TimeParseError::InvalidHour));
        assert_eq!(parse_time("2460"), Err(TimeParseError::InvalidMinutes));
        // Minutes are checked before the hour.
        assert_eq!(parse_time("9961"), Err(TimeParseError::InvalidMinutes));
        assert_eq!(parse_time("9930"), Err(TimeParseError::InvalidHour));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_time(""), Err(TimeParseError::InvalidFormat));
        assert_eq!(parse_time("  "), Err(TimeParseError::InvalidFormat));
        assert_eq!(parse_time("noon"), Err(TimeParseError::InvalidFormat));
        assert_eq!(parse_time("9.30"), Err(TimeParseError::InvalidFormat));
        assert_eq!(parse_time("9ap"), Err(TimeParseError::InvalidFormat));
        assert_eq!(parse_time("am"), Err(TimeParseError::InvalidFormat));
    }

    #[test]
    fn parse_canonical_is_idempotent() {
        for hour in [0u8, 7, 9, 12, 17, 23] {
            for minute in [0u8, 1, 30, 59] {
                let t = tod(hour, minute);
                assert_eq!(parse_time(&t.canonical()), Ok(t), "{}", t.canonical());
            }
        }
    }

    #[test]
    fn overlap_is_symmetric_and_half_open() {
        let cases = [
            ("09:00:00", "09:40:00", "09:20:00", "10:00:00", true),
            ("09:00:00", "09:40:00", "09:40:00", "10:20:00", false),
            ("09:00:00", "10:00:00", "09:10:00", "09:20:00", true),
            ("09:00:00", "09:40:00", "11:00:00", "11:15:00", false),
        ];
        for (a1, a2, b1, b2, expected) in cases {
            assert_eq!(overlaps(a1, a2, b1, b2), expected);
            assert_eq!(overlaps(b1, b2, a1, a2), expected);
        }
    }

    fn slot(id: &str, number: i64, start: &str, end: &str) -> SlotInterval {
        SlotInterval {
            id: id.to_string(),
            period_number: number,
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    #[test]
    fn validate_rejects_zero_width_before_overlap() {
        let day = vec![slot("s1", 1, "09:00:00", "09:40:00")];
        assert_eq!(
            validate_against_day("09:00:00", "09:00:00", &day, None),
            Err(DayConflict::InvalidInterval)
        );
        assert_eq!(
            validate_against_day("10:00:00", "09:00:00", &day, None),
            Err(DayConflict::InvalidInterval)
        );
    }

    #[test]
    fn validate_reports_first_conflict_and_skips_excluded() {
        let day = vec![
            slot("s1", 1, "09:00:00", "09:40:00"),
            slot("s2", 2, "09:40:00", "10:20:00"),
        ];
        assert_eq!(
            validate_against_day("09:30:00", "09:50:00", &day, None),
            Err(DayConflict::Conflict {
                slot_id: "s1".to_string(),
                period_number: 1
            })
        );
        // Touching is legal.
        assert_eq!(
            validate_against_day("10:20:00", "11:00:00", &day, None),
            Ok(())
        );
        // Editing s2 without moving it must not conflict with itself.
        assert_eq!(
            validate_against_day("09:40:00", "10:20:00", &day, Some("s2")),
            Ok(())
        );
    }

    #[test]
    fn suggest_uses_latest_end_or_default() {
        let day = vec![
            slot("s1", 1, "09:00:00", "09:40:00"),
            slot("s2", 2, "11:00:00", "11:45:00"),
            slot("s3", 3, "09:40:00", "10:20:00"),
        ];
        let (start, end) = suggest_next(&day, 40, tod(9, 0)).expect("suggest");
        assert_eq!(start, tod(11, 45));
        assert_eq!(end, tod(12, 25));

        let (start, end) = suggest_next(&[], 40, tod(9, 0)).expect("suggest empty");
        assert_eq!(start, tod(9, 0));
        assert_eq!(end, tod(9, 40));

        assert_eq!(
            suggest_next(&[slot("s1", 1, "23:00:00", "23:50:00")], 30, tod(9, 0)),
            Err(DayOverflow)
        );
    }

    #[test]
    fn generate_standard_day_with_lunch() {
        let spec = BatchSpec {
            start: tod(9, 0),
            period_minutes: 40,
            period_count: 6,
            break_after: BTreeSet::from([3]),
            break_minutes: 15,
        };
        let drafts = generate_batch(&spec).expect("generate");
        let rows: Vec<(i64, bool, String, String)> = drafts
            .iter()
            .map(|d| {
                (
                    d.period_number,
                    matches!(d.kind, DraftKind::Break { .. }),
                    d.start.canonical(),
                    d.end.canonical(),
                )
            })
            .collect();
        assert_eq!(
            rows,
            vec![
                (1, false, "09:00:00".into(), "09:40:00".into()),
                (2, false, "09:40:00".into(), "10:20:00".into()),
                (3, false, "10:20:00".into(), "11:00:00".into()),
                (4, true, "11:00:00".into(), "11:15:00".into()),
                (5, false, "11:15:00".into(), "11:55:00".into()),
                (6, false, "11:55:00".into(), "12:35:00".into()),
                (7, false, "12:35:00".into(), "13:15:00".into()),
            ]
        );
        assert_eq!(
            drafts[3].kind,
            DraftKind::Break {
                name: "Lunch Break".to_string()
            }
        );
    }

    #[test]
    fn generate_skips_break_after_last_period_and_names_non_lunch_breaks() {
        let spec = BatchSpec {
            start: tod(8, 0),
            period_minutes: 45,
            period_count: 4,
            break_after: BTreeSet::from([1, 4]),
            break_minutes: 10,
        };
        let drafts = generate_batch(&spec).expect("generate");
        assert_eq!(drafts.len(), 5);
        assert_eq!(
            drafts[1].kind,
            DraftKind::Break {
                name: "Break".to_string()
            }
        );
        assert!(matches!(drafts[4].kind, DraftKind::Period));
        assert_eq!(drafts[4].period_number, 5);
    }

    #[test]
    fn generate_overflows_past_midnight() {
        let spec = BatchSpec {
            start: tod(22, 0),
            period_minutes: 60,
            period_count: 3,
            break_after: BTreeSet::new(),
            break_minutes: 5,
        };
        assert_eq!(generate_batch(&spec), Err(DayOverflow));
    }
}
