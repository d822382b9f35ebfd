//! Day-key calendar.
//!
//! Pure conversions between instants and the business days they count
//! towards. A day is always interpreted in the configured reference timezone,
//! never in the timezone of whoever recorded the movement.
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;

/// Calendar-day identifier, rendered as `YYYY-MM-DD` so keys sort by date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn new(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(DayKey)
    }
    pub fn date(&self) -> NaiveDate {
        self.0
    }
    /// The day before, or `None` at the start of the representable range.
    pub fn pred(&self) -> Option<DayKey> {
        self.0.pred_opt().map(DayKey)
    }
    pub fn succ(&self) -> Option<DayKey> {
        self.0.succ_opt().map(DayKey)
    }
}

impl From<NaiveDate> for DayKey {
    fn from(value: NaiveDate) -> Self {
        DayKey(value)
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for DayKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(DayKey)
    }
}

impl<C> minicbor::Encode<C> for DayKey {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.to_string())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for DayKey {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        d.str()?
            .parse()
            .map_err(|_| minicbor::decode::Error::message("day key is not formatted as YYYY-MM-DD"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    tz: Tz,
}

impl Calendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn day_key(&self, instant: DateTime<Utc>) -> DayKey {
        DayKey(instant.with_timezone(&self.tz).date_naive())
    }

    /// First instant of `day` in the reference timezone. When a DST change
    /// skips local midnight the day starts at the first local time that
    /// exists; when midnight occurs twice the earlier one wins.
    pub fn day_start(&self, day: DayKey) -> DateTime<Utc> {
        let midnight = day.0.and_time(NaiveTime::MIN);
        let local = match self.tz.from_local_datetime(&midnight) {
            LocalResult::Single(t) => Some(t),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            LocalResult::None => (1..=16)
                .map(|quarter| midnight + Duration::minutes(15 * quarter))
                .find_map(|candidate| self.tz.from_local_datetime(&candidate).earliest()),
        };

        local
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
    }

    pub fn start_of_day(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.day_start(self.day_key(instant))
    }

    /// The instant a movement counts toward: its acceptance stamp when it has
    /// one, otherwise the start of the requested business day.
    pub fn effective_instant(
        &self,
        accepted_at: Option<DateTime<Utc>>,
        requested: DayKey,
    ) -> DateTime<Utc> {
        accepted_at.unwrap_or_else(|| self.day_start(requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn day_key_uses_reference_timezone() {
        let calendar = Calendar::new(chrono_tz::America::New_York);
        // 02:00 UTC is still the previous evening in New York
        assert_eq!(
            calendar.day_key(utc(2024, 6, 15, 2, 0)),
            DayKey::new(2024, 6, 14).unwrap()
        );
        assert_eq!(
            calendar.day_key(utc(2024, 6, 15, 4, 0)),
            DayKey::new(2024, 6, 15).unwrap()
        );
    }

    #[test]
    fn start_of_day_is_local_midnight() {
        let calendar = Calendar::new(chrono_tz::Europe::Berlin);
        // CEST is UTC+2
        assert_eq!(
            calendar.start_of_day(utc(2024, 6, 15, 13, 45)),
            utc(2024, 6, 14, 22, 0)
        );
    }

    #[test]
    fn skipped_midnight_starts_at_first_valid_instant() {
        // Sao Paulo moved clocks from 00:00 to 01:00 on 2018-11-04
        let calendar = Calendar::new(chrono_tz::America::Sao_Paulo);
        let day = DayKey::new(2018, 11, 4).unwrap();
        assert_eq!(calendar.day_start(day), utc(2018, 11, 4, 3, 0));
        assert_eq!(calendar.day_key(calendar.day_start(day)), day);
    }

    #[test]
    fn effective_instant_prefers_acceptance() {
        let calendar = Calendar::new(Tz::UTC);
        let day = DayKey::new(2024, 3, 1).unwrap();
        let accepted = utc(2024, 3, 2, 9, 30);

        assert_eq!(calendar.effective_instant(Some(accepted), day), accepted);
        assert_eq!(calendar.effective_instant(None, day), utc(2024, 3, 1, 0, 0));
    }

    #[test]
    fn day_key_text_form_sorts_by_date() {
        let a = DayKey::new(2023, 12, 31).unwrap();
        let b = a.succ().unwrap();
        assert_eq!(b.to_string(), "2024-01-01");
        assert!(a.to_string() < b.to_string());
        assert_eq!("2024-01-01".parse::<DayKey>().unwrap(), b);
        assert_eq!(b.pred(), Some(a));
    }

    #[test]
    fn day_key_cbor_encoding() {
        let original = DayKey::new(2024, 2, 29).unwrap();
        let encoding = minicbor::to_vec(original).unwrap();
        let decode: DayKey = minicbor::decode(&encoding).unwrap();
        assert_eq!(original, decode);
    }
}
