use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Settlement window / prize pool kind.
///
/// A pool and its leaderboard window share the same type, so the same enum is
/// used both as the pool key and as the period type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    Daily,
    Weekly,
}

impl PoolType {
    pub const ALL: [PoolType; 2] = [PoolType::Daily, PoolType::Weekly];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolType::Daily => "daily",
            PoolType::Weekly => "weekly",
        }
    }

    /// Identifier of the period that contains `now`.
    pub fn current_period(&self, now: DateTime<Utc>) -> String {
        match self {
            PoolType::Daily => daily_period_id(now),
            PoolType::Weekly => weekly_period_id(now),
        }
    }

    /// Identifier of the period a scheduled settlement at `now` closes out.
    ///
    /// Daily settles yesterday (UTC); weekly settles the ISO week containing
    /// the instant seven days before `now`.
    pub fn settlement_period(&self, now: DateTime<Utc>) -> String {
        match self {
            PoolType::Daily => daily_period_id(now - Duration::days(1)),
            PoolType::Weekly => weekly_period_id(now - Duration::days(7)),
        }
    }

    /// Redis key of the live prize pool.
    pub fn pool_key(&self) -> String {
        format!("prize_pool:{}", self.as_str())
    }

    /// Redis key of the live leaderboard for a period.
    pub fn leaderboard_key(&self, period_identifier: &str) -> String {
        format!("leaderboard:{}:{}", self.as_str(), period_identifier)
    }
}

impl std::fmt::Display for PoolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PoolType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(PoolType::Daily),
            "weekly" => Ok(PoolType::Weekly),
            other => Err(format!("Unknown pool type: {}", other)),
        }
    }
}

/// `YYYY-MM-DD` of the UTC calendar date.
pub fn daily_period_id(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// `YYYY-Www` using the ISO week-year and a zero-padded ISO week number.
pub fn weekly_period_id(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Checks that a period identifier has the shape its pool type expects.
pub fn is_valid_period_id(pool_type: PoolType, period_identifier: &str) -> bool {
    match pool_type {
        PoolType::Daily => {
            chrono::NaiveDate::parse_from_str(period_identifier, "%Y-%m-%d").is_ok()
                && period_identifier.len() == 10
        }
        PoolType::Weekly => {
            let Some((year, week)) = period_identifier.split_once("-W") else {
                return false;
            };
            if year.len() != 4 || week.len() != 2 {
                return false;
            }
            match (year.parse::<i32>(), week.parse::<u32>()) {
                (Ok(year), Ok(week)) => {
                    chrono::NaiveDate::from_isoywd_opt(year, week, chrono::Weekday::Mon).is_some()
                }
                _ => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_period_is_utc_date() {
        assert_eq!(daily_period_id(at(2025, 3, 9, 23)), "2025-03-09");
    }

    #[test]
    fn test_weekly_period_uses_iso_week_year() {
        // 2024-12-30 is Monday of ISO week 1 of 2025
        assert_eq!(weekly_period_id(at(2024, 12, 30, 0)), "2025-W01");
        // 2021-01-03 still belongs to ISO week 53 of 2020
        assert_eq!(weekly_period_id(at(2021, 1, 3, 12)), "2020-W53");
        assert_eq!(weekly_period_id(at(2025, 3, 5, 0)), "2025-W10");
    }

    #[test]
    fn test_settlement_period_daily_is_yesterday() {
        let now = at(2025, 1, 1, 0);
        assert_eq!(PoolType::Daily.settlement_period(now), "2024-12-31");
    }

    #[test]
    fn test_settlement_period_weekly_is_seven_days_back() {
        // Monday 2025-03-10 00:00 -> 2025-03-03 is in W10
        let now = at(2025, 3, 10, 0);
        assert_eq!(PoolType::Weekly.settlement_period(now), "2025-W10");
        assert_eq!(PoolType::Weekly.current_period(now), "2025-W11");
    }

    #[test]
    fn test_keys() {
        assert_eq!(PoolType::Daily.pool_key(), "prize_pool:daily");
        assert_eq!(
            PoolType::Weekly.leaderboard_key("2025-W10"),
            "leaderboard:weekly:2025-W10"
        );
    }

    #[test]
    fn test_period_id_validation() {
        assert!(is_valid_period_id(PoolType::Daily, "2025-02-28"));
        assert!(!is_valid_period_id(PoolType::Daily, "2025-02-30"));
        assert!(!is_valid_period_id(PoolType::Daily, "2025-W10"));
        assert!(is_valid_period_id(PoolType::Weekly, "2020-W53"));
        assert!(!is_valid_period_id(PoolType::Weekly, "2025-W54"));
        assert!(!is_valid_period_id(PoolType::Weekly, "2025-W1"));
    }

    #[test]
    fn test_pool_type_parsing() {
        assert_eq!("Daily".parse::<PoolType>().unwrap(), PoolType::Daily);
        assert!("monthly".parse::<PoolType>().is_err());
        assert_eq!(serde_json::to_string(&PoolType::Weekly).unwrap(), "\"weekly\"");
    }
}
