//! Daily study streaks.
//!
//! Both the client cache and the server record follow the same adjacency
//! rule: activity on the same calendar day changes nothing, activity on the
//! following day extends the streak, and anything else (a gap, or a date
//! earlier than the last one) starts over at one.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakTransition {
    SameDay,
    Extended,
    Reset,
}

pub fn classify(last: NaiveDate, today: NaiveDate) -> StreakTransition {
    match (today - last).num_days() {
        0 => StreakTransition::SameDay,
        1 => StreakTransition::Extended,
        _ => StreakTransition::Reset,
    }
}

/// Client-side counter pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StudyStreak {
    pub streak: u32,
    pub last_study_date: NaiveDate,
}

impl StudyStreak {
    pub fn advance(self, today: NaiveDate) -> Self {
        match classify(self.last_study_date, today) {
            StreakTransition::SameDay => self,
            StreakTransition::Extended => Self {
                streak: self.streak.saturating_add(1),
                last_study_date: today,
            },
            StreakTransition::Reset => Self {
                streak: 1,
                last_study_date: today,
            },
        }
    }
}

/// Authoritative streak kept per user on the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStreak {
    pub current_streak: i64,
    pub longest_streak: i64,
    pub last_activity_date: Option<NaiveDate>,
}

impl ServerStreak {
    pub fn advance(self, today: NaiveDate) -> Self {
        let current_streak = match self.last_activity_date {
            None => 1,
            Some(last) => match classify(last, today) {
                StreakTransition::SameDay => self.current_streak.max(1),
                StreakTransition::Extended => self.current_streak + 1,
                StreakTransition::Reset => 1,
            },
        };

        let last_activity_date = match self.last_activity_date {
            Some(last) if last == today => Some(last),
            _ => Some(today),
        };

        Self {
            current_streak,
            longest_streak: self.longest_streak.max(current_streak),
            last_activity_date,
        }
    }
}
