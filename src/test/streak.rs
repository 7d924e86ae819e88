#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::progress::streak::{StreakTransition, classify};
    use crate::progress::{ServerStreak, StudyStreak};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date")
    }

    fn studied_on_the_10th(streak: u32) -> StudyStreak {
        StudyStreak {
            streak,
            last_study_date: day(10),
        }
    }

    #[test]
    fn test_same_day_changes_nothing() {
        let before = studied_on_the_10th(4);
        assert_eq!(before.advance(day(10)), before);
    }

    #[test]
    fn test_next_day_extends() {
        let after = studied_on_the_10th(4).advance(day(11));
        assert_eq!(after.streak, 5);
        assert_eq!(after.last_study_date, day(11));
    }

    #[test]
    fn test_gap_resets_to_one() {
        let after = studied_on_the_10th(4).advance(day(15));
        assert_eq!(after.streak, 1);
        assert_eq!(after.last_study_date, day(15));
    }

    #[test]
    fn test_date_before_last_study_resets() {
        assert_eq!(classify(day(10), day(9)), StreakTransition::Reset);

        let after = studied_on_the_10th(4).advance(day(9));
        assert_eq!(after.streak, 1);
        assert_eq!(after.last_study_date, day(9));
    }

    #[test]
    fn test_classify_table() {
        assert_eq!(classify(day(10), day(10)), StreakTransition::SameDay);
        assert_eq!(classify(day(10), day(11)), StreakTransition::Extended);
        assert_eq!(classify(day(10), day(12)), StreakTransition::Reset);
        assert_eq!(
            classify(day(31), NaiveDate::from_ymd_opt(2024, 2, 1).expect("valid date")),
            StreakTransition::Extended,
            "month boundary is still consecutive"
        );
    }

    #[test]
    fn test_server_streak_first_activity() {
        let streak = ServerStreak::default().advance(day(10));

        assert_eq!(streak.current_streak, 1);
        assert_eq!(streak.longest_streak, 1);
        assert_eq!(streak.last_activity_date, Some(day(10)));
    }

    #[test]
    fn test_server_streak_keeps_longest_after_reset() {
        let streak = ServerStreak::default()
            .advance(day(1))
            .advance(day(2))
            .advance(day(3))
            .advance(day(3))
            .advance(day(8));

        assert_eq!(streak.current_streak, 1);
        assert_eq!(streak.longest_streak, 3);
        assert_eq!(streak.last_activity_date, Some(day(8)));
    }

    #[test]
    fn test_server_streak_longest_grows_with_current() {
        let streak = ServerStreak {
            current_streak: 2,
            longest_streak: 2,
            last_activity_date: Some(day(10)),
        }
        .advance(day(11));

        assert_eq!(streak.current_streak, 3);
        assert_eq!(streak.longest_streak, 3);
    }
}
