use chrono::TimeDelta;

use super::{ArgValue, FailureReason, TimePoint};
use crate::permissions::SubjectKind;

/// One independent predicate over an argument value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRule {
    /// A value must be present after defaulting.
    NonNull,
    IsArray,
    /// Lists and channel sets must have at least one element.
    NonEmpty,
    NonZeroShift,
    TimeDistanceOnly,
    ValidTextChannels,
    SubjectKindIs(SubjectKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    /// No value at all; reported differently from a bad value.
    Missing,
    Invalid(FailureReason),
}

/// Apply every rule to `value`. An absent value only fails `NonNull`.
pub fn validate(value: Option<&ArgValue>, rules: &[ValidationRule]) -> Result<(), ValidationFailure> {
    let Some(value) = value else {
        return if rules.contains(&ValidationRule::NonNull) {
            Err(ValidationFailure::Missing)
        } else {
            Ok(())
        };
    };

    for rule in rules {
        check(value, *rule).map_err(ValidationFailure::Invalid)?;
    }
    Ok(())
}

fn check(value: &ArgValue, rule: ValidationRule) -> Result<(), FailureReason> {
    match (rule, value) {
        (ValidationRule::NonNull, _) => Ok(()),

        (ValidationRule::IsArray, ArgValue::List(_) | ArgValue::Channels(_)) => Ok(()),
        (ValidationRule::IsArray, _) => Err(FailureReason::NotArray),

        (ValidationRule::NonEmpty, ArgValue::List(items)) if items.is_empty() => {
            Err(FailureReason::Empty)
        }
        (ValidationRule::NonEmpty, ArgValue::Channels(items)) if items.is_empty() => {
            Err(FailureReason::Empty)
        }
        (ValidationRule::NonEmpty, ArgValue::Text(s)) if s.is_empty() => Err(FailureReason::Empty),
        (ValidationRule::NonEmpty, _) => Ok(()),

        (ValidationRule::NonZeroShift, ArgValue::Time(TimePoint::Relative(delta)))
            if *delta == TimeDelta::zero() =>
        {
            Err(FailureReason::ZeroShift)
        }
        (ValidationRule::NonZeroShift, ArgValue::Time(_)) => Ok(()),

        (ValidationRule::TimeDistanceOnly, ArgValue::Time(TimePoint::Absolute(_))) => {
            Err(FailureReason::AbsoluteTime)
        }
        (ValidationRule::TimeDistanceOnly, ArgValue::Time(_)) => Ok(()),

        (ValidationRule::ValidTextChannels, ArgValue::Channels(channels)) => {
            match channels.iter().find(|c| !c.is_text) {
                Some(channel) => Err(FailureReason::NotTextChannel(channel.name.clone())),
                None => Ok(()),
            }
        }

        (ValidationRule::SubjectKindIs(kind), ArgValue::Subject(subject)) => {
            if subject.kind == kind {
                Ok(())
            } else {
                Err(FailureReason::WrongSubjectKind(kind))
            }
        }

        // a rule applied to a value of the wrong shape is a definition bug,
        // but the user still gets a normal rejection
        _ => Err(FailureReason::WrongType),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Subject;
    use crate::platform::ChannelInfo;
    use chrono::Utc;

    fn channel(name: &str, is_text: bool) -> ChannelInfo {
        ChannelInfo {
            id: format!("id-{name}"),
            name: name.to_string(),
            is_text,
        }
    }

    #[test]
    fn test_missing_is_distinct_from_invalid() {
        assert_eq!(
            validate(None, &[ValidationRule::NonNull, ValidationRule::NonZeroShift]),
            Err(ValidationFailure::Missing)
        );
        assert_eq!(validate(None, &[ValidationRule::NonZeroShift]), Ok(()));

        let zero = ArgValue::Time(TimePoint::Relative(TimeDelta::zero()));
        assert_eq!(
            validate(Some(&zero), &[ValidationRule::NonNull, ValidationRule::NonZeroShift]),
            Err(ValidationFailure::Invalid(FailureReason::ZeroShift))
        );
    }

    #[test]
    fn test_time_rules() {
        let absolute = ArgValue::Time(TimePoint::Absolute(Utc::now()));
        assert_eq!(
            validate(Some(&absolute), &[ValidationRule::TimeDistanceOnly]),
            Err(ValidationFailure::Invalid(FailureReason::AbsoluteTime))
        );
        assert_eq!(validate(Some(&absolute), &[ValidationRule::NonZeroShift]), Ok(()));

        let relative = ArgValue::Time(TimePoint::Relative(TimeDelta::minutes(5)));
        assert_eq!(
            validate(
                Some(&relative),
                &[ValidationRule::TimeDistanceOnly, ValidationRule::NonZeroShift]
            ),
            Ok(())
        );
    }

    #[test]
    fn test_text_channels() {
        let ok = ArgValue::Channels(vec![channel("general", true)]);
        assert_eq!(validate(Some(&ok), &[ValidationRule::ValidTextChannels]), Ok(()));

        let mixed = ArgValue::Channels(vec![channel("general", true), channel("lounge", false)]);
        assert_eq!(
            validate(Some(&mixed), &[ValidationRule::ValidTextChannels]),
            Err(ValidationFailure::Invalid(FailureReason::NotTextChannel(
                "lounge".to_string()
            )))
        );
    }

    #[test]
    fn test_array_rules() {
        let empty = ArgValue::List(vec![]);
        assert_eq!(validate(Some(&empty), &[ValidationRule::IsArray]), Ok(()));
        assert_eq!(
            validate(Some(&empty), &[ValidationRule::IsArray, ValidationRule::NonEmpty]),
            Err(ValidationFailure::Invalid(FailureReason::Empty))
        );

        let text = ArgValue::Text("x".to_string());
        assert_eq!(
            validate(Some(&text), &[ValidationRule::IsArray]),
            Err(ValidationFailure::Invalid(FailureReason::NotArray))
        );
    }

    #[test]
    fn test_subject_kind() {
        let user = ArgValue::Subject(Subject::new(SubjectKind::User, "1"));
        assert_eq!(
            validate(Some(&user), &[ValidationRule::SubjectKindIs(SubjectKind::Role)]),
            Err(ValidationFailure::Invalid(FailureReason::WrongSubjectKind(
                SubjectKind::Role
            )))
        );
    }

    #[test]
    fn test_first_failing_rule_wins() {
        let text = ArgValue::Text(String::new());
        assert_eq!(
            validate(Some(&text), &[ValidationRule::NonEmpty, ValidationRule::IsArray]),
            Err(ValidationFailure::Invalid(FailureReason::Empty))
        );
    }
}
