//! Declarative query-parameter validation.
//!
//! Each intent describes its parameters as data ([`FieldSpec`]); one
//! validator consumes the description.  Validation normalizes values
//! (canonical timezone names, lower-cased enums) so the response cache
//! keys on meaning, not spelling.

use cal_core::TimezoneResolver;
use chrono::NaiveDate;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// IANA (or resolvable Windows/legacy) timezone label.
    Timezone,
    /// `YYYY-MM-DD`.
    Date,
    /// Integer within an inclusive range.
    Int { min: i64, max: i64 },
    /// One of a fixed set (case-insensitive).
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Static default inserted when absent; dynamic defaults (e.g.
    /// "tomorrow") are the intent function's business.
    pub default: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parameter '{}': {}", self.field, self.message)
    }
}

/// Validate and normalize `raw` against `specs`.
///
/// Unknown parameters are rejected — a typo'd parameter silently ignored
/// is a debugging session nobody wants.
pub fn validate(
    specs: &[FieldSpec],
    raw: &HashMap<String, String>,
    resolver: &TimezoneResolver,
) -> Result<Vec<(String, String)>, ValidationError> {
    for name in raw.keys() {
        if !specs.iter().any(|s| s.name == name) {
            return Err(ValidationError {
                field: name.clone(),
                message: "unknown parameter".to_owned(),
            });
        }
    }

    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        let value = match raw.get(spec.name) {
            Some(v) if !v.trim().is_empty() => v.trim().to_owned(),
            _ => match spec.default {
                Some(default) => default.to_owned(),
                None if spec.required => {
                    return Err(ValidationError {
                        field: spec.name.to_owned(),
                        message: "required".to_owned(),
                    });
                }
                None => continue,
            },
        };

        let normalized = match spec.kind {
            FieldKind::Timezone => match resolver.try_resolve(&value) {
                Some(tz) => tz.name().to_owned(),
                None => {
                    return Err(ValidationError {
                        field: spec.name.to_owned(),
                        message: format!("unknown timezone '{}'", value),
                    });
                }
            },
            FieldKind::Date => match NaiveDate::parse_from_str(&value, "%Y-%m-%d") {
                Ok(_) => value,
                Err(_) => {
                    return Err(ValidationError {
                        field: spec.name.to_owned(),
                        message: format!("'{}' is not a YYYY-MM-DD date", value),
                    });
                }
            },
            FieldKind::Int { min, max } => match value.parse::<i64>() {
                Ok(n) if (min..=max).contains(&n) => n.to_string(),
                Ok(n) => {
                    return Err(ValidationError {
                        field: spec.name.to_owned(),
                        message: format!("{} is outside {}..={}", n, min, max),
                    });
                }
                Err(_) => {
                    return Err(ValidationError {
                        field: spec.name.to_owned(),
                        message: format!("'{}' is not an integer", value),
                    });
                }
            },
            FieldKind::Choice(choices) => {
                let lowered = value.to_ascii_lowercase();
                if choices.contains(&lowered.as_str()) {
                    lowered
                } else {
                    return Err(ValidationError {
                        field: spec.name.to_owned(),
                        message: format!("'{}' is not one of {:?}", value, choices),
                    });
                }
            }
        };
        out.push((spec.name.to_owned(), normalized));
    }
    Ok(out)
}

/// Convenience lookup on validated parameter lists.
pub fn get<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[FieldSpec] = &[
        FieldSpec {
            name: "tz",
            kind: FieldKind::Timezone,
            required: false,
            default: Some("America/New_York"),
        },
        FieldSpec {
            name: "date",
            kind: FieldKind::Date,
            required: false,
            default: None,
        },
        FieldSpec {
            name: "max_events",
            kind: FieldKind::Int { min: 1, max: 20 },
            required: false,
            default: Some("10"),
        },
        FieldSpec {
            name: "detail_level",
            kind: FieldKind::Choice(&["brief", "standard", "detailed"]),
            required: false,
            default: Some("standard"),
        },
    ];

    fn resolver() -> TimezoneResolver {
        TimezoneResolver::new(chrono_tz::America::New_York)
    }

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn defaults_are_applied() {
        let params = validate(SPECS, &raw(&[]), &resolver()).unwrap();
        assert_eq!(get(&params, "tz"), Some("America/New_York"));
        assert_eq!(get(&params, "max_events"), Some("10"));
        assert_eq!(get(&params, "detail_level"), Some("standard"));
        assert_eq!(get(&params, "date"), None);
    }

    #[test]
    fn timezone_is_normalized() {
        let params =
            validate(SPECS, &raw(&[("tz", "Pacific Standard Time")]), &resolver()).unwrap();
        assert_eq!(get(&params, "tz"), Some("America/Los_Angeles"));
    }

    #[test]
    fn bad_timezone_names_the_field() {
        let err = validate(SPECS, &raw(&[("tz", "Mars/Olympus")]), &resolver()).unwrap_err();
        assert_eq!(err.field, "tz");
    }

    #[test]
    fn int_range_is_enforced() {
        assert!(validate(SPECS, &raw(&[("max_events", "20")]), &resolver()).is_ok());
        let err = validate(SPECS, &raw(&[("max_events", "21")]), &resolver()).unwrap_err();
        assert_eq!(err.field, "max_events");
        let err = validate(SPECS, &raw(&[("max_events", "lots")]), &resolver()).unwrap_err();
        assert_eq!(err.field, "max_events");
    }

    #[test]
    fn choice_is_case_insensitive_and_normalized() {
        let params =
            validate(SPECS, &raw(&[("detail_level", "Detailed")]), &resolver()).unwrap();
        assert_eq!(get(&params, "detail_level"), Some("detailed"));
        assert!(validate(SPECS, &raw(&[("detail_level", "extreme")]), &resolver()).is_err());
    }

    #[test]
    fn date_format_is_checked() {
        assert!(validate(SPECS, &raw(&[("date", "2025-11-06")]), &resolver()).is_ok());
        assert!(validate(SPECS, &raw(&[("date", "06/11/2025")]), &resolver()).is_err());
    }

    #[test]
    fn unknown_parameters_are_rejected() {
        let err = validate(SPECS, &raw(&[("tzz", "UTC")]), &resolver()).unwrap_err();
        assert_eq!(err.field, "tzz");
        assert_eq!(err.message, "unknown parameter");
    }

    #[test]
    fn required_field_must_be_present() {
        const REQ: &[FieldSpec] = &[FieldSpec {
            name: "date",
            kind: FieldKind::Date,
            required: true,
            default: None,
        }];
        let err = validate(REQ, &raw(&[]), &resolver()).unwrap_err();
        assert_eq!(err.field, "date");
        assert_eq!(err.message, "required");
    }
}
