//! Content-line property parsing.
//!
//! A logical line is `NAME[;PARAM=VALUE[,VALUE...]]*:VALUE`.  Parameter
//! values may be double-quoted (and then contain `;`, `:` and `,`).  TEXT
//! values use backslash escaping per RFC 5545 §3.3.11.

/// One parsed content line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Upper-cased property name, e.g. `DTSTART`.
    pub name: String,
    /// Parameters in declaration order; names upper-cased, values with
    /// quotes stripped.
    pub params: Vec<(String, String)>,
    /// Raw value part (unescaped only via [`Property::text_value`]).
    pub value: String,
}

impl Property {
    /// Parse a logical line.  Returns `None` for lines without a `:`
    /// (nothing useful can be extracted from those).
    pub fn parse(line: &str) -> Option<Property> {
        let mut name_end = None;
        let mut value_start = None;
        let mut in_quotes = false;

        for (i, ch) in line.char_indices() {
            match ch {
                '"' => in_quotes = !in_quotes,
                ';' if !in_quotes && name_end.is_none() => name_end = Some(i),
                ':' if !in_quotes => {
                    if name_end.is_none() {
                        name_end = Some(i);
                    }
                    value_start = Some(i + 1);
                    break;
                }
                _ => {}
            }
        }

        let value_start = value_start?;
        let name_end = name_end?;
        let name = line[..name_end].trim().to_ascii_uppercase();
        if name.is_empty() {
            return None;
        }

        let param_part = &line[name_end..value_start - 1];
        let params = parse_params(param_part);

        Some(Property {
            name,
            params,
            value: line[value_start..].to_owned(),
        })
    }

    /// First value of a parameter, case-insensitive on the name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The value with RFC 5545 TEXT escapes resolved.
    pub fn text_value(&self) -> String {
        unescape_text(&self.value)
    }
}

/// Split `;A=1;B="x;y";C=1,2` into pairs.  A parameter without `=` is kept
/// with an empty value (seen in sloppy feeds).
fn parse_params(part: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    let mut push = |chunk: &str, params: &mut Vec<(String, String)>| {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            return;
        }
        match chunk.split_once('=') {
            Some((name, value)) => params.push((
                name.trim().to_ascii_uppercase(),
                value.trim().trim_matches('"').to_owned(),
            )),
            None => params.push((chunk.to_ascii_uppercase(), String::new())),
        }
    };

    for ch in part.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ';' if !in_quotes => {
                push(&current, &mut params);
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    push(&current, &mut params);
    params
}

/// Resolve `\\n`, `\\N`, `\\,`, `\\;`, `\\\\`.
pub fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(',') => out.push(','),
            Some(';') => out.push(';'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_property() {
        let p = Property::parse("SUMMARY:Team standup").unwrap();
        assert_eq!(p.name, "SUMMARY");
        assert!(p.params.is_empty());
        assert_eq!(p.value, "Team standup");
    }

    #[test]
    fn name_is_upper_cased() {
        let p = Property::parse("summary:x").unwrap();
        assert_eq!(p.name, "SUMMARY");
    }

    #[test]
    fn parameters_are_parsed() {
        let p = Property::parse("DTSTART;TZID=America/New_York:20251103T090000").unwrap();
        assert_eq!(p.param("TZID"), Some("America/New_York"));
        assert_eq!(p.value, "20251103T090000");
    }

    #[test]
    fn quoted_parameter_may_contain_separators() {
        let p = Property::parse(
            "ATTENDEE;CN=\"Lovelace, Ada; Dr\";ROLE=REQ-PARTICIPANT:mailto:ada@example.com",
        )
        .unwrap();
        assert_eq!(p.param("CN"), Some("Lovelace, Ada; Dr"));
        assert_eq!(p.param("ROLE"), Some("REQ-PARTICIPANT"));
        assert_eq!(p.value, "mailto:ada@example.com");
    }

    #[test]
    fn colon_inside_quoted_param_is_not_value_separator() {
        let p = Property::parse("X-THING;URL=\"https://example.com/a\":val").unwrap();
        assert_eq!(p.param("URL"), Some("https://example.com/a"));
        assert_eq!(p.value, "val");
    }

    #[test]
    fn param_lookup_is_case_insensitive() {
        let p = Property::parse("DTSTART;tzid=UTC:20251103T090000Z").unwrap();
        assert_eq!(p.param("TZID"), Some("UTC"));
    }

    #[test]
    fn value_may_contain_colons() {
        let p = Property::parse("DESCRIPTION:Agenda: items 1-3").unwrap();
        assert_eq!(p.value, "Agenda: items 1-3");
    }

    #[test]
    fn line_without_colon_is_rejected() {
        assert!(Property::parse("GARBAGE LINE").is_none());
        assert!(Property::parse("").is_none());
    }

    #[test]
    fn text_unescaping() {
        let p = Property::parse("DESCRIPTION:line one\\nline two\\, with comma\\; semi\\\\slash")
            .unwrap();
        assert_eq!(
            p.text_value(),
            "line one\nline two, with comma; semi\\slash"
        );
    }

    #[test]
    fn unknown_escape_is_preserved() {
        assert_eq!(unescape_text("a\\tb"), "a\\tb");
        assert_eq!(unescape_text("trailing\\"), "trailing\\");
    }
}
