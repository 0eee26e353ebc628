//! Template helpers shared by every rendered view.
//!
//! `register` attaches the full set to an environment: two filters that
//! transform a piped value, three callable globals used from expression
//! position. Helper names keep the camelCase spelling templates expect.

use minijinja::{
    Environment, Error, ErrorKind,
    value::{Rest, Value, ValueKind},
};

const INVALID_DATE: &str = "INVALID DATE OBJECT";

/// Register every helper into the given environment.
pub fn register(env: &mut Environment<'_>) {
    env.add_filter("formatDateObject", format_date_object);
    env.add_filter("renderAsAttributes", render_as_attributes);
    env.add_function("mergeObjects", merge_objects);
    env.add_function("mergeObjectsDeep", merge_objects_deep);
    env.add_function("includes", includes);
}

/// Format a `{dd, mm, yyyy}` date object as `1 January 2020`.
///
/// Anything that is not a well-formed calendar date renders as a visible
/// `INVALID DATE OBJECT` marker rather than failing the whole page.
fn format_date_object(value: Value) -> String {
    if value.kind() != ValueKind::Map {
        return INVALID_DATE.to_string();
    }

    let (Some(day), Some(month), Some(year)) = (
        date_field(&value, "dd"),
        date_field(&value, "mm"),
        date_field(&value, "yyyy"),
    ) else {
        return INVALID_DATE.to_string();
    };

    let Ok(month_u8) = u8::try_from(month) else {
        return INVALID_DATE.to_string();
    };
    let Ok(month) = time::Month::try_from(month_u8) else {
        return INVALID_DATE.to_string();
    };
    let Ok(day_u8) = u8::try_from(day) else {
        return INVALID_DATE.to_string();
    };
    if time::Date::from_calendar_date(year, month, day_u8).is_err() {
        return INVALID_DATE.to_string();
    }

    format!("{day} {} {year}", month_name(month))
}

/// Render a map as HTML attribute pairs: `a="1" b="2"`.
///
/// Values are attribute-escaped and the result is marked safe so the
/// auto-escaper leaves the quotes alone.
fn render_as_attributes(value: Value) -> Result<Value, Error> {
    if value.kind() != ValueKind::Map {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "renderAsAttributes expects a map of attribute names to values",
        ));
    }

    let mut pairs = Vec::new();
    for key in value.try_iter()? {
        let attribute = key.to_string();
        let raw = value.get_item(&key)?;
        pairs.push(format!("{attribute}=\"{}\"", escape_attribute(&raw.to_string())));
    }

    Ok(Value::from_safe_string(pairs.join(" ")))
}

/// Shallow-merge one or more maps; later keys win.
fn merge_objects(maps: Rest<Value>) -> Result<Value, Error> {
    merge(&maps, false)
}

/// Recursively merge one or more maps; nested maps merge key-by-key,
/// everything else is replaced wholesale.
fn merge_objects_deep(maps: Rest<Value>) -> Result<Value, Error> {
    merge(&maps, true)
}

/// Whether a sequence contains a value, or a string contains a substring.
fn includes(haystack: Value, needle: Value) -> Result<bool, Error> {
    match haystack.kind() {
        ValueKind::Seq => {
            for item in haystack.try_iter()? {
                if item == needle {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        ValueKind::String => {
            let haystack = haystack.as_str().unwrap_or_default();
            Ok(haystack.contains(needle.to_string().as_str()))
        }
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            "includes expects a sequence or string haystack",
        )),
    }
}

fn merge(maps: &[Value], deep: bool) -> Result<Value, Error> {
    if maps.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "merge requires at least one map argument",
        ));
    }

    let mut merged: Vec<(Value, Value)> = Vec::new();
    for map in maps {
        merge_into(&mut merged, map, deep)?;
    }
    Ok(Value::from_iter(merged))
}

fn merge_into(dest: &mut Vec<(Value, Value)>, src: &Value, deep: bool) -> Result<(), Error> {
    if src.kind() != ValueKind::Map {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "merge arguments must all be maps",
        ));
    }

    for key in src.try_iter()? {
        let incoming = src.get_item(&key)?;
        match dest.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => {
                if deep && slot.1.kind() == ValueKind::Map && incoming.kind() == ValueKind::Map {
                    let mut nested: Vec<(Value, Value)> = Vec::new();
                    merge_into(&mut nested, &slot.1, true)?;
                    merge_into(&mut nested, &incoming, true)?;
                    slot.1 = Value::from_iter(nested);
                } else {
                    slot.1 = incoming;
                }
            }
            None => dest.push((key, incoming)),
        }
    }
    Ok(())
}

fn date_field(value: &Value, field: &str) -> Option<i32> {
    let raw = value.get_item(&Value::from(field)).ok()?;
    if raw.is_undefined() || raw.is_none() {
        return None;
    }
    if let Some(text) = raw.as_str() {
        return text.trim().parse().ok();
    }
    i64::try_from(raw).ok()?.try_into().ok()
}

fn month_name(month: time::Month) -> &'static str {
    match month {
        time::Month::January => "January",
        time::Month::February => "February",
        time::Month::March => "March",
        time::Month::April => "April",
        time::Month::May => "May",
        time::Month::June => "June",
        time::Month::July => "July",
        time::Month::August => "August",
        time::Month::September => "September",
        time::Month::October => "October",
        time::Month::November => "November",
        time::Month::December => "December",
    }
}

fn escape_attribute(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use minijinja::{Environment, context};

    use super::*;

    fn env() -> Environment<'static> {
        let mut env = Environment::new();
        register(&mut env);
        env
    }

    fn render(template: &str, ctx: Value) -> String {
        env()
            .render_str(template, ctx)
            .expect("template renders")
    }

    #[test]
    fn format_date_object_renders_calendar_dates() {
        let out = render(
            "{{ date | formatDateObject }}",
            context! { date => context! { dd => "1", mm => "1", yyyy => "2020" } },
        );
        assert_eq!(out, "1 January 2020");
    }

    #[test]
    fn format_date_object_accepts_numeric_fields() {
        let out = render(
            "{{ date | formatDateObject }}",
            context! { date => context! { dd => 29, mm => 2, yyyy => 2024 } },
        );
        assert_eq!(out, "29 February 2024");
    }

    #[test]
    fn format_date_object_flags_impossible_dates() {
        let out = render(
            "{{ date | formatDateObject }}",
            context! { date => context! { dd => 31, mm => 2, yyyy => 2020 } },
        );
        assert_eq!(out, INVALID_DATE);
    }

    #[test]
    fn format_date_object_flags_non_maps() {
        let out = render("{{ 'tomorrow' | formatDateObject }}", context! {});
        assert_eq!(out, INVALID_DATE);
    }

    #[test]
    fn render_as_attributes_escapes_values() {
        let out = render(
            "{{ attrs | renderAsAttributes }}",
            context! { attrs => context! { class => "button", title => "a \"quoted\" <tag>" } },
        );
        assert_eq!(
            out,
            "class=\"button\" title=\"a &quot;quoted&quot; &lt;tag&gt;\""
        );
    }

    #[test]
    fn render_as_attributes_rejects_non_maps() {
        let result = env().render_str("{{ 3 | renderAsAttributes }}", context! {});
        assert!(result.is_err());
    }

    #[test]
    fn merge_objects_is_shallow_and_later_wins() {
        let out = render(
            "{{ mergeObjects({'a': 1, 'b': 1}, {'b': 2, 'c': 3}) | tojson }}",
            context! {},
        );
        assert_eq!(out, r#"{"a":1,"b":2,"c":3}"#);
    }

    #[test]
    fn merge_objects_deep_merges_nested_maps() {
        let out = render(
            "{{ mergeObjectsDeep({'outer': {'kept': 1, 'replaced': 1}}, \
             {'outer': {'replaced': 2, 'added': 3}}) | tojson }}",
            context! {},
        );
        assert_eq!(out, r#"{"outer":{"kept":1,"replaced":2,"added":3}}"#);
    }

    #[test]
    fn merge_rejects_non_map_arguments() {
        let result = env().render_str("{{ mergeObjects({'a': 1}, [1, 2]) }}", context! {});
        assert!(result.is_err());
    }

    #[test]
    fn includes_checks_sequences_and_strings() {
        assert_eq!(
            render("{{ includes(['a', 'b'], 'b') }}", context! {}),
            "true"
        );
        assert_eq!(
            render("{{ includes(['a', 'b'], 'z') }}", context! {}),
            "false"
        );
        assert_eq!(render("{{ includes('abc', 'bc') }}", context! {}), "true");
    }

    #[test]
    fn loader_registers_every_helper() {
        let env = env();
        let rendered = env
            .render_str(
                "{{ includes(['x'], 'x') }}|{{ mergeObjects({'a': 1})['a'] }}|\
                 {{ {'k': 'v'} | renderAsAttributes }}",
                context! {},
            )
            .expect("helpers available");
        assert_eq!(rendered, "true|1|k=\"v\"");
    }
}
