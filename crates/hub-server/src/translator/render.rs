//! `{{name}}` placeholder substitution.

use std::collections::BTreeMap;

/// Replace every `{{key}}` in `template` with its value from `vars`.
/// Unknown keys render as the empty string and take one neighbouring space
/// with them; an unterminated `{{` is kept verbatim. Substituted values are
/// never altered.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after[..end].trim();
        rest = &after[end + 2..];

        match vars.get(key).filter(|value| !value.is_empty()) {
            Some(value) => out.push_str(value),
            None => rest = close_gap(&mut out, rest),
        }
    }
    out.push_str(rest);
    out
}

// An empty value sits between `out` and `rest`; drop the space it leaves.
fn close_gap<'a>(out: &mut String, rest: &'a str) -> &'a str {
    let open_before = out.is_empty() || out.ends_with(' ');
    if open_before {
        if let Some(tail) = rest.strip_prefix(' ') {
            return tail;
        }
        let closes = rest.is_empty()
            || rest.starts_with(|c: char| matches!(c, ',' | '.' | ';' | ':' | '!' | '?'));
        if closes && out.ends_with(' ') {
            out.pop();
        }
    }
    rest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitutes_known_keys() {
        let out = render(
            "{{actor_name}} assigned you \"{{title}}\"",
            &vars(&[("actor_name", "Alice"), ("title", "Logo")]),
        );
        assert_eq!(out, "Alice assigned you \"Logo\"");
    }

    #[test]
    fn test_unknown_keys_render_empty() {
        assert_eq!(render("Hi {{who}} there", &vars(&[])), "Hi there");
    }

    #[test]
    fn test_empty_values_leave_no_gap() {
        let v = vars(&[("who", ""), ("title", "Logo")]);
        assert_eq!(render("{{who}} assigned {{title}}", &v), "assigned Logo");
        assert_eq!(render("Due for {{who}}", &v), "Due for");
        assert_eq!(render("Hi {{who}}, welcome", &v), "Hi, welcome");
        assert_eq!(render("{{a}} {{b}} done", &v), "done");
    }

    #[test]
    fn test_substituted_values_are_kept_verbatim() {
        let v = vars(&[("message", "  Line one  and   two ")]);
        assert_eq!(render("{{message}}", &v), "  Line one  and   two ");
        assert_eq!(render("Note:  {{message}}", &v), "Note:    Line one  and   two ");
    }

    #[test]
    fn test_tolerates_inner_whitespace_and_unterminated() {
        let v = vars(&[("title", "Logo")]);
        assert_eq!(render("{{ title }}!", &v), "Logo!");
        assert_eq!(render("Task {{title", &v), "Task {{title");
    }
}
