//! Text literals and `$"…"` template scanning.

/// Piece of a scanned template.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    /// `{source[, width]}`
    Embed { source: String, width: Option<i64> },
}

/// Collapse doubled quotes in a literal body.
pub fn unquote(raw: &str) -> String {
    raw.replace("\"\"", "\"")
}

/// Split a template into literal text and embedded-expression segments.
///
/// `{{` and `}}` produce single braces, `{*name}` produces `{name}` without
/// evaluation, and `{}` stays literal. Line breaks swallow the whitespace
/// around them so an indented continuation line reads cleanly.
pub fn scan(template: &str) -> Vec<Segment> {
    let text = unquote(&join_lines(template));
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut lit = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' => match chars.get(i + 1) {
                Some('{') => {
                    lit.push('{');
                    i += 1;
                }
                Some('}') => {
                    lit.push_str("{}");
                    i += 2;
                }
                Some('*') => {
                    lit.push('{');
                    i += 2;
                    while i < chars.len() && chars[i] != '}' {
                        lit.push(chars[i]);
                        i += 1;
                    }
                    if i < chars.len() {
                        lit.push('}');
                        i += 1;
                    }
                }
                _ => match chars[i + 1..].iter().position(|c| *c == '}') {
                    Some(len) => {
                        let body: String = chars[i + 1..i + 1 + len].iter().collect();
                        if !lit.is_empty() {
                            out.push(Segment::Literal(std::mem::take(&mut lit)));
                        }
                        out.push(embed(&body));
                        i += len + 2;
                    }
                    None => {
                        lit.extend(&chars[i..]);
                        i = chars.len();
                    }
                },
            },
            '}' => {
                lit.push('}');
                i += if chars.get(i + 1) == Some(&'}') { 2 } else { 1 };
            }
            c => {
                lit.push(c);
                i += 1;
            }
        }
    }
    if !lit.is_empty() {
        out.push(Segment::Literal(lit));
    }
    out
}

fn embed(body: &str) -> Segment {
    if let Some((source, width)) = body.rsplit_once(',') {
        if let Ok(width) = width.trim().parse::<i64>() {
            return Segment::Embed {
                source: source.trim().to_string(),
                width: Some(width),
            };
        }
    }
    Segment::Embed {
        source: body.trim().to_string(),
        width: None,
    }
}

fn join_lines(template: &str) -> String {
    if !template.contains('\n') {
        return template.to_string();
    }
    let lines: Vec<&str> = template.split('\n').collect();
    let last = lines.len() - 1;
    lines
        .iter()
        .enumerate()
        .map(|(n, line)| {
            let line = if n > 0 {
                line.trim_start_matches([' ', '\t'])
            } else {
                line
            };
            if n < last {
                line.trim_end_matches([' ', '\t', '\r'])
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Positive widths right-align, negative widths left-align.
pub fn pad(text: &str, width: i64) -> String {
    let w = width.unsigned_abs() as usize;
    if width >= 0 {
        format!("{text:>w$}")
    } else {
        format!("{text:<w$}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Segment {
        Segment::Literal(s.to_string())
    }

    fn literal_of(template: &str) -> String {
        scan(template)
            .into_iter()
            .map(|s| match s {
                Segment::Literal(l) => l,
                Segment::Embed { source, .. } => format!("<{source}>"),
            })
            .collect()
    }

    #[test]
    fn test_embed_with_width() {
        assert_eq!(
            scan("Number: {num, -5}"),
            vec![
                lit("Number: "),
                Segment::Embed {
                    source: "num".into(),
                    width: Some(-5)
                }
            ]
        );
    }

    #[test]
    fn test_escapes() {
        assert_eq!(literal_of("Empty: {}"), "Empty: {}");
        assert_eq!(literal_of("Escaped: {{{*star"), "Escaped: {{{star");
        assert_eq!(literal_of("Escaped: {{{*star}"), "Escaped: {{{star}");
        assert_eq!(literal_of("{{*"), "{{");
        assert_eq!(literal_of("a }} b"), "a } b");
    }

    #[test]
    fn test_multiline_trims_around_breaks() {
        let t = "{*Loudly} I say:  \n\t\t\"\"Hello\"\", {name}!";
        assert_eq!(literal_of(t), "{Loudly} I say:\n\"Hello\", <name>!");
    }

    #[test]
    fn test_unterminated_brace_is_literal() {
        assert_eq!(literal_of("x {y"), "x {y");
    }

    #[test]
    fn test_pad() {
        assert_eq!(pad("42", 5), "   42");
        assert_eq!(pad("42", -5), "42   ");
        assert_eq!(pad("toolong", 3), "toolong");
    }
}
