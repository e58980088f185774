/// Remove pairs of parentheses that wrap the entire expression.
///
/// A pair is only removed when the opening paren at the start closes at the very last
/// character. Parens inside single-quoted literals or double-quoted identifiers are ignored.
pub fn strip_redundant_outer_parens(expression: &str) -> &str {
    let mut current = expression.trim();
    while current.starts_with('(') && current.ends_with(')') && wraps_whole(current) {
        current = current[1..current.len() - 1].trim();
    }
    current
}

fn wraps_whole(expression: &str) -> bool {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let last = expression.len() - 1;

    for (i, c) in expression.char_indices() {
        if let Some(q) = quote {
            // A doubled quote re-enters the literal on its next character, so toggling works.
            if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                let Some(next) = depth.checked_sub(1) else {
                    return false;
                };
                depth = next;
                if depth == 0 && i != last {
                    return false;
                }
            }
            _ => {}
        }
    }

    depth == 0 && quote.is_none()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::strip_redundant_outer_parens;

    #[test_case("(a = 1)", "a = 1")]
    #[test_case("((a = 1))", "a = 1")]
    #[test_case("(a = 1) AND (b = 2)", "(a = 1) AND (b = 2)" ; "siblings untouched")]
    #[test_case("((a) AND (b))", "(a) AND (b)")]
    #[test_case("(name = ')')", "name = ')'" ; "paren in literal")]
    #[test_case("(\"we(ird\" = 1)", "\"we(ird\" = 1" ; "paren in identifier")]
    #[test_case("(a = 'it''s')", "a = 'it''s'" ; "escaped quote")]
    #[test_case("pk IN (1, 2)", "pk IN (1, 2)")]
    #[test_case("(a)) AND ((b)", "(a)) AND ((b)" ; "unbalanced")]
    #[test_case("", "")]
    fn strip(input: &str, expected: &str) {
        assert_eq!(strip_redundant_outer_parens(input), expected);
    }
}
