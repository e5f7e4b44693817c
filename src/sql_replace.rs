/// Replaces the n-th `?` placeholder with a literal `NULL` when `nulls[n]` is
/// set, ignoring any `?` inside single quotes. Placeholders beyond the end of
/// `nulls` are kept.
pub(crate) fn replace_null_placeholders(input: &str, nulls: &[bool]) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_single_quote = false;
    let mut placeholder = 0;

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                output.push(c);
                if in_single_quote && chars.peek() == Some(&'\'') {
                    // escaped quote inside a literal
                    output.push('\'');
                    chars.next();
                } else {
                    in_single_quote = !in_single_quote;
                }
            }
            '?' if !in_single_quote => {
                if nulls.get(placeholder).copied().unwrap_or(false) {
                    output.push_str("NULL");
                } else {
                    output.push('?');
                }
                placeholder += 1;
            }
            _ => output.push(c),
        }
    }

    output
}
