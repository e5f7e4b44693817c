/// Rewrites `?` placeholders outside single quotes into PostgreSQL `$n` ones.
pub(crate) fn postgres_query_positional_args_from_sqlite(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut param_counter = 1;
    let mut in_single_quote = false;

    for c in input.chars() {
        match c {
            '\'' => {
                output.push(c);
                in_single_quote = !in_single_quote;
            }
            '?' if !in_single_quote => {
                output.push('$');
                output.push_str(&param_counter.to_string());
                param_counter += 1;
            }
            _ => output.push(c),
        }
    }
    output
}

/// Turns the JDBC call escape `{call proc(?, ?)}` into `CALL proc(?, ?)`.
/// Anything else is returned trimmed but otherwise unchanged.
pub(crate) fn call_escape_to_sql(sql: &str) -> String {
    let trimmed = sql.trim();
    let Some(inner) = trimmed.strip_prefix('{').and_then(|s| s.strip_suffix('}')) else {
        return trimmed.to_string();
    };
    let inner = inner.trim();
    match inner.get(..5) {
        Some(keyword) if keyword.eq_ignore_ascii_case("call ") => format!("CALL {}", inner[5..].trim_start()),
        _ => inner.to_string(),
    }
}
