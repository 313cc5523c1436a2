//! ODBC connection strings: building, masking and SQLSTATE classification.

use crate::config::SqlServerConfig;

/// Attribute keys whose values never reach a log line
const SECRET_KEYS: [&str; 2] = ["PWD", "PASSWORD"];

/// Build the `DRIVER={..};SERVER=..;DATABASE=..;UID=..;PWD=..;` string, or
/// return `connection_string` verbatim when one is configured.
pub fn build_connection_string(config: &SqlServerConfig) -> String {
    if let Some(raw) = config.connection_string.as_deref() {
        return raw.to_string();
    }

    let mut out = format!("DRIVER={{{}}};", config.driver.replace('}', "}}"));
    push_attribute(&mut out, "SERVER", &config.server);
    push_attribute(&mut out, "DATABASE", &config.database);
    push_attribute(&mut out, "UID", &config.username);
    push_attribute(&mut out, "PWD", &config.password);

    if let Some(extra) = config.extra_attributes.as_deref() {
        let extra = extra.trim();
        if !extra.is_empty() {
            out.push_str(extra);
            if !extra.ends_with(';') {
                out.push(';');
            }
        }
    }
    out
}

fn push_attribute(out: &mut String, key: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    out.push_str(key);
    out.push('=');
    out.push_str(&escape_value(value));
    out.push(';');
}

/// Brace-quote values that would otherwise break attribute parsing.
fn escape_value(value: &str) -> String {
    let needs_braces = value.contains([';', '{', '}'])
        || value.starts_with(' ')
        || value.ends_with(' ');
    if needs_braces {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}

/// Replace password values with `***`, honouring `{..}` quoting.
pub fn mask_connection_string(conn_str: &str) -> String {
    split_attributes(conn_str)
        .into_iter()
        .map(|(key, value)| {
            let key_trimmed = key.trim();
            let secret = SECRET_KEYS
                .iter()
                .any(|k| k.eq_ignore_ascii_case(key_trimmed));
            match value {
                Some(_) if secret => format!("{}=***;", key_trimmed),
                Some(v) => format!("{}={};", key_trimmed, v),
                None => format!("{};", key_trimmed),
            }
        })
        .collect()
}

fn split_attributes(conn_str: &str) -> Vec<(String, Option<String>)> {
    let mut attributes = Vec::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut has_value = false;
    let mut in_braces = false;
    let mut chars = conn_str.chars().peekable();

    while let Some(c) = chars.next() {
        if !has_value {
            match c {
                '=' => has_value = true,
                ';' => {
                    if !key.trim().is_empty() {
                        attributes.push((std::mem::take(&mut key), None));
                    }
                    key.clear();
                }
                c => key.push(c),
            }
            continue;
        }

        match c {
            '{' if value.is_empty() && !in_braces => {
                in_braces = true;
                value.push(c);
            }
            '}' if in_braces => {
                value.push(c);
                if chars.peek() == Some(&'}') {
                    value.push('}');
                    chars.next();
                } else {
                    in_braces = false;
                }
            }
            ';' if !in_braces => {
                attributes.push((std::mem::take(&mut key), Some(std::mem::take(&mut value))));
                has_value = false;
            }
            c => value.push(c),
        }
    }

    if has_value {
        attributes.push((key, Some(value)));
    } else if !key.trim().is_empty() {
        attributes.push((key, None));
    }
    attributes
}

/// Whether an ODBC SQLSTATE is worth retrying.
///
/// Class `28` (invalid authorization) and `IM` (driver manager: missing
/// driver, bad DSN) are permanent; everything else at connect time is
/// assumed to be network or server load trouble.
pub fn is_transient_odbc_state(state: &str) -> bool {
    !(state.starts_with("28") || state.starts_with("IM"))
}
