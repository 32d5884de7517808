//! Header address extraction and normalization.
//!
//! Splits a raw `From`/`To`/`Cc` header value into individual addresses with
//! their display names. The tokenizer is deliberately forgiving: commas inside
//! double quotes (`"Roe, Jane" <jane@beta.io>`) or inside an angle-bracket
//! group do not split, and tokens that do not look like a deliverable address
//! are dropped silently rather than surfaced as errors.
//!
//! Addresses and domains are lowercased before return so every downstream
//! comparison can be byte-equality; display names are preserved verbatim
//! after trimming.

/// One address extracted from a header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    /// Lowercased address (`jane@beta.io`).
    pub address: String,
    /// Display name as written in the header, if any.
    pub name: Option<String>,
    /// Lowercased domain part of the address.
    pub domain: String,
}

/// Parse a raw header value into the addresses it mentions.
///
/// Each comma-separated token is interpreted either as `Name <addr>` (the
/// address is the content of the last angle-bracket group, the name is the
/// prefix with surrounding double quotes stripped) or as a bare address.
pub fn parse_header(raw: &str) -> Vec<ParsedAddress> {
    split_tokens(raw)
        .iter()
        .filter_map(|token| parse_token(token))
        .collect()
}

/// Split on commas, except inside double quotes or `<...>`.
fn split_tokens(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for c in raw.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '<' if !in_quotes => {
                in_angle = true;
                current.push(c);
            }
            '>' if !in_quotes => {
                in_angle = false;
                current.push(c);
            }
            ',' if !in_quotes && !in_angle => {
                tokens.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }

    if !current.trim().is_empty() {
        tokens.push(current);
    }

    tokens
}

fn parse_token(token: &str) -> Option<ParsedAddress> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    let (raw_address, name) = match angle_group(token) {
        Some((open, close)) => {
            let prefix = token[..open].trim().trim_matches('"').trim();
            let name = if prefix.is_empty() {
                None
            } else {
                Some(prefix.to_string())
            };
            (token[open + 1..close].trim(), name)
        }
        None => (token, None),
    };

    let address = raw_address.to_lowercase();
    let domain = address_domain(&address)?;

    Some(ParsedAddress {
        address,
        name,
        domain,
    })
}

/// Byte offsets of the last `<...>` group in the token, if one exists.
fn angle_group(token: &str) -> Option<(usize, usize)> {
    let open = token.rfind('<')?;
    let close = open + 1 + token[open + 1..].find('>')?;
    Some((open, close))
}

/// Validate an address and return its domain.
///
/// An address is deliverable when it has exactly one `@`, at least one
/// character on each side, and a dot somewhere in the domain part.
fn address_domain(address: &str) -> Option<String> {
    let (local, domain) = address.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return None;
    }
    Some(domain.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Render a parsed address back into header form.
    fn render(parsed: &ParsedAddress) -> String {
        match &parsed.name {
            Some(name) => format!("\"{}\" <{}>", name, parsed.address),
            None => parsed.address.clone(),
        }
    }

    fn addr(address: &str, name: Option<&str>) -> ParsedAddress {
        let domain = address.split_once('@').unwrap().1.to_string();
        ParsedAddress {
            address: address.to_string(),
            name: name.map(str::to_string),
            domain,
        }
    }

    #[test]
    fn parses_bare_address() {
        assert_eq!(parse_header("jane@beta.io"), vec![addr("jane@beta.io", None)]);
    }

    #[test]
    fn parses_named_address() {
        assert_eq!(
            parse_header("\"Jane Roe\" <jane@beta.io>"),
            vec![addr("jane@beta.io", Some("Jane Roe"))]
        );
        assert_eq!(
            parse_header("Jane Roe <jane@beta.io>"),
            vec![addr("jane@beta.io", Some("Jane Roe"))]
        );
    }

    #[test]
    fn comma_inside_quotes_does_not_split() {
        assert_eq!(
            parse_header("\"Roe, Jane\" <jane@beta.io>, bob@beta.io"),
            vec![
                addr("jane@beta.io", Some("Roe, Jane")),
                addr("bob@beta.io", None),
            ]
        );
    }

    #[test]
    fn comma_inside_angle_brackets_does_not_split() {
        assert_eq!(
            parse_header("odd <a,b@beta.io>"),
            vec![addr("a,b@beta.io", Some("odd"))]
        );
    }

    #[test]
    fn address_comes_from_last_angle_group() {
        assert_eq!(
            parse_header("Jane <old> <jane@beta.io>"),
            vec![addr("jane@beta.io", Some("Jane <old>"))]
        );
    }

    #[test]
    fn lowercases_address_but_preserves_name() {
        assert_eq!(
            parse_header("Jane ROE <Jane@Beta.IO>"),
            vec![addr("jane@beta.io", Some("Jane ROE"))]
        );
    }

    #[test]
    fn drops_invalid_tokens_silently() {
        assert!(parse_header("not-an-address").is_empty());
        assert!(parse_header("two@@beta.io").is_empty());
        assert!(parse_header("a@b@c.io").is_empty());
        assert!(parse_header("@beta.io").is_empty());
        assert!(parse_header("jane@").is_empty());
        assert!(parse_header("jane@localhost").is_empty());
        assert!(parse_header("").is_empty());
        assert!(parse_header(" , ,, ").is_empty());
    }

    #[test]
    fn keeps_valid_tokens_among_invalid_ones() {
        assert_eq!(
            parse_header("bogus, jane@beta.io, also bogus"),
            vec![addr("jane@beta.io", None)]
        );
    }

    #[test]
    fn multiple_recipients() {
        assert_eq!(
            parse_header("a@beta.io, b@beta.io , \"C\" <c@gamma.dev>"),
            vec![
                addr("a@beta.io", None),
                addr("b@beta.io", None),
                addr("c@gamma.dev", Some("C")),
            ]
        );
    }

    #[test]
    fn round_trips_through_render() {
        let cases = vec![
            addr("jane@beta.io", Some("Jane Roe")),
            addr("bob@gamma.dev", None),
            addr("x@y.z", Some("X")),
        ];
        for case in cases {
            assert_eq!(parse_header(&render(&case)), vec![case]);
        }
    }
}
