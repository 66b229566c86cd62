//! Interaction handlers, one module per FHIR interaction.

pub mod batch;
pub mod capabilities;
pub mod create;
pub mod delete;
pub mod everything;
pub mod history;
pub mod read;
pub mod search;
pub mod update;
pub mod vread;

use atrium_persistence::query::parser::QueryParser;
use atrium_persistence::types::SearchRequest;

use crate::error::RestResult;
use crate::state::AppState;

/// Decodes an embedded query string (e.g. `If-None-Exist`) into pairs,
/// percent-decoding keys and values.
pub(crate) fn decode_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (percent_decode(key), percent_decode(value)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (hex(bytes.get(i + 1)), hex(bytes.get(i + 2))) {
                (Some(high), Some(low)) => {
                    out.push(high * 16 + low);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(byte: Option<&u8>) -> Option<u8> {
    match byte? {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Parses decoded pairs into a search request under the server's
/// unknown-parameter policy.
pub(crate) fn parse_search(
    state: &AppState,
    resource_type: &str,
    pairs: &[(String, String)],
) -> RestResult<SearchRequest> {
    let request = QueryParser::new(state.repo().registry())
        .with_unknown_behavior(state.unknown_parameter_behavior())
        .parse(resource_type, pairs)?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_query_pairs() {
        let pairs = decode_query_pairs("identifier=http%3A%2F%2Fns%7Cabc&name=Jo+Ann");
        assert_eq!(
            pairs,
            vec![
                ("identifier".to_string(), "http://ns|abc".to_string()),
                ("name".to_string(), "Jo Ann".to_string()),
            ]
        );
    }

    #[test]
    fn test_decode_handles_bare_keys_and_bad_escapes() {
        assert_eq!(
            decode_query_pairs("flag&x=%zz"),
            vec![
                ("flag".to_string(), String::new()),
                ("x".to_string(), "%zz".to_string()),
            ]
        );
    }
}
