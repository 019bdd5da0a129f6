// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub const CONFLICT_CODE: &str = "InvalidSequenceTokenException";
pub const ALREADY_ACCEPTED_CODE: &str = "DataAlreadyAcceptedException";

/// Error codes whose text carries the token of the next append, with the
/// marker the token follows.
const MARKERS: [(&str, &str); 2] = [
    (CONFLICT_CODE, "The next expected sequenceToken is: "),
    (
        ALREADY_ACCEPTED_CODE,
        "The next batch can be sent with sequenceToken: ",
    ),
];

/// Extracts the sequence token of the next append from the text of a token
/// conflict or of an already accepted batch.
///
/// Only the first line is inspected. It must name one of those errors and
/// carry the matching marker; the token is the trimmed remainder after it.
#[must_use]
pub fn parse_expected_token(text: &str) -> Option<String> {
    let line = text.lines().next()?;
    let (_, marker) = MARKERS.iter().find(|(code, _)| line.contains(code))?;
    let (_, token) = line.split_once(marker)?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token() {
        let text = "InvalidSequenceTokenException: The given sequenceToken is invalid. The next expected sequenceToken is: abc123";
        assert_eq!(parse_expected_token(text).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_parse_token_trims_and_ignores_later_lines() {
        let text = "InvalidSequenceTokenException: The next expected sequenceToken is:  49590 \n\tstatus code: 400, request id: 1234";
        assert_eq!(parse_expected_token(text).as_deref(), Some("49590"));
    }

    #[test]
    fn test_marker_on_second_line_is_ignored() {
        let text = "InvalidSequenceTokenException: bad token\nThe next expected sequenceToken is: abc123";
        assert_eq!(parse_expected_token(text), None);
    }

    #[test]
    fn test_other_error_is_ignored() {
        let text = "ThrottlingException: The next expected sequenceToken is: abc123";
        assert_eq!(parse_expected_token(text), None);
    }

    #[test]
    fn test_parse_already_accepted_token() {
        let text = "DataAlreadyAcceptedException: The given batch of log events has already been accepted. The next batch can be sent with sequenceToken: 49612";
        assert_eq!(parse_expected_token(text).as_deref(), Some("49612"));
    }

    #[test]
    fn test_markers_do_not_cross_codes() {
        let text = "DataAlreadyAcceptedException: The next expected sequenceToken is: abc123";
        assert_eq!(parse_expected_token(text), None);
        let text = "InvalidSequenceTokenException: The next batch can be sent with sequenceToken: abc123";
        assert_eq!(parse_expected_token(text), None);
    }

    #[test]
    fn test_empty_token() {
        let text = "InvalidSequenceTokenException: The next expected sequenceToken is:   ";
        assert_eq!(parse_expected_token(text), None);
        assert_eq!(parse_expected_token(""), None);
    }
}
