use pest::{error::InputLocation, iterators::Pairs, Parser};
use pest_derive::Parser;

use super::error::{Location, ParseError};

#[derive(Parser)]
#[grammar = "lang/grammar.pest"]
pub struct PolarParser;

/// Parses a policy document into pest pairs.
pub fn parse_document(input: &str) -> Result<Pairs<'_, Rule>, ParseError> {
    parse_rule(Rule::document, input)
}

/// Parses a standalone query (a rule body, optionally `;`-terminated).
pub fn parse_query(input: &str) -> Result<Pairs<'_, Rule>, ParseError> {
    parse_rule(Rule::query, input)
}

fn parse_rule(rule: Rule, input: &str) -> Result<Pairs<'_, Rule>, ParseError> {
    check_strings(input)?;
    PolarParser::parse(rule, input).map_err(|e| from_pest(input, &e))
}

/// Rejects newlines inside string literals before the grammar sees them, so
/// the error can name the offending character.
fn check_strings(input: &str) -> Result<(), ParseError> {
    let mut in_comment = false;
    let mut string: Option<String> = None;
    let mut chars = input.char_indices();
    while let Some((offset, c)) = chars.next() {
        match string.as_mut() {
            Some(content) => match c {
                '"' => string = None,
                '\n' => {
                    return Err(ParseError::InvalidTokenCharacter {
                        token: content.clone(),
                        c,
                        loc: Location::from_offset(input, offset),
                    })
                }
                '\\' => {
                    content.push(c);
                    if let Some((_, escaped)) = chars.next() {
                        content.push(escaped);
                    }
                }
                _ => content.push(c),
            },
            None if in_comment => in_comment = c != '\n',
            None => match c {
                '#' => in_comment = true,
                '"' => string = Some(String::new()),
                _ => {}
            },
        }
    }
    Ok(())
}

fn skip_trivia(input: &str, mut offset: usize) -> usize {
    let bytes = input.as_bytes();
    while offset < bytes.len() {
        match bytes[offset] {
            b' ' | b'\t' | b'\r' | b'\n' => offset += 1,
            b'#' => {
                while offset < bytes.len() && bytes[offset] != b'\n' {
                    offset += 1;
                }
            }
            _ => break,
        }
    }
    offset
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Maps a pest error onto the token found at the failure position.
fn from_pest(input: &str, err: &pest::error::Error<Rule>) -> ParseError {
    let offset = match err.location {
        InputLocation::Pos(pos) => pos,
        InputLocation::Span((start, _)) => start,
    };
    let offset = skip_trivia(input, offset);
    let loc = Location::from_offset(input, offset);
    let rest = &input[offset..];
    let token: String = match rest.chars().next() {
        None => return ParseError::UnrecognizedEof { loc },
        Some(c) if is_ident_char(c) => rest.chars().take_while(|c| is_ident_char(*c)).collect(),
        Some(c) => c.to_string(),
    };
    ParseError::UnrecognizedToken { token, loc }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn assert_parses(rule: Rule, input: &str) {
        if let Err(e) = PolarParser::parse(rule, input) {
            panic!("Failed to parse input:\n{}\nError: {}", input, e)
        }
    }

    fn assert_fails(rule: Rule, input: &str) {
        if let Ok(pairs) = PolarParser::parse(rule, input) {
            panic!(
                "Expected parse to fail, but it succeeded. Parsed:\n{:#?}",
                pairs
            )
        }
    }

    #[test]
    fn test_parse_empty() {
        assert_parses(Rule::document, "");
        assert_parses(Rule::document, "  \n\n");
        assert_parses(Rule::document, "# comment only");
    }

    #[test]
    fn test_parse_name() {
        assert_parses(Rule::test_name, "allow");
        assert_parses(Rule::test_name, "_");
        assert_parses(Rule::test_name, "android");
        assert_parses(Rule::test_name, "notes");
        assert_fails(Rule::test_name, "and");
        assert_fails(Rule::test_name, "matches");
        assert_fails(Rule::test_name, "1abc");
    }

    #[test]
    fn test_parse_literals() {
        assert_parses(Rule::test_integer, "123");
        assert_parses(Rule::test_integer, "-45");
        assert_fails(Rule::test_integer, "1.5");
        assert_fails(Rule::test_integer, "12ab");
        assert_parses(Rule::float, "1.5");
        assert_parses(Rule::float, "-0.25e3");
        assert_parses(Rule::string, "\"escaped \\\" quote\"");
        assert_parses(Rule::list, "[1, \"two\", [true], {a: 1}]");
        assert_parses(Rule::dict, "{a: 1, \"b\": [x], c: {d: y},}");
    }

    #[test]
    fn test_parse_rules() {
        assert_parses(Rule::document, "f(1);");
        assert_parses(Rule::document, "f();");
        assert_parses(Rule::document, "f(x) if x = 1 or x = 2 and not x = 3;");
        assert_parses(
            Rule::document,
            r#"allow(actor, "get", _: Http{path: path}) if
                   new PathMapper{template: "/myclass/{id}"}.map(path) = {id: id} and
                   allow(actor, "get", new MyClass{id: id});
               allow(actor, "get", myclass: MyClass) if myclass.id = 12;"#,
        );
        assert_parses(Rule::document, "g(x: {a: 1}) if x.a + 1 * 2 >= 3 and cut;");
        assert_parses(Rule::document, "f(1); ?= f(1);");
        assert_parses(Rule::document, "h(x) if x matches Foo{a: 1} and \"a\" in x.tags();");
    }

    #[test]
    fn test_parse_rejects_malformed_rules() {
        assert_fails(Rule::document, "f(1)");
        assert_fails(Rule::document, "if(x);");
        assert_fails(Rule::document, "f(x) if;");
        assert_fails(Rule::document, "1");
    }

    #[test]
    fn test_unrecognized_token() {
        let err = parse_document("1").unwrap_err();
        assert_eq!(
            err.to_string(),
            "did not expect to find the token '1' at line 1, column 1"
        );
        let err = parse_document("f(1);\n  ;").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnrecognizedToken {
                token: ";".to_string(),
                loc: Location::new(2, 3)
            }
        );
    }

    #[test]
    fn test_unrecognized_eof() {
        let err = parse_document("f(x) if x = 1").unwrap_err();
        assert!(matches!(err, ParseError::UnrecognizedEof { .. }));
    }

    #[test]
    fn test_newline_in_string() {
        let err = parse_document("f(x) if x = \"This is not\n allowed\"").unwrap_err();
        assert_eq!(
            err.to_string(),
            "'\\n' is not a valid character. Found in This is not at line 1, column 25"
        );
        // Comments may contain quotes.
        assert!(parse_document("# \"unterminated\nf(1);").is_ok());
    }
}
