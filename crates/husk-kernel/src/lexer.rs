//! Lexer for husk command lines.
//!
//! Converts one line of input into a stream of tokens using the logos lexer
//! generator. The token set is deliberately small: words, the pipe
//! separator, the three redirection operators, the background marker, and
//! the command terminator. Quoting is literal (a quoted span is one word);
//! there is no expansion of any kind.

use logos::Logos;

use crate::error::{Error, Result};

/// Tokens produced from one line of shell input.
#[derive(Logos, Debug, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t]+")]
pub enum Token {
    /// `|` — pipeline stage separator.
    #[token("|")]
    Pipe,

    /// `<` — redirect the first stage's input from a file.
    #[token("<")]
    RedirIn,

    /// `>>` — redirect the last stage's output, appending.
    #[token(">>")]
    RedirAppend,

    /// `>` — redirect the last stage's output, truncating.
    #[token(">")]
    RedirOut,

    /// `&` — run the job in the background.
    #[token("&")]
    Background,

    /// `;` — command terminator.
    #[token(";")]
    Terminator,

    /// A bare or quoted word.
    #[regex(r#"[^ \t|<>&;'"]+"#, |lex| lex.slice().to_owned())]
    #[regex(r#""[^"]*""#, strip_quotes)]
    #[regex(r#"'[^']*'"#, strip_quotes)]
    Word(String),
}

fn strip_quotes(lex: &mut logos::Lexer<Token>) -> String {
    let s = lex.slice();
    s[1..s.len() - 1].to_owned()
}

/// Tokenize one line of input.
///
/// The only lexical error is a character no rule accepts, which in this
/// grammar means an unterminated quote.
pub fn tokenize(line: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    for (token, span) in Token::lexer(line).spanned() {
        match token {
            Ok(t) => tokens.push(t),
            Err(()) => {
                return Err(Error::Malformed(format!(
                    "unexpected character at column {}",
                    span.start + 1
                )))
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn word(s: &str) -> Token {
        Token::Word(s.to_string())
    }

    #[test]
    fn test_simple_command() {
        let tokens = tokenize("echo hello world").unwrap();
        assert_eq!(tokens, vec![word("echo"), word("hello"), word("world")]);
    }

    #[test]
    fn test_pipeline_with_background() {
        let tokens = tokenize("cat file | grep x &").unwrap();
        assert_eq!(
            tokens,
            vec![
                word("cat"),
                word("file"),
                Token::Pipe,
                word("grep"),
                word("x"),
                Token::Background,
            ]
        );
    }

    #[test]
    fn test_redirections() {
        let tokens = tokenize("sort < in > out").unwrap();
        assert_eq!(
            tokens,
            vec![
                word("sort"),
                Token::RedirIn,
                word("in"),
                Token::RedirOut,
                word("out"),
            ]
        );
    }

    #[test]
    fn test_append_is_not_two_redirects() {
        let tokens = tokenize("echo hi >> log").unwrap();
        assert_eq!(
            tokens,
            vec![word("echo"), word("hi"), Token::RedirAppend, word("log")]
        );
    }

    #[test]
    fn test_operators_bind_without_spaces() {
        let tokens = tokenize("a|b&").unwrap();
        assert_eq!(
            tokens,
            vec![word("a"), Token::Pipe, word("b"), Token::Background]
        );
    }

    #[rstest]
    #[case::double_quoted(r#"echo "hello world""#, "hello world")]
    #[case::single_quoted("echo 'a | b'", "a | b")]
    #[case::empty_quotes(r#"echo """#, "")]
    fn test_quoted_words(#[case] line: &str, #[case] expected: &str) {
        let tokens = tokenize(line).unwrap();
        assert_eq!(tokens, vec![word("echo"), word(expected)]);
    }

    #[test]
    fn test_terminator_splits_commands() {
        let tokens = tokenize("cd /tmp; ls").unwrap();
        assert_eq!(
            tokens,
            vec![word("cd"), word("/tmp"), Token::Terminator, word("ls")]
        );
    }

    #[test]
    fn test_unterminated_quote_is_an_error() {
        let err = tokenize(r#"echo "oops"#).unwrap_err();
        assert!(err.to_string().contains("not well formed"));
    }

    #[test]
    fn test_empty_line() {
        assert_eq!(tokenize("").unwrap(), vec![]);
        assert_eq!(tokenize("   ").unwrap(), vec![]);
    }
}
