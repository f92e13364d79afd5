use super::*;

fn kinds_and_texts(input: &str) -> Vec<(TokenKind, &str)> {
    tokenize(input).map(|t| (t.kind, t.text)).collect()
}

fn roundtrip(input: &str) -> String {
    tokenize(input).map(|t| t.text).collect()
}

#[test]
fn words_swallow_trailing_horizontal_space() {
    assert_eq!(
        kinds_and_texts("Hello  big\tworld"),
        vec![
            (TokenKind::Word, "Hello  "),
            (TokenKind::Word, "big\t"),
            (TokenKind::Word, "world"),
        ]
    );
}

#[test]
fn inline_dollar_formula_between_words() {
    let tokens = kinds_and_texts("Hello $x^2$ world");
    assert_eq!(
        tokens,
        vec![
            (TokenKind::Word, "Hello "),
            (TokenKind::InlineFormula, "$x^2$ "),
            (TokenKind::Word, "world"),
        ]
    );

    let formula = tokenize("Hello $x^2$ world").nth(1).unwrap();
    assert_eq!(formula.markup(), "$x^2$");
    assert_eq!(formula.formula_body(), Some("x^2"));
}

#[test]
fn paren_and_bracket_delimiters() {
    let tokens = kinds_and_texts(r"a \(y\) b \[z\]");
    assert_eq!(
        tokens,
        vec![
            (TokenKind::Word, "a "),
            (TokenKind::InlineFormula, r"\(y\) "),
            (TokenKind::Word, "b "),
            (TokenKind::BlockFormula, r"\[z\]"),
        ]
    );
    let block = tokenize(r"\[z\]").next().unwrap();
    assert_eq!(block.formula_body(), Some("z"));
}

#[test]
fn double_dollar_is_block_not_two_inlines() {
    let tokens = kinds_and_texts("see $$\\sum_k k$$ done");
    assert_eq!(
        tokens,
        vec![
            (TokenKind::Word, "see "),
            (TokenKind::BlockFormula, "$$\\sum_k k$$ "),
            (TokenKind::Word, "done"),
        ]
    );
}

#[test]
fn block_formula_may_span_lines() {
    let tokens = kinds_and_texts("$$a\n+b$$");
    assert_eq!(tokens, vec![(TokenKind::BlockFormula, "$$a\n+b$$")]);
}

#[test]
fn newlines_are_their_own_tokens() {
    assert_eq!(
        kinds_and_texts("one\ntwo\r\n\nthree"),
        vec![
            (TokenKind::Word, "one"),
            (TokenKind::Newline, "\n"),
            (TokenKind::Word, "two"),
            (TokenKind::Newline, "\r\n"),
            (TokenKind::Newline, "\n"),
            (TokenKind::Word, "three"),
        ]
    );
}

#[test]
fn leading_whitespace_becomes_space_token() {
    assert_eq!(
        kinds_and_texts("  indented\n\tnext"),
        vec![
            (TokenKind::Space, "  "),
            (TokenKind::Word, "indented"),
            (TokenKind::Newline, "\n"),
            (TokenKind::Space, "\t"),
            (TokenKind::Word, "next"),
        ]
    );
}

#[test]
fn currency_is_not_math() {
    let tokens = kinds_and_texts("costs $5 and $10 today");
    assert!(tokens.iter().all(|(k, _)| *k == TokenKind::Word), "{tokens:?}");
    assert_eq!(tokens[1], (TokenKind::Word, "$5 "));
}

#[test]
fn closing_dollar_followed_by_digit_is_not_a_delimiter() {
    // The first candidate closer is followed by `5`, so scanning continues to the next `$`.
    let tokens = kinds_and_texts("$a$5$ x");
    assert_eq!(tokens[0], (TokenKind::InlineFormula, "$a$5$ "));
}

#[test]
fn escaped_dollar_does_not_close() {
    let tokens = kinds_and_texts(r"$a\$b$");
    assert_eq!(tokens, vec![(TokenKind::InlineFormula, r"$a\$b$")]);
}

#[test]
fn unterminated_delimiters_fall_back_to_words() {
    assert_eq!(
        kinds_and_texts("$x + y"),
        vec![
            (TokenKind::Word, "$x "),
            (TokenKind::Word, "+ "),
            (TokenKind::Word, "y")
        ]
    );
    assert_eq!(
        kinds_and_texts("$$open block"),
        vec![(TokenKind::Word, "$$open "), (TokenKind::Word, "block")]
    );
    assert_eq!(
        kinds_and_texts(r"\(never closed"),
        vec![(TokenKind::Word, r"\(never "), (TokenKind::Word, "closed")]
    );
}

#[test]
fn inline_math_does_not_cross_newlines() {
    let tokens = kinds_and_texts("$a\nb$");
    assert_eq!(tokens[0], (TokenKind::Word, "$a"));
    assert_eq!(tokens[1], (TokenKind::Newline, "\n"));
}

#[test]
fn empty_formulas_are_literal() {
    assert_eq!(kinds_and_texts("$$$$"), vec![(TokenKind::Word, "$$$$")]);
    assert_eq!(kinds_and_texts(r"\(\)"), vec![(TokenKind::Word, r"\(\)")]);
}

#[test]
fn formulas_only_start_at_token_boundaries() {
    assert_eq!(kinds_and_texts("f$x$"), vec![(TokenKind::Word, "f$x$")]);
}

#[test]
fn roundtrip_reconstructs_input() {
    let inputs = [
        "",
        "plain",
        "Hello $x^2$ world",
        "  lead\n\n$$\\frac{a}{b}$$\ntrail  ",
        "mixed \\(a\\) and \\[b\\] and $c$.",
        "unicode café $\\alpha$ naïve",
        "lone \r carriage",
        "costs $5 and $10",
        "$unterminated",
    ];
    for input in inputs {
        assert_eq!(roundtrip(input), input);
    }
}

#[test]
fn tokenize_is_restartable() {
    let input = "a $b$ c\n$$d$$";
    let first: Vec<_> = tokenize(input).collect();
    let second: Vec<_> = tokenize(input).collect();
    assert_eq!(first, second);
    assert!(tokenize("").next().is_none());
}
