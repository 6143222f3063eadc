//! The comparison/logic targeting grammar.
//!
//! ```text
//! query   := term (("and" | "or") term)*
//! term    := "not" term | "(" query ")" | path "pr" | path op value
//! op      := eq | ne | lt | le | gt | ge | co | sw | ew | in | == | != | < | <= | > | >=
//! value   := string | number | version | true | false | null | "[" value ("," value)* "]"
//! ```
//!
//! `and` and `or` share one precedence level and associate to the left, so
//! `a and b or c` reads as `(a and b) or c`. Use parentheses to be explicit.
//!
//! Nesting is limited to [MAX_DEPTH] levels; deeper queries are rejected as parse errors.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::attribute_value::{parse_semver, AttributeValue};
use crate::query::QueryError;
use crate::util::lookup_path;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Present(String),
    Compare {
        path: String,
        op: CompareOp,
        value: Literal,
    },
}

/// How deeply `not`, parentheses and alternating `and`/`or` chains may nest.
pub(crate) const MAX_DEPTH: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
    In,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Literal {
    Str(String),
    Number(f64),
    Version(semver::Version),
    Bool(bool),
    Null,
    List(Vec<Literal>),
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Op(CompareOp),
    Word(String),
    Str(String),
    Number(f64),
    Version(semver::Version),
}

/// Parses an expression query.
pub(crate) fn parse(query: &str) -> Result<Expr, QueryError> {
    let tokens = Lexer::new(query).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: query.len(),
    };
    let (expr, _) = parser.parse_query(0)?;
    match parser.tokens.get(parser.pos) {
        None => Ok(expr),
        Some((position, token)) => Err(QueryError::Parse {
            position: *position,
            message: format!("unexpected {:?}", token),
        }),
    }
}

impl Expr {
    pub(crate) fn matches(&self, context: &HashMap<String, AttributeValue>) -> bool {
        match self {
            Expr::And(terms) => terms.iter().all(|term| term.matches(context)),
            Expr::Or(terms) => terms.iter().any(|term| term.matches(context)),
            Expr::Not(inner) => !inner.matches(context),
            Expr::Present(path) => lookup_path(context, path)
                .map(|v| !v.is_null())
                .unwrap_or(false),
            Expr::Compare { path, op, value } => {
                match lookup_path(context, path).filter(|v| !v.is_null()) {
                    Some(attribute) => op.apply(attribute, value),
                    None => match op {
                        CompareOp::Eq => *value == Literal::Null,
                        CompareOp::Ne => *value != Literal::Null,
                        _ => false,
                    },
                }
            }
        }
    }
}

impl CompareOp {
    fn from_word(word: &str) -> Option<CompareOp> {
        match word.to_ascii_lowercase().as_str() {
            "eq" => Some(CompareOp::Eq),
            "ne" => Some(CompareOp::Ne),
            "lt" => Some(CompareOp::Lt),
            "le" => Some(CompareOp::Le),
            "gt" => Some(CompareOp::Gt),
            "ge" => Some(CompareOp::Ge),
            "co" => Some(CompareOp::Contains),
            "sw" => Some(CompareOp::StartsWith),
            "ew" => Some(CompareOp::EndsWith),
            "in" => Some(CompareOp::In),
            _ => None,
        }
    }

    fn apply(&self, attribute: &AttributeValue, literal: &Literal) -> bool {
        match self {
            CompareOp::Eq => literal_eq(attribute, literal),
            CompareOp::Ne => !literal_eq(attribute, literal),
            CompareOp::Lt => compare(attribute, literal) == Some(Ordering::Less),
            CompareOp::Le => matches!(
                compare(attribute, literal),
                Some(Ordering::Less | Ordering::Equal)
            ),
            CompareOp::Gt => compare(attribute, literal) == Some(Ordering::Greater),
            CompareOp::Ge => matches!(
                compare(attribute, literal),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            CompareOp::Contains => match (attribute, literal) {
                (AttributeValue::String(s), Literal::Str(sub)) => s.contains(sub.as_str()),
                (AttributeValue::Array(items), _) => {
                    items.iter().any(|item| literal_eq(item, literal))
                }
                _ => false,
            },
            CompareOp::StartsWith => string_op(attribute, literal, |s, p| s.starts_with(p)),
            CompareOp::EndsWith => string_op(attribute, literal, |s, p| s.ends_with(p)),
            CompareOp::In => match literal {
                Literal::List(items) => items.iter().any(|item| literal_eq(attribute, item)),
                _ => false,
            },
        }
    }
}

fn literal_eq(attribute: &AttributeValue, literal: &Literal) -> bool {
    match (attribute, literal) {
        (AttributeValue::String(a), Literal::Str(b)) => a == b,
        (AttributeValue::Number(a), Literal::Number(b)) => a == b,
        (AttributeValue::Bool(a), Literal::Bool(b)) => a == b,
        (AttributeValue::String(_), Literal::Version(b)) => {
            attribute.as_semver().as_ref() == Some(b)
        }
        (AttributeValue::Null, Literal::Null) => true,
        (AttributeValue::Array(items), Literal::List(literals)) => {
            items.len() == literals.len()
                && items.iter().zip(literals).all(|(i, l)| literal_eq(i, l))
        }
        _ => false,
    }
}

fn compare(attribute: &AttributeValue, literal: &Literal) -> Option<Ordering> {
    match (attribute, literal) {
        (AttributeValue::Number(a), Literal::Number(b)) => a.partial_cmp(b),
        (AttributeValue::String(a), Literal::Str(b)) => Some(a.as_str().cmp(b.as_str())),
        (AttributeValue::String(_), Literal::Version(b)) => {
            attribute.as_semver().map(|a| a.cmp(b))
        }
        _ => None,
    }
}

fn string_op<F: Fn(&str, &str) -> bool>(
    attribute: &AttributeValue,
    literal: &Literal,
    f: F,
) -> bool {
    match (attribute, literal) {
        (AttributeValue::String(s), Literal::Str(l)) => f(s, l),
        _ => false,
    }
}

struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Lexer {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn error<T>(position: usize, message: impl Into<String>) -> Result<T, QueryError> {
        Err(QueryError::Parse {
            position,
            message: message.into(),
        })
    }

    fn tokenize(mut self) -> Result<Vec<(usize, Token)>, QueryError> {
        let mut tokens = Vec::new();
        while let Some(&(position, c)) = self.chars.peek() {
            let token = match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                    continue;
                }
                '(' => self.single(Token::LParen),
                ')' => self.single(Token::RParen),
                '[' => self.single(Token::LBracket),
                ']' => self.single(Token::RBracket),
                ',' => self.single(Token::Comma),
                '"' => self.string(position)?,
                '=' | '!' | '<' | '>' => self.symbol(position, c)?,
                c if c.is_ascii_digit() || c == '-' => self.number(position)?,
                c if c.is_alphabetic() || c == '_' => self.word(position),
                other => return Self::error(position, format!("unexpected character '{}'", other)),
            };
            tokens.push((position, token));
        }
        Ok(tokens)
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn symbol(&mut self, position: usize, first: char) -> Result<Token, QueryError> {
        self.chars.next();
        let followed_by_eq = self.chars.next_if(|&(_, c)| c == '=').is_some();
        match (first, followed_by_eq) {
            ('=', true) => Ok(Token::Op(CompareOp::Eq)),
            ('!', true) => Ok(Token::Op(CompareOp::Ne)),
            ('<', true) => Ok(Token::Op(CompareOp::Le)),
            ('<', false) => Ok(Token::Op(CompareOp::Lt)),
            ('>', true) => Ok(Token::Op(CompareOp::Ge)),
            ('>', false) => Ok(Token::Op(CompareOp::Gt)),
            _ => Self::error(position, format!("incomplete operator '{}'", first)),
        }
    }

    fn string(&mut self, position: usize) -> Result<Token, QueryError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                None => return Self::error(position, "unterminated string"),
                Some((_, '"')) => return Ok(Token::Str(value)),
                Some((escape_at, '\\')) => match self.chars.next() {
                    Some((_, '"')) => value.push('"'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, '/')) => value.push('/'),
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, 'u')) => {
                        let hex: String = (0..4)
                            .filter_map(|_| self.chars.next())
                            .map(|(_, c)| c)
                            .collect();
                        match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                            Some(c) => value.push(c),
                            None => return Self::error(escape_at, "invalid unicode escape"),
                        }
                    }
                    _ => return Self::error(escape_at, "invalid escape sequence"),
                },
                Some((_, c)) => value.push(c),
            }
        }
    }

    fn number(&mut self, position: usize) -> Result<Token, QueryError> {
        let mut end = position;
        let mut dots = 0;
        if let Some((i, '-')) = self.chars.next_if(|&(_, c)| c == '-') {
            end = i + 1;
        }
        while let Some((i, c)) = self.chars.next_if(|&(_, c)| c.is_ascii_digit() || c == '.') {
            if c == '.' {
                dots += 1;
            }
            end = i + 1;
        }

        let negative = self.source[position..].starts_with('-');
        if dots == 2 && !negative {
            // Bare semantic version, optionally with pre-release or build suffix.
            while let Some((i, c)) = self.chars.next_if(|&(_, c)| {
                c.is_ascii_alphanumeric() || c == '-' || c == '+' || c == '.'
            }) {
                end = i + c.len_utf8();
            }
            let text = &self.source[position..end];
            return match parse_semver(text) {
                Some(version) => Ok(Token::Version(version)),
                None => Self::error(position, format!("invalid version '{}'", text)),
            };
        }

        if let Some((i, _)) = self.chars.next_if(|&(_, c)| c == 'e' || c == 'E') {
            end = i + 1;
            if let Some((i, _)) = self.chars.next_if(|&(_, c)| c == '+' || c == '-') {
                end = i + 1;
            }
            while let Some((i, _)) = self.chars.next_if(|&(_, c)| c.is_ascii_digit()) {
                end = i + 1;
            }
        }

        let text = &self.source[position..end];
        match text.parse::<f64>() {
            Ok(n) => Ok(Token::Number(n)),
            Err(_) => Self::error(position, format!("invalid number '{}'", text)),
        }
    }

    fn word(&mut self, position: usize) -> Token {
        let mut end = position;
        while let Some((i, c)) = self
            .chars
            .next_if(|&(_, c)| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            end = i + c.len_utf8();
        }
        Token::Word(self.source[position..end].to_string())
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn next(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn unexpected<T>(
        &self,
        found: Option<(usize, Token)>,
        expected: &str,
    ) -> Result<T, QueryError> {
        Err(match found {
            Some((position, token)) => QueryError::Parse {
                position,
                message: format!("expected {} but found {:?}", expected, token),
            },
            None => QueryError::Parse {
                position: self.end,
                message: format!("expected {} but reached the end of the query", expected),
            },
        })
    }

    fn too_deep<T>(&self) -> Result<T, QueryError> {
        Err(QueryError::Parse {
            position: self.tokens.get(self.pos).map_or(self.end, |(position, _)| *position),
            message: format!("query is nested more than {} levels deep", MAX_DEPTH),
        })
    }

    /// Parses a chain of terms and returns it with the height of its tree. Runs of the same
    /// logical operator are gathered into one node.
    fn parse_query(&mut self, depth: usize) -> Result<(Expr, usize), QueryError> {
        let (mut lhs, mut height) = self.parse_term(depth)?;
        loop {
            let logical = match self.peek() {
                Some(Token::Word(w)) if w.eq_ignore_ascii_case("and") => true,
                Some(Token::Word(w)) if w.eq_ignore_ascii_case("or") => false,
                _ => return Ok((lhs, height)),
            };
            self.pos += 1;
            let (rhs, rhs_height) = self.parse_term(depth)?;
            lhs = match (lhs, logical) {
                (Expr::And(mut terms), true) => {
                    terms.push(rhs);
                    height = height.max(rhs_height + 1);
                    Expr::And(terms)
                }
                (Expr::Or(mut terms), false) => {
                    terms.push(rhs);
                    height = height.max(rhs_height + 1);
                    Expr::Or(terms)
                }
                (lhs, true) => {
                    height = height.max(rhs_height) + 1;
                    Expr::And(vec![lhs, rhs])
                }
                (lhs, false) => {
                    height = height.max(rhs_height) + 1;
                    Expr::Or(vec![lhs, rhs])
                }
            };
            if depth + height > MAX_DEPTH {
                return self.too_deep();
            }
        }
    }

    fn parse_term(&mut self, depth: usize) -> Result<(Expr, usize), QueryError> {
        if depth >= MAX_DEPTH {
            return self.too_deep();
        }
        match self.next() {
            Some((_, Token::Word(w))) if w.eq_ignore_ascii_case("not") => {
                let (inner, height) = self.parse_term(depth + 1)?;
                Ok((Expr::Not(Box::new(inner)), height + 1))
            }
            Some((_, Token::LParen)) => {
                let inner = self.parse_query(depth + 1)?;
                match self.next() {
                    Some((_, Token::RParen)) => Ok(inner),
                    other => self.unexpected(other, "')'"),
                }
            }
            Some((_, Token::Word(path))) => Ok((self.parse_comparison(path)?, 1)),
            other => self.unexpected(other, "an attribute, 'not' or '('"),
        }
    }

    fn parse_comparison(&mut self, path: String) -> Result<Expr, QueryError> {
        let op = match self.next() {
            Some((_, Token::Op(op))) => op,
            Some((_, Token::Word(w))) if w.eq_ignore_ascii_case("pr") => {
                return Ok(Expr::Present(path))
            }
            Some((position, Token::Word(w))) => match CompareOp::from_word(&w) {
                Some(op) => op,
                None => return self.unexpected(Some((position, Token::Word(w))), "an operator"),
            },
            other => return self.unexpected(other, "an operator"),
        };
        let value = self.parse_value()?;
        Ok(Expr::Compare { path, op, value })
    }

    fn parse_value(&mut self) -> Result<Literal, QueryError> {
        match self.next() {
            Some((_, Token::Str(s))) => Ok(Literal::Str(s)),
            Some((_, Token::Number(n))) => Ok(Literal::Number(n)),
            Some((_, Token::Version(v))) => Ok(Literal::Version(v)),
            Some((position, Token::Word(w))) => match w.to_ascii_lowercase().as_str() {
                "true" => Ok(Literal::Bool(true)),
                "false" => Ok(Literal::Bool(false)),
                "null" | "nil" => Ok(Literal::Null),
                _ => self.unexpected(Some((position, Token::Word(w))), "a value"),
            },
            Some((_, Token::LBracket)) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.pos += 1;
                    return Ok(Literal::List(items));
                }
                loop {
                    items.push(self.parse_value()?);
                    match self.next() {
                        Some((_, Token::Comma)) => continue,
                        Some((_, Token::RBracket)) => return Ok(Literal::List(items)),
                        other => return self.unexpected(other, "',' or ']'"),
                    }
                }
            }
            other => self.unexpected(other, "a value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use test_case::test_case;

    fn context() -> HashMap<String, AttributeValue> {
        hashmap! {
            "key".to_string() => AttributeValue::from("user-key"),
            "anonymous".to_string() => AttributeValue::Bool(true),
            "email".to_string() => AttributeValue::from("jane.doe@example.com"),
            "age".to_string() => AttributeValue::from(32_i64),
            "score".to_string() => AttributeValue::from(4.5),
            "app_version".to_string() => AttributeValue::from("1.10.2"),
            "groups".to_string() => AttributeValue::from(vec!["beta", "staff"]),
            "nothing".to_string() => AttributeValue::Null,
            "company".to_string() => AttributeValue::from(hashmap! {
                "name" => AttributeValue::from("Acme"),
                "size" => AttributeValue::from(120_i64),
            }),
        }
    }

    fn eval(query: &str) -> bool {
        parse(query)
            .unwrap_or_else(|e| panic!("`{}` should parse: {}", query, e))
            .matches(&context())
    }

    #[test_case(r#"key eq "user-key""#, true)]
    #[test_case(r#"key == "user-key""#, true)]
    #[test_case(r#"key EQ "USER-KEY""#, false; "case sensitive values")]
    #[test_case(r#"key ne "other""#, true)]
    #[test_case(r#"key != "user-key""#, false)]
    #[test_case("anonymous eq true", true)]
    #[test_case("anonymous eq false", false)]
    fn equality(query: &str, expected: bool) {
        assert_eq!(eval(query), expected);
    }

    #[test_case("age gt 30", true)]
    #[test_case("age > 32", false)]
    #[test_case("age ge 32", true)]
    #[test_case("age lt 32.5", true)]
    #[test_case("age <= 31", false)]
    #[test_case("score eq 4.5", true)]
    #[test_case("score lt -1", false)]
    #[test_case("age lt 1e3", true)]
    #[test_case(r#"age eq "32""#, false; "number against string never matches")]
    fn numeric(query: &str, expected: bool) {
        assert_eq!(eval(query), expected);
    }

    #[test_case(r#"email co "doe""#, true)]
    #[test_case(r#"email sw "jane""#, true)]
    #[test_case(r#"email ew "@example.com""#, true)]
    #[test_case(r#"email ew "@example.org""#, false)]
    #[test_case(r#"groups co "staff""#, true)]
    #[test_case(r#"groups co "admin""#, false)]
    #[test_case(r#"key in ["a", "user-key"]"#, true)]
    #[test_case(r#"key in []"#, false)]
    #[test_case("age in [18, 32]", true)]
    fn strings_and_lists(query: &str, expected: bool) {
        assert_eq!(eval(query), expected);
    }

    #[test_case("app_version gt 1.9.0", true; "bare versions compare as semver")]
    #[test_case(r#"app_version gt "1.9.0""#, false; "quoted versions compare as strings")]
    #[test_case("app_version eq 1.10.2", true)]
    #[test_case("app_version lt 1.10.3-rc.1", true)]
    #[test_case("app_version ge 2.0.0", false)]
    fn versions(query: &str, expected: bool) {
        assert_eq!(eval(query), expected);
    }

    #[test_case("email pr", true)]
    #[test_case("missing pr", false)]
    #[test_case("nothing pr", false)]
    #[test_case(r#"missing eq "x""#, false)]
    #[test_case(r#"missing ne "x""#, true)]
    #[test_case("missing eq null", true)]
    #[test_case("nothing eq null", true)]
    #[test_case("email eq null", false)]
    #[test_case("missing gt 3", false)]
    fn missing_attributes(query: &str, expected: bool) {
        assert_eq!(eval(query), expected);
    }

    #[test_case(r#"company.name eq "Acme""#, true)]
    #[test_case("company.size gt 100", true)]
    #[test_case("company.missing pr", false)]
    fn nested_paths(query: &str, expected: bool) {
        assert_eq!(eval(query), expected);
    }

    #[test_case(r#"key eq "user-key" and age gt 18"#, true)]
    #[test_case(r#"key eq "user-key" AND age gt 40"#, false)]
    #[test_case(r#"key eq "x" or age gt 18"#, true)]
    #[test_case(r#"not (key eq "x")"#, true)]
    #[test_case(r#"NOT (key eq "user-key")"#, false)]
    #[test_case(r#"(key eq "x" or age gt 18) and email pr"#, true)]
    #[test_case(r#"key eq "x" and age gt 18 or anonymous eq true"#, true; "left associative")]
    #[test_case(r#"anonymous eq true or key eq "x" and age gt 99"#, false; "equal precedence")]
    fn logic(query: &str, expected: bool) {
        assert_eq!(eval(query), expected);
    }

    #[test]
    fn parses_escapes() {
        let expr = parse(r#"name eq "say \"hi\"\né""#).unwrap();
        assert_eq!(
            expr,
            Expr::Compare {
                path: "name".to_string(),
                op: CompareOp::Eq,
                value: Literal::Str("say \"hi\"\né".to_string()),
            }
        );
    }

    #[test_case("key eq"; "missing value")]
    #[test_case(r#"key zz "x""#; "unknown operator")]
    #[test_case(r#"(key eq "x""#; "unclosed paren")]
    #[test_case(r#"key eq "x"#; "unterminated string")]
    #[test_case(r#"key eq "x" extra"#; "trailing tokens")]
    #[test_case(r#"key = "x""#; "single equals")]
    #[test_case("key in [1, 2"; "unclosed list")]
    #[test_case("key eq 1.2.x"; "bad version")]
    #[test_case("# nope"; "bad character")]
    fn rejects(query: &str) {
        assert!(matches!(parse(query), Err(QueryError::Parse { .. })));
    }

    #[test]
    fn long_chains_of_one_operator_stay_flat() {
        let query = vec![r#"key ne "x""#; 5_000].join(" and ");
        let expr = parse(&query).unwrap();
        assert!(matches!(&expr, Expr::And(terms) if terms.len() == 5_000));
        assert!(expr.matches(&context()));
    }

    #[test_case(&format!("{}key pr", "not ".repeat(20_000)); "negations")]
    #[test_case(&format!("{}key pr{}", "(".repeat(20_000), ")".repeat(20_000)); "parentheses")]
    #[test_case(&vec!["key pr and key pr or key pr"; 200].join(" and "); "alternating chain")]
    fn rejects_deep_nesting(query: &str) {
        let error = parse(query).unwrap_err();
        assert!(error.to_string().contains("nested more than 128 levels"));
    }

    #[test]
    fn nesting_up_to_the_limit_parses() {
        let query = format!("{}key pr", "not ".repeat(MAX_DEPTH - 1));
        assert!(!eval(&query));
    }
}
