//! A small SPARQL subset evaluated directly against [`TripleStore`].
//!
//! Supported: `PREFIX`, `SELECT [DISTINCT]` with variables, `*` and
//! `(AGG(?v) AS ?alias)` projections, `ASK`, basic graph patterns using the
//! `.`/`;`/`,` abbreviations and the `a` keyword, `FILTER`, `GROUP BY`,
//! `ORDER BY`, `LIMIT` and `OFFSET`. Everything else is rejected with
//! [`SparqlError::Unsupported`].

use crate::core::store::TripleStore;
use crate::domain::model::{LiteralKind, Term, PREFIXES, RDF_TYPE, XSD_NS};
use regex::RegexBuilder;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SparqlError {
    #[error("Query cannot be empty")]
    Empty,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported SPARQL feature: {0}")]
    Unsupported(String),

    #[error("Unknown prefix: {0}")]
    UnknownPrefix(String),
}

type SparqlResult<T> = std::result::Result<T, SparqlError>;

type Binding = HashMap<String, Term>;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Select {
        vars: Vec<String>,
        rows: Vec<Vec<Option<Term>>>,
    },
    Ask(bool),
}

impl QueryResult {
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Select { rows, .. } => rows.len(),
            QueryResult::Ask(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse and run a query in one go.
pub fn query(store: &TripleStore, text: &str) -> SparqlResult<QueryResult> {
    parse(text)?.execute(store)
}

// ---- AST ----

#[derive(Debug, Clone, PartialEq)]
enum PatternTerm {
    Var(String),
    Const(Term),
}

#[derive(Debug, Clone, PartialEq)]
struct TriplePattern {
    subject: PatternTerm,
    predicate: PatternTerm,
    object: PatternTerm,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Var(String),
    Const(Term),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Sample,
}

#[derive(Debug, Clone, PartialEq)]
enum SelectItem {
    Var(String),
    Aggregate {
        func: AggFunc,
        arg: Option<String>,
        distinct: bool,
        alias: String,
    },
}

impl SelectItem {
    fn name(&self) -> &str {
        match self {
            SelectItem::Var(v) => v,
            SelectItem::Aggregate { alias, .. } => alias,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Projection {
    All,
    Items(Vec<SelectItem>),
}

#[derive(Debug, Clone, PartialEq)]
enum QueryForm {
    Select(Projection),
    Ask,
}

#[derive(Debug, Clone, PartialEq)]
struct OrderKey {
    expr: Expr,
    descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    form: QueryForm,
    distinct: bool,
    patterns: Vec<TriplePattern>,
    filters: Vec<Expr>,
    group_by: Vec<String>,
    order_by: Vec<OrderKey>,
    limit: Option<usize>,
    offset: usize,
}

// ---- Tokenizer ----

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Var(String),
    Iri(String),
    Str(String),
    Num(String),
    Punct(&'static str),
}

fn scan_iri(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    while j < chars.len() {
        match chars[j] {
            '>' => return Some(j),
            c if c.is_whitespace() => return None,
            '<' | '"' | '{' | '}' | '|' | '^' | '`' | '\\' => return None,
            _ => j += 1,
        }
    }
    None
}

// 括號內緊接運算元之後的 `<` 是比較運算子，不是 IRI 開頭
fn ends_operand(token: Option<&Token>) -> bool {
    matches!(
        token,
        Some(Token::Var(_) | Token::Num(_) | Token::Str(_) | Token::Iri(_) | Token::Punct(")"))
    )
}

fn tokenize(input: &str) -> SparqlResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '?' | '$' => {
                let start = i + 1;
                i = start;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                if i == start {
                    return Err(SparqlError::Parse("empty variable name".to_string()));
                }
                tokens.push(Token::Var(chars[start..i].iter().collect()));
            }
            '<' => {
                let comparison = depth > 0 && ends_operand(tokens.last());
                if let Some(end) = scan_iri(&chars, i).filter(|_| !comparison) {
                    tokens.push(Token::Iri(chars[i + 1..end].iter().collect()));
                    i = end + 1;
                } else if next == Some('=') {
                    tokens.push(Token::Punct("<="));
                    i += 2;
                } else {
                    tokens.push(Token::Punct("<"));
                    i += 1;
                }
            }
            '>' => {
                if next == Some('=') {
                    tokens.push(Token::Punct(">="));
                    i += 2;
                } else {
                    tokens.push(Token::Punct(">"));
                    i += 1;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(SparqlError::Parse("unterminated string literal".to_string()))
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = match chars.get(i + 1) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some('r') => '\r',
                                Some(&other) => other,
                                None => {
                                    return Err(SparqlError::Parse(
                                        "unterminated string literal".to_string(),
                                    ))
                                }
                            };
                            value.push(escaped);
                            i += 2;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            '{' | '}' | '(' | ')' | ';' | ',' | '*' | '.' | '=' => {
                let punct = match c {
                    '{' => "{",
                    '}' => "}",
                    '(' => "(",
                    ')' => ")",
                    ';' => ";",
                    ',' => ",",
                    '*' => "*",
                    '.' => ".",
                    _ => "=",
                };
                match c {
                    '(' => depth += 1,
                    ')' => depth = depth.saturating_sub(1),
                    _ => {}
                }
                tokens.push(Token::Punct(punct));
                i += 1;
            }
            '!' => {
                if next == Some('=') {
                    tokens.push(Token::Punct("!="));
                    i += 2;
                } else {
                    tokens.push(Token::Punct("!"));
                    i += 1;
                }
            }
            '&' if next == Some('&') => {
                tokens.push(Token::Punct("&&"));
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Punct("||"));
                i += 2;
            }
            '^' if next == Some('^') => {
                tokens.push(Token::Punct("^^"));
                i += 2;
            }
            '-' | '+' | '0'..='9' => {
                if !c.is_ascii_digit() && !next.is_some_and(|n| n.is_ascii_digit()) {
                    return Err(SparqlError::Unsupported(format!("arithmetic operator '{}'", c)));
                }
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                tokens.push(Token::Num(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' || c == ':' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | ':' | '-'))
                {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => {
                return Err(SparqlError::Parse(format!("unexpected character '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

// ---- Parser ----

const UNSUPPORTED_KEYWORDS: [&str; 10] = [
    "OPTIONAL", "UNION", "MINUS", "BIND", "VALUES", "GRAPH", "SERVICE", "CONSTRUCT", "DESCRIBE",
    "HAVING",
];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    prefixes: HashMap<String, String>,
}

pub fn parse(text: &str) -> SparqlResult<Query> {
    if text.trim().is_empty() {
        return Err(SparqlError::Empty);
    }
    let tokens = tokenize(text)?;

    // 與 rdflib 相同，預先綁定常用前綴
    let mut prefixes: HashMap<String, String> = PREFIXES
        .iter()
        .map(|(p, ns)| (p.to_string(), ns.to_string()))
        .collect();
    prefixes.insert("xsd".to_string(), XSD_NS.to_string());

    let mut parser = Parser {
        tokens,
        pos: 0,
        prefixes,
    };
    parser.parse_query()
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> SparqlResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(keyword))
        }
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(Token::Punct(p)) if *p == punct)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> SparqlResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected(punct))
        }
    }

    fn unexpected(&self, expected: &str) -> SparqlError {
        match self.peek() {
            Some(token) => SparqlError::Parse(format!(
                "expected {} but found {}",
                expected,
                describe(token)
            )),
            None => SparqlError::Parse(format!("expected {} but reached end of query", expected)),
        }
    }

    fn expect_var(&mut self) -> SparqlResult<String> {
        match self.peek() {
            Some(Token::Var(v)) => {
                let v = v.clone();
                self.pos += 1;
                Ok(v)
            }
            _ => Err(self.unexpected("variable")),
        }
    }

    fn expect_number(&mut self) -> SparqlResult<usize> {
        match self.peek() {
            Some(Token::Num(n)) => {
                let value = n
                    .parse()
                    .map_err(|_| SparqlError::Parse(format!("invalid number '{}'", n)))?;
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.unexpected("number")),
        }
    }

    fn check_unsupported(&self) -> SparqlResult<()> {
        if let Some(Token::Word(w)) = self.peek() {
            let upper = w.to_ascii_uppercase();
            if UNSUPPORTED_KEYWORDS.contains(&upper.as_str()) {
                return Err(SparqlError::Unsupported(upper));
            }
        }
        Ok(())
    }

    fn parse_query(&mut self) -> SparqlResult<Query> {
        while self.eat_keyword("PREFIX") {
            let name = match self.next() {
                Some(Token::Word(w)) if w.ends_with(':') => w.trim_end_matches(':').to_string(),
                _ => return Err(SparqlError::Parse("expected prefix name".to_string())),
            };
            let iri = match self.next() {
                Some(Token::Iri(iri)) => iri,
                _ => return Err(SparqlError::Parse("expected IRI after prefix".to_string())),
            };
            self.prefixes.insert(name, iri);
        }
        if self.is_keyword("BASE") {
            return Err(SparqlError::Unsupported("BASE".to_string()));
        }
        self.check_unsupported()?;

        let mut query = Query {
            form: QueryForm::Ask,
            distinct: false,
            patterns: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: 0,
        };

        if self.eat_keyword("ASK") {
            self.eat_keyword("WHERE");
            self.parse_group(&mut query)?;
        } else if self.eat_keyword("SELECT") {
            query.distinct = self.eat_keyword("DISTINCT");
            self.eat_keyword("REDUCED");
            query.form = QueryForm::Select(self.parse_projection()?);
            if self.is_keyword("FROM") {
                return Err(SparqlError::Unsupported("FROM".to_string()));
            }
            self.eat_keyword("WHERE");
            self.parse_group(&mut query)?;
            self.parse_modifiers(&mut query)?;
        } else {
            return Err(self.unexpected("SELECT or ASK"));
        }

        if let Some(token) = self.peek() {
            return Err(SparqlError::Parse(format!(
                "unexpected trailing {}",
                describe(token)
            )));
        }
        Ok(query)
    }

    fn parse_projection(&mut self) -> SparqlResult<Projection> {
        if self.eat_punct("*") {
            return Ok(Projection::All);
        }
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Var(_)) => items.push(SelectItem::Var(self.expect_var()?)),
                Some(Token::Punct("(")) => {
                    self.pos += 1;
                    items.push(self.parse_aggregate()?);
                }
                _ => break,
            }
        }
        if items.is_empty() {
            return Err(self.unexpected("projection"));
        }
        Ok(Projection::Items(items))
    }

    fn parse_aggregate(&mut self) -> SparqlResult<SelectItem> {
        let func = match self.next() {
            Some(Token::Word(w)) => match w.to_ascii_uppercase().as_str() {
                "COUNT" => AggFunc::Count,
                "SUM" => AggFunc::Sum,
                "AVG" => AggFunc::Avg,
                "MIN" => AggFunc::Min,
                "MAX" => AggFunc::Max,
                "SAMPLE" => AggFunc::Sample,
                other => return Err(SparqlError::Unsupported(format!("projection {}", other))),
            },
            _ => return Err(SparqlError::Unsupported("projected expression".to_string())),
        };
        self.expect_punct("(")?;
        let distinct = self.eat_keyword("DISTINCT");
        let arg = if func == AggFunc::Count && self.eat_punct("*") {
            None
        } else {
            Some(self.expect_var()?)
        };
        self.expect_punct(")")?;
        self.expect_keyword("AS")?;
        let alias = self.expect_var()?;
        self.expect_punct(")")?;
        Ok(SelectItem::Aggregate {
            func,
            arg,
            distinct,
            alias,
        })
    }

    fn parse_group(&mut self, query: &mut Query) -> SparqlResult<()> {
        self.expect_punct("{")?;
        loop {
            self.check_unsupported()?;
            match self.peek() {
                None => return Err(SparqlError::Parse("unterminated group pattern".to_string())),
                Some(Token::Punct("}")) => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(Token::Punct(".")) => self.pos += 1,
                Some(Token::Punct("{")) => {
                    return Err(SparqlError::Unsupported("nested group pattern".to_string()))
                }
                Some(Token::Word(w)) if w.eq_ignore_ascii_case("FILTER") => {
                    self.pos += 1;
                    let expr = self.parse_filter()?;
                    query.filters.push(expr);
                }
                Some(_) => self.parse_triples_block(&mut query.patterns)?,
            }
        }
    }

    fn parse_triples_block(&mut self, out: &mut Vec<TriplePattern>) -> SparqlResult<()> {
        let subject = self.parse_pattern_term()?;
        loop {
            let predicate = if self.eat_keyword("a") {
                PatternTerm::Const(Term::iri(RDF_TYPE))
            } else {
                self.parse_pattern_term()?
            };
            loop {
                let object = self.parse_pattern_term()?;
                out.push(TriplePattern {
                    subject: subject.clone(),
                    predicate: predicate.clone(),
                    object,
                });
                if !self.eat_punct(",") {
                    break;
                }
            }
            if self.eat_punct(";") {
                if self.is_punct(".") || self.is_punct("}") {
                    return Ok(());
                }
                continue;
            }
            return Ok(());
        }
    }

    fn parse_pattern_term(&mut self) -> SparqlResult<PatternTerm> {
        if let Some(Token::Var(_)) = self.peek() {
            return Ok(PatternTerm::Var(self.expect_var()?));
        }
        Ok(PatternTerm::Const(self.parse_constant()?))
    }

    fn resolve_prefixed(&self, word: &str) -> SparqlResult<Term> {
        let (prefix, local) = word
            .split_once(':')
            .ok_or_else(|| SparqlError::Parse(format!("unexpected word '{}'", word)))?;
        let ns = self
            .prefixes
            .get(prefix)
            .ok_or_else(|| SparqlError::UnknownPrefix(prefix.to_string()))?;
        Ok(Term::iri(format!("{}{}", ns, local)))
    }

    fn parse_constant(&mut self) -> SparqlResult<Term> {
        match self.next() {
            Some(Token::Iri(iri)) => Ok(Term::iri(iri)),
            Some(Token::Num(n)) => number_term(&n),
            Some(Token::Str(s)) => {
                if self.eat_punct("^^") {
                    let datatype = match self.next() {
                        Some(Token::Iri(iri)) => iri,
                        Some(Token::Word(w)) => self.resolve_prefixed(&w)?.lexical().to_string(),
                        _ => return Err(self.unexpected("datatype")),
                    };
                    typed_literal(s, &datatype)
                } else {
                    Ok(Term::string(s))
                }
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("true") => Ok(Term::boolean(true)),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("false") => Ok(Term::boolean(false)),
            Some(Token::Word(w)) if w.contains(':') => self.resolve_prefixed(&w),
            Some(token) => Err(SparqlError::Parse(format!(
                "unexpected {} in pattern",
                describe(&token)
            ))),
            None => Err(SparqlError::Parse("unexpected end of query".to_string())),
        }
    }

    fn parse_filter(&mut self) -> SparqlResult<Expr> {
        if self.eat_punct("(") {
            let expr = self.parse_or()?;
            self.expect_punct(")")?;
            Ok(expr)
        } else {
            self.parse_primary()
        }
    }

    fn parse_or(&mut self) -> SparqlResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_punct("||") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> SparqlResult<Expr> {
        let mut left = self.parse_relational()?;
        while self.eat_punct("&&") {
            let right = self.parse_relational()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> SparqlResult<Expr> {
        let left = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::Punct("=")) => CmpOp::Eq,
            Some(Token::Punct("!=")) => CmpOp::Ne,
            Some(Token::Punct("<")) => CmpOp::Lt,
            Some(Token::Punct(">")) => CmpOp::Gt,
            Some(Token::Punct("<=")) => CmpOp::Le,
            Some(Token::Punct(">=")) => CmpOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_unary()?;
        Ok(Expr::Cmp(op, Box::new(left), Box::new(right)))
    }

    fn parse_unary(&mut self) -> SparqlResult<Expr> {
        if self.eat_punct("!") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> SparqlResult<Expr> {
        match self.peek().cloned() {
            Some(Token::Punct("(")) => {
                self.pos += 1;
                let expr = self.parse_or()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Some(Token::Var(v)) => {
                self.pos += 1;
                Ok(Expr::Var(v))
            }
            Some(Token::Word(w))
                if !w.contains(':')
                    && matches!(self.tokens.get(self.pos + 1), Some(Token::Punct("("))) =>
            {
                self.pos += 2;
                let name = w.to_ascii_lowercase();
                if !KNOWN_FUNCTIONS.contains(&name.as_str()) {
                    return Err(SparqlError::Unsupported(format!("function {}", w)));
                }
                let mut args = Vec::new();
                if !self.eat_punct(")") {
                    loop {
                        args.push(self.parse_or()?);
                        if self.eat_punct(")") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Call(name, args))
            }
            _ => Ok(Expr::Const(self.parse_constant()?)),
        }
    }

    fn parse_modifiers(&mut self, query: &mut Query) -> SparqlResult<()> {
        if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            loop {
                if let Some(Token::Var(_)) = self.peek() {
                    query.group_by.push(self.expect_var()?);
                } else if self.is_punct("(") {
                    self.pos += 1;
                    query.group_by.push(self.expect_var()?);
                    self.expect_punct(")")?;
                } else {
                    break;
                }
            }
            if query.group_by.is_empty() {
                return Err(self.unexpected("variable after GROUP BY"));
            }
        }
        self.check_unsupported()?;

        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                if self.eat_keyword("ASC") || self.is_punct("(") {
                    query.order_by.push(OrderKey {
                        expr: self.parse_bracketed()?,
                        descending: false,
                    });
                } else if self.eat_keyword("DESC") {
                    query.order_by.push(OrderKey {
                        expr: self.parse_bracketed()?,
                        descending: true,
                    });
                } else if let Some(Token::Var(_)) = self.peek() {
                    query.order_by.push(OrderKey {
                        expr: Expr::Var(self.expect_var()?),
                        descending: false,
                    });
                } else {
                    break;
                }
            }
            if query.order_by.is_empty() {
                return Err(self.unexpected("ordering condition"));
            }
        }

        // LIMIT / OFFSET 可任意順序
        loop {
            if self.eat_keyword("LIMIT") {
                query.limit = Some(self.expect_number()?);
            } else if self.eat_keyword("OFFSET") {
                query.offset = self.expect_number()?;
            } else {
                return Ok(());
            }
        }
    }

    fn parse_bracketed(&mut self) -> SparqlResult<Expr> {
        self.expect_punct("(")?;
        let expr = self.parse_or()?;
        self.expect_punct(")")?;
        Ok(expr)
    }
}

const KNOWN_FUNCTIONS: [&str; 13] = [
    "str", "lcase", "ucase", "contains", "strstarts", "strends", "regex", "bound", "strlen",
    "isiri", "isuri", "isliteral", "sameterm",
];

fn describe(token: &Token) -> String {
    match token {
        Token::Word(w) => format!("'{}'", w),
        Token::Var(v) => format!("'?{}'", v),
        Token::Iri(i) => format!("'<{}>'", i),
        Token::Str(s) => format!("\"{}\"", s),
        Token::Num(n) => format!("'{}'", n),
        Token::Punct(p) => format!("'{}'", p),
    }
}

fn number_term(text: &str) -> SparqlResult<Term> {
    if text.contains('.') {
        text.parse::<f64>()
            .map(Term::decimal)
            .map_err(|_| SparqlError::Parse(format!("invalid number '{}'", text)))
    } else {
        text.parse::<i64>()
            .map(Term::integer)
            .map_err(|_| SparqlError::Parse(format!("invalid number '{}'", text)))
    }
}

fn typed_literal(value: String, datatype: &str) -> SparqlResult<Term> {
    let local = datatype.strip_prefix(XSD_NS).unwrap_or(datatype);
    match local {
        "decimal" | "double" | "float" => value
            .parse::<f64>()
            .map(Term::decimal)
            .map_err(|_| SparqlError::Parse(format!("invalid {} literal '{}'", local, value))),
        "integer" | "int" | "long" => value
            .parse::<i64>()
            .map(Term::integer)
            .map_err(|_| SparqlError::Parse(format!("invalid {} literal '{}'", local, value))),
        "boolean" => Ok(Term::boolean(value == "true" || value == "1")),
        _ => Ok(Term::string(value)),
    }
}

// ---- Evaluation ----

fn effective_boolean(term: &Term) -> bool {
    match term {
        Term::Iri(_) => true,
        Term::Literal { value, kind } => match kind {
            LiteralKind::Boolean => value == "true",
            LiteralKind::String => !value.is_empty(),
            LiteralKind::Decimal | LiteralKind::Integer => {
                value.parse::<f64>().map(|n| n != 0.0).unwrap_or(false)
            }
        },
    }
}

fn terms_equal(a: &Term, b: &Term) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

impl Expr {
    /// `None` is an evaluation error (unbound variable, type error).
    fn eval(&self, binding: &Binding) -> Option<Term> {
        match self {
            Expr::Var(v) => binding.get(v).cloned(),
            Expr::Const(t) => Some(t.clone()),
            Expr::Not(inner) => Some(Term::boolean(!effective_boolean(&inner.eval(binding)?))),
            Expr::And(a, b) => {
                let left = a.eval(binding).map(|t| effective_boolean(&t));
                let right = b.eval(binding).map(|t| effective_boolean(&t));
                match (left, right) {
                    (Some(false), _) | (_, Some(false)) => Some(Term::boolean(false)),
                    (Some(true), Some(true)) => Some(Term::boolean(true)),
                    _ => None,
                }
            }
            Expr::Or(a, b) => {
                let left = a.eval(binding).map(|t| effective_boolean(&t));
                let right = b.eval(binding).map(|t| effective_boolean(&t));
                match (left, right) {
                    (Some(true), _) | (_, Some(true)) => Some(Term::boolean(true)),
                    (Some(false), Some(false)) => Some(Term::boolean(false)),
                    _ => None,
                }
            }
            Expr::Cmp(op, a, b) => {
                let (left, right) = (a.eval(binding)?, b.eval(binding)?);
                let result = match op {
                    CmpOp::Eq => terms_equal(&left, &right),
                    CmpOp::Ne => !terms_equal(&left, &right),
                    CmpOp::Lt => left.compare(&right) == Ordering::Less,
                    CmpOp::Gt => left.compare(&right) == Ordering::Greater,
                    CmpOp::Le => left.compare(&right) != Ordering::Greater,
                    CmpOp::Ge => left.compare(&right) != Ordering::Less,
                };
                Some(Term::boolean(result))
            }
            Expr::Call(name, args) => eval_call(name, args, binding),
        }
    }
}

fn eval_call(name: &str, args: &[Expr], binding: &Binding) -> Option<Term> {
    if name == "bound" {
        return match args.first() {
            Some(Expr::Var(v)) => Some(Term::boolean(binding.contains_key(v))),
            _ => None,
        };
    }

    let values: Vec<Term> = args
        .iter()
        .map(|a| a.eval(binding))
        .collect::<Option<Vec<_>>>()?;
    let text = |i: usize| values.get(i).map(|t| t.lexical());

    match name {
        "str" => Some(Term::string(text(0)?)),
        "lcase" => Some(Term::string(text(0)?.to_lowercase())),
        "ucase" => Some(Term::string(text(0)?.to_uppercase())),
        "strlen" => Some(Term::integer(text(0)?.chars().count() as i64)),
        "contains" => Some(Term::boolean(text(0)?.contains(text(1)?))),
        "strstarts" => Some(Term::boolean(text(0)?.starts_with(text(1)?))),
        "strends" => Some(Term::boolean(text(0)?.ends_with(text(1)?))),
        "regex" => {
            let case_insensitive = text(2).is_some_and(|flags| flags.contains('i'));
            let re = RegexBuilder::new(text(1)?)
                .case_insensitive(case_insensitive)
                .build()
                .ok()?;
            Some(Term::boolean(re.is_match(text(0)?)))
        }
        "isiri" | "isuri" => Some(Term::boolean(values.first()?.is_iri())),
        "isliteral" => Some(Term::boolean(!values.first()?.is_iri())),
        "sameterm" => Some(Term::boolean(values.first()? == values.get(1)?)),
        _ => None,
    }
}

fn resolve<'a>(term: &'a PatternTerm, binding: &'a Binding) -> Option<&'a Term> {
    match term {
        PatternTerm::Const(t) => Some(t),
        PatternTerm::Var(v) => binding.get(v),
    }
}

fn bind(binding: &mut Binding, term: &PatternTerm, value: &Term) -> bool {
    match term {
        PatternTerm::Const(_) => true,
        PatternTerm::Var(v) => match binding.get(v) {
            Some(existing) => existing == value,
            None => {
                binding.insert(v.clone(), value.clone());
                true
            }
        },
    }
}

impl Query {
    pub fn is_ask(&self) -> bool {
        matches!(self.form, QueryForm::Ask)
    }

    fn solutions(&self, store: &TripleStore) -> Vec<Binding> {
        let mut solutions: Vec<Binding> = vec![Binding::new()];
        for pattern in &self.patterns {
            let mut next = Vec::new();
            for binding in &solutions {
                let s = resolve(&pattern.subject, binding);
                let p = resolve(&pattern.predicate, binding);
                let o = resolve(&pattern.object, binding);
                for triple in store.matching(s, p, o) {
                    let mut extended = binding.clone();
                    if bind(&mut extended, &pattern.subject, &triple.subject)
                        && bind(&mut extended, &pattern.predicate, &triple.predicate)
                        && bind(&mut extended, &pattern.object, &triple.object)
                    {
                        next.push(extended);
                    }
                }
            }
            solutions = next;
            if solutions.is_empty() {
                break;
            }
        }

        solutions
            .into_iter()
            .filter(|b| {
                self.filters
                    .iter()
                    .all(|f| f.eval(b).is_some_and(|t| effective_boolean(&t)))
            })
            .collect()
    }

    fn pattern_vars(&self) -> Vec<String> {
        let mut vars: Vec<String> = Vec::new();
        for pattern in &self.patterns {
            for term in [&pattern.subject, &pattern.predicate, &pattern.object] {
                if let PatternTerm::Var(v) = term {
                    if !vars.contains(v) {
                        vars.push(v.clone());
                    }
                }
            }
        }
        vars
    }

    fn aggregate(&self, items: &[SelectItem], solutions: Vec<Binding>) -> Vec<Binding> {
        let mut order: Vec<Vec<Option<Term>>> = Vec::new();
        let mut groups: HashMap<Vec<Option<Term>>, Vec<Binding>> = HashMap::new();
        for solution in solutions {
            let key: Vec<Option<Term>> = self
                .group_by
                .iter()
                .map(|v| solution.get(v).cloned())
                .collect();
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(solution);
        }
        // 沒有 GROUP BY 時，空結果仍產生一列 (COUNT = 0)
        if self.group_by.is_empty() && order.is_empty() {
            order.push(Vec::new());
            groups.insert(Vec::new(), Vec::new());
        }

        order
            .into_iter()
            .map(|key| {
                let members = groups.remove(&key).unwrap_or_default();
                let mut row = Binding::new();
                for (var, value) in self.group_by.iter().zip(key) {
                    if let Some(value) = value {
                        row.insert(var.clone(), value);
                    }
                }
                for item in items {
                    match item {
                        SelectItem::Var(v) => {
                            if !row.contains_key(v) {
                                if let Some(value) = members.iter().find_map(|m| m.get(v)) {
                                    row.insert(v.clone(), value.clone());
                                }
                            }
                        }
                        SelectItem::Aggregate {
                            func,
                            arg,
                            distinct,
                            alias,
                        } => {
                            if let Some(value) = apply_aggregate(*func, arg.as_deref(), *distinct, &members) {
                                row.insert(alias.clone(), value);
                            }
                        }
                    }
                }
                row
            })
            .collect()
    }

    pub fn execute(&self, store: &TripleStore) -> SparqlResult<QueryResult> {
        let solutions = self.solutions(store);

        let projection = match &self.form {
            QueryForm::Ask => return Ok(QueryResult::Ask(!solutions.is_empty())),
            QueryForm::Select(p) => p,
        };

        let has_aggregate = matches!(projection, Projection::Items(items)
            if items.iter().any(|i| matches!(i, SelectItem::Aggregate { .. })));

        let (vars, mut rows) = match projection {
            Projection::All => {
                if !self.group_by.is_empty() {
                    return Err(SparqlError::Parse(
                        "SELECT * cannot be combined with GROUP BY".to_string(),
                    ));
                }
                (self.pattern_vars(), solutions)
            }
            Projection::Items(items) => {
                let vars = items.iter().map(|i| i.name().to_string()).collect();
                if has_aggregate || !self.group_by.is_empty() {
                    (vars, self.aggregate(items, solutions))
                } else {
                    (vars, solutions)
                }
            }
        };

        if !self.order_by.is_empty() {
            rows.sort_by(|a, b| {
                for key in &self.order_by {
                    let ordering = match (key.expr.eval(a), key.expr.eval(b)) {
                        (Some(x), Some(y)) => x.compare(&y),
                        (None, Some(_)) => Ordering::Less,
                        (Some(_), None) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    };
                    let ordering = if key.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let mut projected: Vec<Vec<Option<Term>>> = rows
            .into_iter()
            .map(|row| vars.iter().map(|v| row.get(v).cloned()).collect())
            .collect();

        if self.distinct {
            let mut seen = HashSet::new();
            projected.retain(|row| seen.insert(row.clone()));
        }

        let rows = projected
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(QueryResult::Select { vars, rows })
    }
}

fn apply_aggregate(
    func: AggFunc,
    arg: Option<&str>,
    distinct: bool,
    members: &[Binding],
) -> Option<Term> {
    let mut values: Vec<Term> = match arg {
        None => return Some(Term::integer(members.len() as i64)),
        Some(var) => members.iter().filter_map(|m| m.get(var).cloned()).collect(),
    };
    if distinct {
        let mut seen = HashSet::new();
        values.retain(|v| seen.insert(v.clone()));
    }

    match func {
        AggFunc::Count => Some(Term::integer(values.len() as i64)),
        AggFunc::Sample => values.into_iter().next(),
        AggFunc::Min => values.into_iter().min_by(|a, b| a.compare(b)),
        AggFunc::Max => values.into_iter().max_by(|a, b| a.compare(b)),
        AggFunc::Sum | AggFunc::Avg => {
            let numbers: Vec<f64> = values.iter().filter_map(Term::as_f64).collect();
            if numbers.len() != values.len() {
                return None;
            }
            let sum: f64 = numbers.iter().sum();
            if func == AggFunc::Sum {
                Some(Term::decimal(sum))
            } else if numbers.is_empty() {
                Some(Term::integer(0))
            } else {
                Some(Term::decimal(sum / numbers.len() as f64))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{GEOINT_NS, RDFS_LABEL};

    fn store() -> TripleStore {
        TripleStore::with_fixture()
    }

    fn select(text: &str) -> (Vec<String>, Vec<Vec<Option<Term>>>) {
        match query(&store(), text).unwrap() {
            QueryResult::Select { vars, rows } => (vars, rows),
            other => panic!("expected SELECT result, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_query_rejected() {
        assert_eq!(parse("   \n"), Err(SparqlError::Empty));
    }

    #[test]
    fn test_select_all_triples_with_limit() {
        let (vars, rows) = select("SELECT ?s ?p ?o WHERE { ?s ?p ?o . } LIMIT 10");
        assert_eq!(vars, vec!["s", "p", "o"]);
        assert_eq!(rows.len(), 10);
        assert_eq!(
            rows[0][0],
            Some(Term::iri(format!("{}pentagon", GEOINT_NS)))
        );
    }

    #[test]
    fn test_facility_type_pattern_with_semicolons() {
        let (_, rows) = select(
            r#"PREFIX geoint: <http://example.org/geoint/>
               PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>
               SELECT ?name WHERE {
                   ?f a geoint:Facility ;
                      rdfs:label ?name ;
                      geoint:facilityType "Airport" .
               } ORDER BY ?name"#,
        );
        let names: Vec<String> = rows
            .iter()
            .map(|r| r[0].as_ref().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "Baltimore/Washington International Airport",
                "Ronald Reagan Washington National Airport",
                "Washington Dulles International Airport",
            ]
        );
    }

    #[test]
    fn test_filter_contains_lcase() {
        let (_, rows) = select(
            r#"SELECT DISTINCT ?s WHERE {
                   ?s ?p ?o .
                   FILTER(contains(lcase(str(?o)), lcase("VIRGINIA")))
               }"#,
        );
        assert_eq!(rows.len(), 6);
    }

    #[test]
    fn test_numeric_comparison_filter() {
        let (_, rows) = select(
            "SELECT ?f WHERE { ?f geo:lat ?lat . FILTER(?lat > 38.9 && ?lat < 40) }",
        );
        // Dulles (38.9531) and BWI (39.1774)
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_unspaced_comparison_is_not_an_iri() {
        let spaced = select(
            "SELECT ?f WHERE { ?f geo:lat ?lat ; geo:long ?lon . FILTER(?lat < 39 && ?lon > -78) }",
        );
        let compact = select(
            "SELECT ?f WHERE { ?f geo:lat ?lat ; geo:long ?lon . FILTER(?lat<39&&?lon>-78) }",
        );
        assert_eq!(compact.1.len(), 9);
        assert_eq!(compact, spaced);

        let (_, rows) = select("SELECT ?f WHERE { ?f geo:lat ?lat . FILTER(?lat<=38.9531) }");
        // 只有 BWI 超過 Dulles 的緯度
        assert_eq!(rows.len(), 9);
    }

    #[test]
    fn test_iri_in_pattern_after_variable() {
        let (_, rows) = select(
            "SELECT ?f WHERE { ?f <http://example.org/geoint/facilityType> \"Airport\" }",
        );
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_object_list_requires_every_object() {
        let (_, both) = select(
            r#"SELECT ?s WHERE { ?s geoint:city "Washington" , "Arlington" . }"#,
        );
        assert!(both.is_empty());

        let (_, one) = select(r#"SELECT ?s WHERE { ?s geoint:city "Washington" . }"#);
        assert!(!one.is_empty());
    }

    #[test]
    fn test_not_strstarts_or_not_equal() {
        let (_, rows) = select(
            r#"SELECT ?n WHERE {
                   ?f rdfs:label ?n .
                   FILTER(!strstarts(?n, "W") || ?n != "x")
               }"#,
        );
        assert_eq!(rows.len(), 10);

        let (_, rows) = select(
            r#"SELECT ?n WHERE {
                   ?f rdfs:label ?n .
                   FILTER(!strstarts(?n, "W") && ?n != "Fort Belvoir")
               }"#,
        );
        let names: Vec<String> = rows
            .iter()
            .map(|r| r[0].as_ref().unwrap().to_string())
            .collect();
        assert!(!names.is_empty());
        assert!(names.iter().all(|n| !n.starts_with('W') && n != "Fort Belvoir"));
    }

    #[test]
    fn test_ucase_equality() {
        let (_, rows) = select(
            r#"SELECT ?f WHERE { ?f rdfs:label ?n . FILTER(ucase(?n) = "FORT BELVOIR") }"#,
        );
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_count_group_by_order_desc() {
        let (vars, rows) = select(
            r#"SELECT DISTINCT ?class (COUNT(?instance) as ?count) WHERE {
                   ?instance a ?class .
               }
               GROUP BY ?class
               ORDER BY DESC(?count)
               LIMIT 100"#,
        );
        assert_eq!(vars, vec!["class", "count"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], Some(Term::integer(10)));
    }

    #[test]
    fn test_count_star_without_group() {
        let (_, rows) = select("SELECT (COUNT(*) AS ?n) WHERE { ?s ?p ?o }");
        assert_eq!(rows, vec![vec![Some(Term::integer(80))]]);

        let (_, rows) = select("SELECT (COUNT(*) AS ?n) WHERE { ?s <urn:none> ?o }");
        assert_eq!(rows, vec![vec![Some(Term::integer(0))]]);
    }

    #[test]
    fn test_ask_query() {
        let store = store();
        assert_eq!(
            query(&store, r#"ASK { ?f rdfs:label "White House" }"#).unwrap(),
            QueryResult::Ask(true)
        );
        assert_eq!(
            query(&store, r#"ASK WHERE { ?f rdfs:label "Area 51" }"#).unwrap(),
            QueryResult::Ask(false)
        );
    }

    #[test]
    fn test_select_star_offset() {
        let (vars, rows) = select(&format!(
            "SELECT * WHERE {{ ?f <{}> ?name }} ORDER BY ?name OFFSET 8",
            RDFS_LABEL
        ));
        assert_eq!(vars, vec!["f", "name"]);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_regex_case_insensitive() {
        let (_, rows) = select(
            r#"SELECT ?n WHERE { ?f rdfs:label ?n FILTER regex(?n, "^fort", "i") }"#,
        );
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_unsupported_features() {
        assert!(matches!(
            parse("SELECT ?s WHERE { ?s ?p ?o OPTIONAL { ?s ?q ?r } }"),
            Err(SparqlError::Unsupported(_))
        ));
        assert!(matches!(
            parse("CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }"),
            Err(SparqlError::Unsupported(_))
        ));
    }

    #[test]
    fn test_unknown_prefix_and_parse_errors() {
        assert_eq!(
            parse("SELECT ?s WHERE { ?s foo:bar ?o }"),
            Err(SparqlError::UnknownPrefix("foo".to_string()))
        );
        assert!(matches!(
            parse("SELECT ?s WHERE { ?s ?p ?o"),
            Err(SparqlError::Parse(_))
        ));
        assert!(matches!(parse("DROP ALL"), Err(SparqlError::Parse(_))));
    }
}
