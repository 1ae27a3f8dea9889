//! Tag filter expressions.
//!
//! A [`TagExpression`] selects which configured services a notification
//! reaches. It is an OR of AND-groups of (possibly negated) tag literals:
//!
//! ```text
//! ops and not noisy or pager      =>  (ops ∧ ¬noisy) ∨ pager
//! ops, prod | !staging            =>  (ops ∧ prod) ∨ ¬staging
//! ```
//!
//! | Meaning | Spellings |
//! |---------|-----------|
//! | AND     | `and`, `&`, `&&`, `,`, or plain juxtaposition |
//! | OR      | `or`, `\|`, `\|\|` |
//! | NOT     | `not`, `!` |
//!
//! Keywords are case-insensitive. Parentheses are not part of the grammar.
//!
//! Two tags are special: the literal `all` is true for every service, and a
//! service tagged `always` matches every expression.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::foundation::error::TagExpressionError;

/// The literal that matches every service.
pub const ALL_TAG: &str = "all";

/// Services carrying this tag match every expression.
pub const ALWAYS_TAG: &str = "always";

/// A single, possibly negated, tag test.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagLiteral {
    tag: String,
    negated: bool,
}

impl TagLiteral {
    /// A positive literal.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            negated: false,
        }
    }

    /// A negated literal.
    pub fn not(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            negated: true,
        }
    }

    /// The tag being tested.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Whether the test is negated.
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    fn matches(&self, tags: &BTreeSet<String>) -> bool {
        let present = self.tag == ALL_TAG || tags.contains(&self.tag);
        present != self.negated
    }
}

/// An OR of AND-groups. The empty expression matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagExpression {
    groups: Vec<Vec<TagLiteral>>,
}

impl TagExpression {
    /// The expression that matches every service.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds an expression from OR-ed lists of AND-ed positive tags, the
    /// shape produced by repeated `--tag a,b` arguments. Empty groups are
    /// ignored.
    pub fn any_of<I, G, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let groups = groups
            .into_iter()
            .map(|group| group.into_iter().map(TagLiteral::new).collect::<Vec<_>>())
            .filter(|group| !group.is_empty())
            .collect();
        Self { groups }
    }

    /// Parses each argument as its own expression and ORs them together.
    /// Empty arguments are ignored.
    pub fn parse_any<S: AsRef<str>>(args: &[S]) -> Result<Self, TagExpressionError> {
        let mut groups = Vec::new();
        for arg in args {
            groups.extend(arg.as_ref().parse::<Self>()?.groups);
        }
        Ok(Self { groups })
    }

    /// Builds an expression directly from groups of literals.
    pub fn from_groups(groups: Vec<Vec<TagLiteral>>) -> Self {
        Self {
            groups: groups.into_iter().filter(|g| !g.is_empty()).collect(),
        }
    }

    /// Returns `true` for the match-everything expression.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The OR-ed groups.
    pub fn groups(&self) -> &[Vec<TagLiteral>] {
        &self.groups
    }

    /// Evaluates the expression against a service's tag set.
    pub fn matches(&self, tags: &BTreeSet<String>) -> bool {
        if self.groups.is_empty() || tags.contains(ALWAYS_TAG) {
            return true;
        }
        self.groups
            .iter()
            .any(|group| group.iter().all(|literal| literal.matches(tags)))
    }
}

/// Free-function form of [`TagExpression::matches`].
pub fn matches(tags: &BTreeSet<String>, expr: &TagExpression) -> bool {
    expr.matches(tags)
}

// =============================================================================
// Parsing
// =============================================================================

#[derive(Debug, PartialEq)]
enum Token {
    And(String),
    Or(String),
    Not(String),
    Tag(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, TagExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' => return Err(TagExpressionError::UnexpectedCharacter(c)),
            '&' | '|' => {
                chars.next();
                if chars.peek() == Some(&c) {
                    chars.next();
                }
                let op = c.to_string();
                tokens.push(if c == '&' {
                    Token::And(op)
                } else {
                    Token::Or(op)
                });
            }
            ',' => {
                chars.next();
                tokens.push(Token::And(",".into()));
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not("!".into()));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || "&|,!()".contains(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(match word.to_lowercase().as_str() {
                    "and" => Token::And(word),
                    "or" => Token::Or(word),
                    "not" => Token::Not(word),
                    _ => Token::Tag(word),
                });
            }
        }
    }

    Ok(tokens)
}

impl FromStr for TagExpression {
    type Err = TagExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut groups = Vec::new();
        let mut current: Vec<TagLiteral> = Vec::new();
        // Operator waiting for its right-hand operand.
        let mut pending_op: Option<String> = None;
        let mut negation: Option<String> = None;

        for token in tokenize(s)? {
            match token {
                Token::Tag(tag) => {
                    current.push(TagLiteral {
                        tag,
                        negated: negation.take().is_some(),
                    });
                    pending_op = None;
                }
                Token::Not(op) => {
                    if negation.is_some() {
                        return Err(TagExpressionError::DoubleNegation(op));
                    }
                    negation = Some(op);
                }
                Token::And(op) => {
                    if current.is_empty() || pending_op.is_some() || negation.is_some() {
                        return Err(TagExpressionError::MissingOperand(op));
                    }
                    pending_op = Some(op);
                }
                Token::Or(op) => {
                    if current.is_empty() || pending_op.is_some() || negation.is_some() {
                        return Err(TagExpressionError::MissingOperand(op));
                    }
                    groups.push(std::mem::take(&mut current));
                    pending_op = Some(op);
                }
            }
        }

        if let Some(op) = negation.or(pending_op) {
            return Err(TagExpressionError::MissingOperand(op));
        }
        if !current.is_empty() {
            groups.push(current);
        }

        Ok(Self { groups })
    }
}

impl fmt::Display for TagExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                f.write_str(" or ")?;
            }
            for (j, literal) in group.iter().enumerate() {
                if j > 0 {
                    f.write_str(" and ")?;
                }
                if literal.negated {
                    f.write_str("not ")?;
                }
                f.write_str(&literal.tag)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn expr(s: &str) -> TagExpression {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_matches_everything() {
        let services = [tags(&[]), tags(&["a"]), tags(&["b"]), tags(&["a", "b"]), tags(&["c"])];
        let e = expr("   ");
        assert!(e.is_empty());
        assert_eq!(services.iter().filter(|t| e.matches(t)).count(), 5);
    }

    #[test]
    fn test_and_not() {
        let e = expr("a and not b");
        assert!(e.matches(&tags(&["a"])));
        assert!(!e.matches(&tags(&["a", "b"])));
        assert!(!e.matches(&tags(&["b"])));
        assert!(!e.matches(&tags(&[])));
    }

    #[test]
    fn test_operator_spellings_agree() {
        let canonical = expr("a and b or not c");
        for spelling in ["a & b | !c", "a,b || ! c", "A AND b OR NOT c", "a && b or !c"] {
            let parsed = expr(spelling);
            assert_eq!(parsed.groups().len(), 2, "{spelling}");
            assert_eq!(parsed.groups()[1], canonical.groups()[1], "{spelling}");
        }
        assert_eq!(expr("a b"), expr("a and b"));
    }

    #[test]
    fn test_tags_are_case_sensitive_keywords_are_not() {
        let e = expr("Ops");
        assert!(e.matches(&tags(&["Ops"])));
        assert!(!e.matches(&tags(&["ops"])));
    }

    #[test]
    fn test_all_and_always() {
        assert!(expr("all").matches(&tags(&[])));
        assert!(expr("x or all").matches(&tags(&["y"])));
        assert!(expr("x").matches(&tags(&["always"])));
        assert!(expr("not x").matches(&tags(&["x", "always"])));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(
            "(a or b)".parse::<TagExpression>(),
            Err(TagExpressionError::UnexpectedCharacter('('))
        );
        assert_eq!(
            "and a".parse::<TagExpression>(),
            Err(TagExpressionError::MissingOperand("and".into()))
        );
        assert_eq!(
            "a or".parse::<TagExpression>(),
            Err(TagExpressionError::MissingOperand("or".into()))
        );
        assert_eq!(
            "a | | b".parse::<TagExpression>(),
            Err(TagExpressionError::MissingOperand("|".into()))
        );
        assert_eq!(
            "a and not".parse::<TagExpression>(),
            Err(TagExpressionError::MissingOperand("not".into()))
        );
        assert_eq!(
            "not ! a".parse::<TagExpression>(),
            Err(TagExpressionError::DoubleNegation("!".into()))
        );
    }

    #[test]
    fn test_any_of_matches_repeated_flags() {
        let e = TagExpression::any_of([vec!["a", "b"], vec!["c"], vec![]]);
        assert_eq!(e.to_string(), "a and b or c");
        assert!(e.matches(&tags(&["a", "b"])));
        assert!(e.matches(&tags(&["c"])));
        assert!(!e.matches(&tags(&["a"])));

        let parsed = TagExpression::parse_any(&["a,b", "", "c"][..]).unwrap();
        assert_eq!(parsed, e);
    }

    #[test]
    fn test_display_reparses() {
        let e = expr("a & !b | c");
        assert_eq!(e.to_string().parse::<TagExpression>().unwrap(), e);
        assert!(matches(&tags(&["c"]), &e));
    }
}
