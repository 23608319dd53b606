pub mod builder;

use std::{fmt::Display, str::FromStr};

use crate::{error::Error, value::Value};

/// A rendered statement: SQL text with `?` placeholders and the parameters that bind to them, in
/// placeholder order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub sql: String,
    pub parameters: Vec<Value>,
}

impl Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Accumulates SQL text and bound parameters. Since a parameter is only ever recorded at the
/// moment its placeholder is written, the parameter list always mirrors placeholder order.
#[derive(Debug, Default)]
pub struct SqlBuilder {
    sql: String,
    parameters: Vec<Value>,
}

impl SqlBuilder {
    #[must_use]
    pub fn new(init: impl Into<String>) -> Self {
        Self {
            sql: init.into(),
            parameters: vec![],
        }
    }

    /// Append raw SQL text.
    pub fn push(&mut self, sql: impl Display) -> &mut Self {
        use std::fmt::Write;

        // Writing into a `String` cannot fail.
        let _ = write!(self.sql, "{sql}");
        self
    }

    /// Append a `?` placeholder bound to `value`.
    pub fn push_bind(&mut self, value: Value) -> &mut Self {
        self.sql.push('?');
        self.parameters.push(value);
        self
    }

    /// Append a raw SQL fragment that carries its own `?` placeholders, together with their
    /// parameters.
    pub fn push_raw(&mut self, sql: &str, parameters: &[Value]) -> &mut Self {
        self.sql.push_str(sql);
        self.parameters.extend_from_slice(parameters);
        self
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn into_statement(self) -> Statement {
        Statement {
            sql: self.sql,
            parameters: self.parameters,
        }
    }
}

/// This trait represents anything that can be pushed into a [`SqlBuilder`], i.e. any kind of
/// query fragment, like a condition or a list of values.
pub trait PushToQuery: Send + Sync {
    /// Push the object's contents into a query builder.
    fn push_to(&self, builder: &mut SqlBuilder);
}

impl PushToQuery for Box<dyn PushToQuery> {
    fn push_to(&self, builder: &mut SqlBuilder) {
        self.as_ref().push_to(builder);
    }
}

pub(crate) struct QueryVariable(pub(crate) Value);

impl PushToQuery for QueryVariable {
    fn push_to(&self, builder: &mut SqlBuilder) {
        builder.push_bind(self.0.clone());
    }
}

impl PushToQuery for Vec<QueryVariable> {
    fn push_to(&self, builder: &mut SqlBuilder) {
        builder.push("(");
        self.iter().enumerate().for_each(|(i, e)| {
            if i > 0 {
                builder.push(", ");
            }
            e.push_to(builder);
        });
        builder.push(")");
    }
}

/// A hand-written fragment with its own placeholders.
pub(crate) struct RawExpr {
    sql: String,
    parameters: Vec<Value>,
}

impl RawExpr {
    pub(crate) fn new(sql: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            parameters,
        }
    }
}

impl PushToQuery for RawExpr {
    fn push_to(&self, builder: &mut SqlBuilder) {
        builder.push_raw(&self.sql, &self.parameters);
    }
}

pub(crate) struct BracketsExpr<T: PushToQuery>(T);

impl<T: PushToQuery> BracketsExpr<T> {
    pub(crate) const fn new(inner: T) -> Self {
        Self(inner)
    }
}

impl<T: PushToQuery> PushToQuery for BracketsExpr<T> {
    fn push_to(&self, builder: &mut SqlBuilder) {
        builder.push("(");
        self.0.push_to(builder);
        builder.push(")");
    }
}

/// Binary SQL operators accepted by the `filter` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    DoesNotEqual,
    Like,
    NotLike,
    ILike,
    And,
    Or,
    In,
    NotIn,
    Between,
    NotBetween,
    Gt,
    Lt,
    Geq,
    Leq,
}

impl Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Equals => "=",
                Self::DoesNotEqual => "!=",
                Self::Like => "LIKE",
                Self::NotLike => "NOT LIKE",
                Self::ILike => "ILIKE",
                Self::And => "AND",
                Self::Or => "OR",
                Self::In => "IN",
                Self::NotIn => "NOT IN",
                Self::Between => "BETWEEN",
                Self::NotBetween => "NOT BETWEEN",
                Self::Gt => ">",
                Self::Lt => "<",
                Self::Geq => ">=",
                Self::Leq => "<=",
            }
        )
    }
}

impl FromStr for Operator {
    type Err = Error;

    /// Parse a comparison operator. Only operators comparing a column against a single value are
    /// accepted; lists and ranges have dedicated builder methods.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "=" | "==" => Ok(Self::Equals),
            "!=" | "<>" => Ok(Self::DoesNotEqual),
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Geq),
            "<=" => Ok(Self::Leq),
            "LIKE" => Ok(Self::Like),
            "NOT LIKE" => Ok(Self::NotLike),
            "ILIKE" => Ok(Self::ILike),
            _ => Err(Error::Argument(format!("unsupported operator `{s}`"))),
        }
    }
}

/// A binary SQL expression, glued together with an operator.
///
/// Example: `left-side [operator] right-side`
pub(crate) struct BinaryExpr<T, C>
where
    T: PushToQuery,
    C: PushToQuery,
{
    a: T,
    b: C,
    operand: Operator,
}

impl<T, C> BinaryExpr<T, C>
where
    T: PushToQuery,
    C: PushToQuery,
{
    pub(crate) const fn new(left: T, right: C, operand: Operator) -> Self {
        Self {
            a: left,
            b: right,
            operand,
        }
    }
}

impl<T, C> PushToQuery for BinaryExpr<T, C>
where
    T: PushToQuery,
    C: PushToQuery,
{
    fn push_to(&self, builder: &mut SqlBuilder) {
        self.a.push_to(builder);
        builder.push(format_args!(" {} ", self.operand));
        self.b.push_to(builder);
    }
}

pub(crate) enum SingletonExprOperand {
    IsNull,
    IsNotNull,
}

impl Display for SingletonExprOperand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::IsNull => "IS NULL",
                Self::IsNotNull => "IS NOT NULL",
            }
        )
    }
}

pub(crate) struct SingletonExpr<T>
where
    T: PushToQuery,
{
    inner: T,
    operand: SingletonExprOperand,
}

impl<T> SingletonExpr<T>
where
    T: PushToQuery,
{
    pub(crate) const fn new(inner: T, operand: SingletonExprOperand) -> Self {
        Self { inner, operand }
    }
}

impl<T> PushToQuery for SingletonExpr<T>
where
    T: PushToQuery,
{
    fn push_to(&self, builder: &mut SqlBuilder) {
        self.inner.push_to(builder);
        builder.push(format_args!(" {}", self.operand));
    }
}

/// A column or table reference.
///
/// Plain identifiers (optionally dotted, e.g. `users.id`, or ending in `*`) are quoted per
/// segment; anything else, like `COUNT(*)` or `lower(name)`, is emitted verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnName(String);

impl ColumnName {
    #[must_use]
    pub fn new(column_name: impl Into<String>) -> Self {
        Self(column_name.into())
    }
}

fn is_identifier(segment: &str) -> bool {
    segment
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Display for ColumnName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let segments = self.0.split('.').collect::<Vec<_>>();
        let Some((last, leading)) = segments.split_last() else {
            return write!(f, "{}", self.0);
        };

        let quotable = leading.iter().all(|e| is_identifier(e))
            && (is_identifier(last) || (*last == "*" && !leading.is_empty()));

        if !quotable {
            return write!(f, "{}", self.0);
        }

        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            if *segment == "*" {
                write!(f, "*")?;
            } else {
                write!(f, "\"{segment}\"")?;
            }
        }

        Ok(())
    }
}

impl PushToQuery for ColumnName {
    fn push_to(&self, builder: &mut SqlBuilder) {
        builder.push(self);
    }
}
