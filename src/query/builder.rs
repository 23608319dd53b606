use std::{fmt::Display, marker::PhantomData};

use itertools::Itertools;

use crate::{
    connection::{ConnectionRef, StatementResult, run},
    entity::Entity,
    error::{Error, Result},
    registry,
    value::{FromValue, Row, Value},
};

use super::{
    BinaryExpr, BracketsExpr, ColumnName, Operator, PushToQuery, QueryVariable, RawExpr,
    SingletonExpr, SingletonExprOperand, SqlBuilder, Statement,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Joiner {
    And,
    Or,
}

impl Display for Joiner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, " AND "),
            Self::Or => write!(f, " OR "),
        }
    }
}

struct Condition {
    joiner: Joiner,
    expr: Box<dyn PushToQuery>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl Display for JoinKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Inner => "INNER JOIN",
                Self::Left => "LEFT JOIN",
                Self::Right => "RIGHT JOIN",
            }
        )
    }
}

struct Join {
    kind: JoinKind,
    table: String,
    first: String,
    operator: String,
    second: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asc => write!(f, "ASC"),
            Self::Desc => write!(f, "DESC"),
        }
    }
}

enum Order {
    Column(String, Direction),
    Raw(String),
}

/// Fluent query builder scoped to the table of `T` and bound to one connection.
///
/// Clause methods accumulate; terminal methods (`get`, `first`, `count`, `update`, ...) render
/// and execute a statement without consuming the builder.
pub struct QueryBuilder<T>
where
    T: Entity,
{
    marker: PhantomData<T>,
    connection: ConnectionRef,
    table: String,
    columns: Vec<String>,
    distinct: bool,
    joins: Vec<Join>,
    conditions: Vec<Condition>,
    groups: Vec<String>,
    havings: Vec<Condition>,
    orders: Vec<Order>,
    limit: Option<u64>,
    offset: Option<u64>,
    invalid: Option<String>,
}

impl<T> QueryBuilder<T>
where
    T: Entity,
{
    pub(crate) fn new(connection: ConnectionRef) -> Self {
        Self {
            marker: PhantomData,
            connection,
            table: T::table_name(),
            columns: vec![],
            distinct: false,
            joins: vec![],
            conditions: vec![],
            groups: vec![],
            havings: vec![],
            orders: vec![],
            limit: None,
            offset: None,
            invalid: None,
        }
    }

    #[must_use]
    pub const fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    /// Run against `table` instead of the entity's own table.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Replace the select list. An empty list selects `*`.
    #[must_use]
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    fn push_condition(mut self, joiner: Joiner, expr: impl PushToQuery + 'static) -> Self {
        self.conditions.push(Condition {
            joiner,
            expr: Box::new(expr),
        });
        self
    }

    fn comparison(
        mut self,
        joiner: Joiner,
        column: &str,
        operator: &str,
        value: Value,
    ) -> Self {
        match operator.parse::<Operator>() {
            Ok(operator) => self.push_condition(
                joiner,
                BinaryExpr::new(ColumnName::new(column), QueryVariable(value), operator),
            ),
            Err(e) => {
                self.invalid.get_or_insert(e.to_string());
                self
            }
        }
    }

    /// Append `column <operator> value`, glued with `AND`.
    #[must_use]
    pub fn filter(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.comparison(Joiner::And, column, operator, value.into())
    }

    /// Append `column <operator> value`, glued with `OR`.
    #[must_use]
    pub fn or_filter(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.comparison(Joiner::Or, column, operator, value.into())
    }

    /// Shorthand for `filter(column, "=", value)`.
    #[must_use]
    pub fn filter_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.push_condition(
            Joiner::And,
            BinaryExpr::new(
                ColumnName::new(column),
                QueryVariable(value.into()),
                Operator::Equals,
            ),
        )
    }

    fn list(self, column: &str, values: Vec<Value>, operator: Operator) -> Self {
        // `IN ()` is not valid SQL; an empty list matches nothing (or everything, negated).
        if values.is_empty() {
            let always = if operator == Operator::In { "1 = 0" } else { "1 = 1" };
            return self.push_condition(Joiner::And, RawExpr::new(always, vec![]));
        }

        self.push_condition(
            Joiner::And,
            BinaryExpr::new(
                ColumnName::new(column),
                values.into_iter().map(QueryVariable).collect::<Vec<_>>(),
                operator,
            ),
        )
    }

    #[must_use]
    pub fn filter_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.list(column, values, Operator::In)
    }

    #[must_use]
    pub fn filter_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.list(column, values, Operator::NotIn)
    }

    fn range(self, column: &str, low: Value, high: Value, operator: Operator) -> Self {
        self.push_condition(
            Joiner::And,
            BinaryExpr::new(
                ColumnName::new(column),
                BinaryExpr::new(QueryVariable(low), QueryVariable(high), Operator::And),
                operator,
            ),
        )
    }

    #[must_use]
    pub fn filter_between(
        self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.range(column, low.into(), high.into(), Operator::Between)
    }

    #[must_use]
    pub fn filter_not_between(
        self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.range(column, low.into(), high.into(), Operator::NotBetween)
    }

    #[must_use]
    pub fn filter_like(self, column: &str, pattern: impl Into<String>) -> Self {
        self.push_condition(
            Joiner::And,
            BinaryExpr::new(
                ColumnName::new(column),
                QueryVariable(Value::Text(pattern.into())),
                Operator::Like,
            ),
        )
    }

    /// Case-insensitive `LIKE`. Only supported by some backends (e.g. postgres).
    #[must_use]
    pub fn filter_ilike(self, column: &str, pattern: impl Into<String>) -> Self {
        self.push_condition(
            Joiner::And,
            BinaryExpr::new(
                ColumnName::new(column),
                QueryVariable(Value::Text(pattern.into())),
                Operator::ILike,
            ),
        )
    }

    #[must_use]
    pub fn filter_null(self, column: &str) -> Self {
        self.push_condition(
            Joiner::And,
            SingletonExpr::new(ColumnName::new(column), SingletonExprOperand::IsNull),
        )
    }

    #[must_use]
    pub fn filter_not_null(self, column: &str) -> Self {
        self.push_condition(
            Joiner::And,
            SingletonExpr::new(ColumnName::new(column), SingletonExprOperand::IsNotNull),
        )
    }

    /// Append a hand-written condition with its own `?` placeholders. The condition is wrapped in
    /// `()` brackets.
    #[must_use]
    pub fn filter_raw<I, V>(self, sql: impl Into<String>, parameters: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let parameters = parameters.into_iter().map(Into::into).collect();
        self.push_condition(Joiner::And, BracketsExpr::new(RawExpr::new(sql, parameters)))
    }

    fn push_join(
        mut self,
        kind: JoinKind,
        table: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Self {
        self.joins.push(Join {
            kind,
            table: table.to_string(),
            first: first.to_string(),
            operator: operator.to_string(),
            second: second.to_string(),
        });
        self
    }

    /// `INNER JOIN table ON first <operator> second`
    #[must_use]
    pub fn join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.push_join(JoinKind::Inner, table, first, operator, second)
    }

    #[must_use]
    pub fn left_join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.push_join(JoinKind::Left, table, first, operator, second)
    }

    #[must_use]
    pub fn right_join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.push_join(JoinKind::Right, table, first, operator, second)
    }

    #[must_use]
    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Append a `HAVING` condition, glued with `AND`. `column` may be an aggregate expression such
    /// as `COUNT(*)`.
    #[must_use]
    pub fn having(mut self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        match operator.parse::<Operator>() {
            Ok(operator) => self.havings.push(Condition {
                joiner: Joiner::And,
                expr: Box::new(BinaryExpr::new(
                    ColumnName::new(column),
                    QueryVariable(value.into()),
                    operator,
                )),
            }),
            Err(e) => {
                self.invalid.get_or_insert(e.to_string());
            }
        }
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: &str) -> Self {
        self.orders
            .push(Order::Column(column.to_string(), Direction::Asc));
        self
    }

    #[must_use]
    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.orders
            .push(Order::Column(column.to_string(), Direction::Desc));
        self
    }

    /// Append a hand-written ordering clause, e.g. `name DESC, id`.
    #[must_use]
    pub fn order_by_raw(mut self, clause: impl Into<String>) -> Self {
        self.orders.push(Order::Raw(clause.into()));
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    fn check(&self) -> Result<()> {
        match &self.invalid {
            Some(message) => Err(Error::Argument(message.clone())),
            None => Ok(()),
        }
    }

    fn push_conditions(builder: &mut SqlBuilder, keyword: &str, conditions: &[Condition]) {
        if conditions.is_empty() {
            return;
        }

        builder.push(keyword);
        conditions.iter().enumerate().for_each(|(i, e)| {
            if i > 0 {
                builder.push(e.joiner);
            }
            e.expr.push_to(builder);
        });
    }

    fn push_select(&self, builder: &mut SqlBuilder, columns: Option<&str>) {
        builder.push("SELECT ");
        if self.distinct {
            builder.push("DISTINCT ");
        }

        match columns {
            Some(columns) => {
                builder.push(columns);
            }
            None if self.columns.is_empty() => {
                builder.push("*");
            }
            None => {
                builder.push(self.columns.iter().map(ColumnName::new).join(", "));
            }
        }

        builder.push(format_args!(" FROM {}", ColumnName::new(&self.table)));

        self.joins.iter().for_each(|e| {
            builder.push(format_args!(
                " {} {} ON {} {} {}",
                e.kind,
                ColumnName::new(&e.table),
                ColumnName::new(&e.first),
                e.operator,
                ColumnName::new(&e.second)
            ));
        });

        Self::push_conditions(builder, " WHERE ", &self.conditions);

        if !self.groups.is_empty() {
            builder.push(format_args!(
                " GROUP BY {}",
                self.groups.iter().map(ColumnName::new).join(", ")
            ));
        }

        Self::push_conditions(builder, " HAVING ", &self.havings);
    }

    /// Ordering and paging. SQLite and MySQL only accept `OFFSET` after a `LIMIT`, so an offset on
    /// its own is paired with `LIMIT -1`, which SQLite reads as "no limit".
    fn push_paging(&self, builder: &mut SqlBuilder, limit: Option<u64>) {
        if !self.orders.is_empty() {
            builder.push(format_args!(
                " ORDER BY {}",
                self.orders
                    .iter()
                    .map(|e| match e {
                        Order::Column(column, direction) => {
                            format!("{} {direction}", ColumnName::new(column))
                        }
                        Order::Raw(clause) => clause.clone(),
                    })
                    .join(", ")
            ));
        }

        match (limit.or(self.limit), self.offset) {
            (Some(limit), Some(offset)) => {
                builder.push(format_args!(" LIMIT {limit} OFFSET {offset}"));
            }
            (Some(limit), None) => {
                builder.push(format_args!(" LIMIT {limit}"));
            }
            (None, Some(offset)) => {
                builder.push(format_args!(" LIMIT -1 OFFSET {offset}"));
            }
            (None, None) => {}
        }
    }

    fn push_query(&self, builder: &mut SqlBuilder, columns: Option<&str>, limit: Option<u64>) {
        self.push_select(builder, columns);
        self.push_paging(builder, limit);
    }

    /// Render the `SELECT` statement.
    ///
    /// # Errors
    ///
    /// [`Error::Argument`] if an invalid operator was passed to a clause method.
    pub fn to_statement(&self) -> Result<Statement> {
        self.check()?;
        let mut builder = SqlBuilder::default();
        self.push_query(&mut builder, None, None);
        Ok(builder.into_statement())
    }

    /// Return the raw SQL of the `SELECT` statement, with `?` placeholders.
    ///
    /// This is mainly useful for debugging purposes.
    #[must_use]
    pub fn to_sql(&self) -> String {
        let mut builder = SqlBuilder::default();
        self.push_query(&mut builder, None, None);
        builder.sql().to_string()
    }

    fn count_statement(&self, column: &str) -> Result<Statement> {
        self.check()?;
        let target = if column == "*" {
            "*".to_string()
        } else {
            ColumnName::new(column).to_string()
        };

        // A single aggregate row comes back, so ordering and paging are left out.
        let mut builder = SqlBuilder::default();
        self.push_select(&mut builder, Some(&format!("COUNT({target}) AS aggregate")));
        Ok(builder.into_statement())
    }

    pub(crate) fn update_statement(&self, values: &Row) -> Result<Statement> {
        self.check()?;
        if values.is_empty() {
            return Err(Error::Argument(format!(
                "no values to update in `{}`",
                self.table
            )));
        }

        let mut builder = SqlBuilder::new(format!("UPDATE {} SET ", ColumnName::new(&self.table)));
        values.iter().enumerate().for_each(|(i, (column, value))| {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(format_args!("{} = ", ColumnName::new(column)));
            builder.push_bind(value.clone());
        });

        Self::push_conditions(&mut builder, " WHERE ", &self.conditions);
        Ok(builder.into_statement())
    }

    pub(crate) fn delete_statement(&self) -> Result<Statement> {
        self.check()?;
        let mut builder = SqlBuilder::new(format!("DELETE FROM {}", ColumnName::new(&self.table)));
        Self::push_conditions(&mut builder, " WHERE ", &self.conditions);
        Ok(builder.into_statement())
    }

    pub(crate) fn insert_statement(&self, values: &Row) -> Statement {
        let mut builder = SqlBuilder::new(format!("INSERT INTO {}", ColumnName::new(&self.table)));

        if values.is_empty() {
            builder.push(" DEFAULT VALUES");
            return builder.into_statement();
        }

        builder.push(format_args!(
            " ({}) VALUES (",
            values.keys().map(ColumnName::new).join(", ")
        ));
        values.values().enumerate().for_each(|(i, value)| {
            if i > 0 {
                builder.push(", ");
            }
            builder.push_bind(value.clone());
        });
        builder.push(")");

        builder.into_statement()
    }

    /// Execute the query, returning the raw rows.
    ///
    /// # Errors
    ///
    /// [`Error::Query`] if the statement fails.
    pub async fn rows(&self) -> Result<Vec<Row>> {
        let statement = self.to_statement()?;
        Ok(run(self.connection.as_ref(), &statement).await?.rows)
    }

    pub(crate) async fn first_row(&self) -> Result<Option<Row>> {
        self.check()?;
        let mut builder = SqlBuilder::default();
        self.push_query(&mut builder, None, Some(1));

        Ok(run(self.connection.as_ref(), &builder.into_statement())
            .await?
            .rows
            .into_iter()
            .next())
    }

    fn materialize(&self, row: Row) -> Result<T> {
        let mut entity = registry::from_row::<T>(row)?;
        entity.attach_connection(self.connection.clone());
        Ok(entity)
    }

    /// Execute the query, returning all matching entities.
    ///
    /// # Errors
    ///
    /// [`Error::ModelNotRegistered`] if `T` is not registered, or [`Error::Query`] if the
    /// statement fails.
    pub async fn get(&self) -> Result<Vec<T>> {
        self.rows()
            .await?
            .into_iter()
            .map(|e| self.materialize(e))
            .collect()
    }

    /// Execute the query limited to one row.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn first(&self) -> Result<Option<T>> {
        self.first_row()
            .await?
            .map(|e| self.materialize(e))
            .transpose()
    }

    /// [`first`](Self::first), treating an empty result as an error.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no row matched, otherwise see [`get`](Self::get).
    pub async fn first_or_fail(&self) -> Result<T> {
        self.first()
            .await?
            .ok_or_else(|| Error::NotFound(self.table.clone()))
    }

    /// `COUNT(*)` over the matching rows.
    ///
    /// # Errors
    ///
    /// [`Error::Query`] if the statement fails.
    pub async fn count(&self) -> Result<u64> {
        self.count_column("*").await
    }

    /// `COUNT(column)` over the matching rows. The builder's own select list is left untouched.
    ///
    /// # Errors
    ///
    /// [`Error::Query`] if the statement fails.
    pub async fn count_column(&self, column: &str) -> Result<u64> {
        let statement = self.count_statement(column)?;
        let result = run(self.connection.as_ref(), &statement).await?;

        result
            .rows
            .first()
            .and_then(|e| e.get("aggregate"))
            .and_then(i64::from_value)
            .and_then(|e| u64::try_from(e).ok())
            .ok_or_else(|| {
                Error::query(
                    &statement.sql,
                    &statement.parameters,
                    "no `aggregate` count in the result".into(),
                )
            })
    }

    /// # Errors
    ///
    /// [`Error::Query`] if the statement fails.
    pub async fn exists(&self) -> Result<bool> {
        Ok(self.count().await? > 0)
    }

    /// The values of one column over the matching rows.
    ///
    /// # Errors
    ///
    /// [`Error::Query`] if the statement fails.
    pub async fn pluck(&self, column: &str) -> Result<Vec<Value>> {
        self.check()?;
        let mut builder = SqlBuilder::default();
        self.push_query(&mut builder, Some(&ColumnName::new(column).to_string()), None);

        let key = column.rsplit('.').next().unwrap_or(column);

        Ok(run(self.connection.as_ref(), &builder.into_statement())
            .await?
            .rows
            .into_iter()
            .map(|mut e| e.remove(key).unwrap_or_default())
            .collect())
    }

    /// Update the matching rows, returning the number of affected rows. Parameters are bound
    /// values first, then filters, matching the `SET ... WHERE ...` placeholder order.
    ///
    /// # Errors
    ///
    /// [`Error::Argument`] if `values` is empty, [`Error::Query`] if the statement fails.
    pub async fn update<I, K, V>(&self, values: I) -> Result<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<Row>();

        let statement = self.update_statement(&values)?;
        Ok(run(self.connection.as_ref(), &statement)
            .await?
            .affected_rows)
    }

    /// Delete the matching rows, returning the number of affected rows.
    ///
    /// # Errors
    ///
    /// [`Error::Query`] if the statement fails.
    pub async fn delete(&self) -> Result<u64> {
        let statement = self.delete_statement()?;
        Ok(run(self.connection.as_ref(), &statement)
            .await?
            .affected_rows)
    }

    /// Insert one row into the builder's table.
    ///
    /// # Errors
    ///
    /// [`Error::Query`] if the statement fails.
    pub async fn insert<I, K, V>(&self, values: I) -> Result<StatementResult>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<Row>();

        run(self.connection.as_ref(), &self.insert_statement(&values)).await
    }
}
