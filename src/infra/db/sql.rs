//! SQL generation for model-driven reads and writes.
//!
//! Values arrive as JSON. Each bound value is coerced to its column's type by
//! routing it through `jsonb_populate_record(NULL::<table>, ...)`, so the
//! generated statements compare typed columns against typed values without a
//! compile-time schema. Identifiers are validated and always quoted.

use serde_json::Value;
use sqlx::{Postgres, QueryBuilder, types::Json};

use crate::application::repos::{FindQuery, RepoError};
use crate::domain::model::ModelDef;
use crate::domain::query::{Filter, OrderBy, Projection, is_sql_identifier};
use crate::domain::record::{RecordId, Row};

const ROW_ALIAS: &str = "t";

fn ident(name: &str) -> Result<String, RepoError> {
    if is_sql_identifier(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(RepoError::invalid_input(format!(
            "`{name}` is not a valid identifier"
        )))
    }
}

fn column(name: &str) -> Result<String, RepoError> {
    Ok(format!("{ROW_ALIAS}.{}", ident(name)?))
}

fn table(model: &ModelDef) -> Result<String, RepoError> {
    ident(model.table_name())
}

/// Push `value` cast to the type of `model.column`.
fn push_typed(
    qb: &mut QueryBuilder<'static, Postgres>,
    model: &ModelDef,
    column_name: &str,
    value: &Value,
) -> Result<(), RepoError> {
    let mut payload = Row::new();
    payload.insert(column_name.to_string(), value.clone());
    qb.push("(jsonb_populate_record(NULL::");
    qb.push(table(model)?);
    qb.push(", ");
    qb.push_bind(Json(Value::Object(payload)));
    qb.push(")).");
    qb.push(ident(column_name)?);
    Ok(())
}

fn escape_like(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub(crate) fn push_filter(
    qb: &mut QueryBuilder<'static, Postgres>,
    model: &ModelDef,
    filter: &Filter,
) -> Result<(), RepoError> {
    let compare = |qb: &mut QueryBuilder<'static, Postgres>,
                   name: &str,
                   op: &str,
                   value: &Value|
     -> Result<(), RepoError> {
        qb.push(column(name)?);
        qb.push(op);
        push_typed(qb, model, name, value)
    };

    match filter {
        Filter::All => {
            qb.push("TRUE");
        }
        Filter::Eq { column: name, value } if value.is_null() => {
            qb.push(column(name)?);
            qb.push(" IS NULL");
        }
        Filter::Ne { column: name, value } if value.is_null() => {
            qb.push(column(name)?);
            qb.push(" IS NOT NULL");
        }
        Filter::Eq { column, value } => compare(qb, column, " = ", value)?,
        Filter::Ne { column, value } => compare(qb, column, " <> ", value)?,
        Filter::Gt { column, value } => compare(qb, column, " > ", value)?,
        Filter::Gte { column, value } => compare(qb, column, " >= ", value)?,
        Filter::Lt { column, value } => compare(qb, column, " < ", value)?,
        Filter::Lte { column, value } => compare(qb, column, " <= ", value)?,
        Filter::In { values, .. } if values.is_empty() => {
            qb.push("FALSE");
        }
        Filter::In {
            column: name,
            values,
        } => {
            qb.push(column(name)?);
            qb.push(" IN (");
            for (index, value) in values.iter().enumerate() {
                if index > 0 {
                    qb.push(", ");
                }
                push_typed(qb, model, name, value)?;
            }
            qb.push(")");
        }
        Filter::IsNull { column: name } => {
            qb.push(column(name)?);
            qb.push(" IS NULL");
        }
        Filter::NotNull { column: name } => {
            qb.push(column(name)?);
            qb.push(" IS NOT NULL");
        }
        Filter::Contains {
            column: name,
            value,
        } => {
            qb.push(column(name)?);
            qb.push("::text ILIKE ");
            qb.push_bind(format!("%{}%", escape_like(value)));
        }
        Filter::And { filters } | Filter::Or { filters } if filters.is_empty() => {
            qb.push(if matches!(filter, Filter::And { .. }) {
                "TRUE"
            } else {
                "FALSE"
            });
        }
        Filter::And { filters } | Filter::Or { filters } => {
            let joiner = if matches!(filter, Filter::And { .. }) {
                " AND "
            } else {
                " OR "
            };
            qb.push("(");
            for (index, child) in filters.iter().enumerate() {
                if index > 0 {
                    qb.push(joiner);
                }
                push_filter(qb, model, child)?;
            }
            qb.push(")");
        }
        Filter::Not { filter } => {
            qb.push("NOT (");
            push_filter(qb, model, filter)?;
            qb.push(")");
        }
    }
    Ok(())
}

fn push_projection(
    qb: &mut QueryBuilder<'static, Postgres>,
    select: &Projection,
) -> Result<(), RepoError> {
    match select {
        Projection::All => {
            qb.push("to_jsonb(");
            qb.push(ROW_ALIAS);
            qb.push(")");
        }
        Projection::Columns(columns) => {
            qb.push("jsonb_build_object(");
            for (index, name) in columns.iter().enumerate() {
                if index > 0 {
                    qb.push(", ");
                }
                // Validated identifiers contain no quote characters.
                qb.push(format!("'{name}', "));
                qb.push(column(name)?);
            }
            qb.push(")");
        }
    }
    Ok(())
}

fn push_order(
    qb: &mut QueryBuilder<'static, Postgres>,
    order_by: &[OrderBy],
) -> Result<(), RepoError> {
    if order_by.is_empty() {
        return Ok(());
    }
    qb.push(" ORDER BY ");
    for (index, order) in order_by.iter().enumerate() {
        if index > 0 {
            qb.push(", ");
        }
        qb.push(column(&order.column)?);
        qb.push(" ");
        qb.push(order.direction.as_sql());
    }
    Ok(())
}

fn push_from_where(
    qb: &mut QueryBuilder<'static, Postgres>,
    model: &ModelDef,
    filter: &Filter,
) -> Result<(), RepoError> {
    qb.push(" FROM ");
    qb.push(table(model)?);
    qb.push(" AS ");
    qb.push(ROW_ALIAS);
    if !filter.is_all() {
        qb.push(" WHERE ");
        push_filter(qb, model, filter)?;
    }
    Ok(())
}

pub fn count(model: &ModelDef, filter: &Filter) -> Result<QueryBuilder<'static, Postgres>, RepoError> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*)");
    push_from_where(&mut qb, model, filter)?;
    Ok(qb)
}

pub fn select(model: &ModelDef, query: FindQuery<'_>) -> Result<QueryBuilder<'static, Postgres>, RepoError> {
    let mut qb = QueryBuilder::new("SELECT ");
    push_projection(&mut qb, query.select)?;
    push_from_where(&mut qb, model, query.filter)?;
    push_order(&mut qb, query.order_by)?;
    if let Some(take) = query.take {
        qb.push(" LIMIT ");
        qb.push_bind(to_i64(take)?);
    }
    if query.skip > 0 {
        qb.push(" OFFSET ");
        qb.push_bind(to_i64(query.skip)?);
    }
    Ok(qb)
}

pub fn insert(model: &ModelDef, data: &Row) -> Result<QueryBuilder<'static, Postgres>, RepoError> {
    let mut qb = QueryBuilder::new("INSERT INTO ");
    qb.push(table(model)?);
    qb.push(" AS ");
    qb.push(ROW_ALIAS);

    if data.is_empty() {
        qb.push(" DEFAULT VALUES");
    } else {
        let columns = data
            .keys()
            .map(|name| ident(name))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        qb.push(format!(" ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::"));
        qb.push(table(model)?);
        qb.push(", ");
        qb.push_bind(Json(Value::Object(data.clone())));
        qb.push(")");
    }
    qb.push(" RETURNING to_jsonb(");
    qb.push(ROW_ALIAS);
    qb.push(")");
    Ok(qb)
}

/// `UPDATE ... RETURNING`; `None` when `data` has nothing to set.
pub fn update(
    model: &ModelDef,
    key: &RecordId,
    data: &Row,
) -> Result<Option<QueryBuilder<'static, Postgres>>, RepoError> {
    if data.is_empty() {
        return Ok(None);
    }

    let mut qb = QueryBuilder::new("UPDATE ");
    qb.push(table(model)?);
    qb.push(" AS ");
    qb.push(ROW_ALIAS);
    qb.push(" SET ");
    for (index, name) in data.keys().enumerate() {
        if index > 0 {
            qb.push(", ");
        }
        let quoted = ident(name)?;
        qb.push(format!("{quoted} = r.{quoted}"));
    }
    qb.push(" FROM jsonb_populate_record(NULL::");
    qb.push(table(model)?);
    qb.push(", ");
    qb.push_bind(Json(Value::Object(data.clone())));
    qb.push(") AS r WHERE ");
    push_filter(
        &mut qb,
        model,
        &Filter::eq(&model.primary_key, key.to_value()),
    )?;
    qb.push(" RETURNING to_jsonb(");
    qb.push(ROW_ALIAS);
    qb.push(")");
    Ok(Some(qb))
}

fn to_i64(value: u64) -> Result<i64, RepoError> {
    i64::try_from(value).map_err(|_| RepoError::invalid_input("window exceeds supported range"))
}
