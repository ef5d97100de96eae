use crate::ast::{Collection, Direction, Relationship, RelationshipKind, Term};
use crate::error::SqlError;
use crate::query::{relationship_column, Aggregate, Clause, Query};
use crate::schema_cache::SchemaCache;
use serde_json::Value;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub query: String,
    pub params: Vec<Value>,
    pub tables: Vec<String>,
}

/// Renders a [`Query`] as parameterized PostgreSQL.
///
/// Literal values always travel as `$n` parameters; identifiers are double
/// quoted. Relationship filters (`_exists`/`_notexists`) become correlated
/// `EXISTS` sub-selects against the related table.
pub struct SqlBuilder {
    pub sql: String,
    pub params: Vec<Value>,
    pub param_index: usize,
    pub tables: Vec<String>,
    schema: Option<SchemaCache>,
    alias_index: usize,
}

impl Default for SqlBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
            param_index: 0,
            tables: Vec::new(),
            schema: None,
            alias_index: 0,
        }
    }

    /// Lets relationship filters resolve related tables and primary keys.
    pub fn with_schema(mut self, schema: SchemaCache) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn build_select(&mut self, query: &Query) -> Result<QueryResult, SqlError> {
        let collection = query.collection().ok_or(SqlError::NoCollection)?;
        if collection.table.is_empty() {
            return Err(SqlError::EmptyTableName);
        }
        self.tables.push(collection.table.clone());

        self.build_select_clause(query)?;

        self.sql.push_str(" FROM ");
        self.sql.push_str(&self.quote_identifier(&collection.table));

        if !query.filter().terms().is_empty() {
            self.build_where_clause(collection, query.filter().terms())?;
        }

        let groups = query.group().properties();
        if !groups.is_empty() {
            let columns: Vec<String> = groups.iter().map(|g| self.quote_identifier(g)).collect();
            self.sql.push_str(" GROUP BY ");
            self.sql.push_str(&columns.join(", "));
        }

        let sorts = query.order().sorts();
        if !sorts.is_empty() {
            let clauses: Vec<String> = sorts
                .iter()
                .map(|s| {
                    let dir = if s.direction == Direction::Desc { " DESC" } else { " ASC" };
                    format!("{}{}", self.quote_identifier(&s.property), dir)
                })
                .collect();
            self.sql.push_str(" ORDER BY ");
            self.sql.push_str(&clauses.join(", "));
        }

        let limit = self.add_param(Value::Number(query.page().limit().into()));
        let offset = self.add_param(Value::Number(query.page().offset().into()));
        self.sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));

        Ok(QueryResult {
            query: self.sql.clone(),
            params: self.params.clone(),
            tables: self.tables.clone(),
        })
    }

    fn build_select_clause(&mut self, query: &Query) -> Result<(), SqlError> {
        let select = query.select();
        let mut columns: Vec<String> = select
            .includes()
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        for aggregate in select.aggregates() {
            columns.push(self.aggregate_to_sql(&aggregate)?);
        }

        self.sql.push_str("SELECT ");
        if select.is_distinct() {
            self.sql.push_str("DISTINCT ");
        }
        if columns.is_empty() {
            self.sql.push('*');
        } else {
            self.sql.push_str(&columns.join(", "));
        }
        Ok(())
    }

    fn aggregate_to_sql(&self, aggregate: &Aggregate) -> Result<String, SqlError> {
        let function = match aggregate.function.as_str() {
            "count" => "COUNT",
            "sum" => "SUM",
            "min" => "MIN",
            "max" => "MAX",
            other => return Err(SqlError::UnsupportedFunction(other.to_string())),
        };
        let column = match aggregate.column.as_deref() {
            Some(c) => self.quote_identifier(c),
            None if function == "COUNT" => "*".to_string(),
            None => {
                return Err(SqlError::InvalidArguments(format!(
                    "{} requires a column",
                    aggregate.function
                )))
            }
        };
        let mut sql = format!("{}({})", function, column);
        if let Some(alias) = &aggregate.alias {
            sql.push_str(" AS ");
            sql.push_str(&self.quote_identifier(alias));
        }
        Ok(sql)
    }

    pub fn build_where_clause(
        &mut self,
        collection: &Collection,
        terms: &[Term],
    ) -> Result<(), SqlError> {
        let clauses = terms
            .iter()
            .map(|t| self.build_filter(collection, t))
            .collect::<Result<Vec<_>, _>>()?;
        self.sql.push_str(" WHERE ");
        self.sql.push_str(&clauses.join(" AND "));
        Ok(())
    }

    fn build_filter(&mut self, collection: &Collection, term: &Term) -> Result<String, SqlError> {
        match term.token.as_str() {
            "and" | "or" => {
                let joiner = if term.token == "and" { " AND " } else { " OR " };
                let parts = term
                    .terms
                    .iter()
                    .map(|t| self.build_filter(collection, t))
                    .collect::<Result<Vec<_>, _>>()?;
                if parts.is_empty() {
                    return Err(SqlError::InvalidArguments(term.to_string()));
                }
                Ok(format!("({})", parts.join(joiner)))
            }
            "not" => {
                let inner = term
                    .term_at(0)
                    .ok_or_else(|| SqlError::InvalidArguments(term.to_string()))?;
                Ok(format!("NOT ({})", self.build_filter(collection, inner)?))
            }
            "_exists" | "_notexists" => self.build_exists(collection, term),
            _ => self.build_predicate(&quote_identifier, term),
        }
    }

    fn build_predicate(
        &mut self,
        column_sql: &dyn Fn(&str) -> String,
        term: &Term,
    ) -> Result<String, SqlError> {
        let column = term
            .term_at(0)
            .filter(|t| t.is_leaf())
            .ok_or_else(|| SqlError::InvalidArguments(term.to_string()))?;
        let field = column_sql(&column.token);
        let values: Vec<&str> = term.terms[1..].iter().map(|t| t.token.as_str()).collect();

        let single = |values: &[&str]| -> Result<String, SqlError> {
            match values {
                [v] => Ok(v.to_string()),
                _ => Err(SqlError::InvalidArguments(term.to_string())),
            }
        };

        let sql = match term.token.as_str() {
            "eq" if values.len() > 1 => {
                let p = self.add_param(list_param(&values));
                format!("{} = ANY({})", field, p)
            }
            "eq" => format!("{} = {}", field, self.add_param(Value::String(single(&values)?))),
            "ne" => format!("{} <> {}", field, self.add_param(Value::String(single(&values)?))),
            "gt" => format!("{} > {}", field, self.add_param(Value::String(single(&values)?))),
            "ge" => format!("{} >= {}", field, self.add_param(Value::String(single(&values)?))),
            "lt" => format!("{} < {}", field, self.add_param(Value::String(single(&values)?))),
            "le" => format!("{} <= {}", field, self.add_param(Value::String(single(&values)?))),
            "n" => format!("{} IS NULL", field),
            "nn" => format!("{} IS NOT NULL", field),
            "emp" => format!("({} IS NULL OR {} = '')", field, field),
            "nemp" => format!("({} IS NOT NULL AND {} <> '')", field, field),
            "in" | "out" => {
                if values.is_empty() {
                    return Err(SqlError::InvalidArguments(term.to_string()));
                }
                let p = self.add_param(list_param(&values));
                if term.token == "in" {
                    format!("{} = ANY({})", field, p)
                } else {
                    format!("{} <> ALL({})", field, p)
                }
            }
            "like" | "sw" | "ew" | "w" | "wo" => {
                let value = single(&values)?.replace('*', "%");
                let pattern = match term.token.as_str() {
                    "sw" => format!("{}%", value),
                    "ew" => format!("%{}", value),
                    "w" | "wo" => format!("%{}%", value),
                    _ => value,
                };
                let p = self.add_param(Value::String(pattern));
                let op = if term.token == "wo" { "NOT LIKE" } else { "LIKE" };
                format!("{} {} {}", field, op, p)
            }
            other => return Err(SqlError::UnsupportedFunction(other.to_string())),
        };
        Ok(sql)
    }

    fn build_exists(&mut self, collection: &Collection, term: &Term) -> Result<String, SqlError> {
        let inner = term
            .term_at(0)
            .ok_or_else(|| SqlError::InvalidArguments(term.to_string()))?;
        let marked = inner
            .token_at(0)
            .and_then(relationship_column)
            .ok_or_else(|| SqlError::InvalidArguments(term.to_string()))?;
        let (rel_name, _) = marked;
        let rel = collection
            .relationship(rel_name)
            .ok_or_else(|| SqlError::RelationshipNotFound(rel_name.to_string()))?
            .clone();

        self.alias_index += 1;
        let alias = format!("r{}", self.alias_index);
        let owner = self.quote_identifier(&collection.table);
        let (from, join) = self.relationship_join(collection, &rel, &owner, &alias)?;

        let quoted_alias = quote_identifier(&alias);
        let column_sql = |token: &str| -> String {
            let column = relationship_column(token).map(|(_, c)| c).unwrap_or(token);
            format!("{}.{}", quoted_alias, quote_identifier(column))
        };
        let predicate = self.build_predicate(&column_sql, inner)?;

        let negation = if term.token == "_notexists" { "NOT " } else { "" };
        Ok(format!(
            "{}EXISTS (SELECT 1 FROM {} WHERE {} AND {})",
            negation, from, join, predicate
        ))
    }

    fn relationship_join(
        &mut self,
        collection: &Collection,
        rel: &Relationship,
        owner: &str,
        alias: &str,
    ) -> Result<(String, String), SqlError> {
        let related_table = self.table_for(&rel.related);
        self.tables.push(related_table.clone());
        let r = self.quote_identifier(alias);
        let from = format!("{} AS {}", self.quote_identifier(&related_table), r);

        let owner_pk = collection
            .primary_index()
            .map(|i| i.columns.clone())
            .ok_or_else(|| SqlError::InvalidArguments(format!("{} has no primary key", collection.name)))?;
        let fk1 = &rel.fk_index1.columns;

        let pairs = |left: &str, lcols: &[String], right: &str, rcols: &[String]| -> String {
            lcols
                .iter()
                .zip(rcols)
                .map(|(l, r)| {
                    format!(
                        "{}.{} = {}.{}",
                        left,
                        quote_identifier(l),
                        right,
                        quote_identifier(r)
                    )
                })
                .collect::<Vec<_>>()
                .join(" AND ")
        };

        match rel.kind {
            RelationshipKind::ManyToOne => {
                let related_pk = self.primary_columns(&rel.related).unwrap_or_else(|| fk1.clone());
                Ok((from, pairs(&r, &related_pk, owner, fk1)))
            }
            RelationshipKind::OneToMany => Ok((from, pairs(&r, fk1, owner, &owner_pk))),
            RelationshipKind::ManyToMany => {
                let fk2 = rel
                    .fk_index2
                    .as_ref()
                    .map(|i| i.columns.clone())
                    .ok_or_else(|| SqlError::InvalidArguments(rel.name.clone()))?;
                let join_table = self.table_for(&rel.fk_index1.collection);
                self.tables.push(join_table.clone());
                let j = self.quote_identifier(&format!("{}j", alias));
                let related_pk = self.primary_columns(&rel.related).unwrap_or_else(|| fk2.clone());
                let from = format!(
                    "{} AS {} JOIN {} ON {}",
                    self.quote_identifier(&join_table),
                    j,
                    from,
                    pairs(&r, &related_pk, &j, &fk2)
                );
                Ok((from, pairs(&j, fk1, owner, &owner_pk)))
            }
        }
    }

    fn table_for(&self, collection: &str) -> String {
        self.schema
            .as_ref()
            .and_then(|s| s.get(collection))
            .map(|c| c.table.clone())
            .unwrap_or_else(|| collection.to_string())
    }

    fn primary_columns(&self, collection: &str) -> Option<Vec<String>> {
        self.schema
            .as_ref()
            .and_then(|s| s.get(collection))
            .and_then(|c| c.primary_index())
            .map(|i| i.columns.clone())
    }

    fn add_param(&mut self, value: Value) -> String {
        let idx = self.param_index + 1;
        self.param_index = idx;
        self.params.push(value);
        format!("${}", idx)
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_identifier(name)
    }
}

pub fn quote_identifier(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn list_param(values: &[&str]) -> Value {
    Value::Array(values.iter().map(|v| Value::String(v.to_string())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::IndexKind;
    use std::sync::Arc;

    fn schema() -> SchemaCache {
        SchemaCache::new()
            .with_collection(
                Collection::new("customers")
                    .with_primary_key(&["customerId"])
                    .with_relationship(Relationship::one_to_many(
                        "orders",
                        "customers",
                        "orders",
                        &["customerId"],
                    )),
            )
            .with_collection(
                Collection::new("orders")
                    .with_primary_key(&["orderId"])
                    .with_index("ix_customer", IndexKind::Other, &["customerId"])
                    .with_relationship(Relationship::many_to_one(
                        "customer",
                        "orders",
                        "customers",
                        &["customerId"],
                    )),
            )
            .with_collection(
                Collection::new("employees")
                    .with_primary_key(&["employeeId"])
                    .with_relationship(Relationship::many_to_many(
                        "territories",
                        "employees",
                        "territories",
                        "employeeTerritories",
                        &["employeeId"],
                        &["territoryId"],
                    )),
            )
            .with_collection(Collection::new("territories").with_primary_key(&["territoryId"]))
            .with_collection(
                Collection::new("employeeTerritories")
                    .with_primary_key(&["employeeId", "territoryId"]),
            )
    }

    fn build(collection: &str, rql: &str) -> QueryResult {
        let schema = schema();
        let collection: Arc<Collection> = schema.collection(collection).unwrap();
        let query = Query::parse(Some(collection), rql).unwrap();
        SqlBuilder::new().with_schema(schema).build_select(&query).unwrap()
    }

    #[test]
    fn test_add_param() {
        let mut builder = SqlBuilder::new();
        let param_ref = builder.add_param(Value::String("test".to_string()));
        assert_eq!(param_ref, "$1");
        assert_eq!(builder.params.len(), 1);
        assert_eq!(builder.param_index, 1);
    }

    #[test]
    fn test_quote_identifier() {
        let builder = SqlBuilder::new();
        assert_eq!(builder.quote_identifier("id"), "\"id\"");
        assert_eq!(builder.quote_identifier("user\"id"), "\"user\"\"id\"");
    }

    #[test]
    fn test_simple_select() {
        let result = build("orders", "eq(shipCity,Berlin)&gt(freight,10)");
        assert_eq!(
            result.query,
            "SELECT * FROM \"orders\" WHERE \"shipCity\" = $1 AND \"freight\" > $2 LIMIT $3 OFFSET $4"
        );
        assert_eq!(result.params[0], Value::String("Berlin".to_string()));
        assert_eq!(result.params[2], Value::Number(100.into()));
    }

    #[test]
    fn test_includes_sort_and_page() {
        let result = build("orders", "includes(orderId,freight)&sort(-freight,orderId)&limit(10)&offset(20)");
        assert_eq!(
            result.query,
            "SELECT \"orderId\", \"freight\" FROM \"orders\" ORDER BY \"freight\" DESC, \"orderId\" ASC LIMIT $1 OFFSET $2"
        );
        assert_eq!(result.params, vec![Value::Number(10.into()), Value::Number(20.into())]);
    }

    #[test]
    fn test_logic_and_patterns() {
        let result = build("orders", "or(sw(shipName,Al),not(in(shipVia,1,2)))");
        assert_eq!(
            result.query,
            "SELECT * FROM \"orders\" WHERE (\"shipName\" LIKE $1 OR NOT (\"shipVia\" = ANY($2))) LIMIT $3 OFFSET $4"
        );
        assert_eq!(result.params[0], Value::String("Al%".to_string()));
    }

    #[test]
    fn test_null_checks() {
        let result = build("orders", "n(shippedDate)&nemp(shipRegion)");
        assert!(result.query.contains("\"shippedDate\" IS NULL"));
        assert!(result.query.contains("(\"shipRegion\" IS NOT NULL AND \"shipRegion\" <> '')"));
    }

    #[test]
    fn test_many_to_one_exists() {
        let result = build("orders", "customer.country=Germany");
        assert_eq!(
            result.query,
            "SELECT * FROM \"orders\" WHERE EXISTS (SELECT 1 FROM \"customers\" AS \"r1\" WHERE \"r1\".\"customerId\" = \"orders\".\"customerId\" AND \"r1\".\"country\" = $1) LIMIT $2 OFFSET $3"
        );
        assert_eq!(result.tables, vec!["orders", "customers"]);
    }

    #[test]
    fn test_one_to_many_not_exists() {
        let result = build("customers", "ne(orders.shipVia,3)");
        assert!(result.query.starts_with(
            "SELECT * FROM \"customers\" WHERE NOT EXISTS (SELECT 1 FROM \"orders\" AS \"r1\" WHERE \"r1\".\"customerId\" = \"customers\".\"customerId\" AND \"r1\".\"shipVia\" = $1)"
        ));
    }

    #[test]
    fn test_many_to_many_exists() {
        let result = build("employees", "eq(territories.regionId,1)");
        assert!(result.query.contains(
            "EXISTS (SELECT 1 FROM \"employeeTerritories\" AS \"r1j\" JOIN \"territories\" AS \"r1\" ON \"r1\".\"territoryId\" = \"r1j\".\"territoryId\" WHERE \"r1j\".\"employeeId\" = \"employees\".\"employeeId\" AND \"r1\".\"regionId\" = $1)"
        ));
    }

    #[test]
    fn test_aggregates_and_group() {
        let result = build("orders", "group(customerId)&includes(customerId)&as(total,sum(freight))");
        assert!(result
            .query
            .starts_with("SELECT \"customerId\", SUM(\"freight\") AS \"total\" FROM \"orders\" GROUP BY \"customerId\""));
    }

    #[test]
    fn test_no_collection() {
        let query = Query::default();
        assert!(matches!(
            SqlBuilder::new().build_select(&query),
            Err(SqlError::NoCollection)
        ));
    }
}
