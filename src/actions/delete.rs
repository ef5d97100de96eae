use super::{includes_term, response_rows, Context};
use crate::ast::{Row, Term};
use crate::error::Error;
use crate::query::Clause;
use crate::request::{Request, Response};
use std::collections::HashSet;

/// Deletes every row matching the request's key or filter.
///
/// Matching keys are read through the front door one batch at a time, so
/// read visibility rules apply, and each batch is deleted before the next
/// is fetched from offset zero.
pub fn delete(ctx: &Context, request: Request) -> Result<Response, Error> {
    let collection = ctx.collection(&request.collection)?;
    let pk = collection.primary_index().ok_or_else(|| {
        Error::bad_request(format!("'{}' has no primary key", collection.name))
    })?;

    let query = ctx.query(&collection, &request)?;
    let filter = query.filter().render();
    if filter.is_empty() {
        return Err(Error::bad_request(format!(
            "refusing to delete from '{}' without a key or filter",
            collection.name
        )));
    }

    let batch = ctx.config.fetch_batch_size.max(1);
    let rql = [
        filter,
        includes_term(pk.columns.iter()).to_string(),
        Term::call("limit", &[batch.to_string().as_str()]).to_string(),
    ]
    .join("&");

    let mut seen = HashSet::new();
    let mut deleted = 0;
    let mut iterations = 0;
    loop {
        if iterations == ctx.config.max_iterations {
            tracing::warn!(
                collection = %collection.name,
                max_iterations = ctx.config.max_iterations,
                "delete hit its iteration limit"
            );
            return Err(Error::internal(format!(
                "deleting from '{}' did not finish",
                collection.name
            )));
        }
        iterations += 1;

        let response = ctx.call(Request::get(collection.name.clone()).with_query(rql.clone()));
        if response.status == 404 && iterations == 1 {
            return Err(Error::not_found(format!("no '{}' rows to delete", collection.name)));
        }
        let body = response.into_result()?;
        let rows = response_rows(body.as_ref());
        if rows.is_empty() {
            break;
        }

        let count = rows.len();
        let mut keys = Vec::with_capacity(count);
        for row in &rows {
            let key = collection.encode_key(row).ok_or_else(|| {
                Error::internal(format!("'{}' row without key values", collection.name))
            })?;
            if !seen.insert(key.clone()) {
                return Err(Error::internal(format!(
                    "'{}' row '{}' still present after it was deleted",
                    collection.name, key
                )));
            }
            let key_row: Row = pk
                .columns
                .iter()
                .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                .collect();
            keys.push(key_row);
        }

        deleted += ctx.db.delete(&collection, keys)?;
        if count < batch {
            break;
        }
    }

    if request.key.is_some() && deleted == 0 {
        return Err(Error::not_found(format!(
            "no '{}' resource for key '{}'",
            collection.name,
            request.key.as_deref().unwrap_or_default()
        )));
    }
    tracing::debug!(collection = %collection.name, deleted, "deleted rows");
    Ok(Response::no_content())
}
