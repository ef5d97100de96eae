//! GET through the engine: filters, paging metadata and nested expansion.

mod common;

use common::Fixture;
use rest_rql::{Method, Request, Response};
use serde_json::{json, Value};

fn data(response: &Response) -> Vec<Value> {
    response
        .data()
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn ids(response: &Response, column: &str) -> Vec<Value> {
    data(response).iter().map(|r| r[column].clone()).collect()
}

#[test]
fn test_get_by_key() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("customers").with_key("ALFKI"));
    assert_eq!(response.status, 200);

    let rows = data(&response);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["companyName"], json!("Alfreds Futterkiste"));
    assert_eq!(rows[0]["href"], json!("/customers/ALFKI"));
    assert!(fx.calls().is_empty());
}

#[test]
fn test_get_missing_key_is_404() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("customers").with_key("NOPE"));
    assert_eq!(response.status, 404);
}

#[test]
fn test_get_composite_key() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("orderDetails").with_key("10643~42"));
    assert_eq!(response.status, 200);
    let rows = data(&response);
    assert_eq!(rows[0]["quantity"], json!(21));
    assert_eq!(rows[0]["href"], json!("/orderDetails/10643~42"));
}

#[test]
fn test_get_filter_and_sort() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("orders").with_query("shipCity=Berlin&sort(-freight)"));
    assert_eq!(response.status, 200);
    assert_eq!(ids(&response, "orderId"), vec![json!(10692), json!(10643)]);
}

#[test]
fn test_unexpanded_many_to_one_is_href() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("orders").with_key("10643"));
    let rows = data(&response);
    assert_eq!(rows[0]["customer"], json!({"href": "/customers/ALFKI"}));
    assert_eq!(rows[0]["employee"], json!({"href": "/employees/1"}));
}

#[test]
fn test_paging_meta() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("orders").with_query("limit(2)&sort(orderId)"));
    assert_eq!(response.status, 200);
    assert_eq!(ids(&response, "orderId"), vec![json!(10643), json!(10692)]);

    let meta = &response.body.as_ref().unwrap()["meta"];
    assert_eq!(meta["foundRows"], json!(3));
    assert_eq!(meta["pageSize"], json!(2));
    assert_eq!(meta["pageNum"], json!(1));

    let next = meta["next"].as_str().unwrap();
    assert!(next.starts_with("/orders?"));
    assert!(next.contains("offset(2)"));
    assert!(next.contains("sort(orderId)"));

    let query = next.trim_start_matches("/orders?");
    let last = fx.run(Request::get("orders").with_query(query));
    assert_eq!(ids(&last, "orderId"), vec![json!(10759)]);
    assert!(last.body.as_ref().unwrap()["meta"].get("next").is_none());
}

#[test]
fn test_many_to_one_relationship_filter() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("orders").with_query("customer.country=Germany&sort(orderId)"));
    assert_eq!(response.status, 200);
    assert_eq!(ids(&response, "orderId"), vec![json!(10643), json!(10692)]);
}

#[test]
fn test_one_to_many_relationship_filter() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("customers").with_query("orders.shipCity=Berlin"));
    assert_eq!(ids(&response, "customerId"), vec![json!("ALFKI")]);
}

#[test]
fn test_many_to_many_relationship_filter() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("employees").with_query("territories.territoryId=01833"));
    assert_eq!(ids(&response, "employeeId"), vec![json!(1)]);

    let response = fx.run(
        Request::get("employees").with_query("territories.territoryId=01581&sort(employeeId)"),
    );
    assert_eq!(ids(&response, "employeeId"), vec![json!(1), json!(2)]);
}

#[test]
fn test_expand_fetches_shared_parent_once() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("orders").with_query("customerId=ALFKI&expand(customer)"));
    assert_eq!(response.status, 200);

    let rows = data(&response);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["customer"]["companyName"], json!("Alfreds Futterkiste"));
    assert_eq!(rows[0]["customer"], rows[1]["customer"]);
    assert_eq!(fx.calls(), vec!["GET /customers/ALFKI?limit(1)".to_string()]);
}

#[test]
fn test_expand_empty_to_many() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("customers").with_query("expand(orders)&sort(customerId)"));
    assert_eq!(response.status, 200);

    let rows = data(&response);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["orders"].as_array().unwrap().len(), 2);
    assert_eq!(rows[1]["orders"].as_array().unwrap().len(), 1);
    assert_eq!(rows[2]["orders"], json!([]));
    assert_eq!(rows[1]["orders"][0]["orderId"], json!(10759));
}

#[test]
fn test_expand_nested_path() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("orders").with_key("10643").with_query("expand(details.product)"));
    assert_eq!(response.status, 200);

    let details = data(&response)[0]["details"].as_array().cloned().unwrap();
    assert_eq!(details.len(), 2);
    let mut names: Vec<_> = details
        .iter()
        .map(|d| d["product"]["productName"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Queso Cabrales", "Singaporean Hokkien Fried Mee"]);

    // detail keys, detail rows, product rows
    let calls = fx.calls();
    assert_eq!(calls.len(), 3, "{:?}", calls);
    assert_eq!(fx.calls_matching("GET /products/").len(), 1);
}

#[test]
fn test_expand_many_to_many() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("employees").with_key("1").with_query("expand(territories)"));
    let territories = data(&response)[0]["territories"].as_array().cloned().unwrap();
    assert_eq!(territories.len(), 3);
    assert!(territories
        .iter()
        .any(|t| t["description"] == json!("Georgetown")));
    assert!(fx.calls_matching("GET /employeeTerritories?").len() == 1);
}

#[test]
fn test_hidden_relationship_renders_null() {
    let fx = Fixture::new();
    fx.stub(
        Method::Get,
        "customers",
        Response::new(403, Some(json!({"message": "forbidden"}))),
    );
    let response = fx.run(Request::get("orders").with_key("10643").with_query("expand(customer)"));
    assert_eq!(response.status, 200);
    assert_eq!(data(&response)[0]["customer"], Value::Null);
}

#[test]
fn test_nested_failure_is_passed_up() {
    let fx = Fixture::new();
    fx.stub(
        Method::Get,
        "customers",
        Response::new(503, Some(json!({"message": "down for maintenance"}))),
    );
    let response = fx.run(Request::get("orders").with_key("10643").with_query("expand(customer)"));
    assert_eq!(response.status, 503);
    assert!(response.message().contains("down for maintenance"));
}

#[test]
fn test_excludes() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("customers").with_key("ALFKI").with_query("excludes(companyName)"));
    let row = &data(&response)[0];
    assert!(row.get("companyName").is_none());
    assert_eq!(row["country"], json!("Germany"));
}

#[test]
fn test_includes_keeps_key_columns() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("orders").with_key("10643").with_query("includes(shipCity)"));
    let row = &data(&response)[0];
    assert_eq!(row["shipCity"], json!("Berlin"));
    assert_eq!(row["href"], json!("/orders/10643"));
    assert_eq!(row["customer"], json!({"href": "/customers/ALFKI"}));
    assert!(row.get("freight").is_none());
}

#[test]
fn test_handle_with_base_path() {
    let fx = Fixture::with_config(rest_rql::Config::default().with_base_path("/api"));
    let response = fx
        .engine
        .handle(Method::Get, "/api/orders/10643?expand(customer)", None);
    assert_eq!(response.status, 200);
    let row = &data(&response)[0];
    assert_eq!(row["href"], json!("/api/orders/10643"));
    assert_eq!(row["customer"]["href"], json!("/api/customers/ALFKI"));
}

#[test]
fn test_expand_pages_through_children() {
    let fx = Fixture::with_config(rest_rql::Config::default().with_expand_page_size(1));
    let response = fx.run(Request::get("customers").with_query("expand(orders)&sort(customerId)"));
    assert_eq!(response.status, 200);

    let rows = data(&response);
    assert_eq!(rows[0]["orders"].as_array().unwrap().len(), 2);
    assert_eq!(rows[1]["orders"].as_array().unwrap().len(), 1);
    assert_eq!(rows[2]["orders"], json!([]));
    // three full pages of one pair, then an empty one
    assert_eq!(fx.calls_matching("GET /orders?").len(), 4);
}

#[test]
fn test_expand_fuse_is_500() {
    let fx = Fixture::with_config(
        rest_rql::Config::default()
            .with_expand_page_size(1)
            .with_max_iterations(2),
    );
    let response = fx.run(Request::get("customers").with_query("expand(orders)"));
    assert_eq!(response.status, 500);
}

#[test]
fn test_expand_unknown_relationship_is_404() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("orders").with_query("expand(nope)"));
    assert_eq!(response.status, 404);

    let response = fx.run(Request::get("orders").with_query("expand(customer.nope)"));
    assert_eq!(response.status, 404);
    assert!(response.message().contains("nope"));
    assert!(fx.calls().is_empty());
}

#[test]
fn test_unknown_relationship_filter_is_400() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("orders").with_query("nope.x=1"));
    assert_eq!(response.status, 400);
}

#[test]
fn test_empty_key_filter_is_400() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("orders").with_query("_key()"));
    assert_eq!(response.status, 400);
}

#[test]
fn test_huge_page_number_is_empty() {
    let fx = Fixture::new();
    let response = fx.run(Request::get("orders").with_query("page(18446744073709551615)&limit(2)"));
    assert_eq!(response.status, 200);
    assert!(data(&response).is_empty());
}

#[test]
fn test_handle_decodes_query() {
    let fx = Fixture::new();
    let response = fx
        .engine
        .handle(Method::Get, "/customers?companyName=Alfreds%20Futterkiste", None);
    assert_eq!(response.status, 200);
    assert_eq!(ids(&response, "customerId"), vec![json!("ALFKI")]);
}
