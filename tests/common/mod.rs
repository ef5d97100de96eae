//! Shared fixture: a small order database behind an [`Engine`], fronted by
//! an executor that records every nested request.

#![allow(dead_code)]

use parking_lot::Mutex;
use rest_rql::{
    Collection, Config, Engine, MemoryDb, Method, Relationship, Request, RequestExecutor,
    Response, Row, SchemaCache,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn row(value: Value) -> Row {
    value.as_object().cloned().expect("fixture rows are objects")
}

pub fn schema() -> SchemaCache {
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
                .with_relationship(Relationship::many_to_one(
                    "customer",
                    "orders",
                    "customers",
                    &["customerId"],
                ))
                .with_relationship(Relationship::many_to_one(
                    "employee",
                    "orders",
                    "employees",
                    &["employeeId"],
                ))
                .with_relationship(Relationship::one_to_many(
                    "details",
                    "orders",
                    "orderDetails",
                    &["orderId"],
                )),
        )
        .with_collection(
            Collection::new("orderDetails")
                .with_primary_key(&["orderId", "productId"])
                .with_relationship(Relationship::many_to_one(
                    "order",
                    "orderDetails",
                    "orders",
                    &["orderId"],
                ))
                .with_relationship(Relationship::many_to_one(
                    "product",
                    "orderDetails",
                    "products",
                    &["productId"],
                )),
        )
        .with_collection(Collection::new("products").with_primary_key(&["productId"]))
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
                ))
                .with_relationship(Relationship::one_to_many(
                    "orders",
                    "employees",
                    "orders",
                    &["employeeId"],
                )),
        )
        .with_collection(
            Collection::new("territories")
                .with_primary_key(&["territoryId"])
                .with_relationship(Relationship::many_to_many(
                    "employees",
                    "territories",
                    "employees",
                    "employeeTerritories",
                    &["territoryId"],
                    &["employeeId"],
                )),
        )
        .with_collection(
            Collection::new("employeeTerritories").with_primary_key(&["employeeId", "territoryId"]),
        )
}

pub fn seed(db: &MemoryDb) {
    db.insert(
        "customers",
        vec![
            row(json!({"customerId": "ALFKI", "companyName": "Alfreds Futterkiste", "country": "Germany"})),
            row(json!({"customerId": "ANATR", "companyName": "Ana Trujillo", "country": "Mexico"})),
            row(json!({"customerId": "FISSA", "companyName": "FISSA Fabrica", "country": "Spain"})),
        ],
    );
    db.insert(
        "orders",
        vec![
            row(json!({"orderId": 10643, "customerId": "ALFKI", "employeeId": 1, "shipCity": "Berlin", "freight": 29.46})),
            row(json!({"orderId": 10692, "customerId": "ALFKI", "employeeId": 2, "shipCity": "Berlin", "freight": 61.02})),
            row(json!({"orderId": 10759, "customerId": "ANATR", "employeeId": 2, "shipCity": "Mexico", "freight": 11.99})),
        ],
    );
    db.insert(
        "orderDetails",
        vec![
            row(json!({"orderId": 10643, "productId": 11, "quantity": 15})),
            row(json!({"orderId": 10643, "productId": 42, "quantity": 21})),
            row(json!({"orderId": 10692, "productId": 72, "quantity": 20})),
            row(json!({"orderId": 10759, "productId": 11, "quantity": 10})),
        ],
    );
    db.insert(
        "products",
        vec![
            row(json!({"productId": 11, "productName": "Queso Cabrales"})),
            row(json!({"productId": 42, "productName": "Singaporean Hokkien Fried Mee"})),
            row(json!({"productId": 72, "productName": "Mozzarella di Giovanni"})),
        ],
    );
    db.insert(
        "employees",
        vec![
            row(json!({"employeeId": 1, "lastName": "Davolio"})),
            row(json!({"employeeId": 2, "lastName": "Fuller"})),
        ],
    );
    db.insert(
        "territories",
        vec![
            row(json!({"territoryId": "01581", "description": "Westboro"})),
            row(json!({"territoryId": "01730", "description": "Bedford"})),
            row(json!({"territoryId": "01833", "description": "Georgetown"})),
        ],
    );
    db.insert(
        "employeeTerritories",
        vec![
            row(json!({"employeeId": 1, "territoryId": "01581"})),
            row(json!({"employeeId": 1, "territoryId": "01730"})),
            row(json!({"employeeId": 1, "territoryId": "01833"})),
            row(json!({"employeeId": 2, "territoryId": "01581"})),
        ],
    );
}

/// Front door used by the tests. Nested requests are recorded and can be
/// answered by canned responses instead of the engine.
pub struct Fixture {
    pub engine: Engine,
    pub db: Arc<MemoryDb>,
    calls: Mutex<Vec<String>>,
    stubs: Mutex<Vec<(Method, String, Response)>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let schema = schema();
        schema.validate().expect("fixture schema is valid");
        let db = Arc::new(MemoryDb::new(schema.clone()));
        seed(&db);
        Self {
            engine: Engine::new(schema, db.clone()).with_config(config),
            db,
            calls: Mutex::new(Vec::new()),
            stubs: Mutex::new(Vec::new()),
        }
    }

    /// Runs a client request. Only the nested requests it causes are recorded.
    pub fn run(&self, request: Request) -> Response {
        self.engine.execute_with(request, self)
    }

    pub fn stub(&self, method: Method, collection: &str, response: Response) {
        self.stubs
            .lock()
            .push((method, collection.to_string(), response));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn rows(&self, collection: &str) -> Vec<Row> {
        self.db.rows(collection)
    }

    pub fn find(&self, collection: &str, column: &str, value: Value) -> Option<Row> {
        self.rows(collection)
            .into_iter()
            .find(|r| r.get(column) == Some(&value))
    }
}

impl RequestExecutor for Fixture {
    fn execute(&self, request: Request) -> Response {
        self.calls.lock().push(request.to_string());
        let stub = self
            .stubs
            .lock()
            .iter()
            .find(|(method, collection, _)| {
                *method == request.method && collection.eq_ignore_ascii_case(&request.collection)
            })
            .map(|(_, _, response)| response.clone());
        match stub {
            Some(response) => response,
            None => self.engine.execute_with(request, self),
        }
    }
}
