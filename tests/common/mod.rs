#![allow(dead_code)]

use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Introspection payload for a small users/products service.
pub fn introspection_response() -> Value {
    json!({
        "data": {
            "__schema": {
                "queryType": { "name": "Query" },
                "mutationType": { "name": "Mutation" },
                "subscriptionType": null,
                "types": [
                    {
                        "kind": "OBJECT",
                        "name": "Query",
                        "fields": [
                            {
                                "name": "product",
                                "args": [{
                                    "name": "upc",
                                    "type": { "kind": "NON_NULL", "name": null,
                                              "ofType": { "kind": "SCALAR", "name": "String", "ofType": null } },
                                    "defaultValue": null
                                }],
                                "type": { "kind": "OBJECT", "name": "Product", "ofType": null }
                            },
                            {
                                "name": "topProducts",
                                "args": [],
                                "type": { "kind": "LIST", "name": null,
                                          "ofType": { "kind": "OBJECT", "name": "Product", "ofType": null } }
                            }
                        ]
                    },
                    {
                        "kind": "OBJECT",
                        "name": "Mutation",
                        "fields": [{
                            "name": "createProduct",
                            "args": [],
                            "type": { "kind": "OBJECT", "name": "Product", "ofType": null }
                        }]
                    },
                    {
                        "kind": "OBJECT",
                        "name": "Product",
                        "fields": [
                            { "name": "upc", "args": [], "type": { "kind": "SCALAR", "name": "String" } },
                            { "name": "price", "args": [], "type": { "kind": "SCALAR", "name": "Int" } }
                        ]
                    },
                    { "kind": "SCALAR", "name": "String" },
                    { "kind": "SCALAR", "name": "Int" },
                    { "kind": "OBJECT", "name": "__Type", "fields": [] }
                ],
                "directives": []
            }
        }
    })
}

/// Starts a mock endpoint that answers introspection requests.
pub async fn introspectable_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "operationName": "IntrospectionQuery" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(introspection_response()))
        .mount(&server)
        .await;
    server
}

/// A local address nothing listens on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{}/graphql", port)
}
