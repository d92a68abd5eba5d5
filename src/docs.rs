//! OpenAPI document built from registered value objects and routes, plus a viewer page.

use crate::config::SwaggerOptions;
use crate::dto::{FieldSpec, ValueObject};
use crate::routes::{CompiledRoute, Params};
use crate::service::{DEFAULT_PAGE_LIMIT, DEFAULT_PAGE_SORT};
use crate::types::{FieldType, TypeDescriptor};
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const DOCS_PATH: &str = "/api-docs";
pub const VIEWER_PATH: &str = "/swagger-ui.html";

const METHOD_ORDER: [&str; 4] = ["get", "post", "put", "delete"];

/// The assembled document; only the server entry depends on the request.
#[derive(Clone, Debug)]
pub struct ApiDoc {
    document: Value,
    scheme: String,
    host: Option<String>,
    prefix: String,
}

impl ApiDoc {
    /// `schemas` are the registered value-object schemas by name. Value objects reachable
    /// from routes but never registered are added under their own names.
    pub fn build(
        options: &SwaggerOptions,
        prefix: &str,
        schemas: &BTreeMap<String, Value>,
        routes: &[Arc<CompiledRoute>],
    ) -> Self {
        let mut components = schemas.clone();
        let mut seen = BTreeSet::new();
        for route in routes {
            collect_route(route, &mut components, &mut seen);
        }

        let mut documented: Vec<&Arc<CompiledRoute>> = routes
            .iter()
            .filter(|r| !r.tags.is_empty() && r.summary.is_some())
            .collect();
        documented.sort_by(|a, b| compare_routes(a, b));

        let mut paths = Map::new();
        for route in documented {
            let entry = paths
                .entry(route.uri.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(methods) = entry {
                methods.insert(route.method.as_str().to_lowercase(), operation(route));
            }
        }

        let document = json!({
            "openapi": "3.0.0",
            "info": {
                "title": options.name,
                "version": options.version,
                "description": options.description,
            },
            "paths": paths,
            "components": {
                "schemas": components,
                "securitySchemes": {
                    "user_auth": { "type": "http", "scheme": "bearer", "bearerFormat": "JWT" }
                }
            }
        });
        ApiDoc {
            document,
            scheme: if options.scheme.is_empty() { "http".into() } else { options.scheme.clone() },
            host: options.host.clone(),
            prefix: prefix.to_string(),
        }
    }

    /// The document with its server URL; a configured host wins over the request's.
    pub fn render(&self, request_host: Option<&str>) -> Value {
        let mut document = self.document.clone();
        if let Some(host) = self.host.as_deref().or(request_host) {
            document["servers"] = json!([{ "url": format!("{}://{}{}", self.scheme, host, self.prefix) }]);
        }
        document
    }

    pub fn document(&self) -> &Value {
        &self.document
    }
}

type Components = BTreeMap<String, Value>;

fn collect_route(route: &CompiledRoute, out: &mut Components, seen: &mut BTreeSet<String>) {
    for params in [&route.query, &route.body] {
        match params {
            Params::Object(vo) => collect_value_object(vo, out, seen),
            _ => params.fields().iter().for_each(|(_, s)| collect_schemas(&s.ty, out, seen)),
        }
    }
    let declared = route.path.iter().chain(route.form.iter());
    declared.for_each(|(_, s)| collect_schemas(&s.ty, out, seen));
    if let Some(ty) = &route.response {
        collect_schemas(ty, out, seen);
    }
}

/// Registered schemas are kept as registered; unregistered ones are added.
fn collect_value_object(vo: &Arc<ValueObject>, out: &mut Components, seen: &mut BTreeSet<String>) {
    if !seen.insert(vo.name().to_string()) {
        return;
    }
    out.entry(vo.name().to_string()).or_insert_with(|| vo.doc_schema());
    for (_, spec) in vo.properties() {
        collect_schemas(&spec.ty, out, seen);
    }
}

fn collect_schemas(ty: &FieldType, out: &mut Components, seen: &mut BTreeSet<String>) {
    match ty {
        FieldType::Reference(vo) => collect_value_object(vo, out, seen),
        FieldType::Scalar(TypeDescriptor::Array(inner) | TypeDescriptor::Paging(inner)) => {
            collect_schemas(inner, out, seen)
        }
        FieldType::Scalar(_) => {}
    }
}

fn compare_routes(a: &CompiledRoute, b: &CompiledRoute) -> Ordering {
    let method_rank = |r: &CompiledRoute| {
        let m = r.method.as_str().to_lowercase();
        METHOD_ORDER.iter().position(|x| *x == m).unwrap_or(METHOD_ORDER.len())
    };
    a.tags
        .first()
        .cmp(&b.tags.first())
        .then_with(|| a.uri.cmp(&b.uri))
        .then_with(|| method_rank(a).cmp(&method_rank(b)))
}

fn parameter(name: &str, location: &str, spec: &FieldSpec, required: bool) -> Value {
    let mut p = json!({
        "name": name,
        "in": location,
        "required": required,
        "schema": spec.to_doc_schema(),
    });
    if let Some(comment) = &spec.comment {
        p["description"] = json!(comment);
    }
    p
}

fn paging_parameters() -> Vec<Value> {
    vec![
        json!({ "name": "page", "in": "query", "required": false,
                "schema": { "type": "integer", "format": "int64", "default": 0 } }),
        json!({ "name": "limit", "in": "query", "required": false,
                "schema": { "type": "integer", "format": "int64", "default": DEFAULT_PAGE_LIMIT } }),
        json!({ "name": "sort", "in": "query", "required": false,
                "schema": { "type": "string", "default": DEFAULT_PAGE_SORT } }),
        json!({ "name": "dir", "in": "query", "required": false,
                "schema": { "type": "string", "enum": ["asc", "desc"], "default": "desc" } }),
    ]
}

fn object_schema(fields: &[(String, FieldSpec)]) -> Value {
    let properties: Map<String, Value> = fields.iter().map(|(k, s)| (k.clone(), s.to_doc_schema())).collect();
    let required: Vec<&str> = fields.iter().filter(|(_, s)| s.required).map(|(k, _)| k.as_str()).collect();
    let mut schema = json!({ "type": "object", "properties": properties });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

fn operation(route: &CompiledRoute) -> Value {
    let mut parameters: Vec<Value> = route
        .path
        .iter()
        .map(|(name, spec)| parameter(name, "path", spec, true))
        .collect();
    parameters.extend(
        route
            .query
            .fields()
            .iter()
            .map(|(name, spec)| parameter(name, "query", spec, spec.required)),
    );
    if route.paging {
        parameters.extend(paging_parameters());
    }

    let security = if route.policy.roles().is_empty() {
        json!([])
    } else {
        json!([{ "user_auth": route.policy.names() }])
    };

    let response_schema = route.response.as_ref().map(FieldType::to_doc_schema);
    let mut op = json!({
        "tags": route.tags,
        "summary": route.summary,
        "operationId": format!("{}:{}", route.method, route.uri),
        "security": security,
        "parameters": parameters,
        "responses": {
            "200": {
                "description": "OK",
                "content": { "application/json": { "schema": response_schema.unwrap_or_else(|| json!({})) } }
            }
        }
    });
    if let Some(description) = &route.description {
        op["description"] = json!(description);
    }

    let body = if route.is_multipart() {
        Some(("multipart/form-data", object_schema(&route.form)))
    } else {
        match &route.body {
            Params::None => None,
            Params::Fields(fields) if fields.is_empty() => None,
            Params::Fields(fields) => Some(("application/json", object_schema(fields))),
            Params::Object(vo) => Some((
                "application/json",
                json!({ "$ref": format!("#/components/schemas/{}", vo.name()) }),
            )),
        }
    };
    if let Some((media, schema)) = body {
        let mut content = Map::new();
        content.insert(media.to_string(), json!({ "schema": schema }));
        op["requestBody"] = json!({ "content": content });
    }
    op
}

/// Viewer page loading the document from `doc_url`.
pub fn viewer_html(title: &str, doc_url: &str) -> String {
    format!(
        r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
<div id="swagger-ui"></div>
<script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
<script>
window.ui = SwaggerUIBundle({{ url: "{doc_url}", dom_id: "#swagger-ui", docExpansion: "none" }});
</script>
</body>
</html>"##
    )
}

async fn serve_doc(State(doc): State<Arc<ApiDoc>>, headers: HeaderMap) -> Json<Value> {
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    Json(doc.render(host))
}

async fn serve_viewer(State(doc): State<Arc<ApiDoc>>) -> Html<String> {
    let title = doc.document["info"]["title"].as_str().unwrap_or("API");
    Html(viewer_html(title, DOCS_PATH))
}

/// `GET /api-docs` and `GET /swagger-ui.html`.
pub fn docs_router(doc: Arc<ApiDoc>) -> Router {
    Router::new()
        .route(DOCS_PATH, get(serve_doc))
        .route(VIEWER_PATH, get(serve_viewer))
        .with_state(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::Route;

    fn options() -> SwaggerOptions {
        SwaggerOptions {
            name: "svc".into(),
            version: "1.0".into(),
            description: String::new(),
            scheme: "https".into(),
            host: None,
        }
    }

    fn compiled(route: Route) -> Arc<CompiledRoute> {
        Arc::new(route.handle(|_| async { Ok(()) }).compile().unwrap())
    }

    #[test]
    fn nested_value_objects_are_referenced() {
        let b = Arc::new(ValueObject::new("B", [("x", FieldSpec::new(TypeDescriptor::int()))], None));
        let a = Arc::new(ValueObject::new("A", [("b", FieldSpec::new(&b))], None));
        let mut schemas = BTreeMap::new();
        schemas.insert("A".to_string(), a.doc_schema());
        schemas.insert("B".to_string(), b.doc_schema());
        let doc = ApiDoc::build(&options(), "", &schemas, &[]);
        let components = &doc.document()["components"]["schemas"];
        assert_eq!(components["A"]["properties"]["b"], json!({"$ref": "#/components/schemas/B"}));
        assert_eq!(components["B"]["properties"]["x"]["type"], json!("integer"));
    }

    #[test]
    fn operations_are_filtered_sorted_and_described() {
        let item = Arc::new(ValueObject::new("Item", [("id", FieldSpec::new(TypeDescriptor::int()))], None));
        let routes = vec![
            compiled(Route::delete("/items/{id}").tags(["items"]).summary("remove").roles(["admin"])),
            compiled(
                Route::get("/items")
                    .paging()
                    .response(TypeDescriptor::paging(&item))
                    .tags(["items"])
                    .summary("list")
                    .roles(["any", "owner:params.id == user.id"]),
            ),
            compiled(Route::get("/hidden").tags(["items"])),
            compiled(
                Route::post("/items/{id}/files")
                    .form_field("file", TypeDescriptor::binary())
                    .tags(["files"])
                    .summary("upload"),
            ),
        ];
        let doc = ApiDoc::build(&options(), "/api", &BTreeMap::new(), &routes);
        let paths = doc.document()["paths"].as_object().unwrap();
        let keys: Vec<&String> = paths.keys().collect();
        assert_eq!(keys.len(), 3);
        assert!(paths.get("/hidden").is_none());

        let list = &paths["/items"]["get"];
        let names: Vec<&str> = list["parameters"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["page", "limit", "sort", "dir"]);
        assert_eq!(list["security"], json!([{"user_auth": ["any", "owner"]}]));
        assert_eq!(
            list["responses"]["200"]["content"]["application/json"]["schema"]["properties"]["items"]["items"],
            json!({"$ref": "#/components/schemas/Item"})
        );
        assert!(doc.document()["components"]["schemas"].get("Item").is_some());

        let remove = &paths["/items/{id}"]["delete"];
        assert_eq!(remove["parameters"][0]["in"], json!("path"));
        assert_eq!(remove["operationId"], json!("DELETE:/items/{id}"));

        let upload = &paths["/items/{id}/files"]["post"];
        assert!(upload["requestBody"]["content"].get("multipart/form-data").is_some());
    }

    #[test]
    fn server_url_uses_configured_or_request_host() {
        let doc = ApiDoc::build(&options(), "/api", &BTreeMap::new(), &[]);
        assert_eq!(doc.render(Some("localhost:3100"))["servers"][0]["url"], json!("https://localhost:3100/api"));
        let fixed = ApiDoc::build(
            &SwaggerOptions {
                host: Some("api.example.org".into()),
                ..options()
            },
            "",
            &BTreeMap::new(),
            &[],
        );
        assert_eq!(fixed.render(Some("ignored"))["servers"][0]["url"], json!("https://api.example.org"));
    }
}
