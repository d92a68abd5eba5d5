//! Request pipeline and route installation.
//!
//! Per request: authenticate (best effort), read and coerce parameters, authorize, dispatch.

use crate::dto::{FieldSpec, Row};
use crate::error::{AppError, ConfigError};
use crate::routes::route::{CompiledRoute, Handler, Params, RawContext, RequestArgs, UploadedFile};
use crate::service::PageRequest;
use crate::state::AppState;
use crate::types::FieldType;
use axum::extract::{FromRequest, FromRequestParts, Multipart, OriginalUri, Path, Query, Request, State};
use axum::http::{header, request::Parts};
use axum::response::Response;
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::{Form, Router};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Bind `routes` to a router, fewer path parameters first.
pub(crate) fn install(routes: &[Arc<CompiledRoute>]) -> Result<Router<AppState>, ConfigError> {
    let mut ordered: Vec<&Arc<CompiledRoute>> = routes.iter().collect();
    ordered.sort_by_key(|r| r.path.len());
    check_conflicts(&ordered)?;

    let mut grouped: Vec<(String, MethodRouter<AppState>)> = Vec::new();
    let mut bound: Vec<(String, axum::http::Method)> = Vec::new();
    for route in ordered {
        let key = (route.native_path.clone(), route.method.clone());
        if bound.contains(&key) {
            return Err(ConfigError::InvalidRoute(format!(
                "{} {} declared twice",
                route.method, route.uri
            )));
        }
        bound.push(key);

        let filter = MethodFilter::try_from(route.method.clone())
            .map_err(|e| ConfigError::InvalidRoute(format!("{} {}: {}", route.method, route.uri, e)))?;
        let target = Arc::clone(route);
        let endpoint = on(filter, move |State(state): State<AppState>, req: Request| {
            dispatch(Arc::clone(&target), state, req)
        });
        match grouped.iter_mut().find(|(path, _)| *path == route.native_path) {
            Some((_, existing)) => {
                let merged = std::mem::replace(existing, MethodRouter::new()).merge(endpoint);
                *existing = merged;
            }
            None => grouped.push((route.native_path.clone(), endpoint)),
        }
        tracing::info!(method = %route.method, path = %route.native_path, "route bound");
    }

    Ok(grouped
        .into_iter()
        .fold(Router::new(), |router, (path, methods)| router.route(&path, methods)))
}

/// Parameters at the same position under the same prefix must share a name.
fn check_conflicts(routes: &[&Arc<CompiledRoute>]) -> Result<(), ConfigError> {
    for (i, a) in routes.iter().enumerate() {
        for b in &routes[i + 1..] {
            for (x, y) in a.native_path.split('/').zip(b.native_path.split('/')) {
                if x == y {
                    continue;
                }
                if x.starts_with(':') && y.starts_with(':') {
                    return Err(ConfigError::InvalidRoute(format!(
                        "{} and {} name the same path parameter differently",
                        a.uri, b.uri
                    )));
                }
                break;
            }
        }
    }
    Ok(())
}

pub(crate) async fn dispatch(route: Arc<CompiledRoute>, state: AppState, req: Request) -> Response {
    let uri = request_path(&req);
    match process(&route, &state, req).await {
        Ok(resp) => resp,
        Err(e) => {
            if e.is_unexpected() {
                tracing::warn!(method = %route.method, uri = %uri, error = %e, "request failed");
            }
            e.into_envelope(Some(&uri))
        }
    }
}

/// Path as the client sent it, before nesting stripped the prefix.
fn request_path(req: &Request) -> String {
    req.extensions()
        .get::<OriginalUri>()
        .map(|original| original.0.path())
        .unwrap_or_else(|| req.uri().path())
        .to_string()
}

async fn process(route: &CompiledRoute, state: &AppState, req: Request) -> Result<Response, AppError> {
    let (mut parts, body) = req.into_parts();
    let user = state.auth.authenticate(&parts.headers).await;
    let path = path_params(route, &mut parts, state).await?;
    let query = query_params(&parts)?;

    match &route.handler {
        Handler::Raw(handler) => {
            let mut params = path;
            params.extend(query);
            route.policy.authorize(&params, user.as_ref())?;
            let req = Request::from_parts(parts, body);
            Ok(handler(req, RawContext { user, params }).await)
        }
        Handler::Data(handler) => {
            let (raw_body, files) = read_body(Request::from_parts(parts, body)).await?;

            let mut params = path.clone();
            params.extend(raw_body.clone());
            params.extend(query.clone());

            let body = if route.is_multipart() {
                coerce_fields(&route.form, &raw_body)
            } else {
                coerce_params(&route.body, &raw_body)
            };
            let args = RequestArgs {
                path: coerce_fields(&route.path, &path),
                query: coerce_params(&route.query, &query),
                body,
                files,
                page: route.paging.then(|| PageRequest::from_params(&query)),
                user,
                params,
            };
            route.policy.authorize(&args.params, args.user.as_ref())?;
            handler(args).await
        }
    }
}

async fn path_params(route: &CompiledRoute, parts: &mut Parts, state: &AppState) -> Result<Row, AppError> {
    if route.path.is_empty() {
        return Ok(Row::new());
    }
    let Path(raw) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?;
    Ok(raw.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}

/// Query string as strings; a repeated key keeps its last value.
fn query_params(parts: &Parts) -> Result<Row, AppError> {
    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
        .map_err(|e| AppError::BadRequest(e.body_text()))?;
    Ok(pairs.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}

/// Buffer the body: JSON object, urlencoded form, or multipart fields and files.
async fn read_body(req: Request) -> Result<(Row, Vec<UploadedFile>), AppError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        let mut fields = Row::new();
        let mut files = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await.map_err(|e| AppError::BadRequest(e.body_text()))?;
            if file_name.is_some() {
                files.push(UploadedFile {
                    field: name,
                    file_name,
                    content_type,
                    data,
                });
            } else {
                fields.insert(name, Value::String(String::from_utf8_lossy(&data).into_owned()));
            }
        }
        return Ok((fields, files));
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, &())
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        return Ok((pairs.into_iter().map(|(k, v)| (k, Value::String(v))).collect(), Vec::new()));
    }

    let bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| AppError::BadRequest(format!("unreadable body: {}", e)))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok((Row::new(), Vec::new()));
    }
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok((map, Vec::new())),
        Ok(_) => Err(AppError::BadRequest("body must be a JSON object".into())),
        Err(e) => Err(AppError::BadRequest(format!("invalid JSON body: {}", e))),
    }
}

fn coerce_params(params: &Params, source: &Row) -> Row {
    match params {
        Params::None => Row::new(),
        Params::Fields(fields) => coerce_fields(fields, source),
        Params::Object(vo) => coerce_fields(vo.properties(), source),
    }
}

/// Declared fields only; values failing coercion are dropped.
pub(crate) fn coerce_fields(fields: &[(String, FieldSpec)], source: &Row) -> Row {
    let mut out = Row::new();
    for (name, spec) in fields {
        let Some(raw) = source.get(name) else { continue };
        let value = match &spec.ty {
            FieldType::Scalar(t) => t.coerce(raw).into_value(),
            FieldType::Reference(vo) => match raw {
                Value::Object(obj) => Some(Value::Object(coerce_fields(vo.properties(), obj))),
                Value::Array(items) => Some(Value::Array(
                    items
                        .iter()
                        .filter_map(|item| item.as_object())
                        .map(|o| Value::Object(coerce_fields(vo.properties(), o)))
                        .collect(),
                )),
                _ => None,
            },
        };
        if let Some(v) = value {
            out.insert(name.clone(), v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::ValueObject;
    use crate::types::TypeDescriptor;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn coercion_keeps_declared_valid_fields() {
        let fields = vec![
            ("age".to_string(), FieldSpec::new(TypeDescriptor::int())),
            ("kind".to_string(), FieldSpec::new(TypeDescriptor::enumeration(["a", "b"]))),
            ("on".to_string(), FieldSpec::new(TypeDescriptor::boolean())),
        ];
        let out = coerce_fields(
            &fields,
            &row(json!({"age": "42abc", "kind": "z", "on": "false", "extra": 1})),
        );
        assert_eq!(out, row(json!({"age": 42, "on": false})));
    }

    #[test]
    fn nested_value_objects_map_their_fields() {
        let tag = Arc::new(ValueObject::new(
            "Tag",
            [("label", FieldSpec::new(TypeDescriptor::string()))],
            None,
        ));
        let fields = vec![("tag".to_string(), FieldSpec::new(&tag))];
        let out = coerce_fields(&fields, &row(json!({"tag": {"label": 5, "junk": true}})));
        assert_eq!(out, row(json!({"tag": {"label": "5"}})));
    }

    #[test]
    fn object_bodies_drop_values_failing_coercion() {
        let tag = Arc::new(ValueObject::new(
            "Tag",
            [("id", FieldSpec::new(TypeDescriptor::int()))],
            None,
        ));
        let note = Arc::new(ValueObject::new(
            "Note",
            [
                ("id", FieldSpec::new(TypeDescriptor::int())),
                ("title", FieldSpec::new(TypeDescriptor::string())),
                ("tags", FieldSpec::new(&tag)),
            ],
            None,
        ));
        let body = row(json!({"id": "abc", "title": "x", "tags": [{"id": "7"}, {"id": "nope"}]}));
        let out = coerce_params(&Params::Object(note), &body);
        assert_eq!(out, row(json!({"title": "x", "tags": [{"id": 7}, {}]})));
    }
}
