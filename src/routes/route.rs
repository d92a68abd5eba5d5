//! Route declarations and their compiled form.

use crate::auth::AuthUser;
use crate::dto::{FieldSpec, Row, ValueObject};
use crate::error::{AppError, ConfigError};
use crate::response;
use crate::routes::role::{Policy, Role};
use crate::service::PageRequest;
use crate::types::{FieldType, TypeDescriptor};
use axum::body::Bytes;
use axum::extract::Request;
use axum::http::Method;
use axum::response::Response;
use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, OnceLock};

fn path_param_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-zA-Z0-9_]+)\}").expect("static regex"))
}

/// One uploaded multipart file.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// What a data handler receives.
#[derive(Clone, Debug, Default)]
pub struct RequestArgs {
    /// Declared path parameters, coerced.
    pub path: Row,
    /// Declared query fields, coerced.
    pub query: Row,
    /// Declared body (or form) fields, coerced.
    pub body: Row,
    pub files: Vec<UploadedFile>,
    pub user: Option<AuthUser>,
    /// Raw path, body and query parameters merged, query winning.
    pub params: Row,
    /// Set on routes declared with paging.
    pub page: Option<PageRequest>,
}

/// What a raw handler receives next to the untouched request.
#[derive(Clone, Debug, Default)]
pub struct RawContext {
    pub user: Option<AuthUser>,
    /// Raw path and query parameters merged.
    pub params: Row,
}

pub type DataHandler = Arc<dyn Fn(RequestArgs) -> BoxFuture<'static, Result<Response, AppError>> + Send + Sync>;
pub type RawHandler = Arc<dyn Fn(Request, RawContext) -> BoxFuture<'static, Response> + Send + Sync>;

#[derive(Clone)]
pub enum Handler {
    /// Result serialized as a 200 JSON response.
    Data(DataHandler),
    /// Fully responsible for its response; the request body is left unread.
    Raw(RawHandler),
}

/// Declared fields of a query string or body.
#[derive(Clone, Debug, Default)]
pub enum Params {
    #[default]
    None,
    Fields(Vec<(String, FieldSpec)>),
    Object(Arc<ValueObject>),
}

impl Params {
    fn push(&mut self, name: String, spec: FieldSpec) {
        match self {
            Params::Fields(fields) => fields.push((name, spec)),
            _ => *self = Params::Fields(vec![(name, spec)]),
        }
    }

    pub fn is_none(&self) -> bool {
        match self {
            Params::None => true,
            Params::Fields(fields) => fields.is_empty(),
            Params::Object(_) => false,
        }
    }

    /// Declared fields, whichever way they were declared.
    pub fn fields(&self) -> &[(String, FieldSpec)] {
        match self {
            Params::None => &[],
            Params::Fields(fields) => fields,
            Params::Object(vo) => vo.properties(),
        }
    }
}

/// A route declaration, built fluently and handed to the registry.
///
/// ```ignore
/// Route::get("/users/{id}")
///     .roles(["admin", "owner:params.id == user.id"])
///     .response(&user_vo)
///     .tags(["users"])
///     .summary("Read a user")
///     .handle(|args| async move { Ok(args.path) });
/// ```
#[derive(Clone)]
pub struct Route {
    pub(crate) method: Method,
    pub(crate) uri: String,
    pub(crate) path: Vec<(String, FieldSpec)>,
    pub(crate) query: Params,
    pub(crate) body: Params,
    pub(crate) form: Vec<(String, FieldSpec)>,
    pub(crate) response: Option<FieldType>,
    pub(crate) paging: bool,
    pub(crate) roles: Vec<String>,
    pub(crate) custom_roles: Vec<Role>,
    pub(crate) tags: Vec<String>,
    pub(crate) summary: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) handler: Option<Handler>,
}

impl Route {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Route {
            method,
            uri: uri.into(),
            path: Vec::new(),
            query: Params::None,
            body: Params::None,
            form: Vec::new(),
            response: None,
            paging: false,
            roles: Vec::new(),
            custom_roles: Vec::new(),
            tags: Vec::new(),
            summary: None,
            description: None,
            handler: None,
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    pub fn put(uri: impl Into<String>) -> Self {
        Self::new(Method::PUT, uri)
    }

    pub fn delete(uri: impl Into<String>) -> Self {
        Self::new(Method::DELETE, uri)
    }

    /// Type a `{name}` placeholder; undeclared placeholders are strings.
    pub fn path_param(mut self, name: impl Into<String>, spec: impl Into<FieldSpec>) -> Self {
        self.path.push((name.into(), spec.into()));
        self
    }

    pub fn query_field(mut self, name: impl Into<String>, spec: impl Into<FieldSpec>) -> Self {
        self.query.push(name.into(), spec.into());
        self
    }

    /// Query string shaped by a value object's fields.
    pub fn query(mut self, vo: &Arc<ValueObject>) -> Self {
        self.query = Params::Object(Arc::clone(vo));
        self
    }

    pub fn body_field(mut self, name: impl Into<String>, spec: impl Into<FieldSpec>) -> Self {
        self.body.push(name.into(), spec.into());
        self
    }

    /// JSON body shaped by a value object.
    pub fn body(mut self, vo: &Arc<ValueObject>) -> Self {
        self.body = Params::Object(Arc::clone(vo));
        self
    }

    /// Multipart field. Any form field switches the body to `multipart/form-data`.
    pub fn form_field(mut self, name: impl Into<String>, spec: impl Into<FieldSpec>) -> Self {
        self.form.push((name.into(), spec.into()));
        self
    }

    pub fn response(mut self, ty: impl Into<FieldType>) -> Self {
        self.response = Some(ty.into());
        self
    }

    /// Accept `page`, `limit`, `sort` and `dir` query parameters.
    pub fn paging(mut self) -> Self {
        self.paging = true;
        self
    }

    /// `any`, plain role names, or `role:predicate` entries.
    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.custom_roles.push(role);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Handler receiving [`RequestArgs`]; its value is answered as 200 JSON.
    pub fn handle<F, Fut, T>(mut self, f: F) -> Self
    where
        F: Fn(RequestArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, AppError>> + Send + 'static,
        T: Serialize,
    {
        let f = Arc::new(f);
        self.handler = Some(Handler::Data(Arc::new(move |args| {
            f(args).map(|out| out.map(response::success)).boxed()
        })));
        self
    }

    /// Handler taking over the request and the response.
    pub fn handle_raw<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Request, RawContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.handler = Some(Handler::Raw(Arc::new(move |req, ctx| f(req, ctx).boxed())));
        self
    }

    /// Validate the declaration and resolve its path parameters and roles.
    pub(crate) fn compile(self) -> Result<CompiledRoute, ConfigError> {
        let Route {
            method,
            uri,
            path,
            query,
            body,
            form,
            response,
            paging,
            roles,
            custom_roles,
            tags,
            summary,
            description,
            handler,
        } = self;
        if ![Method::GET, Method::POST, Method::PUT, Method::DELETE].contains(&method) {
            return Err(ConfigError::InvalidRoute(format!("{} {}: unsupported method", method, uri)));
        }
        if !uri.starts_with('/') {
            return Err(ConfigError::InvalidRoute(format!("{} {}: path must start with '/'", method, uri)));
        }
        let handler = handler.ok_or_else(|| ConfigError::InvalidRoute(format!("{} {}: no handler", method, uri)))?;

        let placeholders: Vec<String> = path_param_pattern()
            .captures_iter(&uri)
            .map(|c| c[1].to_string())
            .collect();
        if let Some((undeclared, _)) = path.iter().find(|(name, _)| !placeholders.contains(name)) {
            return Err(ConfigError::InvalidRoute(format!(
                "{} {}: path parameter '{}' is not in the template",
                method, uri, undeclared
            )));
        }
        let path_params = placeholders
            .iter()
            .map(|name| {
                let spec = path
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, s)| s.clone())
                    .unwrap_or_else(|| FieldSpec::new(TypeDescriptor::string()));
                (name.clone(), spec)
            })
            .collect();

        let mut parsed = roles.iter().map(|r| Role::parse(r)).collect::<Result<Vec<_>, _>>()?;
        parsed.extend(custom_roles);

        Ok(CompiledRoute {
            native_path: native_path(&uri),
            method,
            uri,
            path: path_params,
            query,
            body,
            form,
            response,
            paging,
            policy: Policy::new(parsed),
            tags,
            summary,
            description,
            handler,
        })
    }
}

/// `{name}` placeholders rewritten to the router's `:name` syntax.
pub(crate) fn native_path(uri: &str) -> String {
    path_param_pattern().replace_all(uri, ":$1").into_owned()
}

/// A validated route, ready to install and document.
pub struct CompiledRoute {
    pub method: Method,
    /// Template as declared, with `{name}` placeholders.
    pub uri: String,
    pub native_path: String,
    pub path: Vec<(String, FieldSpec)>,
    pub query: Params,
    pub body: Params,
    pub form: Vec<(String, FieldSpec)>,
    pub response: Option<FieldType>,
    pub paging: bool,
    pub policy: Policy,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub handler: Handler,
}

impl CompiledRoute {
    pub fn is_multipart(&self) -> bool {
        !self.form.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_default_to_string_params() {
        let route = Route::get("/orgs/{org}/users/{id}")
            .path_param("id", TypeDescriptor::int())
            .handle(|_| async { Ok(()) })
            .compile()
            .unwrap();
        assert_eq!(route.native_path, "/orgs/:org/users/:id");
        let names: Vec<&str> = route.path.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["org", "id"]);
        assert_eq!(route.path[0].1.ty, FieldType::from(TypeDescriptor::string()));
        assert_eq!(route.path[1].1.ty, FieldType::from(TypeDescriptor::int()));
    }

    #[test]
    fn declaration_errors() {
        assert!(Route::get("/x").compile().is_err());
        assert!(Route::get("x").handle(|_| async { Ok(()) }).compile().is_err());
        assert!(Route::get("/x")
            .path_param("id", TypeDescriptor::int())
            .handle(|_| async { Ok(()) })
            .compile()
            .is_err());
        assert!(matches!(
            Route::get("/x").roles(["owner:exit()"]).handle(|_| async { Ok(()) }).compile(),
            Err(ConfigError::InvalidRole { .. })
        ));
    }

    #[test]
    fn form_fields_make_multipart() {
        let route = Route::post("/upload")
            .form_field("file", TypeDescriptor::binary())
            .handle(|_| async { Ok(()) })
            .compile()
            .unwrap();
        assert!(route.is_multipart());
        assert!(route.body.is_none());
    }
}
