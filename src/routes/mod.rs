//! Declared routes: permissions, parameter coercion, dispatch and installation.

mod dispatch;
mod role;
mod route;

pub(crate) use dispatch::install;
pub use role::{Check, Expr, Policy, Role, RoleFn, ANY_ROLE};
pub use route::{
    CompiledRoute, DataHandler, Handler, Params, RawContext, RawHandler, RequestArgs, Route, UploadedFile,
};
