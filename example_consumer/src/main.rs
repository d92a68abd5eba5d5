//! Demo service: authors and posts declared with blueprint-sdk.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Needs `DATABASE_URL`; set `DB_SYNC=true` on first start to create the tables.

use axum::http::StatusCode;
use blueprint_sdk::{
    AppError, AuthService, ColumnSpec, EntityBuilder, FieldSpec, QueryOptions, QueryScope, Registry, RequestArgs,
    Route, ServerOptions, TypeDescriptor,
};
use serde_json::{json, Value};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    blueprint_sdk::init_tracing();
    let options = ServerOptions::from_env()?;
    let tx = blueprint_sdk::connect(&options).await?;
    let auth = AuthService::new(&options.auth);

    let mut registry = Registry::new();
    let authors_id = registry.entity(
        EntityBuilder::new("authors")
            .with_all()
            .column("name", ColumnSpec::new(TypeDescriptor::string_len(120)).required().unique())
            .column("email", ColumnSpec::new(TypeDescriptor::string()).secure().comment("contact address")),
    )?;
    let posts_id = registry.entity(
        EntityBuilder::new("posts")
            .with_all()
            .column("title", ColumnSpec::new(TypeDescriptor::string()).required())
            .column("body", ColumnSpec::new(TypeDescriptor::text()))
            .column(
                "status",
                ColumnSpec::new(TypeDescriptor::enumeration(["draft", "published"]))
                    .default_value(json!("draft")),
            )
            .column("author", ColumnSpec::new(TypeDescriptor::int()).connect_to(&authors_id).reverse_define()),
    )?;
    registry.finalize()?;
    let posts = registry.model(&posts_id)?;

    let author_vo = registry.value_object(
        "Author",
        [
            ("id", FieldSpec::new(TypeDescriptor::int())),
            ("name", FieldSpec::new(TypeDescriptor::string())),
        ],
        Some(&authors_id),
    )?;
    let post_vo = registry.value_object(
        "Post",
        [
            ("id", FieldSpec::new(TypeDescriptor::int())),
            ("title", FieldSpec::new(TypeDescriptor::string()).required()),
            ("body", FieldSpec::new(TypeDescriptor::text())),
            ("status", FieldSpec::new(TypeDescriptor::enumeration(["draft", "published"]))),
            ("author", FieldSpec::new(&author_vo).comment("writer of the post")),
            ("created_at", FieldSpec::new(TypeDescriptor::date_time())),
        ],
        Some(&posts_id),
    )?;
    let post_input = registry.value_object(
        "PostInput",
        [
            ("title", FieldSpec::new(TypeDescriptor::string()).required()),
            ("body", FieldSpec::new(TypeDescriptor::text())),
            ("status", FieldSpec::new(TypeDescriptor::enumeration(["draft", "published"]))),
        ],
        None,
    )?;

    let publish = {
        let posts = Arc::clone(&posts);
        tx.wrap(move |repo: blueprint_sdk::Repository, id: i64| {
            let posts = Arc::clone(&posts);
            async move {
                let found = repo
                    .find_one(&posts, QueryOptions::new().filter("id", id))
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("post {}", id)))?;
                let mut row = found;
                row.insert("status".into(), json!("published"));
                repo.save(&posts, &row).await
            }
        })
    };

    {
        let auth = auth.clone();
        registry.route(
            Route::post("/auth/token")
                .body_field("id", FieldSpec::new(TypeDescriptor::int()).required())
                .body_field("roles", FieldSpec::new(TypeDescriptor::array(TypeDescriptor::string())))
                .tags(["auth"])
                .summary("Issue a demo token pair")
                .handle(move |args: RequestArgs| {
                    let auth = auth.clone();
                    async move {
                        let id = args.body.get("id").cloned().unwrap_or(Value::Null);
                        if id.is_null() {
                            return Err(AppError::status(StatusCode::BAD_REQUEST, "id is required"));
                        }
                        let roles = args.body.get("roles").cloned().unwrap_or_else(|| json!([]));
                        let claims = json!({ "id": id, "roles": roles });
                        let refresh = json!({ "id": id, "refresh": true });
                        auth.issue(
                            claims.as_object().cloned().unwrap_or_default(),
                            refresh.as_object().cloned().unwrap_or_default(),
                        )
                    }
                }),
        )?;
    }

    {
        let (tx, vo) = (tx.clone(), Arc::clone(&post_vo));
        registry.route(
            Route::get("/posts")
                .query_field("status", TypeDescriptor::enumeration(["draft", "published"]))
                .paging()
                .response(TypeDescriptor::paging(&post_vo))
                .roles(["any"])
                .tags(["posts"])
                .summary("List posts")
                .handle(move |args: RequestArgs| {
                    let (tx, vo) = (tx.clone(), Arc::clone(&vo));
                    async move {
                        let page = args.page.clone().unwrap_or_default();
                        tx.run(|repo| async move {
                            let scope = QueryScope::new().user(args.user.as_ref()).params(&args.params);
                            let options = QueryOptions::new().filters(args.query.clone());
                            repo.paginate_as(&vo, options, &page, &scope).await
                        })
                        .await
                    }
                }),
        )?;
    }

    {
        let (tx, vo) = (tx.clone(), Arc::clone(&post_vo));
        registry.route(
            Route::get("/posts/{id}")
                .path_param("id", TypeDescriptor::int())
                .response(&post_vo)
                .tags(["posts"])
                .summary("Read a post")
                .handle(move |args: RequestArgs| {
                    let (tx, vo) = (tx.clone(), Arc::clone(&vo));
                    async move {
                        let id = args.path.get("id").cloned().unwrap_or(Value::Null);
                        tx.run(|repo| async move {
                            let options = QueryOptions::new().filter("id", id);
                            repo.export_one(&vo, options, &QueryScope::new())
                                .await?
                                .ok_or_else(|| AppError::NotFound("post".into()))
                        })
                        .await
                    }
                }),
        )?;
    }

    {
        let (tx, posts, vo) = (tx.clone(), Arc::clone(&posts), Arc::clone(&post_vo));
        registry.route(
            Route::post("/posts")
                .body(&post_input)
                .response(&post_vo)
                .roles(["author", "admin"])
                .tags(["posts"])
                .summary("Create a post")
                .handle(move |args: RequestArgs| {
                    let (tx, posts, vo) = (tx.clone(), Arc::clone(&posts), Arc::clone(&vo));
                    async move {
                        let mut values = args.body;
                        if let Some(user) = &args.user {
                            values.insert("author".into(), user.id.clone());
                        }
                        let row = tx.run(|repo| async move { repo.create(&posts, values).await }).await?;
                        Ok(vo.map(&row))
                    }
                }),
        )?;
    }

    {
        let publish = publish.clone();
        registry.route(
            Route::put("/posts/{id}/publish")
                .path_param("id", TypeDescriptor::long())
                .roles(["admin"])
                .tags(["posts"])
                .summary("Publish a post")
                .handle(move |args: RequestArgs| {
                    let publish = publish.clone();
                    async move {
                        let id = args.path.get("id").and_then(Value::as_i64).unwrap_or_default();
                        publish.call(id).await
                    }
                }),
        )?;
    }

    {
        let (tx, vo) = (tx.clone(), Arc::clone(&post_vo));
        registry.route(
            Route::get("/authors/{id}/drafts")
                .path_param("id", TypeDescriptor::int())
                .response(TypeDescriptor::array(&post_vo))
                .roles(["admin", "author:params.id == user.id"])
                .tags(["authors"])
                .summary("Drafts of one author")
                .handle(move |args: RequestArgs| {
                    let (tx, vo) = (tx.clone(), Arc::clone(&vo));
                    async move {
                        let id = args.path.get("id").cloned().unwrap_or(Value::Null);
                        tx.run(|repo| async move {
                            let options = QueryOptions::new().filter("author", id).filter("status", "draft");
                            repo.export_many(&vo, options, &QueryScope::new()).await
                        })
                        .await
                    }
                }),
        )?;
    }

    {
        let (tx, posts) = (tx.clone(), Arc::clone(&posts));
        registry.route(
            Route::delete("/posts/{id}")
                .path_param("id", TypeDescriptor::int())
                .roles(["admin"])
                .tags(["posts"])
                .summary("Delete a post")
                .handle(move |args: RequestArgs| {
                    let (tx, posts) = (tx.clone(), Arc::clone(&posts));
                    async move {
                        let id = args.path.get("id").cloned().unwrap_or(Value::Null);
                        let filters = QueryOptions::new().filter("id", id).filters;
                        let removed = tx.run(|repo| async move { repo.destroy_all(&posts, filters).await }).await?;
                        Ok(json!({ "removed": removed }))
                    }
                }),
        )?;
    }

    let storage = Arc::clone(tx.storage());
    blueprint_sdk::run(registry, options, storage.as_ref(), auth).await?;
    Ok(())
}
