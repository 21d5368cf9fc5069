//! 管理端 API，全部挂在 bearer token 校验之后。

use chrono::Utc;
use salvo::prelude::*;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::common::error::ApiError;
use crate::model::{AvailabilityResult, VoteKind};
use crate::service::catalog::{self, ConfigPage, DeleteOutcome, SortKey, Stats};
use crate::service::cleanup::{self, CleanupReport};
use crate::service::ingestion::{self, IngestReport};
use crate::service::template::default_templates;
use crate::service::{ledger, submission};
use crate::web::app_context;
use crate::web::hoops::auth::bearer_auth;

/// 管理端投票统一使用的投票人 id
const DASHBOARD_VOTER: &str = "dashboard";
const SUBMISSION_PAGE: usize = 50;

#[derive(Deserialize)]
struct LinkBody {
    url: String,
}

#[derive(Deserialize)]
struct ChannelBody {
    channel_id: String,
}

#[derive(Deserialize)]
struct TemplateBody {
    #[serde(rename = "type")]
    key: String,
    template: String,
}

#[derive(Deserialize)]
struct IdBody {
    id: String,
}

#[derive(Deserialize)]
struct SettingBody {
    key: String,
    value: Value,
}

#[derive(Deserialize)]
struct TestBody {
    config: String,
}

#[derive(Deserialize)]
struct BatchItem {
    hash: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VoteBody {
    Batch { votes: Vec<BatchItem> },
    Single { config_hash: String, vote: String },
}

async fn body<T: DeserializeOwned>(req: &mut Request) -> Result<T, ApiError> {
    req.parse_json::<T>().await.map_err(|e| ApiError::BadRequest(e.to_string()))
}

#[handler]
async fn show_stats(depot: &mut Depot) -> Result<Json<Stats>, ApiError> {
    let ctx = app_context(depot)?;
    Ok(Json(catalog::stats(&ctx.repo()).await))
}

#[handler]
async fn list_links(depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let ctx = app_context(depot)?;
    Ok(Json(json!({ "links": ctx.repo().links().await })))
}

#[handler]
async fn add_link(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let ctx = app_context(depot)?;
    let LinkBody { url } = body(req).await?;
    let repo = ctx.repo();
    let mut links = repo.links().await;
    if !links.contains(&url) {
        links.push(url);
        repo.save_links(&links).await?;
    }
    Ok(Json(json!({ "links": links })))
}

#[handler]
async fn remove_link(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let ctx = app_context(depot)?;
    let LinkBody { url } = body(req).await?;
    let repo = ctx.repo();
    let mut links = repo.links().await;
    links.retain(|l| *l != url);
    repo.save_links(&links).await?;
    Ok(Json(json!({ "links": links })))
}

#[handler]
async fn list_channels(depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let ctx = app_context(depot)?;
    Ok(Json(json!({ "channels": ctx.repo().channels().await })))
}

#[handler]
async fn add_channel(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let ctx = app_context(depot)?;
    let ChannelBody { channel_id } = body(req).await?;
    let repo = ctx.repo();
    let mut channels = repo.channels().await;
    if !channels.contains(&channel_id) {
        channels.push(channel_id);
        repo.save_channels(&channels).await?;
    }
    Ok(Json(json!({ "channels": channels })))
}

#[handler]
async fn remove_channel(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let ctx = app_context(depot)?;
    let ChannelBody { channel_id } = body(req).await?;
    let repo = ctx.repo();
    let mut channels = repo.channels().await;
    channels.retain(|c| *c != channel_id);
    repo.save_channels(&channels).await?;
    Ok(Json(json!({ "channels": channels })))
}

/// 未知的排序方式按最新处理。
#[handler]
async fn list_configs(req: &mut Request, depot: &mut Depot) -> Result<Json<ConfigPage>, ApiError> {
    let ctx = app_context(depot)?;
    let sort = req.query::<String>("sort").and_then(|s| s.parse::<SortKey>().ok()).unwrap_or_default();
    let limit = req.query::<usize>("limit");
    let page = req.query::<usize>("page");
    Ok(Json(catalog::list_configs(&ctx.repo(), sort, limit, page).await))
}

#[handler]
async fn delete_config(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let ctx = app_context(depot)?;
    let hash = req.param::<String>("hash").ok_or_else(|| ApiError::BadRequest("missing hash".into()))?;
    match catalog::delete_config(&ctx, &hash).await? {
        DeleteOutcome::Deleted => Ok(Json(json!({ "deleted": true, "hash": hash }))),
        DeleteOutcome::NotFound => Err(ApiError::NotFound(hash)),
    }
}

/// 支持单条 `{config_hash, vote}` 与批量 `{votes: [{hash, type}]}`，批量中无效的条目被跳过。
#[handler]
async fn cast_votes(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let ctx = app_context(depot)?;
    let repo = ctx.repo();
    let now = Utc::now();
    match body::<VoteBody>(req).await? {
        VoteBody::Single { config_hash, vote } => {
            let kind = vote.parse::<VoteKind>().map_err(ApiError::BadRequest)?;
            let votes = ledger::vote(&repo, &config_hash, DASHBOARD_VOTER, kind, now).await?;
            Ok(Json(json!({ "votes": votes })))
        }
        VoteBody::Batch { votes } => {
            let mut results = Vec::new();
            for item in votes {
                let (Some(hash), Some(kind)) = (item.hash, item.kind.and_then(|k| k.parse::<VoteKind>().ok())) else {
                    continue;
                };
                let record = ledger::vote(&repo, &hash, DASHBOARD_VOTER, kind, now).await?;
                results.push(json!({ "hash": hash, "votes": record }));
            }
            Ok(Json(json!({ "results": results })))
        }
    }
}

#[handler]
async fn show_templates(depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let repo = app_context(depot)?.repo();
    let settings = repo.settings().await;
    Ok(Json(json!({ "templates": repo.templates().await, "active_template": settings.active_template })))
}

#[handler]
async fn save_template(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let repo = app_context(depot)?.repo();
    let TemplateBody { key, template } = body(req).await?;
    let mut templates = repo.templates().await;
    templates.insert(key, template);
    repo.save_templates(&templates).await?;
    Ok(Json(json!({ "templates": templates })))
}

#[handler]
async fn reset_templates(depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let repo = app_context(depot)?.repo();
    let templates = default_templates();
    repo.save_templates(&templates).await?;
    Ok(Json(json!({ "templates": templates })))
}

#[handler]
async fn list_submissions(depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let repo = app_context(depot)?.repo();
    Ok(Json(json!({ "submissions": submission::pending(&repo, SUBMISSION_PAGE).await })))
}

#[handler]
async fn approve_submission(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let ctx = app_context(depot)?;
    let IdBody { id } = body(req).await?;
    match submission::approve(&ctx, &id).await? {
        Some(report) => Ok(Json(json!({ "status": "approved", "published": report.published, "stored": report.stored }))),
        None => Err(ApiError::NotFound(id)),
    }
}

#[handler]
async fn reject_submission(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let repo = app_context(depot)?.repo();
    let IdBody { id } = body(req).await?;
    submission::reject(&repo, &id).await?;
    Ok(Json(json!({ "status": "rejected" })))
}

#[handler]
async fn show_settings(depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let repo = app_context(depot)?.repo();
    Ok(Json(json!({ "settings": repo.settings().await })))
}

/// `key == "all"` 时 `value` 为需要合并的字段对象。发送速率立即生效。
#[handler]
async fn update_setting(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let ctx = app_context(depot)?;
    let repo = ctx.repo();
    let SettingBody { key, value } = body(req).await?;
    let settings = repo
        .settings()
        .await
        .apply(&key, value)
        .map_err(|e| ApiError::BadRequest(format!("{}: {}", key, e)))?;
    repo.save_settings(&settings).await?;
    ctx.dispatcher.set_rate(settings.rate_limit_per_second);
    Ok(Json(json!({ "settings": settings })))
}

#[handler]
async fn fetch_now(depot: &mut Depot) -> Result<Json<IngestReport>, ApiError> {
    let ctx = app_context(depot)?;
    Ok(Json(ingestion::run_ingestion_cycle(&ctx).await?))
}

#[handler]
async fn cleanup_now(depot: &mut Depot) -> Result<Json<CleanupReport>, ApiError> {
    let repo = app_context(depot)?.repo();
    Ok(Json(cleanup::run_cleanup(&repo, Utc::now()).await?))
}

#[handler]
async fn retest_all(depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let ctx = app_context(depot)?;
    let tested = catalog::retest_all(&ctx).await?;
    Ok(Json(json!({ "tested": tested })))
}

#[handler]
async fn test_config(req: &mut Request, depot: &mut Depot) -> Result<Json<AvailabilityResult>, ApiError> {
    let ctx = app_context(depot)?;
    let TestBody { config } = body(req).await?;
    Ok(Json(catalog::test_one(&ctx, &config).await))
}

pub fn dashboard_router() -> Router {
    Router::with_path("dashboard/api")
        .hoop(bearer_auth)
        .push(Router::with_path("stats").get(show_stats))
        .push(Router::with_path("links").get(list_links).post(add_link).delete(remove_link))
        .push(Router::with_path("channels").get(list_channels).post(add_channel).delete(remove_channel))
        .push(Router::with_path("configs").get(list_configs).push(Router::with_path("{hash}").delete(delete_config)))
        .push(Router::with_path("vote").post(cast_votes))
        .push(
            Router::with_path("templates")
                .get(show_templates)
                .post(save_template)
                .push(Router::with_path("reset").post(reset_templates)),
        )
        .push(
            Router::with_path("submissions")
                .get(list_submissions)
                .push(Router::with_path("approve").post(approve_submission))
                .push(Router::with_path("reject").post(reject_submission)),
        )
        .push(Router::with_path("settings").get(show_settings).post(update_setting))
        .push(Router::with_path("fetch-now").post(fetch_now))
        .push(Router::with_path("cleanup").post(cleanup_now))
        .push(Router::with_path("retest-all").post(retest_all))
        .push(Router::with_path("test").post(test_config))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use salvo::test::{RequestBuilder, ResponseExt, TestClient};

    use super::*;
    use crate::app::AppContext;
    use crate::service::codec;
    use crate::testing::{StubFetcher, StubProber, active, config_aged, context, dead};
    use crate::web::router;

    const BASE: &str = "http://127.0.0.1:8698/dashboard/api";

    fn service(prober: StubProber) -> (AppContext, Service) {
        let (ctx, _) = context(prober, StubFetcher::default());
        let mut config = (*ctx.config).clone();
        config.dashboard.api_token = "secret".into();
        let ctx = AppContext { config: Arc::new(config), ..ctx };
        (ctx.clone(), Service::new(router(ctx)))
    }

    fn authed(builder: RequestBuilder) -> RequestBuilder {
        builder.add_header("authorization", "Bearer secret", true)
    }

    #[tokio::test]
    async fn test_links_add_and_remove() {
        let (ctx, service) = service(StubProber::new(active(80)));
        let url = format!("{}/links", BASE);

        for _ in 0..2 {
            let res = authed(TestClient::post(&url)).json(&json!({ "url": "https://x.example/sub" })).send(&service).await;
            assert_eq!(res.status_code, Some(StatusCode::OK));
        }
        assert_eq!(ctx.repo().links().await, vec!["https://x.example/sub".to_string()]);

        let mut res = authed(TestClient::delete(&url)).json(&json!({ "url": "https://x.example/sub" })).send(&service).await;
        let body: Value = res.take_json().await.unwrap();
        assert_eq!(body["links"], json!([]));

        let res = authed(TestClient::post(&url)).json(&json!({ "link": 1 })).send(&service).await;
        assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_delete_config() {
        let (ctx, service) = service(StubProber::new(active(80)));
        let config = config_aged("vless://a@h.example:443", Some(active(80)), 0, Utc::now());
        let hash = config.content_hash.clone();
        ctx.repo().save_configs(&[config]).await.unwrap();

        let res = authed(TestClient::delete(format!("{}/configs/nope", BASE))).send(&service).await;
        assert_eq!(res.status_code, Some(StatusCode::NOT_FOUND));

        let mut res = authed(TestClient::delete(format!("{}/configs/{}", BASE, hash))).send(&service).await;
        let body: Value = res.take_json().await.unwrap();
        assert_eq!(body["deleted"], true);
        assert!(ctx.repo().configs().await.is_empty());
    }

    #[tokio::test]
    async fn test_single_and_batch_votes() {
        let (ctx, service) = service(StubProber::new(active(80)));
        let url = format!("{}/vote", BASE);

        let mut res = authed(TestClient::post(&url)).json(&json!({ "config_hash": "h1", "vote": "like" })).send(&service).await;
        let body: Value = res.take_json().await.unwrap();
        assert_eq!(body["votes"]["likes"], json!(["dashboard"]));

        let batch = json!({ "votes": [{ "hash": "h1", "type": "dislike" }, { "hash": "h2" }, { "hash": "h3", "type": "like" }] });
        let mut res = authed(TestClient::post(&url)).json(&batch).send(&service).await;
        let body: Value = res.take_json().await.unwrap();
        assert_eq!(body["results"].as_array().unwrap().len(), 2);
        assert_eq!(ctx.repo().votes("h1").await.dislikes, vec!["dashboard".to_string()]);

        let res = authed(TestClient::post(&url)).json(&json!({ "config_hash": "h1", "vote": "meh" })).send(&service).await;
        assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_settings_update() {
        let (ctx, service) = service(StubProber::new(active(80)));
        let url = format!("{}/settings", BASE);

        let res = authed(TestClient::post(&url)).json(&json!({ "key": "min_likes_to_keep", "value": 4 })).send(&service).await;
        assert_eq!(res.status_code, Some(StatusCode::OK));
        assert_eq!(ctx.repo().settings().await.min_likes_to_keep, 4);

        let res = authed(TestClient::post(&url)).json(&json!({ "key": "min_likes_to_keep", "value": "lots" })).send(&service).await;
        assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
        assert_eq!(ctx.repo().settings().await.min_likes_to_keep, 4);
    }

    #[tokio::test]
    async fn test_settings_update_validates_and_retunes_dispatcher() {
        let (ctx, service) = service(StubProber::new(active(80)));
        let url = format!("{}/settings", BASE);

        let res = authed(TestClient::post(&url)).json(&json!({ "key": "rate_limit_per_second", "value": 5 })).send(&service).await;
        assert_eq!(res.status_code, Some(StatusCode::OK));
        assert_eq!(ctx.dispatcher.rate(), 5);

        for (key, value) in [("auto_delete_days", json!(i64::MAX)), ("pending_delete_hours", json!(-1))] {
            let res = authed(TestClient::post(&url)).json(&json!({ "key": key, "value": value })).send(&service).await;
            assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
        }
        let stored = ctx.repo().settings().await;
        assert_eq!(stored.auto_delete_days, 3);
        assert_eq!(stored.pending_delete_hours, 48);
        assert_eq!(ctx.dispatcher.rate(), 5);
    }

    #[tokio::test]
    async fn test_submission_review() {
        let (ctx, service) = service(StubProber::new(active(80)));
        let uri = "trojan://pw@t.example:443#mine";
        submission::submit(&ctx.repo(), uri, "9", None, Utc::now()).await.unwrap();

        let res = authed(TestClient::post(format!("{}/submissions/approve", BASE)))
            .json(&json!({ "id": "missing" }))
            .send(&service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::NOT_FOUND));

        let mut res = authed(TestClient::get(format!("{}/submissions", BASE))).send(&service).await;
        let body: Value = res.take_json().await.unwrap();
        assert_eq!(body["submissions"].as_array().unwrap().len(), 1);

        let mut res = authed(TestClient::post(format!("{}/submissions/approve", BASE)))
            .json(&json!({ "id": codec::hash(uri) }))
            .send(&service)
            .await;
        let body: Value = res.take_json().await.unwrap();
        assert_eq!(body["status"], "approved");
        assert_eq!(body["stored"], 1);
    }

    #[tokio::test]
    async fn test_retest_all_counts() {
        let prober = StubProber::new(active(80)).with("gone.example", dead());
        let (ctx, service) = service(prober);
        let now = Utc::now();
        ctx.repo()
            .save_configs(&[
                config_aged("vless://a@up.example:443", Some(active(80)), 0, now),
                config_aged("vless://a@gone.example:443", Some(active(80)), 0, now),
            ])
            .await
            .unwrap();

        let mut res = authed(TestClient::post(format!("{}/retest-all", BASE))).send(&service).await;
        let body: Value = res.take_json().await.unwrap();
        assert_eq!(body["tested"], 2);
        let gone = ctx.repo().configs().await.into_iter().find(|c| c.host.as_deref() == Some("gone.example")).unwrap();
        assert_eq!(gone.failed_probe_count, 1);
    }
}
