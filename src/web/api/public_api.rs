use salvo::prelude::*;

use crate::common::error::ApiError;
use crate::service::catalog::{self, PublicFeed};
use crate::web::app_context;

/// 公开的可用配置列表，可按国家代码过滤。
#[handler]
async fn list_active(req: &mut Request, depot: &mut Depot) -> Result<Json<PublicFeed>, ApiError> {
    let ctx = app_context(depot)?;
    let limit = req.query::<usize>("limit");
    let country = req.query::<String>("country");
    Ok(Json(catalog::public_feed(&ctx.repo(), country.as_deref(), limit).await))
}

pub fn public_router() -> Router {
    Router::with_path("api/configs").get(list_active)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use salvo::prelude::*;
    use salvo::test::{ResponseExt, TestClient};
    use serde_json::Value;

    use crate::testing::{StubFetcher, StubProber, active, config_aged, context, dead};
    use crate::web::router;

    #[tokio::test]
    async fn test_country_filter() {
        let (ctx, _) = context(StubProber::new(active(80)), StubFetcher::default());
        let now = Utc::now();
        ctx.repo()
            .save_configs(&[
                config_aged("vless://a@up.example:443", Some(active(90)), 0, now),
                config_aged("vless://a@down.example:443", Some(dead()), 0, now),
            ])
            .await
            .unwrap();
        let service = Service::new(router(ctx));

        let mut res = TestClient::get("http://127.0.0.1:8698/api/configs?country=de").send(&service).await;
        let body: Value = res.take_json().await.unwrap();
        assert_eq!(body["count"], 1);
        assert_eq!(body["country"], "DE");
        assert_eq!(body["configs"][0], "vless://a@up.example:443");

        let mut res = TestClient::get("http://127.0.0.1:8698/api/configs?country=us").send(&service).await;
        let body: Value = res.take_json().await.unwrap();
        assert_eq!(body["count"], 0);
    }
}
