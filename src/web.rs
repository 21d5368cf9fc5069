//! # web 模块
//!
//! 基于 salvo 的 HTTP 入口：Telegram webhook、公开配置列表与管理端 API。
//! [`AppContext`] 通过 `affix_state` 注入到每个请求的 `Depot`。

pub mod api;
pub mod hoops;

use anyhow::anyhow;
use salvo::affix_state;
use salvo::prelude::*;
use tracing::info;

use crate::app::AppContext;
use crate::common::error::ApiError;

const BANNER: &str = "ConfigCourier is running. Dashboard API: /dashboard/api";

/// 从 `Depot` 中取出共享上下文。
pub fn app_context(depot: &Depot) -> Result<AppContext, ApiError> {
    depot
        .obtain::<AppContext>()
        .cloned()
        .map_err(|_| ApiError::AnyhowError(anyhow!("AppContext 未注入")))
}

#[handler]
async fn index(depot: &mut Depot, res: &mut Response) -> Result<(), ApiError> {
    let settings = app_context(depot)?.repo().settings().await;
    let target = Some(settings.redirect_url)
        .filter(|_| settings.enable_redirect)
        .filter(|u| url::Url::parse(u).is_ok());
    match target {
        Some(url) => res.render(Redirect::found(url)),
        None => res.render(Text::Plain(BANNER)),
    }
    Ok(())
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .hoop(affix_state::inject(ctx))
        .get(index)
        .push(api::webhook_api::webhook_router())
        .push(api::public_api::public_router())
        .push(api::dashboard_api::dashboard_router())
}

pub async fn serve(ctx: AppContext) {
    let bind = ctx.config.server.bind.clone();
    info!("🌐 HTTP 服务监听 {}", bind);
    let acceptor = TcpListener::new(bind).bind().await;
    Server::new(acceptor).serve(router(ctx)).await;
}
