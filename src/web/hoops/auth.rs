use salvo::http::header::AUTHORIZATION;
use salvo::prelude::*;
use tracing::warn;

use crate::common::error::ApiError;
use crate::web::app_context;

/// 校验 `Authorization: Bearer <token>`。未配置 token 时拒绝所有请求。
#[handler]
pub async fn bearer_auth(req: &mut Request, depot: &mut Depot, res: &mut Response, ctrl: &mut FlowCtrl) {
    let expected = match app_context(depot) {
        Ok(ctx) => ctx.config.dashboard.api_token.clone(),
        Err(e) => {
            res.render(e);
            ctrl.skip_rest();
            return;
        }
    };

    let given = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match given {
        Some(token) if !expected.is_empty() && token == expected => {}
        _ => {
            warn!("拒绝未授权的管理端请求：{}", req.uri().path());
            res.render(ApiError::Unauthorized("invalid or missing token".into()));
            ctrl.skip_rest();
        }
    }
}
