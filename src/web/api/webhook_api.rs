use salvo::prelude::*;
use tracing::error;

use crate::common::error::ApiError;
use crate::service::bot::{self, Update};
use crate::web::app_context;

/// 立即应答，更新在后台任务中处理，失败只记日志。
#[handler]
async fn webhook(req: &mut Request, depot: &mut Depot) -> Result<&'static str, ApiError> {
    let ctx = app_context(depot)?;
    let update = req
        .parse_json::<Update>()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = bot::handle_update(&ctx, update).await {
            error!("处理 Telegram 更新失败：{:#}", e);
        }
    });
    Ok("OK")
}

pub fn webhook_router() -> Router {
    Router::with_path("webhook").post(webhook)
}
