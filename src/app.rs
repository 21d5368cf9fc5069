//! 进程级共享的协作方集合。
//!
//! 除了这些句柄，不在内存中保留任何跨请求状态；每次执行通过 [`AppContext::repo`]
//! 拿到一个带短时缓存的新仓库。

use std::sync::Arc;

use crate::db::{KvStore, Repo};
use crate::fetcher::TextFetcher;
use crate::model::AppConfig;
use crate::notifier::Notifier;
use crate::service::dispatcher::Dispatcher;
use crate::service::prober::Probe;
use crate::service::storage::StorageManager;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn KvStore>,
    pub prober: Arc<dyn Probe>,
    pub fetcher: Arc<dyn TextFetcher>,
    pub notifier: Arc<dyn Notifier>,
    pub dispatcher: Dispatcher,
}

impl AppContext {
    pub fn repo(&self) -> Repo {
        Repo::new(self.store.clone())
    }

    pub fn storage(&self) -> StorageManager {
        StorageManager::new(self.config.storage.clone(), self.prober.clone())
    }

    pub fn admin_chat(&self) -> Option<&str> {
        Some(self.config.telegram.admin_chat_id.as_str()).filter(|id| !id.is_empty())
    }

    pub fn is_admin(&self, chat_id: &str) -> bool {
        self.admin_chat() == Some(chat_id)
    }
}
